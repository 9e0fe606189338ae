//! 通用实体存储：索引列 + JSON 载荷列的键值仓储
//!
//! 每种镜像实体一张表，行结构 = 若干可过滤/排序的索引列 + 一列完整 JSON
//! 载荷。索引列永远由载荷通过纯投影函数重算，禁止手工维护，保证两者
//! 不会脱节。冲突键命中时整行替换（索引列 + 载荷一起换，不留旧值）。

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use crate::mirror::types::{Page, Sort};

/// 表结构声明：表名、全部插入列（含载荷列）、载荷列名、冲突键、建表语句
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub data_column: &'static str,
    pub conflict_keys: &'static [&'static str],
    pub create_sql: &'static str,
}

/// 动态绑定值（不同索引列类型不同，SQL 运行时拼接时统一走这里）
#[derive(Debug, Clone)]
pub enum Bind {
    Str(String),
    I64(i64),
    I32(i32),
    Bool(bool),
}

impl Bind {
    pub fn str(s: &str) -> Self {
        Bind::Str(s.to_string())
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: Bind,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Bind::Str(s) => query.bind(s),
        Bind::I64(i) => query.bind(i),
        Bind::I32(i) => query.bind(i),
        // SQLite 布尔统一存 0/1
        Bind::Bool(b) => query.bind(if b { 1i64 } else { 0i64 }),
    }
}

/// 过滤操作符（只允许对索引列做 AND 组合过滤）
#[derive(Debug, Clone, Copy)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
    Lt,
}

impl FilterOp {
    fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
            FilterOp::Lt => "<",
        }
    }
}

/// 单个过滤条件
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: &'static str,
    pub op: FilterOp,
    pub value: Bind,
}

impl Filter {
    pub fn eq(column: &'static str, value: Bind) -> Self {
        Self {
            column,
            op: FilterOp::Eq,
            value,
        }
    }

    pub fn gte(column: &'static str, value: Bind) -> Self {
        Self {
            column,
            op: FilterOp::Gte,
            value,
        }
    }

    pub fn lte(column: &'static str, value: Bind) -> Self {
        Self {
            column,
            op: FilterOp::Lte,
            value,
        }
    }

    pub fn lt(column: &'static str, value: Bind) -> Self {
        Self {
            column,
            op: FilterOp::Lt,
            value,
        }
    }
}

/// 实体映射器：声明表结构 + 索引列投影
///
/// `index_fields` 必须是载荷的确定性纯投影（同一载荷永远算出同样的
/// 索引列），每次写入都重算。载荷本身由 serde 负责编解码。
pub trait EntityMapper: Send + Sync {
    type Entity: Serialize + DeserializeOwned + Send + Sync;

    fn table(&self) -> &'static TableSpec;

    fn index_fields(&self, entity: &Self::Entity) -> Vec<(&'static str, Bind)>;
}

/// 通用实体存储
pub struct EntityStore<M: EntityMapper> {
    db: Pool<Sqlite>,
    mapper: M,
    upsert_sql: String,
}

fn placeholders(n: usize) -> String {
    if n == 0 {
        String::new()
    } else {
        vec!["?"; n].join(",")
    }
}

/// 预构建 upsert 语句：冲突键命中时把所有非键列换成 excluded 值
fn build_upsert_sql(table: &TableSpec) -> String {
    let columns = table.columns.join(", ");
    let values = placeholders(table.columns.len());
    let conflict = table.conflict_keys.join(", ");
    let set: Vec<String> = table
        .columns
        .iter()
        .filter(|c| !table.conflict_keys.contains(c))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
        table.name,
        columns,
        values,
        conflict,
        set.join(", ")
    )
}

impl<M: EntityMapper> EntityStore<M> {
    /// 创建存储并初始化表结构
    pub async fn new(db: Pool<Sqlite>, mapper: M) -> Result<Self> {
        let table = mapper.table();
        sqlx::query(table.create_sql)
            .execute(&db)
            .await
            .with_context(|| format!("创建表 {} 失败", table.name))?;
        let upsert_sql = build_upsert_sql(table);
        Ok(Self {
            db,
            mapper,
            upsert_sql,
        })
    }

    pub fn table(&self) -> &'static TableSpec {
        self.mapper.table()
    }

    /// 插入或按冲突键整行替换（单条语句，原子）
    pub async fn upsert(&self, entity: &M::Entity) -> Result<()> {
        let table = self.mapper.table();
        let data = serde_json::to_string(entity)
            .with_context(|| format!("序列化 {} 实体失败", table.name))?;

        let mut fields: std::collections::HashMap<&str, Bind> =
            self.mapper.index_fields(entity).into_iter().collect();

        let mut query = sqlx::query(&self.upsert_sql);
        for col in table.columns {
            if *col == table.data_column {
                query = query.bind(data.clone());
                continue;
            }
            let Some(value) = fields.remove(col) else {
                bail!("表 {} 的索引投影缺少列 {}", table.name, col);
            };
            query = bind_value(query, value);
        }
        query
            .execute(&self.db)
            .await
            .with_context(|| format!("写入 {} 失败", table.name))?;
        Ok(())
    }

    /// 按条件过滤 + 排序 + 分页
    ///
    /// 条件按 AND 组合；limit 为 0 表示返回全部匹配行。
    pub async fn filter(
        &self,
        filters: &[Filter],
        sort: Option<&Sort>,
        page: Page,
    ) -> Result<Vec<M::Entity>> {
        let table = self.mapper.table();
        let mut sql = format!("SELECT {} FROM {}", table.data_column, table.name);

        if !filters.is_empty() {
            let clauses: Vec<String> = filters
                .iter()
                .map(|f| format!("{} {} ?", f.column, f.op.as_sql()))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if let Some(sort) = sort {
            // 排序字段只允许索引列，防止外部输入拼进 SQL
            if !table.columns.contains(&sort.field.as_str()) {
                bail!("表 {} 不支持按 {} 排序", table.name, sort.field);
            }
            sql.push_str(&format!(" ORDER BY {} {}", sort.field, sort.order.as_sql()));
        }

        if page.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", page.limit));
        } else if page.offset > 0 {
            // SQLite 的 OFFSET 依赖 LIMIT 子句
            sql.push_str(" LIMIT -1");
        }
        if page.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", page.offset));
        }

        let mut query = sqlx::query(&sql);
        for f in filters {
            query = bind_value(query, f.value.clone());
        }

        let rows = query
            .fetch_all(&self.db)
            .await
            .with_context(|| format!("查询 {} 失败", table.name))?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.get(table.data_column);
            let entity: M::Entity = serde_json::from_str(&data)
                .with_context(|| format!("反序列化 {} 实体失败", table.name))?;
            entities.push(entity);
        }
        debug!(
            "[Store] {} 过滤查询返回 {} 行 (条件 {} 个)",
            table.name,
            entities.len(),
            filters.len()
        );
        Ok(entities)
    }

    /// 按条件取第一行；无匹配返回 Ok(None)
    pub async fn get_one(&self, filters: &[Filter]) -> Result<Option<M::Entity>> {
        let mut rows = self.filter(filters, None, Page::new(0, 1)).await?;
        Ok(rows.pop())
    }

    /// 按主键 id 列查询；不存在是预期结果，返回 Ok(None)
    pub async fn get_by_id(&self, id: &str) -> Result<Option<M::Entity>> {
        self.get_one(&[Filter::eq("id", Bind::str(id))]).await
    }

    /// 按条件删除，返回删除行数
    pub async fn delete_by(&self, filters: &[Filter]) -> Result<u64> {
        let table = self.mapper.table();
        let mut sql = format!("DELETE FROM {}", table.name);
        if !filters.is_empty() {
            let clauses: Vec<String> = filters
                .iter()
                .map(|f| format!("{} {} ?", f.column, f.op.as_sql()))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        let mut query = sqlx::query(&sql);
        for f in filters {
            query = bind_value(query, f.value.clone());
        }
        let res = query
            .execute(&self.db)
            .await
            .with_context(|| format!("删除 {} 行失败", table.name))?;
        Ok(res.rows_affected())
    }

    /// 按主键 id 列删除
    pub async fn delete_by_id(&self, id: &str) -> Result<u64> {
        self.delete_by(&[Filter::eq("id", Bind::str(id))]).await
    }

    /// 清空整表
    pub async fn delete_all(&self) -> Result<u64> {
        self.delete_by(&[]).await
    }

    /// 表内行数
    pub async fn count(&self) -> Result<i64> {
        let table = self.mapper.table();
        let sql = format!("SELECT COUNT(*) AS total FROM {}", table.name);
        let row = sqlx::query(&sql)
            .fetch_one(&self.db)
            .await
            .with_context(|| format!("统计 {} 行数失败", table.name))?;
        Ok(row.get::<i64, _>("total"))
    }

    /// 底层连接池（跨表联查的派生视图使用）
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.db
    }
}
