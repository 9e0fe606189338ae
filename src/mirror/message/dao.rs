//! 消息表访问层

use anyhow::{bail, Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use crate::mirror::message::models::StoredMessage;
use crate::mirror::store::{Bind, EntityMapper, EntityStore, Filter, TableSpec};
use crate::mirror::types::{Page, Sort};

static MESSAGE_TABLE: TableSpec = TableSpec {
    name: "local_messages",
    columns: &["id", "chat_id", "from_me", "timestamp", "data"],
    data_column: "data",
    conflict_keys: &["id"],
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS local_messages (
            id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL,
            from_me INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL DEFAULT 0,
            data TEXT NOT NULL DEFAULT ''
        )
    "#,
};

pub struct MessageMapper;

impl EntityMapper for MessageMapper {
    type Entity = StoredMessage;

    fn table(&self) -> &'static TableSpec {
        &MESSAGE_TABLE
    }

    fn index_fields(&self, msg: &StoredMessage) -> Vec<(&'static str, Bind)> {
        vec![
            ("id", Bind::str(msg.id())),
            ("chat_id", Bind::str(msg.chat_id())),
            ("from_me", Bind::Bool(msg.from_me())),
            ("timestamp", Bind::I64(msg.timestamp())),
        ]
    }
}

/// 消息查询条件（全部可选，AND 组合）
#[derive(Debug, Clone, Default)]
pub struct MessageFilters {
    pub chat_id: Option<String>,
    pub from_me: Option<bool>,
    pub timestamp_gte: Option<i64>,
    pub timestamp_lte: Option<i64>,
}

impl MessageFilters {
    pub fn for_chat(chat_id: &str) -> Self {
        Self {
            chat_id: Some(chat_id.to_string()),
            ..Default::default()
        }
    }

    fn into_filters(self) -> Vec<Filter> {
        let mut filters = Vec::new();
        if let Some(chat_id) = self.chat_id {
            filters.push(Filter::eq("chat_id", Bind::Str(chat_id)));
        }
        if let Some(from_me) = self.from_me {
            filters.push(Filter::eq("from_me", Bind::Bool(from_me)));
        }
        if let Some(ts) = self.timestamp_gte {
            filters.push(Filter::gte("timestamp", Bind::I64(ts)));
        }
        if let Some(ts) = self.timestamp_lte {
            filters.push(Filter::lte("timestamp", Bind::I64(ts)));
        }
        filters
    }
}

/// 消息存储
pub struct MessageStore {
    store: EntityStore<MessageMapper>,
}

impl MessageStore {
    pub async fn new(db: Pool<Sqlite>) -> Result<Self> {
        let store = EntityStore::new(db, MessageMapper).await?;
        Ok(Self { store })
    }

    pub async fn upsert(&self, msg: &StoredMessage) -> Result<()> {
        self.store.upsert(msg).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredMessage>> {
        self.store.get_by_id(id).await
    }

    /// 列表查询；不指定排序时按时间倒序（最新在前）
    pub async fn list(
        &self,
        filters: MessageFilters,
        sort: Option<Sort>,
        page: Page,
    ) -> Result<Vec<StoredMessage>> {
        let sort = sort.unwrap_or_else(|| Sort::desc("timestamp"));
        self.store
            .filter(&filters.into_filters(), Some(&sort), page)
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<u64> {
        self.store.delete_by_id(id).await
    }

    /// 删除某会话中严格早于 timestamp 的消息；等于 timestamp 的保留
    pub async fn delete_chat_before(&self, chat_id: &str, timestamp: i64) -> Result<u64> {
        let deleted = self
            .store
            .delete_by(&[
                Filter::eq("chat_id", Bind::str(chat_id)),
                Filter::lt("timestamp", Bind::I64(timestamp)),
            ])
            .await?;
        debug!(
            "[MsgDAO] 清理会话 {} 中 {} 之前的消息 {} 条",
            chat_id, timestamp, deleted
        );
        Ok(deleted)
    }

    /// 每个会话取时间最新的一条消息（时间并列时取 id 较大者）
    ///
    /// 排序字段只认 chat_id / timestamp，分页语义与普通列表一致。
    pub async fn last_message_per_chat(
        &self,
        sort: Option<Sort>,
        page: Page,
    ) -> Result<Vec<StoredMessage>> {
        let sort = sort.unwrap_or_else(|| Sort::desc("timestamp"));
        if sort.field != "chat_id" && sort.field != "timestamp" {
            bail!("会话级查询不支持按 {} 排序", sort.field);
        }

        let mut sql = format!(
            "SELECT data FROM ( \
                SELECT data, chat_id, timestamp, \
                       ROW_NUMBER() OVER (PARTITION BY chat_id ORDER BY timestamp DESC, id DESC) AS rn \
                FROM local_messages \
            ) WHERE rn = 1 ORDER BY {} {}",
            sort.field,
            sort.order.as_sql()
        );
        if page.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", page.limit));
        } else if page.offset > 0 {
            sql.push_str(" LIMIT -1");
        }
        if page.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", page.offset));
        }

        let rows = sqlx::query(&sql)
            .fetch_all(self.store.pool())
            .await
            .context("查询各会话最新消息失败")?;
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.get("data");
            messages.push(serde_json::from_str(&data).context("反序列化消息实体失败")?);
        }
        Ok(messages)
    }

    pub async fn count(&self) -> Result<i64> {
        self.store.count().await
    }
}
