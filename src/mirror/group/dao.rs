//! 群表访问层

use anyhow::Result;
use sqlx::{Pool, Sqlite};

use crate::mirror::group::models::GroupSnapshot;
use crate::mirror::store::{Bind, EntityMapper, EntityStore, TableSpec};
use crate::mirror::types::{Page, Sort};

static GROUP_TABLE: TableSpec = TableSpec {
    name: "local_groups",
    columns: &["id", "name", "data"],
    data_column: "data",
    conflict_keys: &["id"],
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS local_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            data TEXT NOT NULL DEFAULT ''
        )
    "#,
};

pub struct GroupMapper;

impl EntityMapper for GroupMapper {
    type Entity = GroupSnapshot;

    fn table(&self) -> &'static TableSpec {
        &GROUP_TABLE
    }

    fn index_fields(&self, group: &GroupSnapshot) -> Vec<(&'static str, Bind)> {
        vec![
            ("id", Bind::str(&group.id)),
            ("name", Bind::str(&group.name)),
        ]
    }
}

pub struct GroupStore {
    store: EntityStore<GroupMapper>,
}

impl GroupStore {
    pub async fn new(db: Pool<Sqlite>) -> Result<Self> {
        let store = EntityStore::new(db, GroupMapper).await?;
        Ok(Self { store })
    }

    pub async fn upsert(&self, group: &GroupSnapshot) -> Result<()> {
        self.store.upsert(group).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<GroupSnapshot>> {
        self.store.get_by_id(id).await
    }

    /// 不指定排序时按群名升序
    pub async fn list(&self, sort: Option<Sort>, page: Page) -> Result<Vec<GroupSnapshot>> {
        let sort = sort.unwrap_or_else(|| Sort::asc("name"));
        self.store.filter(&[], Some(&sort), page).await
    }

    pub async fn delete(&self, id: &str) -> Result<u64> {
        self.store.delete_by_id(id).await
    }

    pub async fn delete_all(&self) -> Result<u64> {
        self.store.delete_all().await
    }

    pub async fn count(&self) -> Result<i64> {
        self.store.count().await
    }
}
