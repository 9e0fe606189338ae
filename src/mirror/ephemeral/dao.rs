//! 阅后即焚设置表访问层

use anyhow::Result;
use sqlx::{Pool, Sqlite};

use crate::mirror::ephemeral::models::StoredChatEphemeralSetting;
use crate::mirror::store::{Bind, EntityMapper, EntityStore, Filter, TableSpec};
use crate::mirror::types::{Page, Sort};

static EPHEMERAL_TABLE: TableSpec = TableSpec {
    name: "local_ephemeral_settings",
    columns: &["id", "is_ephemeral", "data"],
    data_column: "data",
    conflict_keys: &["id"],
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS local_ephemeral_settings (
            id TEXT PRIMARY KEY,
            is_ephemeral INTEGER NOT NULL DEFAULT 0,
            data TEXT NOT NULL DEFAULT ''
        )
    "#,
};

pub struct EphemeralMapper;

impl EntityMapper for EphemeralMapper {
    type Entity = StoredChatEphemeralSetting;

    fn table(&self) -> &'static TableSpec {
        &EPHEMERAL_TABLE
    }

    fn index_fields(&self, setting: &StoredChatEphemeralSetting) -> Vec<(&'static str, Bind)> {
        vec![
            ("id", Bind::str(&setting.id)),
            ("is_ephemeral", Bind::Bool(setting.is_ephemeral)),
        ]
    }
}

pub struct EphemeralStore {
    store: EntityStore<EphemeralMapper>,
}

impl EphemeralStore {
    pub async fn new(db: Pool<Sqlite>) -> Result<Self> {
        let store = EntityStore::new(db, EphemeralMapper).await?;
        Ok(Self { store })
    }

    pub async fn upsert(&self, setting: &StoredChatEphemeralSetting) -> Result<()> {
        self.store.upsert(setting).await
    }

    pub async fn get(&self, chat_id: &str) -> Result<Option<StoredChatEphemeralSetting>> {
        self.store.get_by_id(chat_id).await
    }

    pub async fn delete(&self, chat_id: &str) -> Result<u64> {
        self.store.delete_by_id(chat_id).await
    }

    /// 只列开启中的会话
    pub async fn list_enabled(&self, page: Page) -> Result<Vec<StoredChatEphemeralSetting>> {
        self.store
            .filter(
                &[Filter::eq("is_ephemeral", Bind::Bool(true))],
                Some(&Sort::asc("id")),
                page,
            )
            .await
    }

    pub async fn count(&self) -> Result<i64> {
        self.store.count().await
    }
}
