//! 标签表与关联表访问层

use anyhow::Result;
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::mirror::label::models::{Label, LabelAssociation};
use crate::mirror::store::{Bind, EntityMapper, EntityStore, Filter, TableSpec};
use crate::mirror::types::{Page, Sort};

static LABEL_TABLE: TableSpec = TableSpec {
    name: "local_labels",
    columns: &["id", "name", "data"],
    data_column: "data",
    conflict_keys: &["id"],
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS local_labels (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            data TEXT NOT NULL DEFAULT ''
        )
    "#,
};

static ASSOCIATION_TABLE: TableSpec = TableSpec {
    name: "local_label_chats",
    columns: &["chat_id", "label_id", "data"],
    data_column: "data",
    conflict_keys: &["chat_id", "label_id"],
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS local_label_chats (
            chat_id TEXT NOT NULL,
            label_id TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (chat_id, label_id)
        )
    "#,
};

pub struct LabelMapper;

impl EntityMapper for LabelMapper {
    type Entity = Label;

    fn table(&self) -> &'static TableSpec {
        &LABEL_TABLE
    }

    fn index_fields(&self, label: &Label) -> Vec<(&'static str, Bind)> {
        vec![
            ("id", Bind::str(&label.id)),
            ("name", Bind::str(&label.name)),
        ]
    }
}

pub struct LabelAssociationMapper;

impl EntityMapper for LabelAssociationMapper {
    type Entity = LabelAssociation;

    fn table(&self) -> &'static TableSpec {
        &ASSOCIATION_TABLE
    }

    fn index_fields(&self, assoc: &LabelAssociation) -> Vec<(&'static str, Bind)> {
        vec![
            ("chat_id", Bind::str(&assoc.chat_id)),
            ("label_id", Bind::str(&assoc.label_id)),
        ]
    }
}

pub struct LabelStore {
    store: EntityStore<LabelMapper>,
}

impl LabelStore {
    pub async fn new(db: Pool<Sqlite>) -> Result<Self> {
        let store = EntityStore::new(db, LabelMapper).await?;
        Ok(Self { store })
    }

    pub async fn upsert(&self, label: &Label) -> Result<()> {
        self.store.upsert(label).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Label>> {
        self.store.get_by_id(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<u64> {
        debug!("[LabelDAO] 删除标签 {}", id);
        self.store.delete_by_id(id).await
    }

    pub async fn list(&self, page: Page) -> Result<Vec<Label>> {
        self.store.filter(&[], Some(&Sort::asc("name")), page).await
    }

    pub async fn count(&self) -> Result<i64> {
        self.store.count().await
    }
}

pub struct LabelAssociationStore {
    store: EntityStore<LabelAssociationMapper>,
}

impl LabelAssociationStore {
    pub async fn new(db: Pool<Sqlite>) -> Result<Self> {
        let store = EntityStore::new(db, LabelAssociationMapper).await?;
        Ok(Self { store })
    }

    /// 重复挂同一标签是幂等的（复合键冲突整行替换）
    pub async fn add(&self, assoc: &LabelAssociation) -> Result<()> {
        self.store.upsert(assoc).await
    }

    pub async fn remove(&self, chat_id: &str, label_id: &str) -> Result<u64> {
        self.store
            .delete_by(&[
                Filter::eq("chat_id", Bind::str(chat_id)),
                Filter::eq("label_id", Bind::str(label_id)),
            ])
            .await
    }

    pub async fn chats_by_label(&self, label_id: &str) -> Result<Vec<LabelAssociation>> {
        self.store
            .filter(
                &[Filter::eq("label_id", Bind::str(label_id))],
                Some(&Sort::asc("chat_id")),
                Page::all(),
            )
            .await
    }

    pub async fn labels_by_chat(&self, chat_id: &str) -> Result<Vec<LabelAssociation>> {
        self.store
            .filter(
                &[Filter::eq("chat_id", Bind::str(chat_id))],
                Some(&Sort::asc("label_id")),
                Page::all(),
            )
            .await
    }
}
