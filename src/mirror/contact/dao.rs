//! 联系人表访问层

use anyhow::{bail, Result};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::mirror::contact::models::StoredContact;
use crate::mirror::store::{Bind, EntityMapper, EntityStore, TableSpec};
use crate::mirror::types::{Page, Sort};

static CONTACT_TABLE: TableSpec = TableSpec {
    name: "local_contacts",
    columns: &["id", "name", "data"],
    data_column: "data",
    conflict_keys: &["id"],
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS local_contacts (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            data TEXT NOT NULL DEFAULT ''
        )
    "#,
};

pub struct ContactMapper;

impl EntityMapper for ContactMapper {
    type Entity = StoredContact;

    fn table(&self) -> &'static TableSpec {
        &CONTACT_TABLE
    }

    fn index_fields(&self, contact: &StoredContact) -> Vec<(&'static str, Bind)> {
        vec![
            ("id", Bind::str(&contact.id)),
            ("name", Bind::str(contact.display_name())),
        ]
    }
}

pub struct ContactStore {
    store: EntityStore<ContactMapper>,
}

impl ContactStore {
    pub async fn new(db: Pool<Sqlite>) -> Result<Self> {
        let store = EntityStore::new(db, ContactMapper).await?;
        Ok(Self { store })
    }

    /// 合并式写入：来件带了的显示字段覆盖，没带的保留存量
    pub async fn merge_upsert(&self, incoming: &StoredContact) -> Result<StoredContact> {
        let mut merged = self
            .store
            .get_by_id(&incoming.id)
            .await?
            .unwrap_or_else(|| StoredContact {
                id: incoming.id.clone(),
                ..Default::default()
            });
        merged.merge_from(incoming);
        self.store.upsert(&merged).await?;
        debug!(
            "[ContactDAO] 联系人 {} 更新 (显示名 {:?})",
            merged.id,
            merged.display_name()
        );
        Ok(merged)
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredContact>> {
        self.store.get_by_id(id).await
    }

    /// 列表；排序字段只认 id / name，不指定时按 id 升序
    pub async fn list(&self, sort: Option<Sort>, page: Page) -> Result<Vec<StoredContact>> {
        let sort = sort.unwrap_or_else(|| Sort::asc("id"));
        if sort.field != "id" && sort.field != "name" {
            bail!("联系人列表不支持按 {} 排序", sort.field);
        }
        self.store.filter(&[], Some(&sort), page).await
    }

    pub async fn count(&self) -> Result<i64> {
        self.store.count().await
    }
}
