//! 会话列表视图
//!
//! 会话不单独落库，完全从消息镜像派生：有消息的会话才出现在列表里，
//! 会话时间取该会话最新一条消息的时间。名字按会话类型现场解析，群聊
//! 查群镜像，单聊查联系人镜像。

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::mirror::contact::ContactStore;
use crate::mirror::group::GroupCache;
use crate::mirror::message::MessageStore;
use crate::mirror::types::{is_group_chat, is_user_chat, Page, Sort};

/// 列表里的一行会话
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChat {
    pub id: String,
    pub name: String,
    /// 该会话最新一条消息的时间（Unix 秒）
    pub conversation_timestamp: i64,
}

pub struct ChatView {
    messages: Arc<MessageStore>,
    contacts: Arc<ContactStore>,
    groups: Arc<GroupCache>,
}

impl ChatView {
    pub fn new(
        messages: Arc<MessageStore>,
        contacts: Arc<ContactStore>,
        groups: Arc<GroupCache>,
    ) -> Self {
        Self {
            messages,
            contacts,
            groups,
        }
    }

    /// 会话列表；排序字段对外叫 id / timestamp，不指定时最新会话在前
    pub async fn list(&self, sort: Option<Sort>, page: Page) -> Result<Vec<StoredChat>> {
        let sort = sort.map(|mut s| {
            if s.field == "id" {
                s.field = "chat_id".to_string();
            }
            s
        });
        let last_messages = self.messages.last_message_per_chat(sort, page).await?;

        let mut chats = Vec::with_capacity(last_messages.len());
        for msg in last_messages {
            let chat_id = msg.chat_id().to_string();
            let name = self.resolve_name(&chat_id).await;
            chats.push(StoredChat {
                id: chat_id,
                name,
                conversation_timestamp: msg.timestamp(),
            });
        }
        Ok(chats)
    }

    /// 名字解析失败不拖垮整个列表，留空即可
    async fn resolve_name(&self, chat_id: &str) -> String {
        if is_group_chat(chat_id) {
            match self.groups.get(chat_id).await {
                Ok(Some(group)) => group.name,
                Ok(None) => String::new(),
                Err(e) => {
                    warn!("[ChatView] ⚠️ 解析群 {} 名称失败: {:?}", chat_id, e);
                    String::new()
                }
            }
        } else if is_user_chat(chat_id) {
            match self.contacts.get(chat_id).await {
                Ok(Some(contact)) => contact.display_name().to_string(),
                Ok(None) => String::new(),
                Err(e) => {
                    warn!("[ChatView] ⚠️ 解析联系人 {} 名称失败: {:?}", chat_id, e);
                    String::new()
                }
            }
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::contact::StoredContact;
    use crate::mirror::db::create_sqlite_pool;
    use crate::mirror::ephemeral::{EphemeralStore, EphemeralSyncer};
    use crate::mirror::events::{MessageEvent, MessageInfo};
    use crate::mirror::group::{GroupFetcher, GroupSnapshot, GroupStore};
    use crate::mirror::message::StoredMessage;
    use crate::mirror::types::content_kind;
    use async_trait::async_trait;

    struct FixedGroups(Vec<GroupSnapshot>);

    #[async_trait]
    impl GroupFetcher for FixedGroups {
        async fn fetch_joined_groups(&self) -> Result<Vec<GroupSnapshot>> {
            Ok(self.0.clone())
        }
    }

    async fn new_view() -> (ChatView, Arc<MessageStore>, Arc<ContactStore>) {
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        let messages = Arc::new(MessageStore::new(pool.clone()).await.unwrap());
        let contacts = Arc::new(ContactStore::new(pool.clone()).await.unwrap());
        let group_store = Arc::new(GroupStore::new(pool.clone()).await.unwrap());
        let ephemeral = Arc::new(EphemeralSyncer::new(Arc::new(
            EphemeralStore::new(pool).await.unwrap(),
        )));
        let fetcher = Arc::new(FixedGroups(vec![GroupSnapshot {
            id: "123@g.us".to_string(),
            name: "产品讨论".to_string(),
            ..Default::default()
        }]));
        let groups = Arc::new(GroupCache::new(group_store, ephemeral, fetcher));
        let view = ChatView::new(messages.clone(), contacts.clone(), groups);
        (view, messages, contacts)
    }

    fn msg(id: &str, chat_id: &str, timestamp: i64) -> StoredMessage {
        StoredMessage::from_event(MessageEvent {
            info: MessageInfo {
                id: id.to_string(),
                chat_id: chat_id.to_string(),
                sender_id: "888@s.whatsapp.net".to_string(),
                from_me: false,
                timestamp,
            },
            content_kind: content_kind::TEXT,
            status: None,
            raw: vec![],
            context: None,
            protocol: None,
        })
    }

    #[tokio::test]
    async fn test_chats_derive_from_messages_with_names() {
        let (view, messages, contacts) = new_view().await;
        messages.upsert(&msg("m1", "888@s.whatsapp.net", 100)).await.unwrap();
        messages.upsert(&msg("m2", "888@s.whatsapp.net", 300)).await.unwrap();
        messages.upsert(&msg("m3", "123@g.us", 200)).await.unwrap();
        contacts
            .merge_upsert(&StoredContact {
                id: "888@s.whatsapp.net".to_string(),
                full_name: Some("张三".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let chats = view.list(None, Page::all()).await.unwrap();
        assert_eq!(chats.len(), 2);
        // 默认按最新消息时间倒序
        assert_eq!(chats[0].id, "888@s.whatsapp.net");
        assert_eq!(chats[0].name, "张三");
        assert_eq!(chats[0].conversation_timestamp, 300);
        assert_eq!(chats[1].id, "123@g.us");
        assert_eq!(chats[1].name, "产品讨论");
    }

    #[tokio::test]
    async fn test_unknown_contact_gets_empty_name() {
        let (view, messages, _) = new_view().await;
        messages.upsert(&msg("m1", "777@s.whatsapp.net", 100)).await.unwrap();

        let chats = view.list(None, Page::all()).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].name, "");
    }

    #[tokio::test]
    async fn test_sort_by_id_maps_to_chat_column() {
        let (view, messages, _) = new_view().await;
        messages.upsert(&msg("m1", "b@s.whatsapp.net", 100)).await.unwrap();
        messages.upsert(&msg("m2", "a@s.whatsapp.net", 200)).await.unwrap();

        let chats = view.list(Some(Sort::asc("id")), Page::all()).await.unwrap();
        assert_eq!(chats[0].id, "a@s.whatsapp.net");
        assert_eq!(chats[1].id, "b@s.whatsapp.net");
    }
}
