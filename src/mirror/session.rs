//! 会话装配与生命周期
//!
//! 一个会话 = 一个账号的本地镜像：自己的数据库、一套存储服务、一个
//! 事件处理器。上游事件进来后兵分两路：原样转发给订阅者（不等存储），
//! 同时丢给后台任务落库。处理器崩溃被就地拦下，不波及会话本身。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use futures_util::FutureExt;
use sqlx::{Pool, Sqlite};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::mirror::bus::{EventBus, Subscription};
use crate::mirror::chat::ChatView;
use crate::mirror::contact::ContactStore;
use crate::mirror::db::create_sqlite_pool;
use crate::mirror::ephemeral::{EphemeralStore, EphemeralSyncer};
use crate::mirror::events::{Event, MessageEvent, MessageInfo};
use crate::mirror::group::{GroupCache, GroupFetcher, GroupStore};
use crate::mirror::handler::StorageHandler;
use crate::mirror::label::{LabelAssociationStore, LabelStore};
use crate::mirror::message::{MessageService, MessageStore};
use crate::mirror::serialization::generate_msg_id;
use crate::mirror::types::SessionNotFound;

/// 会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub name: String,
    /// 形如 sqlite:mirror.db?mode=rwc，测试用 sqlite::memory:
    pub db_url: String,
    /// 本端自己的 id
    pub own_id: String,
}

pub struct Session {
    name: String,
    own_id: String,
    started: AtomicBool,
    db: Pool<Sqlite>,
    bus: Arc<EventBus>,
    handler: Arc<StorageHandler>,
    messages: Arc<MessageStore>,
    groups: Arc<GroupCache>,
    contacts: Arc<ContactStore>,
    labels: Arc<LabelStore>,
    label_associations: Arc<LabelAssociationStore>,
    ephemeral: Arc<EphemeralSyncer>,
    chats: Arc<ChatView>,
}

impl Session {
    /// 建库建表并装配整套镜像
    async fn build(
        config: &SessionConfig,
        bus: Arc<EventBus>,
        fetcher: Arc<dyn GroupFetcher>,
    ) -> Result<Self> {
        let db = create_sqlite_pool(&config.db_url).await?;

        let messages = Arc::new(MessageStore::new(db.clone()).await?);
        let group_store = Arc::new(GroupStore::new(db.clone()).await?);
        let ephemeral_store = Arc::new(EphemeralStore::new(db.clone()).await?);
        let contacts = Arc::new(ContactStore::new(db.clone()).await?);
        let labels = Arc::new(LabelStore::new(db.clone()).await?);
        let label_associations = Arc::new(LabelAssociationStore::new(db.clone()).await?);

        let ephemeral = Arc::new(EphemeralSyncer::new(ephemeral_store));
        let groups = Arc::new(GroupCache::new(group_store, ephemeral.clone(), fetcher));
        let message_service = Arc::new(MessageService::new(messages.clone()));
        let chats = Arc::new(ChatView::new(
            messages.clone(),
            contacts.clone(),
            groups.clone(),
        ));
        let handler = Arc::new(StorageHandler::new(
            message_service,
            groups.clone(),
            ephemeral.clone(),
            contacts.clone(),
            labels.clone(),
            label_associations.clone(),
            config.own_id.clone(),
        ));

        info!("[Session] 🚀 会话 {} 装配完成 (库 {})", config.name, config.db_url);
        Ok(Self {
            name: config.name.clone(),
            own_id: config.own_id.clone(),
            started: AtomicBool::new(false),
            db,
            bus,
            handler,
            messages,
            groups,
            contacts,
            labels,
            label_associations,
            ephemeral,
            chats,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn own_id(&self) -> &str {
        &self.own_id
    }

    /// 标记会话进入接收状态
    pub fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            info!("[Session] 📡 会话 {} 开始接收事件", self.name);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// 接入一条上游事件
    ///
    /// 转发同步完成（有界队列，永不阻塞），落库进后台任务。处理器
    /// 崩溃只记日志，后续事件照常。
    pub fn dispatch(&self, event: Event) {
        if !self.is_started() {
            debug!("[Session] 会话 {} 尚未标记启动，事件照常处理", self.name);
        }
        match event.to_server_event() {
            Ok(envelope) => self.bus.publish(&self.name, &envelope),
            Err(e) => error!("[Session] ❌ 事件序列化失败，跳过转发: {:?}", e),
        }

        let handler = self.handler.clone();
        let session = self.name.clone();
        let tag = event.tag();
        tokio::spawn(async move {
            let work = std::panic::AssertUnwindSafe(handler.handle(&event));
            if let Err(panic) = work.catch_unwind().await {
                error!(
                    "[Session] ❌ 会话 {} 处理 {} 事件时崩溃: {}",
                    session,
                    tag,
                    panic_message(panic)
                );
            }
        });
    }

    /// 登记一条本端刚发出的消息：合成事件走完整处理链，返回消息 id
    pub fn record_sent_message(&self, chat_id: &str, content_kind: i32, raw: Vec<u8>) -> String {
        let id = generate_msg_id();
        let event = Event::Message(MessageEvent {
            info: MessageInfo {
                id: id.clone(),
                chat_id: chat_id.to_string(),
                sender_id: self.own_id.clone(),
                from_me: true,
                timestamp: chrono::Utc::now().timestamp(),
            },
            content_kind,
            status: None,
            raw,
            context: None,
            protocol: None,
        });
        self.dispatch(event);
        id
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe(&self.name)
    }

    pub fn unsubscribe(&self, sub: &Subscription) {
        self.bus.unsubscribe(&self.name, sub.id);
    }

    /// 关停：订阅者读完余量收尾，数据库连接随后关闭
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.bus.close_session(&self.name);
        self.db.close().await;
        info!("[Session] 会话 {} 已关停", self.name);
    }

    pub fn chats(&self) -> &ChatView {
        &self.chats
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn groups(&self) -> &GroupCache {
        &self.groups
    }

    pub fn contacts(&self) -> &ContactStore {
        &self.contacts
    }

    pub fn labels(&self) -> &LabelStore {
        &self.labels
    }

    pub fn label_associations(&self) -> &LabelAssociationStore {
        &self.label_associations
    }

    pub fn ephemeral(&self) -> &EphemeralSyncer {
        &self.ephemeral
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知崩溃".to_string()
    }
}

/// 多会话管理；全部会话共享一条总线
pub struct SessionManager {
    bus: Arc<EventBus>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// 建立（或取回）一个会话；同名重复调用返回已有实例
    pub async fn build(
        &self,
        config: SessionConfig,
        fetcher: Arc<dyn GroupFetcher>,
    ) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&config.name) {
            return Ok(existing.clone());
        }
        let session = Arc::new(Session::build(&config, self.bus.clone(), fetcher).await?);
        sessions.insert(config.name.clone(), session.clone());
        Ok(session)
    }

    /// 标记会话进入接收状态；不存在时报会话未找到
    pub async fn start(&self, name: &str) -> Result<()> {
        let session = self.get(name).await?;
        session.start();
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<Session>> {
        let sessions = self.sessions.read().await;
        match sessions.get(name) {
            Some(session) => Ok(session.clone()),
            None => bail!(SessionNotFound {
                name: name.to_string()
            }),
        }
    }

    /// 关停并移除会话；不存在时静默返回
    pub async fn stop(&self, name: &str) -> Result<()> {
        let removed = self.sessions.write().await.remove(name);
        if let Some(session) = removed {
            session.stop().await;
        }
        Ok(())
    }

    pub async fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
