//! 存储事件处理器：把上游事件落到各面镜像
//!
//! 每个分支都幂等，事件重复或乱序到达不会把镜像写坏。单个事件处理
//! 失败只记日志，不影响后续事件，也不影响转发。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::mirror::contact::{ContactStore, StoredContact};
use crate::mirror::ephemeral::{
    setting_from_context, setting_from_history, setting_from_protocol, EphemeralSyncer,
    SettingSource,
};
use crate::mirror::events::{
    ContactEvent, DeleteChatEvent, Event, GroupInfoEvent, HistoryConversation, HistorySyncEvent,
    LabelAssociationEvent, LabelEditEvent, MessageEvent, ProtocolAction, ReceiptEvent,
};
use crate::mirror::group::{GroupCache, GroupSnapshot};
use crate::mirror::label::{Label, LabelAssociation, LabelAssociationStore, LabelStore};
use crate::mirror::message::MessageService;

/// 关联事件先到、标签定义后到时，最多等这么多轮
const LABEL_WAIT_ATTEMPTS: usize = 6;
const LABEL_WAIT_DELAY: Duration = Duration::from_millis(100);

pub struct StorageHandler {
    messages: Arc<MessageService>,
    groups: Arc<GroupCache>,
    ephemeral: Arc<EphemeralSyncer>,
    contacts: Arc<ContactStore>,
    labels: Arc<LabelStore>,
    label_associations: Arc<LabelAssociationStore>,
    /// 本端自己的 id，用来识别"自己被移出群"
    own_id: String,
}

impl StorageHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        messages: Arc<MessageService>,
        groups: Arc<GroupCache>,
        ephemeral: Arc<EphemeralSyncer>,
        contacts: Arc<ContactStore>,
        labels: Arc<LabelStore>,
        label_associations: Arc<LabelAssociationStore>,
        own_id: String,
    ) -> Self {
        Self {
            messages,
            groups,
            ephemeral,
            contacts,
            labels,
            label_associations,
            own_id,
        }
    }

    /// 处理一条上游事件；内部消化所有错误
    pub async fn handle(&self, event: &Event) {
        match event {
            Event::Message(e) => self.handle_message(e).await,
            Event::Receipt(e) => self.handle_receipt(e).await,
            Event::HistorySync(e) => self.handle_history_sync(e),
            Event::JoinedGroup(e) => self.handle_joined_group(e).await,
            Event::GroupInfo(e) => self.handle_group_info(e).await,
            Event::DeleteChat(e) => self.handle_delete_chat(e).await,
            Event::Contact(e) => self.handle_contact(e).await,
            Event::LabelEdit(e) => self.handle_label_edit(e).await,
            Event::LabelAssociation(e) => self.handle_label_association(e).await,
        }
    }

    async fn handle_message(&self, event: &MessageEvent) {
        if let Err(e) = self.messages.save(event).await {
            error!("[Handler] ❌ 保存消息 {} 失败: {:?}", event.info.id, e);
            return;
        }

        // 协议动作独占处理，不再看上下文
        if let Some(protocol) = &event.protocol {
            match protocol {
                ProtocolAction::Revoke { message_id } => {
                    if let Err(e) = self.messages.revoke(message_id).await {
                        error!("[Handler] ❌ 撤回消息 {} 失败: {:?}", message_id, e);
                    }
                }
                ProtocolAction::EphemeralSetting {
                    expiration,
                    disappearing_mode,
                } => {
                    if let Some(setting) = setting_from_protocol(
                        &event.info,
                        *expiration,
                        disappearing_mode.as_ref(),
                    ) {
                        if let Err(e) = self
                            .ephemeral
                            .apply(setting, SettingSource::ProtocolChange)
                            .await
                        {
                            error!(
                                "[Handler] ❌ 应用会话 {} 的显式设置失败: {:?}",
                                event.info.chat_id, e
                            );
                        }
                    }
                }
            }
            return;
        }

        // 普通消息捎带的设置快照
        if let Some(context) = &event.context {
            if let Some(setting) = setting_from_context(&event.info, context) {
                if let Err(e) = self
                    .ephemeral
                    .apply(setting, SettingSource::MessageContext)
                    .await
                {
                    warn!(
                        "[Handler] ⚠️ 应用会话 {} 捎带的设置失败: {:?}",
                        event.info.chat_id, e
                    );
                }
            }
        }
    }

    async fn handle_receipt(&self, event: &ReceiptEvent) {
        if let Err(e) = self.messages.escalate(event).await {
            error!(
                "[Handler] ❌ 处理会话 {} 的回执失败: {:?}",
                event.chat_id, e
            );
        }
    }

    /// 各会话并行入库，互不等待
    fn handle_history_sync(&self, event: &HistorySyncEvent) {
        info!(
            "[Handler] 🔄 历史同步开始，共 {} 个会话",
            event.conversations.len()
        );
        for conv in &event.conversations {
            let conv = conv.clone();
            let messages = self.messages.clone();
            let ephemeral = self.ephemeral.clone();
            tokio::spawn(async move {
                save_history_for_chat(messages, ephemeral, conv).await;
            });
        }
    }

    async fn handle_joined_group(&self, group: &GroupSnapshot) {
        if let Err(e) = self.groups.upsert_one(group).await {
            error!("[Handler] ❌ 新群 {} 入库失败: {:?}", group.id, e);
        }
    }

    async fn handle_group_info(&self, event: &GroupInfoEvent) {
        // 自己被移出（或退出）了：整群连带设置一起清掉
        if event.leave.iter().any(|id| id == &self.own_id) {
            info!("[Handler] 本端离开群 {}，移除本地镜像", event.group_id);
            if let Err(e) = self.groups.delete(&event.group_id).await {
                error!("[Handler] ❌ 移除群 {} 失败: {:?}", event.group_id, e);
            }
            return;
        }
        if let Err(e) = self.groups.apply_diff(event).await {
            error!(
                "[Handler] ❌ 套用群 {} 的信息增量失败: {:?}",
                event.group_id, e
            );
        }
    }

    async fn handle_delete_chat(&self, event: &DeleteChatEvent) {
        if let Err(e) = self
            .messages
            .delete_chat_before(&event.chat_id, event.timestamp)
            .await
        {
            error!(
                "[Handler] ❌ 清理会话 {} 的消息失败: {:?}",
                event.chat_id, e
            );
        }
        if let Err(e) = self
            .ephemeral
            .delete_before(&event.chat_id, event.timestamp)
            .await
        {
            warn!(
                "[Handler] ⚠️ 清理会话 {} 的设置失败: {:?}",
                event.chat_id, e
            );
        }
    }

    async fn handle_contact(&self, event: &ContactEvent) {
        let incoming = StoredContact {
            id: event.id.clone(),
            full_name: event.full_name.clone(),
            first_name: event.first_name.clone(),
            push_name: event.push_name.clone(),
        };
        if let Err(e) = self.contacts.merge_upsert(&incoming).await {
            error!("[Handler] ❌ 更新联系人 {} 失败: {:?}", event.id, e);
        }
    }

    async fn handle_label_edit(&self, event: &LabelEditEvent) {
        if event.deleted {
            if let Err(e) = self.labels.delete(&event.id).await {
                error!("[Handler] ❌ 删除标签 {} 失败: {:?}", event.id, e);
            }
            return;
        }
        let label = Label {
            id: event.id.clone(),
            name: event.name.clone(),
            color: event.color,
        };
        if let Err(e) = self.labels.upsert(&label).await {
            error!("[Handler] ❌ 保存标签 {} 失败: {:?}", event.id, e);
        }
    }

    async fn handle_label_association(&self, event: &LabelAssociationEvent) {
        if !event.labeled {
            if let Err(e) = self
                .label_associations
                .remove(&event.chat_id, &event.label_id)
                .await
            {
                error!(
                    "[Handler] ❌ 摘除会话 {} 的标签 {} 失败: {:?}",
                    event.chat_id, event.label_id, e
                );
            }
            return;
        }

        // 标签定义可能还在路上，等几轮；等不到也照样挂关联
        let mut found = false;
        for attempt in 1..=LABEL_WAIT_ATTEMPTS {
            match self.labels.get(&event.label_id).await {
                Ok(Some(_)) => {
                    found = true;
                    break;
                }
                Ok(None) => {
                    if attempt < LABEL_WAIT_ATTEMPTS {
                        tokio::time::sleep(LABEL_WAIT_DELAY).await;
                    }
                }
                Err(e) => {
                    warn!("[Handler] ⚠️ 查询标签 {} 失败: {:?}", event.label_id, e);
                    break;
                }
            }
        }
        if !found {
            debug!(
                "[Handler] 标签 {} 尚未同步到本地，先行挂上关联",
                event.label_id
            );
        }
        let assoc = LabelAssociation {
            chat_id: event.chat_id.clone(),
            label_id: event.label_id.clone(),
        };
        if let Err(e) = self.label_associations.add(&assoc).await {
            error!(
                "[Handler] ❌ 给会话 {} 挂标签 {} 失败: {:?}",
                event.chat_id, event.label_id, e
            );
        }
    }
}

async fn save_history_for_chat(
    messages: Arc<MessageService>,
    ephemeral: Arc<EphemeralSyncer>,
    conv: HistoryConversation,
) {
    for msg in &conv.messages {
        if let Err(e) = messages.save(msg).await {
            error!("[Handler] ❌ 历史消息 {} 入库失败: {:?}", msg.info.id, e);
        }
    }
    if let Some(setting) = setting_from_history(&conv) {
        if let Err(e) = ephemeral.apply(setting, SettingSource::HistorySync).await {
            warn!(
                "[Handler] ⚠️ 应用会话 {} 的历史设置失败: {:?}",
                conv.chat_id, e
            );
        }
    }
    debug!(
        "[Handler] 会话 {} 历史入库完成，共 {} 条",
        conv.chat_id,
        conv.messages.len()
    );
}
