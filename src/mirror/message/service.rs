//! 消息镜像服务：事件写入口 + 回执状态推进
//!
//! 上游会重复投递，这里保证幂等：同一条消息重复保存不会把已推进的
//! 状态拉回去，回执也只向更高状态走。

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::mirror::events::{MessageEvent, ReceiptEvent, ReceiptKind};
use crate::mirror::message::dao::MessageStore;
use crate::mirror::message::models::StoredMessage;
use crate::mirror::types::Status;

/// 回执类型到目标状态的映射；词表外的类型不驱动状态
fn receipt_status(kind: ReceiptKind) -> Option<Status> {
    match kind {
        ReceiptKind::Delivered => Some(Status::DeliveryAck),
        ReceiptKind::Read => Some(Status::Read),
        ReceiptKind::Played => Some(Status::Played),
        ReceiptKind::Other => None,
    }
}

pub struct MessageService {
    store: Arc<MessageStore>,
}

impl MessageService {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    /// 保存消息事件；已存在时状态取两边较高者
    pub async fn save(&self, event: &MessageEvent) -> Result<()> {
        let mut incoming = StoredMessage::from_event(event.clone());
        if let Some(stored) = self.store.get(incoming.id()).await? {
            if stored.status > incoming.status {
                incoming.status = stored.status;
            }
        }
        self.store.upsert(&incoming).await?;
        debug!(
            "[MsgMirror] 保存消息 {} (会话 {}, 状态 {:?}, 真实内容 {})",
            incoming.id(),
            incoming.chat_id(),
            incoming.status,
            incoming.is_real
        );
        Ok(())
    }

    /// 按回执推进一批消息的状态
    ///
    /// 本地没有的消息直接跳过（历史裁剪或乱序都可能造成），单条失败
    /// 不影响同批其他消息。
    pub async fn escalate(&self, receipt: &ReceiptEvent) -> Result<()> {
        let Some(target) = receipt_status(receipt.kind) else {
            debug!("[MsgMirror] 忽略未识别的回执类型 {:?}", receipt.kind);
            return Ok(());
        };
        for id in &receipt.message_ids {
            let mut stored = match self.store.get(id).await {
                Ok(Some(stored)) => stored,
                Ok(None) => {
                    debug!("[MsgMirror] 回执指向本地没有的消息 {}，跳过", id);
                    continue;
                }
                Err(e) => {
                    error!("[MsgMirror] ❌ 读取消息 {} 失败: {:?}", id, e);
                    continue;
                }
            };
            if stored.status >= target {
                continue;
            }
            stored.status = target;
            if let Err(e) = self.store.upsert(&stored).await {
                error!("[MsgMirror] ❌ 更新消息 {} 状态失败: {:?}", id, e);
            }
        }
        Ok(())
    }

    /// 撤回：删掉被指向的那条消息（撤回指令本身照常入库）
    pub async fn revoke(&self, message_id: &str) -> Result<()> {
        let deleted = self.store.delete(message_id).await?;
        info!("[MsgMirror] 🗑️ 撤回消息 {} (删除 {} 行)", message_id, deleted);
        Ok(())
    }

    /// 清掉会话中严格早于 timestamp 的消息
    pub async fn delete_chat_before(&self, chat_id: &str, timestamp: i64) -> Result<u64> {
        self.store.delete_chat_before(chat_id, timestamp).await
    }
}
