//! 消息镜像实体

use serde::{Deserialize, Serialize};

use crate::mirror::events::MessageEvent;
use crate::mirror::types::{is_real_content, Status};

/// 本地留存的一条消息：完整事件载荷 + 镜像侧维护的附加字段
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub event: MessageEvent,
    /// 是否真实内容消息（协议指令、表态回应等不算）
    pub is_real: bool,
    /// 投递状态，只升不降
    pub status: Status,
}

impl StoredMessage {
    /// 从事件构造；显式状态优先，否则按方向给默认值
    /// （自己发出的默认已到服务器，别人发来的默认已送达本端）
    pub fn from_event(event: MessageEvent) -> Self {
        let status = event.status.unwrap_or(if event.info.from_me {
            Status::ServerAck
        } else {
            Status::DeliveryAck
        });
        let is_real = is_real_content(event.content_kind);
        Self {
            event,
            is_real,
            status,
        }
    }

    pub fn id(&self) -> &str {
        &self.event.info.id
    }

    pub fn chat_id(&self) -> &str {
        &self.event.info.chat_id
    }

    pub fn timestamp(&self) -> i64 {
        self.event.info.timestamp
    }

    pub fn from_me(&self) -> bool {
        self.event.info.from_me
    }
}
