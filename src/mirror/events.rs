//! 事件词表：上游推送的全部事件类型 + 下游转发信封
//!
//! 上游交付语义是至少一次、乱序，事件可能重复到达，处理端必须幂等。
//! 词表是封闭的：每个会话收到的任何事件都落在 [`Event`] 的某个分支上。
//! 转发给订阅者时统一包成 [`ServerEvent`]（标签 + JSON 载荷）。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mirror::group::GroupSnapshot;
use crate::mirror::serialization::{deserialize_base64, serialize_base64};
use crate::mirror::types::Status;

/// 上游事件（封闭枚举）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", content = "payload")]
pub enum Event {
    Message(MessageEvent),
    Receipt(ReceiptEvent),
    HistorySync(HistorySyncEvent),
    JoinedGroup(GroupSnapshot),
    GroupInfo(GroupInfoEvent),
    DeleteChat(DeleteChatEvent),
    Contact(ContactEvent),
    LabelEdit(LabelEditEvent),
    LabelAssociation(LabelAssociationEvent),
}

impl Event {
    /// 转发信封上的类型标签
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Message(_) => "Message",
            Event::Receipt(_) => "Receipt",
            Event::HistorySync(_) => "HistorySync",
            Event::JoinedGroup(_) => "JoinedGroup",
            Event::GroupInfo(_) => "GroupInfo",
            Event::DeleteChat(_) => "DeleteChat",
            Event::Contact(_) => "Contact",
            Event::LabelEdit(_) => "LabelEdit",
            Event::LabelAssociation(_) => "LabelAssociation",
        }
    }

    /// 序列化为转发信封；载荷序列化失败时该事件不转发
    pub fn to_server_event(&self) -> Result<ServerEvent> {
        let payload = match self {
            Event::Message(e) => serde_json::to_value(e),
            Event::Receipt(e) => serde_json::to_value(e),
            Event::HistorySync(e) => serde_json::to_value(e),
            Event::JoinedGroup(e) => serde_json::to_value(e),
            Event::GroupInfo(e) => serde_json::to_value(e),
            Event::DeleteChat(e) => serde_json::to_value(e),
            Event::Contact(e) => serde_json::to_value(e),
            Event::LabelEdit(e) => serde_json::to_value(e),
            Event::LabelAssociation(e) => serde_json::to_value(e),
        }
        .with_context(|| format!("序列化 {} 事件载荷失败", self.tag()))?;
        Ok(ServerEvent {
            tag: self.tag().to_string(),
            payload,
        })
    }
}

/// 转发给订阅者的信封
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    pub tag: String,
    pub payload: serde_json::Value,
}

/// 消息元信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub from_me: bool,
    /// Unix 秒
    pub timestamp: i64,
}

/// 消失模式（发起者 / 触发方式，常量见 types::setting_initiator / setting_trigger）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisappearingMode {
    pub initiator: i32,
    pub trigger: i32,
    pub initiated_by_me: bool,
}

/// 消息上下文（随普通消息捎带的会话级设置）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    pub expiration: Option<u32>,
    pub ephemeral_setting_timestamp: Option<i64>,
    pub disappearing_mode: Option<DisappearingMode>,
}

/// 协议动作（协议消息不是内容，带着对镜像的操作指令）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ProtocolAction {
    /// 撤回某条消息
    #[serde(rename_all = "camelCase")]
    Revoke { message_id: String },
    /// 会话级阅后即焚设置变更；expiration 为 0 表示关闭
    #[serde(rename_all = "camelCase")]
    EphemeralSetting {
        expiration: u32,
        disappearing_mode: Option<DisappearingMode>,
    },
}

/// 消息事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub info: MessageInfo,
    /// 内容类型，常量见 types::content_kind
    pub content_kind: i32,
    /// 显式状态（历史同步可带；实时消息通常为空）
    pub status: Option<Status>,
    /// 原始内容载荷，JSON 里走 base64
    #[serde(
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64",
        default
    )]
    pub raw: Vec<u8>,
    pub context: Option<MessageContext>,
    pub protocol: Option<ProtocolAction>,
}

/// 回执类型；词表外的类型反序列化为 Other，处理端忽略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Delivered,
    Read,
    Played,
    #[serde(other)]
    Other,
}

/// 回执事件（一个会话里的一批消息）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEvent {
    pub chat_id: String,
    pub message_ids: Vec<String>,
    pub timestamp: i64,
    pub kind: ReceiptKind,
}

/// 历史同步中的单个会话
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConversation {
    pub chat_id: String,
    pub ephemeral_expiration: Option<u32>,
    pub ephemeral_setting_timestamp: Option<i64>,
    pub disappearing_mode: Option<DisappearingMode>,
    pub messages: Vec<MessageEvent>,
}

/// 历史同步事件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySyncEvent {
    pub conversations: Vec<HistoryConversation>,
}

/// 群元数据里的阅后即焚字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEphemeralChange {
    pub is_ephemeral: bool,
    pub disappearing_timer: u32,
}

/// 群信息变更事件：元数据增量 + 成员差量 + 版本栅栏
///
/// 成员差量带 prev 版本号，只有 prev 与本地存量版本吻合才允许套用，
/// 否则说明中间丢了事件，需要整体重拉。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfoEvent {
    pub group_id: String,
    pub timestamp: i64,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub locked: Option<bool>,
    pub announce: Option<bool>,
    pub ephemeral: Option<GroupEphemeralChange>,
    #[serde(default)]
    pub join: Vec<String>,
    #[serde(default)]
    pub leave: Vec<String>,
    #[serde(default)]
    pub promote: Vec<String>,
    #[serde(default)]
    pub demote: Vec<String>,
    #[serde(default)]
    pub prev_participant_version_id: String,
    #[serde(default)]
    pub participant_version_id: String,
}

impl GroupInfoEvent {
    /// 成员差量是否为空（空差量不触碰版本栅栏）
    pub fn participant_diff_is_empty(&self) -> bool {
        self.join.is_empty()
            && self.leave.is_empty()
            && self.promote.is_empty()
            && self.demote.is_empty()
    }
}

/// 删除会话事件：清掉该会话中早于 timestamp 的本地消息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChatEvent {
    pub chat_id: String,
    pub timestamp: i64,
}

/// 联系人事件：带到什么字段就更新什么字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEvent {
    pub id: String,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub push_name: Option<String>,
}

/// 标签编辑事件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelEditEvent {
    pub id: String,
    pub name: String,
    pub color: i32,
    pub deleted: bool,
}

/// 标签关联事件：labeled 为 true 挂标签，false 摘标签
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelAssociationEvent {
    pub chat_id: String,
    pub label_id: String,
    pub labeled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_event_json_roundtrip() {
        let event = MessageEvent {
            info: MessageInfo {
                id: "3EB0".to_string(),
                chat_id: "123@g.us".to_string(),
                sender_id: "888@s.whatsapp.net".to_string(),
                from_me: false,
                timestamp: 1740132428,
            },
            content_kind: crate::mirror::types::content_kind::TEXT,
            status: Some(Status::Read),
            raw: vec![1, 2, 3, 255],
            context: None,
            protocol: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        // 字段名走 camelCase，原始载荷走 base64，状态走整数
        assert!(json.contains("\"chatId\":\"123@g.us\""));
        assert!(json.contains("\"fromMe\":false"));
        assert!(json.contains("\"status\":4"));
        assert!(!json.contains("[1,2,3,255]"));

        let back: MessageEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.raw, vec![1, 2, 3, 255]);
        assert_eq!(back.status, Some(Status::Read));
    }

    #[test]
    fn test_unknown_receipt_kind_maps_to_other() {
        let kind: ReceiptKind = serde_json::from_str("\"retry\"").unwrap();
        assert_eq!(kind, ReceiptKind::Other);
        let kind: ReceiptKind = serde_json::from_str("\"played\"").unwrap();
        assert_eq!(kind, ReceiptKind::Played);
    }

    #[test]
    fn test_server_event_tag_matches_variant() {
        let event = Event::DeleteChat(DeleteChatEvent {
            chat_id: "999@s.whatsapp.net".to_string(),
            timestamp: 1740132428,
        });
        assert_eq!(event.tag(), "DeleteChat");
        let envelope = event.to_server_event().unwrap();
        assert_eq!(envelope.tag, "DeleteChat");
        assert_eq!(envelope.payload["chatId"], "999@s.whatsapp.net");
    }

    #[test]
    fn test_participant_diff_empty_check() {
        let mut update = GroupInfoEvent {
            group_id: "123@g.us".to_string(),
            name: Some("新群名".to_string()),
            ..Default::default()
        };
        assert!(update.participant_diff_is_empty());
        update.promote.push("888@s.whatsapp.net".to_string());
        assert!(!update.participant_diff_is_empty());
    }

    #[test]
    fn test_protocol_action_tagged_json() {
        let action = ProtocolAction::Revoke {
            message_id: "3EB0".to_string(),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"action\":\"revoke\""));

        let back: ProtocolAction = serde_json::from_str(
            r#"{"action":"ephemeralSetting","expiration":0,"disappearingMode":null}"#,
        )
        .unwrap();
        match back {
            ProtocolAction::EphemeralSetting { expiration, .. } => assert_eq!(expiration, 0),
            _ => panic!("分支不对"),
        }
    }
}
