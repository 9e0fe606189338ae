//! 镜像层共享类型：消息状态、内容类型、查询参数、可识别错误
//!
//! 所有实体模块共用的基础词汇表。状态全序与内容类型编号是镜像层的
//! 稳定契约，新增类型时只允许追加，不允许改变已有编号。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 消息投递状态（严格全序：Error < Pending < ServerAck < DeliveryAck < Read < Played）
///
/// 存储层保证状态单调不降：用更低的状态覆盖已存状态是无效操作。
/// 序列化为整数编号，编号即排序依据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Status {
    Error = 0,
    Pending = 1,
    ServerAck = 2,
    DeliveryAck = 3,
    Read = 4,
    Played = 5,
}

impl From<i64> for Status {
    fn from(v: i64) -> Self {
        match v {
            1 => Status::Pending,
            2 => Status::ServerAck,
            3 => Status::DeliveryAck,
            4 => Status::Read,
            5 => Status::Played,
            // 0 以及未知编号一律视为 Error，避免伪造更高状态
            _ => Status::Error,
        }
    }
}

impl From<Status> for i64 {
    fn from(s: Status) -> i64 {
        s as i64
    }
}

/// 消息内容类型编号
pub mod content_kind {
    pub const UNKNOWN: i32 = 0;
    pub const TEXT: i32 = 1;
    pub const EXTENDED_TEXT: i32 = 2;
    pub const IMAGE: i32 = 3;
    pub const CONTACT: i32 = 4;
    pub const CONTACTS_ARRAY: i32 = 5;
    pub const LOCATION: i32 = 6;
    pub const VIDEO: i32 = 7;
    pub const AUDIO: i32 = 8;
    pub const DOCUMENT: i32 = 9;
    pub const STICKER: i32 = 10;
    pub const TEMPLATE: i32 = 11;
    pub const LIST: i32 = 12;
    pub const RICH_RESPONSE: i32 = 13;
    pub const POLL_CREATION: i32 = 14;
    // 控制类消息（不展示给用户）
    pub const REACTION: i32 = 20;
    pub const PROTOCOL: i32 = 21;
}

/// 判断内容类型是否为"真实消息"（用户可见内容）
///
/// 协议消息、回执等控制类内容不算真实消息，只有列出的用户可见类型算。
pub fn is_real_content(kind: i32) -> bool {
    matches!(
        kind,
        content_kind::TEXT
            | content_kind::EXTENDED_TEXT
            | content_kind::IMAGE
            | content_kind::CONTACT
            | content_kind::CONTACTS_ARRAY
            | content_kind::LOCATION
            | content_kind::VIDEO
            | content_kind::AUDIO
            | content_kind::DOCUMENT
            | content_kind::STICKER
            | content_kind::TEMPLATE
            | content_kind::LIST
            | content_kind::RICH_RESPONSE
            | content_kind::POLL_CREATION
    )
}

/// 阅后即焚设置的发起方编号
pub mod setting_initiator {
    pub const CHANGED_IN_CHAT: i32 = 0;
    pub const INITIATED_BY_ME: i32 = 1;
    pub const INITIATED_BY_OTHER: i32 = 2;
}

/// 阅后即焚设置的触发方式编号
pub mod setting_trigger {
    pub const UNKNOWN: i32 = 0;
    pub const CHAT_SETTING: i32 = 1;
    pub const ACCOUNT_SETTING: i32 = 2;
    pub const BULK_CHANGE: i32 = 3;
}

/// 会话 ID 域后缀：通过后缀区分单聊 / 群聊 / 广播
pub mod chat_server {
    pub const USER: &str = "@s.whatsapp.net";
    pub const HIDDEN_USER: &str = "@lid";
    pub const GROUP: &str = "@g.us";
    pub const BROADCAST: &str = "@broadcast";
}

/// 是否群聊会话
pub fn is_group_chat(chat_id: &str) -> bool {
    chat_id.ends_with(chat_server::GROUP)
}

/// 是否单聊会话（含隐藏号形式）
pub fn is_user_chat(chat_id: &str) -> bool {
    chat_id.ends_with(chat_server::USER) || chat_id.ends_with(chat_server::HIDDEN_USER)
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// 排序参数：字段名 + 方向（字段必须是索引列，由存储层校验）
#[derive(Debug, Clone)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Desc,
        }
    }
}

/// 分页参数：offset + limit，limit 为 0 表示不限制
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    /// 不分页，返回全部
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

/// 群成员版本冲突：增量 diff 基于的版本与本地快照版本不一致
///
/// 收到该错误的调用方应当强制全量刷新，而不是重试同一个 diff。
/// 通过 `anyhow::Error::downcast_ref::<VersionConflict>()` 识别。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConflict {
    pub group_id: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "群 {} 成员版本冲突: 本地 {} != diff 基于的 {}",
            self.group_id, self.expected, self.actual
        )
    }
}

impl std::error::Error for VersionConflict {}

/// 会话实例不存在（SessionManager 中没有该名字的会话）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotFound {
    pub name: String,
}

impl fmt::Display for SessionNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "会话实例不存在: {}", self.name)
    }
}

impl std::error::Error for SessionNotFound {}
