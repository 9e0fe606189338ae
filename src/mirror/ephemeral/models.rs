//! 会话级阅后即焚设置实体

use serde::{Deserialize, Serialize};

/// 设置明细；字段全部可缺省，缺省字段在合并时保留存量值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralSetting {
    /// 发起者，常量见 types::setting_initiator
    pub initiator: Option<i32>,
    /// 触发方式，常量见 types::setting_trigger
    pub trigger: Option<i32>,
    pub initiated_by_me: Option<bool>,
    /// 设置生效时间（Unix 秒）；缺省按 0 参与新旧比较
    pub timestamp: Option<i64>,
    /// 消息存活秒数；0 表示关闭
    pub expiration: u32,
}

/// 一个会话的阅后即焚设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChatEphemeralSetting {
    pub id: String,
    pub is_ephemeral: bool,
    pub setting: Option<EphemeralSetting>,
}

impl StoredChatEphemeralSetting {
    /// 关闭状态（无明细）
    pub fn not_ephemeral(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_ephemeral: false,
            setting: None,
        }
    }

    /// 参与新旧比较的时间戳；没有明细或明细无时间按 0 算
    pub fn timestamp(&self) -> i64 {
        self.setting
            .as_ref()
            .and_then(|s| s.timestamp)
            .unwrap_or(0)
    }
}
