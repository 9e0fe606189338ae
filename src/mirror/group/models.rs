//! 群镜像实体

use serde::{Deserialize, Serialize};

/// 群成员
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipant {
    pub id: String,
    pub is_admin: bool,
    pub is_super_admin: bool,
}

impl GroupParticipant {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            is_admin: false,
            is_super_admin: false,
        }
    }
}

/// 一个群的完整快照：元数据 + 成员表 + 成员表版本号
///
/// 成员表顺序有意义：老成员保持入库顺序，新加入的排在末尾。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub id: String,
    pub name: String,
    pub topic: String,
    /// 仅管理员可改群资料
    pub is_locked: bool,
    /// 仅管理员可发言
    pub is_announce: bool,
    pub is_ephemeral: bool,
    /// 阅后即焚存活秒数
    pub disappearing_timer: u32,
    /// 建群时间（Unix 秒）
    pub created_at: i64,
    /// 成员表版本号，成员差量事件靠它判断连续性
    pub participant_version_id: String,
    pub participants: Vec<GroupParticipant>,
}

impl GroupSnapshot {
    pub fn participant(&self, id: &str) -> Option<&GroupParticipant> {
        self.participants.iter().find(|p| p.id == id)
    }
}
