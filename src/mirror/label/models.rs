//! 标签镜像实体

use serde::{Deserialize, Serialize};

/// 标签定义
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    /// 调色板编号，展示端自行解释
    pub color: i32,
}

/// 会话与标签的关联（复合键）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelAssociation {
    pub chat_id: String,
    pub label_id: String,
}
