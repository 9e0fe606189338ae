//! 联系人镜像实体

use serde::{Deserialize, Serialize};

/// 本地联系人；显示字段都可能缺失，事件带到哪个就补哪个
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredContact {
    pub id: String,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    /// 对方自己设置的昵称
    pub push_name: Option<String>,
}

impl StoredContact {
    /// 会话列表展示名：通讯录全名优先，退而求其次用昵称
    pub fn display_name(&self) -> &str {
        if let Some(name) = &self.full_name {
            if !name.is_empty() {
                return name;
            }
        }
        if let Some(name) = &self.push_name {
            return name;
        }
        ""
    }

    /// 把来件里带了的字段并进存量
    pub fn merge_from(&mut self, other: &StoredContact) {
        if other.full_name.is_some() {
            self.full_name = other.full_name.clone();
        }
        if other.first_name.is_some() {
            self.first_name = other.first_name.clone();
        }
        if other.push_name.is_some() {
            self.push_name = other.push_name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_priority() {
        let mut contact = StoredContact {
            id: "888@s.whatsapp.net".to_string(),
            ..Default::default()
        };
        assert_eq!(contact.display_name(), "");
        contact.push_name = Some("昵称".to_string());
        assert_eq!(contact.display_name(), "昵称");
        contact.full_name = Some("通讯录名".to_string());
        assert_eq!(contact.display_name(), "通讯录名");
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut stored = StoredContact {
            id: "888@s.whatsapp.net".to_string(),
            full_name: Some("老全名".to_string()),
            first_name: Some("老名".to_string()),
            push_name: None,
        };
        stored.merge_from(&StoredContact {
            id: "888@s.whatsapp.net".to_string(),
            full_name: None,
            first_name: None,
            push_name: Some("新昵称".to_string()),
        });
        assert_eq!(stored.full_name.as_deref(), Some("老全名"));
        assert_eq!(stored.push_name.as_deref(), Some("新昵称"));
    }
}
