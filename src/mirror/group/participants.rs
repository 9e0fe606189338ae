//! 群信息增量套用（纯函数，不碰存储）
//!
//! 元数据字段带了就改。成员差量受版本栅栏保护：差量的 prev 版本必须
//! 等于本地存量版本才能套用，对不上说明中间丢过事件，本地成员表已
//! 不可信，调用方应丢弃差量并整体重拉。空差量不动成员表也不动版本。

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::mirror::events::GroupInfoEvent;
use crate::mirror::group::models::{GroupParticipant, GroupSnapshot};
use crate::mirror::types::VersionConflict;

/// 成员表的可变视图：保留老成员原有顺序，新加入的追加在尾部
struct ParticipantsMap {
    by_id: HashMap<String, GroupParticipant>,
    original_order: Vec<String>,
    newly_joined: Vec<String>,
}

impl ParticipantsMap {
    fn new(participants: Vec<GroupParticipant>) -> Self {
        let original_order: Vec<String> = participants.iter().map(|p| p.id.clone()).collect();
        let by_id = participants.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            by_id,
            original_order,
            newly_joined: Vec::new(),
        }
    }

    /// 已在群里的重复加入忽略
    fn join(&mut self, id: &str) {
        if self.by_id.contains_key(id) {
            return;
        }
        self.by_id.insert(id.to_string(), GroupParticipant::new(id));
        self.newly_joined.push(id.to_string());
    }

    fn leave(&mut self, id: &str) {
        self.by_id.remove(id);
    }

    fn promote(&mut self, id: &str) {
        if let Some(p) = self.by_id.get_mut(id) {
            p.is_admin = true;
            p.is_super_admin = false;
        }
    }

    fn demote(&mut self, id: &str) {
        if let Some(p) = self.by_id.get_mut(id) {
            p.is_admin = false;
            p.is_super_admin = false;
        }
    }

    fn into_list(mut self) -> Vec<GroupParticipant> {
        let mut list = Vec::with_capacity(self.by_id.len());
        for id in &self.original_order {
            if let Some(p) = self.by_id.remove(id) {
                list.push(p);
            }
        }
        for id in &self.newly_joined {
            if let Some(p) = self.by_id.remove(id) {
                list.push(p);
            }
        }
        list
    }
}

/// 把一条群信息增量套到快照上
///
/// 版本对不上时返回 [`VersionConflict`]，此时快照未被改动成员部分
/// （元数据字段已按增量生效，调用方丢弃快照即可）。
pub fn update_group_info(group: &mut GroupSnapshot, update: &GroupInfoEvent) -> Result<()> {
    if let Some(name) = &update.name {
        group.name = name.clone();
    }
    if let Some(topic) = &update.topic {
        group.topic = topic.clone();
    }
    if let Some(locked) = update.locked {
        group.is_locked = locked;
    }
    if let Some(announce) = update.announce {
        group.is_announce = announce;
    }
    if let Some(ephemeral) = &update.ephemeral {
        group.is_ephemeral = ephemeral.is_ephemeral;
        group.disappearing_timer = ephemeral.disappearing_timer;
    }

    // 纯元数据变更不触碰版本栅栏
    if update.participant_diff_is_empty() {
        return Ok(());
    }

    if update.prev_participant_version_id != group.participant_version_id {
        bail!(VersionConflict {
            group_id: group.id.clone(),
            expected: group.participant_version_id.clone(),
            actual: update.prev_participant_version_id.clone(),
        });
    }

    let mut participants = ParticipantsMap::new(std::mem::take(&mut group.participants));
    for id in &update.join {
        participants.join(id);
    }
    for id in &update.leave {
        participants.leave(id);
    }
    for id in &update.promote {
        participants.promote(id);
    }
    for id in &update.demote {
        participants.demote(id);
    }
    group.participants = participants.into_list();
    group.participant_version_id = update.participant_version_id.clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::events::GroupEphemeralChange;

    const V1: &str = "1740132428878975";
    const V2: &str = "1740132428878976";

    fn test_group() -> GroupSnapshot {
        GroupSnapshot {
            id: "123@g.us".to_string(),
            name: "Test Group".to_string(),
            topic: "Test Topic".to_string(),
            participant_version_id: V1.to_string(),
            participants: vec![
                GroupParticipant::new("888@s.whatsapp.net"),
                GroupParticipant {
                    id: "999@s.whatsapp.net".to_string(),
                    is_admin: false,
                    is_super_admin: true,
                },
            ],
            ..Default::default()
        }
    }

    fn diff(join: &[&str], leave: &[&str], promote: &[&str], demote: &[&str]) -> GroupInfoEvent {
        GroupInfoEvent {
            group_id: "123@g.us".to_string(),
            join: join.iter().map(|s| s.to_string()).collect(),
            leave: leave.iter().map(|s| s.to_string()).collect(),
            promote: promote.iter().map(|s| s.to_string()).collect(),
            demote: demote.iter().map(|s| s.to_string()).collect(),
            prev_participant_version_id: V1.to_string(),
            participant_version_id: V2.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_metadata_fields_apply_when_present() {
        let mut group = test_group();
        let update = GroupInfoEvent {
            group_id: "123@g.us".to_string(),
            name: Some("新群名".to_string()),
            topic: Some("新公告".to_string()),
            locked: Some(true),
            announce: Some(true),
            ephemeral: Some(GroupEphemeralChange {
                is_ephemeral: true,
                disappearing_timer: 86400,
            }),
            ..Default::default()
        };
        update_group_info(&mut group, &update).unwrap();
        assert_eq!(group.name, "新群名");
        assert_eq!(group.topic, "新公告");
        assert!(group.is_locked);
        assert!(group.is_announce);
        assert!(group.is_ephemeral);
        assert_eq!(group.disappearing_timer, 86400);
        // 空成员差量：版本号原样
        assert_eq!(group.participant_version_id, V1);
        assert_eq!(group.participants.len(), 2);
    }

    #[test]
    fn test_metadata_absent_fields_are_kept() {
        let mut group = test_group();
        let update = GroupInfoEvent {
            group_id: "123@g.us".to_string(),
            topic: Some("只改公告".to_string()),
            ..Default::default()
        };
        update_group_info(&mut group, &update).unwrap();
        assert_eq!(group.name, "Test Group");
        assert_eq!(group.topic, "只改公告");
    }

    #[test]
    fn test_join_appends_and_adopts_version() {
        let mut group = test_group();
        update_group_info(&mut group, &diff(&["111@s.whatsapp.net"], &[], &[], &[])).unwrap();
        assert_eq!(group.participants.len(), 3);
        // 新成员排在老成员之后
        assert_eq!(group.participants[2].id, "111@s.whatsapp.net");
        assert!(!group.participants[2].is_admin);
        assert_eq!(group.participant_version_id, V2);
    }

    #[test]
    fn test_mismatched_version_rejects_diff() {
        let mut group = test_group();
        let mut update = diff(&["111@s.whatsapp.net"], &[], &[], &[]);
        update.prev_participant_version_id = "123".to_string();

        let err = update_group_info(&mut group, &update).unwrap_err();
        assert!(err.downcast_ref::<VersionConflict>().is_some());
        // 成员表和版本号都没动
        assert_eq!(group.participants.len(), 2);
        assert_eq!(group.participant_version_id, V1);
    }

    #[test]
    fn test_leave_removes_participant() {
        let mut group = test_group();
        update_group_info(&mut group, &diff(&[], &["888@s.whatsapp.net"], &[], &[])).unwrap();
        assert_eq!(group.participants.len(), 1);
        assert_eq!(group.participants[0].id, "999@s.whatsapp.net");
    }

    #[test]
    fn test_promote_sets_admin_only() {
        let mut group = test_group();
        update_group_info(&mut group, &diff(&[], &[], &["888@s.whatsapp.net"], &[])).unwrap();
        let p = group.participant("888@s.whatsapp.net").unwrap();
        assert!(p.is_admin);
        assert!(!p.is_super_admin);
    }

    #[test]
    fn test_demote_clears_both_flags() {
        let mut group = test_group();
        update_group_info(&mut group, &diff(&[], &[], &[], &["999@s.whatsapp.net"])).unwrap();
        let p = group.participant("999@s.whatsapp.net").unwrap();
        assert!(!p.is_admin);
        assert!(!p.is_super_admin);
    }

    #[test]
    fn test_join_leave_join_keeps_single_entry() {
        let mut group = test_group();
        let v3 = "1740132428878977";
        let v4 = "1740132428878978";

        update_group_info(&mut group, &diff(&["111@s.whatsapp.net"], &[], &[], &[])).unwrap();
        let mut leave = diff(&[], &["111@s.whatsapp.net"], &[], &[]);
        leave.prev_participant_version_id = V2.to_string();
        leave.participant_version_id = v3.to_string();
        update_group_info(&mut group, &leave).unwrap();
        let mut rejoin = diff(&["111@s.whatsapp.net"], &[], &[], &[]);
        rejoin.prev_participant_version_id = v3.to_string();
        rejoin.participant_version_id = v4.to_string();
        update_group_info(&mut group, &rejoin).unwrap();

        let entries: Vec<_> = group
            .participants
            .iter()
            .filter(|p| p.id == "111@s.whatsapp.net")
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(group.participant_version_id, v4);
    }

    #[test]
    fn test_duplicate_join_in_one_diff_is_ignored() {
        let mut group = test_group();
        update_group_info(
            &mut group,
            &diff(&["111@s.whatsapp.net", "111@s.whatsapp.net", "888@s.whatsapp.net"], &[], &[], &[]),
        )
        .unwrap();
        assert_eq!(group.participants.len(), 3);
    }
}
