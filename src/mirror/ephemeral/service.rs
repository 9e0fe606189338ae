//! 阅后即焚设置同步：多来源写入仲裁
//!
//! 同一个会话的设置会从四个来源到达：协议消息里的显式变更、普通消息
//! 上下文捎带、历史同步会话头、群元数据。前者是用户动作，无条件生效；
//! 后三者只是状态快照，按时间戳新旧仲裁，防止乱序重放把新设置冲掉。

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::mirror::ephemeral::dao::EphemeralStore;
use crate::mirror::ephemeral::models::{EphemeralSetting, StoredChatEphemeralSetting};
use crate::mirror::events::{DisappearingMode, HistoryConversation, MessageContext, MessageInfo};
use crate::mirror::group::GroupSnapshot;
use crate::mirror::types::{is_user_chat, setting_initiator, setting_trigger, Page};

/// 设置来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingSource {
    /// 协议消息里的显式变更（用户动作）
    ProtocolChange,
    /// 普通消息上下文捎带
    MessageContext,
    /// 历史同步会话头
    HistorySync,
    /// 群元数据
    GroupMetadata,
}

impl SettingSource {
    fn is_explicit(&self) -> bool {
        matches!(self, SettingSource::ProtocolChange)
    }

    fn name(&self) -> &'static str {
        match self {
            SettingSource::ProtocolChange => "协议变更",
            SettingSource::MessageContext => "消息上下文",
            SettingSource::HistorySync => "历史同步",
            SettingSource::GroupMetadata => "群元数据",
        }
    }
}

/// 字段级合并：来件带了的字段覆盖，没带的保留存量
fn merge_setting(
    stored: Option<StoredChatEphemeralSetting>,
    mut incoming: StoredChatEphemeralSetting,
) -> StoredChatEphemeralSetting {
    let stored_detail = stored.and_then(|s| s.setting);
    incoming.setting = match (stored_detail, incoming.setting) {
        (Some(old), Some(new)) => Some(EphemeralSetting {
            initiator: new.initiator.or(old.initiator),
            trigger: new.trigger.or(old.trigger),
            initiated_by_me: new.initiated_by_me.or(old.initiated_by_me),
            timestamp: new.timestamp.or(old.timestamp),
            expiration: new.expiration,
        }),
        (old, None) => old,
        (None, new) => new,
    };
    incoming
}

pub struct EphemeralSyncer {
    store: Arc<EphemeralStore>,
}

impl EphemeralSyncer {
    pub fn new(store: Arc<EphemeralStore>) -> Self {
        Self { store }
    }

    /// 写入仲裁
    ///
    /// 显式来源无条件落库。快照类来源按时间戳比较：开启/更新在不早于
    /// 存量时生效（同刻重放取后到的），关闭必须严格更新才生效。没带
    /// 时间戳的按 0 参与比较。
    pub async fn apply(
        &self,
        incoming: StoredChatEphemeralSetting,
        source: SettingSource,
    ) -> Result<()> {
        let stored = self.store.get(&incoming.id).await?;
        if !source.is_explicit() {
            if let Some(stored) = &stored {
                let stored_ts = stored.timestamp();
                let incoming_ts = incoming.timestamp();
                let allowed = if incoming.is_ephemeral {
                    incoming_ts >= stored_ts
                } else {
                    incoming_ts > stored_ts
                };
                if !allowed {
                    debug!(
                        "[EphemeralSync] 会话 {} 来自{}的设置已过期 (来件 {} / 存量 {})，跳过",
                        incoming.id,
                        source.name(),
                        incoming_ts,
                        stored_ts
                    );
                    return Ok(());
                }
            }
        }

        let merged = merge_setting(stored, incoming);
        self.store.upsert(&merged).await?;
        info!(
            "[EphemeralSync] ✅ 会话 {} 设置更新: 开启={} 存活={}s (来源: {})",
            merged.id,
            merged.is_ephemeral,
            merged.setting.as_ref().map(|s| s.expiration).unwrap_or(0),
            source.name()
        );
        Ok(())
    }

    /// 带时间戳删除：存量设置严格早于 timestamp 才删，否则原样保留
    pub async fn delete_before(&self, chat_id: &str, timestamp: i64) -> Result<bool> {
        let Some(stored) = self.store.get(chat_id).await? else {
            return Ok(false);
        };
        if stored.timestamp() < timestamp {
            self.store.delete(chat_id).await?;
            info!("[EphemeralSync] 🗑️ 删除会话 {} 的阅后即焚设置", chat_id);
            Ok(true)
        } else {
            debug!(
                "[EphemeralSync] 会话 {} 的设置比删除时间新 ({} >= {})，保留",
                chat_id,
                stored.timestamp(),
                timestamp
            );
            Ok(false)
        }
    }

    pub async fn get(&self, chat_id: &str) -> Result<Option<StoredChatEphemeralSetting>> {
        self.store.get(chat_id).await
    }

    /// 列出当前开启阅后即焚的会话设置
    pub async fn list_enabled(&self, page: Page) -> Result<Vec<StoredChatEphemeralSetting>> {
        self.store.list_enabled(page).await
    }
}

/// 协议消息里的显式设置变更
///
/// 存活时长为 0 是关闭；开启必须带消失模式，缺了就当没看见。
/// 两种产出都记录事件时间，后续快照类来源据此判新旧。
pub fn setting_from_protocol(
    info: &MessageInfo,
    expiration: u32,
    mode: Option<&DisappearingMode>,
) -> Option<StoredChatEphemeralSetting> {
    if expiration == 0 {
        return Some(StoredChatEphemeralSetting {
            id: info.chat_id.clone(),
            is_ephemeral: false,
            setting: Some(EphemeralSetting {
                timestamp: Some(info.timestamp),
                expiration: 0,
                ..Default::default()
            }),
        });
    }
    let mode = mode?;
    Some(StoredChatEphemeralSetting {
        id: info.chat_id.clone(),
        is_ephemeral: true,
        setting: Some(EphemeralSetting {
            initiator: Some(mode.initiator),
            trigger: Some(mode.trigger),
            initiated_by_me: Some(mode.initiated_by_me),
            timestamp: Some(info.timestamp),
            expiration,
        }),
    })
}

/// 普通消息上下文捎带的设置快照；只认单聊，必须同时带存活时长和消失模式
pub fn setting_from_context(
    info: &MessageInfo,
    context: &MessageContext,
) -> Option<StoredChatEphemeralSetting> {
    if !is_user_chat(&info.chat_id) {
        return None;
    }
    let expiration = context.expiration?;
    let mode = context.disappearing_mode.as_ref()?;
    Some(StoredChatEphemeralSetting {
        id: info.chat_id.clone(),
        is_ephemeral: expiration > 0,
        setting: Some(EphemeralSetting {
            initiator: Some(mode.initiator),
            trigger: Some(mode.trigger),
            initiated_by_me: Some(mode.initiated_by_me),
            timestamp: context.ephemeral_setting_timestamp,
            expiration,
        }),
    })
}

/// 历史同步会话头里的设置快照；没开启的会话不产出
pub fn setting_from_history(conv: &HistoryConversation) -> Option<StoredChatEphemeralSetting> {
    let expiration = conv.ephemeral_expiration?;
    if expiration == 0 {
        return None;
    }
    let mode = conv.disappearing_mode.as_ref();
    Some(StoredChatEphemeralSetting {
        id: conv.chat_id.clone(),
        is_ephemeral: true,
        setting: Some(EphemeralSetting {
            initiator: mode.map(|m| m.initiator),
            trigger: mode.map(|m| m.trigger),
            initiated_by_me: mode.map(|m| m.initiated_by_me),
            timestamp: conv.ephemeral_setting_timestamp,
            expiration,
        }),
    })
}

/// 群元数据推导的设置快照；群设置没有独立时间戳
pub fn setting_from_group(group: &GroupSnapshot) -> StoredChatEphemeralSetting {
    StoredChatEphemeralSetting {
        id: group.id.clone(),
        is_ephemeral: group.is_ephemeral,
        setting: Some(EphemeralSetting {
            initiator: Some(setting_initiator::CHANGED_IN_CHAT),
            trigger: Some(setting_trigger::CHAT_SETTING),
            initiated_by_me: Some(false),
            timestamp: None,
            expiration: group.disappearing_timer,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::db::create_sqlite_pool;
    use std::sync::Once;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            let env_filter = EnvFilter::new("info,im_mirror_core=debug,sqlx=debug");
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        });
    }

    async fn new_syncer() -> (EphemeralSyncer, Arc<EphemeralStore>) {
        init_test_logger();
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        let store = Arc::new(EphemeralStore::new(pool).await.unwrap());
        (EphemeralSyncer::new(store.clone()), store)
    }

    fn snapshot(chat_id: &str, enabled: bool, expiration: u32, ts: i64) -> StoredChatEphemeralSetting {
        StoredChatEphemeralSetting {
            id: chat_id.to_string(),
            is_ephemeral: enabled,
            setting: Some(EphemeralSetting {
                initiator: Some(setting_initiator::INITIATED_BY_OTHER),
                trigger: Some(setting_trigger::CHAT_SETTING),
                initiated_by_me: Some(false),
                timestamp: Some(ts),
                expiration,
            }),
        }
    }

    const CHAT: &str = "888@s.whatsapp.net";

    #[tokio::test]
    async fn test_newer_snapshot_beats_older() {
        let (syncer, store) = new_syncer().await;
        syncer
            .apply(snapshot(CHAT, true, 86400, 200), SettingSource::MessageContext)
            .await
            .unwrap();
        // 乱序到达的旧快照不生效
        syncer
            .apply(snapshot(CHAT, true, 604800, 100), SettingSource::MessageContext)
            .await
            .unwrap();

        let got = store.get(CHAT).await.unwrap().unwrap();
        assert_eq!(got.setting.as_ref().unwrap().expiration, 86400);
        assert_eq!(got.timestamp(), 200);
    }

    #[tokio::test]
    async fn test_equal_timestamp_enable_takes_latest() {
        let (syncer, store) = new_syncer().await;
        syncer
            .apply(snapshot(CHAT, true, 86400, 200), SettingSource::HistorySync)
            .await
            .unwrap();
        syncer
            .apply(snapshot(CHAT, true, 604800, 200), SettingSource::MessageContext)
            .await
            .unwrap();
        let got = store.get(CHAT).await.unwrap().unwrap();
        assert_eq!(got.setting.as_ref().unwrap().expiration, 604800);
    }

    #[tokio::test]
    async fn test_snapshot_disable_needs_strictly_newer() {
        let (syncer, store) = new_syncer().await;
        syncer
            .apply(snapshot(CHAT, true, 86400, 200), SettingSource::MessageContext)
            .await
            .unwrap();
        // 同刻的关闭不生效
        syncer
            .apply(snapshot(CHAT, false, 0, 200), SettingSource::MessageContext)
            .await
            .unwrap();
        assert!(store.get(CHAT).await.unwrap().unwrap().is_ephemeral);
        // 严格更新的关闭生效
        syncer
            .apply(snapshot(CHAT, false, 0, 201), SettingSource::MessageContext)
            .await
            .unwrap();
        assert!(!store.get(CHAT).await.unwrap().unwrap().is_ephemeral);
    }

    #[tokio::test]
    async fn test_explicit_change_wins_regardless_of_timestamp() {
        let (syncer, store) = new_syncer().await;
        syncer
            .apply(snapshot(CHAT, true, 86400, 200), SettingSource::MessageContext)
            .await
            .unwrap();
        // 用户显式关闭，时间戳比存量旧也要生效
        let info = MessageInfo {
            id: "3EB0".to_string(),
            chat_id: CHAT.to_string(),
            sender_id: CHAT.to_string(),
            from_me: false,
            timestamp: 150,
        };
        let disable = setting_from_protocol(&info, 0, None).unwrap();
        syncer.apply(disable, SettingSource::ProtocolChange).await.unwrap();
        let got = store.get(CHAT).await.unwrap().unwrap();
        assert!(!got.is_ephemeral);
        assert_eq!(got.timestamp(), 150);

        // 之后更旧的上下文快照也压不回去
        syncer
            .apply(snapshot(CHAT, true, 86400, 120), SettingSource::MessageContext)
            .await
            .unwrap();
        assert!(!store.get(CHAT).await.unwrap().unwrap().is_ephemeral);
    }

    #[tokio::test]
    async fn test_partial_fields_merge_with_stored() {
        let (syncer, store) = new_syncer().await;
        syncer
            .apply(snapshot(CHAT, true, 86400, 100), SettingSource::MessageContext)
            .await
            .unwrap();
        // 只带存活时长和时间戳的来件：其余字段保留存量
        let partial = StoredChatEphemeralSetting {
            id: CHAT.to_string(),
            is_ephemeral: true,
            setting: Some(EphemeralSetting {
                timestamp: Some(200),
                expiration: 604800,
                ..Default::default()
            }),
        };
        syncer.apply(partial, SettingSource::HistorySync).await.unwrap();

        let detail = store.get(CHAT).await.unwrap().unwrap().setting.unwrap();
        assert_eq!(detail.expiration, 604800);
        assert_eq!(detail.timestamp, Some(200));
        assert_eq!(detail.initiator, Some(setting_initiator::INITIATED_BY_OTHER));
        assert_eq!(detail.initiated_by_me, Some(false));
    }

    #[tokio::test]
    async fn test_group_snapshot_only_seeds_empty_state() {
        let (syncer, store) = new_syncer().await;
        let group = GroupSnapshot {
            id: "123@g.us".to_string(),
            is_ephemeral: true,
            disappearing_timer: 86400,
            ..Default::default()
        };
        // 空库时群元数据能种下设置
        syncer
            .apply(setting_from_group(&group), SettingSource::GroupMetadata)
            .await
            .unwrap();
        assert!(store.get("123@g.us").await.unwrap().unwrap().is_ephemeral);

        // 已有带时间戳的设置后，无时间戳的群快照不再覆盖
        syncer
            .apply(snapshot("123@g.us", true, 604800, 300), SettingSource::ProtocolChange)
            .await
            .unwrap();
        let mut off = group.clone();
        off.is_ephemeral = false;
        off.disappearing_timer = 0;
        syncer
            .apply(setting_from_group(&off), SettingSource::GroupMetadata)
            .await
            .unwrap();
        let got = store.get("123@g.us").await.unwrap().unwrap();
        assert!(got.is_ephemeral);
        assert_eq!(got.setting.unwrap().expiration, 604800);
    }

    #[tokio::test]
    async fn test_delete_before_only_removes_strictly_older() {
        let (syncer, store) = new_syncer().await;
        syncer
            .apply(snapshot(CHAT, true, 86400, 100), SettingSource::MessageContext)
            .await
            .unwrap();
        // 同刻不删
        assert!(!syncer.delete_before(CHAT, 100).await.unwrap());
        assert!(store.get(CHAT).await.unwrap().is_some());
        // 严格更晚才删
        assert!(syncer.delete_before(CHAT, 101).await.unwrap());
        assert!(store.get(CHAT).await.unwrap().is_none());
        // 没有存量时静默
        assert!(!syncer.delete_before(CHAT, 200).await.unwrap());
    }

    #[test]
    fn test_protocol_extractor() {
        let info = MessageInfo {
            id: "3EB0".to_string(),
            chat_id: CHAT.to_string(),
            sender_id: CHAT.to_string(),
            from_me: true,
            timestamp: 500,
        };
        // 关闭：不需要消失模式，带事件时间
        let off = setting_from_protocol(&info, 0, None).unwrap();
        assert!(!off.is_ephemeral);
        assert_eq!(off.timestamp(), 500);
        // 开启但缺消失模式：不产出
        assert!(setting_from_protocol(&info, 86400, None).is_none());
        // 开启齐全
        let mode = DisappearingMode {
            initiator: setting_initiator::INITIATED_BY_ME,
            trigger: setting_trigger::CHAT_SETTING,
            initiated_by_me: true,
        };
        let on = setting_from_protocol(&info, 86400, Some(&mode)).unwrap();
        assert!(on.is_ephemeral);
        assert_eq!(on.setting.unwrap().initiated_by_me, Some(true));
    }

    #[test]
    fn test_context_extractor_only_user_chats() {
        let context = MessageContext {
            expiration: Some(86400),
            ephemeral_setting_timestamp: Some(300),
            disappearing_mode: Some(DisappearingMode::default()),
        };
        let mut info = MessageInfo {
            id: "3EB0".to_string(),
            chat_id: "123@g.us".to_string(),
            sender_id: CHAT.to_string(),
            from_me: false,
            timestamp: 500,
        };
        assert!(setting_from_context(&info, &context).is_none());

        info.chat_id = CHAT.to_string();
        let got = setting_from_context(&info, &context).unwrap();
        assert!(got.is_ephemeral);
        assert_eq!(got.timestamp(), 300);

        // 缺消失模式不产出
        let bare = MessageContext {
            expiration: Some(86400),
            ..Default::default()
        };
        assert!(setting_from_context(&info, &bare).is_none());
    }

    #[test]
    fn test_history_extractor_carries_expiration() {
        let conv = HistoryConversation {
            chat_id: CHAT.to_string(),
            ephemeral_expiration: Some(86400),
            ephemeral_setting_timestamp: Some(400),
            disappearing_mode: None,
            messages: vec![],
        };
        let got = setting_from_history(&conv).unwrap();
        let detail = got.setting.unwrap();
        assert_eq!(detail.expiration, 86400);
        assert_eq!(detail.timestamp, Some(400));
        assert!(detail.initiator.is_none());

        // 没开启的会话不产出
        let off = HistoryConversation {
            chat_id: CHAT.to_string(),
            ephemeral_expiration: Some(0),
            ..Default::default()
        };
        assert!(setting_from_history(&off).is_none());
    }
}
