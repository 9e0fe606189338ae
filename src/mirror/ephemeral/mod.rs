//! 会话级阅后即焚设置镜像

pub mod dao;
pub mod models;
pub mod service;

pub use dao::EphemeralStore;
pub use models::{EphemeralSetting, StoredChatEphemeralSetting};
pub use service::{
    setting_from_context, setting_from_group, setting_from_history, setting_from_protocol,
    EphemeralSyncer, SettingSource,
};
