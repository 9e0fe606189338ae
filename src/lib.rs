pub mod mirror;

// 重新导出常用类型和函数，方便外部使用
pub use mirror::{
    bus::{EventBus, Subscription},
    chat::{ChatView, StoredChat},
    contact::StoredContact,
    ephemeral::StoredChatEphemeralSetting,
    events::{Event, ServerEvent},
    group::{GroupFetcher, GroupSnapshot},
    label::{Label, LabelAssociation},
    message::StoredMessage,
    session::{Session, SessionConfig, SessionManager},
    types::{Page, Sort, SortOrder, Status},
};
