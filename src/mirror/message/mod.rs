//! 消息镜像：留存、状态推进、按会话清理

pub mod dao;
pub mod models;
pub mod service;

pub use dao::{MessageFilters, MessageStore};
pub use models::StoredMessage;
pub use service::MessageService;
