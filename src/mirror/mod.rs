//! 远端聊天状态的本地镜像
//!
//! 上游把账号的全部动态作为事件流推下来（至少一次交付，顺序不保证），
//! 这里负责把它落成可查询的本地镜像：消息、群、联系人、标签、会话级
//! 阅后即焚设置，并把每条事件原样转发给本地订阅者。

pub mod bus;
pub mod chat;
pub mod contact;
pub mod db;
pub mod ephemeral;
pub mod events;
pub mod group;
pub mod handler;
pub mod label;
pub mod message;
pub mod serialization;
pub mod session;
pub mod store;
pub mod types;
