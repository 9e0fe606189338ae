//! 群镜像：快照缓存、成员差量、版本栅栏

pub mod dao;
pub mod models;
pub mod participants;
pub mod service;

pub use dao::GroupStore;
pub use models::{GroupParticipant, GroupSnapshot};
pub use participants::update_group_info;
pub use service::{GroupCache, GroupFetcher};
