//! 标签镜像：标签定义 + 会话关联

pub mod dao;
pub mod models;

pub use dao::{LabelAssociationStore, LabelStore};
pub use models::{Label, LabelAssociation};
