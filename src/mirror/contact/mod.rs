//! 联系人镜像

pub mod dao;
pub mod models;

pub use dao::ContactStore;
pub use models::StoredContact;
