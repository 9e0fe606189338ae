//! SQLite 数据库工具：统一创建镜像库连接池
//!
//! 表结构由各实体 store 在构造时通过 `CREATE TABLE IF NOT EXISTS` 自建，
//! 这里只负责连接池与连接级 PRAGMA。

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

/// 创建 SQLite 连接池
///
/// WAL + NORMAL：历史同步会并行写入多个会话的消息，降低写锁竞争。
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    // 内存库每条连接都是独立的空库，必须限制为单连接
    let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await?;

    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL;").execute(&pool).await?;

    Ok(pool)
}
