//! SQLite 工具：创建连接池并执行 sqlx 迁移
//!
//! 约定：crate 根目录下的 `migrations/` 存放所有迁移 SQL，
//! 由 `sqlx::migrate!()` 管理 schema 升级。

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::debug;

/// 本地存储默认数据库 URL
pub const DEFAULT_DB_URL: &str = "sqlite://daily-record.db?mode=rwc";

/// 创建 SQLite 连接池并执行所有未执行的迁移
pub async fn create_sqlite_pool_with_migration(db_url: &str) -> Result<Pool<Sqlite>> {
    debug!("[DB] 打开 SQLite: {}", db_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .with_context(|| format!("连接SQLite数据库失败: {}", db_url))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("执行数据库迁移失败")?;

    Ok(pool)
}
