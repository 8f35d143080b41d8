//! 本地持久化键值存储
//!
//! 浏览器端的配置回退值保存在 localStorage 中，这里用一张 SQLite 表
//! 提供同样的字符串键值语义（get / set / remove）。

use crate::daily::db::create_sqlite_pool_with_migration;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// 本地键值存储（基于 sqlx）
#[derive(Clone)]
pub struct LocalStorage {
    db: Pool<Sqlite>,
}

impl LocalStorage {
    /// 使用已有连接池（表结构需已迁移）
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 打开数据库并执行迁移
    pub async fn open(db_url: &str) -> Result<Self> {
        let db = create_sqlite_pool_with_migration(db_url).await?;
        Ok(Self::new(db))
    }

    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM local_storage WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("读取本地存储失败: {}", key))?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    /// 写入（存在则覆盖）
    pub async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_storage (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await
        .with_context(|| format!("写入本地存储失败: {}", key))?;

        debug!("[Storage] 已写入 {}", key);
        Ok(())
    }

    pub async fn remove_item(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM local_storage WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .with_context(|| format!("删除本地存储失败: {}", key))?;

        debug!("[Storage] 已删除 {}", key);
        Ok(())
    }

    /// 所有键（按字典序）
    pub async fn keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM local_storage ORDER BY key")
            .fetch_all(&self.db)
            .await
            .context("查询本地存储键列表失败")?;

        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("key"))
            .collect())
    }
}
