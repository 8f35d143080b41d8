//! 连接配置来源
//!
//! 解析顺序：构建期环境变量 → 运行期环境变量 → 本地持久化值。
//! 两项都缺失时视为未配置，不是错误。

use crate::daily::client::ClientConfig;
use crate::daily::storage::LocalStorage;
use anyhow::Result;
use tracing::debug;

/// 服务地址环境变量
pub const ENV_URL: &str = "VITE_SUPABASE_URL";
/// API key 环境变量
pub const ENV_KEY: &str = "VITE_SUPABASE_ANON_KEY";

/// 本地持久化的服务地址键
pub const STORAGE_URL_KEY: &str = "supabase_url";
/// 本地持久化的 API key 键
pub const STORAGE_KEY_KEY: &str = "supabase_anon_key";

/// 配置来自哪里
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    Environment,
    LocalStorage,
}

pub struct ConfigSource {
    env: Option<ClientConfig>,
    storage: Option<LocalStorage>,
}

impl ConfigSource {
    pub fn new(env: Option<ClientConfig>, storage: Option<LocalStorage>) -> Self {
        Self { env, storage }
    }

    /// 读取环境变量（构建期值优先）
    pub fn from_env(storage: Option<LocalStorage>) -> Self {
        let url = option_env!("VITE_SUPABASE_URL")
            .map(str::to_string)
            .or_else(|| std::env::var(ENV_URL).ok());
        let key = option_env!("VITE_SUPABASE_ANON_KEY")
            .map(str::to_string)
            .or_else(|| std::env::var(ENV_KEY).ok());

        Self::new(ClientConfig::from_parts(url, key), storage)
    }

    pub fn storage(&self) -> Option<&LocalStorage> {
        self.storage.as_ref()
    }

    /// 解析当前配置及其来源
    pub async fn resolve_with_origin(&self) -> Result<Option<(ClientConfig, ConfigOrigin)>> {
        if let Some(cfg) = &self.env {
            debug!("[Config] 使用环境变量配置");
            return Ok(Some((cfg.clone(), ConfigOrigin::Environment)));
        }

        let Some(storage) = &self.storage else {
            return Ok(None);
        };

        let url = storage.get_item(STORAGE_URL_KEY).await?;
        let key = storage.get_item(STORAGE_KEY_KEY).await?;
        let cfg = ClientConfig::from_parts(url, key);
        if cfg.is_some() {
            debug!("[Config] 使用本地持久化配置");
        }
        Ok(cfg.map(|c| (c, ConfigOrigin::LocalStorage)))
    }

    pub async fn resolve(&self) -> Result<Option<ClientConfig>> {
        Ok(self.resolve_with_origin().await?.map(|(cfg, _)| cfg))
    }

    /// 写入本地持久化值
    pub async fn persist(&self, config: &ClientConfig) -> Result<()> {
        let storage = self.require_storage()?;
        storage
            .set_item(STORAGE_URL_KEY, &config.endpoint_url)
            .await?;
        storage.set_item(STORAGE_KEY_KEY, &config.api_key).await?;
        Ok(())
    }

    /// 删除本地持久化值
    pub async fn clear(&self) -> Result<()> {
        let storage = self.require_storage()?;
        storage.remove_item(STORAGE_URL_KEY).await?;
        storage.remove_item(STORAGE_KEY_KEY).await?;
        Ok(())
    }

    fn require_storage(&self) -> Result<&LocalStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("未启用本地存储，无法保存配置"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daily::storage::tests::temp_storage;

    #[tokio::test]
    async fn unconfigured_without_env_or_storage() {
        let source = ConfigSource::new(None, None);
        assert!(source.resolve().await.unwrap().is_none());
        assert!(source.persist(&ClientConfig::new("https://a.co", "k")).await.is_err());
    }

    #[tokio::test]
    async fn falls_back_to_persisted_values() {
        let (_dir, storage) = temp_storage().await;
        let source = ConfigSource::new(None, Some(storage));
        assert!(source.resolve().await.unwrap().is_none());

        let cfg = ClientConfig::new("https://a.supabase.co", "anon");
        source.persist(&cfg).await.unwrap();
        assert_eq!(
            source.resolve_with_origin().await.unwrap(),
            Some((cfg, ConfigOrigin::LocalStorage))
        );

        source.clear().await.unwrap();
        assert!(source.resolve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn environment_wins_over_storage() {
        let (_dir, storage) = temp_storage().await;
        storage.set_item(STORAGE_URL_KEY, "https://local.co").await.unwrap();
        storage.set_item(STORAGE_KEY_KEY, "local").await.unwrap();

        let env = ClientConfig::new("https://env.co", "env");
        let source = ConfigSource::new(Some(env.clone()), Some(storage));
        assert_eq!(
            source.resolve_with_origin().await.unwrap(),
            Some((env, ConfigOrigin::Environment))
        );
    }

    #[tokio::test]
    async fn reads_values_saved_by_web_widget() {
        let (_dir, storage) = temp_storage().await;
        storage.set_item("supabase_url", "https://w.supabase.co").await.unwrap();
        storage.set_item("supabase_anon_key", "widget-key").await.unwrap();

        let source = ConfigSource::new(None, Some(storage));
        assert_eq!(
            source.resolve().await.unwrap(),
            Some(ClientConfig::new("https://w.supabase.co", "widget-key"))
        );
    }

    #[tokio::test]
    async fn half_persisted_config_is_unconfigured() {
        let (_dir, storage) = temp_storage().await;
        storage.set_item(STORAGE_URL_KEY, "https://local.co").await.unwrap();

        let source = ConfigSource::new(None, Some(storage));
        assert!(source.resolve().await.unwrap().is_none());
    }
}
