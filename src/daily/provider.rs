//! 后端客户端的生命周期管理
//!
//! 首次访问时解析配置并构建客户端，之后在进程生命周期内复用；
//! 只有显式修改或清除配置时才丢弃缓存、下次访问重新构建。

use crate::daily::backend::TableBackend;
use crate::daily::client::{ClientConfig, SupabaseClient};
use crate::daily::config::ConfigSource;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 由配置构建后端
pub type BackendFactory =
    Box<dyn Fn(&ClientConfig) -> Result<Arc<dyn TableBackend>> + Send + Sync>;

pub struct ClientProvider {
    source: ConfigSource,
    factory: BackendFactory,
    cached: Mutex<Option<Arc<dyn TableBackend>>>,
}

impl ClientProvider {
    /// 使用 Supabase 后端
    pub fn new(source: ConfigSource) -> Self {
        Self::with_factory(
            source,
            Box::new(|cfg: &ClientConfig| Ok(Arc::new(SupabaseClient::new(cfg)?) as Arc<dyn TableBackend>)),
        )
    }

    pub fn with_factory(source: ConfigSource, factory: BackendFactory) -> Self {
        Self {
            source,
            factory,
            cached: Mutex::new(None),
        }
    }

    /// 固定后端，始终视为已配置（离线使用或测试）
    pub fn fixed(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            source: ConfigSource::new(None, None),
            factory: Box::new(|_: &ClientConfig| Err(anyhow::anyhow!("固定后端不支持重新构建"))),
            cached: Mutex::new(Some(backend)),
        }
    }

    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// 获取后端；未配置时返回 None
    pub async fn client(&self) -> Result<Option<Arc<dyn TableBackend>>> {
        let mut cached = self.cached.lock().await;
        if let Some(backend) = cached.as_ref() {
            return Ok(Some(backend.clone()));
        }

        let Some(config) = self.source.resolve().await? else {
            debug!("[Provider] 未配置后端");
            return Ok(None);
        };

        let backend = (self.factory)(&config)?;
        info!("[Provider] ✅ 已构建后端客户端: {}", config.endpoint_url);
        *cached = Some(backend.clone());
        Ok(Some(backend))
    }

    /// 保存新配置并丢弃缓存的客户端
    pub async fn configure(&self, config: &ClientConfig) -> Result<()> {
        config.validate()?;
        self.source.persist(config).await?;
        self.invalidate().await;
        info!("[Provider] 配置已更新: {}", config.endpoint_url);
        Ok(())
    }

    /// 清除本地配置并丢弃缓存的客户端
    pub async fn clear_config(&self) -> Result<()> {
        self.source.clear().await?;
        self.invalidate().await;
        info!("[Provider] 配置已清除");
        Ok(())
    }

    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daily::memory::MemoryBackend;
    use crate::daily::storage::tests::temp_storage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_factory(builds: Arc<AtomicUsize>) -> BackendFactory {
        Box::new(move |_cfg: &ClientConfig| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryBackend::new()) as Arc<dyn TableBackend>)
        })
    }

    #[tokio::test]
    async fn unconfigured_provider_yields_none() {
        let builds = Arc::new(AtomicUsize::new(0));
        let provider =
            ClientProvider::with_factory(ConfigSource::new(None, None), counting_factory(builds.clone()));

        assert!(provider.client().await.unwrap().is_none());
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_is_built_once_and_rebuilt_after_configure() {
        let (_dir, storage) = temp_storage().await;
        let builds = Arc::new(AtomicUsize::new(0));
        let provider = ClientProvider::with_factory(
            ConfigSource::new(None, Some(storage)),
            counting_factory(builds.clone()),
        );

        provider
            .configure(&ClientConfig::new("https://a.supabase.co", "anon"))
            .await
            .unwrap();
        let first = provider.client().await.unwrap().unwrap();
        let second = provider.client().await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        provider
            .configure(&ClientConfig::new("https://b.supabase.co", "anon"))
            .await
            .unwrap();
        let third = provider.client().await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        provider.clear_config().await.unwrap();
        assert!(provider.client().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn configure_rejects_invalid_url() {
        let (_dir, storage) = temp_storage().await;
        let provider = ClientProvider::new(ConfigSource::new(None, Some(storage)));
        assert!(provider
            .configure(&ClientConfig::new("not-a-url", "anon"))
            .await
            .is_err());
        assert!(provider.client().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fixed_provider_is_always_configured() {
        let provider = ClientProvider::fixed(Arc::new(MemoryBackend::new()));
        assert!(provider.client().await.unwrap().is_some());
    }
}
