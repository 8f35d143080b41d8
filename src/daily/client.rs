//! 后端客户端：连接配置与 Supabase 实现
//!
//! `SupabaseClient` 组合 REST（增删改查）与 realtime（变更订阅）两部分，
//! 对外实现统一的 [`TableBackend`]。

use crate::daily::backend::{ChangeFeed, ChangeFilter, ListQuery, TableBackend};
use crate::daily::realtime::RealtimeClient;
use crate::daily::record::api::RecordApi;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tracing::info;

/// 随请求发送的客户端标识
pub const CLIENT_INFO: &str = concat!("daily-record-sdk-rust/", env!("CARGO_PKG_VERSION"));

/// 客户端连接配置
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// 服务地址，例如 `https://xyz.supabase.co`
    pub endpoint_url: String,
    /// 匿名 API key
    pub api_key: String,
}

impl ClientConfig {
    pub fn new(endpoint_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
        }
    }

    /// 两个值都非空时才构成有效配置
    pub fn from_parts(endpoint_url: Option<String>, api_key: Option<String>) -> Option<Self> {
        let url = endpoint_url.filter(|s| !s.trim().is_empty())?;
        let key = api_key.filter(|s| !s.trim().is_empty())?;
        Some(Self::new(url, key))
    }

    /// 校验 URL 协议与 key
    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint_url.starts_with("https://") || self.endpoint_url.starts_with("http://"))
        {
            return Err(anyhow::anyhow!(
                "无效的服务地址（需要 http:// 或 https://）: {}",
                self.endpoint_url
            ));
        }
        if self.api_key.is_empty() {
            return Err(anyhow::anyhow!("API key 不能为空"));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// 构造带认证头的 HTTP 客户端（apikey / Authorization 通过 default_headers 自动添加）
pub(crate) fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client> {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("apikey"),
        HeaderValue::from_str(&config.api_key).context("无效的 API key")?,
    );
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", config.api_key)).context("无效的 API key")?,
    );
    headers.insert(
        HeaderName::from_static("x-client-info"),
        HeaderValue::from_static(CLIENT_INFO),
    );

    reqwest::ClientBuilder::new()
        .default_headers(headers)
        .build()
        .context("创建 HTTP 客户端失败")
}

/// Supabase 后端客户端
pub struct SupabaseClient {
    api: RecordApi,
    realtime: RealtimeClient,
}

impl SupabaseClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let http_client = build_http_client(config)?;

        info!("[Client] 创建 Supabase 客户端: {}", config.endpoint_url);

        Ok(Self {
            api: RecordApi::new(http_client, &config.endpoint_url),
            realtime: RealtimeClient::new(&config.endpoint_url, &config.api_key),
        })
    }
}

#[async_trait]
impl TableBackend for SupabaseClient {
    async fn select(&self, query: &ListQuery) -> Result<Vec<Value>> {
        self.api.select(query).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.api.insert(table, &row).await
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value> {
        self.api.update(table, id, &patch).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.api.delete(table, id).await
    }

    async fn ping(&self, table: &str) -> Result<()> {
        self.api.ping(table).await
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeFeed> {
        self.realtime.subscribe(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_requires_both_values() {
        assert!(ClientConfig::from_parts(None, Some("k".into())).is_none());
        assert!(ClientConfig::from_parts(Some("https://a.co".into()), Some("  ".into())).is_none());

        let cfg = ClientConfig::from_parts(
            Some(" https://a.supabase.co/ ".into()),
            Some("anon".into()),
        )
        .unwrap();
        assert_eq!(cfg.endpoint_url, "https://a.supabase.co");
        assert_eq!(cfg.api_key, "anon");
    }

    #[test]
    fn validate_rejects_unknown_scheme() {
        assert!(ClientConfig::new("ftp://a.co", "k").validate().is_err());
        assert!(ClientConfig::new("https://a.co", "k").validate().is_ok());
    }

    #[test]
    fn debug_hides_api_key() {
        let out = format!("{:?}", ClientConfig::new("https://a.co", "secret-key"));
        assert!(!out.contains("secret-key"));
        assert!(out.contains("https://a.co"));
    }

    #[test]
    fn supabase_client_rejects_invalid_config() {
        assert!(SupabaseClient::new(&ClientConfig::new("a.co", "k")).is_err());
    }
}
