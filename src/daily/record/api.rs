//! 记录 HTTP API 客户端
//!
//! 负责所有 PostgREST 请求（`{endpoint}/rest/v1/{table}`）

use crate::daily::backend::ListQuery;
use crate::daily::types::handle_http_response;
use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

/// 按 id 定位单行
fn id_filter(id: &str) -> [(String, String); 1] {
    [("id".to_string(), format!("eq.{}", id))]
}

/// 按天查询的查询参数
pub(crate) fn list_params(query: &ListQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("select".to_string(), "*".to_string()),
        ("date".to_string(), format!("eq.{}", query.date)),
    ];
    if let Some(kind) = &query.kind {
        params.push((kind.column.clone(), format!("eq.{}", kind.value)));
    }
    params.push(("order".to_string(), "created_at.desc,id.desc".to_string()));
    params
}

/// 记录相关的 HTTP API 客户端
pub struct RecordApi {
    client: reqwest::Client,
    rest_url: String,
}

impl RecordApi {
    /// `client` 应该已经配置好 apikey / Authorization 默认请求头
    pub fn new(client: reqwest::Client, endpoint_url: &str) -> Self {
        Self {
            client,
            rest_url: format!("{}/rest/v1", endpoint_url.trim_end_matches('/')),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    /// 查询某天的记录
    pub async fn select(&self, query: &ListQuery) -> Result<Vec<Value>> {
        let request_id = Uuid::new_v4().to_string();
        let url = self.table_url(&query.table);

        debug!("[RecordAPI] 📡 查询记录: {} 日期 {}", query.table, query.date);
        debug!("[RecordAPI]   请求URL: {}, 请求ID: {}", url, request_id);

        let response = self
            .client
            .get(&url)
            .header("X-Request-Id", &request_id)
            .query(&list_params(query))
            .send()
            .await
            .context("请求失败")?;

        let rows: Vec<Value> = handle_http_response(response, "查询记录").await?;
        debug!("[RecordAPI] ✅ 查询完成，条目数: {}", rows.len());
        Ok(rows)
    }

    /// 插入一行并返回服务端生成的完整记录
    pub async fn insert(&self, table: &str, row: &Value) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let url = self.table_url(table);

        info!("[RecordAPI] 📡 新增记录: {}", table);
        debug!("[RecordAPI]   请求URL: {}, 请求ID: {}", url, request_id);

        let response = self
            .client
            .post(&url)
            .header("X-Request-Id", &request_id)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await
            .context("请求失败")?;

        let rows: Vec<Value> = handle_http_response(response, "新增记录").await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("新增记录后服务端未返回数据"))
    }

    /// 按 id 更新部分字段
    pub async fn update(&self, table: &str, id: &str, patch: &Value) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let url = self.table_url(table);

        info!("[RecordAPI] 📡 更新记录: {} id={}", table, id);
        debug!("[RecordAPI]   请求URL: {}, 请求ID: {}", url, request_id);

        let response = self
            .client
            .patch(&url)
            .header("X-Request-Id", &request_id)
            .header("Prefer", "return=representation")
            .query(&id_filter(id))
            .json(patch)
            .send()
            .await
            .context("请求失败")?;

        let rows: Vec<Value> = handle_http_response(response, "更新记录").await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("记录不存在: {} id={}", table, id))
    }

    /// 按 id 删除
    pub async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let request_id = Uuid::new_v4().to_string();
        let url = self.table_url(table);

        info!("[RecordAPI] 📡 删除记录: {} id={}", table, id);
        debug!("[RecordAPI]   请求URL: {}, 请求ID: {}", url, request_id);

        let response = self
            .client
            .delete(&url)
            .header("X-Request-Id", &request_id)
            .header("Prefer", "return=representation")
            .query(&id_filter(id))
            .send()
            .await
            .context("请求失败")?;

        let rows: Vec<Value> = handle_http_response(response, "删除记录").await?;
        if rows.is_empty() {
            return Err(anyhow::anyhow!("记录不存在: {} id={}", table, id));
        }
        Ok(())
    }

    /// 连通性检查：取一行 id
    pub async fn ping(&self, table: &str) -> Result<()> {
        let url = self.table_url(table);
        debug!("[RecordAPI] 📡 连通性检查: {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await
            .context("请求失败")?;

        let _: Vec<Value> = handle_http_response(response, "连通性检查").await?;
        Ok(())
    }
}
