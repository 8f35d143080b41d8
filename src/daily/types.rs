use serde::Deserialize;
use tracing::{debug, error};

/// PostgREST 错误响应体
///
/// 各字段都可能缺失或为 null
#[derive(Debug, Default, Deserialize)]
pub struct PostgrestError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl PostgrestError {
    /// 组装成一条可读的错误信息
    pub fn describe(&self, status: reqwest::StatusCode, raw: &str) -> String {
        let mut msg = match &self.message {
            Some(m) if !m.is_empty() => m.clone(),
            _ if !raw.is_empty() => raw.to_string(),
            _ => status.to_string(),
        };
        if let Some(code) = self.code.as_deref().filter(|c| !c.is_empty()) {
            msg = format!("{} ({})", msg, code);
        }
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            msg = format!("{}: {}", msg, details);
        }
        if let Some(hint) = self.hint.as_deref().filter(|h| !h.is_empty()) {
            msg = format!("{}，提示: {}", msg, hint);
        }
        msg
    }
}

/// 通用 HTTP 响应处理：检查状态码并反序列化响应体
///
/// 非 2xx 时按 PostgREST 错误体解析出可读信息；空响应体按 JSON `null` 处理，
/// 调用方可以用 `Option<T>` 接收。
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<T> {
    use anyhow::Context;

    let status = response.status();

    // body 只能读取一次
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        let err: PostgrestError = serde_json::from_slice(&body_bytes).unwrap_or_default();
        let msg = err.describe(status, &body_str);
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 错误: {}",
            operation_name, status, msg
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status.as_u16(), msg));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    let bytes: &[u8] = if body_bytes.iter().all(u8::is_ascii_whitespace) {
        &b"null"[..]
    } else {
        &body_bytes[..]
    };

    serde_json::from_slice(bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {}", e)
    })
}
