/// Microsoft Graph 邮件接口
///
/// 只负责 HTTP 层：拼装请求、解码响应、把错误体转为 `MailError`。
/// Token 由调用方（`MailService`）在每次调用前从凭据提供者获取后传入
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::error::MailError;
use crate::mail::graph::types::{GraphMessage, GraphMessagePage, OutboundEmail};

/// Graph v1.0 根地址
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// 列表请求只取这四个字段
const SELECT_FIELDS: &str = "subject,from,receivedDateTime,bodyPreview";

/// 列表请求最多尝试次数（含首次）
const MAX_ATTEMPTS: u32 = 3;

/// 退避 / Retry-After 的上限
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 邮件传输层
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// 按接收时间倒序获取收件箱前 `top` 封邮件
    async fn list_messages(&self, access_token: &str, top: u32)
    -> Result<Vec<GraphMessage>, MailError>;

    /// 发送一封纯文本邮件（不重试）
    async fn send_mail(&self, access_token: &str, email: &OutboundEmail) -> Result<(), MailError>;
}

/// Graph 错误响应体：`{"error": {"code": "...", "message": "..."}}`
#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: String,

    #[serde(default)]
    message: String,
}

/// Graph API 客户端
#[derive(Debug, Clone)]
pub struct GraphApiClient {
    http: Client,
    base_url: String,
}

impl GraphApiClient {
    /// 创建客户端
    ///
    /// # Arguments
    /// * `http` - 共享的 reqwest 客户端（见 `utils::http_client`）
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, GRAPH_BASE_URL)
    }

    /// 使用自定义根地址（测试用本地服务）
    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn messages_url(&self, top: u32) -> Result<Url, MailError> {
        let raw = format!(
            "{}/me/messages?$top={}&$orderby=receivedDateTime%20desc&$select={}",
            self.base_url, top, SELECT_FIELDS
        );
        Url::parse(&raw).map_err(|e| MailError::Decode(format!("无效的请求地址 {}: {}", raw, e)))
    }

    fn send_mail_url(&self) -> Result<Url, MailError> {
        let raw = format!("{}/me/sendMail", self.base_url);
        Url::parse(&raw).map_err(|e| MailError::Decode(format!("无效的请求地址 {}: {}", raw, e)))
    }
}

#[async_trait]
impl MailTransport for GraphApiClient {
    async fn list_messages(
        &self,
        access_token: &str,
        top: u32,
    ) -> Result<Vec<GraphMessage>, MailError> {
        let url = self.messages_url(top)?;
        let mut attempt = 0u32;
        let mut delay = Duration::from_secs(1);

        loop {
            attempt += 1;
            tracing::debug!("📬 获取最近 {} 封邮件（第 {} 次）", top, attempt);

            let response = self
                .http
                .get(url.clone())
                .bearer_auth(access_token)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let text = response.text().await?;
                let page: GraphMessagePage =
                    serde_json::from_str(&text).map_err(|e| MailError::Decode(e.to_string()))?;
                tracing::debug!("✅ Graph 返回 {} 封邮件", page.value.len());
                return Ok(page.value);
            }

            if is_retryable(status) && attempt < MAX_ATTEMPTS {
                let wait = retry_after(response.headers()).unwrap_or(delay);
                tracing::warn!(
                    "⚠️ Graph 返回 {}，{} 毫秒后重试（{}/{}）",
                    status,
                    wait.as_millis(),
                    attempt,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(wait).await;
                delay = std::cmp::min(delay * 2, MAX_BACKOFF);
                continue;
            }

            return Err(remote_error(response).await);
        }
    }

    async fn send_mail(&self, access_token: &str, email: &OutboundEmail) -> Result<(), MailError> {
        tracing::debug!("📤 发送邮件到 {}", email.to);

        let response = self
            .http
            .post(self.send_mail_url()?)
            .bearer_auth(access_token)
            .json(&email.to_send_mail_body())
            .send()
            .await?;

        // 成功时 Graph 返回 202 Accepted，无响应体
        if response.status().is_success() {
            tracing::info!("✅ 邮件已提交: {}", email.to);
            return Ok(());
        }

        Err(remote_error(response).await)
    }
}

/// 限流或服务暂不可用
fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// 解析 `Retry-After`（仅支持秒数形式），上限 30 秒
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: u64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(std::cmp::min(Duration::from_secs(secs), MAX_BACKOFF))
}

async fn remote_error(response: Response) -> MailError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let err = decode_graph_error(status, &text);
    tracing::error!("❌ {}", err);
    err
}

/// 把 Graph 错误响应转为 `MailError::Remote`
fn decode_graph_error(status: StatusCode, text: &str) -> MailError {
    let (code, mut message) = match serde_json::from_str::<GraphErrorBody>(text) {
        Ok(body) => (body.error.code, body.error.message),
        Err(_) => (String::new(), text.trim().to_string()),
    };

    let code = if code.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("UnknownError")
            .to_string()
    } else {
        code
    };

    if status == StatusCode::UNAUTHORIZED {
        message = format!("{}（Token 无效或已被撤销，请重新运行 `graphmail auth`）", message);
    }

    MailError::Remote {
        status: status.as_u16(),
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderValue;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 在随机端口启动本地服务，返回根地址
    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1.0", addr)
    }

    fn client(base_url: &str) -> GraphApiClient {
        GraphApiClient::with_base_url(Client::new(), base_url)
    }

    #[test]
    fn test_messages_url() {
        let url = GraphApiClient::new(Client::new()).messages_url(5).unwrap();
        let s = url.as_str();

        assert!(s.starts_with("https://graph.microsoft.com/v1.0/me/messages?"));
        assert!(s.contains("$top=5"));
        assert!(s.contains("$orderby=receivedDateTime%20desc"));
        assert!(s.contains("$select=subject,from,receivedDateTime,bodyPreview"));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3600"));
        assert_eq!(retry_after(&headers), Some(MAX_BACKOFF));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_decode_graph_error_body() {
        let body = r#"{"error":{"code":"ErrorInvalidRecipients","message":"bad address"}}"#;
        let err = decode_graph_error(StatusCode::BAD_REQUEST, body);

        match err {
            MailError::Remote {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "ErrorInvalidRecipients");
                assert_eq!(message, "bad address");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_json_error() {
        let err = decode_graph_error(StatusCode::BAD_GATEWAY, "upstream down");
        match err {
            MailError::Remote { code, message, .. } => {
                assert_eq!(code, "Bad Gateway");
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unauthorized_hints_reauth() {
        let body = r#"{"error":{"code":"InvalidAuthenticationToken","message":"expired"}}"#;
        let err = decode_graph_error(StatusCode::UNAUTHORIZED, body);
        assert!(err.to_string().contains("graphmail auth"));
    }

    #[tokio::test]
    async fn test_list_retries_on_throttling() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/v1.0/me/messages",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            StatusCode::TOO_MANY_REQUESTS,
                            [(RETRY_AFTER, "0")],
                            "slow down",
                        )
                            .into_response()
                    } else {
                        axum::Json(serde_json::json!({
                            "value": [{ "subject": "hello" }]
                        }))
                        .into_response()
                    }
                }
            }),
        );
        let base = spawn(router).await;

        let messages = client(&base).list_messages("token", 3).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_list_gives_up_after_max_attempts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/v1.0/me/messages",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::SERVICE_UNAVAILABLE, [(RETRY_AFTER, "0")], "busy")
                }
            }),
        );
        let base = spawn(router).await;

        let err = client(&base).list_messages("token", 3).await.unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
        assert!(matches!(err, MailError::Remote { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_send_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/v1.0/me/sendMail",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::SERVICE_UNAVAILABLE, [(RETRY_AFTER, "0")], "busy")
                }
            }),
        );
        let base = spawn(router).await;

        let email = OutboundEmail::new("a@b.com", "hi", "hello");
        let err = client(&base).send_mail("token", &email).await.unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(err, MailError::Remote { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_send_posts_plain_text_body() {
        let router = Router::new().route(
            "/v1.0/me/sendMail",
            post(|headers: axum::http::HeaderMap, axum::Json(body): axum::Json<serde_json::Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer token" || body["message"]["body"]["contentType"] != "Text" {
                    return StatusCode::BAD_REQUEST;
                }
                StatusCode::ACCEPTED
            }),
        );
        let base = spawn(router).await;

        let email = OutboundEmail::new("a@b.com", "hi", "hello");
        client(&base).send_mail("token", &email).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // 需要有效的 Access Token
    async fn test_live_list_messages() {
        let token = std::env::var("TEST_ACCESS_TOKEN").expect("请设置 TEST_ACCESS_TOKEN 环境变量");
        let client = GraphApiClient::new(Client::new());
        let messages = client.list_messages(&token, 3).await.unwrap();
        println!("获取到 {} 封邮件", messages.len());
        assert!(messages.len() <= 3);
    }
}
