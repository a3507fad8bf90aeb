/// Microsoft 设备码认证流程
///
/// 流程：
/// 1. 检查缓存，已有未过期 Token 时直接返回（不进行任何交互）
/// 2. 向设备码端点申请 user_code 与验证 URL
/// 3. 提示用户在浏览器中完成登录（可选自动打开浏览器）
/// 4. 轮询 Token 端点，直到登录完成或超时
/// 5. 写入 Token 缓存
///
/// 失败不会自动重试，需要操作者重新执行 `graphmail auth`
use async_trait::async_trait;
use oauth2::{
    AuthType, AuthUrl, ClientId, DeviceAuthorizationUrl, ErrorResponseType, RequestTokenError,
    Scope, StandardDeviceAuthorizationResponse, StandardErrorResponse, TokenResponse, TokenUrl,
    basic::BasicClient, reqwest::async_http_client,
};
use std::time::Duration;

use crate::config::oauth_config::AzureConfig;
use crate::config::storage::TokenStore;
use crate::error::{AuthError, StoreError};
use crate::mail::graph::types::CachedToken;

/// 身份提供方未返回 expires_in 时使用的有效期（秒）
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// 认证状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoToken,
    Authenticating,
    Authenticated,
    Failed,
}

fn transition(from: AuthState, to: AuthState) {
    tracing::debug!("认证状态: {:?} -> {:?}", from, to);
}

/// 认证结果
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// 缓存中已有未过期 Token，未进行交互
    Reused(CachedToken),

    /// 通过设备码流程获取了新 Token
    Acquired(CachedToken),
}

impl AuthOutcome {
    pub fn token(&self) -> &CachedToken {
        match self {
            Self::Reused(token) | Self::Acquired(token) => token,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, Self::Reused(_))
    }
}

/// 交互式交换得到的 Token
#[derive(Debug, Clone)]
pub struct AcquiredToken {
    pub access_token: String,
    pub expires_in: Option<Duration>,
}

/// 交互式获取 Token 的方式
#[async_trait]
pub trait DeviceCodeExchange: Send + Sync {
    async fn acquire(&self, config: &AzureConfig) -> Result<AcquiredToken, AuthError>;
}

/// 设备码认证器
pub struct DeviceAuthenticator<E> {
    store: TokenStore,
    exchange: E,
}

impl<E: DeviceCodeExchange> DeviceAuthenticator<E> {
    pub fn new(store: TokenStore, exchange: E) -> Self {
        Self { store, exchange }
    }

    /// 执行认证
    ///
    /// 已有未过期 Token 时直接返回 `AuthOutcome::Reused`，可安全重复执行
    ///
    /// # Errors
    /// - `AuthenticationFailed`：交互式交换出错或超时
    /// - `Store`：Token 写入失败
    pub async fn authenticate(&self, config: &AzureConfig) -> Result<AuthOutcome, AuthError> {
        match self.store.load() {
            Ok(token) if token.is_valid() => {
                tracing::info!(
                    "✓ 已存在有效 Token，{} 分钟后过期，无需重新认证",
                    token.remaining_minutes()
                );
                transition(AuthState::Authenticated, AuthState::Authenticated);
                return Ok(AuthOutcome::Reused(token));
            }
            Ok(token) => {
                tracing::info!("缓存 Token 已于 {} 过期，重新认证", token.expires_at_utc());
            }
            Err(StoreError::NotFound(_)) => {
                tracing::debug!("未找到 Token 缓存");
            }
            Err(e) => {
                tracing::warn!("⚠️ 无法读取已有 Token: {}，将重新认证", e);
            }
        }

        transition(AuthState::NoToken, AuthState::Authenticating);
        tracing::info!("🔐 开始设备码认证流程");

        let acquired = match self.exchange.acquire(config).await {
            Ok(acquired) => acquired,
            Err(e) => {
                transition(AuthState::Authenticating, AuthState::Failed);
                tracing::error!("❌ 认证失败: {}", e);
                return Err(e);
            }
        };

        let expires_in = acquired
            .expires_in
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        let token = CachedToken::new(
            acquired.access_token,
            expires_in,
            config.client_id.clone(),
            config.tenant_id.clone(),
        );

        if let Err(e) = self.store.save(&token) {
            transition(AuthState::Authenticating, AuthState::Failed);
            return Err(e.into());
        }

        transition(AuthState::Authenticating, AuthState::Authenticated);
        tracing::info!("✅ 认证成功，Token 已保存到: {}", self.store.path().display());
        tracing::debug!("Token: {}（有效期: {} 秒）", token.masked_token(), expires_in);

        Ok(AuthOutcome::Acquired(token))
    }
}

/// 基于 Microsoft 身份平台的设备码交换
pub struct AzureDeviceCode {
    /// 等待用户完成登录的最长时间
    timeout: Duration,

    /// 是否自动打开验证页面
    open_browser: bool,
}

impl AzureDeviceCode {
    pub fn new(timeout: Duration, open_browser: bool) -> Self {
        Self {
            timeout,
            open_browser,
        }
    }

    fn client(config: &AzureConfig) -> Result<BasicClient, AuthError> {
        let invalid = |e: url::ParseError| AuthError::AuthenticationFailed(format!("端点 URL 无效: {}", e));

        Ok(BasicClient::new(
            ClientId::new(config.client_id.clone()),
            None,
            AuthUrl::new(config.authorize_url()).map_err(invalid)?,
            Some(TokenUrl::new(config.token_url()).map_err(invalid)?),
        )
        // 公共客户端：client_id 放在请求体中
        .set_auth_type(AuthType::RequestBody)
        .set_device_authorization_url(
            DeviceAuthorizationUrl::new(config.device_code_url()).map_err(invalid)?,
        ))
    }
}

#[async_trait]
impl DeviceCodeExchange for AzureDeviceCode {
    async fn acquire(&self, config: &AzureConfig) -> Result<AcquiredToken, AuthError> {
        let client = Self::client(config)?;

        let details: StandardDeviceAuthorizationResponse = client
            .exchange_device_code()
            .map_err(|e| AuthError::AuthenticationFailed(format!("设备码请求配置错误: {}", e)))?
            .add_scopes(config.scopes.iter().map(|s| Scope::new(s.clone())))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                AuthError::AuthenticationFailed(format!("申请设备码失败: {}", describe_token_error(&e)))
            })?;

        let verification_uri = details.verification_uri().to_string();
        let user_code = details.user_code().secret().to_string();

        println!();
        println!("请在浏览器中打开: {}", verification_uri);
        println!("并输入代码: {}", user_code);
        println!("（{} 秒内完成登录）", self.timeout.as_secs());
        println!();
        tracing::info!("✅ 设备码已生成，等待用户登录...");

        if self.open_browser {
            if let Err(e) = webbrowser::open(&verification_uri) {
                tracing::warn!("无法打开浏览器，请手动访问上面的地址: {}", e);
            }
        }

        let token = tokio::time::timeout(
            self.timeout,
            client
                .exchange_device_access_token(&details)
                .request_async(async_http_client, tokio::time::sleep, Some(self.timeout)),
        )
        .await
        .map_err(|_| {
            AuthError::AuthenticationFailed(format!(
                "授权超时：用户未在 {} 秒内完成登录",
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| AuthError::AuthenticationFailed(format!("Token 交换失败: {}", describe_token_error(&e))))?;

        tracing::info!("✅ Token 交换成功");

        Ok(AcquiredToken {
            access_token: token.access_token().secret().to_string(),
            expires_in: token.expires_in(),
        })
    }
}

/// 提取身份提供方返回的错误码与描述（如 AADSTS 错误）
fn describe_token_error<RE, T>(err: &RequestTokenError<RE, StandardErrorResponse<T>>) -> String
where
    RE: std::error::Error + 'static,
    T: ErrorResponseType + 'static,
{
    match err {
        RequestTokenError::ServerResponse(resp) => match resp.error_description() {
            Some(desc) => format!("{:?}: {}", resp.error(), desc),
            None => format!("{:?}", resp.error()),
        },
        RequestTokenError::Request(e) => format!("请求失败: {}", e),
        RequestTokenError::Parse(e, _) => format!("响应解析失败: {}", e),
        RequestTokenError::Other(msg) => msg.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录调用次数的交换实现
    struct StubExchange {
        calls: AtomicUsize,
        fail: bool,
        expires_in: Option<Duration>,
    }

    impl StubExchange {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                expires_in: Some(Duration::from_secs(1800)),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeviceCodeExchange for StubExchange {
        async fn acquire(&self, _config: &AzureConfig) -> Result<AcquiredToken, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::AuthenticationFailed("expired_token".to_string()));
            }
            Ok(AcquiredToken {
                access_token: "fresh-access-token".to_string(),
                expires_in: self.expires_in,
            })
        }
    }

    fn config() -> AzureConfig {
        AzureConfig::new("client-id", "tenant-id")
    }

    fn existing_token(expires_at: i64) -> CachedToken {
        CachedToken {
            access_token: "existing-token".to_string(),
            expires_at,
            client_id: "client-id".to_string(),
            tenant_id: "tenant-id".to_string(),
        }
    }

    #[tokio::test]
    async fn test_valid_token_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.toml"));
        let existing = existing_token(Utc::now().timestamp() + 3600);
        store.save(&existing).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let auth = DeviceAuthenticator::new(store.clone(), StubExchange::ok());
        let outcome = auth.authenticate(&config()).await.unwrap();

        assert!(outcome.is_reused());
        assert_eq!(outcome.token(), &existing);
        assert_eq!(auth.exchange.calls(), 0);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_repeated_runs_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.toml"));
        let auth = DeviceAuthenticator::new(store, StubExchange::ok());

        let first = auth.authenticate(&config()).await.unwrap();
        let second = auth.authenticate(&config()).await.unwrap();

        assert!(!first.is_reused());
        assert!(second.is_reused());
        assert_eq!(first.token(), second.token());
        assert_eq!(auth.exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_token_runs_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.toml"));
        let auth = DeviceAuthenticator::new(store.clone(), StubExchange::ok());

        let outcome = auth.authenticate(&config()).await.unwrap();
        let token = outcome.token();

        assert!(!outcome.is_reused());
        assert_eq!(auth.exchange.calls(), 1);
        assert_eq!(token.access_token, "fresh-access-token");
        assert_eq!(token.client_id, "client-id");
        assert_eq!(token.tenant_id, "tenant-id");

        let expected = Utc::now().timestamp() + 1800;
        assert!((token.expires_at - expected).abs() <= 5);

        assert_eq!(&store.load().unwrap(), token);
    }

    #[tokio::test]
    async fn test_expired_token_triggers_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.toml"));
        store
            .save(&existing_token(Utc::now().timestamp() - 60))
            .unwrap();

        let auth = DeviceAuthenticator::new(store.clone(), StubExchange::ok());
        let outcome = auth.authenticate(&config()).await.unwrap();

        assert!(!outcome.is_reused());
        assert_eq!(auth.exchange.calls(), 1);
        assert_eq!(store.load().unwrap().access_token, "fresh-access-token");
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_superseded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.toml");
        std::fs::write(&path, "not a token").unwrap();

        let store = TokenStore::new(&path);
        let auth = DeviceAuthenticator::new(store.clone(), StubExchange::ok());
        auth.authenticate(&config()).await.unwrap();

        assert_eq!(store.load().unwrap().access_token, "fresh-access-token");
    }

    #[tokio::test]
    async fn test_exchange_failure_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.toml"));
        let auth = DeviceAuthenticator::new(store.clone(), StubExchange::failing());

        let result = auth.authenticate(&config()).await;

        assert!(matches!(result, Err(AuthError::AuthenticationFailed(_))));
        assert_eq!(auth.exchange.calls(), 1);
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_missing_expires_in_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.toml"));
        let exchange = StubExchange {
            expires_in: None,
            ..StubExchange::ok()
        };
        let auth = DeviceAuthenticator::new(store, exchange);

        let outcome = auth.authenticate(&config()).await.unwrap();
        let expected = Utc::now().timestamp() + DEFAULT_EXPIRES_IN_SECS;
        assert!((outcome.token().expires_at - expected).abs() <= 5);
    }

    #[tokio::test]
    async fn test_huge_expires_in_is_not_saved_as_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.toml"));
        let exchange = StubExchange {
            expires_in: Some(Duration::from_secs(u64::MAX)),
            ..StubExchange::ok()
        };
        let auth = DeviceAuthenticator::new(store.clone(), exchange);

        let outcome = auth.authenticate(&config()).await.unwrap();
        assert!(!outcome.is_reused());
        assert_eq!(outcome.token().expires_at, i64::MAX);
        assert!(store.load().unwrap().is_valid());

        // 再次执行走已有 Token 分支
        let again = auth.authenticate(&config()).await.unwrap();
        assert!(again.is_reused());
        assert!(again.token().remaining_minutes() > 0);
        assert_eq!(auth.exchange.calls(), 1);
    }

    #[test]
    fn test_client_builds_for_tenant() {
        assert!(AzureDeviceCode::client(&config()).is_ok());
    }

    #[tokio::test]
    #[ignore] // 需要真实的 Azure 应用注册和浏览器登录
    async fn test_live_device_code_flow() {
        let config = AzureConfig::from_env().unwrap();
        let exchange = AzureDeviceCode::new(Duration::from_secs(120), false);
        let token = exchange.acquire(&config).await.unwrap();
        assert!(!token.access_token.is_empty());
    }
}
