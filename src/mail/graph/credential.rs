/// 凭据提供者
///
/// 每次调用 Graph 之前都从缓存文件重新读取 Token（不在内存中缓存），
/// 这样服务运行期间重新执行 `graphmail auth` 即可生效，无需重启
use chrono::Utc;

use crate::config::storage::TokenStore;
use crate::error::CredentialError;
use crate::mail::graph::types::CachedToken;

/// 为 API 客户端提供当前 Token
pub trait CredentialProvider: Send + Sync {
    /// 返回一个可用的 Token，仅供本次调用使用
    ///
    /// # Errors
    /// - `AuthenticationUnavailable`：缓存缺失或损坏
    /// - `TokenExpired`：缓存已过期
    fn current_token(&self) -> Result<CachedToken, CredentialError>;
}

/// 基于缓存文件的凭据
#[derive(Debug, Clone)]
pub struct CachedTokenCredential {
    store: TokenStore,
}

impl CachedTokenCredential {
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }
}

impl CredentialProvider for CachedTokenCredential {
    fn current_token(&self) -> Result<CachedToken, CredentialError> {
        let token = self
            .store
            .load()
            .map_err(CredentialError::AuthenticationUnavailable)?;

        if !token.is_valid_at(Utc::now()) {
            tracing::warn!("⚠️ 缓存 Token 已过期（{}）", token.expires_at_utc());
            return Err(CredentialError::TokenExpired {
                expired_at: token.expires_at_utc(),
            });
        }

        tracing::debug!(
            "使用缓存 Token {}（剩余 {} 分钟）",
            token.masked_token(),
            token.remaining_minutes()
        );

        Ok(token)
    }
}
