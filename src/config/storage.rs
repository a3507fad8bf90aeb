/// Token 缓存文件存储模块
///
/// 负责将单个 `CachedToken` 持久化到固定路径的 TOML 文件
///
/// 写入方式：先写同目录下的临时文件，再原子 rename 覆盖目标文件。
/// 约定同一时刻只有一个写入者（一次 `graphmail auth`），不加文件锁。
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::crypto::{self, TokenCipher};
use crate::error::StoreError;
use crate::mail::graph::types::CachedToken;

/// 缓存文件格式版本号
const STORAGE_VERSION: &str = "1.0";

/// 默认缓存文件名（位于用户主目录）
const TOKEN_CACHE_FILE_NAME: &str = ".graphmail_token_cache.toml";

/// 缓存文件内容
#[derive(Debug, Serialize, Deserialize)]
struct TokenCacheFile {
    /// 文件格式版本
    version: String,

    /// 缓存的 Token
    token: CachedToken,
}

/// 获取默认缓存文件路径
///
/// 返回：`~/.graphmail_token_cache.toml`
pub fn default_token_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("无法获取用户主目录"))?;
    Ok(home.join(TOKEN_CACHE_FILE_NAME))
}

/// Token 缓存文件
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    cipher: Option<TokenCipher>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cipher: None,
        }
    }

    /// 启用 Access Token 落盘加密
    pub fn with_cipher(mut self, cipher: Option<TokenCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件是否存在（不检查有效性）
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 读取缓存的 Token
    ///
    /// # Errors
    /// - `NotFound`：文件不存在
    /// - `Corrupt`：内容无法解析，或加密 Token 无法解密
    /// - `Io`：其他读取错误
    pub fn load(&self) -> Result<CachedToken, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(self.corrupt("文件不是有效的 UTF-8 文本"));
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let file: TokenCacheFile = toml::from_str(&content)
            .map_err(|e| self.corrupt(format!("解析失败（文件可能损坏）: {}", e)))?;

        if file.version != STORAGE_VERSION {
            tracing::warn!(
                "Token 缓存文件版本不匹配（期望: {}, 实际: {}），尝试兼容加载",
                STORAGE_VERSION,
                file.version
            );
        }

        let mut token = file.token;

        if token.access_token.is_empty() {
            return Err(self.corrupt("access_token 为空"));
        }

        if crypto::is_encrypted(&token.access_token) {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                self.corrupt(format!(
                    "Token 已加密，但未设置 {}",
                    crypto::TOKEN_KEY_ENV
                ))
            })?;
            token.access_token = cipher
                .decrypt(&token.access_token)
                .map_err(|e| self.corrupt(format!("{:#}", e)))?;
        } else if self.cipher.is_some() {
            tracing::debug!("缓存中的 Token 为明文，下次保存时将加密");
        }

        tracing::debug!("成功加载 Token 缓存: {}", self.path.display());

        Ok(token)
    }

    /// 覆盖式保存 Token
    ///
    /// 先写临时文件再 rename，读取方不会看到写了一半的文件
    pub fn save(&self, token: &CachedToken) -> Result<(), StoreError> {
        let mut stored = token.clone();
        if let Some(cipher) = &self.cipher {
            stored.access_token = cipher
                .encrypt(&token.access_token)
                .map_err(|e| self.io_error(std::io::Error::other(format!("{:#}", e))))?;
        }

        let file = TokenCacheFile {
            version: STORAGE_VERSION.to_string(),
            token: stored,
        };

        let content = toml::to_string_pretty(&file)
            .map_err(|e| self.io_error(std::io::Error::other(e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let tmp_path = self.tmp_path();
        if let Err(e) = write_private(&tmp_path, content.as_bytes()) {
            fs::remove_file(&tmp_path).ok();
            return Err(self.io_error(e));
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            fs::remove_file(&tmp_path).ok();
            return Err(self.io_error(e));
        }

        tracing::debug!("成功保存 Token 到: {}", self.path.display());

        Ok(())
    }

    /// 临时文件路径：`.<文件名>.<pid>.tmp`
    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| TOKEN_CACHE_FILE_NAME.to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// 写入文件并刷盘，Unix 下权限为 0600
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
