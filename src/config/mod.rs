use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod crypto;
pub mod oauth_config;
pub mod storage;

use crypto::TokenCipher;
use storage::TokenStore;

/// 覆盖 Token 缓存路径的环境变量
pub const TOKEN_CACHE_ENV: &str = "GRAPHMAIL_TOKEN_CACHE";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 设备码登录的最长等待时间（秒）
    pub auth_timeout_secs: u64,

    /// Graph 请求超时（秒）
    pub request_timeout_secs: u64,

    /// HTTP 模式监听地址
    pub http_host: String,
    pub http_port: u16,

    /// Token 缓存文件路径，缺省为 `~/.graphmail_token_cache.toml`
    pub token_cache_path: Option<PathBuf>,

    /// 设备码登录时是否自动打开浏览器
    pub open_browser: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: 300,
            request_timeout_secs: 30,
            http_host: "0.0.0.0".to_string(),
            http_port: 8000,
            token_cache_path: None,
            open_browser: true,
        }
    }
}

impl AppConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Token 缓存路径
    ///
    /// 优先级：环境变量 `GRAPHMAIL_TOKEN_CACHE` > 配置文件 > 默认路径
    pub fn token_cache_path(&self) -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(TOKEN_CACHE_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        if let Some(path) = &self.app.token_cache_path {
            return Ok(path.clone());
        }
        storage::default_token_path()
    }

    /// 构建 Token 缓存（按 `GRAPHMAIL_TOKEN_KEY` 决定是否加密）
    pub fn token_store(&self) -> Result<TokenStore> {
        let cipher = TokenCipher::from_env()?;
        if cipher.is_some() {
            tracing::debug!("已启用 Token 落盘加密");
        }
        Ok(TokenStore::new(self.token_cache_path()?).with_cipher(cipher))
    }
}

/// 获取配置文件路径
///
/// 返回：`<config_dir>/GraphMail/config.toml`
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("无法获取配置目录"))?
        .join("GraphMail");

    Ok(config_dir.join("config.toml"))
}

/// 加载配置
///
/// 文件不存在时使用默认值（不会创建文件）
pub fn load() -> Result<Config> {
    let path = config_path()?;
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("配置文件不存在，使用默认配置: {}", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("解析配置文件失败: {}", path.display()))?;

    tracing::info!("✅ 从配置文件加载: {}", path.display());
    Ok(config)
}
