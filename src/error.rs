/// 错误类型定义
///
/// 每一层有自己的错误枚举：
/// - `StoreError`：Token 缓存文件读写
/// - `CredentialError`：凭据提供者（缓存缺失 / 过期）
/// - `AuthError`：设备码认证流程
/// - `MailError`：Graph 邮件接口
/// - `ToolError`：工具调用门面
///
/// 应用边界（CLI、服务启动）统一转为 `anyhow::Error`
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Token 缓存文件错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 缓存文件不存在
    #[error("Token 缓存文件不存在: {}", .0.display())]
    NotFound(PathBuf),

    /// 文件内容无法解析为 CachedToken
    #[error("Token 缓存文件已损坏 ({}): {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// 其他 IO 错误（权限不足等）
    #[error("读写 Token 缓存文件失败 ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 凭据提供者错误
#[derive(Debug, Error)]
pub enum CredentialError {
    /// 缓存缺失或损坏，需要先完成认证
    #[error("认证不可用，请运行 `graphmail auth`: {0}")]
    AuthenticationUnavailable(#[source] StoreError),

    /// Token 已过期，需要重新认证（而不是修改配置）
    #[error("Token 已于 {expired_at} 过期，请重新运行 `graphmail auth`")]
    TokenExpired { expired_at: DateTime<Utc> },
}

/// 设备码认证流程错误
#[derive(Debug, Error)]
pub enum AuthError {
    /// 交互式交换出错或超时（不会自动重试）
    #[error("认证失败: {0}")]
    AuthenticationFailed(String),

    /// 操作者中断（Ctrl-C）
    #[error("认证已被取消")]
    Cancelled,

    /// 保存 Token 失败
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Graph 邮件接口错误
#[derive(Debug, Error)]
pub enum MailError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Graph 返回非成功状态码
    #[error("Graph API 返回错误 {status} [{code}]: {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },

    /// 网络层错误（连接失败、超时等）
    #[error("请求 Microsoft Graph 失败: {0}")]
    Network(#[from] reqwest::Error),

    /// 响应体无法解析
    #[error("无法解析 Graph 响应: {0}")]
    Decode(String),
}

/// 工具调用错误
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("未知工具: {0}")]
    UnknownTool(String),

    #[error("工具 {tool} 参数错误: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error(transparent)]
    Mail(#[from] MailError),
}

impl ToolError {
    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}
