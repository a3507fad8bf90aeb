/// Azure 身份配置读取模块
///
/// 从环境变量（启动时先加载 `.env`）读取应用 ID 与租户 ID
use anyhow::Result;

/// 应用（客户端）ID 环境变量
pub const CLIENT_ID_ENV: &str = "AZURE_CLIENT_ID";

/// 租户 ID 环境变量
pub const TENANT_ID_ENV: &str = "AZURE_TENANT_ID";

/// 登录端点
const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// 请求的 Graph 权限范围：读邮件、发邮件
pub const GRAPH_SCOPES: [&str; 2] = [
    "https://graph.microsoft.com/Mail.Read",
    "https://graph.microsoft.com/Mail.Send",
];

/// Azure 应用注册信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    /// 应用（客户端）ID
    pub client_id: String,

    /// 租户 ID（GUID、域名，或 common / organizations）
    pub tenant_id: String,

    /// 请求的权限范围
    pub scopes: Vec<String>,
}

impl AzureConfig {
    pub fn new(client_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            scopes: GRAPH_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 从环境变量加载
    ///
    /// # Errors
    /// - `AZURE_CLIENT_ID` 或 `AZURE_TENANT_ID` 未设置 / 为空
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 使用自定义查找函数加载（便于测试，不修改进程环境）
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&str> = [CLIENT_ID_ENV, TENANT_ID_ENV]
            .into_iter()
            .filter(|key| read(*key).is_none())
            .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "缺少必需的配置: {}\n请在环境变量或 .env 文件中设置",
                missing.join(", ")
            );
        }

        let config = Self::new(
            read(CLIENT_ID_ENV).unwrap_or_default(),
            read(TENANT_ID_ENV).unwrap_or_default(),
        );

        tracing::info!("✅ 从环境变量加载 Azure 配置");
        tracing::info!("[CONFIG] CLIENT_ID: {}", config.masked_client_id());
        tracing::info!("[CONFIG] TENANT_ID: {}", config.tenant_id);

        Ok(config)
    }

    /// 授权端点（设备码流程不会访问，但 OAuth2 客户端需要）
    pub fn authorize_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", AUTHORITY_HOST, self.tenant_id)
    }

    /// 设备码端点
    pub fn device_code_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/devicecode", AUTHORITY_HOST, self.tenant_id)
    }

    /// Token 端点
    pub fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", AUTHORITY_HOST, self.tenant_id)
    }

    /// 日志用：只显示前 10 个字符
    pub fn masked_client_id(&self) -> String {
        let head: String = self.client_id.chars().take(10).collect();
        format!("{}...", head)
    }
}
