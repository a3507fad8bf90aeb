/// Microsoft Graph 模块 - 设备码认证、凭据与邮件 API
pub mod api;
pub mod credential;
pub mod device_flow;
pub mod types;

// 重新导出启动时组装用到的类型
pub use api::GraphApiClient;
pub use credential::{CachedTokenCredential, CredentialProvider};
pub use device_flow::{AzureDeviceCode, DeviceAuthenticator};
