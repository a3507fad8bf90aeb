/// 共享的 HTTP 客户端
///
/// 启动时按配置构建一次，之后以 clone 的方式注入各组件
/// （`reqwest::Client` 内部是 Arc，clone 共享同一个连接池）
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// 构建 HTTP 客户端
///
/// # Arguments
/// * `request_timeout` - 整体请求超时
pub fn build_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        // 连接池配置
        .pool_max_idle_per_host(10) // 每个主机最多保留 10 个空闲连接
        .pool_idle_timeout(Duration::from_secs(300)) // 连接空闲 5 分钟后关闭
        // 超时配置
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10)) // 连接建立超时 10 秒
        // 重定向配置
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(concat!("GraphMail/", env!("CARGO_PKG_VERSION"), " (Rust)"))
        .build()
        .context("构建 HTTP 客户端失败")
}
