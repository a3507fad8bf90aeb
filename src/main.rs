use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

mod config;
mod error;
mod mail;
mod server;
mod tools;
mod utils;

#[cfg(test)]
mod testing;

use config::Config;
use config::oauth_config::AzureConfig;
use config::storage::TokenStore;
use error::{AuthError, StoreError};
use mail::graph::{
    AzureDeviceCode, CachedTokenCredential, CredentialProvider, DeviceAuthenticator, GraphApiClient,
};
use mail::service::MailService;
use tools::ToolRegistry;

/// Microsoft Graph 邮件工具服务
#[derive(Debug, Parser)]
#[command(name = "graphmail", version, about = "通过 MCP / HTTP 提供 Microsoft Graph 邮件工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 设备码登录并缓存 Token（已有有效 Token 时直接返回）
    Auth {
        /// 只检查缓存 Token 的状态，不进行登录
        #[arg(long)]
        check: bool,

        /// 不自动打开浏览器
        #[arg(long)]
        no_browser: bool,
    },

    /// 以 MCP 协议在 stdio 上提供工具
    Serve,

    /// 启动 HTTP 服务
    Http {
        /// 监听地址（默认取配置文件，否则 0.0.0.0）
        #[arg(long)]
        host: Option<String>,

        /// 监听端口（默认取配置文件，否则 8000）
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> ExitCode {
    // 1. 加载 .env（不存在时忽略）
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // 2. 初始化日志
    if let Err(e) = init_logger() {
        eprintln!("初始化日志失败: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    // 3. 加载配置
    let config = config::load()?;

    if let Commands::Auth { check: true, .. } = cli.command {
        let valid = check_token(&config.token_store()?);
        return Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    // 4. 创建 Tokio 运行时
    let rt = tokio::runtime::Runtime::new().context("创建 Tokio 运行时失败")?;

    match cli.command {
        Commands::Auth { no_browser, .. } => {
            let open_browser = config.app.open_browser && !no_browser;
            rt.block_on(authenticate(&config, open_browser))?;
        }
        Commands::Serve => {
            let registry = build_registry(&config)?;
            rt.block_on(server::mcp::serve_stdio(registry))?;
        }
        Commands::Http { host, port } => {
            let registry = build_registry(&config)?;
            let host = host.unwrap_or_else(|| config.app.http_host.clone());
            let port = port.unwrap_or(config.app.http_port);
            rt.block_on(server::http::serve_http(registry, &host, port))?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// 执行设备码认证，可被 Ctrl-C 取消
async fn authenticate(config: &Config, open_browser: bool) -> Result<()> {
    let azure = AzureConfig::from_env()?;
    let store = config.token_store()?;
    let exchange = AzureDeviceCode::new(config.app.auth_timeout(), open_browser);
    let authenticator = DeviceAuthenticator::new(store, exchange);

    let outcome = tokio::select! {
        result = authenticator.authenticate(&azure) => result?,
        _ = tokio::signal::ctrl_c() => return Err(AuthError::Cancelled.into()),
    };

    let token = outcome.token();
    if outcome.is_reused() {
        println!("✓ 已有有效 Token，剩余 {} 分钟", token.remaining_minutes());
    } else {
        println!("✓ 认证成功，Token 有效期至 {}", token.expires_at_utc());
    }

    Ok(())
}

/// `auth --check`：只读检查，返回是否存在有效 Token
fn check_token(store: &TokenStore) -> bool {
    if !store.exists() {
        println!("❌ 未找到 Token 缓存: {}", store.path().display());
        println!("   请运行: graphmail auth");
        return false;
    }

    match store.load() {
        Ok(token) if token.is_valid() => {
            println!(
                "✓ Token 有效，剩余 {} 分钟（{} 过期）",
                token.remaining_minutes(),
                token.expires_at_utc()
            );
            println!("   租户: {}", token.tenant_id);
            true
        }
        Ok(token) => {
            println!("❌ Token 已于 {} 过期", token.expires_at_utc());
            println!("   请运行: graphmail auth");
            false
        }
        Err(StoreError::NotFound(path)) => {
            println!("❌ 未找到 Token 缓存: {}", path.display());
            println!("   请运行: graphmail auth");
            false
        }
        Err(e) => {
            println!("⚠️ 无法读取 Token 缓存: {}", e);
            println!("   请运行: graphmail auth");
            false
        }
    }
}

/// 组装工具注册表，并在启动时检查一次凭据
fn build_registry(config: &Config) -> Result<ToolRegistry> {
    let azure = AzureConfig::from_env()?;
    let credential = CachedTokenCredential::new(config.token_store()?);

    tracing::info!(
        "正在从缓存 Token 初始化认证: {}",
        credential.store().path().display()
    );

    let token = match credential.current_token() {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("❌ 认证失败: {}", e);
            tracing::error!("请运行: graphmail auth");
            return Err(e).context("启动时凭据检查失败");
        }
    };

    if token.client_id != azure.client_id || token.tenant_id != azure.tenant_id {
        tracing::warn!(
            "⚠️ 缓存 Token 属于其他应用或租户（{} / {}），调用可能失败",
            token.client_id,
            token.tenant_id
        );
    }
    tracing::info!(
        "✓ 认证已初始化（使用缓存 Token，剩余 {} 分钟）",
        token.remaining_minutes()
    );

    let http = utils::http_client::build_client(config.app.request_timeout())?;
    let service = MailService::new(Arc::new(credential), Arc::new(GraphApiClient::new(http)));

    Ok(ToolRegistry::new(Arc::new(service)))
}

/// 初始化日志系统
///
/// 日志写到 stderr，stdout 留给 MCP 协议和命令输出
fn init_logger() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphmail=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("初始化日志系统失败")?;

    Ok(())
}
