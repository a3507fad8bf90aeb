/// HTTP 服务（axum）
///
/// 路由：
/// - `GET /`：服务信息
/// - `GET /tools`：工具描述
/// - `POST /get_emails`、`POST /send_email`：请求体即工具参数
///
/// 状态码：参数错误 422，未知工具 404，邮件接口失败 500，错误体均为 `{"error": ...}`
use anyhow::{Context, Result};
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value, json};

use crate::error::ToolError;
use crate::tools::{GET_EMAILS, SEND_EMAIL, ToolRegistry, error_envelope};

impl IntoResponse for ToolError {
    fn into_response(self) -> Response {
        let status = match &self {
            ToolError::UnknownTool(_) => StatusCode::NOT_FOUND,
            ToolError::InvalidArguments { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ToolError::Mail(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(error_envelope(&self))).into_response()
    }
}

/// 记录错误响应
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    let status = response.status();

    if status.is_client_error() {
        tracing::warn!("⚠️ {} 返回 {}", path, status);
        return response;
    }
    if !status.is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, 64 * 1024).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("读取错误响应体失败: {}", e);
            return Response::from_parts(parts, Body::empty());
        }
    };

    tracing::error!(
        "❌ {} 服务端错误 - 状态: {}, 响应: {}",
        path,
        parts.status,
        String::from_utf8_lossy(&bytes)
    );

    // 响应体已被读出，重新构建
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}

/// 创建路由
pub fn router(registry: ToolRegistry) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/tools", get(list_tools))
        .route("/get_emails", post(get_emails))
        .route("/send_email", post(send_email))
        .layer(axum::middleware::from_fn(log_errors))
        .with_state(registry)
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "GraphMail",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": {
            "/tools": "List MCP tools",
            "/get_emails": "Get recent emails",
            "/send_email": "Send an email"
        }
    }))
}

async fn list_tools(State(registry): State<ToolRegistry>) -> Json<Value> {
    Json(json!({ "tools": registry.list_tools() }))
}

async fn get_emails(State(registry): State<ToolRegistry>, body: Bytes) -> Result<Json<Value>, ToolError> {
    let arguments = parse_arguments(GET_EMAILS, &body)?;
    Ok(Json(registry.dispatch(GET_EMAILS, &arguments).await?))
}

async fn send_email(State(registry): State<ToolRegistry>, body: Bytes) -> Result<Json<Value>, ToolError> {
    let arguments = parse_arguments(SEND_EMAIL, &body)?;
    Ok(Json(registry.dispatch(SEND_EMAIL, &arguments).await?))
}

/// 请求体解析为参数对象，空请求体视为无参数
fn parse_arguments(tool: &str, body: &[u8]) -> Result<Map<String, Value>, ToolError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ToolError::invalid(tool, "请求体必须是 JSON 对象")),
        Err(e) => Err(ToolError::invalid(tool, format!("请求体不是有效的 JSON: {}", e))),
    }
}

/// 启动 HTTP 服务，Ctrl-C 时优雅退出
pub async fn serve_http(registry: ToolRegistry, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {}", addr))?;

    tracing::info!("🚀 HTTP 服务已启动: http://{}", addr);

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("监听 Ctrl-C 失败: {}", e);
            }
            tracing::info!("收到退出信号，正在关闭 HTTP 服务...");
        })
        .await
        .context("HTTP 服务异常退出")?;

    tracing::info!("HTTP 服务已停止");
    Ok(())
}
