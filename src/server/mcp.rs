/// MCP 服务（stdio）
///
/// stdout 专用于 MCP 协议，日志必须写到 stderr
use anyhow::{Context, Result};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, Implementation, JsonObject,
    ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::stdio;
use rmcp::{ServerHandler, ServiceExt};
use serde_json::Value;
use std::sync::Arc;

use crate::tools::{ToolDescriptor, ToolRegistry};

/// 基于工具注册表的 MCP 服务
#[derive(Clone)]
pub struct MailMcpServer {
    registry: ToolRegistry,
}

impl MailMcpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.registry.list_tools().into_iter().map(to_mcp_tool).collect()
    }

    /// 执行一次工具调用，结果以格式化 JSON 文本返回
    pub async fn call(&self, name: &str, arguments: Option<JsonObject>) -> CallToolResult {
        let arguments = arguments.unwrap_or_default();
        let value = self.registry.invoke(name, &arguments).await;
        to_call_result(&value)
    }
}

fn to_mcp_tool(descriptor: ToolDescriptor) -> Tool {
    let input_schema = match descriptor.input_schema {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    };

    Tool {
        name: descriptor.name.into(),
        title: None,
        description: Some(descriptor.description.into()),
        input_schema: Arc::new(input_schema),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

fn to_call_result(value: &Value) -> CallToolResult {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    if value.get("error").is_some() {
        CallToolResult::error(vec![Content::text(text)])
    } else {
        CallToolResult::success(vec![Content::text(text)])
    }
}

impl ServerHandler for MailMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "graphmail".to_string(),
                title: Some("GraphMail".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Microsoft Graph mail tools: get_emails lists recent inbox messages, send_email sends a plain-text email.".to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.tools(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.call(&request.name, request.arguments).await)
    }
}

/// 在 stdio 上运行 MCP 服务，直到客户端断开
pub async fn serve_stdio(registry: ToolRegistry) -> Result<()> {
    tracing::info!("🚀 MCP 服务已启动（stdio）");

    let service = MailMcpServer::new(registry)
        .serve(stdio())
        .await
        .context("启动 MCP 服务失败")?;

    let reason = service.waiting().await.context("MCP 服务异常退出")?;
    tracing::info!("MCP 服务已停止: {:?}", reason);

    Ok(())
}
