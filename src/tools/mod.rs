/// 工具注册表与调用分发
///
/// 对外暴露两个工具：`get_emails`、`send_email`。
/// MCP 服务与 HTTP 服务共用这里的描述和参数解析，调用结果始终是一个 JSON 值：
/// 成功时为工具结果，失败时为 `{"error": "..."}`
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::error::ToolError;
use crate::mail::graph::types::EmailSummary;
use crate::mail::service::{DEFAULT_EMAIL_COUNT, MAX_EMAIL_COUNT, MailService};

pub const GET_EMAILS: &str = "get_emails";
pub const SEND_EMAIL: &str = "send_email";

/// 工具描述（名称、说明、参数 JSON Schema）
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: String,
    pub input_schema: Value,
}

/// `get_emails` 的结果
#[derive(Debug, Serialize)]
pub struct GetEmailsResult {
    pub count: usize,
    pub emails: Vec<EmailSummary>,
}

/// `send_email` 的结果
#[derive(Debug, Serialize)]
pub struct SendEmailResult {
    pub status: &'static str,
    pub message: String,
}

/// 工具描述列表（静态）
pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: GET_EMAILS,
            description: format!(
                "Get recent emails from inbox (default: {}, max: {})",
                DEFAULT_EMAIL_COUNT, MAX_EMAIL_COUNT
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "count": {
                        "type": "number",
                        "description": "Number of emails to retrieve (default: 3)"
                    }
                }
            }),
        },
        ToolDescriptor {
            name: SEND_EMAIL,
            description: "Send an email".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "to_email": { "type": "string", "description": "Recipient email address" },
                    "subject": { "type": "string", "description": "Email subject line" },
                    "body": { "type": "string", "description": "Plain-text email body" }
                },
                "required": ["to_email", "subject", "body"]
            }),
        },
    ]
}

/// 出错时返回给调用方的 JSON
pub fn error_envelope(err: &ToolError) -> Value {
    json!({ "error": err.to_string() })
}

/// 工具注册表
///
/// 内部只有 `Arc`，可以自由 clone 给多个服务并发使用
#[derive(Clone)]
pub struct ToolRegistry {
    service: Arc<MailService>,
}

impl ToolRegistry {
    pub fn new(service: Arc<MailService>) -> Self {
        Self { service }
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        descriptors()
    }

    /// 调用工具，错误转为 `{"error": ...}`
    pub async fn invoke(&self, name: &str, arguments: &Map<String, Value>) -> Value {
        match self.dispatch(name, arguments).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("❌ 工具 {} 调用失败: {}", name, e);
                error_envelope(&e)
            }
        }
    }

    /// 调用工具，保留错误类型（HTTP 服务据此决定状态码）
    pub async fn dispatch(&self, name: &str, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        tracing::info!("🔧 调用工具: {}", name);

        match name {
            GET_EMAILS => {
                let count = count_argument(arguments)?;
                let emails = self.service.list_recent_mail(count).await?;
                Ok(json!(GetEmailsResult {
                    count: emails.len(),
                    emails,
                }))
            }
            SEND_EMAIL => {
                let to = string_argument(SEND_EMAIL, arguments, "to_email")?;
                let subject = string_argument(SEND_EMAIL, arguments, "subject")?;
                let body = string_argument(SEND_EMAIL, arguments, "body")?;

                let message = self.service.send_mail(to, subject, body).await?;
                Ok(json!(SendEmailResult {
                    status: "success",
                    message,
                }))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

/// 解析 `count`：整数或整数值的浮点数，缺省 / null 时为 3
fn count_argument(arguments: &Map<String, Value>) -> Result<i64, ToolError> {
    let number = match arguments.get("count") {
        None | Some(Value::Null) => return Ok(DEFAULT_EMAIL_COUNT),
        Some(Value::Number(n)) => n,
        Some(other) => {
            return Err(ToolError::invalid(
                GET_EMAILS,
                format!("参数 `count` 必须是数字，实际为 {}", json_type(other)),
            ));
        }
    };

    if let Some(n) = number.as_i64() {
        return Ok(n);
    }
    // 超出 i64 的正整数，之后会被截断到上限
    if number.as_u64().is_some() {
        return Ok(i64::MAX);
    }

    match number.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
        _ => Err(ToolError::invalid(
            GET_EMAILS,
            format!("参数 `count` 必须是整数，实际为 {}", number),
        )),
    }
}

fn string_argument<'a>(
    tool: &str,
    arguments: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    match arguments.get(key) {
        Some(Value::String(s)) => Ok(s),
        None | Some(Value::Null) => Err(ToolError::invalid(tool, format!("缺少必填参数 `{}`", key))),
        Some(other) => Err(ToolError::invalid(
            tool,
            format!("参数 `{}` 必须是字符串，实际为 {}", key, json_type(other)),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
