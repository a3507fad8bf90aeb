/// Microsoft Graph 邮件数据结构
///
/// - `CachedToken`：落盘的访问令牌
/// - `GraphMessage`：Graph `message` 资源（全部字段可选，仅在 API 边界解码一次）
/// - `EmailSummary`：对外输出的邮件摘要（缺省值在转换时统一填充）
/// - `OutboundEmail`：待发送邮件
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;

/// 邮件主题缺失时的默认值
pub const DEFAULT_SUBJECT: &str = "No subject";

/// 发件人 / 接收时间缺失时的默认值
pub const UNKNOWN: &str = "Unknown";

/// 缓存的访问令牌
///
/// `expires_at` 为 Unix 时间戳（秒），`expires_at > now` 时有效
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    /// Bearer Token（不透明字符串）
    pub access_token: String,

    /// 过期时间（Unix 秒）
    pub expires_at: i64,

    /// 申请 Token 时使用的应用 ID
    pub client_id: String,

    /// 申请 Token 时使用的租户 ID
    pub tenant_id: String,
}

impl CachedToken {
    /// 根据 `expires_in` 创建 Token，过期时间从当前时刻起算
    pub fn new(
        access_token: String,
        expires_in_seconds: i64,
        client_id: String,
        tenant_id: String,
    ) -> Self {
        Self {
            access_token,
            expires_at: Utc::now().timestamp().saturating_add(expires_in_seconds),
            client_id,
            tenant_id,
        }
    }

    /// 当前是否有效
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now.timestamp()
    }

    /// 过期时间（UTC）
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.expires_at, 0).unwrap_or(if self.expires_at > 0 {
            DateTime::<Utc>::MAX_UTC
        } else {
            DateTime::<Utc>::MIN_UTC
        })
    }

    /// 剩余有效时间，已过期时为 0，超出 `Duration` 范围时取最大值
    pub fn remaining(&self) -> chrono::Duration {
        let secs = self.expires_at.saturating_sub(Utc::now().timestamp()).max(0);
        chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
    }

    /// 剩余有效分钟数（向下取整）
    pub fn remaining_minutes(&self) -> i64 {
        self.remaining().num_minutes()
    }

    /// 日志用的脱敏 Token：`abcde...vwxyz`
    pub fn masked_token(&self) -> String {
        let token = &self.access_token;
        let chars: Vec<char> = token.chars().collect();
        if chars.len() <= 10 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..5].iter().collect();
        let tail: String = chars[chars.len() - 5..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

// Debug 输出中不能出现完整 Token
impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &self.masked_token())
            .field("expires_at", &self.expires_at)
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// 邮件摘要（工具输出）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub subject: String,
    pub from: String,
    pub received: String,
    pub preview: String,
}

impl EmailSummary {
    /// 解析接收时间（RFC 3339），无法解析时为 None
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.received)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Graph 邮件列表分页响应
#[derive(Debug, Default, Deserialize)]
pub struct GraphMessagePage {
    #[serde(default)]
    pub value: Vec<GraphMessage>,
}

/// Graph `message` 资源（仅 $select 的四个字段）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    #[serde(default, deserialize_with = "lenient")]
    pub subject: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub from: Option<GraphRecipient>,

    #[serde(default, deserialize_with = "lenient")]
    pub received_date_time: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub body_preview: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRecipient {
    #[serde(default, deserialize_with = "lenient")]
    pub email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphEmailAddress {
    #[serde(default, deserialize_with = "lenient")]
    pub address: Option<String>,

    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
}

/// 宽松解码：字段形状不符时视为缺失，而不是让整页解码失败
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl From<GraphMessage> for EmailSummary {
    fn from(msg: GraphMessage) -> Self {
        let from = msg
            .from
            .and_then(|r| r.email_address)
            .and_then(|e| non_empty(e.address));

        Self {
            subject: non_empty(msg.subject).unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            from: from.unwrap_or_else(|| UNKNOWN.to_string()),
            received: non_empty(msg.received_date_time).unwrap_or_else(|| UNKNOWN.to_string()),
            preview: msg.body_preview.unwrap_or_default(),
        }
    }
}

/// 待发送邮件（单收件人、纯文本正文）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutboundEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// `POST /me/sendMail` 请求体
    pub fn to_send_mail_body(&self) -> serde_json::Value {
        json!({
            "message": {
                "subject": self.subject,
                "body": {
                    "contentType": "Text",
                    "content": self.body,
                },
                "toRecipients": [
                    { "emailAddress": { "address": self.to } }
                ],
            },
            "saveToSentItems": true,
        })
    }
}
