/// 邮件操作
///
/// 组合凭据提供者与传输层：每次调用前取 Token，调用 Graph，
/// 把线上模型转为对外的 `EmailSummary`
use std::cmp::Reverse;
use std::sync::Arc;

use crate::error::MailError;
use crate::mail::graph::api::MailTransport;
use crate::mail::graph::credential::CredentialProvider;
use crate::mail::graph::types::{EmailSummary, OutboundEmail};

/// 未指定数量时返回的邮件数
pub const DEFAULT_EMAIL_COUNT: i64 = 3;

/// 单次最多返回的邮件数
pub const MAX_EMAIL_COUNT: i64 = 10;

/// 把请求数量限制在 `[1, 10]`
pub fn clamp_limit(limit: i64) -> u32 {
    limit.clamp(1, MAX_EMAIL_COUNT) as u32
}

/// 邮件服务
pub struct MailService {
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn MailTransport>,
}

impl MailService {
    pub fn new(credentials: Arc<dyn CredentialProvider>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    /// 获取最近的邮件
    ///
    /// # Arguments
    /// * `limit` - 期望数量，超出 `[1, 10]` 时截断
    ///
    /// # Returns
    /// 按接收时间倒序排列的邮件摘要，接收时间无法解析的排在最后
    pub async fn list_recent_mail(&self, limit: i64) -> Result<Vec<EmailSummary>, MailError> {
        let top = clamp_limit(limit);
        if i64::from(top) != limit {
            tracing::debug!("请求数量 {} 已调整为 {}", limit, top);
        }

        let token = self.credentials.current_token()?;
        let messages = self.transport.list_messages(&token.access_token, top).await?;

        let mut emails: Vec<EmailSummary> = messages.into_iter().map(EmailSummary::from).collect();
        emails.sort_by_key(|e| Reverse(e.received_at()));
        emails.truncate(top as usize);

        tracing::info!("📬 获取到 {} 封邮件", emails.len());
        Ok(emails)
    }

    /// 发送纯文本邮件
    ///
    /// 不在本地校验收件人地址，由 Graph 判定
    ///
    /// # Returns
    /// 确认信息 `Email sent to {to}`
    pub async fn send_mail(&self, to: &str, subject: &str, body: &str) -> Result<String, MailError> {
        let email = OutboundEmail::new(to, subject, body);

        let token = self.credentials.current_token()?;
        self.transport.send_mail(&token.access_token, &email).await?;

        Ok(format!("Email sent to {}", to))
    }
}
