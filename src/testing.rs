//! 单元测试共用的替身实现

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::error::{CredentialError, MailError};
use crate::mail::graph::api::MailTransport;
use crate::mail::graph::credential::CredentialProvider;
use crate::mail::graph::types::{CachedToken, GraphMessage, OutboundEmail};
use crate::mail::service::MailService;

/// 固定返回结果的凭据提供者
pub struct StubCredential {
    valid: bool,
}

impl StubCredential {
    pub fn valid() -> Self {
        Self { valid: true }
    }

    pub fn expired() -> Self {
        Self { valid: false }
    }
}

impl CredentialProvider for StubCredential {
    fn current_token(&self) -> Result<CachedToken, CredentialError> {
        if !self.valid {
            return Err(CredentialError::TokenExpired {
                expired_at: Utc::now(),
            });
        }
        Ok(CachedToken::new(
            "stub-access-token".to_string(),
            3600,
            "client".to_string(),
            "tenant".to_string(),
        ))
    }
}

/// 记录调用的邮件传输层
#[derive(Default)]
pub struct StubTransport {
    messages: Vec<GraphMessage>,
    fail_status: Option<u16>,
    pub requested_tops: Mutex<Vec<u32>>,
    pub sent: Mutex<Vec<OutboundEmail>>,
}

impl StubTransport {
    /// 以 Graph JSON 形式提供收件箱内容
    pub fn with_messages(raw: Value) -> Self {
        let messages = match raw {
            Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).unwrap())
                .collect(),
            other => panic!("expected an array, got {}", other),
        };
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), MailError> {
        match self.fail_status {
            Some(status) => Err(MailError::Remote {
                status,
                code: "ErrorStub".to_string(),
                message: "stubbed failure".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MailTransport for StubTransport {
    async fn list_messages(
        &self,
        access_token: &str,
        top: u32,
    ) -> Result<Vec<GraphMessage>, MailError> {
        assert_eq!(access_token, "stub-access-token");
        self.requested_tops.lock().unwrap().push(top);
        self.check()?;
        Ok(self.messages.clone())
    }

    async fn send_mail(&self, access_token: &str, email: &OutboundEmail) -> Result<(), MailError> {
        assert_eq!(access_token, "stub-access-token");
        self.sent.lock().unwrap().push(email.clone());
        self.check()
    }
}

/// 组装使用替身的 `MailService`
pub fn service(credential: StubCredential, transport: StubTransport) -> (MailService, Arc<StubTransport>) {
    let transport = Arc::new(transport);
    let service = MailService::new(Arc::new(credential), transport.clone());
    (service, transport)
}

/// 三封乱序邮件，其中一封缺少接收时间
pub fn sample_inbox() -> Value {
    serde_json::json!([
        {
            "subject": "older",
            "from": { "emailAddress": { "address": "old@contoso.com" } },
            "receivedDateTime": "2024-05-01T08:00:00Z",
            "bodyPreview": "first"
        },
        {
            "subject": "undated",
            "from": { "emailAddress": { "address": "nodate@contoso.com" } },
            "bodyPreview": "no timestamp"
        },
        {
            "subject": "newest",
            "from": { "emailAddress": { "address": "new@contoso.com" } },
            "receivedDateTime": "2024-05-03T08:00:00Z",
            "bodyPreview": "third"
        }
    ])
}
