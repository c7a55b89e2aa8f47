//! Transactional email delivery through Resend, SendGrid or Brevo.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum EmailError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("json error: {0}")]
    Serde(String),
    #[error("missing api key for {0}")]
    MissingApiKey(EmailProviderKind),
}

impl EmailError {
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EmailProviderKind {
    Resend,
    Sendgrid,
    Brevo,
    #[default]
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub name: Option<String>,
}

impl Sender {
    /// `Name <email>` when a display name is set.
    fn formatted(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} <{}>", self.email),
            None => self.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    fn kind(&self) -> EmailProviderKind;

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, EmailError>;
}

/// Builds the configured provider. HTTP providers need an API key.
pub fn build_provider(
    kind: EmailProviderKind,
    api_key: Option<SecretString>,
    sender: Sender,
) -> Result<Arc<dyn EmailProvider>, EmailError> {
    if kind == EmailProviderKind::Log {
        return Ok(Arc::new(LogProvider { sender }));
    }
    let api_key = api_key.ok_or(EmailError::MissingApiKey(kind))?;
    Ok(Arc::new(HttpEmailProvider::new(kind, api_key, sender)?))
}

/// Development provider: logs the message instead of sending it.
#[derive(Debug, Clone)]
pub struct LogProvider {
    sender: Sender,
}

impl LogProvider {
    pub fn new(sender: Sender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EmailProvider for LogProvider {
    fn kind(&self) -> EmailProviderKind {
        EmailProviderKind::Log
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, EmailError> {
        let message_id = format!("log-{}", Uuid::new_v4());
        info!(
            from = %self.sender.formatted(),
            to = %email.to,
            subject = %email.subject,
            message_id = %message_id,
            "Email not sent (log provider)"
        );
        Ok(DeliveryReceipt {
            message_id: Some(message_id),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrevoResponse {
    message_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpEmailProvider {
    http: Client,
    kind: EmailProviderKind,
    api_key: SecretString,
    sender: Sender,
    base_url: String,
}

impl HttpEmailProvider {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        kind: EmailProviderKind,
        api_key: SecretString,
        sender: Sender,
    ) -> Result<Self, EmailError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("czi-portal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        let base_url = match kind {
            EmailProviderKind::Resend => "https://api.resend.com",
            EmailProviderKind::Sendgrid => "https://api.sendgrid.com",
            EmailProviderKind::Brevo | EmailProviderKind::Log => "https://api.brevo.com",
        }
        .to_string();
        Ok(Self {
            http,
            kind,
            api_key,
            sender,
            base_url,
        })
    }

    fn request(&self, email: &OutgoingEmail) -> RequestBuilder {
        let key = self.api_key.expose_secret();
        match self.kind {
            EmailProviderKind::Resend => self
                .http
                .post(format!("{}/emails", self.base_url))
                .bearer_auth(key)
                .json(&resend_body(&self.sender, email)),
            EmailProviderKind::Sendgrid => self
                .http
                .post(format!("{}/v3/mail/send", self.base_url))
                .bearer_auth(key)
                .json(&sendgrid_body(&self.sender, email)),
            EmailProviderKind::Brevo | EmailProviderKind::Log => self
                .http
                .post(format!("{}/v3/smtp/email", self.base_url))
                .header("api-key", key)
                .header("accept", "application/json")
                .json(&brevo_body(&self.sender, email)),
        }
    }

    async fn send_once(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, EmailError> {
        let res = self
            .request(email)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => self.receipt(res).await,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(EmailError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(EmailError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(EmailError::Http { status, body })
            }
        }
    }

    async fn receipt(&self, res: reqwest::Response) -> Result<DeliveryReceipt, EmailError> {
        let message_id = match self.kind {
            EmailProviderKind::Sendgrid => res
                .headers()
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            EmailProviderKind::Resend => {
                res.json::<ResendResponse>()
                    .await
                    .map_err(|e| EmailError::Serde(e.to_string()))?
                    .id
            }
            EmailProviderKind::Brevo | EmailProviderKind::Log => {
                res.json::<BrevoResponse>()
                    .await
                    .map_err(|e| EmailError::Serde(e.to_string()))?
                    .message_id
            }
        };
        Ok(DeliveryReceipt { message_id })
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    fn kind(&self) -> EmailProviderKind {
        self.kind
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, EmailError> {
        (|| async { self.send_once(email).await })
            .retry(send_backoff())
            .when(|e: &EmailError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    provider = %self.kind,
                    to = %email.to,
                    "Email send failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }
}

/// Total provider calls per email, the first one included.
pub const MAX_SEND_ATTEMPTS: usize = 3;

/// backon counts retries, not calls.
fn send_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(MAX_SEND_ATTEMPTS - 1)
        .with_jitter()
}

fn map_reqwest_error(e: reqwest::Error) -> EmailError {
    if e.is_timeout() {
        EmailError::Timeout
    } else {
        EmailError::Transport(e.to_string())
    }
}

fn resend_body(sender: &Sender, email: &OutgoingEmail) -> Value {
    let mut body = json!({
        "from": sender.formatted(),
        "to": [email.to],
        "subject": email.subject,
        "html": email.html,
    });
    if let Some(text) = &email.text {
        body["text"] = json!(text);
    }
    body
}

fn sendgrid_body(sender: &Sender, email: &OutgoingEmail) -> Value {
    let mut to = json!({ "email": email.to });
    if let Some(name) = &email.to_name {
        to["name"] = json!(name);
    }
    let mut from = json!({ "email": sender.email });
    if let Some(name) = &sender.name {
        from["name"] = json!(name);
    }
    // SendGrid requires text/plain before text/html.
    let mut content = Vec::new();
    if let Some(text) = &email.text {
        content.push(json!({ "type": "text/plain", "value": text }));
    }
    content.push(json!({ "type": "text/html", "value": email.html }));

    json!({
        "personalizations": [{ "to": [to] }],
        "from": from,
        "subject": email.subject,
        "content": content,
    })
}

fn brevo_body(sender: &Sender, email: &OutgoingEmail) -> Value {
    let mut to = json!({ "email": email.to });
    if let Some(name) = &email.to_name {
        to["name"] = json!(name);
    }
    let mut from = json!({ "email": sender.email });
    if let Some(name) = &sender.name {
        from["name"] = json!(name);
    }
    let mut body = json!({
        "sender": from,
        "to": [to],
        "subject": email.subject,
        "htmlContent": email.html,
    });
    if let Some(text) = &email.text {
        body["textContent"] = json!(text);
    }
    body
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn sender() -> Sender {
        Sender {
            email: "noreply@czi.example".to_string(),
            name: Some("CZI".to_string()),
        }
    }

    fn email(text: Option<&str>) -> OutgoingEmail {
        OutgoingEmail {
            to: "awa@example.org".to_string(),
            to_name: Some("Awa Keita".to_string()),
            subject: "Assemblée générale".to_string(),
            html: "<p>Bonjour Awa</p>".to_string(),
            text: text.map(str::to_string),
        }
    }

    #[test]
    fn resend_body_uses_formatted_sender() {
        let body = resend_body(&sender(), &email(None));
        assert_eq!(body["from"], "CZI <noreply@czi.example>");
        assert_eq!(body["to"][0], "awa@example.org");
        assert!(body.get("text").is_none());

        let body = resend_body(&sender(), &email(Some("Bonjour Awa")));
        assert_eq!(body["text"], "Bonjour Awa");
    }

    #[test]
    fn sendgrid_body_puts_plain_text_first() {
        let body = sendgrid_body(&sender(), &email(Some("Bonjour Awa")));
        assert_eq!(body["personalizations"][0]["to"][0]["name"], "Awa Keita");
        assert_eq!(body["from"]["name"], "CZI");
        assert_eq!(body["content"][0]["type"], "text/plain");
        assert_eq!(body["content"][1]["type"], "text/html");

        let html_only = sendgrid_body(&sender(), &email(None));
        assert_eq!(html_only["content"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn brevo_body_field_names() {
        let body = brevo_body(&sender(), &email(Some("Bonjour Awa")));
        assert_eq!(body["sender"]["email"], "noreply@czi.example");
        assert_eq!(body["to"][0]["email"], "awa@example.org");
        assert_eq!(body["htmlContent"], "<p>Bonjour Awa</p>");
        assert_eq!(body["textContent"], "Bonjour Awa");
    }

    #[test]
    fn retry_only_transient_errors() {
        assert!(EmailError::Timeout.should_retry());
        assert!(EmailError::RateLimited.should_retry());
        assert!(
            EmailError::Http {
                status: 503,
                body: String::new()
            }
            .should_retry()
        );
        assert!(
            !EmailError::Http {
                status: 422,
                body: String::new()
            }
            .should_retry()
        );
        assert!(!EmailError::InvalidApiKey.should_retry());
    }

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!(
            "SendGrid".parse::<EmailProviderKind>().unwrap(),
            EmailProviderKind::Sendgrid
        );
        assert_eq!(
            "resend".parse::<EmailProviderKind>().unwrap(),
            EmailProviderKind::Resend
        );
        assert_eq!(
            "smtp".parse::<EmailProviderKind>(),
            Err(strum::ParseError::VariantNotFound)
        );
    }

    #[test]
    fn http_providers_need_a_key() {
        assert!(matches!(
            build_provider(EmailProviderKind::Brevo, None, sender()),
            Err(EmailError::MissingApiKey(EmailProviderKind::Brevo))
        ));
        let provider = build_provider(EmailProviderKind::Log, None, sender()).unwrap();
        assert_eq!(provider.kind(), EmailProviderKind::Log);
    }

    #[tokio::test]
    async fn log_provider_returns_a_message_id() {
        let receipt = LogProvider::new(sender()).send(&email(None)).await.unwrap();
        assert!(receipt.message_id.unwrap().starts_with("log-"));
    }

    #[tokio::test]
    async fn transient_failures_stop_after_three_calls() {
        let calls = AtomicUsize::new(0);
        let result: Result<DeliveryReceipt, EmailError> = (|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EmailError::Timeout)
        })
        .retry(send_backoff().with_min_delay(Duration::from_millis(1)))
        .when(|e: &EmailError| e.should_retry())
        .await;

        assert!(matches!(result, Err(EmailError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_SEND_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<DeliveryReceipt, EmailError> = (|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EmailError::InvalidApiKey)
        })
        .retry(send_backoff().with_min_delay(Duration::from_millis(1)))
        .when(|e: &EmailError| e.should_retry())
        .await;

        assert!(matches!(result, Err(EmailError::InvalidApiKey)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
