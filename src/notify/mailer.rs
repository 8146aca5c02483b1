use anyhow::Result;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;

/// Outbound reminder delivery. SMTP in production, a logging fallback when
/// no `[smtp]` section is configured, and a capturing double for tests.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

// ─── SMTP ─────────────────────────────────────────────────────────────────────

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)?.port(cfg.port);
        if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from: cfg.from.parse()?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(subject)
            .body(body.to_string())?;
        self.transport.send(message).await?;
        Ok(())
    }
}

// ─── Logging fallback ─────────────────────────────────────────────────────────

/// Used when SMTP is unconfigured: reminders land in the log instead of a
/// mailbox. Keeps development and air-gapped deployments working.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        info!(recipient = %to, subject = %subject, "smtp not configured — reminder logged only");
        Ok(())
    }
}

// ─── Test double ──────────────────────────────────────────────────────────────

/// Records every send instead of delivering. Shared with integration tests.
#[derive(Default)]
pub struct CaptureMailer {
    sent: std::sync::Mutex<Vec<(String, String, String)>>,
}

impl CaptureMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured (recipient, subject, body) triples, in send order.
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Mailer for CaptureMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}
