//! Outbound notification transport.

use crate::errors::{Result, ServiceError};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

/// Subject/body for a fired alert.
pub fn trigger_notification(price: &str) -> (String, String) {
    (
        "Crypto Alert".to_string(),
        format!("Your alert has been triggered! The price is now {price}."),
    )
}

/// Transport seam so the consumer can be tested without an SMTP server.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        username: &str,
        password: &str,
        from_name: &str,
        from_address: &str,
    ) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        let from: Mailbox = format!("{from_name} <{from_address}>")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid sender address: {e}"))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let to: Mailbox = to
            .parse()
            .map_err(|_| ServiceError::validation(format!("invalid recipient address: {to}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(ServiceError::transient)?;

        self.transport
            .send(message)
            .await
            .map_err(ServiceError::transient)?;

        info!(to = %to, subject, "notification email sent");
        Ok(())
    }
}
