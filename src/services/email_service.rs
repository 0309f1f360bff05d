//! services/email_service.rs
//! Transporte de correo: el dispatcher solo conoce el trait `MailTransport`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::models::campaign_model::SendingAccount;
use crate::models::tracking_model::RenderedMessage;

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, account: &SendingAccount, message: &RenderedMessage) -> Result<()>;
}

/// SMTP con STARTTLS usando las credenciales de cada cuenta de envío.
#[derive(Debug, Clone)]
pub struct SmtpMailTransport {
    timeout: Duration,
}

impl SmtpMailTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_message(message: &RenderedMessage) -> Result<Message> {
        let to: Mailbox = message.to.parse().context("Invalid recipient address")?;

        let mut builder = Message::builder()
            .from(message.from.clone())
            .to(to)
            .subject(&message.subject);

        if !message.reply_to.trim().is_empty() {
            let reply_to: Mailbox = message
                .reply_to
                .parse()
                .context("Invalid reply-to address")?;
            builder = builder.reply_to(reply_to);
        }

        // Con texto plano: multipart/alternative; si no, solo HTML
        let email = match &message.text {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                message.html.clone(),
            ))?,
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(message.html.clone())?,
        };
        Ok(email)
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, account: &SendingAccount, message: &RenderedMessage) -> Result<()> {
        let email = Self::build_message(message)?;

        let port = u16::try_from(account.smtp_port)
            .with_context(|| format!("Invalid SMTP port {}", account.smtp_port))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.smtp_host)?
            .port(port)
            .credentials(Credentials::new(
                account.username.clone(),
                account.password.clone(),
            ))
            .build();

        tokio::time::timeout(self.timeout, mailer.send(email))
            .await
            .context("Timeout enviando por SMTP")?
            .with_context(|| format!("SMTP send via {} failed", account.smtp_host))?;

        Ok(())
    }
}
