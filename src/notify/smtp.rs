//! SMTP delivery via `lettre`.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Dispatcher, Notification};
use crate::error::{AppError, Result};
use crate::models::EmailConfig;

/// Sends each notification as a multipart (plain + HTML) email.
pub struct SmtpDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl SmtpDispatcher {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let mut builder = if config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
                .map_err(|e| AppError::config(format!("SMTP relay {}: {e}", config.smtp_server)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_server)
        };
        builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        let from = parse_mailbox(&config.from_address)?;
        let to = config
            .to_addresses
            .iter()
            .map(|a| parse_mailbox(a))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            transport: builder.build(),
            from,
            to,
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.as_str());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                notification.text.clone(),
                notification.html.clone(),
            ))
            .map_err(|e| AppError::dispatch(format!("building message: {e}")))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| AppError::config(format!("invalid email address '{address}': {e}")))
}

#[async_trait]
impl Dispatcher for SmtpDispatcher {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        let message = self.build_message(notification)?;

        let mut attempt = 1;
        loop {
            match self.transport.send(message.clone()).await {
                Ok(_) => {
                    log::info!("Email sent: {}", notification.subject);
                    return Ok(());
                }
                Err(e) if e.is_permanent() || attempt >= self.max_attempts => {
                    return Err(AppError::dispatch(format!(
                        "SMTP delivery failed after {attempt} attempt(s): {e}"
                    )));
                }
                Err(e) => {
                    log::error!(
                        "SMTP error (attempt {attempt}/{}): {e}",
                        self.max_attempts
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
