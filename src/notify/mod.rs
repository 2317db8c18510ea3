//! Notification delivery.
//!
//! - `render`: subject lines and HTML/plain-text bodies
//! - `smtp`: email delivery (feature `smtp`)

pub mod render;
#[cfg(feature = "smtp")]
pub mod smtp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::EmailConfig;

pub use render::{alert_notification, listings_notification};
#[cfg(feature = "smtp")]
pub use smtp::SmtpDispatcher;

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub html: String,
    /// Plain-text alternative of `html`
    pub text: String,
}

/// Delivers notifications to their recipients.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Deliver one message. `Ok` means delivery was confirmed.
    async fn dispatch(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        log::info!("Notification: {}", notification.subject);
        log::debug!("{}", notification.text);
        Ok(())
    }
}

/// Build the dispatcher selected by the email settings.
pub fn build_dispatcher(config: &EmailConfig) -> Result<Arc<dyn Dispatcher>> {
    if !config.enabled {
        log::info!("Email disabled; notifications go to the log");
        return Ok(Arc::new(LogDispatcher));
    }

    #[cfg(feature = "smtp")]
    {
        Ok(Arc::new(SmtpDispatcher::new(config)?))
    }

    #[cfg(not(feature = "smtp"))]
    {
        log::warn!("Email enabled but built without the `smtp` feature; notifications go to the log");
        Ok(Arc::new(LogDispatcher))
    }
}
