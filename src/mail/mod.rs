//! Outbound notification mail.

mod api;
mod notify;
mod smtp;

pub use api::HttpApiMailer;
pub use notify::{NotifiedFile, ShareNotification};
pub use smtp::SmtpMailer;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{MailBackend, MailConfig};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid message: {0}")]
    Message(String),
    #[error("Mail API rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Mail transport error: {0}")]
    Transport(String),
}

/// A rendered message, ready for any transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Build the configured mailer. `None` when notifications are disabled.
pub fn from_config(config: &MailConfig) -> Result<Option<Arc<dyn Mailer>>, anyhow::Error> {
    let mailer: Arc<dyn Mailer> = match config.backend {
        MailBackend::None => return Ok(None),
        MailBackend::Api => Arc::new(HttpApiMailer::new(config)?),
        MailBackend::Smtp => Arc::new(SmtpMailer::new(config)?),
    };
    Ok(Some(mailer))
}
