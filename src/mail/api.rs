use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{MailError, MailMessage, Mailer};
use crate::config::MailConfig;

/// Transactional mail provider reached over a JSON HTTP API with a bearer key.
pub struct HttpApiMailer {
    api_key: String,
    api_url: String,
    client: Client,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

impl HttpApiMailer {
    pub fn new(config: &MailConfig) -> Result<Self, anyhow::Error> {
        Ok(Self {
            api_key: config
                .api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("MAIL_API_KEY is required for the api backend"))?,
            api_url: config
                .api_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("MAIL_API_URL is required for the api backend"))?,
            client: Client::builder().build()?,
        })
    }
}

#[async_trait]
impl Mailer for HttpApiMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&SendRequest {
                from: &message.from,
                to: &message.to,
                subject: &message.subject,
                html: &message.html_body,
            })
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Rejected { status, body });
        }

        tracing::info!(recipients = message.to.len(), "Mail accepted by API");
        Ok(())
    }
}
