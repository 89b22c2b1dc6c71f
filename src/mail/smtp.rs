use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{MailError, MailMessage, Mailer};
use crate::config::MailConfig;

const SENDER_NAME: &str = "File Share Notifications";

/// SMTP relay. Port 465 uses implicit TLS, any other port STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, anyhow::Error> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("SMTP_HOST is required for the smtp backend"))?;

        let mut builder = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
        }
        .port(config.smtp_port);

        if let (Some(user), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

fn build_message(message: &MailMessage) -> Result<Message, MailError> {
    let from: Mailbox = format!("{SENDER_NAME} <{}>", message.from)
        .parse()
        .map_err(|e| MailError::Message(format!("invalid sender {}: {e}", message.from)))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_HTML);
    for to in &message.to {
        let mailbox: Mailbox = to
            .parse()
            .map_err(|e| MailError::Message(format!("invalid recipient {to}: {e}")))?;
        builder = builder.to(mailbox);
    }

    builder
        .body(message.html_body.clone())
        .map_err(|e| MailError::Message(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let email = build_message(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        tracing::info!(recipients = message.to.len(), "Mail sent over SMTP");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_html_message() {
        let message = MailMessage {
            from: "noreply@example.com".to_string(),
            to: vec!["bob@example.com".to_string()],
            subject: "New File Transfer from alice@example.com".to_string(),
            html_body: "<p>hi</p>".to_string(),
        };
        let email = build_message(&message).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: New File Transfer from alice@example.com"));
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("To: bob@example.com"));
    }

    #[test]
    fn rejects_bad_recipient() {
        let message = MailMessage {
            from: "noreply@example.com".to_string(),
            to: vec!["not an address".to_string()],
            subject: "s".to_string(),
            html_body: String::new(),
        };
        assert!(matches!(
            build_message(&message),
            Err(MailError::Message(_))
        ));
    }
}
