use chrono::{DateTime, Utc};

use super::MailMessage;

/// One shared file as listed in a notification
#[derive(Debug, Clone)]
pub struct NotifiedFile {
    pub name: String,
    /// Inline-view download link
    pub link: String,
}

/// "You received files" notification for one share batch
#[derive(Debug, Clone)]
pub struct ShareNotification {
    pub sharer: String,
    pub recipient: String,
    pub expires_at: DateTime<Utc>,
    pub files: Vec<NotifiedFile>,
}

impl ShareNotification {
    pub fn subject(&self) -> String {
        format!("New File Transfer from {}", self.sharer)
    }

    pub fn render_html(&self) -> String {
        let mut items = String::new();
        for file in &self.files {
            items.push_str(&format!(
                "      <li><a href=\"{}\">{}</a></li>\n",
                escape_html(&file.link),
                escape_html(&file.name)
            ));
        }

        format!(
            "<!DOCTYPE html>\n\
             <html>\n\
             <body style=\"font-family: sans-serif;\">\n\
             \x20 <p><strong>{sharer}</strong> shared {count} with you.</p>\n\
             \x20 <ul>\n\
             {items}\
             \x20 </ul>\n\
             \x20 <p>Links expire on {expiry} UTC.</p>\n\
             </body>\n\
             </html>\n",
            sharer = escape_html(&self.sharer),
            count = if self.files.len() == 1 {
                "a file".to_string()
            } else {
                format!("{} files", self.files.len())
            },
            expiry = self.expires_at.format("%Y-%m-%d %H:%M"),
        )
    }

    pub fn into_message(self, from: &str) -> MailMessage {
        MailMessage {
            from: from.to_string(),
            to: vec![self.recipient.clone()],
            subject: self.subject(),
            html_body: self.render_html(),
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn notification() -> ShareNotification {
        ShareNotification {
            sharer: "alice@example.com".to_string(),
            recipient: "bob@example.com".to_string(),
            expires_at: Utc.with_ymd_and_hms(2025, 1, 2, 15, 4, 5).unwrap(),
            files: vec![NotifiedFile {
                name: "<script>.txt".to_string(),
                link: "https://files.example.com/d/abc?mode=inline".to_string(),
            }],
        }
    }

    #[test]
    fn renders_subject_and_expiry() {
        let n = notification();
        assert_eq!(n.subject(), "New File Transfer from alice@example.com");
        let html = n.render_html();
        assert!(html.contains("Links expire on 2025-01-02 15:04 UTC."));
        assert!(html.contains("href=\"https://files.example.com/d/abc?mode=inline\""));
    }

    #[test]
    fn escapes_interpolated_values() {
        let html = notification().render_html();
        assert!(html.contains("&lt;script&gt;.txt"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn message_is_addressed_to_recipient() {
        let message = notification().into_message("noreply@example.com");
        assert_eq!(message.to, vec!["bob@example.com".to_string()]);
        assert_eq!(message.from, "noreply@example.com");
    }
}
