use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

use file_share::mail::{MailError, MailMessage, Mailer};
use file_share::session::Caller;
use file_share::sharing::{NotificationStatus, ShareError, ShareManager, ShareRequest};
use file_share::storage::models::FileRecord;
use file_share::storage::Database;
use file_share::tokens::TokenIssuer;

const PUBLIC_URL: &str = "https://files.example.com";

/// Records every message; fails on demand
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
    fail: bool,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Transport("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn alice() -> Caller {
    Caller {
        id: "alice-id".to_string(),
        email: "alice@example.com".to_string(),
        name: Some("Alice".to_string()),
    }
}

fn bob() -> Caller {
    Caller {
        id: "bob-id".to_string(),
        email: "bob@example.com".to_string(),
        name: None,
    }
}

fn setup(mailer: Option<Arc<dyn Mailer>>) -> (tempfile::TempDir, Database, ShareManager) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();

    for caller in [alice(), bob()] {
        db.upsert_user(&caller.id, &caller.email, caller.name.as_deref())
            .unwrap();
        db.assign_bucket(&caller.id, &format!("fileshare-{}", caller.id))
            .unwrap();
    }

    let now = Utc::now();
    for name in ["report.pdf", "photo.jpg"] {
        db.insert_file(&FileRecord {
            id: format!("file-{name}"),
            owner_id: "alice-id".to_string(),
            name: name.to_string(),
            content_type: "application/octet-stream".to_string(),
            size: 42,
            checksum: format!("sum-{name}"),
            private_token: format!("private-{name}"),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    }

    let manager = ShareManager::new(
        db.clone(),
        TokenIssuer::new(),
        mailer,
        PUBLIC_URL,
        "noreply@example.com",
    );
    (dir, db, manager)
}

fn request(files: &[&str], duration: &str, notify: bool) -> ShareRequest {
    ShareRequest {
        recipient: "Bob@Example.com".to_string(),
        file_names: files.iter().map(|s| s.to_string()).collect(),
        duration: duration.to_string(),
        notify,
    }
}

#[tokio::test]
async fn test_share_sets_expiry_from_duration() {
    let (_dir, _db, manager) = setup(None);
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    let batch = manager
        .create_share_at(&alice(), &request(&["report.pdf"], "2d", false), now)
        .await
        .unwrap();

    assert_eq!(batch.sharing_info.len(), 1);
    let share = &batch.sharing_info[0];
    assert_eq!(share.expires_at, now + Duration::days(2));
    assert_eq!(share.shared_for, "bob@example.com");
    assert_eq!(share.shared_by, "alice@example.com");
    assert_eq!(share.checksum, "sum-report.pdf");
    assert_eq!(share.sharing_token.len(), 64);
    assert_eq!(
        share.sharing_link,
        format!("{PUBLIC_URL}/d/{}", share.sharing_token)
    );
    assert_eq!(batch.notification_status, NotificationStatus::NotSent);
}

#[tokio::test]
async fn test_token_valid_until_expiry() {
    let (_dir, _db, manager) = setup(None);
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    let batch = manager
        .create_share_at(&alice(), &request(&["report.pdf"], "2h", false), now)
        .await
        .unwrap();
    let token = &batch.sharing_info[0].sharing_token;
    let expires_at = now + Duration::hours(2);

    let location = manager
        .resolve_share_token_at(token, expires_at - Duration::seconds(1))
        .unwrap();
    assert_eq!(location.bucket, "fileshare-alice-id");
    assert_eq!(location.object, "report.pdf");

    assert!(matches!(
        manager.resolve_share_token_at(token, expires_at),
        Err(ShareError::Expired(at)) if at == expires_at
    ));
    assert!(matches!(
        manager.resolve_share_token_at(token, expires_at + Duration::seconds(1)),
        Err(ShareError::Expired(_))
    ));
}

#[tokio::test]
async fn test_unknown_token_not_found() {
    let (_dir, _db, manager) = setup(None);
    assert!(matches!(
        manager.resolve_share_token("does-not-exist"),
        Err(ShareError::NotFound)
    ));
}

#[tokio::test]
async fn test_each_file_gets_distinct_token() {
    let (_dir, _db, manager) = setup(None);

    let batch = manager
        .create_share(&alice(), &request(&["report.pdf", "photo.jpg"], "1w", false))
        .await
        .unwrap();

    assert_eq!(batch.sharing_info.len(), 2);
    assert_ne!(
        batch.sharing_info[0].sharing_token,
        batch.sharing_info[1].sharing_token
    );
    assert_eq!(
        batch.sharing_info[0].expires_at,
        batch.sharing_info[1].expires_at
    );
}

#[tokio::test]
async fn test_unknown_files_are_skipped() {
    let (_dir, _db, manager) = setup(None);

    let batch = manager
        .create_share(&alice(), &request(&["report.pdf", "missing.txt"], "1d", false))
        .await
        .unwrap();

    assert_eq!(batch.sharing_info.len(), 1);
    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].file_name, "missing.txt");
    assert_eq!(batch.skipped[0].reason, "not_found");
}

#[tokio::test]
async fn test_cannot_share_files_of_another_user() {
    let (_dir, _db, manager) = setup(None);

    let batch = manager
        .create_share(&bob(), &request(&["report.pdf"], "1d", false))
        .await
        .unwrap();
    assert!(batch.sharing_info.is_empty());
    assert_eq!(batch.skipped.len(), 1);
}

#[tokio::test]
async fn test_invalid_request_writes_nothing() {
    let (_dir, db, manager) = setup(None);

    for duration in ["", "0d", "-1d", "3 fortnights", "1x"] {
        let result = manager
            .create_share(&alice(), &request(&["report.pdf"], duration, false))
            .await;
        assert!(
            matches!(result, Err(ShareError::InvalidDuration(_))),
            "{duration:?} should be rejected"
        );
    }

    let mut no_recipient = request(&["report.pdf"], "1d", false);
    no_recipient.recipient = "   ".to_string();
    assert!(matches!(
        manager.create_share(&alice(), &no_recipient).await,
        Err(ShareError::Validation(_))
    ));

    assert!(matches!(
        manager.create_share(&alice(), &request(&[], "1d", false)).await,
        Err(ShareError::Validation(_))
    ));

    assert!(db
        .list_shares_by("alice@example.com", Utc::now())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_private_token_owner_only() {
    let (_dir, _db, manager) = setup(None);

    let location = manager
        .resolve_private_token("alice-id", "private-report.pdf")
        .unwrap();
    assert_eq!(location.object, "report.pdf");

    assert!(matches!(
        manager.resolve_private_token("bob-id", "private-report.pdf"),
        Err(ShareError::Forbidden)
    ));
    assert!(matches!(
        manager.resolve_private_token("alice-id", "nope"),
        Err(ShareError::NotFound)
    ));
}

#[tokio::test]
async fn test_listings_show_only_unexpired() {
    let (_dir, _db, manager) = setup(None);
    let now = Utc::now();

    manager
        .create_share_at(&alice(), &request(&["report.pdf"], "1h", false), now)
        .await
        .unwrap();
    manager
        .create_share_at(
            &alice(),
            &request(&["photo.jpg"], "1d", false),
            now - Duration::days(2),
        )
        .await
        .unwrap();

    let received = manager.list_received(&bob(), now).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].file_name, "report.pdf");
    assert_eq!(received[0].shared_by, "alice@example.com");

    let sent = manager.list_sent(&alice(), now).unwrap();
    assert_eq!(sent.len(), 1);

    assert!(manager.list_received(&alice(), now).unwrap().is_empty());
}

#[tokio::test]
async fn test_notification_sent() {
    let mailer = Arc::new(RecordingMailer::default());
    let (_dir, _db, manager) = setup(Some(mailer.clone()));

    let batch = manager
        .create_share(&alice(), &request(&["report.pdf", "photo.jpg"], "1d", true))
        .await
        .unwrap();
    assert_eq!(batch.notification_status, NotificationStatus::Sent);

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["bob@example.com".to_string()]);
    assert_eq!(sent[0].from, "noreply@example.com");
    assert_eq!(sent[0].subject, "New File Transfer from alice@example.com");
    for share in &batch.sharing_info {
        assert!(sent[0]
            .html_body
            .contains(&format!("{}?mode=inline", share.sharing_link)));
    }
}

#[tokio::test]
async fn test_notification_failure_keeps_shares() {
    let mailer = Arc::new(RecordingMailer {
        fail: true,
        ..Default::default()
    });
    let (_dir, _db, manager) = setup(Some(mailer));

    let batch = manager
        .create_share(&alice(), &request(&["report.pdf"], "1d", true))
        .await
        .unwrap();
    assert_eq!(batch.notification_status, NotificationStatus::Failed);

    let token = &batch.sharing_info[0].sharing_token;
    assert!(manager.resolve_share_token(token).is_ok());
}

#[tokio::test]
async fn test_notification_not_sent_without_shares_or_mailer() {
    let mailer = Arc::new(RecordingMailer::default());
    let (_dir, _db, manager) = setup(Some(mailer.clone()));

    let batch = manager
        .create_share(&alice(), &request(&["missing.txt"], "1d", true))
        .await
        .unwrap();
    assert_eq!(batch.notification_status, NotificationStatus::NotSent);
    assert!(mailer.sent.lock().unwrap().is_empty());

    let (_dir, _db, manager) = setup(None);
    let batch = manager
        .create_share(&alice(), &request(&["report.pdf"], "1d", true))
        .await
        .unwrap();
    assert_eq!(batch.notification_status, NotificationStatus::NotSent);
}

#[tokio::test]
async fn test_recipient_with_embedded_separator_rejected() {
    let (_dir, db, manager) = setup(None);

    let mut smuggled = request(&["report.pdf"], "1d", false);
    smuggled.recipient = "bob@example.com\0mallory@example.com".to_string();
    assert!(matches!(
        manager.create_share(&alice(), &smuggled).await,
        Err(ShareError::Validation(_))
    ));

    assert!(manager.list_received(&bob(), Utc::now()).unwrap().is_empty());
    assert!(db
        .list_shares_by("alice@example.com", Utc::now())
        .unwrap()
        .is_empty());
}
