//! Share grants: creation, token validation and listings.

mod duration;

pub use duration::{parse_share_duration, DurationError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::mail::{Mailer, NotifiedFile, ShareNotification};
use crate::session::Caller;
use crate::storage::models::{normalize_email, ObjectLocation, ShareRecord, SharedFile};
use crate::storage::{Database, DatabaseError};
use crate::tokens::{redact, TokenError, TokenIssuer};

/// Attempts at minting a sharing token before giving up on one file
const TOKEN_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    InvalidDuration(#[from] DurationError),
    #[error("Token not found")]
    NotFound,
    #[error("Token expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("Caller does not own the requested file")]
    Forbidden,
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
}

/// One created share, as reported to the sharer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareResult {
    #[serde(rename = "file")]
    pub file_name: String,
    pub checksum: String,
    pub expires_at: DateTime<Utc>,
    pub shared_by: String,
    pub shared_for: String,
    pub sharing_link: String,
    pub sharing_token: String,
}

/// A requested file that produced no share
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    #[serde(rename = "file")]
    pub file_name: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Failed,
    NotSent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareBatch {
    pub sharing_info: Vec<ShareResult>,
    pub skipped: Vec<SkippedFile>,
    pub notification_status: NotificationStatus,
}

/// Parameters of one share request
#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub recipient: String,
    pub file_names: Vec<String>,
    pub duration: String,
    pub notify: bool,
}

#[derive(Clone)]
pub struct ShareManager {
    db: Database,
    tokens: TokenIssuer,
    mailer: Option<Arc<dyn Mailer>>,
    /// Externally reachable base URL, without trailing slash
    public_url: String,
    from_address: String,
}

impl ShareManager {
    pub fn new(
        db: Database,
        tokens: TokenIssuer,
        mailer: Option<Arc<dyn Mailer>>,
        public_url: &str,
        from_address: &str,
    ) -> Self {
        Self {
            db,
            tokens,
            mailer,
            public_url: public_url.trim_end_matches('/').to_string(),
            from_address: from_address.to_string(),
        }
    }

    pub fn sharing_link(&self, token: &str) -> String {
        format!("{}/d/{token}", self.public_url)
    }

    pub async fn create_share(
        &self,
        caller: &Caller,
        request: &ShareRequest,
    ) -> Result<ShareBatch, ShareError> {
        self.create_share_at(caller, request, Utc::now()).await
    }

    /// Create one share per requested file, all expiring at `now + duration`.
    ///
    /// The request is validated before anything is written. Unknown file names are reported in
    /// `skipped` without failing the batch. A notification failure is reported in the result and
    /// leaves the created shares in place.
    pub async fn create_share_at(
        &self,
        caller: &Caller,
        request: &ShareRequest,
        now: DateTime<Utc>,
    ) -> Result<ShareBatch, ShareError> {
        let recipient = normalize_email(&request.recipient);
        if !is_valid_recipient(&recipient) {
            return Err(ShareError::Validation(
                "recipient must be an email address".to_string(),
            ));
        }
        if request.file_names.is_empty() {
            return Err(ShareError::Validation("no files requested".to_string()));
        }

        let duration = parse_share_duration(&request.duration)?;
        let expires_at = now
            .checked_add_signed(duration)
            .ok_or_else(|| ShareError::Validation("duration out of range".to_string()))?;
        let shared_by = normalize_email(&caller.email);

        let mut sharing_info = Vec::new();
        let mut skipped = Vec::new();

        for name in &request.file_names {
            let Some(file) = self.db.get_file_by_owner_and_name(&caller.id, name)? else {
                tracing::info!(user_id = %caller.id, file = %name, "Skipping share of unknown file");
                skipped.push(SkippedFile {
                    file_name: name.clone(),
                    reason: "not_found",
                });
                continue;
            };

            let mut created = None;
            for attempt in 1..=TOKEN_ATTEMPTS {
                let share = ShareRecord {
                    token: self.tokens.new_share_token()?,
                    file_id: file.id.clone(),
                    shared_by: shared_by.clone(),
                    shared_for: recipient.clone(),
                    expires_at,
                    created_at: now,
                };

                match self.db.insert_share(&share) {
                    Ok(()) => {
                        created = Some(share);
                        break;
                    }
                    Err(e) if e.is_conflict() => {
                        // Either the token collided or the file was deleted concurrently
                        if self.db.get_file(&file.id)?.is_none() {
                            break;
                        }
                        tracing::warn!(attempt, file = %name, "Sharing token conflict, retrying");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            match created {
                Some(share) => sharing_info.push(ShareResult {
                    file_name: file.name.clone(),
                    checksum: file.checksum.clone(),
                    expires_at: share.expires_at,
                    shared_by: share.shared_by,
                    shared_for: share.shared_for,
                    sharing_link: self.sharing_link(&share.token),
                    sharing_token: share.token,
                }),
                None => skipped.push(SkippedFile {
                    file_name: name.clone(),
                    reason: "share_failed",
                }),
            }
        }

        tracing::info!(
            user_id = %caller.id,
            shared_for = %recipient,
            created = sharing_info.len(),
            skipped = skipped.len(),
            %expires_at,
            "Created shares"
        );

        let notification_status = if request.notify {
            self.notify(&shared_by, &recipient, expires_at, &sharing_info)
                .await
        } else {
            NotificationStatus::NotSent
        };

        Ok(ShareBatch {
            sharing_info,
            skipped,
            notification_status,
        })
    }

    async fn notify(
        &self,
        sharer: &str,
        recipient: &str,
        expires_at: DateTime<Utc>,
        shares: &[ShareResult],
    ) -> NotificationStatus {
        if shares.is_empty() {
            return NotificationStatus::NotSent;
        }
        let Some(ref mailer) = self.mailer else {
            tracing::warn!("Notification requested but no mail backend is configured");
            return NotificationStatus::NotSent;
        };

        let message = ShareNotification {
            sharer: sharer.to_string(),
            recipient: recipient.to_string(),
            expires_at,
            files: shares
                .iter()
                .map(|s| NotifiedFile {
                    name: s.file_name.clone(),
                    link: format!("{}?mode=inline", s.sharing_link),
                })
                .collect(),
        }
        .into_message(&self.from_address);

        match mailer.send(&message).await {
            Ok(()) => NotificationStatus::Sent,
            Err(e) => {
                tracing::error!(shared_for = %recipient, "Failed to send share notification: {e}");
                NotificationStatus::Failed
            }
        }
    }

    pub fn resolve_share_token(&self, token: &str) -> Result<ObjectLocation, ShareError> {
        self.resolve_share_token_at(token, Utc::now())
    }

    /// Resolve a sharing token to its object. The expiry is checked before the object is
    /// looked up; a share is usable strictly before `expires_at`.
    pub fn resolve_share_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ObjectLocation, ShareError> {
        let expires_at = self
            .db
            .get_share_expiry(token)?
            .ok_or(ShareError::NotFound)?;
        if now >= expires_at {
            tracing::debug!(token = redact(token), %expires_at, "Sharing token expired");
            return Err(ShareError::Expired(expires_at));
        }

        self.db
            .get_shared_object(token)?
            .ok_or(ShareError::NotFound)
    }

    /// Resolve a private token, allowing only the file's owner.
    pub fn resolve_private_token(
        &self,
        caller_id: &str,
        token: &str,
    ) -> Result<ObjectLocation, ShareError> {
        let object = self
            .db
            .get_private_object(token)?
            .ok_or(ShareError::NotFound)?;

        if object.owner_id != caller_id {
            tracing::warn!(
                user_id = %caller_id,
                token = redact(token),
                "Private token used by non-owner"
            );
            return Err(ShareError::Forbidden);
        }
        Ok(object.location)
    }

    /// Unexpired shares addressed to the caller
    pub fn list_received(
        &self,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> Result<Vec<SharedFile>, ShareError> {
        Ok(self.db.list_shares_for(&caller.email, now)?)
    }

    /// Unexpired shares created by the caller
    pub fn list_sent(
        &self,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> Result<Vec<SharedFile>, ShareError> {
        Ok(self.db.list_shares_by(&caller.email, now)?)
    }
}

/// A single mailbox address. Recipients are index keys, so control characters and whitespace
/// are never accepted.
fn is_valid_recipient(recipient: &str) -> bool {
    !recipient.is_empty()
        && !recipient.chars().any(|c| c.is_control() || c.is_whitespace())
        && recipient.parse::<lettre::Address>().is_ok()
}
