use chrono::{DateTime, Utc};
use redb::{ReadOnlyTable, ReadableTable, TableDefinition};

use super::db::{index_values, Database, DatabaseError};
use super::models::{
    normalize_email, FileRecord, ObjectLocation, ShareRecord, SharedFile, UserRecord,
};
use super::tables::*;

impl Database {
    // ========================================================================
    // Share operations
    // ========================================================================

    /// Persist a share grant. Fails with `Conflict` when the sharing token is already taken or
    /// the referenced file no longer exists.
    pub fn insert_share(&self, share: &ShareRecord) -> Result<(), DatabaseError> {
        debug_assert!(!share.token.is_empty(), "sharing token must not be empty");

        let write_txn = self.begin_write()?;
        {
            let files = write_txn.open_table(FILES)?;
            if files.get(share.file_id.as_str())?.is_none() {
                return Err(DatabaseError::Conflict(format!(
                    "file {} referenced by share does not exist",
                    share.file_id
                )));
            }

            let mut shares = write_txn.open_table(SHARES)?;
            if shares.get(share.token.as_str())?.is_some() {
                return Err(DatabaseError::Conflict(
                    "sharing token already in use".to_string(),
                ));
            }

            let data = rmp_serde::to_vec_named(share)?;
            shares.insert(share.token.as_str(), data.as_slice())?;

            let mut recipients = write_txn.open_table(RECIPIENT_SHARES)?;
            recipients.insert(
                index_key(&share.shared_for, &share.token).as_str(),
                share.token.as_str(),
            )?;

            let mut sharers = write_txn.open_table(SHARER_SHARES)?;
            sharers.insert(
                index_key(&share.shared_by, &share.token).as_str(),
                share.token.as_str(),
            )?;

            let mut file_shares = write_txn.open_table(FILE_SHARES)?;
            file_shares.insert(
                index_key(&share.file_id, &share.token).as_str(),
                share.token.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_share(&self, token: &str) -> Result<Option<ShareRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SHARES)?;

        match table.get(token)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Expiry of a sharing token, `None` when the token is unknown
    pub fn get_share_expiry(&self, token: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(self.get_share(token)?.map(|share| share.expires_at))
    }

    /// Resolve a sharing token to the bucket and object of the shared file
    pub fn get_shared_object(&self, token: &str) -> Result<Option<ObjectLocation>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let shares = read_txn.open_table(SHARES)?;
        let files = read_txn.open_table(FILES)?;
        let users = read_txn.open_table(USERS)?;

        let share: ShareRecord = match shares.get(token)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(None),
        };

        let file: FileRecord = match files.get(share.file_id.as_str())? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(None),
        };

        let owner: UserRecord = match users.get(file.owner_id.as_str())? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(None),
        };

        Ok(owner.bucket.map(|bucket| ObjectLocation {
            bucket,
            object: file.name,
        }))
    }

    /// Unexpired shares addressed to `email`
    pub fn list_shares_for(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SharedFile>, DatabaseError> {
        self.list_shares_in(RECIPIENT_SHARES, email, now)
    }

    /// Unexpired shares created by `email`
    pub fn list_shares_by(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SharedFile>, DatabaseError> {
        self.list_shares_in(SHARER_SHARES, email, now)
    }

    fn list_shares_in(
        &self,
        index: TableDefinition<'static, &'static str, &'static str>,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SharedFile>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index_table = read_txn.open_table(index)?;
        let shares = read_txn.open_table(SHARES)?;
        let files = read_txn.open_table(FILES)?;

        let mut result = Vec::new();
        for token in index_values(&index_table, &normalize_email(email))? {
            let share: ShareRecord = match shares.get(token.as_str())? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => continue,
            };
            if !share.is_valid_at(now) {
                continue;
            }
            if let Some(file) = lookup_file(&files, &share.file_id)? {
                result.push(SharedFile::new(&share, &file));
            }
        }

        result.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        Ok(result)
    }
}

fn lookup_file(
    files: &ReadOnlyTable<&'static str, &'static [u8]>,
    id: &str,
) -> Result<Option<FileRecord>, DatabaseError> {
    match files.get(id)? {
        Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
        None => Ok(None),
    }
}
