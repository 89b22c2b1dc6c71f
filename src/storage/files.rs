use redb::{ReadableTable, WriteTransaction};

use super::db::{index_values, remove_index_prefix, Database, DatabaseError};
use super::models::{FileRecord, ObjectLocation, PrivateObject, ShareRecord};
use super::tables::*;

/// Content attributes written on upload
#[derive(Debug, Clone)]
pub struct FileContent<'a> {
    pub checksum: &'a str,
    pub content_type: &'a str,
    pub size: u64,
}

impl Database {
    // ========================================================================
    // File operations
    // ========================================================================

    /// Insert a new file record. Fails with `Conflict` when the owner already has a file with
    /// this name or the private token is taken.
    pub fn insert_file(&self, file: &FileRecord) -> Result<(), DatabaseError> {
        debug_assert!(!file.id.is_empty(), "file id must not be empty");
        debug_assert!(!file.private_token.is_empty(), "private token must not be empty");

        let write_txn = self.begin_write()?;
        insert_file_in(&write_txn, file)?;
        write_txn.commit()?;
        Ok(())
    }

    /// Record an upload. A re-upload under an existing name replaces the content attributes
    /// but keeps the file id and private token; otherwise a new record is created with
    /// `private_token`.
    pub fn upsert_file(
        &self,
        owner_id: &str,
        name: &str,
        content: FileContent<'_>,
        private_token: &str,
    ) -> Result<FileRecord, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing_id: Option<String> = {
            let owner_table = write_txn.open_table(OWNER_FILES)?;
            let result = owner_table
                .get(index_key(owner_id, name).as_str())?
                .map(|v| v.value().to_string());
            result
        };

        let now = chrono::Utc::now();
        let record = match existing_id {
            Some(id) => {
                let mut table = write_txn.open_table(FILES)?;
                let existing: Option<FileRecord> = match table.get(id.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                let mut file = existing.ok_or_else(|| {
                    DatabaseError::Conflict(format!("dangling owner index entry for file {id}"))
                })?;
                file.checksum = content.checksum.to_string();
                file.content_type = content.content_type.to_string();
                file.size = content.size;
                file.updated_at = now;

                let data = rmp_serde::to_vec_named(&file)?;
                table.insert(id.as_str(), data.as_slice())?;
                file
            }
            None => {
                let file = FileRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    owner_id: owner_id.to_string(),
                    name: name.to_string(),
                    content_type: content.content_type.to_string(),
                    size: content.size,
                    checksum: content.checksum.to_string(),
                    private_token: private_token.to_string(),
                    created_at: now,
                    updated_at: now,
                };
                insert_file_in(&write_txn, &file)?;
                file
            }
        };

        write_txn.commit()?;
        Ok(record)
    }

    /// Get a file by its UUID
    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_file_by_owner_and_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let owner_table = read_txn.open_table(OWNER_FILES)?;

        let id = match owner_table.get(index_key(owner_id, name).as_str())? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let files_table = read_txn.open_table(FILES)?;
        match files_table.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// All files of one owner, ordered by name
    pub fn get_files_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let owner_table = read_txn.open_table(OWNER_FILES)?;
        let files_table = read_txn.open_table(FILES)?;

        let mut files = Vec::new();
        for file_id in index_values(&owner_table, owner_id)? {
            if let Some(data) = files_table.get(file_id.as_str())? {
                let file: FileRecord = rmp_serde::from_slice(data.value())?;
                files.push(file);
            }
        }

        Ok(files)
    }

    pub fn get_file_by_private_token(
        &self,
        token: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let token_table = read_txn.open_table(PRIVATE_TOKENS)?;

        let id = match token_table.get(token)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let files_table = read_txn.open_table(FILES)?;
        match files_table.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve a private token to (bucket, object, owner). `None` when the token is unknown
    /// or the owner has no bucket assigned.
    pub fn get_private_object(&self, token: &str) -> Result<Option<PrivateObject>, DatabaseError> {
        let file = match self.get_file_by_private_token(token)? {
            Some(file) => file,
            None => return Ok(None),
        };

        let bucket = self.get_user(&file.owner_id)?.and_then(|u| u.bucket);
        Ok(bucket.map(|bucket| PrivateObject {
            location: ObjectLocation {
                bucket,
                object: file.name,
            },
            owner_id: file.owner_id,
        }))
    }

    /// Delete a file by owner and name. Shares of the file are removed with it.
    pub fn delete_file(&self, owner_id: &str, name: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let file_id: Option<String> = {
            let owner_table = write_txn.open_table(OWNER_FILES)?;
            let result = owner_table
                .get(index_key(owner_id, name).as_str())?
                .map(|v| v.value().to_string());
            result
        };

        let deleted = match file_id {
            Some(id) => remove_file_in(&write_txn, &id)?,
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }
}

fn insert_file_in(write_txn: &WriteTransaction, file: &FileRecord) -> Result<(), DatabaseError> {
    let owner_key = index_key(&file.owner_id, &file.name);

    let mut owner_table = write_txn.open_table(OWNER_FILES)?;
    if owner_table.get(owner_key.as_str())?.is_some() {
        return Err(DatabaseError::Conflict(format!(
            "file '{}' already exists for owner",
            file.name
        )));
    }

    let mut token_table = write_txn.open_table(PRIVATE_TOKENS)?;
    if token_table.get(file.private_token.as_str())?.is_some() {
        return Err(DatabaseError::Conflict(
            "private download token already in use".to_string(),
        ));
    }

    let mut table = write_txn.open_table(FILES)?;
    if table.get(file.id.as_str())?.is_some() {
        return Err(DatabaseError::Conflict(format!(
            "file id {} already exists",
            file.id
        )));
    }

    let data = rmp_serde::to_vec_named(file)?;
    table.insert(file.id.as_str(), data.as_slice())?;
    owner_table.insert(owner_key.as_str(), file.id.as_str())?;
    token_table.insert(file.private_token.as_str(), file.id.as_str())?;
    Ok(())
}

/// Remove a file record, its index entries, and every share that references it.
pub(crate) fn remove_file_in(
    write_txn: &WriteTransaction,
    file_id: &str,
) -> Result<bool, DatabaseError> {
    let file: Option<FileRecord> = {
        let table = write_txn.open_table(FILES)?;
        let result = match table.get(file_id)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        result
    };

    let Some(file) = file else {
        return Ok(false);
    };

    {
        let mut table = write_txn.open_table(FILES)?;
        table.remove(file_id)?;
    }
    {
        let mut owner_table = write_txn.open_table(OWNER_FILES)?;
        owner_table.remove(index_key(&file.owner_id, &file.name).as_str())?;
    }
    {
        let mut token_table = write_txn.open_table(PRIVATE_TOKENS)?;
        token_table.remove(file.private_token.as_str())?;
    }

    // Cascade to shares
    let share_tokens = {
        let file_shares = write_txn.open_table(FILE_SHARES)?;
        index_values(&file_shares, file_id)?
    };

    for token in share_tokens {
        let share: Option<ShareRecord> = {
            let mut shares = write_txn.open_table(SHARES)?;
            let removed = shares.remove(token.as_str())?;
            let result = match removed {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            result
        };

        if let Some(share) = share {
            let mut recipients = write_txn.open_table(RECIPIENT_SHARES)?;
            recipients.remove(index_key(&share.shared_for, &share.token).as_str())?;
            let mut sharers = write_txn.open_table(SHARER_SHARES)?;
            sharers.remove(index_key(&share.shared_by, &share.token).as_str())?;
        }
    }

    {
        let mut file_shares = write_txn.open_table(FILE_SHARES)?;
        remove_index_prefix(&mut file_shares, file_id)?;
    }

    Ok(true)
}
