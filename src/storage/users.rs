use redb::ReadableTable;

use super::db::{index_values, Database, DatabaseError};
use super::files::remove_file_in;
use super::models::{normalize_email, UserRecord};
use super::tables::*;

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Create the user on first login, or refresh email and display name on later logins.
    /// The bucket assignment and creation time are preserved.
    pub fn upsert_user(
        &self,
        id: &str,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<UserRecord, DatabaseError> {
        debug_assert!(!id.is_empty(), "user id must not be empty");

        let write_txn = self.begin_write()?;
        let user = {
            let mut table = write_txn.open_table(USERS)?;
            let existing: Option<UserRecord> = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            let user = match existing {
                Some(mut user) => {
                    user.email = normalize_email(email);
                    user.display_name = display_name.map(|s| s.to_string());
                    user
                }
                None => UserRecord {
                    id: id.to_string(),
                    email: normalize_email(email),
                    display_name: display_name.map(|s| s.to_string()),
                    bucket: None,
                    created_at: chrono::Utc::now(),
                },
            };

            let data = rmp_serde::to_vec_named(&user)?;
            table.insert(id, data.as_slice())?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Record `bucket` as the user's bucket unless one is already assigned, and return the
    /// effective bucket name. Returns `None` when the user does not exist.
    pub fn assign_bucket(&self, id: &str, bucket: &str) -> Result<Option<String>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let assigned = {
            let mut table = write_txn.open_table(USERS)?;
            let existing: Option<UserRecord> = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match existing {
                Some(UserRecord {
                    bucket: Some(current),
                    ..
                }) => Some(current),
                Some(mut user) => {
                    user.bucket = Some(bucket.to_string());
                    let data = rmp_serde::to_vec_named(&user)?;
                    table.insert(id, data.as_slice())?;
                    Some(bucket.to_string())
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(assigned)
    }

    /// Delete a user together with their files and every share of those files.
    pub fn delete_user(&self, id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let user: Option<UserRecord> = {
            let table = write_txn.open_table(USERS)?;
            let result = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            result
        };

        if user.is_some() {
            let file_ids = {
                let owner_table = write_txn.open_table(OWNER_FILES)?;
                index_values(&owner_table, id)?
            };
            for file_id in file_ids {
                remove_file_in(&write_txn, &file_id)?;
            }

            let mut table = write_txn.open_table(USERS)?;
            table.remove(id)?;
        }

        write_txn.commit()?;
        Ok(user)
    }
}
