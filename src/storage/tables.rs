use redb::TableDefinition;

/// User records: user id -> UserRecord (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// File records: file uuid -> FileRecord (msgpack)
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Unique (owner, file name) index: owner_key(owner, name) -> file uuid
pub const OWNER_FILES: TableDefinition<&str, &str> = TableDefinition::new("owner_files");

/// Unique private download token index: token -> file uuid
pub const PRIVATE_TOKENS: TableDefinition<&str, &str> = TableDefinition::new("private_tokens");

/// Share records: sharing token -> ShareRecord (msgpack)
pub const SHARES: TableDefinition<&str, &[u8]> = TableDefinition::new("shares");

/// Recipient index: index_key(recipient email, token) -> token
pub const RECIPIENT_SHARES: TableDefinition<&str, &str> = TableDefinition::new("recipient_shares");

/// Sharer index: index_key(sharer email, token) -> token
pub const SHARER_SHARES: TableDefinition<&str, &str> = TableDefinition::new("sharer_shares");

/// File index for cascading deletes: index_key(file uuid, token) -> token
pub const FILE_SHARES: TableDefinition<&str, &str> = TableDefinition::new("file_shares");

const SEPARATOR: char = '\u{0}';

/// Composite key for the secondary indexes. The NUL separator cannot appear in ids, emails or
/// accepted file names, so a `prefix(a)` range scan yields exactly the entries for `a`.
pub fn index_key(a: &str, b: &str) -> String {
    format!("{a}{SEPARATOR}{b}")
}

/// Range-scan prefix matching every `index_key(a, _)`.
pub fn prefix(a: &str) -> String {
    format!("{a}{SEPARATOR}")
}
