use chrono::{Duration, Utc};
use file_share::storage::models::{FileRecord, ObjectLocation, ShareRecord};
use file_share::storage::{Database, FileContent};

fn test_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    (dir, db)
}

fn sample_file(id: &str, owner: &str, name: &str) -> FileRecord {
    let now = Utc::now();
    FileRecord {
        id: id.to_string(),
        owner_id: owner.to_string(),
        name: name.to_string(),
        content_type: "application/pdf".to_string(),
        size: 1024,
        checksum: "abc123".to_string(),
        private_token: format!("private-{id}"),
        created_at: now,
        updated_at: now,
    }
}

fn sample_share(token: &str, file_id: &str, by: &str, to: &str, hours: i64) -> ShareRecord {
    let now = Utc::now();
    ShareRecord {
        token: token.to_string(),
        file_id: file_id.to_string(),
        shared_by: by.to_string(),
        shared_for: to.to_string(),
        expires_at: now + Duration::hours(hours),
        created_at: now,
    }
}

fn with_owner(db: &Database, id: &str, email: &str) {
    db.upsert_user(id, email, None).unwrap();
    db.assign_bucket(id, &format!("fileshare-{id}")).unwrap();
}

#[test]
fn test_upsert_user_preserves_bucket() {
    let (_dir, db) = test_db();

    let created = db.upsert_user("u1", " Alice@Example.com ", Some("Alice")).unwrap();
    assert_eq!(created.email, "alice@example.com");
    assert_eq!(created.bucket, None);

    assert_eq!(
        db.assign_bucket("u1", "fileshare-u1").unwrap().as_deref(),
        Some("fileshare-u1")
    );

    let updated = db.upsert_user("u1", "alice@example.com", Some("Alice B")).unwrap();
    assert_eq!(updated.bucket.as_deref(), Some("fileshare-u1"));
    assert_eq!(updated.display_name.as_deref(), Some("Alice B"));
    assert_eq!(updated.created_at, created.created_at);
}

#[test]
fn test_assign_bucket_keeps_first_assignment() {
    let (_dir, db) = test_db();
    db.upsert_user("u1", "a@example.com", None).unwrap();

    db.assign_bucket("u1", "first").unwrap();
    assert_eq!(db.assign_bucket("u1", "second").unwrap().as_deref(), Some("first"));
    assert_eq!(db.assign_bucket("missing", "x").unwrap(), None);
}

#[test]
fn test_insert_and_get_file() {
    let (_dir, db) = test_db();
    db.insert_file(&sample_file("f1", "u1", "report.pdf")).unwrap();

    let by_id = db.get_file("f1").unwrap().expect("file should exist");
    assert_eq!(by_id.name, "report.pdf");

    let by_name = db
        .get_file_by_owner_and_name("u1", "report.pdf")
        .unwrap()
        .expect("file should exist");
    assert_eq!(by_name.id, "f1");

    let by_token = db
        .get_file_by_private_token("private-f1")
        .unwrap()
        .expect("file should exist");
    assert_eq!(by_token.id, "f1");

    assert!(db.get_file_by_owner_and_name("u2", "report.pdf").unwrap().is_none());
}

#[test]
fn test_insert_file_duplicate_name_conflicts() {
    let (_dir, db) = test_db();
    db.insert_file(&sample_file("f1", "u1", "report.pdf")).unwrap();

    let err = db
        .insert_file(&sample_file("f2", "u1", "report.pdf"))
        .unwrap_err();
    assert!(err.is_conflict());

    // Same name under another owner is fine
    db.insert_file(&sample_file("f3", "u2", "report.pdf")).unwrap();
}

#[test]
fn test_insert_file_duplicate_private_token_conflicts() {
    let (_dir, db) = test_db();
    db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();

    let mut clash = sample_file("f2", "u1", "b.txt");
    clash.private_token = "private-f1".to_string();
    assert!(db.insert_file(&clash).unwrap_err().is_conflict());
    assert!(db.get_file("f2").unwrap().is_none());
}

#[test]
fn test_upsert_file_keeps_identity_on_reupload() {
    let (_dir, db) = test_db();

    let first = db
        .upsert_file(
            "u1",
            "notes.txt",
            FileContent {
                checksum: "one",
                content_type: "text/plain",
                size: 3,
            },
            "token-1",
        )
        .unwrap();

    let second = db
        .upsert_file(
            "u1",
            "notes.txt",
            FileContent {
                checksum: "two",
                content_type: "text/plain",
                size: 5,
            },
            "token-2",
        )
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.private_token, "token-1");
    assert_eq!(second.checksum, "two");
    assert_eq!(second.size, 5);
    assert_eq!(db.get_files_by_owner("u1").unwrap().len(), 1);
}

#[test]
fn test_get_files_by_owner() {
    let (_dir, db) = test_db();
    db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();
    db.insert_file(&sample_file("f2", "u1", "b.txt")).unwrap();
    db.insert_file(&sample_file("f3", "u2", "c.txt")).unwrap();

    let mut names: Vec<String> = db
        .get_files_by_owner("u1")
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
}

#[test]
fn test_private_object_resolves_bucket() {
    let (_dir, db) = test_db();
    with_owner(&db, "u1", "a@example.com");
    db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();

    let object = db
        .get_private_object("private-f1")
        .unwrap()
        .expect("token should resolve");
    assert_eq!(object.owner_id, "u1");
    assert_eq!(
        object.location,
        ObjectLocation {
            bucket: "fileshare-u1".to_string(),
            object: "a.txt".to_string(),
        }
    );

    assert!(db.get_private_object("unknown").unwrap().is_none());
}

#[test]
fn test_insert_share_and_resolve() {
    let (_dir, db) = test_db();
    with_owner(&db, "u1", "a@example.com");
    db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();

    db.insert_share(&sample_share("s1", "f1", "a@example.com", "b@example.com", 1))
        .unwrap();

    let location = db.get_shared_object("s1").unwrap().expect("share should resolve");
    assert_eq!(location.bucket, "fileshare-u1");
    assert_eq!(location.object, "a.txt");
    assert!(db.get_share_expiry("s1").unwrap().is_some());
    assert!(db.get_share_expiry("s2").unwrap().is_none());
}

#[test]
fn test_insert_share_conflicts() {
    let (_dir, db) = test_db();
    db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();
    db.insert_share(&sample_share("s1", "f1", "a@example.com", "b@example.com", 1))
        .unwrap();

    let duplicate = db
        .insert_share(&sample_share("s1", "f1", "a@example.com", "c@example.com", 1))
        .unwrap_err();
    assert!(duplicate.is_conflict());

    let orphan = db
        .insert_share(&sample_share("s2", "missing", "a@example.com", "b@example.com", 1))
        .unwrap_err();
    assert!(orphan.is_conflict());
}

#[test]
fn test_share_listings_filter_expired() {
    let (_dir, db) = test_db();
    db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();
    db.insert_file(&sample_file("f2", "u1", "b.txt")).unwrap();

    db.insert_share(&sample_share("live", "f1", "a@example.com", "b@example.com", 2))
        .unwrap();
    db.insert_share(&sample_share("dead", "f2", "a@example.com", "b@example.com", -1))
        .unwrap();
    db.insert_share(&sample_share("other", "f2", "a@example.com", "c@example.com", 1))
        .unwrap();

    let received = db.list_shares_for("B@Example.com", Utc::now()).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].sharing_token, "live");
    assert_eq!(received[0].file_name, "a.txt");
    assert_eq!(received[0].checksum, "abc123");

    let sent = db.list_shares_by("a@example.com", Utc::now()).unwrap();
    let mut tokens: Vec<&str> = sent.iter().map(|s| s.sharing_token.as_str()).collect();
    tokens.sort();
    assert_eq!(tokens, vec!["live", "other"]);
}

#[test]
fn test_delete_file_cascades_shares() {
    let (_dir, db) = test_db();
    with_owner(&db, "u1", "a@example.com");
    db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();
    db.insert_share(&sample_share("s1", "f1", "a@example.com", "b@example.com", 1))
        .unwrap();

    assert!(db.delete_file("u1", "a.txt").unwrap());
    assert!(db.get_file("f1").unwrap().is_none());
    assert!(db.get_file_by_private_token("private-f1").unwrap().is_none());
    assert!(db.get_share("s1").unwrap().is_none());
    assert!(db.list_shares_for("b@example.com", Utc::now()).unwrap().is_empty());

    assert!(!db.delete_file("u1", "a.txt").unwrap());
}

#[test]
fn test_delete_user_cascades_files() {
    let (_dir, db) = test_db();
    with_owner(&db, "u1", "a@example.com");
    db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();
    db.insert_file(&sample_file("f2", "u2", "b.txt")).unwrap();
    db.insert_share(&sample_share("s1", "f1", "a@example.com", "b@example.com", 1))
        .unwrap();

    let deleted = db.delete_user("u1").unwrap().expect("user should exist");
    assert_eq!(deleted.email, "a@example.com");

    assert!(db.get_user("u1").unwrap().is_none());
    assert!(db.get_files_by_owner("u1").unwrap().is_empty());
    assert!(db.get_share("s1").unwrap().is_none());
    assert!(db.get_file("f2").unwrap().is_some());

    assert!(db.delete_user("u1").unwrap().is_none());
}

#[test]
fn test_database_reopen_persists() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.insert_file(&sample_file("f1", "u1", "a.txt")).unwrap();
    }
    let db = Database::open(dir.path()).unwrap();
    assert!(db.get_file("f1").unwrap().is_some());
}
