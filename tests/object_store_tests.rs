use bytes::Bytes;
use chrono::{Duration, Utc};
use file_share::object_store::{
    BucketCreation, ByteStream, LocalStore, ObjectStore, ObjectStoreError,
};

const KEY: &[u8] = b"test-signing-key";

fn test_store() -> (tempfile::TempDir, LocalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path(), "http://localhost:3000", KEY).unwrap();
    (dir, store)
}

fn body(chunks: &[&'static str]) -> ByteStream {
    let items: Vec<std::io::Result<Bytes>> =
        chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
    Box::pin(futures::stream::iter(items))
}

#[tokio::test]
async fn test_create_bucket_is_idempotent() {
    let (_dir, store) = test_store();

    assert_eq!(
        store.create_bucket_if_absent("bucket-a").await.unwrap(),
        BucketCreation::Created
    );
    assert_eq!(
        store.create_bucket_if_absent("bucket-a").await.unwrap(),
        BucketCreation::AlreadyExists
    );
}

#[tokio::test]
async fn test_put_and_list() {
    let (_dir, store) = test_store();
    store.create_bucket_if_absent("bucket-a").await.unwrap();

    let info = store
        .put_object("bucket-a", "hello.txt", "text/plain", body(&["hello ", "world"]))
        .await
        .unwrap();
    assert_eq!(info.size, 11);
    assert_eq!(info.content_type, "text/plain");
    // sha256("hello world")
    assert_eq!(
        info.checksum,
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );

    let snapshot = store.list_objects("bucket-a").await.unwrap();
    assert_eq!(snapshot.name, "bucket-a");
    assert_eq!(snapshot.objects.len(), 1);
    assert_eq!(snapshot.objects[0].name, "hello.txt");
    assert_eq!(snapshot.objects[0].checksum, info.checksum);
    assert_eq!(snapshot.objects[0].size, 11);
}

#[tokio::test]
async fn test_put_into_missing_bucket_fails() {
    let (_dir, store) = test_store();

    let result = store
        .put_object("nope", "a.txt", "text/plain", body(&["x"]))
        .await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_failed_stream_leaves_no_object() {
    let (_dir, store) = test_store();
    store.create_bucket_if_absent("bucket-a").await.unwrap();

    let items: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"partial")),
        Err(std::io::Error::other("client went away")),
    ];
    let result = store
        .put_object(
            "bucket-a",
            "broken.bin",
            "application/octet-stream",
            Box::pin(futures::stream::iter(items)),
        )
        .await;
    assert!(result.is_err());

    let snapshot = store.list_objects("bucket-a").await.unwrap();
    assert!(snapshot.objects.is_empty());
}

#[tokio::test]
async fn test_invalid_names_rejected() {
    let (_dir, store) = test_store();
    store.create_bucket_if_absent("bucket-a").await.unwrap();

    for name in ["../escape", "a/b", "..", ""] {
        let result = store
            .put_object("bucket-a", name, "text/plain", body(&["x"]))
            .await;
        assert!(
            matches!(result, Err(ObjectStoreError::InvalidName(_))),
            "{name:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_delete_object_nonexistent() {
    let (_dir, store) = test_store();
    store.create_bucket_if_absent("bucket-a").await.unwrap();

    // Deleting an absent object should not error
    store.delete_object("bucket-a", "missing.txt").await.unwrap();
}

#[tokio::test]
async fn test_delete_bucket_removes_objects() {
    let (_dir, store) = test_store();
    store.create_bucket_if_absent("bucket-a").await.unwrap();
    store
        .put_object("bucket-a", "a.txt", "text/plain", body(&["a"]))
        .await
        .unwrap();

    store.delete_bucket("bucket-a").await.unwrap();
    assert!(matches!(
        store.list_objects("bucket-a").await,
        Err(ObjectStoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_signed_url_verifies() {
    let (_dir, store) = test_store();
    let now = Utc::now();

    let url = store
        .signed_url("bucket-a", "my report.pdf", now + Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(url.path(), "/_local/bucket-a/my%20report.pdf");

    let params: std::collections::HashMap<String, String> =
        url.query_pairs().into_owned().collect();
    let expires: i64 = params["expires"].parse().unwrap();
    let signature = &params["signature"];

    assert!(store.verify_signature("bucket-a", "my report.pdf", expires, signature, now));
    assert!(!store.verify_signature("bucket-a", "other.pdf", expires, signature, now));
    assert!(!store.verify_signature("bucket-a", "my report.pdf", expires + 1, signature, now));
    assert!(!store.verify_signature(
        "bucket-a",
        "my report.pdf",
        expires,
        signature,
        now + Duration::seconds(120)
    ));
    assert!(!store.verify_signature("bucket-a", "my report.pdf", expires, "zz", now));
}

#[tokio::test]
async fn test_signature_bound_to_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path(), "http://localhost:3000", KEY).unwrap();
    let other = LocalStore::new(dir.path(), "http://localhost:3000", b"another-key").unwrap();
    let now = Utc::now();

    let url = store
        .signed_url("bucket-a", "a.txt", now + Duration::seconds(60))
        .await
        .unwrap();
    let params: std::collections::HashMap<String, String> =
        url.query_pairs().into_owned().collect();
    let expires: i64 = params["expires"].parse().unwrap();

    assert!(!other.verify_signature("bucket-a", "a.txt", expires, &params["signature"], now));
}

#[tokio::test]
async fn test_open_object() {
    let (_dir, store) = test_store();
    store.create_bucket_if_absent("bucket-a").await.unwrap();
    store
        .put_object("bucket-a", "a.txt", "text/plain", body(&["abc"]))
        .await
        .unwrap();

    let (_file, len) = store.open_object("bucket-a", "a.txt").await.unwrap();
    assert_eq!(len, 3);

    assert!(matches!(
        store.open_object("bucket-a", "b.txt").await,
        Err(ObjectStoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_listing_uses_sidecar_and_detects_rewrites() {
    let (dir, store) = test_store();
    store.create_bucket_if_absent("bucket-a").await.unwrap();
    store
        .put_object("bucket-a", "notes.bin", "application/x-notes", body(&["hello world"]))
        .await
        .unwrap();

    let sidecar = dir.path().join(".meta").join("bucket-a").join("notes.bin");
    assert!(sidecar.exists());

    // The upload's content type survives only through the sidecar; a guess would differ
    let listed = store.list_objects("bucket-a").await.unwrap();
    assert_eq!(listed.objects[0].content_type, "application/x-notes");
    assert_eq!(
        listed.objects[0].checksum,
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );

    // Rewritten out-of-band: the stale sidecar is replaced
    std::fs::write(dir.path().join("bucket-a").join("notes.bin"), b"changed").unwrap();
    let listed = store.list_objects("bucket-a").await.unwrap();
    assert_eq!(listed.objects[0].size, 7);
    assert_eq!(
        listed.objects[0].checksum,
        hex::encode(ring::digest::digest(&ring::digest::SHA256, b"changed"))
    );

    store.delete_object("bucket-a", "notes.bin").await.unwrap();
    assert!(!sidecar.exists());
}

#[tokio::test]
async fn test_listing_hashes_objects_written_out_of_band() {
    let (dir, store) = test_store();
    store.create_bucket_if_absent("bucket-a").await.unwrap();
    std::fs::write(dir.path().join("bucket-a").join("dropped.txt"), b"hello world").unwrap();

    let listed = store.list_objects("bucket-a").await.unwrap();
    assert_eq!(listed.objects.len(), 1);
    assert_eq!(listed.objects[0].content_type, "text/plain");
    assert_eq!(
        listed.objects[0].checksum,
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
    assert!(dir
        .path()
        .join(".meta")
        .join("bucket-a")
        .join("dropped.txt")
        .exists());
}
