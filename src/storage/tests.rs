use super::*;
use crate::config::StorageConfig;
use crate::error::{StorageError, UploadError};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01";

fn create_test_config(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        endpoint: "https://demo.supabase.co/".to_string(),
        anon_key: Some("anon".to_string()),
        service_role_key: Some("service".to_string()),
        bucket: "photos".to_string(),
        path: dir.path().to_string_lossy().to_string(),
        max_upload_bytes: 1024,
        list_limit: 100,
    }
}

async fn create_store(dir: &TempDir) -> BucketStore {
    let store = BucketStore::new(&create_test_config(dir));
    store.ensure_bucket().await.unwrap();
    store
}

fn png_uri() -> String {
    format!("data:image/png;base64,{}", BASE64_STANDARD.encode(PNG_BYTES))
}

fn set_age(store: &BucketStore, name: &str, seconds_ago: u64) {
    let file = std::fs::File::options()
        .write(true)
        .open(store.root().join(name))
        .unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(seconds_ago))
        .unwrap();
}

#[tokio::test]
async fn test_upload_returns_public_url() {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir).await;

    let receipt = store
        .upload(UploadRequest::new(png_uri()).with_filename("winner.png"))
        .await
        .unwrap();

    assert_eq!(receipt.filename, "winner.png");
    assert_eq!(receipt.path, "winner.png");
    assert_eq!(receipt.size, PNG_BYTES.len() as u64);
    assert_eq!(
        receipt.url,
        "https://demo.supabase.co/storage/v1/object/public/photos/winner.png"
    );
    assert_eq!(store.read_object("winner.png").await.unwrap(), PNG_BYTES);
}

#[tokio::test]
async fn test_upload_generates_timestamped_name() {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir).await;

    let receipt = store.upload(UploadRequest::new(png_uri())).await.unwrap();

    assert!(receipt.filename.starts_with("photo-"));
    assert!(receipt.filename.ends_with("Z.png"));
    assert!(!receipt.filename.contains(':'));
}

#[tokio::test]
async fn test_upload_never_overwrites() {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir).await;
    let request = UploadRequest::new(png_uri()).with_filename("same.png");

    store.upload(request.clone()).await.unwrap();
    let err = store.upload(request).await.unwrap_err();

    assert!(matches!(
        err,
        UploadError::Backend(StorageError::AlreadyExists { ref name }) if name == "same.png"
    ));
}

#[tokio::test]
async fn test_upload_validation_errors_are_distinct() {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir).await;

    let oversized = format!(
        "data:image/png;base64,{}",
        BASE64_STANDARD.encode([PNG_BYTES, &[0u8; 2048][..]].concat())
    );

    assert!(matches!(
        store.upload(UploadRequest::new("")).await,
        Err(UploadError::MissingImage)
    ));
    assert!(matches!(
        store
            .upload(UploadRequest::new("data:image/bmp;base64,Qk0="))
            .await,
        Err(UploadError::UnsupportedMime { .. })
    ));
    assert!(matches!(
        store.upload(UploadRequest::new(oversized)).await,
        Err(UploadError::TooLarge { limit: 1024, .. })
    ));
    assert!(matches!(
        store
            .upload(UploadRequest::new(png_uri()).with_filename("../escape.png"))
            .await,
        Err(UploadError::InvalidFilename { .. })
    ));
    assert!(store.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_is_newest_first_and_capped() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.list_limit = 2;
    let store = BucketStore::new(&config);
    store.ensure_bucket().await.unwrap();

    for (name, age) in [("old.png", 300), ("newest.png", 10), ("middle.png", 60)] {
        store.put_object(name, PNG_BYTES).await.unwrap();
        set_age(&store, name, age);
    }
    std::fs::write(store.root().join(".DS_Store"), b"junk").unwrap();

    let all = store.list(10).await.unwrap();
    let names: Vec<&str> = all.iter().map(|e| e.filename.as_str()).collect();
    assert_eq!(names, vec!["newest.png", "middle.png", "old.png"]);
    assert_eq!(all[0].size, PNG_BYTES.len() as u64);
    assert!(all[0].url.ends_with("/photos/newest.png"));

    let capped = store.list_entries().await.unwrap();
    assert_eq!(capped.len(), 2);
}

#[tokio::test]
async fn test_gallery_entry_serializes_camel_case() {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir).await;
    store.put_object("a.png", PNG_BYTES).await.unwrap();

    let entries = store.list_entries().await.unwrap();
    let json = serde_json::to_value(&entries[0]).unwrap();
    assert!(json.get("uploadedAt").is_some());
    assert_eq!(json["filename"], "a.png");
}

#[tokio::test]
async fn test_missing_bucket_is_reported() {
    let dir = TempDir::new().unwrap();
    let store = BucketStore::new(&create_test_config(&dir));

    assert!(matches!(
        store.list(10).await,
        Err(StorageError::BucketUnavailable { .. })
    ));
    assert!(matches!(
        store.put_object("a.png", PNG_BYTES).await,
        Err(StorageError::BucketUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_prune_keeps_only_latest() {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir).await;

    for (name, age) in [("a.png", 30), ("b.png", 20), ("c.png", 10)] {
        store.put_object(name, PNG_BYTES).await.unwrap();
        set_age(&store, name, age);
    }

    let result = store.prune_to_latest().await.unwrap();
    assert_eq!(result.kept.as_deref(), Some("c.png"));
    assert_eq!(result.deleted, vec!["b.png".to_string(), "a.png".to_string()]);

    let remaining = store.list(10).await.unwrap();
    assert_eq!(remaining.len(), 1);

    // Nothing left to delete
    let again = store.prune_to_latest().await.unwrap();
    assert!(again.deleted.is_empty());
}

#[tokio::test]
async fn test_destructive_operations_need_privilege() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.service_role_key = None;
    let store = BucketStore::new(&config);
    store.ensure_bucket().await.unwrap();
    store.put_object("a.png", PNG_BYTES).await.unwrap();

    assert!(!store.is_privileged());
    assert!(matches!(
        store.prune_to_latest().await,
        Err(StorageError::Unprivileged)
    ));
    assert!(matches!(
        store.delete_object("a.png").await,
        Err(StorageError::Unprivileged)
    ));
}

#[tokio::test]
async fn test_object_names_stay_inside_bucket() {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir).await;

    for name in ["../outside.png", "nested/a.png", "/abs.png", ".hidden", ""] {
        assert!(
            matches!(
                store.put_object(name, PNG_BYTES).await,
                Err(StorageError::InvalidName { .. })
            ),
            "{name} should be rejected"
        );
    }
    assert!(matches!(
        store.read_object("missing.png").await,
        Err(StorageError::NotFound { .. })
    ));
}
