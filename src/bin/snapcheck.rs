use anyhow::Result;
use clap::{Parser, Subcommand};
use snapbooth::config::{redact, SnapboothConfig};
use snapbooth::storage::{BucketStore, GallerySource, UploadRequest, UploadSink};

/// 1x1 transparent PNG used for the upload probe
const PROBE_IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Check that the booth's storage is configured and reachable.
#[derive(Parser, Debug)]
#[command(name = "snapcheck")]
#[command(about = "Diagnose snapbooth storage configuration")]
struct Args {
    #[command(subcommand)]
    command: Option<Check>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    /// Show which storage settings are present
    Env,
    /// Make sure the bucket exists and can be listed
    Bucket,
    /// Store a probe image, then remove it when allowed
    Upload,
    /// List the newest gallery entries
    Gallery,
    /// Run every check
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("snapbooth=warn")),
        )
        .init();

    let check = Args::parse().command.unwrap_or(Check::All);

    let config = match SnapboothConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Configuration could not be loaded: {}", e);
            return Ok(());
        }
    };
    let store = BucketStore::new(&config.storage);

    if matches!(check, Check::Env | Check::All) {
        check_env(&config);
    }
    if matches!(check, Check::Bucket | Check::All) {
        check_bucket(&store).await;
    }
    if matches!(check, Check::Upload | Check::All) {
        check_upload(&store).await;
    }
    if matches!(check, Check::Gallery | Check::All) {
        check_gallery(&store).await;
    }

    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}

fn check_env(config: &SnapboothConfig) {
    let storage = &config.storage;
    println!("Environment:");
    println!("  {} SUPABASE_URL: {}", mark(!storage.endpoint.is_empty()), storage.endpoint);
    for (name, value) in [
        ("SUPABASE_ANON_KEY", &storage.anon_key),
        ("SUPABASE_SERVICE_ROLE_KEY", &storage.service_role_key),
        ("CLEANUP_SECRET", &config.server.cleanup_secret),
    ] {
        match value {
            Some(secret) => println!("  ✓ {}: {}", name, redact(secret)),
            None => println!("  ✗ {}: missing", name),
        }
    }
    println!("  ✓ SUPABASE_BUCKET: {}", storage.bucket);
    println!();
}

async fn check_bucket(store: &BucketStore) {
    println!("Bucket \"{}\":", store.bucket());
    match store.ensure_bucket().await {
        Ok(()) => println!("  ✓ Bucket available at {}", store.root().display()),
        Err(e) => {
            println!("  ✗ Bucket unavailable: {}", e);
            println!();
            return;
        }
    }
    match store.list(5).await {
        Ok(entries) => {
            println!("  ✓ Found {} files in bucket", entries.len());
            for entry in entries.iter().take(3) {
                println!("    - {} ({})", entry.filename, entry.uploaded_at.to_rfc3339());
            }
        }
        Err(e) => println!("  ✗ Error listing files: {}", e),
    }
    println!();
}

async fn check_upload(store: &BucketStore) {
    println!("Upload:");
    let filename = format!("test-{}.png", uuid::Uuid::new_v4());
    let request = UploadRequest::new(PROBE_IMAGE).with_filename(filename.as_str());

    match store.upload(request).await {
        Ok(receipt) => {
            println!("  ✓ Upload test successful");
            println!("    File path: {}", receipt.path);
            println!("    Public URL: {}", receipt.url);
            match store.delete_object(&receipt.filename).await {
                Ok(_) => println!("  ✓ Test file cleaned up"),
                Err(e) => println!("  ✗ Test file left behind: {}", e),
            }
        }
        Err(e) => println!("  ✗ Upload test failed: {}", e),
    }
    println!();
}

async fn check_gallery(store: &BucketStore) {
    println!("Gallery:");
    match store.list_entries().await {
        Ok(entries) => {
            println!("  ✓ Gallery lists {} photos", entries.len());
            if let Some(newest) = entries.first() {
                println!("    Newest: {}", newest.url);
            }
        }
        Err(e) => println!("  ✗ Gallery listing failed: {}", e),
    }
    println!();
}
