use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Legacy environment variable names recognised on top of the `SNAPBOOTH__` overlay
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("SUPABASE_URL", "storage.endpoint"),
    ("SUPABASE_ANON_KEY", "storage.anon_key"),
    ("SUPABASE_SERVICE_ROLE_KEY", "storage.service_role_key"),
    ("SUPABASE_BUCKET", "storage.bucket"),
    ("CLEANUP_SECRET", "server.cleanup_secret"),
    ("WALLET_PROJECT_ID", "wallet.project_id"),
    ("COIN_API_KEY", "wallet.coin_api_key"),
];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SnapboothConfig {
    pub detection: DetectionConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub system: SystemConfig,
}

/// How a happiness reading turns into a capture
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPolicy {
    /// Threshold crossing starts a countdown that must be held to capture
    Countdown,
    /// Threshold crossing captures on the same tick
    Instant,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    /// Face estimation poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Happiness score at or above which the trigger fires
    #[serde(default = "default_happiness_threshold")]
    pub happiness_threshold: f32,

    /// Countdown or instant capture
    #[serde(default = "default_trigger_policy")]
    pub trigger_policy: TriggerPolicy,

    /// Countdown start value
    #[serde(default = "default_countdown_ticks")]
    pub countdown_ticks: u32,

    /// Countdown tick length in milliseconds
    #[serde(default = "default_countdown_tick_ms")]
    pub countdown_tick_ms: u64,

    /// Consecutive low or faceless samples needed to cancel a countdown
    #[serde(default = "default_cancel_after_low_samples")]
    pub cancel_after_low_samples: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Seconds a session stays armed before expiring
    #[serde(default = "default_session_timeout_seconds")]
    pub timeout_seconds: u32,

    /// Seconds the captured still stays on screen before the booth resets
    #[serde(default = "default_review_seconds")]
    pub review_seconds: u64,

    /// Seconds to wait for an upload before giving up
    #[serde(default = "default_upload_timeout_seconds")]
    pub upload_timeout_seconds: u64,

    /// Requested camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub camera_resolution: (u32, u32),

    /// JPEG quality used when encoding the captured still
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Directory for stills saved with the download key
    #[serde(default = "default_download_path")]
    pub download_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Public endpoint of the storage service
    #[serde(default = "default_storage_endpoint")]
    pub endpoint: String,

    /// Anonymous API key
    #[serde(default)]
    pub anon_key: Option<String>,

    /// Privileged API key, required for cleanup
    #[serde(default)]
    pub service_role_key: Option<String>,

    /// Bucket holding the photos
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Local root directory backing the buckets
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Maximum decoded upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Maximum number of objects returned by a gallery listing
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Development mode allows any origin
    #[serde(default)]
    pub development: bool,

    /// Maximum request body size in bytes
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,

    /// Shared secret for the cleanup endpoint
    #[serde(default)]
    pub cleanup_secret: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GalleryConfig {
    /// Seconds between gallery refreshes while visible
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,

    /// Timezone used to group photos by day
    #[serde(default = "default_gallery_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WalletConfig {
    /// Wallet connection project identifier
    #[serde(default)]
    pub project_id: Option<String>,

    /// Coin minting API key
    #[serde(default)]
    pub coin_api_key: Option<String>,

    /// Refuse to start a session until a wallet is connected
    #[serde(default)]
    pub require_connection: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl SnapboothConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("snapbooth.toml")
    }

    /// Load configuration from a specific file path and the process environment
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::load_from_sources(Some(path.as_ref()), &vars)
    }

    /// Load configuration from an optional file and an explicit environment map
    pub fn load_from_sources(
        path: Option<&Path>,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("detection.poll_interval_ms", default_poll_interval_ms())?
            .set_default(
                "detection.happiness_threshold",
                default_happiness_threshold() as f64,
            )?
            .set_default("detection.trigger_policy", "countdown")?
            .set_default("detection.countdown_ticks", default_countdown_ticks())?
            .set_default("detection.countdown_tick_ms", default_countdown_tick_ms())?
            .set_default(
                "detection.cancel_after_low_samples",
                default_cancel_after_low_samples(),
            )?
            .set_default("session.timeout_seconds", default_session_timeout_seconds())?
            .set_default("session.review_seconds", default_review_seconds())?
            .set_default(
                "session.upload_timeout_seconds",
                default_upload_timeout_seconds(),
            )?
            .set_default(
                "session.camera_resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("session.jpeg_quality", default_jpeg_quality() as u64)?
            .set_default("session.download_path", default_download_path())?
            .set_default("storage.endpoint", default_storage_endpoint())?
            .set_default("storage.bucket", default_bucket())?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.max_upload_bytes", default_max_upload_bytes() as i64)?
            .set_default("storage.list_limit", default_list_limit() as i64)?
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port())?
            .set_default("server.allowed_origins", default_allowed_origins())?
            .set_default("server.development", false)?
            .set_default("server.body_limit_bytes", default_body_limit_bytes() as i64)?
            .set_default(
                "gallery.refresh_interval_seconds",
                default_refresh_interval_seconds(),
            )?
            .set_default("gallery.timezone", default_gallery_timezone())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?;

        if let Some(path) = path {
            let path_str = path.to_string_lossy();
            debug!("Loading configuration from: {}", path_str);
            builder = builder.add_source(File::with_name(&path_str).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("SNAPBOOTH")
                .separator("__")
                .source(Some(vars.clone())),
        );

        for (var, key) in LEGACY_ENV_KEYS {
            let value = vars.get(*var).filter(|v| !v.is_empty()).cloned();
            builder = builder.set_override_option(*key, value)?;
        }

        let config: SnapboothConfig = builder.build()?.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config.redacted());

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Detection poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        let threshold = self.detection.happiness_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Message(
                "Detection happiness_threshold must be within (0, 1]".to_string(),
            ));
        }

        if self.detection.trigger_policy == TriggerPolicy::Countdown {
            if self.detection.countdown_ticks == 0 {
                return Err(ConfigError::Message(
                    "Detection countdown_ticks must be greater than 0".to_string(),
                ));
            }
            if self.detection.countdown_tick_ms == 0 {
                return Err(ConfigError::Message(
                    "Detection countdown_tick_ms must be greater than 0".to_string(),
                ));
            }
        }

        if self.detection.cancel_after_low_samples == 0 {
            return Err(ConfigError::Message(
                "Detection cancel_after_low_samples must be greater than 0".to_string(),
            ));
        }

        if self.session.timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Session timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.session.camera_resolution.0 == 0 || self.session.camera_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.session.jpeg_quality == 0 || self.session.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Session jpeg_quality must be within 1..=100".to_string(),
            ));
        }

        if self.storage.bucket.is_empty() {
            return Err(ConfigError::Message(
                "Storage bucket must not be empty".to_string(),
            ));
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(ConfigError::Message(
                "Storage max_upload_bytes must be greater than 0".to_string(),
            ));
        }

        if self.gallery.refresh_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Gallery refresh_interval_seconds must be greater than 0".to_string(),
            ));
        }

        if self.gallery.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::Message(format!(
                "Unknown gallery timezone: {}",
                self.gallery.timezone
            )));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Copy with secrets masked, for logging
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.storage.anon_key = copy.storage.anon_key.as_deref().map(redact);
        copy.storage.service_role_key = copy.storage.service_role_key.as_deref().map(redact);
        copy.server.cleanup_secret = copy.server.cleanup_secret.as_deref().map(redact);
        copy.wallet.coin_api_key = copy.wallet.coin_api_key.as_deref().map(redact);
        copy
    }
}

/// Keep a short prefix of a secret so operators can tell keys apart
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{}...", prefix)
}

impl Default for SnapboothConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig {
                poll_interval_ms: default_poll_interval_ms(),
                happiness_threshold: default_happiness_threshold(),
                trigger_policy: default_trigger_policy(),
                countdown_ticks: default_countdown_ticks(),
                countdown_tick_ms: default_countdown_tick_ms(),
                cancel_after_low_samples: default_cancel_after_low_samples(),
            },
            session: SessionConfig {
                timeout_seconds: default_session_timeout_seconds(),
                review_seconds: default_review_seconds(),
                upload_timeout_seconds: default_upload_timeout_seconds(),
                camera_resolution: default_camera_resolution(),
                jpeg_quality: default_jpeg_quality(),
                download_path: default_download_path(),
            },
            storage: StorageConfig {
                endpoint: default_storage_endpoint(),
                anon_key: None,
                service_role_key: None,
                bucket: default_bucket(),
                path: default_storage_path(),
                max_upload_bytes: default_max_upload_bytes(),
                list_limit: default_list_limit(),
            },
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
                allowed_origins: default_allowed_origins(),
                development: false,
                body_limit_bytes: default_body_limit_bytes(),
                cleanup_secret: None,
            },
            gallery: GalleryConfig {
                refresh_interval_seconds: default_refresh_interval_seconds(),
                timezone: default_gallery_timezone(),
            },
            wallet: WalletConfig::default(),
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    300
}
fn default_happiness_threshold() -> f32 {
    0.95
}
fn default_trigger_policy() -> TriggerPolicy {
    TriggerPolicy::Countdown
}
fn default_countdown_ticks() -> u32 {
    3
}
fn default_countdown_tick_ms() -> u64 {
    1000
}
fn default_cancel_after_low_samples() -> u32 {
    1
}

fn default_session_timeout_seconds() -> u32 {
    20
}
fn default_review_seconds() -> u64 {
    6
}
fn default_upload_timeout_seconds() -> u64 {
    10
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_download_path() -> String {
    "./downloads".to_string()
}

fn default_storage_endpoint() -> String {
    "http://localhost:8080".to_string()
}
fn default_bucket() -> String {
    "photos".to_string()
}
fn default_storage_path() -> String {
    "./storage".to_string()
}
fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_list_limit() -> usize {
    100
}

fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8080
}
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:3001".to_string(),
    ]
}
fn default_body_limit_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_refresh_interval_seconds() -> u64 {
    10
}
fn default_gallery_timezone() -> String {
    "UTC".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}
