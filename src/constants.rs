use std::time::Duration;

pub const API_URL: &str = "https://api.tinify.com/shrink";
pub const ENV_API_KEY: &str = "TINYPNG_API_KEY";

pub const MAX_RETRIES: u32 = 2;
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 4;
pub const DEFAULT_WORKERS: usize = 2;

/// Ceiling on jobs that are queued or in flight at once.
pub const MAX_PENDING_JOBS: usize = 10_000;
pub const UPDATE_CHANNEL_CAPACITY: usize = 100;

/// Inputs are buffered in memory before upload.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

pub const APP_DIR_NAME: &str = "tiny-squeeze";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const HISTORY_FILE_NAME: &str = "history.json";
pub const DEFAULT_SUFFIX: &str = ".tiny";
pub const TEMP_FILE_PREFIX: &str = "tiny-";

#[cfg(unix)]
pub const CONFIG_DIR_MODE: u32 = 0o700;
#[cfg(unix)]
pub const CONFIG_FILE_MODE: u32 = 0o600;

pub const PROGRESS_BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

// Common output message prefixes
pub const SUCCESS_PREFIX: &str = "✅";
pub const WARNING_PREFIX: &str = "⚠️";
pub const ERROR_PREFIX: &str = "❌";
pub const INFO_PREFIX: &str = "📋";

/// Minimal 1x1 transparent PNG used to check credentials.
pub const SAMPLE_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x37, 0x6e, 0xf9,
    0x24, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x08, 0x99, 0x63, 0x60, 0x00, 0x00, 0x00,
    0x02, 0x00, 0x01, 0x73, 0x75, 0x01, 0x18, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];
