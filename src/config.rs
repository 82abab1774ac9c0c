/// Tunable constants for the session layer
///
/// Every clock and size limit lives here instead of being hardcoded at the
/// call site. Production code uses `Config::default()`, the binary overlays
/// `PIXSHOP_*` environment variables, and tests build their own values.

use chrono::Duration;
use std::path::PathBuf;

/// All knobs for storage, codec, liveness and guards
#[derive(Debug, Clone)]
pub struct Config {
    // ========== Durable store ==========

    /// Prefix prepended to every key before it touches the medium
    pub namespace: String,

    /// Lifetime of a stored snapshot, its latest pointer and the owner index
    pub snapshot_ttl: Duration,

    // ========== Codec ==========

    /// Snapshots saved longer ago than this never restore
    pub freshness_window: Duration,

    /// Neither image dimension exceeds this after recompression
    pub max_image_dimension: u32,

    /// JPEG quality for the first encoding pass (0.0 - 1.0)
    pub primary_quality: f32,

    /// JPEG quality for the single retry when the first pass is too large
    pub fallback_quality: f32,

    /// Serialized snapshot ceiling in bytes
    pub max_serialized_bytes: usize,

    // ========== Session store ==========

    /// Most recent snapshots kept per owner
    pub retention_cap: usize,

    // ========== Liveness ==========

    /// Hard lifetime of a liveness token
    pub liveness_lifetime: Duration,

    /// Inactivity window after which the liveness session is dead
    pub inactivity_window: Duration,

    // ========== Credits & guards ==========

    /// Lifetime of the cached credit balance
    pub credit_cache_ttl: Duration,

    /// Balance assumed when nothing is cached
    pub initial_credits: u32,

    /// Edit requests allowed per rate-limit window
    pub rate_limit_max: usize,

    /// Sliding rate-limit window
    pub rate_limit_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "pixshop:".to_string(),
            snapshot_ttl: Duration::days(7),
            freshness_window: Duration::hours(2),
            max_image_dimension: 1024,
            primary_quality: 0.8,
            fallback_quality: 0.6,
            max_serialized_bytes: 4 * 1024 * 1024,
            retention_cap: 10,
            liveness_lifetime: Duration::hours(8),
            inactivity_window: Duration::minutes(30),
            credit_cache_ttl: Duration::minutes(1440),
            initial_credits: 3,
            rate_limit_max: 10,
            rate_limit_window: Duration::seconds(60),
        }
    }
}

impl Config {
    /// Defaults overlaid with any `PIXSHOP_*` variables present in the environment
    ///
    /// Unparseable values are ignored and the default is kept. Durations
    /// must be positive and within chrono's range.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(namespace) = std::env::var("PIXSHOP_NAMESPACE") {
            if !namespace.is_empty() {
                config.namespace = namespace;
            }
        }
        if let Some(ttl) = env_minutes("PIXSHOP_SNAPSHOT_TTL_MINUTES") {
            config.snapshot_ttl = ttl;
        }
        if let Some(window) = env_minutes("PIXSHOP_FRESHNESS_MINUTES") {
            config.freshness_window = window;
        }
        if let Some(px) = env_number::<u32>("PIXSHOP_MAX_IMAGE_DIMENSION") {
            config.max_image_dimension = px;
        }
        if let Some(bytes) = env_number::<usize>("PIXSHOP_MAX_SNAPSHOT_BYTES") {
            config.max_serialized_bytes = bytes;
        }
        if let Some(cap) = env_number::<usize>("PIXSHOP_RETENTION_CAP") {
            config.retention_cap = cap;
        }
        if let Some(credits) = env_number::<u32>("PIXSHOP_INITIAL_CREDITS") {
            config.initial_credits = credits;
        }

        config
    }

    /// Where the SQLite medium lives
    ///
    /// - Linux: ~/.local/share/pixshop/session_store.db
    /// - macOS: ~/Library/Application Support/pixshop/session_store.db
    /// - Windows: %APPDATA%\pixshop\session_store.db
    pub fn default_db_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("pixshop");
        path.push("session_store.db");
        Some(path)
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_minutes(name: &str) -> Option<Duration> {
    parse_minutes(&std::env::var(name).ok()?)
}

fn parse_minutes(raw: &str) -> Option<Duration> {
    let minutes: i64 = raw.trim().parse().ok()?;
    if minutes <= 0 {
        return None;
    }
    Duration::try_minutes(minutes)
}
