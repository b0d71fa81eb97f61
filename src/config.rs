use crate::storage::archive::SiteId;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A token allowed to view reports, stored as the hex SHA-256 of the token.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenGrant {
    pub token_sha256: String,
    /// Sites the token may view. Empty means every site.
    #[serde(default)]
    pub sites: Vec<SiteId>,
}

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Dashboard origin for CORS restrictions on report routes.
    /// If not set, any origin may call the API.
    #[serde(default)]
    pub dashboard_origin: Option<String>,
    /// Graceful shutdown timeout in seconds (default: 30).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Report cache TTL in seconds (default: 60). 0 = no caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum number of cached report bodies (default: 10000).
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Fetch unique visitors by default for year and range periods too.
    #[serde(default)]
    pub enable_unique_visitors_year_and_range: bool,
    /// Sites anyone may view without a token.
    #[serde(default)]
    pub anonymous_view_sites: Vec<SiteId>,
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_cache_ttl_secs() -> u64 {
    60
}

const fn default_cache_max_entries() -> usize {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            dashboard_origin: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            enable_unique_visitors_year_and_range: false,
            anonymous_view_sites: Vec::new(),
            tokens: Vec::new(),
        }
    }
}

fn parse_bool(val: &str) -> bool {
    val != "0" && !val.eq_ignore_ascii_case("false")
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `VISITS_HOST` → host
    /// - `VISITS_PORT` → port
    /// - `VISITS_DATA_DIR` → data_dir
    /// - `VISITS_DASHBOARD_ORIGIN` → dashboard_origin
    /// - `VISITS_SHUTDOWN_TIMEOUT` → shutdown_timeout_secs
    /// - `VISITS_CACHE_TTL` → cache_ttl_secs
    /// - `VISITS_CACHE_MAX_ENTRIES` → cache_max_entries
    /// - `VISITS_UNIQUE_VISITORS_YEAR_AND_RANGE` → enable_unique_visitors_year_and_range
    /// - `VISITS_ANONYMOUS_SITES` → anonymous_view_sites (comma-separated ids)
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        if let Ok(host) = std::env::var("VISITS_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("VISITS_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(data_dir) = std::env::var("VISITS_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(origin) = std::env::var("VISITS_DASHBOARD_ORIGIN") {
            config.dashboard_origin = Some(origin);
        }
        if let Ok(val) = std::env::var("VISITS_SHUTDOWN_TIMEOUT") {
            if let Ok(t) = val.parse() {
                config.shutdown_timeout_secs = t;
            }
        }
        if let Ok(val) = std::env::var("VISITS_CACHE_TTL") {
            if let Ok(t) = val.parse() {
                config.cache_ttl_secs = t;
            }
        }
        if let Ok(val) = std::env::var("VISITS_CACHE_MAX_ENTRIES") {
            if let Ok(n) = val.parse() {
                config.cache_max_entries = n;
            }
        }
        if let Ok(val) = std::env::var("VISITS_UNIQUE_VISITORS_YEAR_AND_RANGE") {
            config.enable_unique_visitors_year_and_range = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("VISITS_ANONYMOUS_SITES") {
            match val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect::<Result<Vec<SiteId>, _>>()
            {
                Ok(sites) => config.anonymous_view_sites = sites,
                Err(e) => tracing::warn!("Ignoring VISITS_ANONYMOUS_SITES: {e}"),
            }
        }

        config
    }

    /// Returns the path to the DuckDB archive file.
    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join("archive.duckdb")
    }
}
