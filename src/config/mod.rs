//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{CliArgs, Command, MigrateArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "alphafeed";
const ENV_PREFIX: &str = "ALPHAFEED";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_ENTRY_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_SOFT_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_LOCK_TTL_SECS: u64 = 30;
const DEFAULT_CACHE_MEMORY_ENTRY_LIMIT: usize = 256;
const DEFAULT_CACHE_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_CACHE_JANITOR_INTERVAL_SECS: u64 = 600;
const DEFAULT_ENRICHMENT_BASE_URL: &str = crate::infra::dexscreener::DEFAULT_BASE_URL;
const DEFAULT_ENRICHMENT_TIMEOUT_SECS: u64 = crate::infra::dexscreener::DEFAULT_TIMEOUT.as_secs();
const DEFAULT_ENRICHMENT_TTL_SECS: u64 = 120;
const DEFAULT_ENRICHMENT_CACHE_LIMIT: usize = 1024;
const DEFAULT_TRENDING_DEFAULT_LIMIT: u32 = 10;
const DEFAULT_TRENDING_MAX_LIMIT: u32 = 100;
const DEFAULT_TRENDING_GUEST_LIMIT: u32 = 3;
const DEFAULT_TRENDING_GUEST_WINDOW_HOURS: u64 = 7 * 24;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub enrichment: EnrichmentSettings,
    pub trending: TrendingSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

/// Where rankings and revalidation locks live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// Shared across processes through the `cache_entries` table.
    Postgres,
    /// Process-local LRU.
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}`, expected postgres or memory")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub entry_ttl: Duration,
    pub soft_ttl: Duration,
    pub lock_ttl: Duration,
    pub memory_entry_limit: usize,
    pub shutdown_grace: Duration,
    pub janitor_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub enabled: bool,
    pub base_url: Url,
    pub timeout: Duration,
    pub ttl: Duration,
    pub cache_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct TrendingSettings {
    pub default_limit: u32,
    pub max_limit: u32,
    pub guest_limit: u32,
    pub guest_window: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_migrate_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    enrichment: RawEnrichmentSettings,
    trending: RawTrendingSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(seconds) = overrides.cache_entry_ttl_seconds {
            self.cache.entry_ttl_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_soft_ttl_seconds {
            self.cache.soft_ttl_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.enrichment_enabled {
            self.enrichment.enabled = Some(enabled);
        }
        if let Some(url) = overrides.enrichment_base_url.as_ref() {
            self.enrichment.base_url = Some(url.clone());
        }
    }

    fn apply_migrate_overrides(&mut self, args: &MigrateArgs) {
        if let Some(url) = args.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            enrichment,
            trending,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            enrichment: build_enrichment_settings(enrichment)?,
            trending: build_trending_settings(trending)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_shutdown = positive_seconds(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackend::Postgres,
    };

    let entry_ttl = positive_seconds(
        cache.entry_ttl_seconds,
        DEFAULT_CACHE_ENTRY_TTL_SECS,
        "cache.entry_ttl_seconds",
    )?;
    // Zero is allowed: every hit then triggers a revalidation.
    let soft_ttl = Duration::from_secs(
        cache
            .soft_ttl_seconds
            .unwrap_or(DEFAULT_CACHE_SOFT_TTL_SECS),
    );
    if soft_ttl > entry_ttl {
        return Err(LoadError::invalid(
            "cache.soft_ttl_seconds",
            "must not exceed cache.entry_ttl_seconds",
        ));
    }
    let lock_ttl = positive_seconds(
        cache.lock_ttl_seconds,
        DEFAULT_CACHE_LOCK_TTL_SECS,
        "cache.lock_ttl_seconds",
    )?;

    let memory_entry_limit = cache
        .memory_entry_limit
        .unwrap_or(DEFAULT_CACHE_MEMORY_ENTRY_LIMIT);
    if memory_entry_limit == 0 {
        return Err(LoadError::invalid(
            "cache.memory_entry_limit",
            "must be greater than zero",
        ));
    }

    let shutdown_grace = Duration::from_secs(
        cache
            .shutdown_grace_seconds
            .unwrap_or(DEFAULT_CACHE_SHUTDOWN_GRACE_SECS),
    );
    let janitor_interval = positive_seconds(
        cache.janitor_interval_seconds,
        DEFAULT_CACHE_JANITOR_INTERVAL_SECS,
        "cache.janitor_interval_seconds",
    )?;

    Ok(CacheSettings {
        backend,
        entry_ttl,
        soft_ttl,
        lock_ttl,
        memory_entry_limit,
        shutdown_grace,
        janitor_interval,
    })
}

fn build_enrichment_settings(
    enrichment: RawEnrichmentSettings,
) -> Result<EnrichmentSettings, LoadError> {
    let raw_url = enrichment
        .base_url
        .unwrap_or_else(|| DEFAULT_ENRICHMENT_BASE_URL.to_string());
    let base_url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("enrichment.base_url", err.to_string()))?;
    if base_url.cannot_be_a_base() {
        return Err(LoadError::invalid(
            "enrichment.base_url",
            "must be a hierarchical http(s) URL",
        ));
    }

    let timeout = positive_seconds(
        enrichment.timeout_seconds,
        DEFAULT_ENRICHMENT_TIMEOUT_SECS,
        "enrichment.timeout_seconds",
    )?;
    let ttl = Duration::from_secs(
        enrichment
            .ttl_seconds
            .unwrap_or(DEFAULT_ENRICHMENT_TTL_SECS),
    );
    let cache_limit = NonZeroUsize::new(
        enrichment
            .cache_limit
            .unwrap_or(DEFAULT_ENRICHMENT_CACHE_LIMIT),
    )
    .ok_or_else(|| LoadError::invalid("enrichment.cache_limit", "must be greater than zero"))?;

    Ok(EnrichmentSettings {
        enabled: enrichment.enabled.unwrap_or(true),
        base_url,
        timeout,
        ttl,
        cache_limit,
    })
}

fn build_trending_settings(trending: RawTrendingSettings) -> Result<TrendingSettings, LoadError> {
    let max_limit = non_zero_u32(
        trending
            .max_limit
            .unwrap_or(DEFAULT_TRENDING_MAX_LIMIT)
            .into(),
        "trending.max_limit",
    )?
    .get();
    let default_limit = non_zero_u32(
        trending
            .default_limit
            .unwrap_or(DEFAULT_TRENDING_DEFAULT_LIMIT)
            .into(),
        "trending.default_limit",
    )?
    .get();
    if default_limit > max_limit {
        return Err(LoadError::invalid(
            "trending.default_limit",
            "must not exceed trending.max_limit",
        ));
    }
    let guest_limit = non_zero_u32(
        trending
            .guest_limit
            .unwrap_or(DEFAULT_TRENDING_GUEST_LIMIT)
            .into(),
        "trending.guest_limit",
    )?
    .get();

    let guest_window_hours = trending
        .guest_window_hours
        .unwrap_or(DEFAULT_TRENDING_GUEST_WINDOW_HOURS);
    if guest_window_hours == 0 {
        return Err(LoadError::invalid(
            "trending.guest_window_hours",
            "must be greater than zero",
        ));
    }
    let guest_window = guest_window_hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| LoadError::invalid("trending.guest_window_hours", "value is too large"))?;

    Ok(TrendingSettings {
        default_limit,
        max_limit,
        guest_limit,
        guest_window,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    entry_ttl_seconds: Option<u64>,
    soft_ttl_seconds: Option<u64>,
    lock_ttl_seconds: Option<u64>,
    memory_entry_limit: Option<usize>,
    shutdown_grace_seconds: Option<u64>,
    janitor_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEnrichmentSettings {
    enabled: Option<bool>,
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
    ttl_seconds: Option<u64>,
    cache_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTrendingSettings {
    default_limit: Option<u32>,
    max_limit: Option<u32>,
    guest_limit: Option<u32>,
    guest_window_hours: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(
    value: Option<u64>,
    default: u64,
    key: &'static str,
) -> Result<Duration, LoadError> {
    let seconds = value.unwrap_or(default);
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
