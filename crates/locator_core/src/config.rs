//! Service configuration: load-bearing constants with environment overrides.

use std::path::PathBuf;
use std::time::Duration;

use h3o::Resolution;

use crate::error::ConfigError;
use crate::spatial::{MATCH_RESOLUTION, MATCH_RING_K, SURGE_RESOLUTION, SURGE_RING_K};

/// Freshness window for agent records and cell membership sets.
pub const LOCATION_TTL: Duration = Duration::from_secs(30);

/// How long a computed surge zone is served from cache.
pub const SURGE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Auto-expiry of demand markers.
pub const DEMAND_TTL: Duration = Duration::from_secs(10 * 60);

/// Largest ring radius accepted for a surge zone grid query.
pub const MAX_ZONE_RING_K: u32 = 5;

/// Default bound on a single store round trip for ingestion and search.
pub const DEFAULT_STORE_DEADLINE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq)]
pub struct LocatorConfig {
    pub match_resolution: Resolution,
    pub surge_resolution: Resolution,
    pub match_ring_k: u32,
    pub surge_ring_k: u32,
    /// Upper bound on the caller-supplied `k` of a zone grid query.
    pub max_zone_ring_k: u32,
    pub location_ttl: Duration,
    pub surge_cache_ttl: Duration,
    pub demand_ttl: Duration,
    pub store_deadline: Duration,
    /// Bounded queue between ingestion and the event-log writer task.
    pub forward_queue_capacity: usize,
    pub event_log_dir: PathBuf,
    pub event_log_topic: String,
    pub event_log_partitions: u32,
    pub ring_cache_capacity: usize,
    /// Interval of the in-memory store's expiry reaper.
    pub reaper_interval: Duration,
    pub log_level: String,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            match_resolution: MATCH_RESOLUTION,
            surge_resolution: SURGE_RESOLUTION,
            match_ring_k: MATCH_RING_K,
            surge_ring_k: SURGE_RING_K,
            max_zone_ring_k: MAX_ZONE_RING_K,
            location_ttl: LOCATION_TTL,
            surge_cache_ttl: SURGE_CACHE_TTL,
            demand_ttl: DEMAND_TTL,
            store_deadline: DEFAULT_STORE_DEADLINE,
            forward_queue_capacity: 10_000,
            event_log_dir: PathBuf::from("./data/event-log"),
            event_log_topic: "agent-locations".to_string(),
            event_log_partitions: 8,
            ring_cache_capacity: 1_000,
            reaper_interval: Duration::from_secs(5),
            log_level: "info".to_string(),
        }
    }
}

/// Load configuration from the environment.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a `LOCATOR_*` variable holds an invalid value.
pub fn load_config() -> Result<LocatorConfig, ConfigError> {
    dotenvy::dotenv().ok();
    build_config(|key| std::env::var(key))
}

/// Build configuration using the provided env-var lookup function, so parsing can be
/// tested with a plain `HashMap` lookup.
pub fn build_config<F>(lookup: F) -> Result<LocatorConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let defaults = LocatorConfig::default();

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u64 = |var: &str, default: u64| -> Result<u64, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|e| invalid(var, e.to_string())),
            Err(_) => Ok(default),
        }
    };

    let parse_resolution = |var: &str, default: Resolution| -> Result<Resolution, ConfigError> {
        let raw = parse_u64(var, u64::from(u8::from(default)))?;
        let raw = u8::try_from(raw).map_err(|e| invalid(var, e.to_string()))?;
        Resolution::try_from(raw).map_err(|e| invalid(var, e.to_string()))
    };

    let secs = |d: Duration| d.as_secs();
    let to_u32 = |var: &str, raw: u64| u32::try_from(raw).map_err(|e| invalid(var, e.to_string()));
    let to_usize = |var: &str, raw: u64| usize::try_from(raw).map_err(|e| invalid(var, e.to_string()));

    let match_resolution = parse_resolution("LOCATOR_MATCH_RESOLUTION", defaults.match_resolution)?;
    let surge_resolution = parse_resolution("LOCATOR_SURGE_RESOLUTION", defaults.surge_resolution)?;
    if surge_resolution >= match_resolution {
        return Err(invalid(
            "LOCATOR_SURGE_RESOLUTION",
            "must be coarser than LOCATOR_MATCH_RESOLUTION".to_string(),
        ));
    }

    let match_ring_k = to_u32(
        "LOCATOR_MATCH_RING_K",
        parse_u64("LOCATOR_MATCH_RING_K", u64::from(defaults.match_ring_k))?,
    )?;
    let surge_ring_k = to_u32(
        "LOCATOR_SURGE_RING_K",
        parse_u64("LOCATOR_SURGE_RING_K", u64::from(defaults.surge_ring_k))?,
    )?;
    let max_zone_ring_k = to_u32(
        "LOCATOR_MAX_ZONE_RING_K",
        parse_u64("LOCATOR_MAX_ZONE_RING_K", u64::from(defaults.max_zone_ring_k))?,
    )?;
    if surge_ring_k > max_zone_ring_k {
        return Err(invalid(
            "LOCATOR_SURGE_RING_K",
            format!("must not exceed LOCATOR_MAX_ZONE_RING_K ({max_zone_ring_k})"),
        ));
    }

    let location_ttl = Duration::from_secs(parse_u64(
        "LOCATOR_LOCATION_TTL_SECS",
        secs(defaults.location_ttl),
    )?);
    let surge_cache_ttl = Duration::from_secs(parse_u64(
        "LOCATOR_SURGE_CACHE_TTL_SECS",
        secs(defaults.surge_cache_ttl),
    )?);
    let demand_ttl = Duration::from_secs(parse_u64(
        "LOCATOR_DEMAND_TTL_SECS",
        secs(defaults.demand_ttl),
    )?);
    for (var, ttl) in [
        ("LOCATOR_LOCATION_TTL_SECS", location_ttl),
        ("LOCATOR_SURGE_CACHE_TTL_SECS", surge_cache_ttl),
        ("LOCATOR_DEMAND_TTL_SECS", demand_ttl),
    ] {
        if ttl.is_zero() {
            return Err(invalid(var, "must be greater than zero".to_string()));
        }
    }

    let store_deadline = Duration::from_millis(parse_u64(
        "LOCATOR_STORE_DEADLINE_MS",
        u64::try_from(defaults.store_deadline.as_millis()).unwrap_or(u64::MAX),
    )?);

    let forward_queue_capacity = to_usize(
        "LOCATOR_FORWARD_QUEUE_CAPACITY",
        parse_u64(
            "LOCATOR_FORWARD_QUEUE_CAPACITY",
            defaults.forward_queue_capacity as u64,
        )?,
    )?;
    if forward_queue_capacity == 0 {
        return Err(invalid(
            "LOCATOR_FORWARD_QUEUE_CAPACITY",
            "must be greater than zero".to_string(),
        ));
    }

    let event_log_partitions = to_u32(
        "LOCATOR_EVENT_LOG_PARTITIONS",
        parse_u64(
            "LOCATOR_EVENT_LOG_PARTITIONS",
            u64::from(defaults.event_log_partitions),
        )?,
    )?;
    if event_log_partitions == 0 {
        return Err(invalid(
            "LOCATOR_EVENT_LOG_PARTITIONS",
            "must be greater than zero".to_string(),
        ));
    }

    let ring_cache_capacity = to_usize(
        "LOCATOR_RING_CACHE_CAPACITY",
        parse_u64(
            "LOCATOR_RING_CACHE_CAPACITY",
            defaults.ring_cache_capacity as u64,
        )?,
    )?;

    let reaper_interval = Duration::from_secs(parse_u64(
        "LOCATOR_REAPER_INTERVAL_SECS",
        secs(defaults.reaper_interval),
    )?)
    .max(Duration::from_secs(1));

    let event_log_dir = lookup("LOCATOR_EVENT_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.event_log_dir);
    let event_log_topic = lookup("LOCATOR_EVENT_LOG_TOPIC").unwrap_or(defaults.event_log_topic);
    let log_level = lookup("LOCATOR_LOG_LEVEL").unwrap_or(defaults.log_level);

    Ok(LocatorConfig {
        match_resolution,
        surge_resolution,
        match_ring_k,
        surge_ring_k,
        max_zone_ring_k,
        location_ttl,
        surge_cache_ttl,
        demand_ttl,
        store_deadline,
        forward_queue_capacity,
        event_log_dir,
        event_log_topic,
        event_log_partitions,
        ring_cache_capacity,
        reaper_interval,
        log_level,
    })
}
