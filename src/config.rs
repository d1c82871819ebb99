//! Handles carousel configuration loading.
//!
//! This module defines the `CarouselConfig` struct which holds the
//! auto-advance, looping and loading parameters, and provides `load_config`
//! to read them from the `[carousel]` section of an INI file. The ordered
//! page list lives in a separate JSON file named by the `pages` key and is
//! read with `load_pages`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use configparser::ini::Ini;
use log::{debug, error, info};

use super::errors::ConfigError;
use super::media_pipeline::DEFAULT_PROBE_BYTES;
use super::model::MediaItem;

/// Path used when no configuration file is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/media_carousel.conf";

const SECTION: &str = "carousel";

/// Holds the carousel's configuration parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct CarouselConfig {
    /// JSON file with the ordered page list.
    pub pages_path: PathBuf,
    /// Global auto-advance interval in seconds; `<= 0` disables.
    pub interval: f64,
    /// Per-page intervals in seconds. Non-empty switches to per-page mode.
    pub page_intervals: Vec<f64>,
    pub video_loop: bool,
    /// Units more than this many pages away from every visible page are released.
    pub recycle_distance: usize,
    /// Leading bytes fetched when probing a remote video.
    pub probe_bytes: u64,
}

impl Default for CarouselConfig {
    fn default() -> Self {
        Self {
            pages_path: PathBuf::new(),
            interval: 0.0,
            page_intervals: Vec::new(),
            video_loop: false,
            recycle_distance: 1,
            probe_bytes: DEFAULT_PROBE_BYTES,
        }
    }
}

/// Loads carousel configuration from the specified INI file path.
///
/// A relative `pages` path is resolved against the directory holding the
/// configuration file.
///
/// # Errors
/// Returns `ConfigError` if the file cannot be read, is malformed, misses
/// the `pages` key, or carries a value of the wrong type.
#[must_use = "loading configuration can fail, the Result must be handled"]
pub fn load_config(path: &str) -> Result<CarouselConfig, ConfigError> {
    info!("Attempting to load config from: {}", path);
    let content = std::fs::read_to_string(path).map_err(|e| {
        error!("Error reading config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let mut config = parse_config(&content)?;
    if config.pages_path.is_relative() {
        if let Some(dir) = Path::new(path).parent() {
            config.pages_path = dir.join(&config.pages_path);
        }
    }
    info!("Configuration loaded successfully from {}: {:?}", path, config);
    Ok(config)
}

/// Parses configuration from INI text.
#[must_use = "parsing configuration can fail, the Result must be handled"]
pub fn parse_config(content: &str) -> Result<CarouselConfig, ConfigError> {
    let mut config_parser = Ini::new();
    config_parser.read(content.to_string()).map_err(|e| {
        error!("Error parsing config: {}", e);
        ConfigError::Parse(e)
    })?;

    let get_key = |key_name: &str| config_parser.get(SECTION, key_name);
    let defaults = CarouselConfig::default();

    let pages_path = get_key("pages")
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            error!("Missing configuration key 'pages' in section '[{}]'", SECTION);
            ConfigError::MissingKey("pages".to_string())
        })?;
    debug!("Loaded config value for key 'pages': {}", pages_path.display());

    let interval = parse_value("interval", get_key("interval"))?.unwrap_or(defaults.interval);
    debug!("Loaded config value for key 'interval': {}", interval);

    let page_intervals = match get_key("page_intervals") {
        Some(raw) => parse_interval_list(&raw)?,
        None => defaults.page_intervals,
    };
    debug!("Loaded config value for key 'page_intervals': {:?}", page_intervals);

    let video_loop = match get_key("video_loop") {
        Some(raw) => parse_bool("video_loop", &raw)?,
        None => defaults.video_loop,
    };
    debug!("Loaded config value for key 'video_loop': {}", video_loop);

    let recycle_distance =
        parse_value("recycle_distance", get_key("recycle_distance"))?.unwrap_or(defaults.recycle_distance);
    debug!("Loaded config value for key 'recycle_distance': {}", recycle_distance);

    let probe_bytes: u64 = parse_value("probe_bytes", get_key("probe_bytes"))?.unwrap_or(defaults.probe_bytes);
    if probe_bytes == 0 {
        return Err(invalid("probe_bytes", "0"));
    }
    debug!("Loaded config value for key 'probe_bytes': {}", probe_bytes);

    Ok(CarouselConfig { pages_path, interval, page_intervals, video_loop, recycle_distance, probe_bytes })
}

/// Reads the ordered page list from a JSON file.
#[must_use = "loading the page list can fail, the Result must be handled"]
pub fn load_pages(path: &Path) -> Result<Vec<MediaItem>, ConfigError> {
    info!("Loading page list from: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| {
        error!("Error reading page list '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let pages: Vec<MediaItem> = serde_json::from_str(&content).map_err(|e| {
        error!("Error parsing page list '{}': {}", path.display(), e);
        ConfigError::from(e)
    })?;
    info!("Loaded {} page(s) from {}", pages.len(), path.display());
    Ok(pages)
}

fn invalid(key: &str, value: &str) -> ConfigError {
    error!("Invalid value '{}' for configuration key '{}'", value, key);
    ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }
}

fn parse_value<T: FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    match raw {
        Some(value) if !value.trim().is_empty() => {
            value.trim().parse().map(Some).map_err(|_| invalid(key, &value))
        }
        _ => Ok(None),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        _ => Err(invalid(key, raw)),
    }
}

fn parse_interval_list(raw: &str) -> Result<Vec<f64>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|_| invalid("page_intervals", raw)))
        .collect()
}
