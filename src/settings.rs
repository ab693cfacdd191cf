use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{Measurement, MAX_WINDOW_DAYS};

const CONFIG_ENV: &str = "METRICDECK_CONFIG";
const CONFIG_DIR_NAME: &str = "metricdeck";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// How a human metric name is matched against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Case-insensitive exact match, else the first substring hit in catalog order.
    #[default]
    ExactThenSubstring,
    ExactOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCounter {
    pub key: String,
    pub metric: String,
    pub measurement: Measurement,
}

impl EventCounter {
    fn new(key: &str, metric: &str, measurement: Measurement) -> Self {
        Self {
            key: key.to_string(),
            metric: metric.to_string(),
            measurement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub api_revision: String,
    pub auth_scheme: String,
    pub min_interval_ms: u64,
    pub max_attempts: u32,
    pub default_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub snapshot_deadline_secs: u64,
    pub window_days: i64,
    pub timezone: String,
    pub max_pages: usize,
    pub aggregate_workers: usize,
    pub metric_match: MatchPolicy,
    pub campaign_channels: Vec<String>,
    pub event_counters: Vec<EventCounter>,
    pub revenue_metric: String,
    pub revenue_group_by: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://a.klaviyo.com/api/".to_string(),
            api_revision: "2024-10-15".to_string(),
            auth_scheme: "Klaviyo-API-Key".to_string(),
            min_interval_ms: 250,
            max_attempts: 3,
            default_retry_delay_ms: 1000,
            max_retry_delay_ms: 60_000,
            request_timeout_secs: 10,
            connect_timeout_secs: 5,
            snapshot_deadline_secs: 60,
            window_days: 30,
            timezone: "UTC".to_string(),
            max_pages: 200,
            aggregate_workers: 4,
            metric_match: MatchPolicy::default(),
            campaign_channels: vec!["email".to_string(), "sms".to_string()],
            event_counters: vec![
                EventCounter::new("placed_orders", "Placed Order", Measurement::Count),
                EventCounter::new("viewed_products", "Viewed Product", Measurement::Count),
                EventCounter::new("added_to_cart", "Added to Cart", Measurement::Count),
                EventCounter::new("active_on_site", "Active on Site", Measurement::Unique),
            ],
            revenue_metric: "Placed Order".to_string(),
            revenue_group_by: "$attributed_channel".to_string(),
        }
    }
}

impl Settings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn snapshot_deadline(&self) -> Duration {
        Duration::from_secs(self.snapshot_deadline_secs)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, String> {
        serde_yaml::from_str::<Settings>(contents)
            .map(Settings::validated)
            .map_err(|e| format!("Failed to parse settings YAML: {}", e))
    }

    /// Replaces out-of-range values with their defaults.
    pub fn validated(mut self) -> Self {
        if !(1..=MAX_WINDOW_DAYS).contains(&self.window_days) {
            let fallback = Settings::default().window_days;
            log::warn!(
                "[Settings] window_days={} is outside 1..={}, using {}",
                self.window_days,
                MAX_WINDOW_DAYS,
                fallback
            );
            self.window_days = fallback;
        }
        self
    }

    /// Applies `METRICDECK_*` overrides from the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("METRICDECK_BASE_URL").filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(revision) = lookup("METRICDECK_API_REVISION").filter(|v| !v.is_empty()) {
            self.api_revision = revision;
        }
        if let Some(raw) = lookup("METRICDECK_MIN_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.min_interval_ms = ms,
                Err(e) => {
                    log::warn!("[Settings] Ignoring METRICDECK_MIN_INTERVAL_MS={}: {}", raw, e)
                }
            }
        }
        if let Some(raw) = lookup("METRICDECK_DEADLINE_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.snapshot_deadline_secs = secs,
                Err(e) => log::warn!("[Settings] Ignoring METRICDECK_DEADLINE_SECS={}: {}", raw, e),
            }
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Reads settings from `path`. A missing or malformed file yields defaults.
pub fn load_settings_from(path: &Path) -> Settings {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("[Settings] No config at {}, using defaults", path.display());
            return Settings::default();
        }
        Err(e) => {
            log::error!("[Settings] Failed to read {}: {}", path.display(), e);
            return Settings::default();
        }
    };

    match Settings::from_yaml_str(&contents) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("[Settings] {} ({})", e, path.display());
            Settings::default()
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = match default_config_path() {
        Some(path) => load_settings_from(&path),
        None => Settings::default(),
    };
    settings.apply_overrides(|key| std::env::var(key).ok());
    settings
}
