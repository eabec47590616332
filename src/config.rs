#![allow(dead_code)]
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use validator::Validate;

use crate::domain::{BatteryConfig, ConsumptionProfile, SolarConfig};

/// Top-level application configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub http: HttpConfig,

    #[validate(nested)]
    pub solar: SolarConfig,

    #[validate(nested)]
    pub battery: BatteryConfig,

    #[validate(nested)]
    pub consumption: ConsumptionProfile,

    #[validate(nested)]
    pub pipeline: PipelineConfig,

    #[validate(nested)]
    pub prices: PricesConfig,

    #[validate(nested)]
    pub weather: WeatherConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

/// TCP listener and worker-pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// `MAX_THREADS` — fixed worker-pool size.
    #[serde(default = "default_max_threads")]
    #[validate(range(min = 1, max = 1024))]
    pub max_threads: usize,

    /// `MAX_CLIENTS_PER_THREAD` — per-worker connection slot-table capacity.
    #[serde(default = "default_max_clients_per_thread")]
    #[validate(range(min = 1, max = 4096))]
    pub max_clients_per_thread: usize,

    #[serde(default = "default_client_buffer_size")]
    #[validate(range(min = 64))]
    pub client_buffer_size: usize,

    #[serde(default = "default_select_timeout_secs")]
    #[validate(range(min = 1, max = 60))]
    pub select_timeout_secs: u64,

    #[serde(default = "default_client_idle_timeout_secs")]
    pub client_idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("failed to parse listen address")
    }

    pub fn backlog(&self) -> i32 {
        (self.max_threads * self.max_clients_per_thread) as i32
    }
}

/// Remote-fetch retry/timeout policy.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,

    /// `HTTP_MAX_RETRIES`.
    #[serde(default = "default_http_max_retries")]
    #[validate(range(min = 0, max = 10))]
    pub max_retries: u32,
}

/// Pipeline queue sizing and stage worker-pool sizes.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PipelineConfig {
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    #[serde(default = "default_stage_workers")]
    #[validate(range(min = 1))]
    pub fetch_workers: usize,

    #[serde(default = "default_stage_workers")]
    #[validate(range(min = 1))]
    pub parse_workers: usize,

    #[serde(default = "default_stage_workers")]
    #[validate(range(min = 1))]
    pub compute_workers: usize,
}

/// Spot-price provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PricesConfig {
    #[validate(length(min = 1))]
    pub base_url: String,

    /// `PRICE_THRESHOLD` used in `PlanEngine` decision rules.
    #[serde(default = "default_price_threshold")]
    pub price_threshold_sek_per_kwh: f64,

    /// In-process TTL cache for fetched price bodies, keyed by region.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Weather provider configuration plus the location-tag lookup table.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct WeatherConfig {
    #[validate(length(min = 1))]
    pub base_url: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// `location` tag -> (latitude, longitude). Unknown tags fall back to Stockholm,
    /// see [`WeatherConfig::coordinates_for`].
    #[serde(default = "default_locations")]
    pub locations: HashMap<String, (f64, f64)>,
}

impl WeatherConfig {
    /// Coordinates for a `forecast` command's `location` argument. Unknown tags fall
    /// back to Stockholm, matching the documented default in SPEC_FULL.md section B.
    pub fn coordinates_for(&self, location: &str) -> (f64, f64) {
        self.locations
            .get(&location.to_lowercase())
            .copied()
            .unwrap_or((59.3293, 18.0686))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_max_threads() -> usize {
    20
}
fn default_max_clients_per_thread() -> usize {
    50
}
fn default_client_buffer_size() -> usize {
    4096
}
fn default_select_timeout_secs() -> u64 {
    1
}
fn default_client_idle_timeout_secs() -> u64 {
    300
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_http_max_retries() -> u32 {
    3
}
fn default_queue_capacity() -> usize {
    100
}
fn default_stage_workers() -> usize {
    3
}
fn default_price_threshold() -> f64 {
    1.0
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_timezone() -> String {
    "Europe/Stockholm".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

fn default_locations() -> HashMap<String, (f64, f64)> {
    [
        ("stockholm", (59.3293, 18.0686)),
        ("gothenburg", (57.7089, 11.9746)),
        ("malmo", (55.6050, 13.0038)),
        ("uppsala", (59.8586, 17.6389)),
        ("lulea", (65.5848, 22.1567)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl AppConfig {
    /// Loads configuration from `config/*.toml` plus `GRIDGUARD__`-prefixed environment
    /// variables, in that precedence order.
    pub fn load() -> Result<Self> {
        Self::load_with_env(None)
    }

    pub fn load_with_env(environment: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config/default.toml"));

        if let Some(env) = environment {
            figment = figment.merge(Toml::file(format!("config/{env}.toml")));
        } else {
            figment = figment.merge(Toml::file("config/development.toml").nested());
        }

        figment = figment.merge(Env::prefixed("GRIDGUARD__").split("__"));

        let config: AppConfig = figment.extract().context("failed to parse configuration")?;
        config.validate().context("configuration validation failed")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                max_threads: 20,
                max_clients_per_thread: 50,
                client_buffer_size: 4096,
                select_timeout_secs: 1,
                client_idle_timeout_secs: 300,
            },
            http: HttpConfig {
                timeout_secs: 30,
                max_retries: 3,
            },
            solar: SolarConfig {
                panel_efficiency: 0.18,
                panel_area_m2: 20.0,
                orientation_deg: 180.0,
                tilt_deg: 35.0,
                peak_power_kw: 5.0,
            },
            battery: BatteryConfig {
                capacity_kwh: 10.0,
                max_charge_kw: 5.0,
                max_discharge_kw: 5.0,
                min_soc_pct: 10.0,
                max_soc_pct: 95.0,
                current_soc_pct: 50.0,
                roundtrip_efficiency: 0.9,
            },
            consumption: ConsumptionProfile {
                base_load_kw: 0.5,
                peak_load_kw: 3.0,
                avg_daily_kwh: 12.0,
            },
            pipeline: PipelineConfig {
                queue_capacity: 100,
                fetch_workers: 3,
                parse_workers: 3,
                compute_workers: 3,
            },
            prices: PricesConfig {
                base_url: "https://www.elprisetjustnu.se".to_string(),
                price_threshold_sek_per_kwh: 1.0,
                cache_ttl_secs: 300,
            },
            weather: WeatherConfig {
                base_url: "https://api.open-meteo.com".to_string(),
                timezone: "Europe/Stockholm".to_string(),
                cache_ttl_secs: 300,
                locations: default_locations(),
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_json: false,
            },
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn listen_addr_parses() {
        let cfg = sample();
        let addr = cfg.server.listen_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn invalid_soc_bounds_rejected() {
        let mut cfg = sample();
        cfg.battery.min_soc_pct = 96.0;
        cfg.battery.max_soc_pct = 95.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_location_falls_back_to_stockholm() {
        let cfg = sample();
        assert_eq!(cfg.weather.coordinates_for("nowhere"), (59.3293, 18.0686));
        assert_eq!(cfg.weather.coordinates_for("Stockholm"), (59.3293, 18.0686));
    }
}
