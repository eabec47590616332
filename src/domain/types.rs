#![allow(dead_code)]
//! Canonical data model. Each concept is defined exactly once here;
//! the original source carried multiple overlapping record definitions for the same
//! concepts across drafts — this module is the single source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// One energy-dispatch decision for an interval.
///
/// Sign convention lives on [`PlanInterval`]: `grid_flow_kwh > 0` is import,
/// `battery_flow_kwh > 0` is charging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    BuyFromGrid,
    SellToGrid,
    ChargeBattery,
    DischargeBattery,
    DirectUse,
    Idle,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::BuyFromGrid => "BUY_FROM_GRID",
            Action::SellToGrid => "SELL_TO_GRID",
            Action::ChargeBattery => "CHARGE_BATTERY",
            Action::DischargeBattery => "DISCHARGE_BATTERY",
            Action::DirectUse => "DIRECT_USE",
            Action::Idle => "IDLE",
        };
        f.write_str(s)
    }
}

/// One forecast sample from the weather provider.
///
/// Invariants enforced by the decoder: `0 <= cloud_cover_pct <= 100`,
/// `0 <= humidity_pct <= 100`, `-50 <= temperature_c <= 50`, `0 <= solar_irradiance_w_per_m2 <= 1500`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WeatherSample {
    pub timestamp: DateTime<Utc>,
    pub solar_irradiance_w_per_m2: f64,
    pub cloud_cover_pct: f64,
    pub temperature_c: f64,
    pub wind_speed_m_s: f64,
    pub humidity_pct: f64,
}

impl WeatherSample {
    /// Validates the per-sample invariants above. Used by the decoder to silently
    /// drop malformed samples.
    pub fn is_valid(&self) -> bool {
        (0.0..=100.0).contains(&self.cloud_cover_pct)
            && (0.0..=100.0).contains(&self.humidity_pct)
            && (-50.0..=50.0).contains(&self.temperature_c)
            && (0.0..=1500.0).contains(&self.solar_irradiance_w_per_m2)
    }
}

/// One spot-price interval.
///
/// Invariant: `-1 <= price_sek_per_kwh <= 10`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub interval_start: DateTime<Utc>,
    pub interval_end: DateTime<Utc>,
    pub price_sek_per_kwh: f64,
    pub price_eur_per_kwh: f64,
    pub exchange_rate: f64,
}

impl PriceSample {
    pub fn is_valid(&self) -> bool {
        (-1.0..=10.0).contains(&self.price_sek_per_kwh)
    }
}

/// One interval of the computed dispatch plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlanInterval {
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub production_kwh: f64,
    pub consumption_kwh: f64,
    pub grid_flow_kwh: f64,
    pub battery_flow_kwh: f64,
    pub spot_price: f64,
    pub estimated_cost_sek: f64,
    pub battery_soc_pct: f64,
}

/// Full dispatch plan for a `forecast` request: per-interval entries plus totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub entries: Vec<PlanInterval>,
    pub total_cost_sek: f64,
    pub total_import_kwh: f64,
    pub total_export_kwh: f64,
}

/// Solar array parameters, fixed at engine construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, validator::Validate)]
pub struct SolarConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub panel_efficiency: f64,
    #[validate(range(min = 0.0))]
    pub panel_area_m2: f64,
    pub orientation_deg: f64,
    pub tilt_deg: f64,
    #[validate(range(min = 0.0))]
    pub peak_power_kw: f64,
}

/// Battery parameters. `current_soc_pct` is the engine's mutable running state;
/// every other field is a constant for the duration of one plan run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, validator::Validate)]
#[validate(schema(function = "validate_battery_config"))]
pub struct BatteryConfig {
    #[validate(range(min = 0.0))]
    pub capacity_kwh: f64,
    #[validate(range(min = 0.0))]
    pub max_charge_kw: f64,
    #[validate(range(min = 0.0))]
    pub max_discharge_kw: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_soc_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub max_soc_pct: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub current_soc_pct: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub roundtrip_efficiency: f64,
}

fn validate_battery_config(cfg: &BatteryConfig) -> Result<(), validator::ValidationError> {
    if cfg.min_soc_pct > cfg.max_soc_pct {
        return Err(validator::ValidationError::new(
            "min_soc_pct must not exceed max_soc_pct",
        ));
    }
    Ok(())
}

/// Household consumption parameters. `base_load_kw` is currently the
/// only field the engine consumes; the
/// other two fields describe a future, more elaborate profile and are carried through
/// config/validation but not yet used by `PlanEngine::run`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, validator::Validate)]
pub struct ConsumptionProfile {
    #[validate(range(min = 0.0))]
    pub base_load_kw: f64,
    #[validate(range(min = 0.0))]
    pub peak_load_kw: f64,
    #[validate(range(min = 0.0))]
    pub avg_daily_kwh: f64,
}

/// Bundles the engine's per-run inputs so the Compute stage can carry
/// them into a `tokio::task::JoinSet` worker closure without borrowing the pipeline's
/// config. Constructed once from [`crate::config::AppConfig`] when the pipeline is built;
/// a fresh [`crate::engine::PlanEngine`] is constructed from it per request, since a plan
/// is recomputed (not cached) on every client request.
#[derive(Debug, Clone, Copy)]
pub struct PlanEngineConfig {
    pub solar: SolarConfig,
    pub battery: BatteryConfig,
    pub consumption: ConsumptionProfile,
    pub price_threshold_sek_per_kwh: f64,
}

/// Per-connection state machine states. `Disconnected` is represented
/// structurally by an empty worker slot rather than as a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Ready,
    Processing,
}

/// A request to produce a plan for `location`/`region`, created by a worker on parsing
/// `forecast <location> <region>` and consumed by the Fetch stage.
///
/// `respond_to` is the out-of-thread notification channel back into the owning worker
///: the Compute stage fulfills it with the rendered response
/// text, and the worker drives `PROCESSING -> READY` when it resolves.
pub struct PlanRequest {
    pub request_id: u64,
    pub location: String,
    pub region: String,
    pub respond_to: oneshot::Sender<String>,
}

/// Output of the Fetch stage: the request identity plus two raw byte buffers. Either may
/// be empty on partial failure.
pub struct FetchedBundle {
    pub request_id: u64,
    pub location: String,
    pub region: String,
    pub weather_bytes: Vec<u8>,
    pub price_bytes: Vec<u8>,
    pub respond_to: oneshot::Sender<String>,
}

/// Output of the Parse stage: decoded, positionally-aligned series.
/// The two series need not be equal length; alignment is by index up to `min(len)`.
pub struct ParsedBundle {
    pub request_id: u64,
    pub location: String,
    pub region: String,
    pub weather_series: Vec<WeatherSample>,
    pub price_series: Vec<PriceSample>,
    pub respond_to: oneshot::Sender<String>,
}
