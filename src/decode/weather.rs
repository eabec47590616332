//! Open-Meteo response decoding.
//!
//! Iterates a parallel-arrays response, coerces each field with a default, and builds
//! one sample per index. No persistence-forecast fallback is attempted on a no-signal
//! reading; a fetch or decode failure here just yields an empty series, same as any
//! other permanent-remote failure.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::domain::WeatherSample;

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: HourlySeries,
}

#[derive(Debug, Deserialize, Default)]
struct HourlySeries {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    shortwave_radiation: Vec<Option<f64>>,
}

/// Decodes an Open-Meteo `hourly` JSON body into a series of [`WeatherSample`]s.
///
/// Malformed JSON or an empty `hourly` block returns an empty vector rather than an
/// error. Each row is validated against [`WeatherSample::is_valid`]; rows that fail
/// are dropped and logged at `warn!` with their index.
pub fn decode_weather(bytes: &[u8]) -> Vec<WeatherSample> {
    if bytes.is_empty() {
        return Vec::new();
    }

    let parsed: OpenMeteoResponse = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "failed to parse weather response, returning empty series");
            return Vec::new();
        }
    };

    let h = parsed.hourly;
    let mut out = Vec::with_capacity(h.time.len());

    for i in 0..h.time.len() {
        let timestamp = match parse_timestamp(&h.time[i]) {
            Some(ts) => ts,
            None => {
                warn!(index = i, raw = %h.time[i], "unparseable weather timestamp, skipping sample");
                continue;
            }
        };

        let sample = WeatherSample {
            timestamp,
            solar_irradiance_w_per_m2: field(&h.shortwave_radiation, i).unwrap_or(0.0),
            cloud_cover_pct: field(&h.cloud_cover, i).unwrap_or(0.0),
            temperature_c: field(&h.temperature_2m, i).unwrap_or(0.0),
            wind_speed_m_s: field(&h.wind_speed_10m, i).unwrap_or(0.0),
            humidity_pct: field(&h.relative_humidity_2m, i).unwrap_or(0.0),
        };

        if sample.is_valid() {
            out.push(sample);
        } else {
            warn!(index = i, ?sample, "weather sample failed invariant checks, dropping");
        }
    }

    out
}

fn field(series: &[Option<f64>], i: usize) -> Option<f64> {
    series.get(i).copied().flatten()
}

/// Parses the ISO-8601 `YYYY-MM-DDTHH:MM` timestamps Open-Meteo emits (no offset, local
/// to the requested `timezone` query parameter) as UTC, propagate unchanged through every stage.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}
