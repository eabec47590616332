//! elprisetjustnu.se response decoding.
//!
//! Field layout follows the API's JSON shape (`SEK_per_kWh`, `EUR_per_kWh`, `EXR`,
//! `time_start`, `time_end`), decoded with `serde(rename_all = "...")` and a graceful
//! degrade on a parse failure. One sample is decoded per API row, without splitting
//! each hourly row into finer sub-intervals — the engine treats a row's span as one
//! interval regardless of its wall-clock length.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::domain::PriceSample;

#[derive(Debug, Deserialize)]
struct RawPriceEntry {
    #[serde(rename = "SEK_per_kWh")]
    sek_per_kwh: f64,
    #[serde(rename = "EUR_per_kWh")]
    eur_per_kwh: f64,
    #[serde(rename = "EXR")]
    exchange_rate: f64,
    time_start: String,
    time_end: String,
}

/// Decodes an elprisetjustnu.se JSON array body into a series of [`PriceSample`]s.
///
/// Malformed JSON (not a JSON array of the expected shape) returns an empty vector
///. Rows are validated against [`PriceSample::is_valid`]; rows that
/// fail are dropped and logged at `warn!` with their index.
pub fn decode_prices(bytes: &[u8]) -> Vec<PriceSample> {
    if bytes.is_empty() {
        return Vec::new();
    }

    let raw: Vec<RawPriceEntry> = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "failed to parse price response, returning empty series");
            return Vec::new();
        }
    };

    let mut out = Vec::with_capacity(raw.len());
    for (i, entry) in raw.into_iter().enumerate() {
        let (start, end) = match (parse_timestamp(&entry.time_start), parse_timestamp(&entry.time_end)) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                warn!(index = i, "unparseable price interval timestamps, skipping sample");
                continue;
            }
        };

        let sample = PriceSample {
            interval_start: start,
            interval_end: end,
            price_sek_per_kwh: entry.sek_per_kwh,
            price_eur_per_kwh: entry.eur_per_kwh,
            exchange_rate: entry.exchange_rate,
        };

        if sample.is_valid() {
            out.push(sample);
        } else {
            warn!(index = i, ?sample, "price sample failed invariant checks, dropping");
        }
    }

    out
}

/// Parses the `YYYY-MM-DDTHH:MM:SS+offset` timestamps elprisetjustnu.se emits,
/// normalizing to UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> Vec<u8> {
        serde_json::json!([
            {
                "SEK_per_kWh": 0.45,
                "EUR_per_kWh": 0.04,
                "EXR": 11.2,
                "time_start": "2026-02-09T00:00:00+01:00",
                "time_end": "2026-02-09T01:00:00+01:00"
            },
            {
                "SEK_per_kWh": 1.85,
                "EUR_per_kWh": 0.16,
                "EXR": 11.2,
                "time_start": "2026-02-09T01:00:00+01:00",
                "time_end": "2026-02-09T02:00:00+01:00"
            }
        ])
        .to_string()
        .into_bytes()
    }

    #[test]
    fn decodes_well_formed_body() {
        let out = decode_prices(&sample_body());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].price_sek_per_kwh, 0.45);
        assert_eq!(out[1].price_sek_per_kwh, 1.85);
    }

    #[test]
    fn empty_input_yields_empty_series() {
        assert!(decode_prices(&[]).is_empty());
    }

    #[test]
    fn malformed_json_yields_empty_series() {
        assert!(decode_prices(b"{}").is_empty());
    }

    #[test]
    fn out_of_range_price_is_dropped() {
        let body = serde_json::json!([
            {
                "SEK_per_kWh": 42.0,
                "EUR_per_kWh": 4.0,
                "EXR": 11.2,
                "time_start": "2026-02-09T00:00:00+01:00",
                "time_end": "2026-02-09T01:00:00+01:00"
            }
        ])
        .to_string()
        .into_bytes();
        assert!(decode_prices(&body).is_empty());
    }
}
