//! The three-stage pipeline: owns the three bounded queues
//! (`ingress`, `fetched`, `parsed`) and the three stage worker pools
//! (Fetch -> Parse -> Compute), processing work asynchronously from the connection
//! workers.

pub mod stage;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::decode::{decode_prices, decode_weather};
use crate::domain::{FetchedBundle, ParsedBundle, Plan, PlanEngineConfig, PlanRequest};
use crate::engine::PlanEngine;
use crate::error::QueueError;
use crate::fetch::Fetcher;
use crate::queue::Queue;
use stage::{spawn_stage, Transform};

/// The Fetch stage's transform: builds both provider URLs, fetches
/// concurrently, and always emits a [`FetchedBundle`] — even on partial failure, with
/// the failed side left as an empty body rather than short-circuiting the request.
struct FetchTransform {
    fetcher: Arc<Fetcher>,
    weather_config: crate::config::WeatherConfig,
}

#[async_trait]
impl Transform<PlanRequest, FetchedBundle> for FetchTransform {
    async fn apply(&self, req: PlanRequest) -> Option<FetchedBundle> {
        let (lat, lon) = self.weather_config.coordinates_for(&req.location);
        let (weather_bytes, price_bytes) = tokio::join!(
            self.fetcher.fetch_weather(&req.location, lat, lon),
            self.fetcher.fetch_prices(&req.region),
        );

        Some(FetchedBundle {
            request_id: req.request_id,
            location: req.location,
            region: req.region,
            weather_bytes,
            price_bytes,
            respond_to: req.respond_to,
        })
    }
}

/// The Parse stage's transform: decodes both bodies into series.
/// Empty series are allowed downstream — a `ParsedBundle` is always produced.
struct ParseTransform;

#[async_trait]
impl Transform<FetchedBundle, ParsedBundle> for ParseTransform {
    async fn apply(&self, bundle: FetchedBundle) -> Option<ParsedBundle> {
        let weather_series = decode_weather(&bundle.weather_bytes);
        let price_series = decode_prices(&bundle.price_bytes);

        Some(ParsedBundle {
            request_id: bundle.request_id,
            location: bundle.location,
            region: bundle.region,
            weather_series,
            price_series,
            respond_to: bundle.respond_to,
        })
    }
}

/// Owns the three queues and three stage worker pools.
pub struct Pipeline {
    ingress: Queue<PlanRequest>,
    fetched: Queue<FetchedBundle>,
    parsed: Queue<ParsedBundle>,
    next_request_id: AtomicU64,
    fetch_tasks: AsyncMutex<JoinSet<()>>,
    parse_tasks: AsyncMutex<JoinSet<()>>,
    compute_tasks: AsyncMutex<JoinSet<()>>,
}

impl Pipeline {
    pub fn new(config: &AppConfig, fetcher: Arc<Fetcher>) -> Self {
        let capacity = config.pipeline.queue_capacity;
        let ingress: Queue<PlanRequest> = Queue::new(capacity);
        let fetched: Queue<FetchedBundle> = Queue::new(capacity);
        let parsed: Queue<ParsedBundle> = Queue::new(capacity);

        let mut fetch_tasks = JoinSet::new();
        spawn_stage(
            "fetch",
            ingress.clone(),
            fetched.clone(),
            config.pipeline.fetch_workers,
            Arc::new(FetchTransform {
                fetcher,
                weather_config: config.weather.clone(),
            }),
            &mut fetch_tasks,
        );

        let mut parse_tasks = JoinSet::new();
        spawn_stage(
            "parse",
            fetched.clone(),
            parsed.clone(),
            config.pipeline.parse_workers,
            Arc::new(ParseTransform),
            &mut parse_tasks,
        );

        let mut compute_tasks = JoinSet::new();
        let engine_config = PlanEngineConfig {
            solar: config.solar,
            battery: config.battery,
            consumption: config.consumption,
            price_threshold_sek_per_kwh: config.prices.price_threshold_sek_per_kwh,
        };
        spawn_compute_stage(parsed.clone(), config.pipeline.compute_workers, engine_config, &mut compute_tasks);

        Pipeline {
            ingress,
            fetched,
            parsed,
            next_request_id: AtomicU64::new(1),
            fetch_tasks: AsyncMutex::new(fetch_tasks),
            parse_tasks: AsyncMutex::new(parse_tasks),
            compute_tasks: AsyncMutex::new(compute_tasks),
        }
    }

    /// Enqueues a `forecast <location> <region>` request. Never
    /// blocks — the worker calling this must never stall the connection-multiplexing
    /// loop on a full pipeline.
    pub async fn submit(
        &self,
        location: String,
        region: String,
        respond_to: oneshot::Sender<String>,
    ) -> Result<(), QueueError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = PlanRequest {
            request_id,
            location,
            region,
            respond_to,
        };
        self.ingress.try_push(request).await
    }

    /// Cascading shutdown: close ingress, drain and join the Fetch
    /// pool, close `fetched`, drain and join Parse, close `parsed`, drain and join
    /// Compute.
    pub async fn shutdown(&self) {
        info!("pipeline shutdown: closing ingress");
        self.ingress.close();
        join_all(&self.fetch_tasks).await;

        info!("pipeline shutdown: closing fetched queue");
        self.fetched.close();
        join_all(&self.parse_tasks).await;

        info!("pipeline shutdown: closing parsed queue");
        self.parsed.close();
        join_all(&self.compute_tasks).await;

        info!("pipeline shutdown complete");
    }
}

async fn join_all(tasks: &AsyncMutex<JoinSet<()>>) {
    let mut set = tasks.lock().await;
    while let Some(result) = set.join_next().await {
        if let Err(err) = result {
            warn!(%err, "pipeline worker task panicked");
        }
    }
}

/// Spawns the Compute stage: runs the `PlanEngine`, formats the
/// textual response, and delivers it through the request's `respond_to` channel — the
/// out-of-thread notification hop back into the owning worker, which drives that connection's `PROCESSING -> READY` transition.
fn spawn_compute_stage(
    parsed: Queue<ParsedBundle>,
    worker_count: usize,
    engine_config: PlanEngineConfig,
    tasks: &mut JoinSet<()>,
) {
    for worker_id in 0..worker_count {
        let parsed = parsed.clone();
        tasks.spawn(async move {
            loop {
                let bundle = match parsed.pop().await {
                    Some(bundle) => bundle,
                    None => break,
                };

                let mut engine = PlanEngine::new(
                    engine_config.solar,
                    engine_config.battery,
                    engine_config.consumption,
                    engine_config.price_threshold_sek_per_kwh,
                );
                let plan = engine.run(&bundle.weather_series, &bundle.price_series);
                let response = render_plan_response(&bundle.location, &bundle.region, &plan);

                // The connection may already be gone (client disconnected while the
                // request was in flight); a dropped receiver is not an error here.
                let _ = bundle.respond_to.send(response);
            }
            tracing::debug!(worker_id, "compute stage worker exiting");
        });
    }
}

/// Renders the `forecast` response body.
fn render_plan_response(location: &str, region: &str, plan: &Plan) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Processing request...");
    let _ = writeln!(out, "=== Energy Plan for {location}/{region} ===");
    let _ = writeln!(out, "Entries: {}", plan.entries.len());
    let _ = writeln!(out, "Total Cost: {:.2} SEK", plan.total_cost_sek);
    let _ = writeln!(out, "Grid Import: {:.2} kWh", plan.total_import_kwh);
    let _ = writeln!(out, "Grid Export: {:.2} kWh", plan.total_export_kwh);
    let _ = writeln!(out);
    let _ = writeln!(out, "First 10 hours:");
    for (i, entry) in plan.entries.iter().take(10).enumerate() {
        let _ = writeln!(
            out,
            "[{i}] Production: {:.2} kWh, Price: {:.2} SEK/kWh, Action: {}",
            entry.production_kwh, entry.spot_price, entry.action
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, PlanInterval};
    use chrono::Utc;

    #[test]
    fn renders_literal_layout() {
        let plan = Plan {
            entries: vec![PlanInterval {
                timestamp: Utc::now(),
                action: Action::ChargeBattery,
                production_kwh: 2.21,
                consumption_kwh: 0.5,
                grid_flow_kwh: -1.5,
                battery_flow_kwh: 1.5,
                spot_price: 0.4,
                estimated_cost_sek: 0.0,
                battery_soc_pct: 65.0,
            }],
            total_cost_sek: 0.0,
            total_import_kwh: 0.0,
            total_export_kwh: 0.0,
        };
        let rendered = render_plan_response("stockholm", "SE3", &plan);
        assert!(rendered.starts_with("Processing request...\n"));
        assert!(rendered.contains("=== Energy Plan for stockholm/SE3 ==="));
        assert!(rendered.contains("Entries: 1"));
        assert!(rendered.contains("[0] Production: 2.21 kWh, Price: 0.40 SEK/kWh, Action: CHARGE_BATTERY"));
    }

    #[test]
    fn renders_zero_entries_plan() {
        let plan = Plan::default();
        let rendered = render_plan_response("stockholm", "SE3", &plan);
        assert!(rendered.contains("Entries: 0"));
    }

    #[tokio::test]
    async fn submit_builds_increasing_request_ids() {
        let cfg = test_config();
        let fetcher = Arc::new(Fetcher::new(&cfg.http, &cfg.weather, &cfg.prices).unwrap());
        let pipeline = Pipeline::new(&cfg, fetcher);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        pipeline.submit("stockholm".into(), "SE3".into(), tx1).await.unwrap();
        pipeline.submit("stockholm".into(), "SE3".into(), tx2).await.unwrap();
        pipeline.shutdown().await;
    }

    fn test_config() -> AppConfig {
        use crate::config::*;
        use crate::domain::{BatteryConfig, ConsumptionProfile, SolarConfig};
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                max_threads: 1,
                max_clients_per_thread: 1,
                client_buffer_size: 4096,
                select_timeout_secs: 1,
                client_idle_timeout_secs: 300,
            },
            http: HttpConfig {
                timeout_secs: 5,
                max_retries: 0,
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
                queue_capacity: 4,
                fetch_workers: 1,
                parse_workers: 1,
                compute_workers: 1,
            },
            prices: PricesConfig {
                base_url: "http://127.0.0.1:1".into(),
                price_threshold_sek_per_kwh: 1.0,
                cache_ttl_secs: 300,
            },
            weather: WeatherConfig {
                base_url: "http://127.0.0.1:1".into(),
                timezone: "Europe/Stockholm".into(),
                cache_ttl_secs: 300,
                locations: Default::default(),
            },
            telemetry: TelemetryConfig {
                log_level: "info".into(),
                log_json: false,
            },
        }
    }
}
