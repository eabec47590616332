#![cfg(test)]
//! Worker pool saturation and shutdown-under-load scenarios.
//!
//! Marked `#[ignore]` by default; run explicitly with `--ignored --test-threads=1`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gridguard_server::config::{
    AppConfig, HttpConfig, PipelineConfig, PricesConfig, ServerConfig, TelemetryConfig, WeatherConfig,
};
use gridguard_server::domain::{BatteryConfig, ConsumptionProfile, SolarConfig};
use gridguard_server::fetch::Fetcher;
use gridguard_server::pipeline::Pipeline;
use gridguard_server::worker_pool::{Admission, WorkerPool};
use tokio::net::TcpStream;
use tokio::time::timeout;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(max_threads: usize, max_clients_per_thread: usize, http_timeout_secs: u64) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            max_threads,
            max_clients_per_thread,
            client_buffer_size: 4096,
            select_timeout_secs: 1,
            client_idle_timeout_secs: 300,
        },
        http: HttpConfig {
            timeout_secs: http_timeout_secs,
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
            queue_capacity: 32,
            fetch_workers: 3,
            parse_workers: 3,
            compute_workers: 3,
        },
        prices: PricesConfig {
            base_url: "http://127.0.0.1:1".into(),
            price_threshold_sek_per_kwh: 1.0,
            cache_ttl_secs: 1,
        },
        weather: WeatherConfig {
            base_url: "http://127.0.0.1:1".into(),
            timezone: "Europe/Stockholm".into(),
            cache_ttl_secs: 1,
            locations: HashMap::new(),
        },
        telemetry: TelemetryConfig {
            log_level: "error".into(),
            log_json: false,
        },
    }
}

async fn connected_server_stream() -> TcpStream {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _client = std::net::TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().await.unwrap();
    server
}

/// Scenario 5: submitting `MAX_THREADS * MAX_CLIENTS_PER_THREAD + 1`
/// connections rejects exactly the last one with `POOL_FULL`.
#[tokio::test]
#[ignore] // slow/stress test, run with: cargo test --test load_tests -- --ignored
async fn pool_full_only_past_total_capacity() {
    let max_threads = 3;
    let max_clients_per_thread = 2;
    let cfg = test_config(max_threads, max_clients_per_thread, 5);

    let fetcher = Arc::new(Fetcher::new(&cfg.http, &cfg.weather, &cfg.prices).unwrap());
    let pipeline = Arc::new(Pipeline::new(&cfg, fetcher));
    let pool = WorkerPool::new(
        max_threads,
        max_clients_per_thread,
        pipeline.clone(),
        cfg.server.client_buffer_size,
        Duration::from_secs(cfg.server.select_timeout_secs),
        Duration::from_secs(cfg.server.client_idle_timeout_secs),
    );

    let total_capacity = max_threads * max_clients_per_thread;
    for i in 0..total_capacity {
        let stream = connected_server_stream().await;
        assert_eq!(
            pool.add(stream).await,
            Admission::Ok,
            "connection {i} should be admitted within total capacity"
        );
    }

    let overflow = connected_server_stream().await;
    assert_eq!(pool.add(overflow).await, Admission::PoolFull);

    pool.shutdown().await;
    pipeline.shutdown().await;
}

/// Scenario 6: sending a shutdown signal while requests are
/// in-flight in the fetch queue; every stage terminates within
/// `HTTP_TIMEOUT + epsilon`.
#[tokio::test]
#[ignore] // slow/stress test, run with: cargo test --test load_tests -- --ignored
async fn shutdown_completes_within_http_timeout_bound_with_inflight_requests() {
    let http_timeout_secs = 2;
    let weather_mock = MockServer::start().await;
    let prices_mock = MockServer::start().await;
    // Respond slower than nothing but well within the configured HTTP timeout, so
    // requests are genuinely in-flight when shutdown is triggered.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}").set_delay(Duration::from_millis(500)))
        .mount(&weather_mock)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]").set_delay(Duration::from_millis(500)))
        .mount(&prices_mock)
        .await;

    let mut cfg = test_config(2, 2, http_timeout_secs);
    cfg.weather.base_url = weather_mock.uri();
    cfg.prices.base_url = prices_mock.uri();
    cfg.pipeline.fetch_workers = 2;

    let fetcher = Arc::new(Fetcher::new(&cfg.http, &cfg.weather, &cfg.prices).unwrap());
    let pipeline = Arc::new(Pipeline::new(&cfg, fetcher));

    for i in 0..10 {
        let (tx, _rx) = tokio::sync::oneshot::channel();
        pipeline
            .submit(format!("city-{i}"), "SE3".into(), tx)
            .await
            .expect("ingress should accept within queue capacity");
    }

    let start = Instant::now();
    let bound = Duration::from_secs(http_timeout_secs) + Duration::from_secs(5);
    timeout(bound, pipeline.shutdown())
        .await
        .expect("pipeline shutdown should complete within the HTTP timeout bound");

    assert!(
        start.elapsed() <= bound,
        "shutdown took {:?}, expected within {:?}",
        start.elapsed(),
        bound
    );
}
