use std::process::ExitCode;

use tracing::{error, info};

use gridguard_server::config::AppConfig;
use gridguard_server::server::Server;
use gridguard_server::telemetry::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "configuration load failed");
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "server failed to bind, exiting");
            return ExitCode::FAILURE;
        }
    };

    info!("GridGuard LEOP server starting");
    server.run(shutdown_signal()).await;
    info!("shutdown complete");
    ExitCode::SUCCESS
}
