//! The Server: owns the listener, the pipeline, and the worker
//! pool; lifecycle and signal handling.
//!
//! Binds with an explicit accept loop rather than a framework's graceful-shutdown
//! combinator, racing `accept()` against `shutdown_signal()` with `tokio::select!`.
//! `SO_REUSEADDR` is set via `socket2` before handing the listener to tokio.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::GridGuardError;
use crate::fetch::Fetcher;
use crate::pipeline::Pipeline;
use crate::worker_pool::{Admission, WorkerPool};

pub struct Server {
    listener: TcpListener,
    worker_pool: WorkerPool,
    pipeline: Arc<Pipeline>,
}

impl Server {
    pub async fn bind(config: &AppConfig) -> Result<Self, GridGuardError> {
        let addr = config
            .server
            .listen_addr()
            .map_err(GridGuardError::Config)?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).map_err(|source| GridGuardError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_reuse_address(true).map_err(|source| GridGuardError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_nonblocking(true).map_err(|source| GridGuardError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.bind(&addr.into()).map_err(|source| GridGuardError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket
            .listen(config.server.backlog())
            .map_err(|source| GridGuardError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let listener = TcpListener::from_std(socket.into()).map_err(|source| GridGuardError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let fetcher = Arc::new(
            Fetcher::new(&config.http, &config.weather, &config.prices)
                .context("failed to build HTTP fetcher")
                .map_err(GridGuardError::Config)?,
        );
        let pipeline = Arc::new(Pipeline::new(config, fetcher));

        let worker_pool = WorkerPool::new(
            config.server.max_threads,
            config.server.max_clients_per_thread,
            pipeline.clone(),
            config.server.client_buffer_size,
            Duration::from_secs(config.server.select_timeout_secs),
            Duration::from_secs(config.server.client_idle_timeout_secs),
        );

        info!(%addr, "GridGuard LEOP server bound");
        Ok(Server {
            listener,
            worker_pool,
            pipeline,
        })
    }

    /// Bound listen address, mainly useful for tests that bind to port 0 and need to
    /// discover the OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown_signal` resolves: on a new socket, hands it
    /// to `pool.add`; if the pool reports `PoolFull`, closes the socket immediately.
    /// Signal handling is the caller's responsibility.
    pub async fn run(&self, shutdown_signal: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(err) = stream.set_nodelay(true) {
                                warn!(%peer, %err, "failed to set TCP_NODELAY");
                            }
                            match self.worker_pool.add(stream).await {
                                Admission::Ok => {}
                                Admission::PoolFull => {
                                    // `add` consumed the socket; it is dropped (closed) here.
                                    warn!(%peer, "worker pool full, closing connection");
                                }
                            }
                        }
                        Err(err) => {
                            error!(%err, "accept failed");
                        }
                    }
                }
                _ = &mut shutdown_signal => {
                    info!("shutdown signal observed, exiting accept loop");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    /// Reverse-order teardown: worker pool, then pipeline, then
    /// listener (closed implicitly on drop).
    async fn shutdown(&self) {
        info!("server shutdown: tearing down worker pool");
        self.worker_pool.shutdown().await;
        info!("server shutdown: tearing down pipeline");
        self.pipeline.shutdown().await;
        info!("server shutdown complete");
    }
}
