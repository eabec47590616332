pub mod config;
pub mod connection;
pub mod decode;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod fsm;
pub mod pipeline;
pub mod queue;
pub mod server;
pub mod telemetry;
pub mod worker;
pub mod worker_pool;
