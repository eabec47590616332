//! The per-connection client state machine.
//!
//! Parse, dispatch, return what the worker should write or do next: a small struct
//! plus free functions with explicit enum returns, the same shape used across
//! `engine.rs` and `fetch.rs`.

use tokio::sync::oneshot;

use crate::error::QueueError;
use crate::pipeline::Pipeline;

pub const BANNER: &str = "GridGuard LEOP Server\nCommands: forecast [location] [region]\nExample: forecast stockholm SE3\n\n> ";
const HELP: &str = "Commands: forecast [location] [region]\nExample: forecast stockholm SE3\n\n> ";
const UNKNOWN_COMMAND: &str = "ERROR: unknown command\n> ";
const QUEUE_FULL: &str = "ERROR: Pipeline queue full, try again later\n> ";

const DEFAULT_LOCATION: &str = "stockholm";
const DEFAULT_REGION: &str = "SE3";

/// One parsed client command line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Forecast { location: String, region: String },
    Unknown,
}

fn parse_command(line: &str) -> Command {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        None => Command::Help,
        Some(verb) if verb.eq_ignore_ascii_case("help") => Command::Help,
        Some(verb) if verb.eq_ignore_ascii_case("forecast") => {
            let location = tokens.next().unwrap_or(DEFAULT_LOCATION).to_string();
            let region = tokens.next().unwrap_or(DEFAULT_REGION).to_string();
            Command::Forecast { location, region }
        }
        _ => Command::Unknown,
    }
}

/// What the worker should do after handing one line to the FSM.
pub enum FsmStep {
    /// Stay in `READY`; write this text to the connection immediately.
    Reply(String),
    /// Transition to `PROCESSING`; the worker stores `receiver` and, once it resolves,
    /// writes the plan response and drives the connection back to `READY`. This
    /// transition is driven out-of-thread by the Compute stage, never by the
    /// connection's own command parsing.
    Processing(oneshot::Receiver<String>),
}

/// Runs one READY-state transition for a single newline-terminated command line.
pub async fn handle_line(line: &str, pipeline: &Pipeline) -> FsmStep {
    match parse_command(line.trim_end_matches(['\r', '\n'])) {
        Command::Help => FsmStep::Reply(HELP.to_string()),
        Command::Unknown => FsmStep::Reply(UNKNOWN_COMMAND.to_string()),
        Command::Forecast { location, region } => {
            let (tx, rx) = oneshot::channel();
            match pipeline.submit(location, region, tx).await {
                Ok(()) => FsmStep::Processing(rx),
                Err(QueueError::Full) | Err(QueueError::Closed) => FsmStep::Reply(QUEUE_FULL.to_string()),
            }
        }
    }
}
