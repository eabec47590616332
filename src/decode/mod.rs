//! The Decoder: turns one fetched body into a typed record set.
//!
//! Opaque to the rest of the pipeline — `decode_weather`/`decode_prices` take raw
//! bytes and return an already-validated series. Invalid samples are dropped and
//! logged at `warn!` rather than surfaced as an error; empty or malformed input
//! yields an empty series, never an error.

pub mod prices;
pub mod weather;

pub use prices::decode_prices;
pub use weather::decode_weather;
