//! Infrastructure adapters: the HTTP transport and process telemetry.

pub mod error;
pub mod http;
pub mod telemetry;
