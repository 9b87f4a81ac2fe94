//! Irongate daemon library.
//!
//! Exposes the gateway assembly and lifecycle pieces for integration tests.
//! In production `irongate-daemon` runs as a binary (main.rs).

pub mod cli;
pub mod gateway;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;

pub use gateway::{Egress, Gateway, GatewayStatus, LoadedRules};
pub use orchestrator::Orchestrator;
