//! Runtime bootstrap for the host binary.

pub mod error;
pub mod telemetry;
