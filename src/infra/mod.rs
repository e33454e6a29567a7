//! Runtime bootstrap for the binary.

pub mod error;
pub mod telemetry;
