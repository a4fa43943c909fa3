//! Runtime bootstrap for the binary: telemetry and its errors.

pub mod error;
pub mod telemetry;
