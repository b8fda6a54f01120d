pub mod common;
pub mod config;
pub mod domain;
pub mod telemetry;
