//! Library crate for vps-scan-sim exposing the simulated scan engine and its HTTP surface.
pub mod config;
pub mod keywords;
pub mod profile;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod types;
