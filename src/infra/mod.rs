//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod dexscreener;
pub mod error;
pub mod http;
pub mod memory;
pub mod telemetry;
