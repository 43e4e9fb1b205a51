//! Application services layer.

pub mod enrichment;
pub mod error;
pub mod mentions;
pub mod ranking;
pub mod repos;
pub mod trending;
