//! Domain layer types and invariants.

pub mod error;
pub mod mentions;
pub mod trending;
