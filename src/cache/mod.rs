//! Result cache for trending rankings.
//!
//! - **Store**: passive key/value storage with expiry and set-if-absent,
//!   either in-process ([`MemoryCacheStore`]) or shared through Postgres.
//! - **Revalidation**: stale entries are served immediately while a single
//!   background refresh per key recomputes them.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "postgres"
//! entry_ttl_seconds = 300
//! soft_ttl_seconds = 60
//! lock_ttl_seconds = 30
//! ```

mod config;
mod keys;
pub(crate) mod lock;
mod revalidate;
mod store;

pub use config::CacheConfig;
pub use keys::CacheKey;
pub use revalidate::{LockOutcome, Revalidation, RevalidationCoordinator};
pub use store::{CacheEntry, CacheError, CacheStore, MemoryCacheStore, decode_items, encode_items};
