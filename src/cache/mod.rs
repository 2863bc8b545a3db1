//! Caching engine for upstream data under tight rate limits.
//!
//! This module provides the storage-agnostic machinery:
//! - TTL'd entries with revalidation tokens, over SQLite with an in-process
//!   fallback
//! - request coalescing (one in-flight upstream fetch per key)
//! - conditional fetching (TTL-only refresh on "not modified")
//! - typed cache keys with the per-domain TTL policy

pub mod backend;
pub mod coalesce;
pub mod key;
pub mod layer;
pub mod store;

pub use backend::{CacheBackend, CacheEntry};
pub use coalesce::RequestCoalescer;
pub use key::{CacheKey, Domain};
pub use layer::{CacheHit, CacheLayer, CacheSource, FetchOutcome};
pub use store::CacheStore;
