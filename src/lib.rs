//! Sync and caching engine for code-forge dashboards.
//!
//! Mirrors issue/commit/activity data from a forge query API into a local
//! cache so dashboards render near-real-time statistics without exceeding
//! the platform's rate limits. The HTTP surface consuming this crate lives
//! elsewhere; the `forgeboard` binary drives the background refresh
//! scheduler and can print one repository's statistics directly.

pub mod cache;
pub mod config;
pub mod forge;
pub mod scheduler;
pub mod stats;
