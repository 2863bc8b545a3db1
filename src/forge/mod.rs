//! Forge upstream: typed query-API client, domain types and cached facade.

pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod error;
pub mod types;
pub mod webhook;

pub use cached_client::CachedForgeClient;
pub use client::ForgeClient;
pub use error::ForgeError;
