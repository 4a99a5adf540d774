//! recipiece-cache: a lazily established, shared cache connection
//!
//! The crate provides one long-lived connection to a Redis-compatible cache,
//! created on first use and shared by every caller afterwards:
//!
//! * [`LazyConnectionHandle`]: owns at most one connection; concurrent first
//!   callers share a single handshake; failures are retried on the next call
//! * [`Connection`]: a multiplexed RESP2 connection driven by a background task
//! * [`SessionRegistry`] and [`TokenBlacklist`]: the application's cache consumers
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> recipiece_cache::Result<()> {
//! use recipiece_cache::{CacheHandle, TokenBlacklist};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! // Nothing connects until the first acquire; REDIS_URL is read then
//! let cache = Arc::new(CacheHandle::from_env());
//!
//! let blacklist = TokenBlacklist::new(cache.clone());
//! blacklist.revoke("Bearer eyJhbGciOi...", Duration::from_secs(3600)).await?;
//!
//! let conn = cache.acquire().await?;
//! conn.ping().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blacklist;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod protocol;
pub mod session;

pub use blacklist::TokenBlacklist;
pub use client::{connect_url, CacheConnector, ConnectionInfo};
pub use config::{EnvUrl, FixedUrl, UrlSource};
pub use connection::{Connection, ConnectionConfig, ErrorObserver};
pub use error::{Error, Result};
pub use handle::{CacheHandle, Connector, HandleStatus, LazyConnectionHandle, ManagedConnection};
pub use session::{SessionPayload, SessionRegistry};
