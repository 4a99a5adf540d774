//! Lazily established, shared connection handle
//!
//! A [`LazyConnectionHandle`] owns at most one live connection to an external
//! service. The connection is established on the first [`acquire`] call and
//! every later caller receives the same instance. Callers racing the first
//! handshake wait on that handshake instead of starting their own.
//!
//! The handle is generic over a [`Connector`] so that the production cache
//! client and test doubles go through the same lifecycle.
//!
//! [`acquire`]: LazyConnectionHandle::acquire

mod lazy;

pub use lazy::{HandleStatus, LazyConnectionHandle};

use crate::client::CacheConnector;
use crate::config::{EnvUrl, DEFAULT_URL_VAR};
use crate::connection::ErrorObserver;
use crate::Result;
use futures::future::BoxFuture;

/// A connection the handle can own
pub trait ManagedConnection: Send + Sync + 'static {
    /// Register an observer for asynchronous connection-level errors
    fn on_error(&self, observer: ErrorObserver);

    /// Close the underlying connection
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Establishes connections from a URL
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced
    type Connection: ManagedConnection;

    /// Start establishing a connection
    ///
    /// The returned future must not borrow `self`: it is shared between every
    /// caller waiting on the handshake.
    fn connect(&self, url: String) -> BoxFuture<'static, Result<Self::Connection>>;
}

/// The handle used by the application: a cache connection from `REDIS_URL`
pub type CacheHandle = LazyConnectionHandle<CacheConnector>;

impl LazyConnectionHandle<CacheConnector> {
    /// Production handle: default connector, URL from `REDIS_URL` (or `.env`)
    pub fn from_env() -> Self {
        Self::new(CacheConnector::default(), EnvUrl::new(DEFAULT_URL_VAR))
    }
}
