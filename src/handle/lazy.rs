//! `LazyConnectionHandle` implementation

use super::{Connector, ManagedConnection};
use crate::config::UrlSource;
use crate::connection::ErrorObserver;
use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Handshake shared by every caller that arrives while it is in flight
type Pending<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

/// Observable handle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// No connection and no handshake in flight
    Uninitialized,
    /// Handshake in flight
    Connecting,
    /// Live connection stored
    Connected,
}

impl std::fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

enum State<T> {
    Uninitialized,
    Connecting { generation: u64, pending: Pending<T> },
    Connected { connection: Arc<T> },
}

struct Inner<T> {
    state: State<T>,
    // Bumped per handshake; a result is only stored if its attempt is still current
    generation: u64,
}

/// Lazily established, shared connection handle
///
/// Owns at most one live connection. The first [`acquire`](Self::acquire)
/// resolves the URL and starts the handshake; callers that arrive before it
/// completes await the same handshake; afterwards every caller gets the same
/// `Arc` with no network activity.
///
/// A failed handshake is not cached: the handle returns to
/// [`HandleStatus::Uninitialized`] and the next `acquire` tries again.
///
/// Pass the handle to consumers explicitly (typically as an `Arc`); there is
/// no process-global instance.
pub struct LazyConnectionHandle<C: Connector> {
    connector: C,
    url_source: Box<dyn UrlSource>,
    observer: ErrorObserver,
    inner: Mutex<Inner<C::Connection>>,
}

impl<C: Connector> LazyConnectionHandle<C> {
    /// Create a handle; nothing is connected until the first `acquire`
    pub fn new(connector: C, url_source: impl UrlSource + 'static) -> Self {
        Self {
            connector,
            url_source: Box::new(url_source),
            observer: Arc::new(log_connection_error),
            inner: Mutex::new(Inner {
                state: State::Uninitialized,
                generation: 0,
            }),
        }
    }

    /// Replace the default observer (which logs) for asynchronous connection errors
    pub fn with_error_observer(mut self, observer: ErrorObserver) -> Self {
        self.observer = observer;
        self
    }

    /// The connector this handle establishes connections with
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Current state
    pub fn status(&self) -> HandleStatus {
        match self.lock().state {
            State::Uninitialized => HandleStatus::Uninitialized,
            State::Connecting { .. } => HandleStatus::Connecting,
            State::Connected { .. } => HandleStatus::Connected,
        }
    }

    /// Whether a live connection is stored
    pub fn is_connected(&self) -> bool {
        self.status() == HandleStatus::Connected
    }

    /// Get the shared connection, establishing it on first use
    ///
    /// # Errors
    ///
    /// * `Error::Config` if the URL source has no URL (no attempt is made) or
    ///   the URL is invalid
    /// * any connection error from the handshake; the next call retries
    pub async fn acquire(&self) -> Result<Arc<C::Connection>> {
        crate::metrics::counters::handle_acquired();

        let (generation, pending) = {
            let mut inner = self.lock();
            match &inner.state {
                State::Connected { connection } => return Ok(connection.clone()),
                State::Connecting {
                    generation,
                    pending,
                } => {
                    tracing::trace!(generation, "awaiting in-flight handshake");
                    (*generation, pending.clone())
                }
                State::Uninitialized => {
                    let url = self.url_source.resolve().ok_or_else(|| {
                        crate::metrics::counters::connect_failed(crate::metrics::labels::CATEGORY_CONFIG);
                        Error::Config(format!("{} is not set", self.url_source.describe()))
                    })?;

                    inner.generation += 1;
                    let generation = inner.generation;
                    let pending = self.start_handshake(url, generation);
                    inner.state = State::Connecting {
                        generation,
                        pending: pending.clone(),
                    };
                    (generation, pending)
                }
            }
        };

        let result = pending.await;

        let mut inner = self.lock();
        let current = matches!(
            &inner.state,
            State::Connecting { generation: g, .. } if *g == generation
        );
        if current {
            inner.state = match &result {
                Ok(connection) => State::Connected {
                    connection: connection.clone(),
                },
                Err(_) => State::Uninitialized,
            };
        }
        result
    }

    /// Close the stored connection and return to `Uninitialized`
    ///
    /// An in-flight handshake is awaited first so that the connection it
    /// produces is closed rather than leaked. A no-op when nothing is stored.
    pub async fn reset(&self) -> Result<()> {
        let previous = std::mem::replace(&mut self.lock().state, State::Uninitialized);

        let connection = match previous {
            State::Uninitialized => return Ok(()),
            State::Connected { connection } => connection,
            State::Connecting { pending, .. } => match pending.await {
                Ok(connection) => connection,
                // Nothing was established
                Err(_) => return Ok(()),
            },
        };

        crate::metrics::counters::handle_reset();
        tracing::info!("closing cache connection");
        connection.close().await
    }

    fn start_handshake(&self, url: String, generation: u64) -> Pending<C::Connection> {
        let connect = self.connector.connect(url);
        let observer = self.observer.clone();

        async move {
            crate::metrics::counters::connect_attempted();
            let started = Instant::now();

            match connect.await {
                Ok(connection) => {
                    // Exactly one observer per established connection
                    connection.on_error(observer);
                    crate::metrics::counters::connect_succeeded();
                    crate::metrics::histograms::connect_duration(
                        started.elapsed().as_millis() as u64,
                    );
                    tracing::info!(generation, "cache connection established");
                    Ok(Arc::new(connection))
                }
                Err(e) => {
                    crate::metrics::counters::connect_failed(e.category());
                    tracing::warn!(generation, error = %e, "cache connection failed");
                    Err(e)
                }
            }
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<C::Connection>> {
        // State is replaced wholesale, so a poisoned lock is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<C: Connector> std::fmt::Debug for LazyConnectionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyConnectionHandle")
            .field("status", &self.status())
            .field("url_source", &self.url_source.describe())
            .finish()
    }
}

fn log_connection_error(err: &Error) {
    tracing::error!(error = %err, category = err.category(), "cache connection error");
}
