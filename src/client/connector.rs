//! Connection establishment from a cache URL

use super::connection_string::{ConnectionInfo, TransportType, DEFAULT_PORT};
use crate::connection::{Connection, ConnectionConfig, ErrorObserver, Transport};
use crate::handle::{Connector, ManagedConnection};
use crate::{Error, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::Instrument;

/// Connects to the cache server described by a URL
///
/// Settings carried by the URL (credentials, database, client name, TLS) come
/// from the URL; timeouts and queue depth come from the connector.
#[derive(Debug, Clone, Default)]
pub struct CacheConnector {
    connect_timeout: Option<Duration>,
    response_timeout: Option<Duration>,
    channel_capacity: Option<usize>,
}

impl CacheConnector {
    /// Connector with no timeouts
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound transport connect plus handshake
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Bound each command's reply
    pub fn response_timeout(mut self, duration: Duration) -> Self {
        self.response_timeout = Some(duration);
        self
    }

    /// Depth of the per-connection command queue
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    fn config_for(&self, info: &ConnectionInfo) -> ConnectionConfig {
        let mut config = info.to_config();
        config.connect_timeout = self.connect_timeout;
        config.response_timeout = self.response_timeout;
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }
        config
    }
}

impl Connector for CacheConnector {
    type Connection = Connection;

    fn connect(&self, url: String) -> BoxFuture<'static, Result<Connection>> {
        let this = self.clone();
        Box::pin(async move { this.connect_url(&url).await })
    }
}

impl CacheConnector {
    /// Parse `url`, open the transport and run the handshake
    pub async fn connect_url(&self, url: &str) -> Result<Connection> {
        let info = ConnectionInfo::parse(url)?;
        Connection::connect(&info, &self.config_for(&info)).await
    }
}

impl Connection {
    /// Open the transport described by `info` and run the handshake
    ///
    /// `config.connect_timeout` bounds both steps together.
    pub async fn connect(info: &ConnectionInfo, config: &ConnectionConfig) -> Result<Self> {
        let address = info.address();
        let attempt = async {
            let transport = open_transport(info).await?;
            Connection::establish(transport, config).await
        }
        .instrument(tracing::info_span!("connect", address = %address, tls = info.tls));

        match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| {
                Error::Timeout(format!("connecting to {} took longer than {:?}", address, limit))
            })?,
            None => attempt.await,
        }
    }
}

/// Connect with default settings
pub async fn connect_url(url: &str) -> Result<Connection> {
    CacheConnector::default().connect_url(url).await
}

async fn open_transport(info: &ConnectionInfo) -> Result<Transport> {
    match info.transport {
        TransportType::Tcp => {
            let host = info
                .host
                .as_deref()
                .ok_or_else(|| Error::Config("TCP connection requires a host".into()))?;
            let port = info.port.unwrap_or(DEFAULT_PORT);
            match info.to_tls_config()? {
                Some(tls) => Transport::connect_tcp_tls(host, port, &tls).await,
                None => Transport::connect_tcp(host, port).await,
            }
        }
        TransportType::Unix => {
            let path = info
                .unix_socket
                .as_deref()
                .ok_or_else(|| Error::Config("Unix connection requires a socket path".into()))?;
            Transport::connect_unix(path).await
        }
    }
}

impl ManagedConnection for Connection {
    fn on_error(&self, observer: ErrorObserver) {
        Connection::on_error(self, observer);
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(Connection::close(self))
    }
}
