//! Connection management
//!
//! This module handles:
//! * Transport abstraction (TCP, TLS over TCP, Unix socket)
//! * Connection lifecycle (handshake, command execution, close)
//! * State machine enforcement during the handshake
//! * TLS configuration for `rediss://`

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Connection, ConnectionConfig, ConnectionConfigBuilder, ErrorObserver};
pub use state::ConnectionState;
pub use tls::{parse_server_name, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
