//! Cache client: URL parsing and connection establishment

mod connection_string;
mod connector;

pub use connection_string::{ConnectionInfo, TransportType, DEFAULT_PORT};
pub use connector::{connect_url, CacheConnector};
