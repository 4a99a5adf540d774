//! Histograms

use super::labels;
use metrics::histogram;

/// Time from handshake start to `PONG`, in milliseconds
pub fn handshake_duration(ms: u64) {
    histogram!("recipiece_cache_handshake_duration_ms").record(ms as f64);
}

/// Time for a whole connection attempt (transport plus handshake), in milliseconds
pub fn connect_duration(ms: u64) {
    histogram!("recipiece_cache_connect_duration_ms").record(ms as f64);
}

/// Round-trip time of a single command, in microseconds
pub fn command_duration(command: &str, micros: u64) {
    histogram!(
        "recipiece_cache_command_duration_us",
        labels::COMMAND => command.to_string()
    )
    .record(micros as f64);
}
