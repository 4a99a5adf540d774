//! Counters

use super::labels;
use metrics::counter;

/// Handle `acquire()` called
pub fn handle_acquired() {
    counter!("recipiece_cache_handle_acquire_total").increment(1);
}

/// Handle `reset()` closed a connection
pub fn handle_reset() {
    counter!("recipiece_cache_handle_reset_total").increment(1);
}

/// Connection attempt started
pub fn connect_attempted() {
    counter!("recipiece_cache_connect_attempts_total").increment(1);
}

/// Connection attempt completed its handshake
pub fn connect_succeeded() {
    counter!("recipiece_cache_connect_success_total").increment(1);
}

/// Connection attempt failed
pub fn connect_failed(category: &str) {
    counter!(
        "recipiece_cache_connect_failures_total",
        labels::CATEGORY => category.to_string()
    )
    .increment(1);
}

/// AUTH sent during the handshake
pub fn auth_attempted() {
    counter!("recipiece_cache_auth_attempts_total").increment(1);
}

/// AUTH rejected by the server
pub fn auth_failed() {
    counter!("recipiece_cache_auth_failures_total").increment(1);
}

/// Command written to the socket
pub fn command_sent() {
    counter!("recipiece_cache_commands_sent_total").increment(1);
}

/// Error raised on an established connection outside of any command
pub fn async_connection_error(category: &str) {
    counter!(
        "recipiece_cache_connection_errors_total",
        labels::CATEGORY => category.to_string()
    )
    .increment(1);
}
