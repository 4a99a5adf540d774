//! Metrics emitted through the `metrics` facade
//!
//! Nothing is recorded unless the application installs a recorder
//! (for example `metrics-exporter-prometheus`). All names are prefixed with
//! `recipiece_cache_`.

pub mod counters;
pub mod histograms;
pub mod labels;

#[cfg(test)]
pub(crate) mod testing;
