//! In-memory recorder for asserting what the metric helpers emit

use metrics::{
    Counter, CounterFn, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use std::sync::{Arc, Mutex};

/// One increment or observation
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

type Sink = Arc<Mutex<Vec<Sample>>>;

struct Handle {
    sink: Sink,
    name: String,
    labels: Vec<(String, String)>,
}

impl Handle {
    fn push(&self, value: f64) {
        self.sink.lock().unwrap().push(Sample {
            name: self.name.clone(),
            labels: self.labels.clone(),
            value,
        });
    }
}

impl CounterFn for Handle {
    fn increment(&self, value: u64) {
        self.push(value as f64);
    }

    fn absolute(&self, value: u64) {
        self.push(value as f64);
    }
}

impl HistogramFn for Handle {
    fn record(&self, value: f64) {
        self.push(value);
    }
}

/// Captures counter increments and histogram observations
#[derive(Default)]
pub struct CapturingRecorder {
    sink: Sink,
}

impl CapturingRecorder {
    /// Run `f` with this recorder installed on the current thread
    pub fn capture(&self, f: impl FnOnce()) {
        metrics::with_local_recorder(self, f);
    }

    /// Everything recorded so far
    pub fn samples(&self) -> Vec<Sample> {
        self.sink.lock().unwrap().clone()
    }

    /// Sum of all values recorded under `name`
    pub fn total(&self, name: &str) -> f64 {
        self.samples()
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.value)
            .sum()
    }

    /// Labels of the first sample recorded under `name`
    pub fn labels(&self, name: &str) -> Option<Vec<(String, String)>> {
        self.samples()
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| s.labels)
    }

    fn handle(&self, key: &Key) -> Arc<Handle> {
        Arc::new(Handle {
            sink: self.sink.clone(),
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect(),
        })
    }
}

impl Recorder for CapturingRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.handle(key))
    }

    fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.handle(key))
    }
}
