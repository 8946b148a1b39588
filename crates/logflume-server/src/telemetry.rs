// Process-local metrics registry
//
// The pipeline crates record through the `metrics` facade; this recorder
// keeps the counters and timers in-process so the operational endpoint can
// snapshot them without an external scrape target. Counters are
// monotonically increasing; nothing here decrements.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Recorder,
    SharedString, Unit,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

#[derive(Default)]
struct CounterCell(AtomicU64);

impl CounterFn for CounterCell {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct GaugeCell(Mutex<f64>);

impl GaugeFn for GaugeCell {
    fn increment(&self, value: f64) {
        *self.0.lock() += value;
    }

    fn decrement(&self, value: f64) {
        *self.0.lock() -= value;
    }

    fn set(&self, value: f64) {
        *self.0.lock() = value;
    }
}

#[derive(Default)]
struct HistogramCell {
    count: AtomicU64,
    sum: Mutex<f64>,
    max: Mutex<f64>,
}

impl HistogramFn for HistogramCell {
    fn record(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.sum.lock() += value;
        let mut max = self.max.lock();
        if value > *max {
            *max = value;
        }
    }
}

/// Shared registry behind the `metrics` facade.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: Mutex<HashMap<String, Arc<CounterCell>>>,
    gauges: Mutex<HashMap<String, Arc<GaugeCell>>>,
    histograms: Mutex<HashMap<String, Arc<HistogramCell>>>,
}

impl MetricsRegistry {
    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .get(name)
            .map(|c| c.0.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// JSON snapshot of everything recorded so far.
    pub fn snapshot(&self) -> Value {
        let counters: serde_json::Map<String, Value> = self
            .counters
            .lock()
            .iter()
            .map(|(name, cell)| (name.clone(), json!(cell.0.load(Ordering::Relaxed))))
            .collect();

        let gauges: serde_json::Map<String, Value> = self
            .gauges
            .lock()
            .iter()
            .map(|(name, cell)| (name.clone(), json!(*cell.0.lock())))
            .collect();

        let histograms: serde_json::Map<String, Value> = self
            .histograms
            .lock()
            .iter()
            .map(|(name, cell)| {
                let count = cell.count.load(Ordering::Relaxed);
                let sum = *cell.sum.lock();
                let mean = if count > 0 { sum / count as f64 } else { 0.0 };
                (
                    name.clone(),
                    json!({
                        "count": count,
                        "sum": sum,
                        "mean": mean,
                        "max": *cell.max.lock(),
                    }),
                )
            })
            .collect();

        json!({
            "counters": counters,
            "gauges": gauges,
            "timers": histograms,
        })
    }
}

struct RegistryRecorder(Arc<MetricsRegistry>);

impl Recorder for RegistryRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key) -> Counter {
        let cell = self
            .0
            .counters
            .lock()
            .entry(key.name().to_string())
            .or_default()
            .clone();
        Counter::from_arc(cell)
    }

    fn register_gauge(&self, key: &Key) -> Gauge {
        let cell = self
            .0
            .gauges
            .lock()
            .entry(key.name().to_string())
            .or_default()
            .clone();
        Gauge::from_arc(cell)
    }

    fn register_histogram(&self, key: &Key) -> Histogram {
        let cell = self
            .0
            .histograms
            .lock()
            .entry(key.name().to_string())
            .or_default()
            .clone();
        Histogram::from_arc(cell)
    }
}

/// Install the registry as the global recorder. Safe to call more than
/// once; later installs keep recording into the first registry.
pub fn install_metrics() -> Arc<MetricsRegistry> {
    let registry = Arc::new(MetricsRegistry::default());
    if metrics::set_boxed_recorder(Box::new(RegistryRecorder(registry.clone()))).is_err() {
        warn!("metrics recorder already installed; snapshot endpoint may miss earlier state");
    }
    registry
}
