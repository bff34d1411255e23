use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use crate::formatting::metric_name;
use crate::metric::{DistributionSnapshot, HistogramValue, MetricSnapshot, MetricSource};

use metrics::{Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};
use metrics_util::Summary;

/// Every sample a histogram has seen since it was registered.
struct SampleWindow {
    summary: Summary,
    count: u64,
    sum: f64,
    sum_of_squares: f64,
}

impl SampleWindow {
    fn new() -> Self {
        Self {
            summary: Summary::with_defaults(),
            count: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
        }
    }

    fn record_samples(&mut self, samples: &[f64]) {
        for &sample in samples {
            self.summary.add(sample);
            self.count += 1;
            self.sum += sample;
            self.sum_of_squares += sample * sample;
        }
    }

    fn quantile(&self, q: f64) -> f64 {
        self.summary.quantile(q).unwrap_or(0.0)
    }

    fn snapshot(&self) -> DistributionSnapshot {
        if self.count == 0 {
            return DistributionSnapshot::default();
        }

        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_of_squares / n - mean * mean).max(0.0);

        DistributionSnapshot {
            max: self.summary.max(),
            mean,
            min: self.summary.min(),
            std_dev: variance.sqrt(),
            median: self.quantile(0.5),
            p75: self.quantile(0.75),
            p95: self.quantile(0.95),
            p98: self.quantile(0.98),
            p99: self.quantile(0.99),
            p999: self.quantile(0.999),
        }
    }
}

pub(crate) struct Inner {
    registry: Registry<Key, AtomicStorage>,
    windows: Mutex<HashMap<Key, SampleWindow>>,
}

/// Flattens a key into a dotted name: the key name followed by each label's key and value.
fn key_to_name(key: &Key) -> String {
    let labels = key.labels().flat_map(|label| [label.key(), label.value()]);
    metric_name(None, std::iter::once(key.name()).chain(labels))
}

impl Inner {
    fn snapshot(&self) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::new();

        for (key, counter) in self.registry.get_counter_handles() {
            let read = move || i64::try_from(counter.load(Ordering::Acquire)).unwrap_or(i64::MAX);
            snapshot.counters.insert(key_to_name(&key), Arc::new(read));
        }

        for (key, gauge) in self.registry.get_gauge_handles() {
            let read = move || f64::from_bits(gauge.load(Ordering::Acquire));
            snapshot.gauges.insert(key_to_name(&key), Arc::new(read));
        }

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, histogram) in self.registry.get_histogram_handles() {
            let name = key_to_name(&key);
            let window = windows.entry(key).or_insert_with(SampleWindow::new);
            histogram.clear_with(|samples| window.record_samples(samples));

            let value = HistogramValue {
                count: window.count,
                snapshot: window.snapshot(),
            };
            snapshot.histograms.insert(name, Arc::new(value));
        }

        snapshot
    }
}

/// A [`metrics`] recorder whose registry can be reported to StatsD.
///
/// Counters, gauges and histograms registered through the `metrics` macros are stored in a
/// `metrics-util` registry. Histograms keep every sample since registration, so their count only
/// grows and the reporter's skip-unchanged policy applies to them.
pub struct StatsdRecorder {
    inner: Arc<Inner>,
}

impl StatsdRecorder {
    pub fn new() -> Self {
        let inner = Inner {
            registry: Registry::new(AtomicStorage),
            windows: Mutex::new(HashMap::new()),
        };
        StatsdRecorder::from(inner)
    }

    pub fn handle(&self) -> StatsdHandle {
        StatsdHandle {
            inner: self.inner.clone(),
        }
    }
}

impl Default for StatsdRecorder {
    fn default() -> Self {
        StatsdRecorder::new()
    }
}

impl From<Inner> for StatsdRecorder {
    fn from(inner: Inner) -> Self {
        StatsdRecorder {
            inner: Arc::new(inner),
        }
    }
}

impl Recorder for StatsdRecorder {
    fn describe_counter(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}
    fn describe_gauge(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}
    fn describe_histogram(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics::Counter {
        self.inner
            .registry
            .get_or_create_counter(key, |c| c.clone().into())
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics::Gauge {
        self.inner
            .registry
            .get_or_create_gauge(key, |c| c.clone().into())
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics::Histogram {
        self.inner
            .registry
            .get_or_create_histogram(key, |c| c.clone().into())
    }
}

/// Handle for sampling the metrics stored via [`StatsdRecorder`].
///
/// The handle stays valid after the recorder has been installed globally and is what the
/// scheduled reporter polls on every cycle.
#[derive(Clone)]
pub struct StatsdHandle {
    inner: Arc<Inner>,
}

impl StatsdHandle {
    /// Takes a snapshot of every metric held by the recorder.
    pub fn snapshot(&self) -> MetricSnapshot {
        self.inner.snapshot()
    }
}

impl MetricSource for StatsdHandle {
    fn snapshot(&self) -> MetricSnapshot {
        self.inner.snapshot()
    }
}
