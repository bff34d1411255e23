//! The read-only view of a metrics registry that the reporter consumes.
//!
//! A registry hands the reporter a fresh [`MetricSnapshot`] every cycle. Each metric kind is
//! exposed through a small trait so any registry can be adapted; [`StatsdRecorder`] does so for
//! the [`metrics`] facade.
//!
//! [`StatsdRecorder`]: crate::StatsdRecorder
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::formatting::GaugeValue;

/// Summary statistics over the current sample window of a histogram or timer.
///
/// Timer snapshots are expressed in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DistributionSnapshot {
    pub max: f64,
    pub mean: f64,
    pub min: f64,
    pub std_dev: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub p98: f64,
    pub p99: f64,
    pub p999: f64,
}

/// A metric reporting an arbitrary instantaneous value.
pub trait Gauge: Send + Sync {
    fn value(&self) -> GaugeValue;
}

impl<F, V> Gauge for F
where
    F: Fn() -> V + Send + Sync,
    V: Into<GaugeValue>,
{
    fn value(&self) -> GaugeValue {
        self().into()
    }
}

/// An incrementing and decrementing count.
pub trait Counter: Send + Sync {
    fn count(&self) -> i64;
}

impl<F> Counter for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn count(&self) -> i64 {
        self()
    }
}

/// Total number of observations a metric has seen.
pub trait Counting {
    fn count(&self) -> u64;
}

/// A metric with a sample window that can be summarised.
pub trait Sampling {
    fn snapshot(&self) -> DistributionSnapshot;
}

/// Throughput of events, as exponentially-weighted moving averages plus the lifetime mean.
///
/// Rates are in events per second.
pub trait Metered: Counting {
    fn one_minute_rate(&self) -> f64;
    fn five_minute_rate(&self) -> f64;
    fn fifteen_minute_rate(&self) -> f64;
    fn mean_rate(&self) -> f64;
}

pub trait Histogram: Counting + Sampling + Send + Sync {}

impl<T> Histogram for T where T: Counting + Sampling + Send + Sync {}

pub trait Meter: Metered + Send + Sync {}

impl<T> Meter for T where T: Metered + Send + Sync {}

/// A meter of events paired with a distribution of their durations.
pub trait Timer: Metered + Sampling + Send + Sync {}

impl<T> Timer for T where T: Metered + Sampling + Send + Sync {}

/// Materialised histogram state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HistogramValue {
    pub count: u64,
    pub snapshot: DistributionSnapshot,
}

impl Counting for HistogramValue {
    fn count(&self) -> u64 {
        self.count
    }
}

impl Sampling for HistogramValue {
    fn snapshot(&self) -> DistributionSnapshot {
        self.snapshot
    }
}

/// Materialised meter state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterValue {
    pub count: u64,
    pub one_minute_rate: f64,
    pub five_minute_rate: f64,
    pub fifteen_minute_rate: f64,
    pub mean_rate: f64,
}

impl Counting for MeterValue {
    fn count(&self) -> u64 {
        self.count
    }
}

impl Metered for MeterValue {
    fn one_minute_rate(&self) -> f64 {
        self.one_minute_rate
    }

    fn five_minute_rate(&self) -> f64 {
        self.five_minute_rate
    }

    fn fifteen_minute_rate(&self) -> f64 {
        self.fifteen_minute_rate
    }

    fn mean_rate(&self) -> f64 {
        self.mean_rate
    }
}

/// Materialised timer state: the meter plus a duration snapshot in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimerValue {
    pub meter: MeterValue,
    pub snapshot: DistributionSnapshot,
}

impl Counting for TimerValue {
    fn count(&self) -> u64 {
        self.meter.count
    }
}

impl Metered for TimerValue {
    fn one_minute_rate(&self) -> f64 {
        self.meter.one_minute_rate
    }

    fn five_minute_rate(&self) -> f64 {
        self.meter.five_minute_rate
    }

    fn fifteen_minute_rate(&self) -> f64 {
        self.meter.fifteen_minute_rate
    }

    fn mean_rate(&self) -> f64 {
        self.meter.mean_rate
    }
}

impl Sampling for TimerValue {
    fn snapshot(&self) -> DistributionSnapshot {
        self.snapshot
    }
}

/// A borrowed metric of any kind.
#[derive(Clone, Copy)]
pub enum MetricRef<'a> {
    Gauge(&'a dyn Gauge),
    Counter(&'a dyn Counter),
    Histogram(&'a dyn Histogram),
    Meter(&'a dyn Meter),
    Timer(&'a dyn Timer),
}

impl MetricRef<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gauge(_) => "gauge",
            Self::Counter(_) => "counter",
            Self::Histogram(_) => "histogram",
            Self::Meter(_) => "meter",
            Self::Timer(_) => "timer",
        }
    }
}

/// Decides which metrics get reported.
pub trait MetricFilter: Send + Sync {
    fn matches(&self, name: &str, metric: MetricRef<'_>) -> bool;
}

impl<F> MetricFilter for F
where
    F: Fn(&str, MetricRef<'_>) -> bool + Send + Sync,
{
    fn matches(&self, name: &str, metric: MetricRef<'_>) -> bool {
        self(name, metric)
    }
}

/// Accepts every metric.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllMetrics;

impl MetricFilter for AllMetrics {
    fn matches(&self, _name: &str, _metric: MetricRef<'_>) -> bool {
        true
    }
}

/// All registered metrics at one point in time, keyed and ordered by name.
#[derive(Clone, Default)]
pub struct MetricSnapshot {
    pub gauges: BTreeMap<String, Arc<dyn Gauge>>,
    pub counters: BTreeMap<String, Arc<dyn Counter>>,
    pub histograms: BTreeMap<String, Arc<dyn Histogram>>,
    pub meters: BTreeMap<String, Arc<dyn Meter>>,
    pub timers: BTreeMap<String, Arc<dyn Timer>>,
}

impl MetricSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_gauge<N, G>(mut self, name: N, gauge: G) -> Self
    where
        N: Into<String>,
        G: Gauge + 'static,
    {
        self.gauges.insert(name.into(), Arc::new(gauge));
        self
    }

    #[must_use]
    pub fn with_counter<N, C>(mut self, name: N, counter: C) -> Self
    where
        N: Into<String>,
        C: Counter + 'static,
    {
        self.counters.insert(name.into(), Arc::new(counter));
        self
    }

    #[must_use]
    pub fn with_histogram<N, H>(mut self, name: N, histogram: H) -> Self
    where
        N: Into<String>,
        H: Histogram + 'static,
    {
        self.histograms.insert(name.into(), Arc::new(histogram));
        self
    }

    #[must_use]
    pub fn with_meter<N, M>(mut self, name: N, meter: M) -> Self
    where
        N: Into<String>,
        M: Meter + 'static,
    {
        self.meters.insert(name.into(), Arc::new(meter));
        self
    }

    #[must_use]
    pub fn with_timer<N, T>(mut self, name: N, timer: T) -> Self
    where
        N: Into<String>,
        T: Timer + 'static,
    {
        self.timers.insert(name.into(), Arc::new(timer));
        self
    }

    /// Number of metrics across all kinds.
    pub fn len(&self) -> usize {
        self.gauges.len()
            + self.counters.len()
            + self.histograms.len()
            + self.meters.len()
            + self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registry that can be sampled on every reporting cycle.
pub trait MetricSource: Send + 'static {
    fn snapshot(&self) -> MetricSnapshot;
}

impl<F> MetricSource for F
where
    F: Fn() -> MetricSnapshot + Send + 'static,
{
    fn snapshot(&self) -> MetricSnapshot {
        self()
    }
}
