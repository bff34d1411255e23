use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::common::{SendError, TimeUnit};
use crate::formatting::{format_float, format_value, format_whole, metric_name};
use crate::metric::{
    AllMetrics, Counter, Counting, DistributionSnapshot, Gauge, Histogram, Metered, MetricFilter,
    MetricRef, MetricSnapshot, Timer,
};
use crate::sender::{Sender, UdpSender};

/// Receives a snapshot of the registry once per reporting cycle.
pub trait Report {
    fn report(&mut self, snapshot: &MetricSnapshot);
}

/// Immutable settings of a [`StatsdReporter`], assembled by the builder.
pub struct ReporterConfig {
    pub prefix: Option<String>,
    pub tags: Vec<String>,
    pub rate_unit: TimeUnit,
    pub duration_unit: TimeUnit,
    pub filter: Box<dyn MetricFilter>,
    pub skip_unchanged_timer_duration_metrics: bool,
    pub skip_unchanged_histogram_metrics: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            tags: Vec::new(),
            rate_unit: TimeUnit::Seconds,
            duration_unit: TimeUnit::Milliseconds,
            filter: Box::new(AllMetrics),
            skip_unchanged_timer_duration_metrics: true,
            skip_unchanged_histogram_metrics: true,
        }
    }
}

impl fmt::Debug for ReporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterConfig")
            .field("prefix", &self.prefix)
            .field("tags", &self.tags)
            .field("rate_unit", &self.rate_unit)
            .field("duration_unit", &self.duration_unit)
            .field(
                "skip_unchanged_timer_duration_metrics",
                &self.skip_unchanged_timer_duration_metrics,
            )
            .field(
                "skip_unchanged_histogram_metrics",
                &self.skip_unchanged_histogram_metrics,
            )
            .finish_non_exhaustive()
    }
}

/// Last observed sample count per metric name.
///
/// Only metrics gated by a skip-unchanged flag are recorded. Entries are never pruned; a metric
/// that leaves the registry just leaves a stale count behind.
#[derive(Debug, Default)]
struct ChangeTracker {
    counts: HashMap<String, u64>,
}

impl ChangeTracker {
    /// Records `count` for `name` and reports whether it differs from the previous cycle.
    fn changed(&mut self, name: &str, count: u64) -> bool {
        match self.counts.insert(name.to_owned(), count) {
            Some(previous) => previous != count,
            None => true,
        }
    }
}

/// Publishes registry snapshots to a StatsD collector.
///
/// Every value goes out as a StatsD gauge. Counts and rates are sent on every cycle, while the
/// distribution statistics of histograms and timers can be held back for as long as their sample
/// count does not move (see [`ReporterConfig::skip_unchanged_histogram_metrics`]).
///
/// Reporting takes `&mut self`: cycles are serialized by the borrow, and the change tracker has
/// a single writer.
pub struct StatsdReporter<S = UdpSender> {
    sender: S,
    config: ReporterConfig,
    tracker: ChangeTracker,
}

impl<S: Sender> StatsdReporter<S> {
    pub fn new(config: ReporterConfig, sender: S) -> Self {
        Self {
            sender,
            config,
            tracker: ChangeTracker::default(),
        }
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    fn report_all(&mut self, snapshot: &MetricSnapshot) -> Result<usize, SendError> {
        let mut sent = 0;

        for (name, gauge) in &snapshot.gauges {
            if self.config.filter.matches(name, MetricRef::Gauge(gauge.as_ref())) {
                sent += self.report_gauge(name, gauge.as_ref())?;
            }
        }

        for (name, counter) in &snapshot.counters {
            if self.config.filter.matches(name, MetricRef::Counter(counter.as_ref())) {
                sent += self.report_counter(name, counter.as_ref())?;
            }
        }

        for (name, histogram) in &snapshot.histograms {
            if self
                .config
                .filter
                .matches(name, MetricRef::Histogram(histogram.as_ref()))
            {
                sent += self.report_histogram(name, histogram.as_ref())?;
            }
        }

        for (name, meter) in &snapshot.meters {
            if self.config.filter.matches(name, MetricRef::Meter(meter.as_ref())) {
                sent += self.report_metered(name, meter.as_ref())?;
            }
        }

        for (name, timer) in &snapshot.timers {
            if self.config.filter.matches(name, MetricRef::Timer(timer.as_ref())) {
                sent += self.report_timer(name, timer.as_ref())?;
            }
        }

        Ok(sent)
    }

    fn report_gauge(&mut self, name: &str, gauge: &dyn Gauge) -> Result<usize, SendError> {
        match format_value(&gauge.value()) {
            Some(value) => {
                self.send(name, None, &value)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn report_counter(&mut self, name: &str, counter: &dyn Counter) -> Result<usize, SendError> {
        self.send(name, None, &counter.count().to_string())?;
        Ok(1)
    }

    fn report_histogram(
        &mut self,
        name: &str,
        histogram: &dyn Histogram,
    ) -> Result<usize, SendError> {
        let count = Counting::count(histogram);
        self.send(name, Some("count"), &count.to_string())?;

        if !self.config.skip_unchanged_histogram_metrics || self.tracker.changed(name, count) {
            // histogram extremes are recorded sample values, so they go out as whole numbers
            let snapshot = histogram.snapshot();
            let sent = self.report_distribution(name, &snapshot, format_whole, format_float)?;
            return Ok(1 + sent);
        }
        Ok(1)
    }

    fn report_timer(&mut self, name: &str, timer: &dyn Timer) -> Result<usize, SendError> {
        let mut sent = 0;
        let count = Counting::count(timer);

        if !self.config.skip_unchanged_timer_duration_metrics || self.tracker.changed(name, count)
        {
            let snapshot = timer.snapshot();
            let unit = self.config.duration_unit;
            let in_unit = |v| format_float(unit.convert_duration(v));
            sent += self.report_distribution(name, &snapshot, in_unit, in_unit)?;
        }

        Ok(sent + self.report_metered(name, timer)?)
    }

    fn report_metered<M>(&mut self, name: &str, meter: &M) -> Result<usize, SendError>
    where
        M: Metered + ?Sized,
    {
        let unit = self.config.rate_unit;
        let rates = [
            ("m1_rate", meter.one_minute_rate()),
            ("m5_rate", meter.five_minute_rate()),
            ("m15_rate", meter.fifteen_minute_rate()),
            ("mean_rate", meter.mean_rate()),
        ];

        self.send(name, Some("count"), &Counting::count(meter).to_string())?;
        for (suffix, rate) in rates {
            self.send(name, Some(suffix), &format_float(unit.convert_rate(rate)))?;
        }
        Ok(1 + rates.len())
    }

    /// Sends the ten distribution lines, rendering `max`/`min` with `extreme` and the rest with
    /// `stat`.
    fn report_distribution<E, F>(
        &mut self,
        name: &str,
        snapshot: &DistributionSnapshot,
        extreme: E,
        stat: F,
    ) -> Result<usize, SendError>
    where
        E: Fn(f64) -> String,
        F: Fn(f64) -> String,
    {
        let stats = [
            ("max", extreme(snapshot.max)),
            ("mean", stat(snapshot.mean)),
            ("min", extreme(snapshot.min)),
            ("stddev", stat(snapshot.std_dev)),
            ("p50", stat(snapshot.median)),
            ("p75", stat(snapshot.p75)),
            ("p95", stat(snapshot.p95)),
            ("p98", stat(snapshot.p98)),
            ("p99", stat(snapshot.p99)),
            ("p999", stat(snapshot.p999)),
        ];

        let sent = stats.len();
        for (suffix, value) in stats {
            self.send(name, Some(suffix), &value)?;
        }
        Ok(sent)
    }

    fn send(&mut self, name: &str, suffix: Option<&str>, value: &str) -> Result<(), SendError> {
        let components = [name].into_iter().chain(suffix);
        let full_name = metric_name(self.config.prefix.as_deref(), components);
        self.sender.send(&full_name, value, &self.config.tags)
    }
}

impl<S: Sender> Report for StatsdReporter<S> {
    fn report(&mut self, snapshot: &MetricSnapshot) {
        let result = self
            .sender
            .open()
            .and_then(|()| self.report_all(snapshot));

        match result {
            Ok(sent) => debug!(sent, "reported metrics to statsd"),
            Err(e) => warn!(error = %e, "unable to report to statsd"),
        }

        if let Err(e) = self.sender.close() {
            debug!(error = %e, "error disconnecting from statsd");
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for StatsdReporter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdReporter")
            .field("sender", &self.sender)
            .field("config", &self.config)
            .field("tracked_metrics", &self.tracker.counts.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::formatting::write_metric_line;
    use crate::metric::{HistogramValue, MeterValue, TimerValue};
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Collects lines in memory and can be told to fail.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSender {
        pub lines: Arc<Mutex<Vec<String>>>,
        pub opens: Arc<Mutex<usize>>,
        pub closes: Arc<Mutex<usize>>,
        pub fail_open: bool,
        pub fail_after: Option<usize>,
    }

    impl RecordingSender {
        pub fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.lines.lock().unwrap())
        }
    }

    impl Sender for RecordingSender {
        fn open(&mut self) -> Result<(), SendError> {
            *self.opens.lock().unwrap() += 1;
            if self.fail_open {
                return Err(SendError::Resolve("statsd.invalid:8125".to_string()));
            }
            Ok(())
        }

        fn send(&mut self, name: &str, value: &str, tags: &[String]) -> Result<(), SendError> {
            let mut lines = self.lines.lock().unwrap();
            if self.fail_after == Some(lines.len()) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
            }
            let mut line = String::new();
            write_metric_line(&mut line, name, value, tags);
            lines.push(line);
            Ok(())
        }

        fn close(&mut self) -> Result<(), SendError> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn reporter(config: ReporterConfig) -> (StatsdReporter<RecordingSender>, RecordingSender) {
        let sender = RecordingSender::default();
        (StatsdReporter::new(config, sender.clone()), sender)
    }

    fn histogram(count: u64) -> HistogramValue {
        HistogramValue {
            count,
            snapshot: DistributionSnapshot {
                max: 9.0,
                mean: 4.5,
                min: 1.0,
                std_dev: 2.25,
                median: 4.0,
                p75: 6.0,
                p95: 8.5,
                p98: 8.75,
                p99: 8.9,
                p999: 8.99,
            },
        }
    }

    fn meter(count: u64) -> MeterValue {
        MeterValue {
            count,
            one_minute_rate: 1.0,
            five_minute_rate: 5.0,
            fifteen_minute_rate: 15.0,
            mean_rate: 0.5,
        }
    }

    fn timer(count: u64) -> TimerValue {
        TimerValue {
            meter: meter(count),
            snapshot: DistributionSnapshot {
                max: 3_000_000.0,
                mean: 1_500_000.0,
                min: 250_000.0,
                std_dev: 100_000.0,
                median: 1_000_000.0,
                p75: 2_000_000.0,
                p95: 2_500_000.0,
                p98: 2_750_000.0,
                p99: 2_900_000.0,
                p999: 2_990_000.0,
            },
        }
    }

    fn distribution_lines(lines: &[String]) -> usize {
        lines
            .iter()
            .filter(|l| l.contains(".p50:") || l.contains(".max:"))
            .count()
    }

    #[test]
    fn test_end_to_end_counter_and_gauge() {
        let (mut reporter, sender) = reporter(ReporterConfig {
            prefix: Some("foo".to_string()),
            tags: vec!["env".to_string(), "prod".to_string()],
            ..Default::default()
        });

        let snapshot = MetricSnapshot::new()
            .with_counter("hits", || 5)
            .with_gauge("up", || true);
        reporter.report(&snapshot);

        assert_eq!(
            sender.take(),
            ["foo.up:1|g|#env,prod", "foo.hits:5|g|#env,prod"]
        );
        assert_eq!(*sender.opens.lock().unwrap(), 1);
        assert_eq!(*sender.closes.lock().unwrap(), 1);
    }

    #[test]
    fn test_counter_sent_every_cycle() {
        let (mut reporter, sender) = reporter(ReporterConfig::default());
        let snapshot = MetricSnapshot::new().with_counter("requests", || 7);

        for _ in 0..3 {
            reporter.report(&snapshot);
            assert_eq!(sender.take(), ["requests:7|g"]);
        }
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_gauge_formatting() {
        let (mut reporter, sender) = reporter(ReporterConfig::default());
        let snapshot = MetricSnapshot::new()
            .with_gauge("a.float", || 3.14159_f64)
            .with_gauge("b.int", || 42i32)
            .with_gauge("c.text", || "not a number")
            .with_gauge("d.off", || false)
            .with_gauge("e.missing", || None::<u64>);
        reporter.report(&snapshot);

        assert_eq!(sender.take(), ["a.float:3.14|g", "b.int:42|g", "d.off:0|g"]);
    }

    #[test]
    fn test_histogram_lines() {
        let (mut reporter, sender) = reporter(ReporterConfig::default());
        let snapshot = MetricSnapshot::new().with_histogram("sizes", histogram(4));
        reporter.report(&snapshot);

        assert_eq!(
            sender.take(),
            [
                "sizes.count:4|g",
                "sizes.max:9|g",
                "sizes.mean:4.50|g",
                "sizes.min:1|g",
                "sizes.stddev:2.25|g",
                "sizes.p50:4.00|g",
                "sizes.p75:6.00|g",
                "sizes.p95:8.50|g",
                "sizes.p98:8.75|g",
                "sizes.p99:8.90|g",
                "sizes.p999:8.99|g",
            ]
        );
    }

    #[test]
    fn test_histogram_extremes_are_whole_numbers() {
        let (mut reporter, sender) = reporter(ReporterConfig::default());
        let mut sizes = histogram(1);
        sizes.snapshot.max = 9.0;
        sizes.snapshot.min = -2.75;
        reporter.report(&MetricSnapshot::new().with_histogram("sizes", sizes));

        let lines = sender.take();
        assert_eq!(lines[1], "sizes.max:9|g");
        assert_eq!(lines[3], "sizes.min:-2|g");
        assert_eq!(lines[4], "sizes.stddev:2.25|g");
    }

    #[test]
    fn test_unchanged_histogram_is_skipped() {
        let (mut reporter, sender) = reporter(ReporterConfig::default());

        reporter.report(&MetricSnapshot::new().with_histogram("sizes", histogram(4)));
        assert_eq!(sender.take().len(), 11);

        reporter.report(&MetricSnapshot::new().with_histogram("sizes", histogram(4)));
        assert_eq!(sender.take(), ["sizes.count:4|g"]);

        reporter.report(&MetricSnapshot::new().with_histogram("sizes", histogram(5)));
        assert_eq!(sender.take().len(), 11);
    }

    #[test]
    fn test_unchanged_histogram_reported_without_skip() {
        let (mut reporter, sender) = reporter(ReporterConfig {
            skip_unchanged_histogram_metrics: false,
            ..Default::default()
        });

        for _ in 0..3 {
            reporter.report(&MetricSnapshot::new().with_histogram("sizes", histogram(4)));
            assert_eq!(sender.take().len(), 11);
        }
    }

    #[test]
    fn test_meter_lines_every_cycle() {
        let (mut reporter, sender) = reporter(ReporterConfig::default());
        let snapshot = MetricSnapshot::new().with_meter("events", meter(3));

        for _ in 0..2 {
            reporter.report(&snapshot);
            assert_eq!(
                sender.take(),
                [
                    "events.count:3|g",
                    "events.m1_rate:1.00|g",
                    "events.m5_rate:5.00|g",
                    "events.m15_rate:15.00|g",
                    "events.mean_rate:0.50|g",
                ]
            );
        }
    }

    #[test]
    fn test_rate_unit_conversion() {
        let (mut reporter, sender) = reporter(ReporterConfig {
            rate_unit: TimeUnit::Minutes,
            ..Default::default()
        });
        reporter.report(&MetricSnapshot::new().with_meter("events", meter(3)));

        let lines = sender.take();
        assert_eq!(lines[1], "events.m1_rate:60.00|g");
        assert_eq!(lines[4], "events.mean_rate:30.00|g");
    }

    #[test]
    fn test_timer_lines_in_duration_unit() {
        let (mut reporter, sender) = reporter(ReporterConfig::default());
        reporter.report(&MetricSnapshot::new().with_timer("db.query", timer(10)));

        let lines = sender.take();
        assert_eq!(lines.len(), 15);
        assert_eq!(lines[0], "db.query.max:3.00|g");
        assert_eq!(lines[2], "db.query.min:0.25|g");
        assert_eq!(lines[4], "db.query.p50:1.00|g");
        assert_eq!(lines[10], "db.query.count:10|g");
        assert_eq!(lines[14], "db.query.mean_rate:0.50|g");
    }

    #[test]
    fn test_timer_skips_unchanged_durations() {
        let (mut reporter, sender) = reporter(ReporterConfig::default());

        for (count, expected) in [(10, 15), (10, 5), (15, 15)] {
            reporter.report(&MetricSnapshot::new().with_timer("db.query", timer(count)));
            let lines = sender.take();
            assert_eq!(lines.len(), expected, "count {}", count);
            assert_eq!(distribution_lines(&lines), (expected - 5) / 5);
        }
    }

    #[test]
    fn test_skip_flags_are_independent() {
        let (mut reporter, sender) = reporter(ReporterConfig {
            skip_unchanged_timer_duration_metrics: false,
            ..Default::default()
        });
        let snapshot = MetricSnapshot::new()
            .with_histogram("h", histogram(1))
            .with_timer("t", timer(1));

        reporter.report(&snapshot);
        assert_eq!(sender.take().len(), 11 + 15);

        reporter.report(&snapshot);
        assert_eq!(sender.take().len(), 1 + 15);
    }

    fn keep_non_meters(name: &str, metric: MetricRef<'_>) -> bool {
        name.starts_with("keep") && !matches!(metric, MetricRef::Meter(_))
    }

    #[test]
    fn test_filter() {
        let (mut reporter, sender) = reporter(ReporterConfig {
            filter: Box::new(keep_non_meters),
            ..Default::default()
        });
        let snapshot = MetricSnapshot::new()
            .with_counter("keep.hits", || 1)
            .with_counter("drop.hits", || 2)
            .with_meter("keep.events", meter(1));
        reporter.report(&snapshot);

        assert_eq!(sender.take(), ["keep.hits:1|g"]);
    }

    #[test]
    fn test_open_failure_sends_nothing_and_closes() {
        let sender = RecordingSender {
            fail_open: true,
            ..Default::default()
        };
        let mut reporter = StatsdReporter::new(ReporterConfig::default(), sender.clone());
        reporter.report(&MetricSnapshot::new().with_counter("hits", || 5));

        assert!(sender.take().is_empty());
        assert_eq!(*sender.closes.lock().unwrap(), 1);
    }

    #[test]
    fn test_send_failure_aborts_cycle_and_closes() {
        let sender = RecordingSender {
            fail_after: Some(1),
            ..Default::default()
        };
        let mut reporter = StatsdReporter::new(ReporterConfig::default(), sender.clone());
        let snapshot = MetricSnapshot::new()
            .with_counter("a", || 1)
            .with_counter("b", || 2)
            .with_counter("c", || 3);
        reporter.report(&snapshot);

        assert_eq!(sender.take(), ["a:1|g"]);
        assert_eq!(*sender.closes.lock().unwrap(), 1);
    }

    #[test]
    fn test_change_tracker() {
        let mut tracker = ChangeTracker::default();
        assert!(tracker.changed("t", 10));
        assert!(!tracker.changed("t", 10));
        assert!(tracker.changed("t", 15));
        assert!(tracker.changed("t", 3));
        assert!(tracker.changed("other", 3));
    }
}
