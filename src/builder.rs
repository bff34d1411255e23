use std::future::Future;
use std::pin::Pin;
use std::thread;
use std::time::Duration;

use tokio::runtime;
use tracing::{debug, error};

use crate::common::{BuildError, TimeUnit};
use crate::metric::{AllMetrics, MetricFilter, MetricSource};
use crate::recorder::{StatsdHandle, StatsdRecorder};
use crate::reporter::{Report, ReporterConfig, StatsdReporter};
use crate::sender::{Sender, UdpSender};

type ExporterFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Builder for creating a [`StatsdReporter`].
///
/// Defaults to no prefix, no tags, rates in events per second, durations in milliseconds, no
/// filtering, and skipping unchanged timer and histogram distributions.
pub struct StatsdReporterBuilder {
    prefix: Option<String>,
    tags: Vec<String>,
    rate_unit: TimeUnit,
    duration_unit: TimeUnit,
    filter: Box<dyn MetricFilter>,
    skip_unchanged_timer_duration_metrics: bool,
    skip_unchanged_histogram_metrics: bool,
}

impl StatsdReporterBuilder {
    /// Creates a new [`StatsdReporterBuilder`].
    pub fn new() -> Self {
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

    /// Prefixes every metric name with the given string.
    ///
    /// Its intended use is a per-deployment namespace, so different deployments can report to
    /// the same collector without overlap.
    #[must_use]
    pub fn prefixed_with<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Attaches the given tags, in order, to every metric line.
    ///
    /// Tags go out as given except that empty tags are left out and any `|`, `,` or control
    /// character inside a tag is replaced with `_`, so a tag can never split the tag list.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Converts rates to events per the given unit. Defaults to [`TimeUnit::Seconds`].
    #[must_use]
    pub fn convert_rates_to(mut self, rate_unit: TimeUnit) -> Self {
        self.rate_unit = rate_unit;
        self
    }

    /// Converts durations to the given unit. Defaults to [`TimeUnit::Milliseconds`].
    #[must_use]
    pub fn convert_durations_to(mut self, duration_unit: TimeUnit) -> Self {
        self.duration_unit = duration_unit;
        self
    }

    /// Only reports metrics which match the given filter.
    #[must_use]
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: MetricFilter + 'static,
    {
        self.filter = Box::new(filter);
        self
    }

    /// Sets both [`skip_unchanged_timer_duration_metrics`] and
    /// [`skip_unchanged_histogram_metrics`] to the same value.
    ///
    /// Skipping keeps a collector (often Graphite behind StatsD) from plotting a stale value
    /// when nothing was recorded. Counts and rates are always reported, since the backend
    /// needs them on every interval to do its own calculations.
    ///
    /// [`skip_unchanged_timer_duration_metrics`]: Self::skip_unchanged_timer_duration_metrics
    /// [`skip_unchanged_histogram_metrics`]: Self::skip_unchanged_histogram_metrics
    #[must_use]
    pub fn skip_unchanged_metrics(mut self, skip: bool) -> Self {
        self.skip_unchanged_timer_duration_metrics = skip;
        self.skip_unchanged_histogram_metrics = skip;
        self
    }

    /// Whether a timer's duration statistics are skipped while its count does not change.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn skip_unchanged_timer_duration_metrics(mut self, skip: bool) -> Self {
        self.skip_unchanged_timer_duration_metrics = skip;
        self
    }

    /// Whether a histogram's distribution statistics are skipped while its count does not
    /// change. The count itself is always reported.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn skip_unchanged_histogram_metrics(mut self, skip: bool) -> Self {
        self.skip_unchanged_histogram_metrics = skip;
        self
    }

    /// Builds a reporter sending to the StatsD collector at `host:port`, typically port
    /// [`DEFAULT_PORT`](crate::DEFAULT_PORT).
    ///
    /// The host is resolved at the start of every reporting cycle.
    pub fn build<H>(self, host: H, port: u16) -> StatsdReporter<UdpSender>
    where
        H: Into<String>,
    {
        self.build_with_sender(UdpSender::new(host, port))
    }

    /// Builds a reporter sending through the given [`Sender`].
    pub fn build_with_sender<S: Sender>(self, sender: S) -> StatsdReporter<S> {
        let config = ReporterConfig {
            prefix: self.prefix,
            tags: self.tags,
            rate_unit: self.rate_unit,
            duration_unit: self.duration_unit,
            filter: self.filter,
            skip_unchanged_timer_duration_metrics: self.skip_unchanged_timer_duration_metrics,
            skip_unchanged_histogram_metrics: self.skip_unchanged_histogram_metrics,
        };
        StatsdReporter::new(config, sender)
    }

    /// Builds a [`StatsdRecorder`], installs it as the global `metrics` recorder and starts
    /// reporting it to `host:port` every `interval`.
    ///
    /// See [`StatsdReporter::install`] for where the reporting task runs.
    ///
    /// ## Errors
    ///
    /// If a recorder is already installed, or the background runtime cannot be created, an
    /// error variant will be returned describing the error.
    pub fn install_recorder<H>(
        self,
        host: H,
        port: u16,
        interval: Duration,
    ) -> Result<StatsdHandle, BuildError>
    where
        H: Into<String>,
    {
        let recorder = StatsdRecorder::new();
        let handle = recorder.handle();

        metrics::set_global_recorder(recorder)
            .map_err(|e| BuildError::FailedToInstallRecorder(e.to_string()))?;

        self.build(host, port).install(handle.clone(), interval)?;
        Ok(handle)
    }
}

impl Default for StatsdReporterBuilder {
    fn default() -> Self {
        StatsdReporterBuilder::new()
    }
}

impl<S> StatsdReporter<S>
where
    S: Sender + Send + 'static,
{
    /// Turns the reporter into a future that reports a fresh snapshot of `source` every
    /// `interval`, forever.
    ///
    /// Cycles never overlap: the future owns the reporter and runs one cycle at a time. Each
    /// cycle resolves, connects and sends synchronously, so it runs on Tokio's blocking pool
    /// and the reporter is handed back once the cycle is done.
    pub fn into_exporter<M>(self, source: M, interval: Duration) -> ExporterFuture
    where
        M: MetricSource,
    {
        Box::pin(async move {
            let mut reporter = self;
            loop {
                // Sleep for `interval` amount of time, and then do a push.
                tokio::time::sleep(interval).await;

                let snapshot = source.snapshot();
                debug!(metrics = snapshot.len(), "starting statsd reporting cycle");
                let cycle = tokio::task::spawn_blocking(move || {
                    reporter.report(&snapshot);
                    reporter
                });

                match cycle.await {
                    Ok(returned) => reporter = returned,
                    Err(e) => {
                        error!(error = %e, "statsd reporting cycle panicked, stopping reporter");
                        return;
                    }
                }
            }
        })
    }

    /// Starts reporting `source` every `interval` in the background.
    ///
    /// When called from within a Tokio runtime, the exporter future is spawned directly
    /// into the runtime.  Otherwise, a new single-threaded Tokio runtime is created
    /// on a background thread, and the exporter is spawned there.
    ///
    /// ## Errors
    ///
    /// If the background runtime or its thread cannot be created, an error variant will be
    /// returned describing the error.
    pub fn install<M>(self, source: M, interval: Duration) -> Result<(), BuildError>
    where
        M: MetricSource,
    {
        let exporter = self.into_exporter(source, interval);

        if let Ok(handle) = runtime::Handle::try_current() {
            handle.spawn(exporter);
            return Ok(());
        }

        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

        thread::Builder::new()
            .name("statsd-reporter".to_string())
            .spawn(move || runtime.block_on(exporter))
            .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

        Ok(())
    }
}
