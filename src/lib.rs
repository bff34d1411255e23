//! A scheduled reporter that pushes metrics registry snapshots to StatsD.
//!
//! ## Basics
//!
//! `statsd-reporter` samples a metrics registry on a fixed interval and sends the current value
//! of every metric to a StatsD collector, one UDP datagram per value.
//!
//! ## High-level features
//!
//! - gauges, counters, histograms, meters and timers, each expanded into the statistics a
//!   dashboard needs (`.count`, `.p99`, `.m1_rate`, ...)
//! - configurable prefix and global tags (DogStatsD `|#tag1,tag2` extension)
//! - rate and duration unit conversion
//! - skipping distribution statistics of histograms and timers that saw no new samples
//! - a [`metrics`]-compatible recorder that can act as the registry
//!
//! ## Behavior
//!
//! This reporter makes some explicit trade-offs to accomplish its task:
//!
//! - Every value is sent as a StatsD gauge (`|g`): the values are already aggregated, so the
//!   collector must not aggregate them again
//! - Counts and rates are sent on every cycle so the backend can always compute on them
//! - Delivery is best effort: a cycle that cannot open its socket, or fails mid-way, is simply
//!   dropped and the next cycle samples the registry afresh
//! - The socket is opened and closed once per cycle rather than kept warm
//!
//! ## Usage
//!
//! ```ignore
//! // First, create a builder and configure how names and values are rendered.
//! let reporter = StatsdReporterBuilder::new()
//!     .prefixed_with("myapp")
//!     .with_tags(["env:prod"])
//!     .convert_durations_to(TimeUnit::Milliseconds)
//!     .build("127.0.0.1", DEFAULT_PORT);
//!
//! // Then hand it anything that can produce a `MetricSnapshot` and an interval. If you're
//! // already inside a Tokio runtime the reporting task is spawned on it, otherwise a
//! // background thread with its own runtime is started.
//! reporter.install(registry, Duration::from_secs(10))?;
//!
//! // Or let the crate provide the registry: this installs a global `metrics` recorder and
//! // reports everything recorded through the `metrics` macros.
//! StatsdReporterBuilder::new()
//!     .prefixed_with("myapp")
//!     .install_recorder("127.0.0.1", DEFAULT_PORT, Duration::from_secs(10))?;
//! ```
mod common;
pub use self::common::{BuildError, SendError, TimeUnit};

mod builder;
pub use self::builder::StatsdReporterBuilder;

pub mod formatting;
pub use self::formatting::GaugeValue;

pub mod metric;
pub use self::metric::{MetricFilter, MetricSnapshot, MetricSource};

mod recorder;
pub use self::recorder::{StatsdHandle, StatsdRecorder};

mod reporter;
pub use self::reporter::{Report, ReporterConfig, StatsdReporter};

mod sender;
pub use self::sender::{Sender, UdpSender, DEFAULT_PORT};
