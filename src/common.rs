use std::io;

use thiserror::Error;

/// Errors that can occur while building or installing a reporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Creating the Tokio runtime or its background thread failed.
    #[error("failed to create Tokio runtime: {0}")]
    FailedToCreateRuntime(String),

    /// Installing the recorder as the global `metrics` recorder failed.
    #[error("failed to install global recorder: {0}")]
    FailedToInstallRecorder(String),
}

/// Errors raised by a [`Sender`](crate::Sender) while opening, writing to or closing its channel.
#[derive(Debug, Error)]
pub enum SendError {
    /// The host/port pair did not resolve to any address.
    #[error("unable to resolve statsd endpoint {0}")]
    Resolve(String),

    /// A line was sent before the channel was opened.
    #[error("statsd channel is not open")]
    NotOpen,

    #[error("statsd transport error: {0}")]
    Io(#[from] io::Error),
}

/// Unit that rates and durations are converted to before being reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one unit in nanoseconds.
    pub fn as_nanos(self) -> f64 {
        match self {
            Self::Nanoseconds => 1.0,
            Self::Microseconds => 1_000.0,
            Self::Milliseconds => 1_000_000.0,
            Self::Seconds => 1_000_000_000.0,
            Self::Minutes => 60_000_000_000.0,
            Self::Hours => 3_600_000_000_000.0,
            Self::Days => 86_400_000_000_000.0,
        }
    }

    /// Length of one unit in seconds.
    pub fn as_secs(self) -> f64 {
        self.as_nanos() / 1_000_000_000.0
    }

    /// Converts a duration measured in nanoseconds into this unit.
    pub fn convert_duration(self, nanos: f64) -> f64 {
        nanos / self.as_nanos()
    }

    /// Converts an events-per-second rate into events per this unit.
    pub fn convert_rate(self, per_second: f64) -> f64 {
        per_second * self.as_secs()
    }
}
