//! Logging infrastructure for the relay.
//!
//! Log lines go to stderr, each prefixed with a UTC timestamp in the form
//! `YYYY-MM-DD HH:MM:SS :: `. The level filter comes from `RUST_LOG`
//! (default `info`). The returned [`LogHandle`] reports the total number
//! of bytes written, replacing the ambient log-size counter a C
//! implementation would keep in a global.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Timestamp layout of every log line.
const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Logging initialization errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("Failed to initialize logging: {0}")]
    Init(String),
}

/// Handle to the running log output.
pub struct LogHandle {
    written: Arc<AtomicUsize>,
}

impl LogHandle {
    /// Total bytes of log output produced so far.
    pub fn bytes_written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }
}

/// Event format: `2024-05-01 12:00:00 :: message`.
struct Stamped;

impl<S, N> FormatEvent<S, N> for Stamped
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write!(writer, "{} :: ", Utc::now().format(STAMP_FORMAT))?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Byte-counting stderr writer.
#[derive(Clone)]
struct CountingStderr {
    written: Arc<AtomicUsize>,
}

struct CountingHandle {
    written: Arc<AtomicUsize>,
    inner: io::Stderr,
}

impl Write for CountingHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written.fetch_add(n, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for CountingStderr {
    type Writer = CountingHandle;

    fn make_writer(&'a self) -> Self::Writer {
        CountingHandle {
            written: Arc::clone(&self.written),
            inner: io::stderr(),
        }
    }
}

/// Initialize the global log subscriber.
///
/// Filtering defaults to `info` and honors `RUST_LOG`. Returns a handle
/// reporting the total log output size.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<LogHandle, LoggingError> {
    let written = Arc::new(AtomicUsize::new(0));
    let make_writer = CountingStderr {
        written: Arc::clone(&written),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .event_format(Stamped)
        .with_writer(make_writer)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LogHandle { written })
}
