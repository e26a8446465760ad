//! Signal observation for the relay event loop.
//!
//! Handlers installed here are async-signal-safe: each one only sets an
//! atomic flag. The event loop drains the flags at the top of every
//! iteration through [`SignalArbiter::drain`], which logs each observed
//! signal and reports whether termination was requested. Because handlers
//! never touch anything but the flags, logging from the drain needs no
//! signal masking.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGPIPE, SIGQUIT, SIGTERM};
use tracing::info;

/// One watched signal: its number, its conventional description, whether
/// it requests termination, and the flag its handler sets.
struct Watched {
    signal: i32,
    name: &'static str,
    terminates: bool,
    flag: Arc<AtomicBool>,
}

/// Converts pending signals into per-iteration observations.
pub struct SignalArbiter {
    watched: Vec<Watched>,
}

impl SignalArbiter {
    /// Installs handlers for SIGINT, SIGTERM, SIGQUIT (terminating) and
    /// SIGPIPE (observed and logged, otherwise ignored).
    pub fn install() -> io::Result<Self> {
        let specs: [(i32, &'static str, bool); 4] = [
            (SIGINT, "Interrupt", true),
            (SIGTERM, "Terminated", true),
            (SIGQUIT, "Quit", true),
            (SIGPIPE, "Broken pipe", false),
        ];

        let mut watched = Vec::with_capacity(specs.len());
        for (signal, name, terminates) in specs {
            let flag = Arc::new(AtomicBool::new(false));
            signal_hook::flag::register(signal, Arc::clone(&flag))?;
            watched.push(Watched {
                signal,
                name,
                terminates,
                flag,
            });
        }
        Ok(Self { watched })
    }

    /// Consumes every signal observed since the previous drain, logging
    /// each one. Returns `true` if any of them requests termination.
    ///
    /// Each log line is preceded by a bare newline on stderr to separate
    /// it from partial terminal input.
    pub fn drain(&self) -> bool {
        let mut terminate = false;
        for watched in &self.watched {
            if watched.flag.swap(false, Ordering::Relaxed) {
                eprintln!();
                info!("Caught signal {} ({}).", watched.signal, watched.name);
                terminate |= watched.terminates;
            }
        }
        terminate
    }
}
