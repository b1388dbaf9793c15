//! Explicit progress reporting with structured nesting.
//!
//! Instead of a process-global logger, a [`Progress`] handle is injected into
//! the session and executor. Nesting is a depth field carried by the handle,
//! so indentation travels with the value rather than through mutable global
//! state.

use std::fmt::{self, Display};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

const INDENT: &str = "  ";

/// Handle for emitting progress lines to a shared sink.
#[derive(Clone)]
pub struct Progress {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    depth: usize,
    verbose: bool,
}

impl Progress {
    /// Creates a reporter that writes to standard error.
    #[must_use]
    pub fn stderr(verbose: bool) -> Self {
        Self::to_sink(io::stderr(), verbose)
    }

    /// Creates a reporter that writes to the given sink. Tests use this to
    /// capture output.
    #[must_use]
    pub fn to_sink(sink: impl Write + Send + 'static, verbose: bool) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            depth: 0,
            verbose,
        }
    }

    /// Creates a reporter that discards everything.
    #[must_use]
    pub fn silent() -> Self {
        Self::to_sink(io::sink(), false)
    }

    /// Returns a handle one nesting level deeper, sharing the same sink.
    #[must_use]
    pub fn nested(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            depth: self.depth + 1,
            verbose: self.verbose,
        }
    }

    /// Emits a progress line.
    pub fn info(&self, message: impl Display) {
        self.emit(&message);
    }

    /// Emits a detail line; suppressed unless the reporter is verbose.
    pub fn debug(&self, message: impl Display) {
        if self.verbose {
            self.emit(&message);
        }
    }

    fn emit(&self, message: &dyn Display) {
        if let Ok(mut sink) = self.sink.lock() {
            for _ in 0..self.depth {
                write!(sink, "{INDENT}").ok();
            }
            writeln!(sink, "{message}").ok();
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("depth", &self.depth)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}
