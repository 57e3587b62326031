//! Caller-facing event delivery for container runs.
//!
//! Log and IP-address events are delivered synchronously from the attach
//! loop, so callbacks must not block for long. A callback that returns an
//! error aborts the run: the container is killed and the error surfaces as
//! [`crate::error::RunnerError::Aborted`].

use std::fmt;

use anyhow::Result;

/// Identifies which stream a log chunk belongs to. The internal streams are
/// visually distinct so operators can tell infrastructure trouble from
/// scraper-authored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Scraper process stdout.
    Stdout,
    /// Scraper process stderr.
    Stderr,
    /// Pipeline progress shown to the user (build chatter, stage banners).
    InternalOut,
    /// Infrastructure trouble (connection loss, aborts, requeue notices).
    InternalErr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
            StreamKind::InternalOut => write!(f, "internalout"),
            StreamKind::InternalErr => write!(f, "internalerr"),
        }
    }
}

type LogCallback = Box<dyn FnMut(StreamKind, &str) -> Result<()> + Send>;
type IpCallback = Box<dyn FnMut(&str) -> Result<()> + Send>;

/// Subscription handle for run events. Both callbacks are optional.
#[derive(Default)]
pub struct RunEvents {
    on_log: Option<LogCallback>,
    on_ip_address: Option<IpCallback>,
}

impl RunEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the log callback. Invoked zero or more times, always with
    /// either a complete line (trailing newline kept) or the final partial
    /// segment of the stream.
    pub fn on_log(
        mut self,
        callback: impl FnMut(StreamKind, &str) -> Result<()> + Send + 'static,
    ) -> Self {
        self.on_log = Some(Box::new(callback));
        self
    }

    /// Registers the IP-address callback. Invoked at most once, and always
    /// before the container is known to have exited.
    pub fn on_ip_address(
        mut self,
        callback: impl FnMut(&str) -> Result<()> + Send + 'static,
    ) -> Self {
        self.on_ip_address = Some(Box::new(callback));
        self
    }

    pub(crate) fn log(&mut self, kind: StreamKind, chunk: &str) -> Result<()> {
        match &mut self.on_log {
            Some(callback) => callback(kind, chunk),
            None => Ok(()),
        }
    }

    /// Best-effort delivery for notices emitted while already handling a
    /// failure; a second callback error cannot improve matters.
    pub(crate) fn log_quietly(&mut self, kind: StreamKind, chunk: &str) {
        let _ = self.log(kind, chunk);
    }

    pub(crate) fn ip_address(&mut self, address: &str) -> Result<()> {
        match &mut self.on_ip_address {
            Some(callback) => callback(address),
            None => Ok(()),
        }
    }
}

/// Re-chunks an arbitrarily split text stream into complete lines.
///
/// The attach stream delivers chunks at whatever boundaries the transport
/// happens to produce; several lines may arrive in one chunk and a line may
/// span chunks. Callers always see one line per event.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk, returning every complete line it finishes.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(index) = self.buffer.find('\n') {
            let rest = self.buffer.split_off(index + 1);
            lines.push(std::mem::replace(&mut self.buffer, rest));
        }
        lines
    }

    /// Returns the trailing segment with no newline, if any.
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }
}
