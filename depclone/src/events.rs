//! Progress/status channel shared by every component of a closure fetch.
//!
//! A single ordered sink is fed by the providers, the walker and the archive
//! assembler. The consumer end ([`EventStream`]) is handed to whoever renders
//! the events: a terminal UI or a remote client.
//!
//! # Cancellation
//!
//! The sink and the stream share one [`CancellationToken`]:
//!
//! - Once the token is cancelled, the sink silently drops every event.
//! - Dropping the [`EventStream`] cancels the token, so a consumer that goes
//!   away (lost connection, closed terminal) stops the walk.
//! - A send that fails because the receiver is gone also cancels the token.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::trace;

use crate::archive::ArchiveStream;

/// Severity of a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// One update on the progress/status channel.
pub enum ProgressEvent {
    /// Download progress of a large payload, in percent (0-100).
    Progress { percentage: f64 },

    /// Human-readable status line.
    Status { message: String, severity: Severity },

    /// The whole operation failed; no archive will follow.
    FatalError { message: String },

    /// The archive is ready to be streamed out.
    Complete {
        total_size: u64,
        stream: ArchiveStream,
    },
}

impl ProgressEvent {
    /// Message and severity of a status event.
    pub fn as_status(&self) -> Option<(&str, Severity)> {
        match self {
            ProgressEvent::Status { message, severity } => Some((message, *severity)),
            _ => None,
        }
    }

    /// Returns true for `Complete` and `FatalError`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::FatalError { .. }
        )
    }
}

impl fmt::Debug for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Progress { percentage } => f
                .debug_struct("Progress")
                .field("percentage", percentage)
                .finish(),
            ProgressEvent::Status { message, severity } => f
                .debug_struct("Status")
                .field("message", message)
                .field("severity", severity)
                .finish(),
            ProgressEvent::FatalError { message } => f
                .debug_struct("FatalError")
                .field("message", message)
                .finish(),
            ProgressEvent::Complete { total_size, .. } => f
                .debug_struct("Complete")
                .field("total_size", total_size)
                .finish_non_exhaustive(),
        }
    }
}

/// Create a connected sink/stream pair sharing `cancel`.
pub fn channel(cancel: CancellationToken) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = EventSink {
        tx,
        cancel: cancel.clone(),
    };
    let stream = EventStream {
        rx,
        _cancel_on_drop: cancel.drop_guard(),
    };
    (sink, stream)
}

/// Producer end of the channel. Cheap to clone.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Push an event unless the operation has been cancelled.
    pub fn emit(&self, event: ProgressEvent) {
        if self.cancel.is_cancelled() {
            trace!(?event, "Dropping event after cancellation");
            return;
        }
        if self.tx.send(event).is_err() {
            self.cancel.cancel();
        }
    }

    pub fn status(&self, message: impl Into<String>, severity: Severity) {
        self.emit(ProgressEvent::Status {
            message: message.into(),
            severity,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.status(message, Severity::Info);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.status(message, Severity::Success);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.status(message, Severity::Warning);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.status(message, Severity::Error);
    }

    pub fn progress(&self, percentage: f64) {
        self.emit(ProgressEvent::Progress { percentage });
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::FatalError {
            message: message.into(),
        });
    }

    /// Returns true once the cooperative cancellation flag is set.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The cancellation token shared with the stream.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Consumer end of the channel.
///
/// Yields events until the producer side finishes. Dropping the stream
/// cancels the operation feeding it.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    _cancel_on_drop: DropGuard,
}

impl EventStream {
    /// Wait for the next event; `None` once every sink is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Caller-side handle that sets the cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stop new work from starting. In-flight network calls are allowed to
    /// finish; no further events are delivered.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Payload size above which downloads report progress (2 MiB).
pub const DEFAULT_PROGRESS_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Converts streamed byte counts into `Progress` events.
///
/// Payloads at or below `threshold` bytes never report progress, which keeps
/// the many small downloads of a typical closure from flooding the channel.
/// Above it, one event is emitted per whole-percent change.
pub struct ProgressTracker {
    sink: EventSink,
    total: Option<u64>,
    received: u64,
    last_percent: Option<u64>,
}

impl ProgressTracker {
    pub fn new(sink: EventSink, content_length: Option<u64>, threshold: u64) -> Self {
        let total = content_length.filter(|len| *len > threshold);
        Self {
            sink,
            total,
            received: 0,
            last_percent: None,
        }
    }

    /// Returns true if this download emits progress events.
    pub fn is_reporting(&self) -> bool {
        self.total.is_some()
    }

    /// Bytes seen so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Record `bytes` more bytes.
    pub fn advance(&mut self, bytes: u64) {
        self.received += bytes;
        let Some(total) = self.total else {
            return;
        };

        let percent = (self.received.min(total) * 100) / total;
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            self.sink.progress(percent as f64);
        }
    }
}
