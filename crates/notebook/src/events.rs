//! State-change events emitted by the document and the execution dispatcher.
//!
//! The render layer subscribes by implementing [`EventSink`]; nothing in the
//! core touches a UI toolkit directly.

use kernel_client::MissingPackage;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::cell::{CellId, CellKind, CellSize};

/// Kernel activity as shown in the status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelStatus {
    Idle,
    Busy,
    Restarting,
}

impl std::fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelStatus::Idle => write!(f, "idle"),
            KernelStatus::Busy => write!(f, "busy"),
            KernelStatus::Restarting => write!(f, "restarting"),
        }
    }
}

/// Severity of a transient user notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Events emitted to the render layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotebookEvent {
    CellAdded {
        cell_id: CellId,
        index: usize,
    },
    CellDeleted {
        cell_id: CellId,
        index: usize,
    },
    CellMoved {
        cell_id: CellId,
        from: usize,
        to: usize,
    },
    /// Code and markdown cells use different editor modes; re-create the editor.
    CellKindChanged {
        cell_id: CellId,
        kind: CellKind,
    },
    SourceChanged {
        cell_id: CellId,
    },
    SizeChanged {
        cell_id: CellId,
        size: CellSize,
    },
    SelectionChanged {
        index: Option<usize>,
    },
    CellRunning {
        cell_id: CellId,
        running: bool,
    },
    /// The cell's output was replaced (or removed).
    OutputChanged {
        cell_id: CellId,
    },
    OutputsCleared,
    DocumentLoaded {
        cell_count: usize,
    },
    KernelStatusChanged {
        status: KernelStatus,
    },
    /// The backend reported missing imports; ask before installing.
    InstallConfirmationRequested {
        cell_id: CellId,
        packages: Vec<MissingPackage>,
    },
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

/// Receiver for [`NotebookEvent`]s.
///
/// Implement this to route events to a UI layer (terminal printer, channel,
/// webview bridge, logs, etc.).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: NotebookEvent);
}

/// Log-only sink.
///
/// Notifications go to the `log` crate at their matching level, everything
/// else at debug.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: NotebookEvent) {
        match &event {
            NotebookEvent::Notification { level, message } => match level {
                NotificationLevel::Error => log::error!("[notebook] {message}"),
                NotificationLevel::Warning => log::warn!("[notebook] {message}"),
                NotificationLevel::Info | NotificationLevel::Success => {
                    log::info!("[notebook] {message}")
                }
            },
            NotebookEvent::KernelStatusChanged { status } => {
                log::debug!("[notebook] kernel {status}");
            }
            other => log::debug!("[notebook] {other:?}"),
        }
    }
}

/// Forwards events into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<NotebookEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<NotebookEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NotebookEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: NotebookEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("[notebook] event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = NotebookEvent::SelectionChanged { index: Some(2) };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "selection_changed");
        assert_eq!(json["index"], 2);

        let json = serde_json::to_value(NotebookEvent::KernelStatusChanged {
            status: KernelStatus::Busy,
        })
        .unwrap();
        assert_eq!(json["event"], "kernel_status_changed");
        assert_eq!(json["status"], "busy");
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(NotebookEvent::OutputsCleared);
        assert_eq!(rx.try_recv().unwrap(), NotebookEvent::OutputsCleared);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.emit(NotebookEvent::OutputsCleared);
    }

    #[test]
    fn test_kernel_status_display() {
        assert_eq!(KernelStatus::Idle.to_string(), "idle");
        assert_eq!(KernelStatus::Restarting.to_string(), "restarting");
    }
}
