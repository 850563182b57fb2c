//! Notebook core for jupyter-web.
//!
//! Owns an ordered list of cells, keeps each cell's editor text in sync with
//! the model, sends code cells to a remote execution backend, and turns the
//! replies (output, errors, missing packages, plots) back into per-cell
//! state. UI concerns stay outside: a render layer listens for
//! [`NotebookEvent`]s and reads the [`Document`].

pub mod autosave;
pub mod cell;
pub mod editor;
pub mod events;
pub mod execution;
pub mod format;
pub mod markdown;
pub mod notebook_state;
pub mod output;
pub mod session;
pub mod settings;

pub use cell::{Cell, CellId, CellKind, CellSize};
pub use editor::{EditorSurface, SharedBuffer};
pub use events::{ChannelSink, EventSink, KernelStatus, LogSink, NotebookEvent, NotificationLevel};
pub use format::{DocumentFormat, SerializedDocument};
pub use markdown::MarkdownRenderer;
pub use notebook_state::{Document, MoveDirection};
pub use output::{CellOutput, OutputBlock, OutputStyle};
pub use session::{RunOutcome, SavedTo, Session, SessionConfig};
pub use settings::AppSettings;
