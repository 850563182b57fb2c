//! Live editing surfaces bound to cells.
//!
//! While a cell has focus its editor is the source of truth. Edit events push
//! the new text into the document immediately; whole-document operations
//! (export, save, run) additionally pull from every attached surface so a
//! missed or late-attached editor cannot leave stale source behind.

use std::sync::{Arc, Mutex, PoisonError};

/// A text surface the user types into.
pub trait EditorSurface: Send {
    /// Current buffer contents.
    fn value(&self) -> String;
}

/// In-process editor buffer that can be shared between the document and
/// whatever drives edits (a terminal UI, a test, a bridge to a webview).
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    text: Arc<Mutex<String>>,
}

impl SharedBuffer {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            text: Arc::new(Mutex::new(initial.into())),
        }
    }

    /// Replace the buffer contents without notifying the document.
    pub fn set(&self, text: impl Into<String>) {
        *self.text.lock().unwrap_or_else(PoisonError::into_inner) = text.into();
    }
}

impl EditorSurface for SharedBuffer {
    fn value(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
