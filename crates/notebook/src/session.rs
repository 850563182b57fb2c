//! A notebook session: one document, one execution backend, and the loop
//! that joins remote replies back onto the document.
//!
//! `Session` is an ordinary value. Nothing here is global, so several
//! sessions (or tests) can live in one process. Remote requests run as tokio
//! tasks and report back through a channel; only the owner of
//! `&mut Session` ever touches the cells, from whichever task drives
//! [`Session::process_next`] / [`Session::run_until_idle`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kernel_client::{ClientError, ExecutionBackend, KernelClient};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::autosave::{AutosaveSnapshot, Autosaver};
use crate::cell::{CellId, CellKind};
use crate::events::{EventSink, KernelStatus, LogSink, NotebookEvent, NotificationLevel};
use crate::execution::{
    dispatch_execute, dispatch_install, resolve_execute, resolve_install, Completion,
    ExecutionReply, PendingInstall, RequestTokens, Resolution, DEFAULT_RUN_ALL_STAGGER,
    INSTALL_TIMEOUT,
};
use crate::format::{to_json_pretty, DocumentFormat, SerializedDocument};
use crate::markdown::{render_markdown, MarkdownRenderer};
use crate::notebook_state::Document;
use crate::output::CellOutput;

/// Tunables for a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub markdown_renderer: MarkdownRenderer,
    /// Delay between dispatches in [`Session::run_all_cells`]
    pub run_all_stagger: Duration,
    /// Bound on each install-and-retry request
    pub install_timeout: Duration,
    /// Local directory for saves the backend could not take
    pub save_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            markdown_renderer: MarkdownRenderer::default(),
            run_all_stagger: DEFAULT_RUN_ALL_STAGGER,
            install_timeout: INSTALL_TIMEOUT,
            save_dir: None,
        }
    }
}

/// What [`Session::run_cell`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    OutOfRange,
    /// Markdown was rendered locally.
    RenderedMarkdown,
    /// Code was blank; an empty success output was set without a request.
    Empty,
    /// A request is in flight.
    Dispatched { token: u64 },
}

/// Where the current document came from, which decides how it is saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentOrigin {
    pub format: DocumentFormat,
    /// Local path or backend-relative path.
    pub path: String,
}

/// Result of [`Session::save_remote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedTo {
    Backend(String),
    /// The backend refused or was unreachable; written locally instead.
    Local(PathBuf),
}

enum Wake {
    Completion(Completion),
    RunAllDue,
    AutosaveDue,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// `notebook-2024-01-31-09-15-00.ipynb`
pub fn default_notebook_name() -> String {
    format!(
        "notebook-{}.ipynb",
        chrono::Utc::now().format("%Y-%m-%d-%H-%M-%S")
    )
}

pub struct Session {
    document: Document,
    backend: Arc<dyn ExecutionBackend>,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    tokens: RequestTokens,
    pending_installs: HashMap<CellId, PendingInstall>,
    in_flight: usize,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    run_all_queue: VecDeque<CellId>,
    run_all_due: Option<Instant>,
    autosaver: Option<Autosaver>,
    file_loaded: bool,
    origin: Option<DocumentOrigin>,
}

impl Session {
    /// A session with default settings that reports events to the log.
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self::with_sink(backend, Arc::new(LogSink), SessionConfig::default())
    }

    pub fn with_sink(
        backend: Arc<dyn ExecutionBackend>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            document: Document::with_sink(sink.clone()),
            backend,
            sink,
            config,
            tokens: RequestTokens::new(),
            pending_installs: HashMap::new(),
            in_flight: 0,
            completions_tx,
            completions_rx,
            run_all_queue: VecDeque::new(),
            run_all_due: None,
            autosaver: None,
            file_loaded: false,
            origin: None,
        }
    }

    pub fn with_autosave(mut self, autosaver: Autosaver) -> Self {
        self.autosaver = Some(autosaver);
        self
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn origin(&self) -> Option<&DocumentOrigin> {
        self.origin.as_ref()
    }

    /// Whether a real file was loaded (or saved) in this session.
    pub fn file_loaded(&self) -> bool {
        self.file_loaded
    }

    /// Requests dispatched but not yet applied.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.run_all_queue.is_empty()
    }

    pub fn pending_install(&self, cell_id: CellId) -> Option<&PendingInstall> {
        self.pending_installs.get(&cell_id)
    }

    pub fn pending_installs(&self) -> impl Iterator<Item = &PendingInstall> {
        self.pending_installs.values()
    }

    fn emit(&self, event: NotebookEvent) {
        self.sink.emit(event);
    }

    fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        self.emit(NotebookEvent::Notification {
            level,
            message: message.into(),
        });
    }

    fn spawn_request<F>(&mut self, cell_id: CellId, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.document.set_running(cell_id, true);
        self.in_flight += 1;
        self.emit(NotebookEvent::KernelStatusChanged {
            status: KernelStatus::Busy,
        });
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let completion = request.await;
            if tx.send(completion).is_err() {
                debug!("[session] session dropped before completion arrived");
            }
        });
    }

    // ── Running cells ────────────────────────────────────────────────

    /// Run the cell at `index`.
    ///
    /// Markdown renders immediately. Code is read from the cell's live editor,
    /// trimmed, and sent to the backend as a background task; the reply is
    /// applied by [`Session::process_next`]. Must be called inside a tokio
    /// runtime.
    pub fn run_cell(&mut self, index: usize) -> RunOutcome {
        let Some(cell_id) = self.document.cell(index).map(|c| c.id()) else {
            return RunOutcome::OutOfRange;
        };
        self.document.sync_from_editor(cell_id);
        let Some(cell) = self.document.cell(index) else {
            return RunOutcome::OutOfRange;
        };
        let kind = cell.kind();
        let source = cell.source().to_string();

        // Any reply still in flight for this cell is now stale.
        let token = self.tokens.issue(cell_id);
        self.pending_installs.remove(&cell_id);

        match kind {
            CellKind::Markdown => {
                let html = render_markdown(&source, self.config.markdown_renderer);
                self.document.set_running(cell_id, false);
                self.document
                    .set_output(cell_id, Some(CellOutput::markdown(html)));
                RunOutcome::RenderedMarkdown
            }
            CellKind::Code => {
                let code = source.trim().to_string();
                if code.is_empty() {
                    self.document.set_running(cell_id, false);
                    self.document.set_output(cell_id, Some(CellOutput::empty()));
                    return RunOutcome::Empty;
                }
                let request = dispatch_execute(self.backend.clone(), cell_id, token, code);
                self.spawn_request(cell_id, request);
                RunOutcome::Dispatched { token }
            }
        }
    }

    pub fn run_cell_by_id(&mut self, cell_id: CellId) -> RunOutcome {
        match self.document.find_cell_index(cell_id) {
            Some(index) => self.run_cell(index),
            None => RunOutcome::OutOfRange,
        }
    }

    pub fn run_selected_cell(&mut self) -> RunOutcome {
        match self.document.selected_index() {
            Some(index) => self.run_cell(index),
            None => RunOutcome::OutOfRange,
        }
    }

    /// Schedule every cell, in current order, one stagger interval apart.
    ///
    /// The first cell is dispatched immediately; the rest go out from
    /// [`Session::process_next`]. A cell deleted before its turn is skipped.
    /// Returns the number of cells scheduled.
    pub fn run_all_cells(&mut self) -> usize {
        self.run_all_queue = self.document.cells().iter().map(|c| c.id()).collect();
        let scheduled = self.run_all_queue.len();
        info!("[session] Running all {scheduled} cells");
        self.dispatch_next_scheduled();
        scheduled
    }

    fn dispatch_next_scheduled(&mut self) {
        self.run_all_due = None;
        while let Some(cell_id) = self.run_all_queue.pop_front() {
            if let Some(index) = self.document.find_cell_index(cell_id) {
                self.run_cell(index);
                break;
            }
            debug!("[session] Skipping deleted cell {cell_id}");
        }
        if !self.run_all_queue.is_empty() {
            self.run_all_due = Some(Instant::now() + self.config.run_all_stagger);
        }
    }

    /// Send the pending install-and-retry for `cell_id`. Returns false when
    /// nothing is pending for that cell.
    pub fn confirm_install(&mut self, cell_id: CellId) -> bool {
        let Some(pending) = self.pending_installs.remove(&cell_id) else {
            return false;
        };
        if self.document.find_cell_index(cell_id).is_none() {
            return false;
        }
        let token = self.tokens.issue(cell_id);
        let request = dispatch_install(
            self.backend.clone(),
            pending,
            token,
            self.config.install_timeout,
        );
        self.spawn_request(cell_id, request);
        true
    }

    /// Drop the pending install for `cell_id` without running anything.
    pub fn decline_install(&mut self, cell_id: CellId) -> bool {
        self.pending_installs.remove(&cell_id).is_some()
    }

    /// Switch a cell between code and markdown.
    ///
    /// Replies still in flight for the cell are discarded when they arrive,
    /// and any pending install confirmation is dropped.
    pub fn change_cell_kind(&mut self, index: usize, kind: CellKind) -> bool {
        if !self.document.change_cell_kind(index, kind) {
            return false;
        }
        if let Some(cell_id) = self.document.cell(index).map(|c| c.id()) {
            self.tokens.issue(cell_id);
            self.pending_installs.remove(&cell_id);
            self.document.set_running(cell_id, false);
        }
        true
    }

    // ── Applying replies ─────────────────────────────────────────────

    /// Reconcile a finished request with the document.
    pub fn apply_completion(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.apply_reply(completion);
        self.emit_load_status();
    }

    /// `Idle` when nothing is outstanding, `Busy` otherwise.
    fn emit_load_status(&self) {
        let status = if self.in_flight == 0 {
            KernelStatus::Idle
        } else {
            KernelStatus::Busy
        };
        self.emit(NotebookEvent::KernelStatusChanged { status });
    }

    fn apply_reply(&mut self, completion: Completion) {
        let Completion {
            cell_id,
            token,
            code,
            reply,
        } = completion;

        if self.document.find_cell_index(cell_id).is_none() {
            debug!("[session] Dropping reply for deleted cell {cell_id}");
            self.tokens.forget(cell_id);
            return;
        }
        if !self.tokens.is_current(cell_id, token) {
            debug!("[session] Dropping stale reply for cell {cell_id} (token {token})");
            return;
        }

        self.document.set_running(cell_id, false);
        let output = match reply {
            ExecutionReply::Execute(result) => match resolve_execute(result) {
                Resolution::Output(output) => output,
                Resolution::NeedsInstall(packages) => {
                    info!(
                        "[session] Cell {cell_id} needs {} package(s)",
                        packages.len()
                    );
                    self.pending_installs.insert(
                        cell_id,
                        PendingInstall {
                            cell_id,
                            code,
                            packages: packages.clone(),
                        },
                    );
                    self.emit(NotebookEvent::InstallConfirmationRequested { cell_id, packages });
                    return;
                }
            },
            ExecutionReply::Install(result) => resolve_install(result),
        };
        self.document.set_output(cell_id, Some(output));
    }

    /// Apply every reply that has already arrived, without waiting.
    pub fn try_apply_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.apply_completion(completion);
            applied += 1;
        }
        applied
    }

    /// Wait for the next thing to do (a reply, a scheduled run-all dispatch,
    /// or an autosave) and do it.
    pub async fn process_next(&mut self) {
        let run_all_due = self.run_all_due;
        let autosave_due = self.autosaver.as_ref().map(|a| a.next_due());

        let wake = tokio::select! {
            Some(completion) = self.completions_rx.recv() => Wake::Completion(completion),
            _ = sleep_until_opt(run_all_due) => Wake::RunAllDue,
            _ = sleep_until_opt(autosave_due) => Wake::AutosaveDue,
        };

        match wake {
            Wake::Completion(completion) => self.apply_completion(completion),
            Wake::RunAllDue => self.dispatch_next_scheduled(),
            Wake::AutosaveDue => {
                if let Err(e) = self.autosave_now() {
                    warn!("[autosave] {e:#}");
                }
            }
        }
    }

    /// Drive the session until no request is in flight and no run-all
    /// dispatch is scheduled.
    pub async fn run_until_idle(&mut self) {
        while !self.is_idle() {
            self.process_next().await;
        }
    }

    // ── Kernel ───────────────────────────────────────────────────────

    /// Reset the backend namespace and clear every output.
    ///
    /// Replies to requests sent before the restart are discarded when they
    /// arrive. On failure the document is left as it was.
    pub async fn restart_kernel(&mut self) -> Result<(), ClientError> {
        self.emit(NotebookEvent::KernelStatusChanged {
            status: KernelStatus::Restarting,
        });
        self.notify(NotificationLevel::Info, "Restarting kernel...");

        let result = self.backend.reset().await;
        match &result {
            Ok(()) => {
                self.tokens.clear();
                self.pending_installs.clear();
                self.run_all_queue.clear();
                self.run_all_due = None;
                self.document.clear_all_outputs();
                self.notify(NotificationLevel::Success, "Kernel restarted successfully!");
            }
            Err(e) => {
                warn!("[session] Kernel restart failed: {e}");
                self.notify(
                    NotificationLevel::Error,
                    format!("Failed to restart kernel: {e}"),
                );
            }
        }
        self.emit_load_status();
        result
    }

    // ── Files ────────────────────────────────────────────────────────

    /// Replace the document with `document` and remember where it came from.
    pub fn load_document(&mut self, document: &SerializedDocument, origin: Option<DocumentOrigin>) {
        self.document.load(document);
        self.pending_installs.clear();
        self.run_all_queue.clear();
        self.run_all_due = None;
        self.file_loaded = true;
        self.origin = origin;
        if let Some(autosaver) = &self.autosaver {
            autosaver.store().clear();
        }
    }

    /// Parse `content` by the extension of `name` and load it.
    ///
    /// A `.py` file becomes a single code cell and is saved back as Python.
    /// Malformed input is reported as a notification and leaves the current
    /// document untouched.
    pub fn open_content(&mut self, name: &str, content: &str) -> Result<()> {
        let format = DocumentFormat::from_path(Path::new(name));
        let document = match format.parse(content) {
            Ok(document) => document,
            Err(e) => {
                self.notify(
                    NotificationLevel::Error,
                    format!("Failed to load {name}: {e:#}"),
                );
                return Err(e);
            }
        };
        self.load_document(
            &document,
            Some(DocumentOrigin {
                format,
                path: name.to_string(),
            }),
        );
        let message = match format {
            DocumentFormat::Notebook => format!("Loaded notebook: {name}"),
            DocumentFormat::Python => format!("Loaded {name} as a new notebook"),
        };
        self.notify(NotificationLevel::Success, message);
        Ok(())
    }

    pub fn open_path(&mut self, path: &Path) -> Result<()> {
        let content = match std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
        {
            Ok(content) => content,
            Err(e) => {
                self.notify(NotificationLevel::Error, format!("{e:#}"));
                return Err(e);
            }
        };
        self.open_content(&path.to_string_lossy(), &content)
    }

    /// Download `path` from the backend and open it.
    pub async fn open_remote(&mut self, client: &KernelClient, path: &str) -> Result<()> {
        let content = match client.file_content(path).await {
            Ok(content) => content,
            Err(e) => {
                self.notify(
                    NotificationLevel::Error,
                    format!("Failed to load file: {e}"),
                );
                return Err(e.into());
            }
        };
        self.open_content(path, &content)
    }

    /// Serialized content for a save in `format`.
    pub fn export_as(&mut self, format: DocumentFormat) -> Result<String> {
        match format {
            DocumentFormat::Python => Ok(self.document.export_python()),
            DocumentFormat::Notebook => to_json_pretty(&self.document.export_document()),
        }
    }

    /// Name and format the next save should use.
    ///
    /// Documents opened from a Python file save back to that file; everything
    /// else saves as a notebook with a `.ipynb` name.
    pub fn save_target(&self) -> (String, DocumentFormat) {
        match &self.origin {
            Some(DocumentOrigin {
                format: DocumentFormat::Python,
                path,
            }) => (path.clone(), DocumentFormat::Python),
            Some(DocumentOrigin { path, .. }) if path.ends_with(".ipynb") => {
                (path.clone(), DocumentFormat::Notebook)
            }
            Some(DocumentOrigin { path, .. }) => (format!("{path}.ipynb"), DocumentFormat::Notebook),
            None => (default_notebook_name(), DocumentFormat::Notebook),
        }
    }

    fn mark_saved(&mut self, path: String, format: DocumentFormat) {
        self.origin = Some(DocumentOrigin { format, path });
        self.file_loaded = true;
        if let Some(autosaver) = &self.autosaver {
            autosaver.store().clear();
        }
    }

    /// Write the document to a local file, in the format its extension names.
    pub fn save_to_path(&mut self, path: &Path) -> Result<()> {
        let format = DocumentFormat::from_path(path);
        let content = self.export_as(format)?;
        if let Err(e) = std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
        {
            self.notify(
                NotificationLevel::Error,
                format!("Error saving notebook: {e:#}"),
            );
            return Err(e);
        }
        info!("[session] Saved {}", path.display());
        self.mark_saved(path.to_string_lossy().into_owned(), format);
        self.notify(
            NotificationLevel::Success,
            format!("Notebook saved as {}", path.display()),
        );
        Ok(())
    }

    /// Save through the backend, falling back to a local file when the
    /// backend refuses or cannot be reached.
    pub async fn save_remote(&mut self, client: &KernelClient) -> Result<SavedTo> {
        let (filename, format) = self.save_target();
        let content = self.export_as(format)?;

        match client.save_file(&filename, &content).await {
            Ok(saved) => {
                let path = saved.path.unwrap_or_else(|| filename.clone());
                self.mark_saved(filename.clone(), format);
                self.notify(
                    NotificationLevel::Success,
                    format!("Notebook saved as {filename}"),
                );
                Ok(SavedTo::Backend(path))
            }
            Err(e) => {
                warn!("[session] Server save failed, falling back to local save: {e}");
                let dir = self
                    .config
                    .save_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("."));
                let name = Path::new(&filename)
                    .file_name()
                    .map(|n| n.to_owned())
                    .unwrap_or_else(|| default_notebook_name().into());
                let local = dir.join(name);
                if let Err(e) = std::fs::create_dir_all(&dir)
                    .and_then(|()| std::fs::write(&local, &content))
                    .with_context(|| format!("Failed to write {}", local.display()))
                {
                    self.notify(
                        NotificationLevel::Error,
                        format!("Error saving notebook: {e:#}"),
                    );
                    return Err(e);
                }
                self.notify(
                    NotificationLevel::Success,
                    format!("Notebook saved locally to {}", local.display()),
                );
                Ok(SavedTo::Local(local))
            }
        }
    }

    // ── Autosave ─────────────────────────────────────────────────────

    /// Write a snapshot now if autosave is enabled and there is anything to
    /// save.
    pub fn autosave_now(&mut self) -> Result<bool> {
        let Some(mut autosaver) = self.autosaver.take() else {
            return Ok(false);
        };
        let result = if self.document.is_empty() {
            // Nothing to keep; just push the next check out.
            autosaver.reschedule();
            Ok(false)
        } else {
            let snapshot = self.document.export_document();
            autosaver.save(&snapshot).map(|()| true)
        };
        self.autosaver = Some(autosaver);
        result
    }

    /// Load the autosave snapshot unless this session already has a real
    /// document. Returns whether anything was restored.
    pub fn restore_autosave(&mut self) -> bool {
        if self.file_loaded || self.document.len() > 1 {
            debug!("[autosave] File already loaded, skipping restore");
            return false;
        }
        let Some(snapshot) = self.autosaver.as_ref().and_then(|a| a.store().load()) else {
            return false;
        };
        let AutosaveSnapshot { document, .. } = snapshot;
        if document.cells.is_empty() {
            return false;
        }
        self.document.load(&document);
        self.notify(NotificationLevel::Info, "Restored autosaved notebook");
        info!(
            "[autosave] Restored {} cells",
            self.document.len()
        );
        true
    }
}
