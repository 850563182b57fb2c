//! The notebook document: an ordered list of cells plus the selection.
//!
//! Every mutation goes through [`Document`], which keeps ids unique and
//! emits a [`NotebookEvent`] for each visible change so a render layer can
//! redraw without reaching into the model.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cell::{Cell, CellId, CellKind, CellSize};
use crate::editor::EditorSurface;
use crate::events::{EventSink, LogSink, NotebookEvent};
use crate::format::{source_to_lines, SerializedCell, SerializedDocument, SerializedOutput};
use crate::output::CellOutput;

/// Direction for [`Document::move_cell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

pub struct Document {
    cells: Vec<Cell>,
    selected: Option<usize>,
    editors: HashMap<CellId, Box<dyn EditorSurface>>,
    sink: Arc<dyn EventSink>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("cells", &self.cells)
            .field("selected", &self.selected)
            .field("editors", &self.editors.len())
            .finish()
    }
}

impl Document {
    /// An empty document that reports events to the log.
    pub fn new() -> Self {
        Self::with_sink(Arc::new(LogSink))
    }

    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            cells: Vec::new(),
            selected: None,
            editors: HashMap::new(),
            sink,
        }
    }

    pub(crate) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    fn emit(&self, event: NotebookEvent) {
        self.sink.emit(event);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_by_id(&self, id: CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == id)
    }

    fn cell_by_id_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.id == id)
    }

    pub fn find_cell_index(&self, id: CellId) -> Option<usize> {
        self.cells.iter().position(|c| c.id == id)
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_cell(&self) -> Option<&Cell> {
        self.selected.and_then(|i| self.cells.get(i))
    }

    fn set_selection(&mut self, index: Option<usize>) {
        if self.selected != index {
            self.selected = index;
            self.emit(NotebookEvent::SelectionChanged { index });
        }
    }

    // ── Structure ────────────────────────────────────────────────────

    /// Insert a new cell at `at` (clamped to the end; `None` appends) and
    /// select it.
    pub fn add_cell(&mut self, kind: CellKind, source: impl Into<String>, at: Option<usize>) -> &Cell {
        let index = at.map_or(self.cells.len(), |i| i.min(self.cells.len()));
        let cell = Cell::new(kind, source.into());
        let cell_id = cell.id;
        self.cells.insert(index, cell);
        self.emit(NotebookEvent::CellAdded { cell_id, index });
        self.selected = Some(index);
        self.emit(NotebookEvent::SelectionChanged {
            index: self.selected,
        });
        &self.cells[index]
    }

    /// Insert an empty code cell above the selection, or append when nothing
    /// is selected.
    pub fn insert_cell_above(&mut self) -> CellId {
        let at = self.selected;
        self.add_cell(CellKind::Code, "", at).id
    }

    /// Insert an empty code cell below the selection, or append when nothing
    /// is selected.
    pub fn insert_cell_below(&mut self) -> CellId {
        let at = self.selected.map(|i| i + 1);
        self.add_cell(CellKind::Code, "", at).id
    }

    /// Remove the cell at `index`. Out-of-range indices are ignored.
    ///
    /// When the removed cell sat at or before the selection, the selection
    /// steps back by one (not below 0). An emptied document has no selection.
    pub fn delete_cell(&mut self, index: usize) -> Option<Cell> {
        if index >= self.cells.len() {
            return None;
        }
        let cell = self.cells.remove(index);
        self.editors.remove(&cell.id);
        self.emit(NotebookEvent::CellDeleted {
            cell_id: cell.id,
            index,
        });

        let selection = if self.cells.is_empty() {
            None
        } else {
            match self.selected {
                Some(s) if s >= index => Some(s.saturating_sub(1)),
                other => other,
            }
            .map(|s| s.min(self.cells.len() - 1))
        };
        self.set_selection(selection);
        Some(cell)
    }

    pub fn delete_selected_cell(&mut self) -> Option<Cell> {
        self.selected.and_then(|i| self.delete_cell(i))
    }

    /// Swap the cell at `index` with its neighbor. The moved cell stays
    /// selected. Returns `false` when there is no neighbor in that direction.
    pub fn move_cell(&mut self, index: usize, direction: MoveDirection) -> bool {
        let target = match direction {
            MoveDirection::Up => index.checked_sub(1),
            MoveDirection::Down => index.checked_add(1),
        };
        let Some(target) = target.filter(|t| *t < self.cells.len() && index < self.cells.len())
        else {
            return false;
        };

        self.cells.swap(index, target);
        self.emit(NotebookEvent::CellMoved {
            cell_id: self.cells[target].id,
            from: index,
            to: target,
        });
        self.set_selection(Some(target));
        true
    }

    /// Switch a cell between code and markdown. Same kind is a no-op.
    ///
    /// The old output is kept until the cell runs again. Inside a session use
    /// [`Session::change_cell_kind`](crate::session::Session::change_cell_kind),
    /// which also fences off replies still in flight.
    pub fn change_cell_kind(&mut self, index: usize, kind: CellKind) -> bool {
        let Some(cell) = self.cells.get_mut(index) else {
            return false;
        };
        if cell.kind == kind {
            return false;
        }
        cell.kind = kind;
        let cell_id = cell.id;
        self.emit(NotebookEvent::CellKindChanged { cell_id, kind });
        true
    }

    // ── Selection ────────────────────────────────────────────────────

    pub fn select_cell(&mut self, index: usize) -> bool {
        if index >= self.cells.len() {
            return false;
        }
        self.set_selection(Some(index));
        true
    }

    pub fn select_previous(&mut self) -> bool {
        match self.selected {
            Some(i) if i > 0 => self.select_cell(i - 1),
            _ => false,
        }
    }

    pub fn select_next(&mut self) -> bool {
        match self.selected {
            Some(i) => self.select_cell(i + 1),
            None => self.select_cell(0),
        }
    }

    // ── Editor binding ───────────────────────────────────────────────

    /// Bind a live editor to a cell. Its contents win over the stored source
    /// at the next sync.
    pub fn attach_editor(&mut self, id: CellId, editor: Box<dyn EditorSurface>) -> bool {
        if self.find_cell_index(id).is_none() {
            return false;
        }
        self.editors.insert(id, editor);
        true
    }

    pub fn detach_editor(&mut self, id: CellId) -> Option<Box<dyn EditorSurface>> {
        self.editors.remove(&id)
    }

    /// An edit happened in the cell's editor.
    pub fn update_source(&mut self, id: CellId, text: impl Into<String>) -> bool {
        let text = text.into();
        let Some(cell) = self.cell_by_id_mut(id) else {
            return false;
        };
        if cell.source == text {
            return true;
        }
        cell.source = text;
        let size = CellSize::for_source(&cell.source);
        let resized = cell.size != size;
        cell.size = size;

        self.emit(NotebookEvent::SourceChanged { cell_id: id });
        if resized {
            self.emit(NotebookEvent::SizeChanged { cell_id: id, size });
        }
        true
    }

    /// Select the cell and expand its editor.
    pub fn focus(&mut self, id: CellId) -> bool {
        let Some(index) = self.find_cell_index(id) else {
            return false;
        };
        self.set_selection(Some(index));
        self.set_size(index, CellSize::Expanded);
        true
    }

    /// Collapse the editor again if the cell is empty.
    pub fn blur(&mut self, id: CellId) -> bool {
        let Some(index) = self.find_cell_index(id) else {
            return false;
        };
        let size = CellSize::for_source(&self.cells[index].source);
        self.set_size(index, size);
        true
    }

    fn set_size(&mut self, index: usize, size: CellSize) {
        let cell = &mut self.cells[index];
        if cell.size != size {
            cell.size = size;
            let cell_id = cell.id;
            self.emit(NotebookEvent::SizeChanged { cell_id, size });
        }
    }

    /// Pull the current text of one cell's editor into the model.
    pub(crate) fn sync_from_editor(&mut self, id: CellId) {
        if let Some(text) = self.editors.get(&id).map(|e| e.value()) {
            self.update_source(id, text);
        }
    }

    /// Pull every attached editor's text into the model.
    pub fn sync_all_from_editors(&mut self) {
        let updates: Vec<(CellId, String)> = self
            .editors
            .iter()
            .map(|(id, editor)| (*id, editor.value()))
            .collect();
        for (id, text) in updates {
            self.update_source(id, text);
        }
    }

    // ── Outputs ──────────────────────────────────────────────────────

    /// Replace a cell's output. `None` removes it.
    pub fn set_output(&mut self, id: CellId, output: Option<CellOutput>) -> bool {
        let Some(cell) = self.cell_by_id_mut(id) else {
            return false;
        };
        cell.output = output;
        self.emit(NotebookEvent::OutputChanged { cell_id: id });
        true
    }

    pub fn set_running(&mut self, id: CellId, running: bool) -> bool {
        let Some(cell) = self.cell_by_id_mut(id) else {
            return false;
        };
        if cell.running != running {
            cell.running = running;
            self.emit(NotebookEvent::CellRunning {
                cell_id: id,
                running,
            });
        }
        true
    }

    pub fn clear_all_outputs(&mut self) {
        let mut stopped = Vec::new();
        for cell in &mut self.cells {
            cell.output = None;
            if cell.running {
                cell.running = false;
                stopped.push(cell.id);
            }
        }
        for cell_id in stopped {
            self.emit(NotebookEvent::CellRunning {
                cell_id,
                running: false,
            });
        }
        self.emit(NotebookEvent::OutputsCleared);
    }

    // ── Import / export ──────────────────────────────────────────────

    /// Serialize the document, syncing from live editors first.
    pub fn export_document(&mut self) -> SerializedDocument {
        self.sync_all_from_editors();
        SerializedDocument::new(
            self.cells
                .iter()
                .map(|cell| SerializedCell {
                    cell_type: cell.kind,
                    source: source_to_lines(&cell.source),
                    outputs: cell
                        .output
                        .as_ref()
                        .map(|o| o.plain_text())
                        .filter(|t| !t.is_empty())
                        .map(|text| vec![SerializedOutput { text }])
                        .unwrap_or_default(),
                })
                .collect(),
        )
    }

    /// Code cells only, separated by a blank line.
    pub fn export_python(&mut self) -> String {
        self.sync_all_from_editors();
        self.cells
            .iter()
            .filter(|c| c.kind == CellKind::Code)
            .map(|c| c.source.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Replace every cell with the contents of `document`.
    ///
    /// Each loaded cell gets a fresh id. Stored outputs are shown as plain
    /// success text. The last cell ends up selected.
    pub fn load(&mut self, document: &SerializedDocument) {
        self.editors.clear();
        self.cells = document
            .cells
            .iter()
            .map(|serialized| {
                let mut cell = Cell::new(serialized.cell_type, serialized.source_text());
                let text: Vec<&str> = serialized
                    .outputs
                    .iter()
                    .map(|o| o.text.as_str())
                    .filter(|t| !t.is_empty())
                    .collect();
                if !text.is_empty() {
                    cell.output = Some(CellOutput::success(text.join("\n")));
                }
                cell
            })
            .collect();

        self.emit(NotebookEvent::DocumentLoaded {
            cell_count: self.cells.len(),
        });
        self.selected = self.cells.len().checked_sub(1);
        self.emit(NotebookEvent::SelectionChanged {
            index: self.selected,
        });
    }
}
