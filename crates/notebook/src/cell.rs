//! Cell entity: one unit of a notebook document.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::output::CellOutput;

/// Opaque cell identifier, unique for the lifetime of the process.
///
/// Backed by a random UUID, so an id is never handed out twice even after
/// the cell it named has been deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(Uuid);

impl CellId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CellId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What a cell contains, which decides how it runs and renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    #[default]
    Code,
    /// Raw cells from other tools are treated as markdown on import.
    #[serde(alias = "raw")]
    Markdown,
}

impl std::fmt::Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellKind::Code => write!(f, "code"),
            CellKind::Markdown => write!(f, "markdown"),
        }
    }
}

impl std::str::FromStr for CellKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code" => Ok(CellKind::Code),
            "markdown" | "md" | "raw" => Ok(CellKind::Markdown),
            _ => Err(format!("Unknown cell type: {}", s)),
        }
    }
}

/// Cosmetic editor height. Empty cells collapse, cells with content expand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellSize {
    Compact,
    Expanded,
}

impl CellSize {
    pub fn for_source(source: &str) -> Self {
        if source.trim().is_empty() {
            CellSize::Compact
        } else {
            CellSize::Expanded
        }
    }
}

/// A single notebook cell.
///
/// A cell does not know its own position; that is derived from where it sits
/// in the owning [`Document`](crate::notebook_state::Document).
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub(crate) id: CellId,
    pub(crate) kind: CellKind,
    pub(crate) source: String,
    pub(crate) output: Option<CellOutput>,
    pub(crate) size: CellSize,
    pub(crate) running: bool,
}

impl Cell {
    pub(crate) fn new(kind: CellKind, source: String) -> Self {
        let size = CellSize::for_source(&source);
        Self {
            id: CellId::new(),
            kind,
            source,
            output: None,
            size,
            running: false,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Rendered result of the last run; `None` until the cell has been run.
    pub fn output(&self) -> Option<&CellOutput> {
        self.output.as_ref()
    }

    pub fn size(&self) -> CellSize {
        self.size
    }

    /// UI feedback only: a request for this cell is outstanding.
    pub fn is_running(&self) -> bool {
        self.running
    }
}
