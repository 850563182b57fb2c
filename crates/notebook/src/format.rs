//! Persisted notebook format.
//!
//! Export writes the common notebook interchange shape (nbformat 4.4):
//! `{cells: [{cell_type, source: [lines], outputs: [{text}]}], metadata,
//! nbformat, nbformat_minor}`. Import is lenient about what other tools
//! write: `source` may be a single string, outputs may carry `text` as a
//! string or line array or only `data["text/plain"]`, and unknown keys are
//! ignored.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::cell::CellKind;

pub const NBFORMAT: u32 = 4;
pub const NBFORMAT_MINOR: u32 = 4;

/// Split source into lines, each keeping its trailing newline, so that
/// `lines.join("")` reproduces the original exactly.
pub fn source_to_lines(source: &str) -> Vec<String> {
    if source.is_empty() {
        return Vec::new();
    }
    source.split_inclusive('\n').map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub display_name: String,
    #[serde(default)]
    pub language: Option<String>,
    pub name: String,
}

impl KernelSpec {
    pub fn python3() -> Self {
        Self {
            display_name: "Python 3".to_string(),
            language: Some("python".to_string()),
            name: "python3".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernelspec: Option<KernelSpec>,
    /// Everything else (language_info, widget state, ...) carried through.
    #[serde(flatten)]
    pub additional: serde_json::Map<String, serde_json::Value>,
}

/// Whole-notebook serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedDocument {
    pub cells: Vec<SerializedCell>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    #[serde(default = "default_nbformat_minor")]
    pub nbformat_minor: u32,
}

fn default_nbformat() -> u32 {
    NBFORMAT
}

fn default_nbformat_minor() -> u32 {
    NBFORMAT_MINOR
}

impl SerializedDocument {
    /// A document with the default Python kernelspec.
    pub fn new(cells: Vec<SerializedCell>) -> Self {
        Self {
            cells,
            metadata: DocumentMetadata {
                kernelspec: Some(KernelSpec::python3()),
                additional: serde_json::Map::new(),
            },
            nbformat: NBFORMAT,
            nbformat_minor: NBFORMAT_MINOR,
        }
    }

    /// A plain Python script becomes one code cell.
    pub fn from_python(content: &str) -> Self {
        Self::new(vec![SerializedCell {
            cell_type: CellKind::Code,
            source: source_to_lines(content),
            outputs: Vec::new(),
        }])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedCell {
    pub cell_type: CellKind,
    #[serde(default, deserialize_with = "deserialize_source")]
    pub source: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<SerializedOutput>,
}

impl SerializedCell {
    pub fn source_text(&self) -> String {
        self.source.join("")
    }
}

/// Accept `"a\nb"` or `["a\n", "b"]`; `null` reads as empty.
fn deserialize_source<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct SourceVisitor;

    impl<'de> de::Visitor<'de> for SourceVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or array of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Vec<String>, E> {
            Ok(source_to_lines(v))
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Vec<String>, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: de::SeqAccess<'de>>(
            self,
            mut seq: A,
        ) -> std::result::Result<Vec<String>, A::Error> {
            let mut lines = Vec::new();
            while let Some(line) = seq.next_element::<String>()? {
                lines.push(line);
            }
            Ok(lines)
        }
    }

    deserializer.deserialize_any(SourceVisitor)
}

/// One output entry. Only the plain-text projection is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawOutput")]
pub struct SerializedOutput {
    pub text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextValue {
    One(String),
    Lines(Vec<String>),
}

impl TextValue {
    fn into_string(self) -> String {
        match self {
            TextValue::One(s) => s,
            TextValue::Lines(lines) => lines.join(""),
        }
    }
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    text: Option<TextValue>,
    #[serde(default)]
    data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl From<RawOutput> for SerializedOutput {
    fn from(raw: RawOutput) -> Self {
        let text = raw
            .text
            .map(TextValue::into_string)
            .or_else(|| {
                let plain = raw.data?.remove("text/plain")?;
                serde_json::from_value::<TextValue>(plain)
                    .ok()
                    .map(TextValue::into_string)
            })
            .unwrap_or_default();
        SerializedOutput { text }
    }
}

/// Parse a notebook file's JSON.
pub fn parse_document(content: &str) -> Result<SerializedDocument> {
    serde_json::from_str(content).context("Invalid notebook file")
}

pub fn to_json_pretty(document: &SerializedDocument) -> Result<String> {
    serde_json::to_string_pretty(document).context("Failed to serialize notebook")
}

/// On-disk representation, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Notebook,
    Python,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("py") => DocumentFormat::Python,
            _ => DocumentFormat::Notebook,
        }
    }

    /// Parse `content` in this format.
    pub fn parse(&self, content: &str) -> Result<SerializedDocument> {
        match self {
            DocumentFormat::Notebook => parse_document(content),
            DocumentFormat::Python => Ok(SerializedDocument::from_python(content)),
        }
    }
}
