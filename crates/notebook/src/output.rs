//! Rendered cell output.
//!
//! A [`CellOutput`] is the projection of one execution (or markdown render)
//! into displayable blocks. Setting a cell's output always replaces the
//! previous value wholesale; outputs never accumulate across runs.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Visual treatment of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    Success,
    Error,
    /// Rendered markdown; carries no status theme.
    Markdown,
}

/// One displayable piece of an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputBlock {
    /// Preformatted text, whitespace preserved.
    Text { text: String },
    /// Already-sanitized HTML (markdown cells only).
    Html { html: String },
    /// An image as a `data:` URL.
    Image { data_url: String },
}

/// Output attached to a cell after it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOutput {
    pub style: OutputStyle,
    pub blocks: Vec<OutputBlock>,
}

/// Colors for the two status styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTheme {
    pub background: &'static str,
    pub border_left: &'static str,
    pub color: &'static str,
}

impl OutputTheme {
    pub const SUCCESS: OutputTheme = OutputTheme {
        background: "#f0fff4",
        border_left: "3px solid #68d391",
        color: "#22543d",
    };

    pub const ERROR: OutputTheme = OutputTheme {
        background: "#fff5f5",
        border_left: "3px solid #feb2b2",
        color: "#e53e3e",
    };

    fn css(&self) -> String {
        format!(
            "background: {}; border-left: {}; color: {};",
            self.background, self.border_left, self.color
        )
    }
}

impl CellOutput {
    /// Success output with nothing to show. Result of running an empty cell.
    pub fn empty() -> Self {
        Self {
            style: OutputStyle::Success,
            blocks: Vec::new(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::text(OutputStyle::Success, text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::text(OutputStyle::Error, text.into())
    }

    fn text(style: OutputStyle, text: String) -> Self {
        let blocks = if text.is_empty() {
            Vec::new()
        } else {
            vec![OutputBlock::Text { text }]
        };
        Self { style, blocks }
    }

    /// Success output with the text block first, then each plot in order.
    pub fn with_plots(text: impl Into<String>, plots: &[String]) -> Self {
        let mut output = Self::success(text);
        output.blocks.extend(plots.iter().map(|p| OutputBlock::Image {
            data_url: p.clone(),
        }));
        output
    }

    pub fn markdown(html: impl Into<String>) -> Self {
        Self {
            style: OutputStyle::Markdown,
            blocks: vec![OutputBlock::Html { html: html.into() }],
        }
    }

    pub fn is_error(&self) -> bool {
        self.style == OutputStyle::Error
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Text content only, joined by newlines. Images are omitted; HTML is
    /// included as-is.
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                OutputBlock::Text { text } => Some(text.as_str()),
                OutputBlock::Html { html } => Some(html.as_str()),
                OutputBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            OutputBlock::Image { data_url } => Some(data_url.as_str()),
            _ => None,
        })
    }

    pub fn theme(&self) -> Option<OutputTheme> {
        match self.style {
            OutputStyle::Success => Some(OutputTheme::SUCCESS),
            OutputStyle::Error => Some(OutputTheme::ERROR),
            OutputStyle::Markdown => None,
        }
    }

    /// HTML projection for a browser-like render layer.
    pub fn to_html(&self) -> String {
        if self.style == OutputStyle::Markdown {
            return self
                .blocks
                .iter()
                .filter_map(|b| match b {
                    OutputBlock::Html { html } => Some(html.as_str()),
                    _ => None,
                })
                .collect();
        }

        let style = self.theme().map(|t| t.css()).unwrap_or_default();
        let mut html = String::new();
        let mut plot = 0;
        for block in &self.blocks {
            match block {
                OutputBlock::Text { text } => {
                    html.push_str(&format!(
                        "<pre style=\"white-space: pre-wrap; {style}\">{}</pre>",
                        escape_html(text)
                    ));
                }
                OutputBlock::Html { html: inner } => html.push_str(inner),
                OutputBlock::Image { data_url } => {
                    plot += 1;
                    html.push_str(&format!(
                        "<div class=\"plot-output\"><img src=\"{}\" alt=\"Plot {plot}\" style=\"max-width: 100%;\"></div>",
                        escape_html(data_url)
                    ));
                }
            }
        }
        html
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// `[Executed in 12.0ms]` from a duration in seconds.
pub fn format_execution_time(seconds: f64) -> String {
    format!("[Executed in {:.1}ms]", seconds * 1000.0)
}

/// A decoded `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DecodedImage {
    /// File extension for the image's mime type.
    pub fn extension(&self) -> &str {
        match self.mime.as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/svg+xml" => "svg",
            "image/gif" => "gif",
            _ => "bin",
        }
    }
}

/// Decode a base64 data URL. Returns `None` for anything else.
pub fn decode_data_url(url: &str) -> Option<DecodedImage> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()?;
    Some(DecodedImage {
        mime: mime.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_has_no_blocks() {
        assert!(CellOutput::success("").is_empty());
        assert!(CellOutput::empty().is_empty());
        assert!(!CellOutput::empty().is_error());
    }

    #[test]
    fn test_plots_follow_text() {
        let plots = vec!["data:image/png;base64,AAAA".to_string(), "data:image/png;base64,BBBB".to_string()];
        let output = CellOutput::with_plots("done", &plots);
        assert_eq!(output.blocks.len(), 3);
        assert!(matches!(output.blocks[0], OutputBlock::Text { .. }));
        assert_eq!(output.images().collect::<Vec<_>>(), vec![plots[0].as_str(), plots[1].as_str()]);
        assert_eq!(output.plain_text(), "done");
    }

    #[test]
    fn test_plots_without_text() {
        let plots = vec!["data:image/png;base64,AAAA".to_string()];
        let output = CellOutput::with_plots("", &plots);
        assert_eq!(output.blocks.len(), 1);
        assert!(output.to_html().contains("alt=\"Plot 1\""));
    }

    #[test]
    fn test_to_html_escapes_and_themes() {
        let html = CellOutput::error("<b>&</b>").to_html();
        assert!(html.starts_with("<pre"));
        assert!(html.contains("&lt;b&gt;&amp;&lt;/b&gt;"));
        assert!(html.contains("#fff5f5"));
        assert!(html.contains("#e53e3e"));

        let html = CellOutput::success("ok").to_html();
        assert!(html.contains("#f0fff4"));
        assert!(html.contains("3px solid #68d391"));
    }

    #[test]
    fn test_markdown_html_is_passed_through() {
        let output = CellOutput::markdown("<h1>Hi</h1>\n");
        assert_eq!(output.to_html(), "<h1>Hi</h1>\n");
        assert!(output.theme().is_none());
    }

    #[test]
    fn test_format_execution_time() {
        assert_eq!(format_execution_time(0.01), "[Executed in 10.0ms]");
        assert_eq!(format_execution_time(1.23456), "[Executed in 1234.6ms]");
    }

    #[test]
    fn test_decode_data_url() {
        let decoded = decode_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(decoded.mime, "image/png");
        assert_eq!(decoded.bytes, b"hello");
        assert_eq!(decoded.extension(), "png");

        assert!(decode_data_url("http://example.com/x.png").is_none());
        assert!(decode_data_url("data:image/png,raw").is_none());
        assert!(decode_data_url("data:image/png;base64,***").is_none());
    }
}
