//! Markdown cell rendering.
//!
//! The primary renderer is pulldown-cmark with raw HTML neutralized: embedded
//! HTML is emitted as escaped text, and `javascript:` link targets are
//! replaced. The basic renderer is a handful of line-oriented substitutions
//! and is used when configured, or when the primary renderer produces nothing
//! for non-empty input.

use std::sync::OnceLock;

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::output::escape_html;

/// Which markdown renderer a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkdownRenderer {
    #[default]
    Commonmark,
    Basic,
}

impl std::fmt::Display for MarkdownRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkdownRenderer::Commonmark => write!(f, "commonmark"),
            MarkdownRenderer::Basic => write!(f, "basic"),
        }
    }
}

impl std::str::FromStr for MarkdownRenderer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "commonmark" | "cmark" => Ok(MarkdownRenderer::Commonmark),
            "basic" => Ok(MarkdownRenderer::Basic),
            _ => Err(format!("Unknown markdown renderer: {}", s)),
        }
    }
}

/// Render a markdown cell's source to HTML.
pub fn render_markdown(source: &str, renderer: MarkdownRenderer) -> String {
    match renderer {
        MarkdownRenderer::Basic => basic_markdown_to_html(source),
        MarkdownRenderer::Commonmark => {
            let html = commonmark_to_html(source);
            if html.trim().is_empty() && !source.trim().is_empty() {
                log::debug!("[markdown] commonmark produced no output, using basic renderer");
                basic_markdown_to_html(source)
            } else {
                html
            }
        }
    }
}

fn commonmark_to_html(source: &str) -> String {
    let mut opts = Options::empty();
    opts.insert(Options::ENABLE_TABLES);
    opts.insert(Options::ENABLE_STRIKETHROUGH);

    let events = Parser::new_ext(source, opts).map(|event| match event {
        // Raw HTML is shown, never interpreted.
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        other => other,
    });

    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, events);
    html
}

fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    let scheme = url.trim_start().to_ascii_lowercase();
    if scheme.starts_with("javascript:") || scheme.starts_with("vbscript:") {
        CowStr::Borrowed("#")
    } else {
        url
    }
}

fn basic_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?m)^### (.*)$", "<h3>$1</h3>"),
            (r"(?m)^## (.*)$", "<h2>$1</h2>"),
            (r"(?m)^# (.*)$", "<h1>$1</h1>"),
            (r"\*\*(.*?)\*\*", "<strong>$1</strong>"),
            (r"\*(.*?)\*", "<em>$1</em>"),
            (r"`(.*?)`", "<code>$1</code>"),
            (r"\n", "<br>"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
            Ok(re) => Some((re, replacement)),
            Err(e) => {
                log::error!("[markdown] invalid rule {pattern}: {e}");
                None
            }
        })
        .collect()
    })
}

/// Minimal renderer: headers 1-3, bold, italic, inline code, line breaks.
///
/// Input is HTML-escaped before any substitution.
pub fn basic_markdown_to_html(source: &str) -> String {
    let mut html = escape_html(source);
    for (re, replacement) in basic_rules() {
        html = re.replace_all(&html, *replacement).into_owned();
    }
    html
}
