//! Text shaping for tool output

use crate::error::{Error, Result};
use regex::Regex;

/// Marker appended by [`truncate_with_marker`] when text was cut
pub const TRUNCATION_MARKER: &str = "...";

/// Keep at most `max_chars` characters.
pub fn clip_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Keep at most `max_chars` characters, appending [`TRUNCATION_MARKER`] when cut.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{}", &text[..idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Whether a body starts like an HTML document
pub fn looks_like_html(text: &str) -> bool {
    let head: String = text.trim_start().chars().take(16).collect();
    let head = head.to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

/// Reduces HTML to readable plain text.
///
/// Scripts and styles are dropped, every tag becomes a line break, runs of
/// horizontal whitespace collapse to one space, and blank lines are removed.
#[derive(Debug, Clone)]
pub struct HtmlStripper {
    script: Regex,
    style: Regex,
    tag: Regex,
    spaces: Regex,
}

impl HtmlStripper {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::Internal(format!("invalid pattern {}: {}", pattern, e)))
        };

        Ok(Self {
            script: compile(r"(?is)<script[\s\S]*?</script>")?,
            style: compile(r"(?is)<style[\s\S]*?</style>")?,
            tag: compile(r"(?s)<[^>]+>")?,
            spaces: compile(r"[^\S\n]+")?,
        })
    }

    pub fn strip(&self, html: &str) -> String {
        let text = self.script.replace_all(html, "");
        let text = self.style.replace_all(&text, "");
        let text = self.tag.replace_all(&text, "\n");
        let text = self.spaces.replace_all(&text, " ");

        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
