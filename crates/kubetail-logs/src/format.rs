use owo_colors::{OwoColorize, Style};
use serde_json::{Map, Value};

use kubetail_types::Line;

/// Turns a line into the text written to the output
pub trait LineFormatter: Send + Sync {
    fn format(&self, line: &Line) -> String;
}

/// Writes lines exactly as received
#[derive(Clone, Copy, Debug, Default)]
pub struct RawFormatter;

impl LineFormatter for RawFormatter {
    fn format(&self, line: &Line) -> String {
        line.text.clone()
    }
}

/// Terminal highlighting, a no-op when disabled
#[derive(Clone, Copy, Debug)]
pub struct Painter {
    enabled: bool,
}

impl Painter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.enabled {
            text.style(style).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn blue(&self, text: &str) -> String {
        self.paint(text, Style::new().blue())
    }

    pub fn red(&self, text: &str) -> String {
        self.paint(text, Style::new().red())
    }

    pub fn highlight_blue(&self, text: &str) -> String {
        self.paint(text, Style::new().bold().black().on_blue())
    }

    pub fn highlight_yellow(&self, text: &str) -> String {
        self.paint(text, Style::new().bold().black().on_yellow())
    }

    pub fn highlight_red(&self, text: &str) -> String {
        self.paint(text, Style::new().bold().black().on_red())
    }
}

/// Renders structured JSON logs as one readable line
///
/// Lines that are not a JSON object are passed through unchanged.
#[derive(Clone, Debug)]
pub struct JsonFormatter {
    /// Extra fields to surface, in order
    mdcs: Vec<String>,
    painter: Painter,
}

impl JsonFormatter {
    pub fn new(painter: Painter) -> Self {
        Self {
            mdcs: Vec::new(),
            painter,
        }
    }

    pub fn with_mdcs(mut self, mdcs: Vec<String>) -> Self {
        self.mdcs = mdcs;
        self
    }

    /// Format one raw line
    pub fn format_text(&self, text: &str) -> String {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return text.to_string();
        }

        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(trimmed) else {
            return text.to_string();
        };

        let mut parts = Vec::new();
        if let Some(ts) = field(&fields, "@timestamp") {
            parts.push(ts);
        }

        if let Some(code) = fields.get("http.response.status_code").and_then(Value::as_u64) {
            parts.extend(self.status_badge(code));
            parts.push(format!("[{}]", code));
            parts.extend(field(&fields, "http.request.method"));
            parts.extend(field(&fields, "url.path"));
        } else {
            parts.extend(self.level_badge(fields.get("log.level").and_then(Value::as_str)));
            parts.extend(field(&fields, "message"));
        }

        for mdc in &self.mdcs {
            if let Some(value) = field(&fields, mdc) {
                parts.push(format!("{}={}", mdc, value));
            }
        }

        parts.join(" ")
    }

    fn status_badge(&self, code: u64) -> Option<String> {
        match code {
            200..=399 => Some(self.painter.highlight_blue(" I ")),
            400..=499 => Some(self.painter.highlight_yellow(" W ")),
            500.. => Some(self.painter.highlight_red(" E ")),
            _ => None,
        }
    }

    fn level_badge(&self, level: Option<&str>) -> Option<String> {
        let level = level.map(str::trim).filter(|l| !l.is_empty())?;
        Some(match level {
            "INFO" => self.painter.highlight_blue(" I "),
            "WARN" => self.painter.highlight_yellow(" W "),
            "ERROR" => self.painter.highlight_red(" E "),
            other => other.to_string(),
        })
    }
}

impl LineFormatter for JsonFormatter {
    fn format(&self, line: &Line) -> String {
        self.format_text(&line.text)
    }
}

/// A JSON field as display text; strings are shown without quotes
fn field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Prefixes the source identity to another formatter's output
pub struct SourcePrefixFormatter<F> {
    inner: F,
}

impl<F: LineFormatter> SourcePrefixFormatter<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: LineFormatter> LineFormatter for SourcePrefixFormatter<F> {
    fn format(&self, line: &Line) -> String {
        format!("{} | {}", line.source, self.inner.format(line))
    }
}
