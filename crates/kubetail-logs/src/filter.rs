use regex::Regex;
use serde_json::Value;

use kubetail_types::{ExcludeTag, Result, TailError};

/// Decides whether a line is shown
pub trait LineFilter: Send + Sync {
    fn accept(&self, line: &str) -> bool;
}

/// Compiled content filter built from exclusion tags and an optional pattern
#[derive(Clone, Default)]
pub struct LogFilter {
    /// Only lines matching this are shown (if any)
    regex: Option<Regex>,

    exclude_access_logs: bool,
    exclude_dd_logs: bool,
}

impl LogFilter {
    /// Filter that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_excludes(mut self, excludes: &[ExcludeTag]) -> Self {
        self.exclude_access_logs = excludes.contains(&ExcludeTag::AccessLogs);
        self.exclude_dd_logs = excludes.contains(&ExcludeTag::DdLogs);
        self
    }

    /// Only accept lines matching `pattern`
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| TailError::invalid(format!("Invalid grep pattern: {}", e)))?;
        self.regex = Some(regex);
        Ok(self)
    }

}

impl LineFilter for LogFilter {
    fn accept(&self, line: &str) -> bool {
        if self.exclude_access_logs && is_access_log(line) {
            return false;
        }
        if self.exclude_dd_logs && is_dd_log(line) {
            return false;
        }

        match &self.regex {
            Some(re) => re.is_match(line),
            None => true,
        }
    }
}

impl std::fmt::Debug for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFilter")
            .field("pattern", &self.regex.as_ref().map(Regex::as_str))
            .field("exclude_access_logs", &self.exclude_access_logs)
            .field("exclude_dd_logs", &self.exclude_dd_logs)
            .finish()
    }
}

/// JSON line carrying an HTTP status
fn is_access_log(line: &str) -> bool {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('{') {
        return false;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(fields)) => {
            fields.contains_key("http.response.status_code") || fields.contains_key("http_status")
        }
        _ => false,
    }
}

fn is_dd_log(line: &str) -> bool {
    line.contains("[dd") || line.contains("[datadog]")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS_LOG: &str =
        r#"{"@timestamp":"2024-08-10T10:00:00Z","http.response.status_code":200,"url.path":"/"}"#;
    const APP_LOG: &str = r#"{"@timestamp":"2024-08-10T10:00:00Z","message":"started"}"#;

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = LogFilter::new();
        assert!(filter.accept(ACCESS_LOG));
        assert!(filter.accept("[dd.trace_id=1] hello"));
    }

    #[test]
    fn test_exclude_access_logs() {
        let filter = LogFilter::new().with_excludes(&[ExcludeTag::AccessLogs]);
        assert!(!filter.accept(ACCESS_LOG));
        assert!(!filter.accept(r#"{"http_status":500}"#));
        assert!(filter.accept(APP_LOG));
        assert!(filter.accept("not json at all"));
    }

    #[test]
    fn test_exclude_dd_logs() {
        let filter = LogFilter::new().with_excludes(&[ExcludeTag::DdLogs]);
        assert!(!filter.accept("[dd.trace_id=1 dd.span_id=2] hello"));
        assert!(!filter.accept("2024 [datadog] agent started"));
        assert!(filter.accept(APP_LOG));
    }

    #[test]
    fn test_pattern_filter() {
        let filter = LogFilter::new().with_pattern("error").unwrap();
        assert!(filter.accept("an error occurred"));
        assert!(!filter.accept("everything is fine"));
        assert!(LogFilter::new().with_pattern("(").is_err());
    }

    #[test]
    fn test_excludes_combine_with_pattern() {
        let filter = LogFilter::new()
            .with_excludes(&[ExcludeTag::DdLogs])
            .with_pattern("hello")
            .unwrap();
        assert!(filter.accept("hello world"));
        assert!(!filter.accept("[dd.trace_id=1] hello"));
        assert!(!filter.accept("goodbye"));
    }
}
