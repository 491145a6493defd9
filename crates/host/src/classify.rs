//! Heuristic success/failure classification of script stderr
//!
//! Provisioning scripts write both chatter and fatal errors to stderr and may
//! exit zero after emitting warnings. Classification is therefore text based
//! and kept free of any process handling.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// Explicit marker printed by the provisioning scripts' error helper.
pub const ERROR_MARKER: &str = "[ERROR]";

/// Marker printed by the scripts' warning helper.
pub const WARNING_MARKER: &str = "[WARNING]";

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI escape pattern is valid")
});

/// Outcome of inspecting a finished script's stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Carries the extracted, ANSI-free diagnostic.
    Failure(String),
}

impl Classification {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Remove ANSI CSI escape sequences (colors, cursor movement).
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Classify stderr of a process that exited without error.
///
/// Error-looking text fails the run unless warning/info/note text is also
/// present.
pub fn classify(stderr: &str) -> Classification {
    if stderr.is_empty() {
        return Classification::Success;
    }

    let lower = stderr.to_lowercase();
    let has_error = stderr.contains(ERROR_MARKER) || lower.contains("error") || lower.contains("failed");
    let is_warning = stderr.contains(WARNING_MARKER) || lower.contains("warning");
    let is_info = lower.contains("info") || lower.contains("note");

    if has_error && !is_warning && !is_info {
        let diagnostic = extract_diagnostic(stderr).unwrap_or_else(|| "Script reported an error".to_string());
        Classification::Failure(diagnostic)
    } else {
        Classification::Success
    }
}

/// Pull the most specific diagnostic out of stderr.
///
/// Lines mentioning the error marker or "error" are cleaned and joined with
/// `". "`. Without such lines the whole cleaned stderr is used; `None` when
/// nothing printable remains.
pub fn extract_diagnostic(stderr: &str) -> Option<String> {
    let lines: Vec<String> = stderr
        .lines()
        .filter(|line| line.contains(ERROR_MARKER) || line.to_lowercase().contains("error"))
        .map(|line| strip_ansi(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    if !lines.is_empty() {
        return Some(lines.join(". "));
    }

    let whole = strip_ansi(stderr).trim().to_string();
    if whole.is_empty() {
        None
    } else {
        Some(whole)
    }
}
