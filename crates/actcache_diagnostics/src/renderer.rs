//! Terminal rendering of diagnostics.

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;

/// Formats a diagnostic into an output string.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic.
    fn render(&self, diag: &Diagnostic) -> String;
}

/// Renders diagnostics in a rustc-like layout:
///
/// ```text
/// warning[W301]: error during action cache initialization: ...
///    = note: data may be incomplete, potentially causing rebuilds
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes in output.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, severity: Severity, text: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        let ansi = match severity {
            Severity::Error => "31",
            Severity::Warning => "33",
            Severity::Note => "36",
        };
        format!("\x1b[1;{ansi}m{text}\x1b[0m")
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let head = format!("{}[{}]", diag.severity, diag.code);
        let mut out = format!("{}: {}", self.paint(diag.severity, &head), diag.message);
        for note in &diag.notes {
            out.push_str(&format!("\n   = note: {note}"));
        }
        for help in &diag.help {
            out.push_str(&format!("\n   = help: {help}"));
        }
        out
    }
}
