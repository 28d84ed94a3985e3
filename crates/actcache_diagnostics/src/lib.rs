//! User-facing diagnostics for the action cache.
//!
//! Cache problems never abort a build, but some of them (a quarantined cache,
//! for instance) still deserve a message. The engine emits structured
//! [`Diagnostic`]s into a thread-safe [`DiagnosticSink`] owned by the caller,
//! and [`TerminalRenderer`] formats them for the terminal.

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use code::{Category, DiagnosticCode};
pub use diagnostic::Diagnostic;
pub use renderer::{DiagnosticRenderer, TerminalRenderer};
pub use severity::Severity;
pub use sink::DiagnosticSink;
