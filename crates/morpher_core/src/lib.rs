//! Shared building blocks for the morpher crates: source spans and syntax
//! diagnostics.

pub mod diagnostics;
pub mod span;

pub use diagnostics::{Diagnostic, DiagnosticBag, SourceError};
pub use span::{Location, Span};
