//! Syntax diagnostics and the error they turn into.

use crate::span::{Location, Span};
use std::fmt;

/// Diagnostic codes reported by the parser.
pub mod codes {
    pub const UNEXPECTED_TOKEN: &str = "syntax::unexpected_token";
    pub const UNEXPECTED_EOF: &str = "syntax::unexpected_eof";
    pub const INVALID_LITERAL: &str = "syntax::invalid_literal";
    pub const UNTERMINATED_STRING: &str = "syntax::unterminated_string";
    pub const NESTING_LIMIT: &str = "syntax::nesting_limit";
}

/// One problem found in a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: &'static str,
    pub span: Span,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}..{}", self.message, self.span.start, self.span.end)
    }
}

/// Diagnostics collected while parsing, in report order.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error.
    pub fn error(&mut self, code: &'static str, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            code,
            span,
            message: message.into(),
        });
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// The first error reported.
    #[must_use]
    pub fn first(&self) -> Option<&Diagnostic> {
        self.diagnostics.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// A syntax error together with the source it was found in.
///
/// Implements [`miette::Diagnostic`], so it renders with the offending span
/// highlighted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Syntax Error: {message}")]
pub struct SourceError {
    message: String,
    code: &'static str,
    span: Span,
    location: Location,
    source_code: String,
}

impl SourceError {
    /// The error for the first diagnostic in `bag`, if there is one.
    pub fn from_bag(bag: &DiagnosticBag, source: &str) -> Option<Self> {
        bag.first().map(|d| Self::new(d, source))
    }

    pub fn new(diagnostic: &Diagnostic, source: &str) -> Self {
        Self {
            message: diagnostic.message.clone(),
            code: diagnostic.code,
            span: diagnostic.span,
            location: diagnostic.span.line_column(source),
            source_code: source.to_string(),
        }
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl miette::Diagnostic for SourceError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.source_code)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        let label = miette::LabeledSpan::at(self.span, self.message.clone());
        Some(Box::new(std::iter::once(label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bag_keeps_report_order() {
        let mut bag = DiagnosticBag::new();
        assert!(!bag.has_errors());
        bag.error(codes::UNEXPECTED_TOKEN, Span::new(0, 1), "first");
        bag.error(codes::INVALID_LITERAL, Span::new(4, 6), "second");

        assert_eq!(bag.len(), 2);
        assert_eq!(bag.first().unwrap().message, "first");
        assert_eq!(bag.iter().nth(1).unwrap().to_string(), "second at 4..6");
    }

    #[test]
    fn test_source_error() {
        let mut bag = DiagnosticBag::new();
        bag.error(
            codes::UNEXPECTED_TOKEN,
            Span::new(8, 9),
            "Expected Name, found \"}\".",
        );

        let err = SourceError::from_bag(&bag, "query {\n}").unwrap();
        assert_eq!(err.location(), Location { line: 2, column: 1 });
        assert_eq!(err.code(), codes::UNEXPECTED_TOKEN);
        assert_eq!(err.to_string(), "Syntax Error: Expected Name, found \"}\".");
        assert!(SourceError::from_bag(&DiagnosticBag::new(), "").is_none());
    }
}
