//! Byte spans and line/column positions.

use std::ops::Range;

/// Byte range `start..end` into a source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// A zero-width span at `offset`.
    #[must_use]
    pub const fn empty(offset: u32) -> Self {
        Self::new(offset, offset)
    }

    /// Resolves the start offset to a 1-based line and column. Columns count
    /// characters, matching what GraphQL error `locations` report.
    #[must_use]
    pub fn line_column(&self, source: &str) -> Location {
        let offset = (self.start as usize).min(source.len());
        let before = &source.as_bytes()[..offset];
        let line_start = memchr::memrchr(b'\n', before).map_or(0, |nl| nl + 1);
        let line = 1 + memchr::memchr_iter(b'\n', before).count();
        let column = source
            .get(line_start..offset)
            .map_or(offset - line_start, |text| text.chars().count());
        Location {
            line,
            column: column + 1,
        }
    }
}

/// 1-based position in a source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl From<Range<u32>> for Span {
    fn from(range: Range<u32>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl From<Span> for Range<usize> {
    fn from(span: Span) -> Self {
        span.start as usize..span.end as usize
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        Range::<usize>::from(span).into()
    }
}
