//! Byte spans and line/column mapping for Moonlet source text

use std::ops::Range;

/// A half-open byte range into a source string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Byte offset of the first byte
    pub start: u32,
    /// Byte offset one past the last byte
    pub end: u32,
}

impl Span {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both `self` and `other`
    #[must_use]
    pub fn to(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start as u32, range.end as u32)
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A 1-based line and column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Maps byte offsets of one source text to line/column locations
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<u32>,
    len: u32,
}

impl LineIndex {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(
                source
                    .bytes()
                    .enumerate()
                    .filter(|(_, b)| *b == b'\n')
                    .map(|(i, _)| (i + 1) as u32),
            )
            .collect();
        Self {
            line_starts,
            len: source.len() as u32,
        }
    }

    /// Location of a byte offset; offsets past the end clamp to the last byte
    #[must_use]
    pub fn location(&self, offset: u32) -> Location {
        let offset = offset.min(self.len);
        let line = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        Location::new(line as u32 + 1, offset - self.line_starts[line] + 1)
    }

    /// Start and end locations of a span (end is inclusive of the last byte)
    #[must_use]
    pub fn span_locations(&self, span: Span) -> (Location, Location) {
        let from = self.location(span.start);
        let to = self.location(span.end.saturating_sub(1).max(span.start));
        (from, to)
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_to_covers_both() {
        assert_eq!(Span::new(4, 9).to(Span::new(2, 6)), Span::new(2, 9));
        assert_eq!(Span::new(3, 3).len(), 0);
        assert!(Span::new(3, 3).is_empty());
    }

    #[test]
    fn locations_across_lines() {
        let index = LineIndex::new("local a = 1\nlocal b = 2\n\nreturn a");
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.location(0), Location::new(1, 1));
        assert_eq!(index.location(6), Location::new(1, 7));
        assert_eq!(index.location(12), Location::new(2, 1));
        assert_eq!(index.location(25), Location::new(4, 1));
    }

    #[test]
    fn span_locations_are_inclusive() {
        let index = LineIndex::new("x = 1\nprint(x)");
        let (from, to) = index.span_locations(Span::new(6, 14));
        assert_eq!(from, Location::new(2, 1));
        assert_eq!(to, Location::new(2, 8));
    }
}
