use std::fmt;

use serde::Serialize;

/// Represents a byte span within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn point(at: usize) -> Self {
        Self { start: at, end: at }
    }

    /// Smallest span covering both operands.
    pub fn merge(self, other: SourceSpan) -> SourceSpan {
        SourceSpan {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Resolves byte offsets to line/column positions for one source text.
#[derive(Debug, Clone)]
pub struct SourceMap {
    line_starts: Vec<usize>,
    len: usize,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (idx, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(idx + 1);
            }
        }
        Self {
            line_starts,
            len: source.len(),
        }
    }

    pub fn position(&self, offset: usize) -> LineCol {
        let offset = offset.min(self.len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        LineCol {
            line: line + 1,
            col: offset - self.line_starts[line] + 1,
        }
    }

    /// `line:col-line:col` rendering used by the CLI diagnostic printer.
    pub fn span_display(&self, span: SourceSpan) -> String {
        let start = self.position(span.start);
        let end = self.position(span.end);
        if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_positions_across_lines() {
        let map = SourceMap::new("bet a b c\nlet x = 1\n");
        assert_eq!(map.position(0), LineCol { line: 1, col: 1 });
        assert_eq!(map.position(4), LineCol { line: 1, col: 5 });
        assert_eq!(map.position(10), LineCol { line: 2, col: 1 });
        assert_eq!(map.position(14), LineCol { line: 2, col: 5 });
    }

    #[test]
    fn clamps_past_the_end() {
        let map = SourceMap::new("x");
        assert_eq!(map.position(999), LineCol { line: 1, col: 2 });
    }

    #[test]
    fn merge_covers_both_spans() {
        let merged = SourceSpan::new(4, 7).merge(SourceSpan::new(1, 5));
        assert_eq!(merged, SourceSpan::new(1, 7));
    }
}
