//! Row-window chunking.
//!
//! Splits an ordered row sequence into overlapping windows and renders each
//! window to text with an unambiguous field/row delimiter convention:
//! `name=value` pairs joined with `"; "` inside a row, rows joined with a
//! newline.

use crate::error::{RagError, Result};
use crate::model::{Chunk, ChunkMeta, Row};

/// Field separator inside one serialized row.
pub const FIELD_SEPARATOR: &str = "; ";
/// Row separator inside one chunk.
pub const ROW_SEPARATOR: &str = "\n";

/// Split `rows` into windows of `chunk_size` rows, each window starting
/// `chunk_size - overlap` rows after the previous one. The final window may
/// be shorter than `chunk_size`; it is never padded. Iteration stops once a
/// window reaches the end of the row sequence.
///
/// Identical `(rows, chunk_size, overlap)` inputs always produce identical
/// chunk ids and content, which is what makes re-ingestion idempotent.
///
/// Fails fast with a configuration error before any window is produced when
/// `chunk_size == 0` or `overlap >= chunk_size`.
pub fn chunk<'a>(
    rows: &'a [Row],
    chunk_size: usize,
    overlap: usize,
    source_id: &'a str,
) -> Result<Chunks<'a>> {
    if chunk_size == 0 {
        return Err(RagError::Configuration(
            "chunk_size must be positive".into(),
        ));
    }
    if overlap >= chunk_size {
        return Err(RagError::Configuration(format!(
            "overlap {} must be smaller than chunk_size {}",
            overlap, chunk_size
        )));
    }
    Ok(Chunks {
        rows,
        chunk_size,
        step: chunk_size - overlap,
        start: 0,
        done: rows.is_empty(),
        source_id,
    })
}

/// Lazy chunk sequence returned by [`chunk`].
pub struct Chunks<'a> {
    rows: &'a [Row],
    chunk_size: usize,
    step: usize,
    start: usize,
    done: bool,
    source_id: &'a str,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let start = self.start;
        let end = (start + self.chunk_size).min(self.rows.len());
        let content = serialize_rows(&self.rows[start..end]);
        let chunk = Chunk {
            id: chunk_id(start, end - 1),
            content,
            meta: ChunkMeta {
                start_row: start,
                end_row: end - 1,
                source_id: self.source_id.to_string(),
            },
        };
        if end == self.rows.len() {
            self.done = true;
        } else {
            self.start += self.step;
        }
        Some(chunk)
    }
}

/// Chunk identity is a direct composition of the inclusive row range.
pub fn chunk_id(start_row: usize, end_row: usize) -> String {
    format!("chunk_{}_{}", start_row, end_row)
}

fn serialize_rows(rows: &[Row]) -> String {
    rows.iter()
        .map(serialize_row)
        .collect::<Vec<_>>()
        .join(ROW_SEPARATOR)
}

fn serialize_row(row: &Row) -> String {
    row.fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                Row::new(vec![
                    ("month".to_string(), format!("2024-{:02}", i + 1)),
                    ("value".to_string(), i.to_string()),
                ])
            })
            .collect()
    }

    #[test]
    fn windows_advance_by_size_minus_overlap() {
        let rows = rows(10);
        let chunks: Vec<Chunk> = chunk(&rows, 5, 1, "test").unwrap().collect();
        let ranges: Vec<(usize, usize)> = chunks
            .iter()
            .map(|c| (c.meta.start_row, c.meta.end_row))
            .collect();
        assert_eq!(ranges, vec![(0, 4), (4, 8), (8, 9)]);
        assert_eq!(
            chunks.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["chunk_0_4", "chunk_4_8", "chunk_8_9"]
        );
    }

    #[test]
    fn chunking_is_deterministic() {
        let rows = rows(23);
        let first: Vec<Chunk> = chunk(&rows, 7, 2, "test").unwrap().collect();
        let second: Vec<Chunk> = chunk(&rows, 7, 2, "test").unwrap().collect();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.content, b.content);
            assert_eq!(a.meta, b.meta);
        }
    }

    #[test]
    fn chunks_cover_every_row() {
        for (n, size, overlap) in [(10, 5, 1), (1, 5, 0), (17, 4, 3), (25, 25, 0)] {
            let rows = rows(n);
            let chunks: Vec<Chunk> = chunk(&rows, size, overlap, "test").unwrap().collect();
            let covered: usize = chunks
                .iter()
                .map(|c| c.meta.end_row - c.meta.start_row + 1)
                .sum();
            assert!(covered >= n, "covered {} of {} rows", covered, n);
            assert_eq!(chunks.last().map(|c| c.meta.end_row), Some(n - 1));
        }
    }

    #[test]
    fn final_window_is_short_not_padded() {
        let rows = rows(7);
        let chunks: Vec<Chunk> = chunk(&rows, 5, 0, "test").unwrap().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].meta.start_row, 5);
        assert_eq!(chunks[1].meta.end_row, 6);
        assert_eq!(chunks[1].content.lines().count(), 2);
    }

    #[test]
    fn field_and_row_delimiters_are_unambiguous() {
        let rows = rows(2);
        let chunks: Vec<Chunk> = chunk(&rows, 2, 0, "test").unwrap().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "month=2024-01; value=0\nmonth=2024-02; value=1");
    }

    #[test]
    fn rejects_invalid_parameters_before_any_work() {
        let rows = rows(3);
        assert!(matches!(
            chunk(&rows, 0, 0, "test"),
            Err(RagError::Configuration(_))
        ));
        assert!(matches!(
            chunk(&rows, 3, 3, "test"),
            Err(RagError::Configuration(_))
        ));
        assert!(matches!(
            chunk(&rows, 3, 4, "test"),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn empty_rows_yield_no_chunks() {
        let chunks: Vec<Chunk> = chunk(&[], 5, 1, "test").unwrap().collect();
        assert!(chunks.is_empty());
    }
}
