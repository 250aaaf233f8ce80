//! # Document loading and splitting
//!
//! Turns the source PDF into an ordered list of [`Segment`]s, the unit the
//! similarity index stores and the UI previews.
//!
//! - [`PdfLoader`] extracts one string per page with `pdf-extract`.
//! - Each page goes through [`split_text`], a recursive character splitter
//!   (paragraph, line, word, character) so that an unusually dense page does not
//!   become one giant retrieval candidate. Pages under the limit stay whole.
//! - Blank pages produce no segment.
//!
//! Loading is behind the [`DocumentLoader`] trait so the pipeline can be driven
//! by an in-memory loader in tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::QaError;

/// A contiguous unit of source text treated as one retrieval candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// The segment text.
    pub content: String,
    /// Position in load order, starting at 0.
    pub position: usize,
    /// 1-based page the text came from.
    pub page: usize,
    /// File the segment was read from.
    pub source: PathBuf,
}

/// Separators tried in order by [`split_text`]; the empty string means "per character".
const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Something that can produce the ordered segments of the source document.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<Segment>, QaError>;
}

/// Loads a PDF from disk and splits it page by page.
#[derive(Debug, Clone)]
pub struct PdfLoader {
    path: PathBuf,
    max_segment_chars: usize,
    segment_overlap: usize,
}

impl PdfLoader {
    pub fn new(path: impl Into<PathBuf>, max_segment_chars: usize, segment_overlap: usize) -> Self {
        Self {
            path: path.into(),
            max_segment_chars,
            segment_overlap,
        }
    }
}

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self) -> Result<Vec<Segment>, QaError> {
        let path = self.path.clone();
        info!("Loading PDF: {}", path.display());

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| QaError::DocumentLoad(format!("{}: {e}", path.display())))?;

        // pdf-extract is CPU bound and panics on some malformed inputs; a panic
        // surfaces here as a JoinError.
        let pages = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        })
        .await
        .map_err(|e| QaError::DocumentLoad(format!("PDF parser aborted: {e}")))?
        .map_err(|e| QaError::DocumentLoad(format!("{}: {e}", self.path.display())))?;

        debug!("Extracted {} pages", pages.len());

        let segments = segments_from_pages(
            &self.path,
            &pages,
            self.max_segment_chars,
            self.segment_overlap,
        );
        if segments.is_empty() {
            return Err(QaError::DocumentLoad(format!(
                "{} contains no extractable text",
                self.path.display()
            )));
        }

        info!(
            "Loaded {} segments from {} pages",
            segments.len(),
            pages.len()
        );
        Ok(segments)
    }
}

/// Split every page and number the resulting segments in order.
pub fn segments_from_pages<S: AsRef<str>>(
    source: &Path,
    pages: &[S],
    max_chars: usize,
    overlap: usize,
) -> Vec<Segment> {
    let mut segments = Vec::new();
    for (index, page) in pages.iter().enumerate() {
        for content in split_text(page.as_ref(), max_chars, overlap) {
            segments.push(Segment {
                content,
                position: segments.len(),
                page: index + 1,
                source: source.to_path_buf(),
            });
        }
    }
    segments
}

/// Recursively split `text` into pieces of at most `max_chars` characters.
///
/// Text that already fits is returned as a single trimmed piece. Longer text is
/// cut on the coarsest separator present, oversized pieces are split again with
/// the next separator, and neighbouring small pieces are merged back together
/// with up to `overlap` characters carried over between chunks.
pub fn split_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(trimmed) <= max_chars {
        return vec![trimmed.to_string()];
    }
    split_recursive(trimmed, SEPARATORS, max_chars, overlap)
}

fn split_recursive(text: &str, separators: &[&str], max_chars: usize, overlap: usize) -> Vec<String> {
    let mut separator = *separators.last().unwrap_or(&"");
    let mut remaining: &[&str] = &[];
    for (i, candidate) in separators.iter().enumerate() {
        if candidate.is_empty() {
            separator = *candidate;
            break;
        }
        if text.contains(*candidate) {
            separator = *candidate;
            remaining = &separators[i + 1..];
            break;
        }
    }

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<String> = Vec::new();
    for piece in pieces {
        if char_len(&piece) < max_chars {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            chunks.extend(merge_pieces(std::mem::take(&mut fitting), separator, max_chars, overlap));
        }
        if remaining.is_empty() {
            chunks.push(piece);
        } else {
            chunks.extend(split_recursive(&piece, remaining, max_chars, overlap));
        }
    }
    if !fitting.is_empty() {
        chunks.extend(merge_pieces(fitting, separator, max_chars, overlap));
    }
    chunks
}

/// Greedily pack pieces into chunks no longer than `max_chars`, keeping a tail
/// of at most `overlap` characters as the start of the next chunk.
fn merge_pieces(pieces: Vec<String>, separator: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut current: VecDeque<String> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(&piece);
        let joined_len = |current: &VecDeque<String>, total: usize| {
            total + len + if current.is_empty() { 0 } else { sep_len }
        };

        if joined_len(&current, total) > max_chars && !current.is_empty() {
            push_joined(&mut chunks, &current, separator);
            while total > overlap || (joined_len(&current, total) > max_chars && total > 0) {
                let Some(front) = current.pop_front() else {
                    break;
                };
                total -= char_len(&front) + if current.is_empty() { 0 } else { sep_len };
            }
        }

        total += len + if current.is_empty() { 0 } else { sep_len };
        current.push_back(piece);
    }
    push_joined(&mut chunks, &current, separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, current: &VecDeque<String>, separator: &str) {
    let joined = current.iter().map(String::as_str).collect::<Vec<_>>().join(separator);
    let joined = joined.trim();
    if !joined.is_empty() {
        chunks.push(joined.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_short_page_is_one_segment() {
        let pieces = split_text("  TIN format is C2584563200.  ", 4000, 200);
        assert_eq!(pieces, vec!["TIN format is C2584563200.".to_string()]);
    }

    #[test]
    fn test_blank_page_is_dropped() {
        assert!(split_text(" \n\n \t", 4000, 200).is_empty());
    }

    #[test]
    fn test_long_page_splits_on_paragraphs() {
        let para = "word ".repeat(30); // 150 chars
        let text = format!("{para}\n\n{para}\n\n{para}");
        let pieces = split_text(&text, 200, 20);
        assert_eq!(pieces.len(), 3);
        for piece in &pieces {
            assert!(piece.chars().count() <= 200);
        }
    }

    #[test]
    fn test_every_chunk_respects_limit() {
        let text = "abcdefghij ".repeat(100);
        let pieces = split_text(&text, 50, 10);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.chars().count() <= 50));
    }

    #[test]
    fn test_chunks_overlap() {
        let text = (0..40).map(|i| format!("w{i:02}")).collect::<Vec<_>>().join(" ");
        let pieces = split_text(&text, 40, 12);
        assert!(pieces.len() > 1);
        let first_tail = pieces[0].split(' ').last().unwrap();
        assert!(pieces[1].contains(first_tail));
    }

    #[test]
    fn test_unbroken_text_splits_per_character() {
        let text = "x".repeat(25);
        let pieces = split_text(&text, 10, 0);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_segments_are_numbered_across_pages() {
        let pages = ["first page", "", "third page"];
        let segments = segments_from_pages(Path::new("doc.pdf"), &pages, 4000, 200);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].position, 0);
        assert_eq!(segments[0].page, 1);
        assert_eq!(segments[1].position, 1);
        assert_eq!(segments[1].page, 3);
        assert_eq!(segments[1].source, PathBuf::from("doc.pdf"));
    }

    #[tokio::test]
    async fn test_missing_pdf_is_a_load_error() {
        let loader = PdfLoader::new("/definitely/not/here.pdf", 4000, 200);
        let result = loader.load().await;
        assert!(matches!(result, Err(QaError::DocumentLoad(_))));
    }

    #[tokio::test]
    async fn test_garbage_pdf_is_a_load_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not a pdf").unwrap();
        let loader = PdfLoader::new(file.path(), 4000, 200);
        let result = loader.load().await;
        assert!(matches!(result, Err(QaError::DocumentLoad(_))));
    }
}
