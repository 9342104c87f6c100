use crate::loader::SourceDocument;
use ragforge_core::{RagError, RagResult};
use std::collections::VecDeque;

/// Splits loaded documents into text chunks, in document order.
pub trait Splitter: Send + Sync {
    /// Every chunk of every document, first document first.
    fn split(&self, documents: &[SourceDocument]) -> Vec<String>;
}

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Recursive character splitter.
///
/// Tries paragraph breaks first, then line breaks, then spaces, then single
/// characters, so a chunk only breaks mid-word when a word alone exceeds the
/// chunk size. Consecutive chunks share up to `overlap` characters. Sizes are
/// counted in `char`s.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    overlap: usize,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl RecursiveSplitter {
    /// Fails with `Config` unless `0 < chunk_size` and `overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> RagResult<Self> {
        if chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be positive".into()));
        }
        if overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "overlap_size ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Splits a single text.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (position, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map(|(i, sep)| (i, *sep))
            .unwrap_or((separators.len().saturating_sub(1), ""));
        let remaining = &separators[(position + 1).min(separators.len())..];

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();
        for piece in pieces {
            if char_len(&piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                chunks.extend(self.merge(std::mem::take(&mut fitting), separator));
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, remaining));
            }
        }
        if !fitting.is_empty() {
            chunks.extend(self.merge(fitting, separator));
        }
        chunks
    }

    /// Greedily packs pieces into windows, carrying the tail as overlap.
    fn merge(&self, pieces: Vec<String>, separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<String> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(&piece);
            let joiner = |window: &VecDeque<String>| if window.is_empty() { 0 } else { sep_len };
            if total + len + joiner(&window) > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window, separator);
                while total > self.overlap
                    || (total > 0 && total + len + joiner(&window) > self.chunk_size)
                {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(&front) + joiner(&window);
                }
            }
            total += len + joiner(&window);
            window.push_back(piece);
        }
        push_joined(&mut chunks, &window, separator);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<String>, separator: &str) {
    let joined = window
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

impl Splitter for RecursiveSplitter {
    fn split(&self, documents: &[SourceDocument]) -> Vec<String> {
        documents
            .iter()
            .flat_map(|doc| self.split_text(&doc.content))
            .collect()
    }
}
