//! Recursive, separator-priority chunking with overlap.
//!
//! A segment is split on the coarsest separator it contains; pieces that are
//! still too long are split again with the finer separators, and short
//! pieces are merged back greedily up to `chunk_size` characters. The final
//! `""` separator splits into single characters, so every chunk respects the
//! size bound. Separators stay attached to the start of the piece that
//! follows them, which keeps "Action Name:" headers with their action.
use std::collections::VecDeque;

use crate::config::RetrievalConfig;
use crate::types::{Chunk, ChunkId, Document};

/// Coarsest first: section gap, paragraph, action header, line, sentence,
/// word, character.
pub const SEPARATORS: [&str; 7] = ["\n\n\n", "\n\n", "Action Name:", "\n", ". ", " ", ""];

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Chunk every document, numbering chunks densely in document order.
    pub fn split(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in documents {
            for text in self.split_text(&doc.raw_text) {
                chunks.push(Chunk {
                    chunk_id: chunks.len() as ChunkId,
                    text,
                    source_name: doc.source_name.clone(),
                    document_type: doc.document_type.clone(),
                });
            }
        }
        chunks
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);
        let mut out = Vec::new();
        let mut short: Vec<&str> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                out.extend(self.merge(&short));
                short.clear();
            }
            if finer.is_empty() {
                push_trimmed(&mut out, piece);
            } else {
                out.extend(self.split_recursive(piece, finer));
            }
        }
        if !short.is_empty() {
            out.extend(self.merge(&short));
        }
        out
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;
        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut out, &join(&window));
                // Keep a tail of at most `chunk_overlap` characters that still
                // leaves room for the incoming piece.
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }
        if !window.is_empty() {
            push_trimmed(&mut out, &join(&window));
        }
        out
    }
}

fn pick_separator<'s>(text: &str, separators: &'s [&'s str]) -> (&'s str, &'s [&'s str]) {
    for (i, &sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return (sep, &[]);
        }
        if text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    (separators.last().copied().unwrap_or(""), &[])
}

/// Split on `separator`, keeping it at the start of the following piece.
/// Empty pieces are dropped. An empty separator splits into characters.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn join(window: &VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(piece, _)| *piece).collect()
}

fn push_trimmed(out: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
