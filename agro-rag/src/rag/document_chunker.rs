//! Document chunking for retrieval.
//!
//! Pages are grouped per source file and each document is split on its own,
//! so a chunk never mixes text (or metadata) from two files. Splitting is a
//! fixed-size character window: every chunk after the first repeats the last
//! `chunk_overlap` characters of the previous one.

use crate::protocol::{Chunk, DocumentPage};

/// Separator placed between consecutive pages of the same document
pub const PAGE_SEPARATOR: &str = "\n";

/// Join the pages of each document, preserving first-appearance order of files.
///
/// Returns `(title, source_filename, text)` per document.
pub fn group_pages_by_document(pages: &[DocumentPage]) -> Vec<(String, String, String)> {
    let mut documents: Vec<(String, String, String)> = Vec::new();

    for page in pages {
        if page.text.trim().is_empty() {
            continue;
        }
        match documents
            .iter_mut()
            .find(|(_, filename, _)| *filename == page.source_filename)
        {
            Some((_, _, text)) => {
                text.push_str(PAGE_SEPARATOR);
                text.push_str(&page.text);
            }
            None => documents.push((
                page.title.clone(),
                page.source_filename.clone(),
                page.text.clone(),
            )),
        }
    }

    documents
}

/// Character ranges `[start, end)` of every window over a text of `len` characters.
///
/// Stride is `chunk_size - chunk_overlap`; the last window ends at `len`.
/// Callers must ensure `chunk_overlap < chunk_size`.
pub fn window_bounds(len: usize, chunk_size: usize, chunk_overlap: usize) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    if len == 0 || chunk_size == 0 {
        return bounds;
    }

    let stride = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(len);
        bounds.push((start, end));
        if end == len {
            break;
        }
        start += stride;
    }
    bounds
}

/// Split one document's text into overlapping windows
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    window_bounds(chars.len(), chunk_size, chunk_overlap)
        .into_iter()
        .map(|(start, end)| chars[start..end].iter().collect::<String>())
        .filter(|window| !window.trim().is_empty())
        .collect()
}

/// Chunk pages document by document. Each chunk inherits the title and file
/// name of the document it was cut from.
pub fn chunk_pages(pages: &[DocumentPage], chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (title, source_filename, text) in group_pages_by_document(pages) {
        let pieces = split_text(&text, chunk_size, chunk_overlap);
        tracing::debug!("{}: {} chunks", source_filename, pieces.len());
        chunks.extend(pieces.into_iter().enumerate().map(|(chunk_index, content)| Chunk {
            content,
            title: title.clone(),
            source_filename: source_filename.clone(),
            chunk_index,
        }));
    }

    chunks
}
