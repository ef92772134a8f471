//! PDF text extraction for the retrieval corpus.
//!
//! This module handles:
//! - Collecting text spans with font sizes from the first page (title inference)
//! - Per-page text extraction via pdf-extract, with a lopdf fallback
//! - PDF string decoding (UTF-8, UTF-16BE/LE, PDFDocEncoding)
//! - Memoizing extraction results in the persistent cache

use lopdf::{Document, Object};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use super::cache_manager::{should_reextract_file, CacheStore, ExtractionCacheEntry};
use crate::error::{RagError, Result};
use crate::protocol::DocumentPage;

/// A run of text drawn with one font size
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub font_size: f32,
    pub text: String,
}

/// Outcome of a cached extraction
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub pages: Vec<DocumentPage>,
    pub cache_hit: bool,
}

/// File name of `path`, used both as download key and title fallback
pub fn source_filename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Collapse runs of whitespace into single spaces
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_purely_numeric(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_numeric())
}

/// Pick a title from first-page spans.
///
/// Spans are grouped by rounded font size, ignoring spans of two characters
/// or fewer and purely numeric ones. The texts of the largest group are joined
/// in encounter order; the result is used only when it has more than two words.
pub fn infer_title(spans: &[TextSpan], fallback: &str) -> String {
    let mut groups: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
    for span in spans {
        let text = span.text.trim();
        if text.chars().count() > 2 && !is_purely_numeric(text) {
            groups
                .entry(span.font_size.round() as i64)
                .or_default()
                .push(text);
        }
    }

    if let Some((_, texts)) = groups.iter().next_back() {
        let candidate = collapse_whitespace(&texts.join(" "));
        if candidate.split_whitespace().count() > 2 {
            return candidate;
        }
    }

    fallback.to_string()
}

/// Decode PDF string bytes to a Rust String
/// PDF strings can be UTF-8, UTF-16BE (with BOM 0xFEFF), or PDFDocEncoding
pub fn decode_pdf_bytes_to_string(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    fn strip_controls(s: &str) -> String {
        s.chars().filter(|c| !c.is_control() || *c == ' ').collect()
    }

    fn decode_utf16(bytes: &[u8], big_endian: bool) -> Option<String> {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| {
                if big_endian {
                    u16::from_be_bytes([pair[0], pair[1]])
                } else {
                    u16::from_le_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16(&units).ok()
    }

    // UTF-16BE with BOM
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        return decode_utf16(&bytes[2..], true);
    }

    // UTF-16 without BOM: alternating null bytes around ASCII
    if bytes.len() >= 4 {
        let looks_le = bytes
            .chunks(2)
            .take(4)
            .all(|pair| pair.len() == 2 && pair[1] == 0 && pair[0] < 128);
        let looks_be = bytes
            .chunks(2)
            .take(4)
            .all(|pair| pair.len() == 2 && pair[0] == 0 && pair[1] < 128);
        if looks_le || looks_be {
            if let Some(s) = decode_utf16(bytes, looks_be) {
                let cleaned = strip_controls(&s);
                if !cleaned.is_empty() {
                    return Some(cleaned);
                }
            }
        }
    }

    if let Ok(s) = std::str::from_utf8(bytes) {
        let cleaned = strip_controls(s);
        if !cleaned.is_empty() {
            return Some(cleaned);
        }
    }

    // Latin-1 / PDFDocEncoding: each byte is a code point
    let s: String = bytes
        .iter()
        .map(|&b| b as char)
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn number_operand(operand: Option<&Object>) -> Option<f32> {
    match operand {
        Some(Object::Real(value)) => Some(*value as f32),
        Some(Object::Integer(value)) => Some(*value as f32),
        _ => None,
    }
}

/// Vertical scale of a `Tm` text matrix `[a b c d e f]`.
fn text_matrix_scale(operands: &[Object]) -> Option<f32> {
    let b = number_operand(operands.get(1))?;
    let d = number_operand(operands.get(3))?;
    let scale = (b * b + d * d).sqrt();
    (scale.is_finite() && scale > 0.0).then_some(scale)
}

fn push_span(spans: &mut Vec<TextSpan>, font_size: f32, text: &mut String) {
    if !text.trim().is_empty() {
        spans.push(TextSpan {
            font_size,
            text: text.trim().to_string(),
        });
    }
    text.clear();
}

/// Collect text spans with their font sizes from one page's content stream.
///
/// The recorded size is the `Tf` size scaled by the current text matrix, so
/// producers that draw with `1 Tf` and size text through `Tm` still group
/// correctly. A span ends at every font change, line move, or end of text
/// object.
pub fn collect_page_spans(doc: &Document, page_number: u32) -> Vec<TextSpan> {
    let mut spans = Vec::new();
    let Some(page_id) = doc.get_pages().get(&page_number).copied() else {
        return spans;
    };
    let Ok(content) = doc.get_page_content(page_id) else {
        return spans;
    };
    let operations = lopdf::content::Content::decode(&content)
        .map(|c| c.operations)
        .unwrap_or_default();

    let mut current_font_size: f32 = 12.0;
    let mut matrix_scale: f32 = 1.0;
    let mut current_text = String::new();

    for op in operations {
        let effective_size = current_font_size * matrix_scale;
        match op.operator.as_str() {
            "Tf" => {
                push_span(&mut spans, effective_size, &mut current_text);
                if let Some(size) = number_operand(op.operands.get(1)) {
                    current_font_size = size.abs();
                }
            }
            "Tm" => {
                push_span(&mut spans, effective_size, &mut current_text);
                matrix_scale = text_matrix_scale(&op.operands).unwrap_or(1.0);
            }
            "BT" => {
                push_span(&mut spans, effective_size, &mut current_text);
                matrix_scale = 1.0;
            }
            "Tj" | "'" | "\"" => {
                if op.operator != "Tj" {
                    push_span(&mut spans, effective_size, &mut current_text);
                }
                if let Some(Object::String(bytes, _)) = op.operands.last() {
                    if let Some(text) = decode_pdf_bytes_to_string(bytes) {
                        current_text.push_str(&text);
                    }
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    for item in items {
                        if let Object::String(bytes, _) = item {
                            if let Some(text) = decode_pdf_bytes_to_string(bytes) {
                                current_text.push_str(&text);
                            }
                        }
                    }
                }
            }
            "Td" | "TD" | "T*" | "ET" => {
                push_span(&mut spans, effective_size, &mut current_text);
            }
            _ => {}
        }
    }

    push_span(&mut spans, current_font_size * matrix_scale, &mut current_text);
    spans
}

/// Fallback text extraction using lopdf when pdf-extract fails.
/// Less accurate for complex fonts but more tolerant of malformed PDFs.
pub fn extract_page_texts_via_lopdf(doc: &Document) -> Vec<String> {
    doc.get_pages()
        .keys()
        .map(|&page_number| {
            let mut page_text = String::new();
            for span in collect_page_spans(doc, page_number) {
                if !page_text.is_empty() {
                    page_text.push('\n');
                }
                page_text.push_str(&span.text);
            }
            page_text
        })
        .collect()
}

/// Per-page text, preferring pdf-extract and falling back to lopdf when it
/// errors, panics, or produces nothing but blank pages.
pub fn extract_page_texts(path: &Path, doc: &Document) -> Vec<String> {
    extract_page_texts_with(path, doc, |p| pdf_extract::extract_text_by_pages(p))
}

fn extract_page_texts_with<F, E>(path: &Path, doc: &Document, primary: F) -> Vec<String>
where
    F: FnOnce(&Path) -> std::result::Result<Vec<String>, E>,
    E: std::fmt::Display,
{
    let primary = catch_unwind(AssertUnwindSafe(|| primary(path)));

    match primary {
        Ok(Ok(pages)) if pages.iter().any(|p| !p.trim().is_empty()) => pages,
        Ok(Ok(_)) => {
            tracing::debug!("pdf-extract found no text in {:?}, trying lopdf", path);
            extract_page_texts_via_lopdf(doc)
        }
        Ok(Err(e)) => {
            tracing::debug!("pdf-extract failed for {:?} ({}), trying lopdf", path, e);
            extract_page_texts_via_lopdf(doc)
        }
        Err(_) => {
            tracing::debug!("pdf-extract panicked for {:?}, trying lopdf", path);
            extract_page_texts_via_lopdf(doc)
        }
    }
}

fn try_extract_document_pages(path: &Path) -> Result<Vec<DocumentPage>> {
    let filename = source_filename(path);
    let doc = Document::load(path).map_err(RagError::pdf)?;

    let first_page = doc
        .get_pages()
        .keys()
        .next()
        .copied()
        .ok_or_else(|| RagError::Pdf("document has no pages".to_string()))?;
    let title = infer_title(&collect_page_spans(&doc, first_page), &filename);

    let pages = extract_page_texts(path, &doc)
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| DocumentPage {
            source_filename: filename.clone(),
            title: title.clone(),
            page_number: i as u32 + 1,
            text,
        })
        .collect();

    Ok(pages)
}

/// Extract the pages of one PDF. Never fails: unreadable files yield no pages.
pub fn extract_document_pages(path: &Path) -> Vec<DocumentPage> {
    match catch_unwind(AssertUnwindSafe(|| try_extract_document_pages(path))) {
        Ok(Ok(pages)) => pages,
        Ok(Err(e)) => {
            tracing::warn!("Failed to read {}: {}", source_filename(path), e);
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("PDF parser panicked on {}", source_filename(path));
            Vec::new()
        }
    }
}

/// Extract pages through the cache. A cache hit skips PDF parsing entirely;
/// empty results are never cached so the file is retried on the next build.
pub async fn extract_document_pages_cached(
    path: &Path,
    cache: &CacheStore,
    verify_checksums: bool,
) -> ExtractionOutcome {
    let filename = source_filename(path);
    let cached = cache.load_extraction(&filename).await;

    let current_crc = if verify_checksums {
        tokio::fs::read(path).await.ok().map(|bytes| crc32fast::hash(&bytes))
    } else {
        None
    };

    if let Some(entry) = cached.as_ref() {
        if !should_reextract_file(current_crc, Some(entry), verify_checksums) {
            tracing::debug!("Extraction cache hit for {}", filename);
            return ExtractionOutcome {
                pages: entry.pages.clone(),
                cache_hit: true,
            };
        }
        tracing::info!("{} changed since it was cached, re-extracting", filename);
    }

    let owned_path = path.to_path_buf();
    let pages = match tokio::task::spawn_blocking(move || extract_document_pages(&owned_path)).await {
        Ok(pages) => pages,
        Err(e) => {
            tracing::warn!("Extraction task for {} failed: {}", filename, e);
            Vec::new()
        }
    };

    if !pages.is_empty() && cache.is_enabled() {
        let crc32 = match current_crc {
            Some(crc) => crc,
            None => tokio::fs::read(path)
                .await
                .map(|bytes| crc32fast::hash(&bytes))
                .unwrap_or_default(),
        };
        let entry = ExtractionCacheEntry {
            file_name: filename.clone(),
            crc32,
            pages: pages.clone(),
            extracted_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = cache.save_extraction(&entry).await {
            tracing::warn!("Failed to cache extraction of {}: {}", filename, e);
        }
    }

    ExtractionOutcome {
        pages,
        cache_hit: false,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{write_pdf, write_pdf_matrix_sized};
    use super::*;
    use tempfile::tempdir;

    fn span(size: f32, text: &str) -> TextSpan {
        TextSpan {
            font_size: size,
            text: text.to_string(),
        }
    }

    #[test]
    fn title_comes_from_largest_font_group() {
        let spans = vec![
            span(12.0, "Abstract text of the paper"),
            span(24.0, "Rice Blast"),
            span(23.6, "Disease   Management"),
            span(10.0, "Journal of Agronomy"),
        ];
        assert_eq!(
            infer_title(&spans, "paper.pdf"),
            "Rice Blast Disease Management"
        );
    }

    #[test]
    fn short_and_numeric_spans_are_ignored() {
        let spans = vec![
            span(30.0, "12"),
            span(30.0, "2024"),
            span(28.0, "ab"),
            span(18.0, "Pengendalian Hama Wereng Coklat"),
        ];
        assert_eq!(
            infer_title(&spans, "wereng.pdf"),
            "Pengendalian Hama Wereng Coklat"
        );
    }

    #[test]
    fn two_word_title_falls_back_to_filename() {
        let spans = vec![span(20.0, "Jagung Hibrida"), span(11.0, "body text here")];
        assert_eq!(infer_title(&spans, "jagung.pdf"), "jagung.pdf");
    }

    #[test]
    fn no_spans_falls_back_to_filename() {
        assert_eq!(infer_title(&[], "kosong.pdf"), "kosong.pdf");
    }

    #[test]
    fn decode_handles_utf16be_bom() {
        let bytes = [0xFE, 0xFF, 0x00, b'P', 0x00, b'a', 0x00, b'd', 0x00, b'i'];
        assert_eq!(decode_pdf_bytes_to_string(&bytes).as_deref(), Some("Padi"));
    }

    #[test]
    fn decode_falls_back_to_latin1() {
        let bytes = [b'c', 0xE9, b'r', b'e'];
        assert_eq!(decode_pdf_bytes_to_string(&bytes).as_deref(), Some("cére"));
    }

    #[test]
    fn collapse_whitespace_normalizes_runs() {
        assert_eq!(collapse_whitespace("  a \n b\t\tc "), "a b c");
    }

    #[test]
    fn extracts_title_and_pages_from_generated_pdf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blast.pdf");
        write_pdf(
            &path,
            &[
                vec![
                    (24, "Rice Blast Disease Management"),
                    (12, "Blast is caused by the fungus Magnaporthe oryzae."),
                ],
                vec![(12, "Fungicide application should follow field scouting.")],
            ],
        );

        let pages = extract_document_pages(&path);
        assert_eq!(pages.len(), 2);
        assert!(pages
            .iter()
            .all(|p| p.title == "Rice Blast Disease Management" && p.source_filename == "blast.pdf"));
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 2);
        assert!(pages[1].text.contains("scouting"));
    }

    #[test]
    fn first_page_spans_keep_font_sizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spans.pdf");
        write_pdf(&path, &[vec![(24, "Big Title Words"), (12, "small body")]]);

        let doc = Document::load(&path).unwrap();
        let spans = collect_page_spans(&doc, 1);
        assert_eq!(spans, vec![span(24.0, "Big Title Words"), span(12.0, "small body")]);
    }

    #[test]
    fn text_matrix_scale_sets_span_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scaled.pdf");
        write_pdf_matrix_sized(
            &path,
            &[vec![
                (24, "Rice Blast Disease Management"),
                (12, "Blast is caused by the fungus Magnaporthe oryzae."),
            ]],
        );

        let doc = Document::load(&path).unwrap();
        let spans = collect_page_spans(&doc, 1);
        assert_eq!(
            spans,
            vec![
                span(24.0, "Rice Blast Disease Management"),
                span(12.0, "Blast is caused by the fungus Magnaporthe oryzae."),
            ]
        );
        assert_eq!(
            infer_title(&spans, "scaled.pdf"),
            "Rice Blast Disease Management"
        );
    }

    #[test]
    fn panicking_text_extractor_falls_back_to_lopdf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panics.pdf");
        write_pdf(&path, &[vec![(18, "Hama Tikus Sawah Padi"), (11, "Gejala serangan tikus.")]]);

        let doc = Document::load(&path).unwrap();
        let texts = extract_page_texts_with(&path, &doc, |_| -> std::result::Result<Vec<String>, String> {
            panic!("font table out of range")
        });
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("Gejala serangan tikus."));
    }

    #[test]
    fn malformed_pdf_yields_no_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4 this is not really a pdf").unwrap();
        assert!(extract_document_pages(&path).is_empty());
    }

    #[test]
    fn missing_file_yields_no_pages() {
        assert!(extract_document_pages(Path::new("/nonexistent/nowhere.pdf")).is_empty());
    }

    #[tokio::test]
    async fn cached_extraction_short_circuits_parsing() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path().join("cache"));
        let path = dir.path().join("padi.pdf");
        write_pdf(&path, &[vec![(20, "Budidaya Padi Sawah Organik"), (11, "Isi halaman.")]]);

        let first = extract_document_pages_cached(&path, &cache, false).await;
        assert!(!first.cache_hit);
        assert!(!first.pages.is_empty());

        // Replace the file with garbage: a hit must not touch the file.
        std::fs::write(&path, b"not a pdf").unwrap();
        let second = extract_document_pages_cached(&path, &cache, false).await;
        assert!(second.cache_hit);
        assert_eq!(second.pages, first.pages);

        // With checksum verification the stale entry is rejected.
        let third = extract_document_pages_cached(&path, &cache, true).await;
        assert!(!third.cache_hit);
        assert!(third.pages.is_empty());
    }

    #[tokio::test]
    async fn failed_extraction_is_not_cached() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path().join("cache"));
        let path = dir.path().join("rusak.pdf");
        std::fs::write(&path, b"garbage").unwrap();

        let outcome = extract_document_pages_cached(&path, &cache, false).await;
        assert!(outcome.pages.is_empty());
        assert!(cache.load_extraction("rusak.pdf").await.is_none());
    }
}
