use pulldown_cmark::{Event, Parser, TagEnd};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Separators tried in order when a piece of text is still too long.
const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Unsupported file type: .{0} (supported: .txt, .md, .pdf)")]
    UnsupportedFileType(String),
    #[error("Could not parse {0}")]
    Parse(String),
    #[error("Document is empty or could not be parsed: {0}")]
    Empty(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed document content
pub struct ParsedDocument {
    pub content: String,
    pub file_type: String,
}

/// A piece of a document, ready to embed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    pub text: String,
    /// Character offset of the chunk within the parsed document.
    pub start_index: usize,
}

/// Map a file name onto one of the supported document types.
pub fn file_type_of(filename: &str) -> Result<&'static str, DocumentError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "txt" => Ok("txt"),
        "md" | "markdown" => Ok("md"),
        "pdf" => Ok("pdf"),
        _ => Err(DocumentError::UnsupportedFileType(ext)),
    }
}

/// Parse a document file into plain text
pub fn parse_file(path: &Path) -> Result<ParsedDocument, DocumentError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    file_type_of(filename)?;
    let bytes = fs::read(path)?;
    parse_bytes(filename, &bytes)
}

/// Parse uploaded bytes, choosing the format from the file name.
pub fn parse_bytes(filename: &str, bytes: &[u8]) -> Result<ParsedDocument, DocumentError> {
    let file_type = file_type_of(filename)?;

    let content = match file_type {
        "txt" => decode_text(bytes),
        "md" => markdown_to_text(&decode_text(bytes)),
        _ => pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            log::warn!("PDF parse error in {}: {}", filename, e);
            DocumentError::Parse(format!("{}: {}", filename, e))
        })?,
    };

    Ok(ParsedDocument {
        content,
        file_type: file_type.into(),
    })
}

/// UTF-8 first; anything else is read as Latin-1, which cannot fail.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn markdown_to_text(markdown: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::TableRow) => out.push_str("\n\n"),
            Event::End(TagEnd::Item) => out.push('\n'),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split text into overlapping chunks for embedding.
///
/// Pieces are cut at paragraph breaks first, then line breaks, then spaces,
/// then between characters, and merged back up to `chunk_size` characters.
/// Consecutive chunks share up to `overlap` characters.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let trimmed = text.trim();
    if trimmed.is_empty() || chunk_size == 0 {
        return vec![];
    }
    let overlap = overlap.min(chunk_size.saturating_sub(1));

    let pieces = if char_len(trimmed) <= chunk_size {
        vec![trimmed.to_string()]
    } else {
        split_recursive(trimmed, SEPARATORS, chunk_size, overlap)
    };

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut search_from = 0;
    for piece in pieces {
        let from = byte_offset(text, search_from);
        let byte_pos = text[from..]
            .find(piece.as_str())
            .map(|p| p + from)
            .or_else(|| text.find(piece.as_str()))
            .unwrap_or(from);
        let start_index = char_len(&text[..byte_pos]);
        // The next chunk cannot start before this one's end minus the overlap.
        search_from = (start_index + char_len(&piece)).saturating_sub(overlap);
        chunks.push(TextChunk {
            text: piece,
            start_index,
        });
    }
    chunks
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

fn split_recursive(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let remaining = separators.get(position + 1..).unwrap_or(&[]);

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();
    for split in splits {
        if char_len(split) < chunk_size {
            fitting.push(split);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge_splits(&fitting, separator, chunk_size, overlap));
            fitting.clear();
        }
        if remaining.is_empty() {
            out.push(split.trim().to_string());
        } else {
            out.extend(split_recursive(split, remaining, chunk_size, overlap));
        }
    }
    if !fitting.is_empty() {
        out.extend(merge_splits(&fitting, separator, chunk_size, overlap));
    }
    out.retain(|s| !s.is_empty());
    out
}

fn merge_splits(splits: &[&str], separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut merged = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0;

    for &split in splits {
        let len = char_len(split);
        let joint = |current: &VecDeque<&str>| if current.is_empty() { 0 } else { sep_len };
        if total + len + joint(&current) > chunk_size && !current.is_empty() {
            push_joined(&mut merged, &current, separator);
            // Drop from the front until what is left fits the overlap window.
            while total > overlap || (total > 0 && total + len + joint(&current) > chunk_size) {
                let Some(first) = current.pop_front() else {
                    break;
                };
                total -= char_len(first) + joint(&current);
            }
        }
        total += len + joint(&current);
        current.push_back(split);
    }
    push_joined(&mut merged, &current, separator);
    merged
}

fn push_joined(out: &mut Vec<String>, parts: &VecDeque<&str>, separator: &str) {
    let joined = parts
        .iter()
        .copied()
        .collect::<Vec<&str>>()
        .join(separator);
    let joined = joined.trim();
    if !joined.is_empty() {
        out.push(joined.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_short() {
        let chunks = chunk_text("Hello world", 100, 20);
        assert_eq!(
            chunks,
            vec![TextChunk {
                text: "Hello world".into(),
                start_index: 0
            }]
        );
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("   \n\n ", 100, 20).is_empty());
    }

    #[test]
    fn test_chunk_text_overlap() {
        let text = "a".repeat(100);
        let chunks = chunk_text(&text, 40, 10);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].text.len(), 40);
        assert_eq!(chunks[1].start_index, 30);
    }

    #[test]
    fn test_chunks_respect_size_limit() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(60);
        let chunks = chunk_text(&text, 120, 30);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 120));
    }

    #[test]
    fn test_paragraphs_are_kept_together() {
        let text = "First paragraph about rust.\n\nSecond paragraph about tokio.";
        let chunks = chunk_text(text, 35, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First paragraph about rust.");
        assert_eq!(chunks[1].text, "Second paragraph about tokio.");
        assert_eq!(chunks[1].start_index, 29);
    }

    #[test]
    fn test_words_overlap_between_chunks() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunk_text(text, 20, 10);
        assert_eq!(chunks[0].text, "one two three four");
        assert_eq!(chunks[1].text, "three four five six");
        assert_eq!(chunks[1].start_index, 8);
    }

    #[test]
    fn test_file_type_detection() {
        assert_eq!(file_type_of("notes.TXT").unwrap(), "txt");
        assert_eq!(file_type_of("readme.markdown").unwrap(), "md");
        assert_eq!(file_type_of("paper.pdf").unwrap(), "pdf");
        assert!(matches!(
            file_type_of("tool.exe"),
            Err(DocumentError::UnsupportedFileType(ext)) if ext == "exe"
        ));
        assert!(file_type_of("no_extension").is_err());
    }

    #[test]
    fn test_latin1_fallback() {
        let parsed = parse_bytes("legacy.txt", b"caf\xe9").unwrap();
        assert_eq!(parsed.content, "café");
        assert_eq!(parsed.file_type, "txt");
    }

    #[test]
    fn test_markdown_is_flattened() {
        let parsed = parse_bytes("doc.md", b"# Title\n\nSome *emphasis* and `code`.\n\n- item one\n- item two\n").unwrap();
        assert!(parsed.content.starts_with("Title"));
        assert!(parsed.content.contains("Some emphasis and code."));
        assert!(parsed.content.contains("item one"));
        assert!(!parsed.content.contains('#'));
        assert!(!parsed.content.contains('*'));
    }

    #[test]
    fn test_parse_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.txt");
        std::fs::write(&path, "Rust was first released in 2015.").unwrap();
        let parsed = parse_file(&path).unwrap();
        assert_eq!(parsed.content, "Rust was first released in 2015.");
    }
}
