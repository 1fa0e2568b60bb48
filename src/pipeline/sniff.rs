//! `Materialized → Validated`: content-based mimetype gate.
//!
//! Only bytes are inspected, never the file name. Binary formats are
//! recognised by magic number through `infer`; anything it does not know is
//! classified with a small text heuristic that mirrors what libmagic reports
//! for the cases the pipelines care about:
//!
//! | Content | Mimetype |
//! |---------|----------|
//! | empty file | `inode/x-empty` |
//! | `<?xml …` (optionally after a BOM / whitespace) | `text/xml` |
//! | HTML document | `text/html` |
//! | other UTF-8 text | `text/plain` |
//! | anything else (DER envelopes included) | `application/octet-stream` |

use crate::error::IngestError;
use std::io::Read;
use std::path::Path;
use tracing::debug;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const TEXT_XML: &str = "text/xml";
pub const APPLICATION_XML: &str = "application/xml";
pub const TEXT_HTML: &str = "text/html";
pub const TEXT_PLAIN: &str = "text/plain";
pub const EMPTY: &str = "inode/x-empty";

/// Bytes read from the head of a file.
const SNIFF_LEN: u64 = 8192;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Classify the file at `path` by content.
pub fn classify(path: &Path) -> Result<&'static str, IngestError> {
    let file = std::fs::File::open(path).map_err(|e| IngestError::io(path, e))?;
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    file.take(SNIFF_LEN)
        .read_to_end(&mut head)
        .map_err(|e| IngestError::io(path, e))?;
    let mime = classify_bytes(&head);
    debug!(path = %path.display(), mime, "sniffed mimetype");
    Ok(mime)
}

/// Whether the sniffed type of `path` is one of `allowed`.
pub fn accepts(path: &Path, allowed: &[&str]) -> Result<bool, IngestError> {
    let mime = classify(path)?;
    Ok(allowed.contains(&mime))
}

/// Classify a buffer holding the head of a file.
pub fn classify_bytes(head: &[u8]) -> &'static str {
    if head.is_empty() {
        return EMPTY;
    }

    let text = head.strip_prefix(UTF8_BOM).unwrap_or(head);
    let text = trim_ascii_start(text);
    if text.starts_with(b"<?xml") {
        return TEXT_XML;
    }

    // infer labels every long-form DER SEQUENCE an X.509 certificate;
    // libmagic reports signed envelopes as plain binary.
    if is_der_sequence(head) {
        return OCTET_STREAM;
    }

    if let Some(kind) = infer::get(head) {
        return kind.mime_type();
    }

    if !is_text(head) {
        return OCTET_STREAM;
    }
    if looks_like_html(text) {
        TEXT_HTML
    } else {
        TEXT_PLAIN
    }
}

/// ASN.1 SEQUENCE tag followed by a long-form (1 to 4 byte) length.
fn is_der_sequence(head: &[u8]) -> bool {
    matches!(head, [0x30, 0x81..=0x84, ..])
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn looks_like_html(text: &[u8]) -> bool {
    let lead: Vec<u8> = text.iter().take(15).map(u8::to_ascii_lowercase).collect();
    lead.starts_with(b"<!doctype html") || lead.starts_with(b"<html")
}

/// UTF-8 without NULs or stray control characters. A multi-byte sequence
/// cut off at the end of the sniffed head still counts as text.
fn is_text(bytes: &[u8]) -> bool {
    let valid = match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid
        && !bytes
            .iter()
            .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
}
