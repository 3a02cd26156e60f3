//! Content type sniffing for directory mode
//!
//! Binary formats are recognised by magic bytes; text is classified by its
//! extension once it is known not to be binary.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const SNIFF_LEN: u64 = 8192;

/// Types directory mode is willing to copy
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/x-php",
    "text/plain",
    "text/html",
    "text/css",
    "text/javascript",
    "text/xml",
    "application/json",
    "image/svg+xml",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/x-icon",
    "font/woff",
    "font/woff2",
];

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"\x7fELF", "application/x-executable"),
    (b"MZ", "application/x-dosexec"),
];

pub fn is_allowed(content_type: &str) -> bool {
    ALLOWED_CONTENT_TYPES.contains(&content_type)
}

/// Classify a file from its leading bytes and its name
pub fn detect(path: &Path, head: &[u8]) -> &'static str {
    if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp";
    }
    if let Some(&(_, content_type)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
        return content_type;
    }

    if !looks_like_text(head) {
        return "application/octet-stream";
    }

    if contains(head, b"<?php") {
        return "text/x-php";
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("php") => "text/x-php",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "text/xml",
        Some("svg") => "image/svg+xml",
        _ => "text/plain",
    }
}

/// Read the head of a file and classify it
pub fn sniff_file(path: &Path) -> io::Result<&'static str> {
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    File::open(path)?.take(SNIFF_LEN).read_to_end(&mut head)?;
    Ok(detect(path, &head))
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off by the sniff window is still text
        Err(e) => e.error_len().is_none(),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
