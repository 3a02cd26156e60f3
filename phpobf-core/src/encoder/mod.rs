//! PHP Encoder
//!
//! Turns a minified script into an equivalent file that only reveals its code
//! at runtime. The output is laid out as:
//!
//! ```text
//! #!interpreter            (only for console scripts)
//! <?php
//! header banner            (only when a directive applies)
//! alias prelude            (lookup keys, aliases, rotate helper)
//! $result=                 (capture of the outermost round)
//! payload                  (N nested eval/decompress/decode rounds, chunked)
//! if($result!==null)return $result;
//! ```
//!
//! With zero rounds only the tag, header and plain payload are written, so
//! a leading `declare` or `namespace` stays the first statement.
//!
//! Techniques used:
//! - Layered raw-deflate + base64 wrapping, one `eval` per round
//! - Alias indirection so `gzinflate`/`base64_decode` never appear literally
//! - A second lookup key recovered at runtime through a rotate helper
//! - Fixed-width line chunking of the wrapped payload

mod alias;
mod keys;

use std::io::Write;
use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Local};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use rand::Rng;
use regex::Regex;

use crate::header::render_header;
use crate::minifier::split_directive;

pub use alias::{
    alias_expression, alias_prelude, hex_literal, php_string_literal, rotate,
    rotate_helper_source, DECODE_BUILTIN, DECOMPRESS_BUILTIN, ROTATE_HELPER,
};
pub use keys::{shuffled_key, RunKeys, KEY_ALPHABET};

/// Opening code-block token
pub const OPEN_TAG: &str = "<?php";

/// Width of payload lines, in characters
pub const DEFAULT_CHUNK_WIDTH: usize = 40;

const ROUND_SUFFIX: &str = "')));";

/// Prefix of every round but the outermost, carrying the value of a
/// top-level `return` out of the nested evals
const PASS_THROUGH: &str = "return ";

/// Errors raised while encoding a script body
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Character {ch:?} of '{literal}' does not occur in the lookup key")]
    UnaliasableChar { ch: char, literal: String },

    #[error("Chunk width {width} is narrower than the {min}-character round wrapper")]
    ChunkWidth { width: usize, min: usize },
}

/// Encoder bound to one run's identifiers
#[derive(Debug, Clone)]
pub struct Encoder {
    keys: RunKeys,
    rounds: u32,
    chunk_width: usize,
}

impl Encoder {
    pub fn new(keys: RunKeys, rounds: u32) -> Self {
        Self {
            keys,
            rounds,
            chunk_width: DEFAULT_CHUNK_WIDTH,
        }
    }

    pub fn with_chunk_width(mut self, chunk_width: usize) -> Self {
        self.chunk_width = chunk_width;
        self
    }

    pub fn keys(&self) -> &RunKeys {
        &self.keys
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn chunk_width(&self) -> usize {
        self.chunk_width
    }

    /// Encode a minified script, optionally prefixed by a header template
    pub fn encode(&self, minified: &str, header: Option<&str>) -> Result<String, EncodeError> {
        self.encode_with(minified, header, &mut rand::thread_rng(), &Local::now())
    }

    /// Encode with an explicit RNG and clock
    pub fn encode_with<R: Rng + ?Sized>(
        &self,
        minified: &str,
        header: Option<&str>,
        rng: &mut R,
        now: &DateTime<Local>,
    ) -> Result<String, EncodeError> {
        if self.rounds > 0 {
            let min = round_prefix(&self.keys).chars().count();
            if self.chunk_width < min {
                return Err(EncodeError::ChunkWidth {
                    width: self.chunk_width,
                    min,
                });
            }
        }

        let (directive, body) = split_directive(minified);

        let mut payload = strip_opening(body);
        for round in 1..=self.rounds {
            let wrapped = wrap_round(&payload, &self.keys)?;
            payload = if round < self.rounds {
                format!("{}{}", PASS_THROUGH, wrapped)
            } else {
                wrapped
            };
        }

        let mut output = String::with_capacity(payload.len() * 2 + 512);
        if let Some(directive) = directive {
            output.push_str(directive);
            output.push('\n');
        }
        output.push_str(OPEN_TAG);
        output.push('\n');
        if let Some(template) = header {
            let banner = render_header(template, now);
            output.push_str(&banner);
            if !banner.is_empty() && !banner.ends_with('\n') {
                output.push('\n');
            }
        }

        // A round-0 payload is plain program text: nothing may precede it
        // and it must not be split
        if self.rounds == 0 {
            output.push_str(&payload);
            return Ok(output);
        }

        output.push_str(&alias_prelude(&self.keys, rng)?);
        output.push_str(&format!("${}=\n", self.keys.result));
        output.push_str(&reformat(&payload, self.chunk_width));
        output.push('\n');
        output.push_str(&result_return(&self.keys));

        Ok(output)
    }
}

fn leading_blank_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\A[ \t]*\r?\n").expect("blank line pattern"))
}

fn leading_open_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\A<\?php(?:\s+|\z)").expect("open tag pattern"))
}

/// Drop one leading blank line and the opening tag.
///
/// A body that starts outside code mode gets `?>` in front so evaluation
/// begins with its inline text.
pub fn strip_opening(body: &str) -> String {
    let body = leading_blank_line()
        .find(body)
        .map_or(body, |m| &body[m.end()..]);

    match leading_open_tag().find(body) {
        Some(m) => body[m.end()..].to_string(),
        None if body.is_empty() => String::new(),
        None => format!("?>{}", body),
    }
}

fn round_prefix(keys: &RunKeys) -> String {
    format!("eval(${}(${}('", keys.decompress, keys.decode)
}

/// Hands the outermost round's value back to an including script. A null
/// result falls through so a plain include still evaluates to 1.
fn result_return(keys: &RunKeys) -> String {
    format!("if(${r}!==null)return ${r};", r = keys.result)
}

/// One round: raw deflate, base64, and an eval through the run aliases
pub fn wrap_round(code: &str, keys: &RunKeys) -> Result<String, EncodeError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(code.as_bytes())?;
    let compressed = encoder.finish()?;

    Ok(format!(
        "{}{}{}",
        round_prefix(keys),
        BASE64.encode(compressed),
        ROUND_SUFFIX
    ))
}

/// Split text into pieces of `width` characters (the last may be shorter)
pub fn chunk(text: &str, width: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    if width == 0 {
        return vec![text];
    }

    let mut chunks = Vec::with_capacity(text.len() / width + 1);
    let mut start = 0;
    for (count, (offset, _)) in text.char_indices().enumerate() {
        if count > 0 && count % width == 0 {
            chunks.push(&text[start..offset]);
            start = offset;
        }
    }
    chunks.push(&text[start..]);
    chunks
}

/// Chunk and join with newlines
pub fn reformat(text: &str, width: usize) -> String {
    chunk(text, width).join("\n")
}
