//! Alias indirection
//!
//! Builds the PHP prelude that binds the decoder built-ins to run-scoped
//! variables without their names ever appearing in the output. Each name is
//! spelled as a chain of single-character lookups (`$K[7].$K[0]...`) into a
//! per-file key string.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;

use super::keys::{shuffled_key, RunKeys};
use super::EncodeError;

/// Built-in used to decompress each round's payload
pub const DECOMPRESS_BUILTIN: &str = "gzinflate";

/// Built-in used to decode each round's payload
pub const DECODE_BUILTIN: &str = "base64_decode";

/// Name of the generated character-rotation helper
pub const ROTATE_HELPER: &str = "rotate_chars";

/// Express `literal` as concatenated lookups into `$var`, which holds `key`.
///
/// Every character must occur in `key`; a missing or non-ASCII character is
/// an error rather than a bad index.
pub fn alias_expression(key: &str, var: &str, literal: &str) -> Result<String, EncodeError> {
    if literal.is_empty() {
        return Ok("''".to_string());
    }

    let lookups = literal
        .chars()
        .map(|ch| {
            // PHP string offsets count bytes, and so does str::find
            key.find(ch)
                .filter(|_| ch.is_ascii())
                .map(|index| format!("${}[{}]", var, index))
                .ok_or_else(|| EncodeError::UnaliasableChar {
                    ch,
                    literal: literal.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(lookups.join("."))
}

/// Shift every byte by `amount`, wrapping like PHP's `chr()`
pub fn rotate(bytes: &[u8], amount: i8) -> Vec<u8> {
    bytes.iter().map(|b| b.wrapping_add_signed(amount)).collect()
}

/// Double-quoted literal made only of `\xNN` escapes
/// "get" -> "\x67\x65\x74"
pub fn hex_literal(bytes: &[u8]) -> String {
    let escaped: String = bytes.iter().map(|b| format!("\\x{:02x}", b)).collect();
    format!("\"{}\"", escaped)
}

/// Double-quoted literal keeping printable ASCII readable
pub fn php_string_literal(bytes: &[u8]) -> String {
    let mut literal = String::with_capacity(bytes.len() + 2);
    literal.push('"');
    for &b in bytes {
        match b {
            b'\\' | b'"' | b'$' => {
                literal.push('\\');
                literal.push(b as char);
            }
            0x20..=0x7e => literal.push(b as char),
            _ => literal.push_str(&format!("\\x{:02x}", b)),
        }
    }
    literal.push('"');
    literal
}

/// Source of the idempotent rotate helper definition
pub fn rotate_helper_source() -> String {
    format!(
        "if(!function_exists('{name}')){{function {name}($s,$n){{return $s===''?'':chr(ord($s[0])+$n).{name}(substr($s,1),$n);}}}}",
        name = ROTATE_HELPER
    )
}

/// Statements binding both lookup keys and all three aliases.
///
/// Order matters: the decode alias comes from the first key and is needed to
/// define the rotate helper, which in turn recovers the second key, which
/// spells the decompress alias.
pub fn alias_prelude<R: Rng + ?Sized>(keys: &RunKeys, rng: &mut R) -> Result<String, EncodeError> {
    let primary = shuffled_key(rng);
    let secondary = shuffled_key(rng);

    let statements = [
        format!("${}={};", keys.primary_key, hex_literal(primary.as_bytes())),
        format!(
            "${}={};",
            keys.decode,
            alias_expression(&primary, &keys.primary_key, DECODE_BUILTIN)?
        ),
        format!(
            "eval(${}('{}'));",
            keys.decode,
            BASE64.encode(rotate_helper_source())
        ),
        format!(
            "${}={};",
            keys.rotate,
            alias_expression(&primary, &keys.primary_key, ROTATE_HELPER)?
        ),
        format!(
            "${}=${}({},-1);",
            keys.secondary_key,
            keys.rotate,
            php_string_literal(&rotate(secondary.as_bytes(), 1))
        ),
        format!(
            "${}={};",
            keys.decompress,
            alias_expression(&secondary, &keys.secondary_key, DECOMPRESS_BUILTIN)?
        ),
    ];

    let mut prelude = statements.join("\n");
    prelude.push('\n');
    Ok(prelude)
}
