//! Identifier sanitization and quoting.
//!
//! Column names come from CSV headers written by other programs, so every
//! identifier that reaches a statement goes through [`sanitize_identifier`]
//! and then [`quote_ident`]. Values never do; they are always bound.

use crate::error::{DbError, Result};

/// Longest identifier accepted by both supported backends.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Normalize a raw header into a column name.
///
/// Surrounding whitespace is trimmed, then every whitespace character and
/// hyphen becomes `_`. Empty names, names containing NUL and names longer
/// than [`MAX_IDENTIFIER_LEN`] are rejected.
pub fn sanitize_identifier(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DbError::invalid_identifier("identifier is empty"));
    }
    if trimmed.contains('\0') {
        return Err(DbError::invalid_identifier(format!(
            "identifier contains NUL: {:?}",
            trimmed
        )));
    }

    let sanitized: String = trimmed
        .chars()
        .map(|ch| if ch.is_whitespace() || ch == '-' { '_' } else { ch })
        .collect();

    if sanitized.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(DbError::invalid_identifier(format!(
            "identifier longer than {} characters: {}",
            MAX_IDENTIFIER_LEN, sanitized
        )));
    }
    Ok(sanitized)
}

/// Wrap `name` in `quote`, doubling any embedded quote character.
pub fn quote_ident(name: &str, quote: char) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push(quote);
    for ch in name.chars() {
        if ch == quote {
            escaped.push(quote);
        }
        escaped.push(ch);
    }
    escaped.push(quote);
    escaped
}

/// Case-insensitive identifier comparison, matching how both backends
/// resolve column names.
pub fn same_identifier(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
