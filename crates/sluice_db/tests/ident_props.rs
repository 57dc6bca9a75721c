use proptest::prelude::*;
use sluice_db::{quote_ident, sanitize_identifier, MAX_IDENTIFIER_LEN};

fn unquote(quoted: &str, quote: char) -> Option<String> {
    let inner = quoted.strip_prefix(quote)?.strip_suffix(quote)?;
    let mut out = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == quote {
            // Every embedded quote must be doubled.
            if chars.next() != Some(quote) {
                return None;
            }
        }
        out.push(ch);
    }
    Some(out)
}

proptest! {
    #[test]
    fn sanitized_names_have_no_whitespace_or_hyphens(raw in "[ -~\\t]{1,80}") {
        if let Ok(name) = sanitize_identifier(&raw) {
            prop_assert!(!name.is_empty());
            prop_assert!(!name.chars().any(|c| c.is_whitespace() || c == '-'));
            prop_assert!(name.chars().count() <= MAX_IDENTIFIER_LEN);
        }
    }

    #[test]
    fn sanitize_is_idempotent(raw in "[A-Za-z0-9 #._-]{1,40}") {
        if let Ok(once) = sanitize_identifier(&raw) {
            prop_assert_eq!(sanitize_identifier(&once).unwrap(), once);
        }
    }

    #[test]
    fn quoting_cannot_be_escaped(name in "\\PC{0,40}", use_backtick in any::<bool>()) {
        let quote = if use_backtick { '`' } else { '"' };
        let quoted = quote_ident(&name, quote);
        prop_assert_eq!(unquote(&quoted, quote), Some(name));
    }
}
