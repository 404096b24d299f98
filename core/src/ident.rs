//! Identifier quoting and the constrained rewriter used when duplicating
//! CHECK constraint expressions onto shadow columns.

use crate::error::{EngineError, MAX_IDENTIFIER_LENGTH};

/// Wrap `name` in double quotes, escaping any embedded quote. This is the
/// only place identifiers should be interpolated into SQL templates from.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Wrap `value` in single quotes for use as a string literal, escaping any
/// embedded quote. Never use this for identifiers.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Validate an identifier against PostgreSQL's length limit. Generated names
/// (e.g. `_pgvista_new_<col>`) must be checked just like user-supplied ones.
pub fn validate_identifier(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidName(name.to_string(), "must not be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(EngineError::InvalidLength(name.to_string(), name.len()));
    }
    Ok(())
}

/// Rewrite whole-word occurrences of `from` to `to` inside a SQL expression,
/// skipping single-quoted string literals and dollar-quoted bodies.
///
/// This replaces the naive substring substitution that a CHECK constraint
/// rewrite would otherwise need: a column named `id` must not match inside
/// `payer_id`, and a column name that happens to appear inside a string
/// literal must be left alone. This is a small, purpose-built tokenizer, not
/// a full SQL parser — it knows about identifiers, string literals, and
/// dollar-quoting only, which is exactly what a CHECK expression can contain
/// that matters here.
pub fn rewrite_identifiers(expr: &str, renames: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(expr.len());
    let bytes = expr.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        // Skip over single-quoted string literals verbatim.
        if c == '\'' {
            let start = i;
            i += 1;
            while i < bytes.len() {
                if bytes[i] as char == '\'' {
                    // Doubled quote is an escaped quote within the literal.
                    if i + 1 < bytes.len() && bytes[i + 1] as char == '\'' {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                i += 1;
            }
            out.push_str(&expr[start..i]);
            continue;
        }

        // Skip over double-quoted identifiers verbatim; renames only apply
        // to bare identifiers, which is all the duplicator ever emits for
        // unqualified column references in user-supplied expressions.
        if c == '"' {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i] as char != '"' {
                i += 1;
            }
            i = (i + 1).min(bytes.len());
            out.push_str(&expr[start..i]);
            continue;
        }

        // Skip over dollar-quoted bodies: $tag$ ... $tag$.
        if c == '$' {
            if let Some(tag_end) = find_dollar_tag_end(bytes, i) {
                let tag = &expr[i..=tag_end];
                if let Some(close) = expr[tag_end + 1..].find(tag) {
                    let body_end = tag_end + 1 + close + tag.len();
                    out.push_str(&expr[i..body_end]);
                    i = body_end;
                    continue;
                }
            }
        }

        // A candidate identifier: starts with a letter or underscore.
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch.is_alphanumeric() || ch == '_' {
                    i += 1;
                } else {
                    break;
                }
            }
            let word = &expr[start..i];
            match renames.iter().find(|(from, _)| *from == word) {
                Some((_, to)) => out.push_str(to),
                None => out.push_str(word),
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Given `bytes[i] == b'$'`, find the index of the matching closing `$` of a
/// dollar-quote tag (`$tag$` or `$$`). Returns `None` if this isn't a valid
/// opening tag (e.g. a bare `$1` parameter placeholder).
fn find_dollar_tag_end(bytes: &[u8], i: usize) -> Option<usize> {
    let mut j = i + 1;
    while j < bytes.len() {
        let ch = bytes[j] as char;
        if ch == '$' {
            return Some(j);
        }
        if !(ch.is_alphanumeric() || ch == '_') {
            return None;
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn identifier_length_is_enforced() {
        let ok = "a".repeat(63);
        let too_long = "a".repeat(64);
        assert!(validate_identifier(&ok).is_ok());
        assert!(validate_identifier(&too_long).is_err());
    }

    #[test]
    fn rewrite_does_not_substring_match() {
        // "id" must not match inside "payer_id".
        let rewritten = rewrite_identifiers("payer_id > id", &[("id", "_pgvista_new_id")]);
        assert_eq!(rewritten, "payer_id > _pgvista_new_id");
    }

    #[test]
    fn rewrite_skips_string_literals() {
        let rewritten = rewrite_identifiers("status = 'id'", &[("id", "_pgvista_new_id")]);
        assert_eq!(rewritten, "status = 'id'");
    }

    #[test]
    fn rewrite_skips_quoted_identifiers() {
        let rewritten = rewrite_identifiers(r#""id" > 0"#, &[("id", "_pgvista_new_id")]);
        assert_eq!(rewritten, r#""id" > 0"#);
    }

    #[test]
    fn rewrite_handles_multiple_words() {
        let rewritten = rewrite_identifiers(
            "amount + tax > id * 2",
            &[("id", "_pgvista_new_id"), ("amount", "_pgvista_new_amount")],
        );
        assert_eq!(rewritten, "_pgvista_new_amount + tax > _pgvista_new_id * 2");
    }
}
