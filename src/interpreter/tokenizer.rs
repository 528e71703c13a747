//! Quote- and depth-aware string scanning helpers.
//!
//! The expression language is interpreted by rewriting substrings in place,
//! so every splitting operation here has to respect nested parentheses,
//! brackets, and quoted runs instead of splitting on raw character matches.

use super::ExpressionError;

/// Split a comma-separated argument list into individual argument strings.
///
/// Commas inside nested parentheses/brackets or inside single/double quotes
/// do not split. Backslash escapes inside quoted runs are honored.
pub(crate) fn split_arguments(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escape = false;

    for ch in text.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }
        match ch {
            '\\' if quote.is_some() => {
                current.push(ch);
                escape = true;
            }
            '\'' | '"' => {
                match quote {
                    Some(q) if q == ch => quote = None,
                    None => quote = Some(ch),
                    _ => {}
                }
                current.push(ch);
            }
            '(' | '[' if quote.is_none() => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' if quote.is_none() => {
                depth -= 1;
                current.push(ch);
            }
            ',' if quote.is_none() && depth == 0 => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

/// Find the `)` matching the `(` at byte offset `open`, skipping quoted runs.
pub(crate) fn find_matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escape = false;

    for (off, ch) in text[open..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if quote.is_some() => escape = true,
            '\'' | '"' => match quote {
                Some(q) if q == ch => quote = None,
                None => quote = Some(ch),
                _ => {}
            },
            '(' if quote.is_none() => depth += 1,
            ')' if quote.is_none() => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + off);
                }
            }
            _ => {}
        }
    }
    None
}

/// True when `text` is a bare identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Recognize `name(args)` with nothing meaningful after the closing paren.
pub(crate) fn parse_call_shape(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    let open = text.find('(')?;
    let name = &text[..open];
    if !is_identifier(name) {
        return None;
    }
    let close = find_matching_paren(text, open)?;
    if !text[close + 1..].trim().is_empty() {
        return None;
    }
    Some((name, &text[open + 1..close]))
}

/// Return the content of `text` when it is a single quoted string literal.
///
/// The closing quote must be the one that opened the literal, so
/// `'a' + 'b'` is not treated as one string.
pub(crate) fn quoted_content(text: &str) -> Option<&str> {
    let text = text.trim();
    let mut chars = text.chars();
    let quote = match chars.next() {
        Some(q @ ('\'' | '"')) => q,
        _ => return None,
    };
    if text.len() < 2 || !text.ends_with(quote) {
        return None;
    }
    let inner = &text[1..text.len() - 1];
    let mut escape = false;
    for ch in inner.chars() {
        if escape {
            escape = false;
            continue;
        }
        if ch == '\\' {
            escape = true;
        } else if ch == quote {
            return None;
        }
    }
    Some(inner)
}

/// Strip one matched pair of parentheses wrapping the entire text.
pub(crate) fn unwrap_parens(text: &str) -> Option<&str> {
    let text = text.trim();
    if !text.starts_with('(') {
        return None;
    }
    let close = find_matching_paren(text, 0)?;
    if close != text.len() - 1 {
        return None;
    }
    Some(&text[1..close])
}

/// Byte offsets of every occurrence of `token` at paren/bracket depth zero
/// and outside quoted runs.
fn top_level_indices(text: &str, token: &str) -> Vec<usize> {
    let mut found = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escape = false;
    let mut i = 0;

    while i < text.len() {
        let Some(ch) = text[i..].chars().next() else {
            break;
        };
        if escape {
            escape = false;
            i += ch.len_utf8();
            continue;
        }
        match ch {
            '\\' if quote.is_some() => escape = true,
            '\'' | '"' => match quote {
                Some(q) if q == ch => quote = None,
                None => quote = Some(ch),
                _ => {}
            },
            '(' | '[' if quote.is_none() => depth += 1,
            ')' | ']' if quote.is_none() => depth -= 1,
            _ => {}
        }
        if quote.is_none() && depth == 0 && text[i..].starts_with(token) {
            found.push(i);
            i += token.len();
            continue;
        }
        i += ch.len_utf8();
    }
    found
}

/// First top-level occurrence of `token`, if any.
pub(crate) fn find_top_level(text: &str, token: &str) -> Option<usize> {
    top_level_indices(text, token).into_iter().next()
}

/// Split on every top-level occurrence of `op`; `None` when `op` never
/// appears at top level.
pub(crate) fn split_top_level(text: &str, op: &str) -> Option<Vec<String>> {
    let splits = top_level_indices(text, op);
    if splits.is_empty() {
        return None;
    }
    let mut parts = Vec::with_capacity(splits.len() + 1);
    let mut start = 0;
    for idx in splits {
        parts.push(text[start..idx].to_string());
        start = idx + op.len();
    }
    parts.push(text[start..].to_string());
    Some(parts)
}

/// Split a ternary `cond ? a : b` on its top-level `?` and matching `:`.
///
/// Returns `Ok(None)` when neither token appears at top level (the text is
/// not a ternary at all), and an error when a top-level `?`/`:` pair is
/// broken or out of order.
pub(crate) fn split_ternary(
    text: &str,
) -> Result<Option<(String, String, String)>, ExpressionError> {
    let mut depth: i32 = 0;
    let mut ternary_depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escape = false;
    let mut question: Option<usize> = None;
    let mut colon: Option<usize> = None;
    let mut i = 0;

    while i < text.len() {
        let Some(ch) = text[i..].chars().next() else {
            break;
        };
        if escape {
            escape = false;
            i += ch.len_utf8();
            continue;
        }
        match ch {
            '\\' if quote.is_some() => escape = true,
            '\'' | '"' => match quote {
                Some(q) if q == ch => quote = None,
                None => quote = Some(ch),
                _ => {}
            },
            '(' | '[' if quote.is_none() => depth += 1,
            ')' | ']' if quote.is_none() => depth -= 1,
            '?' if quote.is_none() && depth == 0 => {
                if question.is_none() {
                    question = Some(i);
                } else if colon.is_none() {
                    ternary_depth += 1;
                }
            }
            ':' if quote.is_none() && depth == 0 => {
                if question.is_none() {
                    return Err(ExpressionError::InvalidConditional {
                        expression: text.to_string(),
                    });
                }
                if colon.is_none() {
                    if ternary_depth == 0 {
                        colon = Some(i);
                    } else {
                        ternary_depth -= 1;
                    }
                }
            }
            _ => {}
        }
        i += ch.len_utf8();
    }

    match (question, colon) {
        (None, None) => Ok(None),
        (Some(q), Some(c)) => Ok(Some((
            text[..q].to_string(),
            text[q + 1..c].to_string(),
            text[c + 1..].to_string(),
        ))),
        _ => Err(ExpressionError::InvalidConditional {
            expression: text.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_arguments() {
        assert_eq!(split_arguments("1, 2, 3"), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_split_empty_arguments() {
        assert_eq!(split_arguments(""), Vec::<String>::new());
        assert_eq!(split_arguments("   "), Vec::<String>::new());
    }

    #[test]
    fn test_split_keeps_nested_calls_together() {
        assert_eq!(
            split_arguments("Min(1, 2), Outputs('a').items[0], 3"),
            vec!["Min(1, 2)", "Outputs('a').items[0]", "3"]
        );
    }

    #[test]
    fn test_split_ignores_commas_in_quotes() {
        assert_eq!(
            split_arguments("'a, b', \"c, d\""),
            vec!["'a, b'", "\"c, d\""]
        );
    }

    #[test]
    fn test_split_honors_escapes_in_quotes() {
        assert_eq!(split_arguments(r"'a\', b', c"), vec![r"'a\', b'", "c"]);
    }

    #[test]
    fn test_matching_paren() {
        assert_eq!(find_matching_paren("f(a(b), c)", 1), Some(9));
        assert_eq!(find_matching_paren("f(a", 1), None);
        // parens inside quotes are not counted
        assert_eq!(find_matching_paren("f('(((')", 1), Some(7));
    }

    #[test]
    fn test_call_shape() {
        assert_eq!(parse_call_shape("Min(1, 2)"), Some(("Min", "1, 2")));
        assert_eq!(parse_call_shape("Guid()"), Some(("Guid", "")));
        assert_eq!(parse_call_shape("Outputs('t').items"), None);
        assert_eq!(parse_call_shape("1 + Min(2, 3)"), None);
        assert_eq!(parse_call_shape("'not a call'"), None);
    }

    #[test]
    fn test_quoted_content() {
        assert_eq!(quoted_content("'hello'"), Some("hello"));
        assert_eq!(quoted_content("\"hi\""), Some("hi"));
        assert_eq!(quoted_content("''"), Some(""));
        assert_eq!(quoted_content("'a' + 'b'"), None);
        assert_eq!(quoted_content("plain"), None);
    }

    #[test]
    fn test_unwrap_parens() {
        assert_eq!(unwrap_parens("(a && b)"), Some("a && b"));
        assert_eq!(unwrap_parens("(a) && (b)"), None);
        assert_eq!(unwrap_parens("a && b"), None);
    }

    #[test]
    fn test_top_level_split_respects_depth() {
        assert_eq!(
            split_top_level("(a || b) && c", "&&"),
            Some(vec!["(a || b) ".to_string(), " c".to_string()])
        );
        assert_eq!(split_top_level("(a || b)", "||"), None);
        assert_eq!(split_top_level("'a || b'", "||"), None);
    }

    #[test]
    fn test_find_top_level_skips_quotes() {
        assert_eq!(find_top_level("'a > b' > 1", ">"), Some(8));
        assert_eq!(find_top_level("Contains('a>b', 'x')", ">"), None);
    }

    #[test]
    fn test_split_ternary() {
        let (c, t, f) = split_ternary("x > 1 ? 'a' : 'b'").unwrap().unwrap();
        assert_eq!(c.trim(), "x > 1");
        assert_eq!(t.trim(), "'a'");
        assert_eq!(f.trim(), "'b'");
    }

    #[test]
    fn test_split_ternary_nested() {
        let (c, t, f) = split_ternary("a ? b ? c : d : e").unwrap().unwrap();
        assert_eq!(c.trim(), "a");
        assert_eq!(t.trim(), "b ? c : d");
        assert_eq!(f.trim(), "e");
    }

    #[test]
    fn test_split_ternary_not_a_ternary() {
        assert_eq!(split_ternary("'12:30' == '12:30'").unwrap(), None);
        assert_eq!(split_ternary("plain").unwrap(), None);
    }

    #[test]
    fn test_split_ternary_mismatched_order() {
        assert!(split_ternary("a : b ? c").is_err());
        assert!(split_ternary("a ? b").is_err());
    }
}
