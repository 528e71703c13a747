//! Arithmetic evaluation.
//!
//! The string is rewritten until only literals remain: embedded `$[...]`
//! markers first, then `Prefix(key)path` references, then recognized
//! function calls. The flattened infix text goes through a recursive
//! descent calculator over doubles; text the calculator rejects falls back
//! to literal resolution.

use tokio_util::sync::CancellationToken;

use super::navigator::{number_value, parse_literal, value_to_string};
use super::tokenizer::find_matching_paren;
use super::{EvalFuture, ExpressionError, ExpressionParser};

impl ExpressionParser {
    pub(crate) fn evaluate_arithmetic<'a>(
        &'a self,
        text: String,
        cancel: &'a CancellationToken,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            let resolved = self.resolve_embedded_markers(text, cancel).await?;
            let resolved = self.substitute_references(resolved, cancel).await?;
            let resolved = self.substitute_functions(resolved, cancel).await?;
            match infix::evaluate(&resolved) {
                Ok(result) => Ok(number_value(result)),
                Err(_) => Ok(parse_literal(&resolved)),
            }
        })
    }

    /// Replace every `Prefix(key)path` reference with its stringified value.
    async fn substitute_references(
        &self,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<String, ExpressionError> {
        let mut current = text;
        loop {
            if cancel.is_cancelled() {
                return Err(ExpressionError::Cancelled);
            }
            let Some(site) = next_call_site(&current, |name| self.has_resolver(name)) else {
                return Ok(current);
            };
            let path_end = access_path_end(&current, site.close + 1);
            let prefix = current[site.name_start..site.open].to_string();
            let key_expr = current[site.open + 1..site.close].to_string();
            let path = current[site.close + 1..path_end].to_string();
            let value = self
                .resolve_reference(prefix, key_expr, path, cancel)
                .await?;
            current.replace_range(site.name_start..path_end, &value_to_string(&value));
        }
    }

    /// Replace every registered `name(args)` call with its stringified
    /// result.
    async fn substitute_functions(
        &self,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<String, ExpressionError> {
        let mut current = text;
        loop {
            if cancel.is_cancelled() {
                return Err(ExpressionError::Cancelled);
            }
            let Some(site) = next_call_site(&current, |name| self.has_function(name)) else {
                return Ok(current);
            };
            let name = current[site.name_start..site.open].to_string();
            let args = current[site.open + 1..site.close].to_string();
            let value = self.evaluate_function_call(&name, &args, cancel).await?;
            current.replace_range(site.name_start..site.close + 1, &value_to_string(&value));
        }
    }
}

struct CallSite {
    name_start: usize,
    open: usize,
    close: usize,
}

/// Scan for the leftmost `identifier(` whose identifier satisfies
/// `is_known`, skipping quoted runs, and match its closing paren.
fn next_call_site(text: &str, mut is_known: impl FnMut(&str) -> bool) -> Option<CallSite> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    let mut escape = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if escape {
            escape = false;
            i += 1;
            continue;
        }
        match b {
            b'\\' if quote.is_some() => {
                escape = true;
                i += 1;
            }
            b'\'' | b'"' => {
                quote = match quote {
                    Some(q) if q == b => None,
                    None => Some(b),
                    q => q,
                };
                i += 1;
            }
            _ if quote.is_some() => i += 1,
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if i < bytes.len() && bytes[i] == b'(' && is_known(&text[start..i]) {
                    if let Some(close) = find_matching_paren(text, i) {
                        return Some(CallSite {
                            name_start: start,
                            open: i,
                            close,
                        });
                    }
                }
            }
            _ => i += 1,
        }
    }
    None
}

/// Extend past `close_paren` over a trailing access path: repeated
/// `.identifier` and `[digits]` steps.
fn access_path_end(text: &str, from: usize) -> usize {
    let bytes = text.as_bytes();
    let mut i = from;
    loop {
        if i < bytes.len() && bytes[i] == b'.' {
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            if j == i + 1 {
                break;
            }
            i = j;
        } else if i < bytes.len() && bytes[i] == b'[' {
            let Some(off) = text[i..].find(']') else { break };
            let inside = text[i + 1..i + off].trim();
            if inside.is_empty() || !inside.bytes().all(|b| b.is_ascii_digit()) {
                break;
            }
            i += off + 1;
        } else {
            break;
        }
    }
    i
}

mod infix {
    /// Evaluate a fully literal infix expression string.
    pub(super) fn evaluate(input: &str) -> Result<f64, String> {
        let mut parser = InfixParser::new(input);
        let value = parser.parse_expr()?;
        parser.expect_end()?;
        Ok(value)
    }

    /// Recursive descent parser: expr handles `+ -`, term handles `* / %`,
    /// unary handles sign prefixes.
    struct InfixParser<'a> {
        input: &'a str,
        pos: usize,
    }

    impl<'a> InfixParser<'a> {
        fn new(input: &'a str) -> Self {
            Self { input, pos: 0 }
        }

        fn skip_whitespace(&mut self) {
            while self.pos < self.input.len()
                && matches!(self.input.as_bytes()[self.pos], b' ' | b'\t')
            {
                self.pos += 1;
            }
        }

        fn peek(&mut self) -> Option<char> {
            self.skip_whitespace();
            self.input[self.pos..].chars().next()
        }

        fn advance(&mut self) -> Option<char> {
            self.skip_whitespace();
            let ch = self.input[self.pos..].chars().next()?;
            self.pos += ch.len_utf8();
            Some(ch)
        }

        fn expect_end(&mut self) -> Result<(), String> {
            self.skip_whitespace();
            if self.pos < self.input.len() {
                return Err(format!(
                    "unexpected trailing input in arithmetic expression: {:?}",
                    &self.input[self.pos..]
                ));
            }
            Ok(())
        }

        fn parse_expr(&mut self) -> Result<f64, String> {
            let mut left = self.parse_term()?;
            loop {
                match self.peek() {
                    Some('+') => {
                        self.advance();
                        left += self.parse_term()?;
                    }
                    Some('-') => {
                        self.advance();
                        left -= self.parse_term()?;
                    }
                    _ => break,
                }
            }
            Ok(left)
        }

        fn parse_term(&mut self) -> Result<f64, String> {
            let mut left = self.parse_unary()?;
            loop {
                match self.peek() {
                    Some('*') => {
                        self.advance();
                        left *= self.parse_unary()?;
                    }
                    Some('/') => {
                        self.advance();
                        left /= self.parse_unary()?;
                    }
                    Some('%') => {
                        self.advance();
                        left %= self.parse_unary()?;
                    }
                    _ => break,
                }
            }
            Ok(left)
        }

        fn parse_unary(&mut self) -> Result<f64, String> {
            match self.peek() {
                Some('+') => {
                    self.advance();
                    self.parse_unary()
                }
                Some('-') => {
                    self.advance();
                    Ok(-self.parse_unary()?)
                }
                _ => self.parse_primary(),
            }
        }

        fn parse_primary(&mut self) -> Result<f64, String> {
            match self.peek() {
                Some('(') => {
                    self.advance();
                    let value = self.parse_expr()?;
                    match self.peek() {
                        Some(')') => {
                            self.advance();
                            Ok(value)
                        }
                        _ => Err("expected ')' in arithmetic expression".to_string()),
                    }
                }
                Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
                Some(c) => Err(format!(
                    "unexpected character in arithmetic expression: {:?}",
                    c
                )),
                None => Err("unexpected end of arithmetic expression".to_string()),
            }
        }

        fn parse_number(&mut self) -> Result<f64, String> {
            self.skip_whitespace();
            let start = self.pos;
            let bytes = self.input.as_bytes();
            while self.pos < bytes.len()
                && (bytes[self.pos].is_ascii_digit() || bytes[self.pos] == b'.')
            {
                self.pos += 1;
            }
            // optional exponent
            if self.pos < bytes.len() && matches!(bytes[self.pos], b'e' | b'E') {
                let mut next = self.pos + 1;
                if next < bytes.len() && matches!(bytes[next], b'+' | b'-') {
                    next += 1;
                }
                if next < bytes.len() && bytes[next].is_ascii_digit() {
                    self.pos = next;
                    while self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
                        self.pos += 1;
                    }
                }
            }
            self.input[start..self.pos].parse().map_err(|_| {
                format!(
                    "invalid number in arithmetic expression: {:?}",
                    &self.input[start..self.pos]
                )
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::evaluate;

        fn eval(expr: &str) -> f64 {
            evaluate(expr).expect("expression should evaluate")
        }

        #[test]
        fn test_simple_numbers() {
            assert_eq!(eval("42"), 42.0);
            assert_eq!(eval("2.5"), 2.5);
            assert_eq!(eval(".5"), 0.5);
            assert_eq!(eval("1e3"), 1000.0);
        }

        #[test]
        fn test_addition_and_subtraction() {
            assert_eq!(eval("1 + 2"), 3.0);
            assert_eq!(eval("10 - 3 - 2"), 5.0);
        }

        #[test]
        fn test_precedence() {
            assert_eq!(eval("2 + 3 * 4"), 14.0);
            assert_eq!(eval("10 - 6 / 2"), 7.0);
        }

        #[test]
        fn test_parentheses() {
            assert_eq!(eval("(2 + 3) * 4"), 20.0);
            assert_eq!(eval("((1 + 2) * (3 + 4))"), 21.0);
        }

        #[test]
        fn test_modulo() {
            assert_eq!(eval("10 % 3"), 1.0);
            assert_eq!(eval("7.5 % 2"), 1.5);
        }

        #[test]
        fn test_unary_signs() {
            assert_eq!(eval("-5"), -5.0);
            assert_eq!(eval("10 + -3"), 7.0);
            assert_eq!(eval("--5"), 5.0);
            assert_eq!(eval("+5"), 5.0);
        }

        #[test]
        fn test_division_by_zero_follows_ieee() {
            assert_eq!(eval("1 / 0"), f64::INFINITY);
            assert!(eval("0 % 0").is_nan());
        }

        #[test]
        fn test_rejects_non_arithmetic() {
            assert!(evaluate("hello").is_err());
            assert!(evaluate("1 + ").is_err());
            assert!(evaluate("(1 + 2").is_err());
            assert!(evaluate("1 2").is_err());
            assert!(evaluate("'a' + 'b'").is_err());
        }
    }
}
