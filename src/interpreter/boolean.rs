//! Boolean and conditional evaluation.
//!
//! Embedded `$[...]` markers are resolved eagerly before any splitting, so
//! marker side effects always run; short-circuiting applies to the
//! `&&`/`||` parts of the already-rewritten string. Comparison operators
//! are found by a priority-ordered scan, not a precedence parser.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use super::navigator::{value_to_f64, value_to_string};
use super::tokenizer::{find_top_level, split_top_level, unwrap_parens};
use super::{contains_arithmetic_operator, EvalFuture, ExpressionError, ExpressionParser};

type BoolFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, ExpressionError>> + Send + 'a>>;

/// Comparison operators in scan priority order. Two-character operators
/// come first so `>=` is never torn into `>` and `=`.
const COMPARISON_OPS: [&str; 6] = [">=", "<=", "==", "!=", ">", "<"];

impl ExpressionParser {
    /// Evaluate a ternary conditional. Only the selected branch re-enters
    /// the driver.
    pub(crate) fn evaluate_ternary<'a>(
        &'a self,
        condition: String,
        when_true: String,
        when_false: String,
        cancel: &'a CancellationToken,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            let branch = if self.evaluate_boolean(condition, cancel).await? {
                when_true
            } else {
                when_false
            };
            self.parse_markers(format!("$[{}]", branch.trim()), cancel)
                .await
        })
    }

    pub(crate) fn evaluate_boolean<'a>(
        &'a self,
        text: String,
        cancel: &'a CancellationToken,
    ) -> BoolFuture<'a> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ExpressionError::Cancelled);
            }
            let resolved = self.resolve_embedded_markers(text, cancel).await?;
            let trimmed = resolved.trim();

            if let Some(rest) = trimmed.strip_prefix('!') {
                if !rest.starts_with('=') {
                    return Ok(!self.evaluate_boolean(rest.to_string(), cancel).await?);
                }
            }
            if let Some(inner) = unwrap_parens(trimmed) {
                return self.evaluate_boolean(inner.to_string(), cancel).await;
            }
            if let Some(parts) = split_top_level(trimmed, "||") {
                for part in parts {
                    if self.evaluate_boolean(part, cancel).await? {
                        return Ok(true);
                    }
                }
                return Ok(false);
            }
            if let Some(parts) = split_top_level(trimmed, "&&") {
                for part in parts {
                    if !self.evaluate_boolean(part, cancel).await? {
                        return Ok(false);
                    }
                }
                return Ok(true);
            }
            for op in COMPARISON_OPS {
                let Some(at) = find_top_level(trimmed, op) else {
                    continue;
                };
                let left = self
                    .resolve_comparison_side(trimmed[..at].to_string(), cancel)
                    .await?;
                let right = self
                    .resolve_comparison_side(trimmed[at + op.len()..].to_string(), cancel)
                    .await?;
                return Ok(compare(op, &left, &right));
            }

            let value = self
                .resolve_comparison_side(trimmed.to_string(), cancel)
                .await?;
            match value {
                JsonValue::Bool(result) => Ok(result),
                JsonValue::String(ref s) if s.eq_ignore_ascii_case("true") => Ok(true),
                JsonValue::String(ref s) if s.eq_ignore_ascii_case("false") => Ok(false),
                _ => Err(ExpressionError::InvalidBoolean {
                    expression: resolved.clone(),
                }),
            }
        })
    }

    /// Resolve one side of a comparison to a value.
    async fn resolve_comparison_side(
        &self,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, ExpressionError> {
        if contains_arithmetic_operator(&text) {
            self.evaluate_arithmetic(text, cancel).await
        } else {
            self.resolve_operand(text, cancel).await
        }
    }
}

/// `==`/`!=` compare stringified values case-insensitively; the ordering
/// operators compare numerically and are `false` when either side is not
/// a number.
fn compare(op: &str, left: &JsonValue, right: &JsonValue) -> bool {
    match op {
        "==" | "!=" => {
            let equal = value_to_string(left).eq_ignore_ascii_case(&value_to_string(right));
            if op == "==" {
                equal
            } else {
                !equal
            }
        }
        _ => match (value_to_f64(left), value_to_f64(right)) {
            (Some(l), Some(r)) => match op {
                ">=" => l >= r,
                "<=" => l <= r,
                ">" => l > r,
                "<" => l < r,
                _ => false,
            },
            _ => false,
        },
    }
}
