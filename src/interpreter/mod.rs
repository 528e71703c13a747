//! Workflow expression interpretation.
//!
//! Expressions are ordinary strings containing `$[ ... ]` markers. The
//! driver scans for markers, resolves each inner expression against the
//! parser instance's sources and functions, and splices the result back in.
//! A string that is exactly one marker returns the raw typed value instead
//! of a string.

pub mod arithmetic;
pub mod boolean;
pub mod functions;
pub mod navigator;
pub mod resolvers;
pub mod tokenizer;


use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use functions::FunctionRegistry;
use navigator::{apply_access_path, parse_literal, value_to_string};
use resolvers::ResolverRegistry;
use tokenizer::{
    find_matching_paren, is_identifier, parse_call_shape, quoted_content, split_arguments,
    split_ternary, unwrap_parens,
};

pub use functions::FunctionEvaluator;
pub use resolvers::{
    OutputsResolver, SecretProvider, SecretsResolver, SourceResolver, VariablesResolver,
};

/// Errors raised while evaluating an expression. All failures propagate to
/// the caller; nothing is retried or recovered inside the interpreter.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum ExpressionError {
    #[error("unbalanced brackets in expression '{expression}'")]
    UnbalancedDelimiters { expression: String },

    #[error("invalid conditional expression '{expression}'")]
    InvalidConditional { expression: String },

    #[error("invalid boolean expression '{expression}'")]
    InvalidBoolean { expression: String },

    #[error("unresolved reference '{expression}'")]
    UnresolvedReference { expression: String },

    #[error("{source_name} has no entry for key '{key}'")]
    UnknownKey { source_name: String, key: String },

    #[error("a resolver is already registered for prefix '{prefix}'")]
    DuplicateResolver { prefix: String },

    #[error("function '{function}': {message}")]
    Function { function: String, message: String },

    #[error("expression evaluation was cancelled")]
    Cancelled,
}

pub(crate) type EvalFuture<'a> =
    Pin<Box<dyn Future<Output = Result<JsonValue, ExpressionError>> + Send + 'a>>;

/// Operator tokens that route an inner expression to boolean evaluation.
const COMPARISON_TOKENS: [&str; 10] =
    ["==", "!=", ">=", "<=", ">", "<", "&&", "||", "?", ":"];

pub(crate) fn contains_comparison_token(text: &str) -> bool {
    COMPARISON_TOKENS.iter().any(|token| text.contains(token))
}

pub(crate) fn contains_arithmetic_operator(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '+' | '-' | '*' | '/' | '%'))
}

/// One evaluation context: a set of resolvers and functions closed over the
/// task outputs, variables, and secrets of a single workflow task.
///
/// Instances hold no other state and are discarded after use. Evaluation
/// takes `&self`; function registration takes `&mut self`, so the two
/// cannot overlap.
pub struct ExpressionParser {
    resolvers: ResolverRegistry,
    functions: FunctionRegistry,
}

impl std::fmt::Debug for ExpressionParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionParser").finish_non_exhaustive()
    }
}

impl ExpressionParser {
    /// Build a parser over the given task outputs and workflow variables,
    /// with the built-in prefixes and function set.
    pub fn new(
        outputs: HashMap<String, JsonValue>,
        variables: HashMap<String, JsonValue>,
    ) -> Self {
        let mut resolvers = ResolverRegistry::new();
        resolvers.insert("Outputs", Arc::new(OutputsResolver::new(outputs)));
        resolvers.insert("Variables", Arc::new(VariablesResolver::new(variables)));
        Self {
            resolvers,
            functions: FunctionRegistry::with_builtins(),
        }
    }

    pub fn builder() -> ExpressionParserBuilder {
        ExpressionParserBuilder::new()
    }

    /// Add or replace a custom function evaluator.
    pub fn register_function(&mut self, evaluator: Arc<dyn FunctionEvaluator>) {
        self.functions.register(evaluator);
    }

    /// Remove a function by name; `true` when something was removed.
    pub fn unregister_function(&mut self, name: &str) -> bool {
        self.functions.unregister(name)
    }

    /// Registered function names, sorted.
    pub fn function_names(&self) -> Vec<String> {
        self.functions.names()
    }

    /// Evaluate an expression string.
    ///
    /// Text outside `$[...]` markers passes through unchanged. When the
    /// whole trimmed expression is a single marker, the resolved value is
    /// returned with its type preserved; otherwise every marker is
    /// stringified and spliced back, and the final string is returned.
    /// Blank input resolves to `null`.
    pub async fn parse(
        &self,
        expression: &str,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, ExpressionError> {
        if expression.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        self.parse_markers(expression.to_string(), cancel).await
    }

    /// The marker-rewriting driver. Restarts its scan after every
    /// substitution so markers introduced by substitution text are also
    /// resolved.
    pub(crate) fn parse_markers<'a>(
        &'a self,
        expression: String,
        cancel: &'a CancellationToken,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            let mut current = expression;
            loop {
                if cancel.is_cancelled() {
                    return Err(ExpressionError::Cancelled);
                }
                let Some(start) = find_marker(&current) else {
                    break;
                };
                let end = find_marker_end(&current, start).ok_or_else(|| {
                    ExpressionError::UnbalancedDelimiters {
                        expression: current.clone(),
                    }
                })?;
                let whole = current.trim() == &current[start..=end];
                let inner = current[start + 2..end].to_string();
                trace!(marker = %inner, "resolving expression marker");
                let value = self.dispatch(inner, cancel).await?;
                if whole {
                    return Ok(value);
                }
                let rendered = value_to_string(&value);
                current.replace_range(start..=end, &rendered);
            }
            Ok(JsonValue::String(unescape_markers(&current)))
        })
    }

    /// Resolve every embedded `$[...]` marker in `text`, substituting each
    /// value back as a string. Unlike the driver, a marker spanning the
    /// whole text is still substituted, never returned raw.
    pub(crate) fn resolve_embedded_markers<'a>(
        &'a self,
        text: String,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExpressionError>> + Send + 'a>> {
        Box::pin(async move {
            let mut current = text;
            loop {
                if cancel.is_cancelled() {
                    return Err(ExpressionError::Cancelled);
                }
                let Some(start) = find_marker(&current) else {
                    return Ok(current);
                };
                let end = find_marker_end(&current, start).ok_or_else(|| {
                    ExpressionError::UnbalancedDelimiters {
                        expression: current.clone(),
                    }
                })?;
                let inner = current[start + 2..end].to_string();
                let value = self.dispatch(inner, cancel).await?;
                current.replace_range(start..=end, &value_to_string(&value));
            }
        })
    }

    /// Resolve the text between a marker's brackets.
    ///
    /// Resolution order is deliberate: ternary conditionals win over
    /// function calls, function calls over generic operator scanning,
    /// boolean over arithmetic, and plain reference/literal resolution is
    /// the fallback.
    fn dispatch<'a>(&'a self, inner: String, cancel: &'a CancellationToken) -> EvalFuture<'a> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(ExpressionError::Cancelled);
            }
            let text = inner.trim();

            if text.contains('?') && text.contains(':') {
                let mut candidate = text.to_string();
                loop {
                    if let Some((condition, when_true, when_false)) = split_ternary(&candidate)? {
                        return self
                            .evaluate_ternary(condition, when_true, when_false, cancel)
                            .await;
                    }
                    // a parenthesized ternary splits only after unwrapping
                    match unwrap_parens(&candidate) {
                        Some(inner) if inner.contains('?') && inner.contains(':') => {
                            candidate = inner.to_string();
                        }
                        _ => break,
                    }
                }
            }
            if let Some((name, args)) = parse_call_shape(text) {
                if self.functions.contains(name) {
                    let name = name.to_string();
                    let args = args.to_string();
                    return self.evaluate_function_call(&name, &args, cancel).await;
                }
            }
            if contains_comparison_token(text) {
                return self
                    .evaluate_boolean(text.to_string(), cancel)
                    .await
                    .map(JsonValue::Bool);
            }
            if contains_arithmetic_operator(text) {
                return self.evaluate_arithmetic(text.to_string(), cancel).await;
            }
            self.resolve_operand(text.to_string(), cancel).await
        })
    }

    /// Evaluate a registered function against a raw argument list.
    pub(crate) async fn evaluate_function_call(
        &self,
        name: &str,
        args_text: &str,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, ExpressionError> {
        let Some(evaluator) = self.functions.get(name).cloned() else {
            return Err(ExpressionError::UnresolvedReference {
                expression: format!("{}({})", name, args_text),
            });
        };
        let mut args = Vec::new();
        for raw in split_arguments(args_text) {
            if cancel.is_cancelled() {
                return Err(ExpressionError::Cancelled);
            }
            args.push(self.evaluate_argument(raw, cancel).await?);
        }
        debug!(function = name, argc = args.len(), "dispatching function call");
        evaluator.evaluate(&args)
    }

    /// Evaluate one function argument: literal text stays literal, anything
    /// expression-shaped goes back through the dispatcher.
    async fn evaluate_argument(
        &self,
        raw: String,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, ExpressionError> {
        let text = raw.trim();
        if quoted_content(text).is_some() || is_plain_literal(text) {
            return Ok(parse_literal(text));
        }
        self.dispatch(text.to_string(), cancel).await
    }

    /// Resolve a plain operand: a nested marker, a `Prefix(key)path`
    /// reference, an embedded function call, or a literal.
    pub(crate) fn resolve_operand<'a>(
        &'a self,
        text: String,
        cancel: &'a CancellationToken,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            let mut owned = text.trim().to_string();
            if owned.contains("$[") {
                owned = self.resolve_embedded_markers(owned, cancel).await?;
                owned = owned.trim().to_string();
            }
            let trimmed = owned.as_str();
            if let Some(open) = trimmed.find('(') {
                if is_identifier(&trimmed[..open]) {
                    let Some(close) = find_matching_paren(trimmed, open) else {
                        return Err(ExpressionError::UnbalancedDelimiters {
                            expression: trimmed.to_string(),
                        });
                    };
                    let prefix = &trimmed[..open];
                    let key_expr = &trimmed[open + 1..close];
                    let path = &trimmed[close + 1..];
                    if self.resolvers.contains(prefix) {
                        return self
                            .resolve_reference(
                                prefix.to_string(),
                                key_expr.to_string(),
                                path.to_string(),
                                cancel,
                            )
                            .await;
                    }
                    if self.functions.contains(prefix) && path.trim().is_empty() {
                        return self.evaluate_function_call(prefix, key_expr, cancel).await;
                    }
                    return Err(ExpressionError::UnresolvedReference {
                        expression: trimmed.to_string(),
                    });
                }
            }
            Ok(parse_literal(trimmed))
        })
    }

    /// Resolve a `Prefix(key)path` reference: the key expression is itself
    /// recursively resolved and stripped of quotes before the source
    /// resolver runs, then the access path is applied to the root value.
    pub(crate) fn resolve_reference<'a>(
        &'a self,
        prefix: String,
        key_expr: String,
        path: String,
        cancel: &'a CancellationToken,
    ) -> EvalFuture<'a> {
        Box::pin(async move {
            let Some(resolver) = self.resolvers.get(&prefix).cloned() else {
                return Err(ExpressionError::UnresolvedReference {
                    expression: format!("{}({})", prefix, key_expr),
                });
            };
            let key_value = self.resolve_operand(key_expr, cancel).await?;
            let key = strip_quotes(value_to_string(&key_value));
            debug!(prefix = %prefix, key = %key, "resolving source reference");
            let root = resolver.resolve(&key, cancel).await?;
            apply_access_path(root, &path)
        })
    }

    pub(crate) fn has_resolver(&self, prefix: &str) -> bool {
        self.resolvers.contains(prefix)
    }

    pub(crate) fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }
}

/// Builder for a parser instance with a secret provider, custom resolver
/// prefixes, or custom functions.
#[derive(Default)]
pub struct ExpressionParserBuilder {
    outputs: HashMap<String, JsonValue>,
    variables: HashMap<String, JsonValue>,
    secret_provider: Option<Arc<dyn SecretProvider>>,
    resolvers: Vec<(String, Arc<dyn SourceResolver>)>,
    functions: Vec<Arc<dyn FunctionEvaluator>>,
}

impl ExpressionParserBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outputs(mut self, outputs: HashMap<String, JsonValue>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn variables(mut self, variables: HashMap<String, JsonValue>) -> Self {
        self.variables = variables;
        self
    }

    /// Enable the `Secrets` prefix, backed by the given provider.
    pub fn secret_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.secret_provider = Some(provider);
        self
    }

    /// Register a custom source resolver under `prefix`.
    pub fn resolver(mut self, prefix: impl Into<String>, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolvers.push((prefix.into(), resolver));
        self
    }

    /// Register a custom function evaluator.
    pub fn function(mut self, evaluator: Arc<dyn FunctionEvaluator>) -> Self {
        self.functions.push(evaluator);
        self
    }

    /// Build the parser; fails when a resolver prefix collides with an
    /// existing one (case-insensitive).
    pub fn build(self) -> Result<ExpressionParser, ExpressionError> {
        let mut parser = ExpressionParser::new(self.outputs, self.variables);
        if let Some(provider) = self.secret_provider {
            parser
                .resolvers
                .register("Secrets", Arc::new(SecretsResolver::new(provider)))?;
        }
        for (prefix, resolver) in self.resolvers {
            parser.resolvers.register(&prefix, resolver)?;
        }
        for evaluator in self.functions {
            parser.functions.register(evaluator);
        }
        Ok(parser)
    }
}

/// Locate the next unescaped `$[` marker; `$$[` escapes one.
fn find_marker(text: &str) -> Option<usize> {
    let mut i = 0;
    while i < text.len() {
        let rest = &text[i..];
        if rest.starts_with("$$[") {
            i += 3;
        } else if rest.starts_with("$[") {
            return Some(i);
        } else {
            i += rest.chars().next()?.len_utf8();
        }
    }
    None
}

/// Find the `]` closing the marker that starts at `start`, tracking bracket
/// nesting depth.
fn find_marker_end(text: &str, start: usize) -> Option<usize> {
    let mut depth: i32 = 1;
    for (off, ch) in text[start + 2..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + 2 + off);
                }
            }
            _ => {}
        }
    }
    None
}

fn unescape_markers(text: &str) -> String {
    text.replace("$$[", "$[")
}

fn strip_quotes(text: String) -> String {
    let trimmed = text.trim();
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        let quoted = (bytes[0] == b'\'' && bytes[trimmed.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[trimmed.len() - 1] == b'"');
        if quoted {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

fn is_plain_literal(text: &str) -> bool {
    if text.eq_ignore_ascii_case("true")
        || text.eq_ignore_ascii_case("false")
        || text.eq_ignore_ascii_case("null")
    {
        return true;
    }
    text.chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '.')
        && text.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_marker_skips_escapes() {
        assert_eq!(find_marker("$[x]"), Some(0));
        assert_eq!(find_marker("ab $[x]"), Some(3));
        assert_eq!(find_marker("$$[x]"), None);
        assert_eq!(find_marker("$$[x] $[y]"), Some(6));
        assert_eq!(find_marker("no markers"), None);
    }

    #[test]
    fn test_find_marker_end_tracks_depth() {
        let text = "$[Outputs('t').items[0]]";
        assert_eq!(find_marker_end(text, 0), Some(text.len() - 1));
        assert_eq!(find_marker_end("$[open", 0), None);
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("'task1'".to_string()), "task1");
        assert_eq!(strip_quotes("\"x\"".to_string()), "x");
        assert_eq!(strip_quotes("bare".to_string()), "bare");
        assert_eq!(strip_quotes(" padded ".to_string()), "padded");
    }

    #[test]
    fn test_is_plain_literal() {
        assert!(is_plain_literal("5"));
        assert!(is_plain_literal("2.5"));
        assert!(is_plain_literal("TRUE"));
        assert!(is_plain_literal("null"));
        assert!(!is_plain_literal("-5"));
        assert!(!is_plain_literal("Outputs('t')"));
        assert!(!is_plain_literal("hello"));
    }
}
