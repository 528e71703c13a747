//! Function evaluators and the registry that dispatches them.
//!
//! Built-ins cover the numeric aggregates, string helpers, and the
//! id/timestamp generators workflow authors lean on. Custom evaluators are
//! registered under a case-insensitive name and replace any existing
//! binding.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Local, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::navigator::{number_value, value_to_f64, value_to_string};
use super::ExpressionError;

/// A named capability taking already-evaluated arguments and producing a
/// value.
pub trait FunctionEvaluator: Send + Sync {
    /// Registry name, matched case-insensitively.
    fn name(&self) -> &str;

    fn evaluate(&self, args: &[JsonValue]) -> Result<JsonValue, ExpressionError>;
}

/// Case-insensitive name -> evaluator map.
pub(crate) struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn FunctionEvaluator>>,
}

impl FunctionRegistry {
    pub(crate) fn with_builtins() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        for builtin in Builtin::ALL {
            registry.register(Arc::new(builtin));
        }
        registry
    }

    /// Add or replace an evaluator under its (lowercased) name.
    pub(crate) fn register(&mut self, evaluator: Arc<dyn FunctionEvaluator>) {
        self.functions
            .insert(evaluator.name().to_ascii_lowercase(), evaluator);
    }

    pub(crate) fn unregister(&mut self, name: &str) -> bool {
        self.functions.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Arc<dyn FunctionEvaluator>> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .values()
            .map(|evaluator| evaluator.name().to_string())
            .collect();
        names.sort();
        names
    }
}

/* ===================== Built-in Functions ===================== */

/// Built-in function set, dispatched by variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Builtin {
    Min,
    Max,
    Sum,
    Avg,
    Count,
    Contains,
    Length,
    Guid,
    Now,
    NowUtc,
    IsNull,
    Concat,
    If,
}

impl Builtin {
    pub(crate) const ALL: [Builtin; 13] = [
        Builtin::Min,
        Builtin::Max,
        Builtin::Sum,
        Builtin::Avg,
        Builtin::Count,
        Builtin::Contains,
        Builtin::Length,
        Builtin::Guid,
        Builtin::Now,
        Builtin::NowUtc,
        Builtin::IsNull,
        Builtin::Concat,
        Builtin::If,
    ];
}

impl FunctionEvaluator for Builtin {
    fn name(&self) -> &str {
        match self {
            Builtin::Min => "Min",
            Builtin::Max => "Max",
            Builtin::Sum => "Sum",
            Builtin::Avg => "Avg",
            Builtin::Count => "Count",
            Builtin::Contains => "Contains",
            Builtin::Length => "Length",
            Builtin::Guid => "Guid",
            Builtin::Now => "Now",
            Builtin::NowUtc => "NowUtc",
            Builtin::IsNull => "IsNull",
            Builtin::Concat => "Concat",
            Builtin::If => "If",
        }
    }

    fn evaluate(&self, args: &[JsonValue]) -> Result<JsonValue, ExpressionError> {
        match self {
            Builtin::Min => fold_numeric(self.name(), args, f64::min),
            Builtin::Max => fold_numeric(self.name(), args, f64::max),
            Builtin::Sum => {
                let values = numeric_args(self.name(), args)?;
                Ok(number_value(values.iter().sum()))
            }
            Builtin::Avg => {
                let values = numeric_args(self.name(), args)?;
                if values.is_empty() {
                    return Err(function_error(self.name(), "requires at least one argument"));
                }
                Ok(number_value(values.iter().sum::<f64>() / values.len() as f64))
            }
            Builtin::Count => {
                let values = numeric_args(self.name(), args)?;
                Ok(number_value(values.len() as f64))
            }
            Builtin::Contains => contains(args),
            Builtin::Length => length(args),
            Builtin::Guid => {
                expect_no_args(self.name(), args)?;
                Ok(JsonValue::String(Uuid::new_v4().to_string()))
            }
            Builtin::Now => {
                expect_no_args(self.name(), args)?;
                Ok(JsonValue::String(Local::now().to_rfc3339()))
            }
            Builtin::NowUtc => {
                expect_no_args(self.name(), args)?;
                Ok(JsonValue::String(Utc::now().to_rfc3339()))
            }
            Builtin::IsNull => {
                let [value] = args else {
                    return Err(function_error(self.name(), "expects exactly one argument"));
                };
                Ok(JsonValue::Bool(value.is_null()))
            }
            Builtin::Concat => Ok(JsonValue::String(
                args.iter().map(value_to_string).collect::<Vec<_>>().join(""),
            )),
            Builtin::If => branch(args),
        }
    }
}

fn function_error(function: &str, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Function {
        function: function.to_string(),
        message: message.into(),
    }
}

fn expect_no_args(function: &str, args: &[JsonValue]) -> Result<(), ExpressionError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(function_error(function, "takes no arguments"))
    }
}

/// Aggregate argument list: a single array argument is aggregated
/// element-wise, anything else is taken as-is.
fn aggregate_items(args: &[JsonValue]) -> Vec<JsonValue> {
    match args {
        [JsonValue::Array(items)] => items.clone(),
        _ => args.to_vec(),
    }
}

fn numeric_args(function: &str, args: &[JsonValue]) -> Result<Vec<f64>, ExpressionError> {
    aggregate_items(args)
        .iter()
        .map(|value| {
            value_to_f64(value).ok_or_else(|| {
                function_error(
                    function,
                    format!("non-numeric argument '{}'", value_to_string(value)),
                )
            })
        })
        .collect()
}

fn fold_numeric(
    function: &str,
    args: &[JsonValue],
    pick: fn(f64, f64) -> f64,
) -> Result<JsonValue, ExpressionError> {
    let values = numeric_args(function, args)?;
    let mut iter = values.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| function_error(function, "requires at least one argument"))?;
    Ok(number_value(iter.fold(first, pick)))
}

fn kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn contains(args: &[JsonValue]) -> Result<JsonValue, ExpressionError> {
    let [haystack, needle] = args else {
        return Err(function_error("Contains", "expects exactly two arguments"));
    };
    match haystack {
        JsonValue::String(text) => Ok(JsonValue::Bool(text.contains(&value_to_string(needle)))),
        JsonValue::Array(items) => {
            let needle_text = value_to_string(needle);
            Ok(JsonValue::Bool(items.iter().any(|item| {
                item == needle || value_to_string(item) == needle_text
            })))
        }
        other => Err(function_error(
            "Contains",
            format!("cannot search {}", kind_name(other)),
        )),
    }
}

fn length(args: &[JsonValue]) -> Result<JsonValue, ExpressionError> {
    let [value] = args else {
        return Err(function_error("Length", "expects exactly one argument"));
    };
    let length = match value {
        JsonValue::String(text) => text.chars().count(),
        JsonValue::Array(items) => items.len(),
        JsonValue::Object(map) => map.len(),
        other => {
            return Err(function_error(
                "Length",
                format!("cannot take the length of {}", kind_name(other)),
            ))
        }
    };
    Ok(number_value(length as f64))
}

fn branch(args: &[JsonValue]) -> Result<JsonValue, ExpressionError> {
    let [condition, when_true, when_false] = args else {
        return Err(function_error("If", "expects a condition and two branches"));
    };
    let selected = match condition {
        JsonValue::Bool(b) => *b,
        JsonValue::String(s) if s.eq_ignore_ascii_case("true") => true,
        JsonValue::String(s) if s.eq_ignore_ascii_case("false") => false,
        other => {
            return Err(function_error(
                "If",
                format!("condition '{}' is not boolean", value_to_string(other)),
            ))
        }
    };
    Ok(if selected {
        when_true.clone()
    } else {
        when_false.clone()
    })
}
