pub mod cli;
pub mod interpreter;

// Re-export the expression engine API
pub use interpreter::{
    ExpressionError, ExpressionParser, ExpressionParserBuilder, FunctionEvaluator,
    OutputsResolver, SecretProvider, SecretsResolver, SourceResolver, VariablesResolver,
};
