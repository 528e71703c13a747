use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::interpreter::ExpressionParser;

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Weft - workflow expression evaluation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate an expression against a workflow context
    Eval {
        /// Expression text, e.g. "$[Outputs('task1').items[0].value + 5]"
        expression: String,

        /// Path to a JSON object of task outputs keyed by task name
        #[arg(long)]
        outputs: Option<String>,

        /// Path to a JSON object of workflow variables
        #[arg(long)]
        variables: Option<String>,

        /// Cancel evaluation after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List the functions available to expressions
    Functions,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Eval {
            expression,
            outputs,
            variables,
            timeout_ms,
        } => {
            let outputs = load_context(outputs.as_deref()).context("failed to load outputs")?;
            let variables =
                load_context(variables.as_deref()).context("failed to load variables")?;
            let parser = ExpressionParser::new(outputs, variables);

            let cancel = CancellationToken::new();
            if let Some(ms) = timeout_ms {
                let token = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    token.cancel();
                });
            }

            let value = parser
                .parse(&expression, &cancel)
                .await
                .with_context(|| format!("failed to evaluate '{}'", expression))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        Commands::Functions => {
            let parser = ExpressionParser::new(HashMap::new(), HashMap::new());
            for name in parser.function_names() {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn load_context(path: Option<&str>) -> Result<HashMap<String, JsonValue>> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };
    let text =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
    let context: HashMap<String, JsonValue> =
        serde_json::from_str(&text).with_context(|| format!("{} is not a JSON object", path))?;
    Ok(context)
}
