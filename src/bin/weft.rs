/// Weft expression CLI
///
/// Evaluates workflow expressions from the command line without a host
/// engine. Useful for authoring and debugging expressions against captured
/// task outputs.
use weft_core::cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
