#![cfg(not(tarpaulin_include))]

use clap::Parser;
use reviews::app;
use reviews::config::Args;

/// Main entry point for the review service
///
/// Loads `.env`, parses the command line, initialises logging and serves the
/// review API until the process is stopped.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    args.validate()?;
    app::run(args).await
}
