use clap::Parser;
use tracing::info;

use podscribe_core::Config;

#[derive(Parser)]
#[command(name = "podscribe", version, about = "Podcast transcription server")]
struct Cli {
    /// Path to the TOML config file (falls back to PODSCRIBE_CONFIG and
    /// default locations)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting podscribe {}...", podscribe_core::VERSION);

    if let Err(e) = podscribe_api::run(config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
