use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use podscribe_core::transcription::command::CommandEngine;
use podscribe_core::transcription::{SpeechToText, TranscriptionService};
use podscribe_core::{Error, Result};
use podscribe_node::{default_config_path, NodeAgent, NodeClient, NodeConfig};

#[derive(Parser)]
#[command(name = "podscribe-node", version, about = "podscribe remote transcription node")]
struct Cli {
    /// Path to the node config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register this machine with a podscribe server
    Register {
        /// Server base URL, e.g. http://server:8000
        #[arg(long)]
        server: String,

        /// Name for this node
        #[arg(long)]
        name: String,

        /// URL the server can reach this node's status page on
        #[arg(long, default_value = "http://localhost:8001")]
        url: String,

        /// Model identifier to report
        #[arg(long, default_value = "base")]
        model: String,

        /// Backend label to report
        #[arg(long, default_value = "subprocess")]
        backend: String,

        /// Command used to run transcriptions
        #[arg(long)]
        transcription_command: Option<String>,
    },

    /// Run the worker agent (blocking until interrupted)
    Run,

    /// Show the saved node identity
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Command::Register {
            server,
            name,
            url,
            model,
            backend,
            transcription_command,
        } => {
            let (node_id, api_key) =
                NodeClient::register(&server, &name, &url, &model, &backend).await?;

            let config = NodeConfig {
                server_url: server,
                node_id: node_id.clone(),
                api_key,
                name,
                model,
                backend,
                transcription_command,
                poll_interval_seconds: 5,
                heartbeat_interval_seconds: 30,
            };
            config.save(&config_path)?;

            println!("Registered as node {}", node_id);
            println!("Credentials saved to {}", config_path.display());
            Ok(())
        }

        Command::Run => {
            let config = NodeConfig::load(&config_path)?;
            let client = NodeClient::new(&config.server_url, &config.node_id, &config.api_key)?;

            let engine_command = config
                .transcription_command
                .clone()
                .ok_or_else(|| Error::config("transcription_command is not set; re-register with --transcription-command"))?;
            let model = config.model.clone();
            let transcription = Arc::new(TranscriptionService::new(move || {
                let engine = CommandEngine::from_command_line(&engine_command, &model)?;
                Ok(Arc::new(engine) as Arc<dyn SpeechToText>)
            }));

            let agent = Arc::new(NodeAgent::new(config.clone(), client, transcription));
            agent.clone().start().await;
            info!(
                "Node '{}' started, polling {}",
                config.name, config.server_url
            );

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| Error::Other(format!("Signal handler failed: {}", e)))?;
            info!("Received interrupt signal");

            agent.stop(Duration::from_secs(30)).await;
            Ok(())
        }

        Command::Status => {
            let config = NodeConfig::load(&config_path)?;
            println!("Node:    {} ({})", config.name, config.node_id);
            println!("Server:  {}", config.server_url);
            println!("Model:   {} [{}]", config.model, config.backend);
            Ok(())
        }
    }
}
