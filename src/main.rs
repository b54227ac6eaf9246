use clap::{Parser, Subcommand};

use mycodex::client::{self, RunOptions};
use mycodex::{config, logging, server};

#[derive(Parser)]
#[command(name = "mycodex", version, about = "Local coding-agent daemon and client")]
struct Cli {
    /// Path to config file (default: configs/config.yaml)
    #[arg(long, global = true, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon service
    Serve,
    /// Send a prompt to the daemon and stream response events
    Run {
        prompt: String,
        /// Override coder model id for this run
        #[arg(long, default_value = "")]
        model: String,
        /// Override planner model id for this run
        #[arg(long, default_value = "")]
        planner_model: String,
        /// Override critic model id for this run
        #[arg(long, default_value = "")]
        critic_model: String,
        /// JSON array of tool calls to execute before the agent
        #[arg(long, default_value = "")]
        tools: String,
        /// Context file paths to load and send with the prompt
        #[arg(long = "context")]
        context_paths: Vec<String>,
        /// Transport override: ws or ndjson
        #[arg(long, default_value = "")]
        transport: String,
    },
    /// Validate configuration and environment
    Doctor,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    match cli.command {
        Command::Serve => {
            logging::init(&cfg.logging.level, &cfg.logging.format)?;
            server::serve(cfg).await
        }
        Command::Run {
            prompt,
            model,
            planner_model,
            critic_model,
            tools,
            context_paths,
            transport,
        } => {
            client::run(
                &cfg,
                RunOptions {
                    prompt,
                    model,
                    planner_model,
                    critic_model,
                    tools_json: tools,
                    context_paths,
                    transport,
                },
            )
            .await
        }
        Command::Doctor => {
            println!(
                "Config OK. Providers: {}, models: {}",
                cfg.providers.len(),
                cfg.models.len()
            );
            println!(
                "Sandbox enabled: {}, metrics: {}",
                cfg.sandbox.enabled, cfg.server.metrics_enabled
            );
            Ok(())
        }
    }
}
