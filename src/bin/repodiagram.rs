#![forbid(unsafe_code)]

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing::Level;

use repodiagram::server::{self, ServerConfig};
use repodiagram::{telemetry, AppConfig, GenerationRequest, PipelineEvent};

#[derive(Parser)]
#[command(
    name = "repodiagram",
    version,
    about = "Generate Mermaid architecture diagrams for GitHub repositories"
)]
struct Cli {
    /// Emit logs as newline-delimited JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Generation model (overrides OPENAI_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long, env = "HOST")]
        host: Option<String>,
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
    /// Quote the cost of generating a diagram
    Cost {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Generate a diagram, printing each event as a JSON line
    Generate {
        #[command(flatten)]
        target: TargetArgs,
        /// Skip the pause between stage announcements
        #[arg(long)]
        no_pacing: bool,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Repository owner
    #[arg(long)]
    username: String,
    /// Repository name
    #[arg(long)]
    repo: String,
    /// Your own OpenAI key; lifts the free-tier size limit
    #[arg(long)]
    api_key: Option<String>,
    /// GitHub token for private repositories or higher rate limits
    #[arg(long)]
    github_pat: Option<String>,
}

impl TargetArgs {
    fn into_request(self) -> GenerationRequest {
        GenerationRequest {
            username: self.username,
            repo: self.repo,
            api_key: self.api_key,
            github_pat: self.github_pat,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json, Level::INFO);

    let mut config = AppConfig::from_env()?;
    if let Some(model) = cli.model {
        config.model = model;
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let pipeline = Arc::new(config.build_pipeline()?);
            server::run_server(ServerConfig::from(&config), pipeline).await?;
        }
        Commands::Cost { target } => {
            let pipeline = config.build_pipeline()?;
            let result = pipeline.estimate_cost(&target.into_request()).await;
            let failed = result.is_err();
            let body = server::cost_payload(result);
            println!("{}", serde_json::to_string_pretty(&body)?);
            if failed {
                return Err("cost estimation failed".into());
            }
        }
        Commands::Generate { target, no_pacing } => {
            if no_pacing {
                config.pacing_delay = std::time::Duration::ZERO;
            }
            let req = target.into_request();
            req.validate()?;

            let pipeline = Arc::new(config.build_pipeline()?);
            let mut events = pipeline.event_stream(req);
            let mut failure = None;
            while let Some(event) = events.next().await {
                println!("{}", serde_json::to_string(&event)?);
                if let PipelineEvent::Error {
                    error, error_code, ..
                } = event
                {
                    failure = Some(format!("{}: {error}", error_code.as_str()));
                }
            }
            if let Some(failure) = failure {
                return Err(failure.into());
            }
        }
    }

    Ok(())
}
