//! CLI binary for triaging support tickets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use triage_llm::{AnthropicGenerator, Generator, RulesGenerator};
use triage_pipeline::{Orchestrator, PipelineConfig};
use triage_types::{Ticket, TicketState};

const SAMPLE_TICKETS: &str = include_str!("../samples/tickets.json");

#[derive(Parser)]
#[command(name = "triage", version, about = "Support ticket triage pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Triage tickets from a JSON file holding one ticket or an array of tickets
    Process {
        /// Path to the ticket JSON file
        tickets: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Triage the built-in sample tickets
    Samples {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Print the effective pipeline configuration
    Config {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct PipelineArgs {
    /// Pipeline config file (JSON); defaults apply to missing fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text-generation backend
    #[arg(long, value_enum, default_value_t = Backend::Rules)]
    backend: Backend,

    /// Model name for the anthropic backend
    #[arg(long)]
    model: Option<String>,

    /// API base URL for the anthropic backend
    #[arg(long)]
    base_url: Option<String>,

    /// Retry budget applied to every stage
    #[arg(long)]
    max_retries: Option<u32>,

    /// Maximum number of tickets processed at once
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Print each final ticket state as JSON instead of a summary line
    #[arg(long)]
    json: bool,

    /// Stream pipeline events to stderr as JSON lines
    #[arg(long)]
    events: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Deterministic keyword rules, no network access
    Rules,
    /// Anthropic Messages API (reads ANTHROPIC_API_KEY)
    Anthropic,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Process { tickets, pipeline } => {
            let tickets = load_tickets(&tickets)?;
            cmd_process(tickets, &pipeline).await?;
        }
        Commands::Samples { pipeline } => {
            let tickets = parse_tickets(SAMPLE_TICKETS).context("built-in samples are invalid")?;
            cmd_process(tickets, &pipeline).await?;
        }
        Commands::Config { pipeline } => {
            let config = load_config(&pipeline)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_config(args: &PipelineArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(max_retries) = args.max_retries {
        config = config.with_max_retries(max_retries);
    }
    if let Some(max_concurrency) = args.max_concurrency {
        config = config.with_max_concurrency(max_concurrency);
    }
    config.validate()?;
    Ok(config)
}

fn build_generator(
    args: &PipelineArgs,
    config: &PipelineConfig,
) -> anyhow::Result<Arc<dyn Generator>> {
    Ok(match args.backend {
        Backend::Rules => Arc::new(RulesGenerator::new()),
        Backend::Anthropic => {
            let generator = configure_anthropic(AnthropicGenerator::from_env()?, args, config);
            tracing::info!(
                model = generator.model(),
                base_url = generator.base_url(),
                "Using Anthropic backend"
            );
            Arc::new(generator)
        }
    })
}

/// Apply CLI overrides, and bound HTTP requests by the longest stage attempt timeout.
fn configure_anthropic(
    mut generator: AnthropicGenerator,
    args: &PipelineArgs,
    config: &PipelineConfig,
) -> AnthropicGenerator {
    if let Some(model) = &args.model {
        generator = generator.with_model(model.clone());
    }
    if let Some(url) = &args.base_url {
        generator = generator.with_base_url(url.clone());
    }
    let timeout = config
        .analysis
        .attempt_timeout()
        .max(config.response.attempt_timeout());
    generator.with_request_timeout(timeout)
}

fn load_tickets(path: &Path) -> anyhow::Result<Vec<Ticket>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_tickets(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Accept either a single ticket object or an array of tickets.
fn parse_tickets(text: &str) -> anyhow::Result<Vec<Ticket>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_process(tickets: Vec<Ticket>, args: &PipelineArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let generator = build_generator(args, &config)?;
    let orchestrator = Orchestrator::new(config, generator)?;

    let event_printer = args.events.then(|| {
        let mut rx = orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{line}"),
                        Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let ids: Vec<String> = tickets.iter().map(|t| t.id.clone()).collect();
    let total = ids.len();
    let results = orchestrator.process_batch(tickets).await;
    drop(orchestrator);
    if let Some(printer) = event_printer {
        printer.await?;
    }

    let mut failed = 0;
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(state) if args.json => println!("{}", serde_json::to_string_pretty(&state)?),
            Ok(state) => println!("{}", summarize(&state)),
            Err(err) => {
                failed += 1;
                eprintln!("{id}: {err}");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} tickets failed");
    }
    Ok(())
}

/// One line per ticket: classification, next action, and per-stage outcomes.
fn summarize(state: &TicketState) -> String {
    let classification = match state.analysis() {
        Some(a) => format!("{}/{}", a.category, a.priority),
        None => "-".to_string(),
    };
    let action = state
        .response()
        .map(|r| r.next_action.to_string())
        .unwrap_or_else(|| "-".to_string());
    let stages: Vec<String> = state
        .outcomes()
        .iter()
        .map(|r| format!("{}={}x{}", r.stage, r.status, r.attempts))
        .collect();

    format!(
        "{:<10} {:<18} -> {:<13} [{}] {}ms",
        state.ticket().id,
        classification,
        action,
        stages.join(", "),
        state.elapsed().as_millis()
    )
}
