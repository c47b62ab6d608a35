//! CLI entry point for Concierge.
//!
//! This binary provides the `concierge` command with subcommands for
//! answering a query, inspecting the model ladder, and listing tools.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use concierge_core::tools::builtin::{CalculatorTool, ClockTool};
use concierge_core::{
    AgentCore, CoreConfig, HeuristicClassifier, JsonlSink, Query, Tool, ToolRegistry, UserTier,
};

mod tools;

use tools::{CrmLookupTool, WebSearchTool};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Concierge — a tiered, tool-using agent orchestration core.
#[derive(Parser)]
#[command(
    name = "concierge",
    version,
    about = "Concierge — agent orchestration core",
    long_about = "Routes a query to a reasoning strategy, drives a bounded tool-using \
                  loop over a ladder of language models, and accounts for every token \
                  spent along the way."
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "concierge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single query and print the result.
    Answer {
        /// The query text.
        text: String,

        /// Entitlement tier of the requesting user.
        #[arg(long, value_enum, default_value_t = TierArg::Standard)]
        user_tier: TierArg,

        /// Override the configured wall-clock deadline, in seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Attach an image by URL (routes to a vision-capable tier).
        #[arg(long)]
        image: Option<String>,

        /// Append each run record to this JSONL file.
        #[arg(long)]
        jsonl: Option<PathBuf>,

        /// JSON file of CRM account records keyed by account id.
        #[arg(long)]
        crm_records: Option<PathBuf>,

        /// Print the full reasoning trace after the answer.
        #[arg(long)]
        trace: bool,
    },

    /// Print the configured model ladder.
    Tiers,

    /// List the registered tools and their entitlements.
    Tools {
        /// JSON file of CRM account records keyed by account id.
        #[arg(long)]
        crm_records: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TierArg {
    Standard,
    Premium,
    Internal,
}

impl From<TierArg> for UserTier {
    fn from(value: TierArg) -> Self {
        match value {
            TierArg::Standard => UserTier::Standard,
            TierArg::Premium => UserTier::Premium,
            TierArg::Internal => UserTier::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Answer {
            text,
            user_tier,
            deadline_secs,
            image,
            jsonl,
            crm_records,
            trace,
        } => {
            cmd_answer(
                &cli.config,
                text,
                user_tier.into(),
                deadline_secs,
                image,
                jsonl,
                crm_records,
                trace,
            )
            .await
        }
        Commands::Tiers => cmd_tiers(&cli.config),
        Commands::Tools { crm_records } => cmd_tools(crm_records),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: answer
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn cmd_answer(
    config_path: &PathBuf,
    text: String,
    user_tier: UserTier,
    deadline_secs: Option<u64>,
    image: Option<String>,
    jsonl: Option<PathBuf>,
    crm_records: Option<PathBuf>,
    trace: bool,
) -> Result<()> {
    init_tracing("info");

    // 1. Load config. A single query runs against one snapshot; long-lived
    //    embedders use `ConfigHandle::watching` for live edits instead.
    let config = CoreConfig::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(path = %config_path.display(), tiers = config.tiers.len(), "configuration loaded");

    // 2. Assemble the core.
    let core = build_core(&config, crm_records, jsonl)?;

    let deadline = deadline_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| core.default_deadline());

    // 3. Wire ctrl-c to in-flight cancellation.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling in-flight work");
            signal_token.cancel();
        }
    });

    // 4. Run the query.
    let mut query = Query::new(text).with_user_tier(user_tier);
    if let Some(url) = image {
        query = query.with_media(concierge_core::MediaRef::url(url));
    }

    let answered = core
        .respond(&query, tokio::time::Instant::now() + deadline, &cancel)
        .await;

    // 5. Print the result.
    println!();
    println!("{}", answered.answer.text);
    println!();
    if answered.answer.truncated {
        println!("  (answer is partial: a run limit was reached)");
    }
    println!(
        "  steps: {}   attempts: {} ({} failed)   tokens: {} in / {} out   cost: ${}",
        answered.state.steps().len(),
        answered.usage.attempts,
        answered.usage.failed_attempts,
        answered.usage.input_tokens,
        answered.usage.output_tokens,
        answered.usage.cost,
    );

    if trace {
        println!();
        for (i, step) in answered.state.steps().iter().enumerate() {
            println!("  step {:>2}  [{:?}] {:?}", i + 1, step.status, step.action);
            if !step.thought.is_empty() {
                println!("           thought: {}", step.thought);
            }
            println!("           observation: {}", step.observation);
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: tiers
// ---------------------------------------------------------------------------

fn cmd_tiers(config_path: &PathBuf) -> Result<()> {
    init_tracing("warn");

    let config = CoreConfig::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    println!();
    println!("  Model ladder (cheapest first):");
    for tier in &config.tiers {
        let caps = [
            tier.capabilities.function_calling.then_some("tools"),
            tier.capabilities.vision.then_some("vision"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");

        println!(
            "    {}. {:?} {}  ${}/M in, ${}/M out  budget {}ms  context {}  [{}]",
            tier.rank,
            tier.provider,
            tier.model,
            tier.input_price,
            tier.output_price,
            tier.max_latency_ms,
            tier.context_window,
            if caps.is_empty() { "text only" } else { caps.as_str() },
        );
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: tools
// ---------------------------------------------------------------------------

fn cmd_tools(crm_records: Option<PathBuf>) -> Result<()> {
    init_tracing("warn");

    let registry = build_registry(crm_records)?;

    println!();
    println!("  Registered tools:");
    for name in registry.names() {
        // names() only lists registered tools, so get() cannot miss.
        if let Some(tool) = registry.get(name) {
            println!(
                "    {:<12} min tier: {:<8?} trusted: {:<5} {}",
                tool.name(),
                tool.min_user_tier(),
                tool.trusted(),
                tool.description(),
            );
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Assembly helpers
// ---------------------------------------------------------------------------

fn build_registry(crm_records: Option<PathBuf>) -> Result<Arc<ToolRegistry>> {
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(CalculatorTool),
        Arc::new(ClockTool),
        Arc::new(WebSearchTool::from_env()),
    ];

    if let Some(path) = crm_records {
        let crm = CrmLookupTool::load(&path)
            .with_context(|| format!("failed to load CRM records from {}", path.display()))?;
        tools.push(Arc::new(crm));
    }

    Ok(Arc::new(ToolRegistry::new(tools)?))
}

fn build_core(
    config: &CoreConfig,
    crm_records: Option<PathBuf>,
    jsonl: Option<PathBuf>,
) -> Result<AgentCore> {
    let anthropic_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    let openai_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    if anthropic_key.is_empty() && openai_key.is_empty() {
        warn!("neither ANTHROPIC_API_KEY nor OPENAI_API_KEY is set, model calls will fail");
    }

    let tiers = config.tier_table()?;
    let gateway = Arc::new(concierge_core::ModelGateway::over_http(
        tiers,
        &anthropic_key,
        &openai_key,
    )?);

    let registry = build_registry(crm_records)?;

    let mut core = AgentCore::new(
        gateway,
        registry,
        Arc::new(HeuristicClassifier),
        config.engine.clone(),
        config.deadline(),
    );

    if let Some(path) = jsonl {
        let sink = JsonlSink::open(&path)
            .with_context(|| format!("failed to open JSONL sink at {}", path.display()))?;
        core = core.with_sink(Arc::new(sink));
    }

    Ok(core)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
