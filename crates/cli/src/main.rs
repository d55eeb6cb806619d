//! Ledgerline CLI — the main entry point.
//!
//! Commands:
//! - `traces`   — List recent traces
//! - `trace`    — Show one trace as a span tree
//! - `usage`    — Aggregate cost / token summary
//! - `pricing`  — List known model rates
//! - `estimate` — One-off cost estimate for a model call

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "ledgerline",
    about = "Ledgerline — LLM call observability: traces, tokens, cost",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List recent traces
    Traces {
        /// Maximum number of traces to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Only traces from this service
        #[arg(short, long)]
        service: Option<String>,
    },

    /// Show one trace as a span tree
    Trace {
        /// The 32-hex trace id
        trace_id: String,
    },

    /// Show aggregate usage (costs, tokens, per service)
    Usage,

    /// List known model pricing
    Pricing,

    /// Estimate cost for a model call
    Estimate {
        #[arg(long)]
        provider: String,

        #[arg(long)]
        model: String,

        #[arg(long, default_value_t = 0)]
        input: u32,

        #[arg(long, default_value_t = 0)]
        output: u32,

        #[arg(long, default_value_t = 0)]
        cache_read: u32,

        #[arg(long, default_value_t = 0)]
        cache_creation: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Traces { limit, service } => commands::traces::list(limit, service).await?,
        Commands::Trace { trace_id } => commands::traces::show(&trace_id).await?,
        Commands::Usage => commands::usage::usage().await?,
        Commands::Pricing => commands::usage::pricing().await?,
        Commands::Estimate {
            provider,
            model,
            input,
            output,
            cache_read,
            cache_creation,
        } => {
            commands::usage::estimate(&provider, &model, input, output, cache_read, cache_creation)
                .await?
        }
    }

    Ok(())
}
