//! Run an LLM conversation over a bundle of Python tools.
//!
//! Reads the API key from `OPENROUTER_KEY`, `OPENAI_API_KEY`, or
//! `ANTHROPIC_API_KEY` depending on `--provider`.
//!
//! # Examples
//!
//! ```sh
//! # Ask a question with the tools listed in bundles/math.lmvm
//! lmvm run math.lmvm "What is 2 + 5?"
//!
//! # Use Anthropic and skip requirements.txt installation
//! lmvm run math.lmvm "What is 2 + 5?" --provider anthropic --skip-install
//!
//! # Print the tool descriptors the model would see
//! lmvm tools math.lmvm
//! ```

use clap::{Args, Parser, Subcommand};
use lmvm_rs::prelude::*;
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run an LLM conversation over a bundle of Python tools.
#[derive(Parser)]
#[command(name = "lmvm", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a bundle and answer a prompt with its tools
    Run(RunArgs),
    /// Print the tool descriptors of a bundle as JSON
    Tools(BundleArgs),
    /// Upload a bundle to the registry
    #[command(alias = "u")]
    Upload {
        /// Bundle file to upload
        path: PathBuf,
    },
    /// Download a bundle from the registry
    #[command(alias = "d")]
    Download {
        /// Bundle name
        name: String,
    },
}

#[derive(Args)]
struct BundleArgs {
    /// Bundle name or path
    bundle: String,

    /// Directory containing one folder per tool id
    #[arg(long, default_value = "tools")]
    tools_dir: PathBuf,

    /// Directory searched for bundle names
    #[arg(long, default_value = "bundles")]
    bundles_dir: PathBuf,

    /// Python interpreter used for evaluation and pip
    #[arg(long, default_value = lmvm_rs::namespace::DEFAULT_PYTHON)]
    python: PathBuf,

    /// Do not install requirements.txt files
    #[arg(long)]
    skip_install: bool,

    /// Ignore functions nested inside other functions or classes
    #[arg(long)]
    top_level_only: bool,

    /// Accept parameters without type annotations (typed as "any")
    #[arg(long)]
    allow_unannotated: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    bundle: BundleArgs,

    /// Prompt sent to the model
    prompt: String,

    // ── Provider ───────────────────────────────────────────────
    /// Provider: openrouter, openai, or anthropic
    #[arg(long, default_value = "openrouter")]
    provider: ProviderKind,

    /// Model id (defaults to the provider's default)
    #[arg(long)]
    model: Option<String>,

    /// Override the provider's base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Maximum tokens per completion
    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    /// Retries for transient provider errors
    #[arg(long, default_value_t = 3)]
    retries: u32,

    // ── Conversation ───────────────────────────────────────────
    /// System prompt
    #[arg(long, default_value = "")]
    system: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    /// Maximum provider round trips
    #[arg(long, default_value_t = 10)]
    max_turns: u32,

    /// Per-call tool timeout in seconds
    #[arg(long)]
    tool_timeout: Option<u64>,

    /// Retries for a failing tool call
    #[arg(long, default_value_t = 0)]
    tool_retries: u32,

    /// Send tool failures back to the model instead of aborting
    #[arg(long)]
    report_tool_errors: bool,

    /// Write the conversation transcript as JSON to this file
    #[arg(long)]
    transcript: Option<PathBuf>,
}

impl BundleArgs {
    fn schema_options(&self) -> SchemaOptions {
        SchemaOptions::default().with_unannotated(if self.allow_unannotated {
            UnannotatedParams::Any
        } else {
            UnannotatedParams::Reject
        })
    }

    fn loader(&self) -> BundleLoader {
        let nested = if self.top_level_only {
            NestedFunctions::TopLevelOnly
        } else {
            NestedFunctions::Include
        };
        let config = ExtractConfig::new(&self.tools_dir)
            .with_nested(nested)
            .with_syntax_check(SyntaxCheck::Interpreter(self.python.clone()));
        let extractor = if self.skip_install {
            Extractor::new(config).with_installer(SkipInstall)
        } else {
            Extractor::new(config).with_installer(PipInstaller::new(&self.python))
        };
        BundleLoader::new(&self.bundles_dir, extractor)
            .with_namespace_builder(NamespaceBuilder::new(&self.python))
            .with_schema_options(self.schema_options())
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut settings = ProviderSettings::new(args.provider)
        .with_max_tokens(args.max_tokens)
        .with_env_key();
    if let Some(model) = args.model {
        settings = settings.with_model(model);
    }
    if let Some(url) = args.base_url {
        settings = settings.with_base_url(url);
    }

    let config = ConversationConfig::new(args.system)
        .with_max_turns(args.max_turns)
        .with_temperature(args.temperature)
        .with_provider_retry(RetryConfig::with_retries(args.retries))
        .with_tool_timeout(args.tool_timeout.map(Duration::from_secs))
        .with_tool_retries(args.tool_retries)
        .with_tool_errors(if args.report_tool_errors {
            ToolErrorPolicy::ReportToModel
        } else {
            ToolErrorPolicy::Fail
        });

    let mut conversation = args
        .bundle
        .loader()
        .conversation(&args.bundle.bundle, || settings.build(), config)
        .await?
        .with_event_handler(&LoggingHandler);
    let outcome = conversation.run(&args.prompt).await?;

    if let Some(path) = &args.transcript {
        tokio::fs::write(path, conversation.transcript_json()?).await?;
        info!("Transcript written to {}", path.display());
    }

    info!(
        "Run {} finished: stop={:?}, turns={}, tool calls={}, tokens={}",
        outcome.trace_id,
        outcome.stop,
        outcome.turns_used,
        outcome.tool_results.len(),
        outcome.usage.total()
    );
    println!("{}", outcome.text);
    Ok(())
}

async fn tools(args: BundleArgs) -> Result<()> {
    let loaded = args.loader().load(&args.bundle).await?;
    let listing: Vec<_> = loaded
        .descriptors
        .iter()
        .map(|d| {
            json!({
                "name": d.name,
                "description": d.description,
                "parameters": d.parameters,
                "json_schema": d.to_json_schema(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "lmvm_rs=info,lmvm=info",
        1 => "lmvm_rs=debug,lmvm=debug",
        _ => "lmvm_rs=trace,lmvm=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Tools(args) => tools(args).await,
        Command::Upload { path } => {
            info!("Registry upload is not available; skipping {}", path.display());
            Ok(())
        }
        Command::Download { name } => {
            info!("Registry download is not available; skipping '{name}'");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
