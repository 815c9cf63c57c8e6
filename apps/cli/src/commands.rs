//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use paperbrief_core::report::export_and_record;
use paperbrief_core::{
    EventKind, MarkdownReportExporter, ModelClientConfig, OpenAiClient, ProgressEvent, RunOutcome,
    RunStatus, SummaryService, daily_cost, render_markdown,
};
use paperbrief_retriever::{FetcherConfig, MetadataFetcher};
use paperbrief_shared::{
    AppConfig, ModelOverrides, Tier, init_config, load_config, load_config_from, resolve_api_key,
    validate_api_key,
};
use paperbrief_storage::open_cache;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paperbrief: structured Traditional-Chinese summaries of arXiv papers.
#[derive(Parser)]
#[command(
    name = "paperbrief",
    version,
    about = "Summarize arXiv papers into structured Traditional-Chinese briefs.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.paperbrief/paperbrief.toml).
    #[arg(long, global = true, env = "PAPERBRIEF_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Summarize a paper by arXiv id or abs/pdf URL.
    Summarize {
        /// arXiv identifier (2401.01234, arXiv:2401.01234v2) or URL.
        input: String,

        /// Requester id used for rate limiting.
        #[arg(long, env = "PAPERBRIEF_REQUESTER", default_value = "cli")]
        requester: String,

        /// Rate-limit tier: default, trusted or admin. Derived from the
        /// configured requester lists when omitted.
        #[arg(long)]
        tier: Option<Tier>,

        /// Summarizer model override.
        #[arg(short, long)]
        model: Option<String>,

        /// Report output directory (defaults to `report.output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Skip writing the Markdown report.
        #[arg(long)]
        no_report: bool,

        /// Print the run outcome as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show the aggregated token usage and cost for a day.
    Cost {
        /// Day in YYYY-MM-DD (UTC). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout
/// carries only the summary.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "paperbrief=warn",
        1 => "paperbrief=info",
        2 => "paperbrief=debug",
        _ => "paperbrief=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Summarize {
            input,
            requester,
            tier,
            model,
            out,
            no_report,
            json,
        } => {
            let config = load(config_path.as_ref())?;
            let opts = SummarizeOpts {
                requester,
                tier,
                model,
                out,
                no_report,
                json,
            };
            cmd_summarize(&config, &input, opts).await
        }
        Command::Cost { date, json } => {
            let config = load(config_path.as_ref())?;
            cmd_cost(&config, date, json).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_ref()),
        },
    }
}

fn load(path: Option<&PathBuf>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// summarize
// ---------------------------------------------------------------------------

struct SummarizeOpts {
    requester: String,
    tier: Option<Tier>,
    model: Option<String>,
    out: Option<PathBuf>,
    no_report: bool,
    json: bool,
}

async fn cmd_summarize(config: &AppConfig, input: &str, opts: SummarizeOpts) -> Result<()> {
    validate_api_key(config)?;

    let cache = open_cache(&config.cache).await?;
    let source = Arc::new(MetadataFetcher::new(
        FetcherConfig::from(config),
        Arc::clone(&cache),
    )?);
    let client = Arc::new(OpenAiClient::new(
        ModelClientConfig::from(config).with_api_key(resolve_api_key(config)),
    )?);
    let service = SummaryService::from_config(config, source, client, Arc::clone(&cache));

    let overrides = ModelOverrides {
        model: opts.model.clone(),
        ..ModelOverrides::default()
    };
    let mut handle = match service
        .summarize(input, &opts.requester, opts.tier, overrides)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{} [{}]", e.user_message(), e.code());
            return Err(e.into());
        }
    };
    info!(run_id = %handle.run_id, arxiv_id = %handle.arxiv_id, "summarizing");

    let progress = CliProgress::new(opts.json);
    loop {
        tokio::select! {
            event = handle.events().next() => match event {
                Some(event) => progress.on_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling run");
                handle.cancel();
            }
        }
    }
    let outcome = handle.finish().await?;
    progress.finish();

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if matches!(outcome.status, RunStatus::Failed | RunStatus::Cancelled) {
        let code = outcome
            .error
            .as_ref()
            .map(|e| e.code.to_string())
            .unwrap_or_default();
        return Err(eyre!("run {} ended without a summary [{code}]", outcome.run_id));
    }

    if !opts.no_report {
        let exporter = match &opts.out {
            Some(dir) => MarkdownReportExporter::new(dir),
            None => MarkdownReportExporter::from(&config.report),
        };
        match export_and_record(
            &exporter,
            cache.as_ref(),
            &outcome,
            &config.pipeline.prompt_version,
        )
        .await
        {
            Ok(artifact) => eprintln!("報告已儲存：{}", artifact.path.display()),
            Err(e) => warn!(error = %e, "report not written, summary shown as text only"),
        }
    }

    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    match (&outcome.metadata, &outcome.payload) {
        (Some(meta), Some(payload)) => {
            println!("{}", render_markdown(meta, payload));
            if outcome.is_heuristic() {
                eprintln!("注意：語言模型摘要失敗，以上為低可信度的簡易摘要。");
            }
        }
        _ => {
            if let Some(err) = &outcome.error {
                eprintln!("{} [{}]", err.user_message, err.code);
            }
        }
    }

    let cost = &outcome.cost;
    eprintln!(
        "model={} tokens_in={} tokens_out={} cost=${:.5} time={:.1}s{}",
        cost.model,
        cost.tokens_in,
        cost.tokens_out,
        cost.cost_estimated,
        Duration::from_millis(cost.duration_ms).as_secs_f64(),
        if cost.cache_hit { " (cached)" } else { "" },
    );
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner fed from the run's progress stream.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(hidden: bool) -> Self {
        let spinner = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn on_event(&self, event: &ProgressEvent) {
        let message = match event.kind {
            EventKind::Partial => {
                let chars = event.partial.as_deref().map_or(0, |p| p.chars().count());
                format!("{}（已產生 {chars} 字）", event.status)
            }
            EventKind::Retry => format!("{}（第 {} 次嘗試）", event.status, event.attempt),
            _ => event.status.to_string(),
        };
        self.spinner.set_message(message);
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// cost / config
// ---------------------------------------------------------------------------

async fn cmd_cost(config: &AppConfig, date: Option<NaiveDate>, json: bool) -> Result<()> {
    let cache = open_cache(&config.cache).await?;
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let daily = daily_cost(cache.as_ref(), date).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&daily)?);
        return Ok(());
    }

    println!();
    println!("  Date:       {}", daily.date);
    println!("  Runs:       {}", daily.runs);
    println!("  Cache hits: {}", daily.cache_hits);
    println!("  Tokens in:  {}", daily.tokens_in);
    println!("  Tokens out: {}", daily.tokens_out);
    println!("  Cost (USD): {:.4}", daily.cost_estimated);
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = load(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
