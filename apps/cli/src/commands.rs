//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use webextract_core::pipeline::{
    Collaborators, PipelineOptions, ProgressReporter, perform_extraction,
};
use webextract_core::{LedgerBilling, OpenRouterExtractor, SideEffects, StorageJobLog};
use webextract_discovery::LinkExpander;
use webextract_fetcher::HttpFetcher;
use webextract_shared::{
    AccountContext, AppConfig, Billing, ExtractionRequest, NoopBilling, RunResult, init_config,
    load_config, validate_api_key,
};
use webextract_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// webextract: pull structured data out of web pages with an LLM.
#[derive(Parser)]
#[command(
    name = "webextract",
    version,
    about = "Expand URLs, fetch their content, and extract structured data from it.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Run an extraction over one or more seed URLs.
    ///
    /// A URL ending in `/*` is mapped into the site's relevant pages.
    Extract(ExtractArgs),

    /// Inspect the local job history.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Show credits charged to an account.
    Credits {
        /// Account to report on (defaults to the configured account).
        #[arg(long)]
        account: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `webextract extract`.
#[derive(clap::Args)]
pub(crate) struct ExtractArgs {
    /// Seed URLs, in order.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// What to extract.
    #[arg(short, long)]
    pub prompt: String,

    /// Path to a JSON Schema file describing the output.
    #[arg(short, long)]
    pub schema: Option<PathBuf>,

    /// Text prepended to the extraction instructions.
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Overall time budget in milliseconds (70% goes to fetching).
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Follow links to other hosts when mapping.
    #[arg(long)]
    pub allow_external_links: bool,

    /// Follow links to subdomains when mapping.
    #[arg(long)]
    pub include_subdomains: bool,

    /// Maximum links per mapped seed.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Origin tag recorded with the run.
    #[arg(long)]
    pub origin: Option<String>,

    /// Include the URL trace in the output.
    #[arg(long)]
    pub trace: bool,

    /// Account charged for the run.
    #[arg(long)]
    pub account: Option<String>,

    /// Subscription the charge is booked against.
    #[arg(long)]
    pub subscription: Option<String>,
}

/// Job history subcommands.
#[derive(Subcommand)]
pub(crate) enum JobsAction {
    /// List recent jobs, newest first.
    List {
        /// Maximum number of jobs to show.
        #[arg(long, default_value = "20")]
        limit: u32,
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

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "webextract=info",
        1 => "webextract=debug",
        _ => "webextract=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
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
    match cli.command {
        Command::Extract(args) => cmd_extract(args).await,
        Command::Jobs { action } => match action {
            JobsAction::List { limit } => cmd_jobs_list(limit).await,
        },
        Command::Credits { account } => cmd_credits(account).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// extract
// ---------------------------------------------------------------------------

async fn cmd_extract(args: ExtractArgs) -> Result<()> {
    let config = load_config()?;
    let api_key = validate_api_key(&config)?;

    let schema = args.schema.as_deref().map(read_schema).transpose()?;
    let request = build_request(&args, &config, schema);
    let account = AccountContext {
        account_id: args
            .account
            .clone()
            .unwrap_or_else(|| config.defaults.account_id.clone()),
        subscription_id: args.subscription.clone(),
    };

    let storage = Arc::new(Storage::open(&config.db_path()?).await?);
    let billing: Arc<dyn Billing> = if config.billing.enabled {
        Arc::new(LedgerBilling::new(Arc::clone(&storage)))
    } else {
        Arc::new(NoopBilling)
    };

    let collaborators = Collaborators {
        expander: Arc::new(LinkExpander::new(&config.fetch)?),
        fetcher: Arc::new(HttpFetcher::new(&config.fetch)?),
        extractor: Arc::new(OpenRouterExtractor::new(&api_key, &config.openrouter)?),
        side_effects: SideEffects::new(billing, Arc::new(StorageJobLog::new(storage))),
    };
    let options = PipelineOptions {
        credits_per_url: config.billing.credits_per_url,
    };

    info!(
        seeds = request.urls.len(),
        account = %account.account_id,
        model = %config.openrouter.default_model,
        "starting extraction"
    );

    let reporter = CliProgress::new()?;
    let outcome =
        perform_extraction(&request, &account, &collaborators, &options, &reporter).await;
    reporter.clear();

    // Billing and job logging must land before the process exits.
    collaborators.side_effects.drain().await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        return Err(eyre!(
            "extraction failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

/// Merge CLI flags over config defaults into a request.
fn build_request(
    args: &ExtractArgs,
    config: &AppConfig,
    schema: Option<serde_json::Value>,
) -> ExtractionRequest {
    ExtractionRequest {
        urls: args.urls.clone(),
        prompt: args.prompt.clone(),
        schema,
        system_prompt: args.system_prompt.clone(),
        timeout_ms: args.timeout_ms.or(config.defaults.timeout_ms),
        allow_external_links: args.allow_external_links,
        include_subdomains: args.include_subdomains,
        limit: args.limit.or(config.defaults.limit),
        origin: Some(
            args.origin
                .clone()
                .unwrap_or_else(|| config.defaults.origin.clone()),
        ),
        url_trace: args.trace,
    }
}

fn read_schema(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read schema file {}", path.display()))?;
    serde_json::from_str(&text)
        .wrap_err_with(|| format!("schema file {} is not valid JSON", path.display()))
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Ok(Self { spinner })
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn url_fetched(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fetching [{current}/{total}] {url}"));
    }

    fn done(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// jobs / credits
// ---------------------------------------------------------------------------

async fn open_readonly_storage() -> Result<(AppConfig, Storage)> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&config.db_path()?)
        .await
        .wrap_err("no job history yet; run `webextract extract` first")?;
    Ok((config, storage))
}

async fn cmd_jobs_list(limit: u32) -> Result<()> {
    let (_config, storage) = open_readonly_storage().await?;
    let jobs = storage.list_job_logs(limit).await?;

    if jobs.is_empty() {
        println!("No jobs recorded.");
        return Ok(());
    }

    for job in jobs {
        let r = &job.record;
        println!(
            "{}  {}  {:<7}  {:>6} tok  {:>6.1}s  {}  {}",
            job.created_at,
            r.job_id,
            if r.success { "ok" } else { "failed" },
            r.num_tokens,
            r.time_taken,
            r.team_id,
            r.url,
        );
    }
    Ok(())
}

async fn cmd_credits(account: Option<String>) -> Result<()> {
    let (config, storage) = open_readonly_storage().await?;
    let account = account.unwrap_or(config.defaults.account_id);
    let used = storage.credits_used(&account).await?;
    println!("{account}: {used} credits used");
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("valid args")
    }

    #[test]
    fn extract_args_parse() {
        let cli = parse(&[
            "webextract",
            "extract",
            "https://a.test/*",
            "https://b.test/",
            "--prompt",
            "Who is the CEO?",
            "--timeout-ms",
            "40000",
            "--trace",
        ]);
        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(args.urls, vec!["https://a.test/*", "https://b.test/"]);
        assert_eq!(args.timeout_ms, Some(40_000));
        assert!(args.trace);
        assert!(!args.allow_external_links);
    }

    #[test]
    fn extract_requires_urls_and_prompt() {
        assert!(Cli::try_parse_from(["webextract", "extract", "--prompt", "x"]).is_err());
        assert!(Cli::try_parse_from(["webextract", "extract", "https://a.test/"]).is_err());
    }

    #[test]
    fn flags_override_config_defaults() {
        let mut config = AppConfig::default();
        config.defaults.timeout_ms = Some(60_000);
        config.defaults.limit = Some(5);

        let cli = parse(&[
            "webextract",
            "extract",
            "https://a.test/",
            "-p",
            "x",
            "--limit",
            "2",
            "--origin",
            "sdk",
        ]);
        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };

        let request = build_request(&args, &config, None);
        assert_eq!(request.timeout_ms, Some(60_000));
        assert_eq!(request.limit, Some(2));
        assert_eq!(request.origin.as_deref(), Some("sdk"));
        assert!(!request.url_trace);
    }

    #[test]
    fn invalid_schema_file_is_reported() {
        let path = std::env::temp_dir().join(format!("we_schema_{}.json", std::process::id()));
        std::fs::write(&path, "{not json").unwrap();
        let err = read_schema(&path).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
        std::fs::remove_file(&path).ok();
    }
}
