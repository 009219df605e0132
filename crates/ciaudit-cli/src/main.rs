mod display;

use anyhow::{Context, Result};
use ciaudit_core::analyzer::{self, RuleEngine};
use ciaudit_core::audit::{self, Auditor, CancellationFlag};
use ciaudit_core::config::AuditConfig;
use ciaudit_core::discovery::discover_workflow_files;
use ciaudit_core::providers::github_api::GitHubClient;
use ciaudit_core::render::ReportOptions;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "ciaudit",
    version,
    about = "ciaudit: GitHub Actions fleet auditor",
    long_about = "Audit the workflows of many repositories for wasteful configuration, and summarize how often they run, fail and get cancelled."
)]
struct Cli {
    /// Config file (defaults to .ciaudit.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit run history and workflow files of remote repositories
    Audit {
        /// Organization or user whose repositories are audited
        #[arg(long)]
        owner: Vec<String>,

        /// Individual repository as owner/name
        #[arg(long)]
        repo: Vec<String>,

        /// GitHub token
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// GitHub API base URL (for GitHub Enterprise)
        #[arg(long)]
        api_url: Option<String>,

        /// Trailing window in days
        #[arg(long)]
        days: Option<u32>,

        /// Runs fetched per repository
        #[arg(long)]
        limit: Option<usize>,

        /// Repositories audited at the same time
        #[arg(long)]
        concurrency: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Directory to write stats.json and findings.json into
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Run the detection rules on local workflow files
    Lint {
        /// Workflow file or directory containing workflow files
        #[arg(default_value = ".github/workflows/")]
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the registered detection rules
    Rules,
}

struct AuditArgs {
    owners: Vec<String>,
    repos: Vec<String>,
    token: Option<String>,
    api_url: Option<String>,
    format: OutputFormat,
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Audit {
            owner,
            repo,
            token,
            api_url,
            days,
            limit,
            concurrency,
            format,
            export,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(days) = days {
                config.window_days = days;
            }
            if let Some(limit) = limit {
                config.run_limit = limit;
            }
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            config.validate().context("Invalid command-line override")?;

            let args = AuditArgs {
                owners: owner,
                repos: repo,
                token,
                api_url,
                format,
                export,
            };
            cmd_audit(args, &config).await
        }
        Commands::Lint { path, format } => cmd_lint(&path, format),
        Commands::Rules => {
            display::print_rules(RuleEngine::global().rules());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AuditConfig> {
    AuditConfig::discover(path).context("Failed to load configuration")
}

async fn cmd_audit(args: AuditArgs, config: &AuditConfig) -> Result<()> {
    if args.owners.is_empty() && args.repos.is_empty() {
        anyhow::bail!("Nothing to audit. Pass --owner <org> or --repo <owner/name>.");
    }
    if args.token.is_none() {
        log::warn!("No GitHub token given; unauthenticated requests are heavily rate limited");
    }

    let mut client = GitHubClient::new(args.token)?;
    if let Some(url) = args.api_url {
        client = client.with_base_url(url);
    }

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted; finishing repositories already in progress");
                cancel.cancel();
            }
        });
    }

    let (repositories, listing_diagnostics) =
        audit::resolve_repositories(&client, &args.owners, &args.repos).await;
    if repositories.is_empty() {
        let reasons: Vec<String> = listing_diagnostics
            .iter()
            .map(|d| format!("{}: {}", d.repository, d.message))
            .collect();
        anyhow::bail!(
            "No repositories found for the given owners{}",
            if reasons.is_empty() {
                String::new()
            } else {
                format!(" ({})", reasons.join("; "))
            }
        );
    }

    let engine = RuleEngine::global();
    let mut outcome = Auditor::new(&client, engine, config)
        .with_cancellation(cancel)
        .run(&repositories, chrono::Utc::now())
        .await;
    outcome.record_owner_listing(args.owners.len(), listing_diagnostics);

    let report = outcome.report(&ReportOptions::from(config));

    if let Some(dir) = &args.export {
        export_datasets(dir, &outcome)?;
    }

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "report": report,
                "diagnostics": outcome.diagnostics,
            }))?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            display::print_audit_report(&report, config);
            display::print_diagnostics(&outcome.diagnostics);
        }
    }

    Ok(())
}

fn export_datasets(dir: &Path, outcome: &audit::AuditOutcome) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    let stats_path = dir.join("stats.json");
    std::fs::write(&stats_path, serde_json::to_string_pretty(&outcome.stats_rows())?)
        .with_context(|| format!("Failed to write {}", stats_path.display()))?;

    let findings_path = dir.join("findings.json");
    std::fs::write(&findings_path, serde_json::to_string_pretty(&outcome.findings)?)
        .with_context(|| format!("Failed to write {}", findings_path.display()))?;

    log::info!(
        "Exported {} stats rows and {} findings to {}",
        outcome.stats.len(),
        outcome.findings.len(),
        dir.display()
    );
    Ok(())
}

fn cmd_lint(path: &Path, format: OutputFormat) -> Result<()> {
    let files = discover_workflow_files(path)?;

    if files.is_empty() {
        anyhow::bail!(
            "No workflow files found at '{}'. \
            Make sure the path points to a YAML workflow file or directory.",
            path.display()
        );
    }

    let run = analyzer::lint_files(&files);
    if run.analyses.is_empty() {
        anyhow::bail!(
            "None of the {} workflow files at '{}' could be read",
            run.skipped.len(),
            path.display()
        );
    }

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&run)?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            for analysis in &run.analyses {
                display::print_file_analysis(analysis);
            }
            display::print_skipped_files(&run.skipped);
        }
    }

    Ok(())
}
