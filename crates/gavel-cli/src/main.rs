//! Gavel judging CLI
//!
//! A command-line front end for the gavel judging pipeline: judge a single
//! submission, or run the daemon that watches the incoming directory with a
//! pool of judging workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gavel::{
    CancelToken, ComparatorKind, Config, EXAMPLE_CONFIG, JudgeError, JudgePipeline, JudgeRequest,
    Submission, WorkerPool, cancel_pair, load_test_dir,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gavel")]
#[command(about = "A sandboxed judging pipeline for programming-contest submissions")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: gavel.toml)
        #[arg(short, long, default_value = "gavel.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Judge a single submission against a test-data directory
    Judge {
        /// Source file to judge
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., cpp17, python3)
        #[arg(short, long)]
        language: String,

        /// Directory with <case>.in/<case>.ans test data
        #[arg(short, long)]
        testdata: PathBuf,

        /// Per-test time limit in seconds
        #[arg(long, default_value = "2")]
        time_limit: u64,

        /// Comparison mode: exact, token, or line
        #[arg(long, default_value = "line")]
        comparator: String,

        /// Submission id (default: the source file stem)
        #[arg(long)]
        id: Option<String>,

        /// Judge again even if a verdict is already recorded
        #[arg(long)]
        rejudge: bool,
    },

    /// Watch the incoming directory and judge submissions with a worker pool
    Daemon {
        /// Directory with <case>.in/<case>.ans test data
        #[arg(short, long)]
        testdata: PathBuf,

        /// Per-test time limit in seconds
        #[arg(long, default_value = "2")]
        time_limit: u64,

        /// Comparison mode: exact, token, or line
        #[arg(long, default_value = "line")]
        comparator: String,
    },

    /// List available languages
    Languages,

    /// Show default configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Judge {
            source,
            language,
            testdata,
            time_limit,
            comparator,
            id,
            rejudge,
        } => {
            let comparator = parse_comparator(&comparator)?;
            run_judge(
                config, &source, &language, &testdata, time_limit, comparator, id, rejudge,
            )
            .await
        }
        Commands::Daemon {
            testdata,
            time_limit,
            comparator,
        } => {
            let comparator = parse_comparator(&comparator)?;
            run_daemon(config, &testdata, time_limit, comparator).await
        }
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            print!("{EXAMPLE_CONFIG}");
            Ok(())
        }
    }
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }
    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote configuration to {}", output.display());
    Ok(())
}

fn parse_comparator(name: &str) -> Result<ComparatorKind> {
    match name {
        "exact" => Ok(ComparatorKind::Exact),
        "token" => Ok(ComparatorKind::Token),
        "line" => Ok(ComparatorKind::Line),
        other => bail!("unknown comparator '{other}' (expected exact, token, or line)"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_judge(
    config: Config,
    source: &Path,
    language: &str,
    testdata: &Path,
    time_limit: u64,
    comparator: ComparatorKind,
    id: Option<String>,
    rejudge: bool,
) -> Result<()> {
    let source_bytes = std::fs::read(source)
        .with_context(|| format!("failed to read source file {}", source.display()))?;

    let id = id.unwrap_or_else(|| {
        source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "submission".to_string())
    });

    let submission = Submission::new(id, source_bytes, language, None);

    let tests = load_test_dir(testdata, time_limit, comparator)
        .with_context(|| format!("failed to load test data from {}", testdata.display()))?;
    if tests.is_empty() {
        bail!("no test cases found in {}", testdata.display());
    }
    info!(cases = tests.len(), "loaded test data");

    let pipeline = JudgePipeline::new(config).context("failed to initialize judging pipeline")?;

    let result = pipeline
        .judge(JudgeRequest {
            submission: &submission,
            tests: &tests,
            rejudge,
            cancel: Some(CancelToken::never()),
        })
        .await;

    let run = match result {
        Ok(run) => run,
        Err(JudgeError::AlreadyJudged { id, verdict }) => {
            println!("Submission '{id}' already judged: {verdict}");
            println!("Re-run with --rejudge to judge it again.");
            return Ok(());
        }
        Err(e) => return Err(e).context("judging failed"),
    };

    println!("Submission: {}", run.submission_id());
    println!("Workspace:  {}", run.workspace().display());

    if let Some(diagnostics) = run.compile_diagnostics() {
        println!("\nCompiler output:\n{diagnostics}");
    }

    if !run.tests().is_empty() {
        println!("\nTest cases:");
        for test in run.tests() {
            println!(
                "  {:<20} {:<18} {:>6} ms cpu  {:>8} KB",
                test.name,
                test.verdict.to_string(),
                test.cpu_time_ms,
                test.peak_memory_kb
            );
        }
    }

    let usage = run.usage();
    println!(
        "\nResources:  {} ms wall, {} KB peak",
        usage.total_wall_ms, usage.max_peak_memory_kb
    );
    match run.verdict() {
        Some(verdict) => println!("Verdict:    {verdict}"),
        None => println!("Verdict:    (none)"),
    }

    Ok(())
}

async fn run_daemon(
    config: Config,
    testdata: &Path,
    time_limit: u64,
    comparator: ComparatorKind,
) -> Result<()> {
    let tests = load_test_dir(testdata, time_limit, comparator)
        .with_context(|| format!("failed to load test data from {}", testdata.display()))?;
    if tests.is_empty() {
        bail!("no test cases found in {}", testdata.display());
    }
    info!(cases = tests.len(), "loaded test data");

    let pipeline = JudgePipeline::new(config).context("failed to initialize judging pipeline")?;
    let pool = WorkerPool::new(pipeline);

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, cancelling workers");
            handle.cancel();
        }
    });

    pool.run(Arc::new(tests), token)
        .await
        .context("worker pool failed")?;

    Ok(())
}

fn list_languages(config: &Config) {
    let mut ids: Vec<&String> = config.languages.keys().collect();
    ids.sort();

    println!("Available languages:");
    for id in ids {
        let language = &config.languages[id];
        let kind = if language.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        println!("  {:<12} {} ({kind})", id, language.name);
    }
}
