mod config;

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use kubetail_k8s::KubeClient;
use kubetail_logs::{
    FanInSink, LogFilter, OutputPipeline, Painter, SessionReport, SessionState, TailOrchestrator,
    tail_file,
};
use kubetail_types::{
    DEFAULT_NAMESPACE, DEFAULT_TAIL_LINES, ExcludeTag, MATCH_ALL, SourceQuery, TailOptions,
};

/// Kubetail - Tail logs from local files and Kubernetes pods
#[derive(Parser, Debug)]
#[command(name = "kubetail")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ~/.config/kubetail/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Show debug diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tail the containers of every pod matching a regex
    Pods(PodsArgs),
    /// Tail a local file
    File(FileArgs),
}

#[derive(clap::Args, Debug)]
struct PodsArgs {
    /// Regex matched against pod names
    #[arg(value_name = "POD_QUERY")]
    pod_query: String,

    /// Regex matched against container names
    #[arg(short, long, value_name = "REGEX", default_value = MATCH_ALL)]
    container: String,

    #[arg(short, long)]
    namespace: Option<String>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long)]
    context: Option<String>,

    /// Prefix every line with its pod/container
    #[arg(short, long, overrides_with = "no_display_names")]
    display_names: bool,

    /// Do not prefix lines, even if the config file asks for it
    #[arg(long, overrides_with = "display_names")]
    no_display_names: bool,

    /// JSON field to show after the message (repeatable)
    #[arg(long = "mdc", value_name = "FIELD")]
    mdcs: Vec<String>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(clap::Args, Debug)]
struct FileArgs {
    #[arg(value_name = "PATH")]
    path: PathBuf,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Number of historical lines per source
    #[arg(long, value_name = "N")]
    tail: Option<usize>,

    /// Keep streaming new lines
    #[arg(short, long)]
    follow: bool,

    /// Print lines unformatted
    #[arg(short, long, overrides_with = "no_raw")]
    raw: bool,

    /// Format lines, even if the config file asks for raw output
    #[arg(long, overrides_with = "raw")]
    no_raw: bool,

    /// Hide lines of a kind: access-logs or dd-logs (repeatable)
    #[arg(long = "exclude", value_name = "TAG")]
    excludes: Vec<String>,

    /// Only show lines matching this regex
    #[arg(long, value_name = "REGEX")]
    grep: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Diagnostics go to stderr so they never mix with tailed output
fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    match args.command {
        Command::Pods(pods) => tail_pods(pods, &config, cancel).await,
        Command::File(file) => tail_local_file(file, &config, cancel).await,
    }
}

async fn tail_pods(args: PodsArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    let namespace = args
        .namespace
        .or_else(|| config.namespace.clone())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    let mdcs = if args.mdcs.is_empty() {
        config.mdcs.clone()
    } else {
        args.mdcs
    };

    let options = resolve_options(&args.output, config, namespace)?
        .with_display_names(switch(
            args.display_names,
            args.no_display_names,
            config.display_names,
        ))
        .with_mdcs(mdcs);
    let query = SourceQuery::new(&args.pod_query, &args.container)?;
    let pipeline = build_pipeline(&args.output, &options)?;

    let context = args.context.as_deref().or(config.context.as_deref());
    let client = KubeClient::new(context).await?;

    let (sink, handle) = FanInSink::new(io::stdout(), pipeline);
    let writer = sink.with_cancellation(cancel.clone()).spawn();

    let follow = options.follow;
    let reports = TailOrchestrator::new(Arc::new(client), query, options, handle)
        .with_retry(config.retry_policy())
        .with_cancellation(cancel)
        .run()
        .await;

    writer
        .await
        .context("Output task failed")?
        .context("Failed to write output")?;

    let reports = reports.context("Failed to list pods")?;
    if reports.is_empty() && !follow {
        warn!(query = %args.pod_query, "no pod matched");
    }
    summarize(&reports);
    Ok(())
}

async fn tail_local_file(args: FileArgs, config: &Config, cancel: CancellationToken) -> Result<()> {
    let options = resolve_options(&args.output, config, DEFAULT_NAMESPACE.to_string())?
        .with_mdcs(config.mdcs.clone());
    let pipeline = build_pipeline(&args.output, &options)?;

    let (sink, handle) = FanInSink::new(io::stdout(), pipeline);
    let writer = sink.with_cancellation(cancel.clone()).spawn();

    let report = tail_file(&args.path, &options, config.poll_interval(), handle, cancel).await;

    writer
        .await
        .context("Output task failed")?
        .context("Failed to write output")?;

    let report = report.with_context(|| format!("Cannot tail {}", args.path.display()))?;
    summarize(&[report]);
    Ok(())
}

/// Command line first, then the config file, then built-in defaults
fn resolve_options(output: &OutputArgs, config: &Config, namespace: String) -> Result<TailOptions> {
    let tail = output.tail.or(config.tail).unwrap_or(DEFAULT_TAIL_LINES);

    let excludes = if output.excludes.is_empty() {
        config.excludes.clone()
    } else {
        output
            .excludes
            .iter()
            .map(|tag| ExcludeTag::from_str(tag))
            .collect::<kubetail_types::Result<Vec<_>>>()?
    };

    Ok(TailOptions::new(namespace, tail)?
        .with_follow(output.follow)
        .with_raw(switch(output.raw, output.no_raw, config.raw))
        .with_excludes(excludes))
}

/// An on/off flag pair over a config default
fn switch(on: bool, off: bool, config: bool) -> bool {
    match (on, off) {
        (true, _) => true,
        (_, true) => false,
        _ => config,
    }
}

fn build_pipeline(output: &OutputArgs, options: &TailOptions) -> Result<OutputPipeline> {
    let filter = match &output.grep {
        Some(pattern) => LogFilter::new().with_pattern(pattern)?,
        None => LogFilter::new(),
    };
    let painter = Painter::new(io::stdout().is_terminal());
    Ok(OutputPipeline::from_options(options, filter, painter))
}

fn summarize(reports: &[SessionReport]) {
    for report in reports {
        debug!(
            source = %report.identity,
            state = %report.state,
            lines = report.lines,
            error = report.error.as_deref().unwrap_or(""),
            "session summary"
        );
    }

    let failed = reports
        .iter()
        .filter(|r| r.state == SessionState::FailedPermanently)
        .count();
    if failed > 0 {
        warn!(failed, total = reports.len(), "some sources could not be tailed");
    }
}
