use std::{path::PathBuf, process::ExitCode, time::Duration};

use aleph_router::{
    default_config_dir, dynamic_routing::optimizer::CycleOutcome, AlephRouter,
    AlephRouterBuilder, Endpoint, ProcessCall, RoutingTable,
};
use anyhow::{Context, Result};
use clap::{crate_authors, crate_version, ArgAction, Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::info;

mod logging;

#[derive(Parser)]
#[command(
    version = crate_version!(),
    author = crate_authors!(),
    propagate_version = true
)]
pub(crate) struct Opts {
    /// Verbose level. By default, INFO will be used. Add a single `-v` to upgrade to
    /// DEBUG, and another `-v` to upgrade to TRACE.
    #[arg(long, short('v'), action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet level. The opposite of verbose. A single `-q` will drop the logging to
    /// WARN only, then another one to ERROR. Another `-q` will silence ALL logs.
    #[arg(long, short('q'), action = ArgAction::Count, global = true)]
    quiet: u8,

    /// Directory holding the learning data and router state. Defaults to `$ALEPH_HOME`,
    /// then `$ALEPH_CONFIG_HOME`, then `.aleph-im` next to this executable.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Do not read or write any file; everything learned is lost on exit.
    #[arg(long, global = true, conflicts_with = "config_dir")]
    ephemeral: bool,

    /// An official endpoint. Can be repeated; replaces the built-in official pool.
    #[arg(long = "official", value_name = "URL", global = true)]
    officials: Vec<String>,

    /// Timeout of one health probe.
    #[arg(long, value_parser = humantime::parse_duration, global = true)]
    probe_timeout: Option<Duration>,

    #[command(subcommand)]
    subcommand: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Measures the candidate endpoints and prints the resulting routing table.
    Optimize(OptimizeOpts),

    /// Prints the learned endpoint statistics as JSON.
    Stats,

    /// Runs a command against the best endpoint, failing over to the next ones.
    Exec(ExecOpts),
}

#[derive(Args)]
struct OptimizeOpts {
    /// Keep optimizing in the background until Ctrl-C.
    #[arg(long)]
    watch: bool,

    /// Pause between two cycles with `--watch`.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
    period: Duration,
}

#[derive(Args)]
struct ExecOpts {
    /// Kill each attempt of the command after this long, e.g. `90s`.
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Use the stored routing as is instead of measuring first.
    #[arg(long)]
    skip_optimize: bool,

    /// Read standard input once and feed it to every attempt.
    #[arg(long)]
    forward_stdin: bool,

    /// The program to run, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn router_builder(opts: &Opts) -> Result<AlephRouterBuilder> {
    let mut builder = AlephRouter::builder();
    if !opts.ephemeral {
        if let Some(dir) = opts.config_dir.clone().or_else(default_config_dir) {
            info!("Using configuration directory {}", dir.display());
            builder = builder.with_config_dir(dir);
        }
    }
    if !opts.officials.is_empty() {
        let officials = opts
            .officials
            .iter()
            .map(Endpoint::new)
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid --official endpoint")?;
        builder = builder.with_official_endpoints(officials);
    }
    if let Some(timeout) = opts.probe_timeout {
        builder = builder.with_probe_timeout(timeout);
    }
    Ok(builder)
}

fn print_routing_table(table: &RoutingTable) {
    for (idx, endpoint) in table.ordered_endpoints().iter().enumerate() {
        let marker = if Some(endpoint) == table.active_endpoint() {
            "*"
        } else {
            " "
        };
        println!("{marker} {:>2}. {endpoint}", idx + 1);
    }
}

async fn optimize(opts: &Opts, optimize_opts: &OptimizeOpts) -> Result<()> {
    let router = router_builder(opts)?
        .with_optimize_period(optimize_opts.period)
        .build()
        .context("Failed to build the router")?;

    if optimize_opts.watch {
        router.start();
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        router.stop().await;
    } else {
        match router.optimizer().run_cycle().await {
            CycleOutcome::Switched { winner, rank } => info!("Selected {winner} (rank {rank:.1})"),
            CycleOutcome::Kept { best, .. } => info!("Kept the current routing, best was {best}"),
            CycleOutcome::NoHealthyCandidates => info!("No endpoint answered its probe"),
        }
    }
    print_routing_table(&router.routing_table());
    Ok(())
}

fn stats(opts: &Opts) -> Result<()> {
    let router = router_builder(opts)?
        .build()
        .context("Failed to build the router")?;
    let officials = &router.config().official_endpoints;

    let mut report = serde_json::Map::new();
    for (url, stat) in router.memory().snapshot() {
        let is_official = officials.iter().any(|official| official.as_str() == url);
        let mut entry = serde_json::to_value(&stat)?;
        if let Some(fields) = entry.as_object_mut() {
            fields.insert("predicted".to_string(), stat.predicted(is_official).into());
        }
        report.insert(url, entry);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn exec(opts: &Opts, exec_opts: &ExecOpts) -> Result<ExitCode> {
    let (program, args) = exec_opts
        .command
        .split_first()
        .context("Missing the program to run")?;
    let mut call = ProcessCall::new(program.clone(), args.iter().cloned());
    if let Some(timeout) = exec_opts.timeout {
        call = call.with_timeout(timeout);
    }
    if exec_opts.forward_stdin {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("Failed to read standard input")?;
        call = call.with_stdin(input);
    }

    let router = router_builder(opts)?
        .build()
        .context("Failed to build the router")?;
    if !exec_opts.skip_optimize {
        router.optimizer().run_cycle().await;
    }

    let output = router.execute(&call).await;
    print!("{}", output.stdout);
    if !output.stderr.is_empty() {
        eprintln!("{}", output.stderr.trim_end());
    }
    Ok(ExitCode::from(u8::try_from(output.exit_code).unwrap_or(1)))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let opts: Opts = Opts::parse();
    logging::setup_logging(&opts);

    match &opts.subcommand {
        SubCommand::Optimize(optimize_opts) => optimize(&opts, optimize_opts).await?,
        SubCommand::Stats => stats(&opts)?,
        SubCommand::Exec(exec_opts) => return exec(&opts, exec_opts).await,
    }
    Ok(ExitCode::SUCCESS)
}
