//! fleetexec CLI
//!
//! Runs one shell command across many hosts

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use eyre::{bail, eyre};
use fleetexec_core::{Coordinator, CoreError, RunEvent, RunReport, Strategy, UnitState};
use fleetexec_exec::{Command, Host};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod factory;
mod work;

use config::Config;
use factory::{BackendKind, DefaultBackendFactory};
use work::{CommandOutput, CommandWork, Mode, parse_options};

#[derive(Parser, Debug)]
#[command(name = "fleetexec", version)]
#[command(about = "Run shell commands across many hosts", long_about = None)]
struct Cli {
    /// Config file (default: FLEETEXEC_CONFIG, ./fleetexec.toml, system and user config dirs)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target hosts as `[user@]address[:port]`, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    hosts: Vec<Host>,

    /// Only configured hosts carrying one of these tags
    #[arg(long, global = true, value_delimiter = ',')]
    tags: Vec<String>,

    #[arg(long, global = true, value_enum)]
    backend: Option<BackendKind>,

    /// sequential, parallel, limited:N or groups:N
    #[arg(long, global = true)]
    strategy: Option<Strategy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command, failing on non-zero exit
    Exec(CommandArgs),
    /// Run a command and report whether it exited 0
    Test(CommandArgs),
    /// Run a command and print its trimmed stdout
    Capture(CommandArgs),
    /// Print the rendered command without running it
    Render(CommandArgs),
    /// List target hosts
    Hosts,
}

#[derive(Args, Debug)]
struct CommandArgs {
    /// Command option as KEY=VALUE (in, env, user, group, run_in_background, ...)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Verb and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl CommandArgs {
    fn split(&self) -> Result<(String, Vec<String>)> {
        let (verb, args) = self
            .command
            .split_first()
            .ok_or_else(|| eyre!("missing command"))?;
        Ok((verb.clone(), args.to_vec()))
    }
}

/// One host's line in `--json` output
#[derive(Serialize)]
struct HostResult<'a> {
    host: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    #[serde(flatten)]
    output: &'a CommandOutput,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Config::locate);
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    init_tracing(
        cli.log_level.as_deref().unwrap_or(&config.run.log_level),
        cli.log_json,
    );
    match &config_path {
        Some(path) => debug!(path = %path.display(), "loaded config"),
        None => warn!("no config file found, using defaults"),
    }

    let hosts = select_hosts(&cli, &config);

    match &cli.command {
        Commands::Hosts => {
            for host in &hosts {
                println!("{host}\t{}", host.tags().join(","));
            }
            Ok(())
        }
        Commands::Render(args) => render(args, &hosts, &config),
        Commands::Exec(args) => run(&cli, &config, hosts, Mode::Exec, args).await,
        Commands::Test(args) => run(&cli, &config, hosts, Mode::Test, args).await,
        Commands::Capture(args) => run(&cli, &config, hosts, Mode::Capture, args).await,
    }
}

fn init_tracing(level: &str, json: bool) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr; stdout carries command output
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn select_hosts(cli: &Cli, config: &Config) -> Vec<Host> {
    if cli.hosts.is_empty() {
        config.hosts_tagged(&cli.tags)
    } else {
        cli.hosts.clone()
    }
}

fn render(args: &CommandArgs, hosts: &[Host], config: &Config) -> Result<()> {
    let (verb, rest) = args.split()?;
    let options = parse_options(&args.options)?;

    let targets = if hosts.is_empty() {
        vec![Host::new("localhost")]
    } else {
        hosts.to_vec()
    };
    for host in targets {
        let command = Command::new(
            &verb,
            rest.iter().map(String::as_str),
            options.clone(),
            Arc::new(host),
            &config.backend,
        )?;
        println!("{}\t{}", command.host(), command.to_command());
    }
    Ok(())
}

async fn run(cli: &Cli, config: &Config, hosts: Vec<Host>, mode: Mode, args: &CommandArgs) -> Result<()> {
    if hosts.is_empty() {
        bail!("no hosts given; use --hosts or add [[host]] tables to the config");
    }

    let (verb, rest) = args.split()?;
    let options = parse_options(&args.options)?;
    options.validate()?;

    let strategy = cli.strategy.unwrap_or(config.run.strategy);
    let kind = cli.backend.unwrap_or(config.run.backend);
    info!(hosts = hosts.len(), %strategy, backend = ?kind, "running {verb}");

    let factory = DefaultBackendFactory::new(
        kind,
        Arc::new(config.backend.clone()),
        config.ssh.provider(),
    );
    let coordinator = Coordinator::new(Arc::new(factory));
    tokio::spawn(log_progress(coordinator.subscribe()));

    let work = Arc::new(CommandWork::new(mode, verb, rest, options));
    match coordinator.run(&hosts, strategy, work).await {
        Ok(report) => print_report(&report, mode, cli.json),
        Err(CoreError::Aggregate(aggregate)) => {
            for failure in &aggregate.failures {
                eprintln!("{}: {}", failure.host, failure.error);
            }
            for host in &aggregate.skipped {
                eprintln!("{host}: skipped");
            }
            Err(eyre!(
                "{} of {} hosts failed",
                aggregate.failures.len(),
                hosts.len()
            ))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &RunReport<CommandOutput>, mode: Mode, json: bool) -> Result<()> {
    if json {
        let results: Vec<HostResult<'_>> = report
            .outcomes
            .iter()
            .map(|o| HostResult {
                host: o.host.to_string(),
                started_at: o.started_at,
                finished_at: o.finished_at,
                output: &o.value,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for outcome in &report.outcomes {
            match &outcome.value {
                CommandOutput::Executed { stdout, status, .. } => {
                    for line in stdout.lines() {
                        println!("[{}] {line}", outcome.host);
                    }
                    debug!(host = %outcome.host, %status, "command finished");
                }
                CommandOutput::Tested { passed } => println!("{}: {passed}", outcome.host),
                CommandOutput::Captured { output } => println!("{}: {output}", outcome.host),
            }
        }
    }

    if mode == Mode::Test {
        let failed = report
            .values()
            .filter(|v| matches!(v, CommandOutput::Tested { passed: false }))
            .count();
        if failed > 0 {
            bail!("test failed on {failed} of {} hosts", report.len());
        }
    }
    Ok(())
}

async fn log_progress(mut events: broadcast::Receiver<RunEvent>) {
    loop {
        match events.recv().await {
            Ok(RunEvent::UnitStateChanged { host, to, .. }) if to == UnitState::Running => {
                debug!(host = %host, "started");
            }
            Ok(RunEvent::GroupFinished { group, hosts, failed }) => {
                info!(group, hosts, failed, "group finished");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "progress events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
