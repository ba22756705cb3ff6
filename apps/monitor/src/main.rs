use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info, warn};

use dns_latency_monitor::config::Config;
use dns_latency_monitor::database::{self, LibsqlStatsStore};
use dns_latency_monitor::resolver::{Resolver, StubProbe};
use dns_latency_monitor::{ExecutionMode, MonitorCoordinator, MonitorError, StoreGate};

/// Store DNS resolution latency statistics in a libsql database
#[derive(Debug, Parser)]
#[command(name = "dns-latency-monitor", version, about)]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/dns-latency-monitor/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database: local path, :memory:, or libsql:// URL (mandatory)
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Auth token for a remote database
    #[arg(long, global = true, env = "DNS_MONITOR_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe the target domains (default)
    Run,
    /// Print the stored latency aggregates
    Stats,
    /// Print the effective configuration
    ShowConfig,
}

/// Run settings, accepted before or after the subcommand.
#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Seconds between two probes of the same domain (0 runs nothing)
    #[arg(short, long, global = true)]
    frequency: Option<u64>,

    /// Probe cycles per domain (0 runs until interrupted)
    #[arg(short, long, global = true)]
    cycles: Option<u64>,

    /// Number of top-ranked domains to monitor
    #[arg(short = 'n', long = "top", global = true)]
    top_domains: Option<usize>,

    /// Probe all domains one after another on a single task
    #[arg(long, global = true)]
    sequential: bool,

    /// Upstream nameserver (ip or ip:port), repeatable
    #[arg(long = "nameserver", global = true)]
    nameservers: Vec<String>,

    /// Resolver timeout per request, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Resolver attempts per server
    #[arg(long, global = true)]
    attempts: Option<usize>,
}

impl Cli {
    /// Command-line values take precedence over the file.
    fn apply(&self, config: &mut Config) {
        if let Some(database) = &self.database {
            config.store.database = Some(database.clone());
        }
        if let Some(token) = &self.auth_token {
            config.store.auth_token = Some(token.clone());
        }

        let run = &self.run;
        if let Some(frequency) = run.frequency {
            config.monitor.frequency_seconds = frequency;
        }
        if let Some(cycles) = run.cycles {
            config.monitor.cycles = cycles;
        }
        if let Some(top) = run.top_domains {
            config.monitor.top_domains = top;
        }
        if run.sequential {
            config.monitor.mode = ExecutionMode::Sequential;
        }
        if !run.nameservers.is_empty() {
            config.resolver.nameservers = run.nameservers.clone();
        }
        if let Some(timeout) = run.timeout {
            config.resolver.timeout_seconds = timeout;
        }
        if let Some(attempts) = run.attempts {
            config.resolver.attempts = attempts;
        }
    }
}

/// Configuration problems are reported as usage errors before anything
/// else starts.
fn usage_error(err: impl std::fmt::Display) -> ! {
    Cli::command().error(ErrorKind::ValueValidation, err).exit()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_tracing(logger::level_from_verbosity(cli.verbose, cli.quiet));

    let mut config = Config::from_config(cli.config.as_ref()).unwrap_or_else(|e| usage_error(e));
    cli.apply(&mut config);

    if matches!(cli.command, Some(Command::ShowConfig)) {
        print!("{config}");
        return Ok(());
    }

    if let Err(e) = config.validate() {
        usage_error(e);
    }
    debug!("{}", config);

    let database = config.database()?;
    let pool = database::connect(database, config.store.auth_token.as_deref())
        .await
        .map_err(|e| MonitorError::Connectivity(format!("{e:#}")))?;
    let store = Arc::new(StoreGate::new(Arc::new(LibsqlStatsStore::new(pool))));

    match cli.command {
        Some(Command::Stats) => print_stats(&store).await,
        _ => monitor(&config, store).await,
    }
}

async fn monitor(config: &Config, store: Arc<StoreGate>) -> Result<()> {
    let resolver: Arc<dyn Resolver> = Arc::new(StubProbe::new(&config.resolver_settings()?)?);
    let coordinator = MonitorCoordinator::load(store, resolver, config.monitor.top_domains).await?;

    let token = coordinator.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping workers after their current cycle");
                token.cancel();
            }
            Err(e) => warn!("Cannot listen for interrupts: {}", e),
        }
    });

    let report = coordinator.start(config.run_config(), config.monitor.mode).await;

    for worker in &report.workers {
        info!(
            domain = %worker.domain.name,
            cycles = worker.cycles_completed,
            samples = worker.samples_recorded,
            probe_failures = worker.probe_failures,
            store_failures = worker.store_failures,
            "Worker summary"
        );
    }
    for failure in &report.failed_to_start {
        warn!("{} was not monitored: {}", failure.domain, failure.error);
    }

    Ok(())
}

async fn print_stats(store: &StoreGate) -> Result<()> {
    let stats = store.domain_stats().await?;

    println!(
        "{:>4}  {:<24} {:>10} {:>10} {:>8}  {:<19}  {:<19}",
        "rank", "domain", "mean ms", "stdev ms", "samples", "first observed", "last observed"
    );
    for row in stats {
        match row.aggregate {
            Some(agg) => println!(
                "{:>4}  {:<24} {:>10.3} {:>10.3} {:>8}  {:<19}  {:<19}",
                row.rank,
                row.domain.name,
                agg.mean_ms,
                agg.stdev_ms,
                agg.sample_count,
                agg.first_observed_at.format("%Y-%m-%d %H:%M:%S"),
                agg.last_observed_at.format("%Y-%m-%d %H:%M:%S"),
            ),
            None => println!("{:>4}  {:<24} {:>10} {:>10} {:>8}", row.rank, row.domain.name, "-", "-", 0),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_work_with_and_without_subcommand() {
        for args in [
            &["dns-latency-monitor", "-d", "latency.db", "run", "--cycles", "2", "-f", "5"][..],
            &["dns-latency-monitor", "-d", "latency.db", "--cycles", "2", "-f", "5"][..],
            &["dns-latency-monitor", "--cycles", "2", "run", "-d", "latency.db", "-f", "5"][..],
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            assert_eq!(cli.run.cycles, Some(2));
            assert_eq!(cli.run.frequency, Some(5));
            assert_eq!(cli.database.as_deref(), Some("latency.db"));
        }
    }

    #[test]
    fn overrides_replace_file_values() {
        let cli = Cli::try_parse_from([
            "dns-latency-monitor",
            "run",
            "--sequential",
            "--top",
            "3",
            "--nameserver",
            "192.0.2.1",
            "--attempts",
            "4",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.monitor.mode, ExecutionMode::Sequential);
        assert_eq!(config.monitor.top_domains, 3);
        assert_eq!(config.resolver.nameservers, ["192.0.2.1"]);
        assert_eq!(config.resolver.attempts, 4);
    }
}
