use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gpumon_core::config::{DEFAULT_DATABASE, DEFAULT_SMI_PROGRAM};
use gpumon_services::{
    encode_report, now_ns, render_payload, Agent, AgentConfig, FileSource, ReportSource,
    SmiRunner, UnparsedPolicy,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gpumon")]
#[command(about = "GPU monitor - feeds nvidia-smi telemetry to InfluxDB", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Sample and publish on every interval until stopped (default)
    Run,

    /// Run a single cycle and exit
    Once {
        /// Print the cycle summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the line protocol payload without contacting InfluxDB
    Dump {
        /// Read a captured `nvidia-smi -q -x` report instead of running the tool
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct Settings {
    /// InfluxDB base URL, e.g. http://influxdb:8086
    #[arg(long, env = "INFLUXDB_ADDR", global = true)]
    influxdb_addr: Option<String>,

    /// Target database
    #[arg(long, default_value = DEFAULT_DATABASE, global = true)]
    database: String,

    /// Value of the hostname tag (defaults to the OS hostname)
    #[arg(long, env = "NODE_NAME", global = true)]
    hostname: Option<String>,

    /// Seconds between cycles
    #[arg(long, default_value_t = 5, global = true)]
    interval_secs: u64,

    /// Diagnostic program to run
    #[arg(long, default_value = DEFAULT_SMI_PROGRAM, global = true)]
    smi_program: String,

    /// Seconds before the diagnostic program is killed
    #[arg(long, default_value_t = 10, global = true)]
    command_timeout_secs: u64,

    /// Seconds before an InfluxDB request is abandoned
    #[arg(long, default_value_t = 5, global = true)]
    http_timeout_secs: u64,

    /// Handling of unparseable readings (zero, skip)
    #[arg(long, default_value = "zero", global = true)]
    unparsed: UnparsedPolicy,
}

impl Settings {
    fn into_config(self) -> Result<AgentConfig> {
        let hostname = match self.hostname {
            Some(name) => name,
            None => hostname::get()
                .context("resolve hostname")?
                .to_string_lossy()
                .into_owned(),
        };

        let mut config = AgentConfig::new(self.influxdb_addr.unwrap_or_default(), hostname);
        config.database = self.database;
        config.interval = Duration::from_secs(self.interval_secs);
        config.smi_program = self.smi_program;
        config.command_timeout = Duration::from_secs(self.command_timeout_secs);
        config.http_timeout = Duration::from_secs(self.http_timeout_secs);
        config.unparsed_policy = self.unparsed;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.settings.into_config()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(config).await?,
        Commands::Once { json } => cmd_once(config, json).await?,
        Commands::Dump { file } => cmd_dump(config, file).await?,
    }

    Ok(())
}

async fn cmd_run(config: AgentConfig) -> Result<()> {
    let runner = SmiRunner::from_config(&config);
    let agent = Agent::new(config, runner).context("invalid agent configuration")?;
    agent.run(wait_for_shutdown()).await;
    Ok(())
}

async fn cmd_once(config: AgentConfig, json: bool) -> Result<()> {
    let runner = SmiRunner::from_config(&config);
    let agent = Agent::new(config, runner).context("invalid agent configuration")?;
    let summary = agent.run_cycle().await.context("cycle failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Devices:   {}", summary.devices);
        println!("Points:    {}", summary.points);
        println!("Timestamp: {}", summary.timestamp_ns);
    }
    Ok(())
}

async fn cmd_dump(config: AgentConfig, file: Option<PathBuf>) -> Result<()> {
    let source: Box<dyn ReportSource> = match file {
        Some(path) => Box::new(FileSource::new(path)),
        None => Box::new(SmiRunner::from_config(&config)),
    };

    let report = source.sample().await.context("sample GPU report")?;
    info!(
        driver = %report.driver_version,
        attached = report.attached_gpus,
        devices = report.device_count(),
        "Report decoded"
    );

    let points = encode_report(&report, &config.hostname, now_ns(), config.unparsed_policy);
    println!("{}", render_payload(&points));
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            }
            _ => {
                warn!("Failed to install signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_settings_into_config() {
        let cli = Cli::try_parse_from([
            "gpumon",
            "--influxdb-addr",
            "http://influxdb:8086",
            "--hostname",
            "node-7",
            "--interval-secs",
            "7",
            "--unparsed",
            "skip",
            "once",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.command, Some(Commands::Once { json: true }));

        let config = cli.settings.into_config().unwrap();
        assert_eq!(config.write_url(), "http://influxdb:8086/write");
        assert_eq!(config.hostname, "node-7");
        assert_eq!(config.database, "GPU");
        assert_eq!(config.interval, Duration::from_secs(7));
        assert_eq!(config.command_timeout, Duration::from_secs(10));
        assert_eq!(config.unparsed_policy, UnparsedPolicy::Skip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gpumon",
            "dump",
            "--file",
            "report.xml",
            "--hostname",
            "node-7",
            "--database",
            "telemetry",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Some(Commands::Dump {
                file: Some(PathBuf::from("report.xml"))
            })
        );
        assert_eq!(cli.settings.database, "telemetry");
    }

    #[test]
    fn test_rejects_unknown_policy() {
        assert!(Cli::try_parse_from(["gpumon", "--unparsed", "drop"]).is_err());
    }
}
