use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use sim_contract::config::BASE_URL_ENV;
use sim_contract::{CheckError, ReadinessPolicy, RunnerConfig, Target};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Validate a running simulator against the cartridge API contract.
#[derive(Debug, Parser)]
#[command(name = "validate-sim-api", version)]
struct Cli {
    /// Base URL of the simulator. Falls back to $KEYMAKER_API_BASE, then
    /// http://127.0.0.1:8080.
    #[arg(long)]
    base_url: Option<String>,

    /// How long to wait for the info endpoint to come up.
    #[arg(long, default_value_t = 5000)]
    ready_timeout_ms: u64,

    /// Delay between readiness polls.
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Per-request timeout.
    #[arg(long, default_value_t = 5000)]
    request_timeout_ms: u64,
}

impl Cli {
    fn into_config(self) -> Result<RunnerConfig, CheckError> {
        // An empty value is an error, not a request for the default.
        let env = std::env::var(BASE_URL_ENV).ok();
        let target = Target::resolve(self.base_url.as_deref(), env.as_deref())?;
        let mut config = RunnerConfig::new(target);
        config.readiness = ReadinessPolicy {
            timeout: Duration::from_millis(self.ready_timeout_ms),
            interval: Duration::from_millis(self.poll_interval_ms),
        };
        config.request_timeout = Duration::from_millis(self.request_timeout_ms);
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = Cli::parse()
        .into_config()
        .and_then(|config| sim_contract::validate(&config));

    match result {
        Ok(report) => {
            info!(?report, "contract satisfied");
            println!("ok");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("validate_sim_api: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
