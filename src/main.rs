use std::{path::PathBuf, time::Duration};

use arrival::{
    ArrivalRateExecutor, Backpressure, ConfigError, Reporter, Scenario, ScheduleConfig,
    http::{client, get_action},
    report::{JsonReporter, LogSink, StdoutReporter},
};
use clap::Parser;
use reqwest::{
    Url,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Drive a URL with a constant arrival rate of GET requests.
#[derive(Debug, Clone, Parser)]
#[command(name = "arrival")]
#[command(version, about, long_about = None)]
struct Args {
    /// target to GET on every tick
    #[arg(long, env = "ARRIVAL_URL")]
    url: Url,

    /// iterations started per time unit
    #[arg(long, default_value_t = 100.0)]
    rate: f64,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    time_unit: Duration,

    /// how long ticks are emitted for
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    duration: Duration,

    #[arg(long, value_name = "N", default_value_t = 101)]
    pre_allocated_workers: usize,

    /// upper bound for lazy pool growth (unbounded if not set)
    #[arg(long, value_name = "N")]
    max_workers: Option<usize>,

    /// per-request timeout
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    timeout: Duration,

    /// ceiling on the drain phase, defaults to the request timeout
    #[arg(long, value_parser = humantime::parse_duration)]
    drain_timeout: Option<Duration>,

    /// wait up to this long for a free worker before dropping a tick
    #[arg(long, value_parser = humantime::parse_duration)]
    grace: Option<Duration>,

    /// extra request header, `name: value` (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,

    /// JSON schedule file; replaces every schedule flag above
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// print the final report as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn schedule(&self) -> Result<ScheduleConfig, ConfigError> {
        if let Some(path) = &self.config {
            return ScheduleConfig::from_json_file(path);
        }
        let mut config = ScheduleConfig::builder()
            .rate(self.rate)
            .time_unit(self.time_unit)
            .duration(self.duration)
            .pre_allocated_workers(self.pre_allocated_workers)
            .request_timeout(self.timeout)
            .build();
        config.max_workers = self.max_workers;
        config.drain_timeout = self.drain_timeout;
        if let Some(grace) = self.grace {
            config.backpressure = Backpressure::Wait { grace };
        }
        Ok(config)
    }
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `name: value`, got `{raw}`"))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.schedule()?;
    let headers: HeaderMap = args.headers.iter().cloned().collect();
    let client = client(config.request_timeout, headers)?;

    let scenario = Scenario::builder()
        .name(format!("GET {}", args.url))
        .action(get_action(client, args.url.clone()))
        .build();
    let progress = LogSink::new(config.rate_per_second().ceil() as u64);
    let handle = ArrivalRateExecutor::new(config).start(scenario, progress)?;

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let report = handle.completion().await?;
    if args.json {
        JsonReporter { pretty: true }.report(&report).await
    } else {
        StdoutReporter.report(&report).await
    }
}
