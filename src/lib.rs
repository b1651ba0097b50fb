//! Arrival: a constant-arrival-rate load generator for Rust.
//!
//! Most load tools run a fixed number of virtual users in a loop, so when the
//! target slows down the offered load drops with it (a closed model).
//! Arrival starts requests on a fixed schedule instead: `rate` iterations per
//! `time_unit` for `duration`, whatever the latency (an open model). When the
//! worker pool cannot keep up, the missed ticks are counted as dropped rather
//! than queued, so a report always tells generator limits apart from target
//! failures.
//!
//! # Architecture
//!
//! - [`Scenario`]: a named action producing an [`Outcome`](metric::Outcome).
//! - [`ScheduleConfig`]: rate, duration, worker pool bounds, timeouts.
//! - [`Executor`]: runs a scenario. [`ArrivalRateExecutor`] is the
//!   constant-arrival-rate strategy, composed of a clock, a worker pool, a
//!   dispatcher, a request executor and a run controller (see [`executor`]).
//! - [`RequestResult`](metric::RequestResult): one observed request, streamed
//!   live to a [`ResultSink`](report::ResultSink).
//! - [`Summary`](aggregate::Summary) and [`RunReport`](report::RunReport): the
//!   final accounting, handed to a [`Reporter`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use arrival::{ArrivalRateExecutor, Executor, Reporter, Scenario, ScheduleConfig};
//! use arrival::{metric::Outcome, report::StdoutReporter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ScheduleConfig::builder()
//!         .rate(100.0)
//!         .duration(Duration::from_secs(30))
//!         .pre_allocated_workers(101)
//!         .build();
//!     let scenario = Scenario::builder()
//!         .name("noop")
//!         .action(|| async { Outcome::Success(200) })
//!         .build();
//!
//!     let report = ArrivalRateExecutor::new(config).exec(&scenario).await?;
//!     StdoutReporter.report(&report).await
//! }
//! ```
//!
//! # Feature flags
//! - `http` (default): [`http::get_action`] and a preconfigured `reqwest` client.
//! - `cli`: the `arrival` command line binary.

/// Result accumulation
pub mod aggregate;
/// Schedule configuration
pub mod config;
pub mod error;
/// Scheduling and execution of scenarios
pub mod executor;
#[cfg(feature = "http")]
pub mod http;
/// Per-request results
pub mod metric;
/// Final reports, reporters and live result sinks
pub mod report;
pub mod scenario;

pub use config::{Backpressure, ScheduleConfig};
pub use error::{ConfigError, Error};
pub use executor::{ArrivalRateExecutor, Canceller, Executor, RunController, RunHandle};
pub use report::{Reporter, RunReport};
pub use scenario::Scenario;
