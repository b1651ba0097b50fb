//! Executor: open-model scheduling of a `Scenario`.
//!
//! The `Executor` trait is the runtime that executes a `Scenario`. This crate
//! ships one strategy, [`ArrivalRateExecutor`], which starts iterations at a
//! fixed arrival rate no matter how long each one takes.
//!
//! # High-level flow
//! 1. The [`ScheduleConfig`] is validated; an invalid schedule never starts.
//! 2. The [`WorkerPool`](pool::WorkerPool) is built with its pre-allocated
//!    workers before the clock starts, so the first ticks do not pay for
//!    allocation.
//! 3. The [`Ticker`](clock::Ticker) emits tick `n` at `start + n / rate`.
//!    Targets are absolute, so dispatch latency makes ticks late but never
//!    shifts the schedule.
//! 4. The [`Dispatcher`](dispatch::Dispatcher) binds each tick to an idle
//!    worker (growing the pool up to `max_workers`) and spawns the request.
//!    With no worker available the tick is dropped and counted, never
//!    queued.
//! 5. Each request runs on its own task under a timeout, publishes a
//!    [`RequestResult`](crate::metric::RequestResult) and releases its worker.
//! 6. When the duration elapses (or the run is cancelled) the controller stops
//!    emitting and drains in-flight requests. Anything still running at the
//!    drain ceiling is aborted and recorded as
//!    [`AbortedAtDrain`](crate::metric::ErrorKind::AbortedAtDrain).
//!
//! # Accounting
//! For every published [`RunState`](state::RunState),
//! `ticks_dispatched + ticks_dropped == ticks_emitted`. A dropped tick is a
//! generator limitation (not enough workers), a failed request is a target
//! limitation; the two are reported separately.
//!
//! # Tuning knobs
//! - `pre_allocated_workers`: roughly `rate × expected latency`, plus headroom.
//! - `max_workers`: upper bound for lazy growth when latency spikes.
//! - `backpressure`: drop immediately (default) or wait a short grace period
//!   for a worker to come back.
pub mod clock;
pub mod controller;
pub mod dispatch;
pub mod pool;
pub mod request;
pub mod state;

pub use controller::{Canceller, RunController, RunHandle};

use std::future::Future;

use crate::{
    config::ScheduleConfig,
    error::{ConfigError, Error},
    metric::Outcome,
    report::{ResultSink, RunReport},
    scenario::Scenario,
};

/// The runtime hook that executes a `Scenario`.
///
/// `Executor` defines the execution strategy for a given scenario and
/// returns the final [`RunReport`].
pub trait Executor<F, Fut>
where
    Self: Send + Sync + Sized,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    type Error;
    /// Execute the scenario to completion.
    fn exec(
        &self,
        scenario: &Scenario<F>,
    ) -> impl Future<Output = Result<RunReport, Self::Error>> + Send;
}

/// Constant-arrival-rate executor.
///
/// # Example
/// ```rust,no_run
/// use std::time::Duration;
/// use arrival::{ArrivalRateExecutor, Executor, Scenario, ScheduleConfig, metric::Outcome};
///
/// # async fn run() -> Result<(), arrival::Error> {
/// let executor = ArrivalRateExecutor::new(
///     ScheduleConfig::builder()
///         .rate(100.0)
///         .duration(Duration::from_secs(30))
///         .pre_allocated_workers(101)
///         .build(),
/// );
/// let scenario = Scenario::builder()
///     .name("noop")
///     .action(|| async { Outcome::Success(200) })
///     .build();
/// let report = executor.exec(&scenario).await?;
/// println!("{report}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ArrivalRateExecutor {
    config: ScheduleConfig,
}

impl ArrivalRateExecutor {
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Prepare a run without starting it, e.g. to grab a
    /// [`Canceller`] or a state subscription first.
    pub fn controller<F, Fut, S>(
        &self,
        scenario: Scenario<F>,
        sink: S,
    ) -> Result<RunController<F, S>, ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
        S: ResultSink,
    {
        RunController::new(scenario, self.config.clone(), sink)
    }

    /// Validate and start a run in the background.
    pub fn start<F, Fut, S>(&self, scenario: Scenario<F>, sink: S) -> Result<RunHandle, ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
        S: ResultSink,
    {
        Ok(self.controller(scenario, sink)?.start())
    }
}

impl<F, Fut> Executor<F, Fut> for ArrivalRateExecutor
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    type Error = Error;

    async fn exec(&self, scenario: &Scenario<F>) -> Result<RunReport, Self::Error> {
        tracing::info!(scenario = %scenario.name, "Executing scenario");
        self.start(scenario.clone(), ())?.completion().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn exec_runs_to_completion() {
        let executor = ArrivalRateExecutor::new(
            ScheduleConfig::builder()
                .rate(50.0)
                .duration(Duration::from_secs(1))
                .pre_allocated_workers(2)
                .build(),
        );
        let scenario = Scenario::builder()
            .name("noop")
            .action(|| async { Outcome::Success(204) })
            .build();

        let report = executor.exec(&scenario).await.unwrap();
        assert_eq!(report.scenario, "noop");
        assert_eq!(report.state.ticks_emitted, 50);
        assert!(report.state.is_balanced());
        assert_eq!(report.summary.succeeded, report.state.ticks_dispatched);
    }

    #[tokio::test]
    async fn exec_rejects_invalid_config() {
        let executor = ArrivalRateExecutor::new(
            ScheduleConfig::builder()
                .rate(10.0)
                .duration(Duration::ZERO)
                .build(),
        );
        let scenario = Scenario::builder()
            .name("noop")
            .action(|| async { Outcome::Success(200) })
            .build();

        let err = executor.exec(&scenario).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidDuration(_))));
    }
}
