//! Owns a run from `Pending` to `Completed`.
//!
//! The controller is the only writer of [`RunState`]. It starts the ticker,
//! feeds ticks to the [`Dispatcher`], drains in-flight requests under a
//! ceiling and tears the pool down. Cancellation is cooperative: a
//! [`Canceller`] raises the stop flag, which ends tick emission and any
//! backpressure wait, after which the run drains exactly as if the duration
//! had elapsed.

use std::{future::Future, sync::Arc};

use tokio::{
    sync::{mpsc, watch},
    task::{JoinHandle, JoinSet},
};

use super::{
    clock::Ticker,
    dispatch::{Dispatch, Dispatcher},
    pool::WorkerPool,
    request::RequestExecutor,
    state::{RunState, RunStatus},
};
use crate::{
    aggregate::Summary,
    config::ScheduleConfig,
    error::{ConfigError, Error},
    metric::{Outcome, RequestResult},
    report::{ResultSink, RunReport},
    scenario::Scenario,
};

/// Requests the end of a run. Cheap to clone, safe to call from anywhere and
/// any number of times.
#[derive(Debug, Clone)]
pub struct Canceller {
    stop: Arc<watch::Sender<bool>>,
}

impl Canceller {
    pub fn cancel(&self) {
        let was_stopped = self.stop.send_replace(true);
        if !was_stopped {
            tracing::info!("Run cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.stop.borrow()
    }
}

/// A validated run that has not started yet.
pub struct RunController<F, S> {
    scenario: Scenario<F>,
    config: ScheduleConfig,
    sink: S,
    state: watch::Sender<RunState>,
    stop: Arc<watch::Sender<bool>>,
}

impl<F, Fut, S> RunController<F, S>
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
    S: ResultSink,
{
    /// Validate `config` and prepare a run in the `Pending` state.
    ///
    /// Nothing is allocated and no task is spawned until [`start`](Self::start).
    pub fn new(scenario: Scenario<F>, config: ScheduleConfig, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(RunState::default());
        let (stop, _) = watch::channel(false);
        Ok(Self {
            scenario,
            config,
            sink,
            state,
            stop: Arc::new(stop),
        })
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// A canceller that is already valid while the run is `Pending`.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Allocate the pool, start the clock and run to completion in the
    /// background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> RunHandle {
        let pool = Arc::new(WorkerPool::new(
            self.config.pre_allocated_workers,
            self.config.max_workers,
        ));
        let handle_state = self.state.subscribe();
        let canceller = self.canceller();
        let task = tokio::spawn(self.run(pool));
        RunHandle {
            state: handle_state,
            canceller,
            task,
        }
    }

    async fn run(self, pool: Arc<WorkerPool>) -> RunReport {
        let RunController {
            scenario,
            config,
            sink,
            state,
            stop,
        } = self;

        let rate = config.rate_per_second();
        let (abort_tx, abort_rx) = watch::channel(false);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(collect(results_rx, sink));

        let mut ticker = Ticker::start(rate, config.duration);
        let run_start = ticker.start_instant();
        state.send_modify(|s| {
            s.advance(RunStatus::Running);
        });
        tracing::info!(
            scenario = %scenario.name,
            rate,
            duration = ?config.duration,
            pre_allocated = config.pre_allocated_workers,
            max_workers = ?config.max_workers,
            "Starting constant arrival rate run"
        );

        let executor = RequestExecutor::new(
            scenario.action,
            config.request_timeout,
            Arc::clone(&pool),
            results_tx,
            abort_rx,
            run_start,
        );
        let mut dispatcher = Dispatcher::new(executor, config.backpressure, stop.subscribe());
        let mut stop_rx = stop.subscribe();

        loop {
            let tick = tokio::select! {
                biased;
                _ = stop_rx.wait_for(|s| *s) => {
                    tracing::info!("Run cancelled, no more ticks");
                    break;
                }
                tick = ticker.tick() => match tick {
                    Some(tick) => tick,
                    None => break,
                },
            };

            let dispatch = dispatcher.dispatch(tick).await;
            state.send_modify(|s| {
                s.ticks_emitted += 1;
                if tick.late {
                    s.ticks_late += 1;
                }
                match dispatch {
                    Dispatch::Dispatched(_) => s.ticks_dispatched += 1,
                    Dispatch::Dropped(_) => s.ticks_dropped += 1,
                }
            });
        }

        state.send_modify(|s| {
            s.advance(RunStatus::Draining);
        });
        let mut in_flight = dispatcher.into_in_flight();
        let ceiling = config.drain_timeout();
        tracing::info!(in_flight = in_flight.len(), ceiling = ?ceiling, "Draining");

        if tokio::time::timeout(ceiling, join_all(&mut in_flight)).await.is_err() {
            tracing::warn!(
                remaining = in_flight.len(),
                "Drain ceiling reached, aborting in-flight requests"
            );
            abort_tx.send_replace(true);
            join_all(&mut in_flight).await;
        }

        let pool = pool.teardown();
        let (results, summary) = match collector.await {
            Ok(collected) => collected,
            Err(e) => {
                tracing::error!("Result collector failed: {e}");
                (Vec::new(), Summary::default())
            }
        };

        state.send_modify(|s| {
            s.advance(RunStatus::Completed);
        });
        let final_state = *state.borrow();
        let elapsed = run_start.elapsed();
        tracing::info!(
            emitted = final_state.ticks_emitted,
            dispatched = final_state.ticks_dispatched,
            dropped = final_state.ticks_dropped,
            late = final_state.ticks_late,
            failed = summary.failed,
            elapsed = ?elapsed,
            "Run completed"
        );

        RunReport {
            scenario: scenario.name,
            state: final_state,
            elapsed,
            target_rate: rate,
            pool,
            summary,
            results,
        }
    }
}

/// A started run.
pub struct RunHandle {
    state: watch::Receiver<RunState>,
    canceller: Canceller,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Observe state changes. The last value seen is always `Completed`.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) {
        self.canceller.cancel()
    }

    /// Wait for the run to reach `Completed` and return its report.
    pub async fn completion(self) -> Result<RunReport, Error> {
        Ok(self.task.await?)
    }
}

async fn join_all(set: &mut JoinSet<()>) {
    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            tracing::error!("Request task failed: {e}");
        }
    }
}

async fn collect<S: ResultSink>(
    mut rx: mpsc::UnboundedReceiver<RequestResult>,
    mut sink: S,
) -> (Vec<RequestResult>, Summary) {
    let mut results = Vec::new();
    let mut summary = Summary::new();
    while let Some(result) = rx.recv().await {
        sink.on_result(&result);
        summary.consume(&result);
        results.push(result);
    }
    (results, summary)
}
