//! Runs the scenario action once for a dispatched tick.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};

use super::{
    clock::Tick,
    pool::{Worker, WorkerPool},
};
use crate::metric::{ErrorKind, Outcome, RequestResult};

/// Everything a request task needs, cloned into each spawned task.
pub struct RequestExecutor<F> {
    action: F,
    timeout: Duration,
    pool: Arc<WorkerPool>,
    results: mpsc::UnboundedSender<RequestResult>,
    abort: watch::Receiver<bool>,
    run_start: Instant,
}

impl<F: Clone> Clone for RequestExecutor<F> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            timeout: self.timeout,
            pool: Arc::clone(&self.pool),
            results: self.results.clone(),
            abort: self.abort.clone(),
            run_start: self.run_start,
        }
    }
}

impl<F, Fut> RequestExecutor<F>
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    pub fn new(
        action: F,
        timeout: Duration,
        pool: Arc<WorkerPool>,
        results: mpsc::UnboundedSender<RequestResult>,
        abort: watch::Receiver<bool>,
        run_start: Instant,
    ) -> Self {
        Self {
            action,
            timeout,
            pool,
            results,
            abort,
            run_start,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Run the action for `tick` on `worker`, report the result and give the
    /// worker back.
    ///
    /// The action future is dropped (and thereby cancelled) on timeout or when
    /// the abort signal is raised, so a hung request can never keep its
    /// worker.
    pub async fn execute(mut self, worker: Worker, tick: Tick) {
        let started = Instant::now();
        // The action is invoked on first poll so a panic while building the
        // future is caught as well.
        let action = self.action.clone();
        let call = AssertUnwindSafe(async move { action().await }).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = aborted(&mut self.abort) => Outcome::Failure(ErrorKind::AbortedAtDrain),
            res = tokio::time::timeout(self.timeout, call) => match res {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic)) => Outcome::Failure(ErrorKind::Panicked(panic_message(panic))),
                Err(_) => Outcome::Failure(ErrorKind::Timeout),
            },
        };
        let finished = Instant::now();

        if let Outcome::Failure(kind) = &outcome {
            tracing::debug!(tick = tick.seq, worker = %worker.id(), error = %kind, "Request failed");
        }

        let result = RequestResult {
            tick: tick.seq,
            worker: worker.id(),
            scheduled_at: tick.offset,
            started_at: started.saturating_duration_since(self.run_start),
            finished_at: finished.saturating_duration_since(self.run_start),
            latency: finished.saturating_duration_since(started),
            outcome,
        };

        // The collector only goes away once every request task has finished.
        if self.results.send(result).is_err() {
            tracing::warn!(tick = tick.seq, "Result collector closed, result lost");
        }
        self.pool.release(worker);
    }
}

/// Resolves once the abort flag is raised. A dropped sender never aborts.
async fn aborted(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|a| *a).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness<F> {
        executor: RequestExecutor<F>,
        rx: mpsc::UnboundedReceiver<RequestResult>,
        abort: watch::Sender<bool>,
        pool: Arc<WorkerPool>,
    }

    fn harness<F, Fut>(action: F, timeout: Duration) -> Harness<F>
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let pool = Arc::new(WorkerPool::new(1, Some(1)));
        let (tx, rx) = mpsc::unbounded_channel();
        let (abort, abort_rx) = watch::channel(false);
        let executor = RequestExecutor::new(
            action,
            timeout,
            pool.clone(),
            tx,
            abort_rx,
            Instant::now(),
        );
        Harness {
            executor,
            rx,
            abort,
            pool,
        }
    }

    fn tick(seq: u64) -> Tick {
        Tick {
            seq,
            scheduled_at: Instant::now(),
            offset: Duration::ZERO,
            late: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_success_and_releases() {
        let mut h = harness(
            || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Outcome::Success(200)
            },
            Duration::from_secs(1),
        );
        let worker = h.pool.acquire(0).unwrap();
        h.executor.clone().execute(worker, tick(0)).await;

        let result = h.rx.recv().await.unwrap();
        assert_eq!(result.tick, 0);
        assert_eq!(result.outcome, Outcome::Success(200));
        assert!(result.latency >= Duration::from_millis(40));
        assert_eq!(result.finished_at - result.started_at, result.latency);
        assert_eq!(h.pool.snapshot().busy, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_recorded_not_raised() {
        let mut h = harness(
            || async { Outcome::Failure(ErrorKind::Network("connection refused".into())) },
            Duration::from_secs(1),
        );
        let worker = h.pool.acquire(3).unwrap();
        h.executor.clone().execute(worker, tick(3)).await;

        let result = h.rx.recv().await.unwrap();
        assert!(!result.is_success());
        assert_eq!(
            result.outcome.error(),
            Some(&ErrorKind::Network("connection refused".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_and_releases() {
        let mut h = harness(
            || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Outcome::Success(200)
            },
            Duration::from_millis(100),
        );
        let worker = h.pool.acquire(0).unwrap();
        h.executor.clone().execute(worker, tick(0)).await;

        let result = h.rx.recv().await.unwrap();
        assert_eq!(result.outcome, Outcome::Failure(ErrorKind::Timeout));
        assert!(result.latency >= Duration::from_millis(100));
        assert!(result.latency < Duration::from_secs(1));
        assert!(h.pool.acquire(1).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_signal_forces_aborted_at_drain() {
        let mut h = harness(
            || std::future::pending::<Outcome>(),
            Duration::from_secs(3600),
        );
        let worker = h.pool.acquire(0).unwrap();
        let task = tokio::spawn(h.executor.clone().execute(worker, tick(0)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.abort.send(true).unwrap();
        task.await.unwrap();

        let result = h.rx.recv().await.unwrap();
        assert_eq!(result.outcome, Outcome::Failure(ErrorKind::AbortedAtDrain));
        assert_eq!(h.pool.snapshot().busy, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_action_still_releases() {
        let mut h = harness(
            || async {
                if true {
                    panic!("boom");
                }
                Outcome::Success(200)
            },
            Duration::from_secs(1),
        );
        let worker = h.pool.acquire(0).unwrap();
        h.executor.clone().execute(worker, tick(0)).await;

        let result = h.rx.recv().await.unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Failure(ErrorKind::Panicked("boom".into()))
        );
        assert_eq!(h.pool.snapshot().busy, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panic_before_the_future_exists_still_releases() {
        let mut h = harness(
            || {
                if true {
                    panic!("no future for you");
                }
                std::future::ready(Outcome::Success(200))
            },
            Duration::from_secs(1),
        );
        let worker = h.pool.acquire(0).unwrap();
        h.executor.clone().execute(worker, tick(0)).await;

        let result = h.rx.recv().await.unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Failure(ErrorKind::Panicked("no future for you".into()))
        );
        assert_eq!(h.pool.snapshot().busy, 0);
        assert!(h.pool.acquire(1).is_some());
    }
}
