//! Binds ticks to workers without ever waiting for a request to finish.

use std::{future::Future, time::Duration};

use tokio::{sync::watch, task::JoinSet};

use super::{
    clock::Tick,
    pool::{Worker, WorkerId},
    request::RequestExecutor,
};
use crate::{config::Backpressure, metric::Outcome};

/// Why a tick could not be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Every worker was busy and the pool was at its maximum size.
    WorkerPoolExhausted,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::WorkerPoolExhausted => f.write_str("worker pool exhausted"),
        }
    }
}

/// What happened to a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Dispatched(WorkerId),
    Dropped(DropReason),
}

pub struct Dispatcher<F> {
    executor: RequestExecutor<F>,
    policy: Backpressure,
    stop: watch::Receiver<bool>,
    in_flight: JoinSet<()>,
}

impl<F, Fut> Dispatcher<F>
where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    pub fn new(
        executor: RequestExecutor<F>,
        policy: Backpressure,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            executor,
            policy,
            stop,
            in_flight: JoinSet::new(),
        }
    }

    /// Hand `tick` to a worker, or drop it.
    ///
    /// The request runs on its own task; this only waits when the policy is
    /// [`Backpressure::Wait`] and the pool is exhausted.
    pub async fn dispatch(&mut self, tick: Tick) -> Dispatch {
        self.reap();

        let pool = self.executor.pool().clone();
        let worker = match (pool.acquire(tick.seq), self.policy) {
            (Some(worker), _) => Some(worker),
            (None, Backpressure::Drop) => None,
            (None, Backpressure::Wait { grace }) => self.wait_for_worker(tick.seq, grace).await,
        };

        let Some(worker) = worker else {
            tracing::warn!(
                tick = tick.seq,
                reason = %DropReason::WorkerPoolExhausted,
                "Tick dropped"
            );
            return Dispatch::Dropped(DropReason::WorkerPoolExhausted);
        };

        let id = worker.id();
        tracing::trace!(tick = tick.seq, worker = %id, late = tick.late, "Tick dispatched");
        self.in_flight.spawn(self.executor.clone().execute(worker, tick));
        Dispatch::Dispatched(id)
    }

    async fn wait_for_worker(&mut self, tick: u64, grace: Duration) -> Option<Worker> {
        let pool = self.executor.pool().clone();
        let deadline = tokio::time::Instant::now() + grace;
        let stop = &mut self.stop;
        let wait = async {
            loop {
                if let Some(worker) = pool.acquire(tick) {
                    return Some(worker);
                }
                tokio::select! {
                    _ = pool.released() => {}
                    _ = stop.wait_for(|s| *s) => return None,
                }
            }
        };
        tokio::time::timeout_at(deadline, wait).await.ok().flatten()
    }

    /// Requests still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn reap(&mut self) {
        while let Some(res) = self.in_flight.try_join_next() {
            if let Err(e) = res {
                tracing::error!("Request task failed: {e}");
            }
        }
    }

    /// Give up the handles of every request that has not been reaped yet.
    pub fn into_in_flight(mut self) -> JoinSet<()> {
        self.reap();
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{executor::pool::WorkerPool, metric::RequestResult};
    use std::sync::Arc;
    use tokio::{sync::mpsc, time::Instant};

    fn dispatcher<F, Fut>(
        action: F,
        workers: usize,
        policy: Backpressure,
    ) -> (
        Dispatcher<F>,
        mpsc::UnboundedReceiver<RequestResult>,
        watch::Sender<bool>,
    )
    where
        F: Fn() -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let pool = Arc::new(WorkerPool::new(workers, Some(workers)));
        let (tx, rx) = mpsc::unbounded_channel();
        let (_abort_tx, abort_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = watch::channel(false);
        let executor = RequestExecutor::new(
            action,
            Duration::from_secs(30),
            pool,
            tx,
            abort_rx,
            Instant::now(),
        );
        (Dispatcher::new(executor, policy, stop_rx), rx, stop_tx)
    }

    fn tick(seq: u64) -> Tick {
        Tick {
            seq,
            scheduled_at: Instant::now(),
            offset: Duration::ZERO,
            late: false,
        }
    }

    fn slow() -> impl Fn() -> futures::future::BoxFuture<'static, Outcome> + Send + Sync + Clone {
        || {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Outcome::Success(200)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_wait_for_requests() {
        let (mut d, mut rx, _stop) = dispatcher(slow(), 3, Backpressure::Drop);
        let before = Instant::now();
        for seq in 0..3 {
            assert!(matches!(d.dispatch(tick(seq)).await, Dispatch::Dispatched(_)));
        }
        assert_eq!(Instant::now(), before);
        assert_eq!(d.in_flight(), 3);

        let mut seen: Vec<u64> = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().tick);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn drops_when_exhausted() {
        let (mut d, _rx, _stop) = dispatcher(slow(), 1, Backpressure::Drop);
        assert!(matches!(d.dispatch(tick(0)).await, Dispatch::Dispatched(_)));
        assert_eq!(
            d.dispatch(tick(1)).await,
            Dispatch::Dropped(DropReason::WorkerPoolExhausted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_policy_picks_up_released_worker() {
        let policy = Backpressure::Wait {
            grace: Duration::from_millis(100),
        };
        let (mut d, _rx, _stop) = dispatcher(slow(), 1, policy);
        assert!(matches!(d.dispatch(tick(0)).await, Dispatch::Dispatched(_)));

        let before = Instant::now();
        assert!(matches!(d.dispatch(tick(1)).await, Dispatch::Dispatched(_)));
        let waited = Instant::now() - before;
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_policy_drops_after_grace() {
        let policy = Backpressure::Wait {
            grace: Duration::from_millis(10),
        };
        let (mut d, _rx, _stop) = dispatcher(slow(), 1, policy);
        assert!(matches!(d.dispatch(tick(0)).await, Dispatch::Dispatched(_)));
        assert_eq!(
            d.dispatch(tick(1)).await,
            Dispatch::Dropped(DropReason::WorkerPoolExhausted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_cuts_the_grace_wait_short() {
        let policy = Backpressure::Wait {
            grace: Duration::from_secs(10),
        };
        let (mut d, _rx, stop) = dispatcher(
            || std::future::pending::<Outcome>(),
            1,
            policy,
        );
        assert!(matches!(d.dispatch(tick(0)).await, Dispatch::Dispatched(_)));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = stop.send(true);
        });

        let before = Instant::now();
        assert_eq!(
            d.dispatch(tick(1)).await,
            Dispatch::Dropped(DropReason::WorkerPoolExhausted)
        );
        assert!(Instant::now() - before < Duration::from_secs(1));
    }
}
