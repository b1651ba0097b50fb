use std::{error::Error, fmt, future::Future, time::Duration};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    aggregate::Summary,
    executor::{pool::PoolSnapshot, state::RunState},
    metric::RequestResult,
};

/// Everything known about a finished run.
///
/// A report is plain data: it is built once the run reaches
/// [`Completed`](crate::executor::state::RunStatus::Completed) and handed to a
/// [`Reporter`]. `results` holds every request in arrival order and is left
/// out of the serialized form.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub state: RunState,
    pub elapsed: Duration,
    /// Configured arrival rate, in ticks per second.
    pub target_rate: f64,
    pub pool: PoolSnapshot,
    pub summary: Summary,
    #[serde(skip)]
    pub results: Vec<RequestResult>,
}

impl RunReport {
    /// Requests actually started per second over the whole run.
    pub fn achieved_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.state.ticks_dispatched as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.state;
        let sum = &self.summary;
        writeln!(f, "scenario: {}", self.scenario)?;
        writeln!(f, "status:   {:?} after {:.2?}", s.status, self.elapsed)?;
        writeln!(
            f,
            "ticks:    {} emitted, {} dispatched, {} dropped (worker pool exhausted), {} late",
            s.ticks_emitted, s.ticks_dispatched, s.ticks_dropped, s.ticks_late
        )?;
        writeln!(
            f,
            "rate:     target {:.2}/s, achieved {:.2}/s",
            self.target_rate,
            self.achieved_rate()
        )?;
        writeln!(
            f,
            "workers:  {} created, peak {} busy",
            self.pool.total, self.pool.peak_busy
        )?;
        writeln!(
            f,
            "requests: {} executed, {} succeeded, {} failed",
            sum.requests, sum.succeeded, sum.failed
        )?;
        if !sum.failures.is_empty() {
            let kinds: Vec<String> = sum
                .failures
                .iter()
                .map(|(kind, n)| format!("{kind}={n}"))
                .collect();
            writeln!(f, "failures: {}", kinds.join(", "))?;
        }
        if let (Some(mean), Some(min), Some(max)) =
            (sum.mean_latency(), sum.min_latency, sum.max_latency)
        {
            writeln!(f, "latency:  avg {mean:.2?}, min {min:.2?}, max {max:.2?}")?;
        }
        Ok(())
    }
}

/// A [`Reporter`] takes a finished [`RunReport`] somewhere: the terminal, a
/// file, a service.
///
/// Reporters are the I/O boundary for final results; the run itself never
/// depends on them succeeding.
///
/// # Example
/// ```rust
/// use arrival::{Reporter, report::RunReport};
///
/// struct CountReporter;
/// impl Reporter for CountReporter {
///     async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         println!("{} requests", report.summary.requests);
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter {
    fn report(
        &self,
        report: &RunReport,
    ) -> impl Future<Output = Result<(), Box<dyn Error + Send + Sync>>>;
}

/// Prints the human readable summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn Error + Send + Sync>> {
        println!("{report}");
        Ok(())
    }
}

/// Prints the report as one JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReporter {
    pub pretty: bool,
}

impl Reporter for JsonReporter {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn Error + Send + Sync>> {
        let value = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        println!("{value}");
        Ok(())
    }
}

/// Receives every [`RequestResult`] as soon as it is produced, in arrival
/// order. This is the hook for live progress and external aggregation.
///
/// Sinks run on the result collector task, never on a worker, so a slow sink
/// delays reporting but not requests.
pub trait ResultSink: Send + 'static {
    fn on_result(&mut self, result: &RequestResult);
}

/// Discard the stream.
impl ResultSink for () {
    fn on_result(&mut self, _: &RequestResult) {}
}

/// Forwards the stream to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RequestResult>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl From<mpsc::UnboundedSender<RequestResult>> for ChannelSink {
    fn from(tx: mpsc::UnboundedSender<RequestResult>) -> Self {
        Self { tx }
    }
}

impl ResultSink for ChannelSink {
    fn on_result(&mut self, result: &RequestResult) {
        // A consumer that went away just stops watching.
        let _ = self.tx.send(result.clone());
    }
}

/// Logs failures as they happen and a progress line every `every` results.
#[derive(Debug, Clone)]
pub struct LogSink {
    every: u64,
    seen: u64,
    failed: u64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
            failed: 0,
        }
    }
}

impl ResultSink for LogSink {
    fn on_result(&mut self, result: &RequestResult) {
        self.seen += 1;
        if let Some(kind) = result.outcome.error() {
            self.failed += 1;
            tracing::warn!(tick = result.tick, worker = %result.worker, error = %kind, "Request failed");
        }
        if self.seen % self.every == 0 {
            tracing::info!(
                completed = self.seen,
                failed = self.failed,
                last_latency = ?result.latency,
                "Progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        executor::{pool::WorkerId, state::RunStatus},
        metric::{ErrorKind, Outcome},
    };

    fn report() -> RunReport {
        let results = vec![
            RequestResult {
                tick: 0,
                worker: WorkerId(0),
                scheduled_at: Duration::ZERO,
                started_at: Duration::ZERO,
                finished_at: Duration::from_millis(20),
                latency: Duration::from_millis(20),
                outcome: Outcome::Success(200),
            },
            RequestResult {
                tick: 2,
                worker: WorkerId(0),
                scheduled_at: Duration::from_millis(200),
                started_at: Duration::from_millis(200),
                finished_at: Duration::from_millis(300),
                latency: Duration::from_millis(100),
                outcome: Outcome::Failure(ErrorKind::Timeout),
            },
        ];
        let mut summary = Summary::new();
        results.iter().for_each(|r| summary.consume(r));
        RunReport {
            scenario: "unit".into(),
            state: RunState {
                status: RunStatus::Completed,
                ticks_emitted: 4,
                ticks_dispatched: 2,
                ticks_dropped: 2,
                ticks_late: 0,
            },
            elapsed: Duration::from_secs(2),
            target_rate: 2.0,
            pool: PoolSnapshot {
                total: 1,
                busy: 0,
                idle: 1,
                peak_busy: 1,
            },
            summary,
            results,
        }
    }

    #[test]
    fn achieved_rate_uses_dispatched_ticks() {
        assert_eq!(report().achieved_rate(), 1.0);
    }

    #[test]
    fn human_report_separates_drops_from_failures() {
        let text = report().to_string();
        assert!(text.contains("2 dropped (worker pool exhausted)"));
        assert!(text.contains("2 executed, 1 succeeded, 1 failed"));
        assert!(text.contains("timeout=1"));
    }

    #[test]
    fn json_report_skips_raw_results() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["state"]["ticks_dropped"], 2);
        assert_eq!(json["state"]["status"], "completed");
        assert_eq!(json["summary"]["failures"]["timeout"], 1);
        assert!(json.get("results").is_none());
    }

    #[test]
    fn channel_sink_forwards() {
        let (mut sink, mut rx) = ChannelSink::new();
        let r = report();
        for result in &r.results {
            sink.on_result(result);
        }
        assert_eq!(rx.try_recv().unwrap().tick, 0);
        assert_eq!(rx.try_recv().unwrap().tick, 2);
    }

    #[tokio::test]
    async fn builtin_reporters_succeed() {
        let r = report();
        StdoutReporter.report(&r).await.unwrap();
        JsonReporter { pretty: true }.report(&r).await.unwrap();
    }
}
