use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::executor::pool::WorkerId;

/// Why a single request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ErrorKind {
    /// Transport level failure (DNS, connect, reset, TLS...).
    Network(String),
    /// The target answered with a non-2xx status.
    Status(u16),
    /// The request exceeded the per-request timeout.
    Timeout,
    /// Still in flight when the drain ceiling was reached.
    AbortedAtDrain,
    /// The action panicked.
    Panicked(String),
    /// Anything else the action wants to report.
    Other(String),
}

impl ErrorKind {
    /// Short, stable label used to group failures in reports.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network(_) => "network",
            ErrorKind::Status(_) => "status",
            ErrorKind::Timeout => "timeout",
            ErrorKind::AbortedAtDrain => "aborted_at_drain",
            ErrorKind::Panicked(_) => "panicked",
            ErrorKind::Other(_) => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network(msg) => write!(f, "network error: {msg}"),
            ErrorKind::Status(code) => write!(f, "unexpected status {code}"),
            ErrorKind::Timeout => f.write_str("timed out"),
            ErrorKind::AbortedAtDrain => f.write_str("aborted at drain"),
            ErrorKind::Panicked(msg) => write!(f, "action panicked: {msg}"),
            ErrorKind::Other(msg) => f.write_str(msg),
        }
    }
}

/// What a request action reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Completed with the given status code.
    Success(u16),
    Failure(ErrorKind),
}

impl Outcome {
    /// Map an HTTP status code: 2xx is a success, everything else a failure.
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            Outcome::Success(status)
        } else {
            Outcome::Failure(ErrorKind::Status(status))
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(kind) => Some(kind),
        }
    }
}

/// A single observed request, produced once per dispatched tick.
///
/// All timestamps are offsets from the run start so a result can be
/// serialized and compared across runs. `scheduled_at` is when the tick was
/// due, `started_at` when the action was actually invoked; the gap between
/// the two is the generator's own dispatch delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    /// Sequence number of the tick that caused this request.
    pub tick: u64,
    pub worker: WorkerId,
    pub scheduled_at: Duration,
    pub started_at: Duration,
    pub finished_at: Duration,
    pub latency: Duration,
    pub outcome: Outcome,
}

impl RequestResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Outcome::from_status(200), Outcome::Success(200));
        assert_eq!(Outcome::from_status(204), Outcome::Success(204));
        assert_eq!(
            Outcome::from_status(302),
            Outcome::Failure(ErrorKind::Status(302))
        );
        assert_eq!(
            Outcome::from_status(503),
            Outcome::Failure(ErrorKind::Status(503))
        );
    }

    #[test]
    fn error_accessor() {
        assert!(Outcome::Success(200).error().is_none());
        assert_eq!(
            Outcome::Failure(ErrorKind::Timeout).error(),
            Some(&ErrorKind::Timeout)
        );
    }

    #[test]
    fn error_kind_serializes_tagged() {
        let json = serde_json::to_string(&ErrorKind::Status(500)).unwrap();
        assert_eq!(json, r#"{"kind":"status","detail":500}"#);
        let json = serde_json::to_string(&ErrorKind::AbortedAtDrain).unwrap();
        assert_eq!(json, r#"{"kind":"aborted_at_drain"}"#);
    }
}
