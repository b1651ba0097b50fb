//! Schedule configuration for a constant-arrival-rate run

use std::{
    path::Path,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::ConfigError;

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What the dispatcher does with a tick when every worker is busy and the
/// pool cannot grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum Backpressure {
    /// Record the tick as dropped right away.
    #[default]
    Drop,
    /// Wait up to `grace` for a worker to be released, then drop.
    ///
    /// While waiting no other tick is emitted; ticks that fall due in the
    /// meantime are emitted late, the schedule itself does not shift.
    Wait {
        #[serde(with = "humantime_duration")]
        grace: Duration,
    },
}

/// Immutable description of one constant-arrival-rate run.
///
/// `rate` iterations are started every `time_unit` for `duration`, each one on
/// a worker taken from a pool of `pre_allocated_workers` that may grow up to
/// `max_workers` (`None` means the pool may grow without bound).
///
/// Durations use the humantime format when (de)serialized, so a JSON config
/// mirrors the usual load-testing shape:
///
/// ```json
/// { "rate": 100, "time_unit": "1s", "duration": "30s", "pre_allocated_workers": 101 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Iterations started per `time_unit`.
    pub rate: f64,
    #[builder(default = Duration::from_secs(1))]
    #[serde(
        default = "default_time_unit",
        alias = "timeUnit",
        with = "humantime_duration"
    )]
    pub time_unit: Duration,
    /// How long ticks are emitted for.
    #[serde(with = "humantime_duration")]
    pub duration: Duration,
    /// Workers built before the first tick.
    #[builder(default)]
    #[serde(default, alias = "preAllocatedVUs")]
    pub pre_allocated_workers: usize,
    #[builder(default, setter(strip_option))]
    #[serde(default, alias = "maxVUs")]
    pub max_workers: Option<usize>,
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    #[serde(default = "default_request_timeout", with = "humantime_duration")]
    pub request_timeout: Duration,
    /// Ceiling on the drain phase. Defaults to `request_timeout`.
    #[builder(default, setter(strip_option))]
    #[serde(default, with = "humantime_duration::option")]
    pub drain_timeout: Option<Duration>,
    #[builder(default)]
    #[serde(default)]
    pub backpressure: Backpressure,
}

fn default_time_unit() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl ScheduleConfig {
    /// Parse a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Target arrival rate normalised to ticks per second.
    pub fn rate_per_second(&self) -> f64 {
        self.rate / self.time_unit.as_secs_f64()
    }

    /// Effective ceiling of the drain phase.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout.unwrap_or(self.request_timeout)
    }

    /// Reject schedules that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(ConfigError::InvalidRate(format!(
                "rate must be a positive number, got {}",
                self.rate
            )));
        }
        if self.time_unit.is_zero() {
            return Err(ConfigError::InvalidRate("time unit must be non-zero".into()));
        }
        if !self.rate_per_second().is_finite() {
            return Err(ConfigError::InvalidRate(format!(
                "{} per {:?} overflows",
                self.rate, self.time_unit
            )));
        }
        if Duration::try_from_secs_f64(1.0 / self.rate_per_second()).is_err() {
            return Err(ConfigError::InvalidRate(format!(
                "{} per {:?} is too slow to schedule",
                self.rate, self.time_unit
            )));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "duration must be non-zero".into(),
            ));
        }
        if Instant::now().checked_add(self.duration).is_none() {
            return Err(ConfigError::InvalidDuration(format!(
                "{} is too long to schedule",
                humantime::format_duration(self.duration)
            )));
        }
        match self.max_workers {
            Some(0) => {
                return Err(ConfigError::InvalidPool(
                    "max workers must be at least 1".into(),
                ));
            }
            Some(max) if max < self.pre_allocated_workers => {
                return Err(ConfigError::InvalidPool(format!(
                    "max workers ({max}) is below pre-allocated workers ({})",
                    self.pre_allocated_workers
                )));
            }
            _ => {}
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request timeout must be non-zero".into(),
            ));
        }
        if self.drain_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidTimeout(
                "drain timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Serde adapter storing a [`Duration`] as a humantime string ("1m 30s").
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| humantime::parse_duration(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}
