//! Validated election configuration
//!
//! Timing parameters, the lock identity and the leadership callbacks are
//! checked once at construction; the engine never sees an invalid config.

use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The renew deadline must exceed `JITTER_FACTOR * retry_period` so a
/// leader always gets more than one renewal attempt per window.
pub const JITTER_FACTOR: f64 = 1.2;

/// Default lease validity window
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

/// Default renewal deadline
pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(20);

/// Default cadence for acquisition and renewal attempts
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(5);

/// Names the shared Lease and this candidate's claim on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseLock {
    /// Name of the Lease resource
    pub name: String,
    /// Namespace holding the Lease resource
    pub namespace: String,
    /// Unique identity of this candidate (usually the pod name)
    pub identity: String,
}

impl LeaseLock {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            identity: identity.into(),
        }
    }

    /// Derive the lock from the pod environment.
    ///
    /// Uses `POD_NAME` for the identity (falling back to `HOSTNAME`, then
    /// a generated id, so identity stays stable across restarts on the
    /// same host) and `POD_NAMESPACE` for the namespace (falling back to
    /// `default_namespace`).
    pub fn from_env(name: impl Into<String>, default_namespace: &str) -> Self {
        let identity = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| format!("vuoro-{}", uuid::Uuid::new_v4()));

        let namespace =
            std::env::var("POD_NAMESPACE").unwrap_or_else(|_| default_namespace.to_string());

        Self {
            name: name.into(),
            namespace,
            identity,
        }
    }
}

/// Timing parameters of the election protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionTimings {
    /// How long after the last observed renewal the lease stays valid
    pub lease_duration: Duration,
    /// Longest stretch a leader may fail to renew before it must yield
    pub renew_deadline: Duration,
    /// Base polling interval between acquisition/renewal attempts
    pub retry_period: Duration,
}

impl Default for ElectionTimings {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_deadline: DEFAULT_RENEW_DEADLINE,
            retry_period: DEFAULT_RETRY_PERIOD,
        }
    }
}

/// Invalid election configuration, rejected before any I/O
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("lock {0} must not be empty")]
    EmptyLockField(&'static str),

    #[error("{0} must be at least one second")]
    DurationTooShort(&'static str),

    #[error("lease_duration must be greater than renew_deadline")]
    LeaseDurationNotAboveRenewDeadline,

    #[error("renew_deadline must be greater than 1.2 * retry_period")]
    RenewDeadlineNotAboveRetryJitter,
}

/// Future driving the leader's work, spawned once on acquisition
pub type LeaderWork = BoxFuture<'static, ()>;

/// Invoked exactly once when leadership is acquired.
///
/// The token is cancelled when leadership ends; the callback is expected
/// to observe it and return promptly. The engine never joins the spawned
/// work.
pub type OnStartedLeading = Box<dyn FnOnce(CancellationToken) -> LeaderWork + Send>;

/// Invoked once when the renew loop gives up leadership
pub type OnStoppedLeading = Box<dyn FnOnce() + Send>;

/// Validated bundle of lock identity, timing parameters and callbacks
pub struct ElectionConfig {
    pub(crate) lock: LeaseLock,
    pub(crate) timings: ElectionTimings,
    pub(crate) on_started_leading: OnStartedLeading,
    pub(crate) on_stopped_leading: OnStoppedLeading,
}

impl ElectionConfig {
    /// Validate and assemble an election configuration.
    ///
    /// The stop callback defaults to a single log line naming the
    /// candidate; override it with [`ElectionConfig::on_stopped_leading`].
    pub fn new<F>(
        lock: LeaseLock,
        timings: ElectionTimings,
        on_started_leading: F,
    ) -> Result<Self, ConfigError>
    where
        F: FnOnce(CancellationToken) -> LeaderWork + Send + 'static,
    {
        validate_lock(&lock)?;
        validate_timings(&timings)?;

        let identity = lock.identity.clone();
        Ok(Self {
            lock,
            timings,
            on_started_leading: Box::new(on_started_leading),
            on_stopped_leading: Box::new(move || {
                info!(holder = %identity, "Stopped leading");
            }),
        })
    }

    /// Replace the default log-only stop callback
    pub fn on_stopped_leading<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_stopped_leading = Box::new(f);
        self
    }

    /// The lock this candidate races for
    pub fn lock(&self) -> &LeaseLock {
        &self.lock
    }

    /// The validated timing parameters
    pub fn timings(&self) -> ElectionTimings {
        self.timings
    }
}

fn validate_lock(lock: &LeaseLock) -> Result<(), ConfigError> {
    if lock.name.is_empty() {
        return Err(ConfigError::EmptyLockField("name"));
    }
    if lock.namespace.is_empty() {
        return Err(ConfigError::EmptyLockField("namespace"));
    }
    if lock.identity.is_empty() {
        return Err(ConfigError::EmptyLockField("identity"));
    }
    Ok(())
}

fn validate_timings(timings: &ElectionTimings) -> Result<(), ConfigError> {
    let second = Duration::from_secs(1);
    if timings.lease_duration < second {
        return Err(ConfigError::DurationTooShort("lease_duration"));
    }
    if timings.renew_deadline < second {
        return Err(ConfigError::DurationTooShort("renew_deadline"));
    }
    if timings.retry_period < second {
        return Err(ConfigError::DurationTooShort("retry_period"));
    }
    if timings.lease_duration <= timings.renew_deadline {
        return Err(ConfigError::LeaseDurationNotAboveRenewDeadline);
    }
    if timings.renew_deadline.as_secs_f64() <= JITTER_FACTOR * timings.retry_period.as_secs_f64() {
        return Err(ConfigError::RenewDeadlineNotAboveRetryJitter);
    }
    Ok(())
}
