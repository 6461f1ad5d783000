//! The coordination record carried in the shared Lease spec

use chrono::{DateTime, Utc};

/// Snapshot of the shared coordination record.
///
/// A pure value: nothing mutates it after construction, and field-wise
/// equality is how the engine detects that the record changed remotely
/// since it was last observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionRecord {
    /// Identity of the current holder (usually the pod name)
    pub holder: String,
    /// How long after the last renewal the lease stays valid
    pub lease_duration_seconds: i32,
    /// Last renewal instant written by the holder, microsecond precision
    pub renew_time: Option<DateTime<Utc>>,
}

impl ElectionRecord {
    /// Create a well-formed record
    pub fn new(
        holder: impl Into<String>,
        lease_duration_seconds: i32,
        renew_time: DateTime<Utc>,
    ) -> Self {
        Self {
            holder: holder.into(),
            lease_duration_seconds,
            renew_time: Some(renew_time),
        }
    }

    /// Whether this record can protect a leader.
    ///
    /// An empty holder, a non-positive duration or a missing renew time
    /// means the record cannot be trusted; the engine overwrites it.
    pub fn is_well_formed(&self) -> bool {
        !self.holder.is_empty() && self.lease_duration_seconds > 0 && self.renew_time.is_some()
    }
}

/// Current wall-clock time truncated to whole microseconds.
///
/// The Lease `renewTime` field is a `MicroTime`; minting whole-microsecond
/// values means a record read back from the API server compares equal to
/// the record that was written.
pub fn now_micro() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}
