//! Lease-based leader election for multi-replica safety
//!
//! Multiple downscaler replicas run concurrently; exactly one may perform
//! the periodic scaling work at any time. Candidates race to own a named
//! `coordination.k8s.io/v1` Lease using optimistic create/update writes,
//! with no external locking service: the API server's admission rules
//! serialize the racing writers.
//!
//! - [`record`] - the immutable record value carried in the Lease spec
//! - [`config`] - validated timing parameters, lock identity and callbacks
//! - [`store`] - read/create/update/clear operations on the shared Lease
//! - [`engine`] - the acquire / lead-and-renew / stop state machine
//! - [`hook`] - lease release on graceful shutdown

pub mod config;
pub mod engine;
pub mod hook;
pub mod record;
pub mod store;

pub use config::{
    ConfigError, ElectionConfig, ElectionTimings, LeaderWork, LeaseLock, JITTER_FACTOR,
};
pub use engine::LeaderElector;
pub use hook::TerminationHook;
pub use record::ElectionRecord;
pub use store::{KubeLeaseStore, LeaseStore, StoreError};

#[cfg(test)]
#[path = "testutil.rs"]
mod testutil;

#[cfg(test)]
#[path = "record_test.rs"]
mod record_tests;

#[cfg(test)]
#[path = "config_test.rs"]
mod config_tests;

#[cfg(test)]
#[path = "store_test.rs"]
mod store_tests;

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_tests;

#[cfg(test)]
#[path = "hook_test.rs"]
mod hook_tests;
