//! The election state machine: acquire, lead and renew, stop
//!
//! Every replica runs one [`LeaderElector`]. All candidates start as
//! followers; the first to create or overwrite the shared record leads
//! until it fails to renew within `renew_deadline`, then its engine
//! returns and a peer takes over. There is no demotion back to follower
//! inside one engine lifetime.

use crate::election::config::{
    ElectionConfig, ElectionTimings, LeaseLock, OnStartedLeading, OnStoppedLeading,
};
use crate::election::hook::TerminationHook;
use crate::election::record::{now_micro, ElectionRecord};
use crate::election::store::{KubeLeaseStore, LeaseStore, StoreError};
use chrono::{DateTime, Utc};
use kube::Client;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One candidate's election engine.
///
/// Owns the candidate's local view of the shared record. All writes to
/// that view happen on the election flow driving [`LeaderElector::run`];
/// the spawned leader work shares no mutable state with it.
pub struct LeaderElector<S> {
    lock: LeaseLock,
    timings: ElectionTimings,
    on_started_leading: Option<OnStartedLeading>,
    on_stopped_leading: Option<OnStoppedLeading>,
    store: S,
    /// Last record this candidate saw in the store
    observed_record: Option<ElectionRecord>,
    /// Local instant at which `observed_record` was adopted. Expiry math
    /// uses this, never the remote renew time, so clock skew between
    /// writer and observer cannot produce a second live leader.
    observed_at: Option<Instant>,
}

impl LeaderElector<KubeLeaseStore> {
    /// Elector talking to the cluster the client points at
    pub fn new(client: Client, config: ElectionConfig) -> Self {
        Self::with_store(KubeLeaseStore::new(client), config)
    }
}

impl<S: LeaseStore> LeaderElector<S> {
    /// Elector over any lease store
    pub fn with_store(store: S, config: ElectionConfig) -> Self {
        let ElectionConfig {
            lock,
            timings,
            on_started_leading,
            on_stopped_leading,
        } = config;

        Self {
            lock,
            timings,
            on_started_leading: Some(on_started_leading),
            on_stopped_leading: Some(on_stopped_leading),
            store,
            observed_record: None,
            observed_at: None,
        }
    }

    /// Handle for releasing the lease during process shutdown.
    ///
    /// Take it before [`LeaderElector::run`] consumes the elector; the
    /// host invokes [`TerminationHook::release`] from its signal path.
    pub fn termination_hook(&self) -> TerminationHook<S>
    where
        S: Clone,
    {
        TerminationHook::new(self.store.clone(), self.lock.clone())
    }

    /// Drive the election until leadership is lost.
    ///
    /// Blocks while following; once the lease is acquired, spawns
    /// `on_started_leading` on a detached task and keeps renewing.
    /// Returns `Ok(())` after a held lease could not be renewed within
    /// `renew_deadline` (the stop callback has run by then). Errors are
    /// fatal: the host should log them and fall back to leaderless
    /// operation.
    pub async fn run(mut self) -> Result<(), StoreError> {
        self.acquire().await?;

        info!(
            holder = %self.lock.identity,
            lease = %self.lock.name,
            "Successfully acquired lease"
        );

        let cancel = CancellationToken::new();
        if let Some(on_started) = self.on_started_leading.take() {
            // Detached on purpose: the engine never joins the leader work,
            // it only signals the token when leadership ends.
            tokio::spawn(on_started(cancel.clone()));
        }

        let outcome = self.renew_loop().await;
        cancel.cancel();

        match outcome {
            Ok(()) => {
                if let Some(on_stopped) = self.on_stopped_leading.take() {
                    on_stopped();
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Follower phase: poll until the lease is ours.
    ///
    /// Only a fatal store error exits this loop without leadership.
    async fn acquire(&mut self) -> Result<(), StoreError> {
        info!(
            holder = %self.lock.identity,
            lease = %self.lock.name,
            namespace = %self.lock.namespace,
            "Entering election as follower"
        );

        loop {
            if self.try_acquire_or_renew().await? {
                return Ok(());
            }
            sleep(self.timings.retry_period).await;
        }
    }

    /// Leader phase: renew at `retry_period` cadence.
    ///
    /// Within each `renew_deadline` window the leader gets multiple
    /// attempts to ride out transient store failures; it yields only
    /// after a full window passes with zero successful renewals.
    async fn renew_loop(&mut self) -> Result<(), StoreError> {
        info!(holder = %self.lock.identity, "Entering renew loop");

        loop {
            let deadline = Instant::now() + self.timings.renew_deadline;
            let mut renewed = false;

            while Instant::now() < deadline {
                match self.try_acquire_or_renew().await {
                    Ok(true) => {
                        renewed = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) if e.is_forbidden() => return Err(e),
                    Err(_) => {
                        // Already logged at the store call site; the renew
                        // window exists to absorb transient failures.
                    }
                }
                sleep(self.timings.retry_period).await;
            }

            if renewed {
                sleep(self.timings.retry_period).await;
                continue;
            }

            warn!(
                holder = %self.lock.identity,
                "Failed to renew lease within the renew deadline, giving up leadership"
            );
            return Ok(());
        }
    }

    /// One atomic acquire-or-renew decision.
    ///
    /// `Ok(true)` means this candidate holds the lease afterwards. Runs
    /// identically in the follower and leader phases.
    pub(crate) async fn try_acquire_or_renew(&mut self) -> Result<bool, StoreError> {
        let now = now_micro();
        debug!(holder = %self.lock.identity, "Attempting to acquire or renew lease");

        let old = match self.store.get(&self.lock.name, &self.lock.namespace).await {
            Ok(old) => old,
            Err(e) => {
                self.warn_store_failure("get", &e);
                return Err(e);
            }
        };

        let old = match old {
            Some(old) => old,
            None => {
                // Nothing out there (or only a tombstone): race to create.
                info!(holder = %self.lock.identity, "Lease absent, attempting to create it");
                let record = self.fresh_record(now);
                if let Err(e) = self
                    .store
                    .create(&self.lock.name, &self.lock.namespace, &record)
                    .await
                {
                    self.warn_store_failure("create", &e);
                    return Err(e);
                }
                self.observe(record);
                return Ok(true);
            }
        };

        if !old.is_well_formed() {
            warn!(lease = %self.lock.name, "Lease record is malformed, overwriting it");
            return self.update_lock(self.fresh_record(now)).await;
        }

        // Adopt a record we have not seen yet. The adoption instant, not
        // the remote renew time, is what expiry is measured from; the
        // remote fields only tell us whether the record changed.
        if self.observed_record.as_ref() != Some(&old) {
            if let Some(observed) = &self.observed_record {
                if observed.holder != old.holder {
                    info!(
                        holder = %self.lock.identity,
                        current_holder = %old.holder,
                        "Lease changed hands"
                    );
                }
            }
            self.observed_record = Some(old.clone());
            self.observed_at = Some(Instant::now());
        }

        if old.holder != self.lock.identity {
            let observed_at = self.observed_at.unwrap_or_else(Instant::now);
            let expiry = observed_at + Duration::from_secs(old.lease_duration_seconds as u64);
            if Instant::now() < expiry {
                debug!(
                    holder = %self.lock.identity,
                    current_holder = %old.holder,
                    "Lease is held and has not expired, cannot acquire"
                );
                return Ok(false);
            }
        }

        // We already hold it, or it has expired: write ourselves in.
        self.update_lock(self.fresh_record(now)).await
    }

    /// Overwrite the shared record with `record` and adopt it locally
    async fn update_lock(&mut self, record: ElectionRecord) -> Result<bool, StoreError> {
        if let Err(e) = self
            .store
            .update(&self.lock.name, &self.lock.namespace, &record)
            .await
        {
            self.warn_store_failure("update", &e);
            return Err(e);
        }

        debug!(holder = %record.holder, "Lease record updated");
        self.observe(record);
        Ok(true)
    }

    /// A record declaring this candidate the holder as of `now`
    fn fresh_record(&self, now: DateTime<Utc>) -> ElectionRecord {
        ElectionRecord::new(
            self.lock.identity.clone(),
            self.timings.lease_duration.as_secs() as i32,
            now,
        )
    }

    /// Remember a record this candidate just wrote or adopted
    fn observe(&mut self, record: ElectionRecord) {
        self.observed_record = Some(record);
        self.observed_at = Some(Instant::now());
    }

    /// Log a failed store operation before it surfaces.
    ///
    /// Authorization denials get the RBAC hint naming the namespace; the
    /// hint always describes the operation that actually failed.
    fn warn_store_failure(&self, verb: &str, err: &StoreError) {
        if err.is_forbidden() {
            warn!(
                namespace = %self.lock.namespace,
                "Not authorized to {} Leases in namespace {} (403); check the ServiceAccount's RBAC RoleBindings",
                verb,
                self.lock.namespace
            );
        } else {
            warn!(error = %err, "Lease {} failed", verb);
        }
    }
}
