//! Read/create/update/clear operations on the shared Lease
//!
//! The engine only talks to the cluster through the [`LeaseStore`] trait,
//! so tests can drive it against an in-memory store. [`KubeLeaseStore`] is
//! the real implementation on top of the coordination.k8s.io/v1 Lease API.

use crate::election::record::ElectionRecord;
use async_trait::async_trait;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for a single API call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure surfaced by a lease store operation.
///
/// Deliberately detached from any transport type so the engine can run
/// against non-Kubernetes stores in tests. Authorization denials keep
/// their own variant: the engine logs an RBAC hint for those before
/// giving up.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The API server denied access to the Lease (HTTP 403)
    #[error("lease access forbidden: {0}")]
    Forbidden(String),

    /// Any other transport or encoding failure, including a timed-out call
    #[error("lease request failed: {0}")]
    Request(String),
}

impl StoreError {
    /// True for authorization denials, which warrant the RBAC hint
    pub fn is_forbidden(&self) -> bool {
        matches!(self, StoreError::Forbidden(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp)
                if resp.code == 403 || resp.message.to_lowercase().contains("is forbidden") =>
            {
                StoreError::Forbidden(resp.message.clone())
            }
            _ => StoreError::Request(err.to_string()),
        }
    }
}

/// Storage operations the election engine needs from the cluster
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Fetch the current record.
    ///
    /// `Ok(None)` means the Lease is missing or tombstoned (empty body).
    /// A present body with missing fields comes back as a malformed record
    /// for the engine to overwrite.
    async fn get(&self, name: &str, namespace: &str)
        -> Result<Option<ElectionRecord>, StoreError>;

    /// Write a fresh record where none exists.
    ///
    /// A tombstone counts as "none": create overwrites it in place, so an
    /// outgoing leader's voluntary release is immediately claimable.
    async fn create(
        &self,
        name: &str,
        namespace: &str,
        record: &ElectionRecord,
    ) -> Result<(), StoreError>;

    /// Replace the record body on an existing Lease
    async fn update(
        &self,
        name: &str,
        namespace: &str,
        record: &ElectionRecord,
    ) -> Result<(), StoreError>;

    /// Tombstone the record iff `identity` is the current holder.
    ///
    /// A missing Lease or a foreign holder is a successful no-op.
    async fn clear_if_holder(
        &self,
        name: &str,
        namespace: &str,
        identity: &str,
    ) -> Result<(), StoreError>;
}

/// Map a fetched Lease onto the record the engine reasons about.
///
/// `None` for a tombstone: a missing spec, or a spec carrying none of the
/// coordination fields. Individually missing fields map to empty/zero
/// values so the engine's well-formedness check decides their fate.
pub(crate) fn record_from_lease(lease: &Lease) -> Option<ElectionRecord> {
    let spec = lease.spec.as_ref()?;
    if spec.holder_identity.is_none()
        && spec.lease_duration_seconds.is_none()
        && spec.renew_time.is_none()
    {
        return None;
    }
    Some(ElectionRecord {
        holder: spec.holder_identity.clone().unwrap_or_default(),
        lease_duration_seconds: spec.lease_duration_seconds.unwrap_or(0),
        renew_time: spec.renew_time.as_ref().map(|t| t.0),
    })
}

pub(crate) fn lease_spec(record: &ElectionRecord) -> LeaseSpec {
    LeaseSpec {
        holder_identity: Some(record.holder.clone()),
        lease_duration_seconds: Some(record.lease_duration_seconds),
        renew_time: record.renew_time.map(MicroTime),
        ..Default::default()
    }
}

/// Merge-patch body replacing the Lease spec with `record`
pub(crate) fn patch_body(record: &ElectionRecord) -> serde_json::Value {
    serde_json::json!({ "spec": lease_spec(record) })
}

/// `kube::Client`-backed lease store.
///
/// Every call runs under a per-call timeout so the election flow never
/// blocks indefinitely on the API server.
#[derive(Clone)]
pub struct KubeLeaseStore {
    client: Client,
    request_timeout: Duration,
}

impl KubeLeaseStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Store with a custom per-call timeout
    pub fn with_request_timeout(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    fn api(&self, namespace: &str) -> Api<Lease> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn timed_out(&self) -> StoreError {
        StoreError::Request(format!(
            "request timed out after {}s",
            self.request_timeout.as_secs()
        ))
    }

    /// Run a kube call under the per-call timeout
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, kube::Error>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(res) => res.map_err(StoreError::from),
            Err(_) => Err(self.timed_out()),
        }
    }
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    async fn get(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ElectionRecord>, StoreError> {
        let api = self.api(namespace);
        let lease = self.bounded(api.get_opt(name)).await?;
        Ok(lease.as_ref().and_then(record_from_lease))
    }

    async fn create(
        &self,
        name: &str,
        namespace: &str,
        record: &ElectionRecord,
    ) -> Result<(), StoreError> {
        let api = self.api(namespace);
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(lease_spec(record)),
        };

        let created = tokio::time::timeout(
            self.request_timeout,
            api.create(&PostParams::default(), &lease),
        )
        .await
        .map_err(|_| self.timed_out())?;

        match created {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                // The object already exists. A tombstone is still a valid
                // create target: overwrite its body in place. Racing a
                // live record stays an error.
                let existing = self.bounded(api.get(name)).await?;
                if record_from_lease(&existing).is_none() {
                    self.bounded(api.patch(
                        name,
                        &PatchParams::default(),
                        &Patch::Merge(patch_body(record)),
                    ))
                    .await?;
                    Ok(())
                } else {
                    Err(StoreError::Request(resp.message))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(
        &self,
        name: &str,
        namespace: &str,
        record: &ElectionRecord,
    ) -> Result<(), StoreError> {
        let api = self.api(namespace);
        self.bounded(api.patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(patch_body(record)),
        ))
        .await?;
        Ok(())
    }

    async fn clear_if_holder(
        &self,
        name: &str,
        namespace: &str,
        identity: &str,
    ) -> Result<(), StoreError> {
        let api = self.api(namespace);
        let lease = match self.bounded(api.get_opt(name)).await? {
            Some(lease) => lease,
            None => return Ok(()),
        };

        let holder = lease
            .spec
            .as_ref()
            .and_then(|spec| spec.holder_identity.as_deref());
        if holder != Some(identity) {
            return Ok(());
        }

        self.bounded(api.patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({ "spec": null })),
        ))
        .await?;
        Ok(())
    }
}
