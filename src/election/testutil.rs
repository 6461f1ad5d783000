//! In-memory lease store backing the engine and hook tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::record::ElectionRecord;
use super::store::{LeaseStore, StoreError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Install a subscriber once so failing tests show the engine's log lines
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Shared in-memory stand-in for the cluster's Lease storage.
///
/// Clones share state, the way replicas share one API server. Failure
/// injection covers the conditions the engine must either ride out or
/// surface as fatal.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    record: Option<ElectionRecord>,
    gets: usize,
    creates: usize,
    updates: usize,
    forbidden: bool,
    flaky_gets: bool,
}

impl MemoryStore {
    pub(crate) fn holder(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .record
            .as_ref()
            .map(|r| r.holder.clone())
    }

    pub(crate) fn set_record(&self, record: Option<ElectionRecord>) {
        self.inner.lock().unwrap().record = record;
    }

    pub(crate) fn creates(&self) -> usize {
        self.inner.lock().unwrap().creates
    }

    pub(crate) fn updates(&self) -> usize {
        self.inner.lock().unwrap().updates
    }

    /// Every subsequent operation fails with an authorization denial
    pub(crate) fn set_forbidden(&self, forbidden: bool) {
        self.inner.lock().unwrap().forbidden = forbidden;
    }

    /// Every second get fails with a transport error
    pub(crate) fn set_flaky_gets(&self, flaky: bool) {
        self.inner.lock().unwrap().flaky_gets = flaky;
    }

    fn forbidden_error() -> StoreError {
        StoreError::Forbidden("leases.coordination.k8s.io is forbidden".to_string())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn get(
        &self,
        _name: &str,
        _namespace: &str,
    ) -> Result<Option<ElectionRecord>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.forbidden {
            return Err(Self::forbidden_error());
        }
        inner.gets += 1;
        if inner.flaky_gets && inner.gets % 2 == 1 {
            return Err(StoreError::Request("injected transport failure".to_string()));
        }
        Ok(inner.record.clone())
    }

    async fn create(
        &self,
        _name: &str,
        _namespace: &str,
        record: &ElectionRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.forbidden {
            return Err(Self::forbidden_error());
        }
        if inner.record.is_some() {
            return Err(StoreError::Request("lease already exists".to_string()));
        }
        inner.creates += 1;
        inner.record = Some(record.clone());
        Ok(())
    }

    async fn update(
        &self,
        _name: &str,
        _namespace: &str,
        record: &ElectionRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.forbidden {
            return Err(Self::forbidden_error());
        }
        inner.updates += 1;
        inner.record = Some(record.clone());
        Ok(())
    }

    async fn clear_if_holder(
        &self,
        _name: &str,
        _namespace: &str,
        identity: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.forbidden {
            return Err(Self::forbidden_error());
        }
        if inner.record.as_ref().map(|r| r.holder.as_str()) == Some(identity) {
            inner.record = None;
        }
        Ok(())
    }
}
