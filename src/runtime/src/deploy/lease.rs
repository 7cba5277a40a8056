//! Scoped ownership of a transfer lease.

use std::sync::Arc;
use std::time::Duration;

use ova_import_core::error::Result;

use super::endpoint::{DeploymentEndpoint, Lease};
use crate::inventory::ManagedRef;

/// Upper bound on a single abort call.
const ABORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Holds an open lease until it is completed or aborted.
///
/// Every exit path must call [`LeaseGuard::complete`] or
/// [`LeaseGuard::abort`]. If the guard is dropped unresolved (the owning
/// future was dropped or panicked) an abort is spawned on the current
/// runtime.
pub struct LeaseGuard {
    endpoint: Arc<dyn DeploymentEndpoint>,
    lease: Lease,
    resolved: bool,
}

impl LeaseGuard {
    pub fn new(endpoint: Arc<dyn DeploymentEndpoint>, lease: Lease) -> Self {
        Self {
            endpoint,
            lease,
            resolved: false,
        }
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Swap in a refreshed view of the same lease.
    pub fn replace(&mut self, lease: Lease) {
        self.lease = lease;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Complete the lease. The guard stays unresolved on failure so the
    /// caller can still abort.
    pub async fn complete(&mut self) -> Result<ManagedRef> {
        let entity = self.endpoint.complete_lease(&self.lease).await?;
        self.resolved = true;
        tracing::info!(lease = %self.lease.id, entity = %entity, "Lease completed");
        Ok(entity)
    }

    /// Abort the lease. Failures are logged, never returned, so the
    /// original error reaches the caller. Calling twice is a no-op.
    ///
    /// The guard is resolved only once the abort call returns or times
    /// out; dropping this future midway leaves the abort to `Drop`.
    pub async fn abort(&mut self, reason: &str) {
        if self.resolved {
            return;
        }

        tracing::warn!(lease = %self.lease.id, reason = %reason, "Aborting lease");
        let result =
            tokio::time::timeout(ABORT_TIMEOUT, self.endpoint.abort_lease(&self.lease, reason))
                .await;
        self.resolved = true;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(lease = %self.lease.id, error = %e, "Failed to abort lease")
            }
            Err(_) => tracing::error!(lease = %self.lease.id, "Timed out aborting lease"),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(lease = %self.lease.id, "Lease dropped outside a runtime, cannot abort");
            return;
        };

        let endpoint = self.endpoint.clone();
        let lease = self.lease.clone();
        tracing::warn!(lease = %lease.id, "Lease dropped unresolved, aborting in background");
        handle.spawn(async move {
            let result = tokio::time::timeout(
                ABORT_TIMEOUT,
                endpoint.abort_lease(&lease, "import interrupted"),
            )
            .await;
            if !matches!(result, Ok(Ok(()))) {
                tracing::error!(lease = %lease.id, "Background lease abort failed");
            }
        });
    }
}
