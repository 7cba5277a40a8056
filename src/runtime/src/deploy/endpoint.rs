//! Remote deployment endpoint contract.

use async_trait::async_trait;
use ova_import_core::error::Result;
use serde::{Deserialize, Serialize};

use super::progress::UploadProgress;
use crate::archive::ArchiveEntry;
use crate::inventory::ManagedRef;
use crate::ovf::ImportSpec;

/// A deployment plan accepted by the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Endpoint-assigned handle for the validated plan
    pub id: String,
    /// Bytes the endpoint expects to receive, if it reports them
    #[serde(default)]
    pub total_bytes: Option<u64>,
}

/// Outcome of spec validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub plan: Option<DeploymentPlan>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn accepted(plan: DeploymentPlan) -> Self {
        Self {
            plan: Some(plan),
            ..Default::default()
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Default::default()
        }
    }
}

/// Transfer session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseState {
    Initializing,
    Ready,
    Error(String),
}

/// A file the endpoint expects within a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    /// Device key the payload belongs to
    pub device_id: String,
    /// Path of the payload inside the archive
    pub path: String,
    /// Declared size, if the endpoint knows it
    #[serde(default)]
    pub size: Option<u64>,
    /// Where the endpoint accepts the bytes, when it exposes one
    #[serde(default)]
    pub target_url: Option<String>,
    /// Whether the payload must be present in the archive
    pub required: bool,
}

/// Remote transfer session scoping the uploads of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub state: LeaseState,
    /// Entity under construction, once the endpoint has created it
    #[serde(default)]
    pub entity: Option<ManagedRef>,
    /// Files to upload, in the order they must be sent
    #[serde(default)]
    pub file_requests: Vec<FileRequest>,
}

impl Lease {
    /// Sum of declared request sizes. Undeclared sizes count as zero.
    pub fn total_bytes(&self) -> u64 {
        self.file_requests.iter().filter_map(|r| r.size).sum()
    }
}

/// The remote virtualization management endpoint.
///
/// Every method is one round trip; the orchestrator wraps each call in its
/// cancellation and deadline scope. `upload` receives a blocking reader and
/// must consume it off the async executor (e.g. in `spawn_blocking`).
#[async_trait]
pub trait DeploymentEndpoint: Send + Sync {
    /// Validate an import spec against the descriptor and targets.
    async fn validate_spec(
        &self,
        descriptor: &str,
        pool: &ManagedRef,
        datastore: &ManagedRef,
        spec: &ImportSpec,
    ) -> Result<ValidationResult>;

    /// Request import of a validated plan.
    async fn open_lease(
        &self,
        plan: &DeploymentPlan,
        pool: &ManagedRef,
        folder: &ManagedRef,
        host: Option<&ManagedRef>,
    ) -> Result<Lease>;

    /// Block until the lease leaves `Initializing`.
    async fn wait_lease(&self, lease: &Lease) -> Result<Lease>;

    /// Stream one archive entry to the endpoint.
    async fn upload(
        &self,
        lease: &Lease,
        request: &FileRequest,
        entry: ArchiveEntry,
        progress: UploadProgress,
    ) -> Result<()>;

    /// Report overall transfer progress (0-100).
    async fn report_progress(&self, _lease: &Lease, _percent: u8) -> Result<()> {
        Ok(())
    }

    /// Signal that every file was sent. Returns the created entity.
    async fn complete_lease(&self, lease: &Lease) -> Result<ManagedRef>;

    /// Abandon the lease, discarding anything uploaded.
    async fn abort_lease(&self, lease: &Lease, reason: &str) -> Result<()>;

    /// The entity's durable instance UUID.
    async fn entity_uuid(&self, entity: &ManagedRef) -> Result<String>;

    /// The host system the entity landed on.
    async fn entity_host(&self, _entity: &ManagedRef) -> Result<Option<String>> {
        Ok(None)
    }

    /// The guest OS identifier from the entity's configuration.
    async fn guest_id(&self, _entity: &ManagedRef) -> Result<Option<String>> {
        Ok(None)
    }

    async fn mark_as_template(&self, entity: &ManagedRef) -> Result<()>;

    /// Destroy the entity; completes when the remote task does.
    async fn destroy(&self, entity: &ManagedRef) -> Result<()>;
}
