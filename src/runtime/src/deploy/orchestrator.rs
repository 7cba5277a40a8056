//! Deployment orchestrator - drives one appliance import through its stages.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ova_import_core::config::DeployConfig;
use ova_import_core::error::{ImportError, Result};
use ova_import_core::event::{events, ProgressEvent, ProgressSink, TracingProgress};
use ova_import_core::options::ImportOptions;
use ova_import_core::state::DeployState;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::endpoint::{DeploymentEndpoint, DeploymentPlan, Lease, LeaseState};
use super::lease::LeaseGuard;
use super::progress::{ProgressUpdater, UploadProgress};
use crate::archive::{ByteSource, TapeArchive};
use crate::inventory::{InventoryKind, InventoryLocator, InventoryNetworks, ManagedRef};
use crate::ovf::{ImportSpec, ImportSpecBuilder, VirtualSystemDescriptor};
use crate::DESCRIPTOR_PATTERN;

/// Declarative import inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub datastore_id: String,
    /// Folder name; empty or absent selects the default VM folder
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub host_system_id: Option<String>,
    /// Datacenter scoping folder and network lookups
    #[serde(default)]
    pub datacenter_id: Option<String>,
    /// Entity name; empty defers to the options or the descriptor
    #[serde(default)]
    pub name: String,
    pub resource_pool_id: String,
    /// Local path or `http(s)://` URL of the appliance archive
    pub archive: String,
    #[serde(default)]
    pub options: ImportOptions,
    /// Overrides the configured import deadline
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A successfully finalized entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedEntity {
    /// Durable identifier, stable across inventory moves
    pub uuid: String,
    pub entity: ManagedRef,
    pub host_system_id: Option<String>,
    pub guest_id: Option<String>,
    pub is_template: bool,
    /// Warnings returned by spec validation
    pub warnings: Vec<String>,
}

/// Targets and spec gathered before anything is submitted.
struct Prepared {
    datastore: ManagedRef,
    pool: ManagedRef,
    folder: ManagedRef,
    host: Option<ManagedRef>,
    descriptor: String,
    spec: ImportSpec,
}

/// Runs remote calls under the import's cancellation token and deadline.
struct CallScope {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl CallScope {
    fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    async fn run<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(operation, "Cancelled");
                Err(ImportError::Cancelled)
            }
            _ = tokio::time::sleep_until(self.deadline) => Err(ImportError::Timeout(format!(
                "{} did not finish within {:?}",
                operation, self.timeout
            ))),
            result = call => result,
        }
    }
}

/// Drives the staged import protocol against a [`DeploymentEndpoint`].
///
/// ```text
/// Submitted → SpecValidated → LeaseOpen → Uploading → LeaseComplete → EntityFinalized
///      └──────────────┴────────────┴───────────┴────────────┴──► Failed
/// ```
pub struct DeploymentOrchestrator {
    endpoint: Arc<dyn DeploymentEndpoint>,
    inventory: Arc<dyn InventoryLocator>,
    source: ByteSource,
    config: DeployConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    state: DeployState,
    history: Vec<DeployState>,
}

impl DeploymentOrchestrator {
    pub fn new(
        endpoint: Arc<dyn DeploymentEndpoint>,
        inventory: Arc<dyn InventoryLocator>,
        source: ByteSource,
        config: DeployConfig,
    ) -> Self {
        Self {
            endpoint,
            inventory,
            source,
            config,
            progress: Arc::new(TracingProgress),
            cancel: CancellationToken::new(),
            state: DeployState::Submitted,
            history: vec![DeployState::Submitted],
        }
    }

    /// Send progress events to `sink` instead of the tracing log.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Govern imports with an external cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current stage of the last import.
    pub fn state(&self) -> DeployState {
        self.state
    }

    /// Stages visited by the last import, in order.
    pub fn history(&self) -> &[DeployState] {
        &self.history
    }

    /// Import an appliance. Either the entity is finalized and its UUID
    /// returned, or the error carries the stage it aborted at.
    pub async fn import(&mut self, request: &ImportRequest) -> Result<ImportedEntity> {
        self.state = DeployState::Submitted;
        self.history = vec![DeployState::Submitted];

        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.timeout());
        let scope = CallScope::new(self.cancel.clone(), timeout);

        tracing::info!(
            archive = %request.archive,
            name = %request.name,
            timeout_secs = timeout.as_secs(),
            "Importing appliance"
        );

        match self.run(request, &scope).await {
            Ok(imported) => {
                tracing::info!(uuid = %imported.uuid, entity = %imported.entity, "Appliance imported");
                Ok(imported)
            }
            Err(e) => {
                let stage = self.state;
                self.advance(DeployState::Failed);
                tracing::error!(stage = %stage, error = %e, "Import failed");
                Err(e.at_stage(stage))
            }
        }
    }

    /// Destroy a previously imported entity by UUID.
    pub async fn destroy(&self, uuid: &str) -> Result<()> {
        let scope = CallScope::new(self.cancel.clone(), self.config.timeout());
        let entity = scope
            .run("find_by_uuid", self.inventory.find_by_uuid(uuid))
            .await?
            .ok_or_else(|| ImportError::EntityNotFound(uuid.to_string()))?;

        tracing::info!(uuid = %uuid, entity = %entity, "Destroying entity");
        scope.run("destroy", self.endpoint.destroy(&entity)).await
    }

    /// Look up a previously imported entity by UUID.
    pub async fn read(&self, uuid: &str) -> Result<Option<ManagedRef>> {
        let scope = CallScope::new(self.cancel.clone(), self.config.timeout());
        scope
            .run("find_by_uuid", self.inventory.find_by_uuid(uuid))
            .await
    }

    fn advance(&mut self, to: DeployState) {
        if !self.state.can_transition_to(to) {
            tracing::error!(from = %self.state, to = %to, "Invalid deploy state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %to, "Deploy state transition");
        self.state = to;
        self.history.push(to);
    }

    async fn run(&mut self, request: &ImportRequest, scope: &CallScope) -> Result<ImportedEntity> {
        let archive = TapeArchive::new(&request.archive, self.source.clone());

        let prepared = scope
            .run("prepare", self.prepare(request, &archive))
            .await?;

        let validation = scope
            .run(
                "validate_spec",
                self.endpoint.validate_spec(
                    &prepared.descriptor,
                    &prepared.pool,
                    &prepared.datastore,
                    &prepared.spec,
                ),
            )
            .await?;
        self.advance(DeployState::SpecValidated);
        for warning in &validation.warnings {
            tracing::warn!(warning = %warning, "Import spec warning");
        }
        if let Some(first) = validation.errors.first() {
            return Err(ImportError::SpecRejected(first.clone()));
        }
        let plan = validation.plan.ok_or_else(|| {
            ImportError::SpecRejected("endpoint returned no deployment plan".to_string())
        })?;

        let entity = self.transfer(&plan, &prepared, &archive, scope).await?;

        let options = &request.options;
        let mut known_uuid = None;
        let (uuid, host_system_id, guest_id) = match self
            .finalize(&entity, options, scope, &mut known_uuid)
            .await
        {
            Ok(details) => details,
            Err(e) => {
                tracing::error!(
                    entity = %entity,
                    uuid = ?known_uuid,
                    error = %e,
                    "Entity created but not finalized"
                );
                return Err(ImportError::Unfinalized {
                    entity: entity.value.clone(),
                    uuid: known_uuid,
                    source: Box::new(e),
                });
            }
        };
        self.advance(DeployState::EntityFinalized);

        Ok(ImportedEntity {
            uuid,
            entity,
            host_system_id,
            guest_id,
            is_template: options.mark_as_template,
            warnings: validation.warnings,
        })
    }

    /// Read back the created entity and apply the finishing options. The
    /// UUID is recorded in `known_uuid` as soon as it is read.
    async fn finalize(
        &self,
        entity: &ManagedRef,
        options: &ImportOptions,
        scope: &CallScope,
        known_uuid: &mut Option<String>,
    ) -> Result<(String, Option<String>, Option<String>)> {
        let uuid = scope
            .run("entity_uuid", self.endpoint.entity_uuid(entity))
            .await?;
        *known_uuid = Some(uuid.clone());

        let host_system_id = scope
            .run("entity_host", self.endpoint.entity_host(entity))
            .await?;
        let guest_id = scope
            .run("guest_id", self.endpoint.guest_id(entity))
            .await?;

        if options.mark_as_template {
            scope
                .run("mark_as_template", self.endpoint.mark_as_template(entity))
                .await?;
        }
        if options.power_on || options.inject_ovf_env || options.wait_for_ip {
            tracing::debug!(
                power_on = options.power_on,
                inject_ovf_env = options.inject_ovf_env,
                wait_for_ip = options.wait_for_ip,
                "Power options are left to the caller"
            );
        }

        Ok((uuid, host_system_id, guest_id))
    }

    async fn prepare(&self, request: &ImportRequest, archive: &TapeArchive) -> Result<Prepared> {
        let inventory = self.inventory.as_ref();

        let datacenter = match non_empty(request.datacenter_id.as_deref()) {
            Some(id) => Some(inventory.find_by_id(InventoryKind::Datacenter, id).await?),
            None => None,
        };
        let datastore = inventory
            .find_by_id(InventoryKind::Datastore, &request.datastore_id)
            .await?;
        let pool = inventory
            .find_by_id(InventoryKind::ResourcePool, &request.resource_pool_id)
            .await?;
        let host = match non_empty(request.host_system_id.as_deref()) {
            Some(id) => Some(inventory.find_by_id(InventoryKind::HostSystem, id).await?),
            None => None,
        };
        let folder = inventory
            .find_by_name(
                InventoryKind::Folder,
                request.folder.as_deref().unwrap_or_default(),
                datacenter.as_ref(),
            )
            .await?;

        let (member, bytes) = archive.read_member(DESCRIPTOR_PATTERN).await?;
        tracing::debug!(member = %member, size = bytes.len(), "Read OVF descriptor");
        let parsed = VirtualSystemDescriptor::parse(&bytes)?;
        let descriptor = String::from_utf8(bytes).map_err(|e| {
            ImportError::MalformedDescriptor(format!("descriptor is not valid UTF-8: {}", e))
        })?;

        let networks = InventoryNetworks::new(inventory, datacenter);
        let spec = ImportSpecBuilder::new(&request.options)
            .entity_name(&request.name)
            .locale(&self.config.locale)
            .build(&parsed, &networks)
            .await?;

        Ok(Prepared {
            datastore,
            pool,
            folder,
            host,
            descriptor,
            spec,
        })
    }

    /// Open the lease, upload every requested file and complete it. Any
    /// failure aborts the lease before the error is returned.
    async fn transfer(
        &mut self,
        plan: &DeploymentPlan,
        prepared: &Prepared,
        archive: &TapeArchive,
        scope: &CallScope,
    ) -> Result<ManagedRef> {
        let lease = scope
            .run(
                "open_lease",
                self.endpoint.open_lease(
                    plan,
                    &prepared.pool,
                    &prepared.folder,
                    prepared.host.as_ref(),
                ),
            )
            .await?;
        let mut guard = LeaseGuard::new(self.endpoint.clone(), lease);

        match self.hold_lease(&mut guard, archive, scope).await {
            Ok(entity) => Ok(entity),
            Err(e) => {
                guard.abort(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn hold_lease(
        &mut self,
        guard: &mut LeaseGuard,
        archive: &TapeArchive,
        scope: &CallScope,
    ) -> Result<ManagedRef> {
        if guard.lease().state == LeaseState::Initializing {
            let ready = scope
                .run("wait_lease", self.endpoint.wait_lease(guard.lease()))
                .await?;
            guard.replace(ready);
        }
        match &guard.lease().state {
            LeaseState::Ready => {}
            LeaseState::Error(message) => {
                return Err(ImportError::LeaseFailed {
                    lease: guard.lease().id.clone(),
                    message: message.clone(),
                })
            }
            LeaseState::Initializing => {
                return Err(ImportError::LeaseFailed {
                    lease: guard.lease().id.clone(),
                    message: "lease never became ready".to_string(),
                })
            }
        }
        self.advance(DeployState::LeaseOpen);
        tracing::info!(
            lease = %guard.lease().id,
            files = guard.lease().file_requests.len(),
            "Lease ready"
        );

        let progress = UploadProgress::new();
        let updater = ProgressUpdater::start(
            self.endpoint.clone(),
            guard.lease().clone(),
            progress.clone(),
            self.progress.clone(),
            self.config.progress_interval(),
        );
        self.advance(DeployState::Uploading);

        let uploaded = self
            .upload_all(guard.lease(), archive, &progress, scope)
            .await;
        updater.stop().await;
        uploaded?;

        let entity = scope.run("complete_lease", guard.complete()).await?;
        self.advance(DeployState::LeaseComplete);
        Ok(entity)
    }

    /// Upload every file request in lease order. The first failure stops
    /// the loop.
    async fn upload_all(
        &self,
        lease: &Lease,
        archive: &TapeArchive,
        progress: &UploadProgress,
        scope: &CallScope,
    ) -> Result<()> {
        let total = Some(lease.total_bytes()).filter(|t| *t > 0);

        for request in &lease.file_requests {
            let base = request.path.rsplit('/').next().unwrap_or(request.path.as_str());
            let pattern = glob::Pattern::escape(base);

            let entry = match scope.run("open archive member", archive.open(&pattern)).await {
                Ok(entry) => entry,
                Err(ImportError::NotFound { .. }) if !request.required => {
                    tracing::warn!(
                        lease = %lease.id,
                        file = %request.path,
                        "Optional file missing from archive, skipping"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            tracing::info!(
                lease = %lease.id,
                file = %request.path,
                size = entry.size(),
                "Uploading file"
            );
            self.progress.report(
                ProgressEvent::new(events::UPLOAD_FILE_STARTED, &lease.id)
                    .with_file(&request.path)
                    .with_bytes(progress.bytes_done(), total),
            );

            if let Err(e) = scope
                .run(
                    "upload",
                    self.endpoint.upload(lease, request, entry, progress.clone()),
                )
                .await
            {
                tracing::error!(lease = %lease.id, file = %request.path, error = %e, "Upload failed");
                return Err(e);
            }

            self.progress.report(
                ProgressEvent::new(events::UPLOAD_FILE_COMPLETED, &lease.id)
                    .with_file(&request.path)
                    .with_bytes(progress.bytes_done(), total),
            );
        }

        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
