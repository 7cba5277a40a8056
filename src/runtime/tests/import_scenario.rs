//! End-to-end import scenarios against in-memory endpoint and inventory stubs.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ova_import_core::config::DeployConfig;
use ova_import_core::error::{ImportError, Result};
use ova_import_core::event::{events, ProgressEvent, ProgressSink};
use ova_import_core::options::{ImportOptions, NetworkOverride, PropertyOverride};
use ova_import_core::state::DeployState;
use ova_import_runtime::archive::ArchiveEntry;
use ova_import_runtime::{
    ByteSource, DeploymentEndpoint, DeploymentOrchestrator, DeploymentPlan, FileRequest,
    ImportRequest, ImportSpec, InventoryKind, InventoryLocator, Lease, LeaseState, ManagedRef,
    UploadProgress, ValidationResult,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const APPLIANCE_OVF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://schemas.dmtf.org/ovf/envelope/1"
          xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <References>
    <File ovf:id="file1" ovf:href="disk1.vmdk" ovf:size="6"/>
    <File ovf:id="file2" ovf:href="disk2.vmdk" ovf:size="8"/>
  </References>
  <NetworkSection>
    <Info>Logical networks</Info>
    <Network ovf:name="VM Network"/>
  </NetworkSection>
  <VirtualSystem ovf:id="appliance">
    <Info>A virtual machine</Info>
    <Name>Appliance</Name>
    <ProductSection>
      <Info>Settings</Info>
      <Property ovf:key="cpu" ovf:type="string" ovf:value="2"/>
    </ProductSection>
  </VirtualSystem>
</Envelope>
"#;

const ENTITY_UUID: &str = "4201-aaaa-bbbb";

/// Inventory and endpoint in one: both views share the entity table.
struct World {
    calls: Mutex<Vec<String>>,
    validation: ValidationResult,
    lease_state: LeaseState,
    files: Vec<FileRequest>,
    networks: Vec<&'static str>,
    fail_upload: Option<&'static str>,
    hang_upload: Option<&'static str>,
    hang_template: bool,
    spec: Mutex<Option<ImportSpec>>,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    entities: Mutex<HashMap<String, ManagedRef>>,
}

impl World {
    fn new(files: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            validation: ValidationResult::accepted(DeploymentPlan {
                id: "plan-1".to_string(),
                total_bytes: None,
            }),
            lease_state: LeaseState::Ready,
            files: files.iter().map(|f| file_request(f, true)).collect(),
            networks: vec!["prod-net", "VM Network"],
            fail_upload: None,
            hang_upload: None,
            hang_template: false,
            spec: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
            entities: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    fn upload_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("upload ").map(str::to_string))
            .collect()
    }
}

fn file_request(path: &str, required: bool) -> FileRequest {
    FileRequest {
        device_id: format!("/vm/{}", path),
        path: path.to_string(),
        size: None,
        target_url: Some(format!("https://esx-01/nfc/lease-1/{}", path)),
        required,
    }
}

#[async_trait]
impl InventoryLocator for World {
    async fn find_by_id(&self, kind: InventoryKind, id: &str) -> Result<ManagedRef> {
        self.record(format!("find {} {}", kind, id));
        if id == "missing" {
            return Err(ImportError::not_found(kind.to_string(), id));
        }
        Ok(ManagedRef::new(kind, id))
    }

    async fn find_by_name(
        &self,
        kind: InventoryKind,
        name: &str,
        _datacenter: Option<&ManagedRef>,
    ) -> Result<ManagedRef> {
        match kind {
            InventoryKind::Folder if name.is_empty() => {
                Ok(ManagedRef::new(InventoryKind::Folder, "group-v3"))
            }
            InventoryKind::Network if !self.networks.contains(&name) => {
                Err(ImportError::not_found("network", name))
            }
            InventoryKind::Network => Ok(ManagedRef::new(kind, format!("network-{}", name))),
            _ => Ok(ManagedRef::new(kind, name)),
        }
    }

    async fn default_datacenter(&self) -> Result<ManagedRef> {
        Ok(ManagedRef::new(InventoryKind::Datacenter, "datacenter-2"))
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<ManagedRef>> {
        Ok(self.entities.lock().unwrap().get(uuid).cloned())
    }
}

#[async_trait]
impl DeploymentEndpoint for World {
    async fn validate_spec(
        &self,
        descriptor: &str,
        _pool: &ManagedRef,
        _datastore: &ManagedRef,
        spec: &ImportSpec,
    ) -> Result<ValidationResult> {
        assert!(descriptor.contains("<Envelope"));
        self.record("validate");
        *self.spec.lock().unwrap() = Some(spec.clone());
        Ok(self.validation.clone())
    }

    async fn open_lease(
        &self,
        _plan: &DeploymentPlan,
        _pool: &ManagedRef,
        _folder: &ManagedRef,
        _host: Option<&ManagedRef>,
    ) -> Result<Lease> {
        self.record("open_lease");
        Ok(Lease {
            id: "lease-1".to_string(),
            state: self.lease_state.clone(),
            entity: None,
            file_requests: self.files.clone(),
        })
    }

    async fn wait_lease(&self, lease: &Lease) -> Result<Lease> {
        self.record("wait_lease");
        Ok(Lease {
            state: LeaseState::Ready,
            ..lease.clone()
        })
    }

    async fn upload(
        &self,
        _lease: &Lease,
        request: &FileRequest,
        entry: ArchiveEntry,
        progress: UploadProgress,
    ) -> Result<()> {
        self.record(format!("upload {}", request.path));
        if self.hang_upload == Some(request.path.as_str()) {
            std::future::pending::<()>().await;
        }
        if self.fail_upload == Some(request.path.as_str()) {
            return Err(ImportError::Transport("connection reset by peer".to_string()));
        }

        let name = entry.name().to_string();
        let bytes = tokio::task::spawn_blocking(move || {
            let mut reader = progress.wrap(entry);
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).map(|_| buf)
        })
        .await
        .map_err(|e| ImportError::Transport(e.to_string()))??;

        self.uploads.lock().unwrap().push((name, bytes));
        Ok(())
    }

    async fn complete_lease(&self, _lease: &Lease) -> Result<ManagedRef> {
        self.record("complete");
        let entity = ManagedRef::new(InventoryKind::VirtualMachine, "vm-101");
        self.entities
            .lock()
            .unwrap()
            .insert(ENTITY_UUID.to_string(), entity.clone());
        Ok(entity)
    }

    async fn abort_lease(&self, _lease: &Lease, _reason: &str) -> Result<()> {
        self.record("abort");
        Ok(())
    }

    async fn entity_uuid(&self, _entity: &ManagedRef) -> Result<String> {
        Ok(ENTITY_UUID.to_string())
    }

    async fn guest_id(&self, _entity: &ManagedRef) -> Result<Option<String>> {
        Ok(Some("otherGuest64".to_string()))
    }

    async fn mark_as_template(&self, _entity: &ManagedRef) -> Result<()> {
        self.record("mark_as_template");
        if self.hang_template {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn destroy(&self, entity: &ManagedRef) -> Result<()> {
        self.record(format!("destroy {}", entity.value));
        self.entities.lock().unwrap().retain(|_, e| e != entity);
        Ok(())
    }
}

#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for CollectingSink {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn write_appliance(dir: &TempDir) -> String {
    let members: [(&str, &[u8]); 3] = [
        ("appliance.ovf", APPLIANCE_OVF.as_bytes()),
        ("disk1.vmdk", b"disk-1"),
        ("disk2.vmdk", b"disk-two"),
    ];

    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content).unwrap();
    }

    let path = dir.path().join("appliance.ova");
    std::fs::write(&path, builder.into_inner().unwrap()).unwrap();
    path.to_string_lossy().to_string()
}

fn request(archive: String) -> ImportRequest {
    ImportRequest {
        datastore_id: "datastore-11".to_string(),
        resource_pool_id: "resgroup-8".to_string(),
        archive,
        options: ImportOptions {
            property_mapping: vec![PropertyOverride::new("cpu", "4")],
            network_mapping: vec![NetworkOverride::new("VM Network", "prod-net")],
            ..Default::default()
        },
        ..Default::default()
    }
}

fn orchestrator(world: &Arc<World>) -> DeploymentOrchestrator {
    let config = DeployConfig {
        progress_interval_ms: 5,
        ..Default::default()
    };
    DeploymentOrchestrator::new(world.clone(), world.clone(), ByteSource::local_only(), config)
}

#[tokio::test]
async fn test_appliance_import_uploads_in_request_order() {
    let dir = TempDir::new().unwrap();
    let world = Arc::new(World::new(&["appliance.ovf", "disk2.vmdk", "disk1.vmdk"]));
    let sink = Arc::new(CollectingSink::default());
    let mut orchestrator = orchestrator(&world).with_progress(sink.clone());

    let imported = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap();

    assert_eq!(imported.uuid, ENTITY_UUID);
    assert_eq!(imported.entity.value, "vm-101");
    assert_eq!(imported.guest_id.as_deref(), Some("otherGuest64"));
    assert!(imported.is_template);

    let spec = world.spec.lock().unwrap().clone().unwrap();
    assert_eq!(spec.entity_name, "Appliance");
    assert_eq!(spec.property("cpu"), Some("4"));
    assert_eq!(spec.property_mapping.len(), 1);
    assert_eq!(
        spec.network("VM Network"),
        Some(&ManagedRef::new(InventoryKind::Network, "network-prod-net"))
    );

    assert_eq!(
        world.upload_calls(),
        vec!["appliance.ovf", "disk2.vmdk", "disk1.vmdk"]
    );
    let uploads = world.uploads.lock().unwrap().clone();
    assert_eq!(uploads[1], ("disk2.vmdk".to_string(), b"disk-two".to_vec()));
    assert_eq!(uploads[2], ("disk1.vmdk".to_string(), b"disk-1".to_vec()));

    assert!(world.called("complete"));
    assert!(world.called("mark_as_template"));
    assert!(!world.called("abort"));

    assert_eq!(orchestrator.state(), DeployState::EntityFinalized);
    assert_eq!(
        orchestrator.history(),
        &[
            DeployState::Submitted,
            DeployState::SpecValidated,
            DeployState::LeaseOpen,
            DeployState::Uploading,
            DeployState::LeaseComplete,
            DeployState::EntityFinalized,
        ]
    );

    let reported = sink.events.lock().unwrap();
    let started: Vec<_> = reported
        .iter()
        .filter(|e| e.key == events::UPLOAD_FILE_STARTED)
        .filter_map(|e| e.file.clone())
        .collect();
    assert_eq!(started, vec!["appliance.ovf", "disk2.vmdk", "disk1.vmdk"]);
}

#[tokio::test]
async fn test_spec_rejection_opens_no_lease() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["disk1.vmdk"]);
    world.validation = ValidationResult {
        plan: None,
        errors: vec!["Host did not have any virtual network defined.".to_string()],
        warnings: vec!["Unsupported hardware family".to_string()],
    };
    let world = Arc::new(world);
    let mut orchestrator = orchestrator(&world);

    let err = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(DeployState::SpecValidated));
    match err.root_cause() {
        ImportError::SpecRejected(message) => {
            assert_eq!(message, "Host did not have any virtual network defined.")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!world.called("open_lease"));
    assert!(!world.called("abort"));
    assert_eq!(err.created_entity(), None);
    assert_eq!(
        orchestrator.history(),
        &[
            DeployState::Submitted,
            DeployState::SpecValidated,
            DeployState::Failed
        ]
    );
}

#[tokio::test]
async fn test_upload_failure_aborts_lease_and_skips_completion() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["appliance.ovf", "disk1.vmdk", "disk2.vmdk"]);
    world.fail_upload = Some("disk1.vmdk");
    let world = Arc::new(world);
    let mut orchestrator = orchestrator(&world);

    let err = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(DeployState::Uploading));
    assert!(matches!(err.root_cause(), ImportError::Transport(_)));
    assert_eq!(world.upload_calls(), vec!["appliance.ovf", "disk1.vmdk"]);
    assert!(world.called("abort"));
    assert!(!world.called("complete"));
    assert_eq!(orchestrator.state(), DeployState::Failed);
}

#[tokio::test]
async fn test_cancellation_during_upload_aborts_lease() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["appliance.ovf", "disk1.vmdk", "disk2.vmdk"]);
    world.hang_upload = Some("disk2.vmdk");
    let world = Arc::new(world);

    let token = CancellationToken::new();
    let mut orchestrator = orchestrator(&world).with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.stage(), Some(DeployState::Uploading));
    assert!(matches!(err.root_cause(), ImportError::Cancelled));
    assert_eq!(
        world.upload_calls(),
        vec!["appliance.ovf", "disk1.vmdk", "disk2.vmdk"]
    );
    assert!(world.called("abort"));
    assert!(!world.called("complete"));
    assert_eq!(orchestrator.state(), DeployState::Failed);
}

#[tokio::test]
async fn test_cancellation_after_completion_reports_created_entity() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["appliance.ovf", "disk1.vmdk", "disk2.vmdk"]);
    world.hang_template = true;
    let world = Arc::new(world);

    let token = CancellationToken::new();
    let mut orchestrator = orchestrator(&world).with_cancellation(token.clone());

    let watcher = world.clone();
    let canceller = tokio::spawn(async move {
        while !watcher.called("mark_as_template") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
    });

    let err = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.stage(), Some(DeployState::LeaseComplete));
    assert!(matches!(err.root_cause(), ImportError::Cancelled));
    assert_eq!(err.created_entity(), Some(("vm-101", Some(ENTITY_UUID))));
    assert!(world.called("complete"));
    assert!(!world.called("abort"));
    assert_eq!(orchestrator.state(), DeployState::Failed);
}

#[tokio::test]
async fn test_deadline_during_upload_aborts_lease() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["disk1.vmdk"]);
    world.hang_upload = Some("disk1.vmdk");
    let world = Arc::new(world);
    let mut orchestrator = orchestrator(&world);

    let mut req = request(write_appliance(&dir));
    req.timeout_secs = Some(1);
    let err = orchestrator.import(&req).await.unwrap_err();

    assert!(matches!(err.root_cause(), ImportError::Timeout(_)));
    assert!(world.called("abort"));
}

#[tokio::test]
async fn test_destroy_twice_reports_entity_not_found() {
    let dir = TempDir::new().unwrap();
    let world = Arc::new(World::new(&["disk1.vmdk"]));
    let mut orchestrator = orchestrator(&world);

    let imported = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap();
    assert!(orchestrator.read(&imported.uuid).await.unwrap().is_some());

    orchestrator.destroy(&imported.uuid).await.unwrap();
    assert!(world.called("destroy vm-101"));
    assert!(orchestrator.read(&imported.uuid).await.unwrap().is_none());

    let err = orchestrator.destroy(&imported.uuid).await.unwrap_err();
    assert!(matches!(err, ImportError::EntityNotFound(ref uuid) if uuid == ENTITY_UUID));
}

#[tokio::test]
async fn test_remote_archive_without_transport_is_unsupported() {
    let world = Arc::new(World::new(&["disk1.vmdk"]));
    let mut orchestrator = orchestrator(&world);

    let err = orchestrator
        .import(&request("https://host/x.ova".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), ImportError::Unsupported(_)));
    assert_eq!(err.stage(), Some(DeployState::Submitted));
    assert!(!world.called("validate"));
}

#[tokio::test]
async fn test_unresolvable_network_fails_before_validation() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["disk1.vmdk"]);
    world.networks = vec!["VM Network"];
    let world = Arc::new(world);
    let mut orchestrator = orchestrator(&world);

    let err = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap_err();

    match err.root_cause() {
        ImportError::NetworkNotFound { name, target, .. } => {
            assert_eq!(name, "VM Network");
            assert_eq!(target, "prod-net");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!world.called("validate"));
}

#[tokio::test]
async fn test_initializing_lease_is_awaited() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["disk1.vmdk"]);
    world.lease_state = LeaseState::Initializing;
    let world = Arc::new(world);
    let mut orchestrator = orchestrator(&world);

    orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap();

    let calls = world.calls();
    let wait = calls.iter().position(|c| c == "wait_lease").unwrap();
    let upload = calls.iter().position(|c| c.starts_with("upload")).unwrap();
    assert!(wait < upload);
}

#[tokio::test]
async fn test_lease_error_state_fails_and_aborts() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["disk1.vmdk"]);
    world.lease_state = LeaseState::Error("no free lease slots".to_string());
    let world = Arc::new(world);
    let mut orchestrator = orchestrator(&world);

    let err = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(DeployState::SpecValidated));
    assert!(matches!(
        err.root_cause(),
        ImportError::LeaseFailed { message, .. } if message == "no free lease slots"
    ));
    assert!(world.called("abort"));
    assert!(world.upload_calls().is_empty());
}

#[tokio::test]
async fn test_optional_missing_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["disk1.vmdk"]);
    world.files.push(file_request("tools.iso", false));
    world.files.push(file_request("disk2.vmdk", true));
    let world = Arc::new(world);
    let mut orchestrator = orchestrator(&world);

    orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap();

    assert_eq!(world.upload_calls(), vec!["disk1.vmdk", "disk2.vmdk"]);
    assert!(world.called("complete"));
}

#[tokio::test]
async fn test_required_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let mut world = World::new(&["disk1.vmdk"]);
    world.files.push(file_request("disk3.vmdk", true));
    let world = Arc::new(world);
    let mut orchestrator = orchestrator(&world);

    let err = orchestrator
        .import(&request(write_appliance(&dir)))
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), ImportError::NotFound { .. }));
    assert_eq!(err.stage(), Some(DeployState::Uploading));
    assert!(world.called("abort"));
}

#[tokio::test]
async fn test_template_conversion_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let world = Arc::new(World::new(&["disk1.vmdk"]));
    let mut orchestrator = orchestrator(&world);

    let mut req = request(write_appliance(&dir));
    req.options.mark_as_template = false;
    req.name = "appliance-01".to_string();
    let imported = orchestrator.import(&req).await.unwrap();

    assert!(!imported.is_template);
    assert!(!world.called("mark_as_template"));
    assert_eq!(
        world.spec.lock().unwrap().as_ref().unwrap().entity_name,
        "appliance-01"
    );
}

#[tokio::test]
async fn test_missing_inventory_object_fails_early() {
    let dir = TempDir::new().unwrap();
    let world = Arc::new(World::new(&["disk1.vmdk"]));
    let mut orchestrator = orchestrator(&world);

    let mut req = request(write_appliance(&dir));
    req.resource_pool_id = "missing".to_string();
    let err = orchestrator.import(&req).await.unwrap_err();

    assert!(matches!(err.root_cause(), ImportError::NotFound { .. }));
    assert_eq!(err.stage(), Some(DeployState::Submitted));
    assert!(!world.called("validate"));
}
