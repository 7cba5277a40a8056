//! Inventory lookup on the remote endpoint.

use async_trait::async_trait;
use ova_import_core::error::Result;
use serde::{Deserialize, Serialize};

/// Kinds of inventory objects an import touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InventoryKind {
    Datastore,
    Folder,
    HostSystem,
    ResourcePool,
    Datacenter,
    Network,
    VirtualMachine,
}

impl std::fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Datastore => "datastore",
            Self::Folder => "folder",
            Self::HostSystem => "host system",
            Self::ResourcePool => "resource pool",
            Self::Datacenter => "datacenter",
            Self::Network => "network",
            Self::VirtualMachine => "virtual machine",
        };
        f.write_str(name)
    }
}

/// Opaque reference to a remote inventory object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedRef {
    pub kind: InventoryKind,
    pub value: String,
}

impl ManagedRef {
    pub fn new(kind: InventoryKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ManagedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Locates existing inventory objects.
///
/// Lookups that cannot be resolved fail with `ImportError::NotFound`.
#[async_trait]
pub trait InventoryLocator: Send + Sync {
    /// Find an object by its managed object id.
    async fn find_by_id(&self, kind: InventoryKind, id: &str) -> Result<ManagedRef>;

    /// Find an object by name, optionally scoped to a datacenter. An empty
    /// folder name resolves to the datacenter's default VM folder.
    async fn find_by_name(
        &self,
        kind: InventoryKind,
        name: &str,
        datacenter: Option<&ManagedRef>,
    ) -> Result<ManagedRef>;

    /// The datacenter used when none is named explicitly.
    async fn default_datacenter(&self) -> Result<ManagedRef>;

    /// Find a virtual machine by its instance UUID.
    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<ManagedRef>>;
}

/// Resolves network names to concrete endpoint networks.
#[async_trait]
pub trait NetworkResolver: Send + Sync {
    async fn resolve_network(&self, name: &str) -> Result<ManagedRef>;
}

/// Network lookups through an [`InventoryLocator`], scoped to one
/// datacenter.
pub struct InventoryNetworks<'a> {
    locator: &'a dyn InventoryLocator,
    datacenter: Option<ManagedRef>,
}

impl<'a> InventoryNetworks<'a> {
    pub fn new(locator: &'a dyn InventoryLocator, datacenter: Option<ManagedRef>) -> Self {
        Self {
            locator,
            datacenter,
        }
    }
}

#[async_trait]
impl NetworkResolver for InventoryNetworks<'_> {
    async fn resolve_network(&self, name: &str) -> Result<ManagedRef> {
        self.locator
            .find_by_name(InventoryKind::Network, name, self.datacenter.as_ref())
            .await
    }
}

/// Offline resolver that treats every network name as its own reference.
/// Used for planning without an endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNetworks;

#[async_trait]
impl NetworkResolver for IdentityNetworks {
    async fn resolve_network(&self, name: &str) -> Result<ManagedRef> {
        Ok(ManagedRef::new(InventoryKind::Network, name))
    }
}
