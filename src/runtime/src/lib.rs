//! OVA Import Runtime - archive access, OVF handling and staged deployment.
//!
//! This crate reads appliance archives (local or remote tar containers),
//! turns their OVF descriptor into an import spec and drives the lease-based
//! upload protocol of a remote virtualization endpoint.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod deploy;
pub mod inventory;
pub mod ovf;

// Re-export common types
pub use archive::{ArchiveEntry, ByteSource, HttpFetcher, Location, MemberInfo, RemoteFetch, TapeArchive};
pub use deploy::{
    DeploymentEndpoint, DeploymentOrchestrator, DeploymentPlan, FileRequest, ImportRequest,
    ImportedEntity, Lease, LeaseState, UploadProgress, ValidationResult,
};
pub use inventory::{IdentityNetworks, InventoryKind, InventoryLocator, InventoryNetworks, ManagedRef, NetworkResolver};
pub use ovf::{options_template, ImportSpec, ImportSpecBuilder, VirtualSystemDescriptor};

/// OVA Import Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Archive member holding the OVF descriptor.
pub const DESCRIPTOR_PATTERN: &str = "*.ovf";
