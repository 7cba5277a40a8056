//! Staged deployment of an appliance onto a remote endpoint.

mod endpoint;
mod lease;
mod orchestrator;
mod progress;

pub use endpoint::{
    DeploymentEndpoint, DeploymentPlan, FileRequest, Lease, LeaseState, ValidationResult,
};
pub use lease::LeaseGuard;
pub use orchestrator::{DeploymentOrchestrator, ImportRequest, ImportedEntity};
pub use progress::{ProgressReader, ProgressUpdater, UploadProgress};
