//! Deployment state machine.

use serde::{Deserialize, Serialize};

/// Stage of a single appliance import.
///
/// The machine is linear: each state has at most one successor, and
/// `Failed` can be entered from any state that is not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeployState {
    /// Request accepted, inventory located, descriptor parsed
    Submitted,

    /// Endpoint accepted the import spec
    SpecValidated,

    /// Transfer lease is open and ready
    LeaseOpen,

    /// Payload files are being streamed against the lease
    Uploading,

    /// Lease committed, entity created by the endpoint
    LeaseComplete,

    /// Entity transitioned to its terminal form and identified by UUID
    EntityFinalized,

    /// Import aborted
    Failed,
}

impl DeployState {
    /// The successor on the success path, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Submitted => Some(Self::SpecValidated),
            Self::SpecValidated => Some(Self::LeaseOpen),
            Self::LeaseOpen => Some(Self::Uploading),
            Self::Uploading => Some(Self::LeaseComplete),
            Self::LeaseComplete => Some(Self::EntityFinalized),
            Self::EntityFinalized | Self::Failed => None,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::EntityFinalized | Self::Failed)
    }

    /// Whether `to` is a legal transition from `self`.
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }

    /// Whether a transfer lease may be held in this state.
    pub fn holds_lease(self) -> bool {
        matches!(self, Self::LeaseOpen | Self::Uploading)
    }
}

impl std::fmt::Display for DeployState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Submitted => "submitted",
            Self::SpecValidated => "spec-validated",
            Self::LeaseOpen => "lease-open",
            Self::Uploading => "uploading",
            Self::LeaseComplete => "lease-complete",
            Self::EntityFinalized => "entity-finalized",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
