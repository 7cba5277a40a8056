use thiserror::Error;

use crate::state::DeployState;

/// OVA import error types
#[derive(Error, Debug)]
pub enum ImportError {
    /// Location, inventory object or archive member is absent
    #[error("Not found: {what} {name:?}")]
    NotFound { what: String, name: String },

    /// Remote fetch requested without a configured transport
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Network or I/O failure while moving bytes
    #[error("Transport error: {0}")]
    Transport(String),

    /// Filesystem access denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Tar container structure is invalid
    #[error("Corrupt archive {location}: {message}")]
    CorruptArchive { location: String, message: String },

    /// Member pattern is not a valid shell glob
    #[error("Invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// OVF descriptor is not well-formed or lacks a virtual system
    #[error("Malformed OVF descriptor: {0}")]
    MalformedDescriptor(String),

    /// The same override key was given more than once
    #[error("Ambiguous override: {kind} {key:?} is set more than once")]
    AmbiguousOverride { kind: String, key: String },

    /// A network binding could not be resolved on the endpoint
    #[error("Network not found: {name} -> {target}: {message}")]
    NetworkNotFound {
        name: String,
        target: String,
        message: String,
    },

    /// Endpoint validation returned a hard error (first message, verbatim)
    #[error("Import spec rejected: {0}")]
    SpecRejected(String),

    /// Transfer lease entered its error state
    #[error("Lease {lease} failed: {message}")]
    LeaseFailed { lease: String, message: String },

    /// No entity with the given UUID exists
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// The governing cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Endpoint call failed
    #[error("Remote error: {operation} - {message}")]
    Remote { operation: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The entity exists on the endpoint but a finishing step failed
    #[error("Entity {entity} was created but not finalized: {source}")]
    Unfinalized {
        entity: String,
        uuid: Option<String>,
        #[source]
        source: Box<ImportError>,
    },

    /// Import aborted at a specific stage
    #[error("Import failed at {stage}: {source}")]
    Failed {
        stage: DeployState,
        #[source]
        source: Box<ImportError>,
    },
}

impl ImportError {
    /// Shorthand for [`ImportError::NotFound`].
    pub fn not_found(what: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            name: name.into(),
        }
    }

    /// Shorthand for [`ImportError::Remote`].
    pub fn remote(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Wrap this error with the stage it aborted. Already-wrapped errors
    /// keep their original stage.
    pub fn at_stage(self, stage: DeployState) -> Self {
        match self {
            Self::Failed { .. } => self,
            other => Self::Failed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The error beneath any stage or entity wrappers.
    pub fn root_cause(&self) -> &ImportError {
        let mut current = self;
        loop {
            match current {
                Self::Failed { source, .. } | Self::Unfinalized { source, .. } => current = source,
                other => return other,
            }
        }
    }

    /// The entity left behind by an import that failed after it was
    /// created, with its UUID when that was read.
    pub fn created_entity(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Self::Failed { source, .. } => source.created_entity(),
            Self::Unfinalized { entity, uuid, .. } => Some((entity.as_str(), uuid.as_deref())),
            _ => None,
        }
    }

    /// The stage the import aborted at, if this error carries one.
    pub fn stage(&self) -> Option<DeployState> {
        match self {
            Self::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ImportError {
    fn from(err: serde_yaml::Error) -> Self {
        ImportError::SerializationError(err.to_string())
    }
}

/// Result type alias for OVA import operations
pub type Result<T> = std::result::Result<T, ImportError>;
