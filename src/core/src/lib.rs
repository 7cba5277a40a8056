//! OVA Import Core - Foundational Types
//!
//! Error taxonomy, configuration, user options, progress events and the
//! deployment state machine shared by the runtime and the CLI.

pub mod config;
pub mod error;
pub mod event;
pub mod options;
pub mod state;

// Re-export commonly used types
pub use config::{DeployConfig, ImportConfig, LogLevel, TransportConfig};
pub use error::{ImportError, Result};
pub use event::{ProgressEmitter, ProgressEvent, ProgressSink, TracingProgress};
pub use options::{ImportOptions, NetworkOverride, PropertyOverride, PropertySpec};
pub use state::DeployState;

/// OVA Import version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
