//! OVF descriptor handling and import spec construction.

mod descriptor;
mod spec;

pub use descriptor::{
    DeploymentOptionDecl, FileReference, PropertyDecl, VirtualSystemDescriptor,
    GENERIC_APPLIANCE_NAME,
};
pub use spec::{
    options_template, reconcile_networks, reconcile_properties, ImportSpec, ImportSpecBuilder,
    KeyValue, NetworkBinding, DEFAULT_LOCALE,
};
