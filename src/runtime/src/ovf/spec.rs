//! Import spec construction.
//!
//! Reconciliation is split into pure functions so the builder returns either
//! a complete spec or the first error; nothing is partially applied.

use std::collections::HashMap;

use ova_import_core::error::{ImportError, Result};
use ova_import_core::options::{
    ImportOptions, NetworkOverride, PropertyOverride, DISK_PROVISIONING_OPTIONS,
    IP_ALLOCATION_POLICY_OPTIONS, IP_PROTOCOL_OPTIONS,
};
use serde::Serialize;

use super::descriptor::VirtualSystemDescriptor;
use crate::inventory::{ManagedRef, NetworkResolver};

/// Locale used when none is configured.
pub const DEFAULT_LOCALE: &str = "US";

/// A property binding sent to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A descriptor network bound to a concrete endpoint network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkBinding {
    pub name: String,
    pub network: ManagedRef,
}

/// The finalized deployment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSpec {
    /// Never empty
    pub entity_name: String,
    pub disk_provisioning: String,
    pub ip_allocation_policy: String,
    pub ip_protocol: String,
    pub deployment_option: String,
    pub locale: String,
    pub annotation: String,
    pub property_mapping: Vec<KeyValue>,
    pub network_mapping: Vec<NetworkBinding>,
}

impl ImportSpec {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.property_mapping
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }

    pub fn network(&self, name: &str) -> Option<&ManagedRef> {
        self.network_mapping
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.network)
    }
}

/// Combines a parsed descriptor with user options into an [`ImportSpec`].
pub struct ImportSpecBuilder<'a> {
    options: &'a ImportOptions,
    entity_name: Option<String>,
    locale: String,
}

impl<'a> ImportSpecBuilder<'a> {
    pub fn new(options: &'a ImportOptions) -> Self {
        Self {
            options,
            entity_name: None,
            locale: DEFAULT_LOCALE.to_string(),
        }
    }

    /// Explicit entity name. Takes precedence over `options.name`; empty
    /// names are ignored.
    pub fn entity_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.entity_name = Some(name);
        }
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub async fn build(
        &self,
        descriptor: &VirtualSystemDescriptor,
        resolver: &dyn NetworkResolver,
    ) -> Result<ImportSpec> {
        let property_mapping = reconcile_properties(descriptor, &self.options.property_mapping)?;
        let targets = reconcile_networks(&descriptor.networks, &self.options.network_mapping)?;

        let mut network_mapping = Vec::with_capacity(targets.len());
        for (name, target) in targets {
            let network = resolver.resolve_network(&target).await.map_err(|e| {
                ImportError::NetworkNotFound {
                    name: name.clone(),
                    target: target.clone(),
                    message: e.to_string(),
                }
            })?;
            tracing::debug!(name = %name, target = %target, network = %network, "Resolved network");
            network_mapping.push(NetworkBinding { name, network });
        }

        let entity_name = self
            .entity_name
            .clone()
            .or_else(|| {
                self.options
                    .name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
            })
            .unwrap_or_else(|| descriptor.display_name().to_string());

        Ok(ImportSpec {
            entity_name,
            disk_provisioning: self.options.disk_provisioning.clone(),
            ip_allocation_policy: self.options.ip_allocation_policy.clone(),
            ip_protocol: self.options.ip_protocol.clone(),
            deployment_option: self.options.deployment.clone(),
            locale: self.locale.clone(),
            annotation: self.options.annotation.clone(),
            property_mapping,
            network_mapping,
        })
    }
}

/// Declared properties in document order with override values applied,
/// followed by override-only keys in override order.
///
/// A key declared twice keeps its first position and the later value.
/// Overrides naming the same key twice are rejected.
pub fn reconcile_properties(
    descriptor: &VirtualSystemDescriptor,
    overrides: &[PropertyOverride],
) -> Result<Vec<KeyValue>> {
    let mut override_values: HashMap<&str, &str> = HashMap::new();
    for o in overrides {
        if override_values.insert(&o.key, &o.value).is_some() {
            return Err(ImportError::AmbiguousOverride {
                kind: "property".to_string(),
                key: o.key.clone(),
            });
        }
    }

    let mut mapping: Vec<KeyValue> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for decl in &descriptor.properties {
        match index.get(&decl.key) {
            Some(&i) => mapping[i].value = decl.value.clone(),
            None => {
                index.insert(decl.key.clone(), mapping.len());
                mapping.push(KeyValue::new(&decl.key, &decl.value));
            }
        }
    }

    for kv in &mut mapping {
        if let Some(value) = override_values.get(kv.key.as_str()) {
            kv.value = value.to_string();
        }
    }
    for o in overrides {
        if !index.contains_key(&o.key) {
            mapping.push(KeyValue::new(&o.key, &o.value));
        }
    }

    Ok(mapping)
}

/// `(source name, target name)` pairs: every declared network mapped to
/// itself unless overridden, followed by override-only names.
pub fn reconcile_networks(
    declared: &[String],
    overrides: &[NetworkOverride],
) -> Result<Vec<(String, String)>> {
    let mut targets: HashMap<&str, &str> = HashMap::new();
    for o in overrides {
        if targets.insert(&o.name, &o.network).is_some() {
            return Err(ImportError::AmbiguousOverride {
                kind: "network".to_string(),
                key: o.name.clone(),
            });
        }
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    for name in declared {
        if pairs.iter().any(|(n, _)| n == name) {
            continue;
        }
        let target = targets.get(name.as_str()).copied().unwrap_or(name.as_str());
        pairs.push((name.clone(), target.to_string()));
    }
    for o in overrides {
        if !declared.contains(&o.name) {
            pairs.push((o.name.clone(), o.network.clone()));
        }
    }

    Ok(pairs)
}

/// An options document pre-filled from a descriptor, listing every choice
/// the endpoint understands.
pub fn options_template(descriptor: &VirtualSystemDescriptor) -> ImportOptions {
    let to_strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();

    ImportOptions {
        all_deployment_options: descriptor
            .deployment_options
            .iter()
            .map(|o| o.id.clone())
            .collect(),
        deployment: descriptor
            .default_deployment_option()
            .unwrap_or_default()
            .to_string(),
        all_disk_provisioning_options: to_strings(DISK_PROVISIONING_OPTIONS),
        disk_provisioning: DISK_PROVISIONING_OPTIONS[0].to_string(),
        all_ip_allocation_policy_options: to_strings(IP_ALLOCATION_POLICY_OPTIONS),
        ip_allocation_policy: IP_ALLOCATION_POLICY_OPTIONS[0].to_string(),
        all_ip_protocol_options: to_strings(IP_PROTOCOL_OPTIONS),
        ip_protocol: IP_PROTOCOL_OPTIONS[0].to_string(),
        property_mapping: descriptor
            .properties
            .iter()
            .map(|p| PropertyOverride {
                key: p.key.clone(),
                value: p.value.clone(),
                spec: p.spec.clone(),
            })
            .collect(),
        network_mapping: descriptor
            .networks
            .iter()
            .map(|n| NetworkOverride::new(n, ""))
            .collect(),
        name: Some(descriptor.display_name().to_string()),
        ..ImportOptions::default()
    }
}
