//! User-supplied import options.
//!
//! The JSON shape uses PascalCase keys so option files written for the
//! `govc import.spec` tooling can be fed in unchanged.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Disk provisioning modes understood by the endpoint.
pub const DISK_PROVISIONING_OPTIONS: &[&str] = &[
    "flat",
    "monolithicSparse",
    "monolithicFlat",
    "twoGbMaxExtentSparse",
    "twoGbMaxExtentFlat",
    "thin",
    "thick",
    "seSparse",
    "eagerZeroedThick",
    "sparse",
];

/// IP allocation policies understood by the endpoint.
pub const IP_ALLOCATION_POLICY_OPTIONS: &[&str] = &[
    "dhcpPolicy",
    "transientPolicy",
    "fixedPolicy",
    "fixedAllocatedPolicy",
];

/// IP protocols understood by the endpoint.
pub const IP_PROTOCOL_OPTIONS: &[&str] = &["IPv4", "IPv6"];

/// Metadata describing a declared OVF property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PropertySpec {
    /// OVF property type (`string`, `boolean`, `uint8`, ...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,

    /// Type qualifiers such as `MinLen(1)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifiers: Option<String>,

    /// Whether the property may be changed at deployment time
    #[serde(default)]
    pub user_configurable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A user-declared property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PropertyOverride {
    pub key: String,
    pub value: String,

    /// Declaration metadata, only filled in generated templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PropertySpec>,
}

impl PropertyOverride {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            spec: None,
        }
    }
}

/// A user-declared network remap: descriptor network `name` is bound to
/// the endpoint network called `network`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkOverride {
    pub name: String,
    pub network: String,
}

impl NetworkOverride {
    pub fn new(name: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            network: network.into(),
        }
    }
}

/// Structured import options.
///
/// Enumeration fields are opaque strings; an empty string asks the
/// endpoint for its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImportOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_deployment_options: Vec<String>,
    #[serde(default)]
    pub deployment: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_disk_provisioning_options: Vec<String>,
    #[serde(default)]
    pub disk_provisioning: String,

    #[serde(
        rename = "AllIPAllocationPolicyOptions",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub all_ip_allocation_policy_options: Vec<String>,
    #[serde(rename = "IPAllocationPolicy", default)]
    pub ip_allocation_policy: String,

    #[serde(
        rename = "AllIPProtocolOptions",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub all_ip_protocol_options: Vec<String>,
    #[serde(rename = "IPProtocol", default)]
    pub ip_protocol: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_mapping: Vec<PropertyOverride>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_mapping: Vec<NetworkOverride>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub annotation: String,

    #[serde(default = "default_mark_as_template")]
    pub mark_as_template: bool,
    #[serde(default)]
    pub power_on: bool,
    #[serde(default)]
    pub inject_ovf_env: bool,
    #[serde(rename = "WaitForIP", default)]
    pub wait_for_ip: bool,

    /// Entity name override, used when the request itself names nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_mark_as_template() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            all_deployment_options: Vec::new(),
            deployment: String::new(),
            all_disk_provisioning_options: Vec::new(),
            disk_provisioning: String::new(),
            all_ip_allocation_policy_options: Vec::new(),
            ip_allocation_policy: String::new(),
            all_ip_protocol_options: Vec::new(),
            ip_protocol: String::new(),
            property_mapping: Vec::new(),
            network_mapping: Vec::new(),
            annotation: String::new(),
            mark_as_template: default_mark_as_template(),
            power_on: false,
            inject_ovf_env: false,
            wait_for_ip: false,
            name: None,
        }
    }
}

impl ImportOptions {
    /// Parse options from their JSON document form.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Convert a loosely typed value (e.g. a map handed over by a
    /// declarative framework) into options.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
