//! OVF descriptor parsing.
//!
//! Only the parts of the envelope an import needs are kept: virtual system
//! identity, product properties, networks, deployment options and file
//! references. Values are extracted verbatim; the endpoint validates them.

use std::collections::HashMap;

use ova_import_core::error::{ImportError, Result};
use ova_import_core::options::PropertySpec;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

/// Display name used when the descriptor names nothing.
pub const GENERIC_APPLIANCE_NAME: &str = "Generic Virtual Appliance";

/// A property declared in a `ProductSection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyDecl {
    /// Fully qualified key: `[class.]key[.instance]`
    pub key: String,
    pub value: String,
    pub spec: Option<PropertySpec>,
}

/// A selectable deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentOptionDecl {
    pub id: String,
    pub label: Option<String>,
    pub default: bool,
}

/// A payload file referenced by the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReference {
    pub id: String,
    pub href: String,
    pub size: Option<u64>,
}

/// Parsed virtual system metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualSystemDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub properties: Vec<PropertyDecl>,
    pub networks: Vec<String>,
    pub deployment_options: Vec<DeploymentOptionDecl>,
    pub files: Vec<FileReference>,
}

impl VirtualSystemDescriptor {
    /// Parse an OVF envelope.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            ImportError::MalformedDescriptor(format!("descriptor is not valid UTF-8: {}", e))
        })?;
        DescriptorParser::default().run(text)
    }

    /// Name element, else system id, else a generic placeholder. Never empty.
    pub fn display_name(&self) -> &str {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name;
        }
        if !self.id.trim().is_empty() {
            return &self.id;
        }
        GENERIC_APPLIANCE_NAME
    }

    /// Sum of referenced file sizes, if every reference declares one.
    pub fn total_file_size(&self) -> Option<u64> {
        self.files.iter().map(|f| f.size).sum()
    }

    /// The deployment option marked as default, else the first declared.
    pub fn default_deployment_option(&self) -> Option<&str> {
        self.deployment_options
            .iter()
            .find(|o| o.default)
            .or_else(|| self.deployment_options.first())
            .map(|o| o.id.as_str())
    }
}

/// Element whose text content is being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    SystemName,
    PropertyLabel,
    PropertyDescription,
    ConfigurationLabel,
}

#[derive(Default)]
struct DescriptorParser {
    stack: Vec<String>,
    seen_root: bool,

    system_depth: Option<usize>,
    system_id: Option<String>,
    system_name: Option<String>,

    product_class: Option<String>,
    product_instance: Option<String>,

    properties: Vec<PropertyDecl>,
    networks: Vec<String>,
    deployment_options: Vec<DeploymentOptionDecl>,
    files: Vec<FileReference>,

    text_target: Option<TextTarget>,
}

impl DescriptorParser {
    fn run(mut self, text: &str) -> Result<VirtualSystemDescriptor> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        loop {
            let event = reader.read_event().map_err(|e| {
                ImportError::MalformedDescriptor(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;

            match event {
                Event::Start(ref e) => {
                    let tag = local_name(e);
                    self.open(&tag, e)?;
                    self.stack.push(tag);
                }
                Event::Empty(ref e) => {
                    let tag = local_name(e);
                    self.open(&tag, e)?;
                    self.stack.push(tag);
                    self.close();
                }
                Event::End(_) => self.close(),
                Event::Text(ref t) => {
                    let value = t.unescape().map_err(|e| {
                        ImportError::MalformedDescriptor(format!("invalid text content: {}", e))
                    })?;
                    self.text(&value);
                }
                Event::CData(ref t) => {
                    let value = String::from_utf8_lossy(t).into_owned();
                    self.text(&value);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !self.stack.is_empty() {
            return Err(ImportError::MalformedDescriptor(format!(
                "unexpected end of document inside <{}>",
                self.stack.join("/")
            )));
        }
        if !self.seen_root {
            return Err(ImportError::MalformedDescriptor(
                "document has no Envelope element".to_string(),
            ));
        }
        if self.system_depth.is_none() && self.system_id.is_none() {
            return Err(ImportError::MalformedDescriptor(
                "envelope declares no VirtualSystem".to_string(),
            ));
        }

        Ok(VirtualSystemDescriptor {
            id: self.system_id.unwrap_or_default(),
            name: self.system_name.map(|n| n.trim().to_string()),
            properties: self.properties,
            networks: self.networks,
            deployment_options: self.deployment_options,
            files: self.files,
        })
    }

    fn parent(&self) -> &str {
        self.stack.last().map(|s| s.as_str()).unwrap_or("")
    }

    fn open(&mut self, tag: &str, e: &BytesStart) -> Result<()> {
        if self.stack.is_empty() {
            if tag != "Envelope" {
                return Err(ImportError::MalformedDescriptor(format!(
                    "root element is <{}>, expected <Envelope>",
                    tag
                )));
            }
            self.seen_root = true;
            return Ok(());
        }

        match tag {
            "VirtualSystem" | "VirtualSystemCollection" if self.system_id.is_none() => {
                let attrs = attributes(e)?;
                self.system_id = Some(attrs.get("id").cloned().unwrap_or_default());
                self.system_depth = Some(self.stack.len());
            }
            "Name" if Some(self.stack.len()) == self.system_depth.map(|d| d + 1) => {
                self.system_name = Some(String::new());
                self.text_target = Some(TextTarget::SystemName);
            }
            "ProductSection" => {
                let attrs = attributes(e)?;
                self.product_class = attrs.get("class").cloned().filter(|c| !c.is_empty());
                self.product_instance = attrs.get("instance").cloned().filter(|i| !i.is_empty());
            }
            "Property" if self.parent() == "ProductSection" => {
                let attrs = attributes(e)?;
                let key = attrs.get("key").cloned().unwrap_or_default();
                let spec = PropertySpec {
                    r#type: attrs.get("type").cloned().unwrap_or_default(),
                    qualifiers: attrs.get("qualifiers").cloned(),
                    user_configurable: attrs
                        .get("userConfigurable")
                        .map(|v| v == "true")
                        .unwrap_or(false),
                    label: None,
                    description: None,
                };
                self.properties.push(PropertyDecl {
                    key: self.qualified_key(&key),
                    value: attrs.get("value").cloned().unwrap_or_default(),
                    spec: Some(spec),
                });
            }
            "Label" if self.parent() == "Property" => {
                self.text_target = Some(TextTarget::PropertyLabel);
            }
            "Description" if self.parent() == "Property" => {
                self.text_target = Some(TextTarget::PropertyDescription);
            }
            "Network" if self.parent() == "NetworkSection" => {
                let attrs = attributes(e)?;
                if let Some(name) = attrs.get("name") {
                    if !self.networks.contains(name) {
                        self.networks.push(name.clone());
                    }
                }
            }
            "Configuration" if self.parent() == "DeploymentOptionSection" => {
                let attrs = attributes(e)?;
                self.deployment_options.push(DeploymentOptionDecl {
                    id: attrs.get("id").cloned().unwrap_or_default(),
                    label: None,
                    default: attrs.get("default").map(|v| v == "true").unwrap_or(false),
                });
            }
            "Label" if self.parent() == "Configuration" => {
                self.text_target = Some(TextTarget::ConfigurationLabel);
            }
            "File" if self.parent() == "References" => {
                let attrs = attributes(e)?;
                let size = match attrs.get("size") {
                    Some(s) => Some(s.parse::<u64>().map_err(|_| {
                        ImportError::MalformedDescriptor(format!("invalid file size {:?}", s))
                    })?),
                    None => None,
                };
                self.files.push(FileReference {
                    id: attrs.get("id").cloned().unwrap_or_default(),
                    href: attrs.get("href").cloned().unwrap_or_default(),
                    size,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        let tag = self.stack.pop();
        self.text_target = None;
        if tag.as_deref() == Some("ProductSection") {
            self.product_class = None;
            self.product_instance = None;
        }
    }

    fn text(&mut self, value: &str) {
        match self.text_target {
            Some(TextTarget::SystemName) => {
                if let Some(name) = self.system_name.as_mut() {
                    name.push_str(value);
                }
            }
            Some(TextTarget::PropertyLabel) => {
                if let Some(spec) = self.properties.last_mut().and_then(|p| p.spec.as_mut()) {
                    spec.label = Some(value.to_string());
                }
            }
            Some(TextTarget::PropertyDescription) => {
                if let Some(spec) = self.properties.last_mut().and_then(|p| p.spec.as_mut()) {
                    spec.description = Some(value.to_string());
                }
            }
            Some(TextTarget::ConfigurationLabel) => {
                if let Some(option) = self.deployment_options.last_mut() {
                    option.label = Some(value.to_string());
                }
            }
            None => {}
        }
    }

    /// Property ids are prefixed with the product class and suffixed with
    /// the product instance, when the section declares them.
    fn qualified_key(&self, key: &str) -> String {
        let mut qualified = key.to_string();
        if let Some(class) = &self.product_class {
            qualified = format!("{}.{}", class, qualified);
        }
        if let Some(instance) = &self.product_instance {
            qualified = format!("{}.{}", qualified, instance);
        }
        qualified
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attributes keyed by local name (`ovf:key` and `key` are the same).
fn attributes(e: &BytesStart) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| {
            ImportError::MalformedDescriptor(format!("invalid attribute: {}", err))
        })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|err| {
            ImportError::MalformedDescriptor(format!("invalid attribute value: {}", err))
        })?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}
