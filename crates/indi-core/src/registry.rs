//! Device/property registry
//!
//! Authoritative local mirror of the devices a server has reported. Every
//! mutation reports what it did by pushing [`Event`]s onto the caller's
//! queue; the registry itself never delivers them.

use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::codec::{IndiElement, Tag};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::types::{parse_number, Interface, Lifecycle, Permission, PropertyState, SwitchState, VectorKind};

/// Property carrying the driver interface bitmask
pub const DRIVER_INFO: &str = "DRIVER_INFO";
/// Element of [`DRIVER_INFO`] holding the bitmask
pub const DRIVER_INTERFACE: &str = "DRIVER_INTERFACE";
/// Standard switch property for device connection
pub const CONNECTION: &str = "CONNECTION";
pub const CONNECT: &str = "CONNECT";
pub const DISCONNECT: &str = "DISCONNECT";

/// Stored BLOB payload; the payload text is kept exactly as received
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlobValue {
    pub size: usize,
    pub format: String,
    #[serde(skip)]
    pub payload: Bytes,
}

/// Typed element value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Switch(bool),
    /// Text, light state, or other verbatim text
    Text(String),
    Blob(BlobValue),
    /// BLOB declared by a definition, no payload yet
    Empty,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Switch(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobValue> {
        match self {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub name: String,
    pub kind: VectorKind,
    pub value: Value,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub device: String,
    pub name: String,
    pub kind: VectorKind,
    pub lifecycle: Lifecycle,
    /// Vector attributes (perm, label, group, state, timeout, ...)
    pub attributes: BTreeMap<String, String>,
    pub elements: BTreeMap<String, Element>,
}

impl Property {
    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.get(name)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn state(&self) -> Option<PropertyState> {
        self.attribute("state")?.parse().ok()
    }

    pub fn permission(&self) -> Option<Permission> {
        self.attribute("perm")?.parse().ok()
    }

    pub fn label(&self) -> Option<&str> {
        self.attribute("label")
    }

    pub fn group(&self) -> Option<&str> {
        self.attribute("group")
    }

    /// Connection state indicated by `CONNECT`/`DISCONNECT` switch elements
    pub fn connection_indicator(&self) -> Option<bool> {
        if self.kind != VectorKind::Switch {
            return None;
        }
        if let Some(on) = self.element(CONNECT).and_then(|e| e.value.as_bool()) {
            return Some(on);
        }
        self.element(DISCONNECT)
            .and_then(|e| e.value.as_bool())
            .map(|on| !on)
    }

    fn values<T>(&self, kind: VectorKind, f: impl Fn(&Value) -> Option<T>) -> Option<BTreeMap<String, T>> {
        if self.kind != kind {
            warn!("Property {}.{} is {}, not {}", self.device, self.name, self.kind, kind);
            return None;
        }
        Some(
            self.elements
                .iter()
                .filter_map(|(name, e)| f(&e.value).map(|v| (name.clone(), v)))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub name: String,
    pub properties: BTreeMap<String, Property>,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Element values of a Number property
    pub fn number(&self, property: &str) -> Option<BTreeMap<String, f64>> {
        self.property(property)?.values(VectorKind::Number, Value::as_f64)
    }

    pub fn text(&self, property: &str) -> Option<BTreeMap<String, String>> {
        self.property(property)?
            .values(VectorKind::Text, |v| v.as_str().map(str::to_string))
    }

    pub fn switch(&self, property: &str) -> Option<BTreeMap<String, bool>> {
        self.property(property)?.values(VectorKind::Switch, Value::as_bool)
    }

    /// Light element states; unparseable states are skipped
    pub fn light(&self, property: &str) -> Option<BTreeMap<String, PropertyState>> {
        self.property(property)?
            .values(VectorKind::Light, |v| v.as_str().and_then(|s| s.parse().ok()))
    }

    /// Payloads received so far for a BLOB property
    pub fn blob(&self, property: &str) -> Option<BTreeMap<String, BlobValue>> {
        self.property(property)?
            .values(VectorKind::Blob, |v| v.as_blob().cloned())
    }

    /// Bitmask from `DRIVER_INFO.DRIVER_INTERFACE`, if reported
    pub fn driver_interface(&self) -> Option<Interface> {
        let element = self.property(DRIVER_INFO)?.element(DRIVER_INTERFACE)?;
        let bits = match &element.value {
            Value::Text(text) => text.trim().parse::<u32>().ok()?,
            Value::Number(n) => *n as u32,
            _ => return None,
        };
        Some(Interface::from_bits_retain(bits))
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    devices: BTreeMap<String, Device>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn property(&self, device: &str, property: &str) -> Option<&Property> {
        self.devices.get(device)?.property(property)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device_names(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Names of devices whose driver interface shares a bit with `mask`
    ///
    /// Devices that never reported `DRIVER_INFO` never match.
    pub fn list_devices(&self, mask: Interface) -> Vec<String> {
        self.devices
            .values()
            .filter(|d| d.driver_interface().is_some_and(|i| i.intersects(mask)))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Look up a device, creating it (and announcing it) if unknown
    pub fn ensure_device(&mut self, name: &str, events: &mut Vec<Event>) -> &mut Device {
        if !self.devices.contains_key(name) {
            info!("New device {}", name);
            events.push(Event::NewDevice {
                device: name.to_string(),
            });
        }
        self.devices
            .entry(name.to_string())
            .or_insert_with(|| Device::new(name))
    }

    /// Apply a `def*Vector` element
    pub fn define_property(
        &mut self,
        device: &str,
        element: &IndiElement,
        events: &mut Vec<Event>,
    ) -> Result<&Property> {
        self.apply_vector(device, element, Lifecycle::Defined, events)
    }

    /// Apply a `set*Vector` element
    pub fn update_property(
        &mut self,
        device: &str,
        element: &IndiElement,
        events: &mut Vec<Event>,
    ) -> Result<&Property> {
        self.apply_vector(device, element, Lifecycle::Updated, events)
    }

    fn apply_vector(
        &mut self,
        device: &str,
        element: &IndiElement,
        lifecycle: Lifecycle,
        events: &mut Vec<Event>,
    ) -> Result<&Property> {
        let kind = element
            .tag
            .vector_kind()
            .ok_or_else(|| Error::UnexpectedElement(element.tag.name()))?;
        let name = element.name().ok_or_else(|| Error::MissingName {
            tag: element.tag.name(),
            device: device.to_string(),
        })?;

        let previous = self.property(device, name);
        if let Some(existing) = previous {
            if existing.kind != kind {
                return Err(Error::KindMismatch {
                    device: device.to_string(),
                    property: name.to_string(),
                    existing: existing.kind,
                    incoming: kind,
                });
            }
        }

        // Attributes overlay what an earlier def/set left behind
        let mut attributes = previous.map(|p| p.attributes.clone()).unwrap_or_default();
        for (key, value) in element.attributes.iter() {
            attributes.insert(key.to_string(), value.to_string());
        }

        let elements = build_elements(device, name, kind, lifecycle, element)?;
        debug!(
            "{:?} {} property {}.{} ({} elements)",
            lifecycle,
            kind,
            device,
            name,
            elements.len()
        );

        let property = Property {
            device: device.to_string(),
            name: name.to_string(),
            kind,
            lifecycle,
            attributes,
            elements,
        };
        let entry = self.ensure_device(device, events);
        entry.properties.insert(name.to_string(), property);
        Ok(&entry.properties[name])
    }

    /// Remove one property; `None` if the device or property is unknown
    pub fn remove_property(
        &mut self,
        device: &str,
        property: &str,
        events: &mut Vec<Event>,
    ) -> Option<Property> {
        let removed = self.devices.get_mut(device)?.properties.remove(property)?;
        info!("Removed property {}.{}", device, property);
        events.push(Event::RemoveProperty {
            device: device.to_string(),
            property: property.to_string(),
        });
        Some(removed)
    }

    /// Remove a device and all its properties
    pub fn remove_device(&mut self, device: &str, events: &mut Vec<Event>) -> Option<Device> {
        let removed = self.devices.remove(device)?;
        for property in removed.properties.keys() {
            events.push(Event::RemoveProperty {
                device: device.to_string(),
                property: property.clone(),
            });
        }
        info!("Removed device {}", device);
        events.push(Event::RemoveDevice {
            device: device.to_string(),
        });
        Some(removed)
    }

    /// Empty the registry, returning what it held
    pub fn clear_all(&mut self, events: &mut Vec<Event>) -> BTreeMap<String, Device> {
        let devices = std::mem::take(&mut self.devices);
        for name in devices.keys() {
            info!("Remove device {}", name);
            events.push(Event::RemoveDevice {
                device: name.clone(),
            });
        }
        devices
    }
}

fn build_elements(
    device: &str,
    property: &str,
    kind: VectorKind,
    lifecycle: Lifecycle,
    element: &IndiElement,
) -> Result<BTreeMap<String, Element>> {
    let mut elements = BTreeMap::new();

    for child in &element.children {
        if !matches!(child.tag, Tag::Def(k) | Tag::One(k) if k == kind) {
            warn!("Ignoring <{}> inside {}.{}", child.tag, device, property);
            continue;
        }
        let Some(name) = child.name() else {
            warn!("Ignoring unnamed <{}> inside {}.{}", child.tag, device, property);
            continue;
        };

        let value = match kind {
            VectorKind::Number => Value::Number(parse_number(&child.text).ok_or_else(|| {
                Error::InvalidNumber {
                    element: name.to_string(),
                    value: child.text.clone(),
                }
            })?),
            VectorKind::Switch => Value::Switch(SwitchState::is_on(&child.text)),
            VectorKind::Text | VectorKind::Light => Value::Text(child.text.clone()),
            VectorKind::Blob if lifecycle == Lifecycle::Defined => Value::Empty,
            VectorKind::Blob => {
                let payload = Bytes::from(child.text.clone().into_bytes());
                Value::Blob(BlobValue {
                    size: child
                        .attr("size")
                        .and_then(|s| s.trim().parse().ok())
                        .unwrap_or(payload.len()),
                    format: child.attr("format").unwrap_or_default().to_string(),
                    payload,
                })
            }
        };

        elements.insert(
            name.to_string(),
            Element {
                name: name.to_string(),
                kind,
                value,
                attributes: child
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
        );
    }

    Ok(elements)
}
