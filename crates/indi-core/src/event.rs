//! Typed client events
//!
//! Every state change the client observes is described by one [`Event`].
//! Each event belongs to exactly one [`EventKind`] topic.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::registry::Device;
use crate::types::VectorKind;

/// Event topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    NewDevice,
    RemoveDevice,
    NewProperty,
    RemoveProperty,
    Defined(VectorKind),
    Updated(VectorKind),
    Message,
    DeviceConnected,
    DeviceDisconnected,
    ServerConnected,
    ServerDisconnected,
}

impl EventKind {
    /// Every topic, per-kind topics expanded
    pub fn all() -> Vec<EventKind> {
        let mut kinds = vec![
            EventKind::NewDevice,
            EventKind::RemoveDevice,
            EventKind::NewProperty,
            EventKind::RemoveProperty,
        ];
        kinds.extend(VectorKind::ALL.iter().map(|k| EventKind::Defined(*k)));
        kinds.extend(VectorKind::ALL.iter().map(|k| EventKind::Updated(*k)));
        kinds.extend([
            EventKind::Message,
            EventKind::DeviceConnected,
            EventKind::DeviceDisconnected,
            EventKind::ServerConnected,
            EventKind::ServerDisconnected,
        ]);
        kinds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    NewDevice {
        device: String,
    },
    RemoveDevice {
        device: String,
    },
    NewProperty {
        device: String,
        property: String,
    },
    RemoveProperty {
        device: String,
        property: String,
    },
    /// Property introduced by a definition element
    Defined {
        device: String,
        property: String,
        kind: VectorKind,
    },
    /// Property state pushed by an update element
    Updated {
        device: String,
        property: String,
        kind: VectorKind,
    },
    /// Free text from the server, device-scoped or server-wide
    Message {
        device: Option<String>,
        message: String,
        timestamp: Option<String>,
    },
    DeviceConnected {
        device: String,
    },
    DeviceDisconnected {
        device: String,
    },
    ServerConnected,
    /// Carries the registry contents as they were before the clear
    ServerDisconnected {
        devices: BTreeMap<String, Device>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewDevice { .. } => EventKind::NewDevice,
            Event::RemoveDevice { .. } => EventKind::RemoveDevice,
            Event::NewProperty { .. } => EventKind::NewProperty,
            Event::RemoveProperty { .. } => EventKind::RemoveProperty,
            Event::Defined { kind, .. } => EventKind::Defined(*kind),
            Event::Updated { kind, .. } => EventKind::Updated(*kind),
            Event::Message { .. } => EventKind::Message,
            Event::DeviceConnected { .. } => EventKind::DeviceConnected,
            Event::DeviceDisconnected { .. } => EventKind::DeviceDisconnected,
            Event::ServerConnected => EventKind::ServerConnected,
            Event::ServerDisconnected { .. } => EventKind::ServerDisconnected,
        }
    }

    /// Device the event concerns, if any
    pub fn device(&self) -> Option<&str> {
        match self {
            Event::NewDevice { device }
            | Event::RemoveDevice { device }
            | Event::NewProperty { device, .. }
            | Event::RemoveProperty { device, .. }
            | Event::Defined { device, .. }
            | Event::Updated { device, .. }
            | Event::DeviceConnected { device }
            | Event::DeviceDisconnected { device } => Some(device),
            Event::Message { device, .. } => device.as_deref(),
            Event::ServerConnected | Event::ServerDisconnected { .. } => None,
        }
    }
}
