//! Routes decoded elements to registry operations
//!
//! Nothing here blocks or performs I/O. The caller collects the events
//! produced and delivers them once it no longer holds any lock.

use tracing::debug;

use crate::codec::{IndiElement, Tag};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::registry::Registry;

/// Apply one inbound element
///
/// On error nothing has been committed for the element; the caller is
/// expected to log and drop it.
pub fn dispatch(registry: &mut Registry, element: &IndiElement, events: &mut Vec<Event>) -> Result<()> {
    let device = element.device();

    if device.is_none() && element.tag != Tag::Message {
        return Err(Error::MissingDevice {
            tag: element.tag.name(),
        });
    }

    let needs_name = !matches!(
        element.tag,
        Tag::Message | Tag::DelProperty | Tag::GetProperties
    );
    if needs_name && element.name().is_none() {
        return Err(Error::MissingName {
            tag: element.tag.name(),
            device: device.unwrap_or_default().to_string(),
        });
    }

    match &element.tag {
        Tag::Message => {
            if let Some(device) = device {
                registry.ensure_device(device, events);
            }
            events.push(Event::Message {
                device: device.map(str::to_string),
                message: element.attr("message").unwrap_or_default().to_string(),
                timestamp: element.attr("timestamp").map(str::to_string),
            });
            Ok(())
        }
        Tag::DefVector(_) => define(registry, device.unwrap_or_default(), element, events),
        Tag::SetVector(_) => update(registry, device.unwrap_or_default(), element, events),
        Tag::DelProperty => {
            let device = device.unwrap_or_default();
            match element.name() {
                Some(property) => {
                    if registry.remove_property(device, property, events).is_none() {
                        debug!("delProperty for unknown {}.{}", device, property);
                    }
                }
                None => {
                    if registry.remove_device(device, events).is_none() {
                        debug!("delProperty for unknown device {}", device);
                    }
                }
            }
            Ok(())
        }
        // Client-to-server traffic echoed back; nothing to apply
        Tag::GetProperties | Tag::NewVector(_) | Tag::One(_) | Tag::EnableBlob => Ok(()),
        other => Err(Error::UnexpectedElement(other.name())),
    }
}

fn define(registry: &mut Registry, device: &str, element: &IndiElement, events: &mut Vec<Event>) -> Result<()> {
    let property = registry.define_property(device, element, events)?;
    events.push(Event::NewProperty {
        device: device.to_string(),
        property: property.name.clone(),
    });
    events.push(Event::Defined {
        device: device.to_string(),
        property: property.name.clone(),
        kind: property.kind,
    });
    Ok(())
}

fn update(registry: &mut Registry, device: &str, element: &IndiElement, events: &mut Vec<Event>) -> Result<()> {
    let before = element
        .name()
        .and_then(|name| registry.property(device, name))
        .and_then(|p| p.connection_indicator());

    let property = registry.update_property(device, element, events)?;
    events.push(Event::Updated {
        device: device.to_string(),
        property: property.name.clone(),
        kind: property.kind,
    });

    match property.connection_indicator() {
        Some(now) if Some(now) != before => {
            debug!("Device {} connection indicator now {}", device, now);
            events.push(if now {
                Event::DeviceConnected {
                    device: device.to_string(),
                }
            } else {
                Event::DeviceDisconnected {
                    device: device.to_string(),
                }
            });
        }
        _ => {}
    }

    Ok(())
}
