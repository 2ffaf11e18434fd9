//! Protocol enumerations shared by the codec, registry and client

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The five INDI vector kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    Number,
    Text,
    Switch,
    Light,
    Blob,
}

impl VectorKind {
    pub const ALL: [VectorKind; 5] = [
        VectorKind::Number,
        VectorKind::Text,
        VectorKind::Switch,
        VectorKind::Light,
        VectorKind::Blob,
    ];

    /// Infix used in tag names, e.g. `BLOB` in `defBLOBVector`
    pub fn tag_infix(&self) -> &'static str {
        match self {
            VectorKind::Number => "Number",
            VectorKind::Text => "Text",
            VectorKind::Switch => "Switch",
            VectorKind::Light => "Light",
            VectorKind::Blob => "BLOB",
        }
    }

    pub fn from_tag_infix(infix: &str) -> Option<Self> {
        match infix {
            "Number" => Some(VectorKind::Number),
            "Text" => Some(VectorKind::Text),
            "Switch" => Some(VectorKind::Switch),
            "Light" => Some(VectorKind::Light),
            "BLOB" => Some(VectorKind::Blob),
            _ => None,
        }
    }
}

impl fmt::Display for VectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_infix())
    }
}

/// Whether a property was last written by a definition or a state push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Defined,
    Updated,
}

/// Value of the `state` attribute on vectors and of light elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

impl PropertyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }
}

impl FromStr for PropertyState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Idle" => Ok(PropertyState::Idle),
            "Ok" => Ok(PropertyState::Ok),
            "Busy" => Ok(PropertyState::Busy),
            "Alert" => Ok(PropertyState::Alert),
            _ => Err(()),
        }
    }
}

/// Value of the `perm` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl FromStr for Permission {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ro" => Ok(Permission::ReadOnly),
            "wo" => Ok(Permission::WriteOnly),
            "rw" => Ok(Permission::ReadWrite),
            _ => Err(()),
        }
    }
}

/// Switch element text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::On => "On",
            SwitchState::Off => "Off",
        }
    }

    /// Only the exact literal `On` counts as on
    pub fn is_on(text: &str) -> bool {
        text.trim() == "On"
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

/// Payload policy sent with `enableBLOB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlobMode {
    #[default]
    Never,
    Also,
    Only,
}

impl BlobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobMode::Never => "Never",
            BlobMode::Also => "Also",
            BlobMode::Only => "Only",
        }
    }
}

impl FromStr for BlobMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Never" => Ok(BlobMode::Never),
            "Also" => Ok(BlobMode::Also),
            "Only" => Ok(BlobMode::Only),
            _ => Err(()),
        }
    }
}

bitflags! {
    /// Driver interface bits reported in `DRIVER_INFO.DRIVER_INTERFACE`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Interface: u32 {
        const TELESCOPE = 1 << 0;
        const CCD = 1 << 1;
        const GUIDER = 1 << 2;
        const FOCUSER = 1 << 3;
        const FILTER = 1 << 4;
        const DOME = 1 << 5;
        const GPS = 1 << 6;
        const WEATHER = 1 << 7;
        const AO = 1 << 8;
        const DUSTCAP = 1 << 9;
        const LIGHTBOX = 1 << 10;
        const DETECTOR = 1 << 11;
        const AUX = 1 << 15;
    }
}

impl Interface {
    /// A general device declares no interface bits
    pub const GENERAL: Interface = Interface::empty();
}

impl FromStr for Interface {
    type Err = ();

    /// Accepts a lowercase interface name, or a raw integer mask
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(bits) = s.parse::<u32>() {
            return Ok(Interface::from_bits_retain(bits));
        }
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(Interface::GENERAL),
            "telescope" => Ok(Interface::TELESCOPE),
            "ccd" => Ok(Interface::CCD),
            "guider" => Ok(Interface::GUIDER),
            "focuser" => Ok(Interface::FOCUSER),
            "filter" => Ok(Interface::FILTER),
            "dome" => Ok(Interface::DOME),
            "gps" => Ok(Interface::GPS),
            "weather" => Ok(Interface::WEATHER),
            "ao" => Ok(Interface::AO),
            "dustcap" => Ok(Interface::DUSTCAP),
            "lightbox" => Ok(Interface::LIGHTBOX),
            "detector" => Ok(Interface::DETECTOR),
            "aux" => Ok(Interface::AUX),
            "all" => Ok(Interface::all()),
            _ => Err(()),
        }
    }
}

/// Parse INDI number text: plain decimal, or sexagesimal `d:m:s` / `d m s`
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(v) = text.parse::<f64>() {
        return Some(v);
    }

    let parts: Vec<&str> = text
        .split(|c: char| c == ':' || c == ' ' || c == ';')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let negative = parts[0].starts_with('-');
    let mut value = 0.0;
    let mut scale = 1.0;
    for part in &parts {
        let v: f64 = part.trim_start_matches(['-', '+']).parse().ok()?;
        value += v / scale;
        scale *= 60.0;
    }
    Some(if negative { -value } else { value })
}
