//! INDI element codec
//!
//! Maps raw XML nodes onto the INDI tag taxonomy and encodes outbound
//! elements to wire XML. The grammar produced by [`IndiElement::encode`]:
//!
//! ```text
//! element  := '<' tag attrs '/>'                      (no children, no text)
//!           | '<' tag attrs '>' text? element* '</' tag '>'
//! attrs    := (' ' name '="' escaped-value '"')*      (insertion order)
//! ```
//!
//! Attribute values escape `& < > " '`, text escapes `& < >`. Numbers are
//! formatted with `f64`'s `Display`. No whitespace is inserted between
//! elements; the client appends a single `\n` per written element.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::types::{BlobMode, SwitchState, VectorKind};
use crate::xml::XmlNode;

/// Protocol version announced in `getProperties`
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// INDI tag taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Message,
    DelProperty,
    GetProperties,
    EnableBlob,
    /// `def*Vector`: introduces a property
    DefVector(VectorKind),
    /// `set*Vector`: state push for a property
    SetVector(VectorKind),
    /// `new*Vector`: client command (no Light variant exists)
    NewVector(VectorKind),
    /// `defNumber`, `defSwitch`, ... members of a definition
    Def(VectorKind),
    /// `oneNumber`, `oneSwitch`, ... members of set/new vectors
    One(VectorKind),
    Unknown(String),
}

impl Tag {
    pub fn parse(name: &str) -> Tag {
        match name {
            "message" => return Tag::Message,
            "delProperty" => return Tag::DelProperty,
            "getProperties" => return Tag::GetProperties,
            "enableBLOB" => return Tag::EnableBlob,
            _ => {}
        }

        let parsed = if let Some(rest) = name.strip_suffix("Vector") {
            if let Some(infix) = rest.strip_prefix("def") {
                VectorKind::from_tag_infix(infix).map(Tag::DefVector)
            } else if let Some(infix) = rest.strip_prefix("set") {
                VectorKind::from_tag_infix(infix).map(Tag::SetVector)
            } else if let Some(infix) = rest.strip_prefix("new") {
                VectorKind::from_tag_infix(infix)
                    .filter(|k| *k != VectorKind::Light)
                    .map(Tag::NewVector)
            } else {
                None
            }
        } else if let Some(infix) = name.strip_prefix("def") {
            VectorKind::from_tag_infix(infix).map(Tag::Def)
        } else if let Some(infix) = name.strip_prefix("one") {
            VectorKind::from_tag_infix(infix).map(Tag::One)
        } else {
            None
        };

        parsed.unwrap_or_else(|| Tag::Unknown(name.to_string()))
    }

    pub fn name(&self) -> String {
        match self {
            Tag::Message => "message".to_string(),
            Tag::DelProperty => "delProperty".to_string(),
            Tag::GetProperties => "getProperties".to_string(),
            Tag::EnableBlob => "enableBLOB".to_string(),
            Tag::DefVector(k) => format!("def{}Vector", k.tag_infix()),
            Tag::SetVector(k) => format!("set{}Vector", k.tag_infix()),
            Tag::NewVector(k) => format!("new{}Vector", k.tag_infix()),
            Tag::Def(k) => format!("def{}", k.tag_infix()),
            Tag::One(k) => format!("one{}", k.tag_infix()),
            Tag::Unknown(name) => name.clone(),
        }
    }

    /// Kind of the vector or member this tag denotes
    pub fn vector_kind(&self) -> Option<VectorKind> {
        match self {
            Tag::DefVector(k)
            | Tag::SetVector(k)
            | Tag::NewVector(k)
            | Tag::Def(k)
            | Tag::One(k) => Some(*k),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// XML attributes in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace in place, keeping the original position
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

/// A typed INDI protocol element
#[derive(Debug, Clone, PartialEq)]
pub struct IndiElement {
    pub tag: Tag,
    pub attributes: Attributes,
    pub children: Vec<IndiElement>,
    pub text: String,
}

impl IndiElement {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            attributes: Attributes::new(),
            children: Vec::new(),
            text: String::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    pub fn with_child(mut self, child: IndiElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)
    }

    /// The `device` attribute
    pub fn device(&self) -> Option<&str> {
        self.attr("device")
    }

    /// The `name` attribute
    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }

    /// Encode to wire XML (without the trailing newline)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Encode followed by `\n`, as written to the socket
    pub fn encode_line(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        self.write_to(&mut buf);
        buf.put_u8(b'\n');
        buf.freeze()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let tag = self.tag.name();
        buf.put_u8(b'<');
        buf.extend_from_slice(tag.as_bytes());
        for (key, value) in self.attributes.iter() {
            buf.put_u8(b' ');
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(b"=\"");
            escape_into(buf, value, true);
            buf.put_u8(b'"');
        }

        if self.children.is_empty() && self.text.is_empty() {
            buf.extend_from_slice(b"/>");
            return;
        }

        buf.put_u8(b'>');
        escape_into(buf, &self.text, false);
        for child in &self.children {
            child.write_to(buf);
        }
        buf.extend_from_slice(b"</");
        buf.extend_from_slice(tag.as_bytes());
        buf.put_u8(b'>');
    }

    // ------------------------------------------------------------------
    // Outbound builders
    // ------------------------------------------------------------------

    /// `getProperties`, optionally scoped to a device and property
    pub fn get_properties(device: Option<&str>, property: Option<&str>) -> Self {
        let mut element =
            IndiElement::new(Tag::GetProperties).with_attr("version", INDI_PROTOCOL_VERSION);
        if let Some(device) = device {
            element = element.with_attr("device", device);
        }
        if let Some(property) = property {
            element = element.with_attr("name", property);
        }
        element
    }

    pub fn new_number_vector<I, S>(device: &str, property: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        new_vector(VectorKind::Number, device, property, values, |v| v.to_string())
    }

    pub fn new_text_vector<I, S, T>(device: &str, property: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        new_vector(VectorKind::Text, device, property, values, |v| v.into())
    }

    pub fn new_switch_vector<I, S>(device: &str, property: &str, values: I) -> Self
    where
        I: IntoIterator<Item = (S, SwitchState)>,
        S: Into<String>,
    {
        new_vector(VectorKind::Switch, device, property, values, |v| {
            v.as_str().to_string()
        })
    }

    /// `enableBLOB` for a device, optionally scoped to one property
    pub fn enable_blob(mode: BlobMode, device: &str, property: Option<&str>) -> Self {
        let mut element = IndiElement::new(Tag::EnableBlob).with_attr("device", device);
        if let Some(property) = property {
            element = element.with_attr("name", property);
        }
        element.with_text(mode.as_str())
    }
}

fn new_vector<I, S, V, F>(kind: VectorKind, device: &str, property: &str, values: I, fmt: F) -> IndiElement
where
    I: IntoIterator<Item = (S, V)>,
    S: Into<String>,
    F: Fn(V) -> String,
{
    values.into_iter().fold(
        IndiElement::new(Tag::NewVector(kind))
            .with_attr("device", device)
            .with_attr("name", property),
        |vector, (name, value)| {
            vector.with_child(
                IndiElement::new(Tag::One(kind))
                    .with_attr("name", name)
                    .with_text(fmt(value)),
            )
        },
    )
}

/// Classify a parsed XML node into a typed element
///
/// Text is trimmed: INDI servers pad member values with newlines and
/// indentation. Unknown tags are kept as [`Tag::Unknown`] so the dispatcher
/// can reject them.
pub fn decode_element(node: XmlNode) -> IndiElement {
    IndiElement {
        tag: Tag::parse(&node.name),
        attributes: node.attributes,
        children: node.children.into_iter().map(decode_element).collect(),
        text: node.text.trim().to_string(),
    }
}

fn escape_into(buf: &mut BytesMut, value: &str, attribute: bool) {
    for c in value.chars() {
        match c {
            '&' => buf.extend_from_slice(b"&amp;"),
            '<' => buf.extend_from_slice(b"&lt;"),
            '>' => buf.extend_from_slice(b"&gt;"),
            '"' if attribute => buf.extend_from_slice(b"&quot;"),
            '\'' if attribute => buf.extend_from_slice(b"&apos;"),
            _ => {
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
}

/// Resolve the predefined entities and numeric character references
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let resolved = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match resolved {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                // Leave unknown references verbatim
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
