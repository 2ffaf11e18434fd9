//! Incremental XML tokenizer
//!
//! Bytes are appended with [`XmlTokenizer::feed`] and structural events are
//! pulled with [`XmlTokenizer::next_event`] as soon as enough input has
//! arrived to complete them. Only the subset of XML used by INDI is
//! understood: elements, attributes, text, entity references, CDATA,
//! comments, processing instructions and DOCTYPE declarations (skipped).
//!
//! Known limits: namespaces are not resolved (a prefixed name is just a
//! name), DTDs are skipped unread so only the five predefined entities and
//! numeric character references are expanded, and input is decoded as
//! UTF-8 with lossy replacement.

use bytes::BytesMut;

use crate::codec::{unescape, Attributes};
use crate::error::{Error, Result};

/// A raw element tree assembled by the streaming decoder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Attributes,
    pub children: Vec<XmlNode>,
    pub text: String,
    /// Set when this element or a descendant had an unparseable start tag
    pub malformed: bool,
}

impl XmlNode {
    pub fn new(name: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            name: name.into(),
            attributes,
            children: Vec::new(),
            text: String::new(),
            malformed: false,
        }
    }
}

/// Structural events
#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    Start { name: String, attributes: Attributes },
    End { name: String },
    Text(String),
    /// An element was opened but its start tag could not be parsed; its
    /// content and end tag still follow
    Malformed { name: String, reason: String },
}

const COMMENT_OPEN: &[u8] = b"<!--";
const COMMENT_CLOSE: &[u8] = b"-->";
const CDATA_OPEN: &[u8] = b"<![CDATA[";
const CDATA_CLOSE: &[u8] = b"]]>";

/// Push-fed tokenizer over a growing byte buffer
#[derive(Debug, Default)]
pub struct XmlTokenizer {
    buf: BytesMut,
    /// Offset already searched for the current token's terminator
    scanned: usize,
    /// End event owed for a self-closing tag
    pending_end: Option<String>,
}

impl XmlTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drop all buffered input and partial state
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.pending_end = None;
    }

    /// Bytes waiting for a token to complete
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete event, `None` when more input is needed
    ///
    /// An `Err` consumes the offending markup; the caller may keep pulling.
    pub fn next_event(&mut self) -> Option<Result<XmlEvent>> {
        if let Some(name) = self.pending_end.take() {
            return Some(Ok(XmlEvent::End { name }));
        }

        loop {
            if self.buf.is_empty() {
                return None;
            }

            if self.buf[0] != b'<' {
                // Whitespace between tokens is dropped as soon as it is seen
                let blank = self.buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
                if blank > 0 {
                    self.take_token(blank);
                    continue;
                }
                let end = self.find_from(b"<", 0)?;
                let raw = self.take_token(end);
                return Some(Ok(XmlEvent::Text(unescape(&String::from_utf8_lossy(&raw)))));
            }

            if self.buf.len() < 2 {
                return None;
            }

            match self.buf[1] {
                b'?' => {
                    let end = self.find_from(b"?>", 2)?;
                    self.take_token(end + 2);
                }
                b'!' => {
                    if self.buf.len() < COMMENT_OPEN.len() {
                        return None;
                    }
                    if self.buf.starts_with(COMMENT_OPEN) {
                        let end = self.find_from(COMMENT_CLOSE, COMMENT_OPEN.len())?;
                        self.take_token(end + COMMENT_CLOSE.len());
                    } else if self.buf.len() < CDATA_OPEN.len()
                        && CDATA_OPEN.starts_with(&self.buf[..])
                    {
                        return None;
                    } else if self.buf.starts_with(CDATA_OPEN) {
                        let end = self.find_from(CDATA_CLOSE, CDATA_OPEN.len())?;
                        let raw = self.take_token(end + CDATA_CLOSE.len());
                        let body = &raw[CDATA_OPEN.len()..raw.len() - CDATA_CLOSE.len()];
                        return Some(Ok(XmlEvent::Text(String::from_utf8_lossy(body).into_owned())));
                    } else {
                        let end = self.find_from(b">", 2)?;
                        self.take_token(end + 1);
                    }
                }
                _ => {
                    let end = self.find_tag_end()?;
                    let raw = self.take_token(end + 1);
                    return Some(self.parse_tag(&raw));
                }
            }
        }
    }

    /// Search for `needle`, resuming where the previous call stopped
    fn find_from(&mut self, needle: &[u8], min: usize) -> Option<usize> {
        let start = self.scanned.max(min);
        let found = self.buf[start.min(self.buf.len())..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|pos| start + pos);
        if found.is_none() {
            // Keep a needle-sized overlap so a split terminator is still found
            self.scanned = self.buf.len().saturating_sub(needle.len() - 1).max(min);
        }
        found
    }

    /// Position of the `>` closing a tag, skipping quoted attribute values
    fn find_tag_end(&self) -> Option<usize> {
        let mut quote: Option<u8> = None;
        for (i, &b) in self.buf.iter().enumerate().skip(1) {
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if b == b'>' => return Some(i),
                None => {}
            }
        }
        None
    }

    fn take_token(&mut self, len: usize) -> BytesMut {
        self.scanned = 0;
        self.buf.split_to(len)
    }

    fn parse_tag(&mut self, raw: &[u8]) -> Result<XmlEvent> {
        let text = String::from_utf8_lossy(raw);
        let inner = &text[1..text.len() - 1];

        if let Some(name) = inner.strip_prefix('/') {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::MalformedXml(text.into_owned()));
            }
            return Ok(XmlEvent::End {
                name: name.to_string(),
            });
        }

        let (inner, self_closing) = match inner.strip_suffix('/') {
            Some(stripped) => (stripped, true),
            None => (inner, false),
        };

        let name_end = inner
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(inner.len());
        let name = &inner[..name_end];
        if name.is_empty() {
            return Err(Error::MalformedXml(text.into_owned()));
        }

        let Some(attributes) = parse_attributes(&inner[name_end..]) else {
            if self_closing {
                return Err(Error::MalformedXml(text.into_owned()));
            }
            return Ok(XmlEvent::Malformed {
                name: name.to_string(),
                reason: text.into_owned(),
            });
        };

        if self_closing {
            self.pending_end = Some(name.to_string());
        }

        Ok(XmlEvent::Start {
            name: name.to_string(),
            attributes,
        })
    }
}

fn parse_attributes(mut rest: &str) -> Option<Attributes> {
    let mut attributes = Attributes::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Some(attributes);
        }

        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        if key.is_empty() || key.contains(|c: char| c.is_ascii_whitespace()) {
            return None;
        }

        rest = rest[eq + 1..].trim_start();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        rest = &rest[1..];
        let close = rest.find(quote)?;
        attributes.insert(key, unescape(&rest[..close]));
        rest = &rest[close + 1..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(tokenizer: &mut XmlTokenizer) -> Vec<XmlEvent> {
        let mut events = Vec::new();
        while let Some(event) = tokenizer.next_event() {
            events.push(event.expect("tokenize failed"));
        }
        events
    }

    #[test]
    fn test_start_text_end() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<a x=\"1\" y='two'>hi &amp; bye</a>");
        let events = drain(&mut t);
        assert_eq!(events.len(), 3);
        match &events[0] {
            XmlEvent::Start { name, attributes } => {
                assert_eq!(name, "a");
                assert_eq!(attributes.get("x"), Some("1"));
                assert_eq!(attributes.get("y"), Some("two"));
            }
            other => panic!("Expected Start, got {:?}", other),
        }
        assert_eq!(events[1], XmlEvent::Text("hi & bye".to_string()));
        assert_eq!(events[2], XmlEvent::End { name: "a".to_string() });
    }

    #[test]
    fn test_self_closing_emits_end() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<getProperties version=\"1.7\"/>");
        let events = drain(&mut t);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], XmlEvent::End { name: "getProperties".to_string() });
    }

    #[test]
    fn test_waits_for_complete_tag() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<defNumberVector device=\"A>B");
        assert!(t.next_event().is_none());
        t.feed(b"\" name=\"X\">");
        match t.next_event() {
            Some(Ok(XmlEvent::Start { attributes, .. })) => {
                assert_eq!(attributes.get("device"), Some("A>B"));
            }
            other => panic!("Expected Start, got {:?}", other),
        }
    }

    #[test]
    fn test_skips_prolog_and_comments() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<?xml version=\"1.0\"?>\n<!-- a <b> -->\n<x/>");
        let events = drain(&mut t);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_comment_split_across_feeds() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<!-- abc -");
        assert!(t.next_event().is_none());
        t.feed(b"-><y/>");
        let events = drain(&mut t);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_cdata_is_text() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<t><![CDATA[a<b]]></t>");
        let events = drain(&mut t);
        assert_eq!(events[1], XmlEvent::Text("a<b".to_string()));
    }

    #[test]
    fn test_malformed_attribute_is_skipped() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<a x=1/><b/>");
        assert!(matches!(t.next_event(), Some(Err(Error::MalformedXml(_)))));
        assert!(matches!(t.next_event(), Some(Ok(XmlEvent::Start { .. }))));
    }

    #[test]
    fn test_malformed_open_tag_still_reported() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<one name=X>5</one>");
        let events = drain(&mut t);
        assert_eq!(events.len(), 3);
        match &events[0] {
            XmlEvent::Malformed { name, .. } => assert_eq!(name, "one"),
            other => panic!("Expected Malformed, got {:?}", other),
        }
        assert_eq!(events[2], XmlEvent::End { name: "one".to_string() });
    }

    #[test]
    fn test_clear_drops_partial_input() {
        let mut t = XmlTokenizer::new();
        t.feed(b"<a name=\"half");
        assert!(t.next_event().is_none());
        t.clear();
        assert_eq!(t.buffered(), 0);
        t.feed(b"<b/>");
        assert_eq!(drain(&mut t).len(), 2);
    }
}
