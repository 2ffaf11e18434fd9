//! Streaming decoder: byte chunks in, complete top-level elements out
//!
//! INDI has no message framing beyond XML nesting. The decoder tracks
//! element depth over the tokenizer's start/end events and hands each
//! top-level element to the codec the moment its closing tag arrives, so the
//! output is independent of how the input was chunked.

use tracing::{debug, warn};

use crate::codec::{decode_element, IndiElement};
use crate::xml::{XmlEvent, XmlNode, XmlTokenizer};

#[derive(Debug, Default)]
pub struct StreamDecoder {
    tokenizer: XmlTokenizer,
    depth: usize,
    /// Open elements, outermost first
    stack: Vec<XmlNode>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any partial element so the next top-level element starts clean
    pub fn reset(&mut self) {
        self.tokenizer.clear();
        self.depth = 0;
        self.stack.clear();
    }

    /// Current nesting depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True when no partial element or buffered input is held
    pub fn is_idle(&self) -> bool {
        self.depth == 0 && self.tokenizer.buffered() == 0
    }

    /// Append a chunk and return every top-level element it completed
    pub fn feed(&mut self, data: &[u8]) -> Vec<IndiElement> {
        self.tokenizer.feed(data);

        let mut completed = Vec::new();
        while let Some(event) = self.tokenizer.next_event() {
            match event {
                Ok(XmlEvent::Start { name, attributes }) => {
                    self.depth += 1;
                    self.stack.push(XmlNode::new(name, attributes));
                }
                Ok(XmlEvent::Malformed { name, reason }) => {
                    // Kept on the stack so its end tag closes it, not the parent
                    warn!("Unparseable start tag {}", reason);
                    self.depth += 1;
                    let mut node = XmlNode::new(name, Default::default());
                    node.malformed = true;
                    self.stack.push(node);
                }
                Ok(XmlEvent::Text(text)) => match self.stack.last_mut() {
                    Some(node) => node.text.push_str(&text),
                    None => debug!("Ignoring text outside any element"),
                },
                Ok(XmlEvent::End { name }) => {
                    let Some(node) = self.stack.pop() else {
                        warn!("Unbalanced closing tag </{}>", name);
                        continue;
                    };
                    self.depth -= 1;
                    if node.name != name {
                        warn!("Closing tag </{}> does not match <{}>", name, node.name);
                    }

                    match self.stack.last_mut() {
                        Some(parent) if node.malformed => parent.malformed = true,
                        Some(parent) => parent.children.push(node),
                        None if node.malformed => {
                            warn!("Dropping <{}> with malformed content", node.name);
                        }
                        None => completed.push(decode_element(node)),
                    }
                }
                Err(e) => warn!("Skipping markup: {}", e),
            }
        }

        completed
    }
}
