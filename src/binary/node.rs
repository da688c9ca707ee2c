//! The wire unit of the stream: a tagged tree with attributes and optional
//! content. Nodes are immutable once emitted; equality is structural with
//! byte-wise content comparison.

use std::collections::HashMap;

use crate::types::Jid;

/// Attribute map of a node.
pub type Attrs = HashMap<String, AttrValue>;

/// Scalar attribute values.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    None,
    String(String),
    Int(i64),
    Bool(bool),
    Jid(Jid),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<u64> for AttrValue {
    fn from(n: u64) -> Self {
        AttrValue::Int(n as i64)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<Jid> for AttrValue {
    fn from(jid: Jid) -> Self {
        AttrValue::Jid(jid)
    }
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_jid(&self) -> Option<&Jid> {
        match self {
            AttrValue::Jid(jid) => Some(jid),
            _ => None,
        }
    }

    /// The string the value renders to on the wire when a token or packed
    /// encoding is attempted.
    pub fn render(&self) -> String {
        match self {
            AttrValue::None => String::new(),
            AttrValue::String(s) => s.clone(),
            AttrValue::Int(n) => n.to_string(),
            AttrValue::Bool(b) => (if *b { "true" } else { "false" }).to_string(),
            AttrValue::Jid(jid) => jid.to_string(),
        }
    }
}

/// Content of a node: nothing, child nodes, or raw bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NodeContent {
    #[default]
    None,
    Children(Vec<Node>),
    Bytes(Vec<u8>),
}

/// A binary-XML element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: NodeContent,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Attrs::new(),
            content: NodeContent::None,
        }
    }

    pub fn with_attrs(tag: impl Into<String>, attrs: Attrs) -> Self {
        Self {
            tag: tag.into(),
            attrs,
            content: NodeContent::None,
        }
    }

    /// Builder-style attribute setter.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style child appender.
    pub fn child(mut self, child: Node) -> Self {
        self.add_child(child);
        self
    }

    /// Builder-style byte content setter.
    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.set_bytes(bytes);
        self
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn get_attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(|v| v.as_str())
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        self.attrs.get(key).and_then(|v| v.as_int())
    }

    /// Boolean attribute, accepting both the in-memory form and the wire
    /// string form.
    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        match self.attrs.get(key)? {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Attribute as a Jid, accepting both the dedicated wire form and a
    /// parsable string.
    pub fn attr_jid(&self, key: &str) -> Option<Jid> {
        match self.attrs.get(key)? {
            AttrValue::Jid(jid) => Some(jid.clone()),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn set_children(&mut self, children: Vec<Node>) {
        self.content = NodeContent::Children(children);
    }

    pub fn add_child(&mut self, child: Node) {
        match &mut self.content {
            NodeContent::Children(children) => children.push(child),
            _ => self.content = NodeContent::Children(vec![child]),
        }
    }

    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.content = NodeContent::Bytes(bytes);
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            NodeContent::Children(children) => Some(children),
            _ => None,
        }
    }

    pub fn children_by_tag(&self, tag: &str) -> Vec<&Node> {
        match &self.content {
            NodeContent::Children(children) => children.iter().filter(|n| n.tag == tag).collect(),
            _ => Vec::new(),
        }
    }

    pub fn child_by_tag(&self, tag: &str) -> Option<&Node> {
        self.children_by_tag(tag).into_iter().next()
    }

    /// Walk a nested tag path.
    pub fn descendant(&self, tags: &[&str]) -> Option<&Node> {
        let mut current = self;
        for tag in tags {
            current = current.child_by_tag(tag)?;
        }
        Some(current)
    }

    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shape() {
        let node = Node::new("iq")
            .attr("id", "1a2b")
            .attr("type", "get")
            .child(Node::new("query").attr("version", 2i64));

        assert_eq!(node.tag, "iq");
        assert_eq!(node.attr_str("type"), Some("get"));
        assert_eq!(node.descendant(&["query"]).unwrap().attr_int("version"), Some(2));
    }

    #[test]
    fn test_structural_equality() {
        let a = Node::new("message").attr("id", "x").bytes(vec![1, 2, 3]);
        let b = Node::new("message").attr("id", "x").bytes(vec![1, 2, 3]);
        let c = Node::new("message").attr("id", "x").bytes(vec![1, 2, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_attr_jid_from_string() {
        let node = Node::new("message").attr("from", "123@s.whatsapp.net");
        let jid = node.attr_jid("from").unwrap();
        assert_eq!(jid.user, "123");
    }

    #[test]
    fn test_children_by_tag() {
        let node = Node::new("sync")
            .child(Node::new("collection").attr("name", "regular"))
            .child(Node::new("collection").attr("name", "regular_high"));
        assert_eq!(node.children_by_tag("collection").len(), 2);
        assert!(node.child_by_tag("patch").is_none());
    }
}
