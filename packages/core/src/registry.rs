//! # Node registry
//!
//! Maps type tags to factories that rebuild nodes from their serialized
//! records. Built-in tags are registered by default; plugins add their own
//! via `Editor::register_node_type`. Because the node representation is a
//! closed union, a plugin factory produces one of the closed [`NodeBody`]
//! kinds under its own tag: a `"quote"` block is an element body with tag
//! `"quote"`, an `"image"` embed is a decorator body.

use crate::error::InvariantViolation;
use crate::node::{
    DecoratorBody, Direction, ElementBody, ElementFormat, Node, NodeBody, NodeFlags, NodeKey,
    TextBody, TextFormat,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Persisted form of one node, as it appears in the `_nodeMap` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "__type")]
    pub node_type: String,

    #[serde(rename = "__key")]
    pub key: NodeKey,

    #[serde(rename = "__parent", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeKey>,

    #[serde(rename = "__flags", default)]
    pub flags: NodeFlags,

    #[serde(rename = "__format", default)]
    pub format: u32,

    #[serde(rename = "__indent", default)]
    pub indent: u32,

    #[serde(rename = "__text", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(rename = "__style", default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    #[serde(rename = "__url", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(
        rename = "__children",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub children: Option<Vec<NodeKey>>,

    #[serde(rename = "__dir", default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

impl NodeRecord {
    pub fn from_node(node: &Node) -> Self {
        let mut record = NodeRecord {
            node_type: node.type_tag().to_string(),
            key: node.key.clone(),
            parent: node.parent.clone(),
            flags: node.flags,
            format: 0,
            indent: 0,
            text: None,
            style: None,
            url: None,
            children: None,
            direction: None,
        };
        match &node.body {
            NodeBody::Text(text) => {
                record.format = text.format.0;
                record.text = Some(text.text.clone());
                if !text.style.is_empty() {
                    record.style = Some(text.style.clone());
                }
                record.url = text.url.clone();
            }
            NodeBody::LineBreak => {}
            NodeBody::Element(element) => {
                record.format = element.format.0;
                record.indent = element.indent;
                record.children = Some(element.children.clone());
                record.direction = element.direction;
            }
            NodeBody::Decorator(_) => {}
        }
        record
    }
}

/// Rebuilds a node from its record. Factories receive the full record and
/// return the reconstructed node carrying the record's key.
pub type NodeFactory = Arc<dyn Fn(&NodeRecord) -> Result<Node, InvariantViolation>>;

pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    /// Registry with the built-in tags: `root`, `paragraph`, `heading`,
    /// `text`, `linebreak`, `decorator`.
    pub fn with_builtins() -> Self {
        let mut registry = NodeRegistry {
            factories: HashMap::new(),
        };
        for tag in ["root", "paragraph", "heading"] {
            registry.register(tag, Arc::new(element_factory));
        }
        registry.register("text", Arc::new(text_factory));
        registry.register("linebreak", Arc::new(line_break_factory));
        registry.register("decorator", Arc::new(decorator_factory));
        registry
    }

    pub fn register(&mut self, tag: impl Into<String>, factory: NodeFactory) {
        self.factories.insert(tag.into(), factory);
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Reconstruct a node; unknown tags are a fatal invariant error.
    pub fn build(&self, record: &NodeRecord) -> Result<Node, InvariantViolation> {
        let factory = self
            .factories
            .get(&record.node_type)
            .ok_or_else(|| InvariantViolation::UnknownNodeType(record.node_type.clone()))?;
        factory(record)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("NodeRegistry").field("tags", &tags).finish()
    }
}

fn element_factory(record: &NodeRecord) -> Result<Node, InvariantViolation> {
    Ok(Node {
        key: record.key.clone(),
        parent: record.parent.clone(),
        flags: record.flags,
        body: NodeBody::Element(ElementBody {
            tag: record.node_type.clone(),
            children: record.children.clone().unwrap_or_default(),
            format: ElementFormat(record.format),
            indent: record.indent,
            direction: record.direction,
        }),
    })
}

fn text_factory(record: &NodeRecord) -> Result<Node, InvariantViolation> {
    Ok(Node {
        key: record.key.clone(),
        parent: record.parent.clone(),
        flags: record.flags,
        body: NodeBody::Text(TextBody {
            text: record.text.clone().unwrap_or_default(),
            format: TextFormat(record.format),
            style: record.style.clone().unwrap_or_default(),
            url: record.url.clone(),
        }),
    })
}

fn line_break_factory(record: &NodeRecord) -> Result<Node, InvariantViolation> {
    Ok(Node {
        key: record.key.clone(),
        parent: record.parent.clone(),
        flags: record.flags,
        body: NodeBody::LineBreak,
    })
}

fn decorator_factory(record: &NodeRecord) -> Result<Node, InvariantViolation> {
    Ok(Node {
        key: record.key.clone(),
        parent: record.parent.clone(),
        flags: record.flags,
        body: NodeBody::Decorator(DecoratorBody {
            tag: record.node_type.clone(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_text_record() {
        let node = Node::text("t1".into(), "hello").with_format(TextFormat::BOLD);
        let record = NodeRecord::from_node(&node);
        assert_eq!(record.node_type, "text");
        assert_eq!(record.format, TextFormat::BOLD.0);

        let registry = NodeRegistry::with_builtins();
        let rebuilt = registry.build(&record).unwrap();
        assert_eq!(rebuilt, node);
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let registry = NodeRegistry::with_builtins();
        let record = NodeRecord {
            node_type: "hologram".to_string(),
            key: "x".into(),
            parent: None,
            flags: NodeFlags::default(),
            format: 0,
            indent: 0,
            text: None,
            style: None,
            url: None,
            children: None,
            direction: None,
        };
        assert_eq!(
            registry.build(&record),
            Err(InvariantViolation::UnknownNodeType("hologram".to_string()))
        );
    }

    #[test]
    fn test_plugin_tag_registration() {
        let mut registry = NodeRegistry::with_builtins();
        assert!(!registry.is_registered("quote"));
        registry.register("quote", Arc::new(element_factory));
        let record = NodeRecord {
            node_type: "quote".to_string(),
            key: "q1".into(),
            parent: Some(NodeKey::root()),
            flags: NodeFlags::default(),
            format: 0,
            indent: 1,
            text: None,
            style: None,
            url: None,
            children: Some(vec!["t1".into()]),
            direction: None,
        };
        let node = registry.build(&record).unwrap();
        let element = node.as_element().unwrap();
        assert_eq!(element.tag, "quote");
        assert_eq!(element.indent, 1);
    }
}
