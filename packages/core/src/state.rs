//! # Editor state
//!
//! An [`EditorState`] is one immutable snapshot: the complete node map for
//! one version plus a selection snapshot. Transactions start from a shallow
//! clone of the map; individual nodes are copy-on-write cloned (via
//! `Arc::make_mut`) only when first written, so structurally-untouched
//! subtrees remain physically shared between versions.

use crate::error::EditorError;
use crate::node::{Node, NodeKey, NodeStore};
use crate::registry::{NodeRecord, NodeRegistry};
use crate::selection::{Point, PointKind, Selection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EditorState {
    pub(crate) node_map: HashMap<NodeKey, Arc<Node>>,
    pub(crate) selection: Option<Selection>,
}

impl NodeStore for EditorState {
    fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.node_map.get(key).map(Arc::as_ref)
    }
}

impl EditorState {
    /// State containing only an attached root with the given children
    /// already wired in the map. Used by the editor on construction.
    pub(crate) fn from_map(
        node_map: HashMap<NodeKey, Arc<Node>>,
        selection: Option<Selection>,
    ) -> Self {
        Self {
            node_map,
            selection,
        }
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn node_count(&self) -> usize {
        self.node_map.len()
    }

    pub fn root(&self) -> Option<&Node> {
        self.node(&NodeKey::root())
    }

    /// Full text content of the document.
    pub fn text_content(&self) -> String {
        self.text_content_of(&NodeKey::root())
    }

    /// Reference identity or full structural identity including selection.
    pub fn is(&self, other: &EditorState) -> bool {
        self.selection_eq(other) && self.equals(other)
    }

    /// Structural identity tolerating selection differences.
    pub fn equals(&self, other: &EditorState) -> bool {
        if self.node_map.len() != other.node_map.len() {
            return false;
        }
        self.subtree_eq(other, &NodeKey::root())
    }

    fn selection_eq(&self, other: &EditorState) -> bool {
        match (&self.selection, &other.selection) {
            (None, None) => true,
            (Some(a), Some(b)) => a.anchor == b.anchor && a.focus == b.focus,
            _ => false,
        }
    }

    fn subtree_eq(&self, other: &EditorState, key: &NodeKey) -> bool {
        match (self.node_map.get(key), other.node_map.get(key)) {
            (Some(a), Some(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if a.as_ref() != b.as_ref() {
                    return false;
                }
                self.children_of(key)
                    .iter()
                    .all(|child| self.subtree_eq(other, child))
            }
            _ => false,
        }
    }

    // -- persisted layout --------------------------------------------------

    /// Serialize to the persisted JSON layout:
    /// `{"_nodeMap": [[key, record], ...], "_selection": ...}`.
    pub fn stringify(&self) -> Result<String, EditorError> {
        let mut entries: Vec<(NodeKey, NodeRecord)> = self
            .node_map
            .values()
            .map(|node| (node.key.clone(), NodeRecord::from_node(node)))
            .collect();
        // Stable order: root first, then keys sorted, so output is
        // deterministic across runs.
        entries.sort_by(|(a, _), (b, _)| {
            b.is_root()
                .cmp(&a.is_root())
                .then_with(|| a.as_str().cmp(b.as_str()))
        });
        let serialized = SerializedState {
            node_map: entries,
            selection: self.selection.as_ref().map(SerializedSelection::from),
        };
        Ok(serde_json::to_string(&serialized)?)
    }

    /// Parse a persisted state through the registry. A serialized selection
    /// whose keys no longer resolve in the parsed map is dropped rather than
    /// left dangling.
    pub fn parse(input: &str, registry: &NodeRegistry) -> Result<EditorState, EditorError> {
        let serialized: SerializedState = serde_json::from_str(input)?;
        let mut node_map = HashMap::with_capacity(serialized.node_map.len());
        for (key, record) in &serialized.node_map {
            let node = registry.build(record)?;
            node_map.insert(key.clone(), Arc::new(node));
        }
        let mut state = EditorState {
            node_map,
            selection: None,
        };
        state.selection = serialized.selection.and_then(|sel| {
            let selection = sel.into_selection();
            let resolves = state.node_map.contains_key(&selection.anchor.key)
                && state.node_map.contains_key(&selection.focus.key);
            resolves.then_some(selection)
        });
        Ok(state)
    }
}

#[derive(Serialize, Deserialize)]
struct SerializedState {
    #[serde(rename = "_nodeMap")]
    node_map: Vec<(NodeKey, NodeRecord)>,
    #[serde(rename = "_selection")]
    selection: Option<SerializedSelection>,
}

#[derive(Serialize, Deserialize)]
struct SerializedSelection {
    anchor: SerializedPoint,
    focus: SerializedPoint,
}

#[derive(Serialize, Deserialize)]
struct SerializedPoint {
    key: NodeKey,
    offset: usize,
    #[serde(rename = "type")]
    kind: PointKind,
}

impl From<&Selection> for SerializedSelection {
    fn from(selection: &Selection) -> Self {
        let point = |p: &Point| SerializedPoint {
            key: p.key.clone(),
            offset: p.offset,
            kind: p.kind,
        };
        SerializedSelection {
            anchor: point(&selection.anchor),
            focus: point(&selection.focus),
        }
    }
}

impl SerializedSelection {
    fn into_selection(self) -> Selection {
        Selection::new(
            Point::new(self.anchor.key, self.anchor.offset, self.anchor.kind),
            Point::new(self.focus.key, self.focus.offset, self.focus.kind),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeBody;

    fn simple_state() -> EditorState {
        let p: NodeKey = "p1".into();
        let t: NodeKey = "t1".into();
        let mut root = Node::root();
        root.as_element_mut().unwrap().children.push(p.clone());
        let mut para = Node::element(p.clone(), "paragraph");
        para.parent = Some(NodeKey::root());
        para.as_element_mut().unwrap().children.push(t.clone());
        let mut text = Node::text(t.clone(), "hello");
        text.parent = Some(p.clone());
        let mut map = HashMap::new();
        map.insert(NodeKey::root(), Arc::new(root));
        map.insert(p, Arc::new(para));
        map.insert(t.clone(), Arc::new(text));
        EditorState::from_map(
            map,
            Some(Selection::collapsed(Point::text(t, 2))),
        )
    }

    #[test]
    fn test_round_trip_serialization() {
        let state = simple_state();
        let json = state.stringify().unwrap();
        let registry = NodeRegistry::with_builtins();
        let parsed = EditorState::parse(&json, &registry).unwrap();

        assert!(parsed.is(&state));
        assert_eq!(parsed.text_content(), "hello");
        let selection = parsed.selection.as_ref().unwrap();
        assert_eq!(selection.anchor.key.as_str(), "t1");
        assert_eq!(selection.anchor.offset, 2);
    }

    #[test]
    fn test_parse_drops_dangling_selection() {
        let state = simple_state();
        let json = state.stringify().unwrap();
        // Point the serialized selection at a key that doesn't exist.
        let json = json.replace("\"key\":\"t1\"", "\"key\":\"gone\"");
        let registry = NodeRegistry::with_builtins();
        let parsed = EditorState::parse(&json, &registry).unwrap();
        assert!(parsed.selection.is_none());
    }

    #[test]
    fn test_equals_tolerates_selection_difference() {
        let a = simple_state();
        let mut b = simple_state();
        b.selection = None;
        assert!(a.equals(&b));
        assert!(!a.is(&b));
    }

    #[test]
    fn test_equals_detects_structural_change() {
        let a = simple_state();
        let mut b = simple_state();
        let t: NodeKey = "t1".into();
        let node = Arc::make_mut(b.node_map.get_mut(&t).unwrap());
        if let NodeBody::Text(text) = &mut node.body {
            text.text.push('!');
        }
        assert!(!a.equals(&b));
    }

    #[test]
    fn test_unknown_type_fails_parse() {
        let state = simple_state();
        let json = state.stringify().unwrap().replace("paragraph", "mystery");
        let registry = NodeRegistry::with_builtins();
        assert!(EditorState::parse(&json, &registry).is_err());
    }
}
