//! # Selection model
//!
//! A selection is an anchor/focus pair of [`Point`]s over the current state.
//! Whether it is backward is determined by document order of the two points,
//! not by which was set first. Within a transaction the selection is mutable
//! and carries a `dirty` flag marking it for DOM resync; across state
//! versions it is cloned, never shared.
//!
//! DOM→model resolution lives here too: raw `(DomId, offset)` pairs from the
//! native selection are mapped onto `(text node, character offset)` points,
//! with the edge cases around element offsets, line breaks, and
//! inert/immutable/segmented text spelled out in [`resolve_model_point`].

use crate::node::{char_slice, Node, NodeBody, NodeKey, NodeStore};
use crate::reconciler::DomBindings;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use vellum_dom::DomSelection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    /// Offset is a character index into the node's text.
    Text,
    /// Offset is an index into the element's child list (0..=child count).
    Element,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    pub kind: PointKind,
}

impl Point {
    pub fn new(key: NodeKey, offset: usize, kind: PointKind) -> Self {
        Point { key, offset, kind }
    }

    pub fn text(key: NodeKey, offset: usize) -> Self {
        Point::new(key, offset, PointKind::Text)
    }

    pub fn element(key: NodeKey, offset: usize) -> Self {
        Point::new(key, offset, PointKind::Element)
    }

    /// Document-order comparison. Detached points compare equal to
    /// themselves only.
    pub fn is_before(&self, other: &Point, store: &impl NodeStore) -> bool {
        if self.key == other.key {
            return self.offset < other.offset;
        }
        match (store.path_from_root(&self.key), store.path_from_root(&other.key)) {
            (Some(mut a), Some(mut b)) => {
                a.push(self.offset);
                b.push(other.offset);
                a < b
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub anchor: Point,
    pub focus: Point,
    /// Structural edits moved the points this transaction.
    pub(crate) dirty: bool,
    /// The native DOM selection must be re-synced on commit.
    pub(crate) needs_sync: bool,
}

impl Selection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Selection {
            anchor,
            focus,
            dirty: false,
            needs_sync: false,
        }
    }

    pub fn collapsed(point: Point) -> Self {
        Selection::new(point.clone(), point)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }

    pub fn is_backward(&self, store: &impl NodeStore) -> bool {
        self.focus.is_before(&self.anchor, store)
    }

    /// Anchor/focus ordered by document position.
    pub fn ordered_points(&self, store: &impl NodeStore) -> (&Point, &Point) {
        if self.is_backward(store) {
            (&self.focus, &self.anchor)
        } else {
            (&self.anchor, &self.focus)
        }
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
        self.needs_sync = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
        self.needs_sync = true;
    }

    /// Document-order list of nodes spanned by anchor..focus.
    pub fn nodes(&self, store: &impl NodeStore) -> Vec<NodeKey> {
        let (first, last) = self.ordered_points(store);
        store.nodes_between(&first.key, &last.key)
    }

    /// Concatenated text of the spanned range. The first and last text
    /// nodes are sliced to the point offsets; element boundaries crossed
    /// contribute a newline.
    pub fn text_content(&self, store: &impl NodeStore) -> String {
        let (first, last) = self.ordered_points(store);
        let mut out = String::new();
        for key in store.nodes_between(&first.key, &last.key) {
            let Some(node) = store.node(&key) else {
                continue;
            };
            match &node.body {
                NodeBody::Text(_) => {
                    if !node.flags.is_inert() {
                        let sliced = self.slice_selected_text_content(store, node);
                        if let Some(text) = sliced.as_text() {
                            out.push_str(&text.text);
                        }
                    }
                }
                NodeBody::LineBreak => out.push('\n'),
                NodeBody::Element(_) => {
                    if !node.is_root() && key != first.key && !out.is_empty() {
                        out.push('\n');
                    }
                }
                NodeBody::Decorator(_) => {}
            }
        }
        out
    }

    /// Slice `node`'s text to the part of it this selection covers.
    ///
    /// Returns the original node untouched (borrowed) when the selection
    /// fully covers its text; otherwise returns an owned clone whose text is
    /// the covered slice. Nodes outside the selection's endpoints are always
    /// returned borrowed in full.
    pub fn slice_selected_text_content<'a>(
        &self,
        store: &impl NodeStore,
        node: &'a Node,
    ) -> Cow<'a, Node> {
        let Some(text) = node.as_text() else {
            return Cow::Borrowed(node);
        };
        let len = node.text_len();
        let (first, last) = self.ordered_points(store);
        let start = if first.key == node.key && first.kind == PointKind::Text {
            first.offset.min(len)
        } else {
            0
        };
        let end = if last.key == node.key && last.kind == PointKind::Text {
            last.offset.min(len)
        } else {
            len
        };
        if start == 0 && end == len {
            return Cow::Borrowed(node);
        }
        let mut sliced = node.clone();
        if let Some(body) = sliced.as_text_mut() {
            body.text = char_slice(&text.text, start, end).to_string();
        }
        Cow::Owned(sliced)
    }
}

/// Map a raw DOM selection onto model points. Returns `None` when either
/// side lands outside the engine's DOM (e.g. on a node it didn't build).
pub fn resolve_selection(
    dom_selection: &DomSelection,
    bindings: &DomBindings,
    store: &impl NodeStore,
) -> Option<Selection> {
    let collapsed = dom_selection.anchor == dom_selection.focus;
    let (anchor_id, anchor_offset) = dom_selection.anchor;
    let (focus_id, focus_offset) = dom_selection.focus;
    let anchor_key = bindings.key_for(anchor_id)?;
    let focus_key = bindings.key_for(focus_id)?;
    let anchor = resolve_model_point(store, anchor_key, anchor_offset as usize, collapsed)?;
    let focus = resolve_model_point(store, focus_key, focus_offset as usize, collapsed)?;
    Some(Selection::new(anchor, focus))
}

/// Resolve a `(model node, raw offset)` pair to a concrete selection point.
///
/// Edge cases, which are the contract:
/// - An offset on an element resolves to its Nth child, recursing into that
///   child's first (or, past the end, last) text descendant.
/// - Line breaks, inert text, and decorators redirect to the end of the
///   previous non-inert text sibling, falling back to an element point on
///   the parent at the child index.
/// - Immutable/segmented text redirects a collapsed offset-0 selection to
///   the end of the previous text sibling.
pub fn resolve_model_point(
    store: &impl NodeStore,
    key: &NodeKey,
    offset: usize,
    collapsed: bool,
) -> Option<Point> {
    let node = store.node(key)?;
    match &node.body {
        NodeBody::Text(_) => {
            if node.flags.is_inert() {
                return end_of_previous_text(store, key);
            }
            if (node.flags.is_immutable() || node.flags.is_segmented())
                && collapsed
                && offset == 0
            {
                if let Some(point) = previous_text_end(store, key) {
                    return Some(point);
                }
            }
            Some(Point::text(key.clone(), offset.min(node.text_len())))
        }
        NodeBody::LineBreak | NodeBody::Decorator(_) => end_of_previous_text(store, key),
        NodeBody::Element(element) => {
            if element.children.is_empty() {
                return Some(Point::element(key.clone(), 0));
            }
            if offset < element.children.len() {
                let child = element.children[offset].clone();
                descend_to_text(store, &child, false)
            } else {
                let child = element.children[element.children.len() - 1].clone();
                descend_to_text(store, &child, true)
            }
        }
    }
}

/// First (or last) text point inside `key`'s subtree.
fn descend_to_text(store: &impl NodeStore, key: &NodeKey, from_end: bool) -> Option<Point> {
    let node = store.node(key)?;
    match &node.body {
        NodeBody::Text(_) => {
            if node.flags.is_inert() {
                return end_of_previous_text(store, key);
            }
            let offset = if from_end { node.text_len() } else { 0 };
            Some(Point::text(key.clone(), offset))
        }
        NodeBody::LineBreak | NodeBody::Decorator(_) => end_of_previous_text(store, key),
        NodeBody::Element(element) => {
            let child = if from_end {
                element.children.last()
            } else {
                element.children.first()
            };
            match child {
                Some(child) => descend_to_text(store, &child.clone(), from_end),
                None => Some(Point::element(key.clone(), 0)),
            }
        }
    }
}

/// End of the nearest previous non-inert text sibling, or an element point
/// on the parent at this node's child index.
fn end_of_previous_text(store: &impl NodeStore, key: &NodeKey) -> Option<Point> {
    if let Some(point) = previous_text_end(store, key) {
        return Some(point);
    }
    let parent = store.node(key)?.parent.clone()?;
    let index = store.index_in_parent(key).unwrap_or(0);
    Some(Point::element(parent, index))
}

fn previous_text_end(store: &impl NodeStore, key: &NodeKey) -> Option<Point> {
    let mut current = key.clone();
    while let Some(prev) = store.prev_sibling_of(&current) {
        let prev = prev.clone();
        if let Some(node) = store.node(&prev) {
            if node.is_text() && !node.flags.is_inert() {
                return Some(Point::text(prev, node.text_len()));
            }
        }
        current = prev;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeFlags;
    use std::collections::HashMap;

    struct MapStore(HashMap<NodeKey, Node>);

    impl NodeStore for MapStore {
        fn node(&self, key: &NodeKey) -> Option<&Node> {
            self.0.get(key)
        }
    }

    fn two_text_store() -> (MapStore, NodeKey, NodeKey, NodeKey) {
        // root > paragraph > [text "01234", bold text "56789"]
        let p: NodeKey = "p".into();
        let a: NodeKey = "a".into();
        let b: NodeKey = "b".into();
        let mut root = Node::root();
        root.as_element_mut().unwrap().children.push(p.clone());
        let mut para = Node::element(p.clone(), "paragraph");
        para.parent = Some(NodeKey::root());
        para.as_element_mut()
            .unwrap()
            .children
            .extend([a.clone(), b.clone()]);
        let mut ta = Node::text(a.clone(), "01234");
        ta.parent = Some(p.clone());
        let mut tb = Node::text(b.clone(), "56789")
            .with_format(crate::node::TextFormat::BOLD);
        tb.parent = Some(p.clone());
        let mut map = HashMap::new();
        map.insert(NodeKey::root(), root);
        map.insert(p.clone(), para);
        map.insert(a.clone(), ta);
        map.insert(b.clone(), tb);
        (MapStore(map), p, a, b)
    }

    #[test]
    fn test_backwardness_by_document_order() {
        let (store, _, a, b) = two_text_store();
        let forward = Selection::new(Point::text(a.clone(), 1), Point::text(b.clone(), 2));
        assert!(!forward.is_backward(&store));
        let backward = Selection::new(Point::text(b, 2), Point::text(a, 1));
        assert!(backward.is_backward(&store));
        // Ordered points come out the same either way.
        let (first, _) = backward.ordered_points(&store);
        assert_eq!(first.key.as_str(), "a");
    }

    #[test]
    fn test_full_coverage_slices_are_borrowed() {
        let (store, _, a, b) = two_text_store();
        // Select 0..9: the whole of both nodes.
        let selection = Selection::new(Point::text(a.clone(), 0), Point::text(b.clone(), 5));
        let node_a = store.node(&a).unwrap();
        let node_b = store.node(&b).unwrap();
        assert!(matches!(
            selection.slice_selected_text_content(&store, node_a),
            Cow::Borrowed(_)
        ));
        assert!(matches!(
            selection.slice_selected_text_content(&store, node_b),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_partial_coverage_slices_are_cloned() {
        let (store, _, a, b) = two_text_store();
        // Select 0..8: missing the last character of the second node.
        let selection = Selection::new(Point::text(a.clone(), 0), Point::text(b.clone(), 4));
        let node_a = store.node(&a).unwrap();
        let node_b = store.node(&b).unwrap();
        assert!(matches!(
            selection.slice_selected_text_content(&store, node_a),
            Cow::Borrowed(_)
        ));
        let sliced = selection.slice_selected_text_content(&store, node_b);
        assert!(matches!(sliced, Cow::Owned(_)));
        assert_eq!(sliced.as_text().unwrap().text, "5678");
    }

    #[test]
    fn test_text_content_slices_endpoints() {
        let (store, _, a, b) = two_text_store();
        let selection = Selection::new(Point::text(a, 2), Point::text(b, 3));
        assert_eq!(selection.text_content(&store), "234567");
    }

    #[test]
    fn test_resolve_element_offset_descends_to_text() {
        let (store, p, a, b) = two_text_store();
        let start = resolve_model_point(&store, &p, 0, false).unwrap();
        assert_eq!(start, Point::text(a, 0));
        // Offset past the last child resolves to the end of the last text.
        let end = resolve_model_point(&store, &p, 2, false).unwrap();
        assert_eq!(end, Point::text(b, 5));
    }

    #[test]
    fn test_resolve_inert_redirects_to_previous_text() {
        let (mut store, _, a, b) = two_text_store();
        store.0.get_mut(&b).unwrap().flags.insert(NodeFlags::INERT);
        let point = resolve_model_point(&store, &b, 3, false).unwrap();
        assert_eq!(point, Point::text(a, 5));
    }

    #[test]
    fn test_resolve_collapsed_immutable_at_zero() {
        let (mut store, _, a, b) = two_text_store();
        store
            .0
            .get_mut(&b)
            .unwrap()
            .flags
            .insert(NodeFlags::IMMUTABLE);
        let point = resolve_model_point(&store, &b, 0, true).unwrap();
        assert_eq!(point, Point::text(a.clone(), 5));
        // Non-collapsed keeps the immutable node itself.
        let point = resolve_model_point(&store, &b, 0, false).unwrap();
        assert_eq!(point, Point::text(b, 0));
    }
}
