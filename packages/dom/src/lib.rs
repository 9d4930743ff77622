//! # Vellum DOM
//!
//! Retained DOM surface for the Vellum engine.
//!
//! The reconciler in `vellum-core` patches this tree imperatively; hosts read
//! it to render. The surface deliberately mirrors the subset of the browser
//! DOM the engine relies on:
//!
//! - **Stable identity**: a [`DomId`] stays valid for the lifetime of the
//!   tree, so "same element before and after a patch" is an id comparison.
//! - **Native selection**: one [`DomSelection`] per tree with
//!   `set_base_and_extent` semantics.
//! - **Mutation records**: structural and character-data edits made while
//!   observation is enabled are queued, so edits originating outside the
//!   engine can be funneled back into it.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Stable identifier of one node in a [`DomTree`].
///
/// Ids are never reused within a tree, even after the node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DomId(u32);

impl DomId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomError {
    #[error("No such DOM node: {0:?}")]
    NoSuchNode(DomId),

    #[error("Node {0:?} is not an element")]
    NotAnElement(DomId),

    #[error("Node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: DomId, child: DomId },

    #[error("Cannot insert {0:?} into its own subtree")]
    WouldCycle(DomId),
}

/// One node in the retained tree.
#[derive(Debug, Clone, PartialEq)]
pub enum DomNode {
    Element {
        tag: String,
        attributes: HashMap<String, String>,
        class_name: Option<String>,
        children: Vec<DomId>,
        parent: Option<DomId>,
    },
    Text {
        data: String,
        parent: Option<DomId>,
    },
}

impl DomNode {
    pub fn is_element(&self) -> bool {
        matches!(self, DomNode::Element { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, DomNode::Text { .. })
    }

    fn parent(&self) -> Option<DomId> {
        match self {
            DomNode::Element { parent, .. } | DomNode::Text { parent, .. } => *parent,
        }
    }

    fn set_parent(&mut self, new_parent: Option<DomId>) {
        match self {
            DomNode::Element { parent, .. } | DomNode::Text { parent, .. } => {
                *parent = new_parent
            }
        }
    }
}

/// Record of one mutation performed while observation was enabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MutationRecord {
    /// Children of `target` were added, removed, or reordered.
    ChildListChanged { target: DomId },
    /// Text data of `target` changed; carries the data before the edit.
    CharacterDataChanged { target: DomId, old_data: String },
}

/// Anchor/focus pair over concrete DOM nodes, like the browser's
/// `Selection` object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomSelection {
    pub anchor: (DomId, u32),
    pub focus: (DomId, u32),
}

/// Arena-backed DOM tree with a distinguished root element.
///
/// Slots are tombstoned on removal rather than reused, so an id observed by a
/// caller can never silently come to mean a different node.
#[derive(Debug)]
pub struct DomTree {
    nodes: Vec<Option<DomNode>>,
    root: DomId,
    selection: Option<DomSelection>,
    focused: bool,
    observing: bool,
    records: Vec<MutationRecord>,
}

impl DomTree {
    /// Create a tree whose root is an element with the given tag.
    pub fn new(root_tag: impl Into<String>) -> Self {
        let root = DomNode::Element {
            tag: root_tag.into(),
            attributes: HashMap::new(),
            class_name: None,
            children: Vec::new(),
            parent: None,
        };
        Self {
            nodes: vec![Some(root)],
            root: DomId(0),
            selection: None,
            focused: false,
            observing: false,
            records: Vec::new(),
        }
    }

    pub fn root(&self) -> DomId {
        self.root
    }

    pub fn get(&self, id: DomId) -> Option<&DomNode> {
        self.nodes.get(id.index()).and_then(|slot| slot.as_ref())
    }

    fn get_mut(&mut self, id: DomId) -> Result<&mut DomNode, DomError> {
        self.nodes
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or(DomError::NoSuchNode(id))
    }

    fn alloc(&mut self, node: DomNode) -> DomId {
        let id = DomId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    fn record(&mut self, record: MutationRecord) {
        if self.observing {
            self.records.push(record);
        }
    }

    // -- creation ----------------------------------------------------------

    pub fn create_element(&mut self, tag: impl Into<String>) -> DomId {
        self.alloc(DomNode::Element {
            tag: tag.into(),
            attributes: HashMap::new(),
            class_name: None,
            children: Vec::new(),
            parent: None,
        })
    }

    pub fn create_text(&mut self, data: impl Into<String>) -> DomId {
        self.alloc(DomNode::Text {
            data: data.into(),
            parent: None,
        })
    }

    // -- structure ---------------------------------------------------------

    pub fn append_child(&mut self, parent: DomId, child: DomId) -> Result<(), DomError> {
        self.insert_at(parent, child, None)
    }

    /// Insert `child` into `parent` immediately before `reference`.
    /// A `None` reference appends.
    pub fn insert_before(
        &mut self,
        parent: DomId,
        child: DomId,
        reference: Option<DomId>,
    ) -> Result<(), DomError> {
        self.insert_at(parent, child, reference)
    }

    fn insert_at(
        &mut self,
        parent: DomId,
        child: DomId,
        reference: Option<DomId>,
    ) -> Result<(), DomError> {
        if self.contains(child, parent) {
            return Err(DomError::WouldCycle(child));
        }
        // Detach from any previous parent first.
        if let Some(old_parent) = self.get(child).ok_or(DomError::NoSuchNode(child))?.parent() {
            self.unlink(old_parent, child)?;
            self.record(MutationRecord::ChildListChanged { target: old_parent });
        }
        let index = {
            let node = self.get(parent).ok_or(DomError::NoSuchNode(parent))?;
            let children = match node {
                DomNode::Element { children, .. } => children,
                DomNode::Text { .. } => return Err(DomError::NotAnElement(parent)),
            };
            match reference {
                Some(reference) => children
                    .iter()
                    .position(|&c| c == reference)
                    .ok_or(DomError::NotAChild {
                        parent,
                        child: reference,
                    })?,
                None => children.len(),
            }
        };
        match self.get_mut(parent)? {
            DomNode::Element { children, .. } => children.insert(index, child),
            DomNode::Text { .. } => unreachable!("checked above"),
        }
        self.get_mut(child)?.set_parent(Some(parent));
        self.record(MutationRecord::ChildListChanged { target: parent });
        Ok(())
    }

    /// Detach `child` from `parent`. The subtree stays allocated; its ids
    /// remain valid until the tree is dropped.
    pub fn remove_child(&mut self, parent: DomId, child: DomId) -> Result<(), DomError> {
        self.unlink(parent, child)?;
        self.get_mut(child)?.set_parent(None);
        self.record(MutationRecord::ChildListChanged { target: parent });
        Ok(())
    }

    pub fn replace_child(
        &mut self,
        parent: DomId,
        old_child: DomId,
        new_child: DomId,
    ) -> Result<(), DomError> {
        self.insert_before(parent, new_child, Some(old_child))?;
        self.remove_child(parent, old_child)
    }

    /// Remove every child of `parent`.
    pub fn clear_children(&mut self, parent: DomId) -> Result<(), DomError> {
        let children = self.children(parent).to_vec();
        for child in children {
            self.remove_child(parent, child)?;
        }
        Ok(())
    }

    fn unlink(&mut self, parent: DomId, child: DomId) -> Result<(), DomError> {
        match self.get_mut(parent)? {
            DomNode::Element { children, .. } => {
                let index = children
                    .iter()
                    .position(|&c| c == child)
                    .ok_or(DomError::NotAChild { parent, child })?;
                children.remove(index);
                Ok(())
            }
            DomNode::Text { .. } => Err(DomError::NotAnElement(parent)),
        }
    }

    // -- content -----------------------------------------------------------

    pub fn set_text_data(&mut self, id: DomId, data: impl Into<String>) -> Result<(), DomError> {
        let data = data.into();
        match self.get_mut(id)? {
            DomNode::Text { data: existing, .. } => {
                let old_data = std::mem::replace(existing, data);
                self.record(MutationRecord::CharacterDataChanged {
                    target: id,
                    old_data,
                });
                Ok(())
            }
            DomNode::Element { .. } => Err(DomError::NotAnElement(id)),
        }
    }

    pub fn set_attribute(
        &mut self,
        id: DomId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DomError> {
        match self.get_mut(id)? {
            DomNode::Element { attributes, .. } => {
                attributes.insert(name.into(), value.into());
                Ok(())
            }
            DomNode::Text { .. } => Err(DomError::NotAnElement(id)),
        }
    }

    pub fn remove_attribute(&mut self, id: DomId, name: &str) -> Result<(), DomError> {
        match self.get_mut(id)? {
            DomNode::Element { attributes, .. } => {
                attributes.remove(name);
                Ok(())
            }
            DomNode::Text { .. } => Err(DomError::NotAnElement(id)),
        }
    }

    pub fn set_class_name(
        &mut self,
        id: DomId,
        class: Option<String>,
    ) -> Result<(), DomError> {
        match self.get_mut(id)? {
            DomNode::Element { class_name, .. } => {
                *class_name = class;
                Ok(())
            }
            DomNode::Text { .. } => Err(DomError::NotAnElement(id)),
        }
    }

    // -- queries -----------------------------------------------------------

    pub fn tag(&self, id: DomId) -> Option<&str> {
        match self.get(id)? {
            DomNode::Element { tag, .. } => Some(tag),
            DomNode::Text { .. } => None,
        }
    }

    pub fn text_data(&self, id: DomId) -> Option<&str> {
        match self.get(id)? {
            DomNode::Text { data, .. } => Some(data),
            DomNode::Element { .. } => None,
        }
    }

    pub fn attribute(&self, id: DomId, name: &str) -> Option<&str> {
        match self.get(id)? {
            DomNode::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            DomNode::Text { .. } => None,
        }
    }

    pub fn class_name(&self, id: DomId) -> Option<&str> {
        match self.get(id)? {
            DomNode::Element { class_name, .. } => class_name.as_deref(),
            DomNode::Text { .. } => None,
        }
    }

    pub fn parent(&self, id: DomId) -> Option<DomId> {
        self.get(id)?.parent()
    }

    pub fn children(&self, id: DomId) -> &[DomId] {
        match self.get(id) {
            Some(DomNode::Element { children, .. }) => children,
            _ => &[],
        }
    }

    pub fn first_child(&self, id: DomId) -> Option<DomId> {
        self.children(id).first().copied()
    }

    pub fn last_child(&self, id: DomId) -> Option<DomId> {
        self.children(id).last().copied()
    }

    pub fn next_sibling(&self, id: DomId) -> Option<DomId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&c| c == id)?;
        siblings.get(index + 1).copied()
    }

    pub fn previous_sibling(&self, id: DomId) -> Option<DomId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&c| c == id)?;
        index.checked_sub(1).and_then(|i| siblings.get(i).copied())
    }

    /// True if `id` is `ancestor` or lies in its subtree.
    pub fn contains(&self, ancestor: DomId, id: DomId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// True if the node is reachable from the tree root.
    pub fn is_attached(&self, id: DomId) -> bool {
        self.contains(self.root, id)
    }

    /// Concatenated text data of the subtree, in document order.
    pub fn text_content(&self, id: DomId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: DomId, out: &mut String) {
        match self.get(id) {
            Some(DomNode::Text { data, .. }) => out.push_str(data),
            Some(DomNode::Element { children, .. }) => {
                for &child in children {
                    self.collect_text(child, out);
                }
            }
            None => {}
        }
    }

    // -- selection / focus -------------------------------------------------

    pub fn selection(&self) -> Option<DomSelection> {
        self.selection
    }

    pub fn set_base_and_extent(
        &mut self,
        anchor: DomId,
        anchor_offset: u32,
        focus: DomId,
        focus_offset: u32,
    ) {
        self.selection = Some(DomSelection {
            anchor: (anchor, anchor_offset),
            focus: (focus, focus_offset),
        });
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn focused(&self) -> bool {
        self.focused
    }

    /// Focus the tree. No scroll side effects to suppress here, but the flag
    /// matters for selection sync: an unfocused surface must not be given a
    /// selection by the browser, so the reconciler focuses first.
    pub fn focus(&mut self) {
        self.focused = true;
    }

    pub fn blur(&mut self) {
        self.focused = false;
    }

    // -- observation -------------------------------------------------------

    pub fn set_observing(&mut self, observing: bool) {
        self.observing = observing;
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Drain queued mutation records.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_query() {
        let mut tree = DomTree::new("div");
        let p = tree.create_element("p");
        let t = tree.create_text("hello");
        tree.append_child(tree.root(), p).unwrap();
        tree.append_child(p, t).unwrap();

        assert_eq!(tree.children(tree.root()), &[p]);
        assert_eq!(tree.parent(t), Some(p));
        assert_eq!(tree.text_content(tree.root()), "hello");
        assert!(tree.is_attached(t));
    }

    #[test]
    fn test_insert_before_reorders() {
        let mut tree = DomTree::new("div");
        let a = tree.create_element("p");
        let b = tree.create_element("p");
        tree.append_child(tree.root(), a).unwrap();
        tree.append_child(tree.root(), b).unwrap();

        // Moving an attached node detaches it first.
        tree.insert_before(tree.root(), b, Some(a)).unwrap();
        assert_eq!(tree.children(tree.root()), &[b, a]);
        assert_eq!(tree.next_sibling(b), Some(a));
        assert_eq!(tree.previous_sibling(a), Some(b));
    }

    #[test]
    fn test_remove_keeps_ids_valid() {
        let mut tree = DomTree::new("div");
        let p = tree.create_element("p");
        let t = tree.create_text("x");
        tree.append_child(tree.root(), p).unwrap();
        tree.append_child(p, t).unwrap();

        tree.remove_child(tree.root(), p).unwrap();
        assert!(!tree.is_attached(p));
        // Subtree still readable through its ids.
        assert_eq!(tree.text_data(t), Some("x"));
        assert_eq!(tree.parent(t), Some(p));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut tree = DomTree::new("div");
        let a = tree.create_element("p");
        let b = tree.create_element("span");
        tree.append_child(tree.root(), a).unwrap();
        tree.append_child(a, b).unwrap();

        assert_eq!(tree.append_child(b, a), Err(DomError::WouldCycle(a)));
    }

    #[test]
    fn test_mutation_records_only_when_observing() {
        let mut tree = DomTree::new("div");
        let t = tree.create_text("one");
        tree.append_child(tree.root(), t).unwrap();
        assert!(tree.take_records().is_empty());

        tree.set_observing(true);
        tree.set_text_data(t, "two").unwrap();
        let records = tree.take_records();
        assert_eq!(
            records,
            vec![MutationRecord::CharacterDataChanged {
                target: t,
                old_data: "one".to_string(),
            }]
        );

        tree.set_observing(false);
        tree.set_text_data(t, "three").unwrap();
        assert!(tree.take_records().is_empty());
    }

    #[test]
    fn test_selection_set_base_and_extent() {
        let mut tree = DomTree::new("div");
        let t = tree.create_text("hello");
        tree.append_child(tree.root(), t).unwrap();

        assert!(tree.selection().is_none());
        tree.set_base_and_extent(t, 1, t, 4);
        let sel = tree.selection().unwrap();
        assert_eq!(sel.anchor, (t, 1));
        assert_eq!(sel.focus, (t, 4));
    }
}
