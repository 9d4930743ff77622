//! # Reconciler
//!
//! Diffs the previous and next editor states against the dirty-node and
//! dirty-subtree sets and imperatively patches the live [`DomTree`] to match
//! the next state, reusing existing DOM nodes wherever the underlying model
//! key is unchanged.
//!
//! Skip rule: a key whose node is physically shared between both states
//! (same `Arc`) and sits in neither dirty set is untouched; its whole DOM
//! subtree is reused as-is. The children diff is a keyed scan that is O(n)
//! amortized for the common append/prepend/reorder-few cases.
//!
//! Any error while patching triggers a full teardown-and-rebuild from the
//! next state rather than leaving a partially-patched DOM behind.

use crate::error::EditorError;
use crate::node::{Node, NodeBody, NodeKey, NodeStore};
use crate::selection::{resolve_model_point, Point, PointKind};
use crate::state::EditorState;
use crate::theme::Theme;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_dom::{DomId, DomTree};

/// Two-way binding between model keys and the DOM the reconciler built for
/// them. Text nodes bind twice: the wrapping `span` and its inner DOM text
/// node both resolve back to the model key.
#[derive(Debug, Default)]
pub struct DomBindings {
    key_to_dom: HashMap<NodeKey, DomId>,
    key_to_text_dom: HashMap<NodeKey, DomId>,
    dom_to_key: HashMap<DomId, NodeKey>,
    trailing_breaks: HashMap<NodeKey, DomId>,
}

impl DomBindings {
    pub fn dom_for(&self, key: &NodeKey) -> Option<DomId> {
        self.key_to_dom.get(key).copied()
    }

    /// Inner DOM text node of a model text node.
    pub fn text_dom_for(&self, key: &NodeKey) -> Option<DomId> {
        self.key_to_text_dom.get(key).copied()
    }

    pub fn key_for(&self, id: DomId) -> Option<&NodeKey> {
        self.dom_to_key.get(&id)
    }

    fn bind(&mut self, key: &NodeKey, id: DomId) {
        self.key_to_dom.insert(key.clone(), id);
        self.dom_to_key.insert(id, key.clone());
    }

    fn bind_text(&mut self, key: &NodeKey, id: DomId) {
        self.key_to_text_dom.insert(key.clone(), id);
        self.dom_to_key.insert(id, key.clone());
    }

    fn unbind(&mut self, key: &NodeKey) {
        if let Some(id) = self.key_to_dom.remove(key) {
            self.dom_to_key.remove(&id);
        }
        if let Some(id) = self.key_to_text_dom.remove(key) {
            self.dom_to_key.remove(&id);
        }
        self.trailing_breaks.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.key_to_dom.clear();
        self.key_to_text_dom.clear();
        self.dom_to_key.clear();
        self.trailing_breaks.clear();
    }
}

fn direction_attr(direction: crate::node::Direction) -> &'static str {
    match direction {
        crate::node::Direction::Ltr => "ltr",
        crate::node::Direction::Rtl => "rtl",
    }
}

/// DOM tag for a model node.
fn dom_tag(node: &Node) -> &'static str {
    match &node.body {
        NodeBody::Text(_) => "span",
        NodeBody::LineBreak => "br",
        NodeBody::Decorator(_) => "div",
        NodeBody::Element(element) => match element.tag.as_str() {
            "paragraph" => "p",
            "heading" => "h1",
            _ => "div",
        },
    }
}

fn ends_in_break(state: &EditorState, key: &NodeKey) -> bool {
    let Some(last) = state.last_child_of(key) else {
        return false;
    };
    matches!(
        state.node(last).map(|node| &node.body),
        Some(NodeBody::LineBreak) | Some(NodeBody::Decorator(_))
    )
}

pub(crate) struct Reconciler<'a> {
    pub prev: &'a EditorState,
    pub next: &'a EditorState,
    pub dirty_nodes: &'a HashSet<NodeKey>,
    pub dirty_subtrees: &'a HashSet<NodeKey>,
    pub full_rebuild: bool,
    pub dom: &'a mut DomTree,
    pub theme: &'a Theme,
    pub bindings: &'a mut DomBindings,
}

impl<'a> Reconciler<'a> {
    /// Patch the DOM to match `next`. On failure the caller is expected to
    /// fall back to [`Reconciler::rebuild`].
    pub(crate) fn run(&mut self) -> Result<(), EditorError> {
        if self.full_rebuild {
            return self.rebuild();
        }
        debug!(
            dirty_nodes = self.dirty_nodes.len(),
            dirty_subtrees = self.dirty_subtrees.len(),
            "reconciling"
        );
        let root_key = NodeKey::root();
        self.bindings.bind(&root_key, self.dom.root());
        self.reconcile_node(&root_key)?;
        self.sync_selection()?;
        Ok(())
    }

    /// Teardown and recreate everything from the next state. Used on
    /// attach, on recovery, and when an update forced a non-incremental
    /// pass.
    pub(crate) fn rebuild(&mut self) -> Result<(), EditorError> {
        debug!("full rebuild");
        let root_dom = self.dom.root();
        self.dom.clear_children(root_dom)?;
        self.bindings.clear();
        let root_key = NodeKey::root();
        self.bindings.bind(&root_key, root_dom);
        for child in self.next.children_of(&root_key).to_vec() {
            let child_dom = self.create_fresh_subtree(&child)?;
            self.dom.append_child(root_dom, child_dom)?;
        }
        self.reconcile_trailing_break(&root_key, root_dom)?;
        self.sync_selection()?;
        Ok(())
    }

    fn is_dirty(&self, key: &NodeKey) -> bool {
        self.dirty_nodes.contains(key) || self.dirty_subtrees.contains(key)
    }

    /// Reconcile one key, returning the DOM node that now represents it.
    fn reconcile_node(&mut self, key: &NodeKey) -> Result<DomId, EditorError> {
        let next_arc = self
            .next
            .node_map
            .get(key)
            .ok_or_else(|| EditorError::Reconcile(format!("missing next node {key}")))?
            .clone();
        let prev_arc = self.prev.node_map.get(key).cloned();
        let existing = self.bindings.dom_for(key);

        let (prev_arc, dom_id) = match (prev_arc, existing) {
            (Some(prev), Some(dom_id)) => (prev, dom_id),
            _ => return self.create_fresh_subtree(key),
        };

        // Unchanged and clean: reuse the whole DOM subtree.
        if Arc::ptr_eq(&prev_arc, &next_arc) && !self.is_dirty(key) {
            return Ok(dom_id);
        }

        if self.must_recreate(&prev_arc, &next_arc) {
            let parent = self.dom.parent(dom_id);
            let fresh = self.create_fresh_subtree(key)?;
            if let Some(parent) = parent {
                self.dom.replace_child(parent, dom_id, fresh)?;
            }
            return Ok(fresh);
        }

        self.patch_in_place(key, &prev_arc, &next_arc, dom_id)?;

        if next_arc.is_element() {
            self.reconcile_children(key, dom_id)?;
            self.reconcile_trailing_break(key, dom_id)?;
        }
        Ok(dom_id)
    }

    /// Tag-level incompatibility: the DOM node cannot be patched in place.
    fn must_recreate(&self, prev: &Node, next: &Node) -> bool {
        std::mem::discriminant(&prev.body) != std::mem::discriminant(&next.body)
            || dom_tag(prev) != dom_tag(next)
            || prev.type_tag() != next.type_tag()
    }

    fn patch_in_place(
        &mut self,
        key: &NodeKey,
        prev: &Node,
        next: &Node,
        dom_id: DomId,
    ) -> Result<(), EditorError> {
        match &next.body {
            NodeBody::Text(text) => {
                let class = self.theme.text_class(text.format);
                self.dom.set_class_name(dom_id, class)?;
                let rendered = if next.flags.is_inert() {
                    ""
                } else {
                    text.text.as_str()
                };
                let inner = self.bindings.text_dom_for(key).ok_or_else(|| {
                    EditorError::Reconcile(format!("text node {key} lost its DOM text"))
                })?;
                if self.dom.text_data(inner) != Some(rendered) {
                    self.dom.set_text_data(inner, rendered)?;
                }
            }
            NodeBody::Element(element) => {
                let prev_element = prev.as_element();
                if prev_element.map(|p| p.indent) != Some(element.indent) {
                    if element.indent > 0 {
                        self.dom
                            .set_attribute(dom_id, "data-indent", element.indent.to_string())?;
                    } else {
                        self.dom.remove_attribute(dom_id, "data-indent")?;
                    }
                }
                if prev_element.and_then(|p| p.direction) != element.direction {
                    match element.direction {
                        Some(direction) => {
                            self.dom
                                .set_attribute(dom_id, "dir", direction_attr(direction))?
                        }
                        None => self.dom.remove_attribute(dom_id, "dir")?,
                    }
                }
                if prev_element.map(|p| p.format) != Some(element.format) {
                    match element.format.alignment() {
                        Some(align) => {
                            self.dom.set_attribute(dom_id, "data-align", align)?
                        }
                        None => self.dom.remove_attribute(dom_id, "data-align")?,
                    }
                }
            }
            NodeBody::LineBreak | NodeBody::Decorator(_) => {}
        }
        Ok(())
    }

    /// Keyed children diff. Fast paths for unchanged lists and empty
    /// before/after; general case scans next children in order, destroying
    /// departed keys first, then creating/moving so relative DOM order
    /// matches the model.
    fn reconcile_children(&mut self, key: &NodeKey, dom_id: DomId) -> Result<(), EditorError> {
        let prev_children: Vec<NodeKey> = self
            .prev
            .node(key)
            .and_then(Node::as_element)
            .map(|element| element.children.clone())
            .unwrap_or_default();
        let next_children: Vec<NodeKey> = self.next.children_of(key).to_vec();

        // The synthetic trailing <br> must not take part in the diff.
        if let Some(br) = self.bindings.trailing_breaks.get(key).copied() {
            self.dom.remove_child(dom_id, br)?;
        }

        if prev_children == next_children {
            for child in &next_children {
                self.reconcile_node(child)?;
            }
            return Ok(());
        }
        if next_children.is_empty() {
            for child in &prev_children {
                self.destroy_subtree(child, Some(dom_id))?;
            }
            return Ok(());
        }
        if prev_children.is_empty() {
            for child in &next_children {
                let child_dom = self.create_fresh_subtree(child)?;
                self.dom.append_child(dom_id, child_dom)?;
            }
            return Ok(());
        }

        let next_set: HashSet<&NodeKey> = next_children.iter().collect();
        for child in &prev_children {
            if next_set.contains(child) {
                continue;
            }
            // A key still attached in the next state was reparented; its new
            // parent's diff moves the DOM, so only departed keys get torn down.
            if self.next.is_attached(child) {
                continue;
            }
            self.destroy_subtree(child, Some(dom_id))?;
        }
        for (index, child) in next_children.iter().enumerate() {
            let child_dom = self.reconcile_node(child)?;
            let occupant = self.dom.children(dom_id).get(index).copied();
            if occupant != Some(child_dom) {
                // Inserting before the current occupant both creates and
                // moves while preserving relative order.
                self.dom.insert_before(dom_id, child_dom, occupant)?;
            }
        }
        Ok(())
    }

    /// Create DOM for a key that has none yet (new node, or recreation).
    fn create_fresh_subtree(&mut self, key: &NodeKey) -> Result<DomId, EditorError> {
        let node = self
            .next
            .resolve(key)
            .map_err(|e| EditorError::Reconcile(e.to_string()))?
            .clone();
        let dom_id = match &node.body {
            NodeBody::Text(text) => {
                let span = self.dom.create_element("span");
                self.dom
                    .set_class_name(span, self.theme.text_class(text.format))?;
                let rendered = if node.flags.is_inert() {
                    ""
                } else {
                    text.text.as_str()
                };
                let inner = self.dom.create_text(rendered);
                self.dom.append_child(span, inner)?;
                self.bindings.bind_text(key, inner);
                span
            }
            NodeBody::LineBreak => self.dom.create_element("br"),
            NodeBody::Decorator(decorator) => {
                let div = self.dom.create_element("div");
                self.dom
                    .set_attribute(div, "data-vellum-decorator", decorator.tag.clone())?;
                if let Some(class) = self.theme.class_for_tag(&decorator.tag) {
                    self.dom.set_class_name(div, Some(class.to_string()))?;
                }
                div
            }
            NodeBody::Element(element) => {
                let el = self.dom.create_element(dom_tag(&node));
                if let Some(class) = self.theme.class_for_tag(&element.tag) {
                    self.dom.set_class_name(el, Some(class.to_string()))?;
                }
                if element.indent > 0 {
                    self.dom
                        .set_attribute(el, "data-indent", element.indent.to_string())?;
                }
                if let Some(direction) = element.direction {
                    self.dom.set_attribute(el, "dir", direction_attr(direction))?;
                }
                if let Some(align) = element.format.alignment() {
                    self.dom.set_attribute(el, "data-align", align)?;
                }
                for child in element.children.clone() {
                    let child_dom = self.create_fresh_subtree(&child)?;
                    self.dom.append_child(el, child_dom)?;
                }
                el
            }
        };
        self.bindings.bind(key, dom_id);
        if node.is_element() {
            self.reconcile_trailing_break(key, dom_id)?;
        }
        Ok(dom_id)
    }

    /// Remove a departed key's DOM and its bindings, recursing through the
    /// previous state's structure.
    fn destroy_subtree(
        &mut self,
        key: &NodeKey,
        dom_parent: Option<DomId>,
    ) -> Result<(), EditorError> {
        if let Some(dom_id) = self.bindings.dom_for(key) {
            if let Some(parent) = dom_parent.or_else(|| self.dom.parent(dom_id)) {
                if self.dom.parent(dom_id) == Some(parent) {
                    self.dom.remove_child(parent, dom_id)?;
                }
            }
        }
        self.unbind_recursive(key);
        Ok(())
    }

    fn unbind_recursive(&mut self, key: &NodeKey) {
        for child in self.prev.children_of(key).to_vec() {
            self.unbind_recursive(&child);
        }
        self.bindings.unbind(key);
    }

    /// Elements whose last child is a line break or decorator carry exactly
    /// one synthetic `<br>` so the caret stays visible after the break.
    fn reconcile_trailing_break(
        &mut self,
        key: &NodeKey,
        dom_id: DomId,
    ) -> Result<(), EditorError> {
        let needs = ends_in_break(self.next, key);
        let existing = self.bindings.trailing_breaks.get(key).copied();
        match (needs, existing) {
            (true, Some(br)) => {
                // Keep it as the last child.
                if self.dom.parent(br) != Some(dom_id)
                    || self.dom.last_child(dom_id) != Some(br)
                {
                    self.dom.append_child(dom_id, br)?;
                }
            }
            (true, None) => {
                let br = self.dom.create_element("br");
                self.dom.append_child(dom_id, br)?;
                self.bindings.trailing_breaks.insert(key.clone(), br);
            }
            (false, Some(br)) => {
                if self.dom.parent(br) == Some(dom_id) {
                    self.dom.remove_child(dom_id, br)?;
                }
                self.bindings.trailing_breaks.remove(key);
            }
            (false, None) => {}
        }
        Ok(())
    }

    /// Map the model selection to concrete DOM positions and push it to the
    /// native selection, but only when they actually differ.
    fn sync_selection(&mut self) -> Result<(), EditorError> {
        let Some(selection) = &self.next.selection else {
            return Ok(());
        };
        let Some(anchor) = self.dom_position(&selection.anchor) else {
            return Ok(());
        };
        let Some(focus) = self.dom_position(&selection.focus) else {
            return Ok(());
        };
        let current = self.dom.selection();
        let desired = vellum_dom::DomSelection { anchor, focus };
        if current == Some(desired) {
            return Ok(());
        }
        if !self.dom.focused() {
            self.dom.focus();
        }
        self.dom
            .set_base_and_extent(anchor.0, anchor.1, focus.0, focus.1);
        Ok(())
    }

    fn dom_position(&self, point: &Point) -> Option<(DomId, u32)> {
        match point.kind {
            PointKind::Text => {
                let inner = self.bindings.text_dom_for(&point.key)?;
                Some((inner, point.offset as u32))
            }
            PointKind::Element => {
                let resolved =
                    resolve_model_point(self.next, &point.key, point.offset, false)?;
                if resolved.kind == PointKind::Text {
                    let inner = self.bindings.text_dom_for(&resolved.key)?;
                    Some((inner, resolved.offset as u32))
                } else {
                    let dom_id = self.bindings.dom_for(&resolved.key)?;
                    Some((dom_id, resolved.offset as u32))
                }
            }
        }
    }
}

/// Run an incremental pass, falling back to a full rebuild if patching
/// fails. Returns an error only if even the rebuild failed.
#[allow(clippy::too_many_arguments)]
pub(crate) fn reconcile_with_recovery(
    prev: &EditorState,
    next: &EditorState,
    dirty_nodes: &HashSet<NodeKey>,
    dirty_subtrees: &HashSet<NodeKey>,
    full_rebuild: bool,
    dom: &mut DomTree,
    theme: &Theme,
    bindings: &mut DomBindings,
) -> Result<Option<EditorError>, EditorError> {
    let observing = dom.is_observing();
    dom.set_observing(false);
    let result = {
        let mut reconciler = Reconciler {
            prev,
            next,
            dirty_nodes,
            dirty_subtrees,
            full_rebuild,
            dom,
            theme,
            bindings,
        };
        reconciler.run()
    };
    let recovered = match result {
        Ok(()) => None,
        Err(err) => {
            warn!(error = %err, "reconcile failed, rebuilding from committed state");
            let mut reconciler = Reconciler {
                prev,
                next,
                dirty_nodes,
                dirty_subtrees,
                full_rebuild: true,
                dom,
                theme,
                bindings,
            };
            reconciler.rebuild()?;
            Some(err)
        }
    };
    dom.set_observing(observing);
    Ok(recovered)
}
