//! # Transaction engine
//!
//! A [`Transaction`] is the mutable draft of one state version: a shallow
//! clone of the committed node map whose nodes are copy-on-write cloned the
//! first time they are written (`writable`), plus the dirty-tracking sets the
//! reconciler scopes its work by.
//!
//! The context is explicit: every write operation takes `&mut Transaction`,
//! there is no ambient "active editor" global. The editor constructs the
//! transaction, runs the caller's draft function against it, and either
//! commits the result or discards it.
//!
//! Dirty marking is transitive: writing a node marks every ancestor up to
//! root as a dirty subtree, stopping early at an already-marked ancestor so
//! repeated writes stay O(depth) amortized.

use crate::error::{EditorError, InvariantViolation};
use crate::node::{
    char_slice, char_to_byte, Node, NodeFlags, NodeKey, NodeStore, TextFormat,
};
use crate::selection::{Point, PointKind, Selection};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug)]
pub struct Transaction {
    pub(crate) node_map: HashMap<NodeKey, Arc<Node>>,
    pub(crate) selection: Option<Selection>,
    /// Nodes whose writable form was requested this transaction.
    pub(crate) dirty_nodes: HashSet<NodeKey>,
    /// Ancestors of dirty nodes; tells the reconciler which element
    /// subtrees must be re-diffed even if the element itself is unchanged.
    pub(crate) dirty_subtrees: HashSet<NodeKey>,
    /// Keys present in the committed state this draft was cloned from.
    pub(crate) prev_keys: HashSet<NodeKey>,
    pub(crate) next_key: u64,
    /// Phase trace included in error notifications.
    pub(crate) ops: Vec<&'static str>,
    /// This draft was taken over from an earlier, still-pending update.
    pub(crate) coalesced: bool,
    /// Write access; cleared outside an active update.
    pub(crate) active: bool,
}

impl NodeStore for Transaction {
    fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.node_map.get(key).map(Arc::as_ref)
    }
}

impl Transaction {
    pub(crate) fn begin(
        node_map: HashMap<NodeKey, Arc<Node>>,
        selection: Option<Selection>,
        next_key: u64,
    ) -> Self {
        let prev_keys = node_map.keys().cloned().collect();
        Transaction {
            node_map,
            selection,
            dirty_nodes: HashSet::new(),
            dirty_subtrees: HashSet::new(),
            prev_keys,
            next_key,
            ops: Vec::new(),
            coalesced: false,
            active: true,
        }
    }

    pub(crate) fn fresh_key(&mut self) -> NodeKey {
        let key = NodeKey::from(self.next_key.to_string());
        self.next_key += 1;
        key
    }

    // -- copy-on-write -----------------------------------------------------

    /// Mutable access to the latest version of a node within this draft.
    ///
    /// Idempotent: the first call severs sharing with the committed state,
    /// subsequent calls in the same transaction return the same allocation.
    /// Marks the node and all its ancestors dirty.
    pub fn writable(&mut self, key: &NodeKey) -> Result<&mut Node, EditorError> {
        if !self.active {
            return Err(InvariantViolation::ReadOnly.into());
        }
        self.mark_dirty(key)?;
        match self.node_map.get_mut(key) {
            Some(node) => Ok(Arc::make_mut(node)),
            None => Err(InvariantViolation::MissingNode(key.clone()).into()),
        }
    }

    fn mark_dirty(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        if !self.node_map.contains_key(key) {
            return Err(InvariantViolation::MissingNode(key.clone()).into());
        }
        self.dirty_nodes.insert(key.clone());
        let mut current = self.node(key).and_then(|node| node.parent.clone());
        while let Some(ancestor) = current {
            // Already-marked ancestor means the rest of the chain is too.
            if !self.dirty_subtrees.insert(ancestor.clone()) {
                break;
            }
            current = self.node(&ancestor).and_then(|node| node.parent.clone());
        }
        Ok(())
    }

    pub fn is_dirty(&self, key: &NodeKey) -> bool {
        self.dirty_nodes.contains(key)
    }

    pub fn has_dirty_nodes(&self) -> bool {
        !self.dirty_nodes.is_empty()
    }

    // -- node creation -----------------------------------------------------

    /// Insert a freshly-built node (unattached) into the draft map.
    pub(crate) fn adopt(&mut self, node: Node) -> Result<NodeKey, EditorError> {
        if !self.active {
            return Err(InvariantViolation::ReadOnly.into());
        }
        let key = node.key.clone();
        self.dirty_nodes.insert(key.clone());
        self.node_map.insert(key.clone(), Arc::new(node));
        Ok(key)
    }

    pub fn create_text(&mut self, text: &str) -> Result<NodeKey, EditorError> {
        let key = self.fresh_key();
        self.adopt(Node::text(key, text))
    }

    pub fn create_text_with(
        &mut self,
        text: &str,
        format: TextFormat,
        flags: NodeFlags,
    ) -> Result<NodeKey, EditorError> {
        let key = self.fresh_key();
        self.adopt(Node::text(key, text).with_format(format).with_flags(flags))
    }

    pub fn create_element(&mut self, tag: &str) -> Result<NodeKey, EditorError> {
        let key = self.fresh_key();
        self.adopt(Node::element(key, tag))
    }

    pub fn create_paragraph(&mut self) -> Result<NodeKey, EditorError> {
        self.create_element("paragraph")
    }

    pub fn create_line_break(&mut self) -> Result<NodeKey, EditorError> {
        let key = self.fresh_key();
        self.adopt(Node::line_break(key))
    }

    pub fn create_decorator(&mut self, tag: &str) -> Result<NodeKey, EditorError> {
        let key = self.fresh_key();
        let node = Node::decorator(key, tag).with_flags(NodeFlags::DIRTY_DECORATOR);
        self.adopt(node)
    }

    // -- structural mutation ----------------------------------------------
    //
    // All paths detach from any previous parent first, then splice into the
    // new parent, so duplicate parentage never persists.

    pub fn append(&mut self, parent: &NodeKey, child: &NodeKey) -> Result<(), EditorError> {
        self.detach(child)?;
        let index = self.children_of(parent).len();
        self.attach_at(parent, child, index)
    }

    /// Insert `node` immediately before `reference`.
    pub fn insert_before(
        &mut self,
        reference: &NodeKey,
        node: &NodeKey,
    ) -> Result<(), EditorError> {
        self.detach(node)?;
        let parent = self.parent_key(reference)?;
        let index = self
            .index_in_parent(reference)
            .ok_or_else(|| InvariantViolation::MissingParent(reference.clone()))?;
        self.attach_at(&parent, node, index)
    }

    /// Insert `node` immediately after `reference`.
    pub fn insert_after(
        &mut self,
        reference: &NodeKey,
        node: &NodeKey,
    ) -> Result<(), EditorError> {
        self.detach(node)?;
        let parent = self.parent_key(reference)?;
        let index = self
            .index_in_parent(reference)
            .ok_or_else(|| InvariantViolation::MissingParent(reference.clone()))?;
        self.attach_at(&parent, node, index + 1)
    }

    /// Detach a node from the tree. The node stays in the draft map until
    /// garbage collection; any selection point on it or inside its subtree
    /// is re-anchored to the parent element at the equivalent child index.
    pub fn remove(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        self.repoint_selection_into_parent(key)?;
        self.detach(key)
    }

    /// Replace `old` with `new` in place.
    pub fn replace(&mut self, old: &NodeKey, new: &NodeKey) -> Result<(), EditorError> {
        self.insert_before(old, new)?;
        self.remove(old)
    }

    fn parent_key(&self, key: &NodeKey) -> Result<NodeKey, InvariantViolation> {
        self.resolve(key)?
            .parent
            .clone()
            .ok_or_else(|| InvariantViolation::MissingParent(key.clone()))
    }

    fn detach(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        let Some(parent) = self.resolve(key).map_err(EditorError::Invariant)?.parent.clone()
        else {
            return Ok(());
        };
        let index = self.index_in_parent(key);
        {
            let parent_node = self.writable(&parent)?;
            let element = parent_node
                .as_element_mut()
                .ok_or_else(|| InvariantViolation::NotAnElement(parent.clone()))?;
            element.children.retain(|child| child != key);
        }
        self.writable(key)?.parent = None;
        // Element points on the parent past the removed index shift left so
        // they keep denoting the same content.
        if let Some(index) = index {
            self.adjust_element_points(&parent, |offset| {
                if offset > index {
                    offset - 1
                } else {
                    offset
                }
            });
        }
        Ok(())
    }

    fn attach_at(
        &mut self,
        parent: &NodeKey,
        child: &NodeKey,
        index: usize,
    ) -> Result<(), EditorError> {
        let index = index.min(self.children_of(parent).len());
        {
            let parent_node = self.writable(parent)?;
            let element = parent_node
                .as_element_mut()
                .ok_or_else(|| InvariantViolation::NotAnElement(parent.clone()))?;
            element.children.insert(index, child.clone());
        }
        self.writable(child)?.parent = Some(parent.clone());
        // The writable call above walked ancestors before the parent pointer
        // existed; mark again now that the chain is wired.
        self.mark_dirty(child)?;
        self.adjust_element_points(parent, |offset| {
            if offset >= index {
                offset + 1
            } else {
                offset
            }
        });
        Ok(())
    }

    // -- selection bookkeeping --------------------------------------------

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
        if let Some(selection) = &mut self.selection {
            selection.mark_dirty();
        }
    }

    /// Collapse the selection to a single point.
    pub fn collapse_selection(&mut self, point: Point) {
        let mut selection = Selection::collapsed(point);
        selection.mark_dirty();
        self.selection = Some(selection);
    }

    fn adjust_element_points(&mut self, element: &NodeKey, adjust: impl Fn(usize) -> usize) {
        let Some(selection) = &mut self.selection else {
            return;
        };
        let mut changed = false;
        for point in [&mut selection.anchor, &mut selection.focus] {
            if point.kind == PointKind::Element && &point.key == element {
                let adjusted = adjust(point.offset);
                if adjusted != point.offset {
                    point.offset = adjusted;
                    changed = true;
                }
            }
        }
        if changed {
            selection.mark_dirty();
        }
    }

    /// Re-anchor selection points that land on `key` or inside its subtree
    /// to the parent element at `key`'s child index.
    fn repoint_selection_into_parent(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        let parent = match self.node(key).and_then(|node| node.parent.clone()) {
            Some(parent) => parent,
            None => return Ok(()),
        };
        let index = self.index_in_parent(key).unwrap_or(0);
        let in_subtree = |point: &Point, store: &Self| {
            let mut current = Some(point.key.clone());
            while let Some(k) = current {
                if &k == key {
                    return true;
                }
                current = store.node(&k).and_then(|node| node.parent.clone());
            }
            false
        };
        let mut updated = selection;
        let mut changed = false;
        for point in [&mut updated.anchor, &mut updated.focus] {
            if in_subtree(point, self) {
                *point = Point::element(parent.clone(), index);
                changed = true;
            }
        }
        if changed {
            updated.mark_dirty();
            self.selection = Some(updated);
        }
        Ok(())
    }

    pub(crate) fn adjust_text_points(
        &mut self,
        key: &NodeKey,
        adjust: impl Fn(usize) -> usize,
    ) {
        let Some(selection) = &mut self.selection else {
            return;
        };
        let mut changed = false;
        for point in [&mut selection.anchor, &mut selection.focus] {
            if point.kind == PointKind::Text && &point.key == key {
                let adjusted = adjust(point.offset);
                if adjusted != point.offset {
                    point.offset = adjusted;
                    changed = true;
                }
            }
        }
        if changed {
            selection.mark_dirty();
        }
    }

    // -- text node surgery -------------------------------------------------

    /// Partition a text node at the given character offsets into sibling
    /// text nodes carrying the same flags and format. The original node
    /// keeps the first part (and its key); selection points inside a
    /// relocated span move to the new node with an adjusted offset.
    ///
    /// A single resulting part equal to the original text is a no-op
    /// returning only the original key.
    pub fn split_text(
        &mut self,
        key: &NodeKey,
        offsets: &[usize],
    ) -> Result<Vec<NodeKey>, EditorError> {
        let (text, flags, format, style, url) = {
            let node = self.resolve(key).map_err(EditorError::Invariant)?;
            let body = node
                .as_text()
                .ok_or_else(|| InvariantViolation::NotAText(key.clone()))?;
            (
                body.text.clone(),
                node.flags,
                body.format,
                body.style.clone(),
                body.url.clone(),
            )
        };
        let len = text.chars().count();
        let mut boundaries: Vec<usize> = offsets
            .iter()
            .copied()
            .filter(|&offset| offset > 0 && offset < len)
            .collect();
        boundaries.sort_unstable();
        boundaries.dedup();
        if boundaries.is_empty() {
            return Ok(vec![key.clone()]);
        }

        let mut starts = vec![0];
        starts.extend(&boundaries);
        let mut ends = boundaries.clone();
        ends.push(len);

        // The original node keeps the first part and its key.
        let first_text = char_slice(&text, starts[0], ends[0]).to_string();
        {
            let node = self.writable(key)?;
            if let Some(body) = node.as_text_mut() {
                body.text = first_text;
            }
        }

        let mut part_keys = vec![key.clone()];
        for i in 1..starts.len() {
            let part = char_slice(&text, starts[i], ends[i]).to_string();
            let part_key = self.fresh_key();
            let mut node = Node::text(part_key.clone(), part).with_flags(flags);
            if let Some(body) = node.as_text_mut() {
                body.format = format;
                body.style = style.clone();
                body.url = url.clone();
            }
            self.adopt(node)?;
            self.insert_after(&part_keys[i - 1], &part_key)?;
            part_keys.push(part_key);
        }

        // Remap selection points that fell inside a relocated span.
        if let Some(selection) = self.selection.clone() {
            let mut updated = selection;
            let mut changed = false;
            for point in [&mut updated.anchor, &mut updated.focus] {
                if point.kind != PointKind::Text || &point.key != key {
                    continue;
                }
                let offset = point.offset;
                for (i, (&start, &end)) in starts.iter().zip(ends.iter()).enumerate() {
                    let is_last = i == starts.len() - 1;
                    if offset >= start && (offset < end || (is_last && offset <= end)) {
                        if i > 0 {
                            point.key = part_keys[i].clone();
                            point.offset = offset - start;
                            changed = true;
                        }
                        break;
                    }
                }
            }
            if changed {
                updated.mark_dirty();
                self.selection = Some(updated);
            }
        }

        Ok(part_keys)
    }

    /// Splice characters into a text node, shifting selection points after
    /// the insertion point.
    pub(crate) fn splice_text(
        &mut self,
        key: &NodeKey,
        offset: usize,
        delete_chars: usize,
        insert: &str,
    ) -> Result<(), EditorError> {
        let inserted_chars = insert.chars().count();
        {
            let len = {
                let node = self.resolve(key).map_err(EditorError::Invariant)?;
                node.as_text()
                    .ok_or_else(|| InvariantViolation::NotAText(key.clone()))?;
                node.text_len()
            };
            if offset + delete_chars > len {
                return Err(InvariantViolation::OffsetOutOfBounds {
                    key: key.clone(),
                    offset: offset + delete_chars,
                    len,
                }
                .into());
            }
            let node = self.writable(key)?;
            let body = node
                .as_text_mut()
                .ok_or_else(|| InvariantViolation::NotAText(key.clone()))?;
            let start = char_to_byte(&body.text, offset);
            let end = char_to_byte(&body.text, offset + delete_chars);
            body.text.replace_range(start..end, insert);
        }
        self.adjust_text_points(key, |point_offset| {
            if point_offset <= offset {
                point_offset
            } else if point_offset <= offset + delete_chars {
                offset + inserted_chars
            } else {
                point_offset - delete_chars + inserted_chars
            }
        });
        Ok(())
    }

    // -- normalization -----------------------------------------------------

    /// Merge adjacent mergeable text children and drop empty mergeable text
    /// nodes, folding affected selection points into the surviving nodes.
    pub(crate) fn normalize_element(&mut self, element: &NodeKey) -> Result<(), EditorError> {
        if self.node(element).and_then(Node::as_element).is_none() {
            return Ok(());
        }

        // Drop empty mergeable text nodes first; selection points on them
        // re-anchor to the parent at the equivalent child index.
        let children: Vec<NodeKey> = self.children_of(element).to_vec();
        for child in &children {
            let is_empty_mergeable = match self.node(child) {
                Some(node) => {
                    node.as_text().is_some_and(|text| text.text.is_empty())
                        && !node.flags.is_immutable()
                        && !node.flags.is_segmented()
                }
                None => false,
            };
            if is_empty_mergeable {
                self.remove(child)?;
            }
        }

        // Merge adjacent mergeable runs left to right.
        let mut index = 0;
        loop {
            let children: Vec<NodeKey> = self.children_of(element).to_vec();
            if index + 1 >= children.len() {
                break;
            }
            let left = children[index].clone();
            let right = children[index + 1].clone();
            let mergeable = match (self.node(&left), self.node(&right)) {
                (Some(a), Some(b)) => a.mergeable_with(b),
                _ => false,
            };
            if !mergeable {
                index += 1;
                continue;
            }
            let left_len = self.node(&left).map(Node::text_len).unwrap_or(0);
            let right_text = self
                .node(&right)
                .and_then(Node::as_text)
                .map(|text| text.text.clone())
                .unwrap_or_default();
            {
                let node = self.writable(&left)?;
                if let Some(body) = node.as_text_mut() {
                    body.text.push_str(&right_text);
                }
            }
            // Fold points on the absorbed node into the survivor.
            if let Some(selection) = &mut self.selection {
                let mut changed = false;
                for point in [&mut selection.anchor, &mut selection.focus] {
                    if point.kind == PointKind::Text && point.key == right {
                        point.key = left.clone();
                        point.offset += left_len;
                        changed = true;
                    }
                }
                if changed {
                    selection.mark_dirty();
                }
            }
            self.detach(&right)?;
        }
        Ok(())
    }
}
