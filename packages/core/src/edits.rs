//! # Selection edit operations
//!
//! The high-level mutations a host wires to user input: text insertion,
//! character/word deletion, inline formatting, block splitting, and node
//! list insertion. All of them run against the draft [`Transaction`] and
//! express themselves through the structural primitives in the transaction
//! engine, so every path inherits the selection re-pointing rules there.
//!
//! Boundary policies:
//! - Immutable and segmented text nodes are atomic: deletion removes the
//!   whole node, formatting applies to the whole node, and text insertion
//!   spawns a fresh sibling instead of editing the atom.
//! - A range endpoint that falls mid-node splits the text node first.
//! - Deleting across block boundaries merges the remainder of the later
//!   block into the earlier one.
//! - `insert_nodes` rejects an ambiguous list (an element that already has
//!   children mixed with disjoint top-level siblings) before any write, so
//!   a failed call leaves both model and DOM untouched.

use crate::error::{EditorError, InvariantViolation};
use crate::node::{Node, NodeKey, NodeStore, TextFormat};
use crate::selection::{resolve_model_point, Point, PointKind, Selection};
use crate::transaction::Transaction;

/// Character index where a word-wise backward deletion from `offset` starts:
/// back over trailing whitespace, then back over the word itself.
fn word_start_before(text: &str, offset: usize) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let mut i = offset.min(chars.len());
    while i > 0 && chars[i - 1].is_whitespace() {
        i -= 1;
    }
    while i > 0 && !chars[i - 1].is_whitespace() {
        i -= 1;
    }
    i
}

/// Character index where a word-wise forward deletion from `offset` ends.
fn word_end_after(text: &str, offset: usize) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut i = offset.min(len);
    while i < len && chars[i].is_whitespace() {
        i += 1;
    }
    while i < len && !chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn is_atomic(node: &Node) -> bool {
    node.flags.is_immutable() || node.flags.is_segmented()
}

impl Transaction {
    // -- text insertion ----------------------------------------------------

    /// Insert `text` at the selection, replacing the selected range first.
    pub fn insert_text(&mut self, text: &str) -> Result<(), EditorError> {
        if text.is_empty() {
            return Ok(());
        }
        self.ops.push("insert_text");
        self.delete_selection()?;
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        let point = selection.anchor.clone();
        let inserted = text.chars().count();
        match point.kind {
            PointKind::Text => self.insert_text_at(&point.key, point.offset, text, inserted),
            PointKind::Element => {
                // Land in the text node touching the caret index; crossing
                // a line break or decorator to reach one would reorder the
                // content, so those get a fresh node instead.
                let children = self.children_of(&point.key).to_vec();
                let editable = |tx: &Self, key: &NodeKey| {
                    tx.node(key)
                        .map(|node| {
                            node.is_text() && !is_atomic(node) && !node.flags.is_inert()
                        })
                        .unwrap_or(false)
                };
                if let Some(prev) = point.offset.checked_sub(1).and_then(|i| children.get(i)) {
                    if editable(self, prev) {
                        let prev = prev.clone();
                        let len = self.resolve(&prev)?.text_len();
                        return self.insert_text_at(&prev, len, text, inserted);
                    }
                }
                if let Some(next) = children.get(point.offset) {
                    if editable(self, next) {
                        let next = next.clone();
                        return self.insert_text_at(&next, 0, text, inserted);
                    }
                }
                let fresh = self.create_text(text)?;
                match children.get(point.offset).cloned() {
                    Some(reference) => self.insert_before(&reference, &fresh)?,
                    None => self.append(&point.key, &fresh)?,
                }
                self.collapse_selection(Point::text(fresh, inserted));
                Ok(())
            }
        }
    }

    fn insert_text_at(
        &mut self,
        key: &NodeKey,
        offset: usize,
        text: &str,
        inserted: usize,
    ) -> Result<(), EditorError> {
        let node = self.resolve(key)?;
        if is_atomic(node) || node.flags.is_inert() {
            let fresh = self.create_text(text)?;
            if offset == 0 {
                self.insert_before(key, &fresh)?;
            } else {
                self.insert_after(key, &fresh)?;
            }
            self.collapse_selection(Point::text(fresh, inserted));
        } else {
            self.splice_text(key, offset, 0, text)?;
            self.collapse_selection(Point::text(key.clone(), offset + inserted));
        }
        Ok(())
    }

    // -- range deletion ----------------------------------------------------

    /// Delete the selected range and collapse the selection to its start.
    /// Collapsed selections are a no-op.
    pub fn delete_selection(&mut self) -> Result<(), EditorError> {
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        if selection.is_collapsed() {
            return Ok(());
        }
        self.ops.push("delete_selection");
        let (first, last) = {
            let (first, last) = selection.ordered_points(self);
            (first.clone(), last.clone())
        };
        // Element endpoints resolve down to concrete text positions so the
        // interior walk below only ever crosses fully-selected nodes.
        let first = resolve_model_point(self, &first.key, first.offset, false).unwrap_or(first);
        let last = resolve_model_point(self, &last.key, last.offset, false).unwrap_or(last);

        if first.key == last.key && first.kind == PointKind::Text {
            if is_atomic(self.resolve(&first.key)?) {
                return self.delete_whole_node(&first.key);
            }
            self.splice_text(&first.key, first.offset, last.offset - first.offset, "")?;
            self.collapse_selection(Point::text(first.key.clone(), first.offset));
            return Ok(());
        }

        let first_block = self.enclosing_block(&first.key);
        let last_block = self.enclosing_block(&last.key);
        let spanned = self.nodes_between(&first.key, &last.key);
        let mut caret = Point::text(first.key.clone(), first.offset);

        // Trim the first endpoint down to the part before the range.
        if first.kind == PointKind::Text {
            let node = self.resolve(&first.key)?;
            let len = node.text_len();
            if is_atomic(node) {
                let parent = node.parent.clone();
                let index = self.index_in_parent(&first.key).unwrap_or(0);
                self.remove(&first.key)?;
                if let Some(parent) = parent {
                    caret = Point::element(parent, index);
                }
            } else if first.offset < len {
                self.splice_text(&first.key, first.offset, len - first.offset, "")?;
            }
        } else {
            caret = first.clone();
        }

        // Trim the last endpoint down to the part after the range.
        if last.kind == PointKind::Text {
            let node = self.resolve(&last.key)?;
            if is_atomic(node) {
                self.remove(&last.key)?;
            } else if last.offset > 0 {
                self.splice_text(&last.key, 0, last.offset, "")?;
            }
        }

        // Everything strictly between the endpoints goes, except ancestors
        // of an endpoint (they keep their surviving children).
        for key in &spanned {
            if key == &first.key || key == &last.key || key.is_root() {
                continue;
            }
            if self.is_ancestor_of(key, &first.key) || self.is_ancestor_of(key, &last.key) {
                continue;
            }
            if !self.is_attached(key) {
                continue;
            }
            self.remove(key)?;
        }

        // A range spanning two blocks merges the tail block's remainder
        // into the head block.
        if let (Some(head), Some(tail)) = (first_block, last_block) {
            if head != tail
                && self.is_attached(&tail)
                && self.node(&head).map(Node::is_element).unwrap_or(false)
            {
                let movers = self.children_of(&tail).to_vec();
                for mover in movers {
                    self.append(&head, &mover)?;
                }
                self.remove(&tail)?;
            }
        }

        self.collapse_selection(caret);
        Ok(())
    }

    // -- character / word deletion -----------------------------------------

    pub fn delete_backward(&mut self) -> Result<(), EditorError> {
        self.ops.push("delete_backward");
        self.delete_preceding(false)
    }

    pub fn delete_word_backward(&mut self) -> Result<(), EditorError> {
        self.ops.push("delete_word_backward");
        self.delete_preceding(true)
    }

    pub fn delete_forward(&mut self) -> Result<(), EditorError> {
        self.ops.push("delete_forward");
        self.delete_following(false)
    }

    pub fn delete_word_forward(&mut self) -> Result<(), EditorError> {
        self.ops.push("delete_word_forward");
        self.delete_following(true)
    }

    fn delete_preceding(&mut self, word: bool) -> Result<(), EditorError> {
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        if !selection.is_collapsed() {
            return self.delete_selection();
        }
        let point = selection.anchor.clone();
        match point.kind {
            PointKind::Text => {
                let node = self.resolve(&point.key)?;
                if point.offset > 0 {
                    if is_atomic(node) {
                        return self.delete_whole_node(&point.key);
                    }
                    let text = node.as_text().map(|t| t.text.clone()).unwrap_or_default();
                    let start = if word {
                        word_start_before(&text, point.offset)
                    } else {
                        point.offset - 1
                    };
                    self.splice_text(&point.key, start, point.offset - start, "")?;
                    self.collapse_selection(Point::text(point.key.clone(), start));
                    return Ok(());
                }
                match self.prev_sibling_of(&point.key).cloned() {
                    Some(prev) => self.delete_back_into(&prev, word),
                    None => self.merge_block_with_previous(&point.key),
                }
            }
            PointKind::Element => {
                if point.offset > 0 {
                    let children = self.children_of(&point.key).to_vec();
                    match children.get(point.offset - 1).cloned() {
                        Some(prev) => self.delete_back_into(&prev, word),
                        None => Ok(()),
                    }
                } else {
                    self.merge_block_with_previous(&point.key)
                }
            }
        }
    }

    fn delete_following(&mut self, word: bool) -> Result<(), EditorError> {
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        if !selection.is_collapsed() {
            return self.delete_selection();
        }
        let point = selection.anchor.clone();
        match point.kind {
            PointKind::Text => {
                let node = self.resolve(&point.key)?;
                let len = node.text_len();
                if point.offset < len {
                    if is_atomic(node) {
                        return self.delete_whole_node(&point.key);
                    }
                    let text = node.as_text().map(|t| t.text.clone()).unwrap_or_default();
                    let end = if word {
                        word_end_after(&text, point.offset)
                    } else {
                        point.offset + 1
                    };
                    self.splice_text(&point.key, point.offset, end - point.offset, "")?;
                    self.collapse_selection(Point::text(point.key.clone(), point.offset));
                    return Ok(());
                }
                match self.next_sibling_of(&point.key).cloned() {
                    Some(next) => self.delete_forward_into(&next, word),
                    None => self.merge_block_with_next(&point.key),
                }
            }
            PointKind::Element => {
                let children = self.children_of(&point.key).to_vec();
                match children.get(point.offset).cloned() {
                    Some(next) => self.delete_forward_into(&next, word),
                    None => self.merge_block_with_next(&point.key),
                }
            }
        }
    }

    /// Backspace into a sibling: non-atomic text loses its last character
    /// (or word); line breaks, decorators and atomic text delete whole.
    fn delete_back_into(&mut self, key: &NodeKey, word: bool) -> Result<(), EditorError> {
        let Some(node) = self.node(key) else {
            return Ok(());
        };
        if node.is_text() && !is_atomic(node) && !node.flags.is_inert() {
            let len = node.text_len();
            if len == 0 {
                return self.delete_whole_node(key);
            }
            let text = node.as_text().map(|t| t.text.clone()).unwrap_or_default();
            let start = if word { word_start_before(&text, len) } else { len - 1 };
            let key = key.clone();
            self.splice_text(&key, start, len - start, "")?;
            self.collapse_selection(Point::text(key, start));
            Ok(())
        } else {
            self.delete_whole_node(key)
        }
    }

    fn delete_forward_into(&mut self, key: &NodeKey, word: bool) -> Result<(), EditorError> {
        let Some(node) = self.node(key) else {
            return Ok(());
        };
        if node.is_text() && !is_atomic(node) && !node.flags.is_inert() {
            let len = node.text_len();
            if len == 0 {
                return self.delete_whole_node(key);
            }
            let text = node.as_text().map(|t| t.text.clone()).unwrap_or_default();
            let end = if word { word_end_after(&text, 0) } else { 1 };
            let key = key.clone();
            self.splice_text(&key, 0, end, "")?;
            self.collapse_selection(Point::text(key, 0));
            Ok(())
        } else {
            self.delete_whole_node(key)
        }
    }

    /// Remove a node entirely, leaving the caret at the end of the previous
    /// text sibling or on the parent at the freed index.
    fn delete_whole_node(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        let parent = self.node(key).and_then(|node| node.parent.clone());
        let index = self.index_in_parent(key);
        let prev = self.prev_sibling_of(key).cloned();
        let key = key.clone();
        self.remove(&key)?;
        let prev_text_end = prev.and_then(|p| {
            let node = self.node(&p)?;
            if node.is_text() && !node.flags.is_inert() {
                Some(Point::text(p.clone(), node.text_len()))
            } else {
                None
            }
        });
        let caret = match (prev_text_end, parent, index) {
            (Some(point), _, _) => point,
            (None, Some(parent), Some(index)) => Point::element(parent, index),
            _ => return Ok(()),
        };
        self.collapse_selection(caret);
        Ok(())
    }

    /// Nearest ancestor (or self) that is a direct child of root.
    fn enclosing_block(&self, key: &NodeKey) -> Option<NodeKey> {
        let mut current = key.clone();
        loop {
            let parent = self.node(&current)?.parent.clone()?;
            if parent.is_root() {
                return Some(current);
            }
            current = parent;
        }
    }

    fn is_ancestor_of(&self, ancestor: &NodeKey, key: &NodeKey) -> bool {
        let mut current = self.node(key).and_then(|node| node.parent.clone());
        while let Some(k) = current {
            if &k == ancestor {
                return true;
            }
            current = self.node(&k).and_then(|node| node.parent.clone());
        }
        false
    }

    /// Backspace at the start of a block: pull this block's children into
    /// the previous sibling block and drop the emptied block. Text-point
    /// carets ride along with their (moved) nodes; an element-point caret
    /// on the dropped block re-collapses onto the junction.
    fn merge_block_with_previous(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        let Some(block) = self.enclosing_block(key) else {
            return Ok(());
        };
        let Some(prev) = self.prev_sibling_of(&block).cloned() else {
            return Ok(());
        };
        if !self.node(&prev).map(Node::is_element).unwrap_or(false) {
            return self.delete_whole_node(&prev);
        }
        let junction = self.children_of(&prev).len();
        let caret_on_block = self
            .selection
            .as_ref()
            .map(|sel| sel.anchor.kind == PointKind::Element && sel.anchor.key == block)
            .unwrap_or(false);
        let movers = self.children_of(&block).to_vec();
        for mover in movers {
            self.append(&prev, &mover)?;
        }
        self.remove(&block)?;
        if caret_on_block {
            self.collapse_selection(Point::element(prev, junction));
        }
        Ok(())
    }

    /// Forward-delete at the end of a block: pull the next block's children
    /// in. The caret does not move.
    fn merge_block_with_next(&mut self, key: &NodeKey) -> Result<(), EditorError> {
        let Some(block) = self.enclosing_block(key) else {
            return Ok(());
        };
        let Some(next) = self.next_sibling_of(&block).cloned() else {
            return Ok(());
        };
        if !self.node(&next).map(Node::is_element).unwrap_or(false) {
            return self.remove(&next);
        }
        let movers = self.children_of(&next).to_vec();
        for mover in movers {
            self.append(&block, &mover)?;
        }
        self.remove(&next)
    }

    // -- inline formatting -------------------------------------------------

    /// Toggle an inline format across the selected range. A collapsed
    /// selection is a no-op. Partial coverage of a normal text node splits
    /// it so only the covered part changes; partial coverage of an atomic
    /// (immutable/segmented) node promotes to the whole node. The direction
    /// of the toggle comes from the first covered text node.
    pub fn format_text(&mut self, format: TextFormat) -> Result<(), EditorError> {
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        if selection.is_collapsed() {
            return Ok(());
        }
        self.ops.push("format_text");
        let (first, last) = {
            let (first, last) = selection.ordered_points(self);
            (first.clone(), last.clone())
        };

        if first.key == last.key && first.kind == PointKind::Text {
            let (len, atomic, adding) = {
                let node = self.resolve(&first.key)?;
                let adding = node
                    .as_text()
                    .map(|t| !t.format.contains(format))
                    .unwrap_or(false);
                (node.text_len(), is_atomic(node), adding)
            };
            if atomic || (first.offset == 0 && last.offset >= len) {
                self.apply_format(&first.key, format, adding)?;
                self.set_selection(Some(Selection::new(
                    Point::text(first.key.clone(), 0),
                    Point::text(first.key, len),
                )));
                return Ok(());
            }
            let parts = self.split_text(&first.key, &[first.offset, last.offset])?;
            let target = if first.offset > 0 {
                parts[1].clone()
            } else {
                parts[0].clone()
            };
            self.apply_format(&target, format, adding)?;
            let target_len = self.resolve(&target)?.text_len();
            self.set_selection(Some(Selection::new(
                Point::text(target.clone(), 0),
                Point::text(target, target_len),
            )));
            return Ok(());
        }

        let adding = self
            .node(&first.key)
            .and_then(Node::as_text)
            .map(|t| !t.format.contains(format))
            .unwrap_or(true);
        let spanned = self.nodes_between(&first.key, &last.key);
        let mut formatted: Vec<NodeKey> = Vec::new();
        for key in spanned {
            let Some(node) = self.node(&key) else {
                continue;
            };
            if !node.is_text() || node.flags.is_inert() {
                continue;
            }
            let atomic = is_atomic(node);
            let len = node.text_len();
            let target = if key == first.key
                && first.kind == PointKind::Text
                && first.offset > 0
                && !atomic
            {
                if first.offset >= len {
                    continue;
                }
                let parts = self.split_text(&key, &[first.offset])?;
                parts[1].clone()
            } else if key == last.key
                && last.kind == PointKind::Text
                && last.offset < len
                && !atomic
            {
                if last.offset == 0 {
                    continue;
                }
                // The original keeps the head part, which is the covered one.
                self.split_text(&key, &[last.offset])?;
                key.clone()
            } else {
                key.clone()
            };
            self.apply_format(&target, format, adding)?;
            formatted.push(target);
        }

        if let (Some(head), Some(tail)) = (formatted.first().cloned(), formatted.last().cloned()) {
            let end = self.resolve(&tail)?.text_len();
            self.set_selection(Some(Selection::new(
                Point::text(head, 0),
                Point::text(tail, end),
            )));
        }
        Ok(())
    }

    fn apply_format(
        &mut self,
        key: &NodeKey,
        format: TextFormat,
        adding: bool,
    ) -> Result<(), EditorError> {
        let node = self.writable(key)?;
        if let Some(text) = node.as_text_mut() {
            text.format = if adding {
                text.format.with(format)
            } else {
                text.format.without(format)
            };
        }
        Ok(())
    }

    // -- block splitting ---------------------------------------------------

    /// Split the caret's parent element in two, moving everything after the
    /// caret into a fresh sibling element of the same tag. The caret lands
    /// at the start of the new element.
    pub fn insert_paragraph(&mut self) -> Result<(), EditorError> {
        self.ops.push("insert_paragraph");
        self.delete_selection()?;
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        let point = selection.anchor.clone();
        let (parent, split_index) = match point.kind {
            PointKind::Text => {
                let (parent, len) = {
                    let node = self.resolve(&point.key)?;
                    let parent = node
                        .parent
                        .clone()
                        .ok_or_else(|| InvariantViolation::MissingParent(point.key.clone()))?;
                    (parent, node.text_len())
                };
                let index = self
                    .index_in_parent(&point.key)
                    .ok_or_else(|| InvariantViolation::MissingParent(point.key.clone()))?;
                if point.offset == 0 {
                    (parent, index)
                } else if point.offset >= len {
                    (parent, index + 1)
                } else {
                    self.split_text(&point.key, &[point.offset])?;
                    (parent, index + 1)
                }
            }
            PointKind::Element => (point.key.clone(), point.offset),
        };

        if parent.is_root() {
            // Caret directly on root: open a fresh paragraph at the index.
            let block = self.create_paragraph()?;
            let children = self.children_of(&NodeKey::root()).to_vec();
            match children.get(split_index).cloned() {
                Some(reference) => self.insert_before(&reference, &block)?,
                None => self.append(&NodeKey::root(), &block)?,
            }
            self.collapse_selection(Point::element(block, 0));
            return Ok(());
        }

        let tag = self
            .resolve(&parent)?
            .as_element()
            .map(|element| element.tag.clone())
            .ok_or_else(|| InvariantViolation::NotAnElement(parent.clone()))?;
        let new_block = self.create_element(&tag)?;
        self.insert_after(&parent, &new_block)?;
        let movers: Vec<NodeKey> = self
            .children_of(&parent)
            .get(split_index..)
            .map(|slice| slice.to_vec())
            .unwrap_or_default();
        for mover in movers {
            self.append(&new_block, &mover)?;
        }
        let caret = match self.first_child_of(&new_block).cloned() {
            Some(child)
                if self
                    .node(&child)
                    .map(|node| node.is_text() && !node.flags.is_inert())
                    .unwrap_or(false) =>
            {
                Point::text(child, 0)
            }
            _ => Point::element(new_block, 0),
        };
        self.collapse_selection(caret);
        Ok(())
    }

    /// Insert a line-break node at the caret, splitting a mid-node text
    /// position first. The caret lands immediately after the break.
    pub fn insert_line_break(&mut self) -> Result<(), EditorError> {
        self.ops.push("insert_line_break");
        self.delete_selection()?;
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        let point = selection.anchor.clone();
        let brk = self.create_line_break()?;
        match point.kind {
            PointKind::Text => {
                let len = self.resolve(&point.key)?.text_len();
                if point.offset == 0 {
                    self.insert_before(&point.key, &brk)?;
                    self.collapse_selection(Point::text(point.key.clone(), 0));
                } else if point.offset >= len {
                    self.insert_after(&point.key, &brk)?;
                    if let (Some(parent), Some(index)) = (
                        self.node(&brk).and_then(|node| node.parent.clone()),
                        self.index_in_parent(&brk),
                    ) {
                        self.collapse_selection(Point::element(parent, index + 1));
                    }
                } else {
                    let parts = self.split_text(&point.key, &[point.offset])?;
                    self.insert_after(&parts[0], &brk)?;
                    self.collapse_selection(Point::text(parts[1].clone(), 0));
                }
            }
            PointKind::Element => {
                let children = self.children_of(&point.key).to_vec();
                match children.get(point.offset).cloned() {
                    Some(reference) => self.insert_before(&reference, &brk)?,
                    None => self.append(&point.key, &brk)?,
                }
                self.collapse_selection(Point::element(point.key.clone(), point.offset + 1));
            }
        }
        Ok(())
    }

    // -- node list insertion -----------------------------------------------

    /// Insert already-created nodes at the selection. The list is validated
    /// before any mutation: an element that already carries children cannot
    /// appear alongside disjoint top-level siblings, because the intended
    /// nesting of the siblings relative to that child is ambiguous.
    ///
    /// A collapsed selection inside an empty element appends directly; a
    /// mid-text caret splits the text node first.
    pub fn insert_nodes(&mut self, nodes: &[NodeKey]) -> Result<(), EditorError> {
        if nodes.is_empty() {
            return Ok(());
        }
        if nodes.len() > 1 {
            for key in nodes {
                let has_children = self
                    .node(key)
                    .and_then(Node::as_element)
                    .map(|element| !element.children.is_empty())
                    .unwrap_or(false);
                if has_children {
                    return Err(InvariantViolation::AmbiguousInsertTarget.into());
                }
            }
        }
        self.ops.push("insert_nodes");
        self.delete_selection()?;
        let Some(selection) = self.selection.clone() else {
            return Ok(());
        };
        let point = selection.anchor.clone();
        match point.kind {
            PointKind::Element => {
                let mut index = point.offset;
                for key in nodes {
                    let children = self.children_of(&point.key).to_vec();
                    match children.get(index).cloned() {
                        Some(reference) => self.insert_before(&reference, key)?,
                        None => self.append(&point.key, key)?,
                    }
                    index += 1;
                }
                self.collapse_selection(Point::element(point.key.clone(), index));
            }
            PointKind::Text => {
                let len = self.resolve(&point.key)?.text_len();
                let mut previous = if point.offset == 0 {
                    None
                } else if point.offset >= len {
                    Some(point.key.clone())
                } else {
                    let parts = self.split_text(&point.key, &[point.offset])?;
                    Some(parts[0].clone())
                };
                for key in nodes {
                    match &previous {
                        Some(prev) => self.insert_after(prev, key)?,
                        None => self.insert_before(&point.key, key)?,
                    }
                    previous = Some(key.clone());
                }
                if let Some(last) = nodes.last() {
                    let caret = self.caret_after(last);
                    self.collapse_selection(caret);
                }
            }
        }
        Ok(())
    }

    /// Natural caret position after an inserted node.
    fn caret_after(&self, key: &NodeKey) -> Point {
        if let Some(node) = self.node(key) {
            if node.is_text() && !node.flags.is_inert() {
                return Point::text(key.clone(), node.text_len());
            }
            if let Some(element) = node.as_element() {
                if let Some(point) =
                    resolve_model_point(self, key, element.children.len(), false)
                {
                    return point;
                }
            }
        }
        match (
            self.node(key).and_then(|node| node.parent.clone()),
            self.index_in_parent(key),
        ) {
            (Some(parent), Some(index)) => Point::element(parent, index + 1),
            _ => Point::element(NodeKey::root(), 0),
        }
    }
}
