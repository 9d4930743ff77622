//! # Editor orchestrator
//!
//! Owns the committed [`EditorState`], the single pending draft, the DOM
//! attachment, and the listener registries. Runs the explicit phase machine
//! `Idle → TransactionOpen → Committing → Idle`: `update()` opens (or takes
//! over) the draft and runs the caller's edit function synchronously;
//! `flush()` is the commit boundary that validates the draft, swaps in the
//! next state, reconciles the DOM, and fires listeners. Multiple `update()`
//! calls before a `flush()` fold into the same draft, each seeing the
//! cumulative effect of the previous ones.
//!
//! Failure policy:
//! - Invariant violations propagate to the `update()`/`flush()` caller.
//! - Any other error from an edit function discards the draft, keeps the
//!   committed state, rebuilds the DOM from it, and notifies error
//!   listeners with the transaction's operation log.
//! - Reconcile errors recover via full rebuild inside the reconciler and
//!   are reported through the error channel, never to the end user.

use crate::error::{EditorError, InvariantViolation};
use crate::gc::collect_garbage;
use crate::node::{text_direction, Node, NodeKey, NodeStore};
use crate::reconciler::{reconcile_with_recovery, DomBindings};
use crate::registry::{NodeFactory, NodeRegistry};
use crate::selection::resolve_selection;
use crate::state::EditorState;
use crate::theme::Theme;
use crate::transaction::Transaction;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use vellum_dom::{DomId, DomTree, MutationRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    TransactionOpen,
    Committing,
}

/// Handle returned by the `add_*_listener` methods; pass it to
/// [`Editor::remove_listener`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What update listeners see after every commit.
pub struct UpdatePayload<'a> {
    pub prev_state: &'a EditorState,
    pub next_state: &'a EditorState,
    pub dirty_nodes: &'a HashSet<NodeKey>,
}

/// A raw text change observed in the DOM outside any transaction, reported
/// to text-delta listeners on flush for the host to fold back into the
/// model via a normal update.
#[derive(Debug, Clone, PartialEq)]
pub struct TextDelta {
    pub key: NodeKey,
    pub dom_id: DomId,
    pub text: String,
}

type UpdateListener = Box<dyn FnMut(&UpdatePayload)>;
type ErrorListener = Box<dyn FnMut(&EditorError, &[&'static str])>;
type DecoratorListener = Box<dyn FnMut(&[NodeKey])>;
type TextDeltaListener = Box<dyn FnMut(&[TextDelta])>;
type TextTransform = Box<dyn FnMut(&mut Transaction, &NodeKey) -> Result<(), EditorError>>;

#[derive(Default)]
struct Listeners {
    update: Vec<(ListenerId, UpdateListener)>,
    error: Vec<(ListenerId, ErrorListener)>,
    decorator: Vec<(ListenerId, DecoratorListener)>,
    text_delta: Vec<(ListenerId, TextDeltaListener)>,
    transforms: Vec<(ListenerId, TextTransform)>,
}

pub struct Editor {
    state: EditorState,
    pending: Option<Transaction>,
    dom: Option<DomTree>,
    bindings: DomBindings,
    theme: Theme,
    registry: NodeRegistry,
    listeners: Listeners,
    next_key: u64,
    next_listener: u64,
    phase: Phase,
    composing: bool,
    force_full_reconcile: bool,
    pending_text_deltas: Vec<TextDelta>,
}

/// Builder for an [`Editor`] when more than a theme needs configuring.
#[derive(Default)]
pub struct EditorConfig {
    theme: Theme,
    registry: Option<NodeRegistry>,
}

impl EditorConfig {
    pub fn new() -> Self {
        EditorConfig::default()
    }

    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Editor {
        Editor::with_config(self)
    }
}

pub fn create_editor(theme: Theme) -> Editor {
    EditorConfig::new().theme(theme).build()
}

impl Editor {
    fn with_config(config: EditorConfig) -> Self {
        // The root always carries at least one block; an empty root is a
        // fatal invariant at commit time.
        let paragraph_key: NodeKey = "1".into();
        let mut root = Node::root();
        if let Some(element) = root.as_element_mut() {
            element.children.push(paragraph_key.clone());
        }
        let mut paragraph = Node::element(paragraph_key.clone(), "paragraph");
        paragraph.parent = Some(NodeKey::root());
        let mut node_map = HashMap::new();
        node_map.insert(NodeKey::root(), Arc::new(root));
        node_map.insert(paragraph_key, Arc::new(paragraph));
        Editor {
            state: EditorState::from_map(node_map, None),
            pending: None,
            dom: None,
            bindings: DomBindings::default(),
            theme: config.theme,
            registry: config.registry.unwrap_or_else(NodeRegistry::with_builtins),
            listeners: Listeners::default(),
            next_key: 2,
            next_listener: 0,
            phase: Phase::Idle,
            composing: false,
            force_full_reconcile: false,
            pending_text_deltas: Vec::new(),
        }
    }

    // -- state access ------------------------------------------------------

    pub fn get_editor_state(&self) -> &EditorState {
        &self.state
    }

    /// Replace the committed state wholesale, dropping any pending draft,
    /// and rebuild the DOM from the new state.
    pub fn set_editor_state(&mut self, state: EditorState) -> Result<(), EditorError> {
        if self.phase != Phase::Idle {
            return Err(InvariantViolation::NestedUpdate.into());
        }
        if state.children_of(&NodeKey::root()).is_empty() {
            return Err(InvariantViolation::EmptyRoot.into());
        }
        self.pending = None;
        let prev = std::mem::replace(&mut self.state, state);
        self.rebuild_dom()?;
        let dirty = HashSet::new();
        self.notify_update(&prev, &dirty);
        Ok(())
    }

    /// Parse a persisted state through this editor's registry.
    pub fn parse_state(&self, input: &str) -> Result<EditorState, EditorError> {
        EditorState::parse(input, &self.registry)
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    // -- DOM attachment ----------------------------------------------------

    /// Attach (or detach, with `None`) the DOM surface the reconciler
    /// patches. Attaching builds the whole DOM from the committed state and
    /// turns mutation observation on.
    pub fn set_root_element(&mut self, dom: Option<DomTree>) -> Result<(), EditorError> {
        self.bindings.clear();
        self.dom = dom;
        if let Some(dom) = &mut self.dom {
            dom.set_observing(true);
        }
        self.rebuild_dom()
    }

    pub fn dom(&self) -> Option<&DomTree> {
        self.dom.as_ref()
    }

    pub fn dom_mut(&mut self) -> Option<&mut DomTree> {
        self.dom.as_mut()
    }

    pub fn get_element_by_key(&self, key: &NodeKey) -> Option<DomId> {
        self.bindings.dom_for(key)
    }

    /// Map the DOM's current native selection back onto the model.
    pub fn resolve_dom_selection(&self) -> Option<crate::selection::Selection> {
        let dom = self.dom.as_ref()?;
        let dom_selection = dom.selection()?;
        resolve_selection(&dom_selection, &self.bindings, &self.state)
    }

    // -- registry / listeners ----------------------------------------------

    pub fn register_node_type(&mut self, tag: impl Into<String>, factory: NodeFactory) {
        self.registry.register(tag, factory);
    }

    fn fresh_listener_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        id
    }

    pub fn add_update_listener(
        &mut self,
        listener: impl FnMut(&UpdatePayload) + 'static,
    ) -> ListenerId {
        let id = self.fresh_listener_id();
        self.listeners.update.push((id, Box::new(listener)));
        id
    }

    pub fn add_error_listener(
        &mut self,
        listener: impl FnMut(&EditorError, &[&'static str]) + 'static,
    ) -> ListenerId {
        let id = self.fresh_listener_id();
        self.listeners.error.push((id, Box::new(listener)));
        id
    }

    pub fn add_decorator_listener(
        &mut self,
        listener: impl FnMut(&[NodeKey]) + 'static,
    ) -> ListenerId {
        let id = self.fresh_listener_id();
        self.listeners.decorator.push((id, Box::new(listener)));
        id
    }

    pub fn add_text_delta_listener(
        &mut self,
        listener: impl FnMut(&[TextDelta]) + 'static,
    ) -> ListenerId {
        let id = self.fresh_listener_id();
        self.listeners.text_delta.push((id, Box::new(listener)));
        id
    }

    /// Register a transform run against every dirty text node before a
    /// draft is scheduled for commit.
    pub fn add_text_node_transform(
        &mut self,
        transform: impl FnMut(&mut Transaction, &NodeKey) -> Result<(), EditorError> + 'static,
    ) -> ListenerId {
        let id = self.fresh_listener_id();
        self.listeners.transforms.push((id, Box::new(transform)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.update.retain(|(l, _)| *l != id);
        self.listeners.error.retain(|(l, _)| *l != id);
        self.listeners.decorator.retain(|(l, _)| *l != id);
        self.listeners.text_delta.retain(|(l, _)| *l != id);
        self.listeners.transforms.retain(|(l, _)| *l != id);
    }

    // -- the update/commit cycle -------------------------------------------

    /// Run an edit function against the draft state. Returns whether a
    /// commit is now scheduled; call [`Editor::flush`] to perform it.
    ///
    /// Calls made while a draft function or commit is already running are a
    /// fatal nested-update error. Successive calls before a flush fold into
    /// one draft.
    pub fn update<F>(&mut self, f: F) -> Result<bool, EditorError>
    where
        F: FnOnce(&mut Transaction) -> Result<(), EditorError>,
    {
        if self.phase != Phase::Idle {
            return Err(InvariantViolation::NestedUpdate.into());
        }
        self.phase = Phase::TransactionOpen;
        let mut tx = match self.pending.take() {
            Some(mut pending) => {
                pending.active = true;
                pending.coalesced = true;
                pending
            }
            None => {
                // A fresh draft inherits the committed selection; when the
                // model has none, the user's native DOM selection seeds it.
                let selection = self.state.selection.clone().or_else(|| {
                    self.dom
                        .as_ref()
                        .and_then(|dom| dom.selection())
                        .and_then(|native| {
                            resolve_selection(&native, &self.bindings, &self.state)
                        })
                });
                Transaction::begin(self.state.node_map.clone(), selection, self.next_key)
            }
        };

        if let Err(err) = f(&mut tx) {
            return self.abort_update(err, tx.ops);
        }
        if let Err(err) = self.run_text_transforms(&mut tx) {
            return self.abort_update(err, tx.ops);
        }
        if let Err(err) = Self::normalize_dirty(&mut tx) {
            return self.abort_update(err, tx.ops);
        }
        if let Err(err) = Self::apply_text_direction(&mut tx) {
            return self.abort_update(err, tx.ops);
        }
        collect_garbage(&mut tx);

        self.next_key = tx.next_key;
        let selection_dirty = tx
            .selection
            .as_ref()
            .map(|selection| selection.dirty || selection.needs_sync)
            .unwrap_or(false);
        // A draft selection seeded from the native DOM arrives clean but may
        // still differ from the committed one; that difference alone is a
        // commit.
        let selection_changed = match (tx.selection.as_ref(), self.state.selection.as_ref()) {
            (Some(draft), Some(committed)) => {
                draft.anchor != committed.anchor || draft.focus != committed.focus
            }
            (None, None) => false,
            _ => true,
        };
        let needs_commit = tx.has_dirty_nodes()
            || !tx.dirty_subtrees.is_empty()
            || selection_dirty
            || selection_changed
            || tx.coalesced;
        self.phase = Phase::Idle;
        if !needs_commit {
            debug!("update produced no changes, draft discarded");
            return Ok(false);
        }
        tx.active = false;
        self.pending = Some(tx);
        if self.composing {
            // Composition must be reflected in the DOM before the next
            // input event.
            self.flush()?;
        }
        Ok(true)
    }

    /// Commit the pending draft: validate, swap states, reconcile, notify.
    /// The explicit microtask boundary; returns whether a commit happened.
    pub fn flush(&mut self) -> Result<bool, EditorError> {
        if self.phase != Phase::Idle {
            return Err(InvariantViolation::NestedUpdate.into());
        }
        self.report_text_deltas();
        let Some(tx) = self.pending.take() else {
            return Ok(false);
        };
        self.phase = Phase::Committing;

        if let Err(err) = Self::validate_draft(&tx) {
            self.phase = Phase::Idle;
            return Err(err.into());
        }

        // The committed copy of the selection starts clean; only new edits
        // against the next draft may schedule another commit.
        let mut selection = tx.selection.clone();
        if let Some(selection) = &mut selection {
            selection.clear_dirty();
        }
        let next = EditorState::from_map(tx.node_map.clone(), selection);
        let prev = std::mem::replace(&mut self.state, next);
        debug!(
            dirty_nodes = tx.dirty_nodes.len(),
            nodes = self.state.node_count(),
            "committing state version"
        );

        let mut recovered = None;
        if let Some(dom) = &mut self.dom {
            recovered = reconcile_with_recovery(
                &prev,
                &self.state,
                &tx.dirty_nodes,
                &tx.dirty_subtrees,
                self.force_full_reconcile,
                dom,
                &self.theme,
                &mut self.bindings,
            )?;
            self.force_full_reconcile = false;
        }
        self.next_key = tx.next_key;
        self.phase = Phase::Idle;

        if let Some(err) = recovered {
            self.notify_error(&err, &tx.ops);
        }
        self.notify_update(&prev, &tx.dirty_nodes);
        self.notify_decorators(&tx.dirty_nodes);
        Ok(true)
    }

    /// Composition boundary. Entering or leaving composition forces an
    /// immediate synchronous commit of any pending draft.
    pub fn set_composing(&mut self, composing: bool) -> Result<(), EditorError> {
        if self.composing == composing {
            return Ok(());
        }
        self.composing = composing;
        self.flush()?;
        Ok(())
    }

    /// MutationObserver entry point. The model is the source of truth for
    /// structure: external child-list changes are reverted by rebuilding
    /// the DOM from the committed state. Character-data changes are kept as
    /// raw text deltas and reported to text-delta listeners on the next
    /// flush, for the host to reconcile into the model via `update()`.
    pub fn handle_dom_mutations(
        &mut self,
        records: Vec<MutationRecord>,
    ) -> Result<(), EditorError> {
        let mut structural = false;
        for record in records {
            match record {
                MutationRecord::ChildListChanged { .. } => structural = true,
                MutationRecord::CharacterDataChanged { target, .. } => {
                    let Some(key) = self.bindings.key_for(target).cloned() else {
                        continue;
                    };
                    let text = self
                        .dom
                        .as_ref()
                        .and_then(|dom| dom.text_data(target))
                        .unwrap_or_default()
                        .to_string();
                    self.pending_text_deltas.push(TextDelta {
                        key,
                        dom_id: target,
                        text,
                    });
                }
            }
        }
        if structural {
            debug!("external structural DOM mutation reverted from model");
            self.rebuild_dom()?;
        }
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn abort_update(
        &mut self,
        err: EditorError,
        ops: Vec<&'static str>,
    ) -> Result<bool, EditorError> {
        self.phase = Phase::Idle;
        if err.is_invariant() {
            return Err(err);
        }
        let err = EditorError::Transaction(err.to_string());
        self.notify_error(&err, &ops);
        // The committed state is untouched; put the DOM back in line with it.
        self.rebuild_dom()?;
        Ok(false)
    }

    fn validate_draft(tx: &Transaction) -> Result<(), InvariantViolation> {
        if tx.children_of(&NodeKey::root()).is_empty() {
            return Err(InvariantViolation::EmptyRoot);
        }
        if let Some(selection) = tx.selection() {
            for point in [&selection.anchor, &selection.focus] {
                if tx.node(&point.key).is_none() {
                    return Err(InvariantViolation::SelectionDangling(point.key.clone()));
                }
            }
        }
        Ok(())
    }

    fn run_text_transforms(&mut self, tx: &mut Transaction) -> Result<(), EditorError> {
        if self.listeners.transforms.is_empty() {
            return Ok(());
        }
        let mut seen: HashSet<NodeKey> = HashSet::new();
        let mut dirty_text: Vec<NodeKey> = tx
            .dirty_nodes
            .iter()
            .filter(|key| tx.node(key).map(Node::is_text).unwrap_or(false))
            .filter(|key| seen.insert((*key).clone()))
            .cloned()
            .collect();
        // Text nodes under the caret run as well even when untouched, so a
        // transform can react to the selection arriving on them.
        if let Some(selection) = tx.selection().cloned() {
            for point in [&selection.anchor, &selection.focus] {
                if tx.node(&point.key).map(Node::is_text).unwrap_or(false)
                    && seen.insert(point.key.clone())
                {
                    dirty_text.push(point.key.clone());
                }
            }
        }
        for key in dirty_text {
            for (_, transform) in &mut self.listeners.transforms {
                transform(tx, &key)?;
            }
        }
        Ok(())
    }

    /// Normalize the parents of every dirty text node and of the selection
    /// endpoints. Running over the endpoints as well is what lets a no-op
    /// update still merge mergeable runs the selection touches.
    fn normalize_dirty(tx: &mut Transaction) -> Result<(), EditorError> {
        let mut parents: HashSet<NodeKey> = tx
            .dirty_nodes
            .iter()
            .filter(|key| tx.node(key).map(Node::is_text).unwrap_or(false))
            .filter_map(|key| tx.node(key).and_then(|node| node.parent.clone()))
            .collect();
        if let Some(selection) = tx.selection().cloned() {
            for point in [&selection.anchor, &selection.focus] {
                if let Some(node) = tx.node(&point.key) {
                    if node.is_text() {
                        if let Some(parent) = node.parent.clone() {
                            parents.insert(parent);
                        }
                    }
                }
            }
        }
        for parent in parents {
            tx.normalize_element(&parent)?;
        }
        Ok(())
    }

    /// Recompute the cached text direction of every element whose text
    /// content changed this draft, from its first strongly-directional
    /// character. Elements flagged directionless keep whatever they have.
    fn apply_text_direction(tx: &mut Transaction) -> Result<(), EditorError> {
        let parents: HashSet<NodeKey> = tx
            .dirty_nodes
            .iter()
            .filter(|key| tx.node(key).map(Node::is_text).unwrap_or(false))
            .filter_map(|key| tx.node(key).and_then(|node| node.parent.clone()))
            .collect();
        for parent in parents {
            let Some(node) = tx.node(&parent) else {
                continue;
            };
            if node.flags.is_directionless() {
                continue;
            }
            let current = match node.as_element() {
                Some(element) => element.direction,
                None => continue,
            };
            let scanned = text_direction(&tx.text_content_of(&parent));
            let Some(direction) = scanned else {
                continue;
            };
            if current != Some(direction) {
                if let Some(element) = tx.writable(&parent)?.as_element_mut() {
                    element.direction = Some(direction);
                }
            }
        }
        Ok(())
    }

    fn rebuild_dom(&mut self) -> Result<(), EditorError> {
        let Some(dom) = &mut self.dom else {
            return Ok(());
        };
        let empty = HashSet::new();
        reconcile_with_recovery(
            &self.state,
            &self.state,
            &empty,
            &empty,
            true,
            dom,
            &self.theme,
            &mut self.bindings,
        )?;
        self.force_full_reconcile = false;
        Ok(())
    }

    fn notify_update(&mut self, prev: &EditorState, dirty_nodes: &HashSet<NodeKey>) {
        let payload = UpdatePayload {
            prev_state: prev,
            next_state: &self.state,
            dirty_nodes,
        };
        for (_, listener) in &mut self.listeners.update {
            listener(&payload);
        }
    }

    fn notify_error(&mut self, err: &EditorError, ops: &[&'static str]) {
        for (_, listener) in &mut self.listeners.error {
            listener(err, ops);
        }
    }

    fn notify_decorators(&mut self, dirty_nodes: &HashSet<NodeKey>) {
        if self.listeners.decorator.is_empty() {
            return;
        }
        let dirty_decorators: Vec<NodeKey> = dirty_nodes
            .iter()
            .filter(|key| {
                self.state
                    .node(key)
                    .map(Node::is_decorator)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if dirty_decorators.is_empty() {
            return;
        }
        for (_, listener) in &mut self.listeners.decorator {
            listener(&dirty_decorators);
        }
    }

    fn report_text_deltas(&mut self) {
        if self.pending_text_deltas.is_empty() {
            return;
        }
        let deltas = std::mem::take(&mut self.pending_text_deltas);
        for (_, listener) in &mut self.listeners.text_delta {
            listener(&deltas);
        }
    }
}
