//! Error types for the engine
//!
//! Two tiers, matching how failures propagate:
//!
//! - [`InvariantViolation`]: programming errors in a collaborator (mutating
//!   outside a transaction, emptying the root, dangling selection keys).
//!   These surface synchronously at the `update()` call site and are not
//!   recoverable except by not performing the illegal operation.
//! - [`EditorError`]: everything the editor can see. Transaction and
//!   reconciliation failures are caught internally, reported through the
//!   error-listener channel with the operation log, and recovered by a
//!   single-shot rebuild from the last committed state.

use crate::node::NodeKey;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("Cannot acquire a writable node outside an active transaction")]
    ReadOnly,

    #[error("Node not found: {0}")]
    MissingNode(NodeKey),

    #[error("Node has no parent: {0}")]
    MissingParent(NodeKey),

    #[error("Root element has no children after transaction")]
    EmptyRoot,

    #[error("Selection references a node absent from the node map: {0}")]
    SelectionDangling(NodeKey),

    #[error("Unknown node type during deserialization: {0}")]
    UnknownNodeType(String),

    #[error("Nested update() call inside an active transaction or transform")]
    NestedUpdate,

    #[error("Ambiguous insertion target: node list mixes a parent with its child and a disjoint sibling")]
    AmbiguousInsertTarget,

    #[error("Operation requires a text node: {0}")]
    NotAText(NodeKey),

    #[error("Operation requires an element node: {0}")]
    NotAnElement(NodeKey),

    #[error("Offset {offset} out of bounds for {key} (len {len})")]
    OffsetOutOfBounds {
        key: NodeKey,
        offset: usize,
        len: usize,
    },
}

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Reconciliation error: {0}")]
    Reconcile(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("DOM error: {0}")]
    Dom(#[from] vellum_dom::DomError),
}

impl EditorError {
    /// True for the fatal tier that must propagate to the `update()` caller.
    pub fn is_invariant(&self) -> bool {
        matches!(self, EditorError::Invariant(_))
    }
}
