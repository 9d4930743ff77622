//! # vellum-core
//!
//! A rich-text document engine: an immutable, versioned tree of content
//! nodes kept in sync with a live DOM surface ([`vellum_dom`]), a two-way
//! selection model over that tree, and a keyed tree-diff reconciler that
//! patches the DOM with minimal mutations.
//!
//! ```text
//!   update(f) ──► Transaction (copy-on-write draft + dirty sets)
//!                     │  text transforms, normalization, GC
//!   flush() ────► validate ──► EditorState (immutable snapshot)
//!                     │
//!                 Reconciler ──► DomTree   (keyed diff, dirty-scoped)
//!                     │
//!                 listeners (update / error / decorator / text-delta)
//! ```
//!
//! Nodes are addressed only by stable [`NodeKey`]s, never by reference;
//! every traversal resolves through the current state's node map. Each
//! committed [`EditorState`] is immutable, so snapshots can be held, diffed,
//! serialized, and restored at any time.

pub mod editor;
pub mod error;
pub mod node;
pub mod registry;
pub mod selection;
pub mod state;
pub mod theme;
pub mod transaction;

mod edits;
mod gc;
mod reconciler;

pub use editor::{
    create_editor, Editor, EditorConfig, ListenerId, TextDelta, UpdatePayload,
};
pub use error::{EditorError, InvariantViolation};
pub use node::{
    Direction, ElementBody, ElementFormat, Node, NodeBody, NodeFlags, NodeKey, NodeStore,
    TextBody, TextFormat,
};
pub use reconciler::DomBindings;
pub use registry::{NodeFactory, NodeRecord, NodeRegistry};
pub use selection::{resolve_model_point, resolve_selection, Point, PointKind, Selection};
pub use state::EditorState;
pub use theme::Theme;
pub use transaction::Transaction;
