//! # Node model
//!
//! The content tree is a closed tagged union over node kinds, stored in an
//! arena (the state's node map) and addressed only by stable [`NodeKey`]s,
//! never by direct reference. Capability behavior (`create_dom`,
//! `update_dom`, text aggregation) lives with the reconciler and matches
//! exhaustively on [`NodeBody`], so adding a plugin node kind means choosing
//! one of the closed bodies under a new type tag, not subclassing.
//!
//! Key invariants:
//! - A node's key never changes across state versions that represent edits
//!   to the same logical node.
//! - Every key in an element's `children` resolves to a node whose `parent`
//!   equals that element's key.
//! - The root is a distinguished element under the fixed key `"root"`.

use crate::error::InvariantViolation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque, stable node identifier. Cheap to clone; unique within one editor
/// state lineage.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(Arc<str>);

pub const ROOT_KEY: &str = "root";

impl NodeKey {
    pub fn root() -> Self {
        NodeKey(Arc::from(ROOT_KEY))
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == ROOT_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeKey {
    fn from(value: &str) -> Self {
        NodeKey(Arc::from(value))
    }
}

impl From<String> for NodeKey {
    fn from(value: String) -> Self {
        NodeKey(Arc::from(value.as_str()))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({})", &self.0)
    }
}

impl Serialize for NodeKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(NodeKey::from(s))
    }
}

/// Behavior-altering node flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeFlags(pub u32);

impl NodeFlags {
    /// Atomic unit: selected, formatted and deleted as a whole.
    pub const IMMUTABLE: NodeFlags = NodeFlags(1 << 0);
    /// Deletes as a word-like unit.
    pub const SEGMENTED: NodeFlags = NodeFlags(1 << 1);
    /// Excluded from text content and selection.
    pub const INERT: NodeFlags = NodeFlags(1 << 2);
    /// Does not contribute to direction scanning.
    pub const DIRECTIONLESS: NodeFlags = NodeFlags(1 << 3);
    /// Never merged with adjacent text nodes.
    pub const UNMERGEABLE: NodeFlags = NodeFlags(1 << 4);
    /// Decorator whose externally-rendered output is stale.
    pub const DIRTY_DECORATOR: NodeFlags = NodeFlags(1 << 5);
    /// Overflowed past a content limit.
    pub const OVERFLOWED: NodeFlags = NodeFlags(1 << 6);

    pub fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: NodeFlags) {
        self.0 &= !other.0;
    }

    pub fn union(self, other: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 | other.0)
    }

    pub fn is_immutable(self) -> bool {
        self.contains(NodeFlags::IMMUTABLE)
    }

    pub fn is_segmented(self) -> bool {
        self.contains(NodeFlags::SEGMENTED)
    }

    pub fn is_inert(self) -> bool {
        self.contains(NodeFlags::INERT)
    }

    pub fn is_unmergeable(self) -> bool {
        self.contains(NodeFlags::UNMERGEABLE)
    }

    pub fn is_directionless(self) -> bool {
        self.contains(NodeFlags::DIRECTIONLESS)
    }
}

/// Inline text formatting bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextFormat(pub u32);

impl TextFormat {
    pub const BOLD: TextFormat = TextFormat(1 << 0);
    pub const ITALIC: TextFormat = TextFormat(1 << 1);
    pub const UNDERLINE: TextFormat = TextFormat(1 << 2);
    pub const STRIKETHROUGH: TextFormat = TextFormat(1 << 3);
    pub const CODE: TextFormat = TextFormat(1 << 4);

    pub fn contains(self, other: TextFormat) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn toggled(self, other: TextFormat) -> TextFormat {
        TextFormat(self.0 ^ other.0)
    }

    pub fn with(self, other: TextFormat) -> TextFormat {
        TextFormat(self.0 | other.0)
    }

    pub fn without(self, other: TextFormat) -> TextFormat {
        TextFormat(self.0 & !other.0)
    }
}

/// Block alignment bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementFormat(pub u32);

impl ElementFormat {
    pub const ALIGN_LEFT: ElementFormat = ElementFormat(1 << 0);
    pub const ALIGN_CENTER: ElementFormat = ElementFormat(1 << 1);
    pub const ALIGN_RIGHT: ElementFormat = ElementFormat(1 << 2);
    pub const ALIGN_JUSTIFY: ElementFormat = ElementFormat(1 << 3);

    pub fn contains(self, other: ElementFormat) -> bool {
        self.0 & other.0 == other.0
    }

    /// CSS alignment keyword, `None` for the unaligned default.
    pub fn alignment(self) -> Option<&'static str> {
        if self.contains(ElementFormat::ALIGN_CENTER) {
            Some("center")
        } else if self.contains(ElementFormat::ALIGN_RIGHT) {
            Some("right")
        } else if self.contains(ElementFormat::ALIGN_JUSTIFY) {
            Some("justify")
        } else if self.contains(ElementFormat::ALIGN_LEFT) {
            Some("left")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
}

/// Direction of the first strongly-directional character, `None` when the
/// text has none (digits, punctuation, whitespace).
pub(crate) fn text_direction(text: &str) -> Option<Direction> {
    for c in text.chars() {
        if is_rtl_char(c) {
            return Some(Direction::Rtl);
        }
        if c.is_alphabetic() {
            return Some(Direction::Ltr);
        }
    }
    None
}

// Hebrew through Arabic Extended plus the Arabic presentation forms.
fn is_rtl_char(c: char) -> bool {
    matches!(
        c,
        '\u{0590}'..='\u{08FF}' | '\u{FB1D}'..='\u{FDFF}' | '\u{FE70}'..='\u{FEFF}'
    )
}

/// Text leaf payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextBody {
    pub text: String,
    pub format: TextFormat,
    pub style: String,
    pub url: Option<String>,
}

/// Container payload. The root is an `ElementBody` with tag `"root"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementBody {
    pub tag: String,
    pub children: Vec<NodeKey>,
    pub format: ElementFormat,
    pub indent: u32,
    /// Cached from content scan; `None` until a scan has run.
    pub direction: Option<Direction>,
}

impl ElementBody {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            children: Vec::new(),
            format: ElementFormat::default(),
            indent: 0,
            direction: None,
        }
    }
}

/// Externally-rendered embed. The core tracks presence and dirtiness only;
/// the host renders the content keyed by node key.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratorBody {
    pub tag: String,
}

/// Closed union over node kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    Text(TextBody),
    LineBreak,
    Element(ElementBody),
    Decorator(DecoratorBody),
}

/// One keyed, typed unit of content.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub key: NodeKey,
    pub parent: Option<NodeKey>,
    pub flags: NodeFlags,
    pub body: NodeBody,
}

impl Node {
    pub fn text(key: NodeKey, text: impl Into<String>) -> Self {
        Node {
            key,
            parent: None,
            flags: NodeFlags::default(),
            body: NodeBody::Text(TextBody {
                text: text.into(),
                ..TextBody::default()
            }),
        }
    }

    pub fn element(key: NodeKey, tag: impl Into<String>) -> Self {
        Node {
            key,
            parent: None,
            flags: NodeFlags::default(),
            body: NodeBody::Element(ElementBody::new(tag)),
        }
    }

    pub fn root() -> Self {
        Node::element(NodeKey::root(), "root")
    }

    pub fn line_break(key: NodeKey) -> Self {
        Node {
            key,
            parent: None,
            flags: NodeFlags::default(),
            body: NodeBody::LineBreak,
        }
    }

    pub fn decorator(key: NodeKey, tag: impl Into<String>) -> Self {
        Node {
            key,
            parent: None,
            flags: NodeFlags::default(),
            body: NodeBody::Decorator(DecoratorBody { tag: tag.into() }),
        }
    }

    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        if let NodeBody::Text(text) = &mut self.body {
            text.format = format;
        }
        self
    }

    /// Type tag used by the registry and the persisted layout.
    pub fn type_tag(&self) -> &str {
        match &self.body {
            NodeBody::Text(_) => "text",
            NodeBody::LineBreak => "linebreak",
            NodeBody::Element(element) => &element.tag,
            NodeBody::Decorator(decorator) => &decorator.tag,
        }
    }

    pub fn is_root(&self) -> bool {
        self.key.is_root()
    }

    pub fn is_text(&self) -> bool {
        matches!(self.body, NodeBody::Text(_))
    }

    pub fn is_element(&self) -> bool {
        matches!(self.body, NodeBody::Element(_))
    }

    pub fn is_line_break(&self) -> bool {
        matches!(self.body, NodeBody::LineBreak)
    }

    pub fn is_decorator(&self) -> bool {
        matches!(self.body, NodeBody::Decorator(_))
    }

    pub fn as_text(&self) -> Option<&TextBody> {
        match &self.body {
            NodeBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut TextBody> {
        match &mut self.body {
            NodeBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&ElementBody> {
        match &self.body {
            NodeBody::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementBody> {
        match &mut self.body {
            NodeBody::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Text length in characters (offsets are character offsets).
    pub fn text_len(&self) -> usize {
        match &self.body {
            NodeBody::Text(text) => text.text.chars().count(),
            _ => 0,
        }
    }

    /// Whether this text node can merge with `other` during normalization.
    pub fn mergeable_with(&self, other: &Node) -> bool {
        let (a, b) = match (self.as_text(), other.as_text()) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        let blocked = |flags: NodeFlags| {
            flags.is_immutable() || flags.is_segmented() || flags.is_unmergeable()
        };
        !blocked(self.flags)
            && !blocked(other.flags)
            && self.flags == other.flags
            && a.format == b.format
            && a.style == b.style
            && a.url == b.url
    }
}

/// Slice a string by character offsets.
pub(crate) fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let byte_start = char_to_byte(s, start);
    let byte_end = char_to_byte(s, end);
    &s[byte_start..byte_end]
}

pub(crate) fn char_to_byte(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Read access to a node map, implemented by both committed states and the
/// in-transaction draft. Traversal always resolves through the store by key,
/// never through a cached reference, so stale clones are never observed.
pub trait NodeStore {
    fn node(&self, key: &NodeKey) -> Option<&Node>;

    fn resolve(&self, key: &NodeKey) -> Result<&Node, InvariantViolation> {
        self.node(key)
            .ok_or_else(|| InvariantViolation::MissingNode(key.clone()))
    }

    fn parent_of(&self, key: &NodeKey) -> Option<&Node> {
        let parent_key = self.node(key)?.parent.as_ref()?;
        self.node(parent_key)
    }

    fn children_of(&self, key: &NodeKey) -> &[NodeKey] {
        match self.node(key).and_then(Node::as_element) {
            Some(element) => &element.children,
            None => &[],
        }
    }

    fn first_child_of(&self, key: &NodeKey) -> Option<&NodeKey> {
        self.children_of(key).first()
    }

    fn last_child_of(&self, key: &NodeKey) -> Option<&NodeKey> {
        self.children_of(key).last()
    }

    /// Index of `key` within its parent's children.
    fn index_in_parent(&self, key: &NodeKey) -> Option<usize> {
        let parent = self.parent_of(key)?;
        parent
            .as_element()?
            .children
            .iter()
            .position(|child| child == key)
    }

    fn next_sibling_of(&self, key: &NodeKey) -> Option<&NodeKey> {
        let parent = self.parent_of(key)?;
        let children = &parent.as_element()?.children;
        let index = children.iter().position(|child| child == key)?;
        children.get(index + 1)
    }

    fn prev_sibling_of(&self, key: &NodeKey) -> Option<&NodeKey> {
        let parent = self.parent_of(key)?;
        let children = &parent.as_element()?.children;
        let index = children.iter().position(|child| child == key)?;
        index.checked_sub(1).and_then(|i| children.get(i))
    }

    /// Reachable from root via the parent chain.
    fn is_attached(&self, key: &NodeKey) -> bool {
        let mut current = Some(key.clone());
        while let Some(k) = current {
            if k.is_root() {
                return true;
            }
            current = match self.node(&k) {
                Some(node) => node.parent.clone(),
                None => return false,
            };
        }
        false
    }

    /// Path of child indices from root down to `key`; `None` if detached.
    fn path_from_root(&self, key: &NodeKey) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = key.clone();
        while !current.is_root() {
            path.push(self.index_in_parent(&current)?);
            current = self.node(&current)?.parent.clone()?;
        }
        path.reverse();
        Some(path)
    }

    /// Aggregated text content of a subtree. Inert text is excluded; a line
    /// break contributes a newline; decorators contribute nothing.
    fn text_content_of(&self, key: &NodeKey) -> String {
        let mut out = String::new();
        self.collect_text(key, &mut out);
        out
    }

    fn collect_text(&self, key: &NodeKey, out: &mut String) {
        let Some(node) = self.node(key) else {
            return;
        };
        match &node.body {
            NodeBody::Text(text) => {
                if !node.flags.is_inert() {
                    out.push_str(&text.text);
                }
            }
            NodeBody::LineBreak => out.push('\n'),
            NodeBody::Element(element) => {
                for child in &element.children {
                    self.collect_text(child, out);
                }
            }
            NodeBody::Decorator(_) => {}
        }
    }

    /// Depth-first, document-order list of keys between `from` and `to`
    /// inclusive. The endpoints are ordered by their root paths first, so
    /// callers always receive document order regardless of argument order.
    fn nodes_between(&self, from: &NodeKey, to: &NodeKey) -> Vec<NodeKey> {
        if from == to {
            return vec![from.clone()];
        }
        let (first, last) = match (self.path_from_root(from), self.path_from_root(to)) {
            (Some(a), Some(b)) => {
                if a <= b {
                    (from.clone(), to.clone())
                } else {
                    (to.clone(), from.clone())
                }
            }
            _ => return Vec::new(),
        };
        let mut out = Vec::new();
        let mut current = Some(first);
        while let Some(key) = current {
            out.push(key.clone());
            if key == last {
                break;
            }
            current = self.step_forward(&key);
        }
        out
    }

    /// Next node in depth-first document order.
    fn step_forward(&self, key: &NodeKey) -> Option<NodeKey> {
        if let Some(first) = self.first_child_of(key) {
            return Some(first.clone());
        }
        let mut current = key.clone();
        loop {
            if let Some(next) = self.next_sibling_of(&current) {
                return Some(next.clone());
            }
            current = self.node(&current)?.parent.clone()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapStore(HashMap<NodeKey, Node>);

    impl NodeStore for MapStore {
        fn node(&self, key: &NodeKey) -> Option<&Node> {
            self.0.get(key)
        }
    }

    fn store_with_paragraph() -> (MapStore, NodeKey, NodeKey, NodeKey) {
        // root > paragraph > [text "ab", text "cd"]
        let p: NodeKey = "p1".into();
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
        let mut ta = Node::text(a.clone(), "ab");
        ta.parent = Some(p.clone());
        let mut tb = Node::text(b.clone(), "cd");
        tb.parent = Some(p.clone());
        let mut map = HashMap::new();
        map.insert(NodeKey::root(), root);
        map.insert(p.clone(), para);
        map.insert(a.clone(), ta);
        map.insert(b.clone(), tb);
        (MapStore(map), p, a, b)
    }

    #[test]
    fn test_flags_bitset() {
        let mut flags = NodeFlags::default();
        flags.insert(NodeFlags::IMMUTABLE);
        flags.insert(NodeFlags::INERT);
        assert!(flags.is_immutable());
        assert!(flags.is_inert());
        flags.remove(NodeFlags::IMMUTABLE);
        assert!(!flags.is_immutable());
    }

    #[test]
    fn test_traversal_resolves_by_key() {
        let (store, p, a, b) = store_with_paragraph();
        assert_eq!(store.parent_of(&a).unwrap().key, p);
        assert_eq!(store.next_sibling_of(&a), Some(&b));
        assert_eq!(store.prev_sibling_of(&b), Some(&a));
        assert_eq!(store.index_in_parent(&b), Some(1));
        assert!(store.is_attached(&b));
        assert_eq!(store.text_content_of(&NodeKey::root()), "abcd");
    }

    #[test]
    fn test_inert_text_excluded_from_content() {
        let (mut store, _, a, _) = store_with_paragraph();
        store.0.get_mut(&a).unwrap().flags.insert(NodeFlags::INERT);
        assert_eq!(store.text_content_of(&NodeKey::root()), "cd");
    }

    #[test]
    fn test_nodes_between_document_order() {
        let (store, p, a, b) = store_with_paragraph();
        let forward = store.nodes_between(&a, &b);
        assert_eq!(forward, vec![a.clone(), b.clone()]);
        // Reverse query returns document order too.
        let backward = store.nodes_between(&b, &a);
        assert_eq!(backward, vec![a.clone(), b.clone()]);
        let spanning = store.nodes_between(&NodeKey::root(), &b);
        assert_eq!(spanning, vec![NodeKey::root(), p, a, b]);
    }

    #[test]
    fn test_text_direction_first_strong_char() {
        assert_eq!(text_direction("hello"), Some(Direction::Ltr));
        assert_eq!(text_direction("שלום"), Some(Direction::Rtl));
        assert_eq!(text_direction("مرحبا"), Some(Direction::Rtl));
        // Weak characters defer to the first strong one.
        assert_eq!(text_direction("123 שלום"), Some(Direction::Rtl));
        assert_eq!(text_direction("42 + 17"), None);
    }

    #[test]
    fn test_element_format_alignment() {
        assert_eq!(ElementFormat::default().alignment(), None);
        assert_eq!(ElementFormat::ALIGN_CENTER.alignment(), Some("center"));
        assert_eq!(ElementFormat::ALIGN_JUSTIFY.alignment(), Some("justify"));
    }

    #[test]
    fn test_mergeable_with() {
        let a = Node::text("a".into(), "x");
        let b = Node::text("b".into(), "y");
        assert!(a.mergeable_with(&b));

        let bold = Node::text("c".into(), "z").with_format(TextFormat::BOLD);
        assert!(!a.mergeable_with(&bold));

        let unmergeable = Node::text("d".into(), "w").with_flags(NodeFlags::UNMERGEABLE);
        assert!(!a.mergeable_with(&unmergeable));

        let brk = Node::line_break("e".into());
        assert!(!a.mergeable_with(&brk));
    }

    #[test]
    fn test_char_slice_multibyte() {
        let s = "héllo";
        assert_eq!(char_slice(s, 1, 3), "él");
        assert_eq!(char_to_byte(s, 5), s.len());
    }
}
