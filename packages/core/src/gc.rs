//! # Garbage collection
//!
//! Runs at the end of every transaction, before commit: any dirty node no
//! longer reachable from root is stripped out of the draft map, along with
//! everything exclusively reachable through it. Nodes created and abandoned
//! within the same transaction are also purged from the dirty sets so they
//! never reach the reconciler.

use crate::node::{Node, NodeKey, NodeStore};
use crate::transaction::Transaction;
use tracing::debug;

pub(crate) fn collect_garbage(tx: &mut Transaction) {
    let candidates: Vec<NodeKey> = tx.dirty_nodes.iter().cloned().collect();
    let mut collected = 0usize;
    for key in candidates {
        if key.is_root() {
            continue;
        }
        // A candidate may already be gone: deleted transitively through an
        // earlier candidate's subtree.
        if tx.node(&key).is_none() {
            continue;
        }
        if !tx.is_attached(&key) {
            collected += delete_subtree(tx, &key);
        }
    }
    if collected > 0 {
        debug!(collected, "garbage collected detached nodes");
    }
}

fn delete_subtree(tx: &mut Transaction, key: &NodeKey) -> usize {
    let Some(node) = tx.node_map.remove(key) else {
        return 0;
    };
    // Newly created this transaction and never attached: the reconciler
    // must never see it.
    if !tx.prev_keys.contains(key) {
        tx.dirty_nodes.remove(key);
        tx.dirty_subtrees.remove(key);
    }
    let mut count = 1;
    if let Some(element) = node.as_element() {
        for child in element.children.clone() {
            let child_is_ours = tx
                .node(&child)
                .and_then(|n: &Node| n.parent.as_ref())
                .is_some_and(|parent| parent == key);
            if child_is_ours {
                count += delete_subtree(tx, &child);
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn base_transaction() -> (Transaction, NodeKey) {
        let p: NodeKey = "p".into();
        let mut root = Node::root();
        root.as_element_mut().unwrap().children.push(p.clone());
        let mut para = Node::element(p.clone(), "paragraph");
        para.parent = Some(NodeKey::root());
        let mut map = HashMap::new();
        map.insert(NodeKey::root(), Arc::new(root));
        map.insert(p.clone(), Arc::new(para));
        (Transaction::begin(map, None, 1), p)
    }

    #[test]
    fn test_detached_subtree_is_collected() {
        let (mut tx, p) = base_transaction();
        let q = tx.create_paragraph().unwrap();
        tx.append(&NodeKey::root(), &q).unwrap();
        let t = tx.create_text("x").unwrap();
        tx.append(&q, &t).unwrap();

        tx.remove(&q).unwrap();
        collect_garbage(&mut tx);

        assert!(tx.node(&q).is_none());
        assert!(tx.node(&t).is_none());
        assert!(tx.node(&p).is_some());
        // Created this transaction, so purged from the dirty sets too.
        assert!(!tx.dirty_nodes.contains(&q));
        assert!(!tx.dirty_nodes.contains(&t));
    }

    #[test]
    fn test_previously_committed_node_stays_dirty_after_collection() {
        // A node from the committed state that gets detached must stay in
        // the dirty set so the reconciler destroys its DOM.
        let p: NodeKey = "p".into();
        let t: NodeKey = "t".into();
        let mut root = Node::root();
        root.as_element_mut().unwrap().children.push(p.clone());
        let mut para = Node::element(p.clone(), "paragraph");
        para.parent = Some(NodeKey::root());
        para.as_element_mut().unwrap().children.push(t.clone());
        let mut text = Node::text(t.clone(), "x");
        text.parent = Some(p.clone());
        let mut map = HashMap::new();
        map.insert(NodeKey::root(), Arc::new(root));
        map.insert(p.clone(), Arc::new(para));
        map.insert(t.clone(), Arc::new(text));
        let mut tx = Transaction::begin(map, None, 1);

        tx.remove(&t).unwrap();
        collect_garbage(&mut tx);

        assert!(tx.node(&t).is_none());
        assert!(tx.dirty_nodes.contains(&t));
    }

    #[test]
    fn test_attached_nodes_survive() {
        let (mut tx, p) = base_transaction();
        let t = tx.create_text("keep me").unwrap();
        tx.append(&p, &t).unwrap();
        collect_garbage(&mut tx);
        assert!(tx.node(&t).is_some());
    }
}
