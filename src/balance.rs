//! Depth-bounding rebalancing.
//!
//! Repetition rules grow a chain of hidden same-symbol nodes one link per
//! repetition, so a long sequence parsed incrementally degenerates into a
//! list as deep as it is long. `balance` walks the uniquely-owned part of a
//! tree and rotates those chains — reattaching deeply nested children as
//! direct siblings — until depth is logarithmic in the chain length, while
//! preserving total span, child order, and all visible/named semantics.
//! The parser triggers it after large reductions, not after every edit.

use std::{mem, ptr::NonNull, sync::Arc};

use crate::{
    language::{Language, Symbol},
    subtree::{HeapData, Repr, Subtree},
};

impl Subtree {
    /// Rebalances every repetition chain reachable through exclusively
    /// owned nodes. Shared subtrees are left untouched; they will be
    /// balanced once copy-on-write hands out an exclusive copy.
    pub fn balance(&mut self, language: &Language) {
        // Every pointer on the stack refers to a uniquely-owned heap node
        // (checked via the reference count when it is pushed) reachable
        // only through `self`, which is borrowed exclusively for the whole
        // walk. Each node is pushed at most once, and rotations move nodes
        // between parents without dropping or duplicating them, so the
        // pointees stay live and disjoint.
        let mut stack: Vec<NonNull<HeapData>> = Vec::new();
        if let Some(data) = self.heap_unique_mut() {
            if !data.children.is_empty() {
                stack.push(NonNull::from(data));
            }
        }
        while let Some(mut node) = stack.pop() {
            let data = unsafe { node.as_mut() };
            if data.repeat_depth() > 0 {
                let first = data.children.first().map_or(0, Subtree::repeat_depth);
                let last = data.children.last().map_or(0, Subtree::repeat_depth);
                if first > last {
                    let mut step = u32::from(first - last) / 2;
                    while step > 0 {
                        compress(node, step as usize, language);
                        step /= 2;
                    }
                }
            }
            let data = unsafe { node.as_mut() };
            for child in &mut data.children {
                if let Some(child_data) = child.heap_unique_mut() {
                    if !child_data.children.is_empty() {
                        stack.push(NonNull::from(child_data));
                    }
                }
            }
        }
    }
}

// One pass of left-chain compression: up to `count` rotations that lift the
// grandchild at the head of a same-symbol chain up to the parent, pushing
// the intermediate node down to be the grandchild's last child. The rotated
// nodes are resummarized bottom-up afterwards.
fn compress(mut node: NonNull<HeapData>, count: usize, language: &Language) {
    let symbol = unsafe { node.as_ref() }.symbol;
    let mut rotated: Vec<NonNull<HeapData>> = Vec::new();

    for _ in 0..count {
        let tree = unsafe { node.as_mut() };
        if tree.children.len() < 2 {
            break;
        }
        let Some(mut child) = chain_link(&mut tree.children[0], symbol) else { break };
        let Some(mut grandchild) =
            chain_link(&mut unsafe { child.as_mut() }.children[0], symbol)
        else {
            break;
        };

        // tree[0] <- grandchild; child[0] <- grandchild's last child;
        // grandchild's last child <- child. Span and leaf order are
        // preserved: the same leaves hang off the chain in the same order.
        unsafe {
            let child_handle =
                mem::replace(&mut node.as_mut().children[0], Subtree::placeholder());
            let grandchild_handle =
                mem::replace(&mut child.as_mut().children[0], Subtree::placeholder());
            let last = grandchild.as_ref().children.len() - 1;
            let demoted = mem::replace(&mut grandchild.as_mut().children[last], child_handle);
            child.as_mut().children[0] = demoted;
            node.as_mut().children[0] = grandchild_handle;
        }

        // Both rotated nodes' child sets changed; the pop order below
        // resummarizes each child before the grandchild that now holds it.
        rotated.push(grandchild);
        rotated.push(child);
        node = grandchild;
    }

    while let Some(mut link) = rotated.pop() {
        unsafe { link.as_mut() }.summarize_children(language);
    }
}

// The next node of a repetition chain: a uniquely-owned heap node with the
// chain's symbol and at least two children.
fn chain_link(tree: &mut Subtree, symbol: Symbol) -> Option<NonNull<HeapData>> {
    match &mut tree.repr {
        Repr::Heap(arc) => {
            let data = Arc::get_mut(arc)?;
            if data.symbol == symbol && data.children.len() >= 2 {
                Some(NonNull::from(data))
            } else {
                None
            }
        }
        Repr::Inline(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtree::testing::*;

    fn depth(tree: &Subtree) -> usize {
        1 + tree.children().iter().map(depth).max().unwrap_or(0)
    }

    fn leaves(tree: &Subtree, out: &mut Vec<Symbol>) {
        if tree.child_count() == 0 {
            out.push(tree.symbol());
        }
        for child in tree.children() {
            leaves(child, out);
        }
    }

    /// A left-leaning repetition chain with `links` links, the shape
    /// produced by repeatedly reducing `repeat -> repeat element`.
    fn chain(links: usize, language: &crate::Language) -> Subtree {
        let mut tree = Subtree::new_node(
            REPEAT,
            vec![leaf(NUMBER, 0, 1, language), leaf(NUMBER, 0, 1, language)],
            0,
            language,
        )
        .finish();
        for _ in 0..links {
            tree = Subtree::new_node(
                REPEAT,
                vec![tree, leaf(NUMBER, 0, 1, language)],
                0,
                language,
            )
            .finish();
        }
        tree
    }

    #[test]
    fn balancing_bounds_the_depth_of_a_chain() {
        let language = language();
        let mut tree = chain(64, &language);
        let unbalanced = depth(&tree);
        assert_eq!(unbalanced, 66);
        let total = tree.total_bytes();

        tree.balance(&language);
        let balanced = depth(&tree);
        assert!(balanced < unbalanced / 2, "depth {balanced} after balancing");
        assert_eq!(tree.total_bytes(), total);
    }

    #[test]
    fn balancing_preserves_leaf_order_and_counts() {
        let language = language();
        let mut tree = chain(20, &language);
        let mut before = Vec::new();
        leaves(&tree, &mut before);
        let node_count = tree.node_count();

        tree.balance(&language);
        let mut after = Vec::new();
        leaves(&tree, &mut after);
        assert_eq!(before, after);
        assert_eq!(tree.node_count(), node_count);
    }

    #[test]
    fn shared_subtrees_are_not_rebalanced() {
        let language = language();
        let mut tree = chain(16, &language);
        let hold = tree.clone();
        let unbalanced = depth(&tree);

        tree.balance(&language);
        // the root is shared, so nothing may be mutated
        assert_eq!(depth(&tree), unbalanced);
        assert_eq!(depth(&hold), unbalanced);
    }

    #[test]
    fn non_repetition_nodes_are_left_alone() {
        let language = language();
        let inner = Subtree::new_node(
            EXPRESSION,
            vec![leaf(IDENT, 0, 1, &language), leaf(NUMBER, 0, 1, &language)],
            0,
            &language,
        )
        .finish();
        let mut tree =
            Subtree::new_node(EXPRESSION, vec![inner, leaf(EQ, 0, 1, &language)], 0, &language)
                .finish();
        let before = depth(&tree);
        tree.balance(&language);
        assert_eq!(depth(&tree), before);
        assert_eq!(tree.visible_child_count(), 2);
    }

    #[test]
    fn rotated_nodes_are_resummarized() {
        let language = language();
        let mut tree = chain(32, &language);
        let total = tree.total_bytes();
        let count = tree.node_count();
        tree.balance(&language);

        // every interior node's measurements must still add up
        fn check(tree: &Subtree) {
            if tree.child_count() > 0 {
                let sum: u32 = tree.children().iter().map(Subtree::total_bytes).sum();
                assert_eq!(tree.total_bytes(), sum);
                for child in tree.children() {
                    check(child);
                }
            }
        }
        check(&tree);
        assert_eq!(tree.total_bytes(), total);
        assert_eq!(tree.node_count(), count);
    }
}
