//! Allocation amortization for one parser instance.
//!
//! The pool owns two pieces of scratch storage: a stack backing the
//! iterative release walk, and a free list of reclaimed child vectors that
//! construction and copy-on-write promotion draw from instead of the global
//! allocator. Subtrees themselves are freely shareable across threads; the
//! pool is not, and belongs to exactly one parser at a time.

use std::{mem, sync::Arc};

use crate::subtree::{MutRepr, MutableSubtree, Repr, Subtree};

const MAX_FREE_BUFFERS: usize = 32;
const MAX_RECYCLED_CAPACITY: usize = 64;

pub struct SubtreePool {
    scratch: Vec<Subtree>,
    free_buffers: Vec<Vec<Subtree>>,
}

impl SubtreePool {
    /// Creates a pool whose scratch stack starts out with room for
    /// `capacity` entries.
    pub fn new(capacity: usize) -> SubtreePool {
        SubtreePool { scratch: Vec::with_capacity(capacity), free_buffers: Vec::new() }
    }

    /// A child buffer with at least the requested capacity, recycled when
    /// one of matching size is available.
    pub fn acquire_buffer(&mut self, capacity: usize) -> Vec<Subtree> {
        match self.free_buffers.iter().position(|buffer| buffer.capacity() >= capacity) {
            Some(index) => self.free_buffers.swap_remove(index),
            None => Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn recycle_buffer(&mut self, buffer: Vec<Subtree>) {
        debug_assert!(buffer.is_empty());
        if self.free_buffers.len() < MAX_FREE_BUFFERS
            && (1..=MAX_RECYCLED_CAPACITY).contains(&buffer.capacity())
        {
            self.free_buffers.push(buffer);
        }
    }

    /// Releases one reference to `tree`. Storage that reaches a reference
    /// count of zero is torn down iteratively — children first, using the
    /// scratch stack rather than the call stack — and its child buffers are
    /// reclaimed for reuse.
    pub fn release(&mut self, tree: Subtree) {
        debug_assert!(self.scratch.is_empty());
        self.scratch.push(tree);
        while let Some(tree) = self.scratch.pop() {
            if let Repr::Heap(arc) = tree.repr {
                if let Ok(mut data) = Arc::try_unwrap(arc) {
                    let mut children = mem::take(&mut data.children);
                    self.scratch.append(&mut children);
                    self.recycle_buffer(children);
                }
            }
        }
    }

    /// Releases every element, leaving the vector empty but with its
    /// capacity intact.
    pub fn clear_array(&mut self, array: &mut Vec<Subtree>) {
        while let Some(tree) = array.pop() {
            self.release(tree);
        }
    }

    /// Releases every element and reclaims the vector itself.
    pub fn release_array(&mut self, mut array: Vec<Subtree>) {
        self.clear_array(&mut array);
        self.recycle_buffer(array);
    }

    /// Copy-on-write promotion: an exclusive view of `tree`.
    ///
    /// When the caller holds the only reference this is O(1) — the same
    /// storage is reinterpreted as mutable. Otherwise the header is cloned,
    /// every child retained once more, and the caller's reference to the
    /// original released; nobody else can observe the copy.
    pub fn make_mut(&mut self, tree: Subtree) -> MutableSubtree {
        match tree.repr {
            Repr::Inline(data) => MutableSubtree { repr: MutRepr::Inline(data) },
            Repr::Heap(mut arc) => {
                if Arc::get_mut(&mut arc).is_some() {
                    MutableSubtree { repr: MutRepr::Heap(arc) }
                } else {
                    let buffer = self.acquire_buffer(arc.children.len());
                    let copy = arc.clone_with_children(buffer);
                    MutableSubtree { repr: MutRepr::Heap(Arc::new(copy)) }
                }
            }
        }
    }
}

impl Default for SubtreePool {
    fn default() -> SubtreePool {
        SubtreePool::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtree::testing::*;
    use crate::{Length, Point, StateId, Subtree};

    #[test]
    fn release_drops_children_by_exactly_one() {
        let language = language();
        let left = heap_leaf(IDENT, 0, 2, &language);
        let right = heap_leaf(NUMBER, 0, 3, &language);
        let node =
            Subtree::new_node(EXPRESSION, vec![left.clone(), right.clone()], 0, &language).finish();
        assert_eq!(left.ref_count(), 2);
        assert_eq!(right.ref_count(), 2);

        let mut pool = SubtreePool::default();
        pool.release(node);
        assert_eq!(left.ref_count(), 1);
        assert_eq!(right.ref_count(), 1);
    }

    #[test]
    fn release_is_transitive_when_counts_reach_zero() {
        let language = language();
        let grandchild = heap_leaf(IDENT, 0, 1, &language);
        let child = Subtree::new_node(
            EXPRESSION,
            vec![grandchild.clone(), heap_leaf(NUMBER, 0, 1, &language)],
            0,
            &language,
        )
        .finish();
        let root = Subtree::new_node(EXPRESSION, vec![child], 0, &language).finish();
        assert_eq!(grandchild.ref_count(), 2);

        let mut pool = SubtreePool::default();
        pool.release(root);
        // the intermediate node hit zero, so its release reached down
        assert_eq!(grandchild.ref_count(), 1);
    }

    #[test]
    fn release_of_deep_trees_does_not_recurse() {
        let language = language();
        let mut tree = leaf(NUMBER, 0, 1, &language);
        for _ in 0..100_000 {
            tree = Subtree::new_node(EXPRESSION, vec![tree], 0, &language).finish();
        }
        let mut pool = SubtreePool::default();
        pool.release(tree);
    }

    #[test]
    fn plain_drop_of_deep_trees_does_not_recurse() {
        let language = language();
        let mut tree = leaf(NUMBER, 0, 1, &language);
        for _ in 0..100_000 {
            tree = Subtree::new_node(EXPRESSION, vec![tree], 0, &language).finish();
        }
        drop(tree);
    }

    #[test]
    fn make_mut_reuses_uniquely_owned_storage() {
        let language = language();
        let tree = heap_leaf(IDENT, 0, 1, &language);
        let addr = tree.heap_addr();

        let mut pool = SubtreePool::default();
        let mut promoted = pool.make_mut(tree);
        promoted.set_has_changes(true);
        let tree = promoted.finish();
        // promoting a sole owner reinterprets the same storage, no copy
        assert_eq!(tree.heap_addr(), addr);
        assert!(tree.has_changes());
    }

    #[test]
    fn make_mut_copies_shared_storage() {
        let language = language();
        let original = Subtree::new_node(
            EXPRESSION,
            vec![heap_leaf(IDENT, 0, 2, &language), heap_leaf(NUMBER, 0, 1, &language)],
            0,
            &language,
        )
        .finish();
        let keeper = original.clone();
        let child = keeper.children()[0].clone();
        assert_eq!(child.ref_count(), 2);

        let mut pool = SubtreePool::default();
        let copy = pool.make_mut(original).finish();
        assert!(!copy.ptr_eq(&keeper));
        // children are shared, not deep-copied
        assert!(copy.children()[0].ptr_eq(&keeper.children()[0]));
        assert_eq!(child.ref_count(), 3);
        // the caller's reference to the original was consumed
        assert_eq!(keeper.ref_count(), 1);
    }

    #[test]
    fn mutating_a_copy_leaves_the_original_alone() {
        let language = language();
        let original =
            Subtree::new_node(EXPRESSION, vec![heap_leaf(IDENT, 0, 2, &language)], 0, &language)
                .finish();
        let shared = original.clone();

        let mut pool = SubtreePool::default();
        let mut copy = pool.make_mut(original);
        copy.set_symbol(HIDDEN_EXPRESSION, &language);
        copy.set_parse_state(StateId(9));
        let copy = copy.finish();

        assert_eq!(shared.symbol(), EXPRESSION);
        assert_eq!(shared.parse_state(), StateId(0));
        assert_eq!(copy.symbol(), HIDDEN_EXPRESSION);
        assert_eq!(copy.parse_state(), StateId(9));
    }

    #[test]
    fn buffers_are_recycled_through_release() {
        let language = language();
        let node = Subtree::new_node(
            EXPRESSION,
            vec![leaf(IDENT, 0, 1, &language), leaf(NUMBER, 0, 1, &language)],
            0,
            &language,
        )
        .finish();

        let mut pool = SubtreePool::default();
        pool.release(node);
        let recycled = pool.acquire_buffer(2);
        assert!(recycled.capacity() >= 2);
        assert!(recycled.is_empty());
    }

    #[test]
    fn clear_array_releases_every_element() {
        let language = language();
        let a = heap_leaf(IDENT, 0, 1, &language);
        let b = heap_leaf(NUMBER, 0, 1, &language);
        let mut array = vec![a.clone(), b.clone()];

        let mut pool = SubtreePool::default();
        pool.clear_array(&mut array);
        assert!(array.is_empty());
        assert_eq!(a.ref_count(), 1);
        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    fn cloning_an_array_retains_every_element() {
        let language = language();
        let a = heap_leaf(IDENT, 0, 1, &language);
        let array = vec![a.clone()];
        let copy = array.clone();
        assert_eq!(a.ref_count(), 3);
        assert!(copy[0].ptr_eq(&array[0]));
    }

    #[test]
    fn inline_subtrees_pass_through_make_mut() {
        let language = language();
        let tree = leaf(IDENT, 1, 2, &language);
        let mut pool = SubtreePool::default();
        let mut promoted = pool.make_mut(tree);
        promoted.set_has_changes(true);
        let tree = promoted.finish();
        assert!(tree.has_changes());
        assert_eq!(tree.symbol(), IDENT);
        assert_eq!(tree.size(), Length::new(2, Point::new(0, 2)));
    }
}
