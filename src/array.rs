//! Utilities over child lists (`Vec<Subtree>`).
//!
//! Most of the classic operations map straight onto the vector type:
//! cloning a list retains every element, `reverse` comes from `[T]`, and
//! releasing goes through [`SubtreePool::clear_array`] /
//! [`SubtreePool::release_array`] so buffers return to the pool.
//!
//! [`SubtreePool::clear_array`]: crate::SubtreePool::clear_array
//! [`SubtreePool::release_array`]: crate::SubtreePool::release_array

use crate::subtree::Subtree;

/// Moves the contiguous run of trailing "extra" subtrees (incidental
/// content such as trailing trivia) from the back of `children` into
/// `trailing`, preserving their source order, stopping at the first
/// non-extra element. Used to separate a production's real children from
/// incidental ones before node construction.
pub fn remove_trailing_extras(children: &mut Vec<Subtree>, trailing: &mut Vec<Subtree>) {
    trailing.clear();
    while children.last().is_some_and(Subtree::extra) {
        trailing.push(children.pop().unwrap());
    }
    trailing.reverse();
}
