//! Edit propagation: transforming a previously built tree to reflect a
//! localized text change while sharing every subtree the change does not
//! touch.
//!
//! Subtree positions are relative — each node records only its own padding
//! and size — so a subtree that lies entirely before the edit is returned
//! as the very same reference, and siblings after an edited child shift
//! automatically when their predecessor's measurements change. Only the
//! nodes whose span intersects the edit are copied (via copy-on-write) and
//! marked changed for the parser to revalidate.

use std::mem;

use crate::{
    length::Length,
    pool::SubtreePool,
    subtree::Subtree,
};

/// A text change: everything between `start` and `old_end` was replaced by
/// the text now ending at `new_end`. All three are absolute positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEdit {
    pub start: Length,
    pub old_end: Length,
    pub new_end: Length,
}

impl Subtree {
    /// Applies `edit` to this tree, consuming the caller's reference and
    /// returning the adjusted tree.
    pub fn edit(self, edit: &InputEdit, pool: &mut SubtreePool) -> Subtree {
        edit_subtree(self, Edit { start: edit.start, old_end: edit.old_end, new_end: edit.new_end }, pool)
    }
}

// The edit re-expressed in a child's coordinate space as it descends.
#[derive(Clone, Copy)]
struct Edit {
    start: Length,
    old_end: Length,
    new_end: Length,
}

fn edit_subtree(tree: Subtree, edit: Edit, pool: &mut SubtreePool) -> Subtree {
    let is_noop = edit.old_end.bytes == edit.start.bytes && edit.new_end.bytes == edit.start.bytes;
    let is_pure_insertion = edit.old_end.bytes == edit.start.bytes;

    let mut size = tree.size();
    let mut padding = tree.padding();
    let total_size = padding + size;
    let lookahead_bytes = tree.lookahead_bytes();
    let end_byte = u32::from(total_size.bytes) + lookahead_bytes;
    let start_byte = u32::from(edit.start.bytes);

    // Entirely before the edit: the same reference is shared untouched.
    if start_byte > end_byte || (is_noop && start_byte == end_byte) {
        return tree;
    }

    if edit.old_end.bytes <= padding.bytes {
        // The edit lies entirely in the space before this subtree: shift it
        // without changing its content.
        padding = edit.new_end + (padding - edit.old_end);
    } else if edit.start.bytes < padding.bytes {
        // The edit starts before this subtree and bites into it: the
        // content shrinks to compensate for the lost leading space.
        size = total_size.saturating_sub(edit.old_end);
        padding = edit.new_end;
    } else if edit.start.bytes == padding.bytes && is_pure_insertion {
        // A pure insertion at the very start shifts the subtree over.
        padding = edit.new_end;
    } else if edit.start.bytes < total_size.bytes
        || (edit.start.bytes == total_size.bytes && is_pure_insertion)
    {
        // The edit falls within this subtree: resize it.
        size = (edit.new_end - padding) + total_size.saturating_sub(edit.old_end);
    }

    let mut result = pool.make_mut(tree);
    result.set_edited_spans(padding, size, lookahead_bytes);
    result.set_has_changes(true);

    if let Some(data) = result.heap_mut() {
        let mut edit = edit;
        let mut child_right = Length::ZERO;
        for i in 0..data.children.len() {
            let child_size = data.children[i].total_size();
            let child_lookahead = data.children[i].lookahead_bytes();
            let child_left = child_right;
            child_right = child_left + child_size;

            // Children that end before the edit are unaffected.
            if u32::from(child_right.bytes) + child_lookahead < u32::from(edit.start.bytes) {
                continue;
            }

            // Children that start after the removed range only shift, which
            // their relative positions already express.
            if child_left.bytes > edit.old_end.bytes
                || (child_left.bytes == edit.old_end.bytes
                    && u32::from(child_size.bytes) > 0
                    && i > 0)
            {
                break;
            }

            // The edit in this child's coordinates, clamped to its span.
            let child_edit = Edit {
                start: if edit.start.bytes < child_left.bytes {
                    Length::ZERO
                } else {
                    edit.start - child_left
                },
                old_end: if edit.old_end.bytes > child_right.bytes {
                    child_size
                } else {
                    edit.old_end - child_left
                },
                new_end: if edit.new_end.bytes < child_left.bytes {
                    Length::ZERO
                } else {
                    edit.new_end - child_left
                },
            };

            let child = mem::replace(&mut data.children[i], Subtree::placeholder());
            data.children[i] = edit_subtree(child, child_edit, pool);

            // All inserted text belongs to the first child whose span
            // reaches the edit position; later children only see the
            // removal. A child processed merely because its lookahead
            // overlaps the edit does not take the insertion.
            if child_right.bytes >= edit.start.bytes {
                edit.new_end = edit.start;
            }
        }
    }

    result.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::length::Point;
    use crate::subtree::testing::*;
    use crate::subtree::{Repr, Subtree};
    use crate::Symbol;

    fn col(bytes: u32) -> Length {
        Length::new(bytes, Point::new(0, bytes))
    }

    fn insertion(at: u32, len: u32) -> InputEdit {
        InputEdit { start: col(at), old_end: col(at), new_end: col(at + len) }
    }

    /// `identifier = number` — sizes 5, 1 (padded by 1), 3 (padded by 1).
    fn assignment(language: &crate::Language) -> Subtree {
        let children = vec![
            heap_leaf(IDENT, 0, 5, language),
            heap_leaf(EQ, 1, 1, language),
            heap_leaf(NUMBER, 1, 3, language),
        ];
        Subtree::new_node(EXPRESSION, children, 0, language).finish()
    }

    #[test]
    fn null_edit_changes_nothing_observable() {
        let language = language();
        let tree = assignment(&language);
        let before: Vec<_> = tree.children().iter().map(Subtree::symbol).collect();
        let total = tree.total_bytes();

        let mut pool = SubtreePool::default();
        let edited = tree.edit(&insertion(3, 0), &mut pool);
        let after: Vec<_> = edited.children().iter().map(Subtree::symbol).collect();
        assert_eq!(before, after);
        assert_eq!(edited.total_bytes(), total);
        assert_eq!(edited.padding(), Length::ZERO);
        for (child, expected) in edited.children().iter().zip([5u32, 2, 4]) {
            assert_eq!(child.total_bytes(), expected);
        }
    }

    #[test]
    fn insertion_after_a_token_shifts_later_siblings_by_identity() {
        let language = language();
        let tree = assignment(&language);
        assert_eq!(tree.total_bytes(), 11);
        let eq_before = tree.children()[1].clone();
        let literal_before = tree.children()[2].clone();

        // insert 2 bytes right after `identifier` (offset 5)
        let mut pool = SubtreePool::default();
        let edited = tree.edit(&insertion(5, 2), &mut pool);

        assert_eq!(edited.total_bytes(), 13);
        assert!(edited.has_changes());
        // the identifier absorbed the insertion and must be re-examined
        assert_eq!(edited.children()[0].total_bytes(), 7);
        assert!(edited.children()[0].has_changes());
        // the later siblings shifted without being copied
        assert!(edited.children()[1].ptr_eq(&eq_before));
        assert!(edited.children()[2].ptr_eq(&literal_before));
        assert!(!edited.children()[1].has_changes());
    }

    #[test]
    fn edit_in_padding_shifts_a_subtree() {
        let language = language();
        let tree = heap_leaf(NUMBER, 4, 3, &language);
        let mut pool = SubtreePool::default();
        // insert 2 bytes inside the 4-byte padding
        let edited = tree.edit(&insertion(2, 2), &mut pool);
        assert_eq!(edited.padding(), col(6));
        assert_eq!(edited.size(), col(3));
        assert!(edited.has_changes());
    }

    #[test]
    fn edit_spanning_padding_and_content_shrinks_content() {
        let language = language();
        let tree = heap_leaf(NUMBER, 4, 6, &language);
        let mut pool = SubtreePool::default();
        // delete bytes 2..7: two bytes of padding and three of content
        let edit = InputEdit { start: col(2), old_end: col(7), new_end: col(2) };
        let edited = tree.edit(&edit, &mut pool);
        assert_eq!(edited.padding(), col(2));
        assert_eq!(edited.size(), col(3));
    }

    #[test]
    fn deletion_spanning_several_children() {
        let language = language();
        let tree = assignment(&language);
        // delete bytes 3..8: the tail of `identifier`, the padding, `=`,
        // and the literal's padding
        let edit = InputEdit { start: col(3), old_end: col(8), new_end: col(3) };
        let mut pool = SubtreePool::default();
        let edited = tree.edit(&edit, &mut pool);

        assert_eq!(edited.total_bytes(), 6);
        let sizes: Vec<_> =
            edited.children().iter().map(Subtree::total_bytes).collect();
        assert_eq!(sizes.iter().sum::<u32>(), 6);
        // offsets stay non-decreasing and every touched child is flagged
        assert!(edited.children()[0].has_changes());
        assert!(edited.children()[1].has_changes());
    }

    #[test]
    fn a_subtree_can_shrink_to_zero_width_and_shift_afterwards() {
        let language = language();
        let tree = heap_leaf(NUMBER, 0, 5, &language);
        let mut pool = SubtreePool::default();

        let removal = InputEdit { start: col(0), old_end: col(5), new_end: col(0) };
        let shrunk = tree.edit(&removal, &mut pool);
        assert_eq!(shrunk.size(), Length::ZERO);
        assert_eq!(shrunk.total_bytes(), 0);
        assert!(shrunk.has_changes());

        // text inserted at a zero-width subtree's position lands in its
        // padding, shifting it without resurrecting content
        let regrown = shrunk.edit(&insertion(0, 3), &mut pool);
        assert_eq!(regrown.padding(), col(3));
        assert_eq!(regrown.size(), Length::ZERO);
    }

    #[test]
    fn edited_inline_leaf_spills_to_heap_when_too_large() {
        let language = language();
        let tree = leaf(IDENT, 0, 10, &language);
        assert!(matches!(tree.repr, Repr::Inline(_)));

        let mut pool = SubtreePool::default();
        let edited = tree.edit(&insertion(5, 300), &mut pool);
        assert!(matches!(edited.repr, Repr::Heap(_)));
        assert_eq!(edited.symbol(), IDENT);
        assert_eq!(edited.size(), col(310));
        assert!(edited.has_changes());
    }

    #[test]
    fn unrelated_subtree_is_returned_unchanged() {
        let language = language();
        let tree = heap_leaf(IDENT, 0, 3, &language);
        let probe = tree.clone();
        let mut pool = SubtreePool::default();
        // the edit happens far past this subtree's span
        let edited = tree.edit(&insertion(100, 4), &mut pool);
        assert!(edited.ptr_eq(&probe));
        assert!(!edited.has_changes());
    }

    #[test]
    fn insertion_at_token_boundary_feeds_the_left_token() {
        let language = language();
        let children =
            vec![heap_leaf(IDENT, 0, 2, &language), heap_leaf(NUMBER, 0, 2, &language)];
        let tree = Subtree::new_node(EXPRESSION, children, 0, &language).finish();
        let right_before = tree.children()[1].clone();

        let mut pool = SubtreePool::default();
        let edited = tree.edit(&insertion(2, 3), &mut pool);
        assert_eq!(edited.children()[0].total_bytes(), 5);
        assert!(edited.children()[1].ptr_eq(&right_before));
    }

    #[test]
    fn multiline_insertion_updates_extents() {
        let language = language();
        let tree = heap_leaf(IDENT, 0, 8, &language);
        let edit = InputEdit {
            start: col(4),
            old_end: col(4),
            new_end: Length::new(9, Point::new(1, 2)),
        };
        let mut pool = SubtreePool::default();
        let edited = tree.edit(&edit, &mut pool);
        assert_eq!(u32::from(edited.size().bytes), 13);
        assert_eq!(edited.size().extent.row, 1);
    }

    #[test]
    fn insertion_inside_a_later_token_is_not_taken_by_an_earlier_one() {
        let language = language();
        let tree = assignment(&language);
        let mut pool = SubtreePool::default();
        // insert one byte at offset 6, inside the `=` token's region; the
        // identifier's lookahead reaches the edit but its span does not
        let edited = tree.edit(&insertion(6, 1), &mut pool);

        let symbols: Vec<Symbol> = edited.children().iter().map(Subtree::symbol).collect();
        assert_eq!(symbols, vec![IDENT, EQ, NUMBER]);
        assert_eq!(edited.children()[0].total_bytes(), 5);
        assert_eq!(edited.children()[1].total_bytes(), 3);
        assert_eq!(edited.total_bytes(), 12);
        let sum: u32 = edited.children().iter().map(Subtree::total_bytes).sum();
        assert_eq!(sum, edited.total_bytes());
    }
}
