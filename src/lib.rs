//! A library for persistent, reference-counted parse subtrees.
//!
//! This is the storage layer of an incremental parser: it represents every
//! parsed node and token, shares immutable subtrees across successive parse
//! results without copying, and propagates text edits through a tree while
//! revisiting only the nodes the edit touches. The parsing algorithm, the
//! lexer, and tree traversal live elsewhere; what lives here is the value
//! type they all manipulate and the bookkeeping (error cost, fragility,
//! external-scanner state) that error recovery depends on.
//!
//! Mutation is only possible through [`MutableSubtree`], the exclusive view
//! handed out by [`SubtreePool::make_mut`], which clones shared storage
//! first — so a subtree can always be handed to another thread, retained,
//! and released concurrently, without locks beyond the reference count.
#![forbid(unconditional_recursion, future_incompatible)]
#![deny(unsafe_code)]

mod array;
#[allow(unsafe_code)]
mod balance;
mod edit;
mod language;
mod length;
mod pool;
mod print;
mod scanner_state;
#[cfg(feature = "serde1")]
mod serde_impls;
mod subtree;

pub use text_size::TextSize;

pub use crate::{
    array::remove_trailing_extras,
    edit::InputEdit,
    language::{ErrorCosts, FieldMapEntry, Language, StateId, Symbol, SymbolMetadata},
    length::{Length, Point},
    pool::SubtreePool,
    print::DisplaySubtree,
    scanner_state::{ScannerState, MAX_INLINE_STATE_LEN},
    subtree::{Leaf, MutableSubtree, Subtree},
};
