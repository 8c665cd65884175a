//! The fundamental building block of a parse tree.
//!
//! A [`Subtree`] is either *inline* — a handful of bytes for the common case
//! of a small, plain token — or *heap-allocated* and reference-counted, for
//! parent nodes, external tokens, errors, and any leaf whose measurements
//! exceed the inline limits. Both forms answer every accessor identically.
//!
//! Heap subtrees are shared freely between parse results; they are only ever
//! mutated through [`MutableSubtree`], the exclusively-owned view produced
//! by [`SubtreePool::make_mut`](crate::SubtreePool::make_mut), which clones
//! shared storage first. Nothing can mutate a subtree another owner can see.

use std::{cmp::Ordering, fmt, mem, sync::Arc};

use countme::Count;
use text_size::TextSize;

use crate::{
    language::{Language, StateId, Symbol},
    length::{Length, Point},
    scanner_state::ScannerState,
};

/// A node of the parse tree, terminal or non-terminal. Cloning retains,
/// dropping releases.
#[derive(Clone)]
pub struct Subtree {
    pub(crate) repr: Repr,
}

/// An exclusively-owned subtree: the only handle through which in-place
/// mutation is possible. Obtained from construction or copy-on-write
/// promotion, and turned back into a shareable [`Subtree`] with
/// [`MutableSubtree::finish`].
pub struct MutableSubtree {
    pub(crate) repr: MutRepr,
}

#[derive(Clone)]
pub(crate) enum Repr {
    Inline(InlineData),
    Heap(Arc<HeapData>),
}

pub(crate) enum MutRepr {
    Inline(InlineData),
    // Invariant: this arc is never shared while the MutableSubtree lives.
    Heap(Arc<HeapData>),
}

/// The compact representation: small plain leaves only, no allocation.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct InlineData {
    pub(crate) symbol: u8,
    pub(crate) parse_state: StateId,
    pub(crate) visible: bool,
    pub(crate) named: bool,
    pub(crate) extra: bool,
    pub(crate) has_changes: bool,
    pub(crate) is_missing: bool,
    pub(crate) is_keyword: bool,
    pub(crate) padding_bytes: u8,
    pub(crate) padding_rows: u8,
    pub(crate) padding_columns: u8,
    pub(crate) size_bytes: u8,
    pub(crate) lookahead_bytes: u8,
}

impl InlineData {
    #[inline]
    fn padding(&self) -> Length {
        Length {
            bytes: TextSize::new(self.padding_bytes as u32),
            extent: Point::new(self.padding_rows as u32, self.padding_columns as u32),
        }
    }

    #[inline]
    fn size(&self) -> Length {
        Length {
            bytes: TextSize::new(self.size_bytes as u32),
            extent: Point::new(0, self.size_bytes as u32),
        }
    }
}

/// The heap representation: full-width measurements plus the aggregate
/// bookkeeping error recovery reads without descending the tree.
pub(crate) struct HeapData {
    pub(crate) padding: Length,
    pub(crate) size: Length,
    pub(crate) lookahead_bytes: u32,
    pub(crate) error_cost: u32,
    pub(crate) symbol: Symbol,
    pub(crate) parse_state: StateId,
    pub(crate) visible: bool,
    pub(crate) named: bool,
    pub(crate) extra: bool,
    pub(crate) fragile_left: bool,
    pub(crate) fragile_right: bool,
    pub(crate) has_changes: bool,
    pub(crate) has_external_tokens: bool,
    pub(crate) has_external_scanner_state_change: bool,
    pub(crate) depends_on_column: bool,
    pub(crate) is_missing: bool,
    pub(crate) is_keyword: bool,
    pub(crate) children: Vec<Subtree>,
    pub(crate) payload: Payload,
    pub(crate) _c: Count<HeapData>,
}

pub(crate) enum Payload {
    /// A plain leaf whose measurements did not fit the inline form.
    Leaf,
    /// A node with children.
    Parent(ParentData),
    /// An external terminal, carrying its scanner state.
    External(ScannerState),
    /// An error terminal, remembering the code point that caused it.
    Unexpected { lookahead_char: i32 },
}

pub(crate) struct ParentData {
    pub(crate) visible_child_count: u32,
    pub(crate) named_child_count: u32,
    pub(crate) node_count: u32,
    pub(crate) dynamic_precedence: i32,
    pub(crate) repeat_depth: u16,
    pub(crate) production_id: u16,
    pub(crate) first_leaf: FirstLeaf,
}

/// Cached symbol/state of the leftmost leaf, so lookahead can be computed
/// without walking down the tree.
#[derive(Clone, Copy)]
pub(crate) struct FirstLeaf {
    pub(crate) symbol: Symbol,
    pub(crate) parse_state: StateId,
}

/// Description of a terminal to be built with [`Subtree::new_leaf`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Leaf {
    pub symbol: Symbol,
    pub padding: Length,
    pub size: Length,
    pub lookahead_bytes: u32,
    pub parse_state: StateId,
    pub has_external_tokens: bool,
    pub depends_on_column: bool,
    pub is_keyword: bool,
}

pub(crate) fn can_inline(padding: Length, size: Length, lookahead_bytes: u32) -> bool {
    u32::from(padding.bytes) <= u8::MAX as u32
        && padding.extent.row < 16
        && padding.extent.column <= u8::MAX as u32
        && size.extent.row == 0
        && u32::from(size.bytes) <= u8::MAX as u32
        && size.extent.column == u32::from(size.bytes)
        && lookahead_bytes < 16
}

impl Subtree {
    /// Builds a terminal node. Small plain tokens come out inline; external
    /// tokens and oversized measurements force the heap form.
    pub fn new_leaf(leaf: Leaf, language: &Language) -> Subtree {
        let metadata = language.symbol_metadata(leaf.symbol);
        let extra = leaf.symbol == language.eof_symbol();

        let is_inline = leaf.symbol.0 <= u8::MAX as u16
            && leaf.symbol != language.error_symbol()
            && !leaf.has_external_tokens
            && !leaf.depends_on_column
            && can_inline(leaf.padding, leaf.size, leaf.lookahead_bytes);

        if is_inline {
            Subtree {
                repr: Repr::Inline(InlineData {
                    symbol: leaf.symbol.0 as u8,
                    parse_state: leaf.parse_state,
                    visible: metadata.visible,
                    named: metadata.named,
                    extra,
                    has_changes: false,
                    is_missing: false,
                    is_keyword: leaf.is_keyword,
                    padding_bytes: u32::from(leaf.padding.bytes) as u8,
                    padding_rows: leaf.padding.extent.row as u8,
                    padding_columns: leaf.padding.extent.column as u8,
                    size_bytes: u32::from(leaf.size.bytes) as u8,
                    lookahead_bytes: leaf.lookahead_bytes as u8,
                }),
            }
        } else {
            let payload = if leaf.has_external_tokens {
                Payload::External(ScannerState::EMPTY)
            } else if leaf.symbol == language.error_symbol() {
                Payload::Unexpected { lookahead_char: 0 }
            } else {
                Payload::Leaf
            };
            Subtree {
                repr: Repr::Heap(Arc::new(HeapData {
                    padding: leaf.padding,
                    size: leaf.size,
                    lookahead_bytes: leaf.lookahead_bytes,
                    error_cost: 0,
                    symbol: leaf.symbol,
                    parse_state: leaf.parse_state,
                    visible: metadata.visible,
                    named: metadata.named,
                    extra,
                    fragile_left: false,
                    fragile_right: false,
                    has_changes: false,
                    has_external_tokens: leaf.has_external_tokens,
                    has_external_scanner_state_change: false,
                    depends_on_column: leaf.depends_on_column,
                    is_missing: false,
                    is_keyword: leaf.is_keyword,
                    children: Vec::new(),
                    payload,
                    _c: Count::new(),
                })),
            }
        }
    }

    /// Builds an error terminal around the code point the lexer could not
    /// place. Both edges are fragile: trimming them would split a token.
    pub fn new_error(
        lookahead_char: i32,
        padding: Length,
        size: Length,
        lookahead_bytes: u32,
        parse_state: StateId,
        language: &Language,
    ) -> Subtree {
        let mut tree = Subtree::new_leaf(
            Leaf {
                symbol: language.error_symbol(),
                padding,
                size,
                lookahead_bytes,
                parse_state,
                ..Leaf::default()
            },
            language,
        );
        match &mut tree.repr {
            Repr::Heap(arc) => {
                let data = Arc::get_mut(arc).unwrap();
                data.fragile_left = true;
                data.fragile_right = true;
                data.payload = Payload::Unexpected { lookahead_char };
            }
            Repr::Inline(_) => unreachable!("error terminals are never inline"),
        }
        tree
    }

    /// Builds a zero-width token inserted by error recovery in place of a
    /// token the source was missing.
    pub fn new_missing_leaf(
        symbol: Symbol,
        padding: Length,
        lookahead_bytes: u32,
        language: &Language,
    ) -> Subtree {
        let metadata = language.symbol_metadata(symbol);
        let costs = language.costs();
        Subtree {
            repr: Repr::Heap(Arc::new(HeapData {
                padding,
                size: Length::ZERO,
                lookahead_bytes,
                error_cost: costs.per_missing_tree + costs.per_recovery,
                symbol,
                parse_state: StateId(0),
                visible: metadata.visible,
                named: metadata.named,
                extra: false,
                fragile_left: false,
                fragile_right: false,
                has_changes: false,
                has_external_tokens: false,
                has_external_scanner_state_change: false,
                depends_on_column: false,
                is_missing: true,
                is_keyword: false,
                children: Vec::new(),
                payload: Payload::Leaf,
                _c: Count::new(),
            })),
        }
    }

    /// Builds a parent node over `children`, consuming the child list. The
    /// node's measurements and bookkeeping are summarized from the children
    /// in order.
    pub fn new_node(
        symbol: Symbol,
        children: Vec<Subtree>,
        production_id: u16,
        language: &Language,
    ) -> MutableSubtree {
        let metadata = language.symbol_metadata(symbol);
        let fragile = symbol == language.error_symbol();
        let mut data = HeapData {
            padding: Length::ZERO,
            size: Length::ZERO,
            lookahead_bytes: 0,
            error_cost: 0,
            symbol,
            parse_state: StateId(0),
            visible: metadata.visible,
            named: metadata.named,
            extra: false,
            fragile_left: fragile,
            fragile_right: fragile,
            has_changes: false,
            has_external_tokens: false,
            has_external_scanner_state_change: false,
            depends_on_column: false,
            is_missing: false,
            is_keyword: false,
            children,
            payload: Payload::Parent(ParentData {
                visible_child_count: 0,
                named_child_count: 0,
                node_count: 1,
                dynamic_precedence: 0,
                repeat_depth: 0,
                production_id,
                first_leaf: FirstLeaf { symbol, parse_state: StateId(0) },
            }),
            _c: Count::new(),
        };
        data.summarize_children(language);
        MutableSubtree { repr: MutRepr::Heap(Arc::new(data)) }
    }

    /// Wraps arbitrary children — which need not form any grammar rule — as
    /// an error production.
    pub fn new_error_node(children: Vec<Subtree>, extra: bool, language: &Language) -> Subtree {
        let mut node = Subtree::new_node(language.error_symbol(), children, 0, language);
        node.set_extra(extra);
        node.finish()
    }

    // A zero leaf used to fill a child slot while its real occupant is
    // temporarily owned elsewhere.
    pub(crate) fn placeholder() -> Subtree {
        Subtree { repr: Repr::Inline(InlineData::default()) }
    }

    /// Whether two handles share the same heap storage. Inline subtrees
    /// have no identity and never compare true.
    #[inline]
    pub fn ptr_eq(&self, other: &Subtree) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Heap(a), Repr::Heap(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[inline]
    pub(crate) fn heap(&self) -> Option<&HeapData> {
        match &self.repr {
            Repr::Heap(arc) => Some(arc),
            Repr::Inline(_) => None,
        }
    }

    // The heap data, if this handle is its only owner.
    #[inline]
    pub(crate) fn heap_unique_mut(&mut self) -> Option<&mut HeapData> {
        match &mut self.repr {
            Repr::Heap(arc) => Arc::get_mut(arc),
            Repr::Inline(_) => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        match &self.repr {
            Repr::Heap(arc) => Arc::strong_count(arc),
            Repr::Inline(_) => 1,
        }
    }

    #[cfg(test)]
    pub(crate) fn heap_addr(&self) -> Option<*const ()> {
        match &self.repr {
            Repr::Heap(arc) => Some(Arc::as_ptr(arc).cast()),
            Repr::Inline(_) => None,
        }
    }
}

// Accessors. Each answers identically for both representations.
impl Subtree {
    #[inline]
    pub fn symbol(&self) -> Symbol {
        match &self.repr {
            Repr::Inline(data) => Symbol(data.symbol as u16),
            Repr::Heap(data) => data.symbol,
        }
    }

    #[inline]
    pub fn visible(&self) -> bool {
        match &self.repr {
            Repr::Inline(data) => data.visible,
            Repr::Heap(data) => data.visible,
        }
    }

    #[inline]
    pub fn named(&self) -> bool {
        match &self.repr {
            Repr::Inline(data) => data.named,
            Repr::Heap(data) => data.named,
        }
    }

    #[inline]
    pub fn extra(&self) -> bool {
        match &self.repr {
            Repr::Inline(data) => data.extra,
            Repr::Heap(data) => data.extra,
        }
    }

    #[inline]
    pub fn has_changes(&self) -> bool {
        match &self.repr {
            Repr::Inline(data) => data.has_changes,
            Repr::Heap(data) => data.has_changes,
        }
    }

    #[inline]
    pub fn is_missing(&self) -> bool {
        match &self.repr {
            Repr::Inline(data) => data.is_missing,
            Repr::Heap(data) => data.is_missing,
        }
    }

    #[inline]
    pub fn is_keyword(&self) -> bool {
        match &self.repr {
            Repr::Inline(data) => data.is_keyword,
            Repr::Heap(data) => data.is_keyword,
        }
    }

    #[inline]
    pub fn parse_state(&self) -> StateId {
        match &self.repr {
            Repr::Inline(data) => data.parse_state,
            Repr::Heap(data) => data.parse_state,
        }
    }

    #[inline]
    pub fn lookahead_bytes(&self) -> u32 {
        match &self.repr {
            Repr::Inline(data) => data.lookahead_bytes as u32,
            Repr::Heap(data) => data.lookahead_bytes,
        }
    }

    #[inline]
    pub fn padding(&self) -> Length {
        match &self.repr {
            Repr::Inline(data) => data.padding(),
            Repr::Heap(data) => data.padding,
        }
    }

    #[inline]
    pub fn size(&self) -> Length {
        match &self.repr {
            Repr::Inline(data) => data.size(),
            Repr::Heap(data) => data.size,
        }
    }

    #[inline]
    pub fn total_size(&self) -> Length {
        self.padding() + self.size()
    }

    #[inline]
    pub fn total_bytes(&self) -> u32 {
        u32::from(self.total_size().bytes)
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        match &self.repr {
            Repr::Inline(_) => 0,
            Repr::Heap(data) => data.children.len(),
        }
    }

    #[inline]
    pub fn children(&self) -> &[Subtree] {
        match &self.repr {
            Repr::Inline(_) => &[],
            Repr::Heap(data) => &data.children,
        }
    }

    #[inline]
    pub fn visible_child_count(&self) -> u32 {
        self.heap().and_then(HeapData::parent).map_or(0, |p| p.visible_child_count)
    }

    #[inline]
    pub fn named_child_count(&self) -> u32 {
        self.heap().and_then(HeapData::parent).map_or(0, |p| p.named_child_count)
    }

    /// The number of nodes in this subtree, itself included.
    #[inline]
    pub fn node_count(&self) -> u32 {
        self.heap().and_then(HeapData::parent).map_or(1, |p| p.node_count)
    }

    #[inline]
    pub fn error_cost(&self) -> u32 {
        match &self.repr {
            Repr::Inline(_) => 0,
            Repr::Heap(data) => data.error_cost,
        }
    }

    #[inline]
    pub fn dynamic_precedence(&self) -> i32 {
        self.heap().and_then(HeapData::parent).map_or(0, |p| p.dynamic_precedence)
    }

    #[inline]
    pub fn production_id(&self) -> u16 {
        self.heap().and_then(HeapData::parent).map_or(0, |p| p.production_id)
    }

    #[inline]
    pub fn repeat_depth(&self) -> u16 {
        self.heap().and_then(HeapData::parent).map_or(0, |p| p.repeat_depth)
    }

    /// A hidden node wrapping children of its own kind: the shape produced
    /// by repetition rules, and the only shape rebalancing touches.
    #[inline]
    pub fn is_repetition(&self) -> bool {
        !self.visible() && !self.named() && self.child_count() > 0
    }

    #[inline]
    pub fn fragile_left(&self) -> bool {
        self.heap().is_some_and(|data| data.fragile_left)
    }

    #[inline]
    pub fn fragile_right(&self) -> bool {
        self.heap().is_some_and(|data| data.fragile_right)
    }

    #[inline]
    pub fn is_fragile(&self) -> bool {
        self.heap().is_some_and(|data| data.fragile_left || data.fragile_right)
    }

    #[inline]
    pub fn has_external_tokens(&self) -> bool {
        self.heap().is_some_and(|data| data.has_external_tokens)
    }

    #[inline]
    pub fn has_external_scanner_state_change(&self) -> bool {
        self.heap().is_some_and(|data| data.has_external_scanner_state_change)
    }

    #[inline]
    pub fn depends_on_column(&self) -> bool {
        self.heap().is_some_and(|data| data.depends_on_column)
    }

    /// This node's own symbol if it is a leaf, otherwise the cached symbol
    /// of its leftmost leaf descendant.
    #[inline]
    pub fn leaf_symbol(&self) -> Symbol {
        self.heap()
            .and_then(HeapData::parent)
            .map_or_else(|| self.symbol(), |p| p.first_leaf.symbol)
    }

    /// Like [`Subtree::leaf_symbol`], for the parse state.
    #[inline]
    pub fn leaf_parse_state(&self) -> StateId {
        self.heap()
            .and_then(HeapData::parent)
            .map_or_else(|| self.parse_state(), |p| p.first_leaf.parse_state)
    }

    #[inline]
    pub fn is_error(&self, language: &Language) -> bool {
        self.symbol() == language.error_symbol()
    }

    #[inline]
    pub fn is_eof(&self, language: &Language) -> bool {
        self.symbol() == language.eof_symbol()
    }

    /// The code point recorded by [`Subtree::new_error`], for error
    /// terminals only.
    #[inline]
    pub fn lookahead_char(&self) -> Option<i32> {
        match self.heap().map(|data| &data.payload) {
            Some(&Payload::Unexpected { lookahead_char }) => Some(lookahead_char),
            _ => None,
        }
    }

    /// The scanner state attached to this subtree, or the empty capsule for
    /// anything that is not an external terminal.
    #[inline]
    pub fn external_scanner_state(&self) -> &ScannerState {
        match self.heap().map(|data| &data.payload) {
            Some(Payload::External(state)) => state,
            _ => &ScannerState::EMPTY,
        }
    }

    /// The rightmost external token within this subtree, if any.
    pub fn last_external_token(&self) -> Option<&Subtree> {
        if !self.has_external_tokens() {
            return None;
        }
        let mut tree = self;
        while tree.child_count() > 0 {
            tree = tree.children().iter().rev().find(|child| child.has_external_tokens())?;
        }
        Some(tree)
    }

    /// A total order by symbol, then shape. Used for deduplication and
    /// caching, not for semantic equality of parsed content.
    pub fn compare(&self, other: &Subtree) -> Ordering {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            match a.symbol().cmp(&b.symbol()) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
            match a.child_count().cmp(&b.child_count()) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
            // Reversed so the leftmost pair is examined first.
            pending.extend(a.children().iter().zip(b.children()).rev());
        }
        Ordering::Equal
    }
}

impl fmt::Debug for Subtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subtree")
            .field("symbol", &self.symbol())
            .field("padding", &self.padding())
            .field("size", &self.size())
            .field("child_count", &self.child_count())
            .finish()
    }
}

impl HeapData {
    #[inline]
    pub(crate) fn parent(&self) -> Option<&ParentData> {
        match &self.payload {
            Payload::Parent(parent) => Some(parent),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn repeat_depth(&self) -> u16 {
        self.parent().map_or(0, |p| p.repeat_depth)
    }

    // A shallow copy for copy-on-write promotion: the header is duplicated
    // and every child retained once more into the supplied buffer.
    pub(crate) fn clone_with_children(&self, mut children: Vec<Subtree>) -> HeapData {
        children.extend(self.children.iter().cloned());
        HeapData {
            padding: self.padding,
            size: self.size,
            lookahead_bytes: self.lookahead_bytes,
            error_cost: self.error_cost,
            symbol: self.symbol,
            parse_state: self.parse_state,
            visible: self.visible,
            named: self.named,
            extra: self.extra,
            fragile_left: self.fragile_left,
            fragile_right: self.fragile_right,
            has_changes: self.has_changes,
            has_external_tokens: self.has_external_tokens,
            has_external_scanner_state_change: self.has_external_scanner_state_change,
            depends_on_column: self.depends_on_column,
            is_missing: self.is_missing,
            is_keyword: self.is_keyword,
            children,
            payload: match &self.payload {
                Payload::Leaf => Payload::Leaf,
                Payload::Parent(parent) => Payload::Parent(ParentData {
                    visible_child_count: parent.visible_child_count,
                    named_child_count: parent.named_child_count,
                    node_count: parent.node_count,
                    dynamic_precedence: parent.dynamic_precedence,
                    repeat_depth: parent.repeat_depth,
                    production_id: parent.production_id,
                    first_leaf: parent.first_leaf,
                }),
                Payload::External(state) => Payload::External(state.clone()),
                &Payload::Unexpected { lookahead_char } => Payload::Unexpected { lookahead_char },
            },
            _c: Count::new(),
        }
    }

    // The heap form an inline leaf spills into when an edit pushes its
    // measurements past the inline limits.
    pub(crate) fn from_inline(
        data: InlineData,
        padding: Length,
        size: Length,
        lookahead_bytes: u32,
    ) -> HeapData {
        HeapData {
            padding,
            size,
            lookahead_bytes,
            error_cost: 0,
            symbol: Symbol(data.symbol as u16),
            parse_state: data.parse_state,
            visible: data.visible,
            named: data.named,
            extra: data.extra,
            fragile_left: false,
            fragile_right: false,
            has_changes: data.has_changes,
            has_external_tokens: false,
            has_external_scanner_state_change: false,
            depends_on_column: false,
            is_missing: data.is_missing,
            is_keyword: data.is_keyword,
            children: Vec::new(),
            payload: Payload::Leaf,
            _c: Count::new(),
        }
    }

    /// Recomputes every aggregate field from `children`, which must be the
    /// node's own child list (taken out for the duration of the pass).
    pub(crate) fn summarize(&mut self, children: &[Subtree], language: &Language) {
        let production_id = self.parent().map_or(0, |p| p.production_id);
        let is_error = self.symbol == language.error_symbol();
        let alias_sequence = language.alias_sequence(production_id);
        let costs = language.costs();

        let mut padding = Length::ZERO;
        let mut size = Length::ZERO;
        let mut visible_child_count = 0u32;
        let mut named_child_count = 0u32;
        let mut node_count = 1u32;
        let mut dynamic_precedence = 0i32;
        let mut error_cost = 0u32;
        let mut has_external_tokens = false;
        let mut has_external_scanner_state_change = false;
        let mut depends_on_column = false;
        let mut lookahead_end_byte = 0u32;
        let mut structural_index = 0usize;

        for (i, child) in children.iter().enumerate() {
            if i == 0 {
                padding = child.padding();
                size = child.size();
            } else {
                size += child.total_size();
            }

            let end_byte =
                u32::from(padding.bytes) + u32::from(size.bytes) + child.lookahead_bytes();
            lookahead_end_byte = lookahead_end_byte.max(end_byte);

            error_cost += child.error_cost();

            let grandchild_count = child.child_count();
            if is_error && !child.extra() && !(child.is_error(language) && grandchild_count == 0) {
                if child.visible() {
                    error_cost += costs.per_skipped_tree;
                } else if grandchild_count > 0 {
                    error_cost += costs.per_skipped_tree * child.visible_child_count();
                }
            }

            dynamic_precedence = dynamic_precedence.max(child.dynamic_precedence());
            node_count += child.node_count();

            let alias = if child.extra() {
                None
            } else {
                alias_sequence.get(structural_index).copied().flatten()
            };
            match alias {
                Some(alias_symbol) => {
                    visible_child_count += 1;
                    if language.symbol_metadata(alias_symbol).named {
                        named_child_count += 1;
                    }
                }
                None => {
                    if child.visible() {
                        visible_child_count += 1;
                        if child.named() {
                            named_child_count += 1;
                        }
                    } else if grandchild_count > 0 {
                        visible_child_count += child.visible_child_count();
                        named_child_count += child.named_child_count();
                    }
                }
            }

            if child.has_external_tokens() {
                has_external_tokens = true;
            }
            if child.has_external_scanner_state_change() {
                has_external_scanner_state_change = true;
            }
            if child.depends_on_column() {
                depends_on_column = true;
            }

            if child.is_error(language) {
                self.fragile_left = true;
                self.fragile_right = true;
                self.parse_state = StateId::NONE;
            }

            if !child.extra() {
                structural_index += 1;
            }
        }

        if is_error {
            error_cost += costs.per_recovery
                + costs.per_skipped_char * u32::from(size.bytes)
                + costs.per_skipped_line * size.extent.row;
        }

        let mut repeat_depth = 0u16;
        let mut first_leaf = FirstLeaf { symbol: self.symbol, parse_state: self.parse_state };
        if let (Some(first), Some(last)) = (children.first(), children.last()) {
            first_leaf =
                FirstLeaf { symbol: first.leaf_symbol(), parse_state: first.leaf_parse_state() };
            if first.fragile_left() {
                self.fragile_left = true;
            }
            if last.fragile_right() {
                self.fragile_right = true;
            }
            if children.len() >= 2
                && !self.visible
                && !self.named
                && first.symbol() == self.symbol
            {
                repeat_depth = first.repeat_depth().max(last.repeat_depth()) + 1;
            }
        }

        self.padding = padding;
        self.size = size;
        self.lookahead_bytes =
            lookahead_end_byte.saturating_sub(u32::from(padding.bytes) + u32::from(size.bytes));
        self.error_cost = error_cost;
        self.has_external_tokens = has_external_tokens;
        self.has_external_scanner_state_change = has_external_scanner_state_change;
        self.depends_on_column = depends_on_column;
        if let Payload::Parent(parent) = &mut self.payload {
            parent.visible_child_count = visible_child_count;
            parent.named_child_count = named_child_count;
            parent.node_count = node_count;
            parent.dynamic_precedence = dynamic_precedence;
            parent.repeat_depth = repeat_depth;
            parent.first_leaf = first_leaf;
        }
    }

    /// [`HeapData::summarize`] over the node's own children.
    pub(crate) fn summarize_children(&mut self, language: &Language) {
        let children = mem::take(&mut self.children);
        self.summarize(&children, language);
        self.children = children;
    }
}

// Children are torn down with an explicit worklist: after enough unbalanced
// incremental growth a tree can be deep enough to overflow the call stack
// if each node's drop recursed into its children.
impl Drop for HeapData {
    fn drop(&mut self) {
        if self.children.is_empty() {
            return;
        }
        let mut pending = mem::take(&mut self.children);
        while let Some(child) = pending.pop() {
            if let Repr::Heap(arc) = child.repr {
                if let Ok(mut data) = Arc::try_unwrap(arc) {
                    pending.append(&mut data.children);
                }
            }
        }
    }
}

impl MutableSubtree {
    /// Seals this exclusive view back into a shareable subtree.
    #[inline]
    pub fn finish(self) -> Subtree {
        match self.repr {
            MutRepr::Inline(data) => Subtree { repr: Repr::Inline(data) },
            MutRepr::Heap(arc) => Subtree { repr: Repr::Heap(arc) },
        }
    }

    #[inline]
    pub(crate) fn heap_mut(&mut self) -> Option<&mut HeapData> {
        match &mut self.repr {
            // The arc is unique by construction; see SubtreePool::make_mut.
            MutRepr::Heap(arc) => Some(Arc::get_mut(arc).unwrap()),
            MutRepr::Inline(_) => None,
        }
    }

    #[inline]
    pub fn symbol(&self) -> Symbol {
        match &self.repr {
            MutRepr::Inline(data) => Symbol(data.symbol as u16),
            MutRepr::Heap(data) => data.symbol,
        }
    }

    #[inline]
    pub fn parse_state(&self) -> StateId {
        match &self.repr {
            MutRepr::Inline(data) => data.parse_state,
            MutRepr::Heap(data) => data.parse_state,
        }
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        match &self.repr {
            MutRepr::Inline(_) => 0,
            MutRepr::Heap(data) => data.children.len(),
        }
    }

    #[inline]
    pub fn children(&self) -> &[Subtree] {
        match &self.repr {
            MutRepr::Inline(_) => &[],
            MutRepr::Heap(data) => &data.children,
        }
    }

    /// The children, exclusively. Callers that reorder or replace children
    /// must call [`MutableSubtree::summarize_children`] afterwards.
    #[inline]
    pub fn children_mut(&mut self) -> &mut [Subtree] {
        match self.heap_mut() {
            Some(data) => data.children.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Relabels this subtree, refreshing its visibility metadata.
    pub fn set_symbol(&mut self, symbol: Symbol, language: &Language) {
        let metadata = language.symbol_metadata(symbol);
        match &mut self.repr {
            MutRepr::Inline(data) => {
                assert!(symbol.0 <= u8::MAX as u16);
                data.symbol = symbol.0 as u8;
                data.visible = metadata.visible;
                data.named = metadata.named;
            }
            MutRepr::Heap(arc) => {
                let data = Arc::get_mut(arc).unwrap();
                data.symbol = symbol;
                data.visible = metadata.visible;
                data.named = metadata.named;
            }
        }
    }

    pub fn set_extra(&mut self, extra: bool) {
        match &mut self.repr {
            MutRepr::Inline(data) => data.extra = extra,
            MutRepr::Heap(arc) => Arc::get_mut(arc).unwrap().extra = extra,
        }
    }

    pub fn set_has_changes(&mut self, has_changes: bool) {
        match &mut self.repr {
            MutRepr::Inline(data) => data.has_changes = has_changes,
            MutRepr::Heap(arc) => Arc::get_mut(arc).unwrap().has_changes = has_changes,
        }
    }

    pub fn set_parse_state(&mut self, state: StateId) {
        match &mut self.repr {
            MutRepr::Inline(data) => data.parse_state = state,
            MutRepr::Heap(arc) => Arc::get_mut(arc).unwrap().parse_state = state,
        }
    }

    pub fn set_fragile_left(&mut self, fragile: bool) {
        if let Some(data) = self.heap_mut() {
            data.fragile_left = fragile;
        }
    }

    pub fn set_fragile_right(&mut self, fragile: bool) {
        if let Some(data) = self.heap_mut() {
            data.fragile_right = fragile;
        }
    }

    /// Adds a production-level bonus on top of the summarized precedence.
    pub fn add_dynamic_precedence(&mut self, bonus: i32) {
        if let Some(data) = self.heap_mut() {
            if let Payload::Parent(parent) = &mut data.payload {
                parent.dynamic_precedence += bonus;
            }
        }
    }

    /// Attaches freshly serialized scanner state to an external terminal.
    pub fn set_external_scanner_state(&mut self, state: ScannerState) {
        let data = self.heap_mut().expect("external tokens are heap-allocated");
        assert!(data.has_external_tokens && data.children.is_empty());
        data.payload = Payload::External(state);
    }

    pub fn set_has_external_scanner_state_change(&mut self, changed: bool) {
        if let Some(data) = self.heap_mut() {
            data.has_external_scanner_state_change = changed;
        }
    }

    /// Recomputes the aggregates after the child list was modified.
    pub fn summarize_children(&mut self, language: &Language) {
        if let Some(data) = self.heap_mut() {
            data.summarize_children(language);
        }
    }

    // Applies post-edit measurements, spilling an inline leaf to the heap
    // when they no longer fit the narrow fields.
    pub(crate) fn set_edited_spans(&mut self, padding: Length, size: Length, lookahead_bytes: u32) {
        match &mut self.repr {
            MutRepr::Inline(data) => {
                if can_inline(padding, size, lookahead_bytes) {
                    data.padding_bytes = u32::from(padding.bytes) as u8;
                    data.padding_rows = padding.extent.row as u8;
                    data.padding_columns = padding.extent.column as u8;
                    data.size_bytes = u32::from(size.bytes) as u8;
                } else {
                    let inline = *data;
                    self.repr = MutRepr::Heap(Arc::new(HeapData::from_inline(
                        inline,
                        padding,
                        size,
                        lookahead_bytes,
                    )));
                }
            }
            MutRepr::Heap(_) => {
                let data = self.heap_mut().unwrap();
                data.padding = padding;
                data.size = size;
            }
        }
    }
}

impl fmt::Debug for MutableSubtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableSubtree")
            .field("symbol", &self.symbol())
            .field("child_count", &self.child_count())
            .finish()
    }
}
