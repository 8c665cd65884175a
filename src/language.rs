//! Grammar metadata consumed by the subtree engine: symbol visibility,
//! display names, per-production alias/field tables, and the tunable cost
//! model that error recovery uses to rank candidate parses.
//!
//! The engine itself never hard-codes symbol ids; the reserved error and
//! end-of-input symbols are part of this configuration so the same storage
//! layer can serve any grammar.

use std::fmt;

/// A grammar symbol: a terminal (token kind) or a non-terminal (rule).
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(pub u16);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

/// A state of the parse table. `StateId::NONE` marks a subtree that can no
/// longer be re-entered by the parser (it contains an error).
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(pub u16);

impl StateId {
    pub const NONE: StateId = StateId(u16::MAX);
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == StateId::NONE {
            write!(f, "StateId(NONE)")
        } else {
            write!(f, "StateId({})", self.0)
        }
    }
}

/// How a symbol appears in the visible tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SymbolMetadata {
    pub visible: bool,
    pub named: bool,
}

/// Associates a field name with a structural child position of one
/// production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapEntry {
    pub field_id: u16,
    pub child_index: u16,
    pub inherited: bool,
}

/// The cost model of error recovery. The magnitudes are policy, not
/// structure; the defaults match the classic values but every consumer can
/// tune them per language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCosts {
    pub per_missing_tree: u32,
    pub per_recovery: u32,
    pub per_skipped_tree: u32,
    pub per_skipped_line: u32,
    pub per_skipped_char: u32,
}

impl Default for ErrorCosts {
    fn default() -> ErrorCosts {
        ErrorCosts {
            per_missing_tree: 110,
            per_recovery: 500,
            per_skipped_tree: 100,
            per_skipped_line: 30,
            per_skipped_char: 1,
        }
    }
}

/// Read-only description of one grammar, fed to every construction and
/// summarization operation.
#[derive(Debug, Clone)]
pub struct Language {
    symbol_names: Vec<Box<str>>,
    symbol_metadata: Vec<SymbolMetadata>,
    error_symbol: Symbol,
    eof_symbol: Symbol,
    alias_sequences: Vec<Vec<Option<Symbol>>>,
    field_names: Vec<Box<str>>,
    field_maps: Vec<Vec<FieldMapEntry>>,
    costs: ErrorCosts,
}

impl Language {
    /// Creates a language with empty tables. Symbols are registered with
    /// [`Language::add_symbol`]; their ids are assigned sequentially from 0.
    pub fn new(error_symbol: Symbol, eof_symbol: Symbol) -> Language {
        Language {
            symbol_names: Vec::new(),
            symbol_metadata: Vec::new(),
            error_symbol,
            eof_symbol,
            alias_sequences: Vec::new(),
            field_names: Vec::new(),
            field_maps: Vec::new(),
            costs: ErrorCosts::default(),
        }
    }

    pub fn add_symbol(&mut self, name: &str, metadata: SymbolMetadata) -> Symbol {
        let symbol = Symbol(self.symbol_names.len() as u16);
        self.symbol_names.push(name.into());
        self.symbol_metadata.push(metadata);
        symbol
    }

    /// Alias tables, indexed by production id. `None` entries leave the
    /// child's own symbol in effect.
    pub fn set_alias_sequences(&mut self, sequences: Vec<Vec<Option<Symbol>>>) {
        self.alias_sequences = sequences;
    }

    /// Field names (indexed by field id) and per-production field maps.
    pub fn set_fields(&mut self, names: Vec<Box<str>>, maps: Vec<Vec<FieldMapEntry>>) {
        self.field_names = names;
        self.field_maps = maps;
    }

    pub fn set_costs(&mut self, costs: ErrorCosts) {
        self.costs = costs;
    }

    #[inline]
    pub fn error_symbol(&self) -> Symbol {
        self.error_symbol
    }

    #[inline]
    pub fn eof_symbol(&self) -> Symbol {
        self.eof_symbol
    }

    #[inline]
    pub fn costs(&self) -> &ErrorCosts {
        &self.costs
    }

    pub fn symbol_metadata(&self, symbol: Symbol) -> SymbolMetadata {
        if symbol == self.error_symbol {
            SymbolMetadata { visible: true, named: true }
        } else {
            self.symbol_metadata.get(symbol.0 as usize).copied().unwrap_or_default()
        }
    }

    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        if symbol == self.error_symbol {
            "ERROR"
        } else {
            match self.symbol_names.get(symbol.0 as usize) {
                Some(name) => name,
                None => "",
            }
        }
    }

    pub fn alias_sequence(&self, production_id: u16) -> &[Option<Symbol>] {
        match self.alias_sequences.get(production_id as usize) {
            Some(sequence) => sequence,
            None => &[],
        }
    }

    pub fn field_map(&self, production_id: u16) -> &[FieldMapEntry] {
        match self.field_maps.get(production_id as usize) {
            Some(map) => map,
            None => &[],
        }
    }

    pub fn field_name(&self, field_id: u16) -> Option<&str> {
        self.field_names.get(field_id as usize).map(|name| &**name)
    }
}
