//! Diagnostic rendering: the classic s-expression form and a dot graph of
//! the physical tree. Neither format is a compatibility surface; the only
//! guarantee is that every node and its span is represented.

use std::{fmt, fmt::Write as _, io};

use rustc_hash::FxHashMap;

use crate::{
    language::{Language, Symbol},
    length::Length,
    subtree::{Repr, Subtree},
};

impl Subtree {
    /// Renders the visible tree as an s-expression, e.g.
    /// `(expression (identifier) (number))`.
    pub fn display<'a>(&'a self, language: &'a Language) -> DisplaySubtree<'a> {
        DisplaySubtree { tree: self, language, include_all: false }
    }

    /// Like [`Subtree::display`], but renders hidden nodes too.
    pub fn display_all<'a>(&'a self, language: &'a Language) -> DisplaySubtree<'a> {
        DisplaySubtree { tree: self, language, include_all: true }
    }

    /// Writes the physical tree as a graphviz graph. Subtrees shared within
    /// the tree are merged by identity.
    pub fn write_dot_graph(
        &self,
        language: &Language,
        out: &mut dyn io::Write,
    ) -> io::Result<()> {
        writeln!(out, "digraph tree {{")?;
        writeln!(out, "edge [arrowhead=none]")?;
        let mut graph = DotGraph { language, ids: FxHashMap::default(), next_id: 0 };
        graph.write_subtree(self, Length::ZERO, out)?;
        writeln!(out, "}}")
    }
}

pub struct DisplaySubtree<'a> {
    tree: &'a Subtree,
    language: &'a Language,
    include_all: bool,
}

impl fmt::Display for DisplaySubtree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_sexp(f, self.tree, self.language, self.include_all, None, true)
    }
}

fn is_printed(tree: &Subtree, language: &Language, include_all: bool, alias: Option<Symbol>) -> bool {
    include_all
        || tree.is_missing()
        || match alias {
            Some(alias) => language.symbol_metadata(alias).named,
            None => tree.visible() && tree.named(),
        }
}

fn write_sexp(
    f: &mut fmt::Formatter<'_>,
    tree: &Subtree,
    language: &Language,
    include_all: bool,
    alias: Option<Symbol>,
    is_root: bool,
) -> fmt::Result {
    let visible = is_printed(tree, language, include_all, alias);

    if visible {
        if !is_root {
            f.write_char(' ')?;
        }
        if tree.is_error(language) && tree.child_count() == 0 {
            match tree.lookahead_char().and_then(|c| u32::try_from(c).ok()).and_then(char::from_u32)
            {
                Some(c) => write!(f, "(UNEXPECTED {c:?}")?,
                None => f.write_str("(UNEXPECTED EOF")?,
            }
        } else if tree.is_missing() {
            let name = language.symbol_name(tree.symbol());
            if tree.named() {
                write!(f, "(MISSING {name}")?;
            } else {
                write!(f, "(MISSING \"{name}\"")?;
            }
        } else {
            let symbol = alias.unwrap_or_else(|| tree.symbol());
            write!(f, "({}", language.symbol_name(symbol))?;
        }
    }

    if tree.child_count() > 0 {
        let aliases = language.alias_sequence(tree.production_id());
        let field_map = language.field_map(tree.production_id());
        let mut structural_index = 0usize;
        for child in tree.children() {
            if child.extra() {
                write_sexp(f, child, language, include_all, None, is_root && !visible)?;
            } else {
                let child_alias = aliases.get(structural_index).copied().flatten();
                if visible && is_printed(child, language, include_all, child_alias) {
                    let field = field_map.iter().find(|entry| {
                        !entry.inherited && entry.child_index as usize == structural_index
                    });
                    if let Some(entry) = field {
                        if let Some(name) = language.field_name(entry.field_id) {
                            write!(f, " {name}:")?;
                        }
                    }
                }
                write_sexp(f, child, language, include_all, child_alias, is_root && !visible)?;
                structural_index += 1;
            }
        }
    }

    if visible {
        f.write_char(')')?;
    }
    Ok(())
}

struct DotGraph<'a> {
    language: &'a Language,
    ids: FxHashMap<*const (), u32>,
    next_id: u32,
}

impl DotGraph<'_> {
    fn write_subtree(
        &mut self,
        tree: &Subtree,
        offset: Length,
        out: &mut dyn io::Write,
    ) -> io::Result<u32> {
        let key = match &tree.repr {
            Repr::Heap(arc) => Some(std::sync::Arc::as_ptr(arc).cast::<()>()),
            Repr::Inline(_) => None,
        };
        if let Some(key) = key {
            if let Some(&id) = self.ids.get(&key) {
                return Ok(id);
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        if let Some(key) = key {
            self.ids.insert(key, id);
        }

        let start = offset + tree.padding();
        let end = start + tree.size();
        let mut label = String::new();
        let _ = write!(label, "{}", self.language.symbol_name(tree.symbol()));
        if tree.is_missing() {
            label.push_str(" (missing)");
        }
        writeln!(
            out,
            "tree_{id} [label=\"{}\", tooltip=\"range: {}..{} state: {} error-cost: {}\"]",
            label.replace('"', "\\\""),
            u32::from(start.bytes),
            u32::from(end.bytes),
            tree.parse_state().0,
            tree.error_cost(),
        )?;

        let mut child_offset = offset;
        for child in tree.children() {
            let child_id = self.write_subtree(child, child_offset, out)?;
            writeln!(out, "tree_{id} -> tree_{child_id}")?;
            child_offset = child_offset + child.total_size();
        }
        Ok(id)
    }
}
