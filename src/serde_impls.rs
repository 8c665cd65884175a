use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::{
    edit::InputEdit,
    length::{Length, Point},
    subtree::Subtree,
};

impl Serialize for Point {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_map(Some(2))?;
        state.serialize_entry("row", &self.row)?;
        state.serialize_entry("column", &self.column)?;
        state.end()
    }
}

impl Serialize for Length {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_map(Some(2))?;
        state.serialize_entry("bytes", &self.bytes)?;
        state.serialize_entry("extent", &self.extent)?;
        state.end()
    }
}

impl Serialize for InputEdit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_map(Some(3))?;
        state.serialize_entry("start", &self.start)?;
        state.serialize_entry("old_end", &self.old_end)?;
        state.serialize_entry("new_end", &self.new_end)?;
        state.end()
    }
}

impl Serialize for Subtree {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_map(Some(4))?;
        state.serialize_entry("symbol", &self.symbol().0)?;
        state.serialize_entry("padding", &self.padding())?;
        state.serialize_entry("size", &self.size())?;
        state.serialize_entry("children", &Children(self))?;
        state.end()
    }
}

struct Children<'a>(&'a Subtree);

impl Serialize for Children<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_seq(Some(self.0.child_count()))?;
        for child in self.0.children() {
            state.serialize_element(child)?;
        }
        state.end()
    }
}
