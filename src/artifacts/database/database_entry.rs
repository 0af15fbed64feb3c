use crate::artifacts::objects::entry_mode::EntryMode;
use crate::artifacts::objects::object_id::ObjectId;
use derive_new::new;

/// A named slot of a stored tree: what it points at and how
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct DatabaseEntry {
    pub oid: ObjectId,
    pub mode: EntryMode,
}

impl DatabaseEntry {
    pub fn is_tree(&self) -> bool {
        self.mode.is_tree()
    }
}
