use crate::areas::object_store::ObjectStore;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::errors::StoreError;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::TreeSnapshot;
use bitflags::bitflags;
use bstr::{BString, ByteSlice};
use std::collections::BTreeMap;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct DiffFilter: u32 {
        const ADDED = 0b0001;
        const DELETED = 0b0010;
        const MODIFIED = 0b0100;
    }
}

impl DiffFilter {
    pub fn try_parse(s: &str) -> Option<Self> {
        let mut filter = Self::empty();

        for c in s.chars() {
            match c {
                'A' => filter |= Self::ADDED,
                'D' => filter |= Self::DELETED,
                'M' => filter |= Self::MODIFIED,
                _ => return None,
            }
        }

        Some(filter)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeChangeType {
    Added(DatabaseEntry),
    Deleted(DatabaseEntry),
    Modified {
        old: DatabaseEntry,
        new: DatabaseEntry,
    },
}

impl TreeChangeType {
    pub fn from_entries(old: Option<DatabaseEntry>, new: Option<DatabaseEntry>) -> Option<Self> {
        match (old, new) {
            (None, Some(new)) => Some(TreeChangeType::Added(new)),
            (Some(old), None) => Some(TreeChangeType::Deleted(old)),
            (Some(old), Some(new)) if old != new => Some(TreeChangeType::Modified { old, new }),
            _ => None,
        }
    }

    pub fn matches_filter(&self, filter: DiffFilter) -> bool {
        match self {
            TreeChangeType::Added(_) => filter.contains(DiffFilter::ADDED),
            TreeChangeType::Deleted(_) => filter.contains(DiffFilter::DELETED),
            TreeChangeType::Modified { .. } => filter.contains(DiffFilter::MODIFIED),
        }
    }

    pub fn old_entry(&self) -> Option<&DatabaseEntry> {
        match self {
            TreeChangeType::Deleted(entry) => Some(entry),
            TreeChangeType::Modified { old, .. } => Some(old),
            TreeChangeType::Added(_) => None,
        }
    }

    pub fn new_entry(&self) -> Option<&DatabaseEntry> {
        match self {
            TreeChangeType::Added(entry) => Some(entry),
            TreeChangeType::Modified { new, .. } => Some(new),
            TreeChangeType::Deleted(_) => None,
        }
    }

    pub fn status_char(&self) -> char {
        match self {
            TreeChangeType::Added(_) => 'A',
            TreeChangeType::Deleted(_) => 'D',
            TreeChangeType::Modified { .. } => 'M',
        }
    }
}

/// Changed leaf entries keyed by their `/`-joined path
///
/// Paths are compared as raw bytes: `README` and `readme` are different files,
/// and names that are not UTF-8 are kept as they are stored.
pub type ChangeSet = BTreeMap<BString, TreeChangeType>;
pub type TreeEntryMap = BTreeMap<BString, DatabaseEntry>;

/// Recursive comparison of two trees
///
/// Sub-trees with equal ids are skipped without being loaded. Renames show up
/// as a deletion plus an addition.
#[derive(Debug)]
pub struct TreeDiff<'s, S: ObjectStore + ?Sized> {
    store: &'s S,
    change_set: ChangeSet,
}

impl<'s, S: ObjectStore + ?Sized> TreeDiff<'s, S> {
    pub fn new(store: &'s S) -> Self {
        TreeDiff {
            store,
            change_set: BTreeMap::new(),
        }
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.change_set
    }

    pub fn into_changes(self) -> ChangeSet {
        self.change_set
    }

    /// Every changed path, sorted by raw bytes
    ///
    /// Bytes that are not valid UTF-8 become U+FFFD.
    pub fn changed_paths(&self) -> Vec<String> {
        self.change_set
            .keys()
            .map(|path| path.to_str_lossy().into_owned())
            .collect()
    }

    pub fn get_entries(&self, path: &[u8]) -> (Option<&DatabaseEntry>, Option<&DatabaseEntry>) {
        if let Some(change) = self.change_set.get(path) {
            (change.old_entry(), change.new_entry())
        } else {
            (None, None)
        }
    }

    /// Compare two loaded root trees; a missing side counts as the empty tree
    pub fn compare(
        &mut self,
        base: Option<&TreeSnapshot>,
        head: Option<&TreeSnapshot>,
    ) -> Result<(), StoreError> {
        if base.map(|tree| &tree.oid) == head.map(|tree| &tree.oid) {
            return Ok(());
        }

        let empty = TreeEntryMap::new();
        let base_entries = base.map_or(&empty, |tree| &tree.entries);
        let head_entries = head.map_or(&empty, |tree| &tree.entries);

        self.compare_entries(base_entries, head_entries, b"")
    }

    pub fn compare_oids(
        &mut self,
        old: Option<&ObjectId>,
        new: Option<&ObjectId>,
        prefix: &[u8],
    ) -> Result<(), StoreError> {
        if old == new {
            return Ok(());
        }

        let old_tree_entries = self.load_tree_entries(old)?;
        let new_tree_entries = self.load_tree_entries(new)?;

        self.compare_entries(&old_tree_entries, &new_tree_entries, prefix)
    }

    fn compare_entries(
        &mut self,
        old: &TreeEntryMap,
        new: &TreeEntryMap,
        prefix: &[u8],
    ) -> Result<(), StoreError> {
        self.detect_deletions(old, new, prefix)?;
        self.detect_additions(old, new, prefix)?;

        Ok(())
    }

    fn load_tree_entries(&self, oid: Option<&ObjectId>) -> Result<TreeEntryMap, StoreError> {
        match oid {
            None => Ok(BTreeMap::new()),
            Some(oid) => Ok(self.store.load_tree(oid)?.entries),
        }
    }

    fn join(prefix: &[u8], name: &[u8]) -> BString {
        let mut path = BString::from(prefix);
        if !path.is_empty() {
            path.push(b'/');
        }
        path.extend_from_slice(name);
        path
    }

    /// Entries of `old` that changed or disappeared, recursing into trees
    fn detect_deletions(
        &mut self,
        old: &TreeEntryMap,
        new: &TreeEntryMap,
        prefix: &[u8],
    ) -> Result<(), StoreError> {
        for (name, entry) in old {
            let other = new.get(name);

            if other == Some(entry) {
                continue;
            }

            let path = Self::join(prefix, name);

            let tree_a_oid = entry.is_tree().then_some(&entry.oid);
            let tree_b_oid = other.filter(|other| other.is_tree()).map(|other| &other.oid);
            self.compare_oids(tree_a_oid, tree_b_oid, &path)?;

            let blob_a = (!entry.is_tree()).then(|| entry.clone());
            let blob_b = other.filter(|other| !other.is_tree()).cloned();

            if let Some(change_type) = TreeChangeType::from_entries(blob_a, blob_b) {
                self.change_set.insert(path, change_type);
            }
        }

        Ok(())
    }

    /// Entries that exist only in `new`
    fn detect_additions(
        &mut self,
        old: &TreeEntryMap,
        new: &TreeEntryMap,
        prefix: &[u8],
    ) -> Result<(), StoreError> {
        for (name, entry) in new {
            if old.contains_key(name) {
                continue;
            }

            let path = Self::join(prefix, name);

            if entry.is_tree() {
                self.compare_oids(None, Some(&entry.oid), &path)?;
            } else {
                self.change_set
                    .insert(path, TreeChangeType::Added(entry.clone()));
            }
        }

        Ok(())
    }
}
