//! Object store accessor
//!
//! The history algorithms never touch files directly. They read commits and
//! trees through [`ObjectStore`], which is implemented by the on-disk
//! [`Database`] and by [`MemoryStore`] for callers that already hold objects.

use crate::areas::database::Database;
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::errors::StoreError;
use crate::artifacts::objects::commit::{Commit, CommitSnapshot};
use crate::artifacts::objects::object::Object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::{Tree, TreeSnapshot};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::RwLock;

/// Read-only view of an immutable commit graph
pub trait ObjectStore: Send + Sync {
    /// Resolve a commit hash to its snapshot
    fn resolve(&self, oid: &ObjectId) -> Result<CommitSnapshot, StoreError>;

    /// Load one level of a tree
    fn load_tree(&self, oid: &ObjectId) -> Result<TreeSnapshot, StoreError>;

    /// Root tree of a commit
    fn tree_of(&self, commit: &CommitSnapshot) -> Result<TreeSnapshot, StoreError> {
        self.load_tree(&commit.tree_oid)
    }
}

impl ObjectStore for Database {
    fn resolve(&self, oid: &ObjectId) -> Result<CommitSnapshot, StoreError> {
        self.commit_snapshot(oid)
    }

    fn load_tree(&self, oid: &ObjectId) -> Result<TreeSnapshot, StoreError> {
        self.tree_snapshot(oid)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    fn resolve(&self, oid: &ObjectId) -> Result<CommitSnapshot, StoreError> {
        (**self).resolve(oid)
    }

    fn load_tree(&self, oid: &ObjectId) -> Result<TreeSnapshot, StoreError> {
        (**self).load_tree(oid)
    }
}

/// Memoizes commit snapshots for the duration of one computation
///
/// Each indexing job owns its own cache; nothing is shared between jobs.
pub struct CommitCache<'s, S: ObjectStore + ?Sized> {
    store: &'s S,
    commits: RefCell<HashMap<ObjectId, CommitSnapshot>>,
}

impl<'s, S: ObjectStore + ?Sized> CommitCache<'s, S> {
    pub fn new(store: &'s S) -> Self {
        CommitCache {
            store,
            commits: RefCell::new(HashMap::new()),
        }
    }

    pub fn get_or_load(&self, oid: &ObjectId) -> Result<CommitSnapshot, StoreError> {
        if let Some(commit) = self.commits.borrow().get(oid) {
            return Ok(commit.clone());
        }

        let commit = self.store.resolve(oid)?;
        self.commits
            .borrow_mut()
            .insert(oid.clone(), commit.clone());

        Ok(commit)
    }

    pub fn len(&self) -> usize {
        self.commits.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.borrow().is_empty()
    }
}

/// In-memory object store keyed by content hash
///
/// Objects are hashed exactly like the on-disk database does, so ids computed
/// here match the ids git would assign.
#[derive(Debug, Default)]
pub struct MemoryStore {
    commits: RwLock<HashMap<ObjectId, CommitSnapshot>>,
    trees: RwLock<HashMap<ObjectId, TreeSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a commit, returning its id
    pub fn insert_commit(&self, commit: Commit) -> anyhow::Result<ObjectId> {
        let oid = commit.object_id()?;
        self.insert_snapshot(commit.into_snapshot(oid.clone()));

        Ok(oid)
    }

    /// Insert a bare snapshot under its own id
    ///
    /// Useful for graph-only fixtures whose ids are not real hashes.
    pub fn insert_snapshot(&self, snapshot: CommitSnapshot) {
        self.commits
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(snapshot.oid.clone(), snapshot);
    }

    /// Insert a tree and all of its sub-trees, returning the root id
    pub fn insert_tree(&self, tree: &Tree) -> anyhow::Result<ObjectId> {
        let mut trees = self
            .trees
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        tree.traverse(&mut |node| {
            let oid = node.object_id()?;
            let entries = node
                .children()?
                .into_iter()
                .collect::<std::collections::BTreeMap<bstr::BString, DatabaseEntry>>();
            trees.insert(oid.clone(), TreeSnapshot { oid, entries });
            Ok(())
        })?;

        tree.object_id()
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        let in_commits = self
            .commits
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(oid);

        in_commits
            || self
                .trees
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains_key(oid)
    }
}

impl ObjectStore for MemoryStore {
    fn resolve(&self, oid: &ObjectId) -> Result<CommitSnapshot, StoreError> {
        self.commits
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(oid)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound(oid.clone()))
    }

    fn load_tree(&self, oid: &ObjectId) -> Result<TreeSnapshot, StoreError> {
        self.trees
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(oid)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound(oid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::objects::blob::Blob;
    use crate::artifacts::objects::commit::Author;
    use crate::artifacts::objects::entry_mode::EntryMode;
    use chrono::DateTime;
    use pretty_assertions::assert_eq;

    fn file(content: &str) -> DatabaseEntry {
        DatabaseEntry::new(Blob::from(content).object_id().unwrap(), EntryMode::Regular)
    }

    #[test]
    fn memory_store_ids_match_database_ids() {
        let dir = assert_fs::TempDir::new().unwrap();
        let database = Database::open(dir.path().to_path_buf().into_boxed_path()).unwrap();
        let memory = MemoryStore::new();

        let tree = Tree::build([("docs/a.md", file("a")), ("b.md", file("b"))]).unwrap();
        let when = DateTime::from_timestamp(1_700_000_000, 0).unwrap().fixed_offset();
        let author = Author::new("A".into(), "a@example.com".into(), when);

        let tree_oid = database.store_tree(&tree).unwrap();
        assert_eq!(memory.insert_tree(&tree).unwrap(), tree_oid);

        let commit = Commit::new(vec![], tree_oid.clone(), author.clone(), author, "root".into());
        let commit_oid = database.store(&commit).unwrap();
        assert_eq!(memory.insert_commit(commit).unwrap(), commit_oid);

        assert_eq!(
            memory.resolve(&commit_oid).unwrap(),
            database.resolve(&commit_oid).unwrap()
        );
        assert_eq!(
            memory.load_tree(&tree_oid).unwrap(),
            database.load_tree(&tree_oid).unwrap()
        );
    }

    #[test]
    fn cache_loads_each_commit_once() {
        let memory = MemoryStore::new();
        let when = DateTime::from_timestamp(0, 0).unwrap().fixed_offset();
        let oid = ObjectId::try_parse("a".repeat(40)).unwrap();
        memory.insert_snapshot(CommitSnapshot {
            oid: oid.clone(),
            parents: vec![],
            tree_oid: ObjectId::try_parse("b".repeat(40)).unwrap(),
            timestamp: when,
        });

        let cache = CommitCache::new(&memory);
        cache.get_or_load(&oid).unwrap();
        cache.get_or_load(&oid).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.get_or_load(&ObjectId::try_parse("c".repeat(40)).unwrap()).is_err());
    }
}
