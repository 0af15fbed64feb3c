//! Commit-graph fixtures shared by the unit tests
//!
//! Commits get readable names encoded into their ids (`create_oid("commit_a")`)
//! and timestamps one hour apart in insertion order, unless given explicitly.

use crate::areas::object_store::{MemoryStore, ObjectStore};
use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::errors::StoreError;
use crate::artifacts::objects::blob::Blob;
use crate::artifacts::objects::commit::CommitSnapshot;
use crate::artifacts::objects::entry_mode::EntryMode;
use crate::artifacts::objects::object::Object;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::Tree;
use chrono::{DateTime, FixedOffset};

const BASE_TIMESTAMP: i64 = 1_640_995_200; // 2022-01-01

/// Create a deterministic 40-character hex ObjectId from a name
pub fn create_oid(id: &str) -> ObjectId {
    let mut hex_string = id
        .as_bytes()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();

    while hex_string.len() < 40 {
        hex_string.push('0');
    }
    hex_string.truncate(40);

    ObjectId::try_parse(hex_string).expect("Invalid test ObjectId")
}

/// Recover the name a test id was created from
pub fn format_oid(oid: &ObjectId) -> String {
    let hex = oid.to_string();
    let mut name = String::new();
    for i in (0..hex.len()).step_by(2) {
        if let Ok(byte) = u8::from_str_radix(&hex[i..i + 2], 16) {
            if byte == 0 {
                break;
            }
            if byte.is_ascii_graphic() {
                name.push(byte as char);
            }
        }
    }
    if name.is_empty() {
        oid.to_short_oid()
    } else {
        name
    }
}

pub fn timestamp(seconds: i64) -> DateTime<FixedOffset> {
    DateTime::from_timestamp(seconds, 0)
        .expect("valid timestamp")
        .fixed_offset()
}

pub fn file(content: &str) -> DatabaseEntry {
    DatabaseEntry::new(
        Blob::from(content).object_id().expect("hashable blob"),
        EntryMode::Regular,
    )
}

/// Commit graph backed by a [`MemoryStore`]
#[derive(Debug, Default)]
pub struct CommitGraph {
    store: MemoryStore,
    commits: usize,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn into_store(self) -> MemoryStore {
        self.store
    }

    /// Add a commit with an empty tree
    pub fn add_commit(&mut self, name: &str, parents: &[&str]) -> ObjectId {
        let tree_oid = self.insert_files(&[]);
        self.add_commit_with_tree(name, parents, tree_oid)
    }

    /// Add a commit whose tree holds `files` (path, content)
    pub fn add_commit_with_files(
        &mut self,
        name: &str,
        parents: &[&str],
        files: &[(&str, &str)],
    ) -> ObjectId {
        let tree_oid = self.insert_files(files);
        self.add_commit_with_tree(name, parents, tree_oid)
    }

    pub fn add_commit_at(&mut self, name: &str, parents: &[&str], seconds: i64) -> ObjectId {
        let tree_oid = self.insert_files(&[]);
        self.insert(name, parents, tree_oid, timestamp(seconds))
    }

    fn add_commit_with_tree(&mut self, name: &str, parents: &[&str], tree_oid: ObjectId) -> ObjectId {
        let when = timestamp(BASE_TIMESTAMP + self.commits as i64 * 3600);
        self.insert(name, parents, tree_oid, when)
    }

    fn insert(
        &mut self,
        name: &str,
        parents: &[&str],
        tree_oid: ObjectId,
        when: DateTime<FixedOffset>,
    ) -> ObjectId {
        let oid = create_oid(name);
        self.store.insert_snapshot(CommitSnapshot {
            oid: oid.clone(),
            parents: parents.iter().map(|parent| create_oid(parent)).collect(),
            tree_oid,
            timestamp: when,
        });
        self.commits += 1;
        oid
    }

    pub fn insert_files(&self, files: &[(&str, &str)]) -> ObjectId {
        let tree = Tree::build(files.iter().map(|(path, content)| (*path, file(content))))
            .expect("valid fixture tree");
        self.store.insert_tree(&tree).expect("storable fixture tree")
    }

    pub fn loader(&self) -> impl Fn(&ObjectId) -> Result<CommitSnapshot, StoreError> + '_ {
        |oid| self.store.resolve(oid)
    }
}
