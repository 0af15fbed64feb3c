//! Git tree object
//!
//! Trees represent directory snapshots. They contain entries for files (blobs),
//! symlinks, submodules and subdirectories (other trees), along with their names
//! and modes.
//!
//! ## Format
//!
//! On disk: `tree <size>\0<entries>`
//! Each entry: `<mode> <name>\0<20-byte-sha1>`
//!
//! ## Tree Building
//!
//! Trees can be built from a flat list of `path -> entry` pairs (used to populate
//! stores) or read back from the database, in which case only one directory level
//! is materialized and sub-trees are referenced by oid.

use crate::artifacts::database::database_entry::DatabaseEntry;
use crate::artifacts::objects::entry_mode::EntryMode;
use crate::artifacts::objects::object::{Object, Packable, Unpackable, with_header};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bstr::{BStr, BString, ByteSlice};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};

/// Entry of a tree under construction
#[derive(Debug, Clone)]
enum TreeEntry {
    /// Leaf entry (blob, symlink or gitlink)
    Leaf(DatabaseEntry),
    /// Nested tree
    Directory(Tree),
}

impl TreeEntry {
    fn object_type(&self) -> ObjectType {
        match self {
            TreeEntry::Leaf(entry) if entry.mode == EntryMode::Gitlink => ObjectType::Commit,
            TreeEntry::Leaf(_) => ObjectType::Blob,
            TreeEntry::Directory(_) => ObjectType::Tree,
        }
    }

    fn mode(&self) -> EntryMode {
        match self {
            TreeEntry::Leaf(entry) => entry.mode,
            TreeEntry::Directory(_) => EntryMode::Directory,
        }
    }

    fn oid(&self) -> anyhow::Result<ObjectId> {
        match self {
            TreeEntry::Leaf(entry) => Ok(entry.oid.clone()),
            TreeEntry::Directory(tree) => tree.object_id(),
        }
    }
}

/// Git tree object representing a directory snapshot
///
/// Trees maintain two sets of entries:
/// - `readable_entries`: For trees loaded from the database
/// - `writeable_entries`: For trees being built from a path list
///
/// Directory keys of `writeable_entries` carry a trailing `/`, which makes the
/// map iterate in the order git requires for serialized trees.
///
/// Names are raw bytes. Git does not require them to be UTF-8.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    /// Entries loaded from database (read mode)
    readable_entries: BTreeMap<BString, DatabaseEntry>,
    /// Entries being built (write mode)
    writeable_entries: BTreeMap<BString, TreeEntry>,
}

impl Tree {
    /// Build a tree from `/`-separated relative paths
    ///
    /// Intermediate directories are created as needed. Entries with directory
    /// mode are rejected; directories only exist through the files below them.
    pub fn build<P: AsRef<[u8]>>(
        entries: impl IntoIterator<Item = (P, DatabaseEntry)>,
    ) -> anyhow::Result<Self> {
        let mut root = Self::default();

        for (path, entry) in entries {
            let path = BStr::new(path.as_ref());
            if entry.is_tree() {
                return Err(anyhow::anyhow!("Cannot add directory entry {path} to a tree"));
            }

            let components = path.split_str("/").collect::<Vec<_>>();
            if components.iter().any(|component| component.is_empty()) {
                return Err(anyhow::anyhow!("Invalid tree path {path:?}"));
            }
            root.add_entry(&components, entry)?;
        }

        Ok(root)
    }

    /// Traverse the tree depth-first, calling a function on each node
    ///
    /// Visits children before parents (post-order traversal), which is
    /// necessary for storing trees since child OIDs must be known before
    /// storing the parent.
    pub fn traverse<F>(&self, func: &mut F) -> anyhow::Result<()>
    where
        F: FnMut(&Tree) -> anyhow::Result<()>,
    {
        for entry in self.writeable_entries.values() {
            if let TreeEntry::Directory(tree) = entry {
                tree.traverse(func)?;
            }
        }
        func(self)?;

        Ok(())
    }

    fn add_entry(&mut self, components: &[&[u8]], entry: DatabaseEntry) -> anyhow::Result<()> {
        match components {
            [] => Err(anyhow::anyhow!("Empty tree path")),
            [name] => {
                if self.writeable_entries.contains_key(&directory_key(name)) {
                    return Err(anyhow::anyhow!("{} is already a directory", name.as_bstr()));
                }
                self.writeable_entries
                    .insert(BString::from(*name), TreeEntry::Leaf(entry));
                Ok(())
            }
            [parent, rest @ ..] => {
                if self.writeable_entries.contains_key(*parent) {
                    return Err(anyhow::anyhow!("{} is already a file", parent.as_bstr()));
                }
                let tree = match self
                    .writeable_entries
                    .entry(directory_key(parent))
                    .or_insert_with(|| TreeEntry::Directory(Tree::default()))
                {
                    TreeEntry::Directory(tree) => tree,
                    TreeEntry::Leaf(_) => unreachable!("directory keys always hold trees"),
                };
                tree.add_entry(rest, entry)
            }
        }
    }

    /// Entries of a tree under construction, as they will be stored
    pub fn children(&self) -> anyhow::Result<Vec<(BString, DatabaseEntry)>> {
        self.writeable_entries
            .iter()
            .map(|(name, tree_entry)| {
                Ok((
                    BString::from(entry_name(name)),
                    DatabaseEntry::new(tree_entry.oid()?, tree_entry.mode()),
                ))
            })
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&BString, &DatabaseEntry)> {
        self.readable_entries.iter()
    }

    pub fn into_entries(self) -> BTreeMap<BString, DatabaseEntry> {
        self.readable_entries
    }
}

fn directory_key(name: &[u8]) -> BString {
    let mut key = BString::from(name);
    key.push(b'/');
    key
}

fn entry_name(key: &[u8]) -> &[u8] {
    key.strip_suffix(b"/").unwrap_or(key)
}

impl Packable for Tree {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let mut content_bytes = Vec::new();

        for (name, tree_entry) in &self.writeable_entries {
            let header = format!("{:o} ", tree_entry.mode().as_u32());
            content_bytes.write_all(header.as_bytes())?;
            content_bytes.write_all(entry_name(name))?;
            content_bytes.push(0);
            tree_entry.oid()?.write_h40_to(&mut content_bytes)?;
        }

        with_header(self.object_type(), &content_bytes)
    }
}

impl Unpackable for Tree {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let mut entries = BTreeMap::new();
        let mut reader = reader;

        // Reuse scratch buffers to reduce allocs
        let mut mode_bytes = Vec::new();
        let mut name_bytes = Vec::new();

        loop {
            mode_bytes.clear();
            // Read "mode " (space-delimited)
            let n = reader.read_until(b' ', &mut mode_bytes)?;
            if n == 0 {
                break; // clean EOF: no more entries
            }
            if mode_bytes.pop() != Some(b' ') {
                return Err(anyhow::anyhow!("unexpected EOF in mode"));
            }

            let mode_str = std::str::from_utf8(&mode_bytes)?;
            let mode = EntryMode::from_octal_str(mode_str)?;

            // Read "name\0"
            name_bytes.clear();
            reader.read_until(b'\0', &mut name_bytes)?;
            if name_bytes.pop() != Some(b'\0') {
                return Err(anyhow::anyhow!("unexpected EOF in name"));
            }
            let name = BString::from(name_bytes.as_slice());

            let oid =
                ObjectId::read_h40_from(&mut reader).context("unexpected EOF in object id")?;

            entries.insert(name, DatabaseEntry::new(oid, mode));
        }

        Ok(Tree {
            readable_entries: entries,
            writeable_entries: Default::default(),
        })
    }
}

impl Object for Tree {
    fn object_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn display(&self) -> String {
        self.writeable_entries
            .iter()
            .map(|(name, tree_entry)| {
                let name = entry_name(name).as_bstr();

                format!(
                    "{} {} {}\t{}",
                    tree_entry.mode().as_str(),
                    tree_entry.object_type().as_str(),
                    tree_entry.oid().unwrap_or_default().as_ref(),
                    name
                )
            })
            .collect::<Vec<String>>()
            .join("\n")
    }
}

/// One directory level of a stored tree
///
/// Sub-directories appear as entries with [`EntryMode::Directory`] and are loaded
/// on demand by oid.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeSnapshot {
    pub oid: ObjectId,
    pub entries: BTreeMap<BString, DatabaseEntry>,
}

impl TreeSnapshot {
    pub fn new(oid: ObjectId, tree: Tree) -> Self {
        TreeSnapshot {
            oid,
            entries: tree.into_entries(),
        }
    }
}
