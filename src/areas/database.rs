use crate::areas::pack::Pack;
use crate::artifacts::errors::StoreError;
use crate::artifacts::objects::commit::{Commit, CommitSnapshot};
use crate::artifacts::objects::object::{Object, Unpackable};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tree::{Tree, TreeSnapshot};
use anyhow::Context;
use bytes::Bytes;
use fake::rand;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

/// Read access to a git object directory (`.git/objects`)
///
/// Loose objects are looked up first, then every pack found at open time.
/// Writes always produce loose objects.
#[derive(Debug)]
pub struct Database {
    path: Box<Path>,
    packs: Vec<Pack>,
}

impl Database {
    pub fn open(path: Box<Path>) -> Result<Self, StoreError> {
        if !path.is_dir() {
            return Err(StoreError::Open {
                path: path.to_path_buf(),
                reason: "object directory does not exist".to_string(),
            });
        }

        let packs = Self::open_packs(&path)?;
        tracing::debug!(
            "opened object database at {} with {} pack(s)",
            path.display(),
            packs.len()
        );

        Ok(Database { path, packs })
    }

    fn open_packs(path: &Path) -> Result<Vec<Pack>, StoreError> {
        let pack_dir = path.join("pack");
        if !pack_dir.is_dir() {
            return Ok(Vec::new());
        }

        let open_error = |reason: String| StoreError::Open {
            path: pack_dir.clone(),
            reason,
        };

        let mut idx_paths = std::fs::read_dir(&pack_dir)
            .map_err(|e| open_error(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "idx"))
            .collect::<Vec<_>>();
        idx_paths.sort();

        idx_paths
            .iter()
            .map(|idx_path| Pack::open(idx_path).map_err(|e| open_error(format!("{e:#}"))))
            .collect()
    }

    pub fn objects_path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self, object: &impl Object) -> anyhow::Result<ObjectId> {
        let object_id = object.object_id()?;
        let object_path = self.path.join(object_id.to_path());
        let object_content = object.serialize()?;

        // write the object to disk unless it already exists
        if !object_path.exists() {
            std::fs::create_dir_all(
                object_path
                    .parent()
                    .context(format!("Invalid object path {}", object_path.display()))?,
            )
            .context(format!(
                "Unable to create object directory {}",
                object_path.display()
            ))?;

            self.write_object(object_path, object_content)?;
        }

        Ok(object_id)
    }

    /// Store a tree together with all of its sub-trees, returning the root id
    pub fn store_tree(&self, tree: &Tree) -> anyhow::Result<ObjectId> {
        tree.traverse(&mut |node| self.store(node).map(|_| ()))?;

        tree.object_id()
    }

    /// Inflate an object from wherever it is stored
    pub fn load(&self, object_id: &ObjectId) -> Result<(ObjectType, Bytes), StoreError> {
        if let Some(object) = self.load_loose(object_id)? {
            return Ok(object);
        }

        let lookup = |base: &ObjectId| self.load(base);
        for pack in &self.packs {
            if let Some(object) = pack.read_object(object_id, &lookup)? {
                return Ok(object);
            }
        }

        Err(StoreError::ObjectNotFound(object_id.clone()))
    }

    pub fn parse_object_as_commit(&self, object_id: &ObjectId) -> Result<Commit, StoreError> {
        let content = self.load_as(object_id, ObjectType::Commit)?;

        Commit::deserialize(Cursor::new(content))
            .map_err(|source| StoreError::corrupt(object_id, source))
    }

    pub fn parse_object_as_tree(&self, object_id: &ObjectId) -> Result<Tree, StoreError> {
        let content = self.load_as(object_id, ObjectType::Tree)?;

        Tree::deserialize(Cursor::new(content))
            .map_err(|source| StoreError::corrupt(object_id, source))
    }

    pub fn commit_snapshot(&self, object_id: &ObjectId) -> Result<CommitSnapshot, StoreError> {
        Ok(self
            .parse_object_as_commit(object_id)?
            .into_snapshot(object_id.clone()))
    }

    pub fn tree_snapshot(&self, object_id: &ObjectId) -> Result<TreeSnapshot, StoreError> {
        Ok(TreeSnapshot::new(
            object_id.clone(),
            self.parse_object_as_tree(object_id)?,
        ))
    }

    pub fn get_object_type(&self, object_id: &ObjectId) -> Result<ObjectType, StoreError> {
        Ok(self.load(object_id)?.0)
    }

    fn load_as(&self, object_id: &ObjectId, expected: ObjectType) -> Result<Bytes, StoreError> {
        let (actual, content) = self.load(object_id)?;
        if actual != expected {
            return Err(StoreError::UnexpectedType {
                oid: object_id.clone(),
                expected,
                actual,
            });
        }

        Ok(content)
    }

    fn load_loose(&self, object_id: &ObjectId) -> Result<Option<(ObjectType, Bytes)>, StoreError> {
        let object_path = self.path.join(object_id.to_path());

        let object_content = match std::fs::read(&object_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::corrupt(object_id, e)),
        };

        let object_content = Self::decompress(object_content.into())
            .map_err(|source| StoreError::corrupt(object_id, source))?;
        let mut object_reader = Cursor::new(object_content);
        let object_type = ObjectType::parse_object_type(&mut object_reader)
            .map_err(|source| StoreError::corrupt(object_id, source))?;

        let header_length = object_reader.position() as usize;
        let object_content = object_reader.into_inner().slice(header_length..);

        Ok(Some((object_type, object_content)))
    }

    fn write_object(&self, object_path: PathBuf, object_content: Bytes) -> anyhow::Result<()> {
        let object_dir = object_path
            .parent()
            .context(format!("Invalid object path {}", object_path.display()))?;
        let temp_object_path = object_dir.join(Self::generate_temp_name());

        let object_content = Self::compress(object_content)?;

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_object_path)
            .context(format!(
                "Unable to open object file {}",
                temp_object_path.display()
            ))?;

        file.write_all(&object_content).context(format!(
            "Unable to write object file {}",
            temp_object_path.display()
        ))?;

        // rename the temp file to the object file to make it atomic
        std::fs::rename(&temp_object_path, &object_path).context(format!(
            "Unable to rename object file to {}",
            object_path.display()
        ))?;

        Ok(())
    }

    fn compress(data: Bytes) -> anyhow::Result<Bytes> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(&data)
            .context("Unable to compress object content")?;

        encoder
            .finish()
            .map(|compressed_content| compressed_content.into())
            .context("Unable to finish compressing object content")
    }

    fn decompress(data: Bytes) -> anyhow::Result<Bytes> {
        let mut decoder = flate2::read::ZlibDecoder::new(&*data);
        let mut decompressed_content = Vec::new();
        decoder
            .read_to_end(&mut decompressed_content)
            .context("Unable to decompress object content")?;

        Ok(decompressed_content.into())
    }

    fn generate_temp_name() -> String {
        format!("tmp-obj-{}", rand::random::<u32>())
    }

    /// Find all objects whose OID starts with the given prefix.
    ///
    /// Used to resolve abbreviated OIDs given on the command line. Loose objects
    /// and packed objects are both searched; duplicates are removed.
    ///
    /// # Returns
    ///
    /// All matching ObjectIds, sorted. More than one match means the prefix is
    /// ambiguous.
    pub fn find_objects_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ObjectId>> {
        let prefix = prefix.to_ascii_lowercase();
        let mut matches = Vec::new();

        if prefix.len() >= 2 {
            self.collect_loose_matches(&prefix[..2], &prefix, &mut matches)?;
        } else {
            for i in 0..=255 {
                self.collect_loose_matches(&format!("{i:02x}"), &prefix, &mut matches)?;
            }
        }

        for pack in &self.packs {
            matches.extend(
                pack.object_ids()
                    .filter(|oid| oid.as_ref().starts_with(&prefix)),
            );
        }

        matches.sort();
        matches.dedup();

        Ok(matches)
    }

    fn collect_loose_matches(
        &self,
        dir_name: &str,
        prefix: &str,
        matches: &mut Vec<ObjectId>,
    ) -> anyhow::Result<()> {
        let dir_path = self.path.join(dir_name);
        if !dir_path.is_dir() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&dir_path)? {
            let entry = entry?;
            let full_oid = format!("{}{}", dir_name, entry.file_name().to_string_lossy());

            if full_oid.starts_with(prefix)
                && let Ok(oid) = ObjectId::try_parse(full_oid)
            {
                matches.push(oid);
            }
        }

        Ok(())
    }
}
