use crate::areas::database::Database;
use crate::artifacts::errors::StoreError;
use crate::artifacts::objects::object_id::ObjectId;
use std::cell::{RefCell, RefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A local, already cloned repository
///
/// Only the object database is used; refs, index and work tree are ignored.
pub struct Repository {
    path: Box<Path>,
    writer: RefCell<Box<dyn std::io::Write>>,
    database: Arc<Database>,
}

impl Repository {
    /// Open the repository at `path`
    ///
    /// `path` may be a work tree containing `.git/`, a `.git` directory, or a
    /// bare repository. Failing here is fatal for a whole batch.
    pub fn open(path: &Path, writer: Box<dyn std::io::Write>) -> Result<Self, StoreError> {
        let path = path.canonicalize().map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let git_dir = Self::find_git_dir(&path).ok_or_else(|| StoreError::Open {
            path: path.clone(),
            reason: "not a git repository".to_string(),
        })?;
        let database = Database::open(git_dir.join("objects").into_boxed_path())?;

        tracing::info!("opened repository at {}", path.display());

        Ok(Repository {
            path: path.into_boxed_path(),
            writer: RefCell::new(writer),
            database: Arc::new(database),
        })
    }

    fn find_git_dir(path: &Path) -> Option<PathBuf> {
        let dot_git = path.join(".git");
        if dot_git.join("objects").is_dir() {
            return Some(dot_git);
        }

        // bare repository or a git directory given directly
        if path.join("objects").is_dir() && path.join("HEAD").is_file() {
            return Some(path.to_path_buf());
        }

        None
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writer(&'_ self) -> RefMut<'_, Box<dyn std::io::Write>> {
        self.writer.borrow_mut()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Shared handle for work that outlives a borrow of the repository
    pub fn shared_database(&self) -> Arc<Database> {
        self.database.clone()
    }

    /// Resolve a full or abbreviated (at least 4 digits) object id
    pub fn resolve_oid(&self, revision: &str) -> anyhow::Result<ObjectId> {
        let revision = revision.trim();
        if let Ok(oid) = ObjectId::try_parse(revision.to_string()) {
            return Ok(oid);
        }

        if revision.len() < 4 || !revision.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow::anyhow!("not a valid object name: {revision}"));
        }

        let mut candidates = self.database.find_objects_by_prefix(revision)?;
        match candidates.len() {
            0 => Err(anyhow::anyhow!("unknown revision: {revision}")),
            1 => Ok(candidates.remove(0)),
            _ => Err(anyhow::anyhow!(
                "short object ID {revision} is ambiguous ({} candidates)",
                candidates.len()
            )),
        }
    }
}
