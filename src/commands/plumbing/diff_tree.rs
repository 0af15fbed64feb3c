use crate::areas::repository::Repository;
use crate::artifacts::diff::tree_diff::{DiffFilter, TreeDiff};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use crate::artifacts::objects::tree::TreeSnapshot;

impl Repository {
    /// Print the paths changed between two commits or trees
    pub fn diff_tree(
        &self,
        old: &str,
        new: &str,
        name_status: bool,
        filter: Option<DiffFilter>,
    ) -> anyhow::Result<()> {
        let old_tree = self.peel_to_tree(&self.resolve_oid(old)?)?;
        let new_tree = self.peel_to_tree(&self.resolve_oid(new)?)?;

        let mut tree_diff = TreeDiff::new(self.database());
        tree_diff.compare(Some(&old_tree), Some(&new_tree))?;

        let filter = filter.unwrap_or(DiffFilter::all());
        for (path, change) in tree_diff.changes() {
            if !change.matches_filter(filter) {
                continue;
            }

            if name_status {
                writeln!(self.writer(), "{}\t{}", change.status_char(), path)?;
            } else {
                writeln!(self.writer(), "{path}")?;
            }
        }

        Ok(())
    }

    fn peel_to_tree(&self, oid: &ObjectId) -> anyhow::Result<TreeSnapshot> {
        let database = self.database();

        match database.get_object_type(oid)? {
            ObjectType::Commit => {
                let commit = database.commit_snapshot(oid)?;
                Ok(database.tree_snapshot(&commit.tree_oid)?)
            }
            ObjectType::Tree => Ok(database.tree_snapshot(oid)?),
            other => Err(anyhow::anyhow!("{oid} is a {other}, not a commit or tree")),
        }
    }
}
