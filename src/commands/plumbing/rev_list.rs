use crate::areas::object_store::CommitCache;
use crate::areas::repository::Repository;
use crate::artifacts::log::rev_list::{RevList, WalkMode};

impl Repository {
    /// Print the commits between `start` (inclusive) and `target` (exclusive)
    pub fn rev_list(&self, start: &str, target: &str, mode: WalkMode) -> anyhow::Result<()> {
        let start = self.resolve_oid(start)?;
        let target = self.resolve_oid(target)?;

        let cache = CommitCache::new(self.database());
        let walk = RevList::new(|oid| cache.get_or_load(oid), start, target).with_mode(mode);

        for commit in walk {
            writeln!(self.writer(), "{}", commit?.oid)?;
        }

        Ok(())
    }
}
