use crate::areas::object_store::CommitCache;
use crate::areas::repository::Repository;
use crate::artifacts::merge::bca_finder::BCAFinder;

impl Repository {
    /// Print the merge base of two commits
    ///
    /// Without `all`, anything but exactly one best common ancestor is an error.
    pub fn merge_base(&self, first: &str, second: &str, all: bool) -> anyhow::Result<()> {
        let first = self.resolve_oid(first)?;
        let second = self.resolve_oid(second)?;

        let cache = CommitCache::new(self.database());
        let finder = BCAFinder::new(|oid| cache.get_or_load(oid));

        if all {
            for oid in finder.find_best_common_ancestors(&first, &second)? {
                writeln!(self.writer(), "{oid}")?;
            }
        } else {
            let merge_base = finder.merge_base(&first, &second)?;
            writeln!(self.writer(), "{merge_base}")?;
        }

        Ok(())
    }
}
