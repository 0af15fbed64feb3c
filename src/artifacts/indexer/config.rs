use derive_new::new;
use std::num::NonZeroUsize;

/// Upper bound of the default worker count; the object store is disk bound
const MAX_DEFAULT_JOBS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct IndexerConfig {
    /// Pull requests indexed at the same time
    jobs: usize,
}

impl IndexerConfig {
    pub fn jobs(&self) -> usize {
        self.jobs.max(1)
    }

    pub fn with_jobs(mut self, jobs: Option<usize>) -> Self {
        if let Some(jobs) = jobs {
            self.jobs = jobs;
        }
        self
    }

    pub fn default_jobs() -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(MAX_DEFAULT_JOBS)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig::new(Self::default_jobs())
    }
}
