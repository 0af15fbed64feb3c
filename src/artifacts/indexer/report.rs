use crate::artifacts::errors::IndexError;
use crate::artifacts::pulls::pull_request::PullRequest;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// A pull request that could not be indexed
#[derive(Debug)]
pub struct IndexFailure {
    pub number: u64,
    pub error: IndexError,
}

impl Serialize for IndexFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut failure = serializer.serialize_struct("IndexFailure", 3)?;
        failure.serialize_field("number", &self.number)?;
        failure.serialize_field("kind", self.error.kind())?;
        failure.serialize_field("message", &self.error.to_string())?;
        failure.end()
    }
}

/// Outcome of one batch, every list sorted by pull request number
///
/// Each pull request of the batch appears in exactly one of the lists.
#[derive(Debug, Default, Serialize)]
pub struct IndexReport {
    pub indexed: Vec<PullRequest>,
    pub failures: Vec<IndexFailure>,
    pub cancelled: Vec<u64>,
}

impl IndexReport {
    pub fn len(&self) -> usize {
        self.indexed.len() + self.failures.len() + self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every pull request was indexed
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    pub fn faults(&self) -> impl Iterator<Item = &IndexFailure> {
        self.failures.iter().filter(|failure| failure.error.is_fault())
    }

    pub(crate) fn sort(&mut self) {
        self.indexed.sort_by_key(|pull| pull.number);
        self.failures.sort_by_key(|failure| failure.number);
        self.cancelled.sort_unstable();
    }
}
