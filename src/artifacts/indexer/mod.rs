//! Pull request indexing
//!
//! Annotates pull requests with the files they change:
//!
//! 1. resolve the head and base commits
//! 2. find the merge base with [`BCAFinder`]
//! 3. walk head down to the merge base with [`RevList`] to confirm reachability
//! 4. diff the merge base tree against the head tree with [`TreeDiff`]
//!
//! Pull requests are independent, so a batch runs them on the blocking pool
//! with a bounded number in flight. A failing pull request is reported and
//! never stops its siblings, even when its job panics.

pub mod config;
pub mod report;

use crate::areas::object_store::{CommitCache, ObjectStore};
use crate::artifacts::diff::tree_diff::TreeDiff;
use crate::artifacts::errors::IndexError;
use crate::artifacts::indexer::config::IndexerConfig;
use crate::artifacts::indexer::report::{IndexFailure, IndexReport};
use crate::artifacts::log::rev_list::RevList;
use crate::artifacts::merge::bca_finder::BCAFinder;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::pulls::pull_request::PullRequest;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum Outcome {
    Indexed(PullRequest),
    Failed(IndexFailure),
    Cancelled(u64),
}

pub struct Indexer<S: ObjectStore + ?Sized + 'static> {
    store: Arc<S>,
    config: IndexerConfig,
}

impl<S: ObjectStore + ?Sized + 'static> Indexer<S> {
    pub fn new(store: Arc<S>, config: IndexerConfig) -> Self {
        Indexer { store, config }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Index a single pull request in place
    ///
    /// On success `files` holds the sorted changed paths. On failure the pull
    /// request is left untouched.
    pub fn index_one(&self, pull: &mut PullRequest) -> Result<(), IndexError> {
        let files = changed_files(&*self.store, pull)?;
        pull.files = Some(files);

        Ok(())
    }

    /// Index a batch of pull requests
    ///
    /// Cancelling `cancel` stops pull requests that have not started yet; the
    /// ones already running finish and are kept.
    pub async fn index_all(
        &self,
        pulls: Vec<PullRequest>,
        cancel: CancellationToken,
    ) -> IndexReport {
        let jobs = self.config.jobs();
        tracing::info!("indexing {} pull request(s) with {} job(s)", pulls.len(), jobs);

        let outcomes = futures::stream::iter(pulls)
            .map(|pull| {
                let store = self.store.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return Outcome::Cancelled(pull.number);
                    }
                    Self::spawn_index(store, pull).await
                }
            })
            .buffer_unordered(jobs)
            .collect::<Vec<_>>()
            .await;

        let mut report = IndexReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Indexed(pull) => report.indexed.push(pull),
                Outcome::Failed(failure) => report.failures.push(failure),
                Outcome::Cancelled(number) => report.cancelled.push(number),
            }
        }
        report.sort();

        tracing::info!(
            "indexed {} pull request(s), {} failed, {} cancelled",
            report.indexed.len(),
            report.failures.len(),
            report.cancelled.len()
        );

        report
    }

    async fn spawn_index(store: Arc<S>, mut pull: PullRequest) -> Outcome {
        let number = pull.number;
        let task = tokio::task::spawn_blocking(move || {
            let result = changed_files(&*store, &pull);
            if let Ok(files) = &result {
                pull.files = Some(files.clone());
            }
            (pull, result)
        });

        let error = match task.await {
            Ok((pull, Ok(files))) => {
                tracing::info!("pull request #{} changes {} file(s)", number, files.len());
                return Outcome::Indexed(pull);
            }
            Ok((_, Err(error))) => error,
            Err(join_error) if join_error.is_panic() => IndexError::Panicked {
                number,
                message: panic_message(join_error.into_panic()),
            },
            Err(_) => return Outcome::Cancelled(number),
        };

        if error.is_fault() {
            tracing::error!("pull request #{}: {}", number, error);
        } else {
            tracing::warn!("skipping pull request #{}: {}", number, error);
        }
        Outcome::Failed(IndexFailure { number, error })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&'static str>()
            .map_or_else(|| "unknown panic".to_string(), |message| message.to_string()),
    }
}

/// Paths changed between the merge base of a pull request and its head
fn changed_files<S: ObjectStore + ?Sized>(
    store: &S,
    pull: &PullRequest,
) -> Result<Vec<String>, IndexError> {
    let cache = CommitCache::new(store);
    let resolve = |oid: &ObjectId| {
        cache
            .get_or_load(oid)
            .map_err(|cause| IndexError::PrResolutionFailed {
                number: pull.number,
                cause,
            })
    };
    let head = resolve(&pull.head)?;
    let base = resolve(&pull.base)?;

    let finder = BCAFinder::new(|oid| cache.get_or_load(oid));
    let merge_base = finder.merge_base(&head.oid, &base.oid)?;

    let ahead = RevList::new(|oid| cache.get_or_load(oid), head.oid.clone(), merge_base.clone())
        .into_iter()
        .try_fold(0usize, |count, commit| commit.map(|_| count + 1))?;
    tracing::debug!(
        "pull request #{} is {} commit(s) ahead of {}",
        pull.number,
        ahead,
        merge_base.to_short_oid()
    );

    let base_tree = store.tree_of(&cache.get_or_load(&merge_base)?)?;
    let head_tree = store.tree_of(&head)?;

    let mut tree_diff = TreeDiff::new(store);
    tree_diff.compare(Some(&base_tree), Some(&head_tree))?;

    Ok(tree_diff.changed_paths())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::areas::object_store::MemoryStore;
    use crate::artifacts::errors::StoreError;
    use crate::artifacts::objects::commit::CommitSnapshot;
    use crate::artifacts::objects::tree::TreeSnapshot;
    use crate::artifacts::testing::{CommitGraph, create_oid};
    use pretty_assertions::assert_eq;
    use rstest::*;

    ///   base_1 - main_2 - main_3          (main)
    ///        \
    ///         feat_1 - feat_2             (feature)
    ///
    /// plus a criss-cross pair and an unrelated root
    #[fixture]
    fn repository() -> Arc<MemoryStore> {
        let mut graph = CommitGraph::new();
        graph.add_commit_with_files("base_1", &[], &[("README.md", "hello"), ("src/lib.rs", "lib")]);
        graph.add_commit_with_files(
            "main_2",
            &["base_1"],
            &[("README.md", "hello world"), ("src/lib.rs", "lib")],
        );
        graph.add_commit_with_files(
            "feat_1",
            &["base_1"],
            &[("README.md", "hello"), ("src/lib.rs", "lib v2")],
        );
        graph.add_commit_with_files(
            "feat_2",
            &["feat_1"],
            &[("README.md", "hello"), ("src/lib.rs", "lib v2"), ("src/new.rs", "new")],
        );
        graph.add_commit_with_files(
            "main_3",
            &["main_2"],
            &[("README.md", "hello world"), ("docs/guide.md", "guide"), ("src/lib.rs", "lib")],
        );

        graph.add_commit("cross_b", &["base_1"]);
        graph.add_commit("cross_c", &["base_1"]);
        graph.add_commit("cross_d", &["cross_b", "cross_c"]);
        graph.add_commit("cross_e", &["cross_c", "cross_b"]);

        graph.add_commit_with_files("orphan", &[], &[("other.txt", "x")]);

        Arc::new(graph.into_store())
    }

    fn pull(number: u64, head: &str, base: &str) -> PullRequest {
        PullRequest::new(number, create_oid(head), create_oid(base))
    }

    fn indexer(store: Arc<MemoryStore>, jobs: usize) -> Indexer<MemoryStore> {
        Indexer::new(store, IndexerConfig::new(jobs))
    }

    #[rstest]
    fn indexes_files_changed_since_merge_base(repository: Arc<MemoryStore>) {
        let mut feature = pull(1, "feat_2", "main_3");

        indexer(repository, 1).index_one(&mut feature).unwrap();

        // main's own changes (README.md, docs/) are not part of the pull request
        assert_eq!(
            feature.files,
            Some(vec!["src/lib.rs".to_string(), "src/new.rs".to_string()])
        );
    }

    #[rstest]
    fn head_equal_to_base_changes_nothing(repository: Arc<MemoryStore>) {
        let mut empty = pull(1, "main_3", "main_3");

        indexer(repository, 1).index_one(&mut empty).unwrap();

        assert_eq!(empty.files, Some(vec![]));
    }

    #[rstest]
    fn missing_head_is_a_resolution_failure(repository: Arc<MemoryStore>) {
        let mut missing = pull(4, "not_fetched", "main_3");

        let error = indexer(repository, 1).index_one(&mut missing).unwrap_err();

        assert!(matches!(
            error,
            IndexError::PrResolutionFailed { number: 4, cause: StoreError::ObjectNotFound(_) }
        ));
        assert!(missing.files.is_none());
    }

    #[rstest]
    fn unrelated_histories_have_no_common_ancestor(repository: Arc<MemoryStore>) {
        let mut unrelated = pull(5, "orphan", "main_3");

        let error = indexer(repository, 1).index_one(&mut unrelated).unwrap_err();

        assert_eq!(error.kind(), "no_common_ancestor");
    }

    #[rstest]
    fn criss_cross_is_reported_not_guessed(repository: Arc<MemoryStore>) {
        let mut criss_cross = pull(6, "cross_d", "cross_e");

        let error = indexer(repository, 1).index_one(&mut criss_cross).unwrap_err();

        assert_eq!(error.kind(), "ambiguous_merge_base");
        assert!(criss_cross.files.is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn failing_pull_request_does_not_abort_the_batch(repository: Arc<MemoryStore>) {
        let pulls = vec![
            pull(1, "feat_2", "main_3"),
            pull(2, "not_fetched", "main_3"),
            pull(3, "main_3", "base_1"),
        ];

        let report = indexer(repository, 2)
            .index_all(pulls, CancellationToken::new())
            .await;

        let indexed = report
            .indexed
            .iter()
            .map(|pull| (pull.number, pull.files().to_vec()))
            .collect::<Vec<_>>();
        assert_eq!(
            indexed,
            vec![
                (1, vec!["src/lib.rs".to_string(), "src/new.rs".to_string()]),
                (3, vec!["README.md".to_string(), "docs/guide.md".to_string()]),
            ]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].number, 2);
        assert_eq!(report.failures[0].error.kind(), "pr_resolution_failed");
        assert!(report.cancelled.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn indexing_twice_gives_identical_results(repository: Arc<MemoryStore>) {
        let pulls = vec![
            pull(1, "feat_2", "main_3"),
            pull(3, "main_3", "base_1"),
            pull(6, "cross_d", "cross_e"),
        ];
        let indexer = indexer(repository, 3);

        let first = indexer.index_all(pulls.clone(), CancellationToken::new()).await;
        let second = indexer.index_all(pulls, CancellationToken::new()).await;

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[rstest]
    #[tokio::test]
    async fn cancelled_batch_starts_nothing(repository: Arc<MemoryStore>) {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = indexer(repository, 2)
            .index_all(vec![pull(2, "feat_2", "main_3"), pull(1, "main_3", "base_1")], cancel)
            .await;

        assert!(report.indexed.is_empty());
        assert_eq!(report.cancelled, vec![1, 2]);
    }

    /// Cancels the batch as soon as a given commit is read
    struct CancellingStore {
        inner: Arc<MemoryStore>,
        trigger: ObjectId,
        cancel: CancellationToken,
    }

    impl ObjectStore for CancellingStore {
        fn resolve(&self, oid: &ObjectId) -> Result<CommitSnapshot, StoreError> {
            if *oid == self.trigger {
                self.cancel.cancel();
            }
            self.inner.resolve(oid)
        }

        fn load_tree(&self, oid: &ObjectId) -> Result<TreeSnapshot, StoreError> {
            self.inner.load_tree(oid)
        }
    }

    /// Panics whenever a given commit is read
    struct PanickingStore {
        inner: Arc<MemoryStore>,
        poisoned: ObjectId,
    }

    impl ObjectStore for PanickingStore {
        fn resolve(&self, oid: &ObjectId) -> Result<CommitSnapshot, StoreError> {
            if *oid == self.poisoned {
                panic!("unreadable commit {oid}");
            }
            self.inner.resolve(oid)
        }

        fn load_tree(&self, oid: &ObjectId) -> Result<TreeSnapshot, StoreError> {
            self.inner.load_tree(oid)
        }
    }

    #[rstest]
    #[tokio::test]
    async fn panicking_job_is_a_failure_of_its_pull_request(repository: Arc<MemoryStore>) {
        let store = Arc::new(PanickingStore {
            inner: repository,
            poisoned: create_oid("cross_d"),
        });

        let report = Indexer::new(store, IndexerConfig::new(2))
            .index_all(
                vec![
                    pull(1, "feat_2", "main_3"),
                    pull(6, "cross_d", "cross_e"),
                    pull(3, "main_3", "base_1"),
                ],
                CancellationToken::new(),
            )
            .await;

        let indexed = report.indexed.iter().map(|pull| pull.number).collect::<Vec<_>>();
        assert_eq!(indexed, vec![1, 3]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].number, 6);
        assert_eq!(report.failures[0].error.kind(), "panicked");
        assert!(report.failures[0].error.is_fault());
        assert!(report.failures[0].error.to_string().contains("unreadable commit"));
    }

    #[rstest]
    #[tokio::test]
    async fn cancellation_keeps_finished_work(repository: Arc<MemoryStore>) {
        let cancel = CancellationToken::new();
        let store = Arc::new(CancellingStore {
            inner: repository,
            trigger: create_oid("feat_2"),
            cancel: cancel.clone(),
        });

        let report = Indexer::new(store, IndexerConfig::new(1))
            .index_all(
                vec![
                    pull(1, "feat_2", "main_3"),
                    pull(2, "main_3", "base_1"),
                    pull(3, "feat_1", "base_1"),
                ],
                cancel,
            )
            .await;

        let indexed = report.indexed.iter().map(|pull| pull.number).collect::<Vec<_>>();
        assert_eq!(indexed, vec![1]);
        assert_eq!(report.cancelled, vec![2, 3]);
        assert!(report.failures.is_empty());
    }
}
