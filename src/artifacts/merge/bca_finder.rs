//! Best common ancestor (merge base) finder
//!
//! Finds the best common ancestor(s) of two commits: the commit a pull request
//! branch was forked from, and the base of its diff.
//!
//! ## Algorithm Overview
//!
//! The implementation uses a two-phase algorithm:
//!
//! ### Phase 1: Find All Common Ancestors
//!
//! A bidirectional graph traversal explores the history of both input commits:
//! - Process commits newest first (max-heap on committer timestamp, then oid)
//! - Paint commits as visited from the source side, the target side, or both
//! - When a commit is painted from both sides, record it as a candidate
//! - Paint the ancestors of a candidate as STALE to prune the search space
//! - Stop as soon as every queued commit is stale
//!
//! ### Phase 2: Filter to Best Common Ancestors
//!
//! Apply the **Best Common Ancestor (BCA) Invariant**:
//! > A best common ancestor of commits X and Y is any common ancestor of X and Y
//! > that is not an ancestor of any other common ancestor.
//!
//! A candidate is dropped when another candidate reaches it through its parents.
//! Whatever is left is returned sorted by oid, so results never depend on hash
//! map iteration or on which path the traversal explored first.
//!
//! ## Supported Scenarios
//!
//! - Linear histories (ancestor-descendant relationships)
//! - Simple two-way merges and octopus merges
//! - Criss-cross merges with multiple common ancestors
//! - Diamond-shaped merge patterns
//! - Unrelated histories (no common ancestor at all)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let finder = BCAFinder::new(|commit_id| cache.get_or_load(commit_id));
//!
//! let merge_base = finder.merge_base(&head, &base)?;
//! ```
//!
//! Traversal details are logged at `trace` level under this module's target.

use crate::artifacts::errors::{IndexError, StoreError};
use crate::artifacts::objects::commit::CommitSnapshot;
use crate::artifacts::objects::object_id::ObjectId;
use bitflags::bitflags;
use chrono::{DateTime, FixedOffset};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Hash)]
    struct VisitState: u8 {
        const NONE = 0b00;
        const VISITED_FROM_SOURCE = 0b01;
        const VISITED_FROM_TARGET = 0b10;
        const VISITED_FROM_BOTH = Self::VISITED_FROM_SOURCE.bits() | Self::VISITED_FROM_TARGET.bits();
        const STALE = 0b100; // ancestor of a common ancestor, never a best one
        const RESULT = 0b1000; // reached from both sides
    }
}

impl fmt::Debug for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.contains(VisitState::VISITED_FROM_SOURCE) {
            flags.push("SOURCE");
        }
        if self.contains(VisitState::VISITED_FROM_TARGET) {
            flags.push("TARGET");
        }
        if self.contains(VisitState::STALE) {
            flags.push("STALE");
        }
        if self.contains(VisitState::RESULT) {
            flags.push("RESULT");
        }
        if flags.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}

impl fmt::Display for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

type QueueItem = (DateTime<FixedOffset>, ObjectId);

/// Finds best common ancestors between commits
///
/// Generic over the function used to load commits, so the same algorithm runs
/// against the on-disk database, a per-job cache, or an in-memory fixture.
///
/// # Type Parameters
///
/// * `CommitLoaderFn` - Loads the snapshot (parents and timestamp) of a commit.
///   Any error it returns aborts the search and is passed through unchanged.
pub struct BCAFinder<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> Result<CommitSnapshot, StoreError>,
{
    commit_loader: CommitLoaderFn,
}

impl<CommitLoaderFn> BCAFinder<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> Result<CommitSnapshot, StoreError>,
{
    pub fn new(commit_loader: CommitLoaderFn) -> Self {
        Self { commit_loader }
    }

    /// Resolve the single merge base of `head` and `base`
    ///
    /// # Errors
    ///
    /// * [`IndexError::NoCommonAncestor`] when the histories are unrelated
    /// * [`IndexError::AmbiguousMergeBase`] when more than one best common
    ///   ancestor exists (criss-cross merges); the candidates are listed sorted
    /// * [`IndexError::Store`] when a commit cannot be loaded
    pub fn merge_base(&self, head: &ObjectId, base: &ObjectId) -> Result<ObjectId, IndexError> {
        let mut candidates = self.find_best_common_ancestors(head, base)?;

        match candidates.len() {
            0 => Err(IndexError::NoCommonAncestor {
                head: head.clone(),
                base: base.clone(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(IndexError::AmbiguousMergeBase {
                head: head.clone(),
                base: base.clone(),
                candidates,
            }),
        }
    }

    /// Finds all best common ancestors between two commits, sorted by oid
    ///
    /// An empty result means the commits share no history.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// // Linear history: A <- B <- C <- D
    /// let bcas = finder.find_best_common_ancestors(&b, &d)?;
    /// assert_eq!(bcas, vec![b]);
    ///
    /// // Criss-cross merge:
    /// //     A
    /// //    / \
    /// //   B   C
    /// //   |\ /|
    /// //   | X |
    /// //   |/ \|
    /// //   D   E
    /// let bcas = finder.find_best_common_ancestors(&d, &e)?;
    /// // Returns both B and C
    /// ```
    pub fn find_best_common_ancestors(
        &self,
        source_commit_id: &ObjectId,
        target_commit_id: &ObjectId,
    ) -> Result<Vec<ObjectId>, StoreError> {
        let common_ancestors = self.find_common_ancestors(source_commit_id, target_commit_id)?;

        tracing::trace!(
            "common ancestors of {} and {}: [{}]",
            source_commit_id,
            target_commit_id,
            join_oids(&common_ancestors)
        );

        let mut best_common_ancestors = self.remove_redundant(common_ancestors)?;
        best_common_ancestors.sort();

        tracing::debug!(
            "best common ancestors of {} and {}: [{}]",
            source_commit_id.to_short_oid(),
            target_commit_id.to_short_oid(),
            join_oids(&best_common_ancestors)
        );

        Ok(best_common_ancestors)
    }

    /// Phase 1: paint both histories and collect the non-stale meeting points
    fn find_common_ancestors(
        &self,
        source_commit_id: &ObjectId,
        target_commit_id: &ObjectId,
    ) -> Result<Vec<ObjectId>, StoreError> {
        // both commits must exist even when they are equal
        let source_commit = (self.commit_loader)(source_commit_id)?;
        if source_commit_id == target_commit_id {
            return Ok(vec![source_commit.oid]);
        }
        let target_commit = (self.commit_loader)(target_commit_id)?;

        let mut ancestors_states = HashMap::<ObjectId, VisitState>::new();
        let mut priority_queue = BinaryHeap::<QueueItem>::new();

        ancestors_states.insert(source_commit.oid.clone(), VisitState::VISITED_FROM_SOURCE);
        priority_queue.push((source_commit.timestamp, source_commit.oid));
        ancestors_states.insert(target_commit.oid.clone(), VisitState::VISITED_FROM_TARGET);
        priority_queue.push((target_commit.timestamp, target_commit.oid));

        while Self::has_non_stale(&priority_queue, &ancestors_states) {
            let Some((_, commit_id)) = priority_queue.pop() else {
                break;
            };
            let current_state = ancestors_states
                .get(&commit_id)
                .copied()
                .unwrap_or(VisitState::NONE);

            tracing::trace!("processing commit {}: state={}", commit_id, current_state);

            if current_state.contains(VisitState::STALE) {
                continue;
            }

            let is_common_ancestor = current_state.contains(VisitState::VISITED_FROM_BOTH);
            if is_common_ancestor {
                ancestors_states.insert(commit_id.clone(), current_state | VisitState::RESULT);
            }

            let current_commit = (self.commit_loader)(&commit_id)?;
            let inherited = current_state & VisitState::VISITED_FROM_BOTH;

            for parent_id in &current_commit.parents {
                let parent_state = ancestors_states
                    .get(parent_id)
                    .copied()
                    .unwrap_or(VisitState::NONE);

                let mut new_state = parent_state | inherited;
                if is_common_ancestor {
                    new_state |= VisitState::STALE;
                }

                if new_state != parent_state {
                    let parent_commit = (self.commit_loader)(parent_id)?;
                    ancestors_states.insert(parent_id.clone(), new_state);
                    priority_queue.push((parent_commit.timestamp, parent_id.clone()));
                }
            }
        }

        Ok(ancestors_states
            .into_iter()
            .filter(|(_, state)| {
                state.contains(VisitState::RESULT) && !state.contains(VisitState::STALE)
            })
            .map(|(oid, _)| oid)
            .collect())
    }

    fn has_non_stale(
        priority_queue: &BinaryHeap<QueueItem>,
        ancestors_states: &HashMap<ObjectId, VisitState>,
    ) -> bool {
        priority_queue.iter().any(|(_, oid)| {
            !ancestors_states
                .get(oid)
                .is_some_and(|state| state.contains(VisitState::STALE))
        })
    }

    /// Phase 2: drop every candidate reachable from another candidate
    fn remove_redundant(&self, candidates: Vec<ObjectId>) -> Result<Vec<ObjectId>, StoreError> {
        if candidates.len() < 2 {
            return Ok(candidates);
        }

        let mut redundant = HashSet::<ObjectId>::new();
        for candidate in &candidates {
            if redundant.contains(candidate) {
                continue;
            }

            let ancestors = self.strict_ancestors(candidate)?;
            for other in &candidates {
                if other != candidate && ancestors.contains(other) {
                    tracing::trace!("{} is an ancestor of {}, dropping it", other, candidate);
                    redundant.insert(other.clone());
                }
            }
        }

        Ok(candidates
            .into_iter()
            .filter(|candidate| !redundant.contains(candidate))
            .collect())
    }

    /// Every commit reachable from `commit_id` through parent links, excluding itself
    fn strict_ancestors(&self, commit_id: &ObjectId) -> Result<HashSet<ObjectId>, StoreError> {
        let mut ancestors = HashSet::new();
        let mut pending = (self.commit_loader)(commit_id)?.parents;

        while let Some(oid) = pending.pop() {
            if !ancestors.insert(oid.clone()) {
                continue;
            }
            pending.extend((self.commit_loader)(&oid)?.parents);
        }

        Ok(ancestors)
    }
}

fn join_oids(oids: &[ObjectId]) -> String {
    oids.iter()
        .map(|oid| oid.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}
