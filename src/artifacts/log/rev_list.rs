use crate::artifacts::errors::{IndexError, StoreError};
use crate::artifacts::objects::commit::CommitSnapshot;
use crate::artifacts::objects::object_id::ObjectId;
use bitflags::bitflags;
use chrono::{DateTime, FixedOffset};
use derive_new::new;
use std::collections::{BinaryHeap, HashMap};

/// Which parents of a merge commit the walk follows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalkMode {
    /// Every parent, so commits brought in by merges are produced too
    #[default]
    AllParents,
    /// Only the first parent of each commit
    FirstParent,
}

impl WalkMode {
    fn parents<'c>(&self, commit: &'c CommitSnapshot) -> &'c [ObjectId] {
        match self {
            WalkMode::AllParents => &commit.parents,
            WalkMode::FirstParent => &commit.parents[..commit.parents.len().min(1)],
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct WalkFlags: u8 {
        const ADDED = 0b001;
        const UNINTERESTING = 0b010; // reachable from the target
        const SHOWN = 0b100;
    }
}

/// Commits reachable from `start` but not from `target`
///
/// `start` is produced first (unless it equals `target`, which yields nothing),
/// `target` is never produced. Running out of history without meeting `target`
/// yields one [`IndexError::TargetUnreachable`] and ends the walk.
#[derive(Clone, new)]
pub struct RevList<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> Result<CommitSnapshot, StoreError>,
{
    commit_loader: CommitLoaderFn,
    start: ObjectId,
    target: ObjectId,
    #[new(default)]
    mode: WalkMode,
}

impl<CommitLoaderFn> RevList<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> Result<CommitSnapshot, StoreError>,
{
    pub fn with_mode(mut self, mode: WalkMode) -> Self {
        self.mode = mode;
        self
    }
}

impl<CommitLoaderFn> IntoIterator for RevList<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> Result<CommitSnapshot, StoreError>,
{
    type Item = Result<CommitSnapshot, IndexError>;
    type IntoIter = RevListIntoIter<CommitLoaderFn>;

    fn into_iter(self) -> Self::IntoIter {
        RevListIntoIter {
            commit_loader: self.commit_loader,
            start: self.start,
            target: self.target,
            mode: self.mode,
            queue: BinaryHeap::new(),
            flags: HashMap::new(),
            started: false,
            target_reached: false,
            finished: false,
        }
    }
}

pub struct RevListIntoIter<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> Result<CommitSnapshot, StoreError>,
{
    commit_loader: CommitLoaderFn,
    start: ObjectId,
    target: ObjectId,
    mode: WalkMode,
    queue: BinaryHeap<(DateTime<FixedOffset>, ObjectId)>,
    flags: HashMap<ObjectId, WalkFlags>,
    started: bool,
    target_reached: bool,
    finished: bool,
}

impl<CommitLoaderFn> RevListIntoIter<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> Result<CommitSnapshot, StoreError>,
{
    fn flags_of(&self, oid: &ObjectId) -> WalkFlags {
        self.flags.get(oid).copied().unwrap_or(WalkFlags::empty())
    }

    /// Queue a commit, or re-queue it when it just became uninteresting
    fn add(&mut self, oid: &ObjectId, uninteresting: bool) -> Result<(), StoreError> {
        let current = self.flags_of(oid);
        let mut new = current | WalkFlags::ADDED;
        if uninteresting {
            new |= WalkFlags::UNINTERESTING;
        }

        if new != current {
            let commit = (self.commit_loader)(oid)?;
            self.flags.insert(oid.clone(), new);
            self.queue.push((commit.timestamp, commit.oid));
        }

        Ok(())
    }

    fn has_interesting(&self) -> bool {
        self.queue
            .iter()
            .any(|(_, oid)| !self.flags_of(oid).contains(WalkFlags::UNINTERESTING))
    }

    fn step(&mut self) -> Result<Option<CommitSnapshot>, IndexError> {
        if !self.started {
            self.started = true;
            if self.start == self.target {
                return Ok(None);
            }
            let (start, target) = (self.start.clone(), self.target.clone());
            self.add(&start, false)?;
            self.add(&target, true)?;
        }

        while self.has_interesting() {
            let Some((_, oid)) = self.queue.pop() else {
                break;
            };
            let flags = self.flags_of(&oid);
            if flags.contains(WalkFlags::SHOWN) && !flags.contains(WalkFlags::UNINTERESTING) {
                continue;
            }

            let commit = (self.commit_loader)(&oid)?;
            let uninteresting = flags.contains(WalkFlags::UNINTERESTING);

            for parent in self.mode.parents(&commit) {
                if !uninteresting && *parent == self.target {
                    self.target_reached = true;
                }
                self.add(parent, uninteresting)?;
            }

            if uninteresting {
                continue;
            }

            self.flags.insert(oid, flags | WalkFlags::SHOWN);
            tracing::trace!("rev-list produced {}", commit.oid);
            return Ok(Some(commit));
        }

        if self.target_reached {
            Ok(None)
        } else {
            Err(IndexError::TargetUnreachable {
                start: self.start.clone(),
                target: self.target.clone(),
            })
        }
    }
}

impl<CommitLoaderFn> Iterator for RevListIntoIter<CommitLoaderFn>
where
    CommitLoaderFn: Fn(&ObjectId) -> Result<CommitSnapshot, StoreError>,
{
    type Item = Result<CommitSnapshot, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.step() {
            Ok(Some(commit)) => Some(Ok(commit)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}
