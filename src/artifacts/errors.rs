//! Error taxonomy of the indexing core
//!
//! `StoreError` covers reading the object store, `IndexError` everything that can
//! go wrong while indexing one pull request. Both are scoped to a single pull
//! request except `StoreError::Open`, which stops a batch before it starts.

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store does not hold the object; only re-syncing the clone helps
    #[error("object {0} not found in the object store")]
    ObjectNotFound(ObjectId),

    #[error("object {oid} is a {actual}, expected a {expected}")]
    UnexpectedType {
        oid: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error("object {oid} is corrupt: {source:#}")]
    Corrupt {
        oid: ObjectId,
        #[source]
        source: anyhow::Error,
    },

    #[error("unable to open object store at {path}: {reason}")]
    Open { path: PathBuf, reason: String },
}

impl StoreError {
    pub fn corrupt(oid: &ObjectId, source: impl Into<anyhow::Error>) -> Self {
        StoreError::Corrupt {
            oid: oid.clone(),
            source: source.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    /// The head or base commit of a pull request could not be read
    #[error("unable to resolve commits of pull request #{number}: {cause}")]
    PrResolutionFailed {
        number: u64,
        #[source]
        cause: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{head} and {base} have no common ancestor")]
    NoCommonAncestor { head: ObjectId, base: ObjectId },

    #[error("{head} and {base} have {} merge bases: {}", .candidates.len(), short_list(.candidates))]
    AmbiguousMergeBase {
        head: ObjectId,
        base: ObjectId,
        candidates: Vec<ObjectId>,
    },

    /// The merge base is not an ancestor of the walked commit. Never expected
    /// once a merge base was found, so it points at a store or logic fault.
    #[error("internal consistency fault: {target} is not reachable from {start}")]
    TargetUnreachable { start: ObjectId, target: ObjectId },

    /// The indexing job itself panicked
    #[error("indexing pull request #{number} panicked: {message}")]
    Panicked { number: u64, message: String },
}

impl IndexError {
    /// Faults indicate broken invariants rather than unusual data
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            IndexError::TargetUnreachable { .. } | IndexError::Panicked { .. }
        )
    }

    /// Stable machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            IndexError::PrResolutionFailed { .. } => "pr_resolution_failed",
            IndexError::Store(StoreError::ObjectNotFound(_)) => "object_not_found",
            IndexError::Store(_) => "store",
            IndexError::NoCommonAncestor { .. } => "no_common_ancestor",
            IndexError::AmbiguousMergeBase { .. } => "ambiguous_merge_base",
            IndexError::TargetUnreachable { .. } => "target_unreachable",
            IndexError::Panicked { .. } => "panicked",
        }
    }
}

fn short_list(oids: &[ObjectId]) -> String {
    oids.iter()
        .map(|oid| oid.to_short_oid())
        .collect::<Vec<_>>()
        .join(", ")
}
