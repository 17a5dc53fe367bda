//! Lazy reference resolution.
//!
//! A [`RefSlot`] wraps a stored reference record. Nothing is opened until
//! the slot is dereferenced; the first dereference opens the target (via the
//! read session's per-session cache) and the slot remembers the outcome.
//! Slot states move `Unresolved → Resolving → Resolved | Failed`. The slot
//! lock is not held across the open itself: the first caller parks the slot
//! in `Resolving`, concurrent callers wait on the transition and share that
//! one attempt's outcome.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::io::read::{DatasetHandle, GroupHandle, ReadError, ReadSession};

use super::ReferenceRecord;

/// A resolved reference target.
#[derive(Debug, Clone)]
pub enum ResolvedNode {
    /// The target is a group.
    Group(GroupHandle),
    /// The target is a dataset.
    Dataset(DatasetHandle),
}

impl ResolvedNode {
    /// The target's object id, if present.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on storage failure.
    pub fn object_id(&self) -> Result<Option<String>, ReadError> {
        match self {
            Self::Group(group) => group.object_id(),
            Self::Dataset(dataset) => Ok(dataset.object_id()),
        }
    }

    /// The target's group handle, or [`None`] for a dataset target.
    #[must_use]
    pub fn as_group(&self) -> Option<&GroupHandle> {
        match self {
            Self::Group(group) => Some(group),
            Self::Dataset(_) => None,
        }
    }

    /// The target's dataset handle, or [`None`] for a group target.
    #[must_use]
    pub fn as_dataset(&self) -> Option<&DatasetHandle> {
        match self {
            Self::Group(_) => None,
            Self::Dataset(dataset) => Some(dataset),
        }
    }
}

/// A resolution error.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The external file named by a record's `source` cannot be opened.
    #[error("external file {file} is unavailable: {reason}")]
    ExternalUnavailable {
        /// The record's `source`.
        file: String,
        /// Why the file cannot be opened.
        reason: String,
    },
    /// The record's `path` does not exist in its file.
    #[error("link target {path} is missing in {file}")]
    BrokenLink {
        /// The record's `source`.
        file: String,
        /// The missing target path.
        path: String,
    },
    /// An earlier resolution of this slot failed.
    #[error("reference resolution previously failed: {0}")]
    Failed(String),
    /// A read error while opening the target.
    #[error(transparent)]
    Read(Box<ReadError>),
}

impl From<ReadError> for ResolveError {
    fn from(err: ReadError) -> Self {
        Self::Read(Box::new(err))
    }
}

#[derive(Debug)]
enum SlotState {
    Unresolved,
    Resolving,
    Resolved(ResolvedNode),
    Failed(String),
}

/// A lazily-resolved reference slot.
#[derive(Debug)]
pub struct RefSlot {
    record: ReferenceRecord,
    state: Mutex<SlotState>,
    transition: Condvar,
}

impl RefSlot {
    /// Wrap a stored record in an unresolved slot.
    #[must_use]
    pub fn new(record: ReferenceRecord) -> Self {
        Self {
            record,
            state: Mutex::new(SlotState::Unresolved),
            transition: Condvar::new(),
        }
    }

    /// The stored record.
    #[must_use]
    pub fn record(&self) -> &ReferenceRecord {
        &self.record
    }

    /// Returns true if the slot has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.lock(), SlotState::Resolved(_))
    }

    /// Returns true if a dereference is in flight on another caller.
    #[must_use]
    pub fn is_resolving(&self) -> bool {
        matches!(&*self.state.lock(), SlotState::Resolving)
    }

    /// Dereference the slot, opening the target on first use.
    ///
    /// Concurrent callers share one resolution attempt: while a caller holds
    /// the slot in `Resolving`, the rest wait for the transition and return
    /// its outcome.
    ///
    /// # Errors
    /// Returns a [`ResolveError`] if the target's file is unavailable, the
    /// target path is missing, or a previous attempt already failed.
    pub fn resolve(&self, session: &Arc<ReadSession>) -> Result<ResolvedNode, ResolveError> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                SlotState::Resolved(node) => return Ok(node.clone()),
                SlotState::Failed(reason) => return Err(ResolveError::Failed(reason.clone())),
                SlotState::Resolving => {
                    self.transition.wait(&mut state);
                }
                SlotState::Unresolved => break,
            }
        }
        *state = SlotState::Resolving;
        drop(state);

        let outcome = session.resolve_record(&self.record);

        let mut state = self.state.lock();
        *state = match &outcome {
            Ok(node) => SlotState::Resolved(node.clone()),
            Err(err) => SlotState::Failed(err.to_string()),
        };
        drop(state);
        self.transition.notify_all();
        outcome
    }
}
