//! First-success fallback bookkeeping.
//!
//! Pure state machine behind [`CompositeTask`](super::CompositeTask): it is
//! told which underlying task finished and whether it succeeded, and answers
//! what to do about it. Index 0 is the most preferred request.

use std::collections::BTreeSet;

/// What the composite should do after an underlying task completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Pass this result to the image handler.
    pub deliver: bool,
    /// Less-preferred tasks to cancel, in index order.
    pub cancel: Vec<usize>,
    /// Every task is resolved; fire the completion handler.
    pub finished: bool,
}

/// Tracks which fallback tasks are still outstanding and which succeeded.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    succeeded: Vec<bool>,
    remaining: BTreeSet<usize>,
    tracks_obsolete: bool,
}

impl FallbackPolicy {
    /// Creates a policy for `count` tasks, all outstanding.
    pub fn new(count: usize) -> Self {
        Self {
            succeeded: vec![false; count],
            remaining: (0..count).collect(),
            tracks_obsolete: true,
        }
    }

    /// Enable or disable obsolescence tracking. Default: enabled.
    ///
    /// Without it every successful result is delivered and nothing is
    /// cancelled.
    pub fn set_tracks_obsolete(&mut self, enabled: bool) {
        self.tracks_obsolete = enabled;
    }

    pub fn tracks_obsolete(&self) -> bool {
        self.tracks_obsolete
    }

    /// Returns true if `index` has not been resolved yet.
    pub fn is_remaining(&self, index: usize) -> bool {
        self.remaining.contains(&index)
    }

    pub fn remaining(&self) -> impl Iterator<Item = usize> + '_ {
        self.remaining.iter().copied()
    }

    pub fn is_finished(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Returns true if a task more preferred than `index` already succeeded.
    pub fn is_obsolete(&self, index: usize) -> bool {
        self.succeeded[..index.min(self.succeeded.len())]
            .iter()
            .any(|s| *s)
    }

    /// Records the completion of task `index`.
    ///
    /// Returns `None` for a task that is no longer outstanding (late or
    /// duplicate signals, or a task this policy already cancelled).
    pub fn complete(&mut self, index: usize, success: bool) -> Option<Resolution> {
        if !self.remaining.remove(&index) {
            return None;
        }
        let obsolete = self.is_obsolete(index);
        if success {
            self.succeeded[index] = true;
        }

        let (deliver, cancel) = if self.tracks_obsolete {
            let cancel = if success {
                let less_preferred: Vec<usize> =
                    self.remaining.range(index + 1..).copied().collect();
                for i in &less_preferred {
                    self.remaining.remove(i);
                }
                less_preferred
            } else {
                Vec::new()
            };
            (success && !obsolete, cancel)
        } else {
            (success, Vec::new())
        };

        Some(Resolution {
            deliver,
            cancel,
            finished: self.remaining.is_empty(),
        })
    }

    /// Resolves every outstanding task, returning their indices.
    pub fn cancel_remaining(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.remaining).into_iter().collect()
    }
}
