#![forbid(unsafe_code)]

//! Dependency collector: records which fields a reaction reads.
//!
//! # Design
//!
//! Tracking is a stack of frames. [`DepCollector::start`] pushes a frame for a
//! reaction and [`DepCollector::end`] pops it. Reads always land in the
//! innermost frame, so an outer collection paused by a nested one resumes
//! untouched once the nested frame is popped.
//!
//! The collector keeps both directions of the subscription graph:
//! `forward` (reaction -> fields) and `reverse` (field -> reactions). Ending a
//! frame fully replaces the reaction's previous dependency set.
//!
//! # Invariants
//!
//! 1. `reverse[f]` contains `r` iff `forward[r]` contains `f`.
//! 2. Dependencies are never accreted across runs.
//! 3. Subscriber iteration order is subscription order.

use ahash::AHashMap;
use indexmap::IndexSet;

use crate::field::FieldId;
use crate::reaction::ReactionId;

struct Frame {
    reaction: ReactionId,
    deps: IndexSet<FieldId>,
}

/// Reverse index from observable fields to the reactions that read them.
#[derive(Default)]
pub struct DepCollector {
    frames: Vec<Frame>,
    forward: AHashMap<ReactionId, IndexSet<FieldId>>,
    reverse: AHashMap<FieldId, IndexSet<ReactionId>>,
}

impl std::fmt::Debug for DepCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepCollector")
            .field("depth", &self.frames.len())
            .field("reactions", &self.forward.len())
            .field("fields", &self.reverse.len())
            .finish()
    }
}

impl DepCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin collecting reads on behalf of `reaction`.
    pub fn start(&mut self, reaction: ReactionId) {
        self.frames.push(Frame {
            reaction,
            deps: IndexSet::new(),
        });
    }

    /// Whether a collection is in progress.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Number of nested collections currently open.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Register a read of `field` with the innermost frame.
    pub fn record(&mut self, field: FieldId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.deps.insert(field);
        }
    }

    /// Stop the innermost collection and make its reads the reaction's
    /// complete dependency set. Returns the collected set.
    pub fn end(&mut self) -> IndexSet<FieldId> {
        let Some(frame) = self.frames.pop() else {
            return IndexSet::new();
        };
        self.replace(frame.reaction, frame.deps.clone());
        frame.deps
    }

    /// Replace `reaction`'s subscriptions with `deps`.
    pub fn replace(&mut self, reaction: ReactionId, deps: IndexSet<FieldId>) {
        self.unlink(reaction);
        for field in &deps {
            self.reverse.entry(*field).or_default().insert(reaction);
        }
        self.forward.insert(reaction, deps);
    }

    /// Drop every subscription held by `reaction`. Idempotent.
    pub fn forget(&mut self, reaction: ReactionId) {
        self.unlink(reaction);
        self.forward.remove(&reaction);
    }

    fn unlink(&mut self, reaction: ReactionId) {
        let Some(old) = self.forward.get(&reaction) else {
            return;
        };
        for field in old {
            if let Some(subscribers) = self.reverse.get_mut(field) {
                subscribers.shift_remove(&reaction);
                if subscribers.is_empty() {
                    self.reverse.remove(field);
                }
            }
        }
    }

    /// Reactions subscribed to `field`, in subscription order.
    #[must_use]
    pub fn subscribers(&self, field: FieldId) -> Vec<ReactionId> {
        self.reverse
            .get(&field)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Union of the subscribers of every field in `fields`, deduplicated and
    /// ordered by first appearance.
    #[must_use]
    pub fn affected<'a>(&self, fields: impl IntoIterator<Item = &'a FieldId>) -> IndexSet<ReactionId> {
        let mut out = IndexSet::new();
        for field in fields {
            if let Some(subscribers) = self.reverse.get(field) {
                out.extend(subscribers.iter().copied());
            }
        }
        out
    }

    /// Current dependency set of `reaction`.
    #[must_use]
    pub fn dependencies(&self, reaction: ReactionId) -> Vec<FieldId> {
        self.forward
            .get(&reaction)
            .map(|d| d.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop every frame and subscription.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.forward.clear();
        self.reverse.clear();
    }
}
