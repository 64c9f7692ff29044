#![forbid(unsafe_code)]

//! Reactions: runners re-executed whenever a field they read changes.
//!
//! [`Engine::auto_run`] runs the runner once immediately inside a collector
//! frame, which seeds its dependency set, and registers it with the engine.
//! Each later notification that names one of those fields re-runs it and
//! replaces the dependency set with whatever the new run read.
//!
//! # Invariants
//!
//! 1. A reaction is notified at most once per settled batch.
//! 2. A disposed reaction never runs again and holds no subscriptions.
//! 3. A reaction is never re-entered: a notification that reaches a reaction
//!    while it is running is skipped with a warning.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexSet;

use crate::engine::{Engine, WeakEngine};
use crate::field::FieldId;

/// Engine-unique identifier of a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactionId(u64);

impl ReactionId {
    /// Create an ID from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Options accepted by [`Engine::auto_run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoRunOptions {
    /// Name used in logs. Generated when absent.
    pub name: Option<String>,
}

impl AutoRunOptions {
    /// Options naming the reaction.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

pub(crate) struct Reaction {
    id: ReactionId,
    name: String,
    runner: RefCell<Box<dyn FnMut()>>,
    disposed: Cell<bool>,
    running: Cell<bool>,
}

impl Reaction {
    pub(crate) fn mark_disposed(&self) {
        self.disposed.set(true);
    }
}

/// Handle that stops a reaction.
///
/// Dropping the handle does **not** dispose the reaction.
pub struct Disposer {
    engine: WeakEngine,
    reaction: Rc<Reaction>,
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer")
            .field("id", &self.reaction.id)
            .field("name", &self.reaction.name)
            .field("disposed", &self.reaction.disposed.get())
            .finish()
    }
}

impl Disposer {
    /// Reaction ID.
    #[must_use]
    pub fn id(&self) -> ReactionId {
        self.reaction.id
    }

    /// Reaction name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.reaction.name
    }

    /// Whether the reaction was disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.reaction.disposed.get()
    }

    /// Fields the reaction read on its latest run.
    #[must_use]
    pub fn dependencies(&self) -> Vec<FieldId> {
        self.engine
            .upgrade()
            .map(|engine| {
                engine
                    .inner
                    .collector
                    .borrow()
                    .dependencies(self.reaction.id)
            })
            .unwrap_or_default()
    }

    /// Stop the reaction. Calling this again does nothing.
    pub fn dispose(&self) {
        if self.reaction.disposed.replace(true) {
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            let removed = engine
                .inner
                .reactions
                .borrow_mut()
                .shift_remove(&self.reaction.id);
            engine.inner.collector.borrow_mut().forget(self.reaction.id);
            tracing::debug!(message = "reaction.dispose", reaction = %self.reaction.name);
            drop(removed);
        }
    }
}

/// Ends the collector frame of a run, including when the runner unwinds.
struct RunGuard<'a> {
    engine: &'a Engine,
    reaction: &'a Reaction,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut collector = self.engine.inner.collector.borrow_mut();
        let deps = collector.end();
        if self.reaction.disposed.get() {
            collector.forget(self.reaction.id);
        }
        drop(collector);
        self.reaction.running.set(false);
        tracing::trace!(
            message = "reaction.run",
            reaction = %self.reaction.name,
            deps = deps.len()
        );
    }
}

impl Engine {
    /// Run `runner` now and again whenever a field it read changes.
    ///
    /// Unnamed reactions are called `@@TURBOX__AUTORUN_<n>`.
    pub fn auto_run(
        &self,
        runner: impl FnMut() + 'static,
        options: Option<AutoRunOptions>,
    ) -> Disposer {
        let name = options.and_then(|o| o.name).unwrap_or_else(|| {
            let seq = self.inner.autorun_seq.get();
            self.inner.autorun_seq.set(seq + 1);
            format!("@@TURBOX__AUTORUN_{seq}")
        });
        let reaction = Rc::new(Reaction {
            id: ReactionId::from_raw(self.next_id()),
            name,
            runner: RefCell::new(Box::new(runner)),
            disposed: Cell::new(false),
            running: Cell::new(false),
        });
        self.inner
            .reactions
            .borrow_mut()
            .insert(reaction.id, Rc::clone(&reaction));
        tracing::debug!(message = "reaction.create", reaction = %reaction.name);
        self.run_reaction(&reaction);
        Disposer {
            engine: self.downgrade(),
            reaction,
        }
    }

    /// Number of live reactions.
    #[must_use]
    pub fn reaction_count(&self) -> usize {
        self.inner.reactions.borrow().len()
    }

    fn run_reaction(&self, reaction: &Reaction) {
        if reaction.disposed.get() {
            return;
        }
        if reaction.running.replace(true) {
            tracing::warn!(message = "reaction.reentrant_skip", reaction = %reaction.name);
            return;
        }
        self.inner.collector.borrow_mut().start(reaction.id);
        let _guard = RunGuard {
            engine: self,
            reaction,
        };
        (reaction.runner.borrow_mut())();
    }

    /// Run every live reaction subscribed to any of `touched`, once each.
    pub(crate) fn notify(&self, touched: &IndexSet<FieldId>) {
        if touched.is_empty() {
            return;
        }
        let affected = self.inner.collector.borrow().affected(touched);
        tracing::trace!(
            message = "reaction.notify",
            fields = touched.len(),
            reactions = affected.len()
        );
        for id in affected {
            let reaction = self.inner.reactions.borrow().get(&id).cloned();
            if let Some(reaction) = reaction {
                self.run_reaction(&reaction);
            }
        }
    }
}
