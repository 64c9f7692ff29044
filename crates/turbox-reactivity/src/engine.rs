#![forbid(unsafe_code)]

//! The engine-state value.
//!
//! Every list a reactive store needs lives here instead of in process-wide
//! globals: the middleware registry, the dependency collector, the reaction
//! registry, the transaction context stack and the current time-travel
//! instance. [`Engine`] is a cheap `Rc` handle; clones share the same state. Tests
//! build one engine each and never observe one another.
//!
//! Domains, fields and middleware hold a [`WeakEngine`] so that state owned by the
//! engine never keeps the engine alive on its own.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::collector::DepCollector;
use crate::config::EngineConfig;
use crate::dispatcher::TxContext;
use crate::domain::{Domain, DomainContext, DomainId, DomainInner};
use crate::error::ReactivityError;
use crate::field::FieldId;
use crate::middleware::MiddlewarePipeline;
use crate::reaction::{Reaction, ReactionId};
use crate::time_travel::TimeTravel;

pub(crate) struct EngineInner {
    pub(crate) config: RefCell<EngineConfig>,
    initial_config: EngineConfig,
    next_id: Cell<u64>,
    pub(crate) autorun_seq: Cell<u64>,
    domains: RefCell<IndexMap<String, Weak<DomainInner>>>,
    pub(crate) collector: RefCell<DepCollector>,
    pub(crate) reactions: RefCell<IndexMap<ReactionId, Rc<Reaction>>>,
    pub(crate) pipeline: RefCell<MiddlewarePipeline>,
    pub(crate) contexts: RefCell<Vec<TxContext>>,
    pub(crate) current_time_travel: RefCell<Option<TimeTravel>>,
    pub(crate) replaying: Cell<bool>,
}

/// Handle to one isolated reactive store.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Rc<EngineInner>,
}

/// Non-owning engine handle.
#[derive(Clone)]
pub(crate) struct WeakEngine(Weak<EngineInner>);

impl WeakEngine {
    pub(crate) fn upgrade(&self) -> Option<Engine> {
        self.0.upgrade().map(|inner| Engine { inner })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &*self.inner.config.borrow())
            .field("reactions", &self.inner.reactions.borrow().len())
            .field("middleware", &self.inner.pipeline.borrow().len())
            .field("depth", &self.inner.contexts.borrow().len())
            .field("history", &self.inner.current_time_travel.borrow().is_some())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PartialEq for Engine {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Engine {}

impl Engine {
    /// Create an engine with `config`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        tracing::debug!(message = "engine.new", ?config);
        Self {
            inner: Rc::new(EngineInner {
                initial_config: config.clone(),
                config: RefCell::new(config),
                next_id: Cell::new(1),
                autorun_seq: Cell::new(0),
                domains: RefCell::new(IndexMap::new()),
                collector: RefCell::new(DepCollector::new()),
                reactions: RefCell::new(IndexMap::new()),
                pipeline: RefCell::new(MiddlewarePipeline::default()),
                contexts: RefCell::new(Vec::new()),
                current_time_travel: RefCell::new(None),
                replaying: Cell::new(false),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakEngine {
        WeakEngine(Rc::downgrade(&self.inner))
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.inner.config.borrow().clone()
    }

    /// Modify the configuration in place.
    pub fn configure(&self, f: impl FnOnce(&mut EngineConfig)) {
        let mut config = self.inner.config.borrow_mut();
        f(&mut config);
        tracing::debug!(message = "engine.configure", config = ?*config);
    }

    /// Create a domain with default declaration settings.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Invariant`] for an empty name or a name
    /// already held by a live domain.
    pub fn domain(&self, name: &str) -> Result<Domain, ReactivityError> {
        self.domain_with_context(name, DomainContext::default())
    }

    /// Create a domain with explicit declaration settings.
    ///
    /// Action names are qualified by the domain name, so two live domains
    /// never share a name. A name frees up once every handle to its domain,
    /// including the domain's mutations and effects, is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`domain`](Self::domain).
    pub fn domain_with_context(
        &self,
        name: &str,
        context: DomainContext,
    ) -> Result<Domain, ReactivityError> {
        if name.is_empty() {
            return Err(ReactivityError::Invariant(
                "a domain was declared without a name".to_string(),
            ));
        }
        let mut domains = self.inner.domains.borrow_mut();
        domains.retain(|_, live| live.strong_count() > 0);
        if domains.contains_key(name) {
            return Err(ReactivityError::Invariant(format!(
                "domain `{name}` is already declared"
            )));
        }
        let id = DomainId::from_raw(self.next_id());
        tracing::trace!(message = "domain.create", domain = name, id = id.raw());
        let domain = Domain::new(self.downgrade(), id, name, context);
        domains.insert(name.to_string(), domain.downgrade());
        Ok(domain)
    }

    /// Register a read of `field` with the innermost running reaction.
    pub(crate) fn track_read(&self, field: FieldId) {
        self.inner.collector.borrow_mut().record(field);
    }

    /// Whether undo/redo is currently replaying history.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.inner.replaying.get()
    }

    /// Return the engine to its freshly constructed state.
    ///
    /// Restores the initial configuration, disposes every reaction, drops
    /// all middleware and forgets the current time-travel instance. Domains and
    /// fields created earlier stay usable.
    pub fn reset(&self) {
        let reactions = std::mem::take(&mut *self.inner.reactions.borrow_mut());
        for reaction in reactions.values() {
            reaction.mark_disposed();
        }
        self.inner.collector.borrow_mut().clear();
        self.inner.pipeline.borrow_mut().clear();
        self.inner.contexts.borrow_mut().clear();
        let current = self.inner.current_time_travel.borrow_mut().take();
        self.inner.replaying.set(false);
        self.inner.autorun_seq.set(0);
        *self.inner.config.borrow_mut() = self.inner.initial_config.clone();
        tracing::debug!(
            message = "engine.reset",
            reactions = reactions.len(),
            had_history = current.is_some()
        );
        // Runners may own engine handles; drop them after every borrow ends.
        drop(reactions);
        drop(current);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::TimeTravelConfig;

    #[test]
    fn ids_are_unique_per_engine() {
        let engine = Engine::default();
        let a = engine.next_id();
        let b = engine.next_id();
        assert_ne!(a, b);
        assert_eq!(Engine::default().next_id(), a);
    }

    #[test]
    fn configure_mutates_in_place() {
        let engine = Engine::default();
        engine.configure(|c| c.time_travel = TimeTravelConfig::active(3));
        assert_eq!(engine.config().time_travel.max_step_number, 3);
        assert!(engine.config().time_travel.is_active);
    }

    #[test]
    fn reset_restores_the_initial_state() {
        let initial = EngineConfig::default().with_time_travel(TimeTravelConfig::active(9));
        let engine = Engine::new(initial.clone());
        let domain = engine.domain("d").unwrap();
        let value = domain.field("v", 0).unwrap();
        let set = domain
            .mutation("set", {
                let value = value.clone();
                move |v: i32| value.set(v)
            })
            .unwrap();
        let runs = Rc::new(Cell::new(0));
        let disposer = engine.auto_run(
            {
                let (value, runs) = (value.clone(), Rc::clone(&runs));
                move || {
                    let _ = value.get();
                    runs.set(runs.get() + 1);
                }
            },
            None,
        );
        domain.create_history(4).unwrap();
        engine
            .use_middleware(crate::middleware::LoggerMiddleware, true)
            .unwrap();
        assert_eq!(engine.config().time_travel.max_step_number, 4);

        engine.reset();

        assert!(disposer.is_disposed());
        assert!(engine.current_time_travel().is_none());
        assert!(engine.middleware_names().is_empty());
        assert_eq!(engine.config(), initial);
        set.call(1).unwrap();
        assert_eq!(value.get(), 1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn clones_share_state() {
        let engine = Engine::default();
        let other = engine.clone();
        other.configure(|c| c.time_travel.is_active = true);
        assert!(engine.config().time_travel.is_active);
        assert_eq!(engine, other);
        assert_ne!(engine, Engine::default());
    }

    #[test]
    fn weak_handle_does_not_keep_the_engine_alive() {
        let engine = Engine::default();
        let weak = engine.downgrade();
        assert!(weak.upgrade().is_some());
        drop(engine);
        assert!(weak.upgrade().is_none());
    }
}
