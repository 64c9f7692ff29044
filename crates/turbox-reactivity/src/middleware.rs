#![forbid(unsafe_code)]

//! Middleware pipeline around the core dispatcher.
//!
//! A [`Middleware`] turns the next stage of the pipeline into a new stage.
//! The registered list is composed right to left, so the first entry is the
//! outermost wrapper and sees every call first:
//!
//! ```text
//! dispatch = m[0](m[1](... m[n-1](core)))
//! ```
//!
//! Each middleware receives a [`MiddlewareApi`] exposing a snapshot of the
//! current action chain and a re-entrant `dispatch` that goes through the
//! **whole** composed pipeline again.
//!
//! # Invariants
//!
//! 1. The composed chain is rebuilt lazily after every registration.
//! 2. Dispatching while the chain is being composed fails with
//!    [`ReactivityError::Configuration`].
//! 3. Registration during composition fails the same way.
//! 4. Errors raised by any stage propagate unchanged to the caller.

use std::cell::Cell;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use web_time::{Duration, Instant};

use crate::action::Action;
use crate::engine::{Engine, WeakEngine};
use crate::error::{ActionResult, ReactivityError};

/// Outcome of one pipeline stage.
pub enum Dispatched {
    /// The action has already settled.
    Settled(ActionResult),
    /// The action settles when the future completes.
    Pending(LocalBoxFuture<'static, ActionResult>),
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Settled(result) => f.debug_tuple("Settled").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

impl Dispatched {
    /// Whether the result is already available.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }

    /// Await the result regardless of variant.
    pub fn into_future(self) -> LocalBoxFuture<'static, ActionResult> {
        match self {
            Self::Settled(result) => futures::future::ready(result).boxed_local(),
            Self::Pending(pending) => pending,
        }
    }

    /// Observe the result once it is available.
    #[must_use]
    pub fn inspect(self, f: impl FnOnce(&ActionResult) + 'static) -> Self {
        match self {
            Self::Settled(result) => {
                f(&result);
                Self::Settled(result)
            }
            Self::Pending(pending) => Self::Pending(
                pending
                    .map(|result| {
                        f(&result);
                        result
                    })
                    .boxed_local(),
            ),
        }
    }
}

/// A pipeline stage.
pub type Dispatch = Rc<dyn Fn(Action) -> Dispatched>;

/// Capabilities handed to each middleware.
#[derive(Clone)]
pub struct MiddlewareApi {
    engine: WeakEngine,
    ready: Rc<Cell<bool>>,
}

impl std::fmt::Debug for MiddlewareApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareApi")
            .field("ready", &self.ready.get())
            .finish()
    }
}

impl MiddlewareApi {
    /// Snapshot copy of the action-name chain currently being recorded.
    #[must_use]
    pub fn action_chain(&self) -> Vec<String> {
        self.engine
            .upgrade()
            .map(|engine| engine.action_chain())
            .unwrap_or_default()
    }

    /// Dispatch through the full composed pipeline.
    pub fn dispatch(&self, action: Action) -> Dispatched {
        if !self.ready.get() {
            return Dispatched::Settled(Err(ReactivityError::Configuration(
                "dispatching while constructing middleware is not allowed; \
                 other middleware would not be applied to this dispatch"
                    .to_string(),
            )));
        }
        match self.engine.upgrade() {
            Some(engine) => engine.dispatch(action),
            None => Dispatched::Settled(Err(ReactivityError::engine_dropped())),
        }
    }
}

/// An interceptor around dispatch.
///
/// Closures of the shape `Fn(&MiddlewareApi, Dispatch) -> Dispatch` are
/// middleware too.
pub trait Middleware {
    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Wrap `next` into a new stage.
    fn wrap(&self, api: &MiddlewareApi, next: Dispatch) -> Dispatch;
}

impl<F> Middleware for F
where
    F: Fn(&MiddlewareApi, Dispatch) -> Dispatch,
{
    fn wrap(&self, api: &MiddlewareApi, next: Dispatch) -> Dispatch {
        self(api, next)
    }
}

/// Ordered middleware registry and the cached composed chain.
#[derive(Default)]
pub(crate) struct MiddlewarePipeline {
    entries: Vec<Rc<dyn Middleware>>,
    composed: Option<Dispatch>,
    composing: bool,
}

impl MiddlewarePipeline {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|m| m.name().to_string()).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.composed = None;
        self.composing = false;
    }
}

struct ComposingFlag {
    engine: Engine,
}

impl Drop for ComposingFlag {
    fn drop(&mut self) {
        self.engine.inner.pipeline.borrow_mut().composing = false;
    }
}

impl Engine {
    /// Register one middleware.
    ///
    /// With `prepend` set it becomes the outermost stage; otherwise the
    /// innermost, right before the core dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Configuration`] if called while the chain
    /// is being composed.
    pub fn use_middleware(
        &self,
        middleware: impl Middleware + 'static,
        prepend: bool,
    ) -> Result<(), ReactivityError> {
        let middleware: Rc<dyn Middleware> = Rc::new(middleware);
        self.use_middlewares(vec![middleware], prepend)
    }

    /// Register several middleware, keeping their relative order.
    ///
    /// # Errors
    ///
    /// Same as [`use_middleware`](Self::use_middleware).
    pub fn use_middlewares(
        &self,
        middlewares: Vec<Rc<dyn Middleware>>,
        prepend: bool,
    ) -> Result<(), ReactivityError> {
        let mut pipeline = self.inner.pipeline.borrow_mut();
        if pipeline.composing {
            return Err(ReactivityError::Configuration(
                "middleware cannot be registered while the chain is being composed".to_string(),
            ));
        }
        let names: Vec<&str> = middlewares.iter().map(|m| m.name()).collect();
        tracing::debug!(message = "middleware.register", ?names, prepend);
        if prepend {
            let mut entries = middlewares;
            entries.append(&mut pipeline.entries);
            pipeline.entries = entries;
        } else {
            pipeline.entries.extend(middlewares);
        }
        pipeline.composed = None;
        Ok(())
    }

    /// Names of registered middleware, outermost first.
    #[must_use]
    pub fn middleware_names(&self) -> Vec<String> {
        self.inner.pipeline.borrow().names()
    }

    /// Dispatch an action through the composed pipeline.
    pub fn dispatch(&self, action: Action) -> Dispatched {
        match self.composed_dispatch() {
            Ok(dispatch) => dispatch(action),
            Err(err) => Dispatched::Settled(Err(err)),
        }
    }

    fn composed_dispatch(&self) -> Result<Dispatch, ReactivityError> {
        let entries = {
            let mut pipeline = self.inner.pipeline.borrow_mut();
            if let Some(dispatch) = &pipeline.composed {
                return Ok(Rc::clone(dispatch));
            }
            if pipeline.composing {
                return Err(ReactivityError::Configuration(
                    "dispatching while constructing middleware is not allowed".to_string(),
                ));
            }
            pipeline.composing = true;
            pipeline.entries.clone()
        };
        let flag = ComposingFlag {
            engine: self.clone(),
        };

        let ready = Rc::new(Cell::new(false));
        let api = MiddlewareApi {
            engine: self.downgrade(),
            ready: Rc::clone(&ready),
        };
        let weak = self.downgrade();
        let core: Dispatch = Rc::new(move |action| match weak.upgrade() {
            Some(engine) => engine.core_dispatch(action),
            None => Dispatched::Settled(Err(ReactivityError::engine_dropped())),
        });
        let dispatch = entries
            .iter()
            .rev()
            .fold(core, |next, middleware| middleware.wrap(&api, next));

        drop(flag);
        ready.set(true);
        self.inner.pipeline.borrow_mut().composed = Some(Rc::clone(&dispatch));
        tracing::trace!(message = "middleware.compose", stages = entries.len());
        Ok(dispatch)
    }
}

/// Emits one `tracing` event per dispatched action and one per outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn name(&self) -> &str {
        "logger"
    }

    fn wrap(&self, api: &MiddlewareApi, next: Dispatch) -> Dispatch {
        let api = api.clone();
        Rc::new(move |action: Action| {
            let name = action.name().to_string();
            tracing::debug!(
                message = "action.dispatch",
                action = %name,
                display_name = action.display_name(),
                kind = ?action.kind(),
                payload = ?action.payload(),
                chain = ?api.action_chain()
            );
            next(action).inspect(move |result| match result {
                Ok(()) => tracing::debug!(message = "action.settled", action = %name, ok = true),
                Err(err) => {
                    tracing::debug!(message = "action.settled", action = %name, ok = false, error = %err);
                }
            })
        })
    }
}

/// Measures wall time from dispatch to settlement.
///
/// Every action reports `elapsed_us` at `debug`; actions slower than the
/// warn threshold additionally report at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfMiddleware {
    warn_threshold: Option<Duration>,
}

impl PerfMiddleware {
    /// Perf middleware without a warn threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Warn when an action takes longer than `threshold`.
    #[must_use]
    pub fn with_warn_threshold(mut self, threshold: Duration) -> Self {
        self.warn_threshold = Some(threshold);
        self
    }
}

impl Middleware for PerfMiddleware {
    fn name(&self) -> &str {
        "perf"
    }

    fn wrap(&self, _api: &MiddlewareApi, next: Dispatch) -> Dispatch {
        let threshold = self.warn_threshold;
        Rc::new(move |action: Action| {
            let name = action.name().to_string();
            let started = Instant::now();
            next(action).inspect(move |_| {
                let elapsed = started.elapsed();
                let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
                tracing::debug!(message = "action.perf", action = %name, elapsed_us);
                if threshold.is_some_and(|limit| elapsed > limit) {
                    tracing::warn!(message = "action.slow", action = %name, elapsed_us);
                }
            })
        })
    }
}
