#![forbid(unsafe_code)]

//! Actions: the runtime record of one dispatched mutation or effect.
//!
//! An [`Action`] is created fresh for every call of a declared mutation or
//! effect and is immutable afterwards. Middleware receives it, may inspect or
//! re-dispatch it, and the core dispatcher finally runs its body.
//!
//! [`CompositeAction`] is the host-driven variant: a named action opened by
//! hand, fed by several closures, then completed or aborted as one unit.

use std::any::Any;
use std::cell::Cell;
use std::fmt::Debug;
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::domain::Domain;
use crate::engine::Engine;
use crate::error::{ActionResult, ReactivityError};
use crate::trigger::Batch;

/// Display name used when a declaration does not provide one.
pub const EMPTY_ACTION_NAME: &str = "@@TURBOX__EMPTY_ACTION_NAME";

/// What kind of body an action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Synchronous, atomic state transaction.
    Mutation,
    /// Asynchronous composite transaction.
    Effect,
}

/// Classification of the transaction currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialKind {
    /// No transaction on the stack.
    #[default]
    Default,
    /// Inside a mutation body.
    Mutation,
    /// Inside an effect body.
    Effect,
}

impl From<ActionKind> for MaterialKind {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Mutation => Self::Mutation,
            ActionKind::Effect => Self::Effect,
        }
    }
}

trait PayloadValue: Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Debug> PayloadValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased argument bundle of an action.
#[derive(Clone)]
pub struct Payload(Rc<dyn PayloadValue>);

impl Payload {
    /// Wrap an argument value.
    #[must_use]
    pub fn new<T: Any + Debug>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrow the arguments as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }
}

impl Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Body of a mutation action.
pub type MutationBody = Rc<dyn Fn(&Payload) -> ActionResult>;

/// Body of an effect action.
pub type EffectBody = Rc<dyn Fn(&Payload) -> LocalBoxFuture<'static, ActionResult>>;

/// The callable an action executes.
#[derive(Clone)]
pub enum ActionBody {
    Mutation(MutationBody),
    Effect(EffectBody),
}

impl ActionBody {
    /// Kind of action this body belongs to.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Mutation(_) => ActionKind::Mutation,
            Self::Effect(_) => ActionKind::Effect,
        }
    }
}

/// Owned, body-less description of an action, kept by history and hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub name: String,
    pub display_name: String,
    pub kind: ActionKind,
    pub domain: String,
}

/// One dispatched mutation or effect invocation.
#[derive(Clone)]
pub struct Action {
    name: Rc<str>,
    display_name: Rc<str>,
    payload: Payload,
    domain: Domain,
    body: ActionBody,
}

impl Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &&*self.name)
            .field("display_name", &&*self.display_name)
            .field("kind", &self.kind())
            .field("payload", &self.payload)
            .field("domain", &self.domain.name())
            .finish()
    }
}

impl Action {
    pub(crate) fn new(
        name: Rc<str>,
        display_name: Rc<str>,
        payload: Payload,
        domain: Domain,
        body: ActionBody,
    ) -> Self {
        Self {
            name,
            display_name,
            payload,
            domain,
            body,
        }
    }

    /// Unique action name (`domain.method`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Call arguments.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Owning domain.
    #[must_use]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The callable this action runs.
    #[must_use]
    pub fn body(&self) -> &ActionBody {
        &self.body
    }

    /// Mutation or effect.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.body.kind()
    }

    /// The same action with different arguments.
    #[must_use]
    pub fn with_payload(&self, payload: Payload) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }

    /// Body-less description of this action.
    #[must_use]
    pub fn record(&self) -> ActionRecord {
        ActionRecord {
            name: self.name.to_string(),
            display_name: self.display_name.to_string(),
            kind: self.kind(),
            domain: self.domain.name().to_string(),
        }
    }
}

/// A named action opened by the host and settled explicitly.
///
/// Every closure passed to [`execute`](Self::execute) runs inside the same
/// batch, so mutations called from it join this action instead of settling
/// on their own. [`complete`](Self::complete) records one history entry and
/// notifies once; [`abort`](Self::abort) skips the history entry. Writes are
/// never rolled back by an abort.
///
/// Dropping an open composite action aborts it.
pub struct CompositeAction {
    engine: Engine,
    batch: Rc<Batch>,
    open: Cell<bool>,
}

impl Debug for CompositeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeAction")
            .field("name", &self.batch.root().name)
            .field("open", &self.open.get())
            .finish()
    }
}

impl CompositeAction {
    pub(crate) fn new(engine: Engine, batch: Rc<Batch>) -> Self {
        Self {
            engine,
            batch,
            open: Cell::new(true),
        }
    }

    /// Name this action was created with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.batch.root().name
    }

    /// Whether the action still accepts work.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    /// Action names executed inside this action so far.
    #[must_use]
    pub fn action_chain(&self) -> Vec<String> {
        self.batch.chain()
    }

    /// Run `f` inside this action's transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Aborted`] once the action was completed or
    /// aborted.
    pub fn execute<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReactivityError> {
        if !self.open.get() {
            return Err(ReactivityError::Aborted(self.name().to_string()));
        }
        let _scope = self.engine.enter_composite(Rc::clone(&self.batch));
        Ok(f())
    }

    /// Settle the action: record history and notify reactions.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Aborted`] if already settled.
    pub fn complete(&self) -> ActionResult {
        self.finish(true)
    }

    /// Discard the action: notify reactions of what was written, but record
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Aborted`] if already settled.
    pub fn abort(&self) -> ActionResult {
        self.finish(false)
    }

    fn finish(&self, commit: bool) -> ActionResult {
        if !self.open.replace(false) {
            return Err(ReactivityError::Aborted(self.name().to_string()));
        }
        self.engine.settle(&self.batch, commit);
        Ok(())
    }
}

impl Drop for CompositeAction {
    fn drop(&mut self) {
        if self.open.get() {
            tracing::warn!(
                message = "action.dropped_open",
                action = %self.batch.root().name
            );
            let _ = self.finish(false);
        }
    }
}
