#![forbid(unsafe_code)]

//! Domains: named containers of observable fields and declared actions.
//!
//! A domain is built by composition rather than inheritance. Host types hold
//! a [`Domain`] plus the [`Field`]s, [`Mutation`]s and [`Effect`]s declared on
//! it, and opt into the capability traits [`HasObservableFields`] and
//! [`DispatchesActions`] by pointing them at that domain.
//!
//! ```ignore
//! let engine = Engine::default();
//! let domain = engine.domain("counter")?;
//! let value = domain.field("value", 0i64)?;
//! let increment = domain.mutation("increment", {
//!     let value = value.clone();
//!     move |by: i64| value.update(|v| *v += by)
//! })?;
//! increment.call(1)?;
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};

use crate::effect::Effect;
use crate::engine::{Engine, WeakEngine};
use crate::error::{ActionResult, ReactivityError};
use crate::field::{Field, FieldId, FieldOptions};
use crate::mutation::Mutation;
use crate::time_travel::TimeTravel;

/// Engine-unique identifier of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(u64);

impl DomainId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Domain-wide defaults applied to declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainContext {
    /// Whether fields declared with [`Domain::field`] are recorded in history.
    pub is_need_record: bool,
}

impl Default for DomainContext {
    fn default() -> Self {
        Self {
            is_need_record: true,
        }
    }
}

pub(crate) struct DomainInner {
    id: DomainId,
    name: Rc<str>,
    engine: WeakEngine,
    context: DomainContext,
    fields: RefCell<IndexMap<String, FieldId>>,
    actions: RefCell<IndexSet<String>>,
    history: RefCell<Option<TimeTravel>>,
}

/// Handle to a domain. Clones share the same domain.
#[derive(Clone)]
pub struct Domain {
    inner: Rc<DomainInner>,
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.inner.id)
            .field("name", &&*self.inner.name)
            .field("fields", &self.inner.fields.borrow().len())
            .field("actions", &self.inner.actions.borrow().len())
            .finish()
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Domain {}

impl Domain {
    pub(crate) fn new(engine: WeakEngine, id: DomainId, name: &str, context: DomainContext) -> Self {
        Self {
            inner: Rc::new(DomainInner {
                id,
                name: Rc::from(name),
                engine,
                context,
                fields: RefCell::new(IndexMap::new()),
                actions: RefCell::new(IndexSet::new()),
                history: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<DomainInner> {
        Rc::downgrade(&self.inner)
    }

    /// Domain ID.
    #[must_use]
    pub fn id(&self) -> DomainId {
        self.inner.id
    }

    /// Domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The engine this domain dispatches through, while it is alive.
    #[must_use]
    pub fn engine(&self) -> Option<Engine> {
        self.inner.engine.upgrade()
    }

    pub(crate) fn live_engine(&self) -> Result<Engine, ReactivityError> {
        self.engine().ok_or_else(ReactivityError::engine_dropped)
    }

    /// Declaration defaults.
    #[must_use]
    pub fn context(&self) -> DomainContext {
        self.inner.context
    }

    /// Names of declared fields, in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    /// Unique names of declared actions, in declaration order.
    #[must_use]
    pub fn action_names(&self) -> Vec<String> {
        self.inner.actions.borrow().iter().cloned().collect()
    }

    /// Declare an observable field with the domain's default options.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Invariant`] for an empty or duplicate name,
    /// and [`ReactivityError::Configuration`] once the engine is dropped.
    pub fn field<T: Clone + PartialEq + 'static>(
        &self,
        name: &str,
        value: T,
    ) -> Result<Field<T>, ReactivityError> {
        let options = FieldOptions {
            record: self.inner.context.is_need_record,
        };
        self.field_with(name, value, options)
    }

    /// Declare an observable field with explicit options.
    ///
    /// # Errors
    ///
    /// Same as [`field`](Self::field).
    pub fn field_with<T: Clone + PartialEq + 'static>(
        &self,
        name: &str,
        value: T,
        options: FieldOptions,
    ) -> Result<Field<T>, ReactivityError> {
        if name.is_empty() {
            return Err(ReactivityError::Invariant(format!(
                "domain `{}` declared a field without a name",
                self.name()
            )));
        }
        let engine = self.live_engine()?;
        let mut fields = self.inner.fields.borrow_mut();
        if fields.contains_key(name) {
            return Err(ReactivityError::Invariant(format!(
                "field `{name}` is already declared on domain `{}`",
                self.name()
            )));
        }
        let id = FieldId::from_raw(engine.next_id());
        fields.insert(name.to_string(), id);
        Ok(Field::new(
            engine.downgrade(),
            id,
            Rc::clone(&self.inner.name),
            name,
            value,
            options,
        ))
    }

    /// Declare a mutation: a synchronous transaction body.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Invariant`] for an empty or duplicate name.
    pub fn mutation<A, F>(&self, name: &str, body: F) -> Result<Mutation<A>, ReactivityError>
    where
        A: Clone + std::fmt::Debug + 'static,
        F: Fn(A) -> ActionResult + 'static,
    {
        let qualified = self.register_action(name)?;
        Ok(Mutation::new(self.clone(), qualified, body))
    }

    /// Declare an effect: an asynchronous composite transaction body.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Invariant`] for an empty or duplicate name.
    pub fn effect<A, F, Fut>(&self, name: &str, body: F) -> Result<Effect<A>, ReactivityError>
    where
        A: Clone + std::fmt::Debug + 'static,
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = ActionResult> + 'static,
    {
        let qualified = self.register_action(name)?;
        Ok(Effect::new(self.clone(), qualified, body))
    }

    fn register_action(&self, name: &str) -> Result<String, ReactivityError> {
        if name.is_empty() {
            return Err(ReactivityError::Invariant(format!(
                "domain `{}` declared an action without a name",
                self.name()
            )));
        }
        let qualified = format!("{}.{}", self.name(), name);
        if !self.inner.actions.borrow_mut().insert(qualified.clone()) {
            return Err(ReactivityError::Invariant(format!(
                "action `{qualified}` is already declared"
            )));
        }
        Ok(qualified)
    }

    /// Create this domain's time-travel instance and make it current.
    ///
    /// Enables recording on the engine. If the domain already owns an
    /// instance, that instance is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Configuration`] when `max_step_number` is 0
    /// or the engine has been dropped.
    pub fn create_history(&self, max_step_number: usize) -> Result<TimeTravel, ReactivityError> {
        if let Some(existing) = self.history() {
            return Ok(existing);
        }
        let engine = self.live_engine()?;
        let history = engine.create_time_travel(max_step_number)?;
        engine.configure(|config| {
            config.time_travel.is_active = true;
            config.time_travel.max_step_number = max_step_number;
        });
        engine.switch_time_travel(&history);
        *self.inner.history.borrow_mut() = Some(history.clone());
        Ok(history)
    }

    /// This domain's time-travel instance, if created.
    #[must_use]
    pub fn history(&self) -> Option<TimeTravel> {
        self.inner.history.borrow().clone()
    }
}

/// Capability: the type exposes observable state through a domain.
pub trait HasObservableFields {
    /// The domain holding this type's fields.
    fn domain(&self) -> &Domain;

    /// Declared field names.
    fn field_names(&self) -> Vec<String> {
        self.domain().field_names()
    }

    /// Whether a field named `name` was declared.
    fn has_field(&self, name: &str) -> bool {
        self.domain().inner.fields.borrow().contains_key(name)
    }
}

/// Capability: the type dispatches actions and may own history.
pub trait DispatchesActions: HasObservableFields {
    /// Declared action names.
    fn action_names(&self) -> Vec<String> {
        self.domain().action_names()
    }

    /// See [`Domain::create_history`].
    ///
    /// # Errors
    ///
    /// Same as [`Domain::create_history`].
    fn create_history(&self, max_step_number: usize) -> Result<TimeTravel, ReactivityError> {
        self.domain().create_history(max_step_number)
    }

    /// See [`Domain::history`].
    fn history(&self) -> Option<TimeTravel> {
        self.domain().history()
    }
}

impl HasObservableFields for Domain {
    fn domain(&self) -> &Domain {
        self
    }
}

impl DispatchesActions for Domain {}
