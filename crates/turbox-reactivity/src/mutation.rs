#![forbid(unsafe_code)]

//! Declared mutations.
//!
//! A [`Mutation<A>`] wraps a synchronous body taking arguments `A`. Calling it
//! builds an [`Action`], sends it through the middleware pipeline and returns
//! once the action has fully settled.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::rc::Rc;

use futures::FutureExt;

use crate::action::{Action, ActionBody, EMPTY_ACTION_NAME, MutationBody, Payload};
use crate::domain::Domain;
use crate::error::{ActionResult, ReactivityError};
use crate::middleware::Dispatched;

/// Handle to a declared mutation.
pub struct Mutation<A> {
    domain: Domain,
    name: Rc<str>,
    display_name: Rc<str>,
    body: MutationBody,
    _args: PhantomData<fn(A)>,
}

impl<A> Clone for Mutation<A> {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            name: Rc::clone(&self.name),
            display_name: Rc::clone(&self.display_name),
            body: Rc::clone(&self.body),
            _args: PhantomData,
        }
    }
}

impl<A> Debug for Mutation<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &&*self.name)
            .field("display_name", &&*self.display_name)
            .finish()
    }
}

impl<A: Clone + Debug + 'static> Mutation<A> {
    pub(crate) fn new<F>(domain: Domain, name: String, body: F) -> Self
    where
        F: Fn(A) -> ActionResult + 'static,
    {
        let action_name = name.clone();
        let body: MutationBody = Rc::new(move |payload: &Payload| {
            let args = payload.downcast_ref::<A>().cloned().ok_or_else(|| {
                ReactivityError::PayloadMismatch {
                    action: action_name.clone(),
                    expected: std::any::type_name::<A>(),
                }
            })?;
            body(args)
        });
        Self {
            domain,
            name: Rc::from(name),
            display_name: Rc::from(EMPTY_ACTION_NAME),
            body,
            _args: PhantomData,
        }
    }

    /// Attach a human-readable name shown by middleware and history hooks.
    #[must_use]
    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = Rc::from(display_name);
        self
    }

    /// Unique action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Build the action a call with `args` would dispatch.
    #[must_use]
    pub fn action(&self, args: A) -> Action {
        Action::new(
            Rc::clone(&self.name),
            Rc::clone(&self.display_name),
            Payload::new(args),
            self.domain.clone(),
            ActionBody::Mutation(Rc::clone(&self.body)),
        )
    }

    /// Dispatch the mutation and wait for it to settle.
    ///
    /// Called from inside another transaction, the mutation joins that
    /// transaction and defers notification and history to it.
    ///
    /// # Errors
    ///
    /// Propagates body and middleware errors, and returns
    /// [`ReactivityError::MutationSuspended`] if the pipeline left the call
    /// pending.
    pub fn call(&self, args: A) -> ActionResult {
        let engine = self.domain.live_engine()?;
        let action = self.action(args);
        match engine.dispatch(action) {
            Dispatched::Settled(result) => result,
            Dispatched::Pending(pending) => pending
                .now_or_never()
                .unwrap_or_else(|| Err(ReactivityError::MutationSuspended(self.name.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::engine::Engine;

    #[test]
    fn call_applies_writes() {
        let engine = Engine::default();
        let domain = engine.domain("counter").unwrap();
        let value = domain.field("value", 0).unwrap();
        let add = domain
            .mutation("add", {
                let value = value.clone();
                move |by: i32| value.update(|v| *v += by)
            })
            .unwrap();
        add.call(5).unwrap();
        add.call(2).unwrap();
        assert_eq!(value.get(), 7);
        assert_eq!(add.name(), "counter.add");
        assert_eq!(add.display_name(), EMPTY_ACTION_NAME);
    }

    #[test]
    fn body_errors_reach_the_caller_and_unwind_the_context() {
        let engine = Engine::default();
        let domain = engine.domain("d").unwrap();
        let fail = domain
            .mutation("fail", |_: ()| Err(ReactivityError::body("nope")))
            .unwrap();
        assert_eq!(fail.call(()).unwrap_err().to_string(), "nope");
        assert!(!engine.is_in_transaction());
    }

    #[test]
    fn nested_call_joins_the_outer_transaction() {
        let engine = Engine::default();
        let domain = engine.domain("d").unwrap();
        let a = domain.field("a", 0).unwrap();
        let b = domain.field("b", 0).unwrap();
        let set_b = domain
            .mutation("set_b", {
                let b = b.clone();
                move |v: i32| b.set(v)
            })
            .unwrap();
        let set_both = domain
            .mutation("set_both", {
                let a = a.clone();
                let set_b = set_b.clone();
                move |v: i32| {
                    a.set(v)?;
                    set_b.call(v)
                }
            })
            .unwrap();

        let runs = Rc::new(Cell::new(0));
        let _disposer = engine.auto_run(
            {
                let runs = Rc::clone(&runs);
                let (a, b) = (a.clone(), b.clone());
                move || {
                    let _ = a.get() + b.get();
                    runs.set(runs.get() + 1);
                }
            },
            None,
        );
        set_both.call(3).unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn display_name_is_carried_into_actions() {
        let engine = Engine::default();
        let m = engine
            .domain("d")
            .unwrap()
            .mutation("m", |_: u8| Ok(()))
            .unwrap()
            .with_display_name("Do the thing");
        let action = m.action(1);
        assert_eq!(action.display_name(), "Do the thing");
        assert_eq!(action.payload().downcast_ref::<u8>(), Some(&1));
    }
}
