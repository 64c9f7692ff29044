#![forbid(unsafe_code)]

//! Declared effects: asynchronous composite transactions.
//!
//! # Design
//!
//! An effect body is a future. Its transaction context is carried by the
//! future itself: [`Scoped`] pushes the effect's context onto the engine's
//! context stack at the start of **every** poll and pops it when the poll
//! returns (or unwinds). Anything the body runs between two suspension points
//! therefore sees the effect as the enclosing transaction, while code running
//! elsewhere between polls sees none of it. Interleaved effects can never
//! leak touched fields or history into each other.
//!
//! The outermost effect owns the batch. When its body settles, successfully
//! or not, the batch is recorded as a single history entry and reactions are
//! notified once. An owning effect dropped before it settles aborts its batch
//! (notify, no history).
//!
//! # Invariants
//!
//! 1. The context stack depth after a poll equals the depth before it.
//! 2. Nested effects and mutations never notify or record on their own.
//! 3. The batch is settled exactly once.

use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::LocalBoxFuture;

use crate::action::{Action, ActionBody, EMPTY_ACTION_NAME, EffectBody, Payload};
use crate::dispatcher::TxContext;
use crate::domain::Domain;
use crate::engine::Engine;
use crate::error::{ActionResult, ReactivityError};
use crate::trigger::Batch;

/// Handle to a declared effect.
pub struct Effect<A> {
    domain: Domain,
    name: Rc<str>,
    display_name: Rc<str>,
    body: EffectBody,
    _args: PhantomData<fn(A)>,
}

impl<A> Clone for Effect<A> {
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

impl<A> Debug for Effect<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("name", &&*self.name)
            .field("display_name", &&*self.display_name)
            .finish()
    }
}

impl<A: Clone + Debug + 'static> Effect<A> {
    pub(crate) fn new<F, Fut>(domain: Domain, name: String, body: F) -> Self
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = ActionResult> + 'static,
    {
        let action_name = name.clone();
        let body: EffectBody = Rc::new(move |payload: &Payload| {
            match payload.downcast_ref::<A>().cloned() {
                Some(args) => body(args).boxed_local(),
                None => futures::future::ready(Err(ReactivityError::PayloadMismatch {
                    action: action_name.clone(),
                    expected: std::any::type_name::<A>(),
                }))
                .boxed_local(),
            }
        });
        Self {
            domain,
            name: Rc::from(name),
            display_name: Rc::from(EMPTY_ACTION_NAME),
            body,
            _args: PhantomData,
        }
    }

    /// Attach a human-readable name.
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
            ActionBody::Effect(Rc::clone(&self.body)),
        )
    }

    /// Run the effect. Nothing happens until the returned future is polled.
    ///
    /// The enclosing transaction is decided on first poll: awaited inside
    /// another effect, this effect joins it; otherwise it opens its own.
    pub fn call(&self, args: A) -> LocalBoxFuture<'static, ActionResult> {
        let action = self.action(args);
        let engine = self.domain.live_engine();
        async move { engine?.dispatch(action).into_future().await }.boxed_local()
    }
}

/// Future adapter that re-enters a transaction context on every poll.
pub(crate) struct Scoped {
    engine: Engine,
    tx: TxContext,
    inner: LocalBoxFuture<'static, ActionResult>,
}

impl Scoped {
    pub(crate) fn new(
        engine: Engine,
        tx: TxContext,
        inner: LocalBoxFuture<'static, ActionResult>,
    ) -> Self {
        Self { engine, tx, inner }
    }
}

impl Future for Scoped {
    type Output = ActionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let _scope = this.engine.enter(this.tx.clone());
        this.inner.as_mut().poll(cx)
    }
}

/// Settles an owned effect batch exactly once, aborting it if dropped early.
pub(crate) struct SettleGuard {
    engine: Engine,
    batch: Rc<Batch>,
    armed: bool,
}

impl SettleGuard {
    pub(crate) fn new(engine: Engine, batch: Rc<Batch>) -> Self {
        Self {
            engine,
            batch,
            armed: true,
        }
    }

    pub(crate) fn commit(mut self) {
        self.armed = false;
        self.engine.settle(&self.batch, true);
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                message = "effect.dropped_unsettled",
                action = %self.batch.root().name,
                batch = self.batch.id()
            );
            self.engine.settle(&self.batch, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use futures::channel::oneshot;
    use futures::executor::{LocalPool, block_on};
    use futures::task::LocalSpawnExt;

    use super::*;
    use crate::action::MaterialKind;

    #[test]
    fn effect_runs_nested_mutations_as_one_batch() {
        let engine = Engine::default();
        let domain = engine.domain("d").unwrap();
        let value = domain.field("value", 0).unwrap();
        let inc = domain
            .mutation("inc", {
                let value = value.clone();
                move |_: ()| value.update(|v| *v += 1)
            })
            .unwrap();
        let twice = domain
            .effect("twice", move |_: ()| {
                let inc = inc.clone();
                async move {
                    inc.call(())?;
                    inc.call(())
                }
            })
            .unwrap();

        let runs = Rc::new(Cell::new(0));
        let _d = engine.auto_run(
            {
                let (value, runs) = (value.clone(), Rc::clone(&runs));
                move || {
                    let _ = value.get();
                    runs.set(runs.get() + 1);
                }
            },
            None,
        );
        block_on(twice.call(())).unwrap();
        assert_eq!(value.get(), 2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn material_kind_is_effect_only_while_polled() {
        let engine = Engine::default();
        let domain = engine.domain("d").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (tx, rx) = oneshot::channel::<()>();
        let rx = Rc::new(RefCell::new(Some(rx)));
        let peek = domain
            .effect("peek", {
                let engine = engine.clone();
                let seen = Rc::clone(&seen);
                move |_: ()| {
                    let engine = engine.clone();
                    let seen = Rc::clone(&seen);
                    let rx = rx.borrow_mut().take();
                    async move {
                        seen.borrow_mut().push(engine.material_kind());
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                        seen.borrow_mut().push(engine.material_kind());
                        Ok(())
                    }
                }
            })
            .unwrap();

        let mut pool = LocalPool::new();
        pool.spawner()
            .spawn_local(async move {
                peek.call(()).await.unwrap();
            })
            .unwrap();
        pool.run_until_stalled();
        assert_eq!(engine.material_kind(), MaterialKind::Default);
        tx.send(()).unwrap();
        pool.run_until_stalled();
        assert_eq!(
            *seen.borrow(),
            vec![MaterialKind::Effect, MaterialKind::Effect]
        );
        assert_eq!(engine.material_kind(), MaterialKind::Default);
    }

    #[test]
    fn failing_effect_restores_the_context_stack() {
        let engine = Engine::default();
        let domain = engine.domain("d").unwrap();
        let boom = domain
            .effect("boom", |_: ()| async { Err(ReactivityError::body("boom")) })
            .unwrap();
        let err = block_on(boom.call(())).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!engine.is_in_transaction());
        assert_eq!(engine.material_kind(), MaterialKind::Default);
    }

    #[test]
    fn dropping_an_unsettled_effect_still_notifies() {
        let engine = Engine::default();
        let domain = engine.domain("d").unwrap();
        let value = domain.field("value", 0).unwrap();
        let set = domain
            .mutation("set", {
                let value = value.clone();
                move |v: i32| value.set(v)
            })
            .unwrap();
        let stuck = domain
            .effect("stuck", move |_: ()| {
                let set = set.clone();
                async move {
                    set.call(4)?;
                    futures::future::pending::<()>().await;
                    Ok(())
                }
            })
            .unwrap();
        let runs = Rc::new(Cell::new(0));
        let _d = engine.auto_run(
            {
                let (value, runs) = (value.clone(), Rc::clone(&runs));
                move || {
                    let _ = value.get();
                    runs.set(runs.get() + 1);
                }
            },
            None,
        );

        let mut fut = stuck.call(());
        assert!((&mut fut).now_or_never().is_none());
        assert_eq!(runs.get(), 1);
        drop(fut);
        assert_eq!(runs.get(), 2);
        assert_eq!(value.get(), 4);
    }
}
