#![forbid(unsafe_code)]

//! Core dispatcher: runs action bodies inside transaction contexts.
//!
//! # Architecture
//!
//! The engine keeps a stack of [`TxContext`]s. Each entry names the material
//! kind of the running body and the [`Batch`] it contributes to. A dispatch
//! with an empty stack opens a new batch and owns it; a dispatch with a
//! non-empty stack joins the batch on top.
//!
//! Entries are pushed through [`ContextGuard`], which pops on drop, so an
//! erroring or panicking body can never leave the stack unbalanced.
//!
//! Only the batch owner settles: one notification pass, one history entry.

use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;

use crate::action::{
    Action, ActionBody, ActionKind, ActionRecord, CompositeAction, EMPTY_ACTION_NAME, EffectBody,
    MaterialKind, MutationBody,
};
use crate::effect::{Scoped, SettleGuard};
use crate::engine::Engine;
use crate::error::{ActionResult, ReactivityError};
use crate::middleware::Dispatched;
use crate::trigger::Batch;

/// One entry of the transaction context stack.
#[derive(Clone, Debug)]
pub(crate) struct TxContext {
    pub(crate) material: MaterialKind,
    pub(crate) batch: Rc<Batch>,
    pub(crate) composite: bool,
}

impl TxContext {
    pub(crate) fn new(material: MaterialKind, batch: Rc<Batch>) -> Self {
        Self {
            material,
            batch,
            composite: false,
        }
    }
}

/// Pops the context stack back to its depth at creation.
pub(crate) struct ContextGuard {
    engine: Engine,
    depth: usize,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.engine.inner.contexts.borrow_mut().truncate(self.depth);
    }
}

impl Engine {
    pub(crate) fn enter(&self, tx: TxContext) -> ContextGuard {
        let mut contexts = self.inner.contexts.borrow_mut();
        let depth = contexts.len();
        contexts.push(tx);
        ContextGuard {
            engine: self.clone(),
            depth,
        }
    }

    pub(crate) fn enter_composite(&self, batch: Rc<Batch>) -> ContextGuard {
        self.enter(TxContext {
            material: MaterialKind::Mutation,
            batch,
            composite: true,
        })
    }

    pub(crate) fn current_context(&self) -> Option<TxContext> {
        self.inner.contexts.borrow().last().cloned()
    }

    /// Material kind of the innermost executing transaction.
    #[must_use]
    pub fn material_kind(&self) -> MaterialKind {
        self.inner
            .contexts
            .borrow()
            .last()
            .map_or(MaterialKind::Default, |tx| tx.material)
    }

    /// Whether any mutation, effect or composite action is executing.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        !self.inner.contexts.borrow().is_empty()
    }

    /// Snapshot of the action-name chain of the executing batch.
    ///
    /// An executing composite action takes precedence over the innermost
    /// context. Empty when nothing is executing.
    #[must_use]
    pub fn action_chain(&self) -> Vec<String> {
        let contexts = self.inner.contexts.borrow();
        contexts
            .iter()
            .rev()
            .find(|tx| tx.composite)
            .or_else(|| contexts.last())
            .map(|tx| tx.batch.chain())
            .unwrap_or_default()
    }

    /// The batch a field write lands in.
    pub(crate) fn write_batch(&self, domain: &str, field: &str) -> Result<Rc<Batch>, ReactivityError> {
        self.current_context()
            .map(|tx| tx.batch)
            .ok_or_else(|| ReactivityError::WriteOutsideTransaction {
                domain: domain.to_string(),
                field: field.to_string(),
            })
    }

    /// Open a composite action named `name`.
    ///
    /// The same name may be reused for a replacement after an abort.
    #[must_use]
    pub fn create_action(&self, name: &str) -> CompositeAction {
        let record = ActionRecord {
            name: name.to_string(),
            display_name: EMPTY_ACTION_NAME.to_string(),
            kind: ActionKind::Mutation,
            domain: String::new(),
        };
        let batch = Rc::new(Batch::new(self.next_id(), record));
        batch.push_chain(name);
        CompositeAction::new(self.clone(), batch)
    }

    /// Innermost stage of the middleware pipeline.
    pub(crate) fn core_dispatch(&self, action: Action) -> Dispatched {
        let parent = self.current_context();
        tracing::trace!(
            message = "dispatch.begin",
            action = action.name(),
            kind = ?action.kind(),
            nested = parent.is_some()
        );
        match action.body().clone() {
            ActionBody::Mutation(body) => {
                Dispatched::Settled(self.run_mutation(&action, &body, parent))
            }
            ActionBody::Effect(body) => Dispatched::Pending(self.run_effect(&action, &body, parent)),
        }
    }

    fn join_or_open(&self, action: &Action, parent: Option<TxContext>) -> (Rc<Batch>, bool) {
        match parent {
            Some(tx) => (tx.batch, false),
            None => (Rc::new(Batch::new(self.next_id(), action.record())), true),
        }
    }

    fn run_mutation(
        &self,
        action: &Action,
        body: &MutationBody,
        parent: Option<TxContext>,
    ) -> ActionResult {
        let (batch, owner) = self.join_or_open(action, parent);
        batch.push_chain(action.name());
        let result = {
            let _scope = self.enter(TxContext::new(MaterialKind::Mutation, Rc::clone(&batch)));
            body(action.payload())
        };
        if owner {
            self.settle(&batch, true);
        }
        result
    }

    fn run_effect(
        &self,
        action: &Action,
        body: &EffectBody,
        parent: Option<TxContext>,
    ) -> LocalBoxFuture<'static, ActionResult> {
        let (batch, owner) = self.join_or_open(action, parent);
        batch.push_chain(action.name());
        let tx = TxContext::new(MaterialKind::Effect, Rc::clone(&batch));
        let inner = {
            let _scope = self.enter(tx.clone());
            body(action.payload())
        };
        let scoped = Scoped::new(self.clone(), tx, inner);
        let guard = owner.then(|| SettleGuard::new(self.clone(), batch));
        async move {
            let result = scoped.await;
            if let Some(guard) = guard {
                guard.commit();
            }
            result
        }
        .boxed_local()
    }

    /// Close `batch`, record it when `commit` is set, then notify every
    /// reaction subscribed to a touched field exactly once.
    pub(crate) fn settle(&self, batch: &Batch, commit: bool) {
        if batch.is_closed() {
            return;
        }
        let outcome = batch.close();
        tracing::debug!(
            message = "batch.settle",
            action = %batch.root().name,
            batch = batch.id(),
            touched = outcome.touched.len(),
            patches = outcome.patches.len(),
            commit
        );
        if commit {
            self.record_history(batch.root(), outcome.chain, outcome.patches);
        }
        self.notify(&outcome.touched);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    #[test]
    fn guard_restores_depth_on_unwind() {
        let engine = Engine::default();
        let batch = Rc::new(Batch::new(
            1,
            ActionRecord {
                name: "x".into(),
                display_name: String::new(),
                kind: ActionKind::Mutation,
                domain: String::new(),
            },
        ));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = engine.enter(TxContext::new(MaterialKind::Mutation, batch));
            panic!("body panicked");
        }));
        assert!(result.is_err());
        assert!(!engine.is_in_transaction());
    }

    #[test]
    fn action_chain_lists_nested_names_in_dispatch_order() {
        let engine = Engine::default();
        let domain = engine.domain("d").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let inner = domain
            .mutation("inner", {
                let (engine, seen) = (engine.clone(), Rc::clone(&seen));
                move |_: ()| {
                    *seen.borrow_mut() = engine.action_chain();
                    Ok(())
                }
            })
            .unwrap();
        let outer = domain
            .mutation("outer", move |_: ()| inner.call(()))
            .unwrap();
        outer.call(()).unwrap();
        assert_eq!(*seen.borrow(), vec!["d.outer", "d.inner"]);
        assert!(engine.action_chain().is_empty());
    }

    #[test]
    fn composite_action_batches_several_mutations() {
        let engine = Engine::default();
        let domain = engine.domain("d").unwrap();
        let value = domain.field("v", 0).unwrap();
        let inc = domain
            .mutation("inc", {
                let value = value.clone();
                move |_: ()| value.update(|v| *v += 1)
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

        let action = engine.create_action("bulk");
        action.execute(|| inc.call(())).unwrap().unwrap();
        let chain = action.execute(|| engine.action_chain()).unwrap();
        action.execute(|| inc.call(())).unwrap().unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(chain, vec!["bulk", "d.inc"]);
        action.complete().unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(value.get(), 2);
    }
}
