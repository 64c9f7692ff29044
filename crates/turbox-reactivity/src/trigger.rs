#![forbid(unsafe_code)]

//! Trigger collector: per-batch bookkeeping of what an action touched.
//!
//! A [`Batch`] is opened by the outermost mutation, effect or composite
//! action and shared by everything nested inside it. It accumulates:
//!
//! - the set of touched fields (drives notification),
//! - the action-name chain (surfaced to middleware and history),
//! - one forward/inverse [`Patch`] per recorded field (drives undo/redo).
//!
//! Patches are coalesced per field: the first write fixes `before`, every
//! later write overwrites `after`.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Weak;

use indexmap::{IndexMap, IndexSet};

use crate::action::ActionRecord;
use crate::field::{FieldId, FieldSlot};

/// Forward and inverse value of one field across a batch.
pub(crate) struct Patch {
    pub(crate) field: FieldId,
    pub(crate) slot: Weak<dyn FieldSlot>,
    pub(crate) before: Box<dyn Any>,
    pub(crate) after: Box<dyn Any>,
}

impl std::fmt::Debug for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patch").field("field", &self.field).finish()
    }
}

#[derive(Default)]
struct BatchState {
    touched: IndexSet<FieldId>,
    chain: Vec<String>,
    patches: IndexMap<FieldId, Patch>,
    closed: bool,
}

/// What a batch produced once it is closed.
#[derive(Debug, Default)]
pub(crate) struct BatchOutcome {
    pub(crate) touched: IndexSet<FieldId>,
    pub(crate) chain: Vec<String>,
    pub(crate) patches: Vec<Patch>,
}

/// Shared accumulator for one top-level transaction.
pub(crate) struct Batch {
    id: u64,
    root: ActionRecord,
    state: RefCell<BatchState>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("root", &self.root.name)
            .field("touched", &state.touched.len())
            .field("chain", &state.chain)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Batch {
    pub(crate) fn new(id: u64, root: ActionRecord) -> Self {
        Self {
            id,
            root,
            state: RefCell::new(BatchState::default()),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn root(&self) -> &ActionRecord {
        &self.root
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub(crate) fn push_chain(&self, name: &str) {
        self.state.borrow_mut().chain.push(name.to_string());
    }

    /// Snapshot copy of the action-name chain.
    pub(crate) fn chain(&self) -> Vec<String> {
        self.state.borrow().chain.clone()
    }

    pub(crate) fn touched_len(&self) -> usize {
        self.state.borrow().touched.len()
    }

    pub(crate) fn record_write<T: Clone + 'static>(
        &self,
        slot: Weak<dyn FieldSlot>,
        record: bool,
        before: T,
        after: T,
    ) {
        let Some(field) = slot.upgrade().map(|s| s.id()) else {
            return;
        };
        let mut state = self.state.borrow_mut();
        state.touched.insert(field);
        if !record {
            return;
        }
        match state.patches.get_mut(&field) {
            Some(patch) => patch.after = Box::new(after),
            None => {
                state.patches.insert(
                    field,
                    Patch {
                        field,
                        slot,
                        before: Box::new(before),
                        after: Box::new(after),
                    },
                );
            }
        }
    }

    /// Close the batch and hand back everything it accumulated.
    ///
    /// Closing twice yields an empty outcome.
    pub(crate) fn close(&self) -> BatchOutcome {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return BatchOutcome::default();
        }
        state.closed = true;
        BatchOutcome {
            touched: std::mem::take(&mut state.touched),
            chain: std::mem::take(&mut state.chain),
            patches: std::mem::take(&mut state.patches).into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::engine::Engine;

    fn record() -> ActionRecord {
        ActionRecord {
            name: "d.act".to_string(),
            display_name: String::new(),
            kind: ActionKind::Mutation,
            domain: "d".to_string(),
        }
    }

    #[test]
    fn patches_coalesce_per_field() {
        let engine = Engine::default();
        let field = engine.domain("d").unwrap().field("v", 0).unwrap();
        let batch = Batch::new(1, record());
        batch.record_write(field.slot(), true, 0, 1);
        batch.record_write(field.slot(), true, 1, 2);
        let out = batch.close();
        assert_eq!(out.patches.len(), 1);
        assert_eq!(out.patches[0].before.downcast_ref::<i32>(), Some(&0));
        assert_eq!(out.patches[0].after.downcast_ref::<i32>(), Some(&2));
        assert_eq!(out.touched.len(), 1);
    }

    #[test]
    fn unrecorded_writes_touch_without_patching() {
        let engine = Engine::default();
        let field = engine.domain("d").unwrap().field("v", false).unwrap();
        let batch = Batch::new(1, record());
        batch.record_write(field.slot(), false, false, true);
        let out = batch.close();
        assert!(out.patches.is_empty());
        assert!(out.touched.contains(&field.id()));
    }

    #[test]
    fn close_is_one_shot() {
        let batch = Batch::new(1, record());
        batch.push_chain("d.act");
        assert_eq!(batch.chain(), vec!["d.act".to_string()]);
        let first = batch.close();
        assert_eq!(first.chain.len(), 1);
        assert!(batch.is_closed());
        assert!(batch.close().chain.is_empty());
    }
}
