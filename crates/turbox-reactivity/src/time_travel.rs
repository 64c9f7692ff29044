#![forbid(unsafe_code)]

//! Time travel: bounded, per-instance undo/redo history.
//!
//! # Architecture
//!
//! A [`TimeTravel`] instance is a ring buffer of history entries plus a
//! cursor. Entries before the cursor are undoable, entries at or after it are
//! redoable. Each entry keeps the forward/inverse patches of the batch it was
//! recorded from; undo restores the `before` values in reverse first-write
//! order, redo restores the `after` values in order.
//!
//! Several instances may exist side by side. Exactly one is *current*: the
//! engine records into it and [`Engine::undo`]/[`Engine::redo`] act on it.
//!
//! # Invariants
//!
//! 1. `len() <= max_step_number()` at all times.
//! 2. Recording while the cursor is behind the end first discards every
//!    entry ahead of it.
//! 3. Replay never records history.
//! 4. `undo`/`redo` are no-ops when nothing is available, recording is
//!    inactive, the instance is paused, or a transaction is executing.
//!
//! # Failure Modes
//!
//! - **Dropped field**: a patch whose field no longer exists is skipped with
//!   a warning; the rest of the entry still replays.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexSet;

use crate::action::{ActionKind, ActionRecord};
use crate::config::validate_max_step_number;
use crate::engine::{Engine, WeakEngine};
use crate::error::ReactivityError;
use crate::field::FieldId;
use crate::trigger::Patch;

/// Engine-unique identifier of a time-travel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeTravelId(u64);

impl TimeTravelId {
    /// Raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// What changed the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryOperation {
    /// A top-level mutation (or composite action) was recorded.
    Mutation,
    /// A top-level effect was recorded.
    Effect,
    Undo,
    Redo,
    Clear,
}

impl From<ActionKind> for HistoryOperation {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Mutation => Self::Mutation,
            ActionKind::Effect => Self::Effect,
        }
    }
}

/// Payload of the change hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryChange {
    pub undoable: bool,
    pub redoable: bool,
    pub operation: HistoryOperation,
    /// The entry's action; `None` for [`HistoryOperation::Clear`].
    pub action: Option<ActionRecord>,
}

/// Read-only view of one recorded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Per-instance sequence number, increasing with every record.
    pub index: u64,
    /// Every action name dispatched inside the recorded batch, outermost first.
    pub action_chain: Vec<String>,
    /// The top-level action.
    pub action: ActionRecord,
}

struct Recorded {
    entry: HistoryEntry,
    patches: Rc<[Patch]>,
}

type ChangeHook = Rc<dyn Fn(&HistoryChange)>;

struct State {
    entries: VecDeque<Recorded>,
    cursor: usize,
    next_index: u64,
    on_change: Option<ChangeHook>,
}

struct TimeTravelInner {
    id: TimeTravelId,
    max_step_number: usize,
    engine: WeakEngine,
    paused: Cell<bool>,
    state: RefCell<State>,
}

/// Handle to one history instance. Clones share the instance.
#[derive(Clone)]
pub struct TimeTravel {
    inner: Rc<TimeTravelInner>,
}

impl std::fmt::Debug for TimeTravel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("TimeTravel")
            .field("id", &self.inner.id)
            .field("len", &state.entries.len())
            .field("cursor", &state.cursor)
            .field("max_step_number", &self.inner.max_step_number)
            .field("paused", &self.inner.paused.get())
            .finish()
    }
}

impl PartialEq for TimeTravel {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TimeTravel {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

impl TimeTravel {
    /// Instance ID.
    #[must_use]
    pub fn id(&self) -> TimeTravelId {
        self.inner.id
    }

    /// Ring-buffer capacity.
    #[must_use]
    pub fn max_step_number(&self) -> usize {
        self.inner.max_step_number
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries behind the cursor.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.inner.state.borrow().cursor
    }

    /// Whether there is an entry to undo.
    #[must_use]
    pub fn undoable(&self) -> bool {
        self.cursor() > 0
    }

    /// Whether there is an entry to redo.
    #[must_use]
    pub fn redoable(&self) -> bool {
        let state = self.inner.state.borrow();
        state.cursor < state.entries.len()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }

    /// Whether the engine currently records into this instance.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.inner
            .engine
            .upgrade()
            .and_then(|engine| engine.current_time_travel())
            .is_some_and(|current| current == *self)
    }

    /// Snapshot of retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.inner
            .state
            .borrow()
            .entries
            .iter()
            .map(|r| r.entry.clone())
            .collect()
    }

    /// Install the change hook, replacing any previous one.
    pub fn set_on_change(&self, hook: impl Fn(&HistoryChange) + 'static) {
        self.inner.state.borrow_mut().on_change = Some(Rc::new(hook));
    }

    /// Remove the change hook.
    pub fn clear_on_change(&self) {
        self.inner.state.borrow_mut().on_change = None;
    }

    /// Stop recording into this instance. Dispatch and notification go on.
    pub fn pause(&self) {
        self.inner.paused.set(true);
        tracing::debug!(message = "history.pause", id = self.inner.id.raw());
    }

    /// Resume recording into this instance.
    pub fn resume(&self) {
        self.inner.paused.set(false);
        tracing::debug!(message = "history.resume", id = self.inner.id.raw());
    }

    /// Drop every entry. The instance stays usable.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.inner.state.borrow_mut();
            state.cursor = 0;
            std::mem::take(&mut state.entries)
        };
        tracing::debug!(
            message = "history.clear",
            id = self.inner.id.raw(),
            entries = dropped.len()
        );
        drop(dropped);
        self.emit(HistoryOperation::Clear, None);
    }

    /// Step back one entry. No-op when nothing is undoable.
    pub fn undo(&self) {
        self.step(Direction::Undo);
    }

    /// Step forward one entry. No-op when nothing is redoable.
    pub fn redo(&self) {
        self.step(Direction::Redo);
    }

    fn step(&self, direction: Direction) {
        let Some(engine) = self.inner.engine.upgrade() else {
            return;
        };
        if !engine.config().time_travel.is_active || self.inner.paused.get() {
            return;
        }
        if engine.is_in_transaction() {
            tracing::debug!(message = "history.step_in_transaction", id = self.inner.id.raw());
            return;
        }
        let (patches, action) = {
            let mut state = self.inner.state.borrow_mut();
            let slot = match direction {
                Direction::Undo if state.cursor > 0 => state.cursor - 1,
                Direction::Redo if state.cursor < state.entries.len() => state.cursor,
                _ => return,
            };
            state.cursor = match direction {
                Direction::Undo => slot,
                Direction::Redo => slot + 1,
            };
            let recorded = &state.entries[slot];
            (Rc::clone(&recorded.patches), recorded.entry.action.clone())
        };
        let touched = engine.replay(&patches, direction == Direction::Undo);
        tracing::debug!(
            message = "history.step",
            id = self.inner.id.raw(),
            undo = direction == Direction::Undo,
            action = %action.name,
            fields = touched.len()
        );
        engine.notify(&touched);
        let operation = match direction {
            Direction::Undo => HistoryOperation::Undo,
            Direction::Redo => HistoryOperation::Redo,
        };
        self.emit(operation, Some(action));
    }

    fn push(&self, action: ActionRecord, action_chain: Vec<String>, patches: Vec<Patch>) {
        let operation = HistoryOperation::from(action.kind);
        {
            let mut state = self.inner.state.borrow_mut();
            let cursor = state.cursor;
            let pruned = state.entries.len() - cursor;
            state.entries.truncate(cursor);
            if state.entries.len() >= self.inner.max_step_number {
                state.entries.pop_front();
            }
            let index = state.next_index;
            state.next_index += 1;
            tracing::debug!(
                message = "history.record",
                id = self.inner.id.raw(),
                action = %action.name,
                index,
                pruned,
                patches = patches.len()
            );
            state.entries.push_back(Recorded {
                entry: HistoryEntry {
                    index,
                    action_chain,
                    action: action.clone(),
                },
                patches: Rc::from(patches),
            });
            state.cursor = state.entries.len();
        }
        self.emit(operation, Some(action));
    }

    fn emit(&self, operation: HistoryOperation, action: Option<ActionRecord>) {
        let (hook, undoable, redoable) = {
            let state = self.inner.state.borrow();
            (
                state.on_change.clone(),
                state.cursor > 0,
                state.cursor < state.entries.len(),
            )
        };
        if let Some(hook) = hook {
            hook(&HistoryChange {
                undoable,
                redoable,
                operation,
                action,
            });
        }
    }
}

/// Clears the replay flag, including when a restore unwinds.
struct ReplayGuard<'a>(&'a Engine);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.replaying.set(false);
    }
}

impl Engine {
    /// Allocate a new history instance. It does not become current.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Configuration`] when `max_step_number` is 0.
    pub fn create_time_travel(&self, max_step_number: usize) -> Result<TimeTravel, ReactivityError> {
        validate_max_step_number(max_step_number)?;
        let instance = TimeTravel {
            inner: Rc::new(TimeTravelInner {
                id: TimeTravelId(self.next_id()),
                max_step_number,
                engine: self.downgrade(),
                paused: Cell::new(false),
                state: RefCell::new(State {
                    entries: VecDeque::with_capacity(max_step_number.min(64)),
                    cursor: 0,
                    next_index: 0,
                    on_change: None,
                }),
            }),
        };
        tracing::debug!(
            message = "history.create",
            id = instance.inner.id.raw(),
            max_step_number
        );
        Ok(instance)
    }

    /// Make `instance` the target of recording and history operations.
    pub fn switch_time_travel(&self, instance: &TimeTravel) {
        tracing::trace!(message = "history.switch", id = instance.inner.id.raw());
        *self.inner.current_time_travel.borrow_mut() = Some(instance.clone());
    }

    /// The instance history operations currently target.
    #[must_use]
    pub fn current_time_travel(&self) -> Option<TimeTravel> {
        self.inner.current_time_travel.borrow().clone()
    }

    /// Undo on the current instance, if any.
    pub fn undo(&self) {
        if let Some(current) = self.current_time_travel() {
            current.undo();
        }
    }

    /// Redo on the current instance, if any.
    pub fn redo(&self) {
        if let Some(current) = self.current_time_travel() {
            current.redo();
        }
    }

    /// Pause recording into the current instance.
    pub fn pause_history(&self) {
        if let Some(current) = self.current_time_travel() {
            current.pause();
        }
    }

    /// Resume recording into the current instance.
    pub fn resume_history(&self) {
        if let Some(current) = self.current_time_travel() {
            current.resume();
        }
    }

    /// Clear the current instance.
    pub fn clear_history(&self) {
        if let Some(current) = self.current_time_travel() {
            current.clear();
        }
    }

    /// Whether the current instance has something to undo.
    #[must_use]
    pub fn undoable(&self) -> bool {
        self.current_time_travel().is_some_and(|t| t.undoable())
    }

    /// Whether the current instance has something to redo.
    #[must_use]
    pub fn redoable(&self) -> bool {
        self.current_time_travel().is_some_and(|t| t.redoable())
    }

    pub(crate) fn record_history(
        &self,
        action: &ActionRecord,
        action_chain: Vec<String>,
        patches: Vec<Patch>,
    ) {
        if patches.is_empty()
            || self.inner.replaying.get()
            || !self.inner.config.borrow().time_travel.is_active
        {
            return;
        }
        let Some(current) = self.current_time_travel() else {
            return;
        };
        if current.is_paused() {
            tracing::trace!(message = "history.skip_paused", action = %action.name);
            return;
        }
        current.push(action.clone(), action_chain, patches);
    }

    /// Restore one side of `patches` into their fields and return the fields
    /// that changed. Recording stays frozen for the duration.
    fn replay(&self, patches: &[Patch], undo: bool) -> IndexSet<FieldId> {
        self.inner.replaying.set(true);
        let _guard = ReplayGuard(self);
        let mut touched = IndexSet::with_capacity(patches.len());
        let ordered: Box<dyn Iterator<Item = &Patch>> = if undo {
            Box::new(patches.iter().rev())
        } else {
            Box::new(patches.iter())
        };
        for patch in ordered {
            let value = if undo { &patch.before } else { &patch.after };
            match patch.slot.upgrade() {
                Some(slot) if slot.restore(&**value) => {
                    touched.insert(patch.field);
                }
                Some(slot) => {
                    tracing::warn!(message = "history.patch_type_mismatch", field = %slot.label());
                }
                None => {
                    tracing::warn!(message = "history.patch_target_dropped", field = patch.field.raw());
                }
            }
        }
        touched
    }
}
