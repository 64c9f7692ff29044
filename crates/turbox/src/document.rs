#![forbid(unsafe_code)]

//! Document-level history controller.
//!
//! [`DocumentHistory`] owns one time-travel instance and mirrors its state
//! into reactive, unrecorded fields (`undoable`, `redoable`) so toolbars can
//! subscribe to them with `auto_run`. Every history operation switches the
//! engine to this document's instance first, which lets several documents
//! share one engine.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use turbox_reactivity::{
    ActionRecord, DEFAULT_MAX_STEP_NUMBER, DispatchesActions, Domain, Engine, Field, FieldOptions,
    HasObservableFields, HistoryChange, HistoryOperation, Mutation, ReactivityError, TimeTravel,
};

type ChangeHook = Rc<dyn Fn(HistoryOperation, Option<&ActionRecord>)>;

/// Undo/redo state of one document.
#[derive(Clone)]
pub struct DocumentHistory {
    domain: Domain,
    loading: Field<bool>,
    undoable: Field<bool>,
    redoable: Field<bool>,
    disable_undo_redo: Field<bool>,
    set_status: Mutation<(bool, bool)>,
    set_loading: Mutation<bool>,
    set_disable_undo_redo: Mutation<bool>,
    max_step_number: Rc<Cell<usize>>,
    hook: Rc<RefCell<Option<ChangeHook>>>,
}

impl std::fmt::Debug for DocumentHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHistory")
            .field("domain", &self.domain.name())
            .field("undoable", &self.undoable.get_untracked())
            .field("redoable", &self.redoable.get_untracked())
            .field("disable_undo_redo", &self.disable_undo_redo.get_untracked())
            .field("loading", &self.loading.get_untracked())
            .finish()
    }
}

fn flag(domain: &Domain, name: &str) -> Result<Field<bool>, ReactivityError> {
    domain.field_with(name, false, FieldOptions::unrecorded())
}

fn setter(domain: &Domain, name: &str, field: &Field<bool>) -> Result<Mutation<bool>, ReactivityError> {
    let field = field.clone();
    domain.mutation(name, move |value: bool| field.set(value))
}

impl DocumentHistory {
    /// Declare the document's domain on `engine`.
    ///
    /// # Errors
    ///
    /// Propagates declaration errors from the domain.
    pub fn new(engine: &Engine, name: &str) -> Result<Self, ReactivityError> {
        let domain = engine.domain(name)?;
        let loading = flag(&domain, "loading")?;
        let undoable = flag(&domain, "undoable")?;
        let redoable = flag(&domain, "redoable")?;
        let disable_undo_redo = flag(&domain, "disable_undo_redo")?;
        let set_status = domain.mutation("update_time_travel_status", {
            let (undoable, redoable) = (undoable.clone(), redoable.clone());
            move |(undo, redo): (bool, bool)| {
                undoable.set(undo)?;
                redoable.set(redo)
            }
        })?;
        let set_loading = setter(&domain, "set_loading", &loading)?;
        let set_disable_undo_redo = setter(&domain, "set_disable_undo_redo", &disable_undo_redo)?;
        Ok(Self {
            domain,
            loading,
            undoable,
            redoable,
            disable_undo_redo,
            set_status,
            set_loading,
            set_disable_undo_redo,
            max_step_number: Rc::new(Cell::new(DEFAULT_MAX_STEP_NUMBER)),
            hook: Rc::new(RefCell::new(None)),
        })
    }

    /// Whether undo is available (reactive).
    #[must_use]
    pub fn undoable(&self) -> bool {
        self.undoable.get()
    }

    /// Whether redo is available (reactive).
    #[must_use]
    pub fn redoable(&self) -> bool {
        self.redoable.get()
    }

    /// Whether undo/redo requests are ignored (reactive).
    #[must_use]
    pub fn is_undo_redo_disabled(&self) -> bool {
        self.disable_undo_redo.get()
    }

    /// Whether the document is loading (reactive).
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.get()
    }

    /// Capacity requested by the latest [`create_history`](Self::create_history).
    #[must_use]
    pub fn max_step_number(&self) -> usize {
        self.max_step_number.get()
    }

    /// The document's time-travel instance, once created.
    #[must_use]
    pub fn history(&self) -> Option<TimeTravel> {
        self.domain.history()
    }

    /// Ignore or honour undo/redo requests.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors.
    pub fn set_undo_redo_disabled(&self, disabled: bool) -> Result<(), ReactivityError> {
        self.set_disable_undo_redo.call(disabled)
    }

    /// Mark the document as loading.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors.
    pub fn mark_loading(&self) -> Result<(), ReactivityError> {
        self.set_loading.call(true)
    }

    /// Mark the document as loaded.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors.
    pub fn mark_loaded(&self) -> Result<(), ReactivityError> {
        self.set_loading.call(false)
    }

    /// Observe every history change after the status fields are updated.
    pub fn set_change_hook(&self, hook: impl Fn(HistoryOperation, Option<&ActionRecord>) + 'static) {
        *self.hook.borrow_mut() = Some(Rc::new(hook));
    }

    /// Create the document's history, enable recording and make it current.
    ///
    /// A second call only updates [`max_step_number`](Self::max_step_number).
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::Configuration`] when `max_step_number` is 0.
    pub fn create_history(&self, max_step_number: usize) -> Result<(), ReactivityError> {
        self.max_step_number.set(max_step_number);
        if self.domain.history().is_some() {
            return Ok(());
        }
        let history = self.domain.create_history(max_step_number)?;
        let set_status = self.set_status.clone();
        let hook = Rc::clone(&self.hook);
        let document = self.domain.name().to_string();
        history.set_on_change(move |change: &HistoryChange| {
            if let Err(err) = set_status.call((change.undoable, change.redoable)) {
                tracing::warn!(message = "document.status_update_failed", document = %document, error = %err);
            }
            let hook = hook.borrow().clone();
            if let Some(hook) = hook {
                hook(change.operation, change.action.as_ref());
            }
        });
        tracing::debug!(
            message = "document.history_created",
            document = self.domain.name(),
            max_step_number
        );
        Ok(())
    }

    fn switched(&self) -> Option<TimeTravel> {
        let history = self.domain.history()?;
        self.domain.engine()?.switch_time_travel(&history);
        Some(history)
    }

    /// Drop every entry of this document's history.
    pub fn clear_history(&self) {
        if let Some(history) = self.switched() {
            history.clear();
        }
    }

    /// Stop recording this document's actions.
    pub fn pause_record(&self) {
        if let Some(history) = self.switched() {
            history.pause();
        }
    }

    /// Resume recording this document's actions.
    pub fn resume_record(&self) {
        if let Some(history) = self.switched() {
            history.resume();
        }
    }

    /// Undo the latest entry. Ignored while disabled or when nothing is
    /// undoable.
    pub fn undo(&self) {
        if self.disable_undo_redo.get_untracked() || !self.undoable.get_untracked() {
            return;
        }
        if let Some(history) = self.switched() {
            history.undo();
        }
    }

    /// Redo the next entry. Ignored while disabled or when nothing is
    /// redoable.
    pub fn redo(&self) {
        if self.disable_undo_redo.get_untracked() || !self.redoable.get_untracked() {
            return;
        }
        if let Some(history) = self.switched() {
            history.redo();
        }
    }

    /// Make this document's history the engine's current one.
    pub fn apply_history(&self) {
        self.switched();
    }
}

impl HasObservableFields for DocumentHistory {
    fn domain(&self) -> &Domain {
        &self.domain
    }
}

impl DispatchesActions for DocumentHistory {}
