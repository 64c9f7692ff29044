#![forbid(unsafe_code)]

//! Observable fields: tracked reads, transaction-gated writes.
//!
//! A [`Field<T>`] is a named slot owned by exactly one [`Domain`](crate::Domain).
//! Cloning a `Field` creates a new handle to the **same** slot.
//!
//! # Invariants
//!
//! 1. A read inside a reaction run registers the field with the innermost
//!    dependency frame; reads elsewhere are plain reads.
//! 2. Writing a value equal to the current one is a no-op: no touched mark,
//!    no history patch, no notification.
//! 3. A write is only accepted while a mutation, effect or composite action
//!    is executing.
//! 4. Fields declared with `record: false` notify reactions but never appear
//!    in history patches.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::engine::WeakEngine;
use crate::error::{ActionResult, ReactivityError};

/// Engine-unique identifier of an observable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u64);

impl FieldId {
    /// Create an ID from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Per-field declaration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOptions {
    /// Capture writes to this field in undo/redo history.
    pub record: bool,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self { record: true }
    }
}

impl FieldOptions {
    /// Options for a field that is reactive but excluded from history.
    #[must_use]
    pub const fn unrecorded() -> Self {
        Self { record: false }
    }
}

/// Type-erased view of a field used by history replay.
pub(crate) trait FieldSlot {
    fn id(&self) -> FieldId;
    fn label(&self) -> String;
    /// Overwrite the value without gating or notification. Returns `false`
    /// when `value` is not of the field's type.
    fn restore(&self, value: &dyn Any) -> bool;
}

struct FieldCell<T> {
    id: FieldId,
    name: String,
    domain: Rc<str>,
    options: FieldOptions,
    value: RefCell<T>,
}

impl<T: Clone + 'static> FieldSlot for FieldCell<T> {
    fn id(&self) -> FieldId {
        self.id
    }

    fn label(&self) -> String {
        format!("{}.{}", self.domain, self.name)
    }

    fn restore(&self, value: &dyn Any) -> bool {
        match value.downcast_ref::<T>() {
            Some(v) => {
                *self.value.borrow_mut() = v.clone();
                true
            }
            None => false,
        }
    }
}

/// A reactive state slot on a domain.
pub struct Field<T> {
    cell: Rc<FieldCell<T>>,
    engine: WeakEngine,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
            engine: self.engine.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("domain", &&*self.cell.domain)
            .field("name", &self.cell.name)
            .field("value", &*self.cell.value.borrow())
            .finish()
    }
}

impl<T> Field<T> {
    /// Engine-unique field ID.
    #[must_use]
    pub fn id(&self) -> FieldId {
        self.cell.id
    }

    /// Declared field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Name of the owning domain.
    #[must_use]
    pub fn domain_name(&self) -> &str {
        &self.cell.domain
    }

    /// Declaration options.
    #[must_use]
    pub fn options(&self) -> FieldOptions {
        self.cell.options
    }

    fn track(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.track_read(self.cell.id);
        }
    }

    /// Access the value by reference, registering the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.cell.value.borrow())
    }
}

impl<T: Clone + PartialEq + 'static> Field<T> {
    pub(crate) fn new(
        engine: WeakEngine,
        id: FieldId,
        domain: Rc<str>,
        name: impl Into<String>,
        value: T,
        options: FieldOptions,
    ) -> Self {
        Self {
            cell: Rc::new(FieldCell {
                id,
                name: name.into(),
                domain,
                options,
                value: RefCell::new(value),
            }),
            engine,
        }
    }

    /// Current value, registering the read with any active collection.
    #[must_use]
    pub fn get(&self) -> T {
        self.track();
        self.cell.value.borrow().clone()
    }

    /// Current value without registering a dependency.
    #[must_use]
    pub fn get_untracked(&self) -> T {
        self.cell.value.borrow().clone()
    }

    /// Replace the value.
    ///
    /// # Errors
    ///
    /// Returns [`ReactivityError::WriteOutsideTransaction`] when no
    /// transaction is executing, or a configuration error when the engine is
    /// gone.
    pub fn set(&self, value: T) -> ActionResult {
        let before = {
            let current = self.cell.value.borrow();
            if *current == value {
                return Ok(());
            }
            current.clone()
        };
        let engine = self.engine.upgrade().ok_or_else(ReactivityError::engine_dropped)?;
        let batch = engine.write_batch(&self.cell.domain, &self.cell.name)?;
        *self.cell.value.borrow_mut() = value.clone();
        batch.record_write(self.slot(), self.cell.options.record, before, value);
        Ok(())
    }

    /// Modify the value in place through a copy, then [`set`](Self::set) it.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub fn update(&self, f: impl FnOnce(&mut T)) -> ActionResult {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next)
    }

    pub(crate) fn slot(&self) -> Weak<dyn FieldSlot> {
        let slot: Rc<dyn FieldSlot> = self.cell.clone();
        Rc::downgrade(&slot)
    }
}
