#![forbid(unsafe_code)]

//! turbox public facade crate.
//!
//! This crate provides the stable surface area for hosts: the reactive
//! engine re-exported as [`reactivity`], plus host-side helpers such as
//! [`DocumentHistory`].

pub mod document;

pub use document::DocumentHistory;
pub use turbox_reactivity as reactivity;

pub mod prelude {
    pub use crate::document::DocumentHistory;
    pub use turbox_reactivity::{
        Action, ActionResult, AutoRunOptions, CompositeAction, DispatchesActions, Disposer,
        Domain, DomainContext, Effect, Engine, EngineConfig, Field, FieldOptions,
        HasObservableFields, HistoryChange, HistoryOperation, LoggerMiddleware, MaterialKind,
        Middleware, MiddlewareApi, Mutation, PerfMiddleware, ReactivityError, TimeTravel,
        TimeTravelConfig,
    };
}
