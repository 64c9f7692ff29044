#![forbid(unsafe_code)]

//! Reactivity: observable domains, transactional actions, middleware and
//! undo/redo history on a single-threaded engine.

pub mod action;
pub mod collector;
pub mod config;
mod dispatcher;
pub mod domain;
pub mod effect;
pub mod engine;
pub mod error;
pub mod field;
pub mod middleware;
pub mod mutation;
pub mod reaction;
pub mod time_travel;
mod trigger;

pub use action::{
    Action, ActionBody, ActionKind, ActionRecord, CompositeAction, EMPTY_ACTION_NAME, MaterialKind,
    Payload,
};
pub use collector::DepCollector;
pub use config::{DEFAULT_MAX_STEP_NUMBER, EngineConfig, TimeTravelConfig};
pub use domain::{DispatchesActions, Domain, DomainContext, DomainId, HasObservableFields};
pub use effect::Effect;
pub use engine::Engine;
pub use error::{ActionResult, BoxError, ReactivityError};
pub use field::{Field, FieldId, FieldOptions};
pub use middleware::{
    Dispatch, Dispatched, LoggerMiddleware, Middleware, MiddlewareApi, PerfMiddleware,
};
pub use mutation::Mutation;
pub use reaction::{AutoRunOptions, Disposer, ReactionId};
pub use time_travel::{HistoryChange, HistoryEntry, HistoryOperation, TimeTravel, TimeTravelId};
