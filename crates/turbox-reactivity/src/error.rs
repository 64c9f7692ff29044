#![forbid(unsafe_code)]

//! Errors surfaced by the reactive engine.
//!
//! Every fallible engine operation returns [`ReactivityError`]. Mutation and
//! effect bodies report their own failures through [`ReactivityError::Body`],
//! which the dispatcher propagates untouched to the original caller.

use thiserror::Error;

/// Boxed error type accepted from consumer bodies.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Result of dispatching a mutation or effect.
pub type ActionResult = Result<(), ReactivityError>;

/// Errors that can occur while declaring or dispatching reactive state.
#[derive(Debug, Error)]
pub enum ReactivityError {
    /// The engine was used in a state it cannot serve, e.g. dispatching while
    /// the middleware chain is still being composed.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A declaration was malformed at registration time.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// A field was written while no mutation or effect was executing.
    #[error("field `{field}` of domain `{domain}` was written outside a transaction")]
    WriteOutsideTransaction { domain: String, field: String },
    /// The payload carried by an action is not the type its body expects.
    #[error("payload of action `{action}` is not a `{expected}`")]
    PayloadMismatch {
        action: String,
        expected: &'static str,
    },
    /// A composite action was used after it completed or was aborted.
    #[error("action `{0}` is no longer open")]
    Aborted(String),
    /// A mutation returned a pending result; mutations must settle inline.
    #[error("mutation `{0}` suspended; mutations must settle synchronously")]
    MutationSuspended(String),
    /// A failure reported by a consumer body.
    #[error(transparent)]
    Body(BoxError),
}

impl ReactivityError {
    /// Wrap a consumer failure.
    #[must_use]
    pub fn body(err: impl Into<BoxError>) -> Self {
        Self::Body(err.into())
    }

    pub(crate) fn engine_dropped() -> Self {
        Self::Configuration("the owning engine has been dropped".to_string())
    }

    /// Whether this error was raised by the engine itself rather than a body.
    #[must_use]
    pub fn is_engine_error(&self) -> bool {
        !matches!(self, Self::Body(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_field_and_domain() {
        let err = ReactivityError::WriteOutsideTransaction {
            domain: "counter".to_string(),
            field: "value".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("`value`"));
        assert!(text.contains("`counter`"));
    }

    #[test]
    fn body_errors_are_transparent() {
        let err = ReactivityError::body("disk full");
        assert_eq!(err.to_string(), "disk full");
        assert!(!err.is_engine_error());
    }

    #[test]
    fn engine_errors_are_classified() {
        assert!(ReactivityError::engine_dropped().is_engine_error());
        assert!(ReactivityError::Aborted("x".into()).is_engine_error());
    }
}
