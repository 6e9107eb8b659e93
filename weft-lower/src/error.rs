#![forbid(unsafe_code)]

use miette::Diagnostic;
use thiserror::Error;
use weft_ast::Span;

/// Failures raised by the lowering builders.
///
/// `User` marks a malformed input construct and halts the current
/// compilation after diagnostics are reported; `Internal` marks a violated
/// compiler invariant, i.e. a defect in an earlier pass.
#[derive(Debug, Error, Diagnostic)]
pub enum LowerError {
    #[error("{message}")]
    #[diagnostic(code(weft::lower::user))]
    User {
        message: String,
        #[label]
        span: Span,
    },

    #[error("internal error: {message}")]
    #[diagnostic(code(weft::lower::internal))]
    Internal {
        message: String,
        #[label]
        span: Span,
    },
}

impl LowerError {
    pub fn user(message: impl Into<String>, span: Span) -> LowerError {
        LowerError::User {
            message: message.into(),
            span,
        }
    }

    pub fn internal(message: impl Into<String>, span: Span) -> LowerError {
        LowerError::Internal {
            message: message.into(),
            span,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, LowerError::User { .. })
    }
}

/// Non-fatal diagnostic collected during lowering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub span: Span,
}
