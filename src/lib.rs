//! A small Lisp evaluator.
//!
//! Source text is read into [`Expr`] trees by [`parser`], then evaluated by an
//! [`Interpreter`] against a persistent global [`Environment`]. Built-in
//! operators live in a [`Registry`]; each entry declares an
//! [`EvalPolicy`](builtinops::EvalPolicy) telling the evaluator how to prepare
//! its arguments, which is how quoting, short-circuiting and tail forwarding
//! share one call path.
//!
//! ```
//! use lispx::{Expr, Interpreter};
//!
//! let mut interp = Interpreter::new();
//! let result = interp
//!     .run("(define sq (lambda (x) (* x x))) (sq 12)")
//!     .unwrap();
//! assert_eq!(result, Expr::Number(144.0));
//! ```

use thiserror::Error;

pub mod ast;
pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod parser;

pub use ast::{Closure, Expr};
pub use builtinops::{Arity, BuiltinOp, Registry};
pub use environment::Environment;
pub use evaluator::Interpreter;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Evaluation failures. These never unwind: the evaluator wraps them in
/// [`Expr::Error`] and hands them on like any other value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unbound symbol: {0}")]
    UnboundSymbol(String),

    #[error("{op}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        op: String,
        expected: Arity,
        got: usize,
    },

    #[error("{op}: {message}")]
    TypeMismatch { op: String, message: String },

    #[error("{0}: division by zero")]
    DivisionByZero(String),

    #[error("string->number: malformed number {0:?}")]
    InvalidNumber(String),

    #[error("{op}: not a pair: {value}")]
    NotAPair { op: String, value: String },

    #[error("not callable: {0}")]
    NotCallable(String),

    #[error("invalid form: {0}")]
    InvalidForm(String),

    #[error("{0}")]
    User(String),
}

impl EvalError {
    pub fn arity(op: &str, expected: Arity, got: usize) -> Self {
        EvalError::ArityMismatch {
            op: op.to_string(),
            expected,
            got,
        }
    }

    pub fn type_mismatch(op: &str, message: impl Into<String>) -> Self {
        EvalError::TypeMismatch {
            op: op.to_string(),
            message: message.into(),
        }
    }
}

/// Reader failure, reported before evaluation starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error: {0}")]
pub struct ParseError(pub String);
