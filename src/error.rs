//! Error taxonomy shared by parsing, lowering and evaluation.

use crate::config::Dialect;

/// Errors produced while building, compiling or evaluating predicates.
///
/// Every variant is fatal to the single parse/compile/evaluate call that
/// raised it; nothing is retried or partially recovered.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Malformed source text, or a structural violation found while building the tree.
    #[error("Syntax error at position {position}: {message}")]
    Syntax {
        /// Character offset into the format string.
        position: usize,
        /// Explanation.
        message: String,
    },

    /// A selector that is not part of the builtin function table.
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Operand types that cannot be coerced, or an unsupported cast target.
    #[error("Type error: {0}")]
    Type(String),

    /// A `$name` reference with no enclosing binding.
    #[error("Unbound variable: ${0}")]
    UnboundVariable(String),

    /// A construct that only one dialect can express.
    #[error("{construct} is not supported in the {dialect} dialect")]
    UnsupportedInDialect {
        /// What was being lowered or rendered.
        construct: String,
        /// The dialect that rejected it.
        dialect: Dialect,
    },

    /// Division (or modulus) by an integer zero.
    #[error("Division by zero")]
    DivisionByZero,

    /// Any other failure raised while running a compiled tree.
    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

impl Error {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        Error::Syntax {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(construct: impl Into<String>, dialect: Dialect) -> Self {
        Error::UnsupportedInDialect {
            construct: construct.into(),
            dialect,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
