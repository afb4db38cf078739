pub mod ast;
pub mod builder;
pub mod coerce;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod format;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod runtime;
pub mod sql;
pub mod target;
pub mod types;
pub mod value;
pub mod visitor;

#[cfg(feature = "cli")]
pub mod cli;

pub use ast::{
    Comparison, ComparisonOptions, CompoundKind, Expr, Modifier, Operator, Predicate,
    SymbolicValue, Token,
};
pub use config::{CompileOptions, Dialect};
pub use error::{Error, Result};
pub use evaluator::{CompiledExpr, CompiledPredicate, Env, Evaluator};
pub use format::{format_expr, format_predicate};
pub use lexer::Lexer;
pub use lower::{Bindings, Lowerer, compile_expr, compile_predicate, lower_expr, lower_predicate};
pub use parser::{Parser, parse_expression, parse_predicate};
pub use runtime::{Clock, FixedClock, RandomSource, SystemClock, ThreadRandom};
pub use target::Target;
pub use types::{RecordType, TypeKind};
pub use value::Value;
pub use visitor::{GuidRewriter, PascalCaseRewriter, Visitor};
