//! # Sieve Predicate Language - Abstract Syntax Tree
//!
//! This module defines the two mutually recursive trees of the language:
//! value-producing [`Expr`] nodes and boolean-producing [`Predicate`] nodes.
//!
//! ## Architecture Overview
//!
//! - **[tokens]** - Lexical tokens produced by the lexer
//! - **[expressions]** - Expression nodes (constants, key paths, functions, subqueries)
//! - **[predicates]** - Comparison, compound and constant predicates
//! - **[operators]** - Comparison operators, quantifiers, options and symbolic indexes
//!
//! ## Quick Start
//!
//! ```text
//! ANY employees.name BEGINSWITH[c] 'jo' AND salary > %d
//! ```
//!
//! ## Core Concepts
//!
//! ### Key paths
//!
//! Dotted identifiers navigate properties starting at the evaluated object
//! (`SELF`) or at an explicit operand such as a `$variable`:
//!
//! ```text
//! author.name
//! SELF.author.name
//! $k.title
//! tags.@count
//! ```
//!
//! ### Functions
//!
//! Arithmetic is sugar over selector-named builtins; `1 + 2` builds
//! `FUNCTION('add:to:', 1, 2)`. A single-argument selector may also be
//! called on a receiver:
//!
//! ```text
//! FUNCTION(now(), 'dateByAddingDays:', -2)
//! ```
//!
//! ### Subqueries
//!
//! ```text
//! SUBQUERY(keywords, $k, $k BEGINSWITH 'hello').@count > 0
//! ```
//!
//! Both trees are plain owned values. They are built once (by parsing or by
//! the factory functions on [`Expr`] and [`Predicate`]) and read by the
//! formatter and the compiler; only a [`Visitor`](crate::visitor::Visitor)
//! rewrites them in place.
pub mod tokens;
pub mod expressions;
pub mod predicates;
pub mod operators;

pub use tokens::Token;
pub use expressions::Expr;
pub use predicates::{Comparison, Predicate};
pub use operators::{
    ComparisonOptions, CompoundKind, Modifier, Operator, SymbolicValue,
};
