//! Semantic actions: turns grammar reductions into AST nodes.
//!
//! The [`Parser`](crate::parser::Parser) reports each reduction as a
//! [`Production`]; the builder keeps an explicit operand stack, pops the
//! arity each production needs and pushes the node it builds. Positional
//! arguments are located by scanning the raw format string before parsing,
//! so a placeholder token can be matched to its argument by source offset.

use std::collections::HashMap;

use tracing::trace;

use crate::ast::{
    Comparison, ComparisonOptions, Expr, Modifier, Operator, Predicate, SymbolicValue,
};
use crate::error::{Error, Result};
use crate::format::format_expr;
use crate::lower::functions::call_selector;
use crate::value::{Value, type_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

impl ArithmeticOp {
    /// The builtin selector this operator is sugar for.
    pub fn selector(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "add:to:",
            ArithmeticOp::Subtract => "from:subtract:",
            ArithmeticOp::Multiply => "multiply:by:",
            ArithmeticOp::Divide => "divide:by:",
            ArithmeticOp::Power => "raise:toPower:",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    All,
    None,
}

/// One grammar reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum Production {
    /// Pushes a constant.
    Literal(Value),
    /// Pushes the positional argument whose placeholder starts at this offset.
    Placeholder { conversion: char },
    EvaluatedObject,
    Variable(String),
    /// Pushes a one-segment key path (`name` or `@count`).
    KeyPath(String),
    Symbolic(SymbolicValue),
    /// Pops rhs, lhs: `lhs.rhs`.
    Dot,
    /// Pops index, collection: `collection[index]`.
    Index,
    /// Pops n items: `{ a, b }`.
    Aggregate(usize),
    /// Pops n arguments: `name(a, b)`.
    Call { name: String, arity: usize },
    /// Pops n arguments: `FUNCTION(...)`.
    FunctionForm { arity: usize },
    /// Pops predicate, collection.
    Subquery { variable: String },
    /// Pops rhs, lhs.
    Arithmetic(ArithmeticOp),
    /// Pops one operand: unary minus.
    Negate,
    /// Pops value, target variable: `$a := value`.
    Assignment,
    /// Pops rhs, lhs.
    Comparison {
        operator: Operator,
        options: ComparisonOptions,
    },
    /// Pops a direct comparison and applies the quantifier.
    Quantified(Quantifier),
    PredicateConstant(bool),
    /// Pops an expression standing where a predicate was expected.
    ExpressionPredicate,
    /// Pops n predicates.
    And(usize),
    /// Pops n predicates.
    Or(usize),
    /// Pops one predicate.
    Not,
}

#[derive(Debug, Clone)]
enum Operand {
    Expr(Expr),
    Predicate(Predicate),
}

pub struct Builder<'a> {
    stack: Vec<Operand>,
    arguments: &'a [Value],
    /// Source offset of each `%` placeholder mapped to its argument index.
    placeholders: HashMap<usize, usize>,
}

/// Finds every positional placeholder outside string literals, returning
/// the offset of each `%` in order.
pub fn scan_placeholders(format: &str) -> Vec<usize> {
    let chars: Vec<char> = format.chars().collect();
    let mut offsets = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match quote {
            Some(q) => {
                if ch == '\\' {
                    i += 1;
                } else if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '%' if chars.get(i + 1) == Some(&'%') => i += 1,
                '%' if chars
                    .get(i + 1)
                    .is_some_and(|c| *c == '@' || c.is_ascii_alphabetic()) =>
                {
                    offsets.push(i);
                }
                _ => {}
            },
        }
        i += 1;
    }

    offsets
}

impl<'a> Builder<'a> {
    /// Prepares a builder for `format`, checking the argument count.
    pub fn new(format: &str, arguments: &'a [Value]) -> Result<Self> {
        let offsets = scan_placeholders(format);
        if offsets.len() != arguments.len() {
            let position = offsets.get(arguments.len()).copied().unwrap_or(0);
            return Err(Error::syntax(
                position,
                format!(
                    "format has {} placeholder(s) but {} argument(s) were supplied",
                    offsets.len(),
                    arguments.len()
                ),
            ));
        }
        let placeholders = offsets
            .into_iter()
            .enumerate()
            .map(|(index, offset)| (offset, index))
            .collect();

        Ok(Builder {
            stack: Vec::new(),
            arguments,
            placeholders,
        })
    }

    /// Current operand stack height, for backtracking.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Discards operands pushed since `depth`.
    pub fn truncate(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }

    pub fn finish_expr(mut self) -> Result<Expr> {
        let expr = self.pop_expr(0)?;
        self.ensure_empty()?;
        Ok(expr)
    }

    pub fn finish_predicate(mut self) -> Result<Predicate> {
        let predicate = self.pop_predicate(0)?;
        self.ensure_empty()?;
        Ok(predicate)
    }

    fn ensure_empty(&self) -> Result<()> {
        if self.stack.is_empty() {
            Ok(())
        } else {
            Err(Error::syntax(
                0,
                format!("{} operand(s) left over after building", self.stack.len()),
            ))
        }
    }

    fn push_expr(&mut self, expr: Expr) {
        self.stack.push(Operand::Expr(expr));
    }

    fn push_predicate(&mut self, predicate: Predicate) {
        self.stack.push(Operand::Predicate(predicate));
    }

    fn pop_expr(&mut self, position: usize) -> Result<Expr> {
        match self.stack.pop() {
            Some(Operand::Expr(expr)) => Ok(expr),
            Some(Operand::Predicate(_)) => {
                Err(Error::syntax(position, "expected an expression, found a predicate"))
            }
            None => Err(Error::syntax(position, "missing operand")),
        }
    }

    fn pop_predicate(&mut self, position: usize) -> Result<Predicate> {
        match self.stack.pop() {
            Some(Operand::Predicate(predicate)) => Ok(predicate),
            Some(Operand::Expr(expr)) => Err(Error::syntax(
                position,
                format!("expected a predicate, found expression {}", format_expr(&expr)),
            )),
            None => Err(Error::syntax(position, "missing predicate")),
        }
    }

    fn pop_exprs(&mut self, count: usize, position: usize) -> Result<Vec<Expr>> {
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.pop_expr(position)?);
        }
        items.reverse();
        Ok(items)
    }

    fn pop_predicates(&mut self, count: usize, position: usize) -> Result<Vec<Predicate>> {
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.pop_predicate(position)?);
        }
        items.reverse();
        Ok(items)
    }

    /// Applies one reduction found at source offset `position`.
    pub fn apply(&mut self, position: usize, production: Production) -> Result<()> {
        trace!(position, ?production, "reduce");
        match production {
            Production::Literal(value) => self.push_expr(Expr::Constant(value)),
            Production::Placeholder { conversion } => {
                let expr = self.placeholder(position, conversion)?;
                self.push_expr(expr);
            }
            Production::EvaluatedObject => self.push_expr(Expr::EvaluatedObject),
            Production::Variable(name) => self.push_expr(Expr::Variable(name)),
            Production::KeyPath(path) => self.push_expr(Expr::key_path(path)),
            Production::Symbolic(symbol) => self.push_expr(Expr::Symbolic(symbol)),
            Production::Dot => {
                let rhs = self.pop_expr(position)?;
                let lhs = self.pop_expr(position)?;
                let expr = dot(lhs, rhs, position)?;
                self.push_expr(expr);
            }
            Production::Index => {
                let index = self.pop_expr(position)?;
                let collection = self.pop_expr(position)?;
                self.push_expr(Expr::index(collection, index));
            }
            Production::Aggregate(count) => {
                let items = self.pop_exprs(count, position)?;
                self.push_expr(Expr::Aggregate(items));
            }
            Production::Call { name, arity } => {
                let args = self.pop_exprs(arity, position)?;
                self.push_expr(call(&name, args));
            }
            Production::FunctionForm { arity } => {
                let args = self.pop_exprs(arity, position)?;
                let expr = function_form(args, position)?;
                self.push_expr(expr);
            }
            Production::Subquery { variable } => {
                let predicate = self.pop_predicate(position)?;
                let collection = self.pop_expr(position)?;
                self.push_expr(Expr::subquery(collection, variable, predicate));
            }
            Production::Arithmetic(op) => {
                let rhs = self.pop_expr(position)?;
                let lhs = self.pop_expr(position)?;
                self.push_expr(Expr::function(op.selector(), vec![lhs, rhs]));
            }
            Production::Negate => {
                let operand = self.pop_expr(position)?;
                self.push_expr(negate(operand));
            }
            Production::Assignment => {
                let value = self.pop_expr(position)?;
                match self.pop_expr(position)? {
                    Expr::Variable(name) => self.push_expr(Expr::assignment(name, value)),
                    other => {
                        return Err(Error::syntax(
                            position,
                            format!("cannot assign to {}", format_expr(&other)),
                        ));
                    }
                }
            }
            Production::Comparison { operator, options } => {
                let right = self.pop_expr(position)?;
                let left = self.pop_expr(position)?;
                self.push_predicate(Predicate::compare_with(
                    left,
                    operator,
                    right,
                    Modifier::Direct,
                    options,
                ));
            }
            Production::Quantified(quantifier) => {
                let predicate = self.pop_predicate(position)?;
                let quantified = quantify(predicate, quantifier, position)?;
                self.push_predicate(quantified);
            }
            Production::PredicateConstant(value) => self.push_predicate(Predicate::Constant(value)),
            Production::ExpressionPredicate => match self.pop_expr(position)? {
                Expr::Constant(Value::Boolean(value)) => {
                    self.push_predicate(Predicate::Constant(value))
                }
                other => {
                    return Err(Error::syntax(
                        position,
                        format!("expected a comparison after {}", format_expr(&other)),
                    ));
                }
            },
            Production::And(count) => {
                let subpredicates = self.pop_predicates(count, position)?;
                self.push_predicate(Predicate::and(subpredicates));
            }
            Production::Or(count) => {
                let subpredicates = self.pop_predicates(count, position)?;
                self.push_predicate(Predicate::or(subpredicates));
            }
            Production::Not => {
                let predicate = self.pop_predicate(position)?;
                self.push_predicate(Predicate::not(predicate));
            }
        }
        Ok(())
    }

    fn placeholder(&self, position: usize, conversion: char) -> Result<Expr> {
        let index = *self.placeholders.get(&position).ok_or_else(|| {
            Error::syntax(position, "placeholder was not found by the argument scan")
        })?;
        let argument = self
            .arguments
            .get(index)
            .ok_or_else(|| Error::syntax(position, "missing positional argument"))?;

        let mismatch = |expected: &str| {
            Error::syntax(
                position,
                format!(
                    "argument {} for %{} must be {}, got {}",
                    index + 1,
                    conversion,
                    expected,
                    type_name(argument)
                ),
            )
        };

        match conversion {
            'K' => match argument {
                Value::String(path) => Ok(Expr::key_path(path.clone())),
                _ => Err(mismatch("a key path string")),
            },
            '@' => Ok(Expr::Constant(argument.clone())),
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' if argument.as_i128().is_some() => {
                Ok(Expr::Constant(argument.clone()))
            }
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' => Err(mismatch("an integer")),
            'f' | 'e' | 'E' | 'g' | 'G' | 'a' | 'A' if argument.is_numeric() => {
                Ok(Expr::Constant(argument.clone()))
            }
            'f' | 'e' | 'E' | 'g' | 'G' | 'a' | 'A' => Err(mismatch("a number")),
            's' | 'S' | 'c' | 'C' => match argument {
                Value::String(_) => Ok(Expr::Constant(argument.clone())),
                _ => Err(mismatch("a string")),
            },
            other => Err(Error::syntax(
                position,
                format!("unsupported format specifier %{}", other),
            )),
        }
    }
}

fn dot(lhs: Expr, rhs: Expr, position: usize) -> Result<Expr> {
    let rhs_path = match rhs {
        Expr::KeyPath {
            operand: None,
            path,
        } => path,
        other => {
            return Err(Error::syntax(
                position,
                format!(
                    "expression to the right of '.' must be a key path (instead saw {} '.' {})",
                    format_expr(&lhs),
                    format_expr(&other)
                ),
            ));
        }
    };

    Ok(match lhs {
        Expr::KeyPath { operand, path } => Expr::KeyPath {
            operand,
            path: format!("{}.{}", path, rhs_path),
        },
        other => Expr::key_path_on(other, rhs_path),
    })
}

fn negate(operand: Expr) -> Expr {
    match operand {
        Expr::Constant(Value::Int(n)) if n != i32::MIN => Expr::Constant(Value::Int(-n)),
        Expr::Constant(Value::Long(n)) if n != i64::MIN => match i32::try_from(-n) {
            Ok(small) => Expr::Constant(Value::Int(small)),
            Err(_) => Expr::Constant(Value::Long(-n)),
        },
        // Only reachable from `-9223372036854775808`.
        Expr::Constant(Value::ULong(n)) if n == i64::MIN.unsigned_abs() => {
            Expr::Constant(Value::Long(i64::MIN))
        }
        Expr::Constant(Value::Double(n)) => Expr::Constant(Value::Double(-n)),
        Expr::Constant(Value::Float(n)) => Expr::Constant(Value::Float(-n)),
        other => Expr::function(
            ArithmeticOp::Subtract.selector(),
            vec![Expr::Constant(Value::Int(0)), other],
        ),
    }
}

/// `name(args)` call sugar, resolved against the builtin table by arity.
fn call(name: &str, args: Vec<Expr>) -> Expr {
    let lower = name.to_lowercase();
    let selector = match call_selector(&lower, args.len()) {
        Some(selector) => selector.to_string(),
        None if args.is_empty() => lower,
        None => format!("{}:", lower),
    };
    Expr::function(selector, args)
}

/// `FUNCTION('selector:', args...)` or `FUNCTION(receiver, 'selector:', args...)`.
fn function_form(mut args: Vec<Expr>, position: usize) -> Result<Expr> {
    let is_selector = |expr: &Expr, allow_bare: bool| match expr {
        Expr::Constant(Value::String(s)) => allow_bare || s.contains(':'),
        _ => false,
    };

    if args.is_empty() {
        return Err(Error::syntax(position, "FUNCTION requires a selector"));
    }

    if is_selector(&args[0], args.len() == 1) {
        let selector = match args.remove(0) {
            Expr::Constant(Value::String(s)) => s,
            _ => return Err(Error::syntax(position, "FUNCTION selector must be a string")),
        };
        return Ok(Expr::function(selector, args));
    }

    if args.len() >= 2 && is_selector(&args[1], true) {
        let selector = match args.remove(1) {
            Expr::Constant(Value::String(s)) => s,
            _ => return Err(Error::syntax(position, "FUNCTION selector must be a string")),
        };
        return Ok(Expr::function(selector, args));
    }

    Err(Error::syntax(
        position,
        "FUNCTION expects a selector string as its first or second argument",
    ))
}

fn quantify(predicate: Predicate, quantifier: Quantifier, position: usize) -> Result<Predicate> {
    match predicate {
        Predicate::Comparison(
            comparison @ Comparison {
                modifier: Modifier::Direct,
                ..
            },
        ) => {
            let modifier = match quantifier {
                Quantifier::All => Modifier::All,
                Quantifier::Any | Quantifier::None => Modifier::Any,
            };
            let quantified = Predicate::Comparison(Comparison {
                modifier,
                ..comparison
            });
            Ok(match quantifier {
                Quantifier::None => Predicate::not(quantified),
                _ => quantified,
            })
        }
        _ => Err(Error::syntax(
            position,
            "ANY, ALL and NONE must be followed by a single comparison",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_skips_strings_and_escapes() {
        assert_eq!(scan_placeholders("%@ == '%d' AND %K > %%"), vec![0, 15]);
        assert_eq!(scan_placeholders("a == \"it\\\"s %@\" OR b == %d"), vec![24]);
    }

    #[test]
    fn test_argument_count_mismatch() {
        let args = [Value::Int(1)];
        assert!(matches!(
            Builder::new("%d == %d", &args),
            Err(Error::Syntax { position: 6, .. })
        ));
        assert!(Builder::new("a == 1", &args).is_err());
    }

    #[test]
    fn test_placeholder_type_mismatch() {
        let args = [Value::from("x")];
        let mut builder = Builder::new("%d", &args).unwrap();
        let result = builder.apply(0, Production::Placeholder { conversion: 'd' });
        assert!(matches!(result, Err(Error::Syntax { .. })));
    }

    #[test]
    fn test_key_path_placeholder() {
        let args = [Value::from("Name")];
        let mut builder = Builder::new("%K", &args).unwrap();
        builder
            .apply(0, Production::Placeholder { conversion: 'K' })
            .unwrap();
        assert_eq!(builder.finish_expr().unwrap(), Expr::key_path("Name"));
    }

    #[test]
    fn test_dot_folds_key_paths() {
        let mut builder = Builder::new("", &[]).unwrap();
        builder.apply(0, Production::Variable("c".into())).unwrap();
        builder.apply(3, Production::KeyPath("name".into())).unwrap();
        builder.apply(2, Production::Dot).unwrap();
        builder.apply(8, Production::KeyPath("first".into())).unwrap();
        builder.apply(7, Production::Dot).unwrap();
        assert_eq!(
            builder.finish_expr().unwrap(),
            Expr::key_path_on(Expr::variable("c"), "name.first")
        );
    }

    #[test]
    fn test_dot_rejects_non_key_path() {
        let mut builder = Builder::new("", &[]).unwrap();
        builder.apply(0, Production::KeyPath("a".into())).unwrap();
        builder.apply(2, Production::Literal(Value::Int(1))).unwrap();
        let err = builder.apply(1, Production::Dot).unwrap_err();
        assert!(matches!(err, Error::Syntax { position: 1, .. }));
    }

    #[test]
    fn test_none_wraps_any_in_not() {
        let mut builder = Builder::new("", &[]).unwrap();
        builder.apply(0, Production::KeyPath("xs".into())).unwrap();
        builder.apply(0, Production::Literal(Value::Int(1))).unwrap();
        builder
            .apply(
                0,
                Production::Comparison {
                    operator: Operator::EqualTo,
                    options: ComparisonOptions::NONE,
                },
            )
            .unwrap();
        builder.apply(0, Production::Quantified(Quantifier::None)).unwrap();
        let predicate = builder.finish_predicate().unwrap();
        assert_eq!(
            predicate,
            Predicate::not(Predicate::compare_with(
                Expr::key_path("xs"),
                Operator::EqualTo,
                Expr::constant(1),
                Modifier::Any,
                ComparisonOptions::NONE,
            ))
        );
    }

    #[test]
    fn test_negate_folds_constants() {
        assert_eq!(negate(Expr::constant(5)), Expr::constant(-5));
        assert_eq!(negate(Expr::constant(1.5)), Expr::constant(-1.5));
        assert_eq!(
            negate(Expr::Constant(Value::Long(2_147_483_648))),
            Expr::Constant(Value::Int(i32::MIN))
        );
        assert_eq!(
            negate(Expr::Constant(Value::ULong(1 << 63))),
            Expr::Constant(Value::Long(i64::MIN))
        );
        assert_eq!(
            negate(Expr::key_path("a")),
            Expr::function("from:subtract:", vec![Expr::constant(0), Expr::key_path("a")])
        );
    }

    #[test]
    fn test_function_form_variants() {
        let selector_first = function_form(
            vec![Expr::constant("modulus:by:"), Expr::constant(10), Expr::constant(7)],
            0,
        )
        .unwrap();
        assert_eq!(
            selector_first,
            Expr::function("modulus:by:", vec![Expr::constant(10), Expr::constant(7)])
        );

        let receiver_first = function_form(
            vec![
                Expr::function("now", vec![]),
                Expr::constant("dateByAddingDays:"),
                Expr::constant(-2),
            ],
            0,
        )
        .unwrap();
        assert_eq!(
            receiver_first,
            Expr::function(
                "dateByAddingDays:",
                vec![Expr::function("now", vec![]), Expr::constant(-2)]
            )
        );
    }
}
