//! The builtin function table and its lowering.
//!
//! Selectors are matched case-insensitively. Every entry has a fixed arity;
//! a selector missing from [`BUILTINS`] fails at compile time.

use tracing::trace;

use crate::ast::{Expr, SymbolicValue};
use crate::coerce::{cast, make_comparable};
use crate::config::Dialect;
use crate::error::{Error, Result};
use crate::evaluator::apply_cast;
use crate::lower::{Bindings, Lowerer};
use crate::target::{BinaryOp, Builtin, DateUnit, Node, Reduction, Target, UnaryOp};
use crate::types::TypeKind;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Lowering {
    Reduce(Reduction),
    Count,
    Arithmetic(BinaryOp),
    Math(Builtin),
    Rounding(Builtin),
    Abs,
    Negate,
    Text(Builtin),
    Bitwise(BinaryOp),
    Shift(BinaryOp),
    OnesComplement,
    Random,
    RandomBelow,
    Now,
    Index,
    Cast,
    DateAdd(DateUnit),
}

struct FunctionDef {
    selector: &'static str,
    arity: usize,
    lowering: Lowering,
}

const fn def(selector: &'static str, arity: usize, lowering: Lowering) -> FunctionDef {
    FunctionDef {
        selector,
        arity,
        lowering,
    }
}

static BUILTINS: &[FunctionDef] = &[
    def("sum:", 1, Lowering::Reduce(Reduction::Sum)),
    def("count:", 1, Lowering::Count),
    def("min:", 1, Lowering::Reduce(Reduction::Min)),
    def("max:", 1, Lowering::Reduce(Reduction::Max)),
    def("average:", 1, Lowering::Reduce(Reduction::Average)),
    def("add:to:", 2, Lowering::Arithmetic(BinaryOp::Add)),
    def("from:subtract:", 2, Lowering::Arithmetic(BinaryOp::Subtract)),
    def("multiply:by:", 2, Lowering::Arithmetic(BinaryOp::Multiply)),
    def("divide:by:", 2, Lowering::Arithmetic(BinaryOp::Divide)),
    def("modulus:by:", 2, Lowering::Arithmetic(BinaryOp::Modulo)),
    def("raise:toPower:", 2, Lowering::Arithmetic(BinaryOp::Power)),
    def("sqrt:", 1, Lowering::Math(Builtin::Sqrt)),
    def("log:", 1, Lowering::Math(Builtin::Log10)),
    def("ln:", 1, Lowering::Math(Builtin::Ln)),
    def("exp:", 1, Lowering::Math(Builtin::Exp)),
    def("floor:", 1, Lowering::Rounding(Builtin::Floor)),
    def("ceiling:", 1, Lowering::Rounding(Builtin::Ceiling)),
    def("trunc:", 1, Lowering::Rounding(Builtin::Trunc)),
    def("abs:", 1, Lowering::Abs),
    def("negate:", 1, Lowering::Negate),
    def("uppercase:", 1, Lowering::Text(Builtin::Uppercase)),
    def("lowercase:", 1, Lowering::Text(Builtin::Lowercase)),
    def("length:", 1, Lowering::Text(Builtin::Length)),
    def("bitwiseAnd:with:", 2, Lowering::Bitwise(BinaryOp::BitAnd)),
    def("bitwiseOr:with:", 2, Lowering::Bitwise(BinaryOp::BitOr)),
    def("bitwiseXor:with:", 2, Lowering::Bitwise(BinaryOp::BitXor)),
    def("leftshift:by:", 2, Lowering::Shift(BinaryOp::ShiftLeft)),
    def("rightshift:by:", 2, Lowering::Shift(BinaryOp::ShiftRight)),
    def("onesComplement:", 1, Lowering::OnesComplement),
    def("random", 0, Lowering::Random),
    def("randomn:", 1, Lowering::RandomBelow),
    def("now", 0, Lowering::Now),
    def("objectFrom:withIndex:", 2, Lowering::Index),
    def("castObject:toType:", 2, Lowering::Cast),
    def("dateByAddingSeconds:", 2, Lowering::DateAdd(DateUnit::Seconds)),
    def("dateByAddingMinutes:", 2, Lowering::DateAdd(DateUnit::Minutes)),
    def("dateByAddingHours:", 2, Lowering::DateAdd(DateUnit::Hours)),
    def("dateByAddingDays:", 2, Lowering::DateAdd(DateUnit::Days)),
    def("dateByAddingMonths:", 2, Lowering::DateAdd(DateUnit::Months)),
    def("dateByAddingYears:", 2, Lowering::DateAdd(DateUnit::Years)),
    def("addSeconds:", 2, Lowering::DateAdd(DateUnit::Seconds)),
    def("addMinutes:", 2, Lowering::DateAdd(DateUnit::Minutes)),
    def("addHours:", 2, Lowering::DateAdd(DateUnit::Hours)),
    def("addDays:", 2, Lowering::DateAdd(DateUnit::Days)),
    def("addMonths:", 2, Lowering::DateAdd(DateUnit::Months)),
    def("addYears:", 2, Lowering::DateAdd(DateUnit::Years)),
];

fn lookup(selector: &str) -> Option<&'static FunctionDef> {
    BUILTINS
        .iter()
        .find(|def| def.selector.eq_ignore_ascii_case(selector))
}

/// Resolves call sugar like `sum(x)` or `cast(x, 'NSNumber')` to the table
/// selector whose first keyword is `name` and whose arity matches.
pub(crate) fn call_selector(name: &str, arity: usize) -> Option<&'static str> {
    if name.eq_ignore_ascii_case("cast") && arity == 2 {
        return Some("castObject:toType:");
    }
    BUILTINS
        .iter()
        .find(|def| {
            def.arity == arity
                && def
                    .selector
                    .split(':')
                    .next()
                    .is_some_and(|keyword| keyword.eq_ignore_ascii_case(name))
        })
        .map(|def| def.selector)
}

/// True if `selector` names a builtin.
pub fn is_builtin(selector: &str) -> bool {
    lookup(selector).is_some()
}

pub(crate) fn lower_function(
    lowerer: &mut Lowerer<'_>,
    name: &str,
    args: &[Expr],
    bindings: &mut Bindings,
) -> Result<Target> {
    let def = lookup(name).ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
    if def.arity != args.len() {
        return Err(Error::Type(format!(
            "{} takes {} argument(s), got {}",
            def.selector,
            def.arity,
            args.len()
        )));
    }
    trace!(selector = def.selector, "dispatching builtin");

    // The index operand may be symbolic, so it is resolved against the
    // lowered collection instead of on its own.
    if def.lowering == Lowering::Index {
        let source = lowerer.lower_expr(&args[0], bindings)?;
        return lower_index(lowerer, source, &args[1], bindings);
    }

    let mut lowered = Vec::with_capacity(args.len());
    for arg in args {
        lowered.push(lowerer.lower_expr(arg, bindings)?);
    }
    let mut lowered = lowered.into_iter();
    let mut next = || {
        lowered
            .next()
            .ok_or_else(|| Error::Type(format!("missing argument to {}", def.selector)))
    };

    match def.lowering {
        Lowering::Reduce(reduction) => {
            let source = next()?;
            let element = collection_element(&source, def.selector)?;
            lowerer.reduce(source, reduction, &element)
        }
        Lowering::Count => {
            let source = next()?;
            collection_element(&source, def.selector)?;
            lowerer.guarded(source, |_, source| Ok(Target::count(source)))
        }
        Lowering::Arithmetic(op) => {
            let left = next()?;
            let right = next()?;
            arithmetic(op, left, right, def.selector)
        }
        Lowering::Math(builtin) => {
            let arg = numeric_operand(next()?, def.selector)?;
            let arg = if arg.ty.is_dynamic() {
                arg
            } else {
                cast(arg, &TypeKind::Double)?
            };
            Ok(Target::call(builtin, vec![arg], TypeKind::Double))
        }
        Lowering::Rounding(builtin) => {
            let arg = numeric_operand(next()?, def.selector)?;
            let ty = rounded_kind(&arg.ty);
            Ok(Target::call(builtin, vec![arg], ty))
        }
        Lowering::Abs => {
            let arg = numeric_operand(next()?, def.selector)?;
            let ty = arg.ty.clone();
            Ok(Target::call(Builtin::Abs, vec![arg], ty))
        }
        Lowering::Negate => {
            let arg = numeric_operand(next()?, def.selector)?;
            let ty = arg.ty.clone();
            Ok(Target::unary(UnaryOp::Negate, arg, ty))
        }
        Lowering::Text(builtin) => {
            let arg = next()?;
            if !matches!(arg.ty, TypeKind::String | TypeKind::Any | TypeKind::Null) {
                return Err(Error::Type(format!(
                    "{} requires a string, got {}",
                    def.selector, arg.ty
                )));
            }
            let ty = if builtin == Builtin::Length {
                TypeKind::Int
            } else {
                TypeKind::String
            };
            lowerer.guarded(arg, move |_, arg| Ok(Target::call(builtin, vec![arg], ty)))
        }
        Lowering::Bitwise(op) => {
            let left = integer_operand(next()?, def.selector)?;
            let right = integer_operand(next()?, def.selector)?;
            if left.ty.is_dynamic() || right.ty.is_dynamic() {
                return Ok(Target::binary(op, left, right, TypeKind::Any));
            }
            let (left, right) = make_comparable(left, right)?;
            let ty = left.ty.clone();
            Ok(Target::binary(op, left, right, ty))
        }
        Lowering::Shift(op) => {
            let left = integer_operand(next()?, def.selector)?;
            let right = integer_operand(next()?, def.selector)?;
            let ty = left.ty.clone();
            Ok(Target::binary(op, left, right, ty))
        }
        Lowering::OnesComplement => {
            let arg = integer_operand(next()?, def.selector)?;
            let ty = arg.ty.clone();
            Ok(Target::unary(UnaryOp::OnesComplement, arg, ty))
        }
        Lowering::Random => Ok(Target::call(Builtin::Random, vec![], TypeKind::Int)),
        Lowering::RandomBelow => {
            let upper = numeric_operand(next()?, def.selector)?;
            Ok(Target::call(Builtin::RandomBelow, vec![upper], TypeKind::Int))
        }
        Lowering::Now => Ok(Target::call(Builtin::Now, vec![], TypeKind::Date)),
        Lowering::Cast => {
            let value = next()?;
            let to = next()?;
            lower_cast(lowerer, value, to)
        }
        Lowering::DateAdd(unit) => {
            let date = next()?;
            let amount = numeric_operand(next()?, def.selector)?;
            if !matches!(date.ty, TypeKind::Date | TypeKind::Any | TypeKind::Null) {
                return Err(Error::Type(format!(
                    "{} requires a date receiver, got {}",
                    def.selector, date.ty
                )));
            }
            lower_date_add(lowerer, unit, date, amount)
        }
        Lowering::Index => Err(Error::Type(format!("{} was not resolved", def.selector))),
    }
}

fn collection_element(source: &Target, selector: &str) -> Result<TypeKind> {
    source.ty.element_type().ok_or_else(|| {
        Error::Type(format!(
            "{} requires a collection, got {}",
            selector, source.ty
        ))
    })
}

fn numeric_operand(target: Target, selector: &str) -> Result<Target> {
    if target.ty.is_numeric() || target.ty.is_dynamic() {
        Ok(target)
    } else {
        Err(Error::Type(format!(
            "{} requires a number, got {}",
            selector, target.ty
        )))
    }
}

fn integer_operand(target: Target, selector: &str) -> Result<Target> {
    if target.ty.is_integer() || target.ty.is_dynamic() {
        Ok(target)
    } else {
        Err(Error::Type(format!(
            "{} requires an integer, got {}",
            selector, target.ty
        )))
    }
}

/// Integers round to themselves; everything else rounds to a double.
fn rounded_kind(kind: &TypeKind) -> TypeKind {
    if kind.is_integer() || kind.is_dynamic() {
        kind.clone()
    } else {
        TypeKind::Double
    }
}

fn arithmetic(op: BinaryOp, left: Target, right: Target, selector: &str) -> Result<Target> {
    let left = numeric_operand(left, selector)?;
    let right = numeric_operand(right, selector)?;

    if op == BinaryOp::Power {
        let left = cast(left, &TypeKind::Double)?;
        let right = cast(right, &TypeKind::Double)?;
        return Ok(Target::binary(op, left, right, TypeKind::Double));
    }

    if left.ty.is_dynamic() || right.ty.is_dynamic() {
        return Ok(Target::binary(op, left, right, TypeKind::Any));
    }

    let (left, right) = make_comparable(left, right)?;
    let ty = left.ty.clone();
    Ok(Target::binary(op, left, right, ty))
}

/// `collection[index]`, resolving FIRST, LAST and SIZE against the collection.
fn lower_index(
    lowerer: &mut Lowerer<'_>,
    source: Target,
    index: &Expr,
    bindings: &mut Bindings,
) -> Result<Target> {
    let element = collection_element(&source, "objectFrom:withIndex:")?;

    match index {
        Expr::Symbolic(SymbolicValue::Size) => {
            lowerer.guarded(source, |_, source| Ok(Target::count(source)))
        }
        Expr::Symbolic(SymbolicValue::First) => lowerer.guarded(source, move |_, source| {
            Ok(Target::element_at(
                source,
                Target::constant(Value::Int(0)),
                element,
            ))
        }),
        Expr::Symbolic(SymbolicValue::Last) => lowerer.guarded(source, move |_, source| {
            let last = Target::binary(
                BinaryOp::Subtract,
                Target::count(source.clone()),
                Target::constant(Value::Int(1)),
                TypeKind::Int,
            );
            Ok(Target::element_at(source, last, element))
        }),
        index => {
            let index = lowerer.lower_expr(index, bindings)?;
            let index = integer_operand(index, "objectFrom:withIndex:")?;
            lowerer.guarded(source, move |_, source| {
                Ok(Target::element_at(source, index, element))
            })
        }
    }
}

/// Casts of non-null constants fold at compile time, in either dialect.
fn lower_cast(lowerer: &mut Lowerer<'_>, value: Target, to: Target) -> Result<Target> {
    let type_name = match to.as_constant() {
        Some(Value::String(name)) => name.clone(),
        _ => {
            return Err(Error::Type(
                "castObject:toType: requires a constant type name".to_string(),
            ));
        }
    };

    let (builtin, ty) = match type_name.as_str() {
        "NSNumber" => (Builtin::CastNumber, TypeKind::Double),
        "NSString" => (Builtin::CastString, TypeKind::String),
        "NSDate" => (Builtin::CastDate, TypeKind::Date),
        other => {
            return Err(Error::Type(format!("unsupported cast target '{}'", other)));
        }
    };

    if let Some(constant) = value.as_constant()
        && !constant.is_null()
    {
        return apply_cast(builtin, constant).map(Target::constant);
    }
    if lowerer.dialect() == Dialect::Backend {
        return Err(Error::unsupported("castObject:toType:", Dialect::Backend));
    }
    Ok(Target::call(builtin, vec![value], ty))
}

fn lower_date_add(
    lowerer: &mut Lowerer<'_>,
    unit: DateUnit,
    date: Target,
    amount: Target,
) -> Result<Target> {
    match lowerer.dialect() {
        Dialect::Objects => {
            let amount = if amount.ty.is_dynamic() {
                amount
            } else {
                cast(amount, &TypeKind::Double)?
            };
            lowerer.guarded(date, move |_, date| {
                Ok(Target::call(
                    Builtin::DateAdd(unit),
                    vec![date, amount],
                    TypeKind::Date,
                ))
            })
        }
        Dialect::Backend => {
            let amount = match amount.as_constant() {
                Some(_) if amount.ty.is_numeric() => cast(amount, &TypeKind::Int)?,
                _ => amount,
            };
            Ok(Target::new(
                TypeKind::Date,
                Node::Call {
                    builtin: Builtin::BackendDateAdd(unit),
                    args: vec![date, amount],
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::lower::lower_expr;

    fn lower(expr: &Expr) -> Result<Target> {
        lower_expr(expr, &TypeKind::Any, &CompileOptions::new())
    }

    #[test]
    fn test_call_sugar_resolves_by_arity() {
        assert_eq!(call_selector("sum", 1), Some("sum:"));
        assert_eq!(call_selector("now", 0), Some("now"));
        assert_eq!(call_selector("ADD", 2), Some("add:to:"));
        assert_eq!(call_selector("cast", 2), Some("castObject:toType:"));
        assert_eq!(call_selector("sum", 2), None);
    }

    #[test]
    fn test_unknown_selector() {
        let result = lower(&Expr::function("median:", vec![Expr::constant(1)]));
        assert_eq!(result, Err(Error::UnknownFunction("median:".to_string())));
    }

    #[test]
    fn test_selector_lookup_ignores_case() {
        let expr = Expr::function(
            "RAISE:TOPOWER:",
            vec![Expr::constant(2), Expr::constant(3)],
        );
        assert_eq!(lower(&expr).unwrap().ty, TypeKind::Double);
    }

    #[test]
    fn test_arity_mismatch_is_type_error() {
        let result = lower(&Expr::function("sqrt:", vec![]));
        assert!(matches!(result, Err(Error::Type(_))));
    }

    #[test]
    fn test_arithmetic_promotes() {
        let expr = Expr::function(
            "add:to:",
            vec![Expr::constant(Value::Short(1)), Expr::constant(Value::Long(2))],
        );
        assert_eq!(lower(&expr).unwrap().ty, TypeKind::Long);
    }

    #[test]
    fn test_arithmetic_rejects_strings() {
        let expr = Expr::function("add:to:", vec![Expr::constant("a"), Expr::constant(1)]);
        assert!(matches!(lower(&expr), Err(Error::Type(_))));
    }

    #[test]
    fn test_size_index_becomes_count() {
        let expr = Expr::index(
            Expr::aggregate(vec![Expr::constant(1), Expr::constant(2)]),
            Expr::symbolic(SymbolicValue::Size),
        );
        let target = lower(&expr).unwrap();
        assert!(matches!(target.node, Node::Count(_)));
    }

    #[test]
    fn test_cast_is_rejected_by_backend() {
        let expr = Expr::function(
            "castObject:toType:",
            vec![Expr::key_path("code"), Expr::constant("NSNumber")],
        );
        let options = CompileOptions::new().dialect(Dialect::Backend);
        let result = lower_expr(&expr, &TypeKind::Any, &options);
        assert!(matches!(result, Err(Error::UnsupportedInDialect { .. })));
    }

    #[test]
    fn test_constant_casts_fold() {
        let expr = Expr::function(
            "castObject:toType:",
            vec![Expr::constant("1.5"), Expr::constant("NSNumber")],
        );
        let options = CompileOptions::new().dialect(Dialect::Backend);
        let target = lower_expr(&expr, &TypeKind::Any, &options).unwrap();
        assert_eq!(target.node, Node::Constant(Value::Double(1.5)));
        assert_eq!(target.ty, TypeKind::Double);
    }

    #[test]
    fn test_cast_target_is_restricted() {
        let expr = Expr::function(
            "castObject:toType:",
            vec![Expr::constant("1"), Expr::constant("NSArray")],
        );
        assert!(matches!(lower(&expr), Err(Error::Type(_))));
    }

    #[test]
    fn test_backend_date_add_takes_integer_amount() {
        let expr = Expr::function(
            "dateByAddingDays:",
            vec![Expr::function("now", vec![]), Expr::constant(-2.0)],
        );
        let options = CompileOptions::new().dialect(Dialect::Backend);
        let target = lower_expr(&expr, &TypeKind::Any, &options).unwrap();
        match target.node {
            Node::Call { builtin, args } => {
                assert_eq!(builtin, Builtin::BackendDateAdd(DateUnit::Days));
                assert_eq!(args[1].as_constant(), Some(&Value::Int(-2)));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }
}
