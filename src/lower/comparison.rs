//! Comparison lowering: case folding, coercion, operator mapping and
//! `ANY`/`ALL` expansion.

use crate::ast::{Comparison, Modifier, Operator};
use crate::coerce::make_comparable;
use crate::error::{Error, Result};
use crate::lower::{Bindings, Lowerer};
use crate::target::{BinaryOp, Builtin, Node, Quantifier, Target};
use crate::types::TypeKind;
use crate::value::Value;

pub(crate) fn lower_comparison(
    lowerer: &mut Lowerer<'_>,
    comparison: &Comparison,
    bindings: &mut Bindings,
) -> Result<Target> {
    let mut left = lowerer.lower_expr(&comparison.left, bindings)?;
    let mut right = lowerer.lower_expr(&comparison.right, bindings)?;

    if comparison.options.case_insensitive && lowerer.options.folds_case() {
        left = fold_case(lowerer, left)?;
        if comparison.operator != Operator::Matches {
            right = fold_case(lowerer, right)?;
        }
    }

    let quantifier = match comparison.modifier {
        Modifier::Direct => return compare(lowerer, comparison.operator, left, right),
        Modifier::All => Quantifier::All,
        Modifier::Any => Quantifier::Any,
    };

    let element = left.ty.element_type().ok_or_else(|| {
        Error::Type(format!(
            "{} requires a collection on the left, got {}",
            quantifier_keyword(quantifier),
            left.ty
        ))
    })?;
    let operator = comparison.operator;
    // The right operand runs once, even over an empty or null collection.
    lowerer.shared(left, move |lowerer, left| {
        lowerer.shared(right, move |lowerer, right| {
            let parameter = lowerer.fresh("q");
            let item = Target::parameter(parameter.clone(), element);
            let predicate = compare(lowerer, operator, item, right)?;
            Ok(Target::new(
                TypeKind::Boolean,
                Node::Quantify {
                    quantifier,
                    source: Box::new(left),
                    parameter,
                    predicate: Box::new(predicate),
                },
            ))
        })
    })
}

fn quantifier_keyword(quantifier: Quantifier) -> &'static str {
    match quantifier {
        Quantifier::All => "ALL",
        Quantifier::Any => "ANY",
    }
}

/// Lowercases string operands; collections of strings are folded element-wise.
fn fold_case(lowerer: &mut Lowerer<'_>, target: Target) -> Result<Target> {
    let element = match &target.ty {
        TypeKind::String | TypeKind::Any => None,
        TypeKind::Sequence(element) if matches!(**element, TypeKind::String | TypeKind::Any) => {
            Some((**element).clone())
        }
        _ => return Ok(target),
    };

    let Some(element) = element else {
        if let Some(Value::String(s)) = target.as_constant() {
            return Ok(Target::constant(Value::String(s.to_lowercase())));
        }
        let ty = target.ty.clone();
        return lowerer.guarded(target, move |_, subject| {
            Ok(Target::call(Builtin::Lowercase, vec![subject], ty))
        });
    };

    match target.node {
        Node::List(items) => {
            let items = items
                .into_iter()
                .map(|item| fold_case(lowerer, item))
                .collect::<Result<_>>()?;
            Ok(Target::new(target.ty, Node::List(items)))
        }
        node => {
            let ty = target.ty;
            let parameter = lowerer.fresh("f");
            let item = Target::parameter(parameter.clone(), element);
            let body = fold_case(lowerer, item)?;
            Ok(Target::new(
                ty.clone(),
                Node::Map {
                    source: Box::new(Target::new(ty, node)),
                    parameter,
                    body: Box::new(body),
                },
            ))
        }
    }
}

fn relational(operator: Operator) -> Option<BinaryOp> {
    Some(match operator {
        Operator::LessThan => BinaryOp::Less,
        Operator::LessThanOrEqualTo => BinaryOp::LessEqual,
        Operator::GreaterThan => BinaryOp::Greater,
        Operator::GreaterThanOrEqualTo => BinaryOp::GreaterEqual,
        Operator::EqualTo => BinaryOp::Equal,
        Operator::NotEqualTo => BinaryOp::NotEqual,
        _ => return None,
    })
}

/// A direct comparison of two lowered operands.
fn compare(
    lowerer: &mut Lowerer<'_>,
    operator: Operator,
    left: Target,
    right: Target,
) -> Result<Target> {
    if let Some(op) = relational(operator) {
        let (left, right) = make_comparable(left, right)?;
        return Ok(Target::binary(op, left, right, TypeKind::Boolean));
    }

    match operator {
        Operator::Matches => string_test(lowerer, Builtin::Matches, left, right),
        Operator::Like => string_test(lowerer, Builtin::Like, left, right),
        Operator::BeginsWith => string_test(lowerer, Builtin::BeginsWith, left, right),
        Operator::EndsWith => string_test(lowerer, Builtin::EndsWith, left, right),
        Operator::Contains => contains(lowerer, left, right),
        Operator::In => contains(lowerer, right, left),
        Operator::Between => between(lowerer, left, right),
        other => Err(Error::Type(format!("operator {} cannot be lowered", other))),
    }
}

fn string_test(
    lowerer: &mut Lowerer<'_>,
    builtin: Builtin,
    left: Target,
    right: Target,
) -> Result<Target> {
    for side in [&left, &right] {
        if !matches!(side.ty, TypeKind::String | TypeKind::Any | TypeKind::Null) {
            return Err(Error::Type(format!(
                "{:?} requires string operands, got {}",
                builtin, side.ty
            )));
        }
    }
    // The right operand would otherwise only run behind the receiver's guard.
    lowerer.shared(left, move |lowerer, left| {
        lowerer.shared(right, move |lowerer, right| {
            lowerer.guarded(left, move |_, left| {
                Ok(Target::call(builtin, vec![left, right], TypeKind::Boolean))
            })
        })
    })
}

/// Substring test on strings, membership test on collections.
fn contains(lowerer: &mut Lowerer<'_>, haystack: Target, needle: Target) -> Result<Target> {
    let (haystack, needle) = if haystack.ty.is_sequence() {
        make_comparable(haystack, needle)?
    } else {
        (haystack, needle)
    };
    lowerer.shared(haystack, move |lowerer, haystack| {
        lowerer.shared(needle, move |lowerer, needle| {
            lowerer.guarded(haystack, move |_, haystack| {
                Ok(Target::call(
                    Builtin::Contains,
                    vec![haystack, needle],
                    TypeKind::Boolean,
                ))
            })
        })
    })
}

/// `x BETWEEN {lo, hi}` is `x >= lo AND x <= hi`, with `x` evaluated once.
fn between(lowerer: &mut Lowerer<'_>, value: Target, bounds: Target) -> Result<Target> {
    lowerer.shared(value, move |lowerer, value| match bounds.node {
        Node::List(items) => {
            let mut items = items.into_iter();
            match (items.next(), items.next(), items.next()) {
                (Some(lower), Some(upper), None) => within(lowerer, value, lower, upper),
                _ => Err(Error::Type(
                    "BETWEEN requires a two element collection".to_string(),
                )),
            }
        }
        node => {
            let bounds = Target::new(bounds.ty, node);
            let element = bounds.ty.element_type().ok_or_else(|| {
                Error::Type(format!(
                    "BETWEEN requires a two element collection, got {}",
                    bounds.ty
                ))
            })?;
            lowerer.shared(bounds, move |lowerer, bounds| {
                let at = |i: i32| {
                    Target::element_at(
                        bounds.clone(),
                        Target::constant(Value::Int(i)),
                        element.clone(),
                    )
                };
                within(lowerer, value, at(0), at(1))
            })
        }
    })
}

fn within(lowerer: &mut Lowerer<'_>, value: Target, lower: Target, upper: Target) -> Result<Target> {
    let low = compare(lowerer, Operator::GreaterThanOrEqualTo, value.clone(), lower)?;
    let high = compare(lowerer, Operator::LessThanOrEqualTo, value, upper)?;
    Ok(Target::binary(BinaryOp::AndAlso, low, high, TypeKind::Boolean))
}

#[cfg(test)]
mod tests {
    use crate::ast::{ComparisonOptions, Expr, Predicate};
    use crate::config::{CompileOptions, Dialect};
    use crate::error::Error;
    use crate::lower::lower_predicate;
    use crate::target::{BinaryOp, Builtin, Node};
    use crate::types::TypeKind;

    #[test]
    fn test_between_becomes_conjunction() {
        let predicate = Predicate::compare(
            Expr::key_path("age"),
            crate::ast::Operator::Between,
            Expr::aggregate(vec![Expr::constant(1), Expr::constant(10)]),
        );
        let target = lower_predicate(&predicate, &TypeKind::Any, &CompileOptions::new()).unwrap();
        assert!(matches!(
            target.node,
            Node::Binary {
                op: BinaryOp::AndAlso,
                ..
            }
        ));
    }

    #[test]
    fn test_between_rejects_three_bounds() {
        let predicate = Predicate::compare(
            Expr::key_path("age"),
            crate::ast::Operator::Between,
            Expr::aggregate(vec![Expr::constant(1), Expr::constant(2), Expr::constant(3)]),
        );
        let result = lower_predicate(&predicate, &TypeKind::Any, &CompileOptions::new());
        assert!(matches!(result, Err(Error::Type(_))));
    }

    #[test]
    fn test_collation_skips_case_folding() {
        let predicate = Predicate::compare_with(
            Expr::key_path("name"),
            crate::ast::Operator::EqualTo,
            Expr::constant("Bob"),
            crate::ast::Modifier::Direct,
            ComparisonOptions::CASE_INSENSITIVE,
        );
        let folded = CompileOptions::new().dialect(Dialect::Backend);
        let collated = folded.clone().case_insensitive_collation(true);

        let target = lower_predicate(&predicate, &TypeKind::Any, &folded).unwrap();
        match target.node {
            Node::Binary { left, .. } => assert!(matches!(
                left.node,
                Node::Call {
                    builtin: Builtin::Lowercase,
                    ..
                }
            )),
            other => panic!("expected binary, got {:?}", other),
        }

        let target = lower_predicate(&predicate, &TypeKind::Any, &collated).unwrap();
        match target.node {
            Node::Binary { left, .. } => assert!(matches!(left.node, Node::Property { .. })),
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_quantifier_requires_collection() {
        let predicate = Predicate::compare_with(
            Expr::constant(3),
            crate::ast::Operator::EqualTo,
            Expr::constant(3),
            crate::ast::Modifier::Any,
            ComparisonOptions::NONE,
        );
        let result = lower_predicate(&predicate, &TypeKind::Any, &CompileOptions::new());
        assert!(matches!(result, Err(Error::Type(_))));
    }
}
