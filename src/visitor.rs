//! Pre-order rewriting passes over expression and predicate trees.
//!
//! A [`Visitor`] is called once per node, parent before children, with
//! mutable access to the node. Callers that must keep the original tree use
//! [`Expr::rewritten`] / [`Predicate::rewritten`], which visit a copy.

use uuid::Uuid;

use crate::ast::{Expr, Predicate};
use crate::value::Value;

/// Both methods default to doing nothing, so a pass only overrides the
/// node kind it rewrites.
pub trait Visitor {
    fn visit_expr(&mut self, _expr: &mut Expr) {}

    fn visit_predicate(&mut self, _predicate: &mut Predicate) {}
}

pub fn walk_expr(visitor: &mut dyn Visitor, expr: &mut Expr) {
    visitor.visit_expr(expr);
    match expr {
        Expr::KeyPath {
            operand: Some(operand),
            ..
        } => walk_expr(visitor, operand),
        Expr::Function { args, .. } | Expr::Aggregate(args) => {
            for arg in args {
                walk_expr(visitor, arg);
            }
        }
        Expr::Subquery {
            collection,
            predicate,
            ..
        } => {
            walk_expr(visitor, collection);
            walk_predicate(visitor, predicate);
        }
        Expr::Assignment { value, .. } => walk_expr(visitor, value),
        Expr::Constant(_)
        | Expr::EvaluatedObject
        | Expr::Variable(_)
        | Expr::KeyPath { operand: None, .. }
        | Expr::Symbolic(_) => {}
    }
}

pub fn walk_predicate(visitor: &mut dyn Visitor, predicate: &mut Predicate) {
    visitor.visit_predicate(predicate);
    match predicate {
        Predicate::Constant(_) => {}
        Predicate::Comparison(comparison) => {
            walk_expr(visitor, &mut comparison.left);
            walk_expr(visitor, &mut comparison.right);
        }
        Predicate::Compound { subpredicates, .. } => {
            for sub in subpredicates {
                walk_predicate(visitor, sub);
            }
        }
    }
}

impl Expr {
    /// Runs `visitor` over this tree in place.
    pub fn visit(&mut self, visitor: &mut dyn Visitor) {
        walk_expr(visitor, self);
    }

    /// Runs `visitor` over a copy of this tree.
    pub fn rewritten(&self, visitor: &mut dyn Visitor) -> Expr {
        let mut copy = self.clone();
        copy.visit(visitor);
        copy
    }
}

impl Predicate {
    pub fn visit(&mut self, visitor: &mut dyn Visitor) {
        walk_predicate(visitor, self);
    }

    pub fn rewritten(&self, visitor: &mut dyn Visitor) -> Predicate {
        let mut copy = self.clone();
        copy.visit(visitor);
        copy
    }
}

/// Capitalizes every key path segment: `a.b.c` becomes `A.B.C`.
///
/// `@` operators and `SELF` segments are left alone.
#[derive(Debug, Default)]
pub struct PascalCaseRewriter;

impl Visitor for PascalCaseRewriter {
    fn visit_expr(&mut self, expr: &mut Expr) {
        if let Expr::KeyPath { path, .. } = expr {
            *path = path
                .split('.')
                .map(pascal_case_segment)
                .collect::<Vec<_>>()
                .join(".");
        }
    }
}

fn pascal_case_segment(segment: &str) -> String {
    if segment.starts_with('@') || segment.eq_ignore_ascii_case("self") {
        return segment.to_string();
    }
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Retypes string constants that are well-formed GUIDs as GUID constants.
#[derive(Debug, Default)]
pub struct GuidRewriter {
    /// How many constants were retyped.
    pub rewritten: usize,
}

impl Visitor for GuidRewriter {
    fn visit_expr(&mut self, expr: &mut Expr) {
        if let Expr::Constant(value) = expr
            && let Value::String(text) = value
            && looks_like_guid(text)
            && let Ok(guid) = Uuid::parse_str(text)
        {
            *value = Value::Guid(guid);
            self.rewritten += 1;
        }
    }
}

/// Hyphenated 8-4-4-4-12 form, optionally wrapped in braces.
fn looks_like_guid(text: &str) -> bool {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text);
    let groups: Vec<&str> = inner.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Operator;

    #[test]
    fn test_pascal_case_skips_operators_and_self() {
        let mut expr = Expr::key_path_on(Expr::EvaluatedObject, "a.collection.@count");
        expr.visit(&mut PascalCaseRewriter);
        assert_eq!(
            expr,
            Expr::key_path_on(Expr::EvaluatedObject, "A.Collection.@count")
        );
    }

    #[test]
    fn test_rewritten_leaves_original_untouched() {
        let original = Expr::key_path("name");
        let copy = original.rewritten(&mut PascalCaseRewriter);
        assert_eq!(original, Expr::key_path("name"));
        assert_eq!(copy, Expr::key_path("Name"));
    }

    #[test]
    fn test_guid_rewriter() {
        let mut predicate = Predicate::compare(
            Expr::key_path("id"),
            Operator::EqualTo,
            Expr::constant("6F9619FF-8B86-D011-B42D-00C04FC964FF"),
        );
        let mut rewriter = GuidRewriter::default();
        predicate.visit(&mut rewriter);
        assert_eq!(rewriter.rewritten, 1);
        match predicate {
            Predicate::Comparison(c) => assert!(matches!(c.right, Expr::Constant(Value::Guid(_)))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_guid_rewriter_ignores_plain_strings() {
        let mut expr = Expr::constant("6F9619FF8B86D011B42D00C04FC964FF");
        let mut rewriter = GuidRewriter::default();
        expr.visit(&mut rewriter);
        assert_eq!(rewriter.rewritten, 0);
    }
}
