use crate::ast::{ComparisonOptions, CompoundKind, Expr, Modifier, Operator};

/// A boolean-producing node.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `TRUEPREDICATE` / `FALSEPREDICATE`
    Constant(bool),

    /// The atomic test
    Comparison(Comparison),

    /// `AND` / `OR` over any number of operands, or `NOT` over exactly one
    Compound {
        kind: CompoundKind,
        subpredicates: Vec<Predicate>,
    },
}

/// `[ANY|ALL] left OP[cdn] right`
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub left: Expr,
    pub operator: Operator,
    pub right: Expr,
    pub modifier: Modifier,
    pub options: ComparisonOptions,
}

impl Predicate {
    pub fn constant(value: bool) -> Self {
        Predicate::Constant(value)
    }

    /// A direct comparison with no options.
    pub fn compare(left: Expr, operator: Operator, right: Expr) -> Self {
        Predicate::Comparison(Comparison {
            left,
            operator,
            right,
            modifier: Modifier::Direct,
            options: ComparisonOptions::NONE,
        })
    }

    pub fn compare_with(
        left: Expr,
        operator: Operator,
        right: Expr,
        modifier: Modifier,
        options: ComparisonOptions,
    ) -> Self {
        Predicate::Comparison(Comparison {
            left,
            operator,
            right,
            modifier,
            options,
        })
    }

    pub fn and(subpredicates: Vec<Predicate>) -> Self {
        Predicate::Compound {
            kind: CompoundKind::And,
            subpredicates,
        }
    }

    pub fn or(subpredicates: Vec<Predicate>) -> Self {
        Predicate::Compound {
            kind: CompoundKind::Or,
            subpredicates,
        }
    }

    pub fn not(subpredicate: Predicate) -> Self {
        Predicate::Compound {
            kind: CompoundKind::Not,
            subpredicates: vec![subpredicate],
        }
    }
}
