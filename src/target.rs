//! The lowered form of a predicate or expression.
//!
//! Lowering produces a [`Target`] tree: an explicitly typed expression tree
//! that the [`Evaluator`](crate::evaluator::Evaluator) runs in memory and
//! the [`sql`](crate::sql) module renders for a query backend.

use crate::types::TypeKind;
use crate::value::Value;

/// A lowered node together with its static kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub ty: TypeKind,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Constant(Value),

    /// A named slot in the evaluation environment: `SELF`, a `$variable`,
    /// an iteration element or a guard binding.
    Parameter(String),

    /// Property read. Reading through a null receiver yields null.
    Property { receiver: Box<Target>, name: String },

    /// Null guard: evaluates `subject` once, binds it to `binding` and
    /// evaluates `body`, or yields the default of `body`'s kind if the
    /// subject is null.
    Guard {
        subject: Box<Target>,
        binding: String,
        body: Box<Target>,
    },

    /// Element-wise projection.
    Map {
        source: Box<Target>,
        parameter: String,
        body: Box<Target>,
    },

    /// Select-where over a collection.
    Filter {
        source: Box<Target>,
        parameter: String,
        predicate: Box<Target>,
    },

    /// Universal or existential fold.
    Quantify {
        quantifier: Quantifier,
        source: Box<Target>,
        parameter: String,
        predicate: Box<Target>,
    },

    Count(Box<Target>),

    Reduce {
        reduction: Reduction,
        source: Box<Target>,
    },

    /// Indexed read; out of range yields null.
    ElementAt {
        source: Box<Target>,
        index: Box<Target>,
    },

    List(Vec<Target>),

    Binary {
        op: BinaryOp,
        left: Box<Target>,
        right: Box<Target>,
    },

    Unary { op: UnaryOp, operand: Box<Target> },

    Call { builtin: Builtin, args: Vec<Target> },

    /// Conversion to the node's own kind.
    Convert(Box<Target>),

    /// Binds `name` to the value and yields it. The binding outlives any
    /// enclosing guard or iteration scope.
    Let { name: String, value: Box<Target> },

    /// Evaluates `value` exactly once and binds it to `binding` while
    /// `body` runs. Unlike a guard, a null value does not short-circuit.
    Bind {
        value: Box<Target>,
        binding: String,
        body: Box<Target>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Min,
    Max,
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AndAlso,
    OrElse,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    OnesComplement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl DateUnit {
    pub fn sql_name(&self) -> &'static str {
        match self {
            DateUnit::Seconds => "second",
            DateUnit::Minutes => "minute",
            DateUnit::Hours => "hour",
            DateUnit::Days => "day",
            DateUnit::Months => "month",
            DateUnit::Years => "year",
        }
    }
}

/// Fixed set of runtime calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Sqrt,
    Log10,
    Ln,
    Exp,
    Floor,
    Ceiling,
    Abs,
    Trunc,
    Uppercase,
    Lowercase,
    Length,
    Random,
    RandomBelow,
    Now,
    /// Regular expression search anywhere in the subject.
    Matches,
    /// Whole-string glob match.
    Like,
    BeginsWith,
    EndsWith,
    /// Substring test, or membership when the receiver is a collection.
    Contains,
    /// In-memory date offset taking a fractional amount.
    DateAdd(DateUnit),
    /// Backend date offset: nullable date, amount truncated to an integer.
    BackendDateAdd(DateUnit),
    CastNumber,
    CastString,
    CastDate,
}

impl Target {
    pub fn new(ty: TypeKind, node: Node) -> Self {
        Target { ty, node }
    }

    pub fn constant(value: Value) -> Self {
        Target {
            ty: TypeKind::of_value(&value),
            node: Node::Constant(value),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Target::constant(Value::Boolean(value))
    }

    pub fn parameter(name: impl Into<String>, ty: TypeKind) -> Self {
        Target {
            ty,
            node: Node::Parameter(name.into()),
        }
    }

    pub fn binary(op: BinaryOp, left: Target, right: Target, ty: TypeKind) -> Self {
        Target {
            ty,
            node: Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    pub fn unary(op: UnaryOp, operand: Target, ty: TypeKind) -> Self {
        Target {
            ty,
            node: Node::Unary {
                op,
                operand: Box::new(operand),
            },
        }
    }

    pub fn call(builtin: Builtin, args: Vec<Target>, ty: TypeKind) -> Self {
        Target {
            ty,
            node: Node::Call { builtin, args },
        }
    }

    pub fn count(source: Target) -> Self {
        Target {
            ty: TypeKind::Int,
            node: Node::Count(Box::new(source)),
        }
    }

    pub fn element_at(source: Target, index: Target, ty: TypeKind) -> Self {
        Target {
            ty,
            node: Node::ElementAt {
                source: Box::new(source),
                index: Box::new(index),
            },
        }
    }

    pub fn convert(operand: Target, to: TypeKind) -> Self {
        Target {
            ty: to,
            node: Node::Convert(Box::new(operand)),
        }
    }

    /// Whether evaluating this target assigns a variable or draws a random
    /// number, so evaluating it twice is observable.
    pub fn has_effects(&self) -> bool {
        match &self.node {
            Node::Let { .. } => true,
            Node::Call {
                builtin: Builtin::Random | Builtin::RandomBelow,
                ..
            } => true,
            Node::Constant(_) | Node::Parameter(_) => false,
            Node::Property { receiver, .. } => receiver.has_effects(),
            Node::Guard { subject, body, .. } | Node::Map { source: subject, body, .. } => {
                subject.has_effects() || body.has_effects()
            }
            Node::Filter {
                source, predicate, ..
            }
            | Node::Quantify {
                source, predicate, ..
            } => source.has_effects() || predicate.has_effects(),
            Node::Bind { value, body, .. } => value.has_effects() || body.has_effects(),
            Node::Count(source) | Node::Reduce { source, .. } => source.has_effects(),
            Node::Convert(operand) | Node::Unary { operand, .. } => operand.has_effects(),
            Node::ElementAt { source, index } => source.has_effects() || index.has_effects(),
            Node::Binary { left, right, .. } => left.has_effects() || right.has_effects(),
            Node::List(items) | Node::Call { args: items, .. } => {
                items.iter().any(Target::has_effects)
            }
        }
    }

    /// The literal value, if this node is a constant.
    pub fn as_constant(&self) -> Option<&Value> {
        match &self.node {
            Node::Constant(value) => Some(value),
            _ => None,
        }
    }
}
