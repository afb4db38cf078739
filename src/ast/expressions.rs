use crate::ast::{Predicate, SymbolicValue};
use crate::value::Value;

/// A value-producing node.
///
/// The tree exclusively owns its children; nothing points back at a parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    ///
    /// # Examples
    /// ```text
    /// 42
    /// 'hello'
    /// nil
    /// YES
    /// ```
    Constant(Value),

    /// The root input value (`SELF`)
    EvaluatedObject,

    /// A named binding introduced by assignment, a subquery, or the
    /// compile options. Stored without the leading `$`.
    Variable(String),

    /// Dotted property navigation
    ///
    /// Without an operand the path is rooted at `SELF`.
    ///
    /// # Examples
    /// ```text
    /// author.name         // operand: None
    /// $k.title            // operand: Some(Variable("k"))
    /// tags.@count
    /// ```
    KeyPath {
        operand: Option<Box<Expr>>,
        path: String,
    },

    /// Builtin function invocation, by selector
    ///
    /// # Examples
    /// ```text
    /// 1 + 2                            // add:to:
    /// FUNCTION('modulus:by:', 10, 7)
    /// now()
    /// ```
    Function { name: String, args: Vec<Expr> },

    /// Filtered view of a collection
    ///
    /// # Example
    /// ```text
    /// SUBQUERY(keywords, $k, $k BEGINSWITH 'hello')
    /// ```
    Subquery {
        collection: Box<Expr>,
        variable: String,
        predicate: Box<Predicate>,
    },

    /// Literal list
    ///
    /// # Example
    /// ```text
    /// { 1, 2, 3 }
    /// ```
    Aggregate(Vec<Expr>),

    /// `FIRST`, `LAST` or `SIZE` inside an index
    Symbolic(SymbolicValue),

    /// `$name := value`
    Assignment { variable: String, value: Box<Expr> },
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    pub fn null() -> Self {
        Expr::Constant(Value::Null)
    }

    pub fn evaluated_object() -> Self {
        Expr::EvaluatedObject
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Expr::Variable(strip_dollar(name.into()))
    }

    pub fn key_path(path: impl Into<String>) -> Self {
        Expr::KeyPath {
            operand: None,
            path: path.into(),
        }
    }

    pub fn key_path_on(operand: Expr, path: impl Into<String>) -> Self {
        Expr::KeyPath {
            operand: Some(Box::new(operand)),
            path: path.into(),
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn subquery(collection: Expr, variable: impl Into<String>, predicate: Predicate) -> Self {
        Expr::Subquery {
            collection: Box::new(collection),
            variable: strip_dollar(variable.into()),
            predicate: Box::new(predicate),
        }
    }

    pub fn aggregate(items: Vec<Expr>) -> Self {
        Expr::Aggregate(items)
    }

    pub fn symbolic(value: SymbolicValue) -> Self {
        Expr::Symbolic(value)
    }

    pub fn assignment(variable: impl Into<String>, value: Expr) -> Self {
        Expr::Assignment {
            variable: strip_dollar(variable.into()),
            value: Box::new(value),
        }
    }

    /// `collection[index]`
    pub fn index(collection: Expr, index: Expr) -> Self {
        Expr::function("objectFrom:withIndex:", vec![collection, index])
    }

    pub fn is_key_path(&self) -> bool {
        matches!(self, Expr::KeyPath { .. })
    }
}

fn strip_dollar(name: String) -> String {
    match name.strip_prefix('$') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}
