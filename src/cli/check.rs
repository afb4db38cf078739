//! Parse, compile and run sieve predicates against JSON input

use tracing::debug;

use super::CliError;
use crate::{
    CompileOptions, Dialect, Expr, Predicate, TypeKind, Value, compile_expr, compile_predicate,
};

/// Options for the check command
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// The predicate (or expression) format string
    pub source: String,
    /// JSON input string
    pub input: Option<String>,
    /// Positional arguments, each a JSON document
    pub arguments: Vec<String>,
    /// Treat the source as an expression instead of a predicate
    pub expression: bool,
    pub dialect: Dialect,
    pub case_insensitive_collation: bool,
    /// Only validate syntax, don't compile or run
    pub syntax_only: bool,
    /// Also report the canonical formatting
    pub format: bool,
    /// Filter a top-level JSON array instead of testing it as one object
    pub filter: bool,
}

/// Result of a check operation
#[derive(Debug)]
pub enum CheckResult {
    /// Syntax validation passed
    SyntaxValid,
    /// Evaluated against the input
    Value(serde_json::Value),
    /// Rendered for the backend dialect
    Sql(String),
}

/// A check result plus the canonical formatting, when requested.
#[derive(Debug)]
pub struct CheckOutput {
    pub formatted: Option<String>,
    pub result: CheckResult,
}

enum Parsed {
    Predicate(Predicate),
    Expr(Expr),
}

/// Execute a sieve check operation
pub fn execute_check(options: &CheckOptions) -> Result<CheckOutput, CliError> {
    let arguments = options
        .arguments
        .iter()
        .map(|arg| serde_json::from_str(arg).map(Value::from_json))
        .collect::<Result<Vec<_>, _>>()?;

    let parsed = if options.expression {
        Parsed::Expr(Expr::parse(&options.source, &arguments)?)
    } else {
        Parsed::Predicate(Predicate::parse(&options.source, &arguments)?)
    };

    let formatted = options.format.then(|| match &parsed {
        Parsed::Predicate(p) => p.to_string(),
        Parsed::Expr(e) => e.to_string(),
    });

    if options.syntax_only {
        return Ok(CheckOutput {
            formatted,
            result: CheckResult::SyntaxValid,
        });
    }

    let compile_options = CompileOptions::new()
        .dialect(options.dialect)
        .case_insensitive_collation(options.case_insensitive_collation);

    if options.dialect == Dialect::Backend {
        let sql = match &parsed {
            Parsed::Predicate(p) => {
                compile_predicate(p, &TypeKind::Any, &compile_options)?.to_sql()?
            }
            Parsed::Expr(e) => compile_expr(e, &TypeKind::Any, None, &compile_options)?.to_sql()?,
        };
        return Ok(CheckOutput {
            formatted,
            result: CheckResult::Sql(sql),
        });
    }

    let input = match &options.input {
        Some(json) => Value::from_json(serde_json::from_str(json)?),
        None if options.expression => Value::Null,
        None => return Err(CliError::NoInput),
    };
    let root = TypeKind::of_value(&input);
    debug!(root = %root, "evaluating against input");

    let output = match &parsed {
        Parsed::Predicate(p) => match &input {
            Value::Array(items) if options.filter => {
                let compiled = compile_predicate(p, &TypeKind::Any, &compile_options)?;
                let kept = compiled.filter(items)?;
                serde_json::Value::Array(kept.into_iter().map(Value::to_json).collect())
            }
            _ => {
                let compiled = compile_predicate(p, &root, &compile_options)?;
                serde_json::Value::Bool(compiled.evaluate(&input)?)
            }
        },
        Parsed::Expr(e) => compile_expr(e, &root, None, &compile_options)?
            .evaluate(&input)?
            .to_json(),
    };

    Ok(CheckOutput {
        formatted,
        result: CheckResult::Value(output),
    })
}
