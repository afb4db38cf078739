//! Compile-time configuration.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::runtime::{Clock, RandomSource, SystemClock, ThreadRandom};
use crate::value::Value;

/// The evaluation environment a predicate is lowered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// In-memory object graphs. Navigation is null-safe and casts are allowed.
    #[default]
    Objects,
    /// A query backend. Null handling is left to the backend; no casts.
    Backend,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Objects => write!(f, "objects"),
            Dialect::Backend => write!(f, "backend"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "objects" | "object" | "memory" => Ok(Dialect::Objects),
            "backend" | "sql" => Ok(Dialect::Backend),
            other => Err(format!("unknown dialect '{}' (expected objects or backend)", other)),
        }
    }
}

/// Options handed to [`compile_predicate`](crate::compile_predicate) and
/// [`compile_expr`](crate::compile_expr).
///
/// ```
/// use sieve_lang::{CompileOptions, Dialect, Value};
///
/// let options = CompileOptions::new()
///     .dialect(Dialect::Backend)
///     .case_insensitive_collation(true)
///     .variable("limit", Value::Int(10));
/// assert_eq!(options.dialect, Dialect::Backend);
/// ```
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub dialect: Dialect,
    /// The backend compares strings case-insensitively on its own, so `[c]`
    /// needs no folding. Ignored by the Objects dialect.
    pub case_insensitive_collation: bool,
    /// External `$name` bindings, injected as constants.
    pub variables: HashMap<String, Value>,
    pub random: Arc<dyn RandomSource>,
    pub clock: Arc<dyn Clock>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            dialect: Dialect::Objects,
            case_insensitive_collation: false,
            variables: HashMap::new(),
            random: Arc::new(ThreadRandom::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn case_insensitive_collation(mut self, enabled: bool) -> Self {
        self.case_insensitive_collation = enabled;
        self
    }

    /// Binds `$name`. A leading `$` on `name` is accepted and stripped.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let name = name.strip_prefix('$').map(str::to_string).unwrap_or(name);
        self.variables.insert(name, value.into());
        self
    }

    pub fn random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether `[c]` comparisons must be folded before comparing.
    pub(crate) fn folds_case(&self) -> bool {
        !(self.dialect == Dialect::Backend && self.case_insensitive_collation)
    }
}
