//! Renders lowered targets as SQL condition text for a query backend.
//!
//! The evaluated object is the row alias `t0`; every collection a
//! subquery, quantifier or aggregate ranges over gets the next alias
//! (`t1`, `t2`, ...). Null guards are inlined since the backend
//! propagates nulls on its own.
//!
//! ```
//! use sieve_lang::{compile_predicate, CompileOptions, Dialect, Predicate, RecordType, TypeKind};
//!
//! let root = RecordType::new("Person").field("age", TypeKind::Long).into_kind();
//! let predicate = Predicate::parse("age >= 21", &[]).unwrap();
//! let options = CompileOptions::new().dialect(Dialect::Backend);
//! let compiled = compile_predicate(&predicate, &root, &options).unwrap();
//! assert_eq!(compiled.to_sql().unwrap(), "(t0.age >= 21)");
//! ```

use std::collections::HashMap;

use chrono::SecondsFormat;

use crate::config::Dialect;
use crate::error::{Error, Result};
use crate::lower::SELF_BINDING;
use crate::target::{BinaryOp, Builtin, Node, Quantifier, Reduction, Target, UnaryOp};
use crate::types::TypeKind;
use crate::value::Value;

/// Renders `target` as SQL.
pub fn render(target: &Target) -> Result<String> {
    let mut writer = SqlWriter::new();
    writer.expr(target)
}

/// A collection a subselect ranges over.
struct Source {
    /// The `FROM` clause body.
    from: String,
    /// What one element renders as.
    value: String,
    conditions: Vec<String>,
}

impl Source {
    fn select(&self, what: &str) -> String {
        let mut sql = format!("SELECT {} FROM {}", what, self.from);
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        sql
    }
}

struct SqlWriter {
    names: Vec<(String, String)>,
    /// Rendered right-hand sides of `$name := ...` assignments.
    assigned: HashMap<String, String>,
    next_alias: usize,
}

impl SqlWriter {
    fn new() -> Self {
        SqlWriter {
            names: vec![(SELF_BINDING.to_string(), "t0".to_string())],
            assigned: HashMap::new(),
            next_alias: 0,
        }
    }

    fn alias(&mut self) -> String {
        self.next_alias += 1;
        format!("t{}", self.next_alias)
    }

    fn lookup(&self, name: &str) -> Result<String> {
        self.names
            .iter()
            .rev()
            .find(|(slot, _)| slot == name)
            .map(|(_, text)| text)
            .or_else(|| self.assigned.get(name))
            .cloned()
            .ok_or_else(|| Error::Evaluation(format!("unbound parameter {}", name)))
    }

    fn scoped<T>(
        &mut self,
        name: &str,
        text: String,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let depth = self.names.len();
        self.names.push((name.to_string(), text));
        let result = body(self);
        self.names.truncate(depth);
        result
    }

    fn expr(&mut self, target: &Target) -> Result<String> {
        match &target.node {
            Node::Constant(value) => literal(value),
            Node::Parameter(name) => self.lookup(name),
            Node::Property { receiver, name } => {
                let receiver = self.expr(receiver)?;
                Ok(format!("{}.{}", receiver, identifier(name)))
            }
            Node::Guard {
                subject,
                binding,
                body,
            } => {
                let subject = self.expr(subject)?;
                self.scoped(binding, subject, |w| w.expr(body))
            }
            Node::Map { .. } | Node::Filter { .. } => {
                let source = self.source(target)?;
                Ok(format!("({})", source.select(&source.value)))
            }
            Node::Quantify {
                quantifier,
                source,
                parameter,
                predicate,
            } => {
                let mut source = self.source(source)?;
                let test = self.scoped(parameter, source.value.clone(), |w| w.expr(predicate))?;
                match quantifier {
                    Quantifier::Any => {
                        source.conditions.push(test);
                        Ok(format!("EXISTS ({})", source.select("1")))
                    }
                    Quantifier::All => {
                        source.conditions.push(format!("NOT {}", test));
                        Ok(format!("NOT EXISTS ({})", source.select("1")))
                    }
                }
            }
            Node::Count(source) => {
                let source = self.source(source)?;
                Ok(format!("({})", source.select("COUNT(*)")))
            }
            Node::Reduce { reduction, source } => {
                let source = self.source(source)?;
                let function = match reduction {
                    Reduction::Sum => "SUM",
                    Reduction::Min => "MIN",
                    Reduction::Max => "MAX",
                    Reduction::Average => "AVG",
                };
                Ok(format!(
                    "({})",
                    source.select(&format!("{}({})", function, source.value))
                ))
            }
            Node::ElementAt { source, index } => {
                let index = self.expr(index)?;
                let source = self.source(source)?;
                Ok(format!(
                    "({} LIMIT 1 OFFSET {})",
                    source.select(&source.value),
                    index
                ))
            }
            Node::List(items) => Ok(format!("({})", self.list(items)?)),
            Node::Binary { op, left, right } => self.binary(*op, left, right),
            Node::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                Ok(match op {
                    UnaryOp::Not => format!("NOT {}", operand),
                    UnaryOp::Negate => format!("-{}", operand),
                    UnaryOp::OnesComplement => format!("~{}", operand),
                })
            }
            Node::Call { builtin, args } => self.call(*builtin, args),
            Node::Convert(operand) => {
                let operand = self.expr(operand)?;
                Ok(format!("CAST({} AS {})", operand, sql_type(&target.ty)?))
            }
            Node::Let { name, value } => {
                let value = self.expr(value)?;
                self.assigned.insert(name.clone(), value.clone());
                Ok(value)
            }
            Node::Bind {
                value,
                binding,
                body,
            } => {
                let value = self.expr(value)?;
                self.scoped(binding, value, |w| w.expr(body))
            }
        }
    }

    fn list(&mut self, items: &[Target]) -> Result<String> {
        let rendered = items
            .iter()
            .map(|item| self.expr(item))
            .collect::<Result<Vec<_>>>()?;
        Ok(rendered.join(", "))
    }

    fn source(&mut self, target: &Target) -> Result<Source> {
        match &target.node {
            Node::Map {
                source,
                parameter,
                body,
            } => {
                let mut inner = self.source(source)?;
                inner.value = self.scoped(parameter, inner.value.clone(), |w| w.expr(body))?;
                Ok(inner)
            }
            Node::Filter {
                source,
                parameter,
                predicate,
            } => {
                let mut inner = self.source(source)?;
                let condition =
                    self.scoped(parameter, inner.value.clone(), |w| w.expr(predicate))?;
                inner.conditions.push(condition);
                Ok(inner)
            }
            Node::Guard {
                subject,
                binding,
                body,
            }
            | Node::Bind {
                value: subject,
                binding,
                body,
            } => {
                let subject = self.expr(subject)?;
                self.scoped(binding, subject, |w| w.source(body))
            }
            Node::List(items) => {
                let alias = self.alias();
                let from = if items.is_empty() {
                    format!("(SELECT NULL AS value WHERE 1 = 0) AS {}", alias)
                } else {
                    let rows = items
                        .iter()
                        .map(|item| self.expr(item).map(|text| format!("({})", text)))
                        .collect::<Result<Vec<_>>>()?;
                    format!("(VALUES {}) AS {}(value)", rows.join(", "), alias)
                };
                Ok(Source {
                    from,
                    value: format!("{}.value", alias),
                    conditions: Vec::new(),
                })
            }
            _ => {
                let table = self.expr(target)?;
                let alias = self.alias();
                Ok(Source {
                    from: format!("{} AS {}", table, alias),
                    value: alias,
                    conditions: Vec::new(),
                })
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Target, right: &Target) -> Result<String> {
        if matches!(op, BinaryOp::Equal | BinaryOp::NotEqual) {
            let null_side = match (left.as_constant(), right.as_constant()) {
                (_, Some(Value::Null)) => Some(left),
                (Some(Value::Null), _) => Some(right),
                _ => None,
            };
            if let Some(side) = null_side {
                let side = self.expr(side)?;
                let test = if op == BinaryOp::Equal {
                    "IS NULL"
                } else {
                    "IS NOT NULL"
                };
                return Ok(format!("({} {})", side, test));
            }
        }

        let l = self.expr(left)?;
        let r = self.expr(right)?;
        let symbol = match op {
            BinaryOp::Power => return Ok(format!("POWER({}, {})", l, r)),
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "<>",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::AndAlso => "AND",
            BinaryOp::OrElse => "OR",
        };
        Ok(format!("({} {} {})", l, symbol, r))
    }

    fn call(&mut self, builtin: Builtin, args: &[Target]) -> Result<String> {
        let function = match builtin {
            Builtin::Sqrt => "SQRT",
            Builtin::Log10 => "LOG10",
            Builtin::Ln => "LN",
            Builtin::Exp => "EXP",
            Builtin::Floor => "FLOOR",
            Builtin::Ceiling => "CEILING",
            Builtin::Abs => "ABS",
            Builtin::Trunc => "TRUNC",
            Builtin::Uppercase => "UPPER",
            Builtin::Lowercase => "LOWER",
            Builtin::Length => "LENGTH",
            Builtin::Random => return Ok("RANDOM()".to_string()),
            Builtin::Now => return Ok("CURRENT_TIMESTAMP".to_string()),
            Builtin::RandomBelow => {
                let upper = self.arg(args, 0)?;
                return Ok(format!("(ABS(RANDOM()) % {})", upper));
            }
            Builtin::Matches => {
                let subject = self.arg(args, 0)?;
                let pattern = self.arg(args, 1)?;
                return Ok(format!("REGEXP_LIKE({}, {})", subject, pattern));
            }
            Builtin::Like => {
                let subject = self.arg(args, 0)?;
                let pattern = match args.get(1).and_then(Target::as_constant) {
                    Some(Value::String(p)) => glob_to_like(p),
                    _ => {
                        return Err(Error::unsupported(
                            "LIKE with a computed pattern",
                            Dialect::Backend,
                        ));
                    }
                };
                return Ok(like(&subject, &pattern));
            }
            Builtin::BeginsWith | Builtin::EndsWith => {
                let subject = self.arg(args, 0)?;
                return match args.get(1).and_then(Target::as_constant) {
                    Some(Value::String(p)) if builtin == Builtin::BeginsWith => {
                        Ok(like(&subject, &format!("{}%", escape_like(p))))
                    }
                    Some(Value::String(p)) => Ok(like(&subject, &format!("%{}", escape_like(p)))),
                    _ => {
                        let affix = self.arg(args, 1)?;
                        let pattern = if builtin == Builtin::BeginsWith {
                            format!("{} || '%'", affix)
                        } else {
                            format!("'%' || {}", affix)
                        };
                        Ok(format!("({} LIKE {})", subject, pattern))
                    }
                };
            }
            Builtin::Contains => return self.contains(args),
            Builtin::DateAdd(unit) | Builtin::BackendDateAdd(unit) => {
                let date = self.arg(args, 0)?;
                let amount = self.arg(args, 1)?;
                return Ok(format!(
                    "DATEADD({}, CAST({} AS INT), {})",
                    unit.sql_name(),
                    amount,
                    date
                ));
            }
            Builtin::CastNumber | Builtin::CastString | Builtin::CastDate => {
                return Err(Error::unsupported("castObject:toType:", Dialect::Backend));
            }
        };
        let args = self.list(args)?;
        Ok(format!("{}({})", function, args))
    }

    fn arg(&mut self, args: &[Target], i: usize) -> Result<String> {
        let arg = args
            .get(i)
            .ok_or_else(|| Error::Evaluation(format!("missing argument {}", i)))?;
        self.expr(arg)
    }

    /// Membership for collections, substring search for strings.
    fn contains(&mut self, args: &[Target]) -> Result<String> {
        let (haystack, needle) = match args {
            [haystack, needle] => (haystack, needle),
            _ => return Err(Error::Evaluation("CONTAINS takes two arguments".to_string())),
        };

        if let Node::List(items) = &haystack.node {
            let needle = self.expr(needle)?;
            return Ok(format!("({} IN ({}))", needle, self.list(items)?));
        }

        let substring = match &haystack.ty {
            TypeKind::String => true,
            TypeKind::Any | TypeKind::Null => {
                matches!(needle.as_constant(), Some(Value::String(_)))
            }
            _ => false,
        };

        if substring {
            let subject = self.expr(haystack)?;
            return match needle.as_constant() {
                Some(Value::String(n)) => Ok(like(&subject, &format!("%{}%", escape_like(n)))),
                _ => {
                    let needle = self.expr(needle)?;
                    Ok(format!("(POSITION({} IN {}) > 0)", needle, subject))
                }
            };
        }

        let needle = self.expr(needle)?;
        let source = self.source(haystack)?;
        Ok(format!("({} IN ({}))", needle, source.select(&source.value)))
    }
}

fn like(subject: &str, pattern: &str) -> String {
    format!("({} LIKE {} ESCAPE '\\')", subject, quote(pattern))
}

/// Escapes the SQL `LIKE` wildcards in literal text.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `*` and `?` become `%` and `_`; everything else is literal.
fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn identifier(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(true) => "TRUE".to_string(),
        Value::Boolean(false) => "FALSE".to_string(),
        Value::Float(f) => float_literal(f64::from(*f)),
        Value::Double(f) => float_literal(*f),
        Value::String(s) => quote(s),
        Value::Guid(g) => quote(&g.to_string()),
        Value::Date(d) => format!(
            "TIMESTAMP {}",
            quote(&d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        ),
        Value::Array(items) => {
            let items = items.iter().map(literal).collect::<Result<Vec<_>>>()?;
            format!("({})", items.join(", "))
        }
        Value::Object(_) => {
            return Err(Error::unsupported("an object literal", Dialect::Backend));
        }
        n => n.to_string(),
    })
}

fn float_literal(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

fn sql_type(kind: &TypeKind) -> Result<&'static str> {
    Ok(match kind {
        TypeKind::Boolean => "BOOLEAN",
        TypeKind::Byte | TypeKind::SByte | TypeKind::UShort | TypeKind::Short => "SMALLINT",
        TypeKind::UInt | TypeKind::Int => "INTEGER",
        TypeKind::ULong | TypeKind::Long => "BIGINT",
        TypeKind::Float => "REAL",
        TypeKind::Double => "DOUBLE PRECISION",
        TypeKind::String => "VARCHAR",
        TypeKind::Guid => "UUID",
        TypeKind::Date => "TIMESTAMP",
        other => {
            return Err(Error::unsupported(
                format!("a conversion to {}", other),
                Dialect::Backend,
            ));
        }
    })
}
