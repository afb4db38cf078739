use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use rust_decimal::{Decimal, prelude::FromPrimitive, prelude::ToPrimitive};
use tracing::debug;

use crate::ast::{Expr, Predicate};
use crate::config::{CompileOptions, Dialect};
use crate::error::{Error, Result};
use crate::lower::{compile_expr, compile_predicate};
use crate::runtime::{Clock, RandomSource};
use crate::target::{BinaryOp, Builtin, DateUnit, Node, Quantifier, Reduction, Target, UnaryOp};
use crate::types::TypeKind;
use crate::value::{Value, type_name};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z, the origin
/// numeric date casts are measured from.
const REFERENCE_DATE_SECS: i64 = 978_307_200;

static NULL: Value = Value::Null;

/// Named slots visible while a target is being evaluated.
///
/// Bindings are pushed on entry to a guard or iteration and truncated on
/// exit; lookups scan from the most recent slot so inner names shadow
/// outer ones. `$name := ...` assignments live in a separate table that
/// scopes never truncate.
#[derive(Debug, Clone, Default)]
pub struct Env {
    slots: Vec<(String, Value)>,
    assigned: HashMap<String, Value>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// An environment with `SELF` bound to `object`.
    pub fn with_object(object: Value) -> Self {
        let mut env = Env::new();
        env.bind(crate::lower::SELF_BINDING, object);
        env
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.slots.push((name.into(), value));
    }

    /// Records an assignment, visible to every later lookup.
    pub fn assign(&mut self, name: impl Into<String>, value: Value) {
        self.assigned.insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.slots
            .iter()
            .rev()
            .find(|(slot, _)| slot == name)
            .map(|(_, value)| value)
            .or_else(|| self.assigned.get(name))
    }

    fn depth(&self) -> usize {
        self.slots.len()
    }

    fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }
}

/// Runs lowered [`Target`] trees against in-memory values.
pub struct Evaluator<'r> {
    random: &'r dyn RandomSource,
    clock: &'r dyn Clock,
}

impl<'r> Evaluator<'r> {
    pub fn new(random: &'r dyn RandomSource, clock: &'r dyn Clock) -> Self {
        Evaluator { random, clock }
    }

    pub fn eval(&self, target: &Target, env: &mut Env) -> Result<Value> {
        match &target.node {
            Node::Constant(value) => Ok(value.clone()),
            Node::Parameter(name) => env
                .lookup(name)
                .cloned()
                .ok_or_else(|| Error::Evaluation(format!("unbound parameter {}", name))),
            Node::Property { receiver, name } => {
                let receiver = self.eval(receiver, env)?;
                read_property(&receiver, name)
            }
            Node::Guard {
                subject,
                binding,
                body,
            } => {
                let subject = self.eval(subject, env)?;
                if subject.is_null() {
                    return Ok(body.ty.default_value());
                }
                self.scoped(env, binding, subject, |ev, env| ev.eval(body, env))
            }
            Node::Map {
                source,
                parameter,
                body,
            } => {
                let items = match self.eval_collection(source, env)? {
                    Some(items) => items,
                    None => return Ok(Value::Null),
                };
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.scoped(env, parameter, item, |ev, env| ev.eval(body, env))?);
                }
                Ok(Value::Array(out))
            }
            Node::Filter {
                source,
                parameter,
                predicate,
            } => {
                let items = match self.eval_collection(source, env)? {
                    Some(items) => items,
                    None => return Ok(Value::Null),
                };
                let mut out = Vec::new();
                for item in items {
                    let keep = self.scoped(env, parameter, item.clone(), |ev, env| {
                        ev.eval_bool(predicate, env)
                    })?;
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::Array(out))
            }
            Node::Quantify {
                quantifier,
                source,
                parameter,
                predicate,
            } => {
                let items = match self.eval_collection(source, env)? {
                    Some(items) => items,
                    None => return Ok(Value::Boolean(*quantifier == Quantifier::All)),
                };
                for item in items {
                    let hit = self.scoped(env, parameter, item, |ev, env| {
                        ev.eval_bool(predicate, env)
                    })?;
                    match quantifier {
                        Quantifier::Any if hit => return Ok(Value::Boolean(true)),
                        Quantifier::All if !hit => return Ok(Value::Boolean(false)),
                        _ => {}
                    }
                }
                Ok(Value::Boolean(*quantifier == Quantifier::All))
            }
            Node::Count(source) => match self.eval(source, env)? {
                Value::Null => Ok(Value::Int(0)),
                Value::Array(items) => count_value(items.len()),
                Value::Object(map) => count_value(map.len()),
                Value::String(s) => count_value(s.chars().count()),
                other => Err(Error::Evaluation(format!(
                    "cannot count a {}",
                    type_name(&other)
                ))),
            },
            Node::Reduce { reduction, source } => {
                let items = match self.eval_collection(source, env)? {
                    Some(items) => items,
                    None => return Ok(Value::Null),
                };
                reduce(*reduction, items, &target.ty)
            }
            Node::ElementAt { source, index } => {
                let source = self.eval(source, env)?;
                let index = self.eval(index, env)?;
                element_at(source, &index)
            }
            Node::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, env)?);
                }
                Ok(Value::Array(out))
            }
            Node::Binary { op, left, right } => match op {
                BinaryOp::AndAlso => {
                    Ok(Value::Boolean(self.eval_bool(left, env)? && self.eval_bool(right, env)?))
                }
                BinaryOp::OrElse => {
                    Ok(Value::Boolean(self.eval_bool(left, env)? || self.eval_bool(right, env)?))
                }
                _ => {
                    let left = self.eval(left, env)?;
                    let right = self.eval(right, env)?;
                    apply_binop(*op, &left, &right, &target.ty)
                }
            },
            Node::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                apply_unary(*op, &value)
            }
            Node::Call { builtin, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, env)?);
                }
                self.call(*builtin, values)
            }
            Node::Convert(operand) => self.eval(operand, env)?.convert_to(&target.ty),
            Node::Let { name, value } => {
                let value = self.eval(value, env)?;
                env.assign(name.clone(), value.clone());
                Ok(value)
            }
            Node::Bind {
                value,
                binding,
                body,
            } => {
                let value = self.eval(value, env)?;
                self.scoped(env, binding, value, |ev, env| ev.eval(body, env))
            }
        }
    }

    /// Evaluates a boolean-valued target. Null counts as false.
    pub fn eval_bool(&self, target: &Target, env: &mut Env) -> Result<bool> {
        match self.eval(target, env)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(Error::Evaluation(format!(
                "expected a boolean, got {}",
                type_name(&other)
            ))),
        }
    }

    fn scoped<T>(
        &self,
        env: &mut Env,
        name: &str,
        value: Value,
        body: impl FnOnce(&Self, &mut Env) -> Result<T>,
    ) -> Result<T> {
        let depth = env.depth();
        env.bind(name, value);
        let result = body(self, env);
        env.truncate(depth);
        result
    }

    /// Null stays absent; anything else must be an array.
    fn eval_collection(&self, source: &Target, env: &mut Env) -> Result<Option<Vec<Value>>> {
        match self.eval(source, env)? {
            Value::Null => Ok(None),
            Value::Array(items) => Ok(Some(items)),
            other => Err(Error::Evaluation(format!(
                "expected a collection, got {}",
                type_name(&other)
            ))),
        }
    }

    fn call(&self, builtin: Builtin, args: Vec<Value>) -> Result<Value> {
        let arg = |i: usize| args.get(i).unwrap_or(&NULL);

        match builtin {
            Builtin::Sqrt => math(arg(0), f64::sqrt),
            Builtin::Log10 => math(arg(0), f64::log10),
            Builtin::Ln => math(arg(0), f64::ln),
            Builtin::Exp => math(arg(0), f64::exp),
            Builtin::Floor => rounding(arg(0), f64::floor),
            Builtin::Ceiling => rounding(arg(0), f64::ceil),
            Builtin::Trunc => rounding(arg(0), f64::trunc),
            Builtin::Abs => match arg(0) {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Double(f) => Ok(Value::Double(f.abs())),
                v => map_integer(v, |n| Some(n.abs())),
            },
            Builtin::Uppercase => map_text(arg(0), |s| Value::String(s.to_uppercase())),
            Builtin::Lowercase => map_text(arg(0), |s| Value::String(s.to_lowercase())),
            Builtin::Length => match arg(0) {
                Value::Array(items) => count_value(items.len()),
                v => map_text(v, |s| Value::Int(s.chars().count() as i32)),
            },
            Builtin::Random => Ok(Value::Int(self.random.next_int())),
            Builtin::RandomBelow => {
                let upper = arg(0)
                    .as_f64()
                    .ok_or_else(|| Error::Evaluation("randomn: requires a number".to_string()))?;
                if upper < 1.0 {
                    return Err(Error::Evaluation(format!(
                        "randomn: requires a positive bound, got {}",
                        upper
                    )));
                }
                let upper = upper.min(f64::from(i32::MAX)) as i32;
                Ok(Value::Int(self.random.next_below(upper)))
            }
            Builtin::Now => Ok(Value::Date(self.clock.now())),
            Builtin::Matches => string_test(arg(0), arg(1), |s, pattern| {
                let re = Regex::new(pattern)
                    .map_err(|e| Error::Evaluation(format!("invalid regex: {e}")))?;
                Ok(re.is_match(s))
            }),
            Builtin::Like => string_test(arg(0), arg(1), |s, pattern| {
                Ok(like_regex(pattern)?.is_match(s))
            }),
            Builtin::BeginsWith => string_test(arg(0), arg(1), |s, p| Ok(s.starts_with(p))),
            Builtin::EndsWith => string_test(arg(0), arg(1), |s, p| Ok(s.ends_with(p))),
            Builtin::Contains => contains(arg(0), arg(1)),
            Builtin::DateAdd(unit) => date_add(arg(0), arg(1), unit, false),
            Builtin::BackendDateAdd(unit) => date_add(arg(0), arg(1), unit, true),
            Builtin::CastNumber | Builtin::CastString | Builtin::CastDate => {
                apply_cast(builtin, arg(0))
            }
        }
    }
}

fn count_value(n: usize) -> Result<Value> {
    i32::try_from(n)
        .map(Value::Int)
        .map_err(|_| Error::Evaluation(format!("count {} does not fit an int", n)))
}

fn read_property(receiver: &Value, name: &str) -> Result<Value> {
    match receiver {
        Value::Null => Ok(Value::Null),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) => items
            .iter()
            .map(|item| read_property(item, name))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Err(Error::Evaluation(format!(
            "cannot read property '{}' of {}",
            name,
            type_name(other)
        ))),
    }
}

fn element_at(source: Value, index: &Value) -> Result<Value> {
    let items = match source {
        Value::Null => return Ok(Value::Null),
        Value::Array(items) => items,
        other => {
            return Err(Error::Evaluation(format!(
                "cannot index into {}",
                type_name(&other)
            )));
        }
    };
    let index = match index {
        Value::Null => return Ok(Value::Null),
        v => v.as_i128().ok_or_else(|| {
            Error::Evaluation(format!("index must be an integer, got {}", type_name(v)))
        })?,
    };
    Ok(usize::try_from(index)
        .ok()
        .and_then(|i| items.into_iter().nth(i))
        .unwrap_or(Value::Null))
}

fn reduce(reduction: Reduction, items: Vec<Value>, ty: &TypeKind) -> Result<Value> {
    let items: Vec<Value> = items.into_iter().filter(|v| !v.is_null()).collect();

    match reduction {
        Reduction::Sum => {
            let zero = if ty.is_dynamic() {
                Value::Int(0)
            } else {
                ty.default_value()
            };
            items
                .iter()
                .try_fold(zero, |acc, item| apply_binop(BinaryOp::Add, &acc, item, ty))
        }
        Reduction::Average => {
            if items.is_empty() {
                return Ok(Value::Null);
            }
            let mut total = 0.0;
            for item in &items {
                total += item.as_f64().ok_or_else(|| {
                    Error::Evaluation(format!("cannot average a {}", type_name(item)))
                })?;
            }
            Ok(Value::Double(total / items.len() as f64))
        }
        Reduction::Min | Reduction::Max => {
            let wanted = if reduction == Reduction::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<Value> = None;
            for item in items {
                best = match best {
                    None => Some(item),
                    Some(current) => match item.compare(&current) {
                        Some(ord) if ord == wanted => Some(item),
                        Some(_) => Some(current),
                        None => {
                            return Err(Error::Evaluation(format!(
                                "cannot compare {} with {}",
                                type_name(&item),
                                type_name(&current)
                            )));
                        }
                    },
                };
            }
            Ok(best.unwrap_or(Value::Null))
        }
    }
}

/// The integer kind an operation on `left` and `right` produces.
fn integer_kind(ty: &TypeKind, left: &Value, right: &Value) -> TypeKind {
    if ty.is_integer() {
        return ty.clone();
    }
    let l = TypeKind::of_value(left);
    let r = TypeKind::of_value(right);
    match (l.precision_rank(), r.precision_rank()) {
        (Some(a), Some(b)) if a >= b => l,
        (Some(_), Some(_)) => r,
        _ => TypeKind::Long,
    }
}

fn narrow(kind: &TypeKind, n: i128) -> Result<Value> {
    Value::from_i128(kind, n)
        .ok_or_else(|| Error::Evaluation(format!("integer overflow: {} does not fit {}", n, kind)))
}

fn apply_binop(op: BinaryOp, left: &Value, right: &Value, ty: &TypeKind) -> Result<Value> {
    match op {
        BinaryOp::Equal => return Ok(Value::Boolean(left.loose_eq(right))),
        BinaryOp::NotEqual => return Ok(Value::Boolean(!left.loose_eq(right))),
        BinaryOp::Less => return Ok(Value::Boolean(left.compare(right) == Some(Ordering::Less))),
        BinaryOp::LessEqual => {
            return Ok(Value::Boolean(matches!(
                left.compare(right),
                Some(Ordering::Less | Ordering::Equal)
            )));
        }
        BinaryOp::Greater => {
            return Ok(Value::Boolean(left.compare(right) == Some(Ordering::Greater)));
        }
        BinaryOp::GreaterEqual => {
            return Ok(Value::Boolean(matches!(
                left.compare(right),
                Some(Ordering::Greater | Ordering::Equal)
            )));
        }
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if let (Some(a), Some(b)) = (left.as_i128(), right.as_i128())
        && op != BinaryOp::Power
    {
        let kind = integer_kind(ty, left, right);
        let n = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Subtract => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Divide if b == 0 => return Err(Error::DivisionByZero),
            BinaryOp::Divide => a.checked_div(b),
            BinaryOp::Modulo if b == 0 => return Err(Error::DivisionByZero),
            BinaryOp::Modulo => a.checked_rem(b),
            BinaryOp::BitAnd => Some(a & b),
            BinaryOp::BitOr => Some(a | b),
            BinaryOp::BitXor => Some(a ^ b),
            BinaryOp::ShiftLeft => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
            BinaryOp::ShiftRight => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
            _ => None,
        };
        let n = n.ok_or_else(|| {
            Error::Evaluation(format!("integer overflow in {:?} of {} and {}", op, a, b))
        })?;
        return narrow(&kind, n);
    }

    let (a, b) = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(Error::Evaluation(format!(
                "cannot apply {:?} to {} and {}",
                op,
                type_name(left),
                type_name(right)
            )));
        }
    };

    let result = match op {
        BinaryOp::Power => a.powf(b),
        BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide
        | BinaryOp::Modulo => decimal_op(op, a, b).unwrap_or_else(|| float_op(op, a, b)),
        _ => {
            return Err(Error::Evaluation(format!(
                "{:?} requires integer operands",
                op
            )));
        }
    };

    if *ty == TypeKind::Float {
        Ok(Value::Float(result as f32))
    } else {
        Ok(Value::Double(result))
    }
}

/// Exact decimal arithmetic, so `100 * 1.1` is `110`.
fn decimal_op(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    let ad = Decimal::from_f64(a)?;
    let bd = Decimal::from_f64(b)?;
    let rd = match op {
        BinaryOp::Add => ad.checked_add(bd)?,
        BinaryOp::Subtract => ad.checked_sub(bd)?,
        BinaryOp::Multiply => ad.checked_mul(bd)?,
        BinaryOp::Divide => ad.checked_div(bd)?,
        BinaryOp::Modulo => ad.checked_rem(bd)?,
        _ => return None,
    };
    rd.to_f64()
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        _ => f64::NAN,
    }
}

fn map_integer(value: &Value, f: impl Fn(i128) -> Option<i128>) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        v => {
            let n = v.as_i128().ok_or_else(|| {
                Error::Evaluation(format!("expected an integer, got {}", type_name(v)))
            })?;
            let kind = TypeKind::of_value(v);
            let result = f(n)
                .ok_or_else(|| Error::Evaluation(format!("integer overflow on {}", n)))?;
            narrow(&kind, result)
        }
    }
}

fn apply_unary(op: UnaryOp, value: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => match value {
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            Value::Null => Ok(Value::Boolean(true)),
            other => Err(Error::Evaluation(format!(
                "NOT requires a boolean, got {}",
                type_name(other)
            ))),
        },
        UnaryOp::Negate => match value {
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Double(f) => Ok(Value::Double(-f)),
            v => map_integer(v, |n| n.checked_neg()),
        },
        UnaryOp::OnesComplement => map_integer(value, |n| Some(!n)),
    }
}

fn math(value: &Value, f: impl Fn(f64) -> f64) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        v => v.as_f64().map(|n| Value::Double(f(n))).ok_or_else(|| {
            Error::Evaluation(format!("expected a number, got {}", type_name(v)))
        }),
    }
}

/// Integers are already whole; floats round to a double.
fn rounding(value: &Value, f: impl Fn(f64) -> f64) -> Result<Value> {
    if value.as_i128().is_some() {
        return Ok(value.clone());
    }
    math(value, f)
}

/// Applies a string function, element-wise over arrays.
fn map_text(value: &Value, f: impl Fn(&str) -> Value + Copy) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(f(s)),
        Value::Array(items) => items
            .iter()
            .map(|item| map_text(item, f))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Err(Error::Evaluation(format!(
            "expected a string, got {}",
            type_name(other)
        ))),
    }
}

/// Null on either side is simply a failed test.
fn string_test(
    subject: &Value,
    pattern: &Value,
    test: impl Fn(&str, &str) -> Result<bool>,
) -> Result<Value> {
    match (subject, pattern) {
        (Value::String(s), Value::String(p)) => test(s, p).map(Value::Boolean),
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Boolean(false)),
        (s, p) => Err(Error::Evaluation(format!(
            "string operator applied to {} and {}",
            type_name(s),
            type_name(p)
        ))),
    }
}

/// `*` matches any run, `?` matches one character; the rest is literal.
fn like_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::from("(?s)^");
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| Error::Evaluation(format!("invalid LIKE pattern: {e}")))
}

fn contains(haystack: &Value, needle: &Value) -> Result<Value> {
    match (haystack, needle) {
        (Value::Null, _) => Ok(Value::Boolean(false)),
        (Value::Array(items), needle) => {
            Ok(Value::Boolean(items.iter().any(|item| item.loose_eq(needle))))
        }
        (Value::String(s), Value::String(n)) => Ok(Value::Boolean(s.contains(n.as_str()))),
        (Value::String(_), Value::Null) => Ok(Value::Boolean(false)),
        (Value::Object(map), Value::String(key)) => Ok(Value::Boolean(map.contains_key(key))),
        (h, n) => Err(Error::Evaluation(format!(
            "cannot test whether {} contains {}",
            type_name(h),
            type_name(n)
        ))),
    }
}

fn date_add(date: &Value, amount: &Value, unit: DateUnit, whole_units: bool) -> Result<Value> {
    let date = match date {
        Value::Null => return Ok(Value::Null),
        Value::Date(d) => *d,
        other => {
            return Err(Error::Evaluation(format!(
                "date offset requires a date, got {}",
                type_name(other)
            )));
        }
    };
    let amount = match amount {
        Value::Null => return Ok(Value::Null),
        v => v.as_f64().ok_or_else(|| {
            Error::Evaluation(format!("date offset requires a number, got {}", type_name(v)))
        })?,
    };
    let amount = if whole_units { amount.trunc() } else { amount };

    let overflow = || Error::Evaluation(format!("date offset out of range: {} {:?}", amount, unit));

    let shifted = match unit {
        DateUnit::Months | DateUnit::Years => {
            let months = if unit == DateUnit::Years {
                amount.trunc() * 12.0
            } else {
                amount.trunc()
            };
            let magnitude = u32::try_from(months.abs() as i64).map_err(|_| overflow())?;
            if months < 0.0 {
                date.checked_sub_months(Months::new(magnitude))
            } else {
                date.checked_add_months(Months::new(magnitude))
            }
        }
        _ => {
            let seconds_per_unit = match unit {
                DateUnit::Seconds => 1.0,
                DateUnit::Minutes => 60.0,
                DateUnit::Hours => 3_600.0,
                _ => 86_400.0,
            };
            let millis = (amount * seconds_per_unit * 1_000.0).round();
            if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
                return Err(overflow());
            }
            Duration::try_milliseconds(millis as i64).and_then(|d| date.checked_add_signed(d))
        }
    };

    shifted.map(Value::Date).ok_or_else(overflow)
}

fn reference_date() -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(REFERENCE_DATE_SECS, 0)
        .ok_or_else(|| Error::Evaluation("reference date out of range".to_string()))
}

/// Runs one of the `castObject:toType:` builtins on a known value.
pub(crate) fn apply_cast(builtin: Builtin, value: &Value) -> Result<Value> {
    match builtin {
        Builtin::CastNumber => cast_number(value),
        Builtin::CastDate => cast_date(value),
        Builtin::CastString => match value {
            Value::Null => Ok(Value::Null),
            v => Ok(Value::String(v.to_string())),
        },
        other => Err(Error::Evaluation(format!("{:?} is not a cast", other))),
    }
}

fn cast_number(value: &Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Boolean(b) => Ok(Value::Double(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| Error::Evaluation(format!("'{}' is not a number", s))),
        Value::Date(d) => {
            let since = *d - reference_date()?;
            Ok(Value::Double(since.num_milliseconds() as f64 / 1_000.0))
        }
        v => v.as_f64().map(Value::Double).ok_or_else(|| {
            Error::Evaluation(format!("cannot cast {} to NSNumber", type_name(v)))
        }),
    }
}

fn cast_date(value: &Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::String(s) => parse_date(s.trim())
            .map(Value::Date)
            .ok_or_else(|| Error::Evaluation(format!("'{}' is not a date", s))),
        v => {
            let seconds = v.as_f64().ok_or_else(|| {
                Error::Evaluation(format!("cannot cast {} to NSDate", type_name(v)))
            })?;
            let millis = (seconds * 1_000.0).round();
            if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
                return Err(Error::Evaluation(format!("date {} out of range", seconds)));
            }
            Duration::try_milliseconds(millis as i64)
                .and_then(|offset| reference_date().ok()?.checked_add_signed(offset))
                .map(Value::Date)
                .ok_or_else(|| Error::Evaluation(format!("date {} out of range", seconds)))
        }
    }
}

/// RFC 3339 first, then a few plain calendar layouts read as UTC.
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone)]
struct Runtime {
    dialect: Dialect,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
}

impl Runtime {
    fn from_options(options: &CompileOptions) -> Self {
        Runtime {
            dialect: options.dialect,
            random: Arc::clone(&options.random),
            clock: Arc::clone(&options.clock),
        }
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(self.random.as_ref(), self.clock.as_ref())
    }

    fn render(&self, target: &Target) -> Result<String> {
        if self.dialect != Dialect::Backend {
            return Err(Error::unsupported("SQL rendering", self.dialect));
        }
        crate::sql::render(target)
    }
}

/// A predicate lowered for one root kind and dialect.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    target: Target,
    runtime: Runtime,
}

impl CompiledPredicate {
    pub(crate) fn new(target: Target, options: &CompileOptions) -> Self {
        CompiledPredicate {
            target,
            runtime: Runtime::from_options(options),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn dialect(&self) -> Dialect {
        self.runtime.dialect
    }

    /// Tests one object.
    pub fn evaluate(&self, object: &Value) -> Result<bool> {
        let mut env = Env::with_object(object.clone());
        self.runtime.evaluator().eval_bool(&self.target, &mut env)
    }

    /// Keeps the items the predicate accepts, in order.
    pub fn filter<'v>(&self, items: &'v [Value]) -> Result<Vec<&'v Value>> {
        debug!(items = items.len(), "filtering collection");
        let mut kept = Vec::new();
        for item in items {
            if self.evaluate(item)? {
                kept.push(item);
            }
        }
        Ok(kept)
    }

    /// Renders the lowered predicate as a SQL condition. Only targets
    /// lowered for [`Dialect::Backend`] can be rendered.
    pub fn to_sql(&self) -> Result<String> {
        self.runtime.render(&self.target)
    }
}

/// An expression lowered for one root kind and dialect.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    target: Target,
    runtime: Runtime,
}

impl CompiledExpr {
    pub(crate) fn new(target: Target, options: &CompileOptions) -> Self {
        CompiledExpr {
            target,
            runtime: Runtime::from_options(options),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn dialect(&self) -> Dialect {
        self.runtime.dialect
    }

    pub fn evaluate(&self, object: &Value) -> Result<Value> {
        let mut env = Env::with_object(object.clone());
        self.runtime.evaluator().eval(&self.target, &mut env)
    }

    pub fn to_sql(&self) -> Result<String> {
        self.runtime.render(&self.target)
    }
}

impl Predicate {
    /// Compiles for the kind inferred from `object` and tests it.
    ///
    /// ```
    /// use sieve_lang::{Predicate, Value};
    ///
    /// let predicate = Predicate::parse("ANY {1, 2, 3} == 2", &[]).unwrap();
    /// assert!(predicate.evaluate(&Value::Null).unwrap());
    /// ```
    pub fn evaluate(&self, object: &Value) -> Result<bool> {
        self.evaluate_with(object, &CompileOptions::new())
    }

    pub fn evaluate_with(&self, object: &Value, options: &CompileOptions) -> Result<bool> {
        compile_predicate(self, &TypeKind::of_value(object), options)?.evaluate(object)
    }
}

impl Expr {
    /// Evaluates with `SELF` bound to `object`.
    pub fn value_with_object(&self, object: &Value) -> Result<Value> {
        self.value_with(object, &CompileOptions::new())
    }

    pub fn value_with(&self, object: &Value, options: &CompileOptions) -> Result<Value> {
        compile_expr(self, &TypeKind::of_value(object), None, options)?.evaluate(object)
    }

    /// Evaluates an expression that does not read `SELF`.
    ///
    /// ```
    /// use sieve_lang::{Expr, Value};
    ///
    /// let expr = Expr::parse("1 + 2 + 3 * 9", &[]).unwrap();
    /// assert_eq!(expr.value().unwrap(), Value::Int(30));
    /// ```
    pub fn value(&self) -> Result<Value> {
        self.value_with_object(&Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FixedClock, ThreadRandom};

    fn run(target: &Target) -> Result<Value> {
        let random = ThreadRandom::seeded(3);
        let clock = FixedClock(Utc::now());
        Evaluator::new(&random, &clock).eval(target, &mut Env::new())
    }

    #[test]
    fn test_integer_arithmetic_keeps_kind() {
        let sum = apply_binop(BinaryOp::Add, &Value::Short(2), &Value::Short(3), &TypeKind::Short);
        assert_eq!(sum.unwrap(), Value::Short(5));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let result = apply_binop(
            BinaryOp::Add,
            &Value::Int(i32::MAX),
            &Value::Int(1),
            &TypeKind::Int,
        );
        assert!(matches!(result, Err(Error::Evaluation(_))));
    }

    #[test]
    fn test_integer_division_by_zero() {
        let result = apply_binop(BinaryOp::Divide, &Value::Int(1), &Value::Int(0), &TypeKind::Int);
        assert_eq!(result, Err(Error::DivisionByZero));
    }

    #[test]
    fn test_integer_division_truncates() {
        let result = apply_binop(BinaryOp::Divide, &Value::Int(7), &Value::Int(2), &TypeKind::Int);
        assert_eq!(result.unwrap(), Value::Int(3));
    }

    #[test]
    fn test_decimal_multiplication() {
        let result = apply_binop(
            BinaryOp::Multiply,
            &Value::Double(100.0),
            &Value::Double(1.5),
            &TypeKind::Double,
        );
        assert_eq!(result.unwrap(), Value::Double(150.0));
    }

    #[test]
    fn test_guard_yields_default_on_null() {
        let body = Target::new(
            TypeKind::Int,
            Node::Property {
                receiver: Box::new(Target::parameter("g", TypeKind::Any)),
                name: "n".to_string(),
            },
        );
        let guard = Target::new(
            TypeKind::Int,
            Node::Guard {
                subject: Box::new(Target::constant(Value::Null)),
                binding: "g".to_string(),
                body: Box::new(body),
            },
        );
        assert_eq!(run(&guard).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_like_is_glob() {
        let re = like_regex("a*c?").unwrap();
        assert!(re.is_match("abbbcd"));
        assert!(!re.is_match("abbbc"));
        assert!(like_regex("a.b").unwrap().is_match("a.b"));
        assert!(!like_regex("a.b").unwrap().is_match("axb"));
    }

    #[test]
    fn test_element_at_out_of_range_is_null() {
        let items = Value::from(vec![1i32, 2]);
        assert_eq!(element_at(items.clone(), &Value::Int(1)).unwrap(), Value::Int(2));
        assert_eq!(element_at(items, &Value::Int(5)).unwrap(), Value::Null);
    }

    #[test]
    fn test_date_add_months_and_fractional_days() {
        let start = parse_date("2024-01-31T00:00:00Z").unwrap();
        let shifted = date_add(&Value::Date(start), &Value::Int(1), DateUnit::Months, false).unwrap();
        assert_eq!(shifted, Value::Date(parse_date("2024-02-29T00:00:00Z").unwrap()));

        let half = date_add(&Value::Date(start), &Value::Double(0.5), DateUnit::Days, false).unwrap();
        assert_eq!(half, Value::Date(parse_date("2024-01-31T12:00:00Z").unwrap()));

        let whole = date_add(&Value::Date(start), &Value::Double(0.5), DateUnit::Days, true).unwrap();
        assert_eq!(whole, Value::Date(start));
    }

    #[test]
    fn test_number_casts_use_reference_date() {
        let origin = cast_date(&Value::Int(0)).unwrap();
        assert_eq!(origin, Value::Date(parse_date("2001-01-01T00:00:00Z").unwrap()));
        assert_eq!(cast_number(&origin).unwrap(), Value::Double(0.0));
        assert_eq!(cast_number(&Value::Boolean(true)).unwrap(), Value::Double(1.0));
        assert_eq!(cast_number(&Value::from("2.5")).unwrap(), Value::Double(2.5));
    }

    #[test]
    fn test_sum_of_empty_collection() {
        assert_eq!(reduce(Reduction::Sum, vec![], &TypeKind::Int).unwrap(), Value::Int(0));
        assert_eq!(reduce(Reduction::Max, vec![], &TypeKind::Int).unwrap(), Value::Null);
    }
}
