use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::TypeKind;

/// A runtime value flowing through compiled predicates.
///
/// Numbers keep their storage width so the coercion lattice can tell a
/// `short` from an `int`; collections and objects mirror JSON.
///
/// # Examples
///
/// ```
/// use sieve_lang::Value;
/// use std::collections::HashMap;
///
/// let count = Value::Int(3);
/// let name = Value::from("hello");
///
/// let mut obj = HashMap::new();
/// obj.insert("name".to_string(), name);
/// obj.insert("tags".to_string(), Value::from(vec!["a", "b"]));
/// let document = Value::Object(obj);
/// # let _ = (count, document);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(u8),
    SByte(i8),
    UShort(u16),
    Short(i16),
    UInt(u32),
    Int(i32),
    ULong(u64),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Guid(Uuid),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

/// Returns a human-readable type name for a Value
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Boolean(_) => "boolean",
        Value::Byte(_) => "byte",
        Value::SByte(_) => "sbyte",
        Value::UShort(_) => "ushort",
        Value::Short(_) => "short",
        Value::UInt(_) => "uint",
        Value::Int(_) => "int",
        Value::ULong(_) => "ulong",
        Value::Long(_) => "long",
        Value::Float(_) => "float",
        Value::Double(_) => "double",
        Value::String(_) => "string",
        Value::Guid(_) => "guid",
        Value::Date(_) => "date",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get any numeric value as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(f64::from(*n)),
            Value::Double(n) => Some(*n),
            other => other.as_i128().map(|n| n as f64),
        }
    }

    /// Get an integer-kinded value, widened
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Byte(n) => Some(i128::from(*n)),
            Value::SByte(n) => Some(i128::from(*n)),
            Value::UShort(n) => Some(i128::from(*n)),
            Value::Short(n) => Some(i128::from(*n)),
            Value::UInt(n) => Some(i128::from(*n)),
            Value::Int(n) => Some(i128::from(*n)),
            Value::ULong(n) => Some(i128::from(*n)),
            Value::Long(n) => Some(i128::from(*n)),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Narrows a widened integer back into `kind`, failing on overflow.
    pub fn from_i128(kind: &TypeKind, n: i128) -> Option<Value> {
        Some(match kind {
            TypeKind::Byte => Value::Byte(u8::try_from(n).ok()?),
            TypeKind::SByte => Value::SByte(i8::try_from(n).ok()?),
            TypeKind::UShort => Value::UShort(u16::try_from(n).ok()?),
            TypeKind::Short => Value::Short(i16::try_from(n).ok()?),
            TypeKind::UInt => Value::UInt(u32::try_from(n).ok()?),
            TypeKind::Int => Value::Int(i32::try_from(n).ok()?),
            TypeKind::ULong => Value::ULong(u64::try_from(n).ok()?),
            TypeKind::Long => Value::Long(i64::try_from(n).ok()?),
            TypeKind::Float => Value::Float(n as f32),
            TypeKind::Double => Value::Double(n as f64),
            _ => return None,
        })
    }

    /// Converts this value to `kind`, the runtime half of a coercion cast.
    pub fn convert_to(&self, kind: &TypeKind) -> Result<Value> {
        if self.is_null() || kind.is_dynamic() || TypeKind::of_value(self) == *kind {
            return Ok(self.clone());
        }

        let fail = || {
            Error::Evaluation(format!(
                "cannot convert {} value {} to {}",
                type_name(self),
                self,
                kind
            ))
        };

        match (self, kind) {
            (v, k) if k.is_integer() && v.as_i128().is_some() => {
                let n = v.as_i128().ok_or_else(fail)?;
                Value::from_i128(k, n).ok_or_else(fail)
            }
            (v, k) if k.is_integer() && v.is_numeric() => {
                let f = v.as_f64().ok_or_else(fail)?.trunc();
                if !f.is_finite() || f < i128::MIN as f64 || f > i128::MAX as f64 {
                    return Err(fail());
                }
                Value::from_i128(k, f as i128).ok_or_else(fail)
            }
            (v, TypeKind::Float) if v.is_numeric() => {
                Ok(Value::Float(v.as_f64().ok_or_else(fail)? as f32))
            }
            (v, TypeKind::Double) if v.is_numeric() => Ok(Value::Double(v.as_f64().ok_or_else(fail)?)),
            (Value::Boolean(b), k) if k.is_integer() => {
                Value::from_i128(k, i128::from(*b)).ok_or_else(fail)
            }
            (Value::String(s), TypeKind::Guid) => Uuid::parse_str(s.trim())
                .map(Value::Guid)
                .map_err(|_| fail()),
            (Value::String(s), k) if k.is_integer() => {
                let n = s.trim().parse::<i128>().map_err(|_| fail())?;
                Value::from_i128(k, n).ok_or_else(fail)
            }
            (Value::String(s), TypeKind::Float | TypeKind::Double) => {
                let f = s.trim().parse::<f64>().map_err(|_| fail())?;
                Value::Double(f).convert_to(kind)
            }
            (v, TypeKind::String) if !matches!(v, Value::Array(_) | Value::Object(_)) => {
                Ok(Value::String(v.to_string()))
            }
            _ => Err(fail()),
        }
    }

    /// Orders two scalars, promoting mixed numeric kinds.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (a, b) if a.as_i128().is_some() && b.as_i128().is_some() => {
                Some(a.as_i128()?.cmp(&b.as_i128()?))
            }
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Guid(g), Value::String(s)) => Some(g.to_string().cmp(&s.to_lowercase())),
            (Value::String(s), Value::Guid(g)) => Some(s.to_lowercase().cmp(&g.to_string())),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality used by `==`, `IN` and `CONTAINS`.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => a == b,
            (a, b) => a.compare(b) == Some(Ordering::Equal),
        }
    }

    /// Converts a JSON document into a value tree.
    pub fn from_json(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Long(i)
                } else if let Some(u) = n.as_u64() {
                    Value::ULong(u)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts a value tree back into JSON. Guids and dates become strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Float(f) => float_to_json(f64::from(*f)),
            Value::Double(f) => float_to_json(*f),
            Value::ULong(u) => serde_json::Value::Number((*u).into()),
            v if v.as_i128().is_some() => match v.as_i128().and_then(|n| i64::try_from(n).ok()) {
                Some(i) => serde_json::Value::Number(i.into()),
                None => serde_json::Value::Null,
            },
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Guid(g) => serde_json::Value::String(g.to_string()),
            Value::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(Value::to_json).collect()),
            Value::Object(obj) => serde_json::Value::Object(
                obj.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            _ => serde_json::Value::Null,
        }
    }
}

fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Byte(n) => write!(f, "{}", n),
            Value::SByte(n) => write!(f, "{}", n),
            Value::UShort(n) => write!(f, "{}", n),
            Value::Short(n) => write!(f, "{}", n),
            Value::UInt(n) => write!(f, "{}", n),
            Value::Int(n) => write!(f, "{}", n),
            Value::ULong(n) => write!(f, "{}", n),
            Value::Long(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Guid(g) => write!(f, "{}", g),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Boolean,
    u8 => Byte,
    i8 => SByte,
    u16 => UShort,
    i16 => Short,
    u32 => UInt,
    i32 => Int,
    u64 => ULong,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    Uuid => Guid,
    DateTime<Utc> => Date,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_conversion() {
        assert_eq!(Value::Short(4).convert_to(&TypeKind::Int).unwrap(), Value::Int(4));
        assert_eq!(Value::Int(7).convert_to(&TypeKind::Double).unwrap(), Value::Double(7.0));
    }

    #[test]
    fn test_narrowing_overflow_fails() {
        assert!(Value::Int(300).convert_to(&TypeKind::Byte).is_err());
        assert!(Value::SByte(-1).convert_to(&TypeKind::UShort).is_err());
    }

    #[test]
    fn test_string_to_guid() {
        let parsed = Value::from("6f9619ff-8b86-d011-b42d-00c04fc964ff")
            .convert_to(&TypeKind::Guid)
            .unwrap();
        assert!(matches!(parsed, Value::Guid(_)));
        assert!(Value::from("not a guid").convert_to(&TypeKind::Guid).is_err());
    }

    #[test]
    fn test_mixed_numeric_equality() {
        assert!(Value::Short(3).loose_eq(&Value::Long(3)));
        assert!(Value::Int(2).loose_eq(&Value::Double(2.0)));
        assert!(!Value::Null.loose_eq(&Value::Int(0)));
        assert!(Value::Null.loose_eq(&Value::Null));
    }

    #[test]
    fn test_json_round_trip_keeps_shape() {
        let json: serde_json::Value = serde_json::from_str(r#"{"a": [1, 2.5, "x", null]}"#).unwrap();
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json(), json);
    }
}
