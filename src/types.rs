//! Static value kinds carried alongside every lowered expression.
//!
//! The compiler never inspects runtime values to decide how to lower a node;
//! it looks at the [`TypeKind`] of the operands instead. Kinds are either
//! known up front (an explicit record schema handed to `compile`) or inferred
//! from a sample value with [`TypeKind::of_value`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

/// The static kind of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// Unknown until runtime; every operation on it is deferred.
    Any,
    /// The kind of a bare `nil` literal.
    Null,
    Boolean,
    Byte,
    SByte,
    UShort,
    Short,
    UInt,
    Int,
    ULong,
    Long,
    Float,
    Double,
    String,
    Guid,
    Date,
    /// An ordered collection with a single element kind.
    Sequence(Box<TypeKind>),
    /// An object with named properties.
    Record(Arc<RecordType>),
}

/// Directly castable scalars, least precise first.
const PRECISION_ORDER: [TypeKind; 12] = [
    TypeKind::Byte,
    TypeKind::SByte,
    TypeKind::UShort,
    TypeKind::Short,
    TypeKind::UInt,
    TypeKind::Int,
    TypeKind::ULong,
    TypeKind::Long,
    TypeKind::Float,
    TypeKind::Double,
    TypeKind::String,
    TypeKind::Guid,
];

/// Property layout of a record kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name: String,
    pub fields: BTreeMap<String, TypeKind>,
    /// Open records answer `Any` for properties they do not list.
    pub open: bool,
}

impl RecordType {
    /// A closed record: accessing an unlisted property is a type error.
    pub fn new(name: impl Into<String>) -> Self {
        RecordType {
            name: name.into(),
            fields: BTreeMap::new(),
            open: false,
        }
    }

    pub fn field(mut self, name: impl Into<String>, kind: TypeKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    pub fn into_kind(self) -> TypeKind {
        TypeKind::Record(Arc::new(self))
    }
}

impl TypeKind {
    pub fn sequence_of(element: TypeKind) -> Self {
        TypeKind::Sequence(Box::new(element))
    }

    /// Position in the castable-scalar precision lattice, if any.
    pub fn precision_rank(&self) -> Option<usize> {
        PRECISION_ORDER.iter().position(|k| k == self)
    }

    pub fn is_castable(&self) -> bool {
        self.precision_rank().is_some()
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TypeKind::Byte
                | TypeKind::SByte
                | TypeKind::UShort
                | TypeKind::Short
                | TypeKind::UInt
                | TypeKind::Int
                | TypeKind::ULong
                | TypeKind::Long
                | TypeKind::Float
                | TypeKind::Double
        )
    }

    pub fn is_integer(&self) -> bool {
        self.is_numeric() && !matches!(self, TypeKind::Float | TypeKind::Double)
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, TypeKind::Sequence(_))
    }

    /// Element kind of a sequence; `Any` stands in for an unknown collection.
    pub fn element_type(&self) -> Option<TypeKind> {
        match self {
            TypeKind::Sequence(element) => Some((**element).clone()),
            TypeKind::Any => Some(TypeKind::Any),
            _ => None,
        }
    }

    /// True for kinds whose values may turn out to be anything at runtime.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, TypeKind::Any | TypeKind::Null)
    }

    /// The value a safe-navigation step collapses to.
    pub fn default_value(&self) -> Value {
        match self {
            TypeKind::Boolean => Value::Boolean(false),
            TypeKind::Byte => Value::Byte(0),
            TypeKind::SByte => Value::SByte(0),
            TypeKind::UShort => Value::UShort(0),
            TypeKind::Short => Value::Short(0),
            TypeKind::UInt => Value::UInt(0),
            TypeKind::Int => Value::Int(0),
            TypeKind::ULong => Value::ULong(0),
            TypeKind::Long => Value::Long(0),
            TypeKind::Float => Value::Float(0.0),
            TypeKind::Double => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    /// Resolves the kind of `name` on a receiver of this kind.
    pub fn property(&self, name: &str) -> Result<TypeKind> {
        match self {
            TypeKind::Any | TypeKind::Null => Ok(TypeKind::Any),
            TypeKind::Record(record) => match record.fields.get(name) {
                Some(kind) => Ok(kind.clone()),
                None if record.open => Ok(TypeKind::Any),
                None => Err(Error::Type(format!(
                    "type {} has no property '{}'",
                    record.name, name
                ))),
            },
            other => Err(Error::Type(format!(
                "cannot access property '{}' on {}",
                name, other
            ))),
        }
    }

    /// Infers a kind from a sample value. Objects become open records.
    pub fn of_value(value: &Value) -> TypeKind {
        match value {
            Value::Null => TypeKind::Null,
            Value::Boolean(_) => TypeKind::Boolean,
            Value::Byte(_) => TypeKind::Byte,
            Value::SByte(_) => TypeKind::SByte,
            Value::UShort(_) => TypeKind::UShort,
            Value::Short(_) => TypeKind::Short,
            Value::UInt(_) => TypeKind::UInt,
            Value::Int(_) => TypeKind::Int,
            Value::ULong(_) => TypeKind::ULong,
            Value::Long(_) => TypeKind::Long,
            Value::Float(_) => TypeKind::Float,
            Value::Double(_) => TypeKind::Double,
            Value::String(_) => TypeKind::String,
            Value::Guid(_) => TypeKind::Guid,
            Value::Date(_) => TypeKind::Date,
            Value::Array(items) => {
                let mut kinds = items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(TypeKind::of_value);
                let element = match kinds.next() {
                    Some(first) if kinds.all(|k| k == first) => first,
                    _ => TypeKind::Any,
                };
                TypeKind::sequence_of(element)
            }
            Value::Object(map) => TypeKind::Record(Arc::new(RecordType {
                name: "object".to_string(),
                fields: map
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), TypeKind::of_value(v)))
                    .collect(),
                open: true,
            })),
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Any => write!(f, "any"),
            TypeKind::Null => write!(f, "null"),
            TypeKind::Boolean => write!(f, "boolean"),
            TypeKind::Byte => write!(f, "byte"),
            TypeKind::SByte => write!(f, "sbyte"),
            TypeKind::UShort => write!(f, "ushort"),
            TypeKind::Short => write!(f, "short"),
            TypeKind::UInt => write!(f, "uint"),
            TypeKind::Int => write!(f, "int"),
            TypeKind::ULong => write!(f, "ulong"),
            TypeKind::Long => write!(f, "long"),
            TypeKind::Float => write!(f, "float"),
            TypeKind::Double => write!(f, "double"),
            TypeKind::String => write!(f, "string"),
            TypeKind::Guid => write!(f, "guid"),
            TypeKind::Date => write!(f, "date"),
            TypeKind::Sequence(element) => write!(f, "sequence<{}>", element),
            TypeKind::Record(record) => write!(f, "{}", record.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_precision_order_is_strict() {
        assert!(TypeKind::Short.precision_rank() < TypeKind::Int.precision_rank());
        assert!(TypeKind::Double.precision_rank() < TypeKind::String.precision_rank());
        assert!(TypeKind::String.precision_rank() < TypeKind::Guid.precision_rank());
        assert_eq!(TypeKind::Boolean.precision_rank(), None);
        assert_eq!(TypeKind::Date.precision_rank(), None);
    }

    #[test]
    fn test_infer_homogeneous_array() {
        let kind = TypeKind::of_value(&Value::Array(vec![Value::Long(1), Value::Long(2)]));
        assert_eq!(kind, TypeKind::sequence_of(TypeKind::Long));

        let mixed = TypeKind::of_value(&Value::Array(vec![
            Value::Long(1),
            Value::String("a".into()),
        ]));
        assert_eq!(mixed, TypeKind::sequence_of(TypeKind::Any));
    }

    #[test]
    fn test_open_record_answers_any() {
        let mut map = HashMap::new();
        map.insert("name".to_string(), Value::String("x".into()));
        let kind = TypeKind::of_value(&Value::Object(map));
        assert_eq!(kind.property("name").unwrap(), TypeKind::String);
        assert_eq!(kind.property("missing").unwrap(), TypeKind::Any);
    }

    #[test]
    fn test_closed_record_rejects_unknown_property() {
        let kind = RecordType::new("User")
            .field("Name", TypeKind::String)
            .into_kind();
        assert!(matches!(kind.property("Age"), Err(Error::Type(_))));
    }
}
