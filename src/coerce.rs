//! Makes two lowered operands comparable.
//!
//! Directly castable scalars are ordered by precision
//! (byte < sbyte < ushort < short < uint < int < ulong < long < float <
//! double < string < guid); the less precise side is cast up to the other.
//! A scalar compared with a collection is cast toward the element kind.
//! Operands of any other kind pass through unchanged.

use tracing::trace;

use crate::error::{Error, Result};
use crate::target::Target;
use crate::types::TypeKind;
use crate::value::Value;

/// Returns `(left, right)` rewritten so that they share a comparable kind.
pub fn make_comparable(left: Target, right: Target) -> Result<(Target, Target)> {
    if left.ty == right.ty || left.ty.is_dynamic() || right.ty.is_dynamic() {
        return Ok((left, right));
    }

    match (left.ty.is_sequence(), right.ty.is_sequence()) {
        (true, false) => {
            let right = make_comparable_vector(right, &left.ty)?;
            return Ok((left, right));
        }
        (false, true) => {
            let left = make_comparable_vector(left, &right.ty)?;
            return Ok((left, right));
        }
        (true, true) => return Ok((left, right)),
        (false, false) => {}
    }

    match (left.ty.precision_rank(), right.ty.precision_rank()) {
        (Some(l), Some(r)) if l < r => {
            let to = right.ty.clone();
            Ok((cast(left, &to)?, right))
        }
        (Some(_), Some(_)) => {
            let to = left.ty.clone();
            Ok((left, cast(right, &to)?))
        }
        (Some(_), None) | (None, Some(_)) if is_scalar(&left.ty) && is_scalar(&right.ty) => {
            Err(Error::Type(format!(
                "cannot compare {} with {}",
                left.ty, right.ty
            )))
        }
        _ => Ok((left, right)),
    }
}

/// Casts a needle toward the element kind of `haystack`.
fn make_comparable_vector(needle: Target, haystack: &TypeKind) -> Result<Target> {
    match haystack.element_type() {
        Some(element) if element.is_castable() && needle.ty.is_castable() => cast(needle, &element),
        _ => Ok(needle),
    }
}

fn is_scalar(kind: &TypeKind) -> bool {
    kind.is_castable() || matches!(kind, TypeKind::Boolean | TypeKind::Date)
}

/// Casts `target` to `to`.
///
/// Constants are folded immediately. Between strings and GUIDs only
/// constants are converted; a computed string or GUID passes through and
/// is compared as-is at runtime.
pub fn cast(target: Target, to: &TypeKind) -> Result<Target> {
    if target.ty == *to || to.is_dynamic() {
        return Ok(target);
    }
    trace!(from = %target.ty, to = %to, "coercing operand");

    let string_guid = matches!(
        (&target.ty, to),
        (TypeKind::String, TypeKind::Guid) | (TypeKind::Guid, TypeKind::String)
    );

    match target.as_constant() {
        Some(Value::Null) => Ok(target),
        Some(value) => {
            let converted = value.convert_to(to).map_err(|_| {
                if string_guid {
                    Error::Type(format!("'{}' is not a valid GUID", value))
                } else {
                    Error::Type(format!("cannot convert {} to {}", value, to))
                }
            })?;
            Ok(Target {
                ty: to.clone(),
                node: crate::target::Node::Constant(converted),
            })
        }
        None if string_guid => Ok(target),
        None => Ok(Target::convert(target, to.clone())),
    }
}
