//! Runtime values.
//!
//! The evaluation stack, locals and arguments all hold [`Value`]s. Small integer types are
//! widened to `int32` as on the real evaluation stack, `float` is widened to `double`, and
//! native integers are kept as 64-bit values. Reference types live on the
//! [`Heap`](crate::emulation::Heap) and are passed around as [`ObjectRef`]s.

use std::fmt;

use crate::{
    emulation::EmulationError,
    metadata::{MemberRef, TypeSig},
};

/// Reference to an object on the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub(crate) usize);

impl ObjectRef {
    /// Position of the object on the heap.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The target of a managed pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// A local variable of the frame at call depth `depth`.
    Local {
        /// Call depth of the owning frame.
        depth: usize,
        /// Local index.
        index: u16,
    },
    /// An argument slot of the frame at call depth `depth`.
    Argument {
        /// Call depth of the owning frame.
        depth: usize,
        /// Argument slot.
        index: u16,
    },
    /// The value stored inside a boxed heap object.
    Boxed(ObjectRef),
}

/// A value on the evaluation stack or in a variable.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The null reference.
    #[default]
    Null,
    /// `int32`, also `bool`, `char` and the small integer types.
    I4(i32),
    /// `int64` and native integers.
    I8(i64),
    /// `float64`, also `float32`.
    R8(f64),
    /// A heap object.
    Object(ObjectRef),
    /// A managed pointer.
    Pointer(Location),
    /// A `RuntimeMethodHandle` pushed by `ldtoken`.
    MethodHandle(MemberRef),
    /// A `RuntimeTypeHandle` pushed by `ldtoken`.
    TypeHandle(TypeSig),
    /// An opaque user-defined value type, by type name.
    Struct(String),
}

impl Value {
    /// The zero value of `sig`, as left by `initobj` or an initialized local.
    #[must_use]
    pub fn default_for(sig: &TypeSig) -> Self {
        match sig {
            TypeSig::Boolean
            | TypeSig::Char
            | TypeSig::I1
            | TypeSig::U1
            | TypeSig::I2
            | TypeSig::U2
            | TypeSig::I4
            | TypeSig::U4 => Value::I4(0),
            TypeSig::I8 | TypeSig::U8 | TypeSig::I | TypeSig::U => Value::I8(0),
            TypeSig::R4 | TypeSig::R8 => Value::R8(0.0),
            other if other.is_value_type() => Value::Struct(other.full_name()),
            _ => Value::Null,
        }
    }

    /// The signature a value of this kind is boxed as, `None` for references.
    #[must_use]
    pub fn boxed_sig(&self) -> Option<TypeSig> {
        match self {
            Value::I4(_) => Some(TypeSig::I4),
            Value::I8(_) => Some(TypeSig::I8),
            Value::R8(_) => Some(TypeSig::R8),
            Value::Struct(name) => Some(TypeSig::ValueType(name.clone())),
            _ => None,
        }
    }

    /// Returns the `int32` value
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for any other kind of value
    pub fn as_i4(&self, operation: &'static str) -> Result<i32, EmulationError> {
        match self {
            Value::I4(value) => Ok(*value),
            other => Err(EmulationError::TypeMismatch {
                operation,
                expected: "int32",
                found: other.kind(),
            }),
        }
    }

    /// Returns the referenced object, `None` for null
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for values that are not references
    pub fn as_object(&self, operation: &'static str) -> Result<Option<ObjectRef>, EmulationError> {
        match self {
            Value::Object(reference) => Ok(Some(*reference)),
            Value::Null => Ok(None),
            other => Err(EmulationError::TypeMismatch {
                operation,
                expected: "object",
                found: other.kind(),
            }),
        }
    }

    /// Truth value as tested by `brtrue`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            Value::Null => false,
            Value::I4(value) => *value != 0,
            Value::I8(value) => *value != 0,
            Value::R8(value) => *value != 0.0,
            _ => true,
        }
    }

    /// Short name of the value kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::I4(_) => "int32",
            Value::I8(_) => "int64",
            Value::R8(_) => "float64",
            Value::Object(_) => "object",
            Value::Pointer(_) => "pointer",
            Value::MethodHandle(_) => "RuntimeMethodHandle",
            Value::TypeHandle(_) => "RuntimeTypeHandle",
            Value::Struct(_) => "struct",
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I4(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I8(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::R8(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::I4(i32::from(value))
    }
}

impl From<ObjectRef> for Value {
    fn from(reference: ObjectRef) -> Self {
        Value::Object(reference)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::I4(value) => write!(f, "{value}"),
            Value::I8(value) => write!(f, "{value}L"),
            Value::R8(value) => write!(f, "{value:?}"),
            Value::Object(reference) => write!(f, "{reference}"),
            Value::Pointer(location) => write!(f, "&{location:?}"),
            Value::MethodHandle(member) => write!(f, "methodof({})", member.full_name()),
            Value::TypeHandle(sig) => write!(f, "typeof({sig})"),
            Value::Struct(name) => write!(f, "default({name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_for() {
        assert_eq!(Value::default_for(&TypeSig::Boolean), Value::I4(0));
        assert_eq!(Value::default_for(&TypeSig::U8), Value::I8(0));
        assert_eq!(Value::default_for(&TypeSig::R4), Value::R8(0.0));
        assert_eq!(Value::default_for(&TypeSig::String), Value::Null);
        assert_eq!(
            Value::default_for(&TypeSig::value_type("Demo.Point")),
            Value::Struct("Demo.Point".to_string())
        );
        assert_eq!(
            Value::default_for(&TypeSig::GenericParam("T".to_string())),
            Value::Null
        );
    }

    #[test]
    fn test_truth_and_conversions() {
        assert!(Value::from(true).is_true());
        assert!(!Value::I8(0).is_true());
        assert!(!Value::Null.is_true());
        assert!(Value::Object(ObjectRef(3)).is_true());

        assert_eq!(Value::I4(7).as_i4("test"), Ok(7));
        assert!(Value::Null.as_i4("test").is_err());
        assert_eq!(Value::Null.as_object("test"), Ok(None));
        assert_eq!(Value::I4(1).boxed_sig(), Some(TypeSig::I4));
        assert_eq!(Value::Null.boxed_sig(), None);
    }
}
