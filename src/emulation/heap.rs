//! The managed heap.
//!
//! Objects are never collected; a heap lives as long as one [`Interpreter`] run.
//!
//! [`Interpreter`]: crate::emulation::Interpreter

use std::collections::BTreeMap;

use crate::{
    emulation::{EmulationError, ObjectRef, Value},
    metadata::{MemberRef, TypeSig},
};

/// The payload woven code hands to method hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodArgsObject {
    /// The intercepted instance, null for static methods.
    pub instance: Value,
    /// The `object[]` of boxed arguments.
    pub arguments: Value,
    /// The boxed result.
    pub result: Value,
    /// The `MethodBase` of the intercepted method.
    pub method: Value,
    /// Set by a hook to skip the remaining hooks.
    pub cancel: bool,
}

/// The payload woven code hands to parameter hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterArgsObject {
    /// The intercepted instance, null for static methods.
    pub instance: Value,
    /// The `ParameterInfo` of the parameter.
    pub parameter: Value,
    /// The boxed argument value.
    pub value: Value,
    /// Set by a hook to skip the remaining hooks.
    pub cancel: bool,
}

/// An object on the heap.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    /// A boxed value type.
    Boxed {
        /// Type the value was boxed as.
        sig: TypeSig,
        /// The boxed value.
        value: Value,
    },
    /// A single-dimensional array.
    Array {
        /// Element type.
        element: TypeSig,
        /// Elements.
        items: Vec<Value>,
    },
    /// A string.
    String(String),
    /// An exception object.
    Exception {
        /// Exception type name.
        type_name: String,
        /// Message.
        message: String,
    },
    /// An instance of a type the runtime knows nothing about beyond its constructor
    /// arguments and assigned properties
    Instance {
        /// Type name.
        type_name: String,
        /// Constructor arguments.
        ctor_args: Vec<Value>,
        /// Properties assigned through setters.
        properties: BTreeMap<String, Value>,
    },
    /// A method hook payload.
    MethodArgs(MethodArgsObject),
    /// A parameter hook payload.
    ParameterArgs(ParameterArgsObject),
    /// A `MethodBase`.
    MethodInfo(MemberRef),
    /// A `ParameterInfo`.
    ParameterInfo {
        /// Declaring method.
        method: MemberRef,
        /// 0-based parameter position.
        position: u16,
    },
    /// A `System.Type`.
    Type(TypeSig),
}

impl HeapObject {
    /// Short name of the object kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::Boxed { .. } => "boxed value",
            HeapObject::Array { .. } => "array",
            HeapObject::String(_) => "string",
            HeapObject::Exception { .. } => "exception",
            HeapObject::Instance { .. } => "instance",
            HeapObject::MethodArgs(_) => "method payload",
            HeapObject::ParameterArgs(_) => "parameter payload",
            HeapObject::MethodInfo(_) => "MethodBase",
            HeapObject::ParameterInfo { .. } => "ParameterInfo",
            HeapObject::Type(_) => "Type",
        }
    }

    /// The runtime type name of the object.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            HeapObject::Boxed { sig, .. } => sig.full_name(),
            HeapObject::Array { element, .. } => format!("{}[]", element.full_name()),
            HeapObject::String(_) => "System.String".to_string(),
            HeapObject::Exception { type_name, .. } | HeapObject::Instance { type_name, .. } => {
                type_name.clone()
            }
            HeapObject::MethodArgs(_) => crate::weaver::METHOD_ARGS_TYPE.to_string(),
            HeapObject::ParameterArgs(_) => crate::weaver::PARAMETER_ARGS_TYPE.to_string(),
            HeapObject::MethodInfo(_) => "System.Reflection.MethodBase".to_string(),
            HeapObject::ParameterInfo { .. } => "System.Reflection.ParameterInfo".to_string(),
            HeapObject::Type(_) => "System.Type".to_string(),
        }
    }
}

/// Append-only object store.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `object`.
    pub fn alloc(&mut self, object: HeapObject) -> ObjectRef {
        self.objects.push(object);
        ObjectRef(self.objects.len() - 1)
    }

    /// Allocates a string.
    pub fn alloc_string(&mut self, value: &str) -> ObjectRef {
        self.alloc(HeapObject::String(value.to_string()))
    }

    /// Allocates an exception of type `type_name`.
    pub fn alloc_exception(&mut self, type_name: &str, message: &str) -> ObjectRef {
        self.alloc(HeapObject::Exception {
            type_name: type_name.to_string(),
            message: message.to_string(),
        })
    }

    /// Boxes primitive and struct values; references are returned unchanged.
    pub fn box_value(&mut self, value: Value) -> Value {
        match value.boxed_sig() {
            Some(sig) => Value::Object(self.alloc(HeapObject::Boxed { sig, value })),
            None => value,
        }
    }

    /// The value inside a boxed object; anything else is returned unchanged.
    #[must_use]
    pub fn unbox(&self, value: &Value) -> Value {
        if let Value::Object(reference) = value {
            if let Some(HeapObject::Boxed { value, .. }) = self.objects.get(reference.0) {
                return value.clone();
            }
        }
        value.clone()
    }

    /// Object at `reference`
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidHeapReference`] for dangling references
    pub fn get(&self, reference: ObjectRef) -> Result<&HeapObject, EmulationError> {
        self.objects
            .get(reference.0)
            .ok_or(EmulationError::InvalidHeapReference {
                reference: reference.0,
            })
    }

    /// Mutable object at `reference`
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidHeapReference`] for dangling references
    pub fn get_mut(&mut self, reference: ObjectRef) -> Result<&mut HeapObject, EmulationError> {
        self.objects
            .get_mut(reference.0)
            .ok_or(EmulationError::InvalidHeapReference {
                reference: reference.0,
            })
    }

    /// String contents of `reference`, `None` if it is not a string.
    #[must_use]
    pub fn string(&self, reference: ObjectRef) -> Option<&str> {
        match self.objects.get(reference.0) {
            Some(HeapObject::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Elements of the array at `reference`
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] if the object is not an array
    pub fn array(&self, reference: ObjectRef) -> Result<&[Value], EmulationError> {
        match self.get(reference)? {
            HeapObject::Array { items, .. } => Ok(items),
            other => Err(EmulationError::TypeMismatch {
                operation: "array access",
                expected: "array",
                found: other.kind(),
            }),
        }
    }

    /// Mutable elements of the array at `reference`
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] if the object is not an array
    pub fn array_mut(&mut self, reference: ObjectRef) -> Result<&mut Vec<Value>, EmulationError> {
        match self.get_mut(reference)? {
            HeapObject::Array { items, .. } => Ok(items),
            other => Err(EmulationError::TypeMismatch {
                operation: "array access",
                expected: "array",
                found: other.kind(),
            }),
        }
    }

    /// Type name of the object at `reference`
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidHeapReference`] for dangling references
    pub fn type_name(&self, reference: ObjectRef) -> Result<String, EmulationError> {
        Ok(self.get(reference)?.type_name())
    }

    /// Number of allocated objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if nothing was allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
