//! The host side of the hook contract.
//!
//! [`HostRuntime`] stands in for the interceptor runtime assembly while woven bodies are
//! executed. It implements the members of the hook contract (the payload types, the
//! reflection lookups, the interceptor interfaces) and dispatches interceptor hooks to
//! [`InterceptorBehavior`]s registered by type name. Calls to anything else can be
//! answered by stubs, registered per `Type::Name`.
//!
//! Every hook call is recorded as a [`HookInvocation`], with the arguments the hook saw.
//!
//! ```rust
//! use cilweave::emulation::{HostRuntime, InterceptorBehavior, Value};
//!
//! let runtime = HostRuntime::new()
//!     .with_interceptor(
//!         "Demo.DoubleAttribute",
//!         InterceptorBehavior::new().on_parameter(|hook| {
//!             if let Value::I4(value) = hook.value() {
//!                 hook.set_value(Value::I4(value * 2));
//!             }
//!         }),
//!     );
//! assert!(runtime.invocations().is_empty());
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use strum::Display;

use crate::{
    emulation::{
        heap::{HeapObject, MethodArgsObject, ParameterArgsObject},
        EmulationError, Heap, ObjectRef, Value,
    },
    metadata::MemberRef,
    weaver::{
        METHOD_ARGS_TYPE, METHOD_BASE_TYPE, METHOD_INTERCEPTOR_TYPE, PARAMETER_ARGS_TYPE,
        PARAMETER_INTERCEPTOR_TYPE, SYSTEM_TYPE,
    },
};

/// Callback for `OnEnter`, `OnExit` and `OnException` of method interceptors.
pub type MethodHookFn = Arc<dyn Fn(&mut MethodHook<'_>) + Send + Sync>;

/// Callback for `OnEnter` of parameter interceptors.
pub type ParameterHookFn = Arc<dyn Fn(&mut ParameterHook<'_>) + Send + Sync>;

/// Callback answering calls to members outside the hook contract.
///
/// Receives `this` (for instance members) followed by the arguments.
pub type StubFn = Arc<dyn Fn(&mut Heap, &[Value]) -> StubOutcome + Send + Sync>;

/// Which hook was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum HookKind {
    /// `IMethodInterceptor::OnEnter`.
    Enter,
    /// `IMethodInterceptor::OnExit`.
    Exit,
    /// `IMethodInterceptor::OnException`.
    Exception,
    /// `IParameterInterceptor::OnEnter`.
    Parameter,
}

/// One recorded hook call.
#[derive(Debug, Clone, PartialEq)]
pub struct HookInvocation {
    /// Type name of the interceptor instance.
    pub interceptor: String,
    /// Hook that was called.
    pub kind: HookKind,
    /// Unboxed arguments as the hook saw them; the parameter value for parameter hooks.
    pub arguments: Vec<Value>,
    /// Parameter position, for parameter hooks.
    pub parameter: Option<u16>,
    /// Exception type, for exception hooks.
    pub exception: Option<String>,
}

/// What a stub does with a call.
#[derive(Debug, Clone, PartialEq)]
pub enum StubOutcome {
    /// Returns normally, with a value for non-void members.
    Return(Option<Value>),
    /// Raises an exception of the given type.
    Throw(String),
}

/// Result of a call handled by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CallOutcome {
    Return(Option<Value>),
    Throw(ObjectRef),
}

/// The hooks one interceptor type implements.
#[derive(Clone, Default)]
pub struct InterceptorBehavior {
    on_enter: Option<MethodHookFn>,
    on_exit: Option<MethodHookFn>,
    on_exception: Option<MethodHookFn>,
    on_parameter: Option<ParameterHookFn>,
}

impl InterceptorBehavior {
    /// A behavior whose hooks do nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `OnEnter` callback.
    #[must_use]
    pub fn on_enter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut MethodHook<'_>) + Send + Sync + 'static,
    {
        self.on_enter = Some(Arc::new(hook));
        self
    }

    /// Sets the `OnExit` callback.
    #[must_use]
    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut MethodHook<'_>) + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    /// Sets the `OnException` callback.
    #[must_use]
    pub fn on_exception<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut MethodHook<'_>) + Send + Sync + 'static,
    {
        self.on_exception = Some(Arc::new(hook));
        self
    }

    /// Sets the parameter `OnEnter` callback.
    #[must_use]
    pub fn on_parameter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ParameterHook<'_>) + Send + Sync + 'static,
    {
        self.on_parameter = Some(Arc::new(hook));
        self
    }

    fn method_hook(&self, kind: HookKind) -> Option<&MethodHookFn> {
        match kind {
            HookKind::Enter => self.on_enter.as_ref(),
            HookKind::Exit => self.on_exit.as_ref(),
            HookKind::Exception => self.on_exception.as_ref(),
            HookKind::Parameter => None,
        }
    }
}

impl fmt::Debug for InterceptorBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorBehavior")
            .field("on_enter", &self.on_enter.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .field("on_exception", &self.on_exception.is_some())
            .field("on_parameter", &self.on_parameter.is_some())
            .finish()
    }
}

fn instance_property(heap: &Heap, instance: ObjectRef, name: &str) -> Option<Value> {
    match heap.get(instance) {
        Ok(HeapObject::Instance { properties, .. }) => {
            properties.get(name).map(|value| heap.unbox(value))
        }
        _ => None,
    }
}

fn instance_ctor_argument(heap: &Heap, instance: ObjectRef, index: usize) -> Option<Value> {
    match heap.get(instance) {
        Ok(HeapObject::Instance { ctor_args, .. }) => {
            ctor_args.get(index).map(|value| heap.unbox(value))
        }
        _ => None,
    }
}

fn heap_string(heap: &Heap, value: &Value) -> Option<String> {
    match value {
        Value::Object(reference) => heap.string(*reference).map(str::to_string),
        _ => None,
    }
}

/// View of a method hook call.
pub struct MethodHook<'h> {
    heap: &'h mut Heap,
    instance: ObjectRef,
    payload: ObjectRef,
    exception: Option<ObjectRef>,
    thrown: Option<ObjectRef>,
}

impl MethodHook<'_> {
    fn payload(&self) -> Option<&MethodArgsObject> {
        match self.heap.get(self.payload) {
            Ok(HeapObject::MethodArgs(payload)) => Some(payload),
            _ => None,
        }
    }

    fn payload_mut(&mut self) -> Option<&mut MethodArgsObject> {
        match self.heap.get_mut(self.payload) {
            Ok(HeapObject::MethodArgs(payload)) => Some(payload),
            _ => None,
        }
    }

    /// The intercepted method's arguments, unboxed.
    #[must_use]
    pub fn arguments(&self) -> Vec<Value> {
        let Some(Value::Object(array)) = self.payload().map(|p| p.arguments.clone()) else {
            return Vec::new();
        };
        self.heap
            .array(array)
            .map(|items| items.iter().map(|item| self.heap.unbox(item)).collect())
            .unwrap_or_default()
    }

    /// The current result, unboxed.
    #[must_use]
    pub fn result(&self) -> Value {
        self.payload()
            .map(|payload| self.heap.unbox(&payload.result))
            .unwrap_or_default()
    }

    /// Replaces the result.
    pub fn set_result(&mut self, value: Value) {
        let boxed = self.heap.box_value(value);
        if let Some(payload) = self.payload_mut() {
            payload.result = boxed;
        }
    }

    /// Cancels the remaining hooks; on enter the original body is skipped as well.
    pub fn cancel(&mut self) {
        if let Some(payload) = self.payload_mut() {
            payload.cancel = true;
        }
    }

    /// Returns `true` once a hook cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.payload().is_some_and(|payload| payload.cancel)
    }

    /// Type of the exception being handled, for `OnException`.
    #[must_use]
    pub fn exception_type(&self) -> Option<String> {
        self.exception
            .and_then(|exception| self.heap.type_name(exception).ok())
    }

    /// A property assigned to the interceptor instance, unboxed.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        instance_property(self.heap, self.instance, name)
    }

    /// A constructor argument of the interceptor instance, unboxed.
    #[must_use]
    pub fn constructor_argument(&self, index: usize) -> Option<Value> {
        instance_ctor_argument(self.heap, self.instance, index)
    }

    /// Contents of a string value.
    #[must_use]
    pub fn string(&self, value: &Value) -> Option<String> {
        heap_string(self.heap, value)
    }

    /// Makes the hook raise an exception of type `type_name`.
    pub fn throw(&mut self, type_name: &str, message: &str) {
        self.thrown = Some(self.heap.alloc_exception(type_name, message));
    }
}

/// View of a parameter hook call.
pub struct ParameterHook<'h> {
    heap: &'h mut Heap,
    instance: ObjectRef,
    payload: ObjectRef,
    thrown: Option<ObjectRef>,
}

impl ParameterHook<'_> {
    fn payload(&self) -> Option<&ParameterArgsObject> {
        match self.heap.get(self.payload) {
            Ok(HeapObject::ParameterArgs(payload)) => Some(payload),
            _ => None,
        }
    }

    fn payload_mut(&mut self) -> Option<&mut ParameterArgsObject> {
        match self.heap.get_mut(self.payload) {
            Ok(HeapObject::ParameterArgs(payload)) => Some(payload),
            _ => None,
        }
    }

    /// Position of the intercepted parameter.
    #[must_use]
    pub fn index(&self) -> Option<u16> {
        let Some(Value::Object(parameter)) = self.payload().map(|p| p.parameter.clone()) else {
            return None;
        };
        match self.heap.get(parameter) {
            Ok(HeapObject::ParameterInfo { position, .. }) => Some(*position),
            _ => None,
        }
    }

    /// The argument value, unboxed.
    #[must_use]
    pub fn value(&self) -> Value {
        self.payload()
            .map(|payload| self.heap.unbox(&payload.value))
            .unwrap_or_default()
    }

    /// Replaces the argument value.
    pub fn set_value(&mut self, value: Value) {
        let boxed = self.heap.box_value(value);
        if let Some(payload) = self.payload_mut() {
            payload.value = boxed;
        }
    }

    /// Sets the payload's cancel flag.
    pub fn cancel(&mut self) {
        if let Some(payload) = self.payload_mut() {
            payload.cancel = true;
        }
    }

    /// A property assigned to the interceptor instance, unboxed.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        instance_property(self.heap, self.instance, name)
    }

    /// Contents of a string value.
    #[must_use]
    pub fn string(&self, value: &Value) -> Option<String> {
        heap_string(self.heap, value)
    }

    /// Makes the hook raise an exception of type `type_name`.
    pub fn throw(&mut self, type_name: &str, message: &str) {
        self.thrown = Some(self.heap.alloc_exception(type_name, message));
    }
}

/// Implements the hook contract for the interpreter.
#[derive(Default)]
pub struct HostRuntime {
    behaviors: HashMap<String, InterceptorBehavior>,
    stubs: HashMap<(String, String), StubFn>,
    invocations: Vec<HookInvocation>,
}

impl HostRuntime {
    /// A runtime without interceptor behaviors or stubs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the hooks of interceptor type `type_name`.
    #[must_use]
    pub fn with_interceptor(mut self, type_name: &str, behavior: InterceptorBehavior) -> Self {
        self.register_interceptor(type_name, behavior);
        self
    }

    /// Registers the hooks of interceptor type `type_name`, replacing earlier ones.
    pub fn register_interceptor(&mut self, type_name: &str, behavior: InterceptorBehavior) {
        self.behaviors.insert(type_name.to_string(), behavior);
    }

    /// Answers calls to `declaring_type::name` with `stub`.
    #[must_use]
    pub fn with_stub<F>(mut self, declaring_type: &str, name: &str, stub: F) -> Self
    where
        F: Fn(&mut Heap, &[Value]) -> StubOutcome + Send + Sync + 'static,
    {
        self.stubs.insert(
            (declaring_type.to_string(), name.to_string()),
            Arc::new(stub),
        );
        self
    }

    /// Hook calls in the order they happened.
    #[must_use]
    pub fn invocations(&self) -> &[HookInvocation] {
        &self.invocations
    }

    /// Hook calls of one kind.
    pub fn invocations_of(&self, kind: HookKind) -> impl Iterator<Item = &HookInvocation> + '_ {
        self.invocations.iter().filter(move |i| i.kind == kind)
    }

    /// Forgets recorded hook calls.
    pub fn clear_invocations(&mut self) {
        self.invocations.clear();
    }

    pub(crate) fn call(
        &mut self,
        heap: &mut Heap,
        member: &MemberRef,
        this: Option<Value>,
        args: Vec<Value>,
        construct: bool,
    ) -> Result<CallOutcome, EmulationError> {
        if construct {
            return self.construct(heap, member, args);
        }
        let Some(this) = this else {
            return self.call_static(heap, member, &args);
        };
        let Some(receiver) = this.as_object("callvirt")? else {
            let message = format!("{} called on a null reference", member.name);
            return Ok(CallOutcome::Throw(
                heap.alloc_exception("System.NullReferenceException", &message),
            ));
        };

        match (member.declaring_type.as_str(), member.name.as_str()) {
            (METHOD_INTERCEPTOR_TYPE, "OnEnter") => {
                return self.method_hook(heap, HookKind::Enter, receiver, &args)
            }
            (METHOD_INTERCEPTOR_TYPE, "OnExit") => {
                return self.method_hook(heap, HookKind::Exit, receiver, &args)
            }
            (METHOD_INTERCEPTOR_TYPE, "OnException") => {
                return self.method_hook(heap, HookKind::Exception, receiver, &args)
            }
            (PARAMETER_INTERCEPTOR_TYPE, "OnEnter") => {
                return self.parameter_hook(heap, receiver, &args)
            }
            _ => {}
        }

        let mut slots = Vec::with_capacity(args.len() + 1);
        slots.push(this);
        slots.extend(args.iter().cloned());
        if let Some(outcome) = self.stub(heap, member, &slots) {
            return Ok(outcome);
        }

        if let HeapObject::MethodInfo(method) = heap.get(receiver)? {
            if member.name == "GetParameters" {
                let method = method.clone();
                return Ok(CallOutcome::Return(Some(Self::parameters(heap, &method))));
            }
        }

        let value = args.into_iter().next();
        let result = match (heap.get_mut(receiver)?, member.name.as_str()) {
            (HeapObject::MethodArgs(payload), "get_Cancel") => Some(Value::from(payload.cancel)),
            (HeapObject::MethodArgs(payload), "get_Return") => Some(payload.result.clone()),
            (HeapObject::MethodArgs(payload), "set_Return") => {
                payload.result = value.unwrap_or_default();
                None
            }
            (HeapObject::ParameterArgs(payload), "get_Cancel") => {
                Some(Value::from(payload.cancel))
            }
            (HeapObject::ParameterArgs(payload), "get_Value") => Some(payload.value.clone()),
            (HeapObject::Instance { properties, .. }, name) => {
                if let (Some(property), Some(value)) = (name.strip_prefix("set_"), value) {
                    properties.insert(property.to_string(), value);
                    None
                } else if let Some(property) = name.strip_prefix("get_") {
                    Some(properties.get(property).cloned().unwrap_or_default())
                } else {
                    return Err(Self::unresolved(member));
                }
            }
            _ => return Err(Self::unresolved(member)),
        };
        Ok(CallOutcome::Return(result))
    }

    fn call_static(
        &mut self,
        heap: &mut Heap,
        member: &MemberRef,
        args: &[Value],
    ) -> Result<CallOutcome, EmulationError> {
        let object = match (member.declaring_type.as_str(), member.name.as_str(), args) {
            (METHOD_BASE_TYPE, "GetMethodFromHandle", [Value::MethodHandle(method)]) => {
                HeapObject::MethodInfo(method.clone())
            }
            (SYSTEM_TYPE, "GetTypeFromHandle", [Value::TypeHandle(sig)]) => {
                HeapObject::Type(sig.clone())
            }
            _ => {
                return self
                    .stub(heap, member, args)
                    .ok_or_else(|| Self::unresolved(member))
            }
        };
        Ok(CallOutcome::Return(Some(Value::Object(heap.alloc(object)))))
    }

    fn construct(
        &mut self,
        heap: &mut Heap,
        member: &MemberRef,
        args: Vec<Value>,
    ) -> Result<CallOutcome, EmulationError> {
        let object = match member.declaring_type.as_str() {
            METHOD_ARGS_TYPE => {
                let mut args = args.into_iter();
                HeapObject::MethodArgs(MethodArgsObject {
                    instance: args.next().unwrap_or_default(),
                    arguments: args.next().unwrap_or_default(),
                    result: args.next().unwrap_or_default(),
                    method: args.next().unwrap_or_default(),
                    cancel: false,
                })
            }
            PARAMETER_ARGS_TYPE => {
                let mut args = args.into_iter();
                HeapObject::ParameterArgs(ParameterArgsObject {
                    instance: args.next().unwrap_or_default(),
                    parameter: args.next().unwrap_or_default(),
                    value: args.next().unwrap_or_default(),
                    cancel: false,
                })
            }
            type_name => {
                if let Some(outcome) = self.stub(heap, member, &args) {
                    return Ok(outcome);
                }
                HeapObject::Instance {
                    type_name: type_name.to_string(),
                    ctor_args: args,
                    properties: BTreeMap::new(),
                }
            }
        };
        Ok(CallOutcome::Return(Some(Value::Object(heap.alloc(object)))))
    }

    fn parameters(heap: &mut Heap, method: &MemberRef) -> Value {
        let items = (0..method.params.len())
            .filter_map(|position| u16::try_from(position).ok())
            .map(|position| {
                Value::Object(heap.alloc(HeapObject::ParameterInfo {
                    method: method.clone(),
                    position,
                }))
            })
            .collect();
        Value::Object(heap.alloc(HeapObject::Array {
            element: crate::metadata::TypeSig::class(crate::weaver::PARAMETER_INFO_TYPE),
            items,
        }))
    }

    fn stub(&self, heap: &mut Heap, member: &MemberRef, args: &[Value]) -> Option<CallOutcome> {
        let stub = self
            .stubs
            .get(&(member.declaring_type.clone(), member.name.clone()))?;
        Some(match stub(heap, args) {
            StubOutcome::Return(value) => CallOutcome::Return(value),
            StubOutcome::Throw(type_name) => {
                CallOutcome::Throw(heap.alloc_exception(&type_name, &member.name))
            }
        })
    }

    fn unresolved(member: &MemberRef) -> EmulationError {
        EmulationError::UnresolvedCall {
            member: format!("{}::{}", member.declaring_type, member.name),
        }
    }

    fn hook_payload(args: &[Value]) -> Result<ObjectRef, EmulationError> {
        match args.first() {
            Some(Value::Object(payload)) => Ok(*payload),
            other => Err(EmulationError::TypeMismatch {
                operation: "hook call",
                expected: "payload object",
                found: other.map_or("nothing", Value::kind),
            }),
        }
    }

    fn method_hook(
        &mut self,
        heap: &mut Heap,
        kind: HookKind,
        instance: ObjectRef,
        args: &[Value],
    ) -> Result<CallOutcome, EmulationError> {
        let payload = Self::hook_payload(args)?;
        let exception = match args.get(1) {
            Some(value) => value.as_object("OnException")?,
            None => None,
        };
        let interceptor = heap.type_name(instance)?;
        let callback = self
            .behaviors
            .get(&interceptor)
            .and_then(|behavior| behavior.method_hook(kind))
            .cloned();

        let mut hook = MethodHook {
            heap,
            instance,
            payload,
            exception,
            thrown: None,
        };
        let arguments = hook.arguments();
        let exception_type = hook.exception_type();
        if let Some(callback) = callback {
            callback(&mut hook);
        }
        let thrown = hook.thrown;

        log::trace!("{} {} hook called with {:?}", interceptor, kind, arguments);
        self.invocations.push(HookInvocation {
            interceptor,
            kind,
            arguments,
            parameter: None,
            exception: exception_type,
        });
        Ok(match thrown {
            Some(exception) => CallOutcome::Throw(exception),
            None => CallOutcome::Return(None),
        })
    }

    fn parameter_hook(
        &mut self,
        heap: &mut Heap,
        instance: ObjectRef,
        args: &[Value],
    ) -> Result<CallOutcome, EmulationError> {
        let payload = Self::hook_payload(args)?;
        let interceptor = heap.type_name(instance)?;
        let callback = self
            .behaviors
            .get(&interceptor)
            .and_then(|behavior| behavior.on_parameter.clone());

        let mut hook = ParameterHook {
            heap,
            instance,
            payload,
            thrown: None,
        };
        let value = hook.value();
        let parameter = hook.index();
        if let Some(callback) = callback {
            callback(&mut hook);
        }
        let thrown = hook.thrown;

        log::trace!("{} parameter hook called with {}", interceptor, value);
        self.invocations.push(HookInvocation {
            interceptor,
            kind: HookKind::Parameter,
            arguments: vec![value],
            parameter,
            exception: None,
        });
        Ok(match thrown {
            Some(exception) => CallOutcome::Throw(exception),
            None => CallOutcome::Return(None),
        })
    }
}

impl fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut interceptors: Vec<&String> = self.behaviors.keys().collect();
        interceptors.sort();
        f.debug_struct("HostRuntime")
            .field("interceptors", &interceptors)
            .field("stubs", &self.stubs.len())
            .field("invocations", &self.invocations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::TypeSig, weaver::contract_members};

    fn member(declaring_type: &str, name: &str) -> MemberRef {
        contract_members()
            .into_iter()
            .find(|m| m.declaring_type == declaring_type && m.name == name)
            .unwrap_or_else(|| MemberRef::method(declaring_type, name, vec![], TypeSig::Void, true))
    }

    fn returned(outcome: CallOutcome) -> Option<Value> {
        match outcome {
            CallOutcome::Return(value) => value,
            CallOutcome::Throw(exception) => panic!("unexpected exception {exception}"),
        }
    }

    #[test]
    fn test_method_hook_sees_payload() -> Result<(), EmulationError> {
        let mut runtime = HostRuntime::new().with_interceptor(
            "Demo.TraceAttribute",
            InterceptorBehavior::new().on_enter(|hook| {
                let level = hook.property("Level");
                if level == Some(Value::I4(2)) {
                    hook.set_result(Value::I4(42));
                    hook.cancel();
                }
            }),
        );
        let mut heap = Heap::new();

        let ctor = MemberRef::constructor("Demo.TraceAttribute", vec![]);
        let instance = returned(runtime.call(&mut heap, &ctor, None, vec![], true)?)
            .unwrap_or_default();
        let setter = MemberRef::method(
            "Demo.TraceAttribute",
            "set_Level",
            vec![TypeSig::I4],
            TypeSig::Void,
            true,
        );
        runtime.call(&mut heap, &setter, Some(instance.clone()), vec![Value::I4(2)], false)?;

        let boxed = heap.box_value(Value::I4(3));
        let arguments = Value::Object(heap.alloc(HeapObject::Array {
            element: TypeSig::Object,
            items: vec![boxed],
        }));
        let payload = returned(runtime.call(
            &mut heap,
            &member(METHOD_ARGS_TYPE, ".ctor"),
            None,
            vec![Value::Null, arguments, Value::Null, Value::Null],
            true,
        )?)
        .unwrap_or_default();

        let on_enter = member(METHOD_INTERCEPTOR_TYPE, "OnEnter");
        runtime.call(&mut heap, &on_enter, Some(instance), vec![payload.clone()], false)?;

        let cancel = member(METHOD_ARGS_TYPE, "get_Cancel");
        let cancelled = returned(runtime.call(&mut heap, &cancel, Some(payload.clone()), vec![], false)?);
        assert_eq!(cancelled, Some(Value::I4(1)));

        let result = member(METHOD_ARGS_TYPE, "get_Return");
        let result = returned(runtime.call(&mut heap, &result, Some(payload), vec![], false)?)
            .unwrap_or_default();
        assert_eq!(heap.unbox(&result), Value::I4(42));

        let invocation = &runtime.invocations()[0];
        assert_eq!(invocation.interceptor, "Demo.TraceAttribute");
        assert_eq!(invocation.kind, HookKind::Enter);
        assert_eq!(invocation.arguments, vec![Value::I4(3)]);
        Ok(())
    }

    #[test]
    fn test_reflection_lookups() -> Result<(), EmulationError> {
        let mut runtime = HostRuntime::new();
        let mut heap = Heap::new();
        let compute = MemberRef::method(
            "Demo.Calculator",
            "Compute",
            vec![TypeSig::I4, TypeSig::I4],
            TypeSig::I4,
            true,
        );

        let lookup = member(METHOD_BASE_TYPE, "GetMethodFromHandle");
        let method = returned(runtime.call(
            &mut heap,
            &lookup,
            None,
            vec![Value::MethodHandle(compute)],
            false,
        )?)
        .unwrap_or_default();

        let get_parameters = member(METHOD_BASE_TYPE, "GetParameters");
        let parameters =
            returned(runtime.call(&mut heap, &get_parameters, Some(method), vec![], false)?);
        let Some(Value::Object(array)) = parameters else {
            panic!("GetParameters returned {parameters:?}");
        };
        assert_eq!(heap.array(array)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_null_receiver_and_unknown_members() -> Result<(), EmulationError> {
        let mut runtime = HostRuntime::new().with_stub("Demo.Log", "Write", |_, args| {
            StubOutcome::Return(args.first().cloned())
        });
        let mut heap = Heap::new();

        let on_exit = member(METHOD_INTERCEPTOR_TYPE, "OnExit");
        let outcome = runtime.call(&mut heap, &on_exit, Some(Value::Null), vec![], false)?;
        let CallOutcome::Throw(exception) = outcome else {
            panic!("expected a null reference exception");
        };
        assert_eq!(heap.type_name(exception)?, "System.NullReferenceException");

        let write = MemberRef::method("Demo.Log", "Write", vec![TypeSig::I4], TypeSig::I4, false);
        let echoed = returned(runtime.call(&mut heap, &write, None, vec![Value::I4(9)], false)?);
        assert_eq!(echoed, Some(Value::I4(9)));

        let unknown = MemberRef::method("Demo.Log", "Flush", vec![], TypeSig::Void, false);
        assert!(matches!(
            runtime.call(&mut heap, &unknown, None, vec![], false),
            Err(EmulationError::UnresolvedCall { .. })
        ));
        Ok(())
    }
}
