//! The CIL interpreter.
//!
//! [`Interpreter`] executes method bodies of a [`ModuleDef`] instruction by instruction.
//! Calls to methods the module defines run in nested frames; every other call goes to the
//! [`HostRuntime`]. Exception regions are honored the way the runtime does it: a `leave`
//! runs the finally handlers it crosses, a thrown exception walks the regions of each frame
//! innermost first, running finally handlers on the way until a matching catch handler is
//! found.
//!
//! Faults of the emulated code (division by zero, null dereference, failed unboxing, index
//! out of range) are raised as managed exceptions. Inconsistent bodies and exhausted limits
//! end the run with an [`EmulationError`].

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
};

use crate::{
    assembly::{Immediate, InstrId, Instruction, MethodBody, Opcode, Operand, RegionKind},
    emulation::{
        heap::HeapObject,
        runtime::{CallOutcome, HostRuntime},
        EmulationError, Heap, Location, ObjectRef, Value,
    },
    metadata::{MemberRef, MethodDef, ModuleDef, Token, TypeSig},
    Result,
};

/// Bounds on a single [`Interpreter::invoke`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulationLimits {
    /// Instructions executed before the run is aborted.
    pub max_instructions: u64,
    /// Nested frames before the run is aborted.
    pub max_call_depth: usize,
}

impl Default for EmulationLimits {
    fn default() -> Self {
        EmulationLimits {
            max_instructions: 1_000_000,
            max_call_depth: 64,
        }
    }
}

/// How an invoked method finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Returned normally, with a value unless the method is `void`.
    Returned(Option<Value>),
    /// An exception left the method.
    Threw(ObjectRef),
}

impl Completion {
    /// The returned value, `None` for `void` methods and exceptions.
    #[must_use]
    pub fn returned(&self) -> Option<&Value> {
        match self {
            Completion::Returned(value) => value.as_ref(),
            Completion::Threw(_) => None,
        }
    }

    /// Returns `true` if an exception left the method.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        matches!(self, Completion::Threw(_))
    }
}

/// A `[start, end)` range of positions in a frame's instruction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn contains(self, position: usize) -> bool {
        self.start <= position && position < self.end
    }
}

#[derive(Debug, Clone)]
struct RegionSpan {
    catch: Option<TypeSig>,
    protected: Span,
    handler: Span,
}

/// Work left over when a finally handler reaches `endfinally`.
#[derive(Debug, Clone)]
enum Continuation {
    /// A `leave` crossing finally handlers; `pending` are the handlers still to run.
    Leave {
        target: usize,
        pending: Vec<Span>,
        handler: Span,
    },
    /// An exception unwinding the frame; dispatch resumes at region `next`.
    Unwind {
        exception: ObjectRef,
        origin: usize,
        next: usize,
        handler: Span,
    },
}

impl Continuation {
    fn handler(&self) -> Span {
        match self {
            Continuation::Leave { handler, .. } | Continuation::Unwind { handler, .. } => {
                *handler
            }
        }
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(Option<Value>),
    Throw(ObjectRef),
    Unhandled(ObjectRef),
}

struct Frame<'m> {
    method: &'m MethodDef,
    code: Vec<&'m Instruction>,
    positions: HashMap<InstrId, usize>,
    regions: Vec<RegionSpan>,
    pc: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
    args: Vec<Value>,
    continuations: Vec<Continuation>,
    caught: Vec<(ObjectRef, Span)>,
}

impl<'m> Frame<'m> {
    fn new(method: &'m MethodDef, args: Vec<Value>) -> std::result::Result<Self, EmulationError> {
        let body: &'m MethodBody =
            method
                .body
                .as_ref()
                .ok_or_else(|| EmulationError::MissingBody {
                    method: method.full_name(),
                })?;

        let expected = method.params.len() + usize::from(method.has_this());
        if args.len() != expected {
            return Err(EmulationError::ArgumentCount {
                method: method.full_name(),
                expected,
                found: args.len(),
            });
        }

        let code: Vec<&'m Instruction> = body.iter().map(|(_, instruction)| instruction).collect();
        let positions: HashMap<InstrId, usize> = body
            .iter()
            .enumerate()
            .map(|(position, (id, _))| (id, position))
            .collect();

        let span = |start: InstrId, end: InstrId| -> std::result::Result<Span, EmulationError> {
            match (positions.get(&start), positions.get(&end)) {
                (Some(&start), Some(&end)) => Ok(Span { start, end }),
                _ => Err(EmulationError::InvalidBranchTarget {
                    target: format!("region bound {start:?}..{end:?}"),
                }),
            }
        };
        let regions = body
            .regions()
            .iter()
            .map(|region| {
                Ok(RegionSpan {
                    catch: match &region.kind {
                        RegionKind::Catch(sig) => Some(sig.clone()),
                        RegionKind::Finally => None,
                    },
                    protected: span(region.try_start, region.try_end)?,
                    handler: span(region.handler_start, region.handler_end)?,
                })
            })
            .collect::<std::result::Result<Vec<_>, EmulationError>>()?;

        Ok(Frame {
            method,
            code,
            positions,
            regions,
            pc: 0,
            stack: Vec::new(),
            locals: body.locals().iter().map(Value::default_for).collect(),
            args,
            continuations: Vec::new(),
            caught: Vec::new(),
        })
    }

    fn target(&self, id: InstrId) -> std::result::Result<usize, EmulationError> {
        self.positions
            .get(&id)
            .copied()
            .ok_or_else(|| EmulationError::InvalidBranchTarget {
                target: format!("{id:?}"),
            })
    }
}

macro_rules! integer_op {
    ($opcode:expr, $x:expr, $y:expr, $wrap:path) => {
        match $opcode {
            Opcode::Add => Some($wrap($x.wrapping_add($y))),
            Opcode::Sub => Some($wrap($x.wrapping_sub($y))),
            Opcode::Mul => Some($wrap($x.wrapping_mul($y))),
            Opcode::Div if $y == 0 => None,
            Opcode::Div => Some($wrap($x.wrapping_div($y))),
            Opcode::Rem if $y == 0 => None,
            Opcode::Rem => Some($wrap($x.wrapping_rem($y))),
            Opcode::And => Some($wrap($x & $y)),
            Opcode::Or => Some($wrap($x | $y)),
            Opcode::Xor => Some($wrap($x ^ $y)),
            _ => None,
        }
    };
}

/// Binary arithmetic; `Ok(None)` means integer division by zero.
fn arithmetic(
    opcode: Opcode,
    a: &Value,
    b: &Value,
) -> std::result::Result<Option<Value>, EmulationError> {
    let mismatch = |found: &Value| EmulationError::TypeMismatch {
        operation: opcode.mnemonic(),
        expected: "matching numeric operands",
        found: found.kind(),
    };
    match (a, b) {
        (Value::I4(x), Value::I4(y)) => Ok(integer_op!(opcode, *x, *y, Value::I4)),
        (Value::I8(x), Value::I8(y)) => Ok(integer_op!(opcode, *x, *y, Value::I8)),
        (Value::I8(x), Value::I4(y)) => Ok(integer_op!(opcode, *x, i64::from(*y), Value::I8)),
        (Value::I4(x), Value::I8(y)) => Ok(integer_op!(opcode, i64::from(*x), *y, Value::I8)),
        (Value::R8(x), Value::R8(y)) => match opcode {
            Opcode::Add => Ok(Some(Value::R8(x + y))),
            Opcode::Sub => Ok(Some(Value::R8(x - y))),
            Opcode::Mul => Ok(Some(Value::R8(x * y))),
            Opcode::Div => Ok(Some(Value::R8(x / y))),
            Opcode::Rem => Ok(Some(Value::R8(x % y))),
            _ => Err(mismatch(a)),
        },
        (Value::I4(_) | Value::I8(_) | Value::R8(_), other) => Err(mismatch(other)),
        (other, _) => Err(mismatch(other)),
    }
}

/// Orders two stack values; `None` for unordered or unequal references.
fn compare(a: &Value, b: &Value) -> std::result::Result<Option<Ordering>, EmulationError> {
    Ok(match (a, b) {
        (Value::I4(x), Value::I4(y)) => Some(x.cmp(y)),
        (Value::I8(x), Value::I8(y)) => Some(x.cmp(y)),
        (Value::I8(x), Value::I4(y)) => Some(x.cmp(&i64::from(*y))),
        (Value::I4(x), Value::I8(y)) => Some(i64::from(*x).cmp(y)),
        (Value::R8(x), Value::R8(y)) => x.partial_cmp(y),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Object(x), Value::Object(y)) => (x == y).then_some(Ordering::Equal),
        (Value::Null, Value::Object(_)) | (Value::Object(_), Value::Null) => None,
        (other, _) => {
            return Err(EmulationError::TypeMismatch {
                operation: "compare",
                expected: "comparable operands",
                found: other.kind(),
            })
        }
    })
}

/// Returns `true` if a catch clause for `catch` handles an exception of type `thrown`.
fn catches(catch: &TypeSig, thrown: &str) -> bool {
    match catch {
        TypeSig::Object => true,
        other => {
            let name = other.full_name();
            name == "System.Exception" || name == thrown
        }
    }
}

/// Executes method bodies of one module.
pub struct Interpreter<'m, 'r> {
    module: &'m ModuleDef,
    runtime: &'r mut HostRuntime,
    heap: Heap,
    limits: EmulationLimits,
    frames: Vec<Frame<'m>>,
    executed: u64,
}

impl<'m, 'r> Interpreter<'m, 'r> {
    /// Creates an interpreter with default limits.
    pub fn new(module: &'m ModuleDef, runtime: &'r mut HostRuntime) -> Self {
        Self::with_limits(module, runtime, EmulationLimits::default())
    }

    /// Creates an interpreter with custom limits.
    pub fn with_limits(
        module: &'m ModuleDef,
        runtime: &'r mut HostRuntime,
        limits: EmulationLimits,
    ) -> Self {
        Interpreter {
            module,
            runtime,
            heap: Heap::new(),
            limits,
            frames: Vec::new(),
            executed: 0,
        }
    }

    /// The managed heap.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The managed heap, for preparing arguments.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The host runtime.
    #[must_use]
    pub fn runtime(&self) -> &HostRuntime {
        self.runtime
    }

    /// Instructions executed so far, over all invocations.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Type name of the exception a run ended with.
    #[must_use]
    pub fn exception_type(&self, completion: &Completion) -> Option<String> {
        match completion {
            Completion::Threw(exception) => self.heap.type_name(*exception).ok(),
            Completion::Returned(_) => None,
        }
    }

    /// Runs the method `token`.
    ///
    /// `args` fills the argument slots, `this` first for instance methods. The instruction
    /// limit applies to each invocation separately.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the module does not define `token`, and
    /// [`crate::Error::Emulation`] if the body cannot be executed to completion
    pub fn invoke(&mut self, token: Token, args: Vec<Value>) -> Result<Completion> {
        let module = self.module;
        let method = module
            .method(token)
            .ok_or_else(|| malformed_error!("Method {} is not defined by the module", token))?;

        log::debug!("Invoking {}", method.full_name());
        self.frames.clear();
        let budget = self.executed.saturating_add(self.limits.max_instructions);
        Ok(self.execute(method, args, budget)?)
    }

    fn execute(
        &mut self,
        method: &'m MethodDef,
        args: Vec<Value>,
        budget: u64,
    ) -> std::result::Result<Completion, EmulationError> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(EmulationError::CallDepthExceeded {
                limit: self.limits.max_call_depth,
            });
        }
        self.frames.push(Frame::new(method, args)?);
        let completion = self.run(budget);
        self.frames.pop();
        completion
    }

    fn frame(&self) -> std::result::Result<&Frame<'m>, EmulationError> {
        self.frames.last().ok_or(EmulationError::NoActiveFrame)
    }

    fn frame_mut(&mut self) -> std::result::Result<&mut Frame<'m>, EmulationError> {
        self.frames.last_mut().ok_or(EmulationError::NoActiveFrame)
    }

    fn run(&mut self, budget: u64) -> std::result::Result<Completion, EmulationError> {
        loop {
            let (instruction, pc) = {
                let frame = self.frame()?;
                let instruction = frame
                    .code
                    .get(frame.pc)
                    .copied()
                    .ok_or(EmulationError::FellOffEnd)?;
                (instruction, frame.pc)
            };

            self.executed += 1;
            if self.executed > budget {
                return Err(EmulationError::InstructionLimit {
                    limit: self.limits.max_instructions,
                });
            }
            log::trace!(
                "[{}] IL_{:04}: {}",
                self.frames.len() - 1,
                pc,
                instruction
            );

            match self.step(instruction, pc, budget)? {
                Flow::Next => self.frame_mut()?.pc = pc + 1,
                Flow::Jump(target) => self.frame_mut()?.pc = target,
                Flow::Return(value) => return Ok(Completion::Returned(value)),
                Flow::Throw(exception) => match self.dispatch(exception, pc, 0)? {
                    Some(handler) => self.frame_mut()?.pc = handler,
                    None => return self.unhandled(exception),
                },
                Flow::Unhandled(exception) => return self.unhandled(exception),
            }
        }
    }

    fn unhandled(&self, exception: ObjectRef) -> std::result::Result<Completion, EmulationError> {
        log::debug!(
            "{} left {}",
            self.heap.type_name(exception)?,
            self.frame()?.method.full_name()
        );
        Ok(Completion::Threw(exception))
    }

    /// Looks for a handler of `exception` thrown at `origin`, starting at region `from`.
    ///
    /// Returns the position to continue at, `None` if the exception leaves the frame.
    fn dispatch(
        &mut self,
        exception: ObjectRef,
        origin: usize,
        from: usize,
    ) -> std::result::Result<Option<usize>, EmulationError> {
        let thrown = self.heap.type_name(exception)?;
        let frame = self.frame_mut()?;
        frame
            .continuations
            .retain(|continuation| !continuation.handler().contains(origin));
        frame.caught.retain(|(_, span)| !span.contains(origin));

        for (index, region) in frame.regions.iter().enumerate().skip(from) {
            if !region.protected.contains(origin) {
                continue;
            }
            match &region.catch {
                Some(catch) if catches(catch, &thrown) => {
                    frame.stack.clear();
                    frame.stack.push(Value::Object(exception));
                    frame.caught.push((exception, region.handler));
                    return Ok(Some(region.handler.start));
                }
                Some(_) => {}
                None => {
                    frame.stack.clear();
                    frame.continuations.push(Continuation::Unwind {
                        exception,
                        origin,
                        next: index + 1,
                        handler: region.handler,
                    });
                    return Ok(Some(region.handler.start));
                }
            }
        }
        Ok(None)
    }

    fn pop(&mut self) -> std::result::Result<Value, EmulationError> {
        self.frame_mut()?
            .stack
            .pop()
            .ok_or(EmulationError::StackUnderflow)
    }

    fn pop_n(&mut self, count: usize) -> std::result::Result<Vec<Value>, EmulationError> {
        let stack = &mut self.frame_mut()?.stack;
        if stack.len() < count {
            return Err(EmulationError::StackUnderflow);
        }
        Ok(stack.split_off(stack.len() - count))
    }

    fn push(&mut self, value: Value) -> std::result::Result<Flow, EmulationError> {
        self.frame_mut()?.stack.push(value);
        Ok(Flow::Next)
    }

    fn fault(&mut self, type_name: &str, message: &str) -> Flow {
        Flow::Throw(self.heap.alloc_exception(type_name, message))
    }

    fn local_slot(&mut self, index: u16) -> std::result::Result<&mut Value, EmulationError> {
        let locals = &mut self.frame_mut()?.locals;
        let count = locals.len();
        locals
            .get_mut(usize::from(index))
            .ok_or(EmulationError::InvalidLocal { index, count })
    }

    fn argument_slot(&mut self, index: u16) -> std::result::Result<&mut Value, EmulationError> {
        let args = &mut self.frame_mut()?.args;
        let count = args.len();
        args.get_mut(usize::from(index))
            .ok_or(EmulationError::InvalidArgument { index, count })
    }

    fn location(&mut self, location: Location) -> std::result::Result<&mut Value, EmulationError> {
        let invalid = |depth: usize| EmulationError::InvalidPointer {
            reason: format!("frame {depth} is not executing"),
        };
        match location {
            Location::Local { depth, index } => {
                let locals = &mut self.frames.get_mut(depth).ok_or_else(|| invalid(depth))?.locals;
                let count = locals.len();
                locals
                    .get_mut(usize::from(index))
                    .ok_or(EmulationError::InvalidLocal { index, count })
            }
            Location::Argument { depth, index } => {
                let args = &mut self.frames.get_mut(depth).ok_or_else(|| invalid(depth))?.args;
                let count = args.len();
                args.get_mut(usize::from(index))
                    .ok_or(EmulationError::InvalidArgument { index, count })
            }
            Location::Boxed(reference) => match self.heap.get_mut(reference)? {
                HeapObject::Boxed { value, .. } => Ok(value),
                other => Err(EmulationError::TypeMismatch {
                    operation: "indirect access",
                    expected: "boxed value",
                    found: other.kind(),
                }),
            },
        }
    }

    fn pointer(value: &Value) -> std::result::Result<Location, EmulationError> {
        match value {
            Value::Pointer(location) => Ok(*location),
            other => Err(EmulationError::TypeMismatch {
                operation: "indirect access",
                expected: "pointer",
                found: other.kind(),
            }),
        }
    }

    fn resolve(&self, member: &MemberRef) -> Option<&'m MethodDef> {
        let module = self.module;
        module.methods.iter().find(|method| {
            method.has_body()
                && method.declaring_type == member.declaring_type
                && method.name == member.name
                && method.params.len() == member.params.len()
                && method
                    .params
                    .iter()
                    .zip(&member.params)
                    .all(|(param, sig)| &param.sig == sig)
        })
    }

    fn call(
        &mut self,
        member: &MemberRef,
        construct: bool,
        budget: u64,
    ) -> std::result::Result<Flow, EmulationError> {
        let args = self.pop_n(member.params.len())?;

        if construct {
            if let Some(ctor) = self.resolve(member) {
                let object = Value::Object(self.heap.alloc(HeapObject::Instance {
                    type_name: member.declaring_type.clone(),
                    ctor_args: args.clone(),
                    properties: BTreeMap::new(),
                }));
                let mut slots = vec![object.clone()];
                slots.extend(args);
                return match self.execute(ctor, slots, budget)? {
                    Completion::Returned(_) => self.push(object),
                    Completion::Threw(exception) => Ok(Flow::Throw(exception)),
                };
            }
            return match self.runtime.call(&mut self.heap, member, None, args, true)? {
                CallOutcome::Return(value) => self.push(value.unwrap_or_default()),
                CallOutcome::Throw(exception) => Ok(Flow::Throw(exception)),
            };
        }

        let this = if member.has_this {
            Some(self.pop()?)
        } else {
            None
        };
        let returns_value = !member.returns.is_void();

        if let Some(method) = self.resolve(member) {
            if this == Some(Value::Null) {
                let message = format!("{} called on a null reference", member.name);
                return Ok(self.fault("System.NullReferenceException", &message));
            }
            let mut slots: Vec<Value> = this.into_iter().collect();
            slots.extend(args);
            return match self.execute(method, slots, budget)? {
                Completion::Returned(value) if returns_value => {
                    self.push(value.unwrap_or_default())
                }
                Completion::Returned(_) => Ok(Flow::Next),
                Completion::Threw(exception) => Ok(Flow::Throw(exception)),
            };
        }

        match self.runtime.call(&mut self.heap, member, this, args, false)? {
            CallOutcome::Return(value) if returns_value => self.push(value.unwrap_or_default()),
            CallOutcome::Return(_) => Ok(Flow::Next),
            CallOutcome::Throw(exception) => Ok(Flow::Throw(exception)),
        }
    }

    fn unbox_any(&mut self, sig: &TypeSig) -> std::result::Result<Flow, EmulationError> {
        let value = self.pop()?;
        if sig.is_generic_param() {
            let value = self.heap.unbox(&value);
            return self.push(value);
        }
        if !sig.is_value_type() {
            return self.push(value);
        }

        let unboxed = match &value {
            Value::Null => {
                let message = format!("unbox.any {} of a null reference", sig.full_name());
                return Ok(self.fault("System.NullReferenceException", &message));
            }
            Value::Object(reference) => match self.heap.get(*reference)? {
                HeapObject::Boxed { value, .. } => value.clone(),
                other => {
                    let message =
                        format!("{} cannot be unboxed as {}", other.type_name(), sig.full_name());
                    return Ok(self.fault("System.InvalidCastException", &message));
                }
            },
            other => other.clone(),
        };
        self.push(unboxed)
    }

    fn branch(&self, instruction: &Instruction) -> std::result::Result<usize, EmulationError> {
        match &instruction.operand {
            Operand::Target(id) => self.frame()?.target(*id),
            _ => Err(EmulationError::InvalidBranchTarget {
                target: format!("{instruction}"),
            }),
        }
    }

    fn leave(&mut self, target: usize, pc: usize) -> std::result::Result<Flow, EmulationError> {
        let frame = self.frame_mut()?;
        frame.stack.clear();
        frame
            .caught
            .retain(|(_, span)| !span.contains(pc) || span.contains(target));

        let mut pending: Vec<Span> = frame
            .regions
            .iter()
            .filter(|region| {
                region.catch.is_none()
                    && region.protected.contains(pc)
                    && !region.protected.contains(target)
            })
            .map(|region| region.handler)
            .collect();
        if pending.is_empty() {
            return Ok(Flow::Jump(target));
        }
        let handler = pending.remove(0);
        frame.continuations.push(Continuation::Leave {
            target,
            pending,
            handler,
        });
        Ok(Flow::Jump(handler.start))
    }

    fn endfinally(&mut self) -> std::result::Result<Flow, EmulationError> {
        let frame = self.frame_mut()?;
        frame.stack.clear();
        match frame.continuations.pop() {
            None => Err(EmulationError::UnbalancedEndfinally),
            Some(Continuation::Leave {
                target,
                mut pending,
                ..
            }) => {
                if pending.is_empty() {
                    return Ok(Flow::Jump(target));
                }
                let handler = pending.remove(0);
                frame.continuations.push(Continuation::Leave {
                    target,
                    pending,
                    handler,
                });
                Ok(Flow::Jump(handler.start))
            }
            Some(Continuation::Unwind {
                exception,
                origin,
                next,
                ..
            }) => Ok(match self.dispatch(exception, origin, next)? {
                Some(handler) => Flow::Jump(handler),
                None => Flow::Unhandled(exception),
            }),
        }
    }

    fn step(
        &mut self,
        instruction: &'m Instruction,
        pc: usize,
        budget: u64,
    ) -> std::result::Result<Flow, EmulationError> {
        let depth = self.frames.len().saturating_sub(1);
        let unsupported = || EmulationError::UnsupportedInstruction {
            mnemonic: instruction.mnemonic(),
        };

        match instruction.opcode {
            Opcode::Nop | Opcode::Castclass | Opcode::Isinst => Ok(Flow::Next),

            Opcode::Ldarg0
            | Opcode::Ldarg1
            | Opcode::Ldarg2
            | Opcode::Ldarg3
            | Opcode::LdargS
            | Opcode::Ldarg => {
                let slot = instruction.loaded_argument().ok_or_else(unsupported)?;
                let value = self.argument_slot(slot)?.clone();
                self.push(value)
            }
            Opcode::LdargaS | Opcode::Ldarga => {
                let index = instruction.loaded_argument().ok_or_else(unsupported)?;
                self.argument_slot(index)?;
                self.push(Value::Pointer(Location::Argument { depth, index }))
            }
            Opcode::StargS | Opcode::Starg => {
                let slot = instruction.stored_argument().ok_or_else(unsupported)?;
                let value = self.pop()?;
                *self.argument_slot(slot)? = value;
                Ok(Flow::Next)
            }

            Opcode::Ldloc0
            | Opcode::Ldloc1
            | Opcode::Ldloc2
            | Opcode::Ldloc3
            | Opcode::LdlocS
            | Opcode::Ldloc => {
                let local = instruction.local().ok_or_else(unsupported)?;
                let value = self.local_slot(local.0)?.clone();
                self.push(value)
            }
            Opcode::LdlocaS | Opcode::Ldloca => {
                let local = instruction.local().ok_or_else(unsupported)?;
                self.local_slot(local.0)?;
                self.push(Value::Pointer(Location::Local {
                    depth,
                    index: local.0,
                }))
            }
            Opcode::Stloc0
            | Opcode::Stloc1
            | Opcode::Stloc2
            | Opcode::Stloc3
            | Opcode::StlocS
            | Opcode::Stloc => {
                let local = instruction.local().ok_or_else(unsupported)?;
                let value = self.pop()?;
                *self.local_slot(local.0)? = value;
                Ok(Flow::Next)
            }

            Opcode::Ldnull => self.push(Value::Null),
            Opcode::LdcI4M1
            | Opcode::LdcI4_0
            | Opcode::LdcI4_1
            | Opcode::LdcI4_2
            | Opcode::LdcI4_3
            | Opcode::LdcI4_4
            | Opcode::LdcI4_5
            | Opcode::LdcI4_6
            | Opcode::LdcI4_7
            | Opcode::LdcI4_8
            | Opcode::LdcI4S
            | Opcode::LdcI4 => {
                let value = instruction.i4_constant().ok_or_else(unsupported)?;
                self.push(Value::I4(value))
            }
            Opcode::LdcI8 => match instruction.operand {
                Operand::Immediate(Immediate::Int64(value)) => self.push(Value::I8(value)),
                _ => Err(unsupported()),
            },
            Opcode::LdcR4 => match instruction.operand {
                Operand::Immediate(Immediate::Float32(value)) => {
                    self.push(Value::R8(f64::from(value)))
                }
                _ => Err(unsupported()),
            },
            Opcode::LdcR8 => match instruction.operand {
                Operand::Immediate(Immediate::Float64(value)) => self.push(Value::R8(value)),
                _ => Err(unsupported()),
            },
            Opcode::Ldstr => match &instruction.operand {
                Operand::String(value) => {
                    let reference = self.heap.alloc_string(value);
                    self.push(Value::Object(reference))
                }
                _ => Err(unsupported()),
            },
            Opcode::Ldtoken => match &instruction.operand {
                Operand::Method(member) => self.push(Value::MethodHandle(member.clone())),
                Operand::Type(sig) => self.push(Value::TypeHandle(sig.clone())),
                _ => Err(unsupported()),
            },

            Opcode::Dup => {
                let value = self.pop()?;
                self.push(value.clone())?;
                self.push(value)
            }
            Opcode::Pop => {
                self.pop()?;
                Ok(Flow::Next)
            }

            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor => {
                let b = self.pop()?;
                let a = self.pop()?;
                match arithmetic(instruction.opcode, &a, &b)? {
                    Some(value) => self.push(value),
                    None => Ok(self.fault(
                        "System.DivideByZeroException",
                        "Attempted to divide by zero.",
                    )),
                }
            }
            Opcode::Neg => match self.pop()? {
                Value::I4(value) => self.push(Value::I4(value.wrapping_neg())),
                Value::I8(value) => self.push(Value::I8(value.wrapping_neg())),
                Value::R8(value) => self.push(Value::R8(-value)),
                other => Err(EmulationError::TypeMismatch {
                    operation: "neg",
                    expected: "numeric",
                    found: other.kind(),
                }),
            },
            Opcode::Not => match self.pop()? {
                Value::I4(value) => self.push(Value::I4(!value)),
                Value::I8(value) => self.push(Value::I8(!value)),
                other => Err(EmulationError::TypeMismatch {
                    operation: "not",
                    expected: "integer",
                    found: other.kind(),
                }),
            },
            Opcode::ConvI4 | Opcode::ConvI8 | Opcode::ConvR8 => {
                #[allow(clippy::cast_possible_truncation)]
                let value = match (instruction.opcode, self.pop()?) {
                    (Opcode::ConvI4, Value::I4(v)) => Value::I4(v),
                    (Opcode::ConvI4, Value::I8(v)) => Value::I4(v as i32),
                    (Opcode::ConvI4, Value::R8(v)) => Value::I4(v as i32),
                    (Opcode::ConvI8, Value::I4(v)) => Value::I8(i64::from(v)),
                    (Opcode::ConvI8, Value::I8(v)) => Value::I8(v),
                    (Opcode::ConvI8, Value::R8(v)) => Value::I8(v as i64),
                    (Opcode::ConvR8, Value::I4(v)) => Value::R8(f64::from(v)),
                    (Opcode::ConvR8, Value::I8(v)) => Value::R8(v as f64),
                    (Opcode::ConvR8, Value::R8(v)) => Value::R8(v),
                    (_, other) => {
                        return Err(EmulationError::TypeMismatch {
                            operation: instruction.mnemonic(),
                            expected: "numeric",
                            found: other.kind(),
                        })
                    }
                };
                self.push(value)
            }
            Opcode::Ceq | Opcode::Cgt | Opcode::Clt => {
                let b = self.pop()?;
                let a = self.pop()?;
                let expected = match instruction.opcode {
                    Opcode::Ceq => Ordering::Equal,
                    Opcode::Cgt => Ordering::Greater,
                    _ => Ordering::Less,
                };
                let result = compare(&a, &b)? == Some(expected);
                self.push(Value::from(result))
            }

            Opcode::Br | Opcode::BrS => Ok(Flow::Jump(self.branch(instruction)?)),
            Opcode::Brtrue | Opcode::BrtrueS | Opcode::Brfalse | Opcode::BrfalseS => {
                let target = self.branch(instruction)?;
                let taken = self.pop()?.is_true()
                    == matches!(instruction.opcode, Opcode::Brtrue | Opcode::BrtrueS);
                Ok(if taken { Flow::Jump(target) } else { Flow::Next })
            }
            Opcode::Beq
            | Opcode::BeqS
            | Opcode::Bge
            | Opcode::BgeS
            | Opcode::Bgt
            | Opcode::BgtS
            | Opcode::Ble
            | Opcode::BleS
            | Opcode::Blt
            | Opcode::BltS
            | Opcode::BneUn
            | Opcode::BneUnS => {
                let target = self.branch(instruction)?;
                let b = self.pop()?;
                let a = self.pop()?;
                let order = compare(&a, &b)?;
                let taken = match instruction.opcode {
                    Opcode::Beq | Opcode::BeqS => order == Some(Ordering::Equal),
                    Opcode::Bge | Opcode::BgeS => {
                        matches!(order, Some(Ordering::Greater | Ordering::Equal))
                    }
                    Opcode::Bgt | Opcode::BgtS => order == Some(Ordering::Greater),
                    Opcode::Ble | Opcode::BleS => {
                        matches!(order, Some(Ordering::Less | Ordering::Equal))
                    }
                    Opcode::Blt | Opcode::BltS => order == Some(Ordering::Less),
                    _ => order != Some(Ordering::Equal),
                };
                Ok(if taken { Flow::Jump(target) } else { Flow::Next })
            }
            Opcode::Switch => {
                let Operand::Switch(targets) = &instruction.operand else {
                    return Err(unsupported());
                };
                let index = self.pop()?.as_i4("switch")?;
                match usize::try_from(index).ok().and_then(|i| targets.get(i)) {
                    Some(id) => Ok(Flow::Jump(self.frame()?.target(*id)?)),
                    None => Ok(Flow::Next),
                }
            }

            Opcode::Call | Opcode::Callvirt | Opcode::Newobj => {
                let Operand::Method(member) = &instruction.operand else {
                    return Err(unsupported());
                };
                self.call(member, instruction.opcode == Opcode::Newobj, budget)
            }
            Opcode::Ret => {
                if self.frame()?.method.returns.is_void() {
                    Ok(Flow::Return(None))
                } else {
                    Ok(Flow::Return(Some(self.pop()?)))
                }
            }
            Opcode::Jmp | Opcode::Tail => Err(unsupported()),

            Opcode::Box => {
                let value = self.pop()?;
                let boxed = self.heap.box_value(value);
                self.push(boxed)
            }
            Opcode::UnboxAny => match &instruction.operand {
                Operand::Type(sig) => self.unbox_any(sig),
                _ => Err(unsupported()),
            },
            Opcode::Ldobj => {
                let location = Self::pointer(&self.pop()?)?;
                let value = self.location(location)?.clone();
                self.push(value)
            }
            Opcode::Stobj => {
                let value = self.pop()?;
                let location = Self::pointer(&self.pop()?)?;
                *self.location(location)? = value;
                Ok(Flow::Next)
            }
            Opcode::Initobj => {
                let Operand::Type(sig) = &instruction.operand else {
                    return Err(unsupported());
                };
                let location = Self::pointer(&self.pop()?)?;
                *self.location(location)? = Value::default_for(sig);
                Ok(Flow::Next)
            }

            Opcode::Newarr => {
                let Operand::Type(element) = &instruction.operand else {
                    return Err(unsupported());
                };
                let length = self.pop()?.as_i4("newarr")?;
                let Ok(length) = usize::try_from(length) else {
                    return Ok(self.fault(
                        "System.OverflowException",
                        "Arithmetic operation resulted in an overflow.",
                    ));
                };
                let array = self.heap.alloc(HeapObject::Array {
                    element: element.clone(),
                    items: vec![Value::default_for(element); length],
                });
                self.push(Value::Object(array))
            }
            Opcode::Ldlen => {
                let Some(array) = self.pop()?.as_object("ldlen")? else {
                    return Ok(self.fault("System.NullReferenceException", "ldlen of null"));
                };
                let length = self.heap.array(array)?.len();
                self.push(Value::I8(i64::try_from(length).unwrap_or(i64::MAX)))
            }
            Opcode::LdelemRef | Opcode::StelemRef => {
                let value = if instruction.opcode == Opcode::StelemRef {
                    Some(self.pop()?)
                } else {
                    None
                };
                let index = self.pop()?.as_i4(instruction.mnemonic())?;
                let Some(array) = self.pop()?.as_object(instruction.mnemonic())? else {
                    return Ok(self.fault(
                        "System.NullReferenceException",
                        "element access of null",
                    ));
                };
                let items = self.heap.array_mut(array)?;
                let Some(slot) = usize::try_from(index).ok().and_then(|i| items.get_mut(i))
                else {
                    return Ok(self.fault(
                        "System.IndexOutOfRangeException",
                        "Index was outside the bounds of the array.",
                    ));
                };
                match value {
                    Some(value) => {
                        *slot = value;
                        Ok(Flow::Next)
                    }
                    None => {
                        let value = slot.clone();
                        self.push(value)
                    }
                }
            }

            Opcode::Throw => match self.pop()?.as_object("throw")? {
                Some(exception) => Ok(Flow::Throw(exception)),
                None => Ok(self.fault("System.NullReferenceException", "throw of null")),
            },
            Opcode::Rethrow => {
                let frame = self.frame()?;
                frame
                    .caught
                    .iter()
                    .rev()
                    .find(|(_, span)| span.contains(pc))
                    .map(|(exception, _)| Flow::Throw(*exception))
                    .ok_or(EmulationError::RethrowOutsideHandler)
            }
            Opcode::Leave | Opcode::LeaveS => {
                let target = self.branch(instruction)?;
                self.leave(target, pc)
            }
            Opcode::Endfinally => self.endfinally(),
        }
    }
}
