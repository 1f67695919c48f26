//! The method interception weaver.
//!
//! [`InterceptionWeaver`] rewrites one method body so that the interceptors attached to it
//! run around the original code. For an instance method `int Compute(int a, int b)` with a
//! method interceptor `M` and a parameter interceptor `P` on `a`, the woven body reads:
//!
//! ```text
//!         ldc.i4.0; stloc result               // result slot, zeroed
//!         newobj P::.ctor; stloc p             // interceptors, parameters first
//!         newobj M::.ctor; stloc m
//!         ldtoken Compute; call GetMethodFromHandle; stloc desc
//!         <object[] args = { box a, box b }>
//!         <payload = new MethodInterceptionArgs(this, args, box result, desc)>
//! try {
//!         nop
//!         <parameter payload for a>; ldloc p; ...; callvirt OnEnter
//!         <a = unbox payload.Value; args[0] = box a>
//!         ldloc m; ldloc payload; callvirt OnEnter
//!         ldloc payload; callvirt get_Cancel; brtrue TRAMPOLINE
//!         <original body, every ret turned into stloc result; leave EXIT>
//! TRAMPOLINE: leave CANCEL
//! } catch Exception {
//!         stloc ex; ldloc m; ldloc payload; ldloc ex; callvirt OnException; rethrow
//! } finally {
//!         nop
//!         ldloc payload; ldloc result; box int; callvirt set_Return
//!         ldloc m; ldloc payload; callvirt OnExit
//!         ldloc payload; callvirt get_Cancel; brtrue ENDFINALLY
//! ENDFINALLY: endfinally
//! }
//! CANCEL: nop
//! EXIT:   ldloc payload; callvirt get_Return; unbox.any int
//!         ret
//! ```
//!
//! Without method interceptors there is no payload and no protected region; parameter
//! hooks run in the prologue and the cancel label still sits in front of the exit.
//! Interceptors only receive the hooks their [`Capabilities`] declare, and the catch
//! handler is omitted when none of them handles exceptions.
//!
//! The body is rewritten on a copy and committed only after it passed
//! [`crate::assembly::verify`], so a failed candidate leaves the method untouched.

use std::sync::Arc;

use crate::{
    analysis::SignatureAnalyzer,
    assembly::{
        verify, Cursor, ExceptionRegion, Immediate, InstrId, Instruction, LocalId, MethodBody,
        Opcode, Operand, RegionKind, Variable,
    },
    metadata::{
        AttributeArgument, CustomAttribute, ImportTables, MemberRef, MethodDef, Token, TypeSig,
    },
    weaver::{
        config::WeaverConfig,
        contract::{HookContract, METHOD_ARGS_TYPE, METHOD_BASE_TYPE, PARAMETER_ARGS_TYPE},
        convert::{Conversion, SignatureShape},
        events::{EventKind, EventLog},
        exits::{ExitPathNormalizer, NormalizedExit},
        interceptor::{Candidate, Capabilities, InterceptorDescriptor, InterceptorTarget},
    },
    Error, Result,
};

/// What weaving a method produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WovenMethod {
    /// The woven method.
    pub method: Token,
    /// Number of interceptor instances the woven code creates.
    pub interceptors: usize,
    /// First instruction of the canonical exit.
    pub exit: InstrId,
    /// The cancel label, immediately in front of `exit`.
    pub cancel: InstrId,
    /// The result local, `None` for void methods.
    pub result: Option<LocalId>,
    /// The method payload local, `None` without method interceptors.
    pub payload: Option<LocalId>,
}

/// Weaves the interceptors of one candidate into its method.
pub struct InterceptionWeaver<'a> {
    method: &'a mut MethodDef,
    imports: &'a mut ImportTables,
    contract: &'a HookContract,
    config: &'a WeaverConfig,
    shape: Option<Arc<SignatureShape>>,
    events: Option<&'a EventLog>,
}

impl<'a> InterceptionWeaver<'a> {
    /// Creates a weaver for `method`, importing new references into `imports`.
    pub fn new(
        method: &'a mut MethodDef,
        imports: &'a mut ImportTables,
        contract: &'a HookContract,
        config: &'a WeaverConfig,
    ) -> Self {
        InterceptionWeaver {
            method,
            imports,
            contract,
            config,
            shape: None,
            events: None,
        }
    }

    /// Uses precomputed conversions instead of deriving them from the signature.
    #[must_use]
    pub fn with_shape(mut self, shape: Arc<SignatureShape>) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Records instantiation, removal and warning events in `events`.
    #[must_use]
    pub fn with_events(mut self, events: &'a EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Weaves `candidate` into the method.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedTarget`] if the method has no body or the candidate does
    /// not fit the method, [`Error::Structural`] if the body cannot be normalized or the
    /// woven body fails verification
    pub fn weave(self, candidate: &Candidate) -> Result<WovenMethod> {
        let InterceptionWeaver {
            method,
            imports,
            contract,
            config,
            shape,
            events,
        } = self;

        let body = match method.body.as_ref() {
            Some(body) if method.has_body() => body.clone(),
            _ => {
                return Err(Error::UnsupportedTarget {
                    method: method.full_name(),
                    reason: "method has no IL body".to_string(),
                })
            }
        };
        if candidate.method != method.token {
            return Err(Error::UnsupportedTarget {
                method: method.full_name(),
                reason: format!("candidate names method {}", candidate.method),
            });
        }
        candidate.validate(method)?;

        let shape = match shape {
            Some(shape) if shape.fits(method) => shape,
            Some(shape) => {
                return Err(structural_error!(
                    "Conversions computed for fingerprint {} do not match the signature of {}",
                    shape.fingerprint,
                    method.full_name()
                ))
            }
            None => Arc::new(SignatureShape::of(
                SignatureAnalyzer::new(method).fingerprint(),
                method,
            )),
        };

        let (body, woven) = {
            let mut emission = Emission {
                method: &*method,
                imports,
                contract,
                config,
                shape: &*shape,
                events,
                body,
                started: None,
            };
            let woven = emission.run(candidate)?;
            (emission.body, woven)
        };

        verify(&body)?;
        method.body = Some(body);

        if config.remove_consumed_metadata {
            for descriptor in &candidate.interceptors {
                if let Some(attribute) = method.remove_attribute(descriptor.attribute) {
                    if let Some(events) = events {
                        events
                            .record(EventKind::MetadataRemoved)
                            .method(method.token)
                            .message(attribute.attribute_type());
                    }
                }
            }
        }

        Ok(woven)
    }
}

/// One interceptor instance held in a local.
struct Instance<'d> {
    descriptor: &'d InterceptorDescriptor,
    local: LocalId,
}

/// The labels of the method protocol.
struct ProtectedLabels {
    trampoline: InstrId,
    end_finally: InstrId,
}

/// Locals shared by the hook calls.
struct Scratch {
    result: Option<Variable>,
    desc: LocalId,
    args: Option<LocalId>,
    payload: Option<LocalId>,
    parameter_payload: Option<LocalId>,
}

struct Emission<'e> {
    method: &'e MethodDef,
    imports: &'e mut ImportTables,
    contract: &'e HookContract,
    config: &'e WeaverConfig,
    shape: &'e SignatureShape,
    events: Option<&'e EventLog>,
    body: MethodBody,
    started: Option<InstrId>,
}

impl Emission<'_> {
    fn run(&mut self, candidate: &Candidate) -> Result<WovenMethod> {
        let entry = self.body.first().ok_or_else(|| Error::UnsupportedTarget {
            method: self.method.full_name(),
            reason: "method body is empty".to_string(),
        })?;
        let method_interceptors = candidate.method_interceptors();
        let parameter_interceptors = candidate.parameter_interceptors();

        // Result slot, initialized at entry
        let result = if self.method.returns.is_void() {
            None
        } else {
            let local = self.body.add_local(self.method.returns.clone());
            let result = Variable::local(local, self.method.returns.clone());
            self.body.cursor = Cursor::before(entry);
            self.emit_all(result.initialize())?;
            Some(result)
        };

        let exit = ExitPathNormalizer::new(&mut self.body, &self.method.returns)
            .normalize_with_result(result.as_ref().and_then(Variable::as_local))?;
        // The entry may have been a former exit; emission continues in front of it.
        self.body.cursor = Cursor::before(entry);

        let instances = self.instantiate(&parameter_interceptors, &method_interceptors)?;
        let (parameter_instances, method_instances) = instances.split_at(parameter_interceptors.len());

        let desc = self.body.add_local(TypeSig::class(METHOD_BASE_TYPE));
        self.emit(Instruction::method(Opcode::Ldtoken, self.method.reference()))?;
        self.emit(Instruction::method(
            Opcode::Call,
            self.contract.get_method_from_handle.clone(),
        ))?;
        self.emit(Instruction::store_local(desc))?;

        let mut scratch = Scratch {
            result,
            desc,
            args: None,
            payload: None,
            parameter_payload: None,
        };

        let cancel = self.body.create_label(Instruction::simple(Opcode::Nop));

        if method_instances.is_empty() {
            self.parameter_hooks(parameter_instances, &mut scratch)?;
            self.body.cursor = Cursor::before(exit.exit);
            self.body.mark(cancel)?;
        } else {
            self.method_payload(&mut scratch)?;
            self.protect(
                parameter_instances,
                method_instances,
                &mut scratch,
                &exit,
                cancel,
            )?;
        }

        let result = scratch.result.as_ref().and_then(Variable::as_local);
        if let Some(local) = result {
            self.read_back_result(&exit, local, &scratch)?;
        }

        self.warn_unread_parameters(parameter_instances);

        Ok(WovenMethod {
            method: self.method.token,
            interceptors: instances.len(),
            exit: exit.exit,
            cancel,
            result,
            payload: scratch.payload,
        })
    }

    fn emit(&mut self, instruction: Instruction) -> Result<InstrId> {
        let id = self.body.emit(instruction)?;
        self.started.get_or_insert(id);
        Ok(id)
    }

    fn mark(&mut self, label: InstrId) -> Result<()> {
        self.body.mark(label)?;
        self.started.get_or_insert(label);
        Ok(())
    }

    /// Starts a new range; returns the first instruction emitted since the previous call.
    fn take_started(&mut self) -> Option<InstrId> {
        self.started.take()
    }

    fn call(&mut self, opcode: Opcode, member: &MemberRef) -> Result<InstrId> {
        self.emit(Instruction::method(opcode, member.clone()))
    }

    fn convert(&mut self, conversion: &Conversion) -> Result<()> {
        if let Some(instruction) = conversion.instruction() {
            self.emit(instruction)?;
        }
        Ok(())
    }

    fn receiver(&mut self) -> Result<()> {
        if self.method.has_this() {
            self.emit(Instruction::load_arg(0))?;
        } else {
            self.emit(Instruction::simple(Opcode::Ldnull))?;
        }
        Ok(())
    }

    fn emit_all(&mut self, code: Vec<Instruction>) -> Result<()> {
        for instruction in code {
            self.emit(instruction)?;
        }
        Ok(())
    }

    /// Argument slot of formal parameter `index`.
    fn argument(&self, index: u16) -> Result<Variable> {
        let sig = self.parameter(index)?.sig.clone();
        Ok(Variable::argument(self.method.argument_slot(index), sig))
    }

    /// Pushes formal parameter `index` converted to `object`.
    fn load_boxed_argument(&mut self, index: u16) -> Result<()> {
        let argument = self.argument(index)?;
        self.emit_all(argument.value())?;
        let conversion = self.to_object(index)?;
        self.convert(&conversion)
    }

    fn parameter(&self, index: u16) -> Result<&crate::metadata::ParamDef> {
        self.method
            .params
            .get(usize::from(index))
            .ok_or_else(|| Error::UnsupportedTarget {
                method: self.method.full_name(),
                reason: format!("parameter index {} is out of range", index),
            })
    }

    fn conversions(&self, index: u16) -> Result<&(Conversion, Conversion)> {
        self.shape.parameters.get(usize::from(index)).ok_or_else(|| {
            structural_error!(
                "No conversions for parameter {} of {}",
                index,
                self.method.full_name()
            )
        })
    }

    fn to_object(&self, index: u16) -> Result<Conversion> {
        Ok(self.conversions(index)?.0.clone())
    }

    fn from_object(&self, index: u16) -> Result<Conversion> {
        Ok(self.conversions(index)?.1.clone())
    }

    fn instantiate<'d>(
        &mut self,
        parameter_interceptors: &[&'d InterceptorDescriptor],
        method_interceptors: &[&'d InterceptorDescriptor],
    ) -> Result<Vec<Instance<'d>>> {
        let mut instances = Vec::new();
        for &descriptor in parameter_interceptors.iter().chain(method_interceptors) {
            let attribute = self
                .method
                .find_attribute(descriptor.attribute)
                .cloned()
                .ok_or_else(|| Error::UnsupportedTarget {
                    method: self.method.full_name(),
                    reason: format!("attribute {} is not attached", descriptor.attribute),
                })?;

            let local = self.create_instance(&attribute)?;
            if let Some(events) = self.events {
                events
                    .record(EventKind::InterceptorInstantiated)
                    .method(self.method.token)
                    .message(attribute.attribute_type());
            }
            instances.push(Instance { descriptor, local });
        }
        Ok(instances)
    }

    /// `newobj` on the attribute constructor with its fixed arguments, then every property
    /// assignment through its setter
    fn create_instance(&mut self, attribute: &CustomAttribute) -> Result<LocalId> {
        if attribute.ctor.params.len() != attribute.fixed_args.len() {
            return Err(Error::UnsupportedTarget {
                method: self.method.full_name(),
                reason: format!(
                    "{} takes {} constructor arguments, {} given",
                    attribute.attribute_type(),
                    attribute.ctor.params.len(),
                    attribute.fixed_args.len()
                ),
            });
        }

        for (argument, param) in attribute.fixed_args.iter().zip(&attribute.ctor.params) {
            self.push_attribute_argument(argument, param)?;
        }
        self.call(Opcode::Newobj, &attribute.ctor)?;

        for named in &attribute.named_args {
            if !named.is_property {
                log::warn!(
                    "Skipping field assignment '{}' of {} on {}",
                    named.name,
                    attribute.attribute_type(),
                    self.method.full_name()
                );
                continue;
            }

            let value_sig = named.value.type_sig();
            let setter = self.imports.import_member(MemberRef::method(
                attribute.attribute_type(),
                &format!("set_{}", named.name),
                vec![value_sig.clone()],
                TypeSig::Void,
                true,
            ));
            self.emit(Instruction::simple(Opcode::Dup))?;
            self.push_attribute_argument(&named.value, &value_sig)?;
            self.call(Opcode::Callvirt, &setter)?;
        }

        let local = self
            .body
            .add_local(TypeSig::class(attribute.attribute_type()));
        self.emit(Instruction::store_local(local))?;
        Ok(local)
    }

    fn push_attribute_argument(
        &mut self,
        argument: &AttributeArgument,
        target: &TypeSig,
    ) -> Result<()> {
        let contract = self.contract;
        match argument {
            AttributeArgument::Bool(value) => {
                self.emit(Instruction::load_i4(i32::from(*value)))?;
            }
            AttributeArgument::I4(value) => {
                self.emit(Instruction::load_i4(*value))?;
            }
            AttributeArgument::I8(value) => {
                self.emit(Instruction::new(
                    Opcode::LdcI8,
                    Operand::Immediate(Immediate::Int64(*value)),
                ))?;
            }
            AttributeArgument::R8(value) => {
                self.emit(Instruction::new(
                    Opcode::LdcR8,
                    Operand::Immediate(Immediate::Float64(*value)),
                ))?;
            }
            AttributeArgument::String(value) => {
                self.emit(Instruction::new(Opcode::Ldstr, Operand::String(value.clone())))?;
            }
            AttributeArgument::Null => {
                self.emit(Instruction::simple(Opcode::Ldnull))?;
            }
            AttributeArgument::Type(sig) => {
                self.emit(Instruction::typed(Opcode::Ldtoken, sig.clone()))?;
                self.call(Opcode::Call, &contract.get_type_from_handle)?;
            }
        }

        let sig = argument.type_sig();
        if sig.is_value_type() && !target.is_value_type() {
            self.emit(Instruction::typed(Opcode::Box, sig))?;
        }
        Ok(())
    }

    /// `object[] args` with every formal parameter and the method payload built from it.
    fn method_payload(&mut self, scratch: &mut Scratch) -> Result<()> {
        let contract = self.contract;
        let count = self.method.params.len();
        let args = self.body.add_local(TypeSig::array_of(TypeSig::Object));
        let count = i32::try_from(count)
            .map_err(|_| malformed_error!("{} parameters do not fit an array", count))?;

        self.emit(Instruction::load_i4(count))?;
        self.emit(Instruction::typed(Opcode::Newarr, TypeSig::Object))?;
        self.emit(Instruction::store_local(args))?;
        for index in 0..self.method.params.len() {
            let index = u16::try_from(index)
                .map_err(|_| malformed_error!("Parameter index {} out of range", index))?;
            self.store_argument_element(args, index)?;
        }

        let payload = self.body.add_local(TypeSig::class(METHOD_ARGS_TYPE));
        self.receiver()?;
        self.emit(Instruction::load_local(args))?;
        match (&scratch.result, &self.shape.result) {
            (Some(result), Some((to_object, _))) => {
                let to_object = to_object.clone();
                self.emit(result.load())?;
                self.convert(&to_object)?;
            }
            _ => {
                self.emit(Instruction::simple(Opcode::Ldnull))?;
            }
        }
        self.emit(Instruction::load_local(scratch.desc))?;
        self.call(Opcode::Newobj, &contract.method_args_ctor)?;
        self.emit(Instruction::store_local(payload))?;

        scratch.args = Some(args);
        scratch.payload = Some(payload);
        Ok(())
    }

    fn store_argument_element(&mut self, args: LocalId, index: u16) -> Result<()> {
        self.emit(Instruction::load_local(args))?;
        self.emit(Instruction::load_i4(i32::from(index)))?;
        self.load_boxed_argument(index)?;
        self.emit(Instruction::simple(Opcode::StelemRef))?;
        Ok(())
    }

    /// Enter hooks of parameter interceptors, each followed by writing the possibly
    /// replaced value back into the parameter
    fn parameter_hooks(&mut self, instances: &[Instance<'_>], scratch: &mut Scratch) -> Result<()> {
        let contract = self.contract;
        let count = u16::try_from(self.method.params.len())
            .map_err(|_| malformed_error!("Too many parameters"))?;

        for instance in instances {
            for index in instance.descriptor.parameters(count) {
                let parameter_payload = match scratch.parameter_payload {
                    Some(local) => local,
                    None => {
                        let local = self.body.add_local(TypeSig::class(PARAMETER_ARGS_TYPE));
                        scratch.parameter_payload = Some(local);
                        local
                    }
                };

                self.receiver()?;
                self.emit(Instruction::load_local(scratch.desc))?;
                self.call(Opcode::Callvirt, &contract.get_parameters)?;
                self.emit(Instruction::load_i4(i32::from(index)))?;
                self.emit(Instruction::simple(Opcode::LdelemRef))?;
                self.load_boxed_argument(index)?;
                self.call(Opcode::Newobj, &contract.parameter_args_ctor)?;
                self.emit(Instruction::store_local(parameter_payload))?;

                self.emit(Instruction::load_local(instance.local))?;
                self.emit(Instruction::load_local(parameter_payload))?;
                self.call(Opcode::Callvirt, &contract.on_parameter_enter)?;

                self.write_back_parameter(index, parameter_payload)?;
                if let Some(args) = scratch.args {
                    self.store_argument_element(args, index)?;
                }
            }
        }
        Ok(())
    }

    fn write_back_parameter(&mut self, index: u16, parameter_payload: LocalId) -> Result<()> {
        let contract = self.contract;
        let (address, store) = self.argument(index)?.assign();
        let from_object = self.from_object(index)?;

        if let Some(address) = address {
            self.emit(address)?;
        }
        self.emit(Instruction::load_local(parameter_payload))?;
        self.call(Opcode::Callvirt, &contract.parameter_args_value)?;
        self.convert(&from_object)?;
        self.emit(store)?;
        Ok(())
    }

    /// Wraps the body in the protected region carrying the method hooks.
    fn protect(
        &mut self,
        parameter_instances: &[Instance<'_>],
        method_instances: &[Instance<'_>],
        scratch: &mut Scratch,
        exit: &NormalizedExit,
        cancel: InstrId,
    ) -> Result<()> {
        let contract = self.contract;
        let payload = scratch
            .payload
            .ok_or_else(|| malformed_error!("Method payload is not built"))?;
        let labels = ProtectedLabels {
            trampoline: self
                .body
                .create_label(Instruction::branch(Opcode::Leave, cancel)),
            end_finally: self
                .body
                .create_label(Instruction::simple(Opcode::Endfinally)),
        };

        // Protected block: parameter hooks, enter hooks, then the original body
        self.take_started();
        if self.config.emit_region_markers {
            self.emit(Instruction::simple(Opcode::Nop))?;
        }
        self.parameter_hooks(parameter_instances, scratch)?;
        for instance in method_instances {
            if !instance.descriptor.capabilities.contains(Capabilities::ENTER) {
                continue;
            }
            self.emit(Instruction::load_local(instance.local))?;
            self.emit(Instruction::load_local(payload))?;
            self.call(Opcode::Callvirt, &contract.on_enter)?;
            self.emit(Instruction::load_local(payload))?;
            self.call(Opcode::Callvirt, &contract.method_args_cancel)?;
            self.emit(Instruction::branch(Opcode::Brtrue, labels.trampoline))?;
        }
        let entry = self.body.cursor.position;
        let try_start = match (self.take_started(), entry) {
            (Some(first), _) | (None, Some(first)) => first,
            (None, None) => return Err(malformed_error!("Protected block has no instructions")),
        };

        self.body.cursor = Cursor::before(exit.exit);
        self.mark(labels.trampoline)?;
        self.take_started();

        // Exception handler
        let handles_exceptions = method_instances
            .iter()
            .any(|i| i.descriptor.capabilities.contains(Capabilities::EXCEPTION));
        let catch_start = if handles_exceptions {
            let exception = self.body.add_local(self.contract.catch_type.clone());
            let start = self.emit(Instruction::store_local(exception))?;
            for instance in method_instances {
                if !instance.descriptor.capabilities.contains(Capabilities::EXCEPTION) {
                    continue;
                }
                self.emit(Instruction::load_local(instance.local))?;
                self.emit(Instruction::load_local(payload))?;
                self.emit(Instruction::load_local(exception))?;
                self.call(Opcode::Callvirt, &contract.on_exception)?;
            }
            self.emit(Instruction::simple(Opcode::Rethrow))?;
            Some(start)
        } else {
            None
        };
        self.take_started();

        // Cleanup
        if self.config.emit_region_markers {
            self.emit(Instruction::simple(Opcode::Nop))?;
        }
        if let (Some(result), Some((to_object, _))) = (scratch.result.clone(), &self.shape.result) {
            let to_object = to_object.clone();
            self.emit(Instruction::load_local(payload))?;
            self.emit(result.load())?;
            self.convert(&to_object)?;
            self.call(Opcode::Callvirt, &contract.method_args_set_return)?;
        }
        for instance in method_instances {
            if !instance.descriptor.capabilities.contains(Capabilities::EXIT) {
                continue;
            }
            self.emit(Instruction::load_local(instance.local))?;
            self.emit(Instruction::load_local(payload))?;
            self.call(Opcode::Callvirt, &contract.on_exit)?;
            self.emit(Instruction::load_local(payload))?;
            self.call(Opcode::Callvirt, &contract.method_args_cancel)?;
            self.emit(Instruction::branch(Opcode::Brtrue, labels.end_finally))?;
        }
        self.mark(labels.end_finally)?;
        let finally_start = self.take_started().unwrap_or(labels.end_finally);

        self.mark(cancel)?;
        self.take_started();

        if let Some(catch_start) = catch_start {
            self.body.add_region(ExceptionRegion {
                kind: RegionKind::Catch(self.contract.catch_type.clone()),
                try_start,
                try_end: catch_start,
                handler_start: catch_start,
                handler_end: finally_start,
            });
        }
        self.body.add_region(ExceptionRegion {
            kind: RegionKind::Finally,
            try_start,
            try_end: finally_start,
            handler_start: finally_start,
            handler_end: cancel,
        });
        Ok(())
    }

    /// Rewrites the exit head to return the payload's result.
    fn read_back_result(
        &mut self,
        exit: &NormalizedExit,
        result: LocalId,
        scratch: &Scratch,
    ) -> Result<()> {
        let Some(payload) = scratch.payload else {
            return Ok(());
        };
        debug_assert_eq!(
            self.body.get(exit.exit).and_then(Instruction::local),
            Some(result)
        );

        self.body.replace(exit.exit, Instruction::load_local(payload))?;
        let mut last = self.body.insert_after(
            exit.exit,
            Instruction::method(Opcode::Callvirt, self.contract.method_args_get_return.clone()),
        )?;
        if let Some((_, from_object)) = &self.shape.result {
            if let Some(instruction) = from_object.instruction() {
                last = self.body.insert_after(last, instruction)?;
            }
        }
        debug_assert_eq!(self.body.next(last), Some(exit.ret));
        Ok(())
    }

    fn warn_unread_parameters(&self, instances: &[Instance<'_>]) {
        let Ok(count) = u16::try_from(self.method.params.len()) else {
            return;
        };
        let analyzer = SignatureAnalyzer::new(self.method);
        for instance in instances {
            if instance.descriptor.target == InterceptorTarget::AllParameters {
                continue;
            }
            for index in instance.descriptor.parameters(count) {
                if analyzer.reads_slot(index) {
                    continue;
                }
                let name = self
                    .method
                    .params
                    .get(usize::from(index))
                    .map_or("?", |p| p.name.as_str());
                log::warn!(
                    "Parameter '{}' of {} has an interceptor but is never read",
                    name,
                    self.method.full_name()
                );
                if let Some(events) = self.events {
                    events
                        .record(EventKind::Warning)
                        .method(self.method.token)
                        .message(format!("parameter '{}' is never read", name));
                }
            }
        }
    }
}
