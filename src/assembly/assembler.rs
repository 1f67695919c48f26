//! Fluent, label-based instruction assembler.
//!
//! [`InstructionAssembler`] writes instructions into a [`MethodBody`] at its cursor and
//! resolves named labels to instruction ids. It is the hand-written counterpart of the
//! weaver's generated code: fixtures, benchmarks and the [`crate::metadata::MethodBuilder`]
//! use it to produce the bodies the weaver then rewrites.
//!
//! A label names the next instruction emitted after it. Branches may refer to labels that
//! are defined later; [`InstructionAssembler::finish`] fails if any referenced label was
//! never defined.
//!
//! ```rust
//! use cilweave::assembly::{InstructionAssembler, MethodBody};
//!
//! let mut body = MethodBody::new();
//! let mut asm = InstructionAssembler::new(&mut body);
//! asm.ldarg_0()?
//!     .brtrue("non_zero")?
//!     .ldc_i4_const(0)?
//!     .ret()?
//!     .label("non_zero")?
//!     .ldc_i4_const(1)?
//!     .ret()?;
//! asm.finish()?;
//!
//! assert_eq!(body.len(), 6);
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        body::{ExceptionRegion, MethodBody, RegionKind},
        instruction::{Immediate, InstrId, Instruction, LocalId, Operand},
        opcodes::Opcode,
    },
    metadata::{module::MemberRef, typesig::TypeSig},
    Result,
};

struct LabelState {
    id: InstrId,
    defined: bool,
}

struct PendingRegion {
    kind: RegionKind,
    bounds: [String; 4],
}

/// Fluent emitter over a [`MethodBody`].
pub struct InstructionAssembler<'a> {
    body: &'a mut MethodBody,
    labels: HashMap<String, LabelState>,
    pending: Vec<String>,
    regions: Vec<PendingRegion>,
    last: Option<InstrId>,
}

impl<'a> InstructionAssembler<'a> {
    /// Creates an assembler emitting at the body's cursor.
    pub fn new(body: &'a mut MethodBody) -> Self {
        InstructionAssembler {
            body,
            labels: HashMap::new(),
            pending: Vec::new(),
            regions: Vec::new(),
            last: None,
        }
    }

    /// Id of the most recently emitted instruction.
    #[must_use]
    pub fn last_emitted(&self) -> Option<InstrId> {
        self.last
    }

    /// Id a label resolves to, once referenced or defined.
    #[must_use]
    pub fn label_id(&self, name: &str) -> Option<InstrId> {
        self.labels.get(name).map(|state| state.id)
    }

    /// Declares a local of type `sig`.
    pub fn declare_local(&mut self, sig: TypeSig) -> LocalId {
        self.body.add_local(sig)
    }

    fn label_target(&mut self, name: &str) -> InstrId {
        if let Some(state) = self.labels.get(name) {
            return state.id;
        }
        let id = self.body.create_label(Instruction::simple(Opcode::Nop));
        self.labels
            .insert(name.to_string(), LabelState { id, defined: false });
        id
    }

    /// Defines `name` as the next emitted instruction
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the label is already defined
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        let defined = self.labels.get(name).is_some_and(|state| state.defined);
        if defined || self.pending.iter().any(|p| p == name) {
            return Err(malformed_error!("Duplicate label '{}'", name));
        }
        // A second label before any instruction gets its own nop.
        if !self.pending.is_empty() {
            self.nop()?;
        }
        self.pending.push(name.to_string());
        Ok(self)
    }

    /// Emits an arbitrary instruction
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn emit(&mut self, instruction: Instruction) -> Result<&mut Self> {
        let id = match self.pending.pop() {
            Some(name) => {
                let id = self.label_target(&name);
                self.body.replace(id, instruction)?;
                self.body.mark(id)?;
                if let Some(state) = self.labels.get_mut(&name) {
                    state.defined = true;
                }
                id
            }
            None => self.body.emit(instruction)?,
        };
        self.last = Some(id);
        Ok(self)
    }

    fn emit_branch(&mut self, opcode: Opcode, label: &str) -> Result<&mut Self> {
        let target = self.label_target(label);
        self.emit(Instruction::branch(opcode, target))
    }

    /// Declares a catch region by label names; bounds are `[start, end)`.
    pub fn catch_region(
        &mut self,
        catch_type: TypeSig,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> &mut Self {
        self.regions.push(PendingRegion {
            kind: RegionKind::Catch(catch_type),
            bounds: [try_start, try_end, handler_start, handler_end].map(str::to_string),
        });
        self
    }

    /// Declares a finally region by label names; bounds are `[start, end)`.
    pub fn finally_region(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> &mut Self {
        self.regions.push(PendingRegion {
            kind: RegionKind::Finally,
            bounds: [try_start, try_end, handler_start, handler_end].map(str::to_string),
        });
        self
    }

    /// Resolves labels and regions.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a label is referenced but never defined, or
    /// if a label is defined after the last instruction
    pub fn finish(&mut self) -> Result<()> {
        if let Some(name) = self.pending.first() {
            return Err(malformed_error!("Label '{}' marks no instruction", name));
        }
        if let Some((name, _)) = self.labels.iter().find(|(_, state)| !state.defined) {
            return Err(malformed_error!("Undefined label '{}'", name));
        }

        for region in std::mem::take(&mut self.regions) {
            let mut ids = [InstrId(0); 4];
            for (slot, name) in ids.iter_mut().zip(region.bounds.iter()) {
                *slot = self
                    .labels
                    .get(name)
                    .map(|state| state.id)
                    .ok_or_else(|| malformed_error!("Undefined region label '{}'", name))?;
            }
            self.body.add_region(ExceptionRegion {
                kind: region.kind,
                try_start: ids[0],
                try_end: ids[1],
                handler_start: ids[2],
                handler_end: ids[3],
            });
        }
        Ok(())
    }

    /// `nop`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn nop(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Nop))
    }

    /// `ldarg.0`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldarg_0(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::load_arg(0))
    }

    /// `ldarg.1`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldarg_1(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::load_arg(1))
    }

    /// `ldarg.2`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldarg_2(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::load_arg(2))
    }

    /// Load argument slot `slot` in its shortest form
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldarg(&mut self, slot: u16) -> Result<&mut Self> {
        self.emit(Instruction::load_arg(slot))
    }

    /// Load the address of argument slot `slot`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldarga(&mut self, slot: u16) -> Result<&mut Self> {
        self.emit(Instruction::load_arg_address(slot))
    }

    /// Store into argument slot `slot`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn starg(&mut self, slot: u16) -> Result<&mut Self> {
        self.emit(Instruction::store_arg(slot))
    }

    /// `ldloc.0`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldloc_0(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::load_local(LocalId(0)))
    }

    /// `stloc.0`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn stloc_0(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::store_local(LocalId(0)))
    }

    /// Load local `local` in its shortest form
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldloc(&mut self, local: LocalId) -> Result<&mut Self> {
        self.emit(Instruction::load_local(local))
    }

    /// Load the address of local `local`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldloca(&mut self, local: LocalId) -> Result<&mut Self> {
        self.emit(Instruction::load_local_address(local))
    }

    /// Store into local `local` in its shortest form
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn stloc(&mut self, local: LocalId) -> Result<&mut Self> {
        self.emit(Instruction::store_local(local))
    }

    /// Load a 32-bit constant in its shortest form
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldc_i4_const(&mut self, value: i32) -> Result<&mut Self> {
        self.emit(Instruction::load_i4(value))
    }

    /// `ldc.i8`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldc_i8(&mut self, value: i64) -> Result<&mut Self> {
        self.emit(Instruction::new(
            Opcode::LdcI8,
            Operand::Immediate(Immediate::Int64(value)),
        ))
    }

    /// `ldc.r8`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldc_r8(&mut self, value: f64) -> Result<&mut Self> {
        self.emit(Instruction::new(
            Opcode::LdcR8,
            Operand::Immediate(Immediate::Float64(value)),
        ))
    }

    /// `ldnull`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldnull(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Ldnull))
    }

    /// `ldstr`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldstr(&mut self, value: &str) -> Result<&mut Self> {
        self.emit(Instruction::new(Opcode::Ldstr, Operand::String(value.to_string())))
    }

    /// `dup`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn dup(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Dup))
    }

    /// `pop`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn pop(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Pop))
    }

    /// `add`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn add(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Add))
    }

    /// `sub`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn sub(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Sub))
    }

    /// `mul`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn mul(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Mul))
    }

    /// `div`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn div(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Div))
    }

    /// `ceq`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ceq(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Ceq))
    }

    /// `clt`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn clt(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Clt))
    }

    /// `br` to `label`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn br(&mut self, label: &str) -> Result<&mut Self> {
        self.emit_branch(Opcode::Br, label)
    }

    /// `br.s` to `label`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn br_s(&mut self, label: &str) -> Result<&mut Self> {
        self.emit_branch(Opcode::BrS, label)
    }

    /// `brtrue` to `label`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn brtrue(&mut self, label: &str) -> Result<&mut Self> {
        self.emit_branch(Opcode::Brtrue, label)
    }

    /// `brfalse` to `label`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn brfalse(&mut self, label: &str) -> Result<&mut Self> {
        self.emit_branch(Opcode::Brfalse, label)
    }

    /// `blt` to `label`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn blt(&mut self, label: &str) -> Result<&mut Self> {
        self.emit_branch(Opcode::Blt, label)
    }

    /// `bgt` to `label`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn bgt(&mut self, label: &str) -> Result<&mut Self> {
        self.emit_branch(Opcode::Bgt, label)
    }

    /// `leave` to `label`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn leave(&mut self, label: &str) -> Result<&mut Self> {
        self.emit_branch(Opcode::Leave, label)
    }

    /// `endfinally`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn endfinally(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Endfinally))
    }

    /// `throw`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn throw(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Throw))
    }

    /// `rethrow`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn rethrow(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Rethrow))
    }

    /// `ret`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ret(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Ret))
    }

    /// `tail.` prefix
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn tail(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::Tail))
    }

    /// `jmp` to `member`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn jmp(&mut self, member: MemberRef) -> Result<&mut Self> {
        self.emit(Instruction::method(Opcode::Jmp, member))
    }

    /// `call`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn call(&mut self, member: MemberRef) -> Result<&mut Self> {
        self.emit(Instruction::method(Opcode::Call, member))
    }

    /// `callvirt`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn callvirt(&mut self, member: MemberRef) -> Result<&mut Self> {
        self.emit(Instruction::method(Opcode::Callvirt, member))
    }

    /// `newobj`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn newobj(&mut self, ctor: MemberRef) -> Result<&mut Self> {
        self.emit(Instruction::method(Opcode::Newobj, ctor))
    }

    /// `box`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn box_value(&mut self, sig: TypeSig) -> Result<&mut Self> {
        self.emit(Instruction::typed(Opcode::Box, sig))
    }

    /// `unbox.any`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn unbox_any(&mut self, sig: TypeSig) -> Result<&mut Self> {
        self.emit(Instruction::typed(Opcode::UnboxAny, sig))
    }

    /// `castclass`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn castclass(&mut self, sig: TypeSig) -> Result<&mut Self> {
        self.emit(Instruction::typed(Opcode::Castclass, sig))
    }

    /// `newarr`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn newarr(&mut self, element: TypeSig) -> Result<&mut Self> {
        self.emit(Instruction::typed(Opcode::Newarr, element))
    }

    /// `ldelem.ref`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn ldelem_ref(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::LdelemRef))
    }

    /// `stelem.ref`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cursor is invalid
    pub fn stelem_ref(&mut self) -> Result<&mut Self> {
        self.emit(Instruction::simple(Opcode::StelemRef))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_labels() -> Result<()> {
        let mut body = MethodBody::new();
        let counter = body.add_local(TypeSig::I4);
        let mut asm = InstructionAssembler::new(&mut body);
        asm.ldc_i4_const(0)?
            .stloc(counter)?
            .label("loop")?
            .ldloc(counter)?
            .ldc_i4_const(10)?
            .blt("continue")?
            .ldloc(counter)?
            .ret()?
            .label("continue")?
            .ldloc(counter)?
            .ldc_i4_const(1)?
            .add()?
            .stloc(counter)?
            .br("loop")?;
        asm.finish()?;

        let loop_id = asm.label_id("loop");
        let continue_id = asm.label_id("continue");
        drop(asm);

        let blt = body.at(4).map(Instruction::targets);
        assert_eq!(blt, continue_id.map(|id| vec![id]));
        assert_eq!(body.position(loop_id.unwrap_or(InstrId(u32::MAX))), Some(2));
        assert_eq!(body.len(), 12);
        Ok(())
    }

    #[test]
    fn test_undefined_label() -> Result<()> {
        let mut body = MethodBody::new();
        let mut asm = InstructionAssembler::new(&mut body);
        asm.br("nowhere")?;
        assert!(asm.finish().is_err());
        Ok(())
    }

    #[test]
    fn test_duplicate_label() -> Result<()> {
        let mut body = MethodBody::new();
        let mut asm = InstructionAssembler::new(&mut body);
        asm.label("a")?.nop()?;
        assert!(asm.label("a").is_err());
        Ok(())
    }

    #[test]
    fn test_trailing_label_is_rejected() -> Result<()> {
        let mut body = MethodBody::new();
        let mut asm = InstructionAssembler::new(&mut body);
        asm.ret()?.label("end")?;
        assert!(asm.finish().is_err());
        Ok(())
    }

    #[test]
    fn test_regions_resolve_labels() -> Result<()> {
        let mut body = MethodBody::new();
        let mut asm = InstructionAssembler::new(&mut body);
        asm.label("try")?
            .nop()?
            .leave("end")?
            .label("finally")?
            .endfinally()?
            .label("end")?
            .ret()?
            .finally_region("try", "finally", "finally", "end");
        asm.finish()?;
        drop(asm);

        assert_eq!(body.regions().len(), 1);
        let region = &body.regions()[0];
        assert_eq!(region.kind, RegionKind::Finally);
        assert_eq!(body.position(region.handler_start), Some(2));
        assert_eq!(body.position(region.handler_end), Some(3));
        Ok(())
    }
}
