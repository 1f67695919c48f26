//! Byte-level encoding of method bodies.
//!
//! [`BodyEncoder`] turns a symbolic [`MethodBody`] into the ECMA-335 method body format: a
//! tiny or fat header, the CIL byte stream and, when the body has exception regions, a fat
//! exception-handling section. Encoding happens in four passes:
//!
//! 1. **Branch sizing**: every long branch whose displacement fits in a signed byte is
//!    shrunk to its short form, repeated until no more branches shrink. Shrinking only ever
//!    reduces distances, so the process converges.
//! 2. **Emission**: opcodes and operands are written out; symbolic operands are resolved to
//!    tokens through a [`TokenResolver`].
//! 3. **Stack analysis**: the maximum evaluation stack depth is computed with a worklist over
//!    branch targets and handler entries, rejecting underflows and inconsistent depths.
//! 4. **Framing**: the header and the exception-handling section are added.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::assembly::{BodyEncoder, InstructionAssembler, MethodBody};
//! use cilweave::metadata::ImportTables;
//!
//! let mut body = MethodBody::new();
//! let mut asm = InstructionAssembler::new(&mut body);
//! asm.ldc_i4_const(1)?.ret()?;
//! asm.finish()?;
//!
//! let mut imports = ImportTables::default();
//! let encoded = BodyEncoder::new(&mut imports, true).encode(&body)?;
//! assert_eq!(encoded.code, vec![0x17, 0x2A]);
//! assert_eq!(encoded.max_stack, 1);
//! assert!(encoded.is_tiny);
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        body::{MethodBody, RegionKind},
        instruction::{FlowType, Immediate, InstrId, Instruction, Operand, OperandType},
        opcodes::{Opcode, PREFIX_FE},
    },
    metadata::{module::TokenResolver, token::Token},
    Result,
};

/// Fat header flag.
const CORILMETHOD_FAT_FORMAT: u16 = 0x0003;
/// Tiny header flag.
const CORILMETHOD_TINY_FORMAT: u8 = 0x02;
/// More sections follow the code.
const CORILMETHOD_MORE_SECTS: u16 = 0x0008;
/// Zero-initialize locals.
const CORILMETHOD_INIT_LOCALS: u16 = 0x0010;
/// Fat header size in 4-byte units, stored in the high nibble of the flags.
const FAT_HEADER_SIZE: u16 = 3 << 12;
/// Exception-handling section kind with fat clauses.
const SECT_EH_TABLE_FAT: u8 = 0x41;
/// Size of one fat exception-handling clause.
const FAT_CLAUSE_SIZE: usize = 24;

/// Clause flag of a typed catch handler.
const CLAUSE_EXCEPTION: u32 = 0x0000;
/// Clause flag of a finally handler.
const CLAUSE_FINALLY: u32 = 0x0002;

/// An encoded method body.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    /// Complete body: header, code and exception-handling section.
    pub bytes: Vec<u8>,
    /// The CIL byte stream alone.
    pub code: Vec<u8>,
    /// Maximum evaluation stack depth.
    pub max_stack: u16,
    /// `StandAloneSig` token of the local signature, null without locals.
    pub local_var_sig: Token,
    /// Whether the tiny header format was used.
    pub is_tiny: bool,
    /// Byte offset of every placed instruction.
    pub offsets: HashMap<InstrId, u32>,
}

/// Encoder of [`MethodBody`] values into the method body format.
pub struct BodyEncoder<'r, R: TokenResolver> {
    resolver: &'r mut R,
    returns_value: bool,
}

impl<'r, R: TokenResolver> BodyEncoder<'r, R> {
    /// Creates an encoder; `returns_value` tells whether `ret` pops a value.
    pub fn new(resolver: &'r mut R, returns_value: bool) -> Self {
        BodyEncoder {
            resolver,
            returns_value,
        }
    }

    /// Encodes `body`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a branch targets an unplaced instruction, a
    /// short branch or short slot operand is out of range, an operand does not match its
    /// opcode, the stack underflows or has inconsistent depths, or control falls off the
    /// end of the body
    pub fn encode(&mut self, body: &MethodBody) -> Result<EncodedBody> {
        let index: HashMap<InstrId, usize> = body
            .ids()
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();

        let instructions: Vec<&Instruction> = body.iter().map(|(_, i)| i).collect();
        for instruction in &instructions {
            for target in instruction.targets() {
                if !index.contains_key(&target) {
                    return Err(malformed_error!(
                        "{} targets unplaced instruction {:?}",
                        instruction.mnemonic(),
                        target
                    ));
                }
            }
        }

        let opcodes = size_branches(&instructions, &index);
        let offsets = layout(&instructions, &opcodes);

        let mut code = Vec::new();
        for (position, instruction) in instructions.iter().enumerate() {
            let opcode = opcodes[position];
            let next = offsets[position + 1];
            write_opcode(&mut code, opcode);
            self.write_operand(&mut code, opcode, instruction, next, &offsets, &index)?;
        }

        let max_stack = max_stack(body, &instructions, &index, self.returns_value)?;

        let local_var_sig = if body.locals().is_empty() {
            Token::default()
        } else {
            self.resolver.locals_token(body.locals())?
        };

        let code_size = u32::try_from(code.len())
            .map_err(|_| malformed_error!("Code size exceeds u32 range"))?;
        let is_tiny = code.len() < 64
            && max_stack <= 8
            && body.locals().is_empty()
            && body.regions().is_empty();

        let mut bytes = Vec::with_capacity(code.len() + 12);
        if is_tiny {
            #[allow(clippy::cast_possible_truncation)]
            bytes.push(((code.len() as u8) << 2) | CORILMETHOD_TINY_FORMAT);
        } else {
            let mut flags = FAT_HEADER_SIZE | CORILMETHOD_FAT_FORMAT;
            if !body.regions().is_empty() {
                flags |= CORILMETHOD_MORE_SECTS;
            }
            if body.init_locals && !body.locals().is_empty() {
                flags |= CORILMETHOD_INIT_LOCALS;
            }
            bytes.extend_from_slice(&flags.to_le_bytes());
            bytes.extend_from_slice(&max_stack.to_le_bytes());
            bytes.extend_from_slice(&code_size.to_le_bytes());
            bytes.extend_from_slice(&local_var_sig.value().to_le_bytes());
        }
        bytes.extend_from_slice(&code);

        if !body.regions().is_empty() {
            while bytes.len() % 4 != 0 {
                bytes.push(0);
            }
            self.write_eh_section(&mut bytes, body, &offsets, &index)?;
        }

        let offsets = body
            .ids()
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, offsets[position]))
            .collect();

        Ok(EncodedBody {
            bytes,
            code,
            max_stack,
            local_var_sig,
            is_tiny,
            offsets,
        })
    }

    fn write_operand(
        &mut self,
        code: &mut Vec<u8>,
        opcode: Opcode,
        instruction: &Instruction,
        next: u32,
        offsets: &[u32],
        index: &HashMap<InstrId, usize>,
    ) -> Result<()> {
        let mismatch = || {
            malformed_error!(
                "Operand {:?} does not fit {}",
                instruction.operand,
                opcode.mnemonic()
            )
        };

        match (opcode.operand_type(), &instruction.operand) {
            (OperandType::None, Operand::None) => {}
            (OperandType::None, _) => {
                // Implied-operand forms (ldarg.0, ldloc.1) may carry their slot.
                if !matches!(instruction.operand, Operand::Argument(_) | Operand::Local(_)) {
                    return Err(mismatch());
                }
            }
            (OperandType::Int8, Operand::Target(target)) => {
                let displacement = displacement(offsets, index, *target, next)?;
                let short = i8::try_from(displacement).map_err(|_| {
                    malformed_error!(
                        "{} displacement {} out of range",
                        opcode.mnemonic(),
                        displacement
                    )
                })?;
                code.extend_from_slice(&short.to_le_bytes());
            }
            (OperandType::Int32, Operand::Target(target)) => {
                let displacement = displacement(offsets, index, *target, next)?;
                code.extend_from_slice(&displacement.to_le_bytes());
            }
            (OperandType::Int8, Operand::Immediate(Immediate::Int8(value))) => {
                code.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Int32, Operand::Immediate(Immediate::Int32(value))) => {
                code.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Int64, Operand::Immediate(Immediate::Int64(value))) => {
                code.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Float32, Operand::Immediate(Immediate::Float32(value))) => {
                code.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::Float64, Operand::Immediate(Immediate::Float64(value))) => {
                code.extend_from_slice(&value.to_le_bytes());
            }
            (OperandType::UInt8, Operand::Argument(slot)) => {
                let slot = u8::try_from(*slot)
                    .map_err(|_| malformed_error!("Argument {} needs the long form", slot))?;
                code.push(slot);
            }
            (OperandType::UInt8, Operand::Local(local)) => {
                let slot = u8::try_from(local.0)
                    .map_err(|_| malformed_error!("Local {} needs the long form", local.0))?;
                code.push(slot);
            }
            (OperandType::UInt16, Operand::Argument(slot)) => {
                code.extend_from_slice(&slot.to_le_bytes());
            }
            (OperandType::UInt16, Operand::Local(local)) => {
                code.extend_from_slice(&local.0.to_le_bytes());
            }
            (OperandType::Token, Operand::Method(member)) => {
                let token = self.resolver.member_token(member)?;
                code.extend_from_slice(&token.value().to_le_bytes());
            }
            (OperandType::Token, Operand::Type(sig)) => {
                let token = self.resolver.type_token(sig)?;
                code.extend_from_slice(&token.value().to_le_bytes());
            }
            (OperandType::Token, Operand::String(value)) if opcode == Opcode::Ldstr => {
                let token = self.resolver.string_token(value)?;
                code.extend_from_slice(&token.value().to_le_bytes());
            }
            (OperandType::Switch, Operand::Switch(targets)) => {
                let count = u32::try_from(targets.len())
                    .map_err(|_| malformed_error!("Switch table too large"))?;
                code.extend_from_slice(&count.to_le_bytes());
                for target in targets {
                    let displacement = displacement(offsets, index, *target, next)?;
                    code.extend_from_slice(&displacement.to_le_bytes());
                }
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }

    fn write_eh_section(
        &mut self,
        bytes: &mut Vec<u8>,
        body: &MethodBody,
        offsets: &[u32],
        index: &HashMap<InstrId, usize>,
    ) -> Result<()> {
        let data_size = 4 + body.regions().len() * FAT_CLAUSE_SIZE;
        let data_size = u32::try_from(data_size)
            .ok()
            .filter(|size| *size <= 0x00FF_FFFF)
            .ok_or_else(|| malformed_error!("Too many exception regions"))?;

        bytes.push(SECT_EH_TABLE_FAT);
        bytes.extend_from_slice(&data_size.to_le_bytes()[..3]);

        let offset_of = |id: InstrId| -> Result<u32> {
            index
                .get(&id)
                .map(|position| offsets[*position])
                .ok_or_else(|| malformed_error!("Region bound {:?} is not placed", id))
        };

        for region in body.regions() {
            let try_start = offset_of(region.try_start)?;
            let try_end = offset_of(region.try_end)?;
            let handler_start = offset_of(region.handler_start)?;
            let handler_end = offset_of(region.handler_end)?;
            if try_end <= try_start || handler_end <= handler_start {
                return Err(malformed_error!(
                    "Exception region at {:?} has an empty range",
                    region.try_start
                ));
            }

            let (flags, class_token) = match &region.kind {
                RegionKind::Catch(sig) => {
                    (CLAUSE_EXCEPTION, self.resolver.type_token(sig)?.value())
                }
                RegionKind::Finally => (CLAUSE_FINALLY, 0),
            };

            for value in [
                flags,
                try_start,
                try_end - try_start,
                handler_start,
                handler_end - handler_start,
                class_token,
            ] {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        Ok(())
    }
}

fn instruction_size(instruction: &Instruction, opcode: Opcode) -> u32 {
    let operand = match opcode.operand_type() {
        OperandType::Switch => 4 + 4 * instruction.targets().len(),
        other => other.size().unwrap_or(0),
    };
    #[allow(clippy::cast_possible_truncation)]
    let size = (opcode.size() + operand) as u32;
    size
}

/// Start offset of every instruction, plus the total code size as the last element.
fn layout(instructions: &[&Instruction], opcodes: &[Opcode]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0u32;
    for (instruction, opcode) in instructions.iter().zip(opcodes) {
        offsets.push(offset);
        offset += instruction_size(instruction, *opcode);
    }
    offsets.push(offset);
    offsets
}

fn size_branches(instructions: &[&Instruction], index: &HashMap<InstrId, usize>) -> Vec<Opcode> {
    let mut opcodes: Vec<Opcode> = instructions.iter().map(|i| i.opcode).collect();

    loop {
        let offsets = layout(instructions, &opcodes);
        let mut changed = false;

        for (position, instruction) in instructions.iter().enumerate() {
            let Some(short) = opcodes[position].short_form() else {
                continue;
            };
            let Some(target) = instruction.targets().first().and_then(|t| index.get(t)) else {
                continue;
            };

            let short_end = i64::from(offsets[position]) + 2;
            let displacement = i64::from(offsets[*target]) - short_end;
            if (i64::from(i8::MIN)..=i64::from(i8::MAX)).contains(&displacement) {
                opcodes[position] = short;
                changed = true;
            }
        }

        if !changed {
            return opcodes;
        }
    }
}

fn displacement(
    offsets: &[u32],
    index: &HashMap<InstrId, usize>,
    target: InstrId,
    next: u32,
) -> Result<i32> {
    let target = index
        .get(&target)
        .map(|position| offsets[*position])
        .ok_or_else(|| malformed_error!("Branch target {:?} is not placed", target))?;
    let target = i32::try_from(target)
        .map_err(|_| malformed_error!("Label position exceeds i32 range"))?;
    let next = i32::try_from(next)
        .map_err(|_| malformed_error!("Instruction position exceeds i32 range"))?;
    Ok(target - next)
}

fn write_opcode(code: &mut Vec<u8>, opcode: Opcode) {
    let value = opcode.code();
    if opcode.size() == 2 {
        code.push(PREFIX_FE);
    }
    #[allow(clippy::cast_possible_truncation)]
    code.push(value as u8);
}

fn max_stack(
    body: &MethodBody,
    instructions: &[&Instruction],
    index: &HashMap<InstrId, usize>,
    returns_value: bool,
) -> Result<u16> {
    if instructions.is_empty() {
        return Ok(0);
    }

    let mut depths: Vec<Option<u16>> = vec![None; instructions.len()];
    let mut work: Vec<(usize, u16)> = vec![(0, 0)];
    for region in body.regions() {
        if let Some(position) = index.get(&region.handler_start) {
            let entry = match region.kind {
                RegionKind::Catch(_) => 1,
                RegionKind::Finally => 0,
            };
            work.push((*position, entry));
        }
    }

    let mut max = 0u16;
    while let Some((position, depth)) = work.pop() {
        let Some(instruction) = instructions.get(position) else {
            return Err(malformed_error!("Control falls off the end of the method body"));
        };

        match depths[position] {
            Some(existing) if existing == depth => continue,
            Some(existing) => {
                return Err(malformed_error!(
                    "Inconsistent stack depth at {}: {} and {}",
                    instruction.mnemonic(),
                    existing,
                    depth
                ))
            }
            None => depths[position] = Some(depth),
        }

        let behavior = instruction.stack_behavior(returns_value);
        let pops = u16::from(behavior.pops);
        if depth < pops {
            return Err(malformed_error!(
                "Stack underflow at {}: depth {} with {} pops",
                instruction.mnemonic(),
                depth,
                pops
            ));
        }
        let after = depth - pops + u16::from(behavior.pushes);
        max = max.max(depth).max(after);

        let targets: Vec<usize> = instruction
            .targets()
            .iter()
            .filter_map(|t| index.get(t).copied())
            .collect();
        match instruction.flow_type() {
            FlowType::Sequential | FlowType::Call if instruction.opcode != Opcode::Jmp => {
                work.push((position + 1, after));
            }
            FlowType::ConditionalBranch | FlowType::Switch => {
                work.push((position + 1, after));
                work.extend(targets.into_iter().map(|t| (t, after)));
            }
            FlowType::UnconditionalBranch => work.extend(targets.into_iter().map(|t| (t, after))),
            FlowType::Leave => work.extend(targets.into_iter().map(|t| (t, 0))),
            _ => {}
        }
    }

    Ok(max)
}
