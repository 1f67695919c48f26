//! Arena-backed, mutable method bodies.
//!
//! A [`MethodBody`] owns every instruction it has ever created in an arena indexed by
//! [`InstrId`], and separately the order in which the placed ones execute. Inserting an
//! instruction only touches the order; replacing one overwrites its arena slot. Either way
//! the ids held by branch operands, [`ExceptionRegion`] bounds and the emission [`Cursor`]
//! keep naming the same logical instruction.
//!
//! # Emission cursor
//!
//! [`MethodBody::emit`] writes at the cursor. With [`Insertion::Before`] the new
//! instruction goes in front of the cursor position and the cursor stays put; with
//! [`Insertion::After`] it goes behind the position and the cursor advances onto it.
//! Consecutive emissions therefore come out in emission order in both modes. A cursor
//! without position appends to the end of the body.
//!
//! ```rust
//! use cilweave::assembly::{Cursor, Instruction, MethodBody, Opcode};
//!
//! let mut body = MethodBody::new();
//! let ret = body.push(Instruction::simple(Opcode::Ret));
//! body.cursor = Cursor::before(ret);
//! body.emit(Instruction::load_i4(1))?;
//! body.emit(Instruction::simple(Opcode::Pop))?;
//!
//! let mnemonics: Vec<&str> = body.iter().map(|(_, i)| i.mnemonic()).collect();
//! assert_eq!(mnemonics, ["ldc.i4.1", "pop", "ret"]);
//! # Ok::<(), cilweave::Error>(())
//! ```

use crate::{
    assembly::instruction::{InstrId, Instruction, LocalId},
    metadata::typesig::TypeSig,
    Result,
};

/// Where [`MethodBody::emit`] places new instructions relative to the cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Insertion {
    /// In front of the position; the cursor does not move.
    #[default]
    Before,
    /// Behind the position; the cursor advances onto the new instruction.
    After,
}

/// The emission cursor of a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    /// Anchor instruction, `None` to append.
    pub position: Option<InstrId>,
    /// Insertion mode.
    pub insertion: Insertion,
}

impl Cursor {
    /// Emit in front of `position`.
    #[must_use]
    pub fn before(position: InstrId) -> Self {
        Cursor {
            position: Some(position),
            insertion: Insertion::Before,
        }
    }

    /// Emit behind `position`, advancing with every instruction.
    #[must_use]
    pub fn after(position: InstrId) -> Self {
        Cursor {
            position: Some(position),
            insertion: Insertion::After,
        }
    }

    /// Emit at the end of the body.
    #[must_use]
    pub fn end() -> Self {
        Cursor::default()
    }
}

/// What an exception region's handler does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionKind {
    /// A typed catch handler.
    Catch(TypeSig),
    /// A handler that runs on every exit from the protected range.
    Finally,
}

/// A protected range and its handler.
///
/// Both ranges are given as `[start, end)`: the end bound is the first instruction after
/// the range, so a region stays well-formed while instructions are inserted inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Handler kind.
    pub kind: RegionKind,
    /// First protected instruction.
    pub try_start: InstrId,
    /// First instruction after the protected range.
    pub try_end: InstrId,
    /// First handler instruction.
    pub handler_start: InstrId,
    /// First instruction after the handler.
    pub handler_end: InstrId,
}

impl ExceptionRegion {
    /// Returns `true` if `id` lies inside the protected range.
    #[must_use]
    pub fn try_contains(&self, body: &MethodBody, id: InstrId) -> bool {
        body.range_contains(self.try_start, self.try_end, id)
    }

    /// Returns `true` if `id` lies inside the handler.
    #[must_use]
    pub fn handler_contains(&self, body: &MethodBody, id: InstrId) -> bool {
        body.range_contains(self.handler_start, self.handler_end, id)
    }

    /// Returns `true` if `id` lies inside the protected range or the handler.
    #[must_use]
    pub fn contains(&self, body: &MethodBody, id: InstrId) -> bool {
        self.try_contains(body, id) || self.handler_contains(body, id)
    }
}

/// A mutable method body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodBody {
    arena: Vec<Instruction>,
    order: Vec<InstrId>,
    locals: Vec<TypeSig>,
    regions: Vec<ExceptionRegion>,
    /// Zero-initialize locals on entry.
    pub init_locals: bool,
    /// The emission cursor.
    pub cursor: Cursor,
}

impl MethodBody {
    /// An empty body.
    #[must_use]
    pub fn new() -> Self {
        MethodBody {
            init_locals: true,
            ..Default::default()
        }
    }

    /// Number of placed instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no instruction is placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Placed instruction ids, in execution order.
    #[must_use]
    pub fn ids(&self) -> &[InstrId] {
        &self.order
    }

    /// Placed instructions, in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.order.iter().map(move |id| (*id, &self.arena[id.index()]))
    }

    /// The instruction with id `id`, placed or not.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.arena.get(id.index())
    }

    /// The instruction at position `index` of the execution order.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Instruction> {
        self.order.get(index).map(|id| &self.arena[id.index()])
    }

    /// First placed instruction.
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.order.first().copied()
    }

    /// Last placed instruction.
    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.order.last().copied()
    }

    /// Position of `id` in the execution order, `None` while unplaced.
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// Returns `true` if `id` is part of the execution order.
    #[must_use]
    pub fn is_placed(&self, id: InstrId) -> bool {
        self.position(id).is_some()
    }

    /// The placed instruction following `id`.
    #[must_use]
    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.position(id)
            .and_then(|position| self.order.get(position + 1))
            .copied()
    }

    /// Allocates an instruction without placing it.
    ///
    /// The returned id can be used as a branch target or region bound right away and is
    /// placed later with [`MethodBody::mark`].
    pub fn create_label(&mut self, instruction: Instruction) -> InstrId {
        #[allow(clippy::cast_possible_truncation)]
        let id = InstrId(self.arena.len() as u32);
        self.arena.push(instruction);
        id
    }

    /// Appends an instruction at the end, ignoring the cursor.
    pub fn push(&mut self, instruction: Instruction) -> InstrId {
        let id = self.create_label(instruction);
        self.order.push(id);
        id
    }

    /// Places a new instruction at the cursor
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the cursor position is not placed
    pub fn emit(&mut self, instruction: Instruction) -> Result<InstrId> {
        let id = self.create_label(instruction);
        self.mark(id)?;
        Ok(id)
    }

    /// Places a previously created label at the cursor
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `label` was never created or is already
    /// placed, or if the cursor position is not placed
    pub fn mark(&mut self, label: InstrId) -> Result<()> {
        if label.index() >= self.arena.len() {
            return Err(malformed_error!("Label {:?} does not belong to this body", label));
        }
        if self.is_placed(label) {
            return Err(malformed_error!("Label {:?} is already placed", label));
        }

        match self.cursor.position {
            None => self.order.push(label),
            Some(anchor) => {
                let position = self
                    .position(anchor)
                    .ok_or_else(|| malformed_error!("Cursor anchor {:?} is not placed", anchor))?;
                match self.cursor.insertion {
                    Insertion::Before => self.order.insert(position, label),
                    Insertion::After => {
                        self.order.insert(position + 1, label);
                        self.cursor.position = Some(label);
                    }
                }
            }
        }
        Ok(())
    }

    /// Places a new instruction directly in front of `anchor`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `anchor` is not placed
    pub fn insert_before(&mut self, anchor: InstrId, instruction: Instruction) -> Result<InstrId> {
        let position = self
            .position(anchor)
            .ok_or_else(|| malformed_error!("Anchor {:?} is not placed", anchor))?;
        let id = self.create_label(instruction);
        self.order.insert(position, id);
        Ok(id)
    }

    /// Places a new instruction directly behind `anchor`
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `anchor` is not placed
    pub fn insert_after(&mut self, anchor: InstrId, instruction: Instruction) -> Result<InstrId> {
        let position = self
            .position(anchor)
            .ok_or_else(|| malformed_error!("Anchor {:?} is not placed", anchor))?;
        let id = self.create_label(instruction);
        self.order.insert(position + 1, id);
        Ok(id)
    }

    /// Overwrites the instruction with id `id`, keeping its identity and position
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `id` does not belong to this body
    pub fn replace(&mut self, id: InstrId, instruction: Instruction) -> Result<Instruction> {
        let slot = self
            .arena
            .get_mut(id.index())
            .ok_or_else(|| malformed_error!("Instruction {:?} does not belong to this body", id))?;
        Ok(std::mem::replace(slot, instruction))
    }

    /// Declares a new local of type `sig`.
    pub fn add_local(&mut self, sig: TypeSig) -> LocalId {
        #[allow(clippy::cast_possible_truncation)]
        let id = LocalId(self.locals.len() as u16);
        self.locals.push(sig);
        id
    }

    /// Type of local `id`.
    #[must_use]
    pub fn local(&self, id: LocalId) -> Option<&TypeSig> {
        self.locals.get(usize::from(id.0))
    }

    /// All local types, in slot order.
    #[must_use]
    pub fn locals(&self) -> &[TypeSig] {
        &self.locals
    }

    /// Adds an exception region; regions are kept innermost first, so nested regions must
    /// be added before the regions enclosing them
    pub fn add_region(&mut self, region: ExceptionRegion) {
        self.regions.push(region);
    }

    /// Exception regions, innermost first.
    #[must_use]
    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    /// Returns `true` if `id` lies in the protected range or handler of any region.
    #[must_use]
    pub fn in_any_region(&self, id: InstrId) -> bool {
        self.regions.iter().any(|region| region.contains(self, id))
    }

    /// Returns `true` if `id` lies in `[start, end)` of the execution order.
    #[must_use]
    pub fn range_contains(&self, start: InstrId, end: InstrId, id: InstrId) -> bool {
        match (self.position(start), self.position(end), self.position(id)) {
            (Some(start), Some(end), Some(id)) => start <= id && id < end,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes::Opcode;

    fn mnemonics(body: &MethodBody) -> Vec<&'static str> {
        body.iter().map(|(_, i)| i.mnemonic()).collect()
    }

    #[test]
    fn test_emit_after_advances_cursor() -> Result<()> {
        let mut body = MethodBody::new();
        let first = body.push(Instruction::simple(Opcode::Nop));
        body.push(Instruction::simple(Opcode::Ret));

        body.cursor = Cursor::after(first);
        let a = body.emit(Instruction::load_i4(1))?;
        let b = body.emit(Instruction::simple(Opcode::Pop))?;

        assert_eq!(mnemonics(&body), ["nop", "ldc.i4.1", "pop", "ret"]);
        assert_eq!(body.cursor.position, Some(b));
        assert_eq!(body.next(a), Some(b));
        Ok(())
    }

    #[test]
    fn test_emit_before_keeps_cursor() -> Result<()> {
        let mut body = MethodBody::new();
        let ret = body.push(Instruction::simple(Opcode::Ret));

        body.cursor = Cursor::before(ret);
        body.emit(Instruction::load_i4(1))?;
        body.emit(Instruction::simple(Opcode::Pop))?;

        assert_eq!(mnemonics(&body), ["ldc.i4.1", "pop", "ret"]);
        assert_eq!(body.cursor.position, Some(ret));
        Ok(())
    }

    #[test]
    fn test_labels_keep_identity() -> Result<()> {
        let mut body = MethodBody::new();
        let target = body.create_label(Instruction::simple(Opcode::Ret));
        let branch = body.push(Instruction::branch(Opcode::Br, target));
        assert!(!body.is_placed(target));

        body.cursor = Cursor::end();
        body.mark(target)?;
        assert_eq!(body.position(target), Some(1));
        assert!(body.mark(target).is_err());

        let old = body.replace(target, Instruction::simple(Opcode::Nop))?;
        assert_eq!(old.opcode, Opcode::Ret);
        assert_eq!(body.get(branch).map(Instruction::targets), Some(vec![target]));
        assert_eq!(body.at(1).map(|i| i.opcode), Some(Opcode::Nop));
        Ok(())
    }

    #[test]
    fn test_unplaced_cursor_is_an_error() {
        let mut body = MethodBody::new();
        let label = body.create_label(Instruction::simple(Opcode::Nop));
        body.cursor = Cursor::before(label);
        assert!(body.emit(Instruction::simple(Opcode::Ret)).is_err());
    }

    #[test]
    fn test_region_ranges_follow_insertions() -> Result<()> {
        let mut body = MethodBody::new();
        let try_start = body.push(Instruction::simple(Opcode::Nop));
        let handler = body.push(Instruction::simple(Opcode::Endfinally));
        let end = body.push(Instruction::simple(Opcode::Ret));
        body.add_region(ExceptionRegion {
            kind: RegionKind::Finally,
            try_start,
            try_end: handler,
            handler_start: handler,
            handler_end: end,
        });

        let inside = body.insert_after(try_start, Instruction::load_i4(5))?;
        let region = &body.regions()[0];
        assert!(region.try_contains(&body, inside));
        assert!(!region.try_contains(&body, handler));
        assert!(region.handler_contains(&body, handler));
        assert!(body.in_any_region(inside));
        assert!(!body.in_any_region(end));
        Ok(())
    }
}
