//! Typed storage locations: locals and argument slots.

use crate::{
    assembly::{
        instruction::{Instruction, LocalId},
        opcodes::Opcode,
    },
    metadata::typesig::TypeSig,
};

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A local of the method body.
    Local(LocalId),
    /// An argument slot; slot 0 is `this` on instance methods.
    Argument(u16),
}

/// A storage location together with its static type.
///
/// The type decides how values cross an `object`-typed boundary, see
/// [`crate::weaver::Conversion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Storage location.
    pub slot: Slot,
    /// Static type.
    pub sig: TypeSig,
}

impl Variable {
    /// A local variable.
    #[must_use]
    pub fn local(id: LocalId, sig: TypeSig) -> Self {
        Variable {
            slot: Slot::Local(id),
            sig,
        }
    }

    /// An argument slot.
    #[must_use]
    pub fn argument(slot: u16, sig: TypeSig) -> Self {
        Variable {
            slot: Slot::Argument(slot),
            sig,
        }
    }

    /// Push the variable's value.
    #[must_use]
    pub fn load(&self) -> Instruction {
        match self.slot {
            Slot::Local(id) => Instruction::load_local(id),
            Slot::Argument(slot) => Instruction::load_arg(slot),
        }
    }

    /// Pop a value into the variable.
    #[must_use]
    pub fn store(&self) -> Instruction {
        match self.slot {
            Slot::Local(id) => Instruction::store_local(id),
            Slot::Argument(slot) => Instruction::store_arg(slot),
        }
    }

    /// Push the variable's address.
    #[must_use]
    pub fn address(&self) -> Instruction {
        match self.slot {
            Slot::Local(id) => Instruction::load_local_address(id),
            Slot::Argument(slot) => Instruction::load_arg_address(slot),
        }
    }

    /// The local behind the variable, if it is one.
    #[must_use]
    pub fn as_local(&self) -> Option<LocalId> {
        match self.slot {
            Slot::Local(id) => Some(id),
            Slot::Argument(_) => None,
        }
    }

    /// Push the value the variable refers to, reading through by-ref slots.
    #[must_use]
    pub fn value(&self) -> Vec<Instruction> {
        let mut code = vec![self.load()];
        if self.sig.is_by_ref() {
            code.push(Instruction::typed(Opcode::Ldobj, self.sig.strip_by_ref().clone()));
        }
        code
    }

    /// Store the value on top of the stack into what the variable refers to.
    ///
    /// By-ref slots are written through: the first instruction pushes the target address
    /// and has to be emitted before the value.
    #[must_use]
    pub fn assign(&self) -> (Option<Instruction>, Instruction) {
        if self.sig.is_by_ref() {
            (
                Some(self.load()),
                Instruction::typed(Opcode::Stobj, self.sig.strip_by_ref().clone()),
            )
        } else {
            (None, self.store())
        }
    }

    /// Reset the variable to the default value of its type.
    #[must_use]
    pub fn initialize(&self) -> Vec<Instruction> {
        if self.sig.is_value_type() || self.sig.is_generic_param() {
            vec![
                self.address(),
                Instruction::typed(Opcode::Initobj, self.sig.clone()),
            ]
        } else {
            vec![Instruction::simple(Opcode::Ldnull), self.store()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_and_argument_access() {
        let local = Variable::local(LocalId(5), TypeSig::I4);
        assert_eq!(local.load().opcode, Opcode::LdlocS);
        assert_eq!(local.store().opcode, Opcode::StlocS);
        assert_eq!(local.address().opcode, Opcode::LdlocaS);

        let argument = Variable::argument(1, TypeSig::String);
        assert_eq!(argument.load().opcode, Opcode::Ldarg1);
        assert_eq!(argument.store().opcode, Opcode::StargS);
        assert_eq!(argument.address().loaded_argument(), Some(1));
    }

    #[test]
    fn test_by_ref_argument_is_read_and_written_through() {
        let argument = Variable::argument(2, TypeSig::by_ref(TypeSig::I4));
        let value: Vec<Opcode> = argument.value().iter().map(|i| i.opcode).collect();
        assert_eq!(value, [Opcode::Ldarg2, Opcode::Ldobj]);

        let (address, store) = argument.assign();
        assert_eq!(address.map(|i| i.opcode), Some(Opcode::Ldarg2));
        assert_eq!(store.opcode, Opcode::Stobj);
        assert_eq!(argument.as_local(), None);

        let plain = Variable::argument(2, TypeSig::I4);
        assert_eq!(plain.value().len(), 1);
        let (address, store) = plain.assign();
        assert!(address.is_none());
        assert_eq!(store.opcode, Opcode::StargS);
    }

    #[test]
    fn test_initialize_by_kind() {
        let number = Variable::local(LocalId(0), TypeSig::I4);
        let code: Vec<Opcode> = number.initialize().iter().map(|i| i.opcode).collect();
        assert_eq!(code, [Opcode::LdlocaS, Opcode::Initobj]);

        let text = Variable::local(LocalId(0), TypeSig::String);
        let code: Vec<Opcode> = text.initialize().iter().map(|i| i.opcode).collect();
        assert_eq!(code, [Opcode::Ldnull, Opcode::Stloc0]);
        assert_eq!(text.as_local(), Some(LocalId(0)));
    }
}
