//! Exit path normalization.
//!
//! Interception needs a single place where the method returns: the cleanup region must
//! close in front of it and the result must be read back from the hook payload there.
//! [`ExitPathNormalizer`] rewrites a body with any number of `ret` instructions so that
//! exactly one remains, appended at the end:
//!
//! ```text
//! value-returning                      void
//! ---------------                      ----
//! ...                                  ...
//! stloc  result     <- was ret         leave  EXIT   <- was ret
//! leave  EXIT                          ...
//! ...                                  EXIT: ret
//! EXIT: ldloc result
//!       ret
//! ```
//!
//! Former exits are replaced in place, so branches that targeted them keep targeting the
//! same instruction id. `leave` is used instead of `br` because it stays legal once the
//! body is wrapped in a protected region.

use crate::{
    assembly::{InstrId, Instruction, LocalId, MethodBody, Opcode},
    metadata::TypeSig,
    Result,
};

/// The canonical exit produced by [`ExitPathNormalizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedExit {
    /// First instruction of the exit sequence; the target of every former exit.
    pub exit: InstrId,
    /// The sole `ret`.
    pub ret: InstrId,
    /// Local holding the result, `None` for void methods.
    pub result: Option<LocalId>,
    /// Number of original exits that were rewritten.
    pub replaced: usize,
}

/// Rewrites a body to have exactly one exit instruction.
pub struct ExitPathNormalizer<'a> {
    body: &'a mut MethodBody,
    returns: &'a TypeSig,
}

impl<'a> ExitPathNormalizer<'a> {
    /// Creates a normalizer for a body returning `returns`.
    pub fn new(body: &'a mut MethodBody, returns: &'a TypeSig) -> Self {
        ExitPathNormalizer { body, returns }
    }

    /// Normalizes the body, allocating a result local for value-returning methods.
    ///
    /// # Errors
    /// See [`ExitPathNormalizer::normalize_with_result`]
    pub fn normalize(self) -> Result<NormalizedExit> {
        let result = if self.returns.is_void() {
            None
        } else {
            Some(self.body.add_local(self.returns.clone()))
        };
        self.normalize_with_result(result)
    }

    /// Normalizes the body, storing results in `result`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Structural`] if the body contains `jmp` or a `tail.` call,
    /// a `ret` inside an exception region, if a value-returning method has no result
    /// local, or if more than one exit remains afterwards
    pub fn normalize_with_result(self, result: Option<LocalId>) -> Result<NormalizedExit> {
        let body = self.body;

        if self.returns.is_void() != result.is_none() {
            return Err(structural_error!(
                "Result local does not match return type {}",
                self.returns
            ));
        }

        let mut exits = Vec::new();
        for (id, instruction) in body.iter() {
            match instruction.opcode {
                Opcode::Jmp => {
                    return Err(structural_error!("jmp at {:?} cannot be normalized", id))
                }
                Opcode::Tail => {
                    return Err(structural_error!("tail. call at {:?} cannot be normalized", id))
                }
                Opcode::Ret => {
                    if body.in_any_region(id) {
                        return Err(structural_error!(
                            "ret at {:?} inside an exception region",
                            id
                        ));
                    }
                    exits.push(id);
                }
                _ => {}
            }
        }

        let (exit, ret) = match result {
            Some(local) => {
                let exit = body.push(Instruction::load_local(local));
                (exit, body.push(Instruction::simple(Opcode::Ret)))
            }
            None => {
                let ret = body.push(Instruction::simple(Opcode::Ret));
                (ret, ret)
            }
        };

        for &id in &exits {
            match result {
                Some(local) => {
                    body.replace(id, Instruction::store_local(local))?;
                    body.insert_after(id, Instruction::branch(Opcode::Leave, exit))?;
                }
                None => {
                    body.replace(id, Instruction::branch(Opcode::Leave, exit))?;
                }
            }
            if body.cursor.position == Some(id) {
                body.cursor.position = Some(exit);
            }
        }

        let remaining = body
            .iter()
            .filter(|(_, instruction)| instruction.opcode == Opcode::Ret)
            .count();
        if remaining != 1 {
            return Err(structural_error!(
                "{} exit instructions remain after normalization",
                remaining
            ));
        }

        Ok(NormalizedExit {
            exit,
            ret,
            result,
            replaced: exits.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{Cursor, InstructionAssembler},
        Error,
    };

    fn mnemonics(body: &MethodBody) -> Vec<&'static str> {
        body.iter().map(|(_, i)| i.mnemonic()).collect()
    }

    fn two_exit_body() -> Result<MethodBody> {
        let mut body = MethodBody::new();
        let mut asm = InstructionAssembler::new(&mut body);
        asm.ldarg_0()?
            .brtrue("positive")?
            .ldc_i4_const(0)?
            .ret()?
            .label("positive")?
            .ldc_i4_const(1)?
            .ret()?;
        asm.finish()?;
        drop(asm);
        Ok(body)
    }

    #[test]
    fn test_value_exits_store_and_leave() -> Result<()> {
        let mut body = two_exit_body()?;
        let exit = ExitPathNormalizer::new(&mut body, &TypeSig::I4).normalize()?;

        assert_eq!(exit.replaced, 2);
        assert_eq!(
            mnemonics(&body),
            [
                "ldarg.0", "brtrue", "ldc.i4.0", "stloc.0", "leave", "ldc.i4.1", "stloc.0",
                "leave", "ldloc.0", "ret"
            ]
        );
        assert_eq!(exit.result, Some(LocalId(0)));
        assert_eq!(body.last(), Some(exit.ret));
        let leaves: Vec<Vec<InstrId>> = body
            .iter()
            .filter(|(_, i)| i.opcode == Opcode::Leave)
            .map(|(_, i)| i.targets())
            .collect();
        assert_eq!(leaves, vec![vec![exit.exit], vec![exit.exit]]);
        Ok(())
    }

    #[test]
    fn test_void_exits_become_leave() -> Result<()> {
        let mut body = MethodBody::new();
        let mut asm = InstructionAssembler::new(&mut body);
        asm.nop()?.ret()?;
        asm.finish()?;
        drop(asm);

        let exit = ExitPathNormalizer::new(&mut body, &TypeSig::Void).normalize()?;
        assert_eq!(mnemonics(&body), ["nop", "leave", "ret"]);
        assert_eq!(exit.exit, exit.ret);
        assert!(exit.result.is_none());
        assert!(body.locals().is_empty());
        Ok(())
    }

    #[test]
    fn test_branch_targets_keep_identity() -> Result<()> {
        let mut body = two_exit_body()?;
        let branch_target = body.at(1).map(Instruction::targets);
        ExitPathNormalizer::new(&mut body, &TypeSig::I4).normalize()?;
        assert_eq!(body.at(1).map(Instruction::targets), branch_target);
        Ok(())
    }

    #[test]
    fn test_cursor_on_exit_is_retargeted() -> Result<()> {
        let mut body = MethodBody::new();
        let ret = body.push(Instruction::simple(Opcode::Ret));
        body.cursor = Cursor::before(ret);

        let exit = ExitPathNormalizer::new(&mut body, &TypeSig::Void).normalize()?;
        assert_eq!(body.cursor.position, Some(exit.exit));
        Ok(())
    }

    #[test]
    fn test_body_without_exits() -> Result<()> {
        let mut body = MethodBody::new();
        body.push(Instruction::simple(Opcode::Ldnull));
        body.push(Instruction::simple(Opcode::Throw));

        let exit = ExitPathNormalizer::new(&mut body, &TypeSig::String).normalize()?;
        assert_eq!(exit.replaced, 0);
        assert_eq!(mnemonics(&body), ["ldnull", "throw", "ldloc.0", "ret"]);
        Ok(())
    }

    #[test]
    fn test_jmp_is_rejected() {
        let mut body = MethodBody::new();
        body.push(Instruction::method(
            Opcode::Jmp,
            crate::metadata::MemberRef::method("Demo.Other", "Run", vec![], TypeSig::Void, false),
        ));

        let result = ExitPathNormalizer::new(&mut body, &TypeSig::Void).normalize();
        assert!(matches!(result, Err(Error::Structural { .. })));
    }

    #[test]
    fn test_result_local_must_match_return_type() {
        let mut body = MethodBody::new();
        body.push(Instruction::simple(Opcode::Ret));
        let result = ExitPathNormalizer::new(&mut body, &TypeSig::I4).normalize_with_result(None);
        assert!(result.is_err());
    }
}
