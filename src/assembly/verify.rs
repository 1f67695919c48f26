//! Structural verification of method bodies.
//!
//! [`verify`] enforces the control-flow rules the runtime imposes on exception regions,
//! which the weaver's output must satisfy:
//!
//! - every branch target and region bound is placed
//! - a protected range ends before its handler begins
//! - ordinary branches stay inside the region they start in; only `leave` exits a protected
//!   range or catch handler, and nothing jumps into the middle of a protected range
//! - no `ret` inside any region, no `leave` out of a finally handler
//! - `endfinally` only in finally handlers, each of which ends with one
//! - `rethrow` only in catch handlers

use crate::{
    assembly::{
        body::{MethodBody, RegionKind},
        instruction::{FlowType, InstrId},
        opcodes::Opcode,
    },
    Result,
};

/// Checks the structural rules listed in the module documentation.
///
/// # Errors
/// Returns [`crate::Error::Structural`] describing the first violation found
pub fn verify(body: &MethodBody) -> Result<()> {
    verify_regions(body)?;

    for (id, instruction) in body.iter() {
        for target in instruction.targets() {
            if !body.is_placed(target) {
                return Err(structural_error!(
                    "{} at {:?} targets unplaced instruction {:?}",
                    instruction.mnemonic(),
                    id,
                    target
                ));
            }
        }

        match instruction.flow_type() {
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Switch => {
                for target in instruction.targets() {
                    verify_branch(body, id, target)?;
                }
            }
            FlowType::Leave => {
                for target in instruction.targets() {
                    verify_leave(body, id, target)?;
                }
            }
            FlowType::Return => {
                if body.in_any_region(id) {
                    return Err(structural_error!(
                        "ret at {:?} inside an exception region",
                        id
                    ));
                }
            }
            FlowType::EndFinally => {
                let in_finally = body.regions().iter().any(|region| {
                    region.kind == RegionKind::Finally && region.handler_contains(body, id)
                });
                if !in_finally {
                    return Err(structural_error!(
                        "endfinally at {:?} outside a finally handler",
                        id
                    ));
                }
            }
            FlowType::Throw if instruction.opcode == Opcode::Rethrow => {
                let in_catch = body.regions().iter().any(|region| {
                    matches!(region.kind, RegionKind::Catch(_)) && region.handler_contains(body, id)
                });
                if !in_catch {
                    return Err(structural_error!("rethrow at {:?} outside a catch handler", id));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn verify_regions(body: &MethodBody) -> Result<()> {
    for region in body.regions() {
        let bounds = [
            region.try_start,
            region.try_end,
            region.handler_start,
            region.handler_end,
        ];
        let mut positions = [0usize; 4];
        for (position, bound) in positions.iter_mut().zip(bounds) {
            *position = body
                .position(bound)
                .ok_or_else(|| structural_error!("Region bound {:?} is not placed", bound))?;
        }

        let [try_start, try_end, handler_start, handler_end] = positions;
        if try_start >= try_end || handler_start >= handler_end {
            return Err(structural_error!(
                "Empty exception region range at {:?}",
                region.try_start
            ));
        }
        if try_end > handler_start {
            return Err(structural_error!(
                "Protected range starting at {:?} overlaps its handler",
                region.try_start
            ));
        }

        if region.kind == RegionKind::Finally {
            let last = body.ids()[handler_end - 1];
            let ends_with_endfinally = body
                .get(last)
                .is_some_and(|instruction| instruction.opcode == Opcode::Endfinally);
            if !ends_with_endfinally {
                return Err(structural_error!(
                    "Finally handler starting at {:?} does not end with endfinally",
                    region.handler_start
                ));
            }
        }
    }
    Ok(())
}

fn verify_branch(body: &MethodBody, source: InstrId, target: InstrId) -> Result<()> {
    for region in body.regions() {
        let source_in_try = region.try_contains(body, source);
        let target_in_try = region.try_contains(body, target);
        if source_in_try != target_in_try && !(target == region.try_start && !source_in_try) {
            return Err(structural_error!(
                "Branch at {:?} crosses the protected range starting at {:?}",
                source,
                region.try_start
            ));
        }
        if region.handler_contains(body, source) != region.handler_contains(body, target) {
            return Err(structural_error!(
                "Branch at {:?} crosses the handler starting at {:?}",
                source,
                region.handler_start
            ));
        }
    }
    Ok(())
}

fn verify_leave(body: &MethodBody, source: InstrId, target: InstrId) -> Result<()> {
    for region in body.regions() {
        if region.kind == RegionKind::Finally
            && region.handler_contains(body, source)
            && !region.handler_contains(body, target)
        {
            return Err(structural_error!(
                "leave at {:?} exits the finally handler starting at {:?}",
                source,
                region.handler_start
            ));
        }

        let enters_try = region.try_contains(body, target) && !region.try_contains(body, source);
        let enters_handler =
            region.handler_contains(body, target) && !region.handler_contains(body, source);
        if (enters_try && target != region.try_start) || enters_handler {
            return Err(structural_error!(
                "leave at {:?} enters the region starting at {:?}",
                source,
                region.try_start
            ));
        }
    }
    Ok(())
}
