use anyhow::Result;
use tracing::{debug, info};

use crate::descriptor::{drop_last_parameter, is_int_like, last_parameter};
use crate::ir::{ClassPool, Instruction, LabelId, Method};
use crate::opcodes;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

const ILLEGAL_STATE_EXCEPTION: &str = "java/lang/IllegalStateException";

/// Removes the guard that compares the trailing opaque argument against its
/// expected constant.
pub(crate) struct OpaquePredicateTransformer;

impl Transformer for OpaquePredicateTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "opaque-predicate",
            name: "Opaque predicate check removal",
            description: "Replaces checks of the last int parameter with a jump to the passing branch",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut counter = 0;
        for class in pool.iter_mut() {
            for method in &mut class.methods {
                let Some((slot, ty)) = last_parameter(&method.descriptor, method.is_static())? else {
                    continue;
                };
                if !is_int_like(&ty) {
                    continue;
                }
                for check in remove_checks(method, slot) {
                    counter += 1;
                    debug!(
                        "Opaque value of {}.{}{} is {}",
                        class.name,
                        method.name,
                        drop_last_parameter(&method.descriptor)?,
                        check.passing_value
                    );
                }
            }
        }
        info!("Removed {counter} opaque predicate garbage value checks.");
        Ok(TransformOutput::changed(counter))
    }
}

struct RemovedCheck {
    passing_value: i32,
}

fn remove_checks(method: &mut Method, slot: u16) -> Vec<RemovedCheck> {
    let mut removed = Vec::new();
    let mut index = 0;
    while index < method.instructions.len() {
        let Some((length, check)) = match_check(&method.instructions[index..], slot) else {
            index += 1;
            continue;
        };
        method
            .instructions
            .splice(index..index + length, [Instruction::Jump {
                opcode: opcodes::GOTO,
                target: check.target,
            }]);
        removed.push(RemovedCheck {
            passing_value: check.passing_value,
        });
        index += 1;
    }
    removed
}

struct Check {
    target: LabelId,
    passing_value: i32,
}

/// Matches `ILOAD slot; push c; IF_ICMPxx L` followed by either a return or
/// `NEW; DUP; INVOKESPECIAL IllegalStateException.<init>; ATHROW`.
fn match_check(window: &[Instruction], slot: u16) -> Option<(usize, Check)> {
    let [load, push, compare, rest @ ..] = window else {
        return None;
    };
    if !matches!(load, Instruction::Var { opcode: opcodes::ILOAD, index } if *index == slot) {
        return None;
    }
    let constant = push.int_constant()?;
    let Instruction::Jump { opcode, target } = compare else {
        return None;
    };
    let passing_value = passing_value(*opcode, constant)?;
    let length = match rest {
        [Instruction::Simple(opcode), ..] if opcodes::is_return(*opcode) => 4,
        [
            Instruction::Type {
                opcode: opcodes::NEW,
                ..
            },
            Instruction::Simple(opcodes::DUP),
            Instruction::Method(init),
            Instruction::Simple(opcodes::ATHROW),
            ..,
        ] if init.opcode == opcodes::INVOKESPECIAL && init.owner == ILLEGAL_STATE_EXCEPTION => 7,
        _ => return None,
    };
    Some((
        length,
        Check {
            target: *target,
            passing_value,
        },
    ))
}

/// Argument value that makes the comparison succeed.
fn passing_value(opcode: u8, constant: i32) -> Option<i32> {
    match opcode {
        opcodes::IF_ICMPEQ => Some(constant),
        opcodes::IF_ICMPGE | opcodes::IF_ICMPGT => Some(constant.wrapping_add(1)),
        opcodes::IF_ICMPLE | opcodes::IF_ICMPLT | opcodes::IF_ICMPNE => Some(constant.wrapping_sub(1)),
        _ => None,
    }
}
