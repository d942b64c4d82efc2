use anyhow::Result;
use tracing::info;

use crate::ir::{ClassPool, Instruction, Method};
use crate::opcodes;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Removes `GOTO`s that jump to the instruction right after them.
pub(crate) struct GotoTransformer;

impl Transformer for GotoTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "goto",
            name: "Redundant GOTO removal",
            description: "Deletes jumps to the immediately following instruction",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut counter = 0;
        for class in pool.iter_mut() {
            for method in &mut class.methods {
                counter += remove_redundant_gotos(method);
            }
        }
        info!("Removed {counter} redundant GOTO instructions.");
        Ok(TransformOutput::changed(counter))
    }
}

fn remove_redundant_gotos(method: &mut Method) -> usize {
    let mut removed = 0;
    let mut index = 0;
    while index < method.instructions.len() {
        let Instruction::Jump {
            opcode: opcodes::GOTO,
            target,
        } = &method.instructions[index]
        else {
            index += 1;
            continue;
        };
        let lands_next = method.instructions[index + 1..]
            .iter()
            .take_while(|instruction| instruction.is_pseudo())
            .any(|instruction| instruction == &Instruction::Label(*target));
        if lands_next {
            method.instructions.remove(index);
            removed += 1;
        } else {
            index += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ACC_STATIC;
    use crate::test_harness::{MethodBuilder, opcodes_of};

    fn sample() -> Method {
        let mut builder = MethodBuilder::new("m", "(I)V", ACC_STATIC);
        let next = builder.label();
        let back = builder.label();
        builder
            .mark(back)
            .jump(opcodes::GOTO, next)
            .line(4)
            .mark(next)
            .var(opcodes::ILOAD, 0)
            .jump(opcodes::IFEQ, back)
            .op(opcodes::RETURN);
        builder.build()
    }

    #[test]
    fn removes_jump_to_following_label() {
        let mut method = sample();

        assert_eq!(remove_redundant_gotos(&mut method), 1);
        assert_eq!(
            opcodes_of(&method),
            vec![opcodes::ILOAD, opcodes::IFEQ, opcodes::RETURN]
        );
    }

    #[test]
    fn removal_is_idempotent() {
        let mut once = sample();
        remove_redundant_gotos(&mut once);
        let mut twice = once.clone();

        assert_eq!(remove_redundant_gotos(&mut twice), 0);
        assert_eq!(twice.instructions, once.instructions);
    }

    #[test]
    fn keeps_backward_jumps() {
        let mut builder = MethodBuilder::new("loop", "()V", ACC_STATIC);
        let head = builder.label();
        builder.mark(head).op(opcodes::NOP).jump(opcodes::GOTO, head);
        let mut method = builder.build();

        assert_eq!(remove_redundant_gotos(&mut method), 0);
    }
}
