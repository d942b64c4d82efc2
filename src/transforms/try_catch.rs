use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::info;

use crate::ir::{ClassPool, Instruction, LabelId, Method};
use crate::opcodes;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

const RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";

/// Handler bodies the obfuscator injects to wrap and rethrow exceptions.
const ERROR_REPORT_SHAPES: [&[u8]; 2] = [
    &[
        opcodes::NEW,
        opcodes::DUP,
        opcodes::INVOKESPECIAL,
        opcodes::LDC,
        opcodes::INVOKEVIRTUAL,
        opcodes::INVOKEVIRTUAL,
        opcodes::INVOKESTATIC,
        opcodes::ATHROW,
    ],
    &[
        opcodes::NEW,
        opcodes::DUP,
        opcodes::INVOKESPECIAL,
        opcodes::LDC,
        opcodes::INVOKEVIRTUAL,
        opcodes::LDC,
        opcodes::INVOKEVIRTUAL,
        opcodes::INVOKEVIRTUAL,
        opcodes::INVOKESTATIC,
        opcodes::ATHROW,
    ],
];

/// Removes injected `RuntimeException` try-catch ranges and their handler bodies.
pub(crate) struct TryCatchTransformer;

impl Transformer for TryCatchTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "try-catch",
            name: "Try-catch pruning",
            description: "Removes injected RuntimeException handlers",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut ranges = 0;
        let mut handlers = 0;
        for class in pool.iter_mut() {
            let class_name = class.name.clone();
            for method in &mut class.methods {
                let (removed_ranges, removed_handlers) = prune_method(method)
                    .with_context(|| format!("prune {}.{}{}", class_name, method.name, method.descriptor))?;
                ranges += removed_ranges;
                handlers += removed_handlers;
            }
        }
        info!("Removed {ranges} RuntimeException try-catch blocks and {handlers} handler bodies.");
        Ok(TransformOutput::changed(ranges))
    }
}

fn prune_method(method: &mut Method) -> Result<(usize, usize)> {
    if method.try_catch_blocks.is_empty() {
        return Ok((0, 0));
    }
    let before = method.try_catch_blocks.len();
    let mut removed_handlers = BTreeSet::new();
    method.try_catch_blocks.retain(|block| {
        if block.catch_type.as_deref() == Some(RUNTIME_EXCEPTION) {
            removed_handlers.insert(block.handler);
            false
        } else {
            true
        }
    });

    let instructions = &method.instructions;
    let labels = method.label_positions();
    method.try_catch_blocks.retain(|block| {
        if block.catch_type.is_some() {
            return true;
        }
        let reports_error = labels
            .get(&block.handler)
            .and_then(|position| error_report_span(instructions, *position))
            .is_some();
        if removed_handlers.contains(&block.handler) || reports_error {
            removed_handlers.insert(block.handler);
            false
        } else {
            true
        }
    });
    let removed_ranges = before - method.try_catch_blocks.len();

    let still_used: BTreeSet<LabelId> = method
        .try_catch_blocks
        .iter()
        .map(|block| block.handler)
        .collect();
    let mut deletions = Vec::new();
    for handler in removed_handlers.difference(&still_used) {
        let Some(position) = labels.get(handler) else {
            anyhow::bail!("handler label {handler:?} is not placed");
        };
        if let Some((first, athrow)) = error_report_span(&method.instructions, *position) {
            match method.instructions.get(athrow + 1) {
                None | Some(Instruction::Label(_)) => deletions.push((first, athrow)),
                Some(next) => anyhow::bail!(
                    "handler body at instruction {first} is followed by {next:?} instead of a label"
                ),
            }
        }
    }

    let removed_bodies = deletions.len();
    deletions.sort_unstable();
    for (first, athrow) in deletions.into_iter().rev() {
        let mut index = athrow + 1;
        while index > first {
            index -= 1;
            if !matches!(method.instructions[index], Instruction::Label(_)) {
                method.instructions.remove(index);
            }
        }
    }
    Ok((removed_ranges, removed_bodies))
}

/// `(first real instruction, ATHROW index)` when the handler at `position`
/// is an injected error report.
fn error_report_span(instructions: &[Instruction], position: usize) -> Option<(usize, usize)> {
    let body: Vec<(usize, u8)> = instructions
        .iter()
        .enumerate()
        .skip(position)
        .filter(|(_, instruction)| !matches!(instruction, Instruction::Line(_)))
        .skip_while(|(_, instruction)| matches!(instruction, Instruction::Label(_)))
        .map_while(|(index, instruction)| instruction.opcode().map(|opcode| (index, opcode)))
        .take(ERROR_REPORT_SHAPES[1].len())
        .collect();
    ERROR_REPORT_SHAPES.iter().find_map(|shape| {
        let matches = body.len() >= shape.len()
            && body.iter().zip(shape.iter()).all(|((_, opcode), expected)| opcode == expected);
        matches.then(|| (body[0].0, body[shape.len() - 1].0))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, Constant};
    use crate::test_harness::{MethodBuilder, class_with, opcodes_of, pool_of};

    fn guarded_method(catch_type: Option<&str>, long_shape: bool) -> Method {
        let mut builder = MethodBuilder::new("run", "()V", ACC_PUBLIC);
        let start = builder.label();
        let end = builder.label();
        let handler = builder.label();
        builder
            .mark(start)
            .var(opcodes::ALOAD, 0)
            .invoke(opcodes::INVOKEVIRTUAL, "A", "work", "()V")
            .mark(end)
            .op(opcodes::RETURN)
            .mark(handler)
            .type_insn(opcodes::NEW, "java/lang/StringBuilder")
            .op(opcodes::DUP)
            .invoke(opcodes::INVOKESPECIAL, "java/lang/StringBuilder", "<init>", "()V")
            .ldc(Constant::String("A.run(".to_string()))
            .invoke(
                opcodes::INVOKEVIRTUAL,
                "java/lang/StringBuilder",
                "append",
                "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
            );
        if long_shape {
            builder.ldc(Constant::String(")".to_string())).invoke(
                opcodes::INVOKEVIRTUAL,
                "java/lang/StringBuilder",
                "append",
                "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
            );
        }
        builder
            .invoke(
                opcodes::INVOKEVIRTUAL,
                "java/lang/StringBuilder",
                "toString",
                "()Ljava/lang/String;",
            )
            .invoke(
                opcodes::INVOKESTATIC,
                "Client",
                "error",
                "(Ljava/lang/Throwable;Ljava/lang/String;)Ljava/lang/RuntimeException;",
            )
            .op(opcodes::ATHROW)
            .try_catch(start, end, handler, catch_type);
        builder.build()
    }

    #[test]
    fn removes_runtime_exception_range_and_handler_body() {
        let mut pool = pool_of(vec![class_with(
            "A",
            None,
            Vec::new(),
            vec![guarded_method(Some(RUNTIME_EXCEPTION), false)],
        )]);

        let output = TryCatchTransformer.run(&mut pool).expect("run");

        let method = &pool.get("A").expect("class").methods[0];
        assert_eq!(output.changed, 1);
        assert!(method.try_catch_blocks.is_empty());
        assert_eq!(
            opcodes_of(method),
            vec![opcodes::ALOAD, opcodes::INVOKEVIRTUAL, opcodes::RETURN]
        );
    }

    #[test]
    fn removes_longer_report_shape() {
        let mut pool = pool_of(vec![class_with(
            "A",
            None,
            Vec::new(),
            vec![guarded_method(Some(RUNTIME_EXCEPTION), true)],
        )]);

        TryCatchTransformer.run(&mut pool).expect("run");

        let method = &pool.get("A").expect("class").methods[0];
        assert_eq!(opcodes_of(method).len(), 3);
    }

    #[test]
    fn keeps_other_exception_types() {
        let original = guarded_method(Some("java/io/IOException"), false);
        let mut pool = pool_of(vec![class_with("A", None, Vec::new(), vec![original.clone()])]);

        let output = TryCatchTransformer.run(&mut pool).expect("run");

        let method = &pool.get("A").expect("class").methods[0];
        assert_eq!(output.changed, 0);
        assert_eq!(method.instructions, original.instructions);
        assert_eq!(method.try_catch_blocks.len(), 1);
    }

    #[test]
    fn removes_catch_all_with_report_shape() {
        let mut pool = pool_of(vec![class_with(
            "A",
            None,
            Vec::new(),
            vec![guarded_method(None, false)],
        )]);

        let output = TryCatchTransformer.run(&mut pool).expect("run");

        assert_eq!(output.changed, 1);
        assert!(pool.get("A").expect("class").methods[0].try_catch_blocks.is_empty());
    }

    #[test]
    fn unexpected_code_after_handler_aborts() {
        let mut method = guarded_method(Some(RUNTIME_EXCEPTION), false);
        method.instructions.push(Instruction::Simple(opcodes::NOP));
        let mut pool = pool_of(vec![class_with("A", None, Vec::new(), vec![method])]);

        let error = TryCatchTransformer.run(&mut pool).expect_err("invariant violation");

        assert!(format!("{error:#}").contains("instead of a label"));
    }
}
