use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::warn;

use crate::dataflow::expr::{Expr, ExprInterpreter};
use crate::dataflow::worklist::analyze;
use crate::ir::{Constant, FieldInsn, Instruction, Method};
use crate::modular::{Number, invert_i32, invert_i64};
use crate::opcodes;

/// Instructions to insert before `position`; `seq` keeps insertion order stable.
struct Insertion {
    position: usize,
    seq: usize,
    instructions: [Instruction; 2],
}

/// Counter-multiplies every access to a field with a known decoder.
///
/// Reads are followed by the inverse of the decoder and writes are preceded
/// by the decoder, so the stored value is the plain one.
pub(crate) fn cancel_out(method: &mut Method, decoders: &BTreeMap<String, Number>) -> Result<usize> {
    let mut insertions = Vec::new();
    let mut rewritten = 0;
    for (index, instruction) in method.instructions.iter().enumerate() {
        let Instruction::Field(field) = instruction else {
            continue;
        };
        if field.descriptor != "I" && field.descriptor != "J" {
            continue;
        }
        let Some(decoder) = decoders.get(&field.key()) else {
            continue;
        };
        let decoder = decoder.as_i64();
        let previous = index
            .checked_sub(1)
            .and_then(|previous| method.instructions.get(previous))
            .and_then(Instruction::opcode);
        let next = method.instructions.get(index + 1).and_then(Instruction::opcode);
        let mut insert = |position: usize, instructions: [Instruction; 2]| {
            insertions.push(Insertion {
                position,
                seq: insertions.len(),
                instructions,
            });
        };
        let wide = field.descriptor == "J";
        match field.opcode {
            opcodes::GETFIELD | opcodes::GETSTATIC => {
                if wide {
                    insert(index + 1, long_mul(invert_i64(decoder)?));
                } else if next == Some(opcodes::I2L) {
                    insert(index + 2, long_mul(invert_i64(decoder)?));
                } else {
                    insert(index + 1, int_mul(invert_i32(decoder as i32)?));
                }
            }
            opcodes::PUTFIELD | opcodes::PUTSTATIC => {
                let chained = chained_dup(field);
                match previous {
                    Some(opcode) if opcode == chained => {
                        if wide {
                            insert(index - 1, long_mul(decoder));
                            insert(index + 1, long_mul(invert_i64(decoder)?));
                        } else {
                            insert(index - 1, int_mul(decoder as i32));
                            insert(index + 1, int_mul(invert_i32(decoder as i32)?));
                        }
                    }
                    Some(
                        opcode @ (opcodes::DUP
                        | opcodes::DUP_X1
                        | opcodes::DUP_X2
                        | opcodes::DUP2
                        | opcodes::DUP2_X1
                        | opcodes::DUP2_X2),
                    ) => {
                        anyhow::bail!(
                            "unexpected duplicate 0x{opcode:02x} before store to {} at instruction {index}",
                            field.key()
                        );
                    }
                    _ => {
                        if wide {
                            insert(index, long_mul(decoder));
                        } else {
                            insert(index, int_mul(decoder as i32));
                        }
                    }
                }
            }
            _ => continue,
        }
        rewritten += 1;
    }

    insertions.sort_by_key(|insertion| (insertion.position, insertion.seq));
    for insertion in insertions.into_iter().rev() {
        method
            .instructions
            .splice(insertion.position..insertion.position, insertion.instructions);
    }
    Ok(rewritten)
}

/// The duplicate a chained assignment leaves right before the store.
fn chained_dup(field: &FieldInsn) -> u8 {
    match (field.opcode == opcodes::PUTSTATIC, field.descriptor == "J") {
        (true, false) => opcodes::DUP,
        (true, true) => opcodes::DUP2,
        (false, false) => opcodes::DUP_X1,
        (false, true) => opcodes::DUP2_X1,
    }
}

fn int_mul(n: i32) -> [Instruction; 2] {
    [Instruction::Ldc(Constant::Int(n)), Instruction::Simple(opcodes::IMUL)]
}

fn long_mul(n: i64) -> [Instruction; 2] {
    [Instruction::Ldc(Constant::Long(n)), Instruction::Simple(opcodes::LMUL)]
}

#[derive(Debug)]
enum Edit {
    Remove,
    Set(Instruction),
}

/// Collapses chains of constant multiplications left behind by [`cancel_out`].
///
/// Returns the number of multiplications folded. A method the analyzer
/// rejects is left untouched.
pub(crate) fn fold_constants(method: &mut Method) -> Result<usize> {
    let mut interpreter = ExprInterpreter::new();
    if let Err(error) = analyze(method, &mut interpreter) {
        warn!("Skipping constant folding in {}{}: {error:#}", method.name, method.descriptor);
        return Ok(0);
    }
    let multiplications = interpreter.constant_multiplications();
    let mut edits = BTreeMap::new();
    for multiplication in &multiplications {
        let index = instruction_of(multiplication)?;
        let one = match method.instructions[index].opcode() {
            Some(opcodes::IMUL) => Number::Int(1),
            Some(opcodes::LMUL) => Number::Long(1),
            _ => anyhow::bail!("instruction {index} is not a multiplication"),
        };
        associate(&mut edits, multiplication, one)?;
    }
    for (index, edit) in edits.into_iter().rev() {
        match edit {
            Edit::Remove => {
                method.instructions.remove(index);
            }
            Edit::Set(instruction) => method.instructions[index] = instruction,
        }
    }
    Ok(multiplications.len())
}

fn associate(edits: &mut BTreeMap<usize, Edit>, multiplication: &Expr, factor: Number) -> Result<()> {
    let (constant, other) = multiplication
        .factors()
        .context("multiplication without a constant operand")?;
    let Expr::Const(_, value) = constant else {
        anyhow::bail!("constant operand is not a constant");
    };
    let n = factor.wrapping_mul(*value);
    let at = instruction_of(multiplication)?;
    let constant_at = instruction_of(constant)?;
    match other {
        Expr::Mul(..) => {
            edit(edits, at, Edit::Remove)?;
            edit(edits, constant_at, Edit::Remove)?;
            associate(edits, other, n)
        }
        Expr::Const(_, other_value) => {
            edit(edits, at, Edit::Remove)?;
            edit(edits, constant_at, Edit::Remove)?;
            edit(edits, instruction_of(other)?, Edit::Set(load(n.wrapping_mul(*other_value))))
        }
        Expr::Add(_, left, right) => {
            edit(edits, at, Edit::Remove)?;
            edit(edits, constant_at, Edit::Remove)?;
            distribute(edits, left, n)?;
            distribute(edits, right, n)
        }
        _ if n.is_one() => {
            edit(edits, at, Edit::Remove)?;
            edit(edits, constant_at, Edit::Remove)
        }
        _ => edit(edits, constant_at, Edit::Set(load(n))),
    }
}

fn distribute(edits: &mut BTreeMap<usize, Edit>, expr: &Expr, factor: Number) -> Result<()> {
    match expr {
        Expr::Const(_, value) => edit(edits, instruction_of(expr)?, Edit::Set(load(factor.wrapping_mul(*value)))),
        Expr::Mul(..) => associate(edits, expr, factor),
        other => anyhow::bail!("cannot distribute a multiplication over {other:?}"),
    }
}

fn edit(edits: &mut BTreeMap<usize, Edit>, index: usize, edit: Edit) -> Result<()> {
    if edits.insert(index, edit).is_some() {
        anyhow::bail!("instruction {index} edited twice while folding constants");
    }
    Ok(())
}

fn instruction_of(expr: &Expr) -> Result<usize> {
    expr.instruction()
        .with_context(|| format!("expression {expr:?} has no single producing instruction"))
}

fn load(n: Number) -> Instruction {
    match n {
        Number::Int(value) => Instruction::push_int(value),
        Number::Long(value) => Instruction::push_long(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC};
    use crate::test_harness::{Evaluator, MethodBuilder, Slot, opcodes_of};

    const DECODER: i32 = -1_640_531_527;

    fn decoders(entries: &[(&str, Number)]) -> BTreeMap<String, Number> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn reads_are_followed_by_the_inverse() {
        let mut builder = MethodBuilder::new("read", "()J", ACC_STATIC);
        builder
            .field(opcodes::GETSTATIC, "A", "x", "I")
            .op(opcodes::POP)
            .field(opcodes::GETSTATIC, "A", "x", "I")
            .op(opcodes::I2L)
            .op(opcodes::LRETURN);
        let mut method = builder.build();

        let rewritten = cancel_out(&mut method, &decoders(&[("A.x", Number::Int(DECODER))])).expect("cancel");

        assert_eq!(rewritten, 2);
        let inverse = invert_i32(DECODER).expect("odd");
        assert_eq!(method.instructions[1], Instruction::Ldc(Constant::Int(inverse)));
        assert_eq!(method.instructions[2], Instruction::Simple(opcodes::IMUL));
        assert_eq!(method.instructions[5], Instruction::Simple(opcodes::I2L));
        let long_inverse = invert_i64(DECODER as i64).expect("odd");
        assert_eq!(method.instructions[6], Instruction::Ldc(Constant::Long(long_inverse)));
        assert_eq!(method.instructions[7], Instruction::Simple(opcodes::LMUL));
    }

    #[test]
    fn chained_instance_store_wraps_the_duplicate() {
        let mut builder = MethodBuilder::new("store", "(I)I", ACC_PUBLIC);
        builder
            .var(opcodes::ALOAD, 0)
            .var(opcodes::ILOAD, 1)
            .op(opcodes::DUP_X1)
            .field(opcodes::PUTFIELD, "A", "x", "I")
            .op(opcodes::IRETURN);
        let mut method = builder.build();

        cancel_out(&mut method, &decoders(&[("A.x", Number::Int(DECODER))])).expect("cancel");

        assert_eq!(
            opcodes_of(&method),
            vec![
                opcodes::ALOAD,
                opcodes::ILOAD,
                opcodes::LDC,
                opcodes::IMUL,
                opcodes::DUP_X1,
                opcodes::PUTFIELD,
                opcodes::LDC,
                opcodes::IMUL,
                opcodes::IRETURN,
            ]
        );
        let mut evaluator = Evaluator::default();
        let returned = evaluator.run(&method, &[Slot::Int(11)]).expect("evaluate");
        assert_eq!(returned, Some(Slot::Int(11)));
        assert_eq!(evaluator.fields.get("A.x"), Some(&Slot::Int(11i32.wrapping_mul(DECODER))));
    }

    #[test]
    fn unexpected_duplicate_before_store_is_fatal() {
        let mut builder = MethodBuilder::new("store", "(I)V", ACC_STATIC);
        builder
            .var(opcodes::ILOAD, 0)
            .op(opcodes::DUP_X1)
            .field(opcodes::PUTSTATIC, "A", "x", "I")
            .op(opcodes::RETURN);
        let mut method = builder.build();

        let error = cancel_out(&mut method, &decoders(&[("A.x", Number::Int(DECODER))]))
            .expect_err("duplicate shape is rejected");

        assert!(error.to_string().contains("A.x"));
    }

    #[test]
    fn folding_collapses_products_to_one() {
        let inverse = invert_i32(DECODER).expect("odd");
        let mut builder = MethodBuilder::new("read", "()I", ACC_STATIC);
        builder
            .field(opcodes::GETSTATIC, "A", "x", "I")
            .ldc(Constant::Int(inverse))
            .op(opcodes::IMUL)
            .ldc(Constant::Int(DECODER))
            .op(opcodes::IMUL)
            .op(opcodes::IRETURN);
        let mut method = builder.build();

        let folded = fold_constants(&mut method).expect("fold");

        assert_eq!(folded, 1);
        assert_eq!(opcodes_of(&method), vec![opcodes::GETSTATIC, opcodes::IRETURN]);
    }

    #[test]
    fn folding_distributes_over_sums() {
        let mut builder = MethodBuilder::new("sum", "()I", ACC_STATIC);
        builder
            .field(opcodes::GETSTATIC, "A", "x", "I")
            .ldc(Constant::Int(3))
            .op(opcodes::IMUL)
            .ldc(Constant::Int(4))
            .op(opcodes::IADD)
            .ldc(Constant::Int(5))
            .op(opcodes::IMUL)
            .op(opcodes::IRETURN);
        let mut method = builder.build();
        let mut before = Evaluator::default();
        before.fields.insert("A.x".to_string(), Slot::Int(7));
        let expected = before.run(&method, &[]).expect("evaluate");

        fold_constants(&mut method).expect("fold");

        assert_eq!(
            opcodes_of(&method),
            vec![
                opcodes::GETSTATIC,
                opcodes::BIPUSH,
                opcodes::IMUL,
                opcodes::BIPUSH,
                opcodes::IADD,
                opcodes::IRETURN,
            ]
        );
        let mut after = Evaluator::default();
        after.fields.insert("A.x".to_string(), Slot::Int(7));
        assert_eq!(after.run(&method, &[]).expect("evaluate"), expected);
    }
}
