//! Removal of the encode/decode multipliers applied to numeric fields.
//!
//! The finder solves one decoder per field from every multiplication seen in
//! the pool, the remover cancels each access with the matching inverse and
//! then folds the constant products that result.

mod finder;
mod remover;
mod solver;

use anyhow::{Context, Result};
use tracing::info;

use crate::ir::ClassPool;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

pub(crate) struct MultiplierTransformer;

impl Transformer for MultiplierTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "multiplier",
            name: "Multiplier removal",
            description: "Solves field decode multipliers and cancels them at every access",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let decoders = finder::find_multipliers(pool)?;
        info!("Found {} multipliers.", decoders.len());

        let mut rewritten = 0;
        let mut folded = 0;
        for class in pool.iter_mut() {
            for method in &mut class.methods {
                if !method.has_code() {
                    continue;
                }
                rewritten += remover::cancel_out(method, &decoders).with_context(|| {
                    format!("cancel multipliers in {}.{}{}", class.name, method.name, method.descriptor)
                })?;
                folded += remover::fold_constants(method).with_context(|| {
                    format!("fold constants in {}.{}{}", class.name, method.name, method.descriptor)
                })?;
            }
        }
        info!("Folded {folded} constant multiplications.");
        info!("Completed removal of {} multipliers.", decoders.len());
        Ok(TransformOutput::changed(rewritten))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC, Constant, Field, Instruction, Method};
    use crate::modular::{invert_i32, invert_i64};
    use crate::opcodes;
    use crate::test_harness::{Evaluator, MethodBuilder, Slot, class_with, opcodes_of, pool_of};

    const ENCODER: i32 = 1_364_231_567;

    fn obfuscated_pool() -> ClassPool {
        let decoder = invert_i32(ENCODER).expect("odd");
        let mut set = MethodBuilder::new("set", "(I)V", ACC_PUBLIC | ACC_STATIC);
        set.var(opcodes::ILOAD, 0)
            .ldc(Constant::Int(ENCODER))
            .op(opcodes::IMUL)
            .field(opcodes::PUTSTATIC, "Counter", "x", "I")
            .op(opcodes::RETURN);
        let mut get = MethodBuilder::new("get", "()I", ACC_PUBLIC | ACC_STATIC);
        get.field(opcodes::GETSTATIC, "Counter", "x", "I")
            .ldc(Constant::Int(decoder))
            .op(opcodes::IMUL)
            .op(opcodes::IRETURN);
        pool_of(vec![class_with(
            "Counter",
            None,
            vec![Field::new("x", "I", ACC_STATIC)],
            vec![set.build(), get.build()],
        )])
    }

    fn method<'a>(pool: &'a ClassPool, name: &str) -> &'a Method {
        pool.get("Counter")
            .and_then(|class| class.methods.iter().find(|method| method.name == name))
            .expect("method")
    }

    #[test]
    fn stored_values_round_trip_without_multipliers() {
        let mut pool = obfuscated_pool();

        let output = MultiplierTransformer.run(&mut pool).expect("run");

        assert_eq!(output.changed, 2);
        let decoder = invert_i32(ENCODER).expect("odd");
        for name in ["set", "get"] {
            let constants: Vec<_> = method(&pool, name)
                .instructions
                .iter()
                .filter_map(Instruction::int_constant)
                .collect();
            assert!(!constants.contains(&ENCODER), "{name} still encodes");
            assert!(!constants.contains(&decoder), "{name} still decodes");
        }

        let mut evaluator = Evaluator::default();
        evaluator.run(method(&pool, "set"), &[Slot::Int(1234)]).expect("set");
        assert_eq!(evaluator.fields.get("Counter.x"), Some(&Slot::Int(1234)));
        let read = evaluator.run(method(&pool, "get"), &[]).expect("get");
        assert_eq!(read, Some(Slot::Int(1234)));
    }

    #[test]
    fn long_fields_round_trip_without_multipliers() {
        const LONG_ENCODER: i64 = 0x5dee_ce66_d1b3_4f27;
        let decoder = invert_i64(LONG_ENCODER).expect("odd");
        let mut set = MethodBuilder::new("set", "(J)V", ACC_PUBLIC | ACC_STATIC);
        set.var(opcodes::LLOAD, 0)
            .long(LONG_ENCODER)
            .op(opcodes::LMUL)
            .field(opcodes::PUTSTATIC, "Counter", "total", "J")
            .op(opcodes::RETURN);
        let mut get = MethodBuilder::new("get", "()J", ACC_PUBLIC | ACC_STATIC);
        get.field(opcodes::GETSTATIC, "Counter", "total", "J")
            .long(decoder)
            .op(opcodes::LMUL)
            .op(opcodes::LRETURN);
        let mut pool = pool_of(vec![class_with(
            "Counter",
            None,
            vec![Field::new("total", "J", ACC_STATIC)],
            vec![set.build(), get.build()],
        )]);

        let output = MultiplierTransformer.run(&mut pool).expect("run");

        assert_eq!(output.changed, 2);
        assert_eq!(
            opcodes_of(method(&pool, "get")),
            vec![opcodes::GETSTATIC, opcodes::LRETURN]
        );
        let mut evaluator = Evaluator::default();
        evaluator
            .run(method(&pool, "set"), &[Slot::Long(-987_654_321_012)])
            .expect("set");
        let read = evaluator.run(method(&pool, "get"), &[]).expect("get");
        assert_eq!(read, Some(Slot::Long(-987_654_321_012)));
    }

    #[test]
    fn unresolved_fields_keep_their_arithmetic() {
        let decoder = invert_i32(ENCODER).expect("odd");
        let reader = |name: &str, constant: i32| {
            let mut builder = MethodBuilder::new(name, "()I", ACC_STATIC);
            builder
                .field(opcodes::GETSTATIC, "Counter", "x", "I")
                .ldc(Constant::Int(constant))
                .op(opcodes::IMUL)
                .op(opcodes::IRETURN);
            builder.build()
        };
        let first = reader("first", decoder);
        let second = reader("second", -1_640_531_527);
        let mut pool = pool_of(vec![class_with(
            "Counter",
            None,
            vec![Field::new("x", "I", ACC_STATIC)],
            vec![first.clone(), second.clone()],
        )]);

        let output = MultiplierTransformer.run(&mut pool).expect("run");

        assert_eq!(output.changed, 0);
        assert_eq!(method(&pool, "first").instructions, first.instructions);
        assert_eq!(method(&pool, "second").instructions, second.instructions);
    }

    #[test]
    fn pools_without_multipliers_are_untouched() {
        let mut builder = MethodBuilder::new("twice", "(I)I", ACC_STATIC);
        builder
            .var(opcodes::ILOAD, 0)
            .int(2)
            .op(opcodes::IMUL)
            .op(opcodes::IRETURN);
        let original = builder.build();
        let mut pool = pool_of(vec![class_with("Counter", None, Vec::new(), vec![original.clone()])]);

        let output = MultiplierTransformer.run(&mut pool).expect("run");

        assert_eq!(output.changed, 0);
        assert_eq!(method(&pool, "twice").instructions, original.instructions);
    }
}
