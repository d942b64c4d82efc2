use anyhow::Result;
use tracing::{info, warn};

use crate::dataflow::basic::BasicInterpreter;
use crate::dataflow::worklist::{analyze, local_slots_used};
use crate::descriptor::parameter_slots;
use crate::ir::{ClassPool, Method};
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Recomputes `max_stack` and `max_locals` and rebuilds the pool.
pub(crate) struct ComputeMaxsTransformer;

impl Transformer for ComputeMaxsTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "compute-maxs",
            name: "Max stack and locals recomputation",
            description: "Re-analyses every method body to size its operand stack and locals",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut counter = 0;
        let mut rebuilt = ClassPool::new();
        for class in pool.iter() {
            let mut class = class.clone();
            for method in class.methods.iter_mut().filter(|method| method.has_code()) {
                match compute_maxs(method) {
                    Ok((max_stack, max_locals)) => {
                        method.max_stack = max_stack;
                        method.max_locals = max_locals;
                        counter += 1;
                    }
                    Err(error) => warn!(
                        "Keeping previous maxs of {}.{}{}: {error:#}",
                        class.name, method.name, method.descriptor
                    ),
                }
            }
            rebuilt.insert(class);
        }
        info!("Recomputed maxs of {counter} methods.");
        Ok(TransformOutput::replaced(counter, rebuilt))
    }
}

fn compute_maxs(method: &Method) -> Result<(u16, u16)> {
    let frames = analyze(method, &mut BasicInterpreter)?;
    let max_stack = frames
        .iter()
        .flatten()
        .map(|frame| frame.stack_slots())
        .max()
        .unwrap_or(0);
    let receiver = usize::from(!method.is_static());
    let max_locals = (parameter_slots(&method.descriptor)? + receiver).max(local_slots_used(method));
    Ok((u16::try_from(max_stack)?, u16::try_from(max_locals)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC};
    use crate::opcodes;
    use crate::test_harness::{MethodBuilder, class_with, pool_of};

    #[test]
    fn sizes_stack_and_locals_from_code() {
        let mut builder = MethodBuilder::new("sum", "(JI)J", ACC_STATIC);
        builder
            .var(opcodes::LLOAD, 0)
            .var(opcodes::ILOAD, 2)
            .op(opcodes::I2L)
            .op(opcodes::LADD)
            .var(opcodes::LSTORE, 4)
            .var(opcodes::LLOAD, 4)
            .op(opcodes::LRETURN);
        let mut pool = pool_of(vec![class_with("A", None, Vec::new(), vec![builder.build()])]);

        let output = ComputeMaxsTransformer.run(&mut pool).expect("run");
        let rebuilt = output.replacement.expect("replacement pool");

        let method = &rebuilt.get("A").expect("class").methods[0];
        assert_eq!(output.changed, 1);
        assert_eq!(method.max_stack, 4);
        assert_eq!(method.max_locals, 6);
    }

    #[test]
    fn analysis_failure_keeps_previous_values() {
        let mut builder = MethodBuilder::new("broken", "()V", ACC_PUBLIC);
        builder.op(opcodes::POP).op(opcodes::RETURN);
        let mut pool = pool_of(vec![class_with("A", None, Vec::new(), vec![builder.build()])]);

        let output = ComputeMaxsTransformer.run(&mut pool).expect("run");
        let rebuilt = output.replacement.expect("replacement pool");

        let method = &rebuilt.get("A").expect("class").methods[0];
        assert_eq!(output.changed, 0);
        assert_eq!((method.max_stack, method.max_locals), (8, 8));
    }
}
