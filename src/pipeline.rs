use std::time::Instant;

use anyhow::Result;
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, info};

use crate::ir::ClassPool;
use crate::multiplier::MultiplierTransformer;
use crate::telemetry::{Telemetry, with_span};
use crate::transforms::compute_maxs::ComputeMaxsTransformer;
use crate::transforms::control_flow::ControlFlowTransformer;
use crate::transforms::dead_code::DeadCodeTransformer;
use crate::transforms::error_constructor::ErrorConstructorTransformer;
use crate::transforms::field_owner::FieldOwnerTransformer;
use crate::transforms::field_sorter::FieldSorterTransformer;
use crate::transforms::goto::GotoTransformer;
use crate::transforms::method_sorter::MethodSorterTransformer;
use crate::transforms::opaque_argument::OpaqueArgumentTransformer;
use crate::transforms::opaque_predicate::OpaquePredicateTransformer;
use crate::transforms::renamer::RenamerTransformer;
use crate::transforms::static_field_inliner::StaticFieldInlinerTransformer;
use crate::transforms::try_catch::TryCatchTransformer;
use crate::transforms::unused_field::UnusedFieldTransformer;
use crate::transforms::unused_method::UnusedMethodTransformer;
use crate::transforms::{TransformOutput, Transformer};

/// Registration entry: a fixed priority and a factory for the pass.
#[derive(Clone, Copy)]
pub(crate) struct PassDescriptor {
    pub(crate) priority: u32,
    pub(crate) build: fn() -> Box<dyn Transformer>,
}

/// Every pass the deobfuscator runs by default.
pub(crate) fn default_passes() -> Vec<PassDescriptor> {
    vec![
        PassDescriptor {
            priority: 10,
            build: || Box::new(FieldOwnerTransformer),
        },
        PassDescriptor {
            priority: 20,
            build: || Box::new(StaticFieldInlinerTransformer),
        },
        PassDescriptor {
            priority: 30,
            build: || Box::new(TryCatchTransformer),
        },
        PassDescriptor {
            priority: 40,
            build: || Box::new(DeadCodeTransformer),
        },
        PassDescriptor {
            priority: 50,
            build: || Box::new(ControlFlowTransformer),
        },
        PassDescriptor {
            priority: 60,
            build: || Box::new(OpaquePredicateTransformer),
        },
        PassDescriptor {
            priority: 65,
            build: || Box::new(OpaqueArgumentTransformer),
        },
        PassDescriptor {
            priority: 70,
            build: || Box::new(UnusedFieldTransformer),
        },
        PassDescriptor {
            priority: 80,
            build: || Box::new(ErrorConstructorTransformer),
        },
        PassDescriptor {
            priority: 90,
            build: || Box::new(UnusedMethodTransformer),
        },
        PassDescriptor {
            priority: 100,
            build: || Box::new(GotoTransformer),
        },
        PassDescriptor {
            priority: 110,
            build: || Box::new(MultiplierTransformer),
        },
        PassDescriptor {
            priority: 120,
            build: || Box::new(FieldSorterTransformer),
        },
        PassDescriptor {
            priority: 130,
            build: || Box::new(MethodSorterTransformer),
        },
        PassDescriptor {
            priority: 140,
            build: || Box::new(RenamerTransformer),
        },
        PassDescriptor {
            priority: 150,
            build: || Box::new(ComputeMaxsTransformer),
        },
    ]
}

/// Outcome of a single pass, serialized into the run report.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct PassReport {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) priority: u32,
    pub(crate) changed: usize,
    pub(crate) duration_ms: u128,
}

/// Ordered pass list executed over a class pool.
pub(crate) struct Pipeline {
    passes: Vec<(u32, Box<dyn Transformer>)>,
}

impl Pipeline {
    /// Instantiate and order the passes; two passes sharing a priority is a
    /// configuration error.
    pub(crate) fn new(descriptors: &[PassDescriptor]) -> Result<Self> {
        let mut passes: Vec<(u32, Box<dyn Transformer>)> = descriptors
            .iter()
            .map(|descriptor| (descriptor.priority, (descriptor.build)()))
            .collect();
        passes.sort_by_key(|(priority, _)| *priority);
        for pair in passes.windows(2) {
            let (left_priority, left) = &pair[0];
            let (right_priority, right) = &pair[1];
            if left_priority == right_priority {
                anyhow::bail!(
                    "unable to load transformer '{}': priority {} is already used by '{}'",
                    right.metadata().name,
                    right_priority,
                    left.metadata().name
                );
            }
        }
        info!("Discovered {} bytecode transformers.", passes.len());
        Ok(Self { passes })
    }

    pub(crate) fn len(&self) -> usize {
        self.passes.len()
    }

    /// Run every pass in priority order; the first failing pass aborts the run.
    pub(crate) fn run(
        &self,
        pool: &mut ClassPool,
        telemetry: Option<&Telemetry>,
    ) -> Result<Vec<PassReport>> {
        let mut reports = Vec::with_capacity(self.passes.len());
        for (priority, pass) in &self.passes {
            let metadata = pass.metadata();
            info!("Running bytecode transformer: {}", metadata.name);
            debug!("{}", metadata.description);
            let attributes = [
                KeyValue::new("jdeob.pass_id", metadata.id),
                KeyValue::new("jdeob.priority", i64::from(*priority)),
            ];
            let started_at = Instant::now();
            let output: TransformOutput = with_span(
                telemetry,
                &format!("pass:{}", metadata.id),
                &attributes,
                || pass.run(pool),
            )
            .map_err(|error| error.context(format!("transformer {} failed", metadata.name)))?;
            let duration_ms = started_at.elapsed().as_millis();
            if let Some(replacement) = output.replacement {
                *pool = replacement;
            }
            info!(
                "Finished bytecode transformer: {} ({} changes)",
                metadata.name, output.changed
            );
            reports.push(PassReport {
                id: metadata.id.to_string(),
                name: metadata.name.to_string(),
                priority: *priority,
                changed: output.changed,
                duration_ms,
            });
        }
        info!("Completed deobfuscation.");
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC, Class, Constant, Field, Instruction, Method};
    use crate::modular::invert_i32;
    use crate::opcodes;
    use crate::test_harness::{Evaluator, MethodBuilder, Slot, class_with, opcodes_of, pool_of};
    use crate::transforms::TransformerMetadata;

    struct CountingTransformer;

    impl Transformer for CountingTransformer {
        fn metadata(&self) -> TransformerMetadata {
            TransformerMetadata {
                id: "counting",
                name: "Counting",
                description: "Counts classes",
            }
        }

        fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
            Ok(TransformOutput::changed(pool.len()))
        }
    }

    struct ReplacingTransformer;

    impl Transformer for ReplacingTransformer {
        fn metadata(&self) -> TransformerMetadata {
            TransformerMetadata {
                id: "replacing",
                name: "Replacing",
                description: "Swaps in a new pool",
            }
        }

        fn run(&self, _pool: &mut ClassPool) -> Result<TransformOutput> {
            let replacement: ClassPool = vec![Class::new("Fresh", Some("java/lang/Object"))]
                .into_iter()
                .collect();
            Ok(TransformOutput::replaced(1, replacement))
        }
    }

    struct FailingTransformer;

    impl Transformer for FailingTransformer {
        fn metadata(&self) -> TransformerMetadata {
            TransformerMetadata {
                id: "failing",
                name: "Failing",
                description: "Always fails",
            }
        }

        fn run(&self, _pool: &mut ClassPool) -> Result<TransformOutput> {
            anyhow::bail!("invariant violated")
        }
    }

    fn sample_pool() -> ClassPool {
        vec![
            Class::new("A", Some("java/lang/Object")),
            Class::new("B", Some("java/lang/Object")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn default_passes_have_unique_priorities() {
        let pipeline = Pipeline::new(&default_passes()).expect("pipeline");
        assert_eq!(pipeline.len(), default_passes().len());
    }

    #[test]
    fn duplicate_priority_is_rejected() {
        let descriptors = [
            PassDescriptor {
                priority: 5,
                build: || Box::new(CountingTransformer),
            },
            PassDescriptor {
                priority: 5,
                build: || Box::new(ReplacingTransformer),
            },
        ];

        let error = Pipeline::new(&descriptors).err().expect("configuration error");

        let message = error.to_string();
        assert!(message.contains("priority 5"));
        assert!(message.contains("Counting") || message.contains("Replacing"));
    }

    #[test]
    fn passes_run_in_priority_order_and_replace_pool() {
        let descriptors = [
            PassDescriptor {
                priority: 20,
                build: || Box::new(CountingTransformer),
            },
            PassDescriptor {
                priority: 10,
                build: || Box::new(ReplacingTransformer),
            },
        ];
        let pipeline = Pipeline::new(&descriptors).expect("pipeline");
        let mut pool = sample_pool();

        let reports = pipeline.run(&mut pool, None).expect("run");

        assert_eq!(reports[0].id, "replacing");
        assert_eq!(reports[1].id, "counting");
        assert_eq!(reports[1].changed, 1);
        assert!(pool.contains("Fresh"));
        assert!(!pool.contains("A"));
    }

    #[test]
    fn failing_pass_aborts_run() {
        let descriptors = [
            PassDescriptor {
                priority: 1,
                build: || Box::new(FailingTransformer),
            },
            PassDescriptor {
                priority: 2,
                build: || Box::new(CountingTransformer),
            },
        ];
        let pipeline = Pipeline::new(&descriptors).expect("pipeline");
        let mut pool = sample_pool();

        let error = pipeline.run(&mut pool, None).expect_err("failure");

        assert!(format!("{error:#}").contains("invariant violated"));
    }

    const ENCODER: i32 = 1_364_231_567;

    fn method<'a>(pool: &'a ClassPool, class: &str, name: &str) -> &'a Method {
        pool.get(class)
            .and_then(|class| class.methods.iter().find(|method| method.name == name))
            .expect("method")
    }

    fn account() -> Class {
        let decoder = invert_i32(ENCODER).expect("odd");
        let mut init = MethodBuilder::new("<init>", "()V", ACC_PUBLIC);
        init.var(opcodes::ALOAD, 0)
            .invoke(opcodes::INVOKESPECIAL, "java/lang/Object", "<init>", "()V")
            .var(opcodes::ALOAD, 0)
            .int(5)
            .invoke(opcodes::INVOKEVIRTUAL, "Account", "set", "(I)V")
            .var(opcodes::ALOAD, 0)
            .invoke(opcodes::INVOKEVIRTUAL, "Account", "get", "()I")
            .op(opcodes::POP)
            .op(opcodes::RETURN);
        let mut set = MethodBuilder::new("set", "(I)V", ACC_PUBLIC);
        set.var(opcodes::ALOAD, 0)
            .var(opcodes::ILOAD, 1)
            .ldc(Constant::Int(ENCODER))
            .op(opcodes::IMUL)
            .field(opcodes::PUTFIELD, "Account", "x", "I")
            .op(opcodes::RETURN);
        let mut get = MethodBuilder::new("get", "()I", ACC_PUBLIC);
        get.var(opcodes::ALOAD, 0)
            .field(opcodes::GETFIELD, "Account", "x", "I")
            .ldc(Constant::Int(decoder))
            .op(opcodes::IMUL)
            .op(opcodes::IRETURN);
        class_with(
            "Account",
            None,
            vec![Field::new("x", "I", 0)],
            vec![init.build(), set.build(), get.build()],
        )
    }

    #[test]
    fn default_passes_strip_field_multipliers() {
        let mut pool = pool_of(vec![account()]);

        let reports = Pipeline::new(&default_passes())
            .expect("pipeline")
            .run(&mut pool, None)
            .expect("run");

        let multiplier = reports
            .iter()
            .find(|report| report.id == "multiplier")
            .expect("multiplier report");
        assert_eq!(multiplier.changed, 2);
        let decoder = invert_i32(ENCODER).expect("odd");
        for name in ["set", "get"] {
            let constants: Vec<_> = method(&pool, "Account", name)
                .instructions
                .iter()
                .filter_map(Instruction::int_constant)
                .collect();
            assert!(!constants.contains(&ENCODER), "{name} still encodes");
            assert!(!constants.contains(&decoder), "{name} still decodes");
        }
        for value in [1234, -7, i32::MAX] {
            let mut evaluator = Evaluator::default();
            evaluator
                .run(method(&pool, "Account", "set"), &[Slot::Int(value)])
                .expect("set");
            let read = evaluator.run(method(&pool, "Account", "get"), &[]).expect("get");
            assert_eq!(read, Some(Slot::Int(value)));
        }
    }

    #[test]
    fn default_passes_drop_runtime_exception_handlers() {
        let mut builder = MethodBuilder::new("main", "([Ljava/lang/String;)V", ACC_PUBLIC | ACC_STATIC);
        let start = builder.label();
        let end = builder.label();
        let handler = builder.label();
        builder
            .mark(start)
            .invoke(opcodes::INVOKESTATIC, "Worker", "work", "()V")
            .mark(end)
            .op(opcodes::RETURN)
            .mark(handler)
            .type_insn(opcodes::NEW, "java/lang/IllegalStateException")
            .op(opcodes::DUP)
            .invoke(
                opcodes::INVOKESPECIAL,
                "java/lang/IllegalStateException",
                "<init>",
                "()V",
            )
            .op(opcodes::ATHROW)
            .try_catch(start, end, handler, Some("java/lang/RuntimeException"));
        let mut pool = pool_of(vec![class_with("Job", None, Vec::new(), vec![builder.build()])]);

        Pipeline::new(&default_passes())
            .expect("pipeline")
            .run(&mut pool, None)
            .expect("run");

        let main = method(&pool, "Job", "main");
        assert!(main.try_catch_blocks.is_empty());
        assert_eq!(opcodes_of(main), vec![opcodes::INVOKESTATIC, opcodes::RETURN]);
    }
}
