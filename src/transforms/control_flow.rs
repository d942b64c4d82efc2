use anyhow::Result;
use tracing::{info, warn};

use crate::cfg::ControlFlowGraph;
use crate::ir::ClassPool;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Lays out basic blocks in the order they execute.
pub(crate) struct ControlFlowTransformer;

impl Transformer for ControlFlowTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "control-flow",
            name: "Control-flow reordering",
            description: "Reorders basic blocks of methods without exception handlers",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut counter = 0;
        for class in pool.iter_mut() {
            for method in &mut class.methods {
                // Exception ranges are index based and not remapped here.
                if !method.try_catch_blocks.is_empty() || !method.has_code() {
                    continue;
                }
                match ControlFlowGraph::build(method) {
                    Ok(graph) => {
                        method.instructions = graph.reorder(&method.instructions);
                        counter += graph.blocks.len();
                    }
                    Err(error) => warn!(
                        "Failed to build control-flow graph for {}.{}{}: {error:#}",
                        class.name, method.name, method.descriptor
                    ),
                }
            }
        }
        info!("Reordered {counter} control-flow blocks.");
        Ok(TransformOutput::changed(counter))
    }
}
