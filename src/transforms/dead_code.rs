use std::collections::BTreeSet;

use anyhow::Result;
use tracing::{info, warn};

use crate::dataflow::basic::BasicInterpreter;
use crate::dataflow::worklist::analyze;
use crate::ir::{ClassPool, Instruction, LabelId, Method};
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Removes instructions that no execution path reaches.
pub(crate) struct DeadCodeTransformer;

impl Transformer for DeadCodeTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "dead-code",
            name: "Dead code elimination",
            description: "Deletes instructions without an analysis frame",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut counter = 0;
        for class in pool.iter_mut() {
            for method in &mut class.methods {
                if !method.has_code() {
                    continue;
                }
                match remove_dead_code(method) {
                    Ok(removed) => counter += removed,
                    Err(error) => warn!(
                        "Failed to remove dead code in method {}.{}{}: {error:#}",
                        class.name, method.name, method.descriptor
                    ),
                }
            }
        }
        info!("Removed {counter} dead code instructions.");
        Ok(TransformOutput::changed(counter))
    }
}

/// Delete unreachable instructions, returning how many real instructions went away.
pub(crate) fn remove_dead_code(method: &mut Method) -> Result<usize> {
    let frames = analyze(method, &mut BasicInterpreter)?;
    let positions = method.label_positions();
    let reachable = |label: &LabelId| {
        positions
            .get(label)
            .is_some_and(|position| frames[*position].is_some())
    };
    method
        .try_catch_blocks
        .retain(|block| reachable(&block.handler));
    let pinned: BTreeSet<LabelId> = method
        .try_catch_blocks
        .iter()
        .flat_map(|block| [block.start, block.end, block.handler])
        .collect();

    let mut removed = 0;
    let instructions = std::mem::take(&mut method.instructions);
    method.instructions = instructions
        .into_iter()
        .zip(frames)
        .filter_map(|(instruction, frame)| {
            if frame.is_some() {
                return Some(instruction);
            }
            match &instruction {
                Instruction::Label(label) if pinned.contains(label) => Some(instruction),
                _ => {
                    if !instruction.is_pseudo() {
                        removed += 1;
                    }
                    None
                }
            }
        })
        .collect();
    Ok(removed)
}
