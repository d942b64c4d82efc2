use anyhow::Result;
use tracing::info;

use crate::ir::ClassPool;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Orders methods by static-ness and then by their first source line.
pub(crate) struct MethodSorterTransformer;

impl Transformer for MethodSorterTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "method-sorter",
            name: "Method sorting",
            description: "Puts instance methods first, then sorts by first line number",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut counter = 0;
        for class in pool.iter_mut() {
            let before: Vec<(String, String)> = class
                .methods
                .iter()
                .map(|method| (method.name.clone(), method.descriptor.clone()))
                .collect();
            // Stable: methods without line numbers keep their relative order at the end.
            class
                .methods
                .sort_by_key(|method| (method.is_static(), method.first_line().map_or(u32::MAX, u32::from)));
            let moved = class
                .methods
                .iter()
                .zip(&before)
                .any(|(method, (name, descriptor))| method.name != *name || method.descriptor != *descriptor);
            if moved {
                counter += 1;
            }
        }
        info!("Sorted methods by line number in {counter} classes.");
        Ok(TransformOutput::changed(counter))
    }
}
