use std::collections::BTreeSet;

use anyhow::Result;
use tracing::info;

use crate::ir::{ClassPool, Instruction};
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Removes non-final fields that no instruction references.
pub(crate) struct UnusedFieldTransformer;

impl Transformer for UnusedFieldTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "unused-field",
            name: "Unused field removal",
            description: "Deletes non-final fields without any field instruction",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let used = used_fields(pool);
        let mut counter = 0;
        for class in pool.iter_mut() {
            let before = class.fields.len();
            let class_name = class.name.clone();
            class
                .fields
                .retain(|field| field.is_final() || used.contains(&format!("{}.{}", class_name, field.name)));
            counter += before - class.fields.len();
        }
        info!("Removed {counter} unused fields.");
        Ok(TransformOutput::changed(counter))
    }
}

fn used_fields(pool: &ClassPool) -> BTreeSet<String> {
    pool.iter()
        .flat_map(|class| class.methods.iter())
        .flat_map(|method| method.instructions.iter())
        .filter_map(|instruction| match instruction {
            Instruction::Field(field) => Some(field.key()),
            _ => None,
        })
        .collect()
}
