use anyhow::Result;
use tracing::info;

use crate::ir::{ClassPool, FieldInsn, Instruction};
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Points every field instruction at the class that declares the field.
pub(crate) struct FieldOwnerTransformer;

impl Transformer for FieldOwnerTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "field-owner",
            name: "Field owner resolution",
            description: "Rewrites field instruction owners to the declaring pool class",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut rewrites = Vec::new();
        for class in pool.iter() {
            for (method_index, method) in class.methods.iter().enumerate() {
                for (index, instruction) in method.instructions.iter().enumerate() {
                    let Instruction::Field(field) = instruction else {
                        continue;
                    };
                    let owner = declaring_owner(pool, field);
                    if owner != field.owner {
                        rewrites.push((class.name.clone(), method_index, index, owner));
                    }
                }
            }
        }

        let counter = rewrites.len();
        for (class_name, method_index, index, owner) in rewrites {
            let Some(class) = pool.get_mut(&class_name) else {
                continue;
            };
            if let Some(Instruction::Field(field)) = class.methods[method_index].instructions.get_mut(index) {
                field.owner = owner;
            }
        }
        info!("Resolved {counter} field instruction owners.");
        Ok(TransformOutput::changed(counter))
    }
}

/// Walks super classes from the referenced owner until one declares a field
/// with the same name, descriptor and static-ness.
fn declaring_owner(pool: &ClassPool, field: &FieldInsn) -> String {
    let mut current = field.owner.clone();
    loop {
        let Some(class) = pool.get(&current) else {
            return current;
        };
        let declared = class.fields.iter().any(|candidate| {
            candidate.name == field.name
                && candidate.descriptor == field.descriptor
                && candidate.is_static() == field.is_static()
        });
        if declared {
            return current;
        }
        match &class.super_name {
            Some(super_name) => current = super_name.clone(),
            None => return field.owner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC, Field};
    use crate::opcodes;
    use crate::test_harness::{MethodBuilder, class_with, pool_of};

    fn owners(pool: &ClassPool, class: &str) -> Vec<String> {
        pool.get(class).expect("class").methods[0]
            .instructions
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::Field(field) => Some(field.owner.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn resolves_inherited_static_field() {
        let base = class_with("Base", None, vec![Field::new("count", "I", ACC_STATIC)], Vec::new());
        let mid = class_with("Mid", Some("Base"), Vec::new(), Vec::new());
        let mut reader = MethodBuilder::new("read", "()I", ACC_PUBLIC | ACC_STATIC);
        reader
            .field(opcodes::GETSTATIC, "Leaf", "count", "I")
            .op(opcodes::IRETURN);
        let leaf = class_with("Leaf", Some("Mid"), Vec::new(), vec![reader.build()]);
        let mut pool = pool_of(vec![base, mid, leaf]);

        let output = FieldOwnerTransformer.run(&mut pool).expect("run");

        assert_eq!(output.changed, 1);
        assert_eq!(owners(&pool, "Leaf"), vec!["Base".to_string()]);
    }

    #[test]
    fn static_ness_must_match_and_foreign_owners_stay() {
        let base = class_with("Base", None, vec![Field::new("count", "I", ACC_STATIC)], Vec::new());
        let mut reader = MethodBuilder::new("read", "()I", ACC_PUBLIC);
        reader
            .var(opcodes::ALOAD, 0)
            .field(opcodes::GETFIELD, "Leaf", "count", "I")
            .field(opcodes::GETSTATIC, "Leaf", "count", "I")
            .field(opcodes::GETSTATIC, "java/lang/System", "out", "Ljava/io/PrintStream;")
            .op(opcodes::IRETURN);
        let leaf = class_with(
            "Leaf",
            Some("Base"),
            vec![Field::new("count", "I", ACC_PUBLIC)],
            vec![reader.build()],
        );
        let mut pool = pool_of(vec![base, leaf]);

        let output = FieldOwnerTransformer.run(&mut pool).expect("run");

        assert_eq!(output.changed, 1);
        assert_eq!(
            owners(&pool, "Leaf"),
            vec![
                "Leaf".to_string(),
                "Base".to_string(),
                "java/lang/System".to_string()
            ]
        );
    }
}
