use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use tracing::{debug, info};

use crate::ir::{ClassPool, Instruction};
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Moves static fields into the only class that uses them.
pub(crate) struct StaticFieldInlinerTransformer;

impl Transformer for StaticFieldInlinerTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "static-field-inliner",
            name: "Static field relocation",
            description: "Relocates static fields referenced from a single foreign class",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let references = referencing_classes(pool);
        let mut moves = Vec::new();
        for class in pool.iter() {
            for field in class.fields.iter().filter(|field| field.is_static()) {
                let key = (class.name.clone(), field.name.clone(), field.descriptor.clone());
                let Some(classes) = references.get(&key) else {
                    continue;
                };
                if classes.len() != 1 {
                    continue;
                }
                let Some(target) = classes.iter().next() else {
                    continue;
                };
                if *target != class.name {
                    moves.push((key, target.clone()));
                }
            }
        }

        let mut counter = 0;
        for ((owner, name, descriptor), target) in moves {
            let eligible = pool
                .get(&target)
                .is_some_and(|class| !class.is_interface() && !class.fields.iter().any(|field| field.name == name));
            if !eligible {
                debug!("Skipping {owner}.{name}: {target} cannot receive it");
                continue;
            }
            let Some(mut source) = pool.remove(&owner) else {
                continue;
            };
            let position = source
                .fields
                .iter()
                .position(|field| field.name == name && field.descriptor == descriptor);
            let moved = position.map(|position| source.fields.remove(position));
            pool.insert(source);
            let Some(field) = moved else {
                continue;
            };
            let Some(destination) = pool.get_mut(&target) else {
                continue;
            };
            destination.fields.push(field);
            for method in &mut destination.methods {
                for instruction in &mut method.instructions {
                    let Instruction::Field(insn) = instruction else {
                        continue;
                    };
                    if insn.owner == owner && insn.name == name && insn.descriptor == descriptor {
                        insn.owner = target.clone();
                    }
                }
            }
            counter += 1;
        }
        info!("Inlined {counter} static single reference fields.");
        Ok(TransformOutput::changed(counter))
    }
}

/// Classes whose code references each `(owner, name, descriptor)` field.
fn referencing_classes(pool: &ClassPool) -> BTreeMap<(String, String, String), BTreeSet<String>> {
    let mut references: BTreeMap<_, BTreeSet<String>> = BTreeMap::new();
    for class in pool.iter() {
        for method in &class.methods {
            for instruction in &method.instructions {
                if let Instruction::Field(field) = instruction {
                    references
                        .entry((field.owner.clone(), field.name.clone(), field.descriptor.clone()))
                        .or_default()
                        .insert(class.name.clone());
                }
            }
        }
    }
    references
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_INTERFACE, ACC_PUBLIC, ACC_STATIC, Field};
    use crate::opcodes;
    use crate::test_harness::{MethodBuilder, class_with, pool_of};

    fn reader(field_owner: &str) -> crate::ir::Method {
        let mut builder = MethodBuilder::new("read", "()I", ACC_PUBLIC | ACC_STATIC);
        builder
            .field(opcodes::GETSTATIC, field_owner, "value", "I")
            .op(opcodes::IRETURN);
        builder.build()
    }

    #[test]
    fn moves_field_into_single_user() {
        let holder = class_with("Holder", None, vec![Field::new("value", "I", ACC_STATIC)], Vec::new());
        let user = class_with("User", None, Vec::new(), vec![reader("Holder")]);
        let mut pool = pool_of(vec![holder, user]);

        let output = StaticFieldInlinerTransformer.run(&mut pool).expect("run");

        assert_eq!(output.changed, 1);
        assert!(pool.get("Holder").expect("holder").fields.is_empty());
        let user = pool.get("User").expect("user");
        assert_eq!(user.fields[0].name, "value");
        assert!(matches!(
            &user.methods[0].instructions[0],
            Instruction::Field(field) if field.owner == "User"
        ));
    }

    #[test]
    fn keeps_fields_shared_or_clashing_or_in_interfaces() {
        let holder = class_with("Holder", None, vec![Field::new("value", "I", ACC_STATIC)], Vec::new());
        let first = class_with("First", None, Vec::new(), vec![reader("Holder")]);
        let second = class_with("Second", None, Vec::new(), vec![reader("Holder")]);
        let mut pool = pool_of(vec![holder, first, second]);
        assert_eq!(StaticFieldInlinerTransformer.run(&mut pool).expect("run").changed, 0);

        let holder = class_with("Holder", None, vec![Field::new("value", "I", ACC_STATIC)], Vec::new());
        let clash = class_with(
            "Clash",
            None,
            vec![Field::new("value", "J", ACC_STATIC)],
            vec![reader("Holder")],
        );
        let mut pool = pool_of(vec![holder, clash]);
        assert_eq!(StaticFieldInlinerTransformer.run(&mut pool).expect("run").changed, 0);

        let holder = class_with("Holder", None, vec![Field::new("value", "I", ACC_STATIC)], Vec::new());
        let mut interface = class_with("Api", None, Vec::new(), vec![reader("Holder")]);
        interface.access |= ACC_INTERFACE;
        let mut pool = pool_of(vec![holder, interface]);
        assert_eq!(StaticFieldInlinerTransformer.run(&mut pool).expect("run").changed, 0);
    }
}
