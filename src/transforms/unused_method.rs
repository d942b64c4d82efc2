use std::collections::BTreeSet;

use anyhow::Result;
use tracing::info;

use crate::ir::{ACC_PUBLIC, ACC_STATIC, Class, ClassPool, Instruction, Method};
use crate::jdk::is_jdk_method;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Removes methods that are never invoked, directly or through an override.
pub(crate) struct UnusedMethodTransformer;

impl Transformer for UnusedMethodTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "unused-method",
            name: "Unused method removal",
            description: "Deletes methods without call sites in the class hierarchy",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let unused = unused_methods(pool);
        let mut counter = 0;
        for class in pool.iter_mut() {
            let class_name = class.name.clone();
            let before = class.methods.len();
            class.methods.retain(|method| {
                !unused.contains(&format!("{}.{}{}", class_name, method.name, method.descriptor))
            });
            counter += before - class.methods.len();
        }
        info!("Removed {counter} unused methods.");
        Ok(TransformOutput::changed(counter))
    }
}

fn unused_methods(pool: &ClassPool) -> BTreeSet<String> {
    let used: BTreeSet<String> = pool
        .iter()
        .flat_map(|class| class.methods.iter())
        .flat_map(|method| method.instructions.iter())
        .filter_map(|instruction| match instruction {
            Instruction::Method(call) => Some(call.key()),
            _ => None,
        })
        .collect();

    let mut unused = BTreeSet::new();
    for class in pool.iter() {
        for method in &class.methods {
            if !is_method_used(pool, class, method, &used) {
                unused.insert(format!("{}.{}{}", class.name, method.name, method.descriptor));
            }
        }
    }
    unused
}

fn is_method_used(pool: &ClassPool, class: &Class, method: &Method, used: &BTreeSet<String>) -> bool {
    if method.name == "<init>" || method.name == "<clinit>" || is_main(method) {
        return true;
    }
    let signature = |owner: &str| format!("{}.{}{}", owner, method.name, method.descriptor);
    if used.contains(&signature(&class.name)) {
        return true;
    }

    let mut seen = BTreeSet::new();
    let mut level = pool.direct_supers(&class.name);
    while !level.is_empty() {
        for owner in &level {
            if is_jdk_method(owner, &method.name, &method.descriptor) || used.contains(&signature(owner)) {
                return true;
            }
        }
        level = level
            .into_iter()
            .filter(|owner| seen.insert(owner.clone()) && pool.contains(owner))
            .flat_map(|owner| pool.direct_supers(&owner))
            .collect();
    }

    let mut seen = BTreeSet::new();
    let mut level = pool.direct_subs(&class.name);
    while !level.is_empty() {
        if level.iter().any(|owner| used.contains(&signature(owner))) {
            return true;
        }
        level = level
            .into_iter()
            .filter(|owner| seen.insert(owner.clone()))
            .flat_map(|owner| pool.direct_subs(&owner))
            .collect();
    }
    false
}

fn is_main(method: &Method) -> bool {
    method.name == "main"
        && method.descriptor == "([Ljava/lang/String;)V"
        && method.access & (ACC_PUBLIC | ACC_STATIC) == ACC_PUBLIC | ACC_STATIC
}
