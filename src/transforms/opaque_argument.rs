use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use tracing::info;

use crate::descriptor::{drop_last_parameter, is_int_like, last_parameter};
use crate::ir::{ClassPool, Instruction, Method};
use crate::jdk::is_jdk_method;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Drops the trailing opaque argument from method groups that never read it.
pub(crate) struct OpaqueArgumentTransformer;

/// A method declaration located by class name and method index.
type MethodRef = (String, usize);

impl Transformer for OpaqueArgumentTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "opaque-argument",
            name: "Opaque predicate argument removal",
            description: "Removes unused trailing int parameters together with their call-site constants",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let tops = top_declarations(pool);
        let mut groups: BTreeMap<String, Vec<MethodRef>> = BTreeMap::new();
        for class in pool.iter() {
            for (index, method) in class.methods.iter().enumerate() {
                if let Some(top) = resolve(pool, &class.name, &method.name, &method.descriptor, &tops) {
                    groups.entry(top).or_default().push((class.name.clone(), index));
                }
            }
        }

        let mut rejected = BTreeSet::new();
        for (top, members) in &groups {
            for (class_name, index) in members {
                let Some(method) = pool.get(class_name).map(|class| &class.methods[*index]) else {
                    continue;
                };
                if !ignores_last_int_parameter(method)? || overrides_jdk(pool, class_name, method) {
                    rejected.insert(top.clone());
                    break;
                }
                let shortened = drop_last_parameter(&method.descriptor)?;
                if pool
                    .get(class_name)
                    .is_some_and(|class| class.method(&method.name, &shortened).is_some())
                {
                    rejected.insert(top.clone());
                    break;
                }
            }
        }
        groups.retain(|top, _| !rejected.contains(top));

        let mut eligible: BTreeSet<String> = groups.keys().cloned().collect();
        for class in pool.iter() {
            for method in &class.methods {
                for (index, instruction) in method.instructions.iter().enumerate() {
                    let Instruction::Method(call) = instruction else {
                        continue;
                    };
                    let Some(top) = resolve(pool, &call.owner, &call.name, &call.descriptor, &eligible) else {
                        continue;
                    };
                    let pushes_constant = index > 0 && method.instructions[index - 1].int_constant().is_some();
                    if !pushes_constant {
                        eligible.remove(&top);
                    }
                }
            }
        }
        groups.retain(|top, _| eligible.contains(top));

        let call_sites = call_sites_to_rewrite(pool, &eligible);
        let mut instructions = 0;
        // Descending instruction order keeps the remaining indices valid.
        for (class_name, method_index, index) in call_sites.iter().rev() {
            let Some(class) = pool.get_mut(class_name) else {
                continue;
            };
            let method = &mut class.methods[*method_index];
            if let Instruction::Method(call) = &mut method.instructions[*index] {
                call.descriptor = drop_last_parameter(&call.descriptor)?;
            }
            method.instructions.remove(*index - 1);
            instructions += 1;
        }

        let mut methods = 0;
        for (class_name, index) in groups.values().flatten() {
            let Some(class) = pool.get_mut(class_name) else {
                continue;
            };
            let method = &mut class.methods[*index];
            method.descriptor = drop_last_parameter(&method.descriptor)?;
            methods += 1;
        }

        info!("Removed opaque predicate arguments: [methods: {methods}, instructions: {instructions}].");
        Ok(TransformOutput::changed(methods + instructions))
    }
}

/// `owner.name+descriptor` of every method no pool super type declares.
fn top_declarations(pool: &ClassPool) -> BTreeSet<String> {
    let mut tops = BTreeSet::new();
    for class in pool.iter() {
        let supers = pool.all_supers(&class.name);
        for method in &class.methods {
            let inherited = method.name != "<init>"
                && supers.iter().any(|name| {
                    pool.get(name)
                        .is_some_and(|ancestor| ancestor.method(&method.name, &method.descriptor).is_some())
                });
            if !inherited {
                tops.insert(format!("{}.{}{}", class.name, method.name, method.descriptor));
            }
        }
    }
    tops
}

/// Finds the declaration in `candidates` that a reference through `owner` resolves to.
fn resolve(
    pool: &ClassPool,
    owner: &str,
    name: &str,
    descriptor: &str,
    candidates: &BTreeSet<String>,
) -> Option<String> {
    let key = format!("{owner}.{name}{descriptor}");
    if candidates.contains(&key) {
        return Some(key);
    }
    if name == "<init>" || !pool.contains(owner) {
        return None;
    }
    pool.direct_supers(owner)
        .iter()
        .find_map(|parent| resolve(pool, parent, name, descriptor, candidates))
}

/// True when the last parameter is int-like and no instruction touches its slot.
fn ignores_last_int_parameter(method: &Method) -> Result<bool> {
    let Some((slot, ty)) = last_parameter(&method.descriptor, method.is_static())? else {
        return Ok(false);
    };
    if !is_int_like(&ty) || method.is_native() {
        return Ok(false);
    }
    if method.is_abstract() {
        return Ok(true);
    }
    let touched = method.instructions.iter().any(|instruction| match instruction {
        Instruction::Var { index, .. } | Instruction::Iinc { index, .. } => *index == slot,
        _ => false,
    });
    Ok(!touched)
}

fn overrides_jdk(pool: &ClassPool, class_name: &str, method: &Method) -> bool {
    pool.all_supers(class_name)
        .iter()
        .filter(|name| !pool.contains(name))
        .any(|name| is_jdk_method(name, &method.name, &method.descriptor))
}

/// `(class, method index, instruction index)` of every call into an eligible group.
fn call_sites_to_rewrite(pool: &ClassPool, eligible: &BTreeSet<String>) -> Vec<(String, usize, usize)> {
    let mut sites = Vec::new();
    for class in pool.iter() {
        for (method_index, method) in class.methods.iter().enumerate() {
            for (index, instruction) in method.instructions.iter().enumerate() {
                let Instruction::Method(call) = instruction else {
                    continue;
                };
                if resolve(pool, &call.owner, &call.name, &call.descriptor, eligible).is_some() {
                    sites.push((class.name.clone(), method_index, index));
                }
            }
        }
    }
    sites
}
