use std::collections::BTreeMap;

use anyhow::Result;
use tracing::info;

use crate::descriptor::map_descriptor;
use crate::ir::{Class, ClassPool, Constant, Instruction, Method};
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Replaces short obfuscated names with numbered readable ones.
pub(crate) struct RenamerTransformer;

impl Transformer for RenamerTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "renamer",
            name: "Renaming",
            description: "Renames short class, method and field names and rebuilds the pool",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mappings = Mappings::generate(pool);
        info!(
            "Renamed [classes: {}, methods: {}, fields: {}].",
            mappings.class_count, mappings.method_count, mappings.field_count
        );
        let changed = mappings.class_count + mappings.method_count + mappings.field_count;
        let renamed: ClassPool = pool.iter().map(|class| mappings.apply(class)).collect();
        Ok(TransformOutput::replaced(changed, renamed))
    }
}

#[derive(Default)]
struct Mappings {
    classes: BTreeMap<String, String>,
    /// Keyed by `owner.name+descriptor` with original names.
    methods: BTreeMap<String, String>,
    /// Keyed by `owner.name` with original names.
    fields: BTreeMap<String, String>,
    class_count: usize,
    method_count: usize,
    field_count: usize,
}

impl Mappings {
    fn generate(pool: &ClassPool) -> Self {
        let mut mappings = Mappings::default();
        for class in pool.iter() {
            if class.name.len() <= 2 {
                mappings.class_count += 1;
                mappings
                    .classes
                    .insert(class.name.clone(), format!("class{}", mappings.class_count));
            }
        }

        for class in pool.iter() {
            for method in &class.methods {
                if !is_obfuscated_method_name(&method.name)
                    || method.name.contains('<')
                    || method.is_native()
                    || declared_by_super(pool, &class.name, |ancestor| {
                        ancestor.method(&method.name, &method.descriptor).is_some()
                    })
                {
                    continue;
                }
                mappings.method_count += 1;
                let name = format!("method{}", mappings.method_count);
                for owner in with_subclasses(pool, &class.name) {
                    mappings
                        .methods
                        .insert(format!("{owner}.{}{}", method.name, method.descriptor), name.clone());
                }
            }
        }

        for class in pool.iter() {
            for field in class.fields.iter().filter(|field| field.name.len() <= 2) {
                if declared_by_super(pool, &class.name, |ancestor| {
                    ancestor.field(&field.name, &field.descriptor).is_some()
                }) {
                    continue;
                }
                mappings.field_count += 1;
                let name = format!("field{}", mappings.field_count);
                for owner in with_subclasses(pool, &class.name) {
                    mappings.fields.insert(format!("{owner}.{}", field.name), name.clone());
                }
            }
        }
        mappings
    }

    fn class_name(&self, name: &str) -> String {
        if name.starts_with('[') {
            return self.descriptor(name);
        }
        self.classes.get(name).cloned().unwrap_or_else(|| name.to_string())
    }

    fn descriptor(&self, descriptor: &str) -> String {
        map_descriptor(descriptor, |name| self.classes.get(name).cloned())
    }

    fn method_name(&self, owner: &str, name: &str, descriptor: &str) -> String {
        self.methods
            .get(&format!("{owner}.{name}{descriptor}"))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn field_name(&self, owner: &str, name: &str) -> String {
        self.fields
            .get(&format!("{owner}.{name}"))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn apply(&self, class: &Class) -> Class {
        let mut renamed = class.clone();
        renamed.name = self.class_name(&class.name);
        renamed.super_name = class.super_name.as_deref().map(|name| self.class_name(name));
        renamed.interfaces = class.interfaces.iter().map(|name| self.class_name(name)).collect();
        for field in &mut renamed.fields {
            field.name = self.field_name(&class.name, &field.name);
            field.descriptor = self.descriptor(&field.descriptor);
        }
        for method in &mut renamed.methods {
            self.apply_method(&class.name, method);
        }
        renamed
    }

    fn apply_method(&self, owner: &str, method: &mut Method) {
        method.name = self.method_name(owner, &method.name, &method.descriptor);
        method.descriptor = self.descriptor(&method.descriptor);
        method.exceptions = method.exceptions.iter().map(|name| self.class_name(name)).collect();
        for block in &mut method.try_catch_blocks {
            block.catch_type = block.catch_type.as_deref().map(|name| self.class_name(name));
        }
        for instruction in &mut method.instructions {
            match instruction {
                Instruction::Type { descriptor, .. } => *descriptor = self.class_name(descriptor),
                Instruction::MultiANewArray { descriptor, .. } => *descriptor = self.descriptor(descriptor),
                Instruction::Ldc(Constant::Class(name)) => *name = self.class_name(name),
                Instruction::Field(field) => {
                    field.name = self.field_name(&field.owner, &field.name);
                    field.owner = self.class_name(&field.owner);
                    field.descriptor = self.descriptor(&field.descriptor);
                }
                Instruction::Method(call) => {
                    call.name = self.method_name(&call.owner, &call.name, &call.descriptor);
                    call.owner = self.class_name(&call.owner);
                    call.descriptor = self.descriptor(&call.descriptor);
                }
                _ => {}
            }
        }
    }
}

fn is_obfuscated_method_name(name: &str) -> bool {
    name.len() <= 2 || (name.len() == 3 && name.starts_with("aa"))
}

/// True when a transitive pool super type of `class_name` satisfies `declares`.
fn declared_by_super<F>(pool: &ClassPool, class_name: &str, declares: F) -> bool
where
    F: Fn(&Class) -> bool,
{
    pool.all_supers(class_name)
        .iter()
        .filter_map(|name| pool.get(name))
        .any(declares)
}

/// `class_name` followed by every pool class that transitively extends or implements it.
fn with_subclasses(pool: &ClassPool, class_name: &str) -> Vec<String> {
    let mut found = vec![class_name.to_string()];
    let mut index = 0;
    while index < found.len() {
        for sub in pool.direct_subs(&found[index]) {
            if !found.contains(&sub) {
                found.push(sub);
            }
        }
        index += 1;
    }
    found
}
