use anyhow::Result;
use tracing::info;

use crate::descriptor::java_type_name;
use crate::ir::{
    ACC_FINAL, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_STATIC, ACC_TRANSIENT, ACC_VOLATILE,
    ClassPool, Field,
};
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

/// Field modifiers in Java source order.
const FIELD_MODIFIERS: [(u16, &str); 7] = [
    (ACC_PUBLIC, "public"),
    (ACC_PROTECTED, "protected"),
    (ACC_PRIVATE, "private"),
    (ACC_STATIC, "static"),
    (ACC_FINAL, "final"),
    (ACC_TRANSIENT, "transient"),
    (ACC_VOLATILE, "volatile"),
];

pub(crate) struct FieldSorterTransformer;

impl Transformer for FieldSorterTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "field-sorter",
            name: "Field sorting",
            description: "Orders fields by static-ness, modifiers, type and name",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut counter = 0;
        for class in pool.iter_mut() {
            let before: Vec<String> = class.fields.iter().map(|field| field.name.clone()).collect();
            class.fields.sort_by_cached_key(sort_key);
            if class.fields.iter().map(|field| &field.name).ne(before.iter()) {
                counter += 1;
            }
        }
        info!("Re-ordered fields within {counter} classes.");
        Ok(TransformOutput::changed(counter))
    }
}

fn sort_key(field: &Field) -> (bool, String, String, String) {
    (
        !field.is_static(),
        modifiers(field.access),
        java_type_name(&field.descriptor),
        field.name.clone(),
    )
}

/// Space separated modifier keywords, as Java prints them.
fn modifiers(access: u16) -> String {
    FIELD_MODIFIERS
        .iter()
        .filter(|(flag, _)| access & flag != 0)
        .map(|(_, keyword)| *keyword)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{class_with, pool_of};

    #[test]
    fn static_fields_first_then_modifiers_type_and_name() {
        let fields = vec![
            Field::new("b", "I", ACC_PUBLIC),
            Field::new("a", "Ljava/lang/String;", ACC_PUBLIC),
            Field::new("z", "I", ACC_PRIVATE | ACC_STATIC),
            Field::new("c", "I", ACC_PRIVATE),
            Field::new("y", "J", ACC_PUBLIC | ACC_STATIC),
        ];
        let mut pool = pool_of(vec![class_with("A", None, fields, Vec::new())]);

        let output = FieldSorterTransformer.run(&mut pool).expect("run");

        let names: Vec<_> = pool
            .get("A")
            .expect("class")
            .fields
            .iter()
            .map(|field| field.name.as_str())
            .collect();
        assert_eq!(output.changed, 1);
        assert_eq!(names, vec!["z", "y", "c", "b", "a"]);
    }

    #[test]
    fn modifier_string_follows_source_order() {
        assert_eq!(modifiers(ACC_STATIC | ACC_FINAL | ACC_PUBLIC), "public static final");
        assert_eq!(modifiers(0), "");
    }
}
