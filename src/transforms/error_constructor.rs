use anyhow::Result;
use tracing::info;

use crate::ir::{ClassPool, Method};
use crate::opcodes;
use crate::transforms::{TransformOutput, Transformer, TransformerMetadata};

const THROWABLE: &str = "java/lang/Throwable";

const ERROR_CONSTRUCTOR_BODY: [u8; 6] = [
    opcodes::ALOAD,
    opcodes::INVOKESPECIAL,
    opcodes::NEW,
    opcodes::DUP,
    opcodes::INVOKESPECIAL,
    opcodes::ATHROW,
];

/// Removes no-argument constructors that only throw.
pub(crate) struct ErrorConstructorTransformer;

impl Transformer for ErrorConstructorTransformer {
    fn metadata(&self) -> TransformerMetadata {
        TransformerMetadata {
            id: "error-constructor",
            name: "Error constructor removal",
            description: "Deletes constructors left behind by removed error handlers",
        }
    }

    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput> {
        let mut counter = 0;
        for class in pool.iter_mut() {
            let before = class.methods.len();
            class.methods.retain(|method| !is_error_constructor(method));
            counter += before - class.methods.len();
        }
        info!("Removed {counter} method error constructors.");
        Ok(TransformOutput::changed(counter))
    }
}

fn is_error_constructor(method: &Method) -> bool {
    if method.name != "<init>" || method.descriptor != "()V" {
        return false;
    }
    if method.exceptions.len() != 1 || method.exceptions[0] != THROWABLE {
        return false;
    }
    method
        .instructions
        .iter()
        .filter_map(|instruction| instruction.opcode())
        .eq(ERROR_CONSTRUCTOR_BODY)
}
