use anyhow::Result;

use crate::ir::ClassPool;

pub(crate) mod compute_maxs;
pub(crate) mod control_flow;
pub(crate) mod dead_code;
pub(crate) mod error_constructor;
pub(crate) mod field_owner;
pub(crate) mod field_sorter;
pub(crate) mod goto;
pub(crate) mod method_sorter;
pub(crate) mod opaque_argument;
pub(crate) mod opaque_predicate;
pub(crate) mod renamer;
pub(crate) mod static_field_inliner;
pub(crate) mod try_catch;
pub(crate) mod unused_field;
pub(crate) mod unused_method;

/// Metadata describing a bytecode transformer.
#[derive(Clone, Debug)]
pub(crate) struct TransformerMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// Result of one transformer run.
#[derive(Debug, Default)]
pub(crate) struct TransformOutput {
    /// Number of items (instructions, members, classes) the pass changed.
    pub(crate) changed: usize,
    /// Pool that replaces the current one once the pass returns.
    pub(crate) replacement: Option<ClassPool>,
}

impl TransformOutput {
    pub(crate) fn changed(changed: usize) -> Self {
        Self {
            changed,
            replacement: None,
        }
    }

    pub(crate) fn replaced(changed: usize, pool: ClassPool) -> Self {
        Self {
            changed,
            replacement: Some(pool),
        }
    }
}

/// Transformer interface for pipeline execution.
pub(crate) trait Transformer {
    fn metadata(&self) -> TransformerMetadata;
    fn run(&self, pool: &mut ClassPool) -> Result<TransformOutput>;
}
