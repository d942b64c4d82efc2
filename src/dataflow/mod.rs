pub(crate) mod basic;
pub(crate) mod expr;
pub(crate) mod frame;
pub(crate) mod opcode_semantics;
pub(crate) mod provenance;
pub(crate) mod worklist;

use std::fmt::Debug;

use jdescriptor::TypeDescriptor;

/// Verification-level kind of a stack or local slot value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum Kind {
    Uninitialized,
    Int,
    Float,
    Long,
    Double,
    Reference,
}

impl Kind {
    pub(crate) fn size(self) -> usize {
        match self {
            Kind::Long | Kind::Double => 2,
            _ => 1,
        }
    }

    /// Kind of a value of the given type; `None` for `void`.
    pub(crate) fn of_type(ty: &TypeDescriptor) -> Option<Kind> {
        let kind = match ty {
            TypeDescriptor::Void => return None,
            TypeDescriptor::Long => Kind::Long,
            TypeDescriptor::Double => Kind::Double,
            TypeDescriptor::Float => Kind::Float,
            TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _) => Kind::Reference,
            _ => Kind::Int,
        };
        Some(kind)
    }
}

/// Abstract value tracked in frames.
pub(crate) trait Value: Clone + PartialEq + Debug {
    /// Number of slots (1 or 2) the value occupies.
    fn size(&self) -> usize;
}
