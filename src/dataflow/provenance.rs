use std::collections::BTreeSet;

use anyhow::Result;

use crate::dataflow::frame::Interpreter;
use crate::dataflow::{Kind, Value};
use crate::ir::Instruction;

/// Value annotated with the instructions that may have produced it.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct SourceValue {
    pub(crate) size: usize,
    pub(crate) sources: BTreeSet<usize>,
}

impl SourceValue {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            sources: BTreeSet::new(),
        }
    }

    pub(crate) fn produced_by(size: usize, index: usize) -> Self {
        Self {
            size,
            sources: BTreeSet::from([index]),
        }
    }

    /// The producing instruction when there is exactly one.
    pub(crate) fn single_source(&self) -> Option<usize> {
        if self.sources.len() == 1 {
            self.sources.first().copied()
        } else {
            None
        }
    }
}

impl Value for SourceValue {
    fn size(&self) -> usize {
        self.size
    }
}

/// Provenance domain: every operation yields a value sourced at its instruction.
#[derive(Default)]
pub(crate) struct SourceInterpreter;

impl Interpreter for SourceInterpreter {
    type Value = SourceValue;

    fn new_value(&mut self, kind: Kind) -> SourceValue {
        SourceValue::new(kind.size())
    }

    fn new_operation(&mut self, index: usize, _instruction: &Instruction, kind: Kind) -> Result<SourceValue> {
        Ok(SourceValue::produced_by(kind.size(), index))
    }

    fn copy_operation(
        &mut self,
        index: usize,
        _instruction: &Instruction,
        value: &SourceValue,
    ) -> Result<SourceValue> {
        Ok(SourceValue::produced_by(value.size, index))
    }

    fn unary_operation(
        &mut self,
        index: usize,
        _instruction: &Instruction,
        _value: &SourceValue,
        result: Option<Kind>,
    ) -> Result<SourceValue> {
        Ok(SourceValue::produced_by(result.map_or(1, Kind::size), index))
    }

    fn binary_operation(
        &mut self,
        index: usize,
        _instruction: &Instruction,
        _left: &SourceValue,
        _right: &SourceValue,
        result: Option<Kind>,
    ) -> Result<SourceValue> {
        Ok(SourceValue::produced_by(result.map_or(1, Kind::size), index))
    }

    fn nary_operation(
        &mut self,
        index: usize,
        _instruction: &Instruction,
        _values: &[SourceValue],
        result: Option<Kind>,
    ) -> Result<SourceValue> {
        Ok(SourceValue::produced_by(result.map_or(1, Kind::size), index))
    }

    fn merge(&mut self, left: &SourceValue, right: &SourceValue) -> SourceValue {
        if left.size == right.size && left.sources.is_superset(&right.sources) {
            return left.clone();
        }
        SourceValue {
            size: left.size.min(right.size),
            sources: left.sources.union(&right.sources).copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::worklist::analyze;
    use crate::ir::{ACC_STATIC, Method};
    use crate::opcodes;

    #[test]
    fn merged_values_keep_every_source() {
        let mut method = Method::new("m", "(I)I", ACC_STATIC);
        let other = method.new_label();
        let join = method.new_label();
        method.instructions = vec![
            Instruction::Var {
                opcode: opcodes::ILOAD,
                index: 0,
            },
            Instruction::Jump {
                opcode: opcodes::IFEQ,
                target: other,
            },
            Instruction::Simple(opcodes::ICONST_1),
            Instruction::Jump {
                opcode: opcodes::GOTO,
                target: join,
            },
            Instruction::Label(other),
            Instruction::Simple(opcodes::ICONST_2),
            Instruction::Label(join),
            Instruction::Simple(opcodes::IRETURN),
        ];

        let frames = analyze(&method, &mut SourceInterpreter).expect("analysis");

        let at_return = frames[7].as_ref().expect("frame");
        let top = at_return.stack.last().expect("stack value");
        assert_eq!(top.sources, BTreeSet::from([2, 5]));
        assert_eq!(top.single_source(), None);
    }
}
