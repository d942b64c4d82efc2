use anyhow::Result;

use crate::dataflow::frame::Interpreter;
use crate::dataflow::{Kind, Value};
use crate::ir::Instruction;

impl Value for Kind {
    fn size(&self) -> usize {
        Kind::size(*self)
    }
}

/// Tracks only the verification kind of each slot.
pub(crate) struct BasicInterpreter;

impl Interpreter for BasicInterpreter {
    type Value = Kind;

    fn new_value(&mut self, kind: Kind) -> Kind {
        kind
    }

    fn new_operation(&mut self, _index: usize, _instruction: &Instruction, kind: Kind) -> Result<Kind> {
        Ok(kind)
    }

    fn copy_operation(&mut self, _index: usize, _instruction: &Instruction, value: &Kind) -> Result<Kind> {
        Ok(*value)
    }

    fn unary_operation(
        &mut self,
        _index: usize,
        _instruction: &Instruction,
        _value: &Kind,
        result: Option<Kind>,
    ) -> Result<Kind> {
        Ok(result.unwrap_or(Kind::Uninitialized))
    }

    fn binary_operation(
        &mut self,
        _index: usize,
        _instruction: &Instruction,
        _left: &Kind,
        _right: &Kind,
        result: Option<Kind>,
    ) -> Result<Kind> {
        Ok(result.unwrap_or(Kind::Uninitialized))
    }

    fn nary_operation(
        &mut self,
        _index: usize,
        _instruction: &Instruction,
        _values: &[Kind],
        result: Option<Kind>,
    ) -> Result<Kind> {
        Ok(result.unwrap_or(Kind::Uninitialized))
    }

    fn merge(&mut self, left: &Kind, right: &Kind) -> Kind {
        if left == right { *left } else { Kind::Uninitialized }
    }
}
