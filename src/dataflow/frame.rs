use anyhow::{Context, Result};

use crate::dataflow::opcode_semantics::Effect;
use crate::dataflow::{Kind, Value};
use crate::ir::Instruction;

/// Abstract domain plugged into the frame analyzer.
///
/// Every operation receives the index of the instruction being executed so
/// that domains can record where a value came from.
pub(crate) trait Interpreter {
    type Value: Value;

    fn new_value(&mut self, kind: Kind) -> Self::Value;

    fn new_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        kind: Kind,
    ) -> Result<Self::Value>;

    /// Loads, stores and stack duplication.
    fn copy_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        value: &Self::Value,
    ) -> Result<Self::Value>;

    /// The result is pushed only when `result` is `Some`.
    fn unary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        value: &Self::Value,
        result: Option<Kind>,
    ) -> Result<Self::Value>;

    fn binary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        left: &Self::Value,
        right: &Self::Value,
        result: Option<Kind>,
    ) -> Result<Self::Value>;

    fn ternary_operation(
        &mut self,
        _index: usize,
        _instruction: &Instruction,
        _values: [&Self::Value; 3],
    ) -> Result<()> {
        Ok(())
    }

    fn nary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        values: &[Self::Value],
        result: Option<Kind>,
    ) -> Result<Self::Value>;

    fn return_operation(
        &mut self,
        _index: usize,
        _instruction: &Instruction,
        _value: &Self::Value,
    ) -> Result<()> {
        Ok(())
    }

    fn merge(&mut self, left: &Self::Value, right: &Self::Value) -> Self::Value;
}

/// Locals and operand stack before an instruction executes.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Frame<V> {
    pub(crate) locals: Vec<V>,
    pub(crate) stack: Vec<V>,
}

impl<V: Value> Frame<V> {
    pub(crate) fn new(locals: Vec<V>) -> Self {
        Self {
            locals,
            stack: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, value: V) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<V> {
        self.stack.pop().context("operand stack underflow")
    }

    /// Stack depth in slots, counting category-2 values twice.
    pub(crate) fn stack_slots(&self) -> usize {
        self.stack.iter().map(Value::size).sum()
    }

    fn local(&self, index: u16) -> Result<&V> {
        self.locals
            .get(index as usize)
            .with_context(|| format!("local variable {index} out of range"))
    }

    fn set_local<I>(&mut self, interpreter: &mut I, index: u16, value: V) -> Result<()>
    where
        I: Interpreter<Value = V>,
    {
        let slot = index as usize;
        let wide = value.size() == 2;
        if slot >= self.locals.len() || (wide && slot + 1 >= self.locals.len()) {
            anyhow::bail!("local variable {index} out of range");
        }
        self.locals[slot] = value;
        if wide {
            self.locals[slot + 1] = interpreter.new_value(Kind::Uninitialized);
        }
        if slot > 0 && self.locals[slot - 1].size() == 2 {
            self.locals[slot - 1] = interpreter.new_value(Kind::Uninitialized);
        }
        Ok(())
    }

    /// Apply one instruction to this frame.
    pub(crate) fn execute<I>(
        &mut self,
        interpreter: &mut I,
        index: usize,
        instruction: &Instruction,
        effect: Effect,
    ) -> Result<()>
    where
        I: Interpreter<Value = V>,
    {
        match effect {
            Effect::Nop => {}
            Effect::Push(kind) => {
                let value = interpreter.new_operation(index, instruction, kind)?;
                self.push(value);
            }
            Effect::Load { index: slot } => {
                let local = self.local(slot)?.clone();
                let value = interpreter.copy_operation(index, instruction, &local)?;
                self.push(value);
            }
            Effect::Store { index: slot } => {
                let popped = self.pop()?;
                let value = interpreter.copy_operation(index, instruction, &popped)?;
                self.set_local(interpreter, slot, value)?;
            }
            Effect::Iinc { index: slot } => {
                let local = self.local(slot)?.clone();
                let value =
                    interpreter.unary_operation(index, instruction, &local, Some(Kind::Int))?;
                self.set_local(interpreter, slot, value)?;
            }
            Effect::Unary(result) => {
                let operand = self.pop()?;
                let value = interpreter.unary_operation(index, instruction, &operand, result)?;
                if result.is_some() {
                    self.push(value);
                }
            }
            Effect::Binary(result) => {
                let right = self.pop()?;
                let left = self.pop()?;
                let value =
                    interpreter.binary_operation(index, instruction, &left, &right, result)?;
                if result.is_some() {
                    self.push(value);
                }
            }
            Effect::Ternary => {
                let third = self.pop()?;
                let second = self.pop()?;
                let first = self.pop()?;
                interpreter.ternary_operation(index, instruction, [&first, &second, &third])?;
            }
            Effect::Nary { count, result } => {
                if self.stack.len() < count {
                    anyhow::bail!("operand stack underflow");
                }
                let arguments = self.stack.split_off(self.stack.len() - count);
                let value = interpreter.nary_operation(index, instruction, &arguments, result)?;
                if result.is_some() {
                    self.push(value);
                }
            }
            Effect::Pop => {
                self.pop()?;
            }
            Effect::Pop2 => {
                if self.pop()?.size() == 1 {
                    self.pop()?;
                }
            }
            Effect::Dup => {
                let value = self.pop()?;
                let copy = interpreter.copy_operation(index, instruction, &value)?;
                self.push(value);
                self.push(copy);
            }
            Effect::DupX1 => {
                let first = self.pop()?;
                let second = self.pop()?;
                let copy = interpreter.copy_operation(index, instruction, &first)?;
                self.push(copy);
                self.push(second);
                self.push(first);
            }
            Effect::DupX2 => {
                let first = self.pop()?;
                let second = self.pop()?;
                let copy = interpreter.copy_operation(index, instruction, &first)?;
                if second.size() == 1 {
                    let third = self.pop()?;
                    self.push(copy);
                    self.push(third);
                } else {
                    self.push(copy);
                }
                self.push(second);
                self.push(first);
            }
            Effect::Dup2 => {
                let first = self.pop()?;
                if first.size() == 1 {
                    let second = self.pop()?;
                    let second_copy = interpreter.copy_operation(index, instruction, &second)?;
                    let first_copy = interpreter.copy_operation(index, instruction, &first)?;
                    self.push(second);
                    self.push(first);
                    self.push(second_copy);
                    self.push(first_copy);
                } else {
                    let copy = interpreter.copy_operation(index, instruction, &first)?;
                    self.push(first);
                    self.push(copy);
                }
            }
            Effect::Dup2X1 => {
                let first = self.pop()?;
                if first.size() == 1 {
                    let second = self.pop()?;
                    let third = self.pop()?;
                    let second_copy = interpreter.copy_operation(index, instruction, &second)?;
                    let first_copy = interpreter.copy_operation(index, instruction, &first)?;
                    self.push(second_copy);
                    self.push(first_copy);
                    self.push(third);
                    self.push(second);
                } else {
                    let second = self.pop()?;
                    let copy = interpreter.copy_operation(index, instruction, &first)?;
                    self.push(copy);
                    self.push(second);
                }
                self.push(first);
            }
            Effect::Dup2X2 => self.dup2_x2(interpreter, index, instruction)?,
            Effect::Swap => {
                let second = self.pop()?;
                let first = self.pop()?;
                let second_copy = interpreter.copy_operation(index, instruction, &second)?;
                let first_copy = interpreter.copy_operation(index, instruction, &first)?;
                self.push(second_copy);
                self.push(first_copy);
            }
            Effect::Return { value } => {
                if value {
                    let returned = self.pop()?;
                    interpreter.unary_operation(index, instruction, &returned, None)?;
                    interpreter.return_operation(index, instruction, &returned)?;
                }
            }
            Effect::Throw => {
                let thrown = self.pop()?;
                interpreter.unary_operation(index, instruction, &thrown, None)?;
            }
        }
        Ok(())
    }

    fn dup2_x2<I>(&mut self, interpreter: &mut I, index: usize, instruction: &Instruction) -> Result<()>
    where
        I: Interpreter<Value = V>,
    {
        let first = self.pop()?;
        if first.size() == 1 {
            let second = self.pop()?;
            let third = self.pop()?;
            let fourth = if third.size() == 1 {
                Some(self.pop()?)
            } else {
                None
            };
            let second_copy = interpreter.copy_operation(index, instruction, &second)?;
            let first_copy = interpreter.copy_operation(index, instruction, &first)?;
            self.push(second_copy);
            self.push(first_copy);
            if let Some(fourth) = fourth {
                self.push(fourth);
            }
            self.push(third);
            self.push(second);
        } else {
            let second = self.pop()?;
            let copy = interpreter.copy_operation(index, instruction, &first)?;
            if second.size() == 1 {
                let third = self.pop()?;
                self.push(copy);
                self.push(third);
            } else {
                self.push(copy);
            }
            self.push(second);
        }
        self.push(first);
        Ok(())
    }

    /// Merge `other` into this frame; returns whether anything changed.
    pub(crate) fn merge<I>(&mut self, interpreter: &mut I, other: &Frame<V>) -> Result<bool>
    where
        I: Interpreter<Value = V>,
    {
        if self.stack.len() != other.stack.len() {
            anyhow::bail!(
                "incompatible stack heights ({} vs {})",
                self.stack.len(),
                other.stack.len()
            );
        }
        let mut changed = false;
        for (current, incoming) in self
            .locals
            .iter_mut()
            .chain(self.stack.iter_mut())
            .zip(other.locals.iter().chain(other.stack.iter()))
        {
            let merged = interpreter.merge(current, incoming);
            if merged != *current {
                *current = merged;
                changed = true;
            }
        }
        Ok(changed)
    }
}
