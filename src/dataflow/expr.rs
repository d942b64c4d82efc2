use std::rc::Rc;

use anyhow::Result;

use crate::dataflow::frame::Interpreter;
use crate::dataflow::provenance::{SourceInterpreter, SourceValue};
use crate::dataflow::{Kind, Value};
use crate::ir::{Constant, Instruction};
use crate::modular::Number;
use crate::opcodes;

/// Symbolic integer expression built from constants, additions and multiplications.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    Var(SourceValue),
    Const(SourceValue, Number),
    /// Addition or subtraction.
    Add(SourceValue, Rc<Expr>, Rc<Expr>),
    /// Multiplication with at least one constant operand.
    Mul(SourceValue, Rc<Expr>, Rc<Expr>),
}

impl Expr {
    pub(crate) fn source(&self) -> &SourceValue {
        match self {
            Expr::Var(source)
            | Expr::Const(source, _)
            | Expr::Add(source, _, _)
            | Expr::Mul(source, _, _) => source,
        }
    }

    /// Index of the instruction producing this expression.
    pub(crate) fn instruction(&self) -> Option<usize> {
        self.source().single_source()
    }

    fn is_const(&self) -> bool {
        matches!(self, Expr::Const(..))
    }

    fn is_var(&self) -> bool {
        matches!(self, Expr::Var(_))
    }

    fn is_const_or_mul(&self) -> bool {
        matches!(self, Expr::Const(..) | Expr::Mul(..))
    }

    /// Constant factor and remaining operand of a multiplication.
    pub(crate) fn factors(&self) -> Option<(&Expr, &Expr)> {
        let Expr::Mul(_, left, right) = self else {
            return None;
        };
        if left.is_const() {
            Some((left, right))
        } else if right.is_const() {
            Some((right, left))
        } else {
            None
        }
    }
}

impl Value for Expr {
    fn size(&self) -> usize {
        self.source().size
    }
}

/// Builds [`Expr`] trees and remembers every constant multiplication seen.
#[derive(Default)]
pub(crate) struct ExprInterpreter {
    sources: SourceInterpreter,
    multiplications: Vec<(usize, Expr)>,
}

impl ExprInterpreter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, index: usize, expr: &Expr) {
        match self
            .multiplications
            .iter_mut()
            .find(|(existing, _)| *existing == index)
        {
            Some((_, slot)) => *slot = expr.clone(),
            None => self.multiplications.push((index, expr.clone())),
        }
    }

    fn forget(&mut self, expr: &Expr) {
        if let (Expr::Mul(..), Some(index)) = (expr, expr.instruction()) {
            self.multiplications.retain(|(existing, _)| *existing != index);
        }
    }

    /// Outermost constant multiplications, in first-seen order.
    ///
    /// A multiplication nested inside another one (directly or through an
    /// addition) is dropped; folding the outer one covers it.
    pub(crate) fn constant_multiplications(&self) -> Vec<Expr> {
        let mut outermost: Vec<Expr> = Vec::new();
        for (_, multiplication) in &self.multiplications {
            let Some((_, other)) = multiplication.factors() else {
                continue;
            };
            match other {
                Expr::Mul(..) => outermost.retain(|kept| kept != other),
                Expr::Add(_, left, right) => {
                    if matches!(**left, Expr::Mul(..)) {
                        outermost.retain(|kept| kept != &**left);
                    }
                    if matches!(**right, Expr::Mul(..)) {
                        outermost.retain(|kept| kept != &**right);
                    }
                }
                _ => {}
            }
            if !outermost.contains(multiplication) {
                outermost.push(multiplication.clone());
            }
        }
        outermost
    }
}

impl Interpreter for ExprInterpreter {
    type Value = Expr;

    fn new_value(&mut self, kind: Kind) -> Expr {
        Expr::Var(self.sources.new_value(kind))
    }

    fn new_operation(&mut self, index: usize, instruction: &Instruction, kind: Kind) -> Result<Expr> {
        let source = self.sources.new_operation(index, instruction, kind)?;
        let expr = match instruction {
            Instruction::Ldc(Constant::Int(value)) => Expr::Const(source, Number::Int(*value)),
            Instruction::Ldc(Constant::Long(value)) => Expr::Const(source, Number::Long(*value)),
            Instruction::Simple(opcodes::ICONST_0) => Expr::Const(source, Number::Int(0)),
            Instruction::Simple(opcodes::ICONST_1) => Expr::Const(source, Number::Int(1)),
            Instruction::Simple(opcodes::LCONST_0) => Expr::Const(source, Number::Long(0)),
            Instruction::Simple(opcodes::LCONST_1) => Expr::Const(source, Number::Long(1)),
            _ => Expr::Var(source),
        };
        Ok(expr)
    }

    fn copy_operation(&mut self, index: usize, instruction: &Instruction, value: &Expr) -> Result<Expr> {
        Ok(Expr::Var(
            self.sources
                .copy_operation(index, instruction, value.source())?,
        ))
    }

    fn unary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        value: &Expr,
        result: Option<Kind>,
    ) -> Result<Expr> {
        Ok(Expr::Var(self.sources.unary_operation(
            index,
            instruction,
            value.source(),
            result,
        )?))
    }

    fn binary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        left: &Expr,
        right: &Expr,
        result: Option<Kind>,
    ) -> Result<Expr> {
        let source =
            self.sources
                .binary_operation(index, instruction, left.source(), right.source(), result)?;
        if left == right {
            return Ok(Expr::Var(source));
        }
        let expr = match instruction.opcode() {
            Some(opcodes::IMUL | opcodes::LMUL) => {
                if !left.is_const() && !right.is_const() {
                    Expr::Var(source)
                } else {
                    let multiplication =
                        Expr::Mul(source, Rc::new(left.clone()), Rc::new(right.clone()));
                    self.record(index, &multiplication);
                    multiplication
                }
            }
            Some(opcodes::IADD | opcodes::ISUB | opcodes::LADD | opcodes::LSUB) => {
                if left.is_const_or_mul() && right.is_const_or_mul() {
                    Expr::Add(source, Rc::new(left.clone()), Rc::new(right.clone()))
                } else {
                    Expr::Var(source)
                }
            }
            _ => Expr::Var(source),
        };
        Ok(expr)
    }

    fn nary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        _values: &[Expr],
        result: Option<Kind>,
    ) -> Result<Expr> {
        Ok(Expr::Var(
            self.sources
                .nary_operation(index, instruction, &[], result)?,
        ))
    }

    fn merge(&mut self, left: &Expr, right: &Expr) -> Expr {
        if left == right {
            return left.clone();
        }
        match (left, right) {
            (Expr::Mul(source, a1, b1), Expr::Mul(other_source, a2, b2))
                if source.sources == other_source.sources =>
            {
                let merged = if a1 == a2 && a1.is_const() {
                    let b = self.merge(b1, b2);
                    Some(Expr::Mul(source.clone(), a1.clone(), Rc::new(b)))
                } else if b1 == b2 && b1.is_const() {
                    let a = self.merge(a1, a2);
                    Some(Expr::Mul(source.clone(), Rc::new(a), b1.clone()))
                } else {
                    None
                };
                if let Some(merged) = merged {
                    if let Some(index) = merged.instruction() {
                        self.record(index, &merged);
                    }
                    return merged;
                }
            }
            (Expr::Add(source, a1, b1), Expr::Add(other_source, a2, b2))
                if source.sources == other_source.sources =>
            {
                if a1 == a2 && !a1.is_var() {
                    let b = self.merge(b1, b2);
                    if b.is_const_or_mul() {
                        return Expr::Add(source.clone(), a1.clone(), Rc::new(b));
                    }
                } else if b1 == b2 && !b2.is_var() {
                    let a = self.merge(a1, a2);
                    if a.is_const_or_mul() {
                        return Expr::Add(source.clone(), Rc::new(a), b1.clone());
                    }
                }
            }
            _ => {}
        }
        self.forget(left);
        self.forget(right);
        Expr::Var(self.sources.merge(left.source(), right.source()))
    }
}
