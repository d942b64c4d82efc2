use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use anyhow::Result;
use tracing::{info, warn};

use crate::dataflow::frame::Interpreter;
use crate::dataflow::provenance::{SourceInterpreter, SourceValue};
use crate::dataflow::worklist::analyze;
use crate::dataflow::{Kind, Value};
use crate::ir::{ClassPool, Constant, Instruction};
use crate::modular::Number;
use crate::multiplier::solver::{FieldMulAssign, Mul, Multipliers};
use crate::opcodes;

/// Instruction identity across the pool: method ordinal and instruction index.
type InsnKey = (usize, usize);

/// Scans every method and solves the decode multiplier of each encoded field.
///
/// Keys of the returned map are `owner.name`.
pub(crate) fn find_multipliers(pool: &ClassPool) -> Result<BTreeMap<String, Number>> {
    info!("Calculating multipliers.");
    let mut state = FinderState::default();
    let mut ordinal = 0;
    for class in pool.iter() {
        for method in &class.methods {
            ordinal += 1;
            if !method.has_code() {
                continue;
            }
            let mut scan = MethodScan {
                state: &mut state,
                instructions: &method.instructions,
                ordinal,
                sources: SourceInterpreter,
            };
            if let Err(error) = analyze(method, &mut scan) {
                warn!(
                    "Skipping multiplier scan of {}.{}{}: {error:#}",
                    class.name, method.name, method.descriptor
                );
            }
        }
    }
    state.multipliers.solve()
}

#[derive(Default)]
struct FinderState {
    multipliers: Multipliers,
    /// Constants already counted as a candidate.
    ldcs: HashSet<InsnKey>,
    /// Constants already turned into a field-to-field assignment.
    assigned_ldcs: HashSet<InsnKey>,
    /// Values stored into a field, mapped to that field.
    puts: HashMap<(usize, SourceValue), String>,
}

/// Provenance value that also remembers the operands of binary operations.
///
/// Equality only looks at the provenance so that frame merging keeps the
/// operand tree of a value whose sources did not change.
#[derive(Clone, Debug)]
enum Tracked {
    One(SourceValue),
    Two(SourceValue, Rc<Tracked>, Rc<Tracked>),
}

impl Tracked {
    fn source(&self) -> &SourceValue {
        match self {
            Tracked::One(source) | Tracked::Two(source, _, _) => source,
        }
    }
}

impl PartialEq for Tracked {
    fn eq(&self, other: &Self) -> bool {
        self.source() == other.source()
    }
}

impl Value for Tracked {
    fn size(&self) -> usize {
        self.source().size
    }
}

/// A constant multiplier applied directly to a field read.
struct FieldMul {
    field: String,
    ldc: InsnKey,
    n: Number,
}

struct MethodScan<'a> {
    state: &'a mut FinderState,
    instructions: &'a [Instruction],
    ordinal: usize,
    sources: SourceInterpreter,
}

impl MethodScan<'_> {
    fn producer(&self, value: &Tracked) -> Option<(usize, &Instruction)> {
        let index = value.source().single_source()?;
        self.instructions.get(index).map(|instruction| (index, instruction))
    }

    /// Integer constant loaded by `LDC`, with its key.
    fn ldc(&self, value: &Tracked) -> Option<(InsnKey, Number)> {
        match self.producer(value)? {
            (index, Instruction::Ldc(Constant::Int(n))) => Some(((self.ordinal, index), Number::Int(*n))),
            (index, Instruction::Ldc(Constant::Long(n))) => Some(((self.ordinal, index), Number::Long(*n))),
            _ => None,
        }
    }

    fn read_field(&self, value: &Tracked) -> Option<String> {
        match self.producer(value)? {
            (_, Instruction::Field(field)) if field.is_get() => Some(field.key()),
            _ => None,
        }
    }

    fn produced_by_any(&self, value: &Tracked, candidates: &[u8]) -> bool {
        self.producer(value)
            .and_then(|(_, instruction)| instruction.opcode())
            .is_some_and(|opcode| candidates.contains(&opcode))
    }

    fn is_mul(&self, value: &Tracked) -> bool {
        self.produced_by_any(value, &[opcodes::IMUL, opcodes::LMUL])
    }

    fn is_add(&self, value: &Tracked) -> bool {
        self.produced_by_any(value, &[opcodes::IADD, opcodes::LADD, opcodes::ISUB, opcodes::LSUB])
    }

    fn field_mul(&self, left: &Tracked, right: &Tracked) -> Option<FieldMul> {
        let ((ldc, n), field) = match (self.ldc(left), self.read_field(right)) {
            (Some(constant), Some(field)) => (constant, field),
            _ => (self.ldc(right)?, self.read_field(left)?),
        };
        n.is_multiplier().then_some(FieldMul { field, ldc, n })
    }

    fn set_field(&mut self, put: String, value: &Tracked) {
        self.state
            .puts
            .insert((self.ordinal, value.source().clone()), put.clone());
        if self.ldc(value).is_some() {
            return;
        }
        if let Tracked::Two(..) = value {
            self.distribute(&put, value);
        }
    }

    /// Records the constants of the expression stored into `put`.
    fn distribute(&mut self, put: &str, value: &Tracked) {
        let Tracked::Two(_, a, b) = value else {
            return;
        };
        let is_mul = self.is_mul(value);
        if is_mul {
            if let Some(field_mul) = self.field_mul(a, b) {
                if self.state.assigned_ldcs.insert(field_mul.ldc) {
                    self.state
                        .multipliers
                        .pending
                        .remove(&field_mul.field, Mul::dec(field_mul.n));
                    self.state.multipliers.assign(FieldMulAssign {
                        put: put.to_string(),
                        get: field_mul.field,
                        mul: field_mul.n,
                    });
                    return;
                }
            }
        }
        if !is_mul && !self.is_add(value) {
            return;
        }

        let operands = match (self.ldc(a), self.ldc(b)) {
            (Some(constant), _) => Some((constant, b)),
            (None, Some(constant)) => Some((constant, a)),
            (None, None) => None,
        };
        if let Some(((ldc, n), other)) = operands {
            if n.is_multiplier() && self.state.ldcs.insert(ldc) {
                let stored = self
                    .state
                    .puts
                    .get(&(self.ordinal, other.source().clone()))
                    .cloned();
                match stored {
                    None => self.state.multipliers.pending.push(put, Mul::enc(n)),
                    Some(field) => self.state.multipliers.assign(FieldMulAssign {
                        put: put.to_string(),
                        get: field,
                        mul: n,
                    }),
                }
            }
            if is_mul {
                return;
            }
        }
        if let Tracked::Two(..) = **a {
            self.distribute(put, a);
        }
        if let Tracked::Two(..) = **b {
            self.distribute(put, b);
        }
    }
}

impl Interpreter for MethodScan<'_> {
    type Value = Tracked;

    fn new_value(&mut self, kind: Kind) -> Tracked {
        Tracked::One(self.sources.new_value(kind))
    }

    fn new_operation(&mut self, index: usize, instruction: &Instruction, kind: Kind) -> Result<Tracked> {
        Ok(Tracked::One(self.sources.new_operation(index, instruction, kind)?))
    }

    fn copy_operation(&mut self, index: usize, instruction: &Instruction, value: &Tracked) -> Result<Tracked> {
        match instruction.opcode() {
            Some(opcodes::DUP | opcodes::DUP_X1 | opcodes::DUP2 | opcodes::DUP2_X1) => Ok(value.clone()),
            _ => Ok(Tracked::One(self.sources.copy_operation(
                index,
                instruction,
                value.source(),
            )?)),
        }
    }

    fn unary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        value: &Tracked,
        result: Option<Kind>,
    ) -> Result<Tracked> {
        let source = self
            .sources
            .unary_operation(index, instruction, value.source(), result)?;
        if let Instruction::Field(field) = instruction {
            if field.opcode == opcodes::PUTSTATIC {
                self.set_field(field.key(), value);
            }
        }
        Ok(Tracked::One(source))
    }

    fn binary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        left: &Tracked,
        right: &Tracked,
        result: Option<Kind>,
    ) -> Result<Tracked> {
        let source =
            self.sources
                .binary_operation(index, instruction, left.source(), right.source(), result)?;
        match instruction {
            Instruction::Simple(opcodes::IMUL | opcodes::LMUL) => {
                if let Some(field_mul) = self.field_mul(left, right) {
                    if self.state.ldcs.insert(field_mul.ldc) {
                        self.state
                            .multipliers
                            .pending
                            .push(&field_mul.field, Mul::dec(field_mul.n));
                    }
                }
            }
            Instruction::Field(field) if field.opcode == opcodes::PUTFIELD => {
                self.set_field(field.key(), right);
            }
            _ => {}
        }
        Ok(Tracked::Two(source, Rc::new(left.clone()), Rc::new(right.clone())))
    }

    fn nary_operation(
        &mut self,
        index: usize,
        instruction: &Instruction,
        _values: &[Tracked],
        result: Option<Kind>,
    ) -> Result<Tracked> {
        Ok(Tracked::One(self.sources.nary_operation(index, instruction, &[], result)?))
    }

    fn merge(&mut self, left: &Tracked, right: &Tracked) -> Tracked {
        let merged = self.sources.merge(left.source(), right.source());
        if merged == *left.source() {
            return left.clone();
        }
        Tracked::One(merged)
    }
}
