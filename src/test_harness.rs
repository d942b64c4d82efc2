use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::ir::{
    Class, ClassPool, Constant, Field, FieldInsn, Instruction, LabelId, Method, MethodInsn,
    TryCatchBlock,
};
use crate::opcodes;

/// Fluent builder for method bodies used in tests.
pub(crate) struct MethodBuilder {
    method: Method,
}

impl MethodBuilder {
    pub(crate) fn new(name: &str, descriptor: &str, access: u16) -> Self {
        Self {
            method: Method::new(name, descriptor, access),
        }
    }

    /// Allocate a label without placing it.
    pub(crate) fn label(&mut self) -> LabelId {
        self.method.new_label()
    }

    /// Place a previously allocated label at the current position.
    pub(crate) fn mark(&mut self, label: LabelId) -> &mut Self {
        self.push(Instruction::Label(label))
    }

    pub(crate) fn line(&mut self, line: u16) -> &mut Self {
        self.push(Instruction::Line(line))
    }

    pub(crate) fn op(&mut self, opcode: u8) -> &mut Self {
        self.push(Instruction::Simple(opcode))
    }

    pub(crate) fn int(&mut self, value: i32) -> &mut Self {
        self.push(Instruction::push_int(value))
    }

    pub(crate) fn long(&mut self, value: i64) -> &mut Self {
        self.push(Instruction::push_long(value))
    }

    pub(crate) fn ldc(&mut self, constant: Constant) -> &mut Self {
        self.push(Instruction::Ldc(constant))
    }

    pub(crate) fn var(&mut self, opcode: u8, index: u16) -> &mut Self {
        self.push(Instruction::Var { opcode, index })
    }

    pub(crate) fn type_insn(&mut self, opcode: u8, descriptor: &str) -> &mut Self {
        self.push(Instruction::Type {
            opcode,
            descriptor: descriptor.to_string(),
        })
    }

    pub(crate) fn field(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.push(Instruction::Field(FieldInsn {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }))
    }

    pub(crate) fn invoke(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.push(Instruction::Method(MethodInsn {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            interface: opcode == opcodes::INVOKEINTERFACE,
        }))
    }

    pub(crate) fn jump(&mut self, opcode: u8, target: LabelId) -> &mut Self {
        self.push(Instruction::Jump { opcode, target })
    }

    pub(crate) fn try_catch(
        &mut self,
        start: LabelId,
        end: LabelId,
        handler: LabelId,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.method.try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    pub(crate) fn throws(&mut self, exception: &str) -> &mut Self {
        self.method.exceptions.push(exception.to_string());
        self
    }

    pub(crate) fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.method.instructions.push(instruction);
        self
    }

    pub(crate) fn build(&self) -> Method {
        let mut method = self.method.clone();
        method.max_stack = method.max_stack.max(8);
        method.max_locals = method.max_locals.max(8);
        method
    }
}

/// Class with the given members, extending `java/lang/Object` unless `super_name` says otherwise.
pub(crate) fn class_with(name: &str, super_name: Option<&str>, fields: Vec<Field>, methods: Vec<Method>) -> Class {
    let mut class = Class::new(name, Some(super_name.unwrap_or("java/lang/Object")));
    class.fields = fields;
    class.methods = methods;
    class
}

pub(crate) fn pool_of(classes: Vec<Class>) -> ClassPool {
    classes.into_iter().collect()
}

/// Real instructions of a method, labels and line markers removed.
pub(crate) fn opcodes_of(method: &Method) -> Vec<u8> {
    method
        .instructions
        .iter()
        .filter_map(Instruction::opcode)
        .collect()
}

/// Runtime value of the evaluator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Slot {
    Int(i32),
    Long(i64),
    Ref,
}

/// Concrete interpreter for the arithmetic subset emitted by the transforms.
///
/// Fields live in one map keyed by `owner.name`; method calls are not followed.
#[derive(Default)]
pub(crate) struct Evaluator {
    pub(crate) fields: BTreeMap<String, Slot>,
}

impl Evaluator {
    pub(crate) fn run(&mut self, method: &Method, arguments: &[Slot]) -> Result<Option<Slot>> {
        let labels = method.label_positions();
        let mut locals: Vec<Slot> = Vec::new();
        if !method.is_static() {
            locals.push(Slot::Ref);
        }
        for argument in arguments {
            locals.push(*argument);
            if matches!(argument, Slot::Long(_)) {
                locals.push(Slot::Ref);
            }
        }
        locals.resize(locals.len().max(16), Slot::Int(0));
        let mut stack: Vec<Slot> = Vec::new();
        let mut pc = 0usize;
        let mut steps = 0usize;
        while let Some(instruction) = method.instructions.get(pc) {
            steps += 1;
            if steps > 100_000 {
                anyhow::bail!("evaluation did not terminate");
            }
            pc += 1;
            match instruction {
                Instruction::Label(_) | Instruction::Line(_) => {}
                Instruction::Ldc(Constant::Int(value)) => stack.push(Slot::Int(*value)),
                Instruction::Ldc(Constant::Long(value)) => stack.push(Slot::Long(*value)),
                Instruction::Var { opcode, index } => {
                    if *opcode >= opcodes::ISTORE {
                        locals[*index as usize] = stack.pop().context("stack underflow")?;
                    } else {
                        stack.push(locals[*index as usize]);
                    }
                }
                Instruction::Iinc { index, delta } => {
                    let Slot::Int(value) = locals[*index as usize] else {
                        anyhow::bail!("iinc on non-int local");
                    };
                    locals[*index as usize] = Slot::Int(value.wrapping_add(*delta as i32));
                }
                Instruction::Field(field) => {
                    let key = field.key();
                    match field.opcode {
                        opcodes::GETSTATIC | opcodes::GETFIELD => {
                            if field.opcode == opcodes::GETFIELD {
                                stack.pop().context("stack underflow")?;
                            }
                            let default = if field.descriptor == "J" {
                                Slot::Long(0)
                            } else {
                                Slot::Int(0)
                            };
                            stack.push(*self.fields.get(&key).unwrap_or(&default));
                        }
                        _ => {
                            let value = stack.pop().context("stack underflow")?;
                            if field.opcode == opcodes::PUTFIELD {
                                stack.pop().context("stack underflow")?;
                            }
                            self.fields.insert(key, value);
                        }
                    }
                }
                Instruction::Jump { opcode, target } => {
                    let taken = match *opcode {
                        opcodes::GOTO => true,
                        opcodes::IFEQ..=opcodes::IFLE => {
                            let value = pop_int(&mut stack)?;
                            compare(*opcode - opcodes::IFEQ, value, 0)
                        }
                        opcodes::IF_ICMPEQ..=opcodes::IF_ICMPLE => {
                            let right = pop_int(&mut stack)?;
                            let left = pop_int(&mut stack)?;
                            compare(*opcode - opcodes::IF_ICMPEQ, left, right)
                        }
                        other => anyhow::bail!("unsupported jump 0x{other:02x}"),
                    };
                    if taken {
                        pc = *labels.get(target).context("unknown label")?;
                    }
                }
                other => {
                    if let Some(value) = other.int_constant() {
                        stack.push(Slot::Int(value));
                        continue;
                    }
                    let opcode = other.opcode().context("pseudo instruction")?;
                    match opcode {
                        opcodes::NOP => {}
                        opcodes::LCONST_0 => stack.push(Slot::Long(0)),
                        opcodes::LCONST_1 => stack.push(Slot::Long(1)),
                        opcodes::ACONST_NULL => stack.push(Slot::Ref),
                        opcodes::IADD | opcodes::ISUB | opcodes::IMUL => {
                            let right = pop_int(&mut stack)?;
                            let left = pop_int(&mut stack)?;
                            stack.push(Slot::Int(match opcode {
                                opcodes::IADD => left.wrapping_add(right),
                                opcodes::ISUB => left.wrapping_sub(right),
                                _ => left.wrapping_mul(right),
                            }));
                        }
                        opcodes::LADD | opcodes::LSUB | opcodes::LMUL => {
                            let right = pop_long(&mut stack)?;
                            let left = pop_long(&mut stack)?;
                            stack.push(Slot::Long(match opcode {
                                opcodes::LADD => left.wrapping_add(right),
                                opcodes::LSUB => left.wrapping_sub(right),
                                _ => left.wrapping_mul(right),
                            }));
                        }
                        opcodes::I2L => {
                            let value = pop_int(&mut stack)?;
                            stack.push(Slot::Long(value as i64));
                        }
                        opcodes::L2I => {
                            let value = pop_long(&mut stack)?;
                            stack.push(Slot::Int(value as i32));
                        }
                        opcodes::POP | opcodes::POP2 => {
                            stack.pop().context("stack underflow")?;
                        }
                        opcodes::DUP | opcodes::DUP2 => {
                            let top = *stack.last().context("stack underflow")?;
                            stack.push(top);
                        }
                        opcodes::DUP_X1 | opcodes::DUP2_X1 => {
                            let top = stack.pop().context("stack underflow")?;
                            let below = stack.pop().context("stack underflow")?;
                            stack.extend([top, below, top]);
                        }
                        opcodes::IRETURN | opcodes::LRETURN | opcodes::ARETURN => {
                            return Ok(Some(stack.pop().context("stack underflow")?));
                        }
                        opcodes::RETURN => return Ok(None),
                        other => anyhow::bail!("unsupported opcode 0x{other:02x}"),
                    }
                }
            }
        }
        anyhow::bail!("fell off the end of {}", method.name)
    }
}

fn pop_int(stack: &mut Vec<Slot>) -> Result<i32> {
    match stack.pop() {
        Some(Slot::Int(value)) => Ok(value),
        other => anyhow::bail!("expected int, found {other:?}"),
    }
}

fn pop_long(stack: &mut Vec<Slot>) -> Result<i64> {
    match stack.pop() {
        Some(Slot::Long(value)) => Ok(value),
        other => anyhow::bail!("expected long, found {other:?}"),
    }
}

/// `relative` is the offset of the opcode inside the `IFEQ..IFLE` family.
fn compare(relative: u8, left: i32, right: i32) -> bool {
    match relative {
        0 => left == right,
        1 => left != right,
        2 => left < right,
        3 => left >= right,
        4 => left > right,
        _ => left <= right,
    }
}
