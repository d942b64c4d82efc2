use anyhow::{Context, Result};

use crate::dataflow::Kind;
use crate::descriptor::{field_type, parameter_types, return_type};
use crate::ir::{Constant, Instruction};
use crate::opcodes;

/// Stack and local effect of one instruction, independent of the value domain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Effect {
    Nop,
    Push(Kind),
    Load { index: u16 },
    Store { index: u16 },
    Iinc { index: u16 },
    /// Pops one value and pushes a value of the given kind, if any.
    Unary(Option<Kind>),
    Binary(Option<Kind>),
    Ternary,
    Nary { count: usize, result: Option<Kind> },
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    Return { value: bool },
    Throw,
}

/// Decode the effect of an instruction. Subroutines (`JSR`/`RET`) are rejected.
pub(crate) fn decode(instruction: &Instruction) -> Result<Effect> {
    let effect = match instruction {
        Instruction::Label(_) | Instruction::Line(_) => Effect::Nop,
        Instruction::Simple(opcode) => decode_simple(*opcode)?,
        Instruction::Int { opcode, .. } => match *opcode {
            opcodes::NEWARRAY => Effect::Unary(Some(Kind::Reference)),
            _ => Effect::Push(Kind::Int),
        },
        Instruction::Ldc(constant) => Effect::Push(match constant {
            Constant::Int(_) => Kind::Int,
            Constant::Float(_) => Kind::Float,
            Constant::Long(_) => Kind::Long,
            Constant::Double(_) => Kind::Double,
            Constant::String(_) | Constant::Class(_) => Kind::Reference,
        }),
        Instruction::Var { opcode, index } => match *opcode {
            opcodes::ILOAD..=opcodes::ALOAD => Effect::Load { index: *index },
            opcodes::ISTORE..=opcodes::ASTORE => Effect::Store { index: *index },
            opcodes::RET => anyhow::bail!("subroutines (RET) are not supported"),
            other => anyhow::bail!("unexpected local variable opcode 0x{:02x}", other),
        },
        Instruction::Iinc { index, .. } => Effect::Iinc { index: *index },
        Instruction::Type { opcode, .. } => match *opcode {
            opcodes::NEW => Effect::Push(Kind::Reference),
            opcodes::ANEWARRAY | opcodes::CHECKCAST => Effect::Unary(Some(Kind::Reference)),
            opcodes::INSTANCEOF => Effect::Unary(Some(Kind::Int)),
            other => anyhow::bail!("unexpected type opcode 0x{:02x}", other),
        },
        Instruction::Field(field) => {
            let kind = Kind::of_type(&field_type(&field.descriptor)?)
                .context("field of type void")?;
            match field.opcode {
                opcodes::GETSTATIC => Effect::Push(kind),
                opcodes::PUTSTATIC => Effect::Unary(None),
                opcodes::GETFIELD => Effect::Unary(Some(kind)),
                opcodes::PUTFIELD => Effect::Binary(None),
                other => anyhow::bail!("unexpected field opcode 0x{:02x}", other),
            }
        }
        Instruction::Method(method) => {
            let receiver = usize::from(method.opcode != opcodes::INVOKESTATIC);
            let count = parameter_types(&method.descriptor)?.len() + receiver;
            let result = Kind::of_type(&return_type(&method.descriptor)?);
            Effect::Nary { count, result }
        }
        Instruction::Jump { opcode, .. } => match *opcode {
            opcodes::GOTO => Effect::Nop,
            opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
                Effect::Unary(None)
            }
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => Effect::Binary(None),
            opcodes::JSR => anyhow::bail!("subroutines (JSR) are not supported"),
            other => anyhow::bail!("unexpected jump opcode 0x{:02x}", other),
        },
        Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => Effect::Unary(None),
        Instruction::MultiANewArray { dimensions, .. } => Effect::Nary {
            count: *dimensions as usize,
            result: Some(Kind::Reference),
        },
    };
    Ok(effect)
}

fn decode_simple(opcode: u8) -> Result<Effect> {
    let effect = match opcode {
        opcodes::NOP => Effect::Nop,
        opcodes::ACONST_NULL => Effect::Push(Kind::Reference),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => Effect::Push(Kind::Int),
        opcodes::LCONST_0 | opcodes::LCONST_1 => Effect::Push(Kind::Long),
        opcodes::FCONST_0..=opcodes::FCONST_2 => Effect::Push(Kind::Float),
        opcodes::DCONST_0 | opcodes::DCONST_1 => Effect::Push(Kind::Double),
        opcodes::IALOAD | opcodes::BALOAD | opcodes::CALOAD | opcodes::SALOAD => {
            Effect::Binary(Some(Kind::Int))
        }
        opcodes::LALOAD => Effect::Binary(Some(Kind::Long)),
        opcodes::FALOAD => Effect::Binary(Some(Kind::Float)),
        opcodes::DALOAD => Effect::Binary(Some(Kind::Double)),
        opcodes::AALOAD => Effect::Binary(Some(Kind::Reference)),
        opcodes::IASTORE..=opcodes::SASTORE => Effect::Ternary,
        opcodes::POP => Effect::Pop,
        opcodes::POP2 => Effect::Pop2,
        opcodes::DUP => Effect::Dup,
        opcodes::DUP_X1 => Effect::DupX1,
        opcodes::DUP_X2 => Effect::DupX2,
        opcodes::DUP2 => Effect::Dup2,
        opcodes::DUP2_X1 => Effect::Dup2X1,
        opcodes::DUP2_X2 => Effect::Dup2X2,
        opcodes::SWAP => Effect::Swap,
        // Arithmetic: the low two bits of the opcode select int/long/float/double.
        opcodes::IADD..=opcodes::DREM => Effect::Binary(Some(arithmetic_kind(opcode))),
        opcodes::INEG..=opcodes::DNEG => Effect::Unary(Some(arithmetic_kind(opcode))),
        opcodes::ISHL | opcodes::ISHR | opcodes::IUSHR | opcodes::IAND | opcodes::IOR
        | opcodes::IXOR => Effect::Binary(Some(Kind::Int)),
        opcodes::LSHL | opcodes::LSHR | opcodes::LUSHR | opcodes::LAND | opcodes::LOR
        | opcodes::LXOR => Effect::Binary(Some(Kind::Long)),
        opcodes::I2L | opcodes::F2L | opcodes::D2L => Effect::Unary(Some(Kind::Long)),
        opcodes::I2F | opcodes::L2F | opcodes::D2F => Effect::Unary(Some(Kind::Float)),
        opcodes::I2D | opcodes::L2D | opcodes::F2D => Effect::Unary(Some(Kind::Double)),
        opcodes::L2I | opcodes::F2I | opcodes::D2I | opcodes::I2B | opcodes::I2C | opcodes::I2S => {
            Effect::Unary(Some(Kind::Int))
        }
        opcodes::LCMP..=opcodes::DCMPG => Effect::Binary(Some(Kind::Int)),
        opcodes::IRETURN..=opcodes::ARETURN => Effect::Return { value: true },
        opcodes::RETURN => Effect::Return { value: false },
        opcodes::ARRAYLENGTH => Effect::Unary(Some(Kind::Int)),
        opcodes::ATHROW => Effect::Throw,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => Effect::Unary(None),
        other => anyhow::bail!("unexpected operand-less opcode 0x{:02x}", other),
    };
    Ok(effect)
}

fn arithmetic_kind(opcode: u8) -> Kind {
    match (opcode - opcodes::IADD) % 4 {
        0 => Kind::Int,
        1 => Kind::Long,
        2 => Kind::Float,
        _ => Kind::Double,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FieldInsn, MethodInsn};

    #[test]
    fn decodes_arithmetic_widths() {
        assert_eq!(
            decode(&Instruction::Simple(opcodes::IMUL)).expect("decode"),
            Effect::Binary(Some(Kind::Int))
        );
        assert_eq!(
            decode(&Instruction::Simple(opcodes::LMUL)).expect("decode"),
            Effect::Binary(Some(Kind::Long))
        );
        assert_eq!(
            decode(&Instruction::Simple(opcodes::DNEG)).expect("decode"),
            Effect::Unary(Some(Kind::Double))
        );
    }

    #[test]
    fn decodes_member_access_from_descriptors() {
        let getfield = Instruction::Field(FieldInsn {
            opcode: opcodes::GETFIELD,
            owner: "A".to_string(),
            name: "x".to_string(),
            descriptor: "J".to_string(),
        });
        assert_eq!(
            decode(&getfield).expect("decode"),
            Effect::Unary(Some(Kind::Long))
        );

        let invoke = Instruction::Method(MethodInsn {
            opcode: opcodes::INVOKEVIRTUAL,
            owner: "A".to_string(),
            name: "m".to_string(),
            descriptor: "(IJ)V".to_string(),
            interface: false,
        });
        assert_eq!(
            decode(&invoke).expect("decode"),
            Effect::Nary {
                count: 3,
                result: None
            }
        );
    }

    #[test]
    fn rejects_subroutines() {
        let ret = Instruction::Var {
            opcode: opcodes::RET,
            index: 1,
        };
        assert!(decode(&ret).is_err());
    }
}
