use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::descriptor::parameter_slots;
use crate::ir::{Class, ClassPool, Constant, Field, Instruction, LabelId, Method};
use crate::opcodes;
use crate::scan::padding;
use crate::telemetry::{Telemetry, with_span};

/// Highest class file version emitted without a `StackMapTable`.
const MAX_MAJOR_VERSION: u16 = 50;

/// Write every class of the pool into a new JAR at `path`.
///
/// A partially written archive is removed when any class fails to encode.
pub(crate) fn save_pool(pool: &ClassPool, path: &Path, telemetry: Option<&Telemetry>) -> Result<()> {
    let result = write_jar(pool, path, telemetry);
    if result.is_err() && path.exists() {
        let _ = fs::remove_file(path);
    }
    result
}

fn write_jar(pool: &ClassPool, path: &Path, telemetry: Option<&Telemetry>) -> Result<()> {
    let file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for class in pool.iter() {
        let entry_name = format!("{}.class", class.name);
        let attributes = [KeyValue::new("jdeob.jar_entry", entry_name.clone())];
        let bytes = with_span(telemetry, "class.write", &attributes, || write_class(class))
            .with_context(|| format!("failed to write class {}", class.name))?;
        archive
            .start_file(entry_name.as_str(), options)
            .with_context(|| format!("failed to add {entry_name}"))?;
        archive
            .write_all(&bytes)
            .with_context(|| format!("failed to add {entry_name}"))?;
    }
    archive
        .finish()
        .with_context(|| format!("failed to finish {}", path.display()))?;
    debug!("Wrote {} classes to {}", pool.len(), path.display());
    Ok(())
}

/// Encode a class into class file bytes with a freshly built constant pool.
pub(crate) fn write_class(class: &Class) -> Result<Vec<u8>> {
    let mut constants = ConstantPoolBuilder::default();
    let mut body = Vec::new();

    write_u16(&mut body, class.access);
    write_u16(&mut body, constants.class(&class.name)?);
    let super_index = match &class.super_name {
        Some(name) => constants.class(name)?,
        None => 0,
    };
    write_u16(&mut body, super_index);
    write_u16(&mut body, count_u16(class.interfaces.len(), "interfaces")?);
    for interface in &class.interfaces {
        write_u16(&mut body, constants.class(interface)?);
    }

    write_u16(&mut body, count_u16(class.fields.len(), "fields")?);
    for field in &class.fields {
        write_field(&mut body, &mut constants, field)
            .with_context(|| format!("write field {}", field.name))?;
    }

    write_u16(&mut body, count_u16(class.methods.len(), "methods")?);
    for method in &class.methods {
        write_method(&mut body, &mut constants, method)
            .with_context(|| format!("write method {}{}", method.name, method.descriptor))?;
    }

    match &class.source_file {
        Some(source_file) => {
            write_u16(&mut body, 1);
            let name = constants.utf8("SourceFile")?;
            let value = constants.utf8(source_file)?;
            write_attribute(&mut body, name, &value.to_be_bytes())?;
        }
        None => write_u16(&mut body, 0),
    }

    let mut bytes = Vec::with_capacity(body.len() + 1024);
    write_u32(&mut bytes, 0xCAFEBABE);
    write_u16(&mut bytes, class.minor_version);
    write_u16(&mut bytes, class.major_version.min(MAX_MAJOR_VERSION));
    constants.write(&mut bytes)?;
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

fn write_field(out: &mut Vec<u8>, constants: &mut ConstantPoolBuilder, field: &Field) -> Result<()> {
    write_u16(out, field.access);
    write_u16(out, constants.utf8(&field.name)?);
    write_u16(out, constants.utf8(&field.descriptor)?);
    match &field.constant_value {
        Some(value) => {
            if matches!(value, Constant::Class(_)) {
                anyhow::bail!("class literal cannot be a ConstantValue");
            }
            write_u16(out, 1);
            let name = constants.utf8("ConstantValue")?;
            let index = constants.loadable(value)?;
            write_attribute(out, name, &index.to_be_bytes())?;
        }
        None => write_u16(out, 0),
    }
    Ok(())
}

fn write_method(out: &mut Vec<u8>, constants: &mut ConstantPoolBuilder, method: &Method) -> Result<()> {
    write_u16(out, method.access);
    write_u16(out, constants.utf8(&method.name)?);
    write_u16(out, constants.utf8(&method.descriptor)?);

    let mut attributes = Vec::new();
    let mut count = 0u16;
    if method.has_code() {
        let name = constants.utf8("Code")?;
        let code = encode_code(constants, method)?;
        write_attribute(&mut attributes, name, &code)?;
        count += 1;
    }
    if !method.exceptions.is_empty() {
        let name = constants.utf8("Exceptions")?;
        let mut table = Vec::new();
        write_u16(&mut table, count_u16(method.exceptions.len(), "exceptions")?);
        for exception in &method.exceptions {
            write_u16(&mut table, constants.class(exception)?);
        }
        write_attribute(&mut attributes, name, &table)?;
        count += 1;
    }
    write_u16(out, count);
    out.extend_from_slice(&attributes);
    Ok(())
}

/// Body of a `Code` attribute.
fn encode_code(constants: &mut ConstantPoolBuilder, method: &Method) -> Result<Vec<u8>> {
    let instructions = &method.instructions;

    // Offsets only depend on preceding sizes, so one forward pass settles the layout.
    let mut offsets = Vec::with_capacity(instructions.len());
    let mut pc = 0usize;
    for instruction in instructions {
        offsets.push(pc);
        pc += encoded_size(constants, instruction, pc)?;
    }
    let code_length = pc;
    if code_length == 0 || code_length > u16::MAX as usize {
        anyhow::bail!("invalid code length {code_length}");
    }

    let mut label_offsets = HashMap::new();
    for (index, instruction) in instructions.iter().enumerate() {
        if let Instruction::Label(label) = instruction {
            label_offsets.insert(*label, offsets[index]);
        }
    }
    let label_offset = |label: LabelId| -> Result<usize> {
        label_offsets
            .get(&label)
            .copied()
            .with_context(|| format!("reference to unplaced label {label:?}"))
    };

    let mut code = Vec::with_capacity(code_length);
    let mut lines = Vec::new();
    for (index, instruction) in instructions.iter().enumerate() {
        if let Instruction::Line(line) = instruction {
            if offsets[index] < code_length {
                lines.push((offsets[index] as u16, *line));
            }
            continue;
        }
        encode_instruction(&mut code, constants, instruction, offsets[index], &label_offset)
            .with_context(|| format!("encode instruction {index} ({instruction:?})"))?;
    }

    let mut exception_table = Vec::new();
    let mut handlers = 0usize;
    for block in &method.try_catch_blocks {
        let start = label_offset(block.start)?;
        let end = label_offset(block.end)?;
        if start >= end {
            continue;
        }
        write_u16(&mut exception_table, start as u16);
        write_u16(&mut exception_table, end as u16);
        write_u16(&mut exception_table, label_offset(block.handler)? as u16);
        let catch_type = match &block.catch_type {
            Some(name) => constants.class(name)?,
            None => 0,
        };
        write_u16(&mut exception_table, catch_type);
        handlers += 1;
    }

    let mut out = Vec::with_capacity(code.len() + 32);
    write_u16(&mut out, method.max_stack);
    write_u16(&mut out, method.max_locals);
    write_u32(&mut out, code_length as u32);
    out.extend_from_slice(&code);
    write_u16(&mut out, count_u16(handlers, "exception handlers")?);
    out.extend_from_slice(&exception_table);
    if lines.is_empty() {
        write_u16(&mut out, 0);
    } else {
        write_u16(&mut out, 1);
        let name = constants.utf8("LineNumberTable")?;
        let mut table = Vec::new();
        write_u16(&mut table, count_u16(lines.len(), "line numbers")?);
        for (start_pc, line) in lines {
            write_u16(&mut table, start_pc);
            write_u16(&mut table, line);
        }
        write_attribute(&mut out, name, &table)?;
    }
    Ok(out)
}

fn encoded_size(
    constants: &mut ConstantPoolBuilder,
    instruction: &Instruction,
    offset: usize,
) -> Result<usize> {
    let size = match instruction {
        Instruction::Label(_) | Instruction::Line(_) => 0,
        Instruction::Simple(_) => 1,
        Instruction::Int { opcode, .. } => {
            if *opcode == opcodes::SIPUSH {
                3
            } else {
                2
            }
        }
        Instruction::Ldc(constant) => {
            let index = constants.loadable(constant)?;
            if constant.is_wide() || index > u8::MAX as u16 {
                3
            } else {
                2
            }
        }
        Instruction::Var { index, .. } => {
            if *index <= 3 {
                1
            } else if *index <= u8::MAX as u16 {
                2
            } else {
                4
            }
        }
        Instruction::Iinc { index, delta } => {
            if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Instruction::Type { .. } | Instruction::Field(_) | Instruction::Jump { .. } => 3,
        Instruction::Method(method) => {
            if method.opcode == opcodes::INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Instruction::TableSwitch { targets, .. } => 1 + padding(offset) + 12 + targets.len() * 4,
        Instruction::LookupSwitch { keys, .. } => 1 + padding(offset) + 8 + keys.len() * 8,
        Instruction::MultiANewArray { .. } => 4,
    };
    Ok(size)
}

fn encode_instruction<F>(
    code: &mut Vec<u8>,
    constants: &mut ConstantPoolBuilder,
    instruction: &Instruction,
    offset: usize,
    label_offset: &F,
) -> Result<()>
where
    F: Fn(LabelId) -> Result<usize>,
{
    let relative = |label: LabelId| -> Result<i64> { Ok(label_offset(label)? as i64 - offset as i64) };
    match instruction {
        Instruction::Label(_) | Instruction::Line(_) => {}
        Instruction::Simple(opcode) => code.push(*opcode),
        Instruction::Int { opcode, operand } => {
            code.push(*opcode);
            if *opcode == opcodes::SIPUSH {
                write_u16(code, *operand as i16 as u16);
            } else {
                code.push(*operand as u8);
            }
        }
        Instruction::Ldc(constant) => {
            let index = constants.loadable(constant)?;
            if constant.is_wide() {
                code.push(opcodes::LDC2_W);
                write_u16(code, index);
            } else if index > u8::MAX as u16 {
                code.push(opcodes::LDC_W);
                write_u16(code, index);
            } else {
                code.push(opcodes::LDC);
                code.push(index as u8);
            }
        }
        Instruction::Var { opcode, index } => {
            if *index <= 3 {
                let base = if *opcode >= opcodes::ISTORE {
                    opcodes::ISTORE_0 + (*opcode - opcodes::ISTORE) * 4
                } else {
                    opcodes::ILOAD_0 + (*opcode - opcodes::ILOAD) * 4
                };
                code.push(base + *index as u8);
            } else if *index <= u8::MAX as u16 {
                code.push(*opcode);
                code.push(*index as u8);
            } else {
                code.push(opcodes::WIDE);
                code.push(*opcode);
                write_u16(code, *index);
            }
        }
        Instruction::Iinc { index, delta } => {
            if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                code.push(opcodes::IINC);
                code.push(*index as u8);
                code.push(*delta as i8 as u8);
            } else {
                code.push(opcodes::WIDE);
                code.push(opcodes::IINC);
                write_u16(code, *index);
                write_u16(code, *delta as u16);
            }
        }
        Instruction::Type { opcode, descriptor } => {
            code.push(*opcode);
            write_u16(code, constants.class(descriptor)?);
        }
        Instruction::Field(field) => {
            code.push(field.opcode);
            let index = constants.member(
                MemberKind::Field,
                &field.owner,
                &field.name,
                &field.descriptor,
            )?;
            write_u16(code, index);
        }
        Instruction::Method(method) => {
            code.push(method.opcode);
            let kind = if method.interface {
                MemberKind::InterfaceMethod
            } else {
                MemberKind::Method
            };
            write_u16(
                code,
                constants.member(kind, &method.owner, &method.name, &method.descriptor)?,
            );
            if method.opcode == opcodes::INVOKEINTERFACE {
                let count = parameter_slots(&method.descriptor)? + 1;
                code.push(u8::try_from(count).context("too many interface call arguments")?);
                code.push(0);
            }
        }
        Instruction::Jump { opcode, target } => {
            let delta = relative(*target)?;
            let Ok(delta) = i16::try_from(delta) else {
                anyhow::bail!("branch offset {delta} does not fit in 16 bits");
            };
            code.push(*opcode);
            write_u16(code, delta as u16);
        }
        Instruction::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            code.push(opcodes::TABLESWITCH);
            code.extend(std::iter::repeat_n(0, padding(offset)));
            write_i32(code, relative(*default)?)?;
            write_u32(code, *low as u32);
            write_u32(code, *high as u32);
            for target in targets {
                write_i32(code, relative(*target)?)?;
            }
        }
        Instruction::LookupSwitch {
            default,
            keys,
            targets,
        } => {
            code.push(opcodes::LOOKUPSWITCH);
            code.extend(std::iter::repeat_n(0, padding(offset)));
            write_i32(code, relative(*default)?)?;
            write_u32(code, keys.len() as u32);
            for (key, target) in keys.iter().zip(targets) {
                write_u32(code, *key as u32);
                write_i32(code, relative(*target)?)?;
            }
        }
        Instruction::MultiANewArray {
            descriptor,
            dimensions,
        } => {
            code.push(opcodes::MULTIANEWARRAY);
            write_u16(code, constants.class(descriptor)?);
            code.push(*dimensions);
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum Entry {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    Member(MemberKind, u16, u16),
}

impl Entry {
    fn slots(&self) -> u16 {
        match self {
            Entry::Long(_) | Entry::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Deduplicating constant pool under construction.
#[derive(Default)]
struct ConstantPoolBuilder {
    entries: Vec<Entry>,
    indexes: HashMap<Entry, u16>,
    next_index: u16,
}

impl ConstantPoolBuilder {
    fn intern(&mut self, entry: Entry) -> Result<u16> {
        if let Some(index) = self.indexes.get(&entry) {
            return Ok(*index);
        }
        let index = self.next_index.max(1);
        let next = index
            .checked_add(entry.slots())
            .context("constant pool overflow")?;
        self.next_index = next;
        self.entries.push(entry.clone());
        self.indexes.insert(entry, index);
        Ok(index)
    }

    fn utf8(&mut self, value: &str) -> Result<u16> {
        self.intern(Entry::Utf8(value.to_string()))
    }

    fn class(&mut self, name: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        self.intern(Entry::Class(name))
    }

    fn member(&mut self, kind: MemberKind, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let owner = self.class(owner)?;
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        let name_and_type = self.intern(Entry::NameAndType(name, descriptor))?;
        self.intern(Entry::Member(kind, owner, name_and_type))
    }

    fn loadable(&mut self, constant: &Constant) -> Result<u16> {
        match constant {
            Constant::Int(value) => self.intern(Entry::Integer(*value)),
            Constant::Float(value) => self.intern(Entry::Float(value.to_bits())),
            Constant::Long(value) => self.intern(Entry::Long(*value)),
            Constant::Double(value) => self.intern(Entry::Double(value.to_bits())),
            Constant::String(value) => {
                let value = self.utf8(value)?;
                self.intern(Entry::String(value))
            }
            Constant::Class(name) => self.class(name),
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        write_u16(out, self.next_index.max(1));
        for entry in &self.entries {
            match entry {
                Entry::Utf8(value) => {
                    out.push(1);
                    let encoded = modified_utf8(value);
                    write_u16(out, u16::try_from(encoded.len()).context("utf8 constant too long")?);
                    out.extend_from_slice(&encoded);
                }
                Entry::Integer(value) => {
                    out.push(3);
                    write_u32(out, *value as u32);
                }
                Entry::Float(bits) => {
                    out.push(4);
                    write_u32(out, *bits);
                }
                Entry::Long(value) => {
                    out.push(5);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Entry::Double(bits) => {
                    out.push(6);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Entry::Class(name) => {
                    out.push(7);
                    write_u16(out, *name);
                }
                Entry::String(value) => {
                    out.push(8);
                    write_u16(out, *value);
                }
                Entry::Member(kind, owner, name_and_type) => {
                    out.push(match kind {
                        MemberKind::Field => 9,
                        MemberKind::Method => 10,
                        MemberKind::InterfaceMethod => 11,
                    });
                    write_u16(out, *owner);
                    write_u16(out, *name_and_type);
                }
                Entry::NameAndType(name, descriptor) => {
                    out.push(12);
                    write_u16(out, *name);
                    write_u16(out, *descriptor);
                }
            }
        }
        Ok(())
    }
}

/// JVM "modified UTF-8": NUL as two bytes, supplementary characters as surrogate pairs.
fn modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

fn write_attribute(out: &mut Vec<u8>, name: u16, body: &[u8]) -> Result<()> {
    write_u16(out, name);
    write_u32(out, u32::try_from(body.len()).context("attribute too large")?);
    out.extend_from_slice(body);
    Ok(())
}

fn count_u16(count: usize, what: &str) -> Result<u16> {
    u16::try_from(count).with_context(|| format!("too many {what}: {count}"))
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i32(out: &mut Vec<u8>, value: i64) -> Result<()> {
    let value = i32::try_from(value).context("switch offset out of range")?;
    write_u32(out, value as u32);
    Ok(())
}
