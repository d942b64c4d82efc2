use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use jclassfile::attributes::{Attribute, ExceptionRecord};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use opentelemetry::KeyValue;
use tracing::debug;
use zip::ZipArchive;

use crate::ir::{
    Class, ClassPool, Constant, Field, FieldInsn, Instruction, LabelId, Method, MethodInsn,
    TryCatchBlock,
};
use crate::opcodes;
use crate::telemetry::{Telemetry, with_span};

/// Load every class of a JAR archive or a single `.class` file into a pool.
pub(crate) fn load_pool(path: &Path, telemetry: Option<&Telemetry>) -> Result<ClassPool> {
    let mut pool = ClassPool::new();
    if is_jar_path(path) {
        load_jar_file(path, telemetry, &mut pool)?;
    } else if is_class_path(path) {
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let class = parse_class_bytes(&data)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        insert_class(&mut pool, class)?;
    } else {
        anyhow::bail!("unsupported input file: {}", path.display());
    }
    debug!("Loaded {} classes from {}", pool.len(), path.display());
    Ok(pool)
}

fn load_jar_file(path: &Path, telemetry: Option<&Telemetry>, pool: &mut ClassPool) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class")
            && !name.ends_with("module-info.class")
            && !name.starts_with("META-INF/versions/")
        {
            entry_names.push(name);
        }
    }
    entry_names.sort();

    for name in entry_names {
        let attributes = [KeyValue::new("jdeob.jar_entry", name.clone())];
        let class = with_span(telemetry, "class.load", &attributes, || -> Result<Class> {
            let mut entry = archive
                .by_name(&name)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            parse_class_bytes(&data)
                .with_context(|| format!("failed to parse {}:{}", path.display(), name))
        })?;
        insert_class(pool, class)?;
    }
    Ok(())
}

fn insert_class(pool: &mut ClassPool, class: Class) -> Result<()> {
    let name = class.name.clone();
    if pool.insert(class).is_some() {
        anyhow::bail!("duplicate class {name}");
    }
    Ok(())
}

fn is_jar_path(path: &Path) -> bool {
    has_extension(path, "jar")
}

fn is_class_path(path: &Path) -> bool {
    has_extension(path, "class")
}

fn has_extension(path: &Path, expected: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// Decode class file bytes into the in-memory model.
pub(crate) fn parse_class_bytes(data: &[u8]) -> Result<Class> {
    let class_file = class_file::parse(data).context("failed to parse class file bytes")?;
    let constant_pool = class_file.constant_pool();
    let name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut interfaces = Vec::new();
    for interface in class_file.interfaces() {
        interfaces
            .push(resolve_class_name(constant_pool, *interface).context("resolve interface name")?);
    }

    let mut source_file = None;
    for attribute in class_file.attributes() {
        if let Attribute::SourceFile { sourcefile_index } = attribute {
            source_file =
                Some(resolve_utf8(constant_pool, *sourcefile_index).context("resolve source file")?);
        }
    }

    let fields = parse_fields(constant_pool, class_file.fields()).context("parse fields")?;
    let methods = parse_methods(constant_pool, class_file.methods())
        .with_context(|| format!("parse methods of {name}"))?;

    Ok(Class {
        name,
        super_name,
        interfaces,
        access: class_file.access_flags().bits(),
        minor_version: read_u16(data, 4).context("read minor version")?,
        major_version: read_u16(data, 6).context("read major version")?,
        source_file,
        fields,
        methods,
    })
}

fn parse_fields(
    constant_pool: &[ConstantPool],
    fields: &[jclassfile::fields::FieldInfo],
) -> Result<Vec<Field>> {
    let mut parsed = Vec::new();
    for field in fields {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        let mut constant_value = None;
        for attribute in field.attributes() {
            if let Attribute::ConstantValue {
                constantvalue_index,
            } = attribute
            {
                constant_value = Some(
                    resolve_constant(constant_pool, *constantvalue_index)
                        .with_context(|| format!("resolve constant value of {name}"))?,
                );
            }
        }
        parsed.push(Field {
            name,
            descriptor,
            access: field.access_flags().bits(),
            constant_value,
        });
    }
    Ok(parsed)
}

fn parse_methods(
    constant_pool: &[ConstantPool],
    methods: &[jclassfile::methods::MethodInfo],
) -> Result<Vec<Method>> {
    let mut parsed = Vec::new();
    for method in methods {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        let mut decoded = Method::new(&name, &descriptor, method.access_flags().bits());
        for attribute in method.attributes() {
            match attribute {
                Attribute::Code {
                    max_stack,
                    max_locals,
                    code,
                    exception_table,
                    attributes,
                } => {
                    decoded.max_stack = *max_stack;
                    decoded.max_locals = *max_locals;
                    let lines = parse_line_numbers(attributes);
                    decode_code(&mut decoded, code, exception_table, &lines, constant_pool)
                        .with_context(|| format!("decode {name}{descriptor}"))?;
                }
                Attribute::Exceptions {
                    exception_index_table,
                } => {
                    for index in exception_index_table {
                        decoded.exceptions.push(
                            resolve_class_name(constant_pool, *index)
                                .context("resolve declared exception")?,
                        );
                    }
                }
                _ => {}
            }
        }
        parsed.push(decoded);
    }
    Ok(parsed)
}

/// Line number table as `(start_pc, line)` pairs in pc order.
fn parse_line_numbers(attributes: &[Attribute]) -> Vec<(usize, u16)> {
    let mut entries = Vec::new();
    for attribute in attributes {
        let Attribute::LineNumberTable { line_number_table } = attribute else {
            continue;
        };
        for record in line_number_table {
            entries.push((record.start_pc() as usize, record.line_number()));
        }
    }
    entries.sort_by_key(|(start_pc, _)| *start_pc);
    entries
}

/// Turn raw bytecode into label-addressed instructions.
fn decode_code(
    method: &mut Method,
    code: &[u8],
    exception_table: &[ExceptionRecord],
    lines: &[(usize, u16)],
    constant_pool: &[ConstantPool],
) -> Result<()> {
    let mut starts = BTreeSet::new();
    let mut targets = BTreeSet::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        starts.insert(offset);
        targets.extend(branch_targets(code, offset)?);
        offset += length;
    }
    for record in exception_table {
        targets.insert(record.start_pc() as usize);
        targets.insert(record.end_pc() as usize);
        targets.insert(record.handler_pc() as usize);
    }
    targets.extend(lines.iter().map(|(start_pc, _)| *start_pc));

    let mut labels = BTreeMap::new();
    for target in targets {
        if target != code.len() && !starts.contains(&target) {
            anyhow::bail!("branch target {target} is not an instruction boundary");
        }
        labels.insert(target, method.new_label());
    }
    let label_at = |offset: usize| -> Result<LabelId> {
        labels
            .get(&offset)
            .copied()
            .with_context(|| format!("no label at offset {offset}"))
    };

    let mut instructions = Vec::new();
    for &start in &starts {
        if let Some(label) = labels.get(&start) {
            instructions.push(Instruction::Label(*label));
        }
        for (_, line) in lines.iter().filter(|(start_pc, _)| *start_pc == start) {
            instructions.push(Instruction::Line(*line));
        }
        instructions.push(
            decode_instruction(code, start, constant_pool, &label_at)
                .with_context(|| format!("decode instruction at offset {start}"))?,
        );
    }
    if let Some(label) = labels.get(&code.len()) {
        instructions.push(Instruction::Label(*label));
    }
    method.instructions = instructions;

    for record in exception_table {
        let catch_type = if record.catch_type() == 0 {
            None
        } else {
            Some(resolve_class_name(constant_pool, record.catch_type()).context("resolve catch type")?)
        };
        method.try_catch_blocks.push(TryCatchBlock {
            start: label_at(record.start_pc() as usize)?,
            end: label_at(record.end_pc() as usize)?,
            handler: label_at(record.handler_pc() as usize)?,
            catch_type,
        });
    }
    Ok(())
}

fn branch_targets(code: &[u8], offset: usize) -> Result<Vec<usize>> {
    let opcode = code[offset];
    let relative = |delta: i64| -> Result<usize> {
        usize::try_from(offset as i64 + delta).context("branch target before method start")
    };
    match opcode {
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            Ok(vec![relative(read_i16(code, offset + 1)? as i64)?])
        }
        opcodes::GOTO_W | opcodes::JSR_W => Ok(vec![relative(read_i32(code, offset + 1)? as i64)?]),
        opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
            let (default, _, targets) = read_switch(code, offset)?;
            let mut resolved = vec![relative(default as i64)?];
            for target in targets {
                resolved.push(relative(target as i64)?);
            }
            Ok(resolved)
        }
        _ => Ok(Vec::new()),
    }
}

/// Default offset, keys (or `[low, high]` for tableswitch) and case offsets.
fn read_switch(code: &[u8], offset: usize) -> Result<(i32, Vec<i32>, Vec<i32>)> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    if code[offset] == opcodes::TABLESWITCH {
        let low = read_i32(code, base + 4)?;
        let high = read_i32(code, base + 8)?;
        let count = (high as i64 - low as i64 + 1).max(0) as usize;
        let mut targets = Vec::with_capacity(count);
        for index in 0..count {
            targets.push(read_i32(code, base + 12 + index * 4)?);
        }
        Ok((default, vec![low, high], targets))
    } else {
        let pairs = read_i32(code, base + 4)?.max(0) as usize;
        let mut keys = Vec::with_capacity(pairs);
        let mut targets = Vec::with_capacity(pairs);
        for index in 0..pairs {
            keys.push(read_i32(code, base + 8 + index * 8)?);
            targets.push(read_i32(code, base + 12 + index * 8)?);
        }
        Ok((default, keys, targets))
    }
}

fn decode_instruction<F>(
    code: &[u8],
    offset: usize,
    constant_pool: &[ConstantPool],
    label_at: &F,
) -> Result<Instruction>
where
    F: Fn(usize) -> Result<LabelId>,
{
    let opcode = code[offset];
    let jump = |delta: i64| -> Result<LabelId> {
        let target = usize::try_from(offset as i64 + delta).context("negative branch target")?;
        label_at(target)
    };
    let instruction = match opcode {
        opcodes::NOP..=opcodes::DCONST_1 => Instruction::Simple(opcode),
        opcodes::BIPUSH => Instruction::Int {
            opcode,
            operand: *code.get(offset + 1).context("bipush operand")? as i8 as i32,
        },
        opcodes::SIPUSH => Instruction::Int {
            opcode,
            operand: read_i16(code, offset + 1)? as i32,
        },
        opcodes::LDC => {
            let index = *code.get(offset + 1).context("ldc index")? as u16;
            Instruction::Ldc(resolve_constant(constant_pool, index)?)
        }
        opcodes::LDC_W | opcodes::LDC2_W => {
            Instruction::Ldc(resolve_constant(constant_pool, read_u16(code, offset + 1)?)?)
        }
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE => Instruction::Var {
            opcode,
            index: *code.get(offset + 1).context("local variable index")? as u16,
        },
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = opcode - opcodes::ILOAD_0;
            Instruction::Var {
                opcode: opcodes::ILOAD + relative / 4,
                index: (relative % 4) as u16,
            }
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let relative = opcode - opcodes::ISTORE_0;
            Instruction::Var {
                opcode: opcodes::ISTORE + relative / 4,
                index: (relative % 4) as u16,
            }
        }
        opcodes::IINC => Instruction::Iinc {
            index: *code.get(offset + 1).context("iinc index")? as u16,
            delta: *code.get(offset + 2).context("iinc delta")? as i8 as i16,
        },
        opcodes::IALOAD..=opcodes::SALOAD | opcodes::IASTORE..=opcodes::LXOR => {
            Instruction::Simple(opcode)
        }
        opcodes::I2L..=opcodes::DCMPG => Instruction::Simple(opcode),
        opcodes::IFEQ..=opcodes::GOTO | opcodes::IFNULL | opcodes::IFNONNULL => Instruction::Jump {
            opcode,
            target: jump(read_i16(code, offset + 1)? as i64)?,
        },
        opcodes::GOTO_W => Instruction::Jump {
            opcode: opcodes::GOTO,
            target: jump(read_i32(code, offset + 1)? as i64)?,
        },
        opcodes::JSR | opcodes::JSR_W | opcodes::RET => {
            anyhow::bail!("subroutines (JSR/RET) are not supported")
        }
        opcodes::TABLESWITCH => {
            let (default, bounds, targets) = read_switch(code, offset)?;
            Instruction::TableSwitch {
                low: bounds[0],
                high: bounds[1],
                default: jump(default as i64)?,
                targets: targets
                    .into_iter()
                    .map(|target| jump(target as i64))
                    .collect::<Result<_>>()?,
            }
        }
        opcodes::LOOKUPSWITCH => {
            let (default, keys, targets) = read_switch(code, offset)?;
            Instruction::LookupSwitch {
                default: jump(default as i64)?,
                keys,
                targets: targets
                    .into_iter()
                    .map(|target| jump(target as i64))
                    .collect::<Result<_>>()?,
            }
        }
        opcodes::IRETURN..=opcodes::RETURN
        | opcodes::ARRAYLENGTH
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => Instruction::Simple(opcode),
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let member = resolve_member_ref(constant_pool, read_u16(code, offset + 1)?)
                .context("resolve field ref")?;
            Instruction::Field(FieldInsn {
                opcode,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
            })
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let member = resolve_member_ref(constant_pool, read_u16(code, offset + 1)?)
                .context("resolve method ref")?;
            Instruction::Method(MethodInsn {
                opcode,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
                interface: member.interface,
            })
        }
        opcodes::INVOKEDYNAMIC => anyhow::bail!("invokedynamic is not supported"),
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            Instruction::Type {
                opcode,
                descriptor: resolve_class_name(constant_pool, read_u16(code, offset + 1)?)
                    .context("resolve type operand")?,
            }
        }
        opcodes::NEWARRAY => Instruction::Int {
            opcode,
            operand: *code.get(offset + 1).context("newarray type")? as i32,
        },
        opcodes::MULTIANEWARRAY => Instruction::MultiANewArray {
            descriptor: resolve_class_name(constant_pool, read_u16(code, offset + 1)?)
                .context("resolve array type")?,
            dimensions: *code.get(offset + 3).context("multianewarray dimensions")?,
        },
        opcodes::WIDE => {
            let inner = *code.get(offset + 1).context("missing wide opcode")?;
            let index = read_u16(code, offset + 2)?;
            match inner {
                opcodes::IINC => Instruction::Iinc {
                    index,
                    delta: read_i16(code, offset + 4)?,
                },
                opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE => {
                    Instruction::Var {
                        opcode: inner,
                        index,
                    }
                }
                opcodes::RET => anyhow::bail!("subroutines (JSR/RET) are not supported"),
                other => anyhow::bail!("invalid wide opcode 0x{:02x}", other),
            }
        }
        other => anyhow::bail!("unsupported opcode 0x{:02x}", other),
    };
    Ok(instruction)
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

fn resolve_constant(constant_pool: &[ConstantPool], index: u16) -> Result<Constant> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing constant pool entry")?;
    let constant = match entry {
        ConstantPool::Integer { value } => Constant::Int(*value),
        ConstantPool::Float { value } => Constant::Float(*value),
        ConstantPool::Long { value } => Constant::Long(*value),
        ConstantPool::Double { value } => Constant::Double(*value),
        ConstantPool::String { string_index } => {
            Constant::String(resolve_utf8(constant_pool, *string_index)?)
        }
        ConstantPool::Class { name_index } => Constant::Class(resolve_utf8(constant_pool, *name_index)?),
        _ => anyhow::bail!("unsupported loadable constant at index {index}"),
    };
    Ok(constant)
}

/// Resolved constant pool field or method reference.
struct MemberRef {
    owner: String,
    name: String,
    descriptor: String,
    interface: bool,
}

fn resolve_member_ref(constant_pool: &[ConstantPool], index: u16) -> Result<MemberRef> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing member ref entry")?;
    let (class_index, name_and_type_index, interface) = match entry {
        ConstantPool::Fieldref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index, false),
        ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index, true),
        _ => anyhow::bail!("unexpected member ref entry"),
    };
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name_index, descriptor_index) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    let name = resolve_utf8(constant_pool, name_index).context("resolve member name")?;
    let descriptor =
        resolve_utf8(constant_pool, descriptor_index).context("resolve member descriptor")?;
    Ok(MemberRef {
        owner,
        name,
        descriptor,
        interface,
    })
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(u16, u16)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((*name_index, *descriptor_index)),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        0xa9 => 2,
        0xaa => tableswitch_length(code, offset)?,
        0xab => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc4 => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

/// Alignment bytes after a switch opcode at `offset`.
pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    Ok(read_u16(code, offset)? as i16)
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode u32 out of bounds")?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    Ok(read_u32(code, offset)? as i32)
}
