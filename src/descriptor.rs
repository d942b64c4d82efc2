use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Parameter types of a JVM method descriptor.
pub(crate) fn parameter_types(descriptor: &str) -> Result<Vec<TypeDescriptor>> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(descriptor.parameter_types().to_vec())
}

/// Return type of a JVM method descriptor.
pub(crate) fn return_type(descriptor: &str) -> Result<TypeDescriptor> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(descriptor.return_type().clone())
}

/// Parse a single field descriptor such as `I` or `[Ljava/lang/String;`.
pub(crate) fn field_type(descriptor: &str) -> Result<TypeDescriptor> {
    let wrapped = format!("({descriptor})V");
    let mut types = parameter_types(&wrapped)
        .with_context(|| format!("parse field descriptor {descriptor}"))?;
    if types.len() != 1 {
        anyhow::bail!("invalid field descriptor {descriptor}");
    }
    Ok(types.remove(0))
}

/// Number of local/stack slots a value of this type occupies.
pub(crate) fn slot_size(ty: &TypeDescriptor) -> usize {
    match ty {
        TypeDescriptor::Long | TypeDescriptor::Double => 2,
        TypeDescriptor::Void => 0,
        _ => 1,
    }
}

/// Slots occupied by the declared parameters, excluding `this`.
pub(crate) fn parameter_slots(descriptor: &str) -> Result<usize> {
    Ok(parameter_types(descriptor)?.iter().map(slot_size).sum())
}

/// Local slot and type of the last declared parameter.
pub(crate) fn last_parameter(
    descriptor: &str,
    is_static: bool,
) -> Result<Option<(u16, TypeDescriptor)>> {
    let mut types = parameter_types(descriptor)?;
    let Some(last) = types.pop() else {
        return Ok(None);
    };
    let receiver = if is_static { 0 } else { 1 };
    let slot = receiver + types.iter().map(slot_size).sum::<usize>();
    Ok(Some((slot as u16, last)))
}

/// True for types held in an int slot (`int`, `short`, `byte`, `char`, `boolean`).
pub(crate) fn is_int_like(ty: &TypeDescriptor) -> bool {
    matches!(
        ty,
        TypeDescriptor::Integer
            | TypeDescriptor::Short
            | TypeDescriptor::Byte
            | TypeDescriptor::Char
            | TypeDescriptor::Boolean
    )
}

/// Remove the last parameter from a method descriptor.
pub(crate) fn drop_last_parameter(descriptor: &str) -> Result<String> {
    let (parameters, return_part) = split_parameters(descriptor)?;
    let Some((_, kept)) = parameters.split_last() else {
        anyhow::bail!("descriptor has no parameters: {descriptor}");
    };
    Ok(format!("({}){}", kept.concat(), return_part))
}

/// Split a method descriptor into its raw parameter descriptors and return descriptor.
fn split_parameters(descriptor: &str) -> Result<(Vec<&str>, &str)> {
    let body = descriptor
        .strip_prefix('(')
        .with_context(|| format!("invalid method descriptor {descriptor}"))?;
    let close = body
        .find(')')
        .with_context(|| format!("invalid method descriptor {descriptor}"))?;
    let (parameters, rest) = body.split_at(close);
    let bytes = parameters.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while index < bytes.len() {
        while bytes[index] == b'[' {
            index += 1;
            if index >= bytes.len() {
                anyhow::bail!("invalid method descriptor {descriptor}");
            }
        }
        if bytes[index] == b'L' {
            let end = parameters[index..]
                .find(';')
                .with_context(|| format!("invalid method descriptor {descriptor}"))?;
            index += end;
        }
        index += 1;
        parts.push(&parameters[start..index]);
        start = index;
    }
    Ok((parts, &rest[1..]))
}

/// Java source spelling of a field descriptor (`int`, `java.lang.String`, `int[]`).
pub(crate) fn java_type_name(descriptor: &str) -> String {
    match field_type(descriptor) {
        Ok(ty) => type_name(&ty),
        Err(_) => descriptor.to_string(),
    }
}

fn type_name(ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Byte => "byte".to_string(),
        TypeDescriptor::Char => "char".to_string(),
        TypeDescriptor::Double => "double".to_string(),
        TypeDescriptor::Float => "float".to_string(),
        TypeDescriptor::Integer => "int".to_string(),
        TypeDescriptor::Long => "long".to_string(),
        TypeDescriptor::Short => "short".to_string(),
        TypeDescriptor::Boolean => "boolean".to_string(),
        TypeDescriptor::Void => "void".to_string(),
        TypeDescriptor::Object(name) => name.replace('/', "."),
        TypeDescriptor::Array(component, dimensions) => {
            let mut name = type_name(component);
            for _ in 0..*dimensions {
                name.push_str("[]");
            }
            name
        }
    }
}

/// Rewrite every class name embedded in a field or method descriptor.
pub(crate) fn map_descriptor<F>(descriptor: &str, mut map: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut output = String::with_capacity(descriptor.len());
    let mut rest = descriptor;
    while let Some(start) = rest.find('L') {
        let Some(end) = rest[start..].find(';') else {
            break;
        };
        output.push_str(&rest[..=start]);
        let name = &rest[start + 1..start + end];
        match map(name) {
            Some(mapped) => output.push_str(&mapped),
            None => output.push_str(name),
        }
        output.push(';');
        rest = &rest[start + end + 1..];
    }
    output.push_str(rest);
    output
}
