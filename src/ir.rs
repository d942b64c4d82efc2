use std::collections::BTreeMap;

use crate::opcodes;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_PRIVATE: u16 = 0x0002;
pub(crate) const ACC_PROTECTED: u16 = 0x0004;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_FINAL: u16 = 0x0010;
pub(crate) const ACC_SYNCHRONIZED: u16 = 0x0020;
pub(crate) const ACC_VOLATILE: u16 = 0x0040;
pub(crate) const ACC_TRANSIENT: u16 = 0x0080;
pub(crate) const ACC_NATIVE: u16 = 0x0100;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_ABSTRACT: u16 = 0x0400;

/// Name-keyed arena owning every loaded class.
///
/// Classes refer to each other only by internal name, so the whole pool can
/// be replaced between passes without leaving stale references behind.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClassPool {
    classes: BTreeMap<String, Class>,
}

impl ClassPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a class, returning the previous class stored under the same name.
    pub(crate) fn insert(&mut self, class: Class) -> Option<Class> {
        self.classes.insert(class.name.clone(), class)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Class> {
        self.classes.remove(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Class> {
        self.classes.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Class> {
        self.classes.get_mut(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    /// Classes in name order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Class> {
        self.classes.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Class> {
        self.classes.values_mut()
    }

    /// Direct super types (super class first, then interfaces) of a pool class.
    pub(crate) fn direct_supers(&self, name: &str) -> Vec<String> {
        let Some(class) = self.get(name) else {
            return Vec::new();
        };
        class
            .super_name
            .iter()
            .chain(class.interfaces.iter())
            .cloned()
            .collect()
    }

    /// Pool classes that directly extend or implement `name`.
    pub(crate) fn direct_subs(&self, name: &str) -> Vec<String> {
        self.iter()
            .filter(|class| {
                class.super_name.as_deref() == Some(name)
                    || class.interfaces.iter().any(|interface| interface == name)
            })
            .map(|class| class.name.clone())
            .collect()
    }

    /// Every transitive super type of a pool class, including names outside the pool.
    pub(crate) fn all_supers(&self, name: &str) -> Vec<String> {
        let mut seen = Vec::new();
        let mut stack = self.direct_supers(name);
        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            stack.extend(self.direct_supers(&current));
            seen.push(current);
        }
        seen
    }
}

impl FromIterator<Class> for ClassPool {
    fn from_iter<T: IntoIterator<Item = Class>>(iter: T) -> Self {
        let mut pool = ClassPool::new();
        for class in iter {
            pool.insert(class);
        }
        pool
    }
}

/// Intermediate representation for a JVM class.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) access: u16,
    pub(crate) minor_version: u16,
    pub(crate) major_version: u16,
    pub(crate) source_file: Option<String>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
}

impl Class {
    pub(crate) fn new(name: &str, super_name: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            access: ACC_PUBLIC | ACC_SYNCHRONIZED,
            minor_version: 0,
            major_version: 50,
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.access & ACC_INTERFACE != 0
    }

    pub(crate) fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub(crate) fn field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
    }
}

/// Field declaration.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: u16,
    pub(crate) constant_value: Option<Constant>,
}

impl Field {
    pub(crate) fn new(name: &str, descriptor: &str, access: u16) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            constant_value: None,
        }
    }

    pub(crate) fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    pub(crate) fn is_final(&self) -> bool {
        self.access & ACC_FINAL != 0
    }
}

/// Method declaration and its decoded code.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: u16,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) try_catch_blocks: Vec<TryCatchBlock>,
    pub(crate) exceptions: Vec<String>,
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    next_label: u32,
}

impl Method {
    pub(crate) fn new(name: &str, descriptor: &str, access: u16) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            instructions: Vec::new(),
            try_catch_blocks: Vec::new(),
            exceptions: Vec::new(),
            max_stack: 0,
            max_locals: 0,
            next_label: 0,
        }
    }

    /// Allocates a label id that is unique within this method.
    pub(crate) fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    pub(crate) fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    pub(crate) fn is_abstract(&self) -> bool {
        self.access & ACC_ABSTRACT != 0
    }

    pub(crate) fn is_native(&self) -> bool {
        self.access & ACC_NATIVE != 0
    }

    pub(crate) fn has_code(&self) -> bool {
        !self.instructions.is_empty()
    }

    /// Instruction index of every label marker.
    pub(crate) fn label_positions(&self) -> BTreeMap<LabelId, usize> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(index, instruction)| match instruction {
                Instruction::Label(label) => Some((*label, index)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn first_line(&self) -> Option<u16> {
        self.instructions.iter().find_map(|instruction| match instruction {
            Instruction::Line(line) => Some(*line),
            _ => None,
        })
    }
}

/// Method-local label identity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct LabelId(pub(crate) u32);

/// Exception range guarded by a handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct TryCatchBlock {
    pub(crate) start: LabelId,
    pub(crate) end: LabelId,
    pub(crate) handler: LabelId,
    pub(crate) catch_type: Option<String>,
}

/// Loadable constant operand.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Constant {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    /// Internal name or array descriptor.
    Class(String),
}

impl Constant {
    /// Category-2 constants occupy two stack slots.
    pub(crate) fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// Field access operand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldInsn {
    pub(crate) opcode: u8,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl FieldInsn {
    pub(crate) fn is_static(&self) -> bool {
        matches!(self.opcode, opcodes::GETSTATIC | opcodes::PUTSTATIC)
    }

    pub(crate) fn is_get(&self) -> bool {
        matches!(self.opcode, opcodes::GETSTATIC | opcodes::GETFIELD)
    }

    /// `owner.name`, the key used for field identity.
    pub(crate) fn key(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

/// Method invocation operand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodInsn {
    pub(crate) opcode: u8,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) interface: bool,
}

impl MethodInsn {
    /// `owner.name + descriptor`, the key used for method identity.
    pub(crate) fn key(&self) -> String {
        format!("{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// Decoded instruction.
///
/// `Label` and `Line` are pseudo instructions: they occupy no bytes in the
/// emitted code.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Instruction {
    Label(LabelId),
    Line(u16),
    /// Operand-less opcodes, including `xCONST_n`, arithmetic, returns and stack ops.
    Simple(u8),
    /// `BIPUSH`, `SIPUSH` and `NEWARRAY`.
    Int { opcode: u8, operand: i32 },
    Ldc(Constant),
    /// Local variable load/store and `RET`, always with an explicit index.
    Var { opcode: u8, index: u16 },
    Iinc { index: u16, delta: i16 },
    /// `NEW`, `ANEWARRAY`, `CHECKCAST` and `INSTANCEOF`.
    Type { opcode: u8, descriptor: String },
    Field(FieldInsn),
    Method(MethodInsn),
    Jump { opcode: u8, target: LabelId },
    TableSwitch {
        low: i32,
        high: i32,
        default: LabelId,
        targets: Vec<LabelId>,
    },
    LookupSwitch {
        default: LabelId,
        keys: Vec<i32>,
        targets: Vec<LabelId>,
    },
    MultiANewArray { descriptor: String, dimensions: u8 },
}

impl Instruction {
    /// Opcode of a real instruction; `None` for labels and line markers.
    pub(crate) fn opcode(&self) -> Option<u8> {
        match self {
            Instruction::Label(_) | Instruction::Line(_) => None,
            Instruction::Simple(opcode)
            | Instruction::Int { opcode, .. }
            | Instruction::Var { opcode, .. }
            | Instruction::Type { opcode, .. }
            | Instruction::Jump { opcode, .. } => Some(*opcode),
            Instruction::Ldc(_) => Some(opcodes::LDC),
            Instruction::Iinc { .. } => Some(opcodes::IINC),
            Instruction::Field(field) => Some(field.opcode),
            Instruction::Method(method) => Some(method.opcode),
            Instruction::TableSwitch { .. } => Some(opcodes::TABLESWITCH),
            Instruction::LookupSwitch { .. } => Some(opcodes::LOOKUPSWITCH),
            Instruction::MultiANewArray { .. } => Some(opcodes::MULTIANEWARRAY),
        }
    }

    pub(crate) fn is_pseudo(&self) -> bool {
        self.opcode().is_none()
    }

    pub(crate) fn is_opcode(&self, opcode: u8) -> bool {
        self.opcode() == Some(opcode)
    }

    /// Integer pushed by `ICONST_n`, `BIPUSH`, `SIPUSH` or an int `LDC`.
    pub(crate) fn int_constant(&self) -> Option<i32> {
        match self {
            Instruction::Simple(opcode) if (opcodes::ICONST_M1..=opcodes::ICONST_5).contains(opcode) => {
                Some(*opcode as i32 - opcodes::ICONST_0 as i32)
            }
            Instruction::Int { opcode, operand }
                if *opcode == opcodes::BIPUSH || *opcode == opcodes::SIPUSH =>
            {
                Some(*operand)
            }
            Instruction::Ldc(Constant::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Shortest instruction that pushes an int constant.
    pub(crate) fn push_int(value: i32) -> Self {
        match value {
            -1..=5 => Instruction::Simple((opcodes::ICONST_0 as i32 + value) as u8),
            -128..=127 => Instruction::Int {
                opcode: opcodes::BIPUSH,
                operand: value,
            },
            -32768..=32767 => Instruction::Int {
                opcode: opcodes::SIPUSH,
                operand: value,
            },
            _ => Instruction::Ldc(Constant::Int(value)),
        }
    }

    /// Shortest instruction that pushes a long constant.
    pub(crate) fn push_long(value: i64) -> Self {
        match value {
            0 => Instruction::Simple(opcodes::LCONST_0),
            1 => Instruction::Simple(opcodes::LCONST_1),
            _ => Instruction::Ldc(Constant::Long(value)),
        }
    }

    /// Labels this instruction may transfer control to.
    pub(crate) fn jump_targets(&self) -> Vec<LabelId> {
        match self {
            Instruction::Jump { target, .. } => vec![*target],
            Instruction::TableSwitch {
                default, targets, ..
            }
            | Instruction::LookupSwitch {
                default, targets, ..
            } => {
                let mut labels = targets.clone();
                labels.push(*default);
                labels
            }
            _ => Vec::new(),
        }
    }
}
