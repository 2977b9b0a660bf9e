#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Intermediate representation for parsed JVM classes.
#[derive(Clone, Debug, Default)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    /// Distinct descriptors per member name, built on first use.
    method_index: OnceLock<BTreeMap<String, usize>>,
    field_index: OnceLock<BTreeMap<String, usize>>,
}

impl Class {
    pub(crate) fn new(
        name: impl Into<String>,
        super_name: Option<String>,
        interfaces: Vec<String>,
        fields: Vec<Field>,
        methods: Vec<Method>,
    ) -> Self {
        Self {
            name: name.into(),
            super_name,
            interfaces,
            fields,
            methods,
            ..Self::default()
        }
    }

    pub(crate) fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub(crate) fn find_field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
    }

    /// How many distinct descriptors share a method name in this class.
    pub(crate) fn method_overloads(&self, name: &str) -> usize {
        let index = self.method_index.get_or_init(|| {
            count_by_name(self.methods.iter().map(|m| (m.name.as_str(), m.descriptor.as_str())))
        });
        index.get(name).copied().unwrap_or(0)
    }

    /// How many distinct descriptors share a field name in this class.
    pub(crate) fn field_overloads(&self, name: &str) -> usize {
        let index = self.field_index.get_or_init(|| {
            count_by_name(self.fields.iter().map(|f| (f.name.as_str(), f.descriptor.as_str())))
        });
        index.get(name).copied().unwrap_or(0)
    }
}

fn count_by_name<'a>(members: impl Iterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, usize> {
    let mut seen = BTreeMap::<&str, Vec<&str>>::new();
    for (name, descriptor) in members {
        let descriptors = seen.entry(name).or_default();
        if !descriptors.contains(&descriptor) {
            descriptors.push(descriptor);
        }
    }
    seen.into_iter()
        .map(|(name, descriptors)| (name.to_string(), descriptors.len()))
        .collect()
}

/// Field declared on a class.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: FieldAccess,
}

/// Field access flags needed for analysis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct FieldAccess {
    pub(crate) is_static: bool,
}

/// Intermediate representation for a method and its bytecode.
#[derive(Clone, Debug, Default)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) local_variables: Vec<LocalVariable>,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
}

impl Method {
    pub(crate) fn is_static(&self) -> bool {
        self.access.is_static
    }

    /// Position of the instruction starting at `offset`.
    pub(crate) fn instruction_index(&self, offset: u32) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .ok()
    }
}

/// Method access flags needed for analysis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct MethodAccess {
    pub(crate) is_static: bool,
}

/// Entry of the `LocalVariableTable` attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct LocalVariable {
    pub(crate) index: u16,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) start_pc: u32,
    pub(crate) length: u32,
}

impl LocalVariable {
    pub(crate) fn is_live_at(&self, offset: u32) -> bool {
        offset >= self.start_pc && offset < self.start_pc + self.length
    }
}

/// Exception handler entry from the Code attribute.
#[derive(Clone, Debug)]
pub(crate) struct ExceptionHandler {
    pub(crate) start_pc: u32,
    pub(crate) end_pc: u32,
    pub(crate) handler_pc: u32,
    pub(crate) catch_type: Option<String>,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) kind: InstructionKind,
}

impl Instruction {
    pub(crate) fn new(offset: u32, opcode: u8, kind: InstructionKind) -> Self {
        Self {
            offset,
            opcode,
            kind,
        }
    }
}

/// Decoded instruction operands.
#[derive(Clone, Debug)]
pub(crate) enum InstructionKind {
    Invoke(CallSite),
    InvokeDynamic { name: String, descriptor: String },
    Field(FieldRef),
    /// `NEW`, `ANEWARRAY`, `CHECKCAST`, `INSTANCEOF` with their class operand.
    Type(String),
    NewArray(u8),
    MultiANewArray { descriptor: String, dimensions: u8 },
    Constant(Constant),
    /// Local variable loads, stores, `IINC` and `RET`.
    Local(u16),
    Jump(Vec<u32>),
    Other,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

/// Field reference extracted from a field instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Constant pushed by `xCONST_n`, `BIPUSH`, `SIPUSH` or `LDC`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Constant {
    Null,
    Int(Option<i32>),
    Long,
    Float,
    Double,
    String(String),
    Class(String),
    Other,
}

/// Primitive element kinds of `NEWARRAY`, indexed by its `atype` operand.
pub(crate) fn newarray_element_descriptor(atype: u8) -> Option<&'static str> {
    match atype {
        4 => Some("Z"),
        5 => Some("C"),
        6 => Some("F"),
        7 => Some("D"),
        8 => Some("B"),
        9 => Some("S"),
        10 => Some("I"),
        11 => Some("J"),
        _ => None,
    }
}

impl InstructionKind {
    pub(crate) fn call(&self) -> Option<&CallSite> {
        match self {
            InstructionKind::Invoke(call) => Some(call),
            _ => None,
        }
    }
}
