//! Test-only class file writer and fixture helpers.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Minimal class file writer covering what the loader decodes: member refs,
/// fields, code, local variable tables and exception tables.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
}

/// Method body plus its optional tables.
#[derive(Default)]
pub(crate) struct CodeSpec {
    pub(crate) code: Vec<u8>,
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    /// `(start_pc, length, name, descriptor, slot)`.
    pub(crate) locals: Vec<(u16, u16, String, String, u16)>,
    /// `(start_pc, end_pc, handler_pc, catch type or None)`.
    pub(crate) handlers: Vec<(u16, u16, u16, Option<String>)>,
}

struct FieldSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
}

struct MethodSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Option<EncodedCode>,
}

struct EncodedCode {
    spec: CodeSpec,
    locals: Vec<[u16; 5]>,
    handlers: Vec<[u16; 4]>,
}

enum CpEntry {
    Utf8(String),
    Integer(i32),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
}

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_ABSTRACT: u16 = 0x0400;

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            access_flags: 0x0021,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn interface(mut self) -> Self {
        self.access_flags = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        self
    }

    pub(crate) fn add_interface(&mut self, name: &str) {
        let index = self.add_class(name);
        self.interfaces.push(index);
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.push(CpEntry::Utf8(value.to_string()))
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.push(CpEntry::Class(name_index))
    }

    pub(crate) fn add_string(&mut self, value: &str) -> u16 {
        let utf8 = self.add_utf8(value);
        self.push(CpEntry::String(utf8))
    }

    pub(crate) fn add_integer(&mut self, value: i32) -> u16 {
        self.push(CpEntry::Integer(value))
    }

    fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.push(CpEntry::NameAndType(name_index, descriptor_index))
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::MethodRef(class_index, name_and_type))
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::FieldRef(class_index, name_and_type))
    }

    pub(crate) fn add_field(&mut self, access_flags: u16, name: &str, descriptor: &str) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.fields.push(FieldSpec {
            access_flags,
            name_index,
            descriptor_index,
        });
    }

    /// Method with a body; `None` declares an abstract method.
    pub(crate) fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Option<CodeSpec>,
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        let code = code.map(|spec| {
            let locals = spec
                .locals
                .iter()
                .map(|(start, length, name, descriptor, slot)| {
                    let name = self.add_utf8(name);
                    let descriptor = self.add_utf8(descriptor);
                    [*start, *length, name, descriptor, *slot]
                })
                .collect();
            let handlers = spec
                .handlers
                .iter()
                .map(|(start, end, handler, catch)| {
                    let catch = catch.as_deref().map_or(0, |name| self.add_class(name));
                    [*start, *end, *handler, catch]
                })
                .collect();
            EncodedCode {
                spec,
                locals,
                handlers,
            }
        });
        let access_flags = if code.is_none() {
            access_flags | ACC_ABSTRACT
        } else {
            access_flags
        };
        self.methods.push(MethodSpec {
            access_flags,
            name_index,
            descriptor_index,
            code,
        });
    }

    fn push(&mut self, entry: CpEntry) -> u16 {
        self.cp.push(entry);
        self.cp.len() as u16
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        let code_name = self.add_utf8("Code");
        let lvt_name = self.add_utf8("LocalVariableTable");

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access_flags);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut bytes, *interface);
        }
        write_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            write_u16(&mut bytes, field.access_flags);
            write_u16(&mut bytes, field.name_index);
            write_u16(&mut bytes, field.descriptor_index);
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            write_u16(&mut bytes, method.access_flags);
            write_u16(&mut bytes, method.name_index);
            write_u16(&mut bytes, method.descriptor_index);
            let Some(code) = &method.code else {
                write_u16(&mut bytes, 0);
                continue;
            };
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, code_name);
            let lvt_len = if code.locals.is_empty() {
                0
            } else {
                6 + 2 + 10 * code.locals.len() as u32
            };
            let attr_len = 12
                + code.spec.code.len() as u32
                + 8 * code.handlers.len() as u32
                + lvt_len;
            write_u32(&mut bytes, attr_len);
            write_u16(&mut bytes, code.spec.max_stack);
            write_u16(&mut bytes, code.spec.max_locals);
            write_u32(&mut bytes, code.spec.code.len() as u32);
            bytes.extend_from_slice(&code.spec.code);
            write_u16(&mut bytes, code.handlers.len() as u16);
            for handler in &code.handlers {
                for value in handler {
                    write_u16(&mut bytes, *value);
                }
            }
            if code.locals.is_empty() {
                write_u16(&mut bytes, 0);
            } else {
                write_u16(&mut bytes, 1);
                write_u16(&mut bytes, lvt_name);
                write_u32(&mut bytes, 2 + 10 * code.locals.len() as u32);
                write_u16(&mut bytes, code.locals.len() as u16);
                for local in &code.locals {
                    for value in local {
                        write_u16(&mut bytes, *value);
                    }
                }
            }
        }
        write_u16(&mut bytes, 0);
        bytes
    }
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Integer(value) => {
                bytes.push(3);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::String(utf8_index) => {
                bytes.push(8);
                write_u16(bytes, *utf8_index);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
        }
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}

/// Write `(file name, bytes)` pairs under `dir`.
pub(crate) fn write_classes(dir: &Path, classes: &[(&str, Vec<u8>)]) -> Result<()> {
    for (name, bytes) in classes {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}

/// `Foo` with `int x`, a constructor and `void bar()` doing `this.x = 1`;
/// the shared field-write fixture.
pub(crate) fn field_write_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("com/example/Foo", "java/lang/Object");
    builder.add_field(0, "x", "I");
    let object_init = builder.add_method_ref("java/lang/Object", "<init>", "()V");
    let field_x = builder.add_field_ref("com/example/Foo", "x", "I");

    builder.add_method(
        ACC_PUBLIC,
        "<init>",
        "()V",
        Some(CodeSpec {
            code: vec![0x2a, 0xb7, high(object_init), low(object_init), 0xb1],
            max_stack: 1,
            max_locals: 1,
            ..CodeSpec::default()
        }),
    );
    builder.add_method(
        ACC_PUBLIC,
        "bar",
        "()V",
        Some(CodeSpec {
            // aload_0, iconst_1, putfield x, return
            code: vec![0x2a, 0x04, 0xb5, high(field_x), low(field_x), 0xb1],
            max_stack: 2,
            max_locals: 1,
            locals: vec![(0, 6, "this".to_string(), "Lcom/example/Foo;".to_string(), 0)],
            ..CodeSpec::default()
        }),
    );
    builder.finish()
}
