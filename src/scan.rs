use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use jclassfile::fields::FieldFlags;
use jclassfile::methods::MethodFlags;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::ZipArchive;

use crate::ir::{
    CallKind, CallSite, Class, Constant, ExceptionHandler, Field, FieldAccess, FieldRef,
    Instruction, InstructionKind, LocalVariable, Method, MethodAccess,
};
use crate::opcodes;
use crate::telemetry::{Telemetry, attribute};

/// Snapshot of parsed artifacts, classes, and counts for a scan.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) class_count: usize,
    pub(crate) classes: Vec<Class>,
}

/// Load the input and classpath entries. Input classes come first so they
/// win over classpath duplicates.
pub(crate) fn scan_inputs(
    input: &Path,
    classpath: &[PathBuf],
    telemetry: Option<&Telemetry>,
) -> Result<ScanOutput> {
    let mut scan = Scan {
        telemetry,
        artifacts: Vec::new(),
        class_count: 0,
        classes: Vec::new(),
    };
    scan.scan_path(input, true, true)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by_key(|entry| path_key(entry));
    if is_jar_path(input) {
        classpath_entries.extend(manifest_classpath(input)?);
    }

    for entry in expand_classpath(classpath_entries)? {
        if entry == input {
            continue;
        }
        scan.scan_path(&entry, false, true)?;
    }

    Ok(ScanOutput {
        artifacts: scan.artifacts,
        class_count: scan.class_count,
        classes: scan.classes,
    })
}

struct Scan<'a> {
    telemetry: Option<&'a Telemetry>,
    artifacts: Vec<Artifact>,
    class_count: usize,
    classes: Vec<Class>,
}

impl Scan<'_> {
    fn scan_path(&mut self, path: &Path, is_input: bool, strict: bool) -> Result<()> {
        if path.is_dir() {
            return self.scan_dir(path);
        }

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        let roles = if is_input {
            Some(vec![
                serde_json::to_value(ArtifactRoles::AnalysisTarget)
                    .context("serialize artifact role")?,
            ])
        } else {
            None
        };

        match extension {
            "class" => self.scan_class_file(path, roles),
            "jar" => self.scan_jar_file(path, roles),
            _ if strict => anyhow::bail!("unsupported input file: {}", path.display()),
            _ => Ok(()),
        }
    }

    fn scan_dir(&mut self, path: &Path) -> Result<()> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)
            .with_context(|| format!("failed to read directory {}", path.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
            entries.push(entry.path());
        }
        entries.sort_by_key(|entry| path_key(entry));

        for entry in entries {
            if entry.is_dir() {
                self.scan_dir(&entry)?;
            } else {
                self.scan_path(&entry, false, false)?;
            }
        }
        Ok(())
    }

    fn scan_class_file(&mut self, path: &Path, roles: Option<Vec<Value>>) -> Result<()> {
        let read = || -> Result<(u64, Class)> {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let class = parse_class_bytes(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((data.len() as u64, class))
        };
        let (len, class) = match self.telemetry {
            Some(telemetry) => {
                let attributes = [attribute("class_path", path.display().to_string())];
                telemetry.in_span("class.scan", &attributes, read)?
            }
            None => read()?,
        };
        self.class_count += 1;
        if roles.is_some() {
            push_artifact(path_to_uri(path), len, roles, &mut self.artifacts);
        }
        self.classes.push(class);
        Ok(())
    }

    fn scan_jar_file(&mut self, path: &Path, roles: Option<Vec<Value>>) -> Result<()> {
        let file =
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut archive =
            ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
        let jar_len = fs::metadata(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .len();
        push_artifact(path_to_uri(path), jar_len, roles, &mut self.artifacts);

        let mut entry_names = Vec::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            // TODO: Handle multi-release entries under META-INF/versions/.
            if name.ends_with(".class")
                && !name.ends_with("module-info.class")
                && !name.starts_with("META-INF/versions/")
            {
                entry_names.push(name);
            }
        }
        entry_names.sort();

        for name in entry_names {
            let mut read = || -> Result<Class> {
                let mut entry = archive
                    .by_name(&name)
                    .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
                parse_class_bytes(&data)
                    .with_context(|| format!("failed to parse {}:{}", path.display(), name))
            };
            let class = match self.telemetry {
                Some(telemetry) => {
                    let attributes = [
                        attribute("jar_path", path.display().to_string()),
                        attribute("jar_entry", name.clone()),
                    ];
                    telemetry.in_span("class.scan", &attributes, read)?
                }
                None => read()?,
            };
            self.class_count += 1;
            self.classes.push(class);
        }
        Ok(())
    }
}

fn push_artifact(uri: String, len: u64, roles: Option<Vec<Value>>, artifacts: &mut Vec<Artifact>) {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match roles {
        Some(roles) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        None => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    artifacts.push(artifact);
}

fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("file://{}", absolute.to_string_lossy())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn expand_classpath(initial: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut initial_sorted = initial;
    initial_sorted.sort_by_key(|entry| path_key(entry));
    let mut queue: VecDeque<PathBuf> = initial_sorted.into_iter().collect();

    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    while let Some(entry) = queue.pop_front() {
        if !seen.insert(path_key(&entry)) {
            continue;
        }
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
        if is_jar_path(&entry) {
            let mut referenced = manifest_classpath(&entry)?;
            referenced.sort_by_key(|item| path_key(item));
            queue.extend(referenced);
        }
        result.push(entry);
    }
    Ok(result)
}

fn manifest_classpath(path: &Path) -> Result<Vec<PathBuf>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
    let Ok(mut entry) = archive.by_name("META-INF/MANIFEST.MF") else {
        return Ok(Vec::new());
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read {}", entry.name()))?;
    Ok(parse_manifest_classpath(path, &content))
}

fn parse_manifest_classpath(jar_path: &Path, content: &str) -> Vec<PathBuf> {
    let mut class_path = None;
    let mut current_key: Option<String> = None;
    let mut current_value = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(continuation) = line.strip_prefix(' ') {
            if current_key.is_some() {
                current_value.push_str(continuation);
            }
            continue;
        }
        if current_key.take().is_some_and(|key| key == "Class-Path") {
            class_path = Some(current_value.clone());
        }
        current_value.clear();
        if let Some((key, value)) = line.split_once(':') {
            current_key = Some(key.trim().to_string());
            current_value.push_str(value.trim_start());
        }
    }
    if current_key.is_some_and(|key| key == "Class-Path") {
        class_path = Some(current_value);
    }

    let Some(class_path) = class_path else {
        return Vec::new();
    };
    let base_dir = jar_path.parent().unwrap_or_else(|| Path::new(""));
    class_path
        .split_whitespace()
        .map(|entry| {
            let entry_path = PathBuf::from(entry);
            if entry_path.is_absolute() {
                entry_path
            } else {
                base_dir.join(entry_path)
            }
        })
        .collect()
}

fn is_jar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"))
}

pub(crate) fn parse_class_bytes(data: &[u8]) -> Result<Class> {
    let class_file = match class_file::parse(data) {
        Ok(parsed) => parsed,
        Err(err) => {
            if format!("{err}").contains("unmatched attribute") {
                tracing::debug!("falling back to shape-only class parsing: {err}");
                return parse_class_shape(data).context("failed to parse class file bytes");
            }
            return Err(err).context("failed to parse class file bytes");
        }
    };
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
    let fields = parse_fields(constant_pool, class_file.fields()).context("parse fields")?;
    let methods = parse_methods(constant_pool, class_file.methods())
        .with_context(|| format!("parse methods of {name}"))?;
    Ok(Class::new(name, super_name, interfaces, fields, methods))
}

/// Members keep their names, descriptors, and static flags but no bodies, so
/// selectors still resolve against classes carrying attributes the full
/// parser rejects.
fn parse_class_shape(data: &[u8]) -> Result<Class> {
    let mut reader = ShapeReader { data, offset: 0 };
    if reader.u32()? != 0xCAFE_BABE {
        anyhow::bail!("invalid class file magic");
    }
    reader.skip(4)?;
    let pool = reader.constant_pool()?;
    reader.skip(2)?;
    let name = pool.class_name(reader.u16()?).context("resolve class name")?;
    let super_index = reader.u16()?;
    let super_name = if super_index == 0 {
        None
    } else {
        Some(pool.class_name(super_index).context("resolve super class name")?)
    };
    let mut interfaces = Vec::new();
    for _ in 0..reader.u16()? {
        interfaces.push(pool.class_name(reader.u16()?).context("resolve interface name")?);
    }
    let mut fields = Vec::new();
    for (name, descriptor, is_static) in reader.members(&pool)? {
        fields.push(Field {
            name,
            descriptor,
            access: FieldAccess { is_static },
        });
    }
    let mut methods = Vec::new();
    for (name, descriptor, is_static) in reader.members(&pool)? {
        methods.push(Method {
            name,
            descriptor,
            access: MethodAccess { is_static },
            ..Method::default()
        });
    }
    Ok(Class::new(name, super_name, interfaces, fields, methods))
}

/// Utf8 values and class name indexes, keyed by constant pool index.
struct ShapePool {
    utf8: Vec<Option<String>>,
    classes: Vec<Option<u16>>,
}

impl ShapePool {
    fn utf8(&self, index: u16) -> Result<String> {
        self.utf8
            .get(index as usize)
            .and_then(Option::clone)
            .context("missing utf8 entry")
    }

    fn class_name(&self, index: u16) -> Result<String> {
        let name_index = self
            .classes
            .get(index as usize)
            .copied()
            .flatten()
            .context("missing class entry")?;
        self.utf8(name_index)
    }
}

struct ShapeReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ShapeReader<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.offset..self.offset + len)
            .context("class file out of bounds")?;
        self.offset += len;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn constant_pool(&mut self) -> Result<ShapePool> {
        let count = self.u16()? as usize;
        let mut pool = ShapePool {
            utf8: vec![None; count],
            classes: vec![None; count],
        };
        let mut index = 1;
        while index < count {
            let tag = self.u8()?;
            match tag {
                1 => {
                    let len = self.u16()? as usize;
                    let value = String::from_utf8_lossy(self.bytes(len)?).into_owned();
                    pool.utf8[index] = Some(value);
                }
                7 => pool.classes[index] = Some(self.u16()?),
                8 | 16 | 19 | 20 => self.skip(2)?,
                15 => self.skip(3)?,
                3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => self.skip(4)?,
                5 | 6 => {
                    self.skip(8)?;
                    // Long and double constants take two slots.
                    index += 1;
                }
                _ => anyhow::bail!("unsupported constant pool tag: {tag}"),
            }
            index += 1;
        }
        Ok(pool)
    }

    fn members(&mut self, pool: &ShapePool) -> Result<Vec<(String, String, bool)>> {
        let count = self.u16()?;
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let access = self.u16()?;
            let name = pool.utf8(self.u16()?).context("resolve member name")?;
            let descriptor = pool.utf8(self.u16()?).context("resolve member descriptor")?;
            self.skip_attributes()?;
            members.push((name, descriptor, access & 0x0008 != 0));
        }
        Ok(members)
    }

    fn skip_attributes(&mut self) -> Result<()> {
        for _ in 0..self.u16()? {
            self.skip(2)?;
            let len = self.u32()? as usize;
            self.skip(len)?;
        }
        Ok(())
    }
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

fn parse_fields(
    constant_pool: &[ConstantPool],
    fields: &[jclassfile::fields::FieldInfo],
) -> Result<Vec<Field>> {
    let mut parsed = Vec::new();
    for field in fields {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        parsed.push(Field {
            name,
            descriptor,
            access: FieldAccess {
                is_static: field.access_flags().contains(FieldFlags::ACC_STATIC),
            },
        });
    }
    Ok(parsed)
}

/// Methods without a `Code` attribute (abstract, native) are kept with an
/// empty body so member resolution still sees them.
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
        let access = MethodAccess {
            is_static: method.access_flags().contains(MethodFlags::ACC_STATIC),
        };
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                Attribute::Code {
                    code,
                    exception_table,
                    attributes,
                    ..
                } => Some((code, exception_table, attributes)),
                _ => None,
            });
        let (instructions, exception_handlers, local_variables) = match code {
            Some((code, exception_table, code_attributes)) => (
                parse_bytecode(code, constant_pool)
                    .with_context(|| format!("parse bytecode of {name}{descriptor}"))?,
                parse_exception_handlers(exception_table, constant_pool)
                    .context("parse handlers")?,
                parse_local_variables(code_attributes, constant_pool)
                    .context("parse local variable table")?,
            ),
            None => (Vec::new(), Vec::new(), Vec::new()),
        };
        parsed.push(Method {
            name,
            descriptor,
            access,
            instructions,
            local_variables,
            exception_handlers,
        });
    }
    Ok(parsed)
}

fn parse_local_variables(
    attributes: &[Attribute],
    constant_pool: &[ConstantPool],
) -> Result<Vec<LocalVariable>> {
    let mut locals = Vec::new();
    for attribute in attributes {
        let Attribute::LocalVariableTable {
            local_variable_table,
        } = attribute
        else {
            continue;
        };
        for record in local_variable_table {
            locals.push(LocalVariable {
                index: record.index(),
                name: resolve_utf8(constant_pool, record.name_index())
                    .context("resolve local name")?,
                descriptor: resolve_utf8(constant_pool, record.descriptor_index())
                    .context("resolve local descriptor")?,
                start_pc: record.start_pc() as u32,
                length: record.length() as u32,
            });
        }
    }
    locals.sort_by_key(|local| (local.index, local.start_pc));
    Ok(locals)
}

fn parse_exception_handlers(
    table: &[jclassfile::attributes::ExceptionRecord],
    constant_pool: &[ConstantPool],
) -> Result<Vec<ExceptionHandler>> {
    let mut handlers = Vec::new();
    for entry in table {
        let catch_type = if entry.catch_type() == 0 {
            None
        } else {
            Some(
                resolve_class_name(constant_pool, entry.catch_type())
                    .context("resolve catch type")?,
            )
        };
        handlers.push(ExceptionHandler {
            start_pc: entry.start_pc() as u32,
            end_pc: entry.end_pc() as u32,
            handler_pc: entry.handler_pc() as u32,
            catch_type,
        });
    }
    Ok(handlers)
}

fn parse_bytecode(code: &[u8], constant_pool: &[ConstantPool]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let start = offset as u32;
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        let (opcode, kind) = decode(code, offset, constant_pool)?;
        instructions.push(Instruction::new(start, opcode, kind));
        offset += length;
    }
    Ok(instructions)
}

/// Decode the operands of the instruction at `offset`. `WIDE` is reported
/// as the instruction it widens.
fn decode(
    code: &[u8],
    offset: usize,
    constant_pool: &[ConstantPool],
) -> Result<(u8, InstructionKind)> {
    let opcode = code[offset];
    let kind = match opcode {
        opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE => {
            let member = resolve_member_ref(constant_pool, read_u16(code, offset + 1)?)
                .context("resolve method ref")?;
            let kind = match opcode {
                opcodes::INVOKESPECIAL => CallKind::Special,
                opcodes::INVOKESTATIC => CallKind::Static,
                opcodes::INVOKEINTERFACE => CallKind::Interface,
                _ => CallKind::Virtual,
            };
            InstructionKind::Invoke(CallSite {
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
                kind,
            })
        }
        opcodes::INVOKEDYNAMIC => {
            let index = read_u16(code, offset + 1)?;
            match constant_pool.get(index as usize) {
                Some(ConstantPool::InvokeDynamic {
                    name_and_type_index,
                    ..
                }) => {
                    let (name, descriptor) =
                        resolve_name_and_type(constant_pool, *name_and_type_index)?;
                    InstructionKind::InvokeDynamic { name, descriptor }
                }
                _ => anyhow::bail!("unexpected invokedynamic entry"),
            }
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let member = resolve_member_ref(constant_pool, read_u16(code, offset + 1)?)
                .context("resolve field ref")?;
            InstructionKind::Field(FieldRef {
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
            })
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            InstructionKind::Type(resolve_class_name(constant_pool, read_u16(code, offset + 1)?)?)
        }
        opcodes::NEWARRAY => InstructionKind::NewArray(read_u8(code, offset + 1)?),
        opcodes::MULTIANEWARRAY => InstructionKind::MultiANewArray {
            descriptor: resolve_class_name(constant_pool, read_u16(code, offset + 1)?)?,
            dimensions: read_u8(code, offset + 3)?,
        },
        opcodes::BIPUSH => {
            let value = i32::from(read_u8(code, offset + 1)? as i8);
            InstructionKind::Constant(Constant::Int(Some(value)))
        }
        opcodes::SIPUSH => InstructionKind::Constant(Constant::Int(Some(i32::from(
            read_u16(code, offset + 1)? as i16,
        )))),
        opcodes::LDC => {
            let index = u16::from(read_u8(code, offset + 1)?);
            InstructionKind::Constant(resolve_constant(constant_pool, index)?)
        }
        opcodes::LDC_W | opcodes::LDC2_W => {
            InstructionKind::Constant(resolve_constant(constant_pool, read_u16(code, offset + 1)?)?)
        }
        opcodes::ILOAD..=opcodes::ALOAD
        | opcodes::ISTORE..=opcodes::ASTORE
        | opcodes::IINC
        | opcodes::RET => InstructionKind::Local(u16::from(read_u8(code, offset + 1)?)),
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            InstructionKind::Local(u16::from((opcode - opcodes::ILOAD_0) % 4))
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            InstructionKind::Local(u16::from((opcode - opcodes::ISTORE_0) % 4))
        }
        opcodes::WIDE => {
            let widened = read_u8(code, offset + 1)?;
            return Ok((widened, InstructionKind::Local(read_u16(code, offset + 2)?)));
        }
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let delta = i64::from(read_u16(code, offset + 1)? as i16);
            InstructionKind::Jump(vec![jump_target(offset, delta)?])
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let delta = i64::from(read_i32(code, offset + 1)?);
            InstructionKind::Jump(vec![jump_target(offset, delta)?])
        }
        opcodes::TABLESWITCH => InstructionKind::Jump(tableswitch_targets(code, offset)?),
        opcodes::LOOKUPSWITCH => InstructionKind::Jump(lookupswitch_targets(code, offset)?),
        _ => InstructionKind::Other,
    };
    Ok((opcode, kind))
}

fn jump_target(offset: usize, delta: i64) -> Result<u32> {
    let target = offset as i64 + delta;
    u32::try_from(target).with_context(|| format!("jump target {target} out of range"))
}

fn tableswitch_targets(code: &[u8], offset: usize) -> Result<Vec<u32>> {
    let base = offset + 1 + padding(offset);
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let mut targets = vec![jump_target(offset, i64::from(read_i32(code, base)?))?];
    for position in 0..=(high - low).max(-1) {
        let entry = base + 12 + position as usize * 4;
        targets.push(jump_target(offset, i64::from(read_i32(code, entry)?))?);
    }
    Ok(targets)
}

fn lookupswitch_targets(code: &[u8], offset: usize) -> Result<Vec<u32>> {
    let base = offset + 1 + padding(offset);
    let pairs = read_i32(code, base + 4)?.max(0) as usize;
    let mut targets = vec![jump_target(offset, i64::from(read_i32(code, base)?))?];
    for pair in 0..pairs {
        let entry = base + 8 + pair * 8 + 4;
        targets.push(jump_target(offset, i64::from(read_i32(code, entry)?))?);
    }
    Ok(targets)
}

/// Resolved constant pool member reference.
struct MemberRef {
    owner: String,
    name: String,
    descriptor: String,
}

fn resolve_member_ref(constant_pool: &[ConstantPool], index: u16) -> Result<MemberRef> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing member ref entry")?;
    let (class_index, name_and_type_index) = match entry {
        ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::Fieldref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index),
        _ => anyhow::bail!("unexpected member ref entry"),
    };
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name, descriptor) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    Ok(MemberRef {
        owner,
        name,
        descriptor,
    })
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(String, String)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((
            resolve_utf8(constant_pool, *name_index).context("resolve member name")?,
            resolve_utf8(constant_pool, *descriptor_index).context("resolve member descriptor")?,
        )),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

fn resolve_constant(constant_pool: &[ConstantPool], index: u16) -> Result<Constant> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing constant pool entry")?;
    let constant = match entry {
        ConstantPool::Integer { .. } => Constant::Int(None),
        ConstantPool::Long { .. } => Constant::Long,
        ConstantPool::Float { .. } => Constant::Float,
        ConstantPool::Double { .. } => Constant::Double,
        ConstantPool::String { string_index } => {
            Constant::String(resolve_utf8(constant_pool, *string_index)?)
        }
        ConstantPool::Class { name_index } => {
            Constant::Class(resolve_utf8(constant_pool, *name_index)?)
        }
        _ => Constant::Other,
    };
    Ok(constant)
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
        0x99..=0xa8 => 3,
        0xa9 => 2,
        0xaa => tableswitch_length(code, offset)?,
        0xab => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
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
        0xca | 0xfe | 0xff => 1,
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

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset).copied().context("bytecode u8 out of bounds")
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode i32 out of bounds")?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    use crate::test_harness::{
        ACC_PUBLIC, ACC_STATIC, ClassFileBuilder, CodeSpec, field_write_class, high, low,
        write_classes,
    };

    #[test]
    fn scan_inputs_rejects_invalid_class_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let class_path = temp_dir.path().join("bad.class");
        fs::write(&class_path, b"nope").expect("write test class");

        let result = scan_inputs(&class_path, &[], None);

        assert!(result.is_err());
    }

    #[test]
    fn shape_parser_keeps_members_without_bodies() {
        let class = parse_class_shape(&field_write_class()).expect("shape");

        assert_eq!(class.name, "com/example/Foo");
        assert_eq!(class.super_name.as_deref(), Some("java/lang/Object"));
        assert!(class.find_field("x", "I").is_some());
        let bar = class.find_method("bar", "()V").expect("bar");
        assert!(bar.instructions.is_empty());
        assert!(!bar.is_static());
    }

    #[test]
    fn shape_parser_rejects_bad_magic() {
        assert!(parse_class_shape(b"\0\0\0\0\0\0\0\0").is_err());
    }

    #[test]
    fn field_writes_decode_with_their_operands() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        write_classes(temp_dir.path(), &[("Foo.class", field_write_class())]).expect("write");

        let scan = scan_inputs(&temp_dir.path().join("Foo.class"), &[], None).expect("scan");

        assert_eq!(scan.class_count, 1);
        assert_eq!(scan.artifacts.len(), 1);
        let class = &scan.classes[0];
        assert_eq!(class.name, "com/example/Foo");
        assert_eq!(class.super_name.as_deref(), Some("java/lang/Object"));
        assert!(class.find_field("x", "I").is_some());
        let bar = class.find_method("bar", "()V").expect("bar");
        let opcodes: Vec<u8> = bar.instructions.iter().map(|insn| insn.opcode).collect();
        assert_eq!(
            opcodes,
            vec![opcodes::ALOAD_0, opcodes::ICONST_1, opcodes::PUTFIELD, opcodes::RETURN]
        );
        assert!(matches!(bar.instructions[0].kind, InstructionKind::Local(0)));
        match &bar.instructions[2].kind {
            InstructionKind::Field(field) => {
                assert_eq!(field.owner, "com/example/Foo");
                assert_eq!(field.name, "x");
                assert_eq!(field.descriptor, "I");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(bar.local_variables.len(), 1);
        assert_eq!(bar.local_variables[0].name, "this");
    }

    #[test]
    fn decodes_jumps_constants_and_abstract_methods() {
        let mut builder = ClassFileBuilder::new("com/example/Counter", "java/lang/Object");
        let label = builder.add_string("done");
        let big = builder.add_integer(100_000);
        builder.add_method(
            ACC_PUBLIC | ACC_STATIC,
            "count",
            "(I)Ljava/lang/String;",
            Some(CodeSpec {
                code: vec![
                    0x1a, // iload_0
                    0x10, 0xfe, // bipush -2
                    0x13, high(big), low(big), // ldc_w 100000
                    0x57, // pop
                    0x57, // pop
                    0x99, 0x00, 0x05, // ifeq +5 -> 13
                    0x01, // aconst_null
                    0xb0, // areturn
                    0x12, low(label), // ldc "done"
                    0xb0, // areturn
                ],
                max_stack: 3,
                max_locals: 1,
                ..CodeSpec::default()
            }),
        );
        builder.add_method(ACC_PUBLIC, "size", "()I", None);
        let temp_dir = tempfile::tempdir().expect("temp dir");
        write_classes(temp_dir.path(), &[("Counter.class", builder.finish())]).expect("write");

        let scan = scan_inputs(temp_dir.path(), &[], None).expect("scan");

        let class = &scan.classes[0];
        let count = class.find_method("count", "(I)Ljava/lang/String;").expect("count");
        assert!(count.is_static());
        assert!(matches!(
            count.instructions[1].kind,
            InstructionKind::Constant(Constant::Int(Some(-2)))
        ));
        assert!(matches!(
            count.instructions[2].kind,
            InstructionKind::Constant(Constant::Int(_))
        ));
        match &count.instructions[5].kind {
            InstructionKind::Jump(targets) => assert_eq!(targets, &vec![13]),
            other => panic!("unexpected {other:?}"),
        }
        match &count.instructions[8].kind {
            InstructionKind::Constant(Constant::String(value)) => assert_eq!(value, "done"),
            other => panic!("unexpected {other:?}"),
        }
        let size = class.find_method("size", "()I").expect("abstract method kept");
        assert!(size.instructions.is_empty());
    }

    #[test]
    fn interfaces_and_static_fields_are_decoded() {
        let mut api = ClassFileBuilder::new("com/example/Api", "java/lang/Object").interface();
        api.add_method(ACC_PUBLIC, "call", "(I)V", None);
        let mut imp = ClassFileBuilder::new("com/example/Impl", "java/lang/Object");
        imp.add_interface("com/example/Api");
        imp.add_field(ACC_STATIC, "COUNT", "J");
        let temp_dir = tempfile::tempdir().expect("temp dir");
        write_classes(
            temp_dir.path(),
            &[("Api.class", api.finish()), ("Impl.class", imp.finish())],
        )
        .expect("write");

        let scan = scan_inputs(temp_dir.path(), &[], None).expect("scan");

        assert_eq!(scan.class_count, 2);
        let imp = scan
            .classes
            .iter()
            .find(|class| class.name == "com/example/Impl")
            .expect("Impl");
        assert_eq!(imp.interfaces, vec!["com/example/Api".to_string()]);
        assert!(imp.find_field("COUNT", "J").expect("COUNT").access.is_static);
    }

    #[test]
    fn scan_inputs_resolves_manifest_classpath() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let dep_path = temp_dir.path().join("dep.jar");
        create_jar(&dep_path, None, &[("com/example/Foo.class", field_write_class())])
            .expect("create dep jar");
        let jar_path = temp_dir.path().join("main.jar");
        create_jar(&jar_path, Some("dep.jar"), &[]).expect("create main jar");

        let scan = scan_inputs(&jar_path, &[], None).expect("scan");

        assert_eq!(scan.class_count, 1);
        assert_eq!(scan.classes[0].name, "com/example/Foo");
        assert_eq!(scan.artifacts.len(), 2);
    }

    #[test]
    fn scan_inputs_errors_on_missing_manifest_classpath_entry() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let jar_path = temp_dir.path().join("main.jar");
        create_jar(&jar_path, Some("missing.jar"), &[]).expect("create main jar");

        assert!(scan_inputs(&jar_path, &[], None).is_err());
    }

    #[test]
    fn manifest_continuation_lines_are_joined() {
        let paths = parse_manifest_classpath(
            Path::new("/libs/main.jar"),
            "Manifest-Version: 1.0\nClass-Path: a.jar b\n .jar\nCreated-By: test\n",
        );
        assert_eq!(
            paths,
            vec![PathBuf::from("/libs/a.jar"), PathBuf::from("/libs/b.jar")]
        );
    }

    fn create_jar(
        path: &Path,
        class_path: Option<&str>,
        entries: &[(&str, Vec<u8>)],
    ) -> Result<()> {
        let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = zip::ZipWriter::new(file);
        let mut manifest = String::from("Manifest-Version: 1.0\n");
        if let Some(class_path) = class_path {
            manifest.push_str(&format!("Class-Path: {class_path}\n"));
        }
        manifest.push('\n');
        writer
            .start_file("META-INF/MANIFEST.MF", SimpleFileOptions::default())
            .context("start manifest entry")?;
        writer
            .write_all(manifest.as_bytes())
            .context("write manifest")?;
        for (name, bytes) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .context("start class entry")?;
            writer.write_all(bytes).context("write class entry")?;
        }
        writer.finish().context("finish jar")?;
        Ok(())
    }
}
