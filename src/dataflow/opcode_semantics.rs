use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::descriptor::{CLASS, JvmType, STRING, method_type};
use crate::ir::{Constant, Instruction, InstructionKind, newarray_element_descriptor};
use crate::opcodes;

/// Abstract value tracked on the operand stack and in locals.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum StackValue {
    Unknown,
    Null,
    Type(JvmType),
}

impl StackValue {
    fn of(ty: JvmType) -> Self {
        StackValue::Type(ty)
    }

    /// Long and double values fill two slots for `POP2`/`DUP2` forms.
    fn is_wide(&self) -> bool {
        matches!(self, StackValue::Type(JvmType::Long | JvmType::Double))
    }

    /// Least upper bound: null joins into any reference, disagreement is unknown.
    pub(crate) fn join(&self, other: &StackValue) -> StackValue {
        match (self, other) {
            (left, right) if left == right => left.clone(),
            (StackValue::Null, StackValue::Type(ty)) | (StackValue::Type(ty), StackValue::Null)
                if ty.is_reference() =>
            {
                StackValue::Type(ty.clone())
            }
            _ => StackValue::Unknown,
        }
    }
}

/// Operand stack and local slots at one program point.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Frame {
    pub(crate) stack: Vec<StackValue>,
    pub(crate) locals: BTreeMap<u16, StackValue>,
}

impl Frame {
    pub(crate) fn push(&mut self, value: StackValue) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> StackValue {
        self.stack.pop().unwrap_or(StackValue::Unknown)
    }

    fn pop_n(&mut self, count: usize) {
        let keep = self.stack.len().saturating_sub(count);
        self.stack.truncate(keep);
    }

    /// Value `depth` entries below the top.
    pub(crate) fn peek(&self, depth: usize) -> Option<&StackValue> {
        self.stack.iter().rev().nth(depth)
    }

    fn load(&self, index: u16) -> StackValue {
        self.locals.get(&index).cloned().unwrap_or(StackValue::Unknown)
    }

    fn store(&mut self, index: u16, value: StackValue) {
        let wide = value.is_wide();
        self.locals.insert(index, value);
        if wide {
            self.locals.remove(&(index + 1));
        }
    }

    pub(crate) fn join(&self, other: &Frame) -> Frame {
        let stack = if self.stack.len() == other.stack.len() {
            self.stack
                .iter()
                .zip(&other.stack)
                .map(|(left, right)| left.join(right))
                .collect()
        } else {
            vec![StackValue::Unknown; self.stack.len().min(other.stack.len())]
        };
        let locals = self
            .locals
            .iter()
            .filter_map(|(index, value)| {
                other
                    .locals
                    .get(index)
                    .map(|other_value| (*index, value.join(other_value)))
            })
            .collect();
        Frame { stack, locals }
    }
}

/// Apply the stack effect of `instruction` to `frame`.
pub(crate) fn apply(frame: &mut Frame, instruction: &Instruction) -> Result<()> {
    let opcode = instruction.opcode;
    match opcode {
        opcodes::NOP | opcodes::IINC | opcodes::GOTO | opcodes::GOTO_W | opcodes::RET => {}
        opcodes::ACONST_NULL => frame.push(StackValue::Null),
        opcodes::ICONST_M1..=opcodes::ICONST_5 | opcodes::BIPUSH | opcodes::SIPUSH => {
            frame.push(StackValue::of(JvmType::Int))
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => frame.push(StackValue::of(JvmType::Long)),
        opcodes::FCONST_0..=opcodes::FCONST_2 => frame.push(StackValue::of(JvmType::Float)),
        opcodes::DCONST_0 | opcodes::DCONST_1 => frame.push(StackValue::of(JvmType::Double)),
        opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => frame.push(constant_value(instruction)),
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let index = local_operand(instruction, opcodes::ILOAD_0)?;
            let value = match load_kind(opcode) {
                Some(ty) => StackValue::of(ty),
                None => frame.load(index),
            };
            frame.push(value);
        }
        opcodes::IALOAD..=opcodes::SALOAD => {
            frame.pop();
            let array = frame.pop();
            frame.push(array_element(opcode, &array));
        }
        opcodes::ISTORE..=opcodes::ASTORE | opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let index = local_operand(instruction, opcodes::ISTORE_0)?;
            let value = frame.pop();
            frame.store(index, value);
        }
        opcodes::IASTORE..=opcodes::SASTORE => frame.pop_n(3),
        opcodes::POP => frame.pop_n(1),
        opcodes::POP2 => {
            let wide = frame.peek(0).is_some_and(StackValue::is_wide);
            frame.pop_n(if wide { 1 } else { 2 });
        }
        opcodes::DUP..=opcodes::DUP2_X2 => duplicate(frame, opcode),
        opcodes::SWAP => {
            let top = frame.pop();
            let below = frame.pop();
            frame.push(top);
            frame.push(below);
        }
        // add, sub, mul, div, rem: int/long/float/double in rotation
        0x60..=0x73 => {
            frame.pop_n(2);
            frame.push(StackValue::of(numeric_kind(opcode - 0x60)));
        }
        // neg
        0x74..=0x77 => {
            frame.pop_n(1);
            frame.push(StackValue::of(numeric_kind(opcode - 0x74)));
        }
        // shifts and bitwise ops alternate int/long
        0x78..=0x83 => {
            frame.pop_n(2);
            let ty = if (opcode - 0x78) % 2 == 0 {
                JvmType::Int
            } else {
                JvmType::Long
            };
            frame.push(StackValue::of(ty));
        }
        0x85..=0x93 => {
            frame.pop_n(1);
            frame.push(StackValue::of(conversion_result(opcode)));
        }
        opcodes::LCMP..=opcodes::DCMPG => {
            frame.pop_n(2);
            frame.push(StackValue::of(JvmType::Int));
        }
        opcodes::IFEQ..=opcodes::IFLE
        | opcodes::IFNULL
        | opcodes::IFNONNULL
        | opcodes::TABLESWITCH
        | opcodes::LOOKUPSWITCH
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => frame.pop_n(1),
        opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => frame.pop_n(2),
        opcodes::JSR | opcodes::JSR_W => frame.push(StackValue::Unknown),
        opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW => frame.stack.clear(),
        opcodes::GETSTATIC..=opcodes::PUTFIELD => field_access(frame, instruction)?,
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEDYNAMIC => invoke(frame, instruction)?,
        opcodes::NEW | opcodes::CHECKCAST => {
            if opcode == opcodes::CHECKCAST {
                frame.pop();
            }
            let InstructionKind::Type(operand) = &instruction.kind else {
                bail!("missing class operand at offset {}", instruction.offset);
            };
            frame.push(StackValue::of(JvmType::from_class_operand(operand)?));
        }
        opcodes::NEWARRAY => {
            frame.pop();
            let element = match &instruction.kind {
                InstructionKind::NewArray(atype) => newarray_element_descriptor(*atype),
                _ => None,
            };
            let value = match element {
                Some(descriptor) => {
                    StackValue::of(JvmType::array_of(JvmType::from_descriptor(descriptor)?))
                }
                None => StackValue::Unknown,
            };
            frame.push(value);
        }
        opcodes::ANEWARRAY => {
            frame.pop();
            let InstructionKind::Type(operand) = &instruction.kind else {
                bail!("missing class operand at offset {}", instruction.offset);
            };
            let element = JvmType::from_class_operand(operand)?;
            frame.push(StackValue::of(JvmType::array_of(element)));
        }
        opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => {
            frame.pop();
            frame.push(StackValue::of(JvmType::Int));
        }
        opcodes::MULTIANEWARRAY => {
            let InstructionKind::MultiANewArray {
                descriptor,
                dimensions,
            } = &instruction.kind
            else {
                bail!("missing multianewarray operands at offset {}", instruction.offset);
            };
            frame.pop_n(*dimensions as usize);
            frame.push(StackValue::of(JvmType::from_descriptor(descriptor)?));
        }
        other => bail!("unsupported opcode 0x{other:02x} at offset {}", instruction.offset),
    }
    Ok(())
}

fn numeric_kind(step: u8) -> JvmType {
    match step % 4 {
        0 => JvmType::Int,
        1 => JvmType::Long,
        2 => JvmType::Float,
        _ => JvmType::Double,
    }
}

fn conversion_result(opcode: u8) -> JvmType {
    match opcode {
        0x85 | 0x8c | 0x8f => JvmType::Long,
        0x86 | 0x89 | 0x90 => JvmType::Float,
        0x87 | 0x8a | 0x8d => JvmType::Double,
        _ => JvmType::Int,
    }
}

/// Statically known type pushed by a typed load, `None` for `ALOAD`.
fn load_kind(opcode: u8) -> Option<JvmType> {
    let family = if opcode >= opcodes::ILOAD_0 {
        (opcode - opcodes::ILOAD_0) / 4
    } else {
        opcode - opcodes::ILOAD
    };
    match family {
        0 => Some(JvmType::Int),
        1 => Some(JvmType::Long),
        2 => Some(JvmType::Float),
        3 => Some(JvmType::Double),
        _ => None,
    }
}

/// Local slot of a load/store, from its operand or its `_n` opcode form.
fn local_operand(instruction: &Instruction, first_short_form: u8) -> Result<u16> {
    if let InstructionKind::Local(index) = instruction.kind {
        return Ok(index);
    }
    if instruction.opcode >= first_short_form {
        return Ok(u16::from((instruction.opcode - first_short_form) % 4));
    }
    bail!("missing local operand at offset {}", instruction.offset)
}

fn array_element(opcode: u8, array: &StackValue) -> StackValue {
    match opcode {
        opcodes::LALOAD => StackValue::of(JvmType::Long),
        opcodes::FALOAD => StackValue::of(JvmType::Float),
        opcodes::DALOAD => StackValue::of(JvmType::Double),
        opcodes::AALOAD => match array {
            StackValue::Type(JvmType::Array(element)) => StackValue::of(element.as_ref().clone()),
            _ => StackValue::Unknown,
        },
        _ => StackValue::of(JvmType::Int),
    }
}

fn constant_value(instruction: &Instruction) -> StackValue {
    let InstructionKind::Constant(constant) = &instruction.kind else {
        return StackValue::Unknown;
    };
    match constant {
        Constant::Null => StackValue::Null,
        Constant::Int(_) => StackValue::of(JvmType::Int),
        Constant::Long => StackValue::of(JvmType::Long),
        Constant::Float => StackValue::of(JvmType::Float),
        Constant::Double => StackValue::of(JvmType::Double),
        Constant::String(_) => StackValue::of(JvmType::object(STRING)),
        Constant::Class(_) => StackValue::of(JvmType::object(CLASS)),
        Constant::Other => StackValue::Unknown,
    }
}

fn field_access(frame: &mut Frame, instruction: &Instruction) -> Result<()> {
    let InstructionKind::Field(field) = &instruction.kind else {
        bail!("missing field operand at offset {}", instruction.offset);
    };
    let ty = JvmType::from_descriptor(&field.descriptor)?;
    match instruction.opcode {
        opcodes::GETSTATIC => frame.push(StackValue::of(ty)),
        opcodes::PUTSTATIC => frame.pop_n(1),
        opcodes::GETFIELD => {
            frame.pop();
            frame.push(StackValue::of(ty));
        }
        _ => frame.pop_n(2),
    }
    Ok(())
}

fn invoke(frame: &mut Frame, instruction: &Instruction) -> Result<()> {
    let (descriptor, has_receiver) = match &instruction.kind {
        InstructionKind::Invoke(call) => (
            call.descriptor.as_str(),
            instruction.opcode != opcodes::INVOKESTATIC,
        ),
        InstructionKind::InvokeDynamic { descriptor, .. } => (descriptor.as_str(), false),
        _ => bail!("missing call operand at offset {}", instruction.offset),
    };
    let ty = method_type(descriptor)?;
    frame.pop_n(ty.parameters.len() + usize::from(has_receiver));
    if ty.return_type != JvmType::Void {
        frame.push(StackValue::of(ty.return_type));
    }
    Ok(())
}

/// `DUP` family, honouring two-slot values in the `DUP2` and `_X2` forms.
fn duplicate(frame: &mut Frame, opcode: u8) {
    let mut taken = Vec::new();
    let take = |frame: &mut Frame, taken: &mut Vec<StackValue>, slots: usize| {
        let mut filled = 0;
        while filled < slots {
            let value = frame.pop();
            filled += if value.is_wide() { 2 } else { 1 };
            taken.push(value);
        }
    };
    let (copied, skipped) = match opcode {
        opcodes::DUP => (1, 0),
        opcodes::DUP_X1 => (1, 1),
        opcodes::DUP_X2 => (1, 2),
        opcodes::DUP2 => (2, 0),
        opcodes::DUP2_X1 => (2, 1),
        _ => (2, 2),
    };
    take(frame, &mut taken, copied);
    let copied_values: Vec<StackValue> = taken.iter().rev().cloned().collect();
    let mut skipped_values = Vec::new();
    take(frame, &mut skipped_values, skipped);
    frame.stack.extend(copied_values.iter().cloned());
    frame.stack.extend(skipped_values.into_iter().rev());
    frame.stack.extend(copied_values);
}
