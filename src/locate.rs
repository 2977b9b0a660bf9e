//! Injection point search: finds the instructions an `@At` refers to.

use crate::annotation::{AtSpec, ConstantMatcher, InjectorAnnotation};
use crate::descriptor::{CLASS, JvmType, OBJECT, STRING, method_type};
use crate::inference::{InstructionFinder, InstructionSite};
use crate::ir::{Class, Constant, Instruction, InstructionKind, Method};
use crate::opcodes;
use crate::selector::{Selector, SelectorContext, SelectorParsers};

/// Injection points whose `target` names a member through a selector.
pub(crate) fn has_selector_target(at: &AtSpec) -> bool {
    matches!(at.value.as_str(), "INVOKE" | "INVOKE_ASSIGN" | "FIELD")
}

/// Matches injection points by opcode family and target selector.
pub(crate) struct InjectionPointFinder<'a> {
    parsers: &'a SelectorParsers,
    context: &'a SelectorContext,
}

impl<'a> InjectionPointFinder<'a> {
    pub(crate) fn new(parsers: &'a SelectorParsers, context: &'a SelectorContext) -> Self {
        Self { parsers, context }
    }

    /// `Ok(None)` when the point has no target; `Err` carries the
    /// unparseable target text.
    fn target_selector<'t>(&self, at: &'t AtSpec) -> Result<Option<Selector>, &'t str> {
        let Some(target) = &at.target else {
            return Ok(None);
        };
        match self.parsers.parse(target, self.context).into_selector() {
            Some(selector) => Ok(Some(selector)),
            None => {
                tracing::debug!("injection point target {target} does not parse");
                Err(target)
            }
        }
    }

    fn find_at(&self, annotation: &InjectorAnnotation, at: &AtSpec, method: &Method) -> Vec<usize> {
        let instructions = &method.instructions;
        let mut found: Vec<usize> = match at.value.as_str() {
            "HEAD" => {
                if instructions.is_empty() {
                    Vec::new()
                } else {
                    vec![0]
                }
            }
            "RETURN" => {
                positions(instructions, |instruction| opcodes::is_return(instruction.opcode))
            }
            "TAIL" => positions(instructions, |instruction| opcodes::is_return(instruction.opcode))
                .pop()
                .into_iter()
                .collect(),
            "INVOKE" | "INVOKE_ASSIGN" => {
                let assign = at.value == "INVOKE_ASSIGN";
                let Ok(selector) = self.target_selector(at) else {
                    return Vec::new();
                };
                positions(instructions, |instruction| {
                    let InstructionKind::Invoke(call) = &instruction.kind else {
                        return false;
                    };
                    if call.name == "<init>" {
                        return false;
                    }
                    if assign
                        && method_type(&call.descriptor)
                            .is_ok_and(|ty| ty.return_type == JvmType::Void)
                    {
                        return false;
                    }
                    selector.as_ref().is_none_or(|selector| {
                        selector.match_method(&call.owner, &call.name, &call.descriptor)
                    })
                })
            }
            "FIELD" => {
                let Ok(selector) = self.target_selector(at) else {
                    return Vec::new();
                };
                positions(instructions, |instruction| {
                    let InstructionKind::Field(field) = &instruction.kind else {
                        return false;
                    };
                    selector.as_ref().is_none_or(|selector| {
                        selector.match_field(&field.owner, &field.name, &field.descriptor)
                    })
                })
            }
            "NEW" => {
                let wanted = at.target.as_deref().map(class_name);
                positions(instructions, |instruction| match &instruction.kind {
                    InstructionKind::Type(class) if instruction.opcode == opcodes::NEW => {
                        wanted.as_deref().is_none_or(|wanted| wanted == class)
                    }
                    _ => false,
                })
            }
            "CONSTANT" => constant_positions(instructions, &annotation.constants),
            "LOAD" | "STORE" => {
                let store = at.value == "STORE";
                positions(instructions, |instruction| {
                    let Some(slot) = local_slot(instruction, store) else {
                        return false;
                    };
                    annotation.index.is_none_or(|index| index == slot)
                })
            }
            "JUMP" => positions(instructions, |instruction| {
                matches!(instruction.kind, InstructionKind::Jump(_))
                    && instruction.opcode != opcodes::TABLESWITCH
                    && instruction.opcode != opcodes::LOOKUPSWITCH
            }),
            other => {
                tracing::debug!("unsupported injection point {other}");
                Vec::new()
            }
        };

        if let Some(opcode) = at.opcode {
            found.retain(|&index| instructions[index].opcode == opcode);
        }
        match at.ordinal {
            Some(ordinal) => found.get(ordinal).copied().into_iter().collect(),
            None => found,
        }
    }
}

impl InstructionFinder for InjectionPointFinder<'_> {
    fn find_instructions(
        &self,
        annotation: &InjectorAnnotation,
        _class: &Class,
        method: &Method,
    ) -> Vec<InstructionSite> {
        let constants_only = annotation.at.is_empty() && !annotation.constants.is_empty();
        let mut indices: Vec<usize> = if constants_only {
            constant_positions(&method.instructions, &annotation.constants)
        } else {
            annotation
                .at
                .iter()
                .flat_map(|at| self.find_at(annotation, at, method))
                .collect()
        };
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|index| InstructionSite { index }).collect()
    }
}

fn positions(instructions: &[Instruction], predicate: impl Fn(&Instruction) -> bool) -> Vec<usize> {
    instructions
        .iter()
        .enumerate()
        .filter(|(_, instruction)| predicate(instruction))
        .map(|(index, _)| index)
        .collect()
}

/// Internal class name from `a.b.C`, `a/b/C` or `La/b/C;`.
fn class_name(text: &str) -> String {
    let trimmed = text
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
        .unwrap_or(text);
    trimmed.replace('.', "/")
}

fn local_slot(instruction: &Instruction, store: bool) -> Option<u16> {
    let opcode = instruction.opcode;
    let (explicit, short) = if store {
        (opcodes::ISTORE..=opcodes::ASTORE, opcodes::ISTORE_0..=opcodes::ASTORE_3)
    } else {
        (opcodes::ILOAD..=opcodes::ALOAD, opcodes::ILOAD_0..=opcodes::ALOAD_3)
    };
    if let InstructionKind::Local(slot) = instruction.kind
        && (explicit.contains(&opcode) || short.contains(&opcode))
    {
        return Some(slot);
    }
    short
        .contains(&opcode)
        .then(|| u16::from((opcode - short.start()) % 4))
}

/// Literal kind and, for ints, value pushed by a constant instruction.
fn constant_of(instruction: &Instruction) -> Option<(JvmType, Option<i32>)> {
    let opcode = instruction.opcode;
    let literal = match opcode {
        opcodes::ACONST_NULL => (JvmType::object(OBJECT), None),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            (JvmType::Int, Some(i32::from(opcode) - i32::from(opcodes::ICONST_0)))
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => (JvmType::Long, None),
        opcodes::FCONST_0..=opcodes::FCONST_2 => (JvmType::Float, None),
        opcodes::DCONST_0 | opcodes::DCONST_1 => (JvmType::Double, None),
        opcodes::BIPUSH | opcodes::SIPUSH | opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => {
            let InstructionKind::Constant(constant) = &instruction.kind else {
                return None;
            };
            match constant {
                Constant::Null => (JvmType::object(OBJECT), None),
                Constant::Int(value) => (JvmType::Int, *value),
                Constant::Long => (JvmType::Long, None),
                Constant::Float => (JvmType::Float, None),
                Constant::Double => (JvmType::Double, None),
                Constant::String(_) => (JvmType::object(STRING), None),
                Constant::Class(_) => (JvmType::object(CLASS), None),
                Constant::Other => return None,
            }
        }
        _ => return None,
    };
    Some(literal)
}

fn constant_positions(instructions: &[Instruction], matchers: &[ConstantMatcher]) -> Vec<usize> {
    positions(instructions, |instruction| {
        let Some((ty, value)) = constant_of(instruction) else {
            return false;
        };
        matchers.is_empty()
            || matchers.iter().any(|matcher| {
                if ty == JvmType::Int
                    && let (Some(wanted), Some(value)) = (matcher.int_value, value)
                {
                    return wanted == value;
                }
                matcher.literal_types().contains(&ty)
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tests::annotation;
    use crate::ir::{CallKind, build};

    fn method() -> Method {
        build::method(
            "run",
            "()I",
            false,
            vec![
                build::plain(0, opcodes::ALOAD_0),
                build::field(1, opcodes::GETFIELD, "com/example/Foo", "x", "I"),
                build::plain(4, opcodes::ICONST_5),
                build::invoke(5, CallKind::Static, "com/example/Util", "log", "(I)V"),
                build::type_insn(8, opcodes::NEW, "com/example/Box"),
                build::plain(11, opcodes::DUP),
                build::invoke(12, CallKind::Special, "com/example/Box", "<init>", "()V"),
                build::invoke(
                    15,
                    CallKind::Static,
                    "com/example/Util",
                    "size",
                    "(Ljava/lang/Object;)I",
                ),
                build::plain(18, opcodes::IRETURN),
            ],
        )
    }

    fn find(annotation: &InjectorAnnotation) -> Vec<usize> {
        let parsers = SelectorParsers::standard();
        let context = SelectorContext::default();
        let finder = InjectionPointFinder::new(&parsers, &context);
        let method = method();
        let class = build::class("com/example/Foo", None, &[], vec![method.clone()]);
        finder
            .find_instructions(annotation, &class, &method)
            .into_iter()
            .map(|site| site.index)
            .collect()
    }

    fn at(value: &str, target: Option<&str>) -> InjectorAnnotation {
        InjectorAnnotation {
            at: vec![AtSpec {
                value: value.to_string(),
                target: target.map(str::to_string),
                ..AtSpec::default()
            }],
            ..annotation("Inject")
        }
    }

    #[test]
    fn head_and_return_points() {
        assert_eq!(find(&at("HEAD", None)), vec![0]);
        assert_eq!(find(&at("RETURN", None)), vec![8]);
        assert_eq!(find(&at("TAIL", None)), vec![8]);
    }

    #[test]
    fn invoke_points_filter_by_target() {
        assert_eq!(find(&at("INVOKE", None)), vec![3, 7]);
        assert_eq!(find(&at("INVOKE", Some("Lcom/example/Util;log(I)V"))), vec![3]);
        assert_eq!(find(&at("INVOKE_ASSIGN", None)), vec![7]);
        assert!(find(&at("INVOKE", Some("not a selector"))).is_empty());
    }

    #[test]
    fn field_new_and_constant_points() {
        assert_eq!(find(&at("FIELD", Some("Lcom/example/Foo;x:I"))), vec![1]);
        assert_eq!(find(&at("NEW", Some("com.example.Box"))), vec![4]);

        let constant = InjectorAnnotation {
            constants: vec![ConstantMatcher {
                int_value: Some(5),
                ..ConstantMatcher::default()
            }],
            ..annotation("ModifyConstant")
        };
        assert_eq!(find(&constant), vec![2]);
    }

    #[test]
    fn opcode_and_ordinal_narrow_the_match() {
        let mut second = at("INVOKE", None);
        second.at[0].ordinal = Some(1);
        assert_eq!(find(&second), vec![7]);

        let mut getfield = at("FIELD", None);
        getfield.at[0].opcode = Some(opcodes::PUTFIELD);
        assert!(find(&getfield).is_empty());
    }
}
