use anyhow::Result;

use super::opcode_semantics::{Frame, StackValue, apply};
use super::worklist::{WorklistSemantics, analyze_method};
use crate::descriptor::{JvmType, method_type};
use crate::inference::StackTypeOracle;
use crate::ir::{Class, ExceptionHandler, Instruction, Method};

const THROWABLE: &str = "java/lang/Throwable";

/// Operand stack types from a forward worklist pass over the method.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct WorklistStackOracle;

impl StackTypeOracle for WorklistStackOracle {
    fn stack_type(
        &self,
        class: &Class,
        method: &Method,
        index: usize,
        depth: usize,
    ) -> Option<JvmType> {
        let semantics = StackTypes { class };
        let states = match analyze_method(method, &semantics) {
            Ok(states) => states,
            Err(err) => {
                tracing::debug!(
                    "stack analysis of {}.{}{} failed: {err:#}",
                    class.name,
                    method.name,
                    method.descriptor
                );
                return None;
            }
        };
        match states.get(index)?.as_ref()?.peek(depth)? {
            StackValue::Type(ty) => Some(ty.clone()),
            StackValue::Null | StackValue::Unknown => None,
        }
    }
}

struct StackTypes<'a> {
    class: &'a Class,
}

impl WorklistSemantics for StackTypes<'_> {
    type State = Frame;

    fn initial_state(&self, method: &Method) -> Frame {
        let mut frame = Frame::default();
        let mut slot: u16 = 0;
        if !method.is_static() {
            frame
                .locals
                .insert(slot, StackValue::Type(JvmType::object(&self.class.name)));
            slot += 1;
        }
        let Ok(ty) = method_type(&method.descriptor) else {
            return frame;
        };
        for parameter in ty.parameters {
            let size = parameter.slot_size();
            frame.locals.insert(slot, StackValue::Type(parameter));
            slot += size;
        }
        frame
    }

    fn transfer(
        &self,
        _method: &Method,
        instruction: &Instruction,
        state: &mut Frame,
    ) -> Result<()> {
        apply(state, instruction)
    }

    fn merge(&self, existing: &Frame, incoming: &Frame) -> Frame {
        existing.join(incoming)
    }

    fn handler_state(&self, state: &Frame, handler: &ExceptionHandler) -> Frame {
        let caught = handler.catch_type.as_deref().unwrap_or(THROWABLE);
        Frame {
            stack: vec![StackValue::Type(JvmType::object(caught))],
            locals: state.locals.clone(),
        }
    }
}
