use crate::descriptor::{JvmType, method_type};
use crate::inference::LocalsOracle;
use crate::ir::{LocalVariable, Method};

/// Local visibility from the method's `LocalVariableTable`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct LocalVariableTableOracle;

impl LocalsOracle for LocalVariableTableOracle {
    fn locals_at(
        &self,
        method: &Method,
        index: usize,
        args_only: bool,
    ) -> Option<Vec<LocalVariable>> {
        if method.local_variables.is_empty() {
            return None;
        }
        let offset = method.instructions.get(index)?.offset;
        let argument_slots = if args_only {
            let parameters: u16 = method_type(&method.descriptor)
                .ok()?
                .parameters
                .iter()
                .map(JvmType::slot_size)
                .sum();
            Some(parameters + u16::from(!method.is_static()))
        } else {
            None
        };

        let mut locals: Vec<LocalVariable> = method
            .local_variables
            .iter()
            .filter(|local| local.is_live_at(offset))
            .filter(|local| argument_slots.is_none_or(|slots| local.index < slots))
            .cloned()
            .collect();
        locals.sort_by_key(|local| local.index);
        locals.dedup_by_key(|local| local.index);
        Some(locals)
    }
}
