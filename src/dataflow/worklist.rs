use std::collections::{BTreeSet, VecDeque};

use anyhow::Result;

use crate::ir::{ExceptionHandler, Instruction, InstructionKind, Method};
use crate::opcodes;

/// Domain callbacks required by the generic worklist engine.
pub(crate) trait WorklistSemantics {
    type State: Clone + Eq;

    fn initial_state(&self, method: &Method) -> Self::State;

    /// Advance `state` over one instruction.
    fn transfer(
        &self,
        method: &Method,
        instruction: &Instruction,
        state: &mut Self::State,
    ) -> Result<()>;

    /// Join two states reaching the same instruction. Must be monotone so the
    /// analysis reaches a fixed point.
    fn merge(&self, existing: &Self::State, incoming: &Self::State) -> Self::State;

    /// State on entry to an exception handler protecting an instruction.
    fn handler_state(&self, state: &Self::State, handler: &ExceptionHandler) -> Self::State;
}

/// Forward fixed-point analysis. Returns the state on entry to each
/// instruction; unreachable instructions stay `None`.
pub(crate) fn analyze_method<S>(method: &Method, semantics: &S) -> Result<Vec<Option<S::State>>>
where
    S: WorklistSemantics,
{
    let mut states: Vec<Option<S::State>> = vec![None; method.instructions.len()];
    if method.instructions.is_empty() {
        return Ok(states);
    }
    let mut queue = VecDeque::new();
    let mut queued = BTreeSet::new();
    states[0] = Some(semantics.initial_state(method));
    queue.push_back(0usize);
    queued.insert(0usize);

    while let Some(index) = queue.pop_front() {
        queued.remove(&index);
        let Some(entry) = states[index].clone() else {
            continue;
        };
        let instruction = &method.instructions[index];

        for handler in covering_handlers(method, instruction.offset) {
            if let Some(target) = method.instruction_index(handler.handler_pc) {
                let incoming = semantics.handler_state(&entry, handler);
                propagate(semantics, &mut states, &mut queue, &mut queued, target, incoming);
            }
        }

        let mut exit = entry;
        semantics.transfer(method, instruction, &mut exit)?;
        for successor in successors(method, index) {
            propagate(
                semantics,
                &mut states,
                &mut queue,
                &mut queued,
                successor,
                exit.clone(),
            );
        }
    }

    Ok(states)
}

fn propagate<S>(
    semantics: &S,
    states: &mut [Option<S::State>],
    queue: &mut VecDeque<usize>,
    queued: &mut BTreeSet<usize>,
    target: usize,
    incoming: S::State,
) where
    S: WorklistSemantics,
{
    let next = match &states[target] {
        Some(existing) => {
            let merged = semantics.merge(existing, &incoming);
            if &merged == existing {
                return;
            }
            merged
        }
        None => incoming,
    };
    states[target] = Some(next);
    if queued.insert(target) {
        queue.push_back(target);
    }
}

fn covering_handlers(method: &Method, offset: u32) -> impl Iterator<Item = &ExceptionHandler> {
    method
        .exception_handlers
        .iter()
        .filter(move |handler| offset >= handler.start_pc && offset < handler.end_pc)
}

/// Normal-flow successors of the instruction at `index`.
fn successors(method: &Method, index: usize) -> Vec<usize> {
    let instruction = &method.instructions[index];
    let mut next = Vec::new();
    if let InstructionKind::Jump(targets) = &instruction.kind {
        next.extend(
            targets
                .iter()
                .filter_map(|offset| method.instruction_index(*offset)),
        );
    }
    if !opcodes::ends_flow(instruction.opcode) && index + 1 < method.instructions.len() {
        next.push(index + 1);
    }
    next.sort_unstable();
    next.dedup();
    next
}
