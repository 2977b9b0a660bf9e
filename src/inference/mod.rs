//! Expected handler signatures for injector annotations, inferred from the
//! instructions an injector matched in its target method.

mod constant;
mod inject;
pub(crate) mod locals;
mod modify_arg;
mod redirect;
mod variable;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;

use crate::annotation::InjectorAnnotation;
use crate::descriptor::{JvmType, MethodType, method_type};
use crate::hierarchy::ClassProvider;
use crate::ir::{Class, Instruction, LocalVariable, Method};
use crate::signature::{MethodSignature, Parameter, ParameterGroup, RequiredLevel};

pub(crate) use redirect::RedirectTarget;

pub(crate) const CALLBACK_INFO: &str =
    "org/spongepowered/asm/mixin/injection/callback/CallbackInfo";
pub(crate) const CALLBACK_INFO_RETURNABLE: &str =
    "org/spongepowered/asm/mixin/injection/callback/CallbackInfoReturnable";
pub(crate) const ARGS: &str = "org/spongepowered/asm/mixin/injection/invoke/arg/Args";

/// Injector annotation families.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum InjectorKind {
    Inject,
    Redirect,
    ModifyArg,
    ModifyArgs,
    ModifyConstant,
    ModifyVariable,
}

impl fmt::Display for InjectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InjectorKind::Inject => "Inject",
            InjectorKind::Redirect => "Redirect",
            InjectorKind::ModifyArg => "ModifyArg",
            InjectorKind::ModifyArgs => "ModifyArgs",
            InjectorKind::ModifyConstant => "ModifyConstant",
            InjectorKind::ModifyVariable => "ModifyVariable",
        };
        f.write_str(name)
    }
}

/// Annotation name to injector kind, built by the host.
#[derive(Clone, Debug, Default)]
pub(crate) struct InjectorRegistry {
    kinds: BTreeMap<String, InjectorKind>,
}

impl InjectorRegistry {
    pub(crate) fn standard() -> Self {
        [
            InjectorKind::Inject,
            InjectorKind::Redirect,
            InjectorKind::ModifyArg,
            InjectorKind::ModifyArgs,
            InjectorKind::ModifyConstant,
            InjectorKind::ModifyVariable,
        ]
        .into_iter()
        .fold(Self::default(), |registry, kind| {
            registry.with(&kind.to_string(), kind)
        })
    }

    pub(crate) fn with(mut self, annotation: &str, kind: InjectorKind) -> Self {
        self.kinds.insert(annotation.to_string(), kind);
        self
    }

    /// Look up by simple name; qualified names are reduced to their last segment.
    pub(crate) fn kind_of(&self, annotation: &str) -> Option<InjectorKind> {
        self.kinds.get(annotation).copied().or_else(|| {
            let simple = annotation.rsplit(['.', '/', '$']).next()?;
            self.kinds.get(simple).copied()
        })
    }
}

/// Outcome of signature inference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Inference {
    /// Non-empty list of acceptable handler signatures.
    Signatures(Vec<MethodSignature>),
    NoInstructions,
    /// Matched instructions disagree in a way no single handler satisfies.
    Inconsistent(String),
    /// A fact needed for inference could not be determined.
    Unavailable(String),
}

impl Inference {
    pub(crate) fn into_signatures(self) -> Vec<MethodSignature> {
        match self {
            Inference::Signatures(signatures) => signatures,
            _ => Vec::new(),
        }
    }

    fn from_signatures(signatures: Vec<MethodSignature>, reason: &str) -> Self {
        if signatures.is_empty() {
            Inference::Inconsistent(reason.to_string())
        } else {
            Inference::Signatures(signatures)
        }
    }
}

/// Instruction matched by an injection point, by position in its method.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct InstructionSite {
    pub(crate) index: usize,
}

impl InstructionSite {
    pub(crate) fn instruction<'a>(&self, method: &'a Method) -> Option<&'a Instruction> {
        method.instructions.get(self.index)
    }
}

/// Locates the instructions an annotation's injection point refers to.
pub(crate) trait InstructionFinder {
    fn find_instructions(
        &self,
        annotation: &InjectorAnnotation,
        class: &Class,
        method: &Method,
    ) -> Vec<InstructionSite>;
}

/// Data-flow answers about operand stack contents.
pub(crate) trait StackTypeOracle {
    /// Type of the value `depth` entries below the top of the stack just
    /// before the instruction at `index` executes.
    fn stack_type(&self, class: &Class, method: &Method, index: usize, depth: usize)
    -> Option<JvmType>;
}

/// Local variable visibility at an instruction.
pub(crate) trait LocalsOracle {
    /// Locals visible before the instruction at `index`, ordered by slot.
    /// `args_only` restricts the list to the receiver and parameters.
    /// `None` when the method carries no local variable information.
    fn locals_at(&self, method: &Method, index: usize, args_only: bool)
    -> Option<Vec<LocalVariable>>;
}

/// Collaborators consulted during inference.
#[derive(Clone, Copy)]
pub(crate) struct Oracles<'a> {
    pub(crate) classes: &'a dyn ClassProvider,
    pub(crate) stack: &'a dyn StackTypeOracle,
    pub(crate) locals: &'a dyn LocalsOracle,
}

/// One inference request: the annotation, its target method and the sites
/// matched inside it.
pub(crate) struct InferenceRequest<'a> {
    pub(crate) annotation: &'a InjectorAnnotation,
    pub(crate) class: &'a Class,
    pub(crate) method: &'a Method,
    pub(crate) sites: &'a [InstructionSite],
    /// The user's handler, consulted where nothing else determines a type.
    pub(crate) handler: Option<&'a MethodType>,
}

impl<'a> InferenceRequest<'a> {
    fn instructions(&self) -> Result<Vec<&'a Instruction>> {
        self.sites
            .iter()
            .map(|site| {
                site.instruction(self.method).ok_or_else(|| {
                    anyhow::anyhow!(
                        "instruction {} out of range in {}.{}",
                        site.index,
                        self.class.name,
                        self.method.name
                    )
                })
            })
            .collect()
    }
}

/// Expected handler signatures for `kind` over the request's sites.
pub(crate) fn infer(
    kind: InjectorKind,
    request: &InferenceRequest<'_>,
    oracles: Oracles<'_>,
) -> Result<Inference> {
    if request.sites.is_empty() {
        return Ok(Inference::NoInstructions);
    }
    let inference = match kind {
        InjectorKind::Inject => inject::infer(request, oracles)?,
        InjectorKind::Redirect => redirect::infer(request, oracles)?,
        InjectorKind::ModifyArg => modify_arg::infer_single(request)?,
        InjectorKind::ModifyArgs => modify_arg::infer_list(request)?,
        InjectorKind::ModifyConstant => constant::infer(request),
        InjectorKind::ModifyVariable => variable::infer(request, oracles)?,
    };
    if let Inference::Inconsistent(reason) | Inference::Unavailable(reason) = &inference {
        tracing::debug!(
            "{kind} in {}.{}{}: {reason}",
            request.class.name,
            request.method.name,
            request.method.descriptor
        );
    }
    Ok(inference)
}

/// Optional trailing group receiving the target method's own arguments,
/// named from its local variable table when present.
pub(crate) fn pass_through_group(method: &Method) -> Result<ParameterGroup> {
    let parameters = target_parameters(method)?;
    Ok(ParameterGroup::vararg(parameters, RequiredLevel::Optional))
}

pub(crate) fn target_parameters(method: &Method) -> Result<Vec<Parameter>> {
    let ty = method_type(&method.descriptor)?;
    let mut slot: u16 = if method.is_static() { 0 } else { 1 };
    let mut parameters = Vec::with_capacity(ty.parameters.len());
    for (position, parameter) in ty.parameters.into_iter().enumerate() {
        let name = method
            .local_variables
            .iter()
            .find(|local| local.index == slot && local.start_pc == 0)
            .map(|local| local.name.clone())
            .unwrap_or_else(|| format!("par{}", position + 1));
        slot += parameter.slot_size();
        parameters.push(Parameter::new(name, parameter));
    }
    Ok(parameters)
}

/// `[value: T] -> T` plus the optional pass-through group.
fn value_signature(ty: JvmType, method: &Method) -> Result<MethodSignature> {
    Ok(MethodSignature::new(
        vec![
            ParameterGroup::required(vec![Parameter::new("value", ty.clone())]),
            pass_through_group(method)?,
        ],
        ty,
    ))
}
