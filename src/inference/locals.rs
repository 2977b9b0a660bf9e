//! Local variables a handler may capture: the longest run of locals, by
//! position, that every matched site has in common.

use anyhow::Result;

use super::{InferenceRequest, Oracles};
use crate::annotation::LocalCapture;
use crate::descriptor::{JvmType, method_type};
use crate::ir::{LocalVariable, Method};
use crate::signature::{Parameter, ParameterGroup, RequiredLevel};

/// Locals visible at each site, receiver and parameters excluded. `None`
/// when any site lacks local variable information.
pub(crate) fn site_locals(
    request: &InferenceRequest<'_>,
    oracles: Oracles<'_>,
) -> Result<Option<Vec<Vec<LocalVariable>>>> {
    let first_local = argument_slots(request.method)?;
    let mut sites = Vec::with_capacity(request.sites.len());
    for site in request.sites {
        let Some(locals) = oracles.locals.locals_at(request.method, site.index, false) else {
            return Ok(None);
        };
        sites.push(
            locals
                .into_iter()
                .filter(|local| local.index >= first_local)
                .collect(),
        );
    }
    Ok(Some(sites))
}

/// Slots taken by the receiver and parameters.
fn argument_slots(method: &Method) -> Result<u16> {
    let receiver = u16::from(!method.is_static());
    let parameters: u16 = method_type(&method.descriptor)?
        .parameters
        .iter()
        .map(JvmType::slot_size)
        .sum();
    Ok(receiver + parameters)
}

/// Longest common prefix of local descriptors. The first position where
/// sites disagree, or where one runs out, ends the prefix.
pub(crate) fn common_prefix(sites: &[Vec<LocalVariable>]) -> Result<Vec<Parameter>> {
    let Some(shortest) = sites.iter().map(Vec::len).min() else {
        return Ok(Vec::new());
    };
    let mut prefix = Vec::new();
    for position in 0..shortest {
        let first = &sites[0][position];
        if sites
            .iter()
            .any(|site| site[position].descriptor != first.descriptor)
        {
            break;
        }
        let name = if sites.iter().all(|site| site[position].name == first.name) {
            first.name.clone()
        } else {
            format!("local{}", position + 1)
        };
        prefix.push(Parameter::new(name, JvmType::from_descriptor(&first.descriptor)?));
    }
    Ok(prefix)
}

/// Trailing handler group for captured locals; `None` when nothing is captured.
pub(crate) fn capture_group(prefix: Vec<Parameter>, mode: LocalCapture) -> Option<ParameterGroup> {
    if prefix.is_empty() || !mode.captures() {
        return None;
    }
    let required = match mode {
        LocalCapture::CaptureFailhard | LocalCapture::CaptureFailexception => {
            RequiredLevel::ErrorIfAbsent
        }
        _ => RequiredLevel::Optional,
    };
    Some(ParameterGroup::vararg(prefix, required))
}
