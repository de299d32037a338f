//! Transposition of linear jaxprs: one backward pass over the equations,
//! accumulating cotangents per binder.

use jaxel_core::{Atom, CoreError, Jaxpr, ShapedArray, Value, VarId};
use jaxel_lax::ops;
use jaxel_trace::{Tracer, TransposeInput, primitive_def};
use rustc_hash::FxHashMap;

/// Transpose a jaxpr linear in its trailing inputs.
///
/// `jaxpr`'s inputs are the residuals (known forward values) followed by the
/// linear (tangent) inputs; `seeded` holds the cotangent for each jaxpr
/// output, `None` where no cotangent flows. Returns one cotangent per
/// tangent input, zeros where nothing accumulated.
pub(crate) fn eval_transposed(
    jaxpr: &Jaxpr,
    residuals: &[Tracer],
    seeded: &[Option<Tracer>],
    tangent_avals: &[ShapedArray],
) -> Result<Vec<Tracer>, CoreError> {
    let num_residuals = residuals.len();
    if num_residuals + tangent_avals.len() != jaxpr.invars.len() {
        return Err(CoreError::shape(
            "transpose",
            "residual/tangent split does not cover the jaxpr inputs",
        ));
    }

    // Forward values: the residual bindings. Everything else is linear.
    let mut known: FxHashMap<VarId, Tracer> = FxHashMap::default();
    for (var, value) in jaxpr.invars[..num_residuals].iter().zip(residuals.iter()) {
        known.insert(var.id, value.clone());
    }

    let mut cotangents: FxHashMap<VarId, Tracer> = FxHashMap::default();
    for (atom, seed) in jaxpr.outs.iter().zip(seeded.iter()) {
        if let (Atom::Var(var), Some(seed)) = (atom, seed) {
            accumulate(&mut cotangents, var.id, seed.clone())?;
        }
    }

    for eqn in jaxpr.equations.iter().rev() {
        let has_flow = eqn
            .outputs
            .iter()
            .any(|var| cotangents.contains_key(&var.id));
        if !has_flow {
            continue;
        }

        let out_cts = eqn
            .outputs
            .iter()
            .map(|var| match cotangents.get(&var.id) {
                Some(ct) => Ok(ct.clone()),
                None => Ok(Tracer::concrete(var.aval.zeros_value()?)),
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        let inputs = eqn
            .inputs
            .iter()
            .map(|atom| match atom {
                Atom::Lit(lit) => TransposeInput::Known(Tracer::concrete(Value::Scalar(*lit))),
                Atom::Var(var) => match known.get(&var.id) {
                    Some(value) => TransposeInput::Known(value.clone()),
                    None => TransposeInput::Linear(var.aval.clone()),
                },
            })
            .collect::<Vec<_>>();

        let def = primitive_def(eqn.primitive)?;
        let rule = def.transpose.ok_or_else(|| CoreError::MissingRule {
            primitive: eqn.primitive.name().to_owned(),
            transform: "transpose",
        })?;
        let contributions = rule(eqn.primitive, &out_cts, &inputs, &eqn.params, &eqn.sub_jaxprs)?;
        if contributions.len() != eqn.inputs.len() {
            return Err(CoreError::shape(
                eqn.primitive.name(),
                "transpose rule arity mismatch",
            ));
        }

        for (atom, contribution) in eqn.inputs.iter().zip(contributions) {
            if let (Atom::Var(var), Some(contribution)) = (atom, contribution) {
                accumulate(&mut cotangents, var.id, contribution)?;
            }
        }
    }

    jaxpr.invars[num_residuals..]
        .iter()
        .map(|var| match cotangents.get(&var.id) {
            Some(ct) => Ok(ct.clone()),
            None => Ok(Tracer::concrete(var.aval.zeros_value()?)),
        })
        .collect()
}

fn accumulate(
    cotangents: &mut FxHashMap<VarId, Tracer>,
    var: VarId,
    contribution: Tracer,
) -> Result<(), CoreError> {
    let updated = match cotangents.remove(&var) {
        Some(existing) => ops::add(&existing, &contribution)?,
        None => contribution,
    };
    cotangents.insert(var, updated);
    Ok(())
}
