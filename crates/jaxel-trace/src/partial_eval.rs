//! Partial evaluation: split a jaxpr into known and unknown halves.
//!
//! Given a mask marking which inputs are unknown (abstract), produce
//! `jaxpr_known` (equations derivable from known values, with residual
//! outputs appended) and `jaxpr_unknown` (equations touching unknown values,
//! taking residuals as leading inputs). Constvars are always known.
//!
//! Invariant:
//! `eval(known, consts, known_args) = known_outs ++ residuals` and
//! `eval(unknown, [], residuals ++ unknown_args) = unknown_outs`,
//! which together reproduce `eval(jaxpr, consts, all_args)`.
//!
//! This split underlies `linearize`: staging a jvp computation and marking
//! the tangent inputs unknown leaves exactly the linear part in
//! `jaxpr_unknown`.

use jaxel_core::{Atom, CoreError, Equation, Jaxpr, Var};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone)]
pub struct PartialEvalSplit {
    /// Equations with all-known inputs. Outputs: the known subset of the
    /// original outputs, then one output per residual.
    pub jaxpr_known: Jaxpr,
    /// Equations touching unknown values. Inputs: residuals, then the
    /// original unknown inputs.
    pub jaxpr_unknown: Jaxpr,
    /// Which original outputs are produced by the unknown half.
    pub out_unknowns: Vec<bool>,
    /// Binders carried from the known half into the unknown half.
    pub residual_vars: Vec<Var>,
}

pub fn partial_eval_jaxpr(
    jaxpr: &Jaxpr,
    unknown_inputs: &[bool],
) -> Result<PartialEvalSplit, CoreError> {
    if unknown_inputs.len() != jaxpr.invars.len() {
        return Err(CoreError::shape(
            "partial_eval",
            format!(
                "unknown mask length {} does not match input count {}",
                unknown_inputs.len(),
                jaxpr.invars.len()
            ),
        ));
    }

    let mut unknown_vars: FxHashSet<jaxel_core::VarId> = FxHashSet::default();
    for (var, &unknown) in jaxpr.invars.iter().zip(unknown_inputs.iter()) {
        if unknown {
            unknown_vars.insert(var.id);
        }
    }

    let mut known_eqns: Vec<Equation> = Vec::new();
    let mut unknown_eqns: Vec<Equation> = Vec::new();

    for eqn in &jaxpr.equations {
        let touches_unknown = eqn.inputs.iter().any(|atom| match atom {
            Atom::Var(var) => unknown_vars.contains(&var.id),
            Atom::Lit(_) => false,
        });
        if touches_unknown {
            for out in &eqn.outputs {
                unknown_vars.insert(out.id);
            }
            unknown_eqns.push(eqn.clone());
        } else {
            known_eqns.push(eqn.clone());
        }
    }

    // Residuals: known binders consumed by the unknown half, in first-use
    // order. Binder identities are reused, so no renaming is needed.
    let mut residual_vars: Vec<Var> = Vec::new();
    let mut residual_seen: FxHashSet<jaxel_core::VarId> = FxHashSet::default();
    for eqn in &unknown_eqns {
        for atom in &eqn.inputs {
            if let Atom::Var(var) = atom
                && !unknown_vars.contains(&var.id)
                && residual_seen.insert(var.id)
            {
                residual_vars.push(var.clone());
            }
        }
    }

    let known_invars: Vec<Var> = jaxpr
        .invars
        .iter()
        .zip(unknown_inputs.iter())
        .filter(|(_, unknown)| !**unknown)
        .map(|(var, _)| var.clone())
        .collect();

    let out_unknowns: Vec<bool> = jaxpr
        .outs
        .iter()
        .map(|atom| match atom {
            Atom::Var(var) => unknown_vars.contains(&var.id),
            Atom::Lit(_) => false,
        })
        .collect();

    let mut known_outs: Vec<Atom> = jaxpr
        .outs
        .iter()
        .zip(out_unknowns.iter())
        .filter(|(_, unknown)| !**unknown)
        .map(|(atom, _)| atom.clone())
        .collect();
    known_outs.extend(residual_vars.iter().cloned().map(Atom::Var));

    let jaxpr_known = Jaxpr::new(
        known_invars,
        jaxpr.constvars.clone(),
        known_eqns,
        known_outs,
    );

    let mut unknown_invars = residual_vars.clone();
    unknown_invars.extend(
        jaxpr
            .invars
            .iter()
            .zip(unknown_inputs.iter())
            .filter(|(_, unknown)| **unknown)
            .map(|(var, _)| var.clone()),
    );
    let unknown_outs: Vec<Atom> = jaxpr
        .outs
        .iter()
        .zip(out_unknowns.iter())
        .filter(|(_, unknown)| **unknown)
        .map(|(atom, _)| atom.clone())
        .collect();

    let jaxpr_unknown = Jaxpr::new(unknown_invars, vec![], unknown_eqns, unknown_outs);

    Ok(PartialEvalSplit {
        jaxpr_known,
        jaxpr_unknown,
        out_unknowns,
        residual_vars,
    })
}
