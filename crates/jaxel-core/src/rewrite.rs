//! IR-to-IR rewrites: jit-call inlining and dead-code elimination.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ir::{Atom, Equation, Jaxpr, Var, VarId};

/// Inline every `jit` call equation by splicing its body into the enclosing
/// jaxpr. Spliced binders are α-renamed to stay unique, and equations that no
/// longer contribute to any output are pruned. Semantics-preserving.
#[must_use]
pub fn inline_calls(jaxpr: &Jaxpr) -> Jaxpr {
    let mut next_id = jaxpr.fresh_id_base();
    let mut subst: FxHashMap<VarId, Atom> = FxHashMap::default();
    let mut equations: Vec<Equation> = Vec::with_capacity(jaxpr.equations.len());

    for eqn in &jaxpr.equations {
        let inputs: SmallVec<[Atom; 4]> = eqn
            .inputs
            .iter()
            .map(|atom| resolve(atom, &subst))
            .collect();

        if eqn.primitive.name() == "jit" {
            let Some(body) = eqn.sub_jaxprs.first() else {
                continue;
            };
            let body = inline_calls(body);
            splice_body(
                &body,
                &inputs,
                &eqn.outputs,
                &mut next_id,
                &mut subst,
                &mut equations,
            );
        } else {
            equations.push(Equation {
                primitive: eqn.primitive,
                inputs,
                outputs: eqn.outputs.clone(),
                params: eqn.params.clone(),
                sub_jaxprs: eqn.sub_jaxprs.clone(),
            });
        }
    }

    let outs = jaxpr
        .outs
        .iter()
        .map(|atom| resolve(atom, &subst))
        .collect::<Vec<_>>();

    let inlined = Jaxpr::new(
        jaxpr.invars.clone(),
        jaxpr.constvars.clone(),
        equations,
        outs,
    );
    let used = vec![true; inlined.outs.len()];
    dce_jaxpr(&inlined, &used).0
}

/// Splice one call body: bind body invars to the call-site inputs, α-rename
/// the body's own binders, and map the call outputs to the body outputs.
fn splice_body(
    body: &Jaxpr,
    call_inputs: &[Atom],
    call_outputs: &[Var],
    next_id: &mut u32,
    outer_subst: &mut FxHashMap<VarId, Atom>,
    equations: &mut Vec<Equation>,
) {
    let mut inner: FxHashMap<VarId, Atom> = FxHashMap::default();
    for (var, atom) in body.invars.iter().zip(call_inputs.iter()) {
        inner.insert(var.id, atom.clone());
    }

    for eqn in &body.equations {
        let inputs: SmallVec<[Atom; 4]> = eqn
            .inputs
            .iter()
            .map(|atom| resolve(atom, &inner))
            .collect();
        let outputs: SmallVec<[Var; 2]> = eqn
            .outputs
            .iter()
            .map(|var| {
                let fresh = Var::new(VarId(*next_id), var.aval.clone());
                *next_id += 1;
                inner.insert(var.id, Atom::Var(fresh.clone()));
                fresh
            })
            .collect();
        equations.push(Equation {
            primitive: eqn.primitive,
            inputs,
            outputs,
            params: eqn.params.clone(),
            sub_jaxprs: eqn.sub_jaxprs.clone(),
        });
    }

    for (out_var, body_out) in call_outputs.iter().zip(body.outs.iter()) {
        outer_subst.insert(out_var.id, resolve(body_out, &inner));
    }
}

fn resolve(atom: &Atom, subst: &FxHashMap<VarId, Atom>) -> Atom {
    match atom {
        Atom::Var(var) => subst.get(&var.id).cloned().unwrap_or_else(|| atom.clone()),
        Atom::Lit(_) => atom.clone(),
    }
}

/// Dead code elimination: remove equations that do not contribute to any
/// used output. Preserves equation order. Returns the pruned jaxpr and a
/// mask of which inputs are still referenced.
#[must_use]
pub fn dce_jaxpr(jaxpr: &Jaxpr, used_outputs: &[bool]) -> (Jaxpr, Vec<bool>) {
    let mut needed: FxHashSet<VarId> = FxHashSet::default();
    for (atom, &used) in jaxpr.outs.iter().zip(used_outputs.iter()) {
        if used && let Atom::Var(var) = atom {
            needed.insert(var.id);
        }
    }

    let mut keep_eqn = vec![false; jaxpr.equations.len()];
    for (i, eqn) in jaxpr.equations.iter().enumerate().rev() {
        let outputs_needed = eqn.outputs.iter().any(|var| needed.contains(&var.id));
        if outputs_needed {
            keep_eqn[i] = true;
            for atom in &eqn.inputs {
                if let Atom::Var(var) = atom {
                    needed.insert(var.id);
                }
            }
        }
    }

    let retained: Vec<Equation> = jaxpr
        .equations
        .iter()
        .zip(keep_eqn.iter())
        .filter(|(_, keep)| **keep)
        .map(|(eqn, _)| eqn.clone())
        .collect();

    let used_inputs: Vec<bool> = jaxpr
        .invars
        .iter()
        .map(|var| needed.contains(&var.id))
        .collect();

    let pruned = Jaxpr::new(
        jaxpr.invars.clone(),
        jaxpr.constvars.clone(),
        retained,
        jaxpr.outs.clone(),
    );
    (pruned, used_inputs)
}

#[cfg(test)]
mod tests {
    use super::{dce_jaxpr, inline_calls};
    use crate::aval::ShapedArray;
    use crate::dtype::DType;
    use crate::ir::{Atom, Equation, Jaxpr, Var, VarId};
    use crate::params::Params;
    use crate::primitive::Primitive;
    use crate::value::Literal;
    use smallvec::smallvec;

    fn var(id: u32) -> Var {
        Var::new(VarId(id), ShapedArray::scalar(DType::F64))
    }

    fn simple_eqn(name: &str, inputs: Vec<Atom>, output: Var) -> Equation {
        Equation {
            primitive: Primitive::intern(name),
            inputs: inputs.into(),
            outputs: smallvec![output],
            params: Params::new(),
            sub_jaxprs: vec![],
        }
    }

    #[test]
    fn inline_replaces_jit_equation_with_body() {
        // body: { a -> b = mul(a, a) -> b }
        let body = Jaxpr::new(
            vec![var(0)],
            vec![],
            vec![simple_eqn(
                "mul",
                vec![Atom::Var(var(0)), Atom::Var(var(0))],
                var(1),
            )],
            vec![Atom::Var(var(1))],
        );

        // outer: { x -> y = jit[body](x); z = add(y, 1) -> z }
        let mut params = Params::new();
        params.insert("name".to_owned(), "square".to_owned());
        params.insert("num_consts".to_owned(), "0".to_owned());
        let outer = Jaxpr::new(
            vec![var(0)],
            vec![],
            vec![
                Equation {
                    primitive: Primitive::intern("jit"),
                    inputs: smallvec![Atom::Var(var(0))],
                    outputs: smallvec![var(1)],
                    params,
                    sub_jaxprs: vec![body],
                },
                simple_eqn(
                    "add",
                    vec![Atom::Var(var(1)), Atom::Lit(Literal::I64(1))],
                    var(2),
                ),
            ],
            vec![Atom::Var(var(2))],
        );

        let inlined = inline_calls(&outer);
        inlined.validate_well_formed().expect("inlined jaxpr valid");
        assert!(
            inlined
                .equations
                .iter()
                .all(|eqn| eqn.primitive.name() != "jit")
        );
        assert_eq!(inlined.equations.len(), 2);
        assert_eq!(inlined.equations[0].primitive.name(), "mul");
        assert_eq!(inlined.equations[1].primitive.name(), "add");
    }

    #[test]
    fn inline_prunes_unused_body_outputs() {
        // body computes two results; the call only uses the first.
        let body = Jaxpr::new(
            vec![var(0)],
            vec![],
            vec![
                simple_eqn("neg", vec![Atom::Var(var(0))], var(1)),
                simple_eqn("sin", vec![Atom::Var(var(0))], var(2)),
            ],
            vec![Atom::Var(var(1)), Atom::Var(var(2))],
        );
        let mut params = Params::new();
        params.insert("num_consts".to_owned(), "0".to_owned());
        let outer = Jaxpr::new(
            vec![var(0)],
            vec![],
            vec![Equation {
                primitive: Primitive::intern("jit"),
                inputs: smallvec![Atom::Var(var(0))],
                outputs: smallvec![var(1), var(2)],
                params,
                sub_jaxprs: vec![body],
            }],
            vec![Atom::Var(var(1))],
        );

        let inlined = inline_calls(&outer);
        inlined.validate_well_formed().expect("inlined jaxpr valid");
        assert_eq!(inlined.equations.len(), 1);
        assert_eq!(inlined.equations[0].primitive.name(), "neg");
    }

    #[test]
    fn dce_keeps_chain_dependencies() {
        let jaxpr = Jaxpr::new(
            vec![var(0)],
            vec![],
            vec![
                simple_eqn("neg", vec![Atom::Var(var(0))], var(1)),
                simple_eqn("sin", vec![Atom::Var(var(1))], var(2)),
                simple_eqn("cos", vec![Atom::Var(var(0))], var(3)),
            ],
            vec![Atom::Var(var(2)), Atom::Var(var(3))],
        );

        let (pruned, used_inputs) = dce_jaxpr(&jaxpr, &[true, false]);
        assert_eq!(pruned.equations.len(), 2);
        assert_eq!(pruned.equations[0].primitive.name(), "neg");
        assert_eq!(pruned.equations[1].primitive.name(), "sin");
        assert_eq!(used_inputs, vec![true]);
    }
}
