//! Jaxpr interpreters: the concrete evaluator backed by the kernel table,
//! and the traced evaluator that replays a jaxpr through `bind` so enclosing
//! transformations see its primitives.

use jaxel_core::{Atom, ClosedJaxpr, CoreError, Jaxpr, Value, VarId};
use jaxel_runtime::Backend;
use rustc_hash::FxHashMap;

use crate::bind::bind;
use crate::tracer::Tracer;

/// The process-wide backend, defaulting to the host CPU kernels.
pub fn active_backend() -> &'static dyn Backend {
    jaxel_runtime::backend_or_install(|| Box::new(jaxel_backend_cpu::CpuBackend::new()))
}

/// Evaluate a jaxpr on concrete values.
pub fn eval_jaxpr(jaxpr: &Jaxpr, consts: &[Value], args: &[Value]) -> Result<Vec<Value>, CoreError> {
    if consts.len() != jaxpr.constvars.len() {
        return Err(CoreError::shape(
            "jaxpr",
            format!(
                "constant arity mismatch: expected {}, got {}",
                jaxpr.constvars.len(),
                consts.len()
            ),
        ));
    }
    if args.len() != jaxpr.invars.len() {
        return Err(CoreError::shape(
            "jaxpr",
            format!(
                "input arity mismatch: expected {}, got {}",
                jaxpr.invars.len(),
                args.len()
            ),
        ));
    }

    let mut env: FxHashMap<VarId, Value> = FxHashMap::default();
    for (var, value) in jaxpr.constvars.iter().zip(consts.iter()) {
        env.insert(var.id, value.clone());
    }
    for (var, value) in jaxpr.invars.iter().zip(args.iter()) {
        env.insert(var.id, value.clone());
    }

    let backend = active_backend();
    for eqn in &jaxpr.equations {
        let inputs = eqn
            .inputs
            .iter()
            .map(|atom| resolve_value(atom, &env))
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = if eqn.primitive.name() == "jit" {
            let sub = eqn
                .sub_jaxprs
                .first()
                .ok_or_else(|| CoreError::shape("jit", "call equation without a body"))?;
            eval_jaxpr(sub, &[], &inputs)?
        } else {
            backend.execute_primitive(
                eqn.primitive.name(),
                &inputs,
                &eqn.params,
                backend.default_device(),
            )?
        };

        if outputs.len() != eqn.outputs.len() {
            return Err(CoreError::shape(
                eqn.primitive.name(),
                format!(
                    "kernel output arity mismatch: expected {}, got {}",
                    eqn.outputs.len(),
                    outputs.len()
                ),
            ));
        }
        for (var, value) in eqn.outputs.iter().zip(outputs) {
            env.insert(var.id, value);
        }
    }

    jaxpr
        .outs
        .iter()
        .map(|atom| resolve_value(atom, &env))
        .collect()
}

/// Evaluate a closed jaxpr on concrete values.
pub fn eval_closed_jaxpr(closed: &ClosedJaxpr, args: &[Value]) -> Result<Vec<Value>, CoreError> {
    eval_jaxpr(&closed.jaxpr, &closed.consts, args)
}

/// Replay a jaxpr through `bind`, so every equation routes through whatever
/// traces are live. This is how call bodies compose with jvp, batching, and
/// nested staging.
pub fn eval_jaxpr_traced(
    jaxpr: &Jaxpr,
    consts: &[Tracer],
    args: &[Tracer],
) -> Result<Vec<Tracer>, CoreError> {
    if consts.len() != jaxpr.constvars.len() || args.len() != jaxpr.invars.len() {
        return Err(CoreError::shape(
            "jaxpr",
            "arity mismatch while replaying jaxpr".to_owned(),
        ));
    }

    let mut env: FxHashMap<VarId, Tracer> = FxHashMap::default();
    for (var, tracer) in jaxpr.constvars.iter().zip(consts.iter()) {
        env.insert(var.id, tracer.clone());
    }
    for (var, tracer) in jaxpr.invars.iter().zip(args.iter()) {
        env.insert(var.id, tracer.clone());
    }

    for eqn in &jaxpr.equations {
        let inputs = eqn
            .inputs
            .iter()
            .map(|atom| resolve_tracer(atom, &env))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = bind(eqn.primitive, &inputs, &eqn.params, &eqn.sub_jaxprs)?;
        if outputs.len() != eqn.outputs.len() {
            return Err(CoreError::shape(
                eqn.primitive.name(),
                "replay output arity mismatch".to_owned(),
            ));
        }
        for (var, tracer) in eqn.outputs.iter().zip(outputs) {
            env.insert(var.id, tracer);
        }
    }

    jaxpr
        .outs
        .iter()
        .map(|atom| resolve_tracer(atom, &env))
        .collect()
}

/// Eager execution of a staged call equation: unpack the body and interpret.
pub(crate) fn eval_jit_call(
    args: &[Tracer],
    sub_jaxprs: &[Jaxpr],
) -> Result<Vec<Tracer>, CoreError> {
    let sub = sub_jaxprs
        .first()
        .ok_or_else(|| CoreError::shape("jit", "call equation without a body"))?;
    let values = args
        .iter()
        .map(Tracer::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = eval_jaxpr(sub, &[], &values)?;
    Ok(outputs.into_iter().map(Tracer::concrete).collect())
}

fn resolve_value(atom: &Atom, env: &FxHashMap<VarId, Value>) -> Result<Value, CoreError> {
    match atom {
        Atom::Var(var) => env
            .get(&var.id)
            .cloned()
            .ok_or_else(|| CoreError::shape("jaxpr", format!("unbound var v{}", var.id.0))),
        Atom::Lit(lit) => Ok(Value::Scalar(*lit)),
    }
}

fn resolve_tracer(atom: &Atom, env: &FxHashMap<VarId, Tracer>) -> Result<Tracer, CoreError> {
    match atom {
        Atom::Var(var) => env
            .get(&var.id)
            .cloned()
            .ok_or_else(|| CoreError::shape("jaxpr", format!("unbound var v{}", var.id.0))),
        Atom::Lit(lit) => Ok(Tracer::concrete(Value::Scalar(*lit))),
    }
}
