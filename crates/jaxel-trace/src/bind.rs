//! `bind`: route one primitive application through the topmost relevant
//! trace.
//!
//! The topmost relevant trace is the higher of the maximum level among
//! argument tracers and the dynamic level (set during jit staging). Lower
//! arguments are lifted by the chosen trace: the jvp trace attaches zero
//! tangents, the jaxpr trace captures constants, the batching trace marks
//! arguments as axis-free. Outputs are `full_lower`-ed so a trace that is no
//! longer needed does not wrap results.

use std::cell::RefCell;
use std::rc::Rc;

use jaxel_core::{CoreError, Equation, Jaxpr, Params, Primitive, ShapedArray, Value, Var};
use smallvec::SmallVec;

use crate::eval;
use crate::registry::primitive_def;
use crate::stack::{self, MainTrace, TraceKind};
use crate::staging::JaxprBuilder;
use crate::tracer::{Tracer, TracerRepr};

pub fn bind(
    primitive: Primitive,
    args: &[Tracer],
    params: &Params,
    sub_jaxprs: &[Jaxpr],
) -> Result<Vec<Tracer>, CoreError> {
    stack::check_usable()?;
    let arg_level = args.iter().map(Tracer::level).max().unwrap_or(0);
    let top_level = arg_level.max(stack::dynamic_level().unwrap_or(0));

    let outputs = if top_level == 0 {
        process_eval(primitive, args, params, sub_jaxprs)?
    } else {
        let trace = stack::snapshot_at(top_level)?;
        match trace.kind.clone() {
            TraceKind::Eval => {
                return Err(CoreError::level("eager trace found above level 0"));
            }
            TraceKind::Jvp => process_jvp(&trace, primitive, args, params, sub_jaxprs)?,
            TraceKind::Jaxpr(builder) => {
                process_staged(&trace, &builder, primitive, args, params, sub_jaxprs)?
            }
            TraceKind::Batch { axis_size } => {
                process_batch(&trace, axis_size, primitive, args, params, sub_jaxprs)?
            }
        }
    };

    Ok(outputs.into_iter().map(Tracer::full_lower).collect())
}

/// Eager processing: every argument is concrete; run the backend kernel.
fn process_eval(
    primitive: Primitive,
    args: &[Tracer],
    params: &Params,
    sub_jaxprs: &[Jaxpr],
) -> Result<Vec<Tracer>, CoreError> {
    if primitive.name() == "jit" {
        return eval::eval_jit_call(args, sub_jaxprs);
    }

    let values = args
        .iter()
        .map(Tracer::to_value)
        .collect::<Result<Vec<Value>, _>>()?;
    let backend = eval::active_backend();
    let outputs =
        backend.execute_primitive(primitive.name(), &values, params, backend.default_device())?;
    Ok(outputs.into_iter().map(Tracer::concrete).collect())
}

fn process_jvp(
    trace: &MainTrace,
    primitive: Primitive,
    args: &[Tracer],
    params: &Params,
    sub_jaxprs: &[Jaxpr],
) -> Result<Vec<Tracer>, CoreError> {
    let def = primitive_def(primitive)?;
    let rule = def.jvp.ok_or_else(|| CoreError::MissingRule {
        primitive: primitive.name().to_owned(),
        transform: "jvp",
    })?;

    let mut primals = Vec::with_capacity(args.len());
    let mut tangents = Vec::with_capacity(args.len());
    for arg in args {
        if arg.level() == trace.level {
            let (primal, tangent) = arg.jvp_parts(trace.level, trace.id).ok_or_else(|| {
                CoreError::level("tracer from a defunct trace reached a live jvp trace")
            })?;
            primals.push(primal);
            tangents.push(tangent);
        } else {
            // Lift: constants carry zero tangents.
            primals.push(arg.clone());
            tangents.push(arg.zeros_like()?);
        }
    }

    let (primal_outs, tangent_outs) = rule(primitive, &primals, &tangents, params, sub_jaxprs)?;
    Ok(primal_outs
        .into_iter()
        .zip(tangent_outs)
        .map(|(primal, tangent)| Tracer::jvp_pair(trace.level, trace.id, primal, tangent))
        .collect())
}

fn process_staged(
    trace: &MainTrace,
    builder: &Rc<RefCell<JaxprBuilder>>,
    primitive: Primitive,
    args: &[Tracer],
    params: &Params,
    sub_jaxprs: &[Jaxpr],
) -> Result<Vec<Tracer>, CoreError> {
    // Pure-concrete applications are constant-folded through the eager path
    // rather than staged.
    if args.iter().all(|arg| arg.concrete_value().is_some()) {
        return process_eval(primitive, args, params, sub_jaxprs);
    }

    let def = primitive_def(primitive)?;

    let mut input_atoms: SmallVec<[jaxel_core::Atom; 4]> = SmallVec::with_capacity(args.len());
    {
        let mut builder = builder.borrow_mut();
        for arg in args {
            let atom = match &arg.0 {
                TracerRepr::Staged(staged) if staged.level == trace.level => {
                    if staged.trace_id != trace.id {
                        return Err(CoreError::level(
                            "tracer from a defunct trace reached a live staging trace",
                        ));
                    }
                    jaxel_core::Atom::Var(staged.var.clone())
                }
                _ if arg.level() == trace.level => {
                    return Err(CoreError::level(
                        "non-staged tracer owned by the staging level",
                    ));
                }
                _ => match arg.concrete_value() {
                    Some(Value::Scalar(lit)) => jaxel_core::Atom::Lit(*lit),
                    _ => jaxel_core::Atom::Var(builder.add_const(arg)?),
                },
            };
            input_atoms.push(atom);
        }
    }

    let in_avals: Vec<ShapedArray> = input_atoms.iter().map(jaxel_core::Atom::aval).collect();
    let out_avals = (def.abstract_eval)(&in_avals, params, sub_jaxprs)?;

    let mut builder_ref = builder.borrow_mut();
    let out_vars: Vec<Var> = out_avals
        .into_iter()
        .map(|aval| builder_ref.fresh_var(aval))
        .collect();
    builder_ref.push_equation(Equation {
        primitive,
        inputs: input_atoms,
        outputs: out_vars.iter().cloned().collect(),
        params: params.clone(),
        sub_jaxprs: sub_jaxprs.to_vec(),
    });
    drop(builder_ref);

    Ok(out_vars
        .into_iter()
        .map(|var| Tracer::staged(trace.level, trace.id, var, Rc::downgrade(builder)))
        .collect())
}

fn process_batch(
    trace: &MainTrace,
    axis_size: usize,
    primitive: Primitive,
    args: &[Tracer],
    params: &Params,
    sub_jaxprs: &[Jaxpr],
) -> Result<Vec<Tracer>, CoreError> {
    let def = primitive_def(primitive)?;
    let rule = def.batch.ok_or_else(|| CoreError::MissingRule {
        primitive: primitive.name().to_owned(),
        transform: "vmap",
    })?;

    let mut values = Vec::with_capacity(args.len());
    let mut dims = Vec::with_capacity(args.len());
    for arg in args {
        if arg.level() == trace.level {
            let (value, bdim) = arg.batch_parts(trace.level, trace.id).ok_or_else(|| {
                CoreError::level("tracer from a defunct trace reached a live batching trace")
            })?;
            if let Some(axis) = bdim {
                let full = value.aval()?;
                if full.shape.dims.get(axis).copied() != Some(axis_size as u32) {
                    return Err(CoreError::shape(
                        primitive.name(),
                        format!(
                            "batched axis {axis} of {full} does not match batch size {axis_size}"
                        ),
                    ));
                }
            }
            values.push(value);
            dims.push(bdim);
        } else {
            values.push(arg.clone());
            dims.push(None);
        }
    }

    let (out_values, out_dims) = rule(primitive, &values, &dims, axis_size, params, sub_jaxprs)?;
    Ok(out_values
        .into_iter()
        .zip(out_dims)
        .map(|(value, bdim)| Tracer::batched(trace.level, trace.id, value, bdim))
        .collect())
}
