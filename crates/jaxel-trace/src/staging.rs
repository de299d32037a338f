//! Jaxpr staging: run a function on staged tracers and record every bind as
//! an equation.
//!
//! Each input becomes a fresh binder; free constants referenced by the body
//! are captured as constvars (deduplicated, scalars inlined as literals).
//! Binder ids count up from zero in definition order, so the produced jaxpr
//! is byte-for-byte deterministic for a given function and input signature.

use std::cell::RefCell;
use std::rc::Rc;

use jaxel_core::{
    Atom, ClosedJaxpr, CoreError, Equation, Jaxpr, ShapedArray, Value, Var, VarId,
};

use crate::stack;
use crate::tracer::{ConstKey, Tracer, TracerRepr};

/// A flat traceable function: tracers in, tracers out.
pub type FlatFn<'a> = &'a dyn Fn(&[Tracer]) -> Result<Vec<Tracer>, CoreError>;

#[derive(Debug)]
pub struct JaxprBuilder {
    next_id: u32,
    invars: Vec<Var>,
    constvars: Vec<Var>,
    consts: Vec<Tracer>,
    const_keys: Vec<ConstKey>,
    equations: Vec<Equation>,
}

impl JaxprBuilder {
    fn new() -> Self {
        Self {
            next_id: 0,
            invars: Vec::new(),
            constvars: Vec::new(),
            consts: Vec::new(),
            const_keys: Vec::new(),
            equations: Vec::new(),
        }
    }

    pub(crate) fn fresh_var(&mut self, aval: ShapedArray) -> Var {
        let var = Var::new(VarId(self.next_id), aval);
        self.next_id += 1;
        var
    }

    fn new_arg(&mut self, aval: ShapedArray) -> Var {
        let var = self.fresh_var(aval);
        self.invars.push(var.clone());
        var
    }

    /// Capture a value free in the traced body, deduplicating repeats.
    pub(crate) fn add_const(&mut self, tracer: &Tracer) -> Result<Var, CoreError> {
        let key = tracer.const_key();
        if let Some(position) = self.const_keys.iter().position(|existing| *existing == key) {
            return Ok(self.constvars[position].clone());
        }
        let var = self.fresh_var(tracer.aval()?);
        self.constvars.push(var.clone());
        self.consts.push(tracer.clone());
        self.const_keys.push(key);
        Ok(var)
    }

    pub(crate) fn push_equation(&mut self, equation: Equation) {
        self.equations.push(equation);
    }
}

/// Trace `f` at the given input types, returning the jaxpr and the captured
/// constants. Constants are tracers: concrete at the top level, but possibly
/// tracers of an enclosing trace when staging happens inside one (a `jit`
/// under `grad`, for example).
pub fn stage_function(
    f: FlatFn<'_>,
    in_avals: &[ShapedArray],
) -> Result<(Jaxpr, Vec<Tracer>), CoreError> {
    let builder_rc = Rc::new(RefCell::new(JaxprBuilder::new()));
    let guard = stack::push_jaxpr_trace(builder_rc.clone());
    let (level, trace_id) = (guard.level(), guard.id());

    let in_tracers: Vec<Tracer> = in_avals
        .iter()
        .map(|aval| {
            let var = builder_rc.borrow_mut().new_arg(aval.clone());
            Tracer::staged(level, trace_id, var, Rc::downgrade(&builder_rc))
        })
        .collect();

    let dynamic = stack::set_dynamic(level);
    let result = f(&in_tracers);
    drop(dynamic);
    drop(guard);
    let outs = result?;

    let mut out_atoms = Vec::with_capacity(outs.len());
    {
        let mut builder = builder_rc.borrow_mut();
        for out in &outs {
            let atom = match &out.0 {
                TracerRepr::Staged(staged) if staged.trace_id == trace_id => {
                    Atom::Var(staged.var.clone())
                }
                _ => match out.concrete_value() {
                    Some(Value::Scalar(lit)) => Atom::Lit(*lit),
                    _ => Atom::Var(builder.add_const(out)?),
                },
            };
            out_atoms.push(atom);
        }
    }

    let builder = Rc::try_unwrap(builder_rc)
        .map(RefCell::into_inner)
        .map_err(|_| CoreError::level("staging builder still referenced after trace pop"))?;

    let jaxpr = Jaxpr::new(builder.invars, builder.constvars, builder.equations, out_atoms);
    Ok((jaxpr, builder.consts))
}

/// Trace `f` at the top level, where every captured constant must be a
/// concrete array, producing a closed jaxpr.
pub fn stage_closed(f: FlatFn<'_>, in_avals: &[ShapedArray]) -> Result<ClosedJaxpr, CoreError> {
    let (jaxpr, const_tracers) = stage_function(f, in_avals)?;
    let consts = const_tracers
        .iter()
        .map(Tracer::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ClosedJaxpr::new(jaxpr, consts))
}
