//! Tracers: IR-side stand-ins for values, owned by a trace.
//!
//! A tracer is a single tagged value. Eager tracers wrap concrete backend
//! values; jvp tracers wrap a (primal, tangent) pair; staged tracers wrap a
//! binder identity in an in-progress jaxpr; batching tracers wrap a value
//! and an optional batch axis. Concrete tracers live at level 0; every other
//! payload records the level and identity of its owning trace.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use jaxel_core::{Aval, CoreError, Shape, ShapedArray, Value, Var};

use crate::staging::JaxprBuilder;

#[derive(Debug, Clone)]
pub struct Tracer(pub(crate) TracerRepr);

#[derive(Debug, Clone)]
pub(crate) enum TracerRepr {
    Concrete(Value),
    Jvp(Rc<JvpPair>),
    Staged(Rc<StagedVar>),
    Batched(Rc<BatchedVal>),
}

#[derive(Debug)]
pub(crate) struct JvpPair {
    pub level: usize,
    pub trace_id: u64,
    pub primal: Tracer,
    pub tangent: Tracer,
}

#[derive(Debug)]
pub(crate) struct StagedVar {
    pub level: usize,
    pub trace_id: u64,
    pub var: Var,
    pub builder: Weak<RefCell<JaxprBuilder>>,
}

#[derive(Debug)]
pub(crate) struct BatchedVal {
    pub level: usize,
    pub trace_id: u64,
    pub value: Tracer,
    pub bdim: Option<usize>,
}

/// Identity of a captured constant, used to deduplicate constvars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConstKey {
    ByValue(Value),
    ByIdentity(usize),
}

impl Tracer {
    #[must_use]
    pub fn concrete(value: Value) -> Self {
        Self(TracerRepr::Concrete(value))
    }

    #[must_use]
    pub fn scalar_f64(value: f64) -> Self {
        Self::concrete(Value::scalar_f64(value))
    }

    #[must_use]
    pub fn scalar_i64(value: i64) -> Self {
        Self::concrete(Value::scalar_i64(value))
    }

    /// Pair a primal with a tangent under the jvp trace `(level, trace_id)`.
    #[must_use]
    pub fn jvp_pair(level: usize, trace_id: u64, primal: Tracer, tangent: Tracer) -> Self {
        Self(TracerRepr::Jvp(Rc::new(JvpPair {
            level,
            trace_id,
            primal,
            tangent,
        })))
    }

    /// Attach a batch axis under the batching trace `(level, trace_id)`.
    #[must_use]
    pub fn batched(level: usize, trace_id: u64, value: Tracer, bdim: Option<usize>) -> Self {
        Self(TracerRepr::Batched(Rc::new(BatchedVal {
            level,
            trace_id,
            value,
            bdim,
        })))
    }

    pub(crate) fn staged(
        level: usize,
        trace_id: u64,
        var: Var,
        builder: Weak<RefCell<JaxprBuilder>>,
    ) -> Self {
        Self(TracerRepr::Staged(Rc::new(StagedVar {
            level,
            trace_id,
            var,
            builder,
        })))
    }

    pub(crate) fn level(&self) -> usize {
        match &self.0 {
            TracerRepr::Concrete(_) => 0,
            TracerRepr::Jvp(pair) => pair.level,
            TracerRepr::Staged(staged) => staged.level,
            TracerRepr::Batched(batched) => batched.level,
        }
    }

    /// The static type of the value this tracer stands for. For a batching
    /// tracer this is the per-example type (batch axis removed).
    pub fn aval(&self) -> Result<ShapedArray, CoreError> {
        match &self.0 {
            TracerRepr::Concrete(value) => Ok(ShapedArray::of_value(value)),
            TracerRepr::Jvp(pair) => pair.primal.aval(),
            TracerRepr::Staged(staged) => Ok(staged.var.aval.clone()),
            TracerRepr::Batched(batched) => {
                let full = batched.value.aval()?;
                match batched.bdim {
                    None => Ok(full),
                    Some(axis) => {
                        if axis >= full.shape.rank() {
                            return Err(CoreError::level(format!(
                                "batch axis {axis} out of bounds for {full}"
                            )));
                        }
                        let mut dims = full.shape.dims.clone();
                        dims.remove(axis);
                        Ok(ShapedArray::new(full.dtype, Shape { dims }))
                    }
                }
            }
        }
    }

    /// Abstract value including the concrete payload when this tracer is a
    /// constant. Only constants fold during staging.
    pub fn full_aval(&self) -> Result<Aval, CoreError> {
        match &self.0 {
            TracerRepr::Concrete(value) => Ok(Aval::concrete(value.clone())),
            _ => Ok(Aval::shaped(self.aval()?)),
        }
    }

    /// The concrete value, when this tracer is an eager one.
    #[must_use]
    pub fn concrete_value(&self) -> Option<&Value> {
        match &self.0 {
            TracerRepr::Concrete(value) => Some(value),
            _ => None,
        }
    }

    /// Extract the concrete value or fail: tracers owned by live traces are
    /// not values.
    pub fn to_value(&self) -> Result<Value, CoreError> {
        self.concrete_value().cloned().ok_or_else(|| {
            CoreError::level("expected a concrete value, found a tracer owned by a live trace")
        })
    }

    /// Split a jvp tracer owned by the given trace into (primal, tangent).
    #[must_use]
    pub fn jvp_parts(&self, level: usize, trace_id: u64) -> Option<(Tracer, Tracer)> {
        match &self.0 {
            TracerRepr::Jvp(pair) if pair.level == level && pair.trace_id == trace_id => {
                Some((pair.primal.clone(), pair.tangent.clone()))
            }
            _ => None,
        }
    }

    /// Split a batching tracer owned by the given trace into
    /// (value, batch axis).
    #[must_use]
    pub fn batch_parts(&self, level: usize, trace_id: u64) -> Option<(Tracer, Option<usize>)> {
        match &self.0 {
            TracerRepr::Batched(batched)
                if batched.level == level && batched.trace_id == trace_id =>
            {
                Some((batched.value.clone(), batched.bdim))
            }
            _ => None,
        }
    }

    /// Unbox trivial wrappers: a batched tracer with no batch axis is just
    /// its payload.
    #[must_use]
    pub fn full_lower(self) -> Self {
        match &self.0 {
            TracerRepr::Batched(batched) if batched.bdim.is_none() => {
                batched.value.clone().full_lower()
            }
            _ => self,
        }
    }

    pub(crate) fn const_key(&self) -> ConstKey {
        match &self.0 {
            TracerRepr::Concrete(value) => ConstKey::ByValue(value.clone()),
            TracerRepr::Jvp(rc) => ConstKey::ByIdentity(Rc::as_ptr(rc) as usize),
            TracerRepr::Staged(rc) => ConstKey::ByIdentity(Rc::as_ptr(rc) as usize),
            TracerRepr::Batched(rc) => ConstKey::ByIdentity(Rc::as_ptr(rc) as usize),
        }
    }

    /// A zero constant of the same type as this tracer.
    pub fn zeros_like(&self) -> Result<Tracer, CoreError> {
        let aval = self.aval()?;
        Ok(Self::concrete(aval.zeros_value()?))
    }
}

impl From<Value> for Tracer {
    fn from(value: Value) -> Self {
        Self::concrete(value)
    }
}
