//! Process-wide primitive registry.
//!
//! Each registered primitive carries its rule table: abstract evaluation,
//! forward-mode (jvp), transposition (only for primitives linear in a subset
//! of their inputs), and batching. The eager `impl` rule is not stored here:
//! the backend supplies it per primitive name. The registry is append-only;
//! registering a primitive after initialisation is permitted as long as its
//! rule table is complete before first use.

use std::sync::{Arc, OnceLock, RwLock};

use jaxel_core::{CoreError, Jaxpr, Params, Primitive, ShapedArray};

use crate::tracer::Tracer;

/// Shape/dtype inference for one primitive application.
pub type AbstractEvalRule =
    fn(&[ShapedArray], &Params, &[Jaxpr]) -> Result<Vec<ShapedArray>, CoreError>;

/// Forward-mode rule: maps primals and tangents to output primals and
/// tangents. Rules receive the primitive they were invoked for (several
/// primitives share one generic rule) and apply primitives through `bind`,
/// so they compose with whatever traces remain on the stack.
pub type JvpRule = fn(
    Primitive,
    &[Tracer],
    &[Tracer],
    &Params,
    &[Jaxpr],
) -> Result<(Vec<Tracer>, Vec<Tracer>), CoreError>;

/// One input of an equation as seen by a transpose rule.
#[derive(Debug, Clone)]
pub enum TransposeInput {
    /// Non-linear operand whose forward value is available.
    Known(Tracer),
    /// Linear operand; only its type is known during the backward pass.
    Linear(ShapedArray),
}

impl TransposeInput {
    #[must_use]
    pub fn is_linear(&self) -> bool {
        matches!(self, Self::Linear(_))
    }
}

/// Transposition rule: given output cotangents and the equation inputs,
/// produce a cotangent contribution for each linear input (`None` for
/// non-linear inputs).
pub type TransposeRule = fn(
    Primitive,
    &[Tracer],
    &[TransposeInput],
    &Params,
    &[Jaxpr],
) -> Result<Vec<Option<Tracer>>, CoreError>;

/// Batching rule: maps values and their batch axes to output values and
/// output batch axes.
pub type BatchRule = fn(
    Primitive,
    &[Tracer],
    &[Option<usize>],
    usize,
    &Params,
    &[Jaxpr],
) -> Result<(Vec<Tracer>, Vec<Option<usize>>), CoreError>;

#[derive(Debug)]
pub struct PrimitiveDef {
    pub name: &'static str,
    pub abstract_eval: AbstractEvalRule,
    pub jvp: Option<JvpRule>,
    pub transpose: Option<TransposeRule>,
    pub batch: Option<BatchRule>,
    /// Indices of inputs this primitive is linear in; transpose rules are
    /// defined only for these. Empty for non-linear primitives.
    pub linear_inputs: &'static [usize],
}

fn rules() -> &'static RwLock<Vec<Option<Arc<PrimitiveDef>>>> {
    static RULES: OnceLock<RwLock<Vec<Option<Arc<PrimitiveDef>>>>> = OnceLock::new();
    RULES.get_or_init(|| RwLock::new(Vec::new()))
}

/// Register a primitive, interning its name. Re-registering a name replaces
/// its rule table (used only before first use).
pub fn register_primitive(def: PrimitiveDef) -> Primitive {
    let primitive = Primitive::intern(def.name);
    let mut guard = rules()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let index = primitive.index();
    if guard.len() <= index {
        guard.resize_with(index + 1, || None);
    }
    guard[index] = Some(Arc::new(def));
    primitive
}

/// Look up the rule table for a primitive.
pub fn primitive_def(primitive: Primitive) -> Result<Arc<PrimitiveDef>, CoreError> {
    let guard = rules()
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    guard
        .get(primitive.index())
        .and_then(Option::as_ref)
        .cloned()
        .ok_or_else(|| CoreError::MissingRule {
            primitive: primitive.name().to_owned(),
            transform: "registration",
        })
}
