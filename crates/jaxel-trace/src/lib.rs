#![forbid(unsafe_code)]

//! The interpreter stack and tracing machinery: `bind`, tracers, the
//! primitive registry, jaxpr staging, jaxpr interpretation, and partial
//! evaluation.

mod bind;
mod eval;
mod partial_eval;
mod registry;
mod stack;
mod staging;
mod tracer;

pub use bind::bind;
pub use eval::{active_backend, eval_closed_jaxpr, eval_jaxpr, eval_jaxpr_traced};
pub use partial_eval::{PartialEvalSplit, partial_eval_jaxpr};
pub use registry::{
    AbstractEvalRule, BatchRule, JvpRule, PrimitiveDef, TransposeInput, TransposeRule,
    primitive_def, register_primitive,
};
pub use stack::{
    DynamicGuard, TraceGuard, in_staging_context, push_batch_trace, push_jvp_trace,
};
pub use staging::{FlatFn, stage_closed, stage_function};
pub use tracer::Tracer;
