#![forbid(unsafe_code)]

//! `jit`: trace once, cache by dispatch signature, re-dispatch.
//!
//! A jit wrapper separates static arguments (compared structurally),
//! flattens the dynamic ones, and keys its bounded cache on (input
//! structure, per-leaf abstract values, static arguments). Inside another
//! tracing context it emits a `jit` call equation instead of executing, so
//! `jit` composes with `grad`, `vmap`, and other `jit`s.

mod primitive;

pub use primitive::jit_primitive;

use std::cell::RefCell;
use std::rc::Rc;

use jaxel_cache::{CacheKeyInput, LruCache, build_cache_key};
use jaxel_core::{ClosedJaxpr, CoreError, Jaxpr, Params, ShapedArray};
use jaxel_trace::{
    Tracer, active_backend, bind, eval_closed_jaxpr, in_staging_context, stage_function,
};
use jaxel_tree::{Tree, TreeDef, flatten, unflatten};

const CACHE_CAPACITY: usize = 128;
const STATIC_CHURN_THRESHOLD: u32 = 8;

/// A function over pytree arguments and static (string) arguments.
pub type StaticTreeFn =
    dyn Fn(&[Tree<Tracer>], &[String]) -> Result<Tree<Tracer>, CoreError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Set when static arguments changed on many consecutive calls. A
    /// warning condition, never a failure.
    pub static_arg_churn: bool,
}

struct CachedProgram {
    closed: ClosedJaxpr,
    out_def: TreeDef,
}

#[derive(Default)]
struct ChurnTracker {
    recent: Vec<String>,
    consecutive_fresh: u32,
    flagged: bool,
}

impl ChurnTracker {
    fn observe(&mut self, static_args: &[String]) {
        let key = static_args.join("\u{1f}");
        if self.recent.contains(&key) {
            self.consecutive_fresh = 0;
        } else {
            self.consecutive_fresh += 1;
            if self.consecutive_fresh >= STATIC_CHURN_THRESHOLD {
                self.flagged = true;
            }
        }
        self.recent.push(key);
        if self.recent.len() > 16 {
            self.recent.remove(0);
        }
    }
}

/// A jit-wrapped function.
pub struct Jit {
    name: String,
    f: Box<StaticTreeFn>,
    cache: RefCell<LruCache<Rc<CachedProgram>>>,
    hits: RefCell<u64>,
    misses: RefCell<u64>,
    churn: RefCell<ChurnTracker>,
}

impl Jit {
    /// Wrap a function with no static arguments.
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&[Tree<Tracer>]) -> Result<Tree<Tracer>, CoreError> + 'static,
    ) -> Self {
        Self::with_statics(name, move |args, _statics| f(args))
    }

    /// Wrap a function whose behavior may depend on static string arguments;
    /// each distinct static tuple compiles separately.
    pub fn with_statics(
        name: impl Into<String>,
        f: impl Fn(&[Tree<Tracer>], &[String]) -> Result<Tree<Tracer>, CoreError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Box::new(f),
            cache: RefCell::new(LruCache::new(CACHE_CAPACITY)),
            hits: RefCell::new(0),
            misses: RefCell::new(0),
            churn: RefCell::new(ChurnTracker::default()),
        }
    }

    pub fn call(&self, args: &[Tree<Tracer>]) -> Result<Tree<Tracer>, CoreError> {
        self.call_static(args, &[])
    }

    pub fn call_static(
        &self,
        args: &[Tree<Tracer>],
        static_args: &[String],
    ) -> Result<Tree<Tracer>, CoreError> {
        let mut leaves: Vec<Tracer> = Vec::new();
        let mut arg_defs: Vec<TreeDef> = Vec::with_capacity(args.len());
        for arg in args {
            let (arg_leaves, def) = flatten(arg)?;
            leaves.extend(arg_leaves);
            arg_defs.push(def);
        }
        let combined_def = TreeDef::Seq(arg_defs.clone());
        let in_avals: Vec<ShapedArray> = leaves
            .iter()
            .map(Tracer::aval)
            .collect::<Result<Vec<_>, _>>()?;

        let traced_context =
            in_staging_context() || leaves.iter().any(|leaf| leaf.concrete_value().is_none());
        if traced_context {
            return self.stage_call(&arg_defs, &in_avals, &leaves, static_args);
        }

        let key = build_cache_key(&CacheKeyInput {
            backend: active_backend().name(),
            treedef: &combined_def,
            in_avals: &in_avals,
            static_args,
        });

        let cached = self.cache.borrow_mut().get(&key).cloned();
        let program = match cached {
            Some(program) => {
                *self.hits.borrow_mut() += 1;
                program
            }
            None => {
                *self.misses.borrow_mut() += 1;
                self.churn.borrow_mut().observe(static_args);
                let (jaxpr, const_tracers, out_def) =
                    self.trace_body(&arg_defs, &in_avals, static_args)?;
                let consts = const_tracers
                    .iter()
                    .map(Tracer::to_value)
                    .collect::<Result<Vec<_>, _>>()?;
                let program = Rc::new(CachedProgram {
                    closed: ClosedJaxpr::new(jaxpr, consts),
                    out_def,
                });
                self.cache.borrow_mut().insert(key, program.clone());
                program
            }
        };

        let values = leaves
            .iter()
            .map(Tracer::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = eval_closed_jaxpr(&program.closed, &values)?;
        unflatten(
            &program.out_def,
            outputs.into_iter().map(Tracer::concrete).collect(),
        )
    }

    /// Dispatch statistics, including the static-argument churn warning.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            hits: *self.hits.borrow(),
            misses: *self.misses.borrow(),
            evictions: self.cache.borrow().evictions(),
            static_arg_churn: self.churn.borrow().flagged,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trace the wrapped function at the given input types.
    fn trace_body(
        &self,
        arg_defs: &[TreeDef],
        in_avals: &[ShapedArray],
        static_args: &[String],
    ) -> Result<(Jaxpr, Vec<Tracer>, TreeDef), CoreError> {
        let out_def: RefCell<Option<TreeDef>> = RefCell::new(None);
        let flat = |flat_args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            let mut rebuilt = Vec::with_capacity(arg_defs.len());
            let mut remaining = flat_args.to_vec();
            for def in arg_defs {
                let count = def.leaf_count();
                if count > remaining.len() {
                    return Err(CoreError::pytree(
                        "leaf list shorter than argument structure",
                    ));
                }
                let rest = remaining.split_off(count);
                rebuilt.push(unflatten(def, remaining)?);
                remaining = rest;
            }
            let out = (self.f)(&rebuilt, static_args)?;
            let (out_leaves, def) = flatten(&out)?;
            *out_def.borrow_mut() = Some(def);
            Ok(out_leaves)
        };

        let (jaxpr, const_tracers) = stage_function(&flat, in_avals)?;
        let out_def = out_def
            .into_inner()
            .ok_or_else(|| CoreError::pytree("function was never invoked during jit trace"))?;
        Ok((jaxpr, const_tracers, out_def))
    }

    /// Inside another tracing context: emit a `jit` call equation holding
    /// the traced body, with hoisted constants as leading inputs.
    fn stage_call(
        &self,
        arg_defs: &[TreeDef],
        in_avals: &[ShapedArray],
        leaves: &[Tracer],
        static_args: &[String],
    ) -> Result<Tree<Tracer>, CoreError> {
        let (jaxpr, const_tracers, out_def) = self.trace_body(arg_defs, in_avals, static_args)?;
        let num_consts = const_tracers.len();

        // Constvars become the leading inputs of the call body.
        let mut invars = jaxpr.constvars.clone();
        invars.extend(jaxpr.invars.iter().cloned());
        let body = Jaxpr::new(invars, vec![], jaxpr.equations.clone(), jaxpr.outs.clone());

        let mut params = Params::new();
        params.insert("name".to_owned(), self.name.clone());
        params.insert("num_consts".to_owned(), num_consts.to_string());

        let mut inputs = const_tracers;
        inputs.extend(leaves.iter().cloned());
        let outputs = bind(jit_primitive(), &inputs, &params, &[body])?;
        unflatten(&out_def, outputs)
    }
}

/// Convenience constructor matching the transform surface.
pub fn jit(
    name: impl Into<String>,
    f: impl Fn(&[Tree<Tracer>]) -> Result<Tree<Tracer>, CoreError> + 'static,
) -> Jit {
    Jit::new(name, f)
}
