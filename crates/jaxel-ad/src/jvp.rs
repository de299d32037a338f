//! Forward-mode differentiation.
//!
//! `jvp` runs a function under a fresh jvp trace with tangents attached to
//! the primals, then splits the outputs. Outputs that never touched a jvp
//! tracer get zero tangents.

use std::cell::RefCell;

use jaxel_core::CoreError;
use jaxel_trace::{FlatFn, Tracer, push_jvp_trace};
use jaxel_tree::{Tree, TreeDef, flatten, unflatten};

/// Flat-level jvp: primals and tangents leaf-by-leaf.
pub fn jvp_flat(
    f: FlatFn<'_>,
    primals: &[Tracer],
    tangents: &[Tracer],
) -> Result<(Vec<Tracer>, Vec<Tracer>), CoreError> {
    if primals.len() != tangents.len() {
        return Err(CoreError::pytree(format!(
            "jvp expects matching primal/tangent leaf counts, got {} vs {}",
            primals.len(),
            tangents.len()
        )));
    }

    let guard = push_jvp_trace();
    let (level, trace_id) = (guard.level(), guard.id());
    let paired: Vec<Tracer> = primals
        .iter()
        .zip(tangents.iter())
        .map(|(primal, tangent)| {
            Tracer::jvp_pair(level, trace_id, primal.clone(), tangent.clone())
        })
        .collect();
    let result = f(&paired);
    drop(guard);
    let outs = result?;

    let mut primal_outs = Vec::with_capacity(outs.len());
    let mut tangent_outs = Vec::with_capacity(outs.len());
    for out in outs {
        match out.jvp_parts(level, trace_id) {
            Some((primal, tangent)) => {
                primal_outs.push(primal);
                tangent_outs.push(tangent);
            }
            None => {
                let tangent = out.zeros_like()?;
                primal_outs.push(out);
                tangent_outs.push(tangent);
            }
        }
    }
    Ok((primal_outs, tangent_outs))
}

/// A function over a slice of pytree arguments returning one pytree.
pub type TreeFn<'a> = &'a dyn Fn(&[Tree<Tracer>]) -> Result<Tree<Tracer>, CoreError>;

/// Flatten a slice of argument trees into one leaf list, remembering the
/// per-argument structure.
pub(crate) fn flatten_args(
    args: &[Tree<Tracer>],
) -> Result<(Vec<Tracer>, Vec<TreeDef>), CoreError> {
    let mut leaves = Vec::new();
    let mut defs = Vec::with_capacity(args.len());
    for arg in args {
        let (arg_leaves, def) = flatten(arg)?;
        leaves.extend(arg_leaves);
        defs.push(def);
    }
    Ok((leaves, defs))
}

pub(crate) fn unflatten_args(
    defs: &[TreeDef],
    mut leaves: Vec<Tracer>,
) -> Result<Vec<Tree<Tracer>>, CoreError> {
    let mut args = Vec::with_capacity(defs.len());
    for def in defs {
        let count = def.leaf_count();
        if count > leaves.len() {
            return Err(CoreError::pytree("leaf list shorter than argument structure"));
        }
        let rest = leaves.split_off(count);
        args.push(unflatten(def, leaves)?);
        leaves = rest;
    }
    Ok(args)
}

/// Adapt a pytree function to the flat calling convention, capturing the
/// output structure on the way out.
pub(crate) struct FlattenedFn<'a> {
    pub f: TreeFn<'a>,
    pub arg_defs: Vec<TreeDef>,
    pub out_def: RefCell<Option<TreeDef>>,
}

impl<'a> FlattenedFn<'a> {
    pub fn new(f: TreeFn<'a>, arg_defs: Vec<TreeDef>) -> Self {
        Self {
            f,
            arg_defs,
            out_def: RefCell::new(None),
        }
    }

    pub fn call(&self, leaves: &[Tracer]) -> Result<Vec<Tracer>, CoreError> {
        let args = unflatten_args(&self.arg_defs, leaves.to_vec())?;
        let out = (self.f)(&args)?;
        let (out_leaves, def) = flatten(&out)?;
        if let Some(previous) = self.out_def.borrow().as_ref()
            && *previous != def
        {
            return Err(CoreError::pytree(
                "function returned different structures across traces",
            ));
        }
        *self.out_def.borrow_mut() = Some(def);
        Ok(out_leaves)
    }

    pub fn out_def(&self) -> Result<TreeDef, CoreError> {
        self.out_def
            .borrow()
            .clone()
            .ok_or_else(|| CoreError::pytree("function was never invoked during tracing"))
    }
}

/// Pytree-level jvp over a slice of arguments.
pub fn jvp(
    f: TreeFn<'_>,
    primals: &[Tree<Tracer>],
    tangents: &[Tree<Tracer>],
) -> Result<(Tree<Tracer>, Tree<Tracer>), CoreError> {
    let (primal_leaves, primal_defs) = flatten_args(primals)?;
    let (tangent_leaves, tangent_defs) = flatten_args(tangents)?;
    if primal_defs != tangent_defs {
        return Err(CoreError::pytree(
            "primal and tangent arguments have different structures",
        ));
    }

    let adapted = FlattenedFn::new(f, primal_defs);
    let flat = |leaves: &[Tracer]| adapted.call(leaves);
    let (primal_outs, tangent_outs) = jvp_flat(&flat, &primal_leaves, &tangent_leaves)?;
    let out_def = adapted.out_def()?;
    Ok((
        unflatten(&out_def, primal_outs)?,
        unflatten(&out_def, tangent_outs)?,
    ))
}
