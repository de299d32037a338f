#![forbid(unsafe_code)]

//! `vmap`: automatic batching.
//!
//! Inputs are mapped along the axes given by `in_axes`; the function runs
//! under a fresh batching trace whose tracers carry the batch axis; outputs
//! have their batch axis moved to `out_axes` (inserting transposes), and
//! unbatched outputs are broadcast across the batch.

use std::cell::RefCell;

use jaxel_core::CoreError;
use jaxel_lax::ops;
use jaxel_trace::{FlatFn, Tracer, push_batch_trace};
use jaxel_tree::{Tree, TreeDef, flatten, unflatten};

/// Mapped axes for the arguments of a `vmap`-ed function.
#[derive(Debug, Clone)]
pub enum AxesSpec {
    /// One axis for every argument (`None` marks an unmapped argument).
    Uniform(Option<usize>),
    /// One axis per argument.
    PerArg(Vec<Option<usize>>),
}

#[derive(Debug, Clone)]
pub struct VmapOptions {
    pub in_axes: AxesSpec,
    pub out_axes: usize,
}

impl Default for VmapOptions {
    fn default() -> Self {
        Self {
            in_axes: AxesSpec::Uniform(Some(0)),
            out_axes: 0,
        }
    }
}

impl AxesSpec {
    fn per_arg(&self, arg_count: usize) -> Result<Vec<Option<usize>>, CoreError> {
        match self {
            Self::Uniform(axis) => Ok(vec![*axis; arg_count]),
            Self::PerArg(axes) => {
                if axes.len() != arg_count {
                    return Err(CoreError::pytree(format!(
                        "in_axes lists {} entries for {arg_count} arguments",
                        axes.len()
                    )));
                }
                Ok(axes.clone())
            }
        }
    }
}

/// Flat-level vmap over leaf tracers.
pub fn vmap_flat(
    f: FlatFn<'_>,
    in_axes: &[Option<usize>],
    out_axes: usize,
    args: &[Tracer],
) -> Result<Vec<Tracer>, CoreError> {
    if in_axes.len() != args.len() {
        return Err(CoreError::pytree(format!(
            "in_axes lists {} entries for {} leaves",
            in_axes.len(),
            args.len()
        )));
    }

    // The batch size must agree across every mapped input.
    let mut axis_size: Option<usize> = None;
    for (arg, axis) in args.iter().zip(in_axes.iter()) {
        let Some(axis) = axis else { continue };
        let shape = arg.aval()?.shape;
        let Some(extent) = shape.dims.get(*axis).copied() else {
            return Err(CoreError::shape(
                "vmap",
                format!("mapped axis {axis} out of bounds for {shape}"),
            ));
        };
        match axis_size {
            None => axis_size = Some(extent as usize),
            Some(existing) if existing != extent as usize => {
                return Err(CoreError::shape(
                    "vmap",
                    format!("mapped axis sizes disagree: {existing} vs {extent}"),
                ));
            }
            Some(_) => {}
        }
    }
    let Some(axis_size) = axis_size else {
        return Err(CoreError::shape("vmap", "no argument is mapped"));
    };

    let guard = push_batch_trace(axis_size);
    let (level, trace_id) = (guard.level(), guard.id());
    let wrapped: Vec<Tracer> = args
        .iter()
        .zip(in_axes.iter())
        .map(|(arg, axis)| match axis {
            Some(axis) => Tracer::batched(level, trace_id, arg.clone(), Some(*axis)),
            None => arg.clone(),
        })
        .collect();
    let result = f(&wrapped);
    drop(guard);
    let outs = result?;

    outs.into_iter()
        .map(|out| match out.batch_parts(level, trace_id) {
            Some((value, Some(bdim))) => ops::moveaxis(&value, bdim, out_axes),
            Some((value, None)) => broadcast_output(&value, axis_size, out_axes),
            None => broadcast_output(&out, axis_size, out_axes),
        })
        .collect()
}

/// Insert a batch axis of size `axis_size` at `position` on an output the
/// function never batched.
fn broadcast_output(
    value: &Tracer,
    axis_size: usize,
    position: usize,
) -> Result<Tracer, CoreError> {
    let shape = value.aval()?.shape;
    if position > shape.rank() {
        return Err(CoreError::shape(
            "vmap",
            format!("out axis {position} out of bounds for {shape}"),
        ));
    }
    let mut dims = shape.dims.clone();
    dims.insert(position, axis_size as u32);
    let mapping: Vec<usize> = (0..shape.rank())
        .map(|axis| if axis < position { axis } else { axis + 1 })
        .collect();
    ops::broadcast_in_dim(value, &dims, &mapping)
}

/// A function over a slice of pytree arguments returning one pytree.
pub type TreeFn<'a> = &'a dyn Fn(&[Tree<Tracer>]) -> Result<Tree<Tracer>, CoreError>;

/// Pytree-level vmap: the per-argument axis applies to every leaf of that
/// argument.
pub fn vmap(
    f: TreeFn<'_>,
    args: &[Tree<Tracer>],
    options: &VmapOptions,
) -> Result<Tree<Tracer>, CoreError> {
    let arg_axes = options.in_axes.per_arg(args.len())?;

    let mut leaves: Vec<Tracer> = Vec::new();
    let mut leaf_axes: Vec<Option<usize>> = Vec::new();
    let mut arg_defs: Vec<TreeDef> = Vec::with_capacity(args.len());
    for (arg, axis) in args.iter().zip(arg_axes.iter()) {
        let (arg_leaves, def) = flatten(arg)?;
        leaf_axes.extend(std::iter::repeat_n(*axis, arg_leaves.len()));
        leaves.extend(arg_leaves);
        arg_defs.push(def);
    }

    let out_def: RefCell<Option<TreeDef>> = RefCell::new(None);
    let flat = |flat_args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
        let mut rebuilt = Vec::with_capacity(arg_defs.len());
        let mut remaining = flat_args.to_vec();
        for def in &arg_defs {
            let count = def.leaf_count();
            if count > remaining.len() {
                return Err(CoreError::pytree("leaf list shorter than argument structure"));
            }
            let rest = remaining.split_off(count);
            rebuilt.push(unflatten(def, remaining)?);
            remaining = rest;
        }
        let out = f(&rebuilt)?;
        let (out_leaves, def) = flatten(&out)?;
        *out_def.borrow_mut() = Some(def);
        Ok(out_leaves)
    };

    let out_leaves = vmap_flat(&flat, &leaf_axes, options.out_axes, &leaves)?;
    let def = out_def
        .into_inner()
        .ok_or_else(|| CoreError::pytree("function was never invoked during vmap"))?;
    unflatten(&def, out_leaves)
}

#[cfg(test)]
mod tests {
    use super::{AxesSpec, VmapOptions, vmap, vmap_flat};
    use jaxel_core::{CoreError, DType, Value};
    use jaxel_lax::ops;
    use jaxel_trace::Tracer;
    use jaxel_tree::Tree;

    fn matrix_2x3() -> Tracer {
        Tracer::concrete(
            Value::tensor_f64(DType::F64, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        )
    }

    fn sum_leaf(args: &[Tracer]) -> Result<Vec<Tracer>, CoreError> {
        Ok(vec![ops::reduce_sum(&args[0], None)?])
    }

    #[test]
    fn vmap_of_sum_over_rows() {
        let out = vmap_flat(&sum_leaf, &[Some(0)], 0, &[matrix_2x3()]).unwrap();
        let value = out[0].to_value().unwrap();
        assert_eq!(value.to_f64_vec().unwrap(), vec![6.0, 15.0]);
    }

    #[test]
    fn vmap_of_sum_over_columns() {
        let out = vmap_flat(&sum_leaf, &[Some(1)], 0, &[matrix_2x3()]).unwrap();
        let value = out[0].to_value().unwrap();
        assert_eq!(value.to_f64_vec().unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn vmap_matches_stacked_per_example_results() {
        let f = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            Ok(vec![ops::mul(&args[0], &args[0])?])
        };
        let out = vmap_flat(&f, &[Some(0)], 0, &[matrix_2x3()]).unwrap();
        let value = out[0].to_value().unwrap();
        assert_eq!(value.shape().dims, vec![2, 3]);
        assert_eq!(
            value.to_f64_vec().unwrap(),
            vec![1.0, 4.0, 9.0, 16.0, 25.0, 36.0]
        );
    }

    #[test]
    fn unmapped_arguments_broadcast_across_the_batch() {
        let f = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            Ok(vec![ops::add(&args[0], &args[1])?])
        };
        let bias = Tracer::scalar_f64(10.0);
        let out = vmap_flat(&f, &[Some(0), None], 0, &[matrix_2x3(), bias]).unwrap();
        let value = out[0].to_value().unwrap();
        assert_eq!(
            value.to_f64_vec().unwrap(),
            vec![11.0, 12.0, 13.0, 14.0, 15.0, 16.0]
        );
    }

    #[test]
    fn mismatched_batch_sizes_are_rejected() {
        let f = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            Ok(vec![ops::add(&args[0], &args[1])?])
        };
        let short = Tracer::concrete(Value::vector_f64(&[1.0, 2.0, 3.0]).unwrap());
        let err = vmap_flat(&f, &[Some(0), Some(0)], 0, &[matrix_2x3(), short])
            .expect_err("2 vs 3 batch sizes");
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn out_axes_moves_the_batch_axis() {
        let f = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            Ok(vec![ops::neg(&args[0])?])
        };
        let out = vmap_flat(&f, &[Some(0)], 1, &[matrix_2x3()]).unwrap();
        let value = out[0].to_value().unwrap();
        assert_eq!(value.shape().dims, vec![3, 2]);
    }

    #[test]
    fn tree_level_vmap_applies_argument_axes() {
        let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
            let Some(x) = args[0].as_leaf() else {
                return Err(CoreError::pytree("expected a leaf"));
            };
            Ok(Tree::Leaf(ops::reduce_sum(x, None)?))
        };
        let args = [Tree::Leaf(matrix_2x3())];
        let options = VmapOptions {
            in_axes: AxesSpec::Uniform(Some(1)),
            out_axes: 0,
        };
        let out = vmap(&f, &args, &options).unwrap();
        let value = out.as_leaf().unwrap().to_value().unwrap();
        assert_eq!(value.to_f64_vec().unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn nested_vmap_batches_two_axes() {
        let f = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            Ok(vec![ops::mul(&args[0], &args[0])?])
        };
        let outer = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            vmap_flat(&f, &[Some(0)], 0, args)
        };
        let out = vmap_flat(&outer, &[Some(0)], 0, &[matrix_2x3()]).unwrap();
        let value = out[0].to_value().unwrap();
        assert_eq!(value.shape().dims, vec![2, 3]);
        assert_eq!(
            value.to_f64_vec().unwrap(),
            vec![1.0, 4.0, 9.0, 16.0, 25.0, 36.0]
        );
    }
}
