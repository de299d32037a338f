//! User-facing primitive wrappers.
//!
//! Each wrapper applies one primitive through `bind`, so it works eagerly,
//! under differentiation and batching, and during staging. Derived helpers
//! (`moveaxis`, `unbroadcast`) compose wrappers and are used by the rule
//! tables as well as by user code.

use jaxel_core::{
    CoreError, Params, Primitive, ShapedArray, encode_u32_list, encode_usize_list,
};
use jaxel_trace::{Tracer, bind};

use crate::builtins;

fn single(mut outputs: Vec<Tracer>, primitive: Primitive) -> Result<Tracer, CoreError> {
    if outputs.len() != 1 {
        return Err(CoreError::shape(
            primitive.name(),
            format!("expected one output, got {}", outputs.len()),
        ));
    }
    Ok(outputs.remove(0))
}

fn apply(primitive: Primitive, args: &[Tracer], params: Params) -> Result<Tracer, CoreError> {
    single(bind(primitive, args, &params, &[])?, primitive)
}

macro_rules! binary_op {
    ($name:ident) => {
        pub fn $name(lhs: &Tracer, rhs: &Tracer) -> Result<Tracer, CoreError> {
            apply(builtins().$name, &[lhs.clone(), rhs.clone()], Params::new())
        }
    };
}

macro_rules! unary_op {
    ($name:ident) => {
        pub fn $name(operand: &Tracer) -> Result<Tracer, CoreError> {
            apply(builtins().$name, &[operand.clone()], Params::new())
        }
    };
}

binary_op!(add);
binary_op!(sub);
binary_op!(mul);
binary_op!(div);
binary_op!(greater);
binary_op!(less);
binary_op!(equal);
binary_op!(dot);
binary_op!(matmul);

unary_op!(neg);
unary_op!(exp);
unary_op!(log);
unary_op!(sqrt);
unary_op!(sin);
unary_op!(cos);

/// Sum over the given axes; `None` sums all axes.
pub fn reduce_sum(operand: &Tracer, axes: Option<&[usize]>) -> Result<Tracer, CoreError> {
    let mut params = Params::new();
    if let Some(axes) = axes {
        let mut axes = axes.to_vec();
        axes.sort_unstable();
        axes.dedup();
        params.insert("axes".to_owned(), encode_usize_list(&axes));
    }
    apply(builtins().reduce_sum, &[operand.clone()], params)
}

/// Materialise `operand` into `dims`, with `mapping[i]` naming the output
/// axis input axis `i` maps to.
pub fn broadcast_in_dim(
    operand: &Tracer,
    dims: &[u32],
    mapping: &[usize],
) -> Result<Tracer, CoreError> {
    let mut params = Params::new();
    params.insert("shape".to_owned(), encode_u32_list(dims));
    params.insert(
        "broadcast_dimensions".to_owned(),
        encode_usize_list(mapping),
    );
    apply(builtins().broadcast_in_dim, &[operand.clone()], params)
}

/// Permute axes; `None` reverses them.
pub fn transpose(operand: &Tracer, permutation: Option<&[usize]>) -> Result<Tracer, CoreError> {
    let mut params = Params::new();
    if let Some(permutation) = permutation {
        params.insert("permutation".to_owned(), encode_usize_list(permutation));
    }
    apply(builtins().transpose, &[operand.clone()], params)
}

/// Move one axis to a new position, leaving the rest in order.
pub fn moveaxis(operand: &Tracer, source: usize, target: usize) -> Result<Tracer, CoreError> {
    if source == target {
        return Ok(operand.clone());
    }
    let rank = operand.aval()?.shape.rank();
    if source >= rank || target >= rank {
        return Err(CoreError::shape(
            "transpose",
            format!("moveaxis {source}->{target} out of bounds for rank {rank}"),
        ));
    }
    let mut order: Vec<usize> = (0..rank).filter(|axis| *axis != source).collect();
    order.insert(target, source);
    transpose(operand, Some(&order))
}

/// Swap the two trailing axes (the matrix part of a stacked operand).
pub fn transpose_last_two(operand: &Tracer) -> Result<Tracer, CoreError> {
    let rank = operand.aval()?.shape.rank();
    if rank < 2 {
        return Err(CoreError::shape(
            "transpose",
            "expected rank >= 2 for matrix transpose",
        ));
    }
    let mut permutation: Vec<usize> = (0..rank).collect();
    permutation.swap(rank - 2, rank - 1);
    transpose(operand, Some(&permutation))
}

/// Invert broadcasting: reduce `operand` down to `target`'s shape by summing
/// the stretched axes. Used by transpose rules of elementwise primitives.
pub fn unbroadcast(operand: &Tracer, target: &ShapedArray) -> Result<Tracer, CoreError> {
    let current = operand.aval()?;
    if current.shape == target.shape {
        return Ok(operand.clone());
    }
    if current.shape.rank() < target.shape.rank() {
        return Err(CoreError::shape(
            "reduce_sum",
            format!("cannot reduce {} down to {}", current.shape, target.shape),
        ));
    }

    let lead = current.shape.rank() - target.shape.rank();
    let mut reduce_axes_list: Vec<usize> = (0..lead).collect();
    for (axis, &dim) in target.shape.dims.iter().enumerate() {
        if dim == 1 && current.shape.dims[lead + axis] != 1 {
            reduce_axes_list.push(lead + axis);
        }
    }

    let summed = reduce_sum(operand, Some(&reduce_axes_list))?;
    if summed.aval()?.shape == target.shape {
        return Ok(summed);
    }
    // Restore the size-1 axes that the reduction squeezed out.
    let kept: Vec<usize> = (0..target.shape.rank())
        .filter(|axis| !reduce_axes_list.contains(&(lead + axis)))
        .collect();
    broadcast_in_dim(&summed, &target.shape.dims, &kept)
}
