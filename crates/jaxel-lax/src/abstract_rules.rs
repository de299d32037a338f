//! Abstract evaluation (shape/dtype inference) for the builtin primitives.
//!
//! Broadcasting is trailing-axis aligned: equal extents match, an extent of
//! 1 stretches, anything else is a `ShapeMismatch`. Dtypes join on the
//! promotion lattice.

use jaxel_core::{
    CoreError, DType, Jaxpr, Params, Shape, ShapedArray, decode_u32_list, decode_usize_list,
};

fn expect_arity<'a>(
    primitive: &str,
    in_avals: &'a [ShapedArray],
    expected: usize,
) -> Result<&'a [ShapedArray], CoreError> {
    if in_avals.len() != expected {
        return Err(CoreError::shape(
            primitive,
            format!("expected {expected} inputs, got {}", in_avals.len()),
        ));
    }
    Ok(in_avals)
}

fn require_numeric(primitive: &str, aval: &ShapedArray) -> Result<(), CoreError> {
    if aval.dtype == DType::Bool {
        return Err(CoreError::dtype(primitive, "boolean operand in arithmetic"));
    }
    Ok(())
}

fn broadcast_shapes(
    primitive: &str,
    lhs: &ShapedArray,
    rhs: &ShapedArray,
) -> Result<Shape, CoreError> {
    lhs.shape.broadcast_with(&rhs.shape).ok_or_else(|| {
        CoreError::shape(
            primitive,
            format!("cannot broadcast {} with {}", lhs.shape, rhs.shape),
        )
    })
}

pub(crate) fn binary_arith(
    in_avals: &[ShapedArray],
    _params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("binary", in_avals, 2)?;
    require_numeric("binary", &avals[0])?;
    require_numeric("binary", &avals[1])?;
    let shape = broadcast_shapes("binary", &avals[0], &avals[1])?;
    let dtype = avals[0].dtype.promote(avals[1].dtype);
    Ok(vec![ShapedArray::new(dtype, shape)])
}

pub(crate) fn div(
    in_avals: &[ShapedArray],
    _params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("div", in_avals, 2)?;
    require_numeric("div", &avals[0])?;
    require_numeric("div", &avals[1])?;
    let shape = broadcast_shapes("div", &avals[0], &avals[1])?;
    let promoted = avals[0].dtype.promote(avals[1].dtype);
    // True division of integers yields floats.
    let dtype = if promoted.is_float() || promoted.is_complex() {
        promoted
    } else {
        DType::F64
    };
    Ok(vec![ShapedArray::new(dtype, shape)])
}

pub(crate) fn unary_same(
    in_avals: &[ShapedArray],
    _params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("unary", in_avals, 1)?;
    require_numeric("unary", &avals[0])?;
    Ok(vec![avals[0].clone()])
}

pub(crate) fn unary_float(
    in_avals: &[ShapedArray],
    _params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("unary", in_avals, 1)?;
    require_numeric("unary", &avals[0])?;
    if avals[0].dtype.is_complex() {
        return Err(CoreError::dtype("unary", "complex operand unsupported"));
    }
    let dtype = if avals[0].dtype.is_float() {
        avals[0].dtype
    } else {
        DType::F64
    };
    Ok(vec![ShapedArray::new(dtype, avals[0].shape.clone())])
}

pub(crate) fn ordered_compare(
    in_avals: &[ShapedArray],
    _params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("compare", in_avals, 2)?;
    if avals[0].dtype.is_complex() || avals[1].dtype.is_complex() {
        return Err(CoreError::dtype("compare", "complex operands are unordered"));
    }
    let shape = broadcast_shapes("compare", &avals[0], &avals[1])?;
    Ok(vec![ShapedArray::new(DType::Bool, shape)])
}

pub(crate) fn equality_compare(
    in_avals: &[ShapedArray],
    _params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("equal", in_avals, 2)?;
    let shape = broadcast_shapes("equal", &avals[0], &avals[1])?;
    Ok(vec![ShapedArray::new(DType::Bool, shape)])
}

pub(crate) fn dot(
    in_avals: &[ShapedArray],
    _params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("dot", in_avals, 2)?;
    require_numeric("dot", &avals[0])?;
    require_numeric("dot", &avals[1])?;
    if avals[0].shape.rank() != 1 || avals[1].shape.rank() != 1 {
        return Err(CoreError::shape("dot", "expected two rank-1 operands"));
    }
    if avals[0].shape != avals[1].shape {
        return Err(CoreError::shape(
            "dot",
            format!("operand lengths differ: {} vs {}", avals[0].shape, avals[1].shape),
        ));
    }
    let dtype = avals[0].dtype.promote(avals[1].dtype);
    Ok(vec![ShapedArray::scalar(dtype)])
}

pub(crate) fn matmul(
    in_avals: &[ShapedArray],
    _params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("matmul", in_avals, 2)?;
    require_numeric("matmul", &avals[0])?;
    require_numeric("matmul", &avals[1])?;
    let (a, b) = (&avals[0].shape, &avals[1].shape);
    if a.rank() < 2 || b.rank() < 2 {
        return Err(CoreError::shape("matmul", "expected operands of rank >= 2"));
    }
    let (a_batch, a_mat) = a.dims.split_at(a.rank() - 2);
    let (b_batch, b_mat) = b.dims.split_at(b.rank() - 2);
    if a_mat[1] != b_mat[0] {
        return Err(CoreError::shape(
            "matmul",
            format!("contracted extents differ: {} vs {}", a_mat[1], b_mat[0]),
        ));
    }
    let batch = Shape {
        dims: a_batch.to_vec(),
    }
    .broadcast_with(&Shape {
        dims: b_batch.to_vec(),
    })
    .ok_or_else(|| CoreError::shape("matmul", "stacked dimensions do not broadcast"))?;

    let mut dims = batch.dims;
    dims.push(a_mat[0]);
    dims.push(b_mat[1]);
    let dtype = avals[0].dtype.promote(avals[1].dtype);
    Ok(vec![ShapedArray::new(dtype, Shape { dims })])
}

/// Axes named by the `axes` parameter, defaulting to all axes, checked
/// in-bounds and deduplicated.
pub(crate) fn reduce_axes(
    primitive: &str,
    params: &Params,
    rank: usize,
) -> Result<Vec<usize>, CoreError> {
    let mut axes = match params.get("axes") {
        Some(raw) => decode_usize_list(raw)
            .ok_or_else(|| CoreError::shape(primitive, "malformed axes parameter"))?,
        None => (0..rank).collect(),
    };
    axes.sort_unstable();
    axes.dedup();
    if axes.iter().any(|axis| *axis >= rank) {
        return Err(CoreError::shape(primitive, "axis out of bounds"));
    }
    Ok(axes)
}

pub(crate) fn reduce_sum(
    in_avals: &[ShapedArray],
    params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("reduce_sum", in_avals, 1)?;
    if avals[0].dtype == DType::Bool {
        return Err(CoreError::dtype("reduce_sum", "cannot sum booleans"));
    }
    let axes = reduce_axes("reduce_sum", params, avals[0].shape.rank())?;
    let dims: Vec<u32> = avals[0]
        .shape
        .dims
        .iter()
        .enumerate()
        .filter(|(axis, _)| !axes.contains(axis))
        .map(|(_, dim)| *dim)
        .collect();
    Ok(vec![ShapedArray::new(avals[0].dtype, Shape { dims })])
}

/// Decoded broadcast parameters: target shape and the (strictly increasing)
/// mapping from input axes to output axes.
pub(crate) fn broadcast_params(
    params: &Params,
    in_rank: usize,
) -> Result<(Shape, Vec<usize>), CoreError> {
    let dims = params
        .get("shape")
        .and_then(|raw| decode_u32_list(raw))
        .ok_or_else(|| CoreError::shape("broadcast_in_dim", "missing or malformed shape"))?;
    let shape = Shape { dims };
    let mapping = match params.get("broadcast_dimensions") {
        Some(raw) => decode_usize_list(raw)
            .ok_or_else(|| CoreError::shape("broadcast_in_dim", "malformed broadcast_dimensions"))?,
        None => Vec::new(),
    };
    if mapping.len() != in_rank {
        return Err(CoreError::shape(
            "broadcast_in_dim",
            "broadcast_dimensions length must equal input rank",
        ));
    }
    if mapping.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(CoreError::shape(
            "broadcast_in_dim",
            "broadcast_dimensions must be strictly increasing",
        ));
    }
    Ok((shape, mapping))
}

pub(crate) fn broadcast_in_dim(
    in_avals: &[ShapedArray],
    params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("broadcast_in_dim", in_avals, 1)?;
    let (shape, mapping) = broadcast_params(params, avals[0].shape.rank())?;
    for (axis, &out_axis) in mapping.iter().enumerate() {
        if out_axis >= shape.rank() {
            return Err(CoreError::shape("broadcast_in_dim", "mapped axis out of bounds"));
        }
        let in_dim = avals[0].shape.dims[axis];
        if in_dim != shape.dims[out_axis] && in_dim != 1 {
            return Err(CoreError::shape(
                "broadcast_in_dim",
                "input extent must match output extent or be 1",
            ));
        }
    }
    Ok(vec![ShapedArray::new(avals[0].dtype, shape)])
}

/// Decoded permutation, defaulting to axis reversal.
pub(crate) fn transpose_permutation(params: &Params, rank: usize) -> Result<Vec<usize>, CoreError> {
    let permutation = match params.get("permutation") {
        Some(raw) => decode_usize_list(raw)
            .ok_or_else(|| CoreError::shape("transpose", "malformed permutation"))?,
        None => (0..rank).rev().collect(),
    };
    if permutation.len() != rank {
        return Err(CoreError::shape(
            "transpose",
            "permutation length must equal rank",
        ));
    }
    let mut seen = vec![false; rank];
    for &axis in &permutation {
        if axis >= rank || seen[axis] {
            return Err(CoreError::shape("transpose", "invalid permutation"));
        }
        seen[axis] = true;
    }
    Ok(permutation)
}

pub(crate) fn transpose(
    in_avals: &[ShapedArray],
    params: &Params,
    _subs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let avals = expect_arity("transpose", in_avals, 1)?;
    let permutation = transpose_permutation(params, avals[0].shape.rank())?;
    let dims: Vec<u32> = permutation
        .iter()
        .map(|&axis| avals[0].shape.dims[axis])
        .collect();
    Ok(vec![ShapedArray::new(avals[0].dtype, Shape { dims })])
}

#[cfg(test)]
mod tests {
    use super::{binary_arith, div, matmul, reduce_sum, unary_float};
    use jaxel_core::{CoreError, DType, Params, Shape, ShapedArray};

    fn aval(dtype: DType, dims: &[u32]) -> ShapedArray {
        ShapedArray::new(dtype, Shape::from_dims(dims))
    }

    #[test]
    fn add_promotes_weak_integer_literals_to_float() {
        let out = binary_arith(
            &[aval(DType::F32, &[2, 3]), ShapedArray::scalar(DType::I64)],
            &Params::new(),
            &[],
        )
        .unwrap();
        assert_eq!(out, vec![aval(DType::F32, &[2, 3])]);
    }

    #[test]
    fn add_rejects_incompatible_extents() {
        let err = binary_arith(
            &[aval(DType::F64, &[2, 3]), aval(DType::F64, &[4])],
            &Params::new(),
            &[],
        )
        .expect_err("4 does not broadcast with 3");
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn add_rejects_booleans() {
        let err = binary_arith(
            &[ShapedArray::scalar(DType::Bool), ShapedArray::scalar(DType::I64)],
            &Params::new(),
            &[],
        )
        .expect_err("bool arithmetic");
        assert!(matches!(err, CoreError::DTypeMismatch { .. }));
    }

    #[test]
    fn integer_division_types_as_float() {
        let out = div(
            &[ShapedArray::scalar(DType::I64), ShapedArray::scalar(DType::I32)],
            &Params::new(),
            &[],
        )
        .unwrap();
        assert_eq!(out[0].dtype, DType::F64);
    }

    #[test]
    fn transcendentals_promote_integers_and_keep_floats() {
        let out = unary_float(&[ShapedArray::scalar(DType::I64)], &Params::new(), &[]).unwrap();
        assert_eq!(out[0].dtype, DType::F64);
        let out = unary_float(&[ShapedArray::scalar(DType::F32)], &Params::new(), &[]).unwrap();
        assert_eq!(out[0].dtype, DType::F32);
    }

    #[test]
    fn reduce_sum_axes_shape() {
        let mut params = Params::new();
        params.insert("axes".to_owned(), "0".to_owned());
        let out = reduce_sum(&[aval(DType::F64, &[2, 3])], &params, &[]).unwrap();
        assert_eq!(out[0].shape.dims, vec![3]);

        // Empty axes list is the identity.
        params.insert("axes".to_owned(), String::new());
        let out = reduce_sum(&[aval(DType::F64, &[2, 3])], &params, &[]).unwrap();
        assert_eq!(out[0].shape.dims, vec![2, 3]);

        // Absent axes means all axes.
        let out = reduce_sum(&[aval(DType::F64, &[2, 3])], &Params::new(), &[]).unwrap();
        assert!(out[0].shape.is_scalar());
    }

    #[test]
    fn matmul_broadcasts_stacked_dims() {
        let out = matmul(
            &[aval(DType::F32, &[5, 2, 3]), aval(DType::F32, &[3, 4])],
            &Params::new(),
            &[],
        )
        .unwrap();
        assert_eq!(out[0].shape.dims, vec![5, 2, 4]);

        let err = matmul(
            &[aval(DType::F32, &[2, 3]), aval(DType::F32, &[2, 4])],
            &Params::new(),
            &[],
        )
        .expect_err("contraction mismatch");
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    }
}
