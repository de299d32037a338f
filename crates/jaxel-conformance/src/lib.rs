#![forbid(unsafe_code)]

//! Shared helpers for the conformance suites.

use jaxel_api::tree::Tree;
use jaxel_api::{CoreError, Tracer};

/// Extract the f64 payload of a scalar leaf, `NaN` when anything is off so
/// assertions fail loudly.
#[must_use]
pub fn leaf_f64(tree: &Tree<Tracer>) -> f64 {
    tree.as_leaf()
        .and_then(|leaf| leaf.to_value().ok())
        .and_then(|value| value.as_f64_scalar())
        .unwrap_or(f64::NAN)
}

/// Extract the flattened f64 elements of a leaf tensor.
pub fn leaf_elements(tree: &Tree<Tracer>) -> Result<Vec<f64>, CoreError> {
    let leaf = tree
        .as_leaf()
        .ok_or_else(|| CoreError::pytree("expected a leaf"))?;
    leaf.to_value()?
        .to_f64_vec()
        .ok_or_else(|| CoreError::dtype("conformance", "non-float elements"))
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} within {tolerance}, got {actual}"
    );
}

#[cfg(test)]
mod tests {
    use super::{assert_close, leaf_f64};
    use jaxel_api::Tracer;
    use jaxel_api::tree::Tree;

    #[test]
    fn leaf_extraction_reads_scalars() {
        let tree = Tree::Leaf(Tracer::scalar_f64(2.5));
        assert_close(leaf_f64(&tree), 2.5, 0.0);
    }

    #[test]
    fn leaf_extraction_is_nan_on_structure() {
        let tree: Tree<Tracer> = Tree::Seq(vec![]);
        assert!(leaf_f64(&tree).is_nan());
    }
}
