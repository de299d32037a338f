#![forbid(unsafe_code)]

//! Pytrees: recursively nested containers with a canonical
//! flatten/unflatten pair.
//!
//! Every transformation in the core is defined on a flat list of values;
//! pytrees let user code pass arbitrarily nested state through
//! transformations without ad-hoc unpacking. Map nodes flatten with keys in
//! ascending lexicographic order, so treedef equality is robust to insertion
//! order. Custom node kinds participate through an open registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use jaxel_core::CoreError;

mod registry;

pub use registry::{is_registered_node, register_node};

/// A nested container of leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tree<T> {
    Leaf(T),
    /// Tuple-like ordered sequence.
    Seq(Vec<Tree<T>>),
    /// String-keyed mapping; flattens in ascending key order.
    Map(BTreeMap<String, Tree<T>>),
    /// A registered external node kind. `meta` is opaque node metadata that
    /// participates in treedef equality but holds no leaves.
    Custom {
        tag: String,
        meta: String,
        children: Vec<Tree<T>>,
    },
}

impl<T> Tree<T> {
    #[must_use]
    pub fn seq(children: Vec<Tree<T>>) -> Self {
        Self::Seq(children)
    }

    #[must_use]
    pub fn map(entries: impl IntoIterator<Item = (String, Tree<T>)>) -> Self {
        Self::Map(entries.into_iter().collect())
    }

    #[must_use]
    pub fn pair(first: Tree<T>, second: Tree<T>) -> Self {
        Self::Seq(vec![first, second])
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    #[must_use]
    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            Self::Leaf(value) => Some(value),
            _ => None,
        }
    }
}

/// The structure of a pytree with its leaves removed.
///
/// Two treedefs compare equal iff they were built from identical node kinds
/// and child treedefs in the same positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeDef {
    Leaf,
    Seq(Vec<TreeDef>),
    /// Entries sorted by key (the canonical order produced by `flatten`).
    Map(Vec<(String, TreeDef)>),
    Custom {
        tag: String,
        meta: String,
        children: Vec<TreeDef>,
    },
}

impl TreeDef {
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf => 1,
            Self::Seq(children) => children.iter().map(TreeDef::leaf_count).sum(),
            Self::Map(entries) => entries.iter().map(|(_, child)| child.leaf_count()).sum(),
            Self::Custom { children, .. } => children.iter().map(TreeDef::leaf_count).sum(),
        }
    }
}

/// Split a tree into its leaves (depth-first, maps in key order) and its
/// structure.
pub fn flatten<T: Clone>(tree: &Tree<T>) -> Result<(Vec<T>, TreeDef), CoreError> {
    let mut leaves = Vec::new();
    let def = flatten_into(tree, &mut leaves)?;
    Ok((leaves, def))
}

fn flatten_into<T: Clone>(tree: &Tree<T>, leaves: &mut Vec<T>) -> Result<TreeDef, CoreError> {
    match tree {
        Tree::Leaf(value) => {
            leaves.push(value.clone());
            Ok(TreeDef::Leaf)
        }
        Tree::Seq(children) => {
            let defs = children
                .iter()
                .map(|child| flatten_into(child, leaves))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TreeDef::Seq(defs))
        }
        Tree::Map(entries) => {
            // BTreeMap iterates in ascending key order.
            let defs = entries
                .iter()
                .map(|(key, child)| Ok((key.clone(), flatten_into(child, leaves)?)))
                .collect::<Result<Vec<_>, CoreError>>()?;
            Ok(TreeDef::Map(defs))
        }
        Tree::Custom {
            tag,
            meta,
            children,
        } => {
            if !is_registered_node(tag) {
                return Err(CoreError::pytree(format!(
                    "unregistered pytree node kind: {tag}"
                )));
            }
            let defs = children
                .iter()
                .map(|child| flatten_into(child, leaves))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TreeDef::Custom {
                tag: tag.clone(),
                meta: meta.clone(),
                children: defs,
            })
        }
    }
}

/// Rebuild a tree isomorphic to `def` from a flat leaf list. Fails when the
/// leaf count disagrees with `def.leaf_count()`.
pub fn unflatten<T>(def: &TreeDef, leaves: Vec<T>) -> Result<Tree<T>, CoreError> {
    let expected = def.leaf_count();
    if leaves.len() != expected {
        return Err(CoreError::pytree(format!(
            "unflatten expected {expected} leaves, got {}",
            leaves.len()
        )));
    }
    let mut iter = leaves.into_iter();
    unflatten_from(def, &mut iter)
}

fn unflatten_from<T>(
    def: &TreeDef,
    leaves: &mut impl Iterator<Item = T>,
) -> Result<Tree<T>, CoreError> {
    match def {
        TreeDef::Leaf => leaves
            .next()
            .map(Tree::Leaf)
            .ok_or_else(|| CoreError::pytree("ran out of leaves during unflatten".to_owned())),
        TreeDef::Seq(children) => {
            let rebuilt = children
                .iter()
                .map(|child| unflatten_from(child, leaves))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Tree::Seq(rebuilt))
        }
        TreeDef::Map(entries) => {
            let rebuilt = entries
                .iter()
                .map(|(key, child)| Ok((key.clone(), unflatten_from(child, leaves)?)))
                .collect::<Result<BTreeMap<_, _>, CoreError>>()?;
            Ok(Tree::Map(rebuilt))
        }
        TreeDef::Custom {
            tag,
            meta,
            children,
        } => {
            let rebuilt = children
                .iter()
                .map(|child| unflatten_from(child, leaves))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Tree::Custom {
                tag: tag.clone(),
                meta: meta.clone(),
                children: rebuilt,
            })
        }
    }
}

/// Pointwise map over the leaves of one tree.
pub fn map<T: Clone, U>(
    f: impl FnMut(&T) -> Result<U, CoreError>,
    tree: &Tree<T>,
) -> Result<Tree<U>, CoreError> {
    let mut f = f;
    map_inner(&mut f, tree)
}

fn map_inner<T: Clone, U>(
    f: &mut impl FnMut(&T) -> Result<U, CoreError>,
    tree: &Tree<T>,
) -> Result<Tree<U>, CoreError> {
    match tree {
        Tree::Leaf(value) => Ok(Tree::Leaf(f(value)?)),
        Tree::Seq(children) => Ok(Tree::Seq(
            children
                .iter()
                .map(|child| map_inner(f, child))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Tree::Map(entries) => Ok(Tree::Map(
            entries
                .iter()
                .map(|(key, child)| Ok((key.clone(), map_inner(f, child)?)))
                .collect::<Result<BTreeMap<_, _>, CoreError>>()?,
        )),
        Tree::Custom {
            tag,
            meta,
            children,
        } => Ok(Tree::Custom {
            tag: tag.clone(),
            meta: meta.clone(),
            children: children
                .iter()
                .map(|child| map_inner(f, child))
                .collect::<Result<Vec<_>, _>>()?,
        }),
    }
}

/// Pointwise map over two trees of identical structure.
pub fn zip_map<T: Clone, U: Clone, V>(
    mut f: impl FnMut(&T, &U) -> Result<V, CoreError>,
    lhs: &Tree<T>,
    rhs: &Tree<U>,
) -> Result<Tree<V>, CoreError> {
    let (lhs_leaves, lhs_def) = flatten(lhs)?;
    let (rhs_leaves, rhs_def) = flatten(rhs)?;
    if !same_structure(&lhs_def, &rhs_def) {
        return Err(CoreError::pytree(
            "zip_map over trees with different structures".to_owned(),
        ));
    }
    let mapped = lhs_leaves
        .iter()
        .zip(rhs_leaves.iter())
        .map(|(a, b)| f(a, b))
        .collect::<Result<Vec<_>, _>>()?;
    unflatten(&lhs_def, mapped)
}

/// Total structural equality on treedefs.
#[must_use]
pub fn same_structure(lhs: &TreeDef, rhs: &TreeDef) -> bool {
    lhs == rhs
}

/// Collect the leaves without building a treedef.
pub fn leaves<T: Clone>(tree: &Tree<T>) -> Result<Vec<T>, CoreError> {
    flatten(tree).map(|(leaves, _)| leaves)
}

#[cfg(test)]
mod tests {
    use super::{Tree, TreeDef, flatten, leaves, map, register_node, same_structure, unflatten, zip_map};
    use jaxel_core::CoreError;
    use std::collections::BTreeMap;

    fn sample_tree() -> Tree<i64> {
        Tree::seq(vec![
            Tree::Leaf(1),
            Tree::map([
                ("weights".to_owned(), Tree::Leaf(2)),
                ("bias".to_owned(), Tree::Leaf(3)),
            ]),
            Tree::seq(vec![Tree::Leaf(4), Tree::Leaf(5)]),
        ])
    }

    #[test]
    fn flatten_orders_map_keys_lexicographically() {
        let (flat, def) = flatten(&sample_tree()).expect("flatten should succeed");
        // "bias" < "weights", so 3 precedes 2.
        assert_eq!(flat, vec![1, 3, 2, 4, 5]);
        assert_eq!(def.leaf_count(), 5);
    }

    #[test]
    fn unflatten_inverts_flatten() {
        let tree = sample_tree();
        let (flat, def) = flatten(&tree).expect("flatten should succeed");
        let rebuilt = unflatten(&def, flat).expect("unflatten should succeed");
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn treedef_equality_ignores_map_insertion_order() {
        let mut forward = BTreeMap::new();
        forward.insert("a".to_owned(), Tree::Leaf(1));
        forward.insert("b".to_owned(), Tree::Leaf(2));
        let mut reverse = BTreeMap::new();
        reverse.insert("b".to_owned(), Tree::Leaf(2));
        reverse.insert("a".to_owned(), Tree::Leaf(1));

        let (_, def_a) = flatten(&Tree::Map(forward)).expect("flatten");
        let (_, def_b) = flatten(&Tree::Map(reverse)).expect("flatten");
        assert!(same_structure(&def_a, &def_b));
    }

    #[test]
    fn unflatten_rejects_wrong_leaf_count() {
        let (_, def) = flatten(&sample_tree()).expect("flatten");
        let err = unflatten(&def, vec![1, 2]).expect_err("should fail");
        assert!(matches!(err, CoreError::PytreeStructureMismatch { .. }));
    }

    #[test]
    fn map_preserves_structure() {
        let tree = sample_tree();
        let doubled = map(|x| Ok(x * 2), &tree).expect("map should succeed");
        assert_eq!(leaves(&doubled).expect("leaves"), vec![2, 6, 4, 8, 10]);
    }

    #[test]
    fn zip_map_requires_identical_structures() {
        let lhs = sample_tree();
        let rhs = Tree::seq(vec![Tree::Leaf(1), Tree::Leaf(2)]);
        let err = zip_map(|a, b| Ok(a + b), &lhs, &rhs).expect_err("should fail");
        assert!(matches!(err, CoreError::PytreeStructureMismatch { .. }));

        let sum = zip_map(|a, b| Ok(a + b), &lhs, &lhs).expect("matching structures");
        assert_eq!(leaves(&sum).expect("leaves"), vec![2, 6, 4, 8, 10]);
    }

    #[test]
    fn custom_nodes_require_registration() {
        let unknown = Tree::Custom {
            tag: "mystery_record".to_owned(),
            meta: String::new(),
            children: vec![Tree::Leaf(1)],
        };
        let err = flatten(&unknown).expect_err("unregistered tag should fail");
        assert!(matches!(err, CoreError::PytreeStructureMismatch { .. }));

        register_node("point2d");
        let known: Tree<i64> = Tree::Custom {
            tag: "point2d".to_owned(),
            meta: "xy".to_owned(),
            children: vec![Tree::Leaf(3), Tree::Leaf(4)],
        };
        let (flat, def) = flatten(&known).expect("registered tag should flatten");
        assert_eq!(flat, vec![3, 4]);
        let rebuilt = unflatten(&def, flat).expect("unflatten");
        assert_eq!(rebuilt, known);
    }

    #[test]
    fn empty_containers_have_zero_leaves() {
        let tree: Tree<i64> = Tree::seq(vec![]);
        let (flat, def) = flatten(&tree).expect("flatten");
        assert!(flat.is_empty());
        assert_eq!(def.leaf_count(), 0);
        assert_eq!(def, TreeDef::Seq(vec![]));
    }
}
