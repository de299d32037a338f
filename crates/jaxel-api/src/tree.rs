//! The tree module: canonical flatten/unflatten for nested containers.

pub use jaxel_tree::{
    Tree, TreeDef, flatten, is_registered_node, leaves, map, register_node, same_structure,
    unflatten, zip_map,
};
