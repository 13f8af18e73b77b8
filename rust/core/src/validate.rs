// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geometry validation for parsed models.

use crate::scene::SceneNode;

/// True iff at least one leaf in the subtree carries drawable geometry.
///
/// Stops at the first drawable leaf.
pub fn has_renderable_geometry(node: &SceneNode) -> bool {
    node.iter().any(is_renderable_leaf)
}

/// Number of leaves in the subtree carrying drawable geometry
pub fn count_renderable(node: &SceneNode) -> usize {
    node.iter().filter(|n| is_renderable_leaf(n)).count()
}

#[inline]
fn is_renderable_leaf(node: &SceneNode) -> bool {
    node.is_leaf() && node.mesh.as_ref().is_some_and(|m| m.is_drawable())
}
