// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scene graph nodes and the viewer-owned render scene.
//!
//! A parsed asset is a tree of [`SceneNode`]s: groups for the spatial
//! structure (project, storey) and leaves for building elements, each leaf
//! optionally carrying a [`Mesh`].
//!
//! The [`Scene`] belongs to the viewer shell. It never owns a model: a load
//! session keeps the strong `Arc<SceneNode>` and the scene only stores a
//! `Weak` reference under a stable [`NodeKey`] while the model is attached.

use std::sync::{Arc, Weak};

use slotmap::{new_key_type, SlotMap};

use crate::mesh::Mesh;

new_key_type! {
    /// Key of an attached model in the render scene.
    pub struct NodeKey;
}

/// Default color for nodes without a style (RGBA)
pub const DEFAULT_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];

/// A node of a parsed model
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    /// Display name (IFC `Name` attribute or the class name)
    pub name: String,
    /// Source class, e.g. `IFCCOLUMN`
    pub class: String,
    /// STEP instance id of the source entity, if any
    pub source_id: Option<u32>,
    /// RGBA color
    pub color: [f32; 4],
    /// Geometry carried by this node
    pub mesh: Option<Mesh>,
    /// Child nodes
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    /// Create an empty group node
    pub fn group(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            source_id: None,
            color: DEFAULT_COLOR,
            mesh: None,
            children: Vec::new(),
        }
    }

    /// Create a leaf carrying a mesh
    pub fn leaf(name: impl Into<String>, class: impl Into<String>, mesh: Mesh) -> Self {
        Self {
            mesh: Some(mesh),
            ..Self::group(name, class)
        }
    }

    /// Set the source entity id
    pub fn with_source_id(mut self, id: u32) -> Self {
        self.source_id = Some(id);
        self
    }

    /// Set the color
    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }

    /// Append a child
    pub fn push_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Depth-first pre-order traversal of this subtree
    pub fn iter(&self) -> SceneIter<'_> {
        SceneIter { stack: vec![self] }
    }

    /// Number of nodes in this subtree (including self)
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Number of nodes in this subtree that carry a non-empty mesh
    pub fn mesh_count(&self) -> usize {
        self.iter()
            .filter(|n| n.mesh.as_ref().is_some_and(|m| !m.is_empty()))
            .count()
    }
}

/// Depth-first iterator over a node subtree
pub struct SceneIter<'a> {
    stack: Vec<&'a SceneNode>,
}

impl<'a> Iterator for SceneIter<'a> {
    type Item = &'a SceneNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Reverse so the first child is visited first
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Render scene supplied by the viewer shell.
///
/// Holds non-owning references only; a model disappears from rendering as
/// soon as it is detached or its owner drops it.
#[derive(Debug, Default)]
pub struct Scene {
    attached: SlotMap<NodeKey, Weak<SceneNode>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a model; the caller keeps ownership of `node`
    pub fn attach(&mut self, node: &Arc<SceneNode>) -> NodeKey {
        self.attached.insert(Arc::downgrade(node))
    }

    /// Detach a model. Detaching an unknown or already detached key is a
    /// no-op and returns `false`.
    pub fn detach(&mut self, key: NodeKey) -> bool {
        self.attached.remove(key).is_some()
    }

    /// True if `key` is currently attached
    pub fn contains(&self, key: NodeKey) -> bool {
        self.attached.contains_key(key)
    }

    /// Number of attached entries
    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    /// Models that are attached and still alive, for rendering
    pub fn live_nodes(&self) -> Vec<(NodeKey, Arc<SceneNode>)> {
        self.attached
            .iter()
            .filter_map(|(key, weak)| weak.upgrade().map(|node| (key, node)))
            .collect()
    }

    /// Drop entries whose owner has released the model
    pub fn prune(&mut self) -> usize {
        let before = self.attached.len();
        self.attached.retain(|_, weak| weak.strong_count() > 0);
        before - self.attached.len()
    }
}
