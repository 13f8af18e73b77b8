// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Axis-aligned bounding volume of a parsed model in f64 precision.

use nalgebra::{Point3, Vector3};

use crate::scene::SceneNode;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingVolume {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
    /// Number of points expanded into the volume
    pub sample_count: usize,
}

impl BoundingVolume {
    /// Create bounds initialized to invalid state
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point3::new(f64::MIN, f64::MIN, f64::MIN),
            sample_count: 0,
        }
    }

    /// Bounds from two corners
    pub fn from_corners(min: Point3<f64>, max: Point3<f64>) -> Self {
        let mut volume = Self::empty();
        volume.expand(min);
        volume.expand(max);
        volume
    }

    /// Bounds of every mesh vertex in a node subtree
    pub fn of_node(node: &SceneNode) -> Self {
        let mut volume = Self::empty();
        for mesh in node.iter().filter_map(|n| n.mesh.as_ref()) {
            for point in mesh.points() {
                if point.coords.iter().all(|c| c.is_finite()) {
                    volume.expand(point);
                }
            }
        }
        volume
    }

    /// Check if bounds are valid (at least one point added)
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.sample_count > 0
    }

    /// Expand bounds to include a point
    #[inline]
    pub fn expand(&mut self, p: Point3<f64>) {
        self.min = self.min.inf(&p);
        self.max = self.max.sup(&p);
        self.sample_count += 1;
    }

    /// Center of the box; origin for invalid bounds
    #[inline]
    pub fn center(&self) -> Point3<f64> {
        if !self.is_valid() {
            return Point3::origin();
        }
        nalgebra::center(&self.min, &self.max)
    }

    /// Edge lengths of the box; zero for invalid bounds
    #[inline]
    pub fn size(&self) -> Vector3<f64> {
        if !self.is_valid() {
            return Vector3::zeros();
        }
        self.max - self.min
    }

    /// Longest edge
    #[inline]
    pub fn max_dimension(&self) -> f64 {
        let size = self.size();
        size.x.max(size.y).max(size.z)
    }
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self::empty()
    }
}
