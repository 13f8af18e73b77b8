// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Viewer camera and automatic framing around a bounding volume.
//!
//! The camera is owned by the viewer shell; [`CameraFramer`] only rewrites
//! its position, target and clip planes. Framing places the camera on the
//! `(+1, +1, +1)` diagonal of the model center, which gives the isometric
//! overview used for freshly generated floor plans.

use nalgebra::{Isometry3, Matrix4, Perspective3, Point3, Vector3};

use crate::bounds::BoundingVolume;

/// Stand-off multiplier used when none is configured
pub const DEFAULT_FRAMING_MULTIPLIER: f64 = 2.5;
/// Allowed range for the stand-off multiplier
pub const FRAMING_MULTIPLIER_RANGE: (f64, f64) = (2.0, 3.0);
/// Extent substituted for degenerate (zero-size) volumes, in model units
pub const DEFAULT_EXTENT: f64 = 1.0;

/// Perspective camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye position
    pub position: Point3<f64>,
    /// Look-at target
    pub target: Point3<f64>,
    /// Up direction (IFC models are Z-up)
    pub up: Vector3<f64>,
    /// Vertical field of view (radians)
    pub fov_y: f64,
    /// Viewport aspect ratio (width / height)
    pub aspect: f64,
    /// Near clip plane
    pub near: f64,
    /// Far clip plane
    pub far: f64,
}

impl Camera {
    pub fn new(aspect: f64) -> Self {
        Self {
            position: Point3::new(10.0, 10.0, 10.0),
            target: Point3::origin(),
            up: Vector3::z(),
            fov_y: 45.0_f64.to_radians(),
            aspect,
            near: 0.1,
            far: 1000.0,
        }
    }

    /// Point the camera at `target` from its current position
    pub fn look_at(&mut self, target: Point3<f64>) {
        self.target = target;
    }

    /// Unit view direction
    pub fn forward(&self) -> Vector3<f64> {
        (self.target - self.position)
            .try_normalize(1e-12)
            .unwrap_or_else(|| -Vector3::z())
    }

    /// World-to-camera transform
    pub fn view(&self) -> Isometry3<f64> {
        // look_at_rh degenerates when the view direction is parallel to up
        let up = if self.forward().cross(&self.up).norm() < 1e-9 {
            Vector3::y()
        } else {
            self.up
        };
        Isometry3::look_at_rh(&self.position, &self.target, &up)
    }

    pub fn projection(&self) -> Perspective3<f64> {
        Perspective3::new(self.aspect, self.fov_y, self.near, self.far)
    }

    /// Combined projection * view matrix
    pub fn view_projection(&self) -> Matrix4<f64> {
        self.projection().as_matrix() * self.view().to_homogeneous()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(16.0 / 9.0)
    }
}

/// Result of framing a volume
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Framing {
    /// Center of the framed volume (the new look-at target)
    pub center: Point3<f64>,
    /// Stand-off distance applied on each axis
    pub distance: f64,
    /// New eye position
    pub position: Point3<f64>,
}

/// Computes deterministic camera placements around bounding volumes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFramer {
    multiplier: f64,
    default_extent: f64,
}

impl CameraFramer {
    /// Create a framer; the multiplier is clamped to [`FRAMING_MULTIPLIER_RANGE`]
    pub fn new(multiplier: f64) -> Self {
        let (lo, hi) = FRAMING_MULTIPLIER_RANGE;
        let multiplier = if multiplier.is_finite() {
            multiplier.clamp(lo, hi)
        } else {
            DEFAULT_FRAMING_MULTIPLIER
        };
        Self {
            multiplier,
            default_extent: DEFAULT_EXTENT,
        }
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Compute the framing for a volume without touching a camera
    pub fn compute(&self, volume: &BoundingVolume) -> Framing {
        let center = volume.center();
        let max_dim = volume.max_dimension();
        let max_dim = if max_dim.is_finite() && max_dim > f64::EPSILON {
            max_dim
        } else {
            self.default_extent
        };

        let distance = max_dim * self.multiplier;
        Framing {
            center,
            distance,
            position: center + Vector3::repeat(distance),
        }
    }

    /// Reposition `camera` to fit `volume` and recompute its clip planes
    pub fn frame(&self, camera: &mut Camera, volume: &BoundingVolume) -> Framing {
        let framing = self.compute(volume);
        camera.position = framing.position;
        camera.look_at(framing.center);
        camera.near = (framing.distance / 100.0).max(0.01);
        camera.far = framing.distance * 100.0;
        framing
    }
}

impl Default for CameraFramer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAMING_MULTIPLIER)
    }
}
