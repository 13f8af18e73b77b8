// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Planview Core
//!
//! Renderer-side data shared by the parsing engines and the load controller:
//!
//! - **Scene graph**: [`SceneNode`] trees produced by parsing engines and the
//!   viewer-owned [`Scene`] that references attached models
//! - **Geometry validation**: [`has_renderable_geometry`] decides whether a
//!   parsed model can be shown at all
//! - **Camera framing**: [`CameraFramer`] fits a [`Camera`] around a
//!   [`BoundingVolume`]
//!
//! ```rust,ignore
//! use planview_core::{BoundingVolume, Camera, CameraFramer};
//!
//! let volume = BoundingVolume::of_node(&model);
//! let mut camera = Camera::default();
//! CameraFramer::new(3.0).frame(&mut camera, &volume);
//! ```

pub mod bounds;
pub mod camera;
pub mod mesh;
pub mod scene;
pub mod validate;

// Re-export nalgebra types for convenience
pub use nalgebra::{Matrix4, Point2, Point3, Vector3};

pub use bounds::BoundingVolume;
pub use camera::{Camera, CameraFramer, Framing, DEFAULT_FRAMING_MULTIPLIER};
pub use mesh::Mesh;
pub use scene::{NodeKey, Scene, SceneNode, DEFAULT_COLOR};
pub use validate::{count_renderable, has_renderable_geometry};
