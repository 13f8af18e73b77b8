// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Swept-area solids: 2D profiles extruded into triangle meshes.

use nalgebra::{Matrix4, Point2, Point3, Vector3};
use planview_core::Mesh;

use crate::error::{Error, Result};

/// Segments used to approximate circular profiles
pub const CIRCLE_SEGMENTS: usize = 24;

/// Rectangle of `x_dim` by `y_dim` centered on the profile origin
pub fn rectangle(x_dim: f64, y_dim: f64) -> Vec<Point2<f64>> {
    let (hx, hy) = (x_dim / 2.0, y_dim / 2.0);
    vec![
        Point2::new(-hx, -hy),
        Point2::new(hx, -hy),
        Point2::new(hx, hy),
        Point2::new(-hx, hy),
    ]
}

/// Regular polygon approximating a circle centered on the profile origin
pub fn circle(radius: f64, segments: usize) -> Vec<Point2<f64>> {
    let segments = segments.max(3);
    (0..segments)
        .map(|i| {
            let angle = std::f64::consts::TAU * i as f64 / segments as f64;
            Point2::new(radius * angle.cos(), radius * angle.sin())
        })
        .collect()
}

/// Closed outline from polyline points: drops the repeated closing point and
/// orders the outline counter-clockwise
pub fn closed_outline(mut points: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    if points.len() > 1 {
        let first = points[0];
        if let Some(last) = points.last() {
            if (last - first).norm() < 1e-9 {
                points.pop();
            }
        }
    }
    if signed_area(&points) < 0.0 {
        points.reverse();
    }
    points
}

fn signed_area(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        / 2.0
}

/// Extrude a counter-clockwise outline by `depth` along `direction` (both in
/// the profile's coordinate system), then map the result through `transform`
pub fn extrude(
    outline: &[Point2<f64>],
    direction: Vector3<f64>,
    depth: f64,
    transform: &Matrix4<f64>,
) -> Result<Mesh> {
    if outline.len() < 3 {
        return Err(Error::geometry(format!(
            "profile needs at least 3 points, got {}",
            outline.len()
        )));
    }
    if !(depth.is_finite() && depth > 0.0) {
        return Err(Error::geometry(format!("invalid extrusion depth {}", depth)));
    }
    let direction = direction
        .try_normalize(1e-12)
        .ok_or_else(|| Error::geometry("zero extrusion direction"))?;
    if direction.z.abs() < 1e-9 {
        return Err(Error::geometry("extrusion direction lies in the profile plane"));
    }

    let flat: Vec<f64> = outline.iter().flat_map(|p| [p.x, p.y]).collect();
    let triangles = earcutr::earcut(&flat, &[], 2)
        .map_err(|e| Error::geometry(format!("triangulation failed: {:?}", e)))?;
    if triangles.is_empty() {
        return Err(Error::geometry("profile has no area"));
    }

    let offset = direction * depth;
    let n = outline.len();
    let mut mesh = Mesh::with_capacity(n * 2 + n * 4, triangles.len() * 2 + n * 6);

    // Bottom cap, wound away from the sweep
    let bottom_normal = -direction.z.signum() * Vector3::z();
    let base = mesh.vertex_count() as u32;
    for p in outline {
        mesh.add_vertex(Point3::new(p.x, p.y, 0.0), bottom_normal);
    }
    for tri in triangles.chunks_exact(3) {
        mesh.add_triangle(base + tri[0] as u32, base + tri[2] as u32, base + tri[1] as u32);
    }

    let base = mesh.vertex_count() as u32;
    for p in outline {
        mesh.add_vertex(Point3::new(p.x, p.y, 0.0) + offset, -bottom_normal);
    }
    for tri in triangles.chunks_exact(3) {
        mesh.add_triangle(base + tri[0] as u32, base + tri[1] as u32, base + tri[2] as u32);
    }

    for i in 0..n {
        let (p0, p1) = (outline[i], outline[(i + 1) % n]);
        let edge = Vector3::new(p1.x - p0.x, p1.y - p0.y, 0.0);
        let Some(normal) = edge.cross(&offset).try_normalize(1e-12) else {
            continue;
        };

        let b0 = Point3::new(p0.x, p0.y, 0.0);
        let b1 = Point3::new(p1.x, p1.y, 0.0);
        let idx = mesh.add_vertex(b0, normal);
        mesh.add_vertex(b1, normal);
        mesh.add_vertex(b1 + offset, normal);
        mesh.add_vertex(b0 + offset, normal);
        mesh.add_triangle(idx, idx + 1, idx + 2);
        mesh.add_triangle(idx, idx + 2, idx + 3);
    }

    mesh.transform(transform);
    Ok(mesh)
}
