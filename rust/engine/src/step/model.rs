// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scene construction from an indexed IFC model.
//!
//! The tree is `IfcProject` → spatial containers (storeys) → products. Each
//! product leaf carries the merged mesh of its swept-solid body items in
//! metres; products whose geometry cannot be built keep an empty leaf so the
//! validator sees them.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Matrix4, Point2, Point3, Vector3};
use planview_core::{Mesh, SceneNode};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::extrusion::{circle, closed_outline, extrude, rectangle, CIRCLE_SEGMENTS};
use super::index::{Entity, EntityTable};
use super::parser::{unescape, Token};

/// Product classes turned into scene leaves
pub const PRODUCT_CLASSES: &[&str] = &[
    "IFCWALL",
    "IFCWALLSTANDARDCASE",
    "IFCSLAB",
    "IFCROOF",
    "IFCCOLUMN",
    "IFCBEAM",
    "IFCMEMBER",
    "IFCPLATE",
    "IFCDOOR",
    "IFCWINDOW",
    "IFCSTAIR",
    "IFCSTAIRFLIGHT",
    "IFCRAMP",
    "IFCRAILING",
    "IFCCOVERING",
    "IFCFOOTING",
    "IFCFURNISHINGELEMENT",
    "IFCBUILDINGELEMENTPROXY",
];

const MAX_PLACEMENT_DEPTH: usize = 64;
const MAX_BOOLEAN_DEPTH: usize = 16;

/// Display color for a product class (RGBA)
pub fn default_color(class: &str) -> [f32; 4] {
    match class {
        "IFCWALL" | "IFCWALLSTANDARDCASE" => [0.85, 0.85, 0.85, 1.0],
        "IFCSLAB" => [0.7, 0.7, 0.7, 1.0],
        "IFCROOF" => [0.6, 0.5, 0.4, 1.0],
        "IFCCOLUMN" | "IFCBEAM" | "IFCMEMBER" => [0.6, 0.65, 0.7, 1.0],
        "IFCWINDOW" => [0.6, 0.8, 1.0, 0.4],
        "IFCDOOR" => [0.6, 0.45, 0.3, 1.0],
        "IFCSTAIR" | "IFCSTAIRFLIGHT" | "IFCRAMP" => [0.75, 0.75, 0.75, 1.0],
        "IFCRAILING" => [0.4, 0.4, 0.45, 1.0],
        "IFCFURNISHINGELEMENT" => [0.5, 0.35, 0.2, 1.0],
        "IFCBUILDINGELEMENTPROXY" => [0.6, 0.6, 0.6, 1.0],
        _ => planview_core::DEFAULT_COLOR,
    }
}

/// Multiplier of an SI prefix enumeration (`MILLI` → 0.001)
pub fn si_prefix_multiplier(prefix: &str) -> f64 {
    match prefix {
        "ATTO" => 1e-18,
        "FEMTO" => 1e-15,
        "PICO" => 1e-12,
        "NANO" => 1e-9,
        "MICRO" => 1e-6,
        "MILLI" => 1e-3,
        "CENTI" => 1e-2,
        "DECI" => 1e-1,
        "DECA" => 1e1,
        "HECTO" => 1e2,
        "KILO" => 1e3,
        "MEGA" => 1e6,
        "GIGA" => 1e9,
        "TERA" => 1e12,
        "PETA" => 1e15,
        "EXA" => 1e18,
        _ => 1.0,
    }
}

/// Metres per model length unit.
///
/// Follows `IfcProject.UnitsInContext` to the length unit; falls back to any
/// `IfcSIUnit` length unit in the file, then to metres.
pub fn length_unit_scale(table: &EntityTable<'_>) -> f64 {
    let assigned: Vec<u32> = table
        .ids_of_class("IFCPROJECT")
        .first()
        .and_then(|&id| table.decode(id).ok())
        .and_then(|project| project.get_ref(8))
        .and_then(|units| table.decode(units).ok())
        .map(|units| units.get_ref_list(0))
        .unwrap_or_default();

    let candidates = if assigned.is_empty() {
        table.ids_of_class("IFCSIUNIT").to_vec()
    } else {
        assigned
    };

    candidates
        .into_iter()
        .find_map(|id| unit_scale(table, id, 0))
        .unwrap_or(1.0)
}

fn unit_scale(table: &EntityTable<'_>, id: u32, depth: usize) -> Option<f64> {
    let unit = table.decode(id).ok()?;
    if unit.get_enum(1) != Some("LENGTHUNIT") || depth > 4 {
        return None;
    }
    match unit.class {
        "IFCSIUNIT" => Some(unit.get_enum(2).map(si_prefix_multiplier).unwrap_or(1.0)),
        "IFCCONVERSIONBASEDUNIT" => {
            let measure = table.decode(unit.get_ref(3)?).ok()?;
            let factor = measure.get_f64(0)?;
            let base = measure
                .get_ref(1)
                .and_then(|base| unit_scale(table, base, depth + 1))
                .unwrap_or(1.0);
            Some(factor * base)
        }
        _ => None,
    }
}

/// Orthonormal frame with `z` as the primary axis and `x` projected onto
/// the plane normal to it
fn frame_matrix(origin: Point3<f64>, z: Vector3<f64>, x_hint: Vector3<f64>) -> Matrix4<f64> {
    let z = z.try_normalize(1e-12).unwrap_or_else(Vector3::z);
    let x = (x_hint - z * x_hint.dot(&z))
        .try_normalize(1e-12)
        .unwrap_or_else(|| {
            let fallback = if z.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
            (fallback - z * fallback.dot(&z)).normalize()
        });
    let y = z.cross(&x);

    #[rustfmt::skip]
    let matrix = Matrix4::new(
        x.x, y.x, z.x, origin.x,
        x.y, y.y, z.y, origin.y,
        x.z, y.z, z.z, origin.z,
        0.0, 0.0, 0.0, 1.0,
    );
    matrix
}

/// Builds the scene tree of one model
pub struct SceneBuilder<'t, 'a> {
    table: &'t EntityTable<'a>,
    unit_scale: f64,
    placements: FxHashMap<u32, Matrix4<f64>>,
}

impl<'t, 'a> SceneBuilder<'t, 'a> {
    pub fn new(table: &'t EntityTable<'a>) -> Self {
        Self {
            table,
            unit_scale: length_unit_scale(table),
            placements: FxHashMap::default(),
        }
    }

    pub fn unit_scale(&self) -> f64 {
        self.unit_scale
    }

    pub fn build(mut self) -> Result<SceneNode> {
        let table = self.table;

        let mut root = match table.ids_of_class("IFCPROJECT").first() {
            Some(&id) => {
                let project = table.decode(id)?;
                SceneNode::group(display_name(&project), project.class).with_source_id(id)
            }
            None => SceneNode::group("Project", "IFCPROJECT"),
        };

        let mut products: BTreeSet<u32> = BTreeSet::new();
        for class in PRODUCT_CLASSES {
            products.extend(table.ids_of_class(class));
        }

        let mut containers: BTreeMap<u32, Vec<u32>> = table
            .ids_of_class("IFCBUILDINGSTOREY")
            .iter()
            .map(|&id| (id, Vec::new()))
            .collect();
        for &rel_id in table.ids_of_class("IFCRELCONTAINEDINSPATIALSTRUCTURE") {
            let rel = match table.decode(rel_id) {
                Ok(rel) => rel,
                Err(e) => {
                    tracing::warn!(id = rel_id, error = %e, "skipping spatial containment");
                    continue;
                }
            };
            let Some(structure) = rel.get_ref(5) else {
                continue;
            };
            containers
                .entry(structure)
                .or_default()
                .extend(rel.get_ref_list(4).into_iter().filter(|id| products.contains(id)));
        }

        let mut placed = BTreeSet::new();
        for (structure_id, members) in containers {
            let mut group = match table.decode(structure_id) {
                Ok(structure) => SceneNode::group(display_name(&structure), structure.class),
                Err(_) => SceneNode::group("Storey", "IFCBUILDINGSTOREY"),
            }
            .with_source_id(structure_id);

            for id in members {
                if placed.insert(id) {
                    group.push_child(self.product_node(id)?);
                }
            }
            root.push_child(group);
        }

        for &id in &products {
            if !placed.contains(&id) {
                root.push_child(self.product_node(id)?);
            }
        }

        tracing::debug!(
            products = products.len(),
            meshes = root.mesh_count(),
            unit_scale = self.unit_scale,
            "built scene"
        );
        Ok(root)
    }

    fn product_node(&mut self, id: u32) -> Result<SceneNode> {
        let product = self.table.decode(id)?;
        let mut node = SceneNode::group(display_name(&product), product.class)
            .with_source_id(id)
            .with_color(default_color(product.class));

        match self.product_mesh(&product) {
            Ok(Some(mesh)) => node.mesh = Some(mesh),
            Ok(None) => {
                tracing::debug!(id, class = product.class, "product has no body geometry");
            }
            Err(e) => {
                tracing::warn!(id, class = product.class, error = %e, "skipping product geometry");
            }
        }
        Ok(node)
    }

    fn product_mesh(&mut self, product: &Entity<'a>) -> Result<Option<Mesh>> {
        let Some(shape_id) = product.get_ref(6) else {
            return Ok(None);
        };
        let world = match product.get_ref(5) {
            Some(placement) => self.placement(placement, 0)?,
            None => Matrix4::identity(),
        };
        let transform = Matrix4::new_scaling(self.unit_scale) * world;

        let shape = self.table.decode(shape_id)?;
        let mut representations = Vec::new();
        for rep_id in shape.get_ref_list(2) {
            let rep = self.table.decode(rep_id)?;
            let is_body = matches!(rep.get_str(1), Some("Body") | None);
            representations.push((is_body, rep));
        }
        // Prefer body representations when the product has any
        if representations.iter().any(|(is_body, _)| *is_body) {
            representations.retain(|(is_body, _)| *is_body);
        }

        let mut merged = Mesh::new();
        for (_, rep) in &representations {
            for item in rep.get_ref_list(3) {
                if let Some(mesh) = self.item_mesh(item, &transform, 0)? {
                    merged.merge(&mesh);
                }
            }
        }

        Ok((!merged.is_empty()).then_some(merged))
    }

    fn item_mesh(&self, id: u32, transform: &Matrix4<f64>, depth: usize) -> Result<Option<Mesh>> {
        let item = self.table.decode(id)?;
        match item.class {
            "IFCEXTRUDEDAREASOLID" => {
                let profile = item
                    .get_ref(0)
                    .ok_or_else(|| Error::geometry(format!("#{} has no swept area", id)))?;
                let position = match item.get_ref(1) {
                    Some(p) => self.axis2_placement(p)?,
                    None => Matrix4::identity(),
                };
                let direction = match item.get_ref(2) {
                    Some(d) => self.direction(d)?,
                    None => Vector3::z(),
                };
                let depth = item
                    .get_f64(3)
                    .ok_or_else(|| Error::geometry(format!("#{} has no depth", id)))?;

                let Some(outline) = self.profile_outline(profile)? else {
                    return Ok(None);
                };
                extrude(&outline, direction, depth, &(transform * position)).map(Some)
            }
            "IFCBOOLEANRESULT" | "IFCBOOLEANCLIPPINGRESULT" if depth < MAX_BOOLEAN_DEPTH => {
                // Clipping is not evaluated; the first operand stands in
                match item.get_ref(1) {
                    Some(first) => self.item_mesh(first, transform, depth + 1),
                    None => Ok(None),
                }
            }
            other => {
                tracing::debug!(id, class = other, "unsupported representation item");
                Ok(None)
            }
        }
    }

    fn profile_outline(&self, id: u32) -> Result<Option<Vec<Point2<f64>>>> {
        let profile = self.table.decode(id)?;
        let (outline, position) = match profile.class {
            "IFCRECTANGLEPROFILEDEF" => {
                let (Some(x), Some(y)) = (profile.get_f64(3), profile.get_f64(4)) else {
                    return Err(Error::geometry(format!("#{} lacks dimensions", id)));
                };
                (rectangle(x, y), profile.get_ref(2))
            }
            "IFCCIRCLEPROFILEDEF" => {
                let radius = profile
                    .get_f64(3)
                    .ok_or_else(|| Error::geometry(format!("#{} lacks a radius", id)))?;
                (circle(radius, CIRCLE_SEGMENTS), profile.get_ref(2))
            }
            "IFCARBITRARYCLOSEDPROFILEDEF" => {
                let curve = profile
                    .get_ref(2)
                    .ok_or_else(|| Error::geometry(format!("#{} has no outer curve", id)))?;
                (closed_outline(self.curve_points(curve)?), None)
            }
            other => {
                tracing::debug!(id, class = other, "unsupported profile");
                return Ok(None);
            }
        };

        let Some(position) = position else {
            return Ok(Some(outline));
        };
        let placement = self.axis2_placement(position)?;
        Ok(Some(
            outline
                .iter()
                .map(|p| {
                    let q = placement.transform_point(&Point3::new(p.x, p.y, 0.0));
                    Point2::new(q.x, q.y)
                })
                .collect(),
        ))
    }

    /// Vertices of a polyline or an indexed poly curve (arc segments are
    /// read as straight lines)
    fn curve_points(&self, id: u32) -> Result<Vec<Point2<f64>>> {
        let curve = self.table.decode(id)?;
        match curve.class {
            "IFCPOLYLINE" => curve
                .get_ref_list(0)
                .into_iter()
                .map(|p| self.point(p).map(|p| Point2::new(p.x, p.y)))
                .collect(),
            "IFCINDEXEDPOLYCURVE" => {
                let list_id = curve
                    .get_ref(0)
                    .ok_or_else(|| Error::geometry(format!("#{} has no point list", id)))?;
                let list = self.table.decode(list_id)?;
                let coords = list.get(0).and_then(Token::as_list).unwrap_or_default();
                Ok(coords
                    .iter()
                    .filter_map(|pair| {
                        let pair = pair.as_list()?;
                        Some(Point2::new(pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
                    })
                    .collect())
            }
            other => Err(Error::geometry(format!(
                "unsupported profile curve #{} {}",
                id, other
            ))),
        }
    }

    /// World transform of an `IfcLocalPlacement` in model units
    fn placement(&mut self, id: u32, depth: usize) -> Result<Matrix4<f64>> {
        if let Some(matrix) = self.placements.get(&id) {
            return Ok(*matrix);
        }
        if depth > MAX_PLACEMENT_DEPTH {
            return Err(Error::geometry(format!(
                "placement chain at #{} is too deep or cyclic",
                id
            )));
        }

        let placement = self.table.decode(id)?;
        if placement.class != "IFCLOCALPLACEMENT" {
            return Err(Error::geometry(format!(
                "unsupported object placement #{} {}",
                id, placement.class
            )));
        }

        let parent = match placement.get_ref(0) {
            Some(parent) => self.placement(parent, depth + 1)?,
            None => Matrix4::identity(),
        };
        let local = match placement.get_ref(1) {
            Some(relative) => self.axis2_placement(relative)?,
            None => Matrix4::identity(),
        };

        let world = parent * local;
        self.placements.insert(id, world);
        Ok(world)
    }

    fn axis2_placement(&self, id: u32) -> Result<Matrix4<f64>> {
        let placement = self.table.decode(id)?;
        let location = match placement.get_ref(0) {
            Some(point) => self.point(point)?,
            None => Point3::origin(),
        };

        match placement.class {
            "IFCAXIS2PLACEMENT3D" => {
                let axis = match placement.get_ref(1) {
                    Some(d) => self.direction(d)?,
                    None => Vector3::z(),
                };
                let ref_direction = match placement.get_ref(2) {
                    Some(d) => self.direction(d)?,
                    None => Vector3::x(),
                };
                Ok(frame_matrix(location, axis, ref_direction))
            }
            "IFCAXIS2PLACEMENT2D" => {
                let ref_direction = match placement.get_ref(1) {
                    Some(d) => self.direction(d)?,
                    None => Vector3::x(),
                };
                Ok(frame_matrix(location, Vector3::z(), ref_direction))
            }
            other => Err(Error::geometry(format!(
                "unsupported placement #{} {}",
                id, other
            ))),
        }
    }

    fn point(&self, id: u32) -> Result<Point3<f64>> {
        let point = self.table.decode(id)?;
        let coords = point.get_f64_list(0);
        match coords.as_slice() {
            [x, y] => Ok(Point3::new(*x, *y, 0.0)),
            [x, y, z] => Ok(Point3::new(*x, *y, *z)),
            _ => Err(Error::geometry(format!("#{} is not a 2D or 3D point", id))),
        }
    }

    fn direction(&self, id: u32) -> Result<Vector3<f64>> {
        let direction = self.table.decode(id)?;
        let ratios = direction.get_f64_list(0);
        match ratios.as_slice() {
            [x, y] => Ok(Vector3::new(*x, *y, 0.0)),
            [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
            _ => Err(Error::geometry(format!("#{} is not a direction", id))),
        }
    }
}

fn display_name(entity: &Entity<'_>) -> String {
    entity
        .get_str(2)
        .filter(|name| !name.is_empty())
        .map(unescape)
        .unwrap_or_else(|| entity.class.to_string())
}
