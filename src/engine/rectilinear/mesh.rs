//! Mesh generation and MSH 2.2 output for the rectilinear engine.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use spade::{ConstrainedDelaunayTriangulation, InsertionError, Point2 as SpadePoint2, Triangulation};

use crate::engine::{Dim, EntityRef, MeshField, Tag};
use crate::error::EngineError;
use crate::math::{quantize, Point2, Point3};

use super::cells::Rect;

/// Element shapes produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Triangle,
    Quad,
    Prism,
}

impl ElementKind {
    /// Local vertex pairs that receive a mid-edge node at order 2, in MSH order.
    fn edges(self) -> &'static [(usize, usize)] {
        match self {
            Self::Triangle => &[(0, 1), (1, 2), (2, 0)],
            Self::Quad => &[(0, 1), (1, 2), (2, 3), (3, 0)],
            Self::Prism => &[
                (0, 1),
                (0, 2),
                (0, 3),
                (1, 2),
                (1, 4),
                (2, 5),
                (3, 4),
                (3, 5),
                (4, 5),
            ],
        }
    }

    fn corners(self) -> usize {
        match self {
            Self::Triangle => 3,
            Self::Quad => 4,
            Self::Prism => 6,
        }
    }

    /// MSH 2.2 element type number.
    fn msh_type(self, order: u8) -> u32 {
        match (self, order) {
            (Self::Triangle, 1) => 2,
            (Self::Quad, 1) => 3,
            (Self::Prism, 1) => 6,
            (Self::Triangle, _) => 9,
            (Self::Quad, _) => 16,
            (Self::Prism, _) => 18,
        }
    }
}

/// One mesh element classified on a model entity.
#[derive(Debug, Clone)]
pub struct Element {
    pub kind: ElementKind,
    /// Zero-based node indices.
    pub nodes: Vec<usize>,
    pub entity: EntityRef,
}

/// A generated mesh.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub nodes: Vec<Point3>,
    pub elements: Vec<Element>,
    pub order: u8,
    node_index: HashMap<(i64, i64, i64), usize>,
}

impl Mesh {
    fn new() -> Self {
        Self {
            order: 1,
            ..Self::default()
        }
    }

    /// Number of elements of one kind.
    #[must_use]
    pub fn count(&self, kind: ElementKind) -> usize {
        self.elements.iter().filter(|e| e.kind == kind).count()
    }

    fn node(&mut self, p: Point3) -> usize {
        let key = (quantize(p.x), quantize(p.y), quantize(p.z));
        *self.node_index.entry(key).or_insert_with(|| {
            self.nodes.push(p);
            self.nodes.len() - 1
        })
    }

    fn push(&mut self, kind: ElementKind, points: &[Point3], entity: EntityRef) {
        let nodes = points.iter().map(|&p| self.node(p)).collect();
        self.elements.push(Element {
            kind,
            nodes,
            entity,
        });
    }

    /// Inserts cached mid-edge nodes so every element becomes second order.
    pub fn elevate_to_second_order(&mut self) {
        if self.order == 2 {
            return;
        }
        let mut elements = std::mem::take(&mut self.elements);
        for element in &mut elements {
            let corners = element.nodes.clone();
            for &(a, b) in element.kind.edges() {
                let mid = nalgebra::center(&self.nodes[corners[a]], &self.nodes[corners[b]]);
                let index = self.node(mid);
                element.nodes.push(index);
            }
        }
        self.elements = elements;
        self.order = 2;
    }

    /// Drops mid-edge nodes from the element connectivity.
    pub fn reduce_to_first_order(&mut self) {
        for element in &mut self.elements {
            element.nodes.truncate(element.kind.corners());
        }
        self.order = 1;
    }
}

/// Horizontal surface geometry handed to the mesher.
pub struct HorizontalPatch<'a> {
    pub entity: EntityRef,
    pub z: f64,
    pub cells: &'a [Rect],
}

/// Vertical wall geometry handed to the mesher.
pub struct WallPatch {
    pub entity: EntityRef,
    pub start: Point2,
    pub end: Point2,
    pub z_min: f64,
    pub z_max: f64,
    pub layers: usize,
}

/// Volume geometry handed to the mesher.
pub struct VolumePatch<'a> {
    pub entity: EntityRef,
    pub cells: &'a [Rect],
    pub z_min: f64,
    pub z_max: f64,
    pub layers: usize,
}

/// Target element size as a function of in-plane position.
pub struct Sizing<'a> {
    pub max_size: f64,
    pub fields: &'a BTreeMap<Tag, MeshField>,
    pub background: Option<Tag>,
    /// Cells of horizontal surfaces, for `Constant` fields.
    pub surface_cells: &'a BTreeMap<Tag, Vec<Rect>>,
}

impl Sizing<'_> {
    fn size_at(&self, p: Point2) -> f64 {
        let field = self
            .background
            .map_or(f64::INFINITY, |tag| self.field_at(tag, p));
        self.max_size.min(field)
    }

    fn field_at(&self, tag: Tag, p: Point2) -> f64 {
        match self.fields.get(&tag) {
            None => f64::INFINITY,
            Some(MeshField::Box {
                size_in,
                size_out,
                x_min,
                x_max,
                y_min,
                y_max,
            }) => {
                let inside = Rect {
                    x_min: *x_min,
                    x_max: *x_max,
                    y_min: *y_min,
                    y_max: *y_max,
                }
                .contains(&p);
                if inside {
                    *size_in
                } else {
                    size_out.unwrap_or(f64::INFINITY)
                }
            }
            Some(MeshField::Constant {
                size_in,
                size_out,
                surfaces,
            }) => {
                let inside = surfaces.iter().any(|&s| {
                    self.surface_cells
                        .get(&s)
                        .is_some_and(|cells| cells.iter().any(|c| c.contains(&p)))
                });
                if inside {
                    *size_in
                } else {
                    size_out.unwrap_or(f64::INFINITY)
                }
            }
            // Min fields only reference fields registered before them.
            Some(MeshField::Min { fields }) => fields
                .iter()
                .filter(|&&f| f < tag)
                .map(|&f| self.field_at(f, p))
                .fold(f64::INFINITY, f64::min),
        }
    }

    /// Number of segments for a length governed by the size at `at`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn divisions(&self, length: f64, at: Point2) -> usize {
        let size = self.size_at(at);
        if size.is_finite() && size > 0.0 {
            ((length / size).ceil() as usize).max(1)
        } else {
            1
        }
    }

    /// Points along a segment, both ends included. Depends only on the
    /// segment, so neighbours sharing it subdivide it identically.
    #[allow(clippy::cast_precision_loss)]
    fn subdivide(&self, a: Point2, b: Point2) -> Vec<Point2> {
        let n = self.divisions((b - a).norm(), nalgebra::center(&a, &b));
        (0..=n).map(|k| a + (b - a) * (k as f64 / n as f64)).collect()
    }
}

/// Triangulates one rectangular cell.
#[allow(clippy::cast_precision_loss)]
fn triangulate_cell(cell: &Rect, sizing: &Sizing<'_>) -> Result<Vec<[Point2; 3]>, EngineError> {
    let corners = cell.corners();
    let mut outline = Vec::new();
    for i in 0..4 {
        let mut edge = sizing.subdivide(corners[i], corners[(i + 1) % 4]);
        edge.pop();
        outline.extend(edge);
    }

    let mut cdt = ConstrainedDelaunayTriangulation::<SpadePoint2<f64>>::new();
    let insert = |cdt: &mut ConstrainedDelaunayTriangulation<SpadePoint2<f64>>, p: Point2| {
        cdt.insert(SpadePoint2::new(p.x, p.y))
            .map_err(|e: InsertionError| EngineError::Meshing(format!("CDT insert: {e}")))
    };

    let mut handles = Vec::with_capacity(outline.len());
    for &p in &outline {
        handles.push(insert(&mut cdt, p)?);
    }
    for i in 0..handles.len() {
        let (from, to) = (handles[i], handles[(i + 1) % handles.len()]);
        if from != to {
            cdt.add_constraint(from, to);
        }
    }

    let center = cell.center();
    let nx = sizing.divisions(cell.width(), center);
    let ny = sizing.divisions(cell.height(), center);
    for i in 1..nx {
        for j in 1..ny {
            let x = cell.x_min + cell.width() * (i as f64 / nx as f64);
            let y = cell.y_min + cell.height() * (j as f64 / ny as f64);
            insert(&mut cdt, Point2::new(x, y))?;
        }
    }

    // The outline is convex, so every inner face lies inside the cell.
    Ok(cdt
        .inner_faces()
        .map(|face| {
            let [a, b, c] = face.positions();
            [
                Point2::new(a.x, a.y),
                Point2::new(b.x, b.y),
                Point2::new(c.x, c.y),
            ]
        })
        .collect())
}

fn footprint(cells: &[Rect], sizing: &Sizing<'_>) -> Result<Vec<[Point2; 3]>, EngineError> {
    let mut triangles = Vec::new();
    for cell in cells {
        triangles.extend(triangulate_cell(cell, sizing)?);
    }
    Ok(triangles)
}

#[allow(clippy::cast_precision_loss)]
fn layer_heights(z_min: f64, z_max: f64, layers: usize) -> Vec<f64> {
    let n = layers.max(1);
    (0..=n)
        .map(|k| z_min + (z_max - z_min) * (k as f64 / n as f64))
        .collect()
}

fn lift(p: Point2, z: f64) -> Point3 {
    Point3::new(p.x, p.y, z)
}

/// Meshes the given entities. Surfaces are always meshed; volumes only when
/// `dim == 3`.
///
/// # Errors
///
/// Returns [`EngineError::Meshing`] if a triangulation fails.
pub fn generate(
    dim: u8,
    horizontals: &[HorizontalPatch<'_>],
    walls: &[WallPatch],
    volumes: &[VolumePatch<'_>],
    sizing: &Sizing<'_>,
) -> Result<Mesh, EngineError> {
    let mut mesh = Mesh::new();

    for patch in horizontals {
        for [a, b, c] in footprint(patch.cells, sizing)? {
            let tri = [lift(a, patch.z), lift(b, patch.z), lift(c, patch.z)];
            mesh.push(ElementKind::Triangle, &tri, patch.entity);
        }
    }

    for wall in walls {
        let along = sizing.subdivide(wall.start, wall.end);
        let heights = layer_heights(wall.z_min, wall.z_max, wall.layers);
        for seg in along.windows(2) {
            for h in heights.windows(2) {
                let quad = [
                    lift(seg[0], h[0]),
                    lift(seg[1], h[0]),
                    lift(seg[1], h[1]),
                    lift(seg[0], h[1]),
                ];
                mesh.push(ElementKind::Quad, &quad, wall.entity);
            }
        }
    }

    if dim == 3 {
        for volume in volumes {
            let triangles = footprint(volume.cells, sizing)?;
            let heights = layer_heights(volume.z_min, volume.z_max, volume.layers);
            for [a, b, c] in &triangles {
                for h in heights.windows(2) {
                    let prism = [
                        lift(*a, h[0]),
                        lift(*b, h[0]),
                        lift(*c, h[0]),
                        lift(*a, h[1]),
                        lift(*b, h[1]),
                        lift(*c, h[1]),
                    ];
                    mesh.push(ElementKind::Prism, &prism, volume.entity);
                }
            }
        }
    }

    Ok(mesh)
}

/// A physical group as written to the mesh file.
pub struct PhysicalRecord<'a> {
    pub dim: Dim,
    pub tag: Tag,
    pub name: Option<&'a str>,
    pub entities: &'a [Tag],
}

/// Renders the mesh as MSH 2.2 ASCII.
///
/// Elements are written once per physical group containing their entity; if
/// there are no physical groups, every element is written with physical tag 0.
#[must_use]
pub fn to_msh(mesh: &Mesh, groups: &[PhysicalRecord<'_>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "$MeshFormat\n2.2 0 8\n$EndMeshFormat");

    let named: Vec<_> = groups.iter().filter(|g| g.name.is_some()).collect();
    if !named.is_empty() {
        let _ = writeln!(out, "$PhysicalNames\n{}", named.len());
        for g in &named {
            let _ = writeln!(
                out,
                "{} {} \"{}\"",
                g.dim.as_i32(),
                g.tag,
                g.name.unwrap_or_default()
            );
        }
        let _ = writeln!(out, "$EndPhysicalNames");
    }

    let _ = writeln!(out, "$Nodes\n{}", mesh.nodes.len());
    for (i, p) in mesh.nodes.iter().enumerate() {
        let _ = writeln!(out, "{} {:?} {:?} {:?}", i + 1, p.x, p.y, p.z);
    }
    let _ = writeln!(out, "$EndNodes");

    let mut lines = Vec::new();
    let mut write_element = |element: &Element, physical: Tag| {
        let nodes: Vec<String> = element.nodes.iter().map(|n| (n + 1).to_string()).collect();
        lines.push(format!(
            "{} 2 {physical} {} {}",
            element.kind.msh_type(mesh.order),
            element.entity.tag,
            nodes.join(" ")
        ));
    };
    if groups.is_empty() {
        for element in &mesh.elements {
            write_element(element, 0);
        }
    } else {
        for group in groups {
            for element in mesh
                .elements
                .iter()
                .filter(|e| e.entity.dim == group.dim && group.entities.contains(&e.entity.tag))
            {
                write_element(element, group.tag);
            }
        }
    }

    let _ = writeln!(out, "$Elements\n{}", lines.len());
    for (i, line) in lines.iter().enumerate() {
        let _ = writeln!(out, "{} {line}", i + 1);
    }
    let _ = writeln!(out, "$EndElements");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_cell() -> Rect {
        Rect {
            x_min: 0.0,
            x_max: 2.0,
            y_min: 0.0,
            y_max: 1.0,
        }
    }

    fn no_fields() -> BTreeMap<Tag, MeshField> {
        BTreeMap::new()
    }

    fn area(tri: &[Point2; 3]) -> f64 {
        let [a, b, c] = tri;
        0.5 * ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y))
    }

    #[test]
    fn coarse_cell_is_two_triangles() {
        let fields = no_fields();
        let lookup = BTreeMap::new();
        let sizing = Sizing {
            max_size: f64::INFINITY,
            fields: &fields,
            background: None,
            surface_cells: &lookup,
        };
        let tris = triangulate_cell(&unit_cell(), &sizing).unwrap();
        assert_eq!(tris.len(), 2);
        let total: f64 = tris.iter().map(area).sum();
        assert_relative_eq!(total.abs(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn refined_cell_covers_area() {
        let fields = no_fields();
        let lookup = BTreeMap::new();
        let sizing = Sizing {
            max_size: 0.25,
            fields: &fields,
            background: None,
            surface_cells: &lookup,
        };
        let tris = triangulate_cell(&unit_cell(), &sizing).unwrap();
        // 8 x 4 lattice squares, two triangles each.
        assert_eq!(tris.len(), 64);
        let total: f64 = tris.iter().map(|t| area(t).abs()).sum();
        assert_relative_eq!(total, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn box_field_refines_inside_only() {
        let mut fields = no_fields();
        fields.insert(
            1,
            MeshField::Box {
                size_in: 0.1,
                size_out: None,
                x_min: 0.0,
                x_max: 1.0,
                y_min: 0.0,
                y_max: 1.0,
            },
        );
        let lookup = BTreeMap::new();
        let sizing = Sizing {
            max_size: 5.0,
            fields: &fields,
            background: Some(1),
            surface_cells: &lookup,
        };
        assert_relative_eq!(sizing.size_at(Point2::new(0.5, 0.5)), 0.1);
        assert_relative_eq!(sizing.size_at(Point2::new(3.0, 0.5)), 5.0);
    }

    #[test]
    fn extruded_cell_yields_prisms_and_shared_nodes() {
        let fields = no_fields();
        let lookup = BTreeMap::new();
        let sizing = Sizing {
            max_size: f64::INFINITY,
            fields: &fields,
            background: None,
            surface_cells: &lookup,
        };
        let cells = [unit_cell()];
        let volume = VolumePatch {
            entity: EntityRef::volume(1),
            cells: &cells,
            z_min: -1.0,
            z_max: 0.0,
            layers: 3,
        };
        let top = HorizontalPatch {
            entity: EntityRef::surface(1),
            z: 0.0,
            cells: &cells,
        };
        let mesh = generate(3, &[top], &[], &[volume], &sizing).unwrap();
        assert_eq!(mesh.count(ElementKind::Prism), 6);
        assert_eq!(mesh.count(ElementKind::Triangle), 2);
        // 4 corners on each of 4 levels; the top triangles reuse prism nodes.
        assert_eq!(mesh.nodes.len(), 16);
    }

    #[test]
    fn second_order_adds_mid_edge_nodes() {
        let fields = no_fields();
        let lookup = BTreeMap::new();
        let sizing = Sizing {
            max_size: f64::INFINITY,
            fields: &fields,
            background: None,
            surface_cells: &lookup,
        };
        let cells = [unit_cell()];
        let patch = HorizontalPatch {
            entity: EntityRef::surface(1),
            z: 0.0,
            cells: &cells,
        };
        let mut mesh = generate(2, &[patch], &[], &[], &sizing).unwrap();
        mesh.elevate_to_second_order();
        assert_eq!(mesh.order, 2);
        assert!(mesh.elements.iter().all(|e| e.nodes.len() == 6));
        // 4 corners + 4 sides + 1 diagonal.
        assert_eq!(mesh.nodes.len(), 9);
    }

    #[test]
    fn msh_lists_only_grouped_elements() {
        let fields = no_fields();
        let lookup = BTreeMap::new();
        let sizing = Sizing {
            max_size: f64::INFINITY,
            fields: &fields,
            background: None,
            surface_cells: &lookup,
        };
        let cells = [unit_cell()];
        let patches = [
            HorizontalPatch {
                entity: EntityRef::surface(1),
                z: 0.0,
                cells: &cells,
            },
            HorizontalPatch {
                entity: EntityRef::surface(2),
                z: -1.0,
                cells: &cells,
            },
        ];
        let mesh = generate(2, &patches, &[], &[], &sizing).unwrap();
        let groups = [PhysicalRecord {
            dim: Dim::Surface,
            tag: 7,
            name: Some("gate"),
            entities: &[2],
        }];
        let text = to_msh(&mesh, &groups);
        assert!(text.contains("$PhysicalNames\n1\n2 7 \"gate\""));
        assert!(text.contains("$Elements\n2\n"));
        assert!(text.contains(" 2 2 7 2 "));
    }
}
