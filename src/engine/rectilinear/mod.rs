//! In-memory geometry engine for Manhattan layouts.
//!
//! Horizontal surfaces are unions of axis-aligned cells at one `z` level and
//! vertical surfaces are wall segments between two levels. That is enough to
//! represent stacks of extruded lithographic masks exactly.

mod cells;
mod mesh;

pub use cells::Rect;
pub use mesh::{Element, ElementKind, Mesh};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::Path;

use tracing::{debug, info};

use crate::engine::{Dim, EntityRef, Extrusion, FragmentMap, GeometryEngine, MeshField, Tag};
use crate::error::EngineError;
use crate::mask::{CurveLoopRef, LineRef, PointRef, Script, Statement, SurfaceRef};
use crate::math::{quantize, Point2, Point3, TOLERANCE};

use cells::{boundary_edges, partition, polygon_cells, segment_key, SegmentKey};
use mesh::{HorizontalPatch, PhysicalRecord, Sizing, VolumePatch, WallPatch};

/// Geometry of a surface entity.
#[derive(Debug, Clone)]
pub enum SurfaceShape {
    /// Cells in the plane `z`.
    Horizontal { z: f64, cells: Vec<Rect> },
    /// Vertical strip above the segment `start`-`end`.
    Wall {
        start: Point2,
        end: Point2,
        z_min: f64,
        z_max: f64,
        layers: usize,
    },
}

#[derive(Debug, Clone)]
struct SurfaceData {
    shape: SurfaceShape,
    color: Option<[u8; 3]>,
}

#[derive(Debug, Clone)]
struct VolumeData {
    cells: Vec<Rect>,
    z_min: f64,
    z_max: f64,
    layers: usize,
    boundary: Vec<Tag>,
    color: Option<[u8; 3]>,
}

#[derive(Debug, Clone, Default)]
struct PhysicalGroup {
    entities: Vec<Tag>,
    name: Option<String>,
}

type WallKey = (SegmentKey, i64, i64);

/// Reference [`GeometryEngine`] over axis-aligned cells.
#[derive(Debug)]
pub struct RectilinearEngine {
    surfaces: BTreeMap<Tag, SurfaceData>,
    volumes: BTreeMap<Tag, VolumeData>,
    walls: HashMap<WallKey, Tag>,
    next_surface: Tag,
    next_volume: Tag,
    groups: BTreeMap<(Dim, Tag), PhysicalGroup>,
    fields: BTreeMap<Tag, MeshField>,
    next_field: Tag,
    background: Option<Tag>,
    max_mesh_size: f64,
    point_mesh_size: Option<f64>,
    mesh: Option<Mesh>,
}

impl Default for RectilinearEngine {
    fn default() -> Self {
        Self {
            surfaces: BTreeMap::new(),
            volumes: BTreeMap::new(),
            walls: HashMap::new(),
            next_surface: 1,
            next_volume: 1,
            groups: BTreeMap::new(),
            fields: BTreeMap::new(),
            next_field: 1,
            background: None,
            max_mesh_size: f64::INFINITY,
            point_mesh_size: None,
            mesh: None,
        }
    }
}

impl RectilinearEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Geometry of a surface.
    #[must_use]
    pub fn surface_shape(&self, tag: Tag) -> Option<&SurfaceShape> {
        self.surfaces.get(&tag).map(|s| &s.shape)
    }

    /// Footprint cells and `z` range of a volume.
    #[must_use]
    pub fn volume_extent(&self, tag: Tag) -> Option<(&[Rect], f64, f64)> {
        self.volumes
            .get(&tag)
            .map(|v| (v.cells.as_slice(), v.z_min, v.z_max))
    }

    /// Display color of an entity.
    #[must_use]
    pub fn color(&self, entity: EntityRef) -> Option<[u8; 3]> {
        match entity.dim {
            Dim::Surface => self.surfaces.get(&entity.tag).and_then(|s| s.color),
            Dim::Volume => self.volumes.get(&entity.tag).and_then(|v| v.color),
        }
    }

    /// The generated mesh, if any.
    #[must_use]
    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    fn contains(&self, entity: EntityRef) -> bool {
        match entity.dim {
            Dim::Surface => self.surfaces.contains_key(&entity.tag),
            Dim::Volume => self.volumes.contains_key(&entity.tag),
        }
    }

    fn horizontal(&self, tag: Tag) -> Result<(f64, &[Rect]), EngineError> {
        match self.surfaces.get(&tag).map(|s| &s.shape) {
            Some(SurfaceShape::Horizontal { z, cells }) => Ok((*z, cells.as_slice())),
            Some(SurfaceShape::Wall { .. }) => Err(EngineError::Unsupported(format!(
                "surface {tag} is vertical"
            ))),
            None => Err(EngineError::EntityNotFound {
                dim: Dim::Surface,
                tag,
            }),
        }
    }

    fn insert_surface(&mut self, shape: SurfaceShape) -> Tag {
        let tag = self.next_surface;
        self.next_surface += 1;
        self.surfaces.insert(tag, SurfaceData { shape, color: None });
        tag
    }

    fn remove_surface(&mut self, tag: Tag) {
        self.surfaces.remove(&tag);
        for group in self
            .groups
            .iter_mut()
            .filter(|((dim, _), _)| *dim == Dim::Surface)
            .map(|(_, g)| g)
        {
            group.entities.retain(|&t| t != tag);
        }
    }

    /// Returns the wall above `start`-`end`, creating it if needed.
    fn wall(&mut self, start: Point2, end: Point2, z_min: f64, z_max: f64, layers: usize) -> Tag {
        let key = (segment_key(start, end), quantize(z_min), quantize(z_max));
        if let Some(&tag) = self.walls.get(&key) {
            if self.surfaces.contains_key(&tag) {
                return tag;
            }
        }
        let tag = self.insert_surface(SurfaceShape::Wall {
            start,
            end,
            z_min,
            z_max,
            layers,
        });
        self.walls.insert(key, tag);
        tag
    }

    /// Current pieces of script surfaces, in first-seen order.
    fn script_operands(
        pieces: &HashMap<SurfaceRef, Vec<Tag>>,
        surfaces: &[SurfaceRef],
    ) -> Result<Vec<EntityRef>, EngineError> {
        let mut seen = BTreeSet::new();
        let mut operands = Vec::new();
        for surface in surfaces {
            let tags = pieces.get(surface).ok_or(EngineError::EntityNotFound {
                dim: Dim::Surface,
                tag: Tag::try_from(surface.0).unwrap_or(Tag::MAX),
            })?;
            for &tag in tags {
                if seen.insert(tag) {
                    operands.push(EntityRef::surface(tag));
                }
            }
        }
        Ok(operands)
    }

    fn sizing_cells(&self) -> BTreeMap<Tag, Vec<Rect>> {
        self.surfaces
            .iter()
            .filter_map(|(&tag, s)| match &s.shape {
                SurfaceShape::Horizontal { cells, .. } => Some((tag, cells.clone())),
                SurfaceShape::Wall { .. } => None,
            })
            .collect()
    }
}

impl GeometryEngine for RectilinearEngine {
    fn load_script(&mut self, script: &Script) -> Result<(), EngineError> {
        let mut points: HashMap<PointRef, Point3> = HashMap::new();
        let mut lines: HashMap<LineRef, PointRef> = HashMap::new();
        let mut loops: HashMap<CurveLoopRef, Vec<LineRef>> = HashMap::new();
        let mut pieces: HashMap<SurfaceRef, Vec<Tag>> = HashMap::new();

        for statement in script.statements() {
            match statement {
                Statement::Point {
                    id,
                    x,
                    y,
                    z,
                    mesh_size,
                } => {
                    points.insert(*id, Point3::new(*x, *y, *z));
                    if *mesh_size > 0.0 {
                        self.point_mesh_size =
                            Some(self.point_mesh_size.map_or(*mesh_size, |s| s.min(*mesh_size)));
                    }
                }
                Statement::Line { id, start, .. } => {
                    lines.insert(*id, *start);
                }
                Statement::CurveLoop { id, lines: members } => {
                    loops.insert(*id, members.clone());
                }
                Statement::PlaneSurface { id, curve_loop } => {
                    let members = loops.get(curve_loop).ok_or_else(|| {
                        EngineError::Unsupported(format!("unknown curve loop {curve_loop}"))
                    })?;
                    let mut polygon = Vec::with_capacity(members.len());
                    let mut z = 0.0;
                    for line in members {
                        let start = lines
                            .get(line)
                            .and_then(|p| points.get(p))
                            .ok_or_else(|| {
                                EngineError::Unsupported(format!("unknown line {line}"))
                            })?;
                        z = start.z;
                        polygon.push(Point2::new(start.x, start.y));
                    }
                    let cells = polygon_cells(&polygon)?;
                    let tag = self.insert_surface(SurfaceShape::Horizontal { z, cells });
                    pieces.insert(*id, vec![tag]);
                }
                Statement::BooleanFragments { surfaces, delete } => {
                    if !delete {
                        return Err(EngineError::Unsupported(
                            "fragments that keep their operands".into(),
                        ));
                    }
                    let operands = Self::script_operands(&pieces, surfaces)?;
                    let map = self.fragment(&operands, &[])?;
                    for tags in pieces.values_mut() {
                        let mut replaced = Vec::new();
                        for &tag in tags.iter() {
                            let source = EntityRef::surface(tag);
                            if operands.contains(&source) {
                                replaced.extend(map.pieces_of(source).iter().map(|e| e.tag));
                            } else {
                                replaced.push(tag);
                            }
                        }
                        *tags = replaced;
                    }
                }
            }
        }
        info!(
            surfaces = self.surfaces.len(),
            statements = script.statements().len(),
            "loaded script"
        );
        Ok(())
    }

    fn set_max_mesh_size(&mut self, size: f64) {
        self.max_mesh_size = size;
    }

    fn entities(&self, dim: Dim) -> Vec<EntityRef> {
        match dim {
            Dim::Surface => self.surfaces.keys().map(|&t| EntityRef::surface(t)).collect(),
            Dim::Volume => self.volumes.keys().map(|&t| EntityRef::volume(t)).collect(),
        }
    }

    fn add_rectangle(
        &mut self,
        x: f64,
        y: f64,
        z: f64,
        dx: f64,
        dy: f64,
    ) -> Result<EntityRef, EngineError> {
        if (dx * dy).abs() < TOLERANCE {
            return Err(EngineError::Degenerate(format!(
                "rectangle {dx} x {dy} has no area"
            )));
        }
        let rect = Rect::from_corners(Point2::new(x, y), Point2::new(x + dx, y + dy));
        let tag = self.insert_surface(SurfaceShape::Horizontal {
            z,
            cells: vec![rect],
        });
        debug!(tag, "added rectangle");
        Ok(EntityRef::surface(tag))
    }

    fn extrude(
        &mut self,
        entities: &[EntityRef],
        dx: f64,
        dy: f64,
        dz: f64,
        num_elements: usize,
    ) -> Result<Vec<Extrusion>, EngineError> {
        if dx.abs() > TOLERANCE || dy.abs() > TOLERANCE {
            return Err(EngineError::Unsupported(
                "extrusion with an in-plane component".into(),
            ));
        }
        if dz.abs() < TOLERANCE {
            return Err(EngineError::Degenerate("zero extrusion height".into()));
        }
        if num_elements == 0 {
            return Err(EngineError::Degenerate("zero extrusion layers".into()));
        }

        let mut inputs = Vec::with_capacity(entities.len());
        for entity in entities {
            if entity.dim != Dim::Surface {
                return Err(EngineError::Unsupported(format!(
                    "extruding {} {}",
                    entity.dim, entity.tag
                )));
            }
            let (z, cells) = self.horizontal(entity.tag)?;
            inputs.push((*entity, z, cells.to_vec()));
        }

        let mut result = Vec::with_capacity(inputs.len());
        for (source, z, cells) in inputs {
            let (z_min, z_max) = if dz > 0.0 { (z, z + dz) } else { (z + dz, z) };
            let top = self.insert_surface(SurfaceShape::Horizontal {
                z: z + dz,
                cells: cells.clone(),
            });
            let mut sides = Vec::new();
            for (a, b) in boundary_edges(&cells) {
                let wall = self.wall(a, b, z_min, z_max, num_elements);
                if !sides.contains(&wall) {
                    sides.push(wall);
                }
            }

            let volume = self.next_volume;
            self.next_volume += 1;
            let mut boundary = vec![source.tag, top];
            boundary.extend(&sides);
            self.volumes.insert(
                volume,
                VolumeData {
                    cells,
                    z_min,
                    z_max,
                    layers: num_elements,
                    boundary,
                    color: None,
                },
            );

            result.push(Extrusion {
                source,
                top: EntityRef::surface(top),
                volume: EntityRef::volume(volume),
                sides: sides.into_iter().map(EntityRef::surface).collect(),
            });
        }
        debug!(inputs = result.len(), dz, "extruded");
        Ok(result)
    }

    fn boundary(&self, entities: &[EntityRef]) -> Result<Vec<EntityRef>, EngineError> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for entity in entities {
            if entity.dim != Dim::Volume {
                return Err(EngineError::Unsupported(format!(
                    "boundary of {} {}",
                    entity.dim, entity.tag
                )));
            }
            let volume = self
                .volumes
                .get(&entity.tag)
                .ok_or(EngineError::EntityNotFound {
                    dim: Dim::Volume,
                    tag: entity.tag,
                })?;
            for &tag in &volume.boundary {
                if seen.insert(tag) {
                    out.push(EntityRef::surface(tag));
                }
            }
        }
        Ok(out)
    }

    fn fragment(
        &mut self,
        objects: &[EntityRef],
        tools: &[EntityRef],
    ) -> Result<FragmentMap, EngineError> {
        // Operands, objects first, without repeats
        let mut operands: Vec<EntityRef> = Vec::new();
        for entity in objects.iter().chain(tools) {
            if !operands.contains(entity) {
                operands.push(*entity);
            }
        }
        if operands.is_empty() {
            return Ok(FragmentMap::default());
        }

        // Validate operands: free horizontal surfaces on one level
        let mut level = None;
        let mut operand_cells = Vec::with_capacity(operands.len());
        for entity in &operands {
            if entity.dim != Dim::Surface {
                return Err(EngineError::Unsupported(format!(
                    "fragmenting {} {}",
                    entity.dim, entity.tag
                )));
            }
            let (z, cells) = self.horizontal(entity.tag)?;
            if level.is_some_and(|l: f64| (l - z).abs() > TOLERANCE) {
                return Err(EngineError::Unsupported(
                    "fragment operands on different levels".into(),
                ));
            }
            level = Some(z);
            if self.volumes.values().any(|v| v.boundary.contains(&entity.tag)) {
                return Err(EngineError::Unsupported(format!(
                    "surface {} bounds a volume",
                    entity.tag
                )));
            }
            operand_cells.push(cells.to_vec());
        }
        let z = level.unwrap_or_default();

        // Pieces
        let slices: Vec<&[Rect]> = operand_cells.iter().map(Vec::as_slice).collect();
        let result = partition(&slices);

        let mut kept = BTreeSet::new();
        let mut piece_tags = Vec::with_capacity(result.pieces.len());
        for piece in &result.pieces {
            // An operand that ends up as exactly one piece keeps its tag.
            let whole = piece.sources.iter().copied().find(|&i| {
                result.operand_cells[i] == piece.cells.len() && !kept.contains(&operands[i].tag)
            });
            let tag = if let Some(i) = whole {
                let tag = operands[i].tag;
                kept.insert(tag);
                if let Some(surface) = self.surfaces.get_mut(&tag) {
                    surface.shape = SurfaceShape::Horizontal {
                        z,
                        cells: piece.cells.clone(),
                    };
                }
                tag
            } else {
                self.insert_surface(SurfaceShape::Horizontal {
                    z,
                    cells: piece.cells.clone(),
                })
            };
            piece_tags.push(tag);
        }

        // Delete the consumed operands
        for entity in &operands {
            if !kept.contains(&entity.tag) {
                self.remove_surface(entity.tag);
            }
        }

        let sources = operands
            .iter()
            .enumerate()
            .map(|(i, entity)| {
                let produced = result
                    .pieces
                    .iter()
                    .zip(&piece_tags)
                    .filter(|(piece, _)| piece.sources.contains(&i))
                    .map(|(_, &tag)| EntityRef::surface(tag))
                    .collect();
                (*entity, produced)
            })
            .collect();

        info!(
            operands = operands.len(),
            pieces = piece_tags.len(),
            "fragmented surfaces"
        );
        Ok(FragmentMap {
            entities: piece_tags.into_iter().map(EntityRef::surface).collect(),
            sources,
        })
    }

    // --- Physical groups ---

    fn add_physical_group(&mut self, dim: Dim, tags: &[Tag]) -> Result<Tag, EngineError> {
        if let Some(&tag) = tags.iter().find(|&&t| !self.contains(EntityRef { dim, tag: t })) {
            return Err(EngineError::EntityNotFound { dim, tag });
        }
        let group = self
            .groups
            .range((dim, Tag::MIN)..=(dim, Tag::MAX))
            .next_back()
            .map_or(1, |((_, t), _)| t + 1);
        self.groups.insert(
            (dim, group),
            PhysicalGroup {
                entities: tags.to_vec(),
                name: None,
            },
        );
        Ok(group)
    }

    fn set_physical_name(&mut self, dim: Dim, group: Tag, name: &str) -> Result<(), EngineError> {
        let entry = self
            .groups
            .get_mut(&(dim, group))
            .ok_or(EngineError::PhysicalGroupNotFound { dim, tag: group })?;
        entry.name = Some(name.to_owned());
        Ok(())
    }

    fn remove_physical_groups(&mut self, groups: &[(Dim, Tag)]) {
        for key in groups {
            self.groups.remove(key);
        }
    }

    fn remove_all_physical_groups(&mut self) {
        self.groups.clear();
    }

    fn remove_physical_name(&mut self, dim: Dim, name: &str) {
        for (_, group) in self.groups.iter_mut().filter(|((d, _), _)| *d == dim) {
            if group.name.as_deref() == Some(name) {
                group.name = None;
            }
        }
    }

    fn physical_groups(&self, dim: Dim) -> Vec<Tag> {
        self.groups
            .keys()
            .filter(|(d, _)| *d == dim)
            .map(|&(_, t)| t)
            .collect()
    }

    fn physical_name(&self, dim: Dim, group: Tag) -> Option<String> {
        self.groups.get(&(dim, group)).and_then(|g| g.name.clone())
    }

    fn physical_groups_for_entity(&self, entity: EntityRef) -> Vec<Tag> {
        self.groups
            .iter()
            .filter(|((d, _), g)| *d == entity.dim && g.entities.contains(&entity.tag))
            .map(|(&(_, t), _)| t)
            .collect()
    }

    fn entities_for_physical_group(&self, dim: Dim, group: Tag) -> Result<Vec<Tag>, EngineError> {
        self.groups
            .get(&(dim, group))
            .map(|g| g.entities.clone())
            .ok_or(EngineError::PhysicalGroupNotFound { dim, tag: group })
    }

    // --- Mesh fields ---

    fn add_mesh_field(&mut self, field: MeshField) -> Result<Tag, EngineError> {
        if let MeshField::Min { fields } = &field {
            if let Some(&missing) = fields.iter().find(|f| !self.fields.contains_key(f)) {
                return Err(EngineError::FieldNotFound(missing));
            }
        }
        let tag = self.next_field;
        self.next_field += 1;
        self.fields.insert(tag, field);
        Ok(tag)
    }

    fn set_background_field(&mut self, field: Tag) -> Result<(), EngineError> {
        if !self.fields.contains_key(&field) {
            return Err(EngineError::FieldNotFound(field));
        }
        self.background = Some(field);
        Ok(())
    }

    fn clear_mesh(&mut self) {
        self.mesh = None;
    }

    fn set_color(&mut self, entities: &[EntityRef], rgb: [u8; 3]) {
        for entity in entities {
            match entity.dim {
                Dim::Surface => {
                    if let Some(s) = self.surfaces.get_mut(&entity.tag) {
                        s.color = Some(rgb);
                    }
                }
                Dim::Volume => {
                    if let Some(v) = self.volumes.get_mut(&entity.tag) {
                        v.color = Some(rgb);
                    }
                }
            }
        }
    }

    // --- Meshing and export ---

    fn generate_mesh(&mut self, dim: u8) -> Result<(), EngineError> {
        if !(2..=3).contains(&dim) {
            return Err(EngineError::Unsupported(format!("mesh dimension {dim}")));
        }
        let surface_cells = self.sizing_cells();
        let sizing = Sizing {
            max_size: self
                .max_mesh_size
                .min(self.point_mesh_size.unwrap_or(f64::INFINITY)),
            fields: &self.fields,
            background: self.background,
            surface_cells: &surface_cells,
        };

        let mut horizontals = Vec::new();
        let mut walls = Vec::new();
        for (&tag, surface) in &self.surfaces {
            let entity = EntityRef::surface(tag);
            match &surface.shape {
                SurfaceShape::Horizontal { z, cells } => horizontals.push(HorizontalPatch {
                    entity,
                    z: *z,
                    cells,
                }),
                SurfaceShape::Wall {
                    start,
                    end,
                    z_min,
                    z_max,
                    layers,
                } => walls.push(WallPatch {
                    entity,
                    start: *start,
                    end: *end,
                    z_min: *z_min,
                    z_max: *z_max,
                    layers: *layers,
                }),
            }
        }
        let volumes: Vec<VolumePatch<'_>> = self
            .volumes
            .iter()
            .map(|(&tag, v)| VolumePatch {
                entity: EntityRef::volume(tag),
                cells: &v.cells,
                z_min: v.z_min,
                z_max: v.z_max,
                layers: v.layers,
            })
            .collect();

        let mesh = mesh::generate(dim, &horizontals, &walls, &volumes, &sizing)?;
        info!(
            nodes = mesh.nodes.len(),
            elements = mesh.elements.len(),
            dim,
            "generated mesh"
        );
        self.mesh = Some(mesh);
        Ok(())
    }

    fn set_mesh_order(&mut self, order: u8) -> Result<(), EngineError> {
        let mesh = self.mesh.as_mut().ok_or(EngineError::NoMesh)?;
        match order {
            1 => mesh.reduce_to_first_order(),
            2 => mesh.elevate_to_second_order(),
            _ => return Err(EngineError::Unsupported(format!("mesh order {order}"))),
        }
        Ok(())
    }

    fn write_mesh(&self, path: &Path) -> Result<(), EngineError> {
        let mesh = self.mesh.as_ref().ok_or(EngineError::NoMesh)?;
        let records: Vec<PhysicalRecord<'_>> = self
            .groups
            .iter()
            .map(|(&(dim, tag), g)| PhysicalRecord {
                dim,
                tag,
                name: g.name.as_deref(),
                entities: &g.entities,
            })
            .collect();
        std::fs::write(path, mesh::to_msh(mesh, &records))?;
        info!(path = %path.display(), "wrote mesh");
        Ok(())
    }

    fn write_geometry(&self, path: &Path) -> Result<(), EngineError> {
        let mut out = String::from("// unrolled rectilinear geometry\n");
        for (tag, surface) in &self.surfaces {
            match &surface.shape {
                SurfaceShape::Horizontal { z, cells } => {
                    let cells: Vec<String> = cells
                        .iter()
                        .map(|c| format!("{:?}, {:?}, {:?}, {:?}", c.x_min, c.x_max, c.y_min, c.y_max))
                        .collect();
                    let _ = writeln!(
                        out,
                        "Surface({tag}) = Horizontal{{{z:?}; {}}};",
                        cells.join("; ")
                    );
                }
                SurfaceShape::Wall {
                    start,
                    end,
                    z_min,
                    z_max,
                    ..
                } => {
                    let _ = writeln!(
                        out,
                        "Surface({tag}) = Wall{{{:?}, {:?}, {:?}, {:?}; {z_min:?}, {z_max:?}}};",
                        start.x, start.y, end.x, end.y
                    );
                }
            }
        }
        for (tag, volume) in &self.volumes {
            let boundary: Vec<String> = volume.boundary.iter().map(ToString::to_string).collect();
            let _ = writeln!(
                out,
                "Volume({tag}) = Prism{{{:?}, {:?}; {}}};",
                volume.z_min,
                volume.z_max,
                boundary.join(", ")
            );
        }
        for (&(dim, tag), group) in &self.groups {
            let keyword = match dim {
                Dim::Surface => "Surface",
                Dim::Volume => "Volume",
            };
            let members: Vec<String> = group.entities.iter().map(ToString::to_string).collect();
            match &group.name {
                Some(name) => {
                    let _ = writeln!(
                        out,
                        "Physical {keyword}(\"{name}\", {tag}) = {{{}}};",
                        members.join(", ")
                    );
                }
                None => {
                    let _ = writeln!(out, "Physical {keyword}({tag}) = {{{}}};", members.join(", "));
                }
            }
        }
        std::fs::write(path, out)?;
        info!(path = %path.display(), "wrote geometry");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn area(cells: &[Rect]) -> f64 {
        cells.iter().map(Rect::area).sum()
    }

    fn cells_of(engine: &RectilinearEngine, tag: Tag) -> Vec<Rect> {
        match engine.surface_shape(tag) {
            Some(SurfaceShape::Horizontal { cells, .. }) => cells.clone(),
            other => panic!("expected horizontal surface, got {other:?}"),
        }
    }

    // ── Script loading ──

    #[test]
    fn loads_compiled_square() {
        let mut script = Script::new();
        let corners = [(0.0, 0.0), (2.0, 0.0), (2.0, 3.0), (0.0, 3.0)];
        let points: Vec<_> = corners
            .iter()
            .map(|&(x, y)| script.add_point(x, y, 0.0, 1.0))
            .collect();
        let lines: Vec<_> = (0..4)
            .map(|i| script.add_line(points[i], points[(i + 1) % 4]))
            .collect();
        let curve_loop = script.add_curve_loop(lines);
        script.add_plane_surface(curve_loop);

        let mut engine = RectilinearEngine::new();
        engine.load_script(&script).unwrap();
        assert_eq!(engine.entities(Dim::Surface), vec![EntityRef::surface(1)]);
        assert_relative_eq!(area(&cells_of(&engine, 1)), 6.0);
    }

    #[test]
    fn script_fragments_overlapping_layers() {
        let text = "\
Point(1) = {0, 0, 0, 1};
Point(2) = {4, 0, 0, 1};
Point(3) = {4, 4, 0, 1};
Point(4) = {0, 4, 0, 1};
Point(5) = {1, 1, 0, 1};
Point(6) = {2, 1, 0, 1};
Point(7) = {2, 2, 0, 1};
Point(8) = {1, 2, 0, 1};
Line(1) = {1, 2};
Line(2) = {2, 3};
Line(3) = {3, 4};
Line(4) = {4, 1};
Line(5) = {5, 6};
Line(6) = {6, 7};
Line(7) = {7, 8};
Line(8) = {8, 5};
Curve Loop(1) = {1, 2, 3, 4};
Plane Surface(1) = {1};
Curve Loop(2) = {5, 6, 7, 8};
Plane Surface(2) = {2};
BooleanFragments{ Surface{1, 2}; Delete; }{}
";
        let script = Script::parse(text).unwrap();
        let mut engine = RectilinearEngine::new();
        engine.load_script(&script).unwrap();

        let surfaces = engine.entities(Dim::Surface);
        assert_eq!(surfaces.len(), 2);
        // The inner square survives unchanged; the host becomes a ring.
        assert_relative_eq!(area(&cells_of(&engine, 2)), 1.0);
        let ring = surfaces.iter().find(|s| s.tag != 2).unwrap();
        assert_relative_eq!(area(&cells_of(&engine, ring.tag)), 15.0);
    }

    // ── Fragment ──

    #[test]
    fn fragment_maps_each_operand_to_its_pieces() {
        let mut engine = RectilinearEngine::new();
        let host = engine.add_rectangle(0.0, 0.0, 0.0, 4.0, 4.0).unwrap();
        let dot = engine.add_rectangle(1.0, 1.0, 0.0, 1.0, 1.0).unwrap();

        let map = engine.fragment(&[host], &[dot]).unwrap();
        assert_eq!(map.entities.len(), 2);
        assert_eq!(map.pieces_of(dot), &[dot]);
        assert_eq!(map.pieces_of(host).len(), 2);
        assert!(map.pieces_of(host).contains(&dot));
        assert!(!engine.entities(Dim::Surface).contains(&host));
    }

    #[test]
    fn fragment_of_disjoint_surfaces_keeps_tags() {
        let mut engine = RectilinearEngine::new();
        let a = engine.add_rectangle(0.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        let b = engine.add_rectangle(3.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        let map = engine.fragment(&[a], &[b]).unwrap();
        assert_eq!(map.entities, vec![a, b]);
        assert_eq!(map.pieces_of(a), &[a]);
    }

    #[test]
    fn fragment_rejects_mixed_levels() {
        let mut engine = RectilinearEngine::new();
        let a = engine.add_rectangle(0.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        let b = engine.add_rectangle(0.0, 0.0, 1.0, 1.0, 1.0).unwrap();
        assert!(matches!(
            engine.fragment(&[a], &[b]),
            Err(EngineError::Unsupported(_))
        ));
        assert_eq!(engine.entities(Dim::Surface).len(), 2);
    }

    // ── Extrude ──

    #[test]
    fn extrude_builds_top_sides_and_volume() {
        let mut engine = RectilinearEngine::new();
        let base = engine.add_rectangle(0.0, 0.0, 0.0, 2.0, 1.0).unwrap();
        let out = engine.extrude(&[base], 0.0, 0.0, -3.0, 2).unwrap();

        assert_eq!(out.len(), 1);
        let ex = &out[0];
        assert_eq!(ex.source, base);
        assert_eq!(ex.sides.len(), 4);
        match engine.surface_shape(ex.top.tag).unwrap() {
            SurfaceShape::Horizontal { z, .. } => assert_relative_eq!(*z, -3.0),
            SurfaceShape::Wall { .. } => panic!("top must be horizontal"),
        }
        let (_, z_min, z_max) = engine.volume_extent(ex.volume.tag).unwrap();
        assert_relative_eq!(z_min, -3.0);
        assert_relative_eq!(z_max, 0.0);

        let boundary = engine.boundary(&[ex.volume]).unwrap();
        assert_eq!(boundary[0], base);
        assert_eq!(boundary[1], ex.top);
        assert_eq!(boundary.len(), 6);
    }

    #[test]
    fn neighbours_share_their_common_wall() {
        let mut engine = RectilinearEngine::new();
        let left = engine.add_rectangle(0.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        let right = engine.add_rectangle(1.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        let out = engine.extrude(&[left, right], 0.0, 0.0, -1.0, 1).unwrap();

        let shared: Vec<_> = out[0]
            .sides
            .iter()
            .filter(|s| out[1].sides.contains(s))
            .collect();
        assert_eq!(shared.len(), 1);
        // 2 bases + 2 tops + 7 distinct walls.
        assert_eq!(engine.entities(Dim::Surface).len(), 11);
    }

    #[test]
    fn extrude_rejects_lateral_direction_without_changes() {
        let mut engine = RectilinearEngine::new();
        let base = engine.add_rectangle(0.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(engine.extrude(&[base], 1.0, 0.0, 0.0, 1).is_err());
        assert!(engine.entities(Dim::Volume).is_empty());
        assert_eq!(engine.entities(Dim::Surface).len(), 1);
    }

    // ── Physical groups ──

    #[test]
    fn physical_groups_are_numbered_per_dimension() {
        let mut engine = RectilinearEngine::new();
        let base = engine.add_rectangle(0.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        let out = engine.extrude(&[base], 0.0, 0.0, -1.0, 1).unwrap();

        let s = engine.add_physical_group(Dim::Surface, &[base.tag]).unwrap();
        let v = engine
            .add_physical_group(Dim::Volume, &[out[0].volume.tag])
            .unwrap();
        assert_eq!((s, v), (1, 1));
        engine.set_physical_name(Dim::Surface, s, "gate").unwrap();

        assert_eq!(engine.physical_name(Dim::Surface, s).as_deref(), Some("gate"));
        assert_eq!(engine.physical_groups_for_entity(base), vec![s]);

        engine.remove_physical_name(Dim::Surface, "gate");
        assert_eq!(engine.physical_name(Dim::Surface, s), None);
        engine.remove_physical_groups(&[(Dim::Surface, s)]);
        assert!(engine.physical_groups(Dim::Surface).is_empty());
        assert_eq!(engine.physical_groups(Dim::Volume), vec![v]);
    }

    #[test]
    fn removing_a_name_leaves_other_dimension_alone() {
        let mut engine = RectilinearEngine::new();
        let base = engine.add_rectangle(0.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        let out = engine.extrude(&[base], 0.0, 0.0, -1.0, 1).unwrap();

        let s = engine.add_physical_group(Dim::Surface, &[base.tag]).unwrap();
        let v = engine
            .add_physical_group(Dim::Volume, &[out[0].volume.tag])
            .unwrap();
        engine.set_physical_name(Dim::Surface, s, "gate").unwrap();
        engine.set_physical_name(Dim::Volume, v, "gate").unwrap();

        engine.remove_physical_name(Dim::Surface, "gate");
        assert_eq!(engine.physical_name(Dim::Surface, s), None);
        assert_eq!(engine.physical_name(Dim::Volume, v).as_deref(), Some("gate"));
    }

    #[test]
    fn physical_group_rejects_missing_entity() {
        let mut engine = RectilinearEngine::new();
        assert!(matches!(
            engine.add_physical_group(Dim::Volume, &[4]),
            Err(EngineError::EntityNotFound { tag: 4, .. })
        ));
    }

    // ── Mesh ──

    #[test]
    fn mesh_order_requires_mesh() {
        let mut engine = RectilinearEngine::new();
        assert!(matches!(engine.set_mesh_order(2), Err(EngineError::NoMesh)));
    }

    #[test]
    fn volume_mesh_uses_prisms() {
        let mut engine = RectilinearEngine::new();
        let base = engine.add_rectangle(0.0, 0.0, 0.0, 1.0, 1.0).unwrap();
        engine.extrude(&[base], 0.0, 0.0, -1.0, 2).unwrap();
        engine.generate_mesh(3).unwrap();
        let mesh = engine.mesh().unwrap();
        assert_eq!(mesh.count(ElementKind::Prism), 4);
        assert_eq!(mesh.count(ElementKind::Quad), 8);

        engine.set_mesh_order(2).unwrap();
        assert_eq!(engine.mesh().unwrap().order, 2);
    }
}
