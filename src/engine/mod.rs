//! Geometry engine collaborator.
//!
//! The tracker never owns geometry. It drives an engine through the
//! [`GeometryEngine`] trait, passed explicitly to every operation, and only
//! keeps engine tags that it has just received or validated.

pub mod rectilinear;

use std::fmt;
use std::path::Path;

use crate::error::EngineError;
use crate::mask::Script;

pub use rectilinear::RectilinearEngine;

/// Engine-assigned entity or group tag. Not stable across structural operations.
pub type Tag = i32;

/// Dimension of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dim {
    Surface,
    Volume,
}

impl Dim {
    /// Topological dimension as an integer (2 or 3).
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Surface => 2,
            Self::Volume => 3,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Surface => f.write_str("surface"),
            Self::Volume => f.write_str("volume"),
        }
    }
}

/// A `(dimension, tag)` pair naming one engine entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub dim: Dim,
    pub tag: Tag,
}

impl EntityRef {
    #[must_use]
    pub fn surface(tag: Tag) -> Self {
        Self {
            dim: Dim::Surface,
            tag,
        }
    }

    #[must_use]
    pub fn volume(tag: Tag) -> Self {
        Self {
            dim: Dim::Volume,
            tag,
        }
    }
}

/// Entities produced by extruding one input surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extrusion {
    /// The extruded surface.
    pub source: EntityRef,
    /// The translated copy of `source` closing the far end of the volume.
    pub top: EntityRef,
    /// The swept volume.
    pub volume: EntityRef,
    /// Lateral surfaces, in engine order. Shared walls appear in the
    /// extrusions of both neighbours.
    pub sides: Vec<EntityRef>,
}

/// Result of a Boolean fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentMap {
    /// Every entity of the fragmented partition.
    pub entities: Vec<EntityRef>,
    /// For each operand (objects first, then tools), the pieces it became.
    pub sources: Vec<(EntityRef, Vec<EntityRef>)>,
}

impl FragmentMap {
    /// Pieces produced from `source`, or an empty slice if it was not an operand.
    #[must_use]
    pub fn pieces_of(&self, source: EntityRef) -> &[EntityRef] {
        self.sources
            .iter()
            .find(|(s, _)| *s == source)
            .map_or(&[][..], |(_, pieces)| pieces.as_slice())
    }
}

/// Localized mesh-density definitions.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshField {
    /// `size_in` inside the `[x_min, x_max] x [y_min, y_max]` prism,
    /// `size_out` (or unconstrained) elsewhere.
    Box {
        size_in: f64,
        size_out: Option<f64>,
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
    },
    /// `size_in` on the listed surfaces, `size_out` elsewhere.
    Constant {
        size_in: f64,
        size_out: Option<f64>,
        surfaces: Vec<Tag>,
    },
    /// Pointwise minimum of other fields.
    Min { fields: Vec<Tag> },
}

/// Primitive operations of a geometry/meshing kernel.
///
/// All calls are synchronous and mutate engine-global state; a failed
/// structural call leaves the model in an engine-defined state.
pub trait GeometryEngine {
    /// Executes a construction script.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement references unknown handles or
    /// describes geometry this engine cannot represent.
    fn load_script(&mut self, script: &Script) -> Result<(), EngineError>;

    /// Sets the global upper bound on mesh element size.
    fn set_max_mesh_size(&mut self, size: f64);

    /// All entities of one dimension, in ascending tag order.
    fn entities(&self, dim: Dim) -> Vec<EntityRef>;

    /// Adds an axis-aligned rectangle in the plane `z`.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero-area rectangle.
    fn add_rectangle(&mut self, x: f64, y: f64, z: f64, dx: f64, dy: f64)
        -> Result<EntityRef, EngineError>;

    /// Extrudes surfaces by `(dx, dy, dz)` with `num_elements` mesh layers.
    ///
    /// # Errors
    ///
    /// Returns an error if an input is not an extrudable surface.
    fn extrude(
        &mut self,
        entities: &[EntityRef],
        dx: f64,
        dy: f64,
        dz: f64,
        num_elements: usize,
    ) -> Result<Vec<Extrusion>, EngineError>;

    /// Unoriented boundary of the given volumes, deduplicated, in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns an error if an entity does not exist.
    fn boundary(&self, entities: &[EntityRef]) -> Result<Vec<EntityRef>, EngineError>;

    /// Fragments `objects` against `tools`, deleting the operands.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist or cannot be fragmented.
    fn fragment(
        &mut self,
        objects: &[EntityRef],
        tools: &[EntityRef],
    ) -> Result<FragmentMap, EngineError>;

    /// Creates a physical group and returns its tag.
    ///
    /// # Errors
    ///
    /// Returns an error if a member entity does not exist.
    fn add_physical_group(&mut self, dim: Dim, tags: &[Tag]) -> Result<Tag, EngineError>;

    /// Names a physical group.
    ///
    /// # Errors
    ///
    /// Returns an error if the group does not exist.
    fn set_physical_name(&mut self, dim: Dim, group: Tag, name: &str) -> Result<(), EngineError>;

    /// Removes the given physical groups. Unknown groups are ignored.
    fn remove_physical_groups(&mut self, groups: &[(Dim, Tag)]);

    /// Removes every physical group of every dimension.
    fn remove_all_physical_groups(&mut self);

    /// Unbinds `name` from the groups of dimension `dim` that carry it.
    /// Groups of the other dimension keep the name.
    fn remove_physical_name(&mut self, dim: Dim, name: &str);

    /// Physical group tags of one dimension, ascending.
    fn physical_groups(&self, dim: Dim) -> Vec<Tag>;

    /// Name of a physical group, if it has one.
    fn physical_name(&self, dim: Dim, group: Tag) -> Option<String>;

    /// Physical groups containing `entity`, ascending.
    fn physical_groups_for_entity(&self, entity: EntityRef) -> Vec<Tag>;

    /// Member entity tags of a physical group.
    ///
    /// # Errors
    ///
    /// Returns an error if the group does not exist.
    fn entities_for_physical_group(&self, dim: Dim, group: Tag) -> Result<Vec<Tag>, EngineError>;

    /// Registers a mesh field and returns its tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the field references unknown fields.
    fn add_mesh_field(&mut self, field: MeshField) -> Result<Tag, EngineError>;

    /// Uses `field` as the background mesh-size field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field does not exist.
    fn set_background_field(&mut self, field: Tag) -> Result<(), EngineError>;

    /// Discards any generated mesh.
    fn clear_mesh(&mut self);

    /// Assigns a display color.
    fn set_color(&mut self, entities: &[EntityRef], rgb: [u8; 3]);

    /// Generates a mesh of dimension `dim` (2 or 3).
    ///
    /// # Errors
    ///
    /// Returns an error if meshing fails.
    fn generate_mesh(&mut self, dim: u8) -> Result<(), EngineError>;

    /// Sets the interpolation order of the generated mesh.
    ///
    /// # Errors
    ///
    /// Returns an error if no mesh exists or the order is unsupported.
    fn set_mesh_order(&mut self, order: u8) -> Result<(), EngineError>;

    /// Writes the generated mesh.
    ///
    /// # Errors
    ///
    /// Returns an error if no mesh exists or the file cannot be written.
    fn write_mesh(&self, path: &Path) -> Result<(), EngineError>;

    /// Writes the current geometry as unrolled text.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn write_geometry(&self, path: &Path) -> Result<(), EngineError>;
}
