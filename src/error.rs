use thiserror::Error;

use crate::engine::{Dim, Tag};

/// Top-level error type for device generation.
#[derive(Debug, Error)]
pub enum DevicegenError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("no {dim} physical group named `{name}`")]
    UnknownName { name: String, dim: Dim },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed or inconsistent mask records and script text.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("mask does not start with a UNITS record")]
    MissingUnits,

    #[error("inconsistent units: mask unit {mask_unit} != meter unit {meter_unit} * 1e6")]
    InconsistentUnits { mask_unit: f64, meter_unit: f64 },

    #[error("line {line}: invalid number in `{text}`")]
    InvalidNumber { line: usize, text: String },

    #[error("line {line}: LAYER record without a layer identifier")]
    MissingLayerId { line: usize },

    #[error("line {line}: element is not terminated by ENDEL")]
    UnterminatedElement { line: usize },

    #[error("record {record}: element is not closed by an element end")]
    UnclosedElement { record: usize },

    #[error("record {record}: point outside of any layer")]
    PointOutsideLayer { record: usize },

    #[error("line {line}: unrecognized statement `{text}`")]
    InvalidStatement { line: usize, text: String },

    #[error("`{path}` is neither a mask (.gds, .txt) nor a geometry script (.geo, .geo_unrolled)")]
    UnsupportedInput { path: String },
}

/// Operations invoked out of their required order.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("{0} must run before any layer is created")]
    LayerAlreadyCreated(&'static str),

    #[error("{0} requires at least one layer")]
    NoLayer(&'static str),

    #[error("{0}: there are no surfaces to extrude")]
    NothingToExtrude(&'static str),
}

/// Caller-supplied parameters outside their valid range.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("mesh order must be 1 or 2, got {0}")]
    MeshOrder(u8),

    #[error("{parameter} must be positive, got {value}")]
    NonPositive { parameter: &'static str, value: f64 },

    #[error("layer thickness must be non-zero")]
    ZeroThickness,

    #[error("layer needs at least one element along the extrusion axis")]
    ZeroLayerPoints,

    #[error("expected {expected} dot labels, got {got}")]
    DotLabelCount { expected: usize, got: usize },

    #[error("region `{name}` has {frames} frames, frame {frame} requested")]
    FrameOutOfRange {
        name: String,
        frame: usize,
        frames: usize,
    },

    #[error("no tracked region named `{0}`")]
    UnknownRegion(String),
}

/// Failures reported by a geometry engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{dim} entity {tag} not found")]
    EntityNotFound { dim: Dim, tag: Tag },

    #[error("{dim} physical group {tag} not found")]
    PhysicalGroupNotFound { dim: Dim, tag: Tag },

    #[error("mesh field {0} not found")]
    FieldNotFound(Tag),

    #[error("unsupported by this engine: {0}")]
    Unsupported(String),

    #[error("degenerate geometry: {0}")]
    Degenerate(String),

    #[error("meshing failed: {0}")]
    Meshing(String),

    #[error("no mesh has been generated")]
    NoMesh,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A requested name was already bound to the entities being labeled.
///
/// Not fatal: the surviving entities keep the name and the operation proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCollisionWarning {
    pub dim: Dim,
    pub name: String,
}

/// Convenience type alias for results using [`DevicegenError`].
pub type Result<T> = std::result::Result<T, DevicegenError>;
