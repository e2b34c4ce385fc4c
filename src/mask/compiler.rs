use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{FormatError, Result};
use crate::math::{nearly_equal, round_to};

use super::record::{parse_records, LayerId, MaskRecord};
use super::script::{LayerElement, PointRef, Script};

/// Decimal places kept for compiled coordinates.
pub const COORDINATE_DECIMALS: i32 = 6;

/// Relative tolerance for the `mask_unit == meter_unit * 1e6` check.
const UNITS_TOLERANCE: f64 = 1e-9;

/// Translates a mask record stream into a construction script.
///
/// Every element becomes a closed curve loop and a plane surface; adjacent
/// layers (in ascending layer order) are then fragmented pairwise.
pub struct MaskCompiler {
    mesh_size: f64,
}

impl MaskCompiler {
    /// Creates a compiler that tags every point with the target mesh density
    /// `mesh_size`.
    #[must_use]
    pub fn new(mesh_size: f64) -> Self {
        Self { mesh_size }
    }

    /// Compiles records in a single pass.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::MissingUnits`] if the first record is not
    /// `Units`, [`FormatError::InconsistentUnits`] if its factors disagree,
    /// [`FormatError::PointOutsideLayer`] for a point before any layer and
    /// [`FormatError::UnclosedElement`] for trailing points without an
    /// element end.
    pub fn compile(&self, records: &[MaskRecord]) -> Result<Script> {
        let Some(MaskRecord::Units {
            mask_unit,
            meter_unit,
        }) = records.first()
        else {
            return Err(FormatError::MissingUnits.into());
        };
        check_units(*mask_unit, *meter_unit)?;
        let scale = meter_unit * 1e6;

        let mut script = Script::new();
        let mut layer: Option<LayerId> = None;
        let mut element: Vec<PointRef> = Vec::new();
        let mut element_layer: Option<LayerId> = None;

        for (index, record) in records.iter().enumerate().skip(1) {
            match record {
                MaskRecord::Units {
                    mask_unit,
                    meter_unit,
                } => {
                    check_units(*mask_unit, *meter_unit)?;
                    warn!(record = index, "ignoring repeated UNITS record");
                }
                MaskRecord::LayerStart(id) => {
                    script.open_layer(id.clone());
                    layer = Some(id.clone());
                }
                MaskRecord::Point { x, y } => {
                    let current = layer
                        .as_ref()
                        .ok_or(FormatError::PointOutsideLayer { record: index })?;
                    if element.is_empty() {
                        element_layer = Some(current.clone());
                    }
                    let x = round_to(x * scale, COORDINATE_DECIMALS);
                    let y = round_to(y * scale, COORDINATE_DECIMALS);
                    element.push(script.add_point(x, y, 0.0, self.mesh_size));
                }
                MaskRecord::ElementEnd => {
                    if let Some(id) = element_layer.take() {
                        close_element(&mut script, id, &element);
                    }
                    element.clear();
                }
            }
        }

        if !element.is_empty() {
            return Err(FormatError::UnclosedElement {
                record: records.len(),
            }
            .into());
        }

        fragment_adjacent_layers(&mut script);

        info!(
            layers = script.layers().len(),
            statements = script.statements().len(),
            "compiled mask"
        );
        Ok(script)
    }

    /// Reads records from layout text and compiles them.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] for malformed text or records.
    pub fn compile_str(&self, text: &str) -> Result<Script> {
        self.compile(&parse_records(text)?)
    }

    /// Reads records from a layout file and compiles them.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or [`FormatError`] for
    /// malformed content.
    pub fn compile_file(&self, path: impl AsRef<Path>) -> Result<Script> {
        let path = path.as_ref();
        info!(path = %path.display(), "parsing mask");
        let text = std::fs::read_to_string(path)?;
        self.compile_str(&text)
    }
}

fn check_units(mask_unit: f64, meter_unit: f64) -> Result<()> {
    if nearly_equal(mask_unit, meter_unit * 1e6, UNITS_TOLERANCE) {
        Ok(())
    } else {
        Err(FormatError::InconsistentUnits {
            mask_unit,
            meter_unit,
        }
        .into())
    }
}

/// Emits the closed loop and plane surface for one element.
///
/// A closing line from the last point back to the first is always added, so
/// an input that already repeats its first point yields a zero-length line.
fn close_element(script: &mut Script, layer: LayerId, points: &[PointRef]) {
    let mut lines = Vec::with_capacity(points.len());
    for pair in points.windows(2) {
        lines.push(script.add_line(pair[0], pair[1]));
    }
    if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
        lines.push(script.add_line(last, first));
    }
    let curve_loop = script.add_curve_loop(lines);
    let surface = script.add_plane_surface(curve_loop);
    debug!(layer = %layer, %surface, points = points.len(), "compiled element");
    script.record_element(
        layer,
        LayerElement {
            curve_loop,
            surface,
        },
    );
}

fn fragment_adjacent_layers(script: &mut Script) {
    let surfaces: Vec<Vec<_>> = script
        .layers()
        .values()
        .map(|elements| elements.iter().map(|e| e.surface).collect())
        .collect();
    for pair in surfaces.windows(2) {
        let operands: Vec<_> = pair[0].iter().chain(&pair[1]).copied().collect();
        if !operands.is_empty() {
            script.add_boolean_fragments(operands, true);
        }
    }
}
