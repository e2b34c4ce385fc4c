use tracing::info;

use crate::device::{DeviceTopology, Lineage};
use crate::engine::{EntityRef, GeometryEngine};
use crate::error::{ParameterError, Result, SequenceError};

/// Declares a rectangular dot footprint on the mask plane.
///
/// The mask plane is re-fragmented afterwards, so every dot must be declared
/// before the first layer.
#[derive(Debug, Clone, Copy)]
pub struct NewDotRectangle {
    x: f64,
    y: f64,
    dx: f64,
    dy: f64,
    mesh_size: Option<f64>,
}

impl NewDotRectangle {
    #[must_use]
    pub fn new(x: f64, y: f64, dx: f64, dy: f64) -> Self {
        Self {
            x,
            y,
            dx,
            dy,
            mesh_size: None,
        }
    }

    /// Refines the mesh to `size` over the footprint.
    #[must_use]
    pub fn with_mesh_size(mut self, size: f64) -> Self {
        self.mesh_size = Some(size);
        self
    }

    /// Executes the declaration. Returns the new rectangle.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::LayerAlreadyCreated`] once a layer exists and
    /// [`ParameterError::NonPositive`] for an empty footprint or mesh size.
    pub fn execute(
        &self,
        device: &mut DeviceTopology,
        engine: &mut dyn GeometryEngine,
    ) -> Result<EntityRef> {
        if !device.is_first_layer() {
            return Err(SequenceError::LayerAlreadyCreated("new_dot_rectangle").into());
        }
        for (parameter, value) in [("dx", self.dx), ("dy", self.dy)] {
            if value.is_nan() || value <= 0.0 {
                return Err(ParameterError::NonPositive { parameter, value }.into());
            }
        }
        if let Some(size) = self.mesh_size {
            if size.is_nan() || size <= 0.0 {
                return Err(ParameterError::NonPositive {
                    parameter: "mesh_size",
                    value: size,
                }
                .into());
            }
        }

        let rect = engine.add_rectangle(self.x, self.y, 0.0, self.dx, self.dy)?;
        if let Some(size) = self.mesh_size {
            device.new_box_field(
                engine,
                self.x,
                self.x + self.dx,
                self.y,
                self.y + self.dy,
                size,
                None,
            )?;
        }
        device.dots.push(Lineage::seeded(vec![rect]));
        device.setup_top_layer(engine)?;
        info!(dots = device.dots.len(), x = self.x, y = self.y, "declared dot");
        Ok(rect)
    }
}
