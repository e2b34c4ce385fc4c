use crate::error::{ParameterError, Result};

/// Tunable parameters of a device build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    /// Upper bound on in-plane mesh element size, in layout units.
    pub max_mesh_size: f64,
    /// Elements along the extrusion axis when a layer does not specify them.
    pub default_layer_points: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_mesh_size: 10.0,
            default_layer_points: 10,
        }
    }
}

impl DeviceConfig {
    /// Checks that every parameter is in range.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] for a non-positive mesh size or zero layer points.
    pub fn validate(&self) -> Result<()> {
        if self.max_mesh_size.is_nan() || self.max_mesh_size <= 0.0 {
            return Err(ParameterError::NonPositive {
                parameter: "max_mesh_size",
                value: self.max_mesh_size,
            }
            .into());
        }
        if self.default_layer_points == 0 {
            return Err(ParameterError::ZeroLayerPoints.into());
        }
        Ok(())
    }
}
