use tracing::info;

use crate::device::{DeviceTopology, Lineage};
use crate::engine::{Dim, EntityRef, GeometryEngine};
use crate::error::{ParameterError, Result, SequenceError};

/// Turns existing mask surfaces into dots, one per entity.
///
/// Any previously declared dots are dropped.
#[derive(Debug, Clone)]
pub struct SetDotRegionFromSurfaces {
    names: Vec<String>,
    mesh_size: Option<f64>,
}

impl SetDotRegionFromSurfaces {
    #[must_use]
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            mesh_size: None,
        }
    }

    /// Adds a constant mesh-size field over the dot surfaces.
    #[must_use]
    pub fn with_mesh_size(mut self, size: f64) -> Self {
        self.mesh_size = Some(size);
        self
    }

    /// Executes the replacement. Returns the number of dots.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::LayerAlreadyCreated`] once a layer exists,
    /// [`DevicegenError::UnknownName`](crate::error::DevicegenError::UnknownName)
    /// for an unbound name and [`ParameterError::NonPositive`] for a
    /// non-positive mesh size.
    pub fn execute(
        &self,
        device: &mut DeviceTopology,
        engine: &mut dyn GeometryEngine,
    ) -> Result<usize> {
        if !device.is_first_layer() {
            return Err(SequenceError::LayerAlreadyCreated("set_dot_region_from_surfaces").into());
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
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        let tags = device.entity_tags(&*engine, &names, Dim::Surface)?;

        device.dots = tags
            .iter()
            .map(|&tag| Lineage::seeded(vec![EntityRef::surface(tag)]))
            .collect();
        if let Some(size) = self.mesh_size {
            device.new_constant_field(engine, &tags, size, None)?;
        }
        device.setup_top_layer(engine)?;
        info!(names = ?self.names, dots = device.dots.len(), "dots set from surfaces");
        Ok(device.dots.len())
    }
}
