use tracing::info;

use crate::device::{BoundaryCondition, DeviceTopology, MaterialProps};
use crate::engine::{Dim, EntityRef, GeometryEngine, Tag};
use crate::error::{ParameterError, Result, SequenceError};

/// Extrudes mask-plane surfaces upward, e.g. into an oxide and gate stack.
///
/// By default the whole remaining top surface is extruded. The new volumes
/// are labeled as the layer and their far faces as a boundary (`top`).
#[derive(Debug, Clone)]
pub struct NewTopLayer {
    thickness: f64,
    points: Option<usize>,
    surfaces: Option<Vec<String>>,
    label: Option<String>,
    material: MaterialProps,
    boundary_label: String,
    boundary: Option<BoundaryCondition>,
    color: Option<[u8; 3]>,
}

impl NewTopLayer {
    #[must_use]
    pub fn new(thickness: f64) -> Self {
        Self {
            thickness,
            points: None,
            surfaces: None,
            label: None,
            material: MaterialProps::default(),
            boundary_label: "top".to_owned(),
            boundary: None,
            color: None,
        }
    }

    #[must_use]
    pub fn with_points(mut self, points: usize) -> Self {
        self.points = Some(points);
        self
    }

    /// Extrudes the named surfaces instead of the remaining top surface.
    #[must_use]
    pub fn on_surfaces<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.surfaces = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_material(mut self, material: MaterialProps) -> Self {
        self.material = material;
        self
    }

    /// Name and condition of the far faces.
    #[must_use]
    pub fn with_boundary(
        mut self,
        label: impl Into<String>,
        condition: Option<BoundaryCondition>,
    ) -> Self {
        self.boundary_label = label.into();
        self.boundary = condition;
        self
    }

    #[must_use]
    pub fn with_color(mut self, rgb: [u8; 3]) -> Self {
        self.color = Some(rgb);
        self
    }

    /// Executes the extrusion. Returns the volume label.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] for a zero thickness or zero points,
    /// [`DevicegenError::UnknownName`](crate::error::DevicegenError::UnknownName)
    /// for an unbound surface name and [`SequenceError::NothingToExtrude`]
    /// when no surface is selected.
    pub fn execute(
        &self,
        device: &mut DeviceTopology,
        engine: &mut dyn GeometryEngine,
    ) -> Result<String> {
        let points = check_layer(self.thickness, self.points, device)?;
        let sources: Vec<EntityRef> = match &self.surfaces {
            Some(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                device
                    .entity_tags(&*engine, &names, Dim::Surface)?
                    .into_iter()
                    .map(EntityRef::surface)
                    .collect()
            }
            None => device.top_surface.clone(),
        };
        if sources.is_empty() {
            return Err(SequenceError::NothingToExtrude("new_top_layer").into());
        }

        let extrusions = engine.extrude(&sources, 0.0, 0.0, self.thickness, points)?;
        let volumes: Vec<Tag> = extrusions.iter().map(|e| e.volume.tag).collect();
        let tops: Vec<Tag> = extrusions.iter().map(|e| e.top.tag).collect();

        let label = match &self.label {
            Some(label) => label.clone(),
            None => {
                let label = format!("volume{}", device.layer_counter);
                device.layer_counter += 1;
                label
            }
        };
        device.label_volume(engine, &volumes, &label, self.material.clone())?;
        device.label_surface(engine, &tops, &self.boundary_label, self.boundary.clone())?;

        if let Some(rgb) = self.color {
            let entities: Vec<EntityRef> = extrusions.iter().map(|e| e.volume).collect();
            engine.set_color(&entities, rgb);
        }
        info!(%label, volumes = volumes.len(), boundary = %self.boundary_label, "added top layer");
        Ok(label)
    }
}

/// Extrudes one named surface upward into a cap volume.
#[derive(Debug, Clone)]
pub struct NewCapLayer {
    surface: String,
    thickness: f64,
    points: Option<usize>,
    label: Option<String>,
    material: MaterialProps,
}

impl NewCapLayer {
    #[must_use]
    pub fn new(surface: impl Into<String>, thickness: f64) -> Self {
        Self {
            surface: surface.into(),
            thickness,
            points: None,
            label: None,
            material: MaterialProps::default(),
        }
    }

    #[must_use]
    pub fn with_points(mut self, points: usize) -> Self {
        self.points = Some(points);
        self
    }

    /// Physical name of the cap (default `cap_volume`).
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_material(mut self, material: MaterialProps) -> Self {
        self.material = material;
        self
    }

    /// Executes the extrusion. Returns the cap label.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] for a zero thickness or zero points and
    /// [`DevicegenError::UnknownName`](crate::error::DevicegenError::UnknownName)
    /// if the surface name is not bound.
    pub fn execute(
        &self,
        device: &mut DeviceTopology,
        engine: &mut dyn GeometryEngine,
    ) -> Result<String> {
        let points = check_layer(self.thickness, self.points, device)?;
        let sources: Vec<EntityRef> = device
            .entity_tags(&*engine, &[self.surface.as_str()], Dim::Surface)?
            .into_iter()
            .map(EntityRef::surface)
            .collect();

        let extrusions = engine.extrude(&sources, 0.0, 0.0, self.thickness, points)?;
        let volumes: Vec<Tag> = extrusions.iter().map(|e| e.volume.tag).collect();

        let label = self.label.clone().unwrap_or_else(|| "cap_volume".to_owned());
        let group = engine.add_physical_group(Dim::Volume, &volumes)?;
        engine.set_physical_name(Dim::Volume, group, &label)?;
        device.materials.insert(&label, self.material.clone());
        info!(%label, surface = %self.surface, "added cap layer");
        Ok(label)
    }
}

fn check_layer(thickness: f64, points: Option<usize>, device: &DeviceTopology) -> Result<usize> {
    if !thickness.is_normal() {
        return Err(ParameterError::ZeroThickness.into());
    }
    let points = points.unwrap_or(device.config.default_layer_points);
    if points == 0 {
        return Err(ParameterError::ZeroLayerPoints.into());
    }
    Ok(points)
}
