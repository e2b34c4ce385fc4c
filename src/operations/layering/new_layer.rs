use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::device::{DeviceTopology, MaterialProps};
use crate::engine::{Dim, EntityRef, Extrusion, GeometryEngine, Tag};
use crate::error::{ParameterError, Result, SequenceError};

/// Extrudes the current bottom surface downward into a new layer.
///
/// Every named region gains one volume frame and one surface frame. Dots
/// gain a surface frame, and with [`NewLayer::dot_region`] their columns
/// gain the adjacent volumes under their own names. The remaining volumes
/// are named as the layer.
#[derive(Debug, Clone)]
pub struct NewLayer {
    thickness: f64,
    points: Option<usize>,
    label: Option<String>,
    dot_region: bool,
    dot_labels: Option<Vec<String>>,
    material: MaterialProps,
    label_sides: bool,
    color: Option<[u8; 3]>,
}

impl NewLayer {
    /// Creates a layer `thickness` deep, measured into the substrate.
    #[must_use]
    pub fn new(thickness: f64) -> Self {
        Self {
            thickness,
            points: None,
            label: None,
            dot_region: false,
            dot_labels: None,
            material: MaterialProps::default(),
            label_sides: false,
            color: None,
        }
    }

    /// Elements along the extrusion axis.
    #[must_use]
    pub fn with_points(mut self, points: usize) -> Self {
        self.points = Some(points);
        self
    }

    /// Physical name of the layer volume (default `volume{n}`).
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Tracks dot columns through this layer.
    #[must_use]
    pub fn dot_region(mut self) -> Self {
        self.dot_region = true;
        self
    }

    /// One name per dot for this layer's column volumes (default `dot{i}-{n}`).
    #[must_use]
    pub fn with_dot_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.dot_labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_material(mut self, material: MaterialProps) -> Self {
        self.material = material;
        self
    }

    /// Gives every side surface a generic `surf{n}` name.
    #[must_use]
    pub fn label_sides(mut self) -> Self {
        self.label_sides = true;
        self
    }

    #[must_use]
    pub fn with_color(mut self, rgb: [u8; 3]) -> Self {
        self.color = Some(rgb);
        self
    }

    /// Executes the extrusion and updates the tracker. Returns the layer name.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] for a zero thickness, zero points or a dot
    /// label count that differs from the number of dots, and
    /// [`SequenceError::NothingToExtrude`] before the top layer is set up.
    /// All of these are reported before anything changes.
    pub fn execute(
        &self,
        device: &mut DeviceTopology,
        engine: &mut dyn GeometryEngine,
    ) -> Result<String> {
        if !self.thickness.is_normal() {
            return Err(ParameterError::ZeroThickness.into());
        }
        let points = self.points.unwrap_or(device.config.default_layer_points);
        if points == 0 {
            return Err(ParameterError::ZeroLayerPoints.into());
        }
        if let Some(labels) = &self.dot_labels {
            if labels.len() != device.dots.len() {
                return Err(ParameterError::DotLabelCount {
                    expected: device.dots.len(),
                    got: labels.len(),
                }
                .into());
            }
        }
        if device.bottom_surface.is_empty() {
            return Err(SequenceError::NothingToExtrude("new_layer").into());
        }

        let extrusions = engine.extrude(&device.bottom_surface, 0.0, 0.0, -self.thickness, points)?;
        device.first_layer = false;

        if self.label_sides {
            label_side_surfaces(device, engine, &extrusions)?;
        }

        extend_region_lineages(device, &extrusions);
        device.bottom_surface = extrusions.iter().map(|e| e.top).collect();
        self.extend_dots(device, engine, &extrusions)?;

        let volumes: Vec<EntityRef> = extrusions.iter().map(|e| e.volume).collect();
        if let Some(rgb) = self.color {
            engine.set_color(&volumes, rgb);
        }

        let dot_volumes: BTreeSet<EntityRef> = device
            .dots
            .iter()
            .flat_map(|dot| dot.all_volumes().copied())
            .collect();
        let layer_volumes: Vec<Tag> = volumes
            .iter()
            .filter(|v| !dot_volumes.contains(v))
            .map(|v| v.tag)
            .collect();

        let label = self
            .label
            .clone()
            .unwrap_or_else(|| format!("volume{}", device.layer_counter));
        let group = engine.add_physical_group(Dim::Volume, &layer_volumes)?;
        engine.set_physical_name(Dim::Volume, group, &label)?;
        device.materials.insert(&label, self.material.clone());
        device.layer_counter += 1;

        info!(
            %label,
            volumes = layer_volumes.len(),
            dot_volumes = volumes.len() - layer_volumes.len(),
            thickness = self.thickness,
            "added layer"
        );
        Ok(label)
    }

    /// Appends this layer's frames to every dot.
    fn extend_dots(
        &self,
        device: &mut DeviceTopology,
        engine: &mut dyn GeometryEngine,
        extrusions: &[Extrusion],
    ) -> Result<()> {
        let mut boundaries = Vec::with_capacity(extrusions.len());
        for extrusion in extrusions {
            boundaries.push(engine.boundary(&[extrusion.volume])?);
        }

        for i in 0..device.dots.len() {
            let previous = device.dots[i].last_surfaces().to_vec();
            let adjacent: Vec<&Extrusion> = extrusions
                .iter()
                .zip(&boundaries)
                .filter(|(_, boundary)| boundary.iter().any(|s| previous.contains(s)))
                .map(|(extrusion, _)| extrusion)
                .collect();

            let dot = &mut device.dots[i];
            dot.surface_frames
                .push(adjacent.iter().map(|e| e.top).collect());
            if !self.dot_region {
                continue;
            }

            let volumes: Vec<EntityRef> = adjacent.iter().map(|e| e.volume).collect();
            dot.volume_frames.push(volumes.clone());

            let label = match &self.dot_labels {
                Some(labels) => labels[i].clone(),
                None => format!("dot{i}-{}", device.layer_counter),
            };
            let tags: Vec<Tag> = volumes.iter().map(|v| v.tag).collect();
            let group = engine.add_physical_group(Dim::Volume, &tags)?;
            engine.set_physical_name(Dim::Volume, group, &label)?;
            device.materials.insert(&label, self.material.clone());
            debug!(dot = i, %label, volumes = tags.len(), "extended dot column");
        }
        Ok(())
    }
}

/// Names each distinct side surface of the extrusion `surf{n}`.
fn label_side_surfaces(
    device: &mut DeviceTopology,
    engine: &mut dyn GeometryEngine,
    extrusions: &[Extrusion],
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for side in extrusions.iter().flat_map(|e| &e.sides) {
        if !seen.insert(*side) {
            continue;
        }
        let name = device.next_surface_name();
        let group = engine.add_physical_group(Dim::Surface, &[side.tag])?;
        engine.set_physical_name(Dim::Surface, group, &name)?;
    }
    debug!(sides = seen.len(), "labeled side surfaces");
    Ok(())
}

/// Extends every region whose latest surfaces were all extruded.
fn extend_region_lineages(device: &mut DeviceTopology, extrusions: &[Extrusion]) {
    let by_source: HashMap<EntityRef, &Extrusion> =
        extrusions.iter().map(|e| (e.source, e)).collect();

    for id in device.regions.ids() {
        let Some(region) = device.regions.region_mut(id) else {
            continue;
        };
        let produced: Option<Vec<&Extrusion>> = region
            .lineage
            .last_surfaces()
            .iter()
            .map(|s| by_source.get(s).copied())
            .collect();
        let Some(produced) = produced else {
            warn!(name = %region.name, "region is not on the extruded surface, lineage left as is");
            continue;
        };
        region
            .lineage
            .volume_frames
            .push(produced.iter().map(|e| e.volume).collect());
        region
            .lineage
            .surface_frames
            .push(produced.iter().map(|e| e.top).collect());
    }
}
