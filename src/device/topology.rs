use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::engine::{Dim, EntityRef, FragmentMap, GeometryEngine, MeshField, Tag};
use crate::error::{
    DevicegenError, FormatError, NameCollisionWarning, ParameterError, Result, SequenceError,
};
use crate::mask::{MaskCompiler, Script};

use super::config::DeviceConfig;
use super::lineage::{DotLineage, Lineage, RegionRegistry};
use super::registry::{BoundaryCondition, BoundaryRegistry, MaterialProps, MaterialRegistry};

/// Tracks named regions of a layered device through structural operations.
///
/// The tracker owns no geometry. Every operation takes the engine holding the
/// model, reads its current tags and updates the registries in the same call.
#[derive(Debug)]
pub struct DeviceTopology {
    pub(crate) config: DeviceConfig,
    pub(crate) first_layer: bool,
    pub(crate) bottom_surface: Vec<EntityRef>,
    pub(crate) top_surface: Vec<EntityRef>,
    pub(crate) layer_counter: usize,
    pub(crate) surface_counter: usize,
    pub(crate) dots: Vec<DotLineage>,
    pub(crate) regions: RegionRegistry,
    pub(crate) materials: MaterialRegistry,
    pub(crate) boundaries: BoundaryRegistry,
    pub(crate) fields: Vec<Tag>,
    pub(crate) warnings: Vec<NameCollisionWarning>,
}

impl DeviceTopology {
    /// Creates an empty tracker. No layer exists and no region is named.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] if `config` is invalid.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            first_layer: true,
            bottom_surface: Vec::new(),
            top_surface: Vec::new(),
            layer_counter: 1,
            surface_counter: 1,
            dots: Vec::new(),
            regions: RegionRegistry::new(),
            materials: MaterialRegistry::new(),
            boundaries: BoundaryRegistry::new(),
            fields: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Loads `script` into `engine` and sets up the top layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the engine rejects
    /// the script.
    pub fn from_script(
        script: &Script,
        engine: &mut dyn GeometryEngine,
        config: DeviceConfig,
    ) -> Result<Self> {
        let mut device = Self::new(config)?;
        engine.set_max_mesh_size(config.max_mesh_size);
        engine.load_script(script)?;
        device.setup_top_layer(engine)?;
        Ok(device)
    }

    /// Reads a mask layout (`.gds`, `.txt`) or a geometry script (`.geo`,
    /// `.geo_unrolled`) and builds a tracker from it.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] for an unknown extension or malformed input,
    /// and propagates I/O and engine errors.
    pub fn from_mask_file(
        path: impl AsRef<Path>,
        engine: &mut dyn GeometryEngine,
        config: DeviceConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let script = match extension {
            "gds" | "txt" => MaskCompiler::new(config.max_mesh_size).compile_file(path)?,
            "geo" | "geo_unrolled" => Script::parse(&std::fs::read_to_string(path)?)?,
            _ => {
                return Err(FormatError::UnsupportedInput {
                    path: path.display().to_string(),
                }
                .into())
            }
        };
        info!(path = %path.display(), "read device layout");
        Self::from_script(&script, engine, config)
    }

    // --- Accessors ---

    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Whether no layer has been extruded yet.
    #[must_use]
    pub fn is_first_layer(&self) -> bool {
        self.first_layer
    }

    /// Surfaces the next layer will be extruded from.
    #[must_use]
    pub fn bottom_surface(&self) -> &[EntityRef] {
        &self.bottom_surface
    }

    /// Mask-plane surfaces still eligible for a top layer.
    #[must_use]
    pub fn top_surface(&self) -> &[EntityRef] {
        &self.top_surface
    }

    /// Counter used for generic `volume{n}` and `dot{i}-{n}` names.
    #[must_use]
    pub fn layer_counter(&self) -> usize {
        self.layer_counter
    }

    #[must_use]
    pub fn dots(&self) -> &[DotLineage] {
        &self.dots
    }

    #[must_use]
    pub fn regions(&self) -> &RegionRegistry {
        &self.regions
    }

    #[must_use]
    pub fn materials(&self) -> &MaterialRegistry {
        &self.materials
    }

    #[must_use]
    pub fn boundaries(&self) -> &BoundaryRegistry {
        &self.boundaries
    }

    /// Mesh fields created so far, in creation order.
    #[must_use]
    pub fn fields(&self) -> &[Tag] {
        &self.fields
    }

    /// Name collisions surfaced by labeling operations.
    #[must_use]
    pub fn warnings(&self) -> &[NameCollisionWarning] {
        &self.warnings
    }

    /// Returns and clears the collected warnings.
    pub fn take_warnings(&mut self) -> Vec<NameCollisionWarning> {
        std::mem::take(&mut self.warnings)
    }

    // --- Initialization ---

    /// Fragments the mask plane into a conformal partition and gives every
    /// surface a generic `surf{n}` name.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::LayerAlreadyCreated`] once a layer exists, and
    /// propagates engine failures.
    pub fn setup_top_layer(&mut self, engine: &mut dyn GeometryEngine) -> Result<()> {
        if !self.first_layer {
            return Err(SequenceError::LayerAlreadyCreated("setup_top_layer").into());
        }

        let surfaces = engine.entities(Dim::Surface);
        let map = if surfaces.len() > 1 {
            engine.fragment(&surfaces[..1], &surfaces[1..])?
        } else {
            FragmentMap {
                entities: surfaces.clone(),
                sources: surfaces.iter().map(|&s| (s, vec![s])).collect(),
            }
        };
        engine.remove_all_physical_groups();

        for dot in &mut self.dots {
            let mut seen = BTreeSet::new();
            let footprint: Vec<EntityRef> = dot
                .surface_frames
                .first()
                .into_iter()
                .flatten()
                .flat_map(|&s| {
                    let pieces = map.pieces_of(s);
                    if pieces.is_empty() {
                        vec![s]
                    } else {
                        pieces.to_vec()
                    }
                })
                .filter(|e| seen.insert(*e))
                .collect();
            dot.surface_frames = vec![footprint];
        }

        let current = engine.entities(Dim::Surface);
        self.bottom_surface.clone_from(&current);
        self.top_surface.clone_from(&current);

        self.regions.clear();
        self.surface_counter = 1;
        for entity in current {
            let name = self.next_surface_name();
            let group = engine.add_physical_group(Dim::Surface, &[entity.tag])?;
            engine.set_physical_name(Dim::Surface, group, &name)?;
            self.regions.insert(&name, Lineage::seeded(vec![entity]));
        }
        info!(
            surfaces = self.regions.len(),
            dots = self.dots.len(),
            "set up top layer"
        );
        Ok(())
    }

    /// Returns `surf{n}` and advances the surface counter.
    pub(crate) fn next_surface_name(&mut self) -> String {
        let name = format!("surf{}", self.surface_counter);
        self.surface_counter += 1;
        name
    }

    // --- Labeling ---

    /// Names `tags` as `new_name` without leaving other entities unnamed.
    ///
    /// Each tag is taken out of the group that currently holds it. Remaining
    /// members of that group keep their old name. A [`NameCollisionWarning`]
    /// is recorded when the old name is `new_name` itself, in which case the
    /// remaining members join the new group, and when the old group is left
    /// with no members or had no name.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn label_entity(
        &mut self,
        engine: &mut dyn GeometryEngine,
        dim: Dim,
        tags: &[Tag],
        new_name: &str,
    ) -> Result<Tag> {
        let mut members: Vec<Tag> = tags.to_vec();
        for &tag in tags {
            let Some(&group) = engine
                .physical_groups_for_entity(EntityRef { dim, tag })
                .first()
            else {
                continue;
            };

            // Take the tag out of its current group
            let mut others = engine.entities_for_physical_group(dim, group)?;
            let name = engine.physical_name(dim, group);
            engine.remove_physical_groups(&[(dim, group)]);
            if let Some(name) = &name {
                engine.remove_physical_name(dim, name);
            }
            others.retain(|t| !tags.contains(t));

            // Give the rest back their name
            match name {
                Some(name) if name == new_name => {
                    warn!(%dim, name = %new_name, "name already in use, merging groups");
                    self.warnings.push(NameCollisionWarning {
                        dim,
                        name: new_name.to_owned(),
                    });
                    for t in others {
                        if !members.contains(&t) {
                            members.push(t);
                        }
                    }
                }
                Some(name) if !others.is_empty() => {
                    let kept = engine.add_physical_group(dim, &others)?;
                    engine.set_physical_name(dim, kept, &name)?;
                    debug!(%dim, %name, remaining = others.len(), "re-registered group");
                }
                name => {
                    warn!(%dim, ?name, tag, new = %new_name, "group emptied by relabel");
                    self.warnings.push(NameCollisionWarning {
                        dim,
                        name: new_name.to_owned(),
                    });
                }
            }
        }

        let group = engine.add_physical_group(dim, &members)?;
        engine.set_physical_name(dim, group, new_name)?;
        debug!(%dim, name = %new_name, entities = members.len(), "labeled entities");
        Ok(group)
    }

    /// Labels volumes and records their material.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn label_volume(
        &mut self,
        engine: &mut dyn GeometryEngine,
        tags: &[Tag],
        name: &str,
        material: MaterialProps,
    ) -> Result<Tag> {
        let group = self.label_entity(engine, Dim::Volume, tags, name)?;
        self.materials.insert(name, material);
        Ok(group)
    }

    /// Labels surfaces and records their boundary condition, if any.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn label_surface(
        &mut self,
        engine: &mut dyn GeometryEngine,
        tags: &[Tag],
        name: &str,
        boundary: Option<BoundaryCondition>,
    ) -> Result<Tag> {
        let group = self.label_entity(engine, Dim::Surface, tags, name)?;
        if let Some(condition) = boundary {
            self.boundaries.insert(name, condition);
        }
        Ok(group)
    }

    /// Names the current bottom surface of the stack.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::NoLayer`] before any layer exists.
    pub fn label_bottom(
        &mut self,
        engine: &mut dyn GeometryEngine,
        name: &str,
        boundary: Option<BoundaryCondition>,
    ) -> Result<Tag> {
        if self.first_layer {
            return Err(SequenceError::NoLayer("label_bottom").into());
        }
        let tags: Vec<Tag> = self.bottom_surface.iter().map(|e| e.tag).collect();
        let group = engine.add_physical_group(Dim::Surface, &tags)?;
        engine.set_physical_name(Dim::Surface, group, name)?;
        if let Some(condition) = boundary {
            self.boundaries.insert(name, condition);
        }
        Ok(group)
    }

    /// Merges the surfaces named `old_names` under `new_name`.
    ///
    /// The merged entities start a fresh single-frame lineage and leave the
    /// top surface. Boundary conditions move to `new_name`; `boundary`
    /// replaces them when given. If another surface group already holds
    /// `new_name`, its entities join the merge and a [`NameCollisionWarning`]
    /// is recorded. With `new_name == None` the groups and their metadata are
    /// removed instead. Returns the entity tags of the resulting group, or of
    /// the removed groups.
    ///
    /// # Errors
    ///
    /// Returns [`DevicegenError::UnknownName`] if an old name is not bound to a
    /// surface group. Nothing is changed in that case.
    pub fn relabel_surface(
        &mut self,
        engine: &mut dyn GeometryEngine,
        old_names: &[&str],
        new_name: Option<&str>,
        boundary: Option<BoundaryCondition>,
    ) -> Result<Vec<Tag>> {
        let mut entities = self.entity_tags(engine, old_names, Dim::Surface)?;

        let Some(new_name) = new_name else {
            self.remove_physical_groups(engine, old_names)?;
            for name in old_names {
                self.regions.remove(name);
                self.boundaries.remove(name);
            }
            info!(names = ?old_names, "removed surface groups");
            return Ok(entities);
        };

        // Old groups, plus a group already holding the new name
        let mut groups: Vec<(Dim, Tag)> = old_names
            .iter()
            .map(|name| self.physical_tag(&*engine, name, Dim::Surface).map(|t| (Dim::Surface, t)))
            .collect::<Result<_>>()?;
        let existing = if old_names.contains(&new_name) {
            None
        } else {
            self.physical_tag(&*engine, new_name, Dim::Surface).ok()
        };
        if let Some(group) = existing {
            for tag in engine.entities_for_physical_group(Dim::Surface, group)? {
                if !entities.contains(&tag) {
                    entities.push(tag);
                }
            }
            groups.push((Dim::Surface, group));
            warn!(name = %new_name, "name already in use, merging groups");
            self.warnings.push(NameCollisionWarning {
                dim: Dim::Surface,
                name: new_name.to_owned(),
            });
        }

        engine.remove_physical_groups(&groups);
        for name in old_names.iter().chain(existing.map(|_| &new_name)) {
            engine.remove_physical_name(Dim::Surface, name);
        }
        let group = engine.add_physical_group(Dim::Surface, &entities)?;
        engine.set_physical_name(Dim::Surface, group, new_name)?;

        // Metadata and lineage
        self.boundaries.rename(old_names, new_name, boundary);
        self.top_surface.retain(|e| !entities.contains(&e.tag));
        for name in old_names {
            self.regions.remove(name);
        }
        self.regions.insert(
            new_name,
            Lineage::seeded(entities.iter().map(|&t| EntityRef::surface(t)).collect()),
        );
        info!(names = ?old_names, new = %new_name, entities = entities.len(), "relabeled surfaces");
        Ok(entities)
    }

    /// Gives each member of the surface group `name` its own group
    /// `{name}-0`, `{name}-1`, ... A group with one member is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`DevicegenError::UnknownName`] if `name` is not bound.
    pub fn split_surface(&mut self, engine: &mut dyn GeometryEngine, name: &str) -> Result<()> {
        let group = self.physical_tag(engine, name, Dim::Surface)?;
        let members = engine.entities_for_physical_group(Dim::Surface, group)?;
        if members.len() <= 1 {
            return Ok(());
        }

        engine.remove_physical_groups(&[(Dim::Surface, group)]);
        engine.remove_physical_name(Dim::Surface, name);
        let condition = self.boundaries.remove(name);
        for (i, &tag) in members.iter().enumerate() {
            let part = format!("{name}-{i}");
            let group = engine.add_physical_group(Dim::Surface, &[tag])?;
            engine.set_physical_name(Dim::Surface, group, &part)?;
            self.regions
                .insert(&part, Lineage::seeded(vec![EntityRef::surface(tag)]));
            if let Some(condition) = &condition {
                self.boundaries.insert(&part, condition.clone());
            }
        }
        self.regions.remove(name);
        debug!(%name, parts = members.len(), "split surface");
        Ok(())
    }

    /// Removes the named surface groups and their names.
    ///
    /// # Errors
    ///
    /// Returns [`DevicegenError::UnknownName`] if a name is not bound to a
    /// surface group. Nothing is removed in that case.
    pub fn remove_physical_groups(
        &mut self,
        engine: &mut dyn GeometryEngine,
        names: &[&str],
    ) -> Result<()> {
        let groups: Vec<(Dim, Tag)> = names
            .iter()
            .map(|name| self.physical_tag(&*engine, name, Dim::Surface).map(|t| (Dim::Surface, t)))
            .collect::<Result<_>>()?;
        for name in names {
            engine.remove_physical_name(Dim::Surface, name);
        }
        engine.remove_physical_groups(&groups);
        Ok(())
    }

    // --- Mesh fields ---

    /// Adds a box refinement field and makes it the background field.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::NonPositive`] for a non-positive size.
    #[allow(clippy::too_many_arguments)]
    pub fn new_box_field(
        &mut self,
        engine: &mut dyn GeometryEngine,
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
        size_in: f64,
        size_out: Option<f64>,
    ) -> Result<Tag> {
        check_size("size_in", size_in)?;
        if let Some(out) = size_out {
            check_size("size_out", out)?;
        }
        self.push_field(
            engine,
            MeshField::Box {
                size_in,
                size_out,
                x_min,
                x_max,
                y_min,
                y_max,
            },
        )
    }

    /// Adds a constant-size field over `surfaces` and makes it the background
    /// field.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::NonPositive`] for a non-positive size.
    pub fn new_constant_field(
        &mut self,
        engine: &mut dyn GeometryEngine,
        surfaces: &[Tag],
        size_in: f64,
        size_out: Option<f64>,
    ) -> Result<Tag> {
        check_size("size_in", size_in)?;
        if let Some(out) = size_out {
            check_size("size_out", out)?;
        }
        self.push_field(
            engine,
            MeshField::Constant {
                size_in,
                size_out,
                surfaces: surfaces.to_vec(),
            },
        )
    }

    /// Uses the minimum of every field created so far as the background field.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn min_field(&mut self, engine: &mut dyn GeometryEngine) -> Result<Tag> {
        let fields = self.fields.clone();
        self.push_field(engine, MeshField::Min { fields })
    }

    fn push_field(&mut self, engine: &mut dyn GeometryEngine, field: MeshField) -> Result<Tag> {
        engine.clear_mesh();
        let tag = engine.add_mesh_field(field)?;
        engine.set_background_field(tag)?;
        self.fields.push(tag);
        debug!(field = tag, "background field set");
        Ok(tag)
    }

    // --- Queries ---

    /// Volumes under region `name`, for one layer or all of them.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] if the region or the layer does not exist.
    pub fn get_volumes(&self, name: &str, layer: Option<usize>) -> Result<Vec<Tag>> {
        let lineage = self.lineage(name)?;
        frames_tags(name, &lineage.volume_frames, layer)
    }

    /// Surfaces of region `name`, for one layer boundary or all of them.
    /// Layer `0` is the surface that carries the name.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] if the region or the layer does not exist.
    pub fn get_surfaces(&self, name: &str, layer: Option<usize>) -> Result<Vec<Tag>> {
        let lineage = self.lineage(name)?;
        frames_tags(name, &lineage.surface_frames, layer)
    }

    fn lineage(&self, name: &str) -> Result<&Lineage> {
        self.regions
            .get(name)
            .ok_or_else(|| ParameterError::UnknownRegion(name.to_owned()).into())
    }

    /// Names of all physical groups of one dimension.
    #[must_use]
    pub fn names(&self, engine: &dyn GeometryEngine, dim: Dim) -> Vec<String> {
        engine
            .physical_groups(dim)
            .into_iter()
            .filter_map(|group| engine.physical_name(dim, group))
            .collect()
    }

    /// Physical group tag carrying `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DevicegenError::UnknownName`] if no group of `dim` has that name.
    pub fn physical_tag(&self, engine: &dyn GeometryEngine, name: &str, dim: Dim) -> Result<Tag> {
        engine
            .physical_groups(dim)
            .into_iter()
            .find(|&group| engine.physical_name(dim, group).as_deref() == Some(name))
            .ok_or_else(|| DevicegenError::UnknownName {
                name: name.to_owned(),
                dim,
            })
    }

    /// Entity tags of the groups named `names`, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`DevicegenError::UnknownName`] for an unbound name.
    pub fn entity_tags(
        &self,
        engine: &dyn GeometryEngine,
        names: &[&str],
        dim: Dim,
    ) -> Result<Vec<Tag>> {
        let mut tags = Vec::new();
        for name in names {
            let group = self.physical_tag(engine, name, dim)?;
            for tag in engine.entities_for_physical_group(dim, group)? {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        Ok(tags)
    }

    // --- Export ---

    /// Meshes the model and writes it to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::MeshOrder`] unless `order` is 1 or 2, before
    /// the engine is touched. Propagates engine failures.
    pub fn save_mesh(
        &self,
        engine: &mut dyn GeometryEngine,
        dim: u8,
        path: impl AsRef<Path>,
        order: u8,
    ) -> Result<()> {
        if !(1..=2).contains(&order) {
            return Err(ParameterError::MeshOrder(order).into());
        }
        engine.generate_mesh(dim)?;
        engine.set_mesh_order(order)?;
        engine.write_mesh(path.as_ref())?;
        Ok(())
    }

    /// Writes the unrolled geometry to `path`.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn save_geometry(&self, engine: &dyn GeometryEngine, path: impl AsRef<Path>) -> Result<()> {
        engine.write_geometry(path.as_ref())?;
        Ok(())
    }
}

fn check_size(parameter: &'static str, value: f64) -> Result<()> {
    if value.is_nan() || value <= 0.0 {
        return Err(ParameterError::NonPositive { parameter, value }.into());
    }
    Ok(())
}

fn frames_tags(name: &str, frames: &[Vec<EntityRef>], layer: Option<usize>) -> Result<Vec<Tag>> {
    match layer {
        Some(frame) => frames
            .get(frame)
            .map(|f| f.iter().map(|e| e.tag).collect())
            .ok_or_else(|| {
                ParameterError::FrameOutOfRange {
                    name: name.to_owned(),
                    frame,
                    frames: frames.len(),
                }
                .into()
            }),
        None => Ok(frames.iter().flatten().map(|e| e.tag).collect()),
    }
}
