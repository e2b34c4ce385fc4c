//! Per-name lineage of surfaces and volumes through successive layers.

use std::collections::BTreeMap;

use slotmap::{new_key_type, SlotMap};

use crate::engine::EntityRef;

new_key_type! {
    /// Stable handle of a named region, independent of engine tags.
    pub struct RegionId;
}

/// Surfaces and volumes a region has occupied, one frame per layer.
///
/// For a named region, `surface_frames.len() == volume_frames.len() + 1`:
/// volume frame `k` was extruded from surface frame `k`, and surface frame
/// `k + 1` holds the far faces of those volumes, index-aligned with them.
///
/// For a dot, surface frames grow by one per layer while volume frames only
/// grow for layers that track the dot column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub surface_frames: Vec<Vec<EntityRef>>,
    pub volume_frames: Vec<Vec<EntityRef>>,
}

/// Lineage of a dot footprint.
pub type DotLineage = Lineage;

impl Lineage {
    /// A lineage with a single surface frame.
    #[must_use]
    pub fn seeded(surfaces: Vec<EntityRef>) -> Self {
        Self {
            surface_frames: vec![surfaces],
            volume_frames: Vec::new(),
        }
    }

    /// The most recent surface frame.
    #[must_use]
    pub fn last_surfaces(&self) -> &[EntityRef] {
        self.surface_frames.last().map_or(&[][..], Vec::as_slice)
    }

    /// Every volume across all frames.
    pub fn all_volumes(&self) -> impl Iterator<Item = &EntityRef> {
        self.volume_frames.iter().flatten()
    }
}

/// A name bound to its lineage.
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub lineage: Lineage,
}

/// Named regions stored in an arena and indexed by name.
#[derive(Debug, Default)]
pub struct RegionRegistry {
    regions: SlotMap<RegionId, Region>,
    by_name: BTreeMap<String, RegionId>,
}

impl RegionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `lineage`, replacing any previous binding.
    pub fn insert(&mut self, name: &str, lineage: Lineage) -> RegionId {
        self.remove(name);
        let id = self.regions.insert(Region {
            name: name.to_owned(),
            lineage,
        });
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Removes the binding of `name`, returning its lineage.
    pub fn remove(&mut self, name: &str) -> Option<Lineage> {
        let id = self.by_name.remove(name)?;
        self.regions.remove(id).map(|r| r.lineage)
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.by_name.clear();
    }

    #[must_use]
    pub fn id(&self, name: &str) -> Option<RegionId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Lineage> {
        self.id(name)
            .and_then(|id| self.regions.get(id))
            .map(|r| &r.lineage)
    }

    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id)
    }

    /// Region handles in name order.
    #[must_use]
    pub fn ids(&self) -> Vec<RegionId> {
        self.by_name.values().copied().collect()
    }

    /// Names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// `(name, lineage)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Lineage)> {
        self.by_name
            .iter()
            .filter_map(|(name, &id)| self.regions.get(id).map(|r| (name.as_str(), &r.lineage)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_previous_binding() {
        let mut registry = RegionRegistry::new();
        let first = registry.insert("gate", Lineage::seeded(vec![EntityRef::surface(1)]));
        let second = registry.insert("gate", Lineage::seeded(vec![EntityRef::surface(2)]));

        assert_ne!(first, second);
        assert!(registry.region(first).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("gate").unwrap().last_surfaces(), &[EntityRef::surface(2)]);
    }

    #[test]
    fn iteration_follows_name_order() {
        let mut registry = RegionRegistry::new();
        registry.insert("surf2", Lineage::default());
        registry.insert("surf1", Lineage::default());
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, ["surf1", "surf2"]);
    }

    #[test]
    fn remove_returns_lineage() {
        let mut registry = RegionRegistry::new();
        registry.insert("a", Lineage::seeded(vec![EntityRef::surface(3)]));
        let lineage = registry.remove("a").unwrap();
        assert_eq!(lineage.surface_frames.len(), 1);
        assert!(registry.is_empty());
        assert!(registry.remove("a").is_none());
    }
}
