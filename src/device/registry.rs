//! Material and boundary-condition metadata keyed by region name.

use std::collections::BTreeMap;

/// Material assignment of a named volume.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialProps {
    /// Material identifier understood by the downstream solver.
    pub material: Option<String>,
    /// Acceptor density in cm^-3.
    pub pdoping: f64,
    /// Donor density in cm^-3.
    pub ndoping: f64,
}

impl MaterialProps {
    #[must_use]
    pub fn new(material: impl Into<String>) -> Self {
        Self {
            material: Some(material.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_pdoping(mut self, pdoping: f64) -> Self {
        self.pdoping = pdoping;
        self
    }

    #[must_use]
    pub fn with_ndoping(mut self, ndoping: f64) -> Self {
        self.ndoping = ndoping;
        self
    }
}

/// Boundary condition attached to a named surface.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryCondition {
    /// Condition type, e.g. `gate`, `schottky` or `ohmic`.
    pub kind: String,
    pub params: Vec<f64>,
}

impl BoundaryCondition {
    #[must_use]
    pub fn new(kind: impl Into<String>, params: Vec<f64>) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }
}

/// Name-keyed metadata store. Renames move entries; they never copy them.
#[derive(Debug, Clone)]
pub struct MetadataRegistry<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Default for MetadataRegistry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

/// Material properties by volume name.
pub type MaterialRegistry = MetadataRegistry<MaterialProps>;

/// Boundary conditions by surface name.
pub type BoundaryRegistry = MetadataRegistry<BoundaryCondition>;

impl<T> MetadataRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `name`, overwriting any previous entry.
    pub fn insert(&mut self, name: &str, value: T) {
        self.entries.insert(name.to_owned(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        self.entries.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves the entries of `old_names` to `new_name`.
    ///
    /// With `replacement`, that value is stored under `new_name` instead of a
    /// migrated one; otherwise the last existing old entry is moved. Renaming
    /// a key to itself with a replacement overwrites it.
    pub fn rename(&mut self, old_names: &[&str], new_name: &str, replacement: Option<T>) {
        let mut migrated = None;
        for name in old_names {
            if let Some(value) = self.entries.remove(*name) {
                migrated = Some(value);
            }
        }
        if let Some(value) = replacement.or(migrated) {
            self.entries.insert(new_name.to_owned(), value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gate(v: f64) -> BoundaryCondition {
        BoundaryCondition::new("gate", vec![v])
    }

    #[test]
    fn rename_moves_entry() {
        let mut registry = BoundaryRegistry::new();
        registry.insert("plunger", gate(0.5));
        registry.rename(&["plunger"], "P1", None);

        assert!(!registry.contains("plunger"));
        assert_eq!(registry.get("P1"), Some(&gate(0.5)));
    }

    #[test]
    fn rename_to_self_overwrites() {
        let mut registry = BoundaryRegistry::new();
        registry.insert("top", gate(0.1));
        registry.rename(&["top"], "top", Some(gate(0.2)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("top").unwrap().params, vec![0.2]);
    }

    #[test]
    fn material_builder_sets_doping() {
        let props = MaterialProps::new("Si").with_ndoping(1e18);
        assert_eq!(props.material.as_deref(), Some("Si"));
        assert!(props.pdoping.abs() < f64::EPSILON);
        assert!((props.ndoping - 1e18).abs() < 1.0);
    }
}
