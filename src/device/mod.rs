//! Identity tracking for layered devices.
//!
//! [`DeviceTopology`] binds human-meaningful names to engine entities and
//! carries those names through extrusion, fragmentation and relabeling.

mod config;
mod lineage;
mod registry;
mod topology;

pub use config::DeviceConfig;
pub use lineage::{DotLineage, Lineage, Region, RegionId, RegionRegistry};
pub use registry::{
    BoundaryCondition, BoundaryRegistry, MaterialProps, MaterialRegistry, MetadataRegistry,
};
pub use topology::DeviceTopology;
