pub mod device;
pub mod engine;
pub mod error;
pub mod mask;
pub mod math;
pub mod operations;

pub use device::{DeviceConfig, DeviceTopology};
pub use engine::{GeometryEngine, RectilinearEngine};
pub use error::{DevicegenError, Result};
pub use mask::{MaskCompiler, Script};
