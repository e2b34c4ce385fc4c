//! Mask record reader and compiler.

mod compiler;
mod record;
mod script;

pub use compiler::{MaskCompiler, COORDINATE_DECIMALS};
pub use record::{parse_records, LayerId, MaskRecord};
pub use script::{CurveLoopRef, LayerElement, LineRef, PointRef, Script, Statement, SurfaceRef};
