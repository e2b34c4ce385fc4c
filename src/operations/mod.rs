//! Caller-facing device operations.
//!
//! Each operation is built with `new` and optional `with_*` settings, then
//! applied with `execute(&mut device, &mut engine)`.

pub mod dots;
pub mod layering;

pub use dots::{NewDotRectangle, SetDotRegionFromSurfaces};
pub use layering::{NewCapLayer, NewLayer, NewTopLayer};
