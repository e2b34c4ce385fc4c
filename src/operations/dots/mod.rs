mod dot_region;
mod dot_rectangle;

pub use dot_rectangle::NewDotRectangle;
pub use dot_region::SetDotRegionFromSurfaces;
