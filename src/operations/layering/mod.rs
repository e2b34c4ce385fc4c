mod new_layer;
mod top_layer;

pub use new_layer::NewLayer;
pub use top_layer::{NewCapLayer, NewTopLayer};
