//! Sprite-side data: spritesheets, animation tables, per-instance animation
//! state and transforms.

mod animation;
mod sheet;
mod table;
mod transform;

pub use animation::{AnimationDescriptor, AnimationKind, AnimationState, Flip};
pub use sheet::{bytes_per_pixel, Spritesheet};
pub use table::AnimationTable;
pub use transform::Transform;
