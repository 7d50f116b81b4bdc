//! Color model used for instance tints and pool-wide tints.
//!
//! Colors are linear premultiplied RGBA, matching the premultiplied blend
//! state pools are created with by default.

mod color;

pub use color::Color;
