//! Instanced rendering of sprite and tile pools.
//!
//! Each pool owns its instance buffer, pipeline and bind group and draws all of
//! its instances with one indexed, instanced call over a shared unit quad.
//!
//! Convention:
//! - Instance models place a unit quad centered on the origin.
//! - The pool uniform carries `view_projection * pool_model`; the caller picks
//!   the coordinate system through the view projection.
//! - Colors are linear premultiplied RGBA.

pub(crate) mod common;
mod mirror;
mod pool;
mod shader;
mod tilemap;

pub use common::{premul_alpha_blend, InstanceRecord, PoolUniform};
pub use mirror::{MirroredBuffer, SyncOutcome};
pub use pool::{BindingStrategy, InstanceId, InstancePool, PoolConfig, PoolStats};
pub use shader::{ShaderTemplate, CAPACITY_PLACEHOLDER};
pub use tilemap::{Tile, Tilemap};
