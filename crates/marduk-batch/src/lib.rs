//! Instanced sprite and tile batching on wgpu.
//!
//! A pool draws any number of textured, animated quads with one instanced
//! draw call while every instance keeps its own transform, tint and frame.
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`device`] | `Backend` trait, `WgpuBackend`, `HeadlessBackend`, `Gpu` bootstrap |
//! | [`render`] | `InstancePool`, `Tilemap`, `MirroredBuffer`, `ShaderTemplate` |
//! | [`sprite`] | `Spritesheet`, `AnimationTable`, `AnimationState`, `Transform` |
//! | [`resource`] | `Shared` handles for objects used by several pools |
//! | [`time`] | `Clock`, `ManualClock` |
//!
//! # Quick start
//!
//! ```rust
//! use marduk_batch::device::HeadlessBackend;
//! use marduk_batch::render::{InstancePool, PoolConfig};
//! use marduk_batch::resource::Shared;
//! use marduk_batch::sprite::{AnimationTable, Spritesheet};
//! use marduk_batch::time::{Clock, ManualClock};
//!
//! let backend = HeadlessBackend::new();
//! let table = AnimationTable::parse("8 8  0 4 10 0 0").unwrap();
//! let pixels = vec![255u8; 32 * 8 * 4];
//! let sheet = Spritesheet::new(
//!     &backend, "hero", &pixels, 32, 8, wgpu::TextureFormat::Rgba8Unorm, table,
//! ).unwrap();
//!
//! let mut pool = InstancePool::new(&backend, Shared::new(sheet), PoolConfig::default()).unwrap();
//! let clock = ManualClock::new();
//! let hero = pool.add_instance().unwrap();
//! pool.set_animation(hero, 0, clock.now());
//!
//! pool.update(clock.advance_secs(0.1)).unwrap();
//! let commands = pool.draw(&()).unwrap();
//! assert_eq!(commands.draws().count(), 1);
//! ```

pub mod device;
pub mod error;
pub mod logging;
pub mod paint;
pub mod render;
pub mod resource;
pub mod sprite;
pub mod time;

pub use error::{BatchError, Result};
