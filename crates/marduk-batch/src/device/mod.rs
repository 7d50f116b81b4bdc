//! Device abstraction and its implementations.
//!
//! This module is responsible for:
//! - the [`Backend`] trait every GPU-backed type is generic over
//! - [`WgpuBackend`], the wgpu 28 implementation
//! - [`Gpu`], headless adapter/device bootstrap producing a `WgpuBackend`
//! - [`HeadlessBackend`], a recording implementation for tests and tools

mod backend;
mod gpu;
mod headless;
mod init;
mod wgpu_backend;

pub use backend::{
    Backend, BindGroupDesc, BufferDesc, BufferKind, InstanceBinding, PassDesc, PipelineDesc,
    TextureDesc,
};
pub use gpu::{Gpu, OffscreenTarget};
pub use headless::{
    HeadlessBackend, HeadlessBindGroup, HeadlessBuffer, HeadlessPipeline, HeadlessShaderModule,
    HeadlessStats, HeadlessTexture, RecordedCommands, RecordedDraw, RecordedPass, ResourceKind,
};
pub use init::GpuInit;
pub use wgpu_backend::{SheetTexture, SpritePipeline, WgpuBackend};
