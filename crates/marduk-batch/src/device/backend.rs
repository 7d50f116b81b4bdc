use crate::error::Result;

/// Role of a device buffer; maps to usage flags on the concrete backend.
///
/// Every kind is created copy-destination so it can be written through the queue.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Storage,
}

/// How the per-instance array is exposed to the vertex stage.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum InstanceBinding {
    /// Fixed-length uniform array; the length is baked into the shader source,
    /// so every capacity change needs a new shader module and pipeline.
    Baked,
    /// Runtime-sized read-only storage array; capacity changes only replace
    /// the buffer and the bind group.
    Runtime,
}

impl InstanceBinding {
    /// Buffer kind backing the instance array.
    #[inline]
    pub fn buffer_kind(self) -> BufferKind {
        match self {
            InstanceBinding::Baked => BufferKind::Uniform,
            InstanceBinding::Runtime => BufferKind::Storage,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: u64,
    pub kind: BufferKind,
}

#[derive(Debug, Copy, Clone)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    /// Bytes per texel; validated by the caller against `format`.
    pub bytes_per_pixel: u32,
}

pub struct PipelineDesc<'a, B: Backend> {
    pub label: &'a str,
    pub shader: &'a B::ShaderModule,
    pub binding: InstanceBinding,
    pub blend: wgpu::BlendState,
    pub target_format: wgpu::TextureFormat,
}

/// Resources bound at group 0 of the sprite pipeline.
///
/// 0: pool uniform, 1: instance array, 2: sheet texture, 3: sheet sampler.
pub struct BindGroupDesc<'a, B: Backend> {
    pub label: &'a str,
    pub pipeline: &'a B::Pipeline,
    pub uniforms: &'a B::Buffer,
    pub instances: &'a B::Buffer,
    pub texture: &'a B::Texture,
}

/// One render pass with at most one indexed, instanced draw.
///
/// `instance_count == 0` still produces a (empty) pass.
pub struct PassDesc<'a, B: Backend> {
    pub label: &'a str,
    pub target: &'a B::Target,
    pub clear: Option<wgpu::Color>,
    pub pipeline: &'a B::Pipeline,
    pub bind_group: &'a B::BindGroup,
    pub vertices: &'a B::Buffer,
    pub indices: &'a B::Buffer,
    pub index_count: u32,
    pub instance_count: u32,
}

/// Device abstraction consumed by pools, mirrored buffers and spritesheets.
///
/// Implementations are cheap handles (`Clone`) onto one logical device; every
/// constructor in this crate receives one explicitly instead of reading a
/// process-wide device.
///
/// Creation calls are fallible so growth paths can surface `OutOfMemory`
/// without having released anything.
pub trait Backend: Clone {
    type Buffer;
    type Texture;
    type ShaderModule;
    type Pipeline;
    type BindGroup;
    type Target;
    type CommandBuffer;

    /// Whether runtime-sized storage arrays are available to the vertex stage.
    fn supports_runtime_arrays(&self) -> bool;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer>;

    fn create_buffer_init(&self, desc: &BufferDesc<'_>, contents: &[u8]) -> Result<Self::Buffer>;

    /// Queues a write of `data` at `offset` bytes.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    fn create_texture(&self, desc: &TextureDesc<'_>, pixels: &[u8]) -> Result<Self::Texture>;

    fn create_shader_module(&self, label: &str, source: &str) -> Result<Self::ShaderModule>;

    fn create_pipeline(&self, desc: &PipelineDesc<'_, Self>) -> Result<Self::Pipeline>;

    fn create_bind_group(&self, desc: &BindGroupDesc<'_, Self>) -> Result<Self::BindGroup>;

    /// Records `pass` into a finished command buffer.
    fn encode_pass(&self, pass: &PassDesc<'_, Self>) -> Self::CommandBuffer;
}
