//! Recording backend without a GPU.
//!
//! Buffers keep their bytes in memory, creation calls are counted, and encoded
//! passes come back as plain data. Pools built on it behave exactly like pools
//! on a real device, which makes rebuild and upload behaviour unit-testable.

use std::cell::{Cell, RefCell};
use std::ops::Range;
use std::rc::Rc;

use crate::error::{BatchError, Result};

use super::backend::{
    Backend, BindGroupDesc, BufferDesc, BufferKind, InstanceBinding, PassDesc, PipelineDesc,
    TextureDesc,
};

/// Creation call kinds, for counters and failure injection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    ShaderModule,
    Pipeline,
    BindGroup,
}

/// Running totals since the backend was created.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HeadlessStats {
    pub buffers_created: u64,
    pub textures_created: u64,
    pub shader_modules_created: u64,
    pub pipelines_created: u64,
    pub bind_groups_created: u64,
    pub buffer_writes: u64,
    pub bytes_written: u64,
    pub passes_encoded: u64,
    /// Buffers currently alive (created and not yet dropped).
    pub live_buffers: u64,
}

#[derive(Default)]
struct State {
    stats: Cell<HeadlessStats>,
    next_id: Cell<u64>,
    memory_limit: Cell<Option<u64>>,
    uniform_limit: Cell<Option<u64>>,
    fail_next: RefCell<Vec<ResourceKind>>,
    no_runtime_arrays: Cell<bool>,
}

impl State {
    fn bump(&self, f: impl FnOnce(&mut HeadlessStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn take_failure(&self, kind: ResourceKind, label: &str) -> Result<()> {
        let mut pending = self.fail_next.borrow_mut();
        if let Some(pos) = pending.iter().position(|k| *k == kind) {
            pending.remove(pos);
            return Err(BatchError::OutOfMemory {
                label: label.to_owned(),
                requested: 0,
                limit: 0,
            });
        }
        Ok(())
    }
}

/// Deterministic [`Backend`] that records instead of rendering.
#[derive(Clone, Default)]
pub struct HeadlessBackend {
    state: Rc<State>,
}

/// In-memory buffer.
pub struct HeadlessBuffer {
    id: u64,
    kind: BufferKind,
    bytes: RefCell<Vec<u8>>,
    state: Rc<State>,
}

pub struct HeadlessTexture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub pixels: Vec<u8>,
}

pub struct HeadlessShaderModule {
    pub id: u64,
    pub source: String,
}

pub struct HeadlessPipeline {
    pub id: u64,
    pub shader_id: u64,
    pub binding: InstanceBinding,
    pub blend: wgpu::BlendState,
    pub target_format: wgpu::TextureFormat,
}

pub struct HeadlessBindGroup {
    pub id: u64,
    pub pipeline_id: u64,
    pub instance_buffer_id: u64,
}

/// One recorded indexed draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDraw {
    pub pipeline_id: u64,
    pub bind_group_id: u64,
    pub indices: Range<u32>,
    pub instances: Range<u32>,
}

/// One recorded render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPass {
    pub label: String,
    pub clear: Option<wgpu::Color>,
    pub draws: Vec<RecordedDraw>,
}

/// Finished "command buffer".
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommands {
    pub passes: Vec<RecordedPass>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports only fixed-length (baked) instance arrays as available.
    pub fn without_runtime_arrays() -> Self {
        let backend = Self::default();
        backend.state.no_runtime_arrays.set(true);
        backend
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.stats.get()
    }

    /// Buffers larger than `bytes` fail with `OutOfMemory`.
    pub fn set_memory_limit(&self, bytes: Option<u64>) {
        self.state.memory_limit.set(bytes);
    }

    /// Uniform buffers larger than `bytes` fail with `OutOfMemory`, like a
    /// device's `max_uniform_buffer_binding_size`.
    pub fn set_uniform_binding_limit(&self, bytes: Option<u64>) {
        self.state.uniform_limit.set(bytes);
    }

    /// Makes the next creation call of `kind` fail with `OutOfMemory`.
    pub fn fail_next(&self, kind: ResourceKind) {
        self.state.fail_next.borrow_mut().push(kind);
    }
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.bytes.borrow().len() as u64
    }

    /// Copy of the buffer contents.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    /// Contents reinterpreted as records, truncated to `count`.
    pub fn read<T: bytemuck::Pod>(&self, count: usize) -> Vec<T> {
        let bytes = self.bytes.borrow();
        let len = (count * std::mem::size_of::<T>()).min(bytes.len());
        bytemuck::pod_collect_to_vec(&bytes[..len])
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        self.state.bump(|s| s.live_buffers -= 1);
    }
}

impl RecordedCommands {
    /// All draws across passes.
    pub fn draws(&self) -> impl Iterator<Item = &RecordedDraw> {
        self.passes.iter().flat_map(|p| p.draws.iter())
    }
}

impl HeadlessBackend {
    fn new_buffer(&self, desc: &BufferDesc<'_>, contents: Option<&[u8]>) -> Result<HeadlessBuffer> {
        self.state.take_failure(ResourceKind::Buffer, desc.label)?;
        let uniform_limit = match desc.kind {
            BufferKind::Uniform => self.state.uniform_limit.get(),
            _ => None,
        };
        for limit in [self.state.memory_limit.get(), uniform_limit].into_iter().flatten() {
            if desc.size > limit {
                return Err(BatchError::OutOfMemory {
                    label: desc.label.to_owned(),
                    requested: desc.size,
                    limit,
                });
            }
        }

        let mut bytes = vec![0u8; desc.size as usize];
        if let Some(contents) = contents {
            let n = contents.len().min(bytes.len());
            bytes[..n].copy_from_slice(&contents[..n]);
        }

        self.state.bump(|s| {
            s.buffers_created += 1;
            s.live_buffers += 1;
        });

        Ok(HeadlessBuffer {
            id: self.state.next_id(),
            kind: desc.kind,
            bytes: RefCell::new(bytes),
            state: Rc::clone(&self.state),
        })
    }
}

impl Backend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type ShaderModule = HeadlessShaderModule;
    type Pipeline = HeadlessPipeline;
    type BindGroup = HeadlessBindGroup;
    type Target = ();
    type CommandBuffer = RecordedCommands;

    fn supports_runtime_arrays(&self) -> bool {
        !self.state.no_runtime_arrays.get()
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<HeadlessBuffer> {
        self.new_buffer(desc, None)
    }

    fn create_buffer_init(&self, desc: &BufferDesc<'_>, contents: &[u8]) -> Result<HeadlessBuffer> {
        self.new_buffer(desc, Some(contents))
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) {
        let mut bytes = buffer.bytes.borrow_mut();
        let start = offset as usize;
        let end = start + data.len();
        assert!(
            end <= bytes.len(),
            "write of {} bytes at {offset} overruns buffer of {} bytes",
            data.len(),
            bytes.len()
        );
        bytes[start..end].copy_from_slice(data);
        self.state.bump(|s| {
            s.buffer_writes += 1;
            s.bytes_written += data.len() as u64;
        });
    }

    fn create_texture(&self, desc: &TextureDesc<'_>, pixels: &[u8]) -> Result<HeadlessTexture> {
        self.state.take_failure(ResourceKind::Texture, desc.label)?;
        self.state.bump(|s| s.textures_created += 1);
        Ok(HeadlessTexture {
            id: self.state.next_id(),
            width: desc.width,
            height: desc.height,
            format: desc.format,
            pixels: pixels.to_vec(),
        })
    }

    fn create_shader_module(&self, label: &str, source: &str) -> Result<HeadlessShaderModule> {
        self.state.take_failure(ResourceKind::ShaderModule, label)?;
        self.state.bump(|s| s.shader_modules_created += 1);
        Ok(HeadlessShaderModule {
            id: self.state.next_id(),
            source: source.to_owned(),
        })
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_, Self>) -> Result<HeadlessPipeline> {
        self.state.take_failure(ResourceKind::Pipeline, desc.label)?;
        self.state.bump(|s| s.pipelines_created += 1);
        Ok(HeadlessPipeline {
            id: self.state.next_id(),
            shader_id: desc.shader.id,
            binding: desc.binding,
            blend: desc.blend,
            target_format: desc.target_format,
        })
    }

    fn create_bind_group(&self, desc: &BindGroupDesc<'_, Self>) -> Result<HeadlessBindGroup> {
        self.state.take_failure(ResourceKind::BindGroup, desc.label)?;
        self.state.bump(|s| s.bind_groups_created += 1);
        Ok(HeadlessBindGroup {
            id: self.state.next_id(),
            pipeline_id: desc.pipeline.id,
            instance_buffer_id: desc.instances.id,
        })
    }

    fn encode_pass(&self, pass: &PassDesc<'_, Self>) -> RecordedCommands {
        self.state.bump(|s| s.passes_encoded += 1);

        let mut draws = Vec::new();
        if pass.instance_count > 0 {
            draws.push(RecordedDraw {
                pipeline_id: pass.pipeline.id,
                bind_group_id: pass.bind_group.id,
                indices: 0..pass.index_count,
                instances: 0..pass.instance_count,
            });
        }

        RecordedCommands {
            passes: vec![RecordedPass {
                label: pass.label.to_owned(),
                clear: pass.clear,
                draws,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(size: u64) -> BufferDesc<'static> {
        BufferDesc {
            label: "test",
            size,
            kind: BufferKind::Storage,
        }
    }

    #[test]
    fn live_buffer_count_follows_drops() {
        let backend = HeadlessBackend::new();
        let a = backend.create_buffer(&desc(16)).unwrap();
        let b = backend.create_buffer(&desc(16)).unwrap();
        assert_eq!(backend.stats().live_buffers, 2);
        drop(a);
        assert_eq!(backend.stats().live_buffers, 1);
        drop(b);
        assert_eq!(backend.stats().live_buffers, 0);
        assert_eq!(backend.stats().buffers_created, 2);
    }

    #[test]
    fn writes_land_at_offset() {
        let backend = HeadlessBackend::new();
        let buf = backend.create_buffer(&desc(8)).unwrap();
        backend.write_buffer(&buf, 4, &[1, 2, 3, 4]);
        assert_eq!(buf.contents(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn uniform_limit_only_applies_to_uniform_buffers() {
        let backend = HeadlessBackend::new();
        backend.set_uniform_binding_limit(Some(64));
        let uniform = BufferDesc {
            kind: BufferKind::Uniform,
            ..desc(128)
        };
        let err = backend.create_buffer(&uniform).err().unwrap();
        assert!(err.is_out_of_memory());
        assert!(backend.create_buffer(&desc(128)).is_ok());
    }

    #[test]
    fn injected_failure_fires_once() {
        let backend = HeadlessBackend::new();
        backend.fail_next(ResourceKind::Buffer);
        assert!(backend.create_buffer(&desc(8)).is_err());
        assert!(backend.create_buffer(&desc(8)).is_ok());
    }

    #[test]
    fn memory_limit_rejects_large_buffers() {
        let backend = HeadlessBackend::new();
        backend.set_memory_limit(Some(64));
        let err = backend.create_buffer(&desc(128)).err().unwrap();
        assert!(err.is_out_of_memory());
        assert_eq!(backend.stats().live_buffers, 0);
    }
}
