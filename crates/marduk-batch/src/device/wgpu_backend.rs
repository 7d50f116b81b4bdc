use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::error::{BatchError, Result};
use crate::render::common::{pool_ubo_min_binding_size, QuadVertex};

use super::backend::{
    Backend, BindGroupDesc, BufferDesc, BufferKind, InstanceBinding, PassDesc, PipelineDesc,
    TextureDesc,
};

/// [`Backend`] implementation on a wgpu device/queue pair.
///
/// Cloning is cheap; clones share the device.
#[derive(Clone)]
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    limits: wgpu::Limits,
    runtime_arrays: bool,
}

/// Sheet texture with the view and sampler the sprite pipeline binds.
pub struct SheetTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

/// Render pipeline plus the bind group layout its bind groups are built from.
pub struct SpritePipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl WgpuBackend {
    /// Wraps an existing device.
    ///
    /// `runtime_arrays` must only be `true` when the vertex stage may read
    /// storage buffers (`DownlevelFlags::VERTEX_STORAGE`).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, runtime_arrays: bool) -> Self {
        let limits = device.limits();
        let runtime_arrays = runtime_arrays && limits.max_storage_buffers_per_shader_stage > 0;
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            limits,
            runtime_arrays,
        }
    }

    /// Wraps a device created from `adapter`, probing its downlevel capabilities.
    pub fn from_adapter(adapter: &wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let vertex_storage = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::VERTEX_STORAGE);
        Self::new(device, queue, vertex_storage)
    }

    /// Returns a reference to the logical device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the command queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Largest buffer the device accepts for `kind`.
    fn buffer_limit(&self, kind: BufferKind) -> u64 {
        match kind {
            BufferKind::Uniform => u64::from(self.limits.max_uniform_buffer_binding_size),
            BufferKind::Storage => u64::from(self.limits.max_storage_buffer_binding_size),
            BufferKind::Vertex | BufferKind::Index => self.limits.max_buffer_size,
        }
    }

    fn check_size(&self, desc: &BufferDesc<'_>) -> Result<()> {
        let limit = self.buffer_limit(desc.kind);
        if desc.size == 0 || desc.size > limit {
            return Err(BatchError::OutOfMemory {
                label: desc.label.to_owned(),
                requested: desc.size,
                limit,
            });
        }
        Ok(())
    }
}

fn usages(kind: BufferKind) -> wgpu::BufferUsages {
    let role = match kind {
        BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
        BufferKind::Index => wgpu::BufferUsages::INDEX,
        BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
        BufferKind::Storage => wgpu::BufferUsages::STORAGE,
    };
    role | wgpu::BufferUsages::COPY_DST
}

impl Backend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Texture = SheetTexture;
    type ShaderModule = wgpu::ShaderModule;
    type Pipeline = SpritePipeline;
    type BindGroup = wgpu::BindGroup;
    type Target = wgpu::TextureView;
    type CommandBuffer = wgpu::CommandBuffer;

    fn supports_runtime_arrays(&self) -> bool {
        self.runtime_arrays
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<wgpu::Buffer> {
        self.check_size(desc)?;
        log::trace!("create buffer `{}` ({} bytes)", desc.label, desc.size);
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size,
            usage: usages(desc.kind),
            mapped_at_creation: false,
        }))
    }

    fn create_buffer_init(&self, desc: &BufferDesc<'_>, contents: &[u8]) -> Result<wgpu::Buffer> {
        self.check_size(desc)?;
        Ok(self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents,
                usage: usages(desc.kind),
            }))
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_texture(&self, desc: &TextureDesc<'_>, pixels: &[u8]) -> Result<SheetTexture> {
        let max = self.limits.max_texture_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(BatchError::OutOfMemory {
                label: desc.label.to_owned(),
                requested: u64::from(desc.width.max(desc.height)),
                limit: u64::from(max),
            });
        }

        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.bytes_per_pixel),
                rows_per_image: Some(desc.height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Sprites are pixel art; sample without filtering.
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(desc.label),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        Ok(SheetTexture {
            texture,
            view,
            sampler,
        })
    }

    fn create_shader_module(&self, label: &str, source: &str) -> Result<wgpu::ShaderModule> {
        Ok(self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            }))
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_, Self>) -> Result<SpritePipeline> {
        let instance_ty = match desc.binding {
            InstanceBinding::Baked => wgpu::BufferBindingType::Uniform,
            InstanceBinding::Runtime => wgpu::BufferBindingType::Storage { read_only: true },
        };

        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(desc.label),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::VERTEX,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: Some(pool_ubo_min_binding_size()),
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::VERTEX,
                            ty: wgpu::BindingType::Buffer {
                                ty: instance_ty,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 3,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ],
                });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&bind_group_layout],
                immediate_size: 0,
            });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),

                vertex: wgpu::VertexState {
                    module: desc.shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[QuadVertex::layout()],
                },

                fragment: Some(wgpu::FragmentState {
                    module: desc.shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: desc.target_format,
                        blend: Some(desc.blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),

                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },

                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });

        Ok(SpritePipeline {
            pipeline,
            bind_group_layout,
        })
    }

    fn create_bind_group(&self, desc: &BindGroupDesc<'_, Self>) -> Result<wgpu::BindGroup> {
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(desc.label),
            layout: &desc.pipeline.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: desc.uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: desc.instances.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&desc.texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&desc.texture.sampler),
                },
            ],
        }))
    }

    fn encode_pass(&self, pass: &PassDesc<'_, Self>) -> wgpu::CommandBuffer {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(pass.label),
            });

        {
            let load = match pass.clear {
                Some(color) => wgpu::LoadOp::Clear(color),
                None => wgpu::LoadOp::Load,
            };

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(pass.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: pass.target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            if pass.instance_count > 0 {
                rpass.set_pipeline(&pass.pipeline.pipeline);
                rpass.set_bind_group(0, pass.bind_group, &[]);
                rpass.set_vertex_buffer(0, pass.vertices.slice(..));
                rpass.set_index_buffer(pass.indices.slice(..), wgpu::IndexFormat::Uint16);
                rpass.draw_indexed(0..pass.index_count, 0, 0..pass.instance_count);
            }
        }

        encoder.finish()
    }
}
