use anyhow::{Context, Result};

use super::{GpuInit, WgpuBackend};

/// Owns the wgpu instance and adapter and hands out a [`WgpuBackend`].
///
/// No surface is involved: pools render into any texture view, and windowed
/// hosts that already own a device can build a `WgpuBackend` directly.
pub struct Gpu {
    /// wgpu instance used to create the adapter.
    instance: wgpu::Instance,

    /// Selected adapter.
    adapter: wgpu::Adapter,

    /// Device + queue handle shared with every pool.
    backend: WgpuBackend,
}

/// Offscreen color target.
pub struct OffscreenTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
}

impl Gpu {
    /// Creates a GPU context without a window.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu; native callers
    /// usually go through [`new_headless_blocking`](Self::new_headless_blocking).
    pub async fn new_headless(init: GpuInit) -> Result<Self> {
        let GpuInit {
            backends,
            power_preference,
            force_fallback_adapter,
            required_features,
            required_limits,
        } = init;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("marduk-batch device"),
                required_features,
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let info = adapter.get_info();
        log::info!("using adapter `{}` ({:?})", info.name, info.backend);

        let backend = WgpuBackend::from_adapter(&adapter, device, queue);

        Ok(Self {
            instance,
            adapter,
            backend,
        })
    }

    /// Blocking wrapper around [`new_headless`](Self::new_headless) for native callers.
    pub fn new_headless_blocking(init: GpuInit) -> Result<Self> {
        pollster::block_on(Self::new_headless(init))
    }

    /// Returns the backend handle passed to pool and spritesheet constructors.
    pub fn backend(&self) -> &WgpuBackend {
        &self.backend
    }

    /// Returns the selected adapter.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Returns the wgpu instance.
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Creates a render target texture that can also be copied out.
    pub fn create_target(
        &self,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<OffscreenTarget> {
        anyhow::ensure!(width > 0 && height > 0, "render target has zero size");

        let texture = self
            .backend
            .device()
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("marduk-batch offscreen target"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(OffscreenTarget {
            texture,
            view,
            format,
        })
    }

    /// Submits recorded command buffers.
    pub fn submit(&self, commands: impl IntoIterator<Item = wgpu::CommandBuffer>) {
        self.backend.queue().submit(commands);
    }
}
