//! GPU-facing record layouts and quad geometry shared by every pool.

use bytemuck::{Pod, Zeroable};

// ── blend ─────────────────────────────────────────────────────────────────

/// Blend state for premultiplied-alpha colors; the pool default.
pub fn premul_alpha_blend() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

// ── pool uniform ──────────────────────────────────────────────────────────

/// Per-pool uniform: `view_projection * pool_model` and the pool tint.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct PoolUniform {
    pub transform: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl PoolUniform {
    pub fn new(transform: glam::Mat4, color: [f32; 4]) -> Self {
        Self {
            transform: transform.to_cols_array_2d(),
            color,
        }
    }
}

/// Returns the `wgpu` minimum binding size for the pool uniform buffer.
pub(crate) fn pool_ubo_min_binding_size() -> std::num::NonZeroU64 {
    const SIZE: std::num::NonZeroU64 =
        match std::num::NonZeroU64::new(std::mem::size_of::<PoolUniform>() as u64) {
            Some(size) => size,
            None => panic!("PoolUniform is zero-sized"),
        };
    SIZE
}

// ── instance record ───────────────────────────────────────────────────────

/// One instance as the vertex stage sees it (112 bytes, 16-byte aligned).
///
/// `uv` packs the four quad corners: `uv[0] = (top-left, top-right)`,
/// `uv[1] = (bottom-left, bottom-right)`, each as `(u, v)`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub model: [[f32; 4]; 4],
    pub uv: [[f32; 4]; 2],
    pub color: [f32; 4],
}

impl InstanceRecord {
    /// Identity model, full-texture UVs, opaque white.
    pub const IDENTITY: InstanceRecord = InstanceRecord {
        model: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
        uv: [[0.0, 0.0, 1.0, 0.0], [0.0, 1.0, 1.0, 1.0]],
        color: [1.0, 1.0, 1.0, 1.0],
    };

    /// Sets the corner UVs from `[tl.u, tl.v, tr.u, tr.v, bl.u, bl.v, br.u, br.v]`.
    #[inline]
    pub fn set_uvs(&mut self, uvs: [f32; 8]) {
        self.uv = [
            [uvs[0], uvs[1], uvs[2], uvs[3]],
            [uvs[4], uvs[5], uvs[6], uvs[7]],
        ];
    }

    /// Corner UVs in the order accepted by [`set_uvs`](Self::set_uvs).
    #[inline]
    pub fn uvs(&self) -> [f32; 8] {
        let [a, b] = self.uv;
        [a[0], a[1], a[2], a[3], b[0], b[1], b[2], b[3]]
    }
}

impl Default for InstanceRecord {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ── quad vertex ───────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(crate) struct QuadVertex {
    pub pos: [f32; 2], // 0..1
}

impl QuadVertex {
    const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

    pub(crate) fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

pub(crate) const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { pos: [0.0, 0.0] },
    QuadVertex { pos: [1.0, 0.0] },
    QuadVertex { pos: [1.0, 1.0] },
    QuadVertex { pos: [0.0, 1.0] },
];

pub(crate) const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

pub(crate) const QUAD_INDEX_COUNT: u32 = QUAD_INDICES.len() as u32;
