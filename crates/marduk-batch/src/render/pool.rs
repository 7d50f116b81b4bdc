use std::time::Instant;

use glam::{Mat4, Vec2};
use slotmap::{SecondaryMap, SlotMap};

use crate::device::{
    Backend, BindGroupDesc, BufferDesc, BufferKind, InstanceBinding, PassDesc, PipelineDesc,
};
use crate::error::{BatchError, Result};
use crate::paint::Color;
use crate::resource::Shared;
use crate::sprite::{AnimationDescriptor, AnimationState, Spritesheet, Transform};

use super::common::{
    premul_alpha_blend, InstanceRecord, PoolUniform, QUAD_INDEX_COUNT, QUAD_INDICES, QUAD_VERTICES,
};
use super::mirror::{MirroredBuffer, SyncOutcome};
use super::shader::ShaderTemplate;

slotmap::new_key_type! {
    /// Stable handle to one instance of an [`InstancePool`].
    ///
    /// Survives swap-removal of other instances; stale after its own removal.
    pub struct InstanceId;
}

/// How a pool picks its [`InstanceBinding`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BindingStrategy {
    /// Runtime arrays when the backend supports them, baked otherwise.
    #[default]
    Auto,
    /// Fixed-size uniform array. The whole instance buffer is one uniform
    /// binding, so the device's `max_uniform_buffer_binding_size` bounds the
    /// capacity: with the default 64 KiB limit and 112-byte records a pool
    /// stops at 512 instances and further growth fails with `OutOfMemory`.
    Baked,
    /// Runtime-sized storage array, bounded by the storage binding limit.
    Runtime,
}

impl BindingStrategy {
    fn resolve<B: Backend>(self, backend: &B) -> InstanceBinding {
        match self {
            BindingStrategy::Baked => InstanceBinding::Baked,
            BindingStrategy::Runtime => InstanceBinding::Runtime,
            BindingStrategy::Auto if backend.supports_runtime_arrays() => InstanceBinding::Runtime,
            BindingStrategy::Auto => InstanceBinding::Baked,
        }
    }
}

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Debug label for the pool and its device objects.
    pub label: String,

    /// Smallest capacity the pool shrinks to. Rounded up to a power of two.
    pub min_capacity: u32,

    pub binding: BindingStrategy,

    /// Format of the targets the pool draws into.
    pub target_format: wgpu::TextureFormat,

    /// Initial blend state; premultiplied alpha by default.
    pub blend: wgpu::BlendState,

    /// Clear color of the pass; `None` loads the existing contents.
    pub clear: Option<wgpu::Color>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            label: "sprite pool".to_owned(),
            min_capacity: 8,
            binding: BindingStrategy::Auto,
            target_format: wgpu::TextureFormat::Bgra8UnormSrgb,
            blend: premul_alpha_blend(),
            clear: None,
        }
    }
}

/// Counters for the expensive paths of a pool.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct PoolStats {
    /// Structural rebuilds (capacity changes), excluding construction.
    pub capacity_rebuilds: u64,
    /// Pipelines created, including the initial one.
    pub pipeline_builds: u64,
    /// Bind groups created, including the initial one.
    pub bind_group_builds: u64,
    /// Syncs that wrote instance data.
    pub uploads: u64,
}

/// CPU-side state of one instance. Index `i` here matches record `i`.
struct InstanceState {
    id: InstanceId,
    transform: Transform,
    /// Sheet animation the instance plays, if any.
    animation: Option<usize>,
    state: AnimationState,
}

/// Homogeneous instances sharing one spritesheet, drawn with a single
/// instanced call.
///
/// Per-instance data lives in a [`MirroredBuffer`] of [`InstanceRecord`]s
/// whose capacity is always a power of two. With [`InstanceBinding::Baked`]
/// the capacity is part of the shader, so every capacity change recreates the
/// shader module, pipeline and bind group together. With
/// [`InstanceBinding::Runtime`] only the bind group follows the buffer.
///
/// Per frame: mutate, then [`update`](Self::update), then [`draw`](Self::draw).
pub struct InstancePool<B: Backend> {
    label: String,
    backend: B,
    sheet: Shared<Spritesheet<B>>,

    binding: InstanceBinding,
    template: ShaderTemplate,
    target_format: wgpu::TextureFormat,
    blend: wgpu::BlendState,
    clear: Option<wgpu::Color>,

    min_capacity: u32,
    capacity: u32,

    transform: Transform,
    color: Color,
    view_projection: Mat4,
    uniform_dirty: bool,
    uniforms: B::Buffer,

    quad_vertices: B::Buffer,
    quad_indices: B::Buffer,

    records: MirroredBuffer<InstanceRecord, B>,
    instances: Vec<InstanceState>,
    slots: SlotMap<InstanceId, usize>,
    animated: SecondaryMap<InstanceId, ()>,
    transforms_dirty: bool,
    now: Instant,

    shader: B::ShaderModule,
    pipeline: B::Pipeline,
    bind_group: B::BindGroup,

    stats: PoolStats,
}

impl<B: Backend> InstancePool<B> {
    /// Creates an empty pool at the minimum capacity.
    pub fn new(backend: &B, sheet: Shared<Spritesheet<B>>, config: PoolConfig) -> Result<Self> {
        let PoolConfig {
            label,
            min_capacity,
            binding,
            target_format,
            blend,
            clear,
        } = config;

        if min_capacity == 0 {
            return Err(BatchError::InvalidCapacity("pool minimum capacity must be non-zero"));
        }
        let Some(capacity) = min_capacity.checked_next_power_of_two() else {
            return Err(BatchError::InvalidCapacity("pool minimum capacity is too large"));
        };
        let binding = binding.resolve(backend);
        let template = ShaderTemplate::sprite(binding);

        let color = Color::WHITE;
        let view_projection = Mat4::IDENTITY;
        let mut transform = Transform::default();
        let uniform = PoolUniform::new(view_projection * transform.model(), color.to_array());

        let uniforms = backend.create_buffer_init(
            &BufferDesc {
                label: &format!("{label} uniforms"),
                size: std::mem::size_of::<PoolUniform>() as u64,
                kind: BufferKind::Uniform,
            },
            bytemuck::bytes_of(&uniform),
        )?;
        let quad_vertices = backend.create_buffer_init(
            &BufferDesc {
                label: &format!("{label} quad vertices"),
                size: std::mem::size_of_val(&QUAD_VERTICES) as u64,
                kind: BufferKind::Vertex,
            },
            bytemuck::cast_slice(&QUAD_VERTICES),
        )?;
        let quad_indices = backend.create_buffer_init(
            &BufferDesc {
                label: &format!("{label} quad indices"),
                size: std::mem::size_of_val(&QUAD_INDICES) as u64,
                kind: BufferKind::Index,
            },
            bytemuck::cast_slice(&QUAD_INDICES),
        )?;

        let mut records: MirroredBuffer<InstanceRecord, B> =
            MirroredBuffer::new(format!("{label} instances"), binding.buffer_kind(), capacity)?;
        let buffer = records.allocate(backend, capacity)?;

        let (shader, pipeline) =
            build_pipeline(backend, &label, &template, binding, blend, target_format, capacity)?;
        let bind_group = backend.create_bind_group(&BindGroupDesc {
            label: &label,
            pipeline: &pipeline,
            uniforms: &uniforms,
            instances: &buffer,
            texture: sheet.texture(),
        })?;
        records.install(buffer, capacity);

        log::debug!("pool `{label}`: created ({binding:?}, capacity {capacity})");

        Ok(Self {
            label,
            backend: backend.clone(),
            sheet,
            binding,
            template,
            target_format,
            blend,
            clear,
            min_capacity: capacity,
            capacity,
            transform,
            color,
            view_projection,
            uniform_dirty: false,
            uniforms,
            quad_vertices,
            quad_indices,
            records,
            instances: Vec::with_capacity(capacity as usize),
            slots: SlotMap::with_key(),
            animated: SecondaryMap::new(),
            transforms_dirty: false,
            now: Instant::now(),
            shader,
            pipeline,
            bind_group,
            stats: PoolStats {
                pipeline_builds: 1,
                bind_group_builds: 1,
                ..PoolStats::default()
            },
        })
    }

    // ── accessors ─────────────────────────────────────────────────────────

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of live instances.
    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Current instance capacity (a power of two).
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn binding(&self) -> InstanceBinding {
        self.binding
    }

    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    #[inline]
    pub fn sheet(&self) -> &Shared<Spritesheet<B>> {
        &self.sheet
    }

    #[inline]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.slots.contains_key(id)
    }

    /// Ids in draw order.
    pub fn ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.iter().map(|inst| inst.id)
    }

    /// Draw-order position of `id`.
    ///
    /// # Panics
    /// If `id` was removed or belongs to another pool.
    #[track_caller]
    pub fn index_of(&self, id: InstanceId) -> usize {
        match self.slots.get(id) {
            Some(&index) => index,
            None => panic!("pool `{}`: stale instance id {id:?}", self.label),
        }
    }

    /// CPU copy of the instance records, in draw order.
    #[inline]
    pub fn records(&self) -> &[InstanceRecord] {
        self.records.as_slice()
    }

    #[inline]
    pub fn instance_buffer(&self) -> Option<&B::Buffer> {
        self.records.buffer()
    }

    #[inline]
    pub fn uniform_buffer(&self) -> &B::Buffer {
        &self.uniforms
    }

    #[inline]
    pub fn shader_module(&self) -> &B::ShaderModule {
        &self.shader
    }

    #[inline]
    pub fn pipeline(&self) -> &B::Pipeline {
        &self.pipeline
    }

    #[inline]
    pub fn bind_group(&self) -> &B::BindGroup {
        &self.bind_group
    }

    // ── instances ─────────────────────────────────────────────────────────

    /// Adds an instance at the origin, sized to one sheet frame, showing
    /// frame 0 of animation 0 (not playing), untinted.
    ///
    /// Fails with `OutOfMemory` when the required growth cannot be satisfied;
    /// the pool is unchanged in that case.
    pub fn add_instance(&mut self) -> Result<InstanceId> {
        let required = self.instances.len() as u32 + 1;
        let new_capacity = required.next_power_of_two().max(self.min_capacity);
        if new_capacity > self.capacity {
            self.rebuild(new_capacity)?;
        }

        let (fw, fh) = self.sheet.frame_size();
        let mut transform = Transform::new(Vec2::ZERO, Vec2::new(fw as f32, fh as f32), 0.0);
        let state = AnimationState::new(*self.sheet.animation(0), self.now);

        let mut record = InstanceRecord {
            model: transform.model().to_cols_array_2d(),
            color: Color::WHITE.to_array(),
            ..InstanceRecord::IDENTITY
        };
        record.set_uvs(self.sheet.frame_uvs(state.descriptor(), 0));

        let index = self.instances.len();
        let id = self.slots.insert(index);
        self.instances.push(InstanceState {
            id,
            transform,
            animation: None,
            state,
        });
        self.records.append(record);

        Ok(id)
    }

    /// Removes `id`, moving the last instance into its slot.
    ///
    /// May shrink the pool; a failed shrink keeps the larger capacity.
    ///
    /// # Panics
    /// If `id` is stale.
    #[track_caller]
    pub fn remove_instance(&mut self, id: InstanceId) {
        let index = self.index_of(id);
        self.slots.remove(id);
        self.animated.remove(id);

        self.instances.swap_remove(index);
        self.records.swap_remove(index);
        if let Some(moved) = self.instances.get(index) {
            self.slots[moved.id] = index;
        }

        let count = self.instances.len() as u32;
        let candidate = count.next_power_of_two().max(self.min_capacity);
        if candidate < self.capacity && candidate != count {
            if let Err(err) = self.rebuild(candidate) {
                log::warn!(
                    "pool `{}`: shrinking to {candidate} failed, keeping {}: {err}",
                    self.label,
                    self.capacity
                );
            }
        }
    }

    /// Removes every instance and shrinks back to the minimum capacity; a
    /// failed shrink keeps the larger capacity.
    pub fn clear(&mut self) {
        self.instances.clear();
        self.slots.clear();
        self.animated.clear();
        self.records.clear();

        if self.capacity > self.min_capacity {
            if let Err(err) = self.rebuild(self.min_capacity) {
                log::warn!(
                    "pool `{}`: shrinking to {} failed, keeping {}: {err}",
                    self.label,
                    self.min_capacity,
                    self.capacity
                );
            }
        }
    }

    #[track_caller]
    pub fn position(&self, id: InstanceId) -> Vec2 {
        self.instance(id).transform.position()
    }

    #[track_caller]
    pub fn set_position(&mut self, id: InstanceId, position: Vec2) {
        self.instance_mut(id).transform.set_position(position);
        self.transforms_dirty = true;
    }

    #[track_caller]
    pub fn scale(&self, id: InstanceId) -> Vec2 {
        self.instance(id).transform.scale()
    }

    #[track_caller]
    pub fn set_scale(&mut self, id: InstanceId, scale: Vec2) {
        self.instance_mut(id).transform.set_scale(scale);
        self.transforms_dirty = true;
    }

    /// Rotation in radians, counter-clockwise.
    #[track_caller]
    pub fn angle(&self, id: InstanceId) -> f32 {
        self.instance(id).transform.angle()
    }

    #[track_caller]
    pub fn set_angle(&mut self, id: InstanceId, angle: f32) {
        self.instance_mut(id).transform.set_angle(angle);
        self.transforms_dirty = true;
    }

    #[track_caller]
    pub fn color(&self, id: InstanceId) -> Color {
        let index = self.index_of(id);
        Color::from_array(self.records.as_slice()[index].color)
    }

    /// Tints one instance (premultiplied).
    #[track_caller]
    pub fn set_color(&mut self, id: InstanceId, color: Color) {
        let index = self.index_of(id);
        self.records.get_mut(index).color = color.to_array();
    }

    /// Sheet animation `id` is playing, if any.
    #[track_caller]
    pub fn animation(&self, id: InstanceId) -> Option<usize> {
        self.instance(id).animation
    }

    /// Starts sheet animation `animation` on `id` at frame 0, timed from `now`.
    ///
    /// # Panics
    /// If `id` is stale or `animation` is not a sheet animation.
    #[track_caller]
    pub fn set_animation(&mut self, id: InstanceId, animation: usize, now: Instant) {
        let index = self.index_of(id);
        let descriptor = *self.sheet.animation(animation);
        let state = AnimationState::new(descriptor, now);

        if descriptor.frame_count > 1 {
            self.animated.insert(id, ());
        } else {
            self.animated.remove(id);
        }

        let inst = &mut self.instances[index];
        inst.animation = Some(animation);
        inst.state = state;
        self.write_uvs(index);
    }

    /// Stops playback, freezing the current frame.
    #[track_caller]
    pub fn stop_animation(&mut self, id: InstanceId) {
        self.index_of(id);
        self.animated.remove(id);
    }

    /// Whether `id` advances on [`update`](Self::update).
    #[track_caller]
    pub fn is_animating(&self, id: InstanceId) -> bool {
        self.index_of(id);
        self.animated.contains_key(id)
    }

    /// Frame of `id`, relative to its animation.
    #[track_caller]
    pub fn frame(&self, id: InstanceId) -> u32 {
        self.instance(id).state.frame()
    }

    /// Jumps to `frame` of the current animation.
    ///
    /// # Panics
    /// If `id` is stale or `frame` is past the end of the animation.
    #[track_caller]
    pub fn set_frame(&mut self, id: InstanceId, frame: u32) {
        let index = self.index_of(id);
        self.instances[index].state.set_frame(frame);
        self.write_uvs(index);
    }

    /// Shows absolute sheet frame `frame` and stops any animation.
    ///
    /// # Panics
    /// If `id` is stale or the sheet has no such frame.
    #[track_caller]
    pub fn set_sheet_frame(&mut self, id: InstanceId, frame: u32) {
        let index = self.index_of(id);
        self.animated.remove(id);

        let inst = &mut self.instances[index];
        inst.animation = None;
        inst.state = AnimationState::new(AnimationDescriptor::still(frame), self.now);
        self.write_uvs(index);
    }

    // ── pool-wide state ───────────────────────────────────────────────────

    #[inline]
    pub fn pool_color(&self) -> Color {
        self.color
    }

    /// Tint multiplied into every instance.
    pub fn set_pool_color(&mut self, color: Color) {
        if self.color != color {
            self.color = color;
            self.uniform_dirty = true;
        }
    }

    /// Placement of the whole pool, applied after each instance's own model.
    #[inline]
    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    #[inline]
    pub fn view_projection(&self) -> Mat4 {
        self.view_projection
    }

    pub fn set_view_projection(&mut self, view_projection: Mat4) {
        if self.view_projection != view_projection {
            self.view_projection = view_projection;
            self.uniform_dirty = true;
        }
    }

    #[inline]
    pub fn blend_state(&self) -> wgpu::BlendState {
        self.blend
    }

    /// Recreates the pipeline (and its bind group) with `blend`.
    ///
    /// On failure the previous pipeline stays in use.
    pub fn set_blend_state(&mut self, blend: wgpu::BlendState) -> Result<()> {
        if self.blend == blend {
            return Ok(());
        }

        let (shader, pipeline) = build_pipeline(
            &self.backend,
            &self.label,
            &self.template,
            self.binding,
            blend,
            self.target_format,
            self.capacity,
        )?;
        let buffer = self.records.ensure_buffer(&self.backend)?;
        let bind_group = self.backend.create_bind_group(&BindGroupDesc {
            label: &self.label,
            pipeline: &pipeline,
            uniforms: &self.uniforms,
            instances: buffer,
            texture: self.sheet.texture(),
        })?;

        self.shader = shader;
        self.pipeline = pipeline;
        self.bind_group = bind_group;
        self.blend = blend;
        self.stats.pipeline_builds += 1;
        self.stats.bind_group_builds += 1;

        log::debug!("pool `{}`: blend state changed", self.label);
        Ok(())
    }

    #[inline]
    pub fn clear_color(&self) -> Option<wgpu::Color> {
        self.clear
    }

    pub fn set_clear_color(&mut self, clear: Option<wgpu::Color>) {
        self.clear = clear;
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Advances animations to `now` and pushes every pending change to the
    /// device.
    pub fn update(&mut self, now: Instant) -> Result<()> {
        self.now = now;

        for id in self.animated.keys() {
            let index = self.slots[id];
            let inst = &mut self.instances[index];
            if inst.state.advance(now) {
                let uvs = self.sheet.frame_uvs(inst.state.descriptor(), inst.state.frame());
                self.records.get_mut(index).set_uvs(uvs);
            }
        }

        self.flush()
    }

    /// Encodes one render pass with one instanced draw into `target`.
    ///
    /// Pending changes are flushed first. An empty pool still yields a command
    /// buffer holding an empty pass.
    pub fn draw(&mut self, target: &B::Target) -> Result<B::CommandBuffer> {
        self.flush()?;

        Ok(self.backend.encode_pass(&PassDesc {
            label: &self.label,
            target,
            clear: self.clear,
            pipeline: &self.pipeline,
            bind_group: &self.bind_group,
            vertices: &self.quad_vertices,
            indices: &self.quad_indices,
            index_count: QUAD_INDEX_COUNT,
            instance_count: self.instances.len() as u32,
        }))
    }

    // ── internals ─────────────────────────────────────────────────────────

    #[track_caller]
    fn instance(&self, id: InstanceId) -> &InstanceState {
        let index = self.index_of(id);
        &self.instances[index]
    }

    #[track_caller]
    fn instance_mut(&mut self, id: InstanceId) -> &mut InstanceState {
        let index = self.index_of(id);
        &mut self.instances[index]
    }

    fn write_uvs(&mut self, index: usize) {
        let state = &self.instances[index].state;
        let uvs = self.sheet.frame_uvs(state.descriptor(), state.frame());
        self.records.get_mut(index).set_uvs(uvs);
    }

    fn flush(&mut self) -> Result<()> {
        if self.transform.is_changed() {
            self.transform.model_if_updated();
            self.uniform_dirty = true;
        }
        if self.uniform_dirty {
            let uniform = PoolUniform::new(
                self.view_projection * self.transform.model(),
                self.color.to_array(),
            );
            self.backend
                .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniform));
            self.uniform_dirty = false;
        }

        if self.transforms_dirty {
            for (index, inst) in self.instances.iter_mut().enumerate() {
                if let Some(model) = inst.transform.model_if_updated() {
                    self.records.get_mut(index).model = model.to_cols_array_2d();
                }
            }
            self.transforms_dirty = false;
        }

        match self.records.sync(&self.backend)? {
            SyncOutcome::Clean => {}
            SyncOutcome::Uploaded => self.stats.uploads += 1,
            SyncOutcome::Reallocated => {
                self.stats.uploads += 1;
                self.adopt_buffer()?;
            }
        }
        Ok(())
    }

    /// Follows a buffer the mirror reallocated on its own: rebinds, and with
    /// a baked shader also respecializes the pipeline for the new capacity.
    fn adopt_buffer(&mut self) -> Result<()> {
        let capacity = self.records.capacity();
        let rebuilt = if self.template.depends_on_capacity() && capacity != self.capacity {
            Some(build_pipeline(
                &self.backend,
                &self.label,
                &self.template,
                self.binding,
                self.blend,
                self.target_format,
                capacity,
            )?)
        } else {
            None
        };

        let pipeline = rebuilt.as_ref().map_or(&self.pipeline, |(_, p)| p);
        let buffer = self.records.ensure_buffer(&self.backend)?;
        let bind_group = self.backend.create_bind_group(&BindGroupDesc {
            label: &self.label,
            pipeline,
            uniforms: &self.uniforms,
            instances: buffer,
            texture: self.sheet.texture(),
        })?;

        if let Some((shader, pipeline)) = rebuilt {
            self.shader = shader;
            self.pipeline = pipeline;
            self.stats.pipeline_builds += 1;
        }
        self.bind_group = bind_group;
        self.stats.bind_group_builds += 1;

        log::debug!(
            "pool `{}`: adopted reallocated buffer ({} -> {capacity})",
            self.label,
            self.capacity
        );
        self.capacity = capacity;
        Ok(())
    }

    /// Moves the pool to `capacity`, all or nothing.
    ///
    /// Every replacement object is created before anything is installed, so
    /// an error leaves buffer, shader, pipeline and bind group untouched.
    fn rebuild(&mut self, capacity: u32) -> Result<()> {
        let buffer = self.records.allocate(&self.backend, capacity)?;

        let rebuilt = if self.template.depends_on_capacity() {
            Some(build_pipeline(
                &self.backend,
                &self.label,
                &self.template,
                self.binding,
                self.blend,
                self.target_format,
                capacity,
            )?)
        } else {
            None
        };

        let pipeline = rebuilt.as_ref().map_or(&self.pipeline, |(_, p)| p);
        let bind_group = self.backend.create_bind_group(&BindGroupDesc {
            label: &self.label,
            pipeline,
            uniforms: &self.uniforms,
            instances: &buffer,
            texture: self.sheet.texture(),
        })?;

        // Commit.
        if let Some((shader, pipeline)) = rebuilt {
            self.shader = shader;
            self.pipeline = pipeline;
            self.stats.pipeline_builds += 1;
        }
        self.bind_group = bind_group;
        self.records.install(buffer, capacity);
        self.stats.bind_group_builds += 1;
        self.stats.capacity_rebuilds += 1;

        log::debug!(
            "pool `{}`: capacity {} -> {capacity} ({} instances)",
            self.label,
            self.capacity,
            self.instances.len()
        );
        self.capacity = capacity;
        Ok(())
    }
}

impl<B: Backend> Drop for InstancePool<B> {
    fn drop(&mut self) {
        log::debug!(
            "pool `{}`: released ({} instances, capacity {})",
            self.label,
            self.instances.len(),
            self.capacity
        );
    }
}

fn build_pipeline<B: Backend>(
    backend: &B,
    label: &str,
    template: &ShaderTemplate,
    binding: InstanceBinding,
    blend: wgpu::BlendState,
    target_format: wgpu::TextureFormat,
    capacity: u32,
) -> Result<(B::ShaderModule, B::Pipeline)> {
    let source = template.specialize(capacity)?;
    let shader = backend.create_shader_module(label, &source)?;
    let pipeline = backend.create_pipeline(&PipelineDesc {
        label,
        shader: &shader,
        binding,
        blend,
        target_format,
    })?;
    log::trace!("pool `{label}`: pipeline built for capacity {capacity}");
    Ok((shader, pipeline))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::{HeadlessBackend, HeadlessStats, ResourceKind};
    use crate::sprite::AnimationTable;
    use crate::time::{Clock, ManualClock};

    type Pool = InstancePool<HeadlessBackend>;

    /// 4x2 frames of 8x8. Animation 0 loops frames 0..4 at 10 fps,
    /// animation 1 is the still frame 5.
    fn sheet(backend: &HeadlessBackend) -> Shared<Spritesheet<HeadlessBackend>> {
        let table = AnimationTable::parse("8 8  0 4 10 0 0  5 1 0 0 0").unwrap();
        let pixels = vec![255u8; 32 * 16 * 4];
        Shared::new(
            Spritesheet::new(
                backend,
                "sheet",
                &pixels,
                32,
                16,
                wgpu::TextureFormat::Rgba8Unorm,
                table,
            )
            .unwrap(),
        )
    }

    fn pool(backend: &HeadlessBackend, binding: BindingStrategy) -> Pool {
        InstancePool::new(
            backend,
            sheet(backend),
            PoolConfig {
                label: "test pool".into(),
                binding,
                ..PoolConfig::default()
            },
        )
        .unwrap()
    }

    fn add(pool: &mut Pool, n: usize) -> Vec<InstanceId> {
        (0..n).map(|_| pool.add_instance().unwrap()).collect()
    }

    fn delta(before: HeadlessStats, after: HeadlessStats) -> (u64, u64, u64) {
        (
            after.shader_modules_created - before.shader_modules_created,
            after.pipelines_created - before.pipelines_created,
            after.bind_groups_created - before.bind_groups_created,
        )
    }

    fn gpu_records(pool: &Pool) -> Vec<InstanceRecord> {
        pool.instance_buffer()
            .unwrap()
            .read::<InstanceRecord>(pool.len())
    }

    #[test]
    fn auto_binding_follows_backend() {
        let backend = HeadlessBackend::new();
        assert_eq!(
            pool(&backend, BindingStrategy::Auto).binding(),
            InstanceBinding::Runtime
        );

        let backend = HeadlessBackend::without_runtime_arrays();
        assert_eq!(
            pool(&backend, BindingStrategy::Auto).binding(),
            InstanceBinding::Baked
        );
    }

    #[test]
    fn zero_minimum_capacity_is_rejected() {
        let backend = HeadlessBackend::new();
        let result = InstancePool::new(
            &backend,
            sheet(&backend),
            PoolConfig {
                min_capacity: 0,
                ..PoolConfig::default()
            },
        );
        assert!(matches!(result.err(), Some(BatchError::InvalidCapacity(_))));
    }

    #[test]
    fn ninth_instance_rebuilds_once_to_sixteen() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Baked);
        assert_eq!(pool.capacity(), 8);

        add(&mut pool, 8);
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.stats().capacity_rebuilds, 0);

        let before = backend.stats();
        pool.add_instance().unwrap();
        let after = backend.stats();

        assert_eq!(pool.capacity(), 16);
        assert_eq!(pool.stats().capacity_rebuilds, 1);
        assert_eq!(delta(before, after), (1, 1, 1));
        assert!(pool.shader_module().source.contains("array<InstanceRecord, 16u>"));
        assert_eq!(pool.instance_buffer().unwrap().size(), 16 * 112);
    }

    #[test]
    fn runtime_binding_keeps_pipeline_across_growth() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Runtime);
        add(&mut pool, 8);
        let pipeline = pool.pipeline().id;

        let before = backend.stats();
        pool.add_instance().unwrap();
        let after = backend.stats();

        assert_eq!(pool.capacity(), 16);
        assert_eq!(delta(before, after), (0, 0, 1));
        assert_eq!(pool.pipeline().id, pipeline);
        assert_eq!(
            pool.bind_group().instance_buffer_id,
            pool.instance_buffer().unwrap().id()
        );
    }

    #[test]
    fn capacity_tracks_count_with_hysteresis() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Baked);
        let ids = add(&mut pool, 17);
        assert_eq!(pool.capacity(), 32);

        // 16 live: exactly at a power of two, no shrink.
        pool.remove_instance(ids[16]);
        assert_eq!(pool.len(), 16);
        assert_eq!(pool.capacity(), 32);

        pool.remove_instance(ids[15]);
        assert_eq!(pool.capacity(), 16);

        for id in &ids[3..15] {
            pool.remove_instance(*id);
        }
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.capacity(), 8);

        for id in &ids[..3] {
            pool.remove_instance(*id);
        }
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn oversized_minimum_capacity_is_rejected() {
        let backend = HeadlessBackend::new();
        let result = InstancePool::new(
            &backend,
            sheet(&backend),
            PoolConfig {
                min_capacity: (1 << 31) + 1,
                ..PoolConfig::default()
            },
        );
        assert!(matches!(result.err(), Some(BatchError::InvalidCapacity(_))));
    }

    #[test]
    fn clear_shrinks_back_to_minimum() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Baked);
        let ids = add(&mut pool, 100);
        assert_eq!(pool.capacity(), 128);

        pool.clear();
        assert!(pool.is_empty());
        assert!(!pool.contains(ids[0]));
        assert_eq!(pool.capacity(), 8);
        assert!(pool.shader_module().source.contains("array<InstanceRecord, 8u>"));

        let id = pool.add_instance().unwrap();
        pool.set_position(id, Vec2::new(4.0, 4.0));
        pool.update(Instant::now()).unwrap();
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.instance_buffer().unwrap().size(), 8 * 112);
        assert_eq!(gpu_records(&pool), pool.records().to_vec());
    }

    #[test]
    fn failed_shrink_on_clear_keeps_capacity() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Baked);
        add(&mut pool, 9);

        backend.fail_next(ResourceKind::Buffer);
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 16);

        pool.add_instance().unwrap();
        pool.update(Instant::now()).unwrap();
        assert_eq!(gpu_records(&pool), pool.records().to_vec());
    }

    #[test]
    fn capacity_invariant_holds_for_mixed_add_remove_clear() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Baked);

        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (seed >> 33) as u32
        };

        let mut live: Vec<InstanceId> = Vec::new();
        for step in 0..2000u32 {
            match next() % 100 {
                0 => {
                    pool.clear();
                    live.clear();
                }
                1..=54 => {
                    let id = pool.add_instance().unwrap();
                    pool.set_position(id, Vec2::new(step as f32, 0.0));
                    live.push(id);
                }
                _ if !live.is_empty() => {
                    let i = next() as usize % live.len();
                    pool.remove_instance(live.swap_remove(i));
                }
                _ => {}
            }

            let len = pool.len() as u32;
            let cap = pool.capacity();
            assert_eq!(pool.len(), live.len(), "step {step}");
            assert!(cap.is_power_of_two(), "step {step}: capacity {cap}");
            assert!(cap >= len.max(8), "step {step}: capacity {cap} for {len}");
            assert!(
                cap <= 2 * len.next_power_of_two().max(8),
                "step {step}: capacity {cap} for {len}"
            );
            assert!(live.iter().all(|id| pool.contains(*id)));

            if step % 16 == 0 {
                pool.update(Instant::now()).unwrap();
                assert_eq!(gpu_records(&pool), pool.records().to_vec(), "step {step}");
            }
        }
    }

    #[test]
    fn reallocated_mirror_respecializes_baked_pipeline() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Baked);

        // Grow the mirror behind the pool's back.
        pool.records.append_bulk(&[InstanceRecord::IDENTITY; 9]);
        pool.update(Instant::now()).unwrap();

        assert_eq!(pool.capacity(), 16);
        assert!(pool.shader_module().source.contains("array<InstanceRecord, 16u>"));
        assert_eq!(pool.bind_group().pipeline_id, pool.pipeline().id);
        assert_eq!(
            pool.bind_group().instance_buffer_id,
            pool.instance_buffer().unwrap().id()
        );
    }

    #[test]
    fn baked_pool_is_bounded_by_uniform_binding_size() {
        let backend = HeadlessBackend::new();
        backend.set_uniform_binding_limit(Some(64 * 1024));

        let mut baked = pool(&backend, BindingStrategy::Baked);
        add(&mut baked, 512);
        assert_eq!(baked.capacity(), 512);
        let err = baked.add_instance().unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(baked.len(), 512);
        assert_eq!(baked.capacity(), 512);

        let mut runtime = pool(&backend, BindingStrategy::Runtime);
        add(&mut runtime, 513);
        assert_eq!(runtime.capacity(), 1024);
    }

    #[test]
    fn failed_shrink_keeps_capacity() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Baked);
        let ids = add(&mut pool, 9);
        pool.remove_instance(ids[8]);
        assert_eq!(pool.capacity(), 16);

        backend.fail_next(ResourceKind::Buffer);
        pool.remove_instance(ids[7]);
        assert_eq!(pool.len(), 7);
        assert_eq!(pool.capacity(), 16);

        pool.remove_instance(ids[6]);
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn color_round_trips_to_the_device() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let ids = add(&mut pool, 3);

        let c = Color::from_premul(0.125, 0.25, 0.375, 0.5);
        pool.set_color(ids[1], c);
        assert_eq!(pool.color(ids[1]), c);
        assert_eq!(pool.color(ids[0]), Color::WHITE);

        pool.update(Instant::now()).unwrap();
        assert_eq!(gpu_records(&pool)[1].color, c.to_array());
    }

    #[test]
    fn removal_moves_last_instance_into_the_hole() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let ids = add(&mut pool, 4);
        for (i, id) in ids.iter().enumerate() {
            pool.set_position(*id, Vec2::new(i as f32, 0.0));
        }
        pool.update(Instant::now()).unwrap();
        let last = pool.records()[3];

        pool.remove_instance(ids[1]);
        assert_eq!(pool.len(), 3);
        assert!(!pool.contains(ids[1]));
        assert_eq!(pool.index_of(ids[3]), 1);
        assert_eq!(pool.records()[1], last);
        assert_eq!(pool.position(ids[3]), Vec2::new(3.0, 0.0));

        pool.update(Instant::now()).unwrap();
        assert_eq!(gpu_records(&pool), pool.records().to_vec());
    }

    #[test]
    #[should_panic(expected = "stale instance id")]
    fn stale_id_panics() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let id = pool.add_instance().unwrap();
        pool.remove_instance(id);
        pool.color(id);
    }

    #[test]
    fn transforms_reach_the_records_on_update() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let id = pool.add_instance().unwrap();

        // Sized to one frame by default.
        assert_eq!(pool.scale(id), Vec2::new(8.0, 8.0));

        pool.set_position(id, Vec2::new(40.0, 20.0));
        pool.set_angle(id, 0.0);
        pool.update(Instant::now()).unwrap();

        let model = Mat4::from_cols_array_2d(&gpu_records(&pool)[0].model);
        assert_eq!(model.w_axis, glam::Vec4::new(40.0, 20.0, 0.0, 1.0));
        assert_eq!(model.x_axis.x, 8.0);
    }

    #[test]
    fn animation_advances_once_per_period() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let clock = ManualClock::new();
        let id = pool.add_instance().unwrap();
        pool.set_animation(id, 0, clock.now());
        assert!(pool.is_animating(id));

        let t = clock.advance(Duration::from_millis(100));
        pool.update(t).unwrap();
        assert_eq!(pool.frame(id), 1);

        // Same tick again: nothing advances.
        let uploads = pool.stats().uploads;
        pool.update(t).unwrap();
        assert_eq!(pool.frame(id), 1);
        assert_eq!(pool.stats().uploads, uploads);

        let sheet = pool.sheet().reference();
        let expected = sheet.frame_uvs(sheet.animation(0), 1);
        assert_eq!(gpu_records(&pool)[0].uvs(), expected);
    }

    #[test]
    fn animated_set_survives_swap_remove() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let clock = ManualClock::new();
        let ids = add(&mut pool, 3);
        pool.set_animation(ids[2], 0, clock.now());

        // ids[2] moves to index 0.
        pool.remove_instance(ids[0]);
        assert_eq!(pool.index_of(ids[2]), 0);

        pool.update(clock.advance(Duration::from_millis(100))).unwrap();
        assert_eq!(pool.frame(ids[2]), 1);
        assert_eq!(pool.frame(ids[1]), 0);
        assert!(!pool.is_animating(ids[1]));
    }

    #[test]
    fn still_animation_is_not_ticked() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let id = pool.add_instance().unwrap();
        pool.set_animation(id, 1, Instant::now());
        assert_eq!(pool.animation(id), Some(1));
        assert!(!pool.is_animating(id));

        let sheet = pool.sheet().reference();
        assert_eq!(
            pool.records()[0].uvs(),
            sheet.frame_uvs(&AnimationDescriptor::still(5), 0)
        );
    }

    #[test]
    fn explicit_frames_rewrite_uvs() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let id = pool.add_instance().unwrap();
        let sheet = pool.sheet().reference();

        pool.set_animation(id, 0, Instant::now());
        pool.set_frame(id, 3);
        assert_eq!(pool.frame(id), 3);
        assert_eq!(pool.records()[0].uvs(), sheet.frame_uvs(sheet.animation(0), 3));

        pool.set_sheet_frame(id, 6);
        assert_eq!(pool.animation(id), None);
        assert!(!pool.is_animating(id));
        assert_eq!(
            pool.records()[0].uvs(),
            sheet.frame_uvs(&AnimationDescriptor::still(6), 0)
        );
    }

    #[test]
    fn empty_pool_still_encodes_a_pass() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let commands = pool.draw(&()).unwrap();
        assert_eq!(commands.passes.len(), 1);
        assert!(commands.passes[0].draws.is_empty());
    }

    #[test]
    fn draw_is_one_instanced_call() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        add(&mut pool, 5);
        pool.set_clear_color(Some(wgpu::Color::BLACK));

        let commands = pool.draw(&()).unwrap();
        assert_eq!(commands.passes.len(), 1);
        assert_eq!(commands.passes[0].clear, Some(wgpu::Color::BLACK));

        let draws: Vec<_> = commands.draws().collect();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].indices, 0..6);
        assert_eq!(draws[0].instances, 0..5);
        assert_eq!(draws[0].pipeline_id, pool.pipeline().id);

        // draw flushed the pending records.
        assert_eq!(gpu_records(&pool).len(), 5);
        assert_eq!(gpu_records(&pool), pool.records().to_vec());
    }

    #[test]
    fn failed_growth_leaves_pool_untouched() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Baked);
        add(&mut pool, 8);
        pool.update(Instant::now()).unwrap();

        let pipeline = pool.pipeline().id;
        let bind_group = pool.bind_group().id;
        let buffer = pool.instance_buffer().unwrap().id();
        let live = backend.stats().live_buffers;

        backend.fail_next(ResourceKind::Pipeline);
        let err = pool.add_instance().unwrap_err();
        assert!(err.is_out_of_memory());

        assert_eq!(pool.len(), 8);
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.pipeline().id, pipeline);
        assert_eq!(pool.bind_group().id, bind_group);
        assert_eq!(pool.instance_buffer().unwrap().id(), buffer);
        assert_eq!(backend.stats().live_buffers, live);

        // The pool is still usable and grows on the next attempt.
        pool.add_instance().unwrap();
        assert_eq!(pool.capacity(), 16);
        assert_eq!(backend.stats().live_buffers, live);
    }

    #[test]
    fn blend_change_rebuilds_pipeline() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);

        pool.set_blend_state(premul_alpha_blend()).unwrap();
        assert_eq!(pool.stats().pipeline_builds, 1);

        pool.set_blend_state(wgpu::BlendState::REPLACE).unwrap();
        assert_eq!(pool.stats().pipeline_builds, 2);
        assert_eq!(pool.pipeline().blend, wgpu::BlendState::REPLACE);
        assert_eq!(pool.bind_group().pipeline_id, pool.pipeline().id);
    }

    #[test]
    fn pool_uniform_combines_view_projection_and_tint() {
        let backend = HeadlessBackend::new();
        let mut pool = pool(&backend, BindingStrategy::Auto);
        let vp = Mat4::orthographic_rh(0.0, 320.0, 240.0, 0.0, -1.0, 1.0);
        let tint = Color::from_premul(0.5, 0.5, 0.5, 0.5);

        pool.set_view_projection(vp);
        pool.set_pool_color(tint);
        pool.transform_mut().set_position(Vec2::new(16.0, 0.0));
        pool.update(Instant::now()).unwrap();

        let uniform: PoolUniform = pool.uniform_buffer().read::<PoolUniform>(1)[0];
        let expected = vp * Mat4::from_translation(glam::Vec3::new(16.0, 0.0, 0.0));
        assert_eq!(uniform.color, tint.to_array());
        assert!(Mat4::from_cols_array_2d(&uniform.transform).abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn pools_share_one_sheet() {
        let backend = HeadlessBackend::new();
        let sheet = sheet(&backend);
        let a = Pool::new(&backend, sheet.reference(), PoolConfig::default()).unwrap();
        let b = Pool::new(&backend, sheet.reference(), PoolConfig::default()).unwrap();
        assert_eq!(sheet.ref_count(), 3);

        drop(a);
        assert!(!sheet.release());
        assert_eq!(b.sheet().ref_count(), 1);
    }
}
