//! Renders an animated sprite pool offscreen for a fixed number of frames and
//! logs what the pool did. Falls back to the recording backend when no GPU
//! adapter is available.

use std::collections::VecDeque;
use std::time::Instant;

use anyhow::{Context, Result};
use glam::{Mat4, Vec2};

use marduk_batch::device::{Backend, Gpu, GpuInit, HeadlessBackend};
use marduk_batch::logging::{init_logging, LoggingConfig};
use marduk_batch::paint::Color;
use marduk_batch::render::{InstanceId, InstancePool, PoolConfig, PoolStats};
use marduk_batch::resource::Shared;
use marduk_batch::sprite::{AnimationTable, Spritesheet};
use marduk_batch::time::{Clock, ManualClock};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const FRAMES: u32 = 240;
const SPRITES: usize = 400;

const FRAME_SIZE: u32 = 16;
const SHEET_COLUMNS: u32 = 4;
const SHEET_ROWS: u32 = 2;

/// walk: loop 0..4, bounce: ping-pong 4..8 mirrored, pop: once-reset 0..4.
const ANIMATIONS: &str = "
    16 16
    0 4 8  0 0
    4 4 12 1 1
    0 4 6  3 0
";

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    match Gpu::new_headless_blocking(GpuInit::default()) {
        Ok(gpu) => {
            let target = gpu.create_target(WIDTH, HEIGHT, wgpu::TextureFormat::Rgba8UnormSrgb)?;
            let stats = run(gpu.backend(), &target.view, target.format, |commands| {
                gpu.submit([commands]);
            })?;
            report(&stats);
        }
        Err(err) => {
            log::warn!("no GPU available ({err:#}); recording commands instead");
            let backend = HeadlessBackend::new();
            let mut passes = 0usize;
            let stats = run(&backend, &(), wgpu::TextureFormat::Rgba8UnormSrgb, |commands| {
                passes += commands.passes.len();
            })?;
            report(&stats);
            log::info!(
                "recorded {passes} passes, {} buffer writes ({} bytes)",
                backend.stats().buffer_writes,
                backend.stats().bytes_written
            );
        }
    }

    Ok(())
}

fn run<B: Backend>(
    backend: &B,
    target: &B::Target,
    format: wgpu::TextureFormat,
    mut submit: impl FnMut(B::CommandBuffer),
) -> Result<PoolStats> {
    let table = AnimationTable::parse(ANIMATIONS).context("parsing animation table")?;
    let pixels = checker_sheet();
    let sheet = Spritesheet::new(
        backend,
        "demo sheet",
        &pixels,
        FRAME_SIZE * SHEET_COLUMNS,
        FRAME_SIZE * SHEET_ROWS,
        wgpu::TextureFormat::Rgba8UnormSrgb,
        table,
    )
    .context("creating spritesheet")?;

    let mut pool = InstancePool::new(
        backend,
        Shared::new(sheet),
        PoolConfig {
            label: "demo sprites".to_owned(),
            target_format: format,
            clear: Some(wgpu::Color {
                r: 0.02,
                g: 0.02,
                b: 0.05,
                a: 1.0,
            }),
            ..PoolConfig::default()
        },
    )
    .context("creating pool")?;

    // Pixel coordinates, origin top-left, +Y down.
    pool.set_view_projection(Mat4::orthographic_rh(
        0.0,
        WIDTH as f32,
        HEIGHT as f32,
        0.0,
        -1.0,
        1.0,
    ));

    let clock = ManualClock::new();
    let mut sprites: VecDeque<InstanceId> = VecDeque::with_capacity(SPRITES);
    for i in 0..SPRITES {
        sprites.push_back(spawn(&mut pool, i, clock.now())?);
    }
    log::info!(
        "spawned {} sprites, pool capacity {} ({:?})",
        pool.len(),
        pool.capacity(),
        pool.binding()
    );

    for frame in 0..FRAMES {
        let now = clock.advance_secs(1.0 / 60.0);
        let t = frame as f32 / 60.0;

        for (i, id) in sprites.iter().enumerate() {
            let phase = i as f32 * 0.37;
            let home = home_position(i);
            pool.set_position(*id, home + Vec2::new((t + phase).sin(), (t * 1.3 + phase).cos()) * 6.0);
            pool.set_angle(*id, (t + phase).sin() * 0.2);
        }

        // Churn: retire the oldest few and spawn replacements.
        if frame % 30 == 29 {
            for id in sprites.drain(..25) {
                pool.remove_instance(id);
            }
            for i in 0..25 {
                sprites.push_back(spawn(&mut pool, frame as usize + i, now)?);
            }
        }

        // Pulse the whole pool.
        let pulse = 0.75 + 0.25 * (t * 2.0).sin();
        pool.set_pool_color(Color::from_straight(pulse, pulse, pulse, 1.0));

        pool.update(now).context("updating pool")?;
        submit(pool.draw(target).context("drawing pool")?);
    }

    Ok(pool.stats())
}

fn spawn<B: Backend>(pool: &mut InstancePool<B>, i: usize, now: Instant) -> Result<InstanceId> {
    let animation = i % pool.sheet().animation_count();
    let id = pool.add_instance().context("adding sprite")?;
    pool.set_position(id, home_position(i));
    pool.set_scale(id, Vec2::splat(if i % 7 == 0 { 32.0 } else { 16.0 }));
    pool.set_animation(id, animation, now);
    if i % 5 == 0 {
        pool.set_color(id, Color::from_straight(1.0, 0.6, 0.6, 0.8));
    }
    Ok(id)
}

fn home_position(i: usize) -> Vec2 {
    let per_row = (WIDTH / 20) as usize;
    let col = (i % per_row) as f32;
    let row = ((i / per_row) % (HEIGHT / 20) as usize) as f32;
    Vec2::new(10.0 + col * 20.0, 10.0 + row * 20.0)
}

/// Procedural 4x2 sheet: every frame a checker in its own premultiplied color.
fn checker_sheet() -> Vec<u8> {
    let width = FRAME_SIZE * SHEET_COLUMNS;
    let height = FRAME_SIZE * SHEET_ROWS;
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);

    for y in 0..height {
        for x in 0..width {
            let frame = (y / FRAME_SIZE) * SHEET_COLUMNS + x / FRAME_SIZE;
            let checker = ((x / 4) + (y / 4)) % 2 == 0;
            let base = 64 + (frame * 24) as u8;
            let a: u8 = if checker { 255 } else { 160 };
            let premul = |c: u8| ((c as u16 * a as u16) / 255) as u8;
            pixels.extend_from_slice(&[premul(base), premul(255 - base), premul(128), a]);
        }
    }
    pixels
}

fn report(stats: &PoolStats) {
    log::info!(
        "{FRAMES} frames: {} capacity rebuilds, {} pipeline builds, {} bind group builds, {} uploads",
        stats.capacity_rebuilds,
        stats.pipeline_builds,
        stats.bind_group_builds,
        stats.uploads
    );
}
