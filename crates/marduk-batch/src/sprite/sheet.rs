use crate::device::{Backend, TextureDesc};
use crate::error::{BatchError, Result};

use super::animation::AnimationDescriptor;
use super::table::AnimationTable;

/// Byte stride of one texel, for the formats a sheet can be uploaded from.
pub fn bytes_per_pixel(format: wgpu::TextureFormat) -> Result<u32> {
    use wgpu::TextureFormat as F;

    let bpp = match format {
        F::R8Unorm => 1,
        F::Rg8Unorm => 2,
        F::Rgba8Unorm | F::Rgba8UnormSrgb | F::Bgra8Unorm | F::Bgra8UnormSrgb => 4,
        F::Rgba16Float => 8,
        F::Rgba32Float => 16,
        other => return Err(BatchError::UnsupportedFormat(other)),
    };
    Ok(bpp)
}

/// Texture atlas cut into equally sized frames, plus its animations.
///
/// Frames are numbered row-major from the top-left corner. Usually shared
/// between pools through [`Shared`](crate::resource::Shared).
pub struct Spritesheet<B: Backend> {
    label: String,
    texture: B::Texture,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    frame_width: u32,
    frame_height: u32,
    columns: u32,
    frames: u32,
    animations: Vec<AnimationDescriptor>,
}

impl<B: Backend> Spritesheet<B> {
    /// Uploads `pixels` (tightly packed rows, premultiplied alpha) and
    /// validates `table` against the sheet dimensions.
    pub fn new(
        backend: &B,
        label: impl Into<String>,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        table: AnimationTable,
    ) -> Result<Self> {
        let label = label.into();
        let bpp = bytes_per_pixel(format)?;

        let expected = width as usize * height as usize * bpp as usize;
        if pixels.len() != expected {
            return Err(BatchError::PixelDataSize {
                expected,
                actual: pixels.len(),
            });
        }

        let (frame_width, frame_height) = table.frame_size();
        let columns = width / frame_width;
        let rows = height / frame_height;
        if columns == 0 || rows == 0 {
            return Err(BatchError::InvalidCapacity("frame is larger than the sheet"));
        }
        let frames = columns * rows;

        for (i, anim) in table.animations().iter().enumerate() {
            if anim.last_frame() >= frames {
                return Err(BatchError::FrameOutOfSheet {
                    animation: i,
                    last_frame: anim.last_frame(),
                    frames,
                });
            }
        }

        let texture = backend.create_texture(
            &TextureDesc {
                label: &label,
                width,
                height,
                format,
                bytes_per_pixel: bpp,
            },
            pixels,
        )?;

        log::debug!(
            "spritesheet `{label}`: {width}x{height}, {frames} frames of {frame_width}x{frame_height}, {} animations",
            table.animations().len()
        );

        Ok(Self {
            label,
            texture,
            width,
            height,
            format,
            frame_width,
            frame_height,
            columns,
            frames,
            animations: table.animations().to_vec(),
        })
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn texture(&self) -> &B::Texture {
        &self.texture
    }

    #[inline]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Sheet size in texels.
    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frame size in texels.
    #[inline]
    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    /// Number of whole frames the sheet holds.
    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.frames
    }

    #[inline]
    pub fn animation_count(&self) -> usize {
        self.animations.len()
    }

    /// # Panics
    /// If `index >= animation_count()`.
    #[track_caller]
    pub fn animation(&self, index: usize) -> &AnimationDescriptor {
        assert!(
            index < self.animations.len(),
            "animation {index} out of range for sheet `{}` with {} animations",
            self.label,
            self.animations.len()
        );
        &self.animations[index]
    }

    /// Corner UVs of `frame` (relative to `descriptor`) as
    /// `[tl.u, tl.v, tr.u, tr.v, bl.u, bl.v, br.u, br.v]`, flips applied.
    ///
    /// # Panics
    /// If the frame lies outside the sheet.
    #[track_caller]
    pub fn frame_uvs(&self, descriptor: &AnimationDescriptor, frame: u32) -> [f32; 8] {
        let index = descriptor.first_frame + frame;
        assert!(
            index < self.frames,
            "frame {index} out of range for sheet `{}` with {} frames",
            self.label,
            self.frames
        );

        let col = index % self.columns;
        let row = index / self.columns;

        let du = self.frame_width as f32 / self.width as f32;
        let dv = self.frame_height as f32 / self.height as f32;

        let (mut u0, mut v0) = (col as f32 * du, row as f32 * dv);
        let (mut u1, mut v1) = (u0 + du, v0 + dv);

        if descriptor.flip.horizontal {
            std::mem::swap(&mut u0, &mut u1);
        }
        if descriptor.flip.vertical {
            std::mem::swap(&mut v0, &mut v1);
        }

        [u0, v0, u1, v0, u0, v1, u1, v1]
    }
}

impl<B: Backend> Drop for Spritesheet<B> {
    fn drop(&mut self) {
        log::debug!("spritesheet `{}` released", self.label);
    }
}
