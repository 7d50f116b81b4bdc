use thiserror::Error;

/// Errors surfaced by pool, buffer and spritesheet construction.
///
/// Contract violations (out-of-range indices, stale instance ids) are not
/// represented here: they panic at the call site.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    /// A device allocation could not be satisfied.
    ///
    /// Raised before any live resource is released, so the owner keeps its
    /// previous (valid) state.
    #[error("out of device memory allocating `{label}`: {requested} bytes requested, limit is {limit}")]
    OutOfMemory {
        label: String,
        requested: u64,
        limit: u64,
    },

    /// Zero frame dimensions, zero animations or a zero capacity.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(&'static str),

    /// Pixel format without a known byte stride.
    #[error("unsupported texture format {0:?}")]
    UnsupportedFormat(wgpu::TextureFormat),

    /// Pixel data length does not match `width * height * stride`.
    #[error("pixel data is {actual} bytes, expected {expected}")]
    PixelDataSize { expected: usize, actual: usize },

    /// An animation references frames past the end of the sheet.
    #[error("animation {animation} ends at frame {last_frame}, sheet holds {frames} frames")]
    FrameOutOfSheet {
        animation: usize,
        last_frame: u32,
        frames: u32,
    },

    /// The shader template carries no capacity placeholder.
    #[error("shader template does not contain `{placeholder}`")]
    InvalidShaderTemplate { placeholder: &'static str },

    /// Malformed animation descriptor table.
    #[error("animation table, token {token}: {message}")]
    Descriptor { token: usize, message: String },
}

impl BatchError {
    #[inline]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, BatchError::OutOfMemory { .. })
    }

    pub(crate) fn descriptor(token: usize, message: impl Into<String>) -> Self {
        BatchError::Descriptor {
            token,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
