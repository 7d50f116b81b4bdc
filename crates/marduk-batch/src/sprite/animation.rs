use std::time::{Duration, Instant};

/// Playback behaviour once the last frame is reached.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum AnimationKind {
    /// Wrap to the first frame.
    #[default]
    Loop,
    /// Ping-pong between first and last frame.
    Reverse,
    /// Stop on the last frame.
    Once,
    /// Play once, then rest on the first frame for good.
    OnceReset,
}

impl AnimationKind {
    /// Decodes the ordinal used by animation tables.
    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        match ordinal {
            0 => Some(AnimationKind::Loop),
            1 => Some(AnimationKind::Reverse),
            2 => Some(AnimationKind::Once),
            3 => Some(AnimationKind::OnceReset),
            _ => None,
        }
    }
}

/// Mirroring applied when computing frame UVs.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Flip {
    pub horizontal: bool,
    pub vertical: bool,
}

impl Flip {
    pub const NONE: Flip = Flip {
        horizontal: false,
        vertical: false,
    };

    /// bit0 = horizontal, bit1 = vertical; higher bits are ignored.
    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self {
            horizontal: bits & 0b01 != 0,
            vertical: bits & 0b10 != 0,
        }
    }
}

/// Immutable description of one animation inside a spritesheet.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnimationDescriptor {
    /// Sheet frame index the animation starts at.
    pub first_frame: u32,
    /// Number of frames, at least 1.
    pub frame_count: u32,
    /// Frames per second; values near zero play at 1 fps.
    pub frame_rate: f32,
    pub kind: AnimationKind,
    pub flip: Flip,
}

impl AnimationDescriptor {
    /// Single still frame.
    pub fn still(frame: u32) -> Self {
        Self {
            first_frame: frame,
            frame_count: 1,
            frame_rate: 1.0,
            kind: AnimationKind::Loop,
            flip: Flip::NONE,
        }
    }

    /// Time each frame stays on screen.
    pub fn frame_duration(&self) -> Duration {
        let rate = if self.frame_rate.abs() <= f32::EPSILON || !self.frame_rate.is_finite() {
            1.0
        } else {
            self.frame_rate.abs()
        };
        Duration::from_secs_f64(1.0 / f64::from(rate))
    }

    /// Sheet index of the last frame.
    #[inline]
    pub fn last_frame(&self) -> u32 {
        self.first_frame + self.frame_count.saturating_sub(1)
    }
}

/// Per-instance playback state over an [`AnimationDescriptor`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnimationState {
    descriptor: AnimationDescriptor,
    frame: u32,
    last_advance: Instant,
    /// Reverse: playing backwards. OnceReset: playback finished.
    flag: bool,
}

impl AnimationState {
    /// Starts at frame 0 with `now` as the timing baseline.
    pub fn new(descriptor: AnimationDescriptor, now: Instant) -> Self {
        Self {
            descriptor,
            frame: 0,
            last_advance: now,
            flag: false,
        }
    }

    #[inline]
    pub fn descriptor(&self) -> &AnimationDescriptor {
        &self.descriptor
    }

    /// Current frame, relative to the animation's first frame.
    #[inline]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Whether a `OnceReset` animation has played through.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.descriptor.kind == AnimationKind::OnceReset && self.flag
    }

    /// Steps the animation if a full frame period elapsed since the last step.
    ///
    /// Returns whether the visible frame changed.
    pub fn advance(&mut self, now: Instant) -> bool {
        let count = self.descriptor.frame_count;
        if count < 2 {
            return false;
        }

        let elapsed = now.saturating_duration_since(self.last_advance);
        if elapsed < self.descriptor.frame_duration() {
            return false;
        }
        self.last_advance = now;

        let last = count - 1;
        let previous = self.frame;

        self.frame = match self.descriptor.kind {
            AnimationKind::Loop => (self.frame + 1) % count,
            AnimationKind::Once => (self.frame + 1).min(last),
            AnimationKind::OnceReset => {
                if self.flag {
                    0
                } else if self.frame == last {
                    self.flag = true;
                    0
                } else {
                    self.frame + 1
                }
            }
            AnimationKind::Reverse => {
                if self.flag {
                    if self.frame == 0 {
                        self.flag = false;
                        1
                    } else {
                        self.frame - 1
                    }
                } else if self.frame == last {
                    self.flag = true;
                    last - 1
                } else {
                    self.frame + 1
                }
            }
        };

        self.frame != previous
    }

    /// Back to frame 0, flag cleared, timing baseline at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.frame = 0;
        self.flag = false;
        self.last_advance = now;
    }

    /// Jumps to `frame` without touching timing.
    ///
    /// # Panics
    /// If `frame >= frame_count`.
    #[track_caller]
    pub fn set_frame(&mut self, frame: u32) {
        assert!(
            frame < self.descriptor.frame_count,
            "frame {frame} out of range for animation of {} frames",
            self.descriptor.frame_count
        );
        self.frame = frame;
    }
}
