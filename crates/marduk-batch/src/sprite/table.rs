use crate::error::{BatchError, Result};

use super::animation::{AnimationDescriptor, AnimationKind, Flip};

/// Frame size plus the animations of one spritesheet.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationTable {
    frame_width: u32,
    frame_height: u32,
    animations: Vec<AnimationDescriptor>,
}

impl AnimationTable {
    /// Rejects zero frame dimensions, an empty animation list and zero-frame
    /// animations.
    pub fn new(
        frame_width: u32,
        frame_height: u32,
        animations: Vec<AnimationDescriptor>,
    ) -> Result<Self> {
        if frame_width == 0 || frame_height == 0 {
            return Err(BatchError::InvalidCapacity("frame dimensions must be non-zero"));
        }
        if animations.is_empty() {
            return Err(BatchError::InvalidCapacity("sheet declares no animations"));
        }
        if animations.iter().any(|a| a.frame_count == 0) {
            return Err(BatchError::InvalidCapacity("animation has zero frames"));
        }
        Ok(Self {
            frame_width,
            frame_height,
            animations,
        })
    }

    /// Parses the whitespace-delimited table format:
    ///
    /// ```text
    /// frame_width frame_height
    /// first_frame frame_count frame_rate kind flags
    /// ...
    /// ```
    ///
    /// `kind` is 0 = loop, 1 = reverse, 2 = once, 3 = once-reset; `flags`
    /// bit0 flips horizontally, bit1 vertically. Token positions in errors are
    /// zero-based.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = Tokens {
            inner: text.split_whitespace().enumerate().peekable(),
            position: 0,
        };

        let frame_width: u32 = tokens.next_parsed("frame width")?;
        let frame_height: u32 = tokens.next_parsed("frame height")?;

        let mut animations = Vec::new();
        while tokens.has_more() {
            let first_frame: u32 = tokens.next_parsed("first frame")?;
            let frame_count: u32 = tokens.next_parsed("frame count")?;
            let frame_rate: f32 = tokens.next_parsed("frame rate")?;
            if !frame_rate.is_finite() || frame_rate < 0.0 {
                return Err(BatchError::descriptor(
                    tokens.position - 1,
                    format!("frame rate {frame_rate} is not a non-negative number"),
                ));
            }
            let ordinal: u32 = tokens.next_parsed("animation kind")?;
            let kind = AnimationKind::from_ordinal(ordinal).ok_or_else(|| {
                BatchError::descriptor(tokens.position - 1, format!("unknown animation kind {ordinal}"))
            })?;
            let flags: u32 = tokens.next_parsed("flags")?;

            animations.push(AnimationDescriptor {
                first_frame,
                frame_count,
                frame_rate,
                kind,
                flip: Flip::from_bits(flags),
            });
        }

        Self::new(frame_width, frame_height, animations)
    }

    #[inline]
    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    #[inline]
    pub fn animations(&self) -> &[AnimationDescriptor] {
        &self.animations
    }
}

struct Tokens<'a> {
    inner: std::iter::Peekable<std::iter::Enumerate<std::str::SplitWhitespace<'a>>>,
    position: usize,
}

impl<'a> Tokens<'a> {
    fn has_more(&mut self) -> bool {
        self.inner.peek().is_some()
    }

    fn next_parsed<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let Some((index, token)) = self.inner.next() else {
            return Err(BatchError::descriptor(
                self.position,
                format!("expected {what}, found end of table"),
            ));
        };
        self.position = index + 1;
        token
            .parse()
            .map_err(|_| BatchError::descriptor(index, format!("invalid {what} `{token}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frame_size_and_animations() {
        let table = AnimationTable::parse(
            "16 24\n\
             0 4 8.0 0 0\n\
             4 3 12 1 1\n\
             7 1 0 2 3\n",
        )
        .unwrap();

        assert_eq!(table.frame_size(), (16, 24));
        assert_eq!(table.animations().len(), 3);

        let walk = table.animations()[0];
        assert_eq!(walk.first_frame, 0);
        assert_eq!(walk.frame_count, 4);
        assert_eq!(walk.frame_rate, 8.0);
        assert_eq!(walk.kind, AnimationKind::Loop);
        assert_eq!(walk.flip, Flip::NONE);

        let bounce = table.animations()[1];
        assert_eq!(bounce.kind, AnimationKind::Reverse);
        assert!(bounce.flip.horizontal);
        assert!(!bounce.flip.vertical);

        let still = table.animations()[2];
        assert_eq!(still.kind, AnimationKind::Once);
        assert_eq!(still.flip, Flip { horizontal: true, vertical: true });
    }

    #[test]
    fn zero_frame_size_is_invalid_capacity() {
        let err = AnimationTable::parse("0 16 0 1 1 0 0").unwrap_err();
        assert!(matches!(err, BatchError::InvalidCapacity(_)));
    }

    #[test]
    fn no_animations_is_invalid_capacity() {
        let err = AnimationTable::parse("16 16").unwrap_err();
        assert!(matches!(err, BatchError::InvalidCapacity(_)));
    }

    #[test]
    fn truncated_tuple_reports_position() {
        let err = AnimationTable::parse("16 16 0 4 8").unwrap_err();
        assert_eq!(
            err,
            BatchError::Descriptor {
                token: 5,
                message: "expected animation kind, found end of table".into(),
            }
        );
    }

    #[test]
    fn bad_tokens_are_reported() {
        let err = AnimationTable::parse("16 sixteen").unwrap_err();
        assert!(matches!(err, BatchError::Descriptor { token: 1, .. }));

        let err = AnimationTable::parse("16 16 0 4 8 9 0").unwrap_err();
        assert!(matches!(err, BatchError::Descriptor { token: 5, .. }));

        let err = AnimationTable::parse("16 16 0 4 -1 0 0").unwrap_err();
        assert!(matches!(err, BatchError::Descriptor { token: 4, .. }));
    }
}
