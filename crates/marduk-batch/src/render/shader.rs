//! Capacity specialization of the sprite shader.
//!
//! Fixed-length uniform arrays need their length as a compile-time constant,
//! so the baked template carries a placeholder that is substituted with the
//! pool capacity before the module is created.

use std::borrow::Cow;

use crate::device::InstanceBinding;
use crate::error::{BatchError, Result};

/// Token replaced by the capacity literal.
pub const CAPACITY_PLACEHOLDER: &str = "__POOL_CAPACITY__";

const BAKED_SOURCE: &str = include_str!("shaders/sprite_baked.wgsl");
const RUNTIME_SOURCE: &str = include_str!("shaders/sprite_runtime.wgsl");

/// WGSL source, optionally parameterized by the instance capacity.
#[derive(Debug, Clone)]
pub struct ShaderTemplate {
    source: Cow<'static, str>,
    specialized: bool,
}

impl ShaderTemplate {
    /// Template that must contain [`CAPACITY_PLACEHOLDER`] at least once.
    pub fn new(source: impl Into<Cow<'static, str>>) -> Result<Self> {
        let source = source.into();
        if !source.contains(CAPACITY_PLACEHOLDER) {
            return Err(BatchError::InvalidShaderTemplate {
                placeholder: CAPACITY_PLACEHOLDER,
            });
        }
        Ok(Self {
            source,
            specialized: true,
        })
    }

    /// Source used as-is for every capacity.
    pub fn fixed(source: impl Into<Cow<'static, str>>) -> Self {
        Self {
            source: source.into(),
            specialized: false,
        }
    }

    /// Built-in sprite shader for `binding`.
    pub fn sprite(binding: InstanceBinding) -> Self {
        match binding {
            InstanceBinding::Baked => Self {
                source: Cow::Borrowed(BAKED_SOURCE),
                specialized: true,
            },
            InstanceBinding::Runtime => Self::fixed(RUNTIME_SOURCE),
        }
    }

    /// Whether the output depends on the capacity.
    #[inline]
    pub fn depends_on_capacity(&self) -> bool {
        self.specialized
    }

    /// Unspecialized source.
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Produces the source for `capacity`.
    ///
    /// Every placeholder becomes a WGSL `u32` literal (`256u`), which is valid
    /// both as an array length and in arithmetic against `u32` indices.
    pub fn specialize(&self, capacity: u32) -> Result<String> {
        if capacity == 0 {
            return Err(BatchError::InvalidCapacity("shader capacity must be non-zero"));
        }
        if !self.specialized {
            return Ok(self.source.clone().into_owned());
        }
        Ok(self
            .source
            .replace(CAPACITY_PLACEHOLDER, &format!("{capacity}u")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_every_placeholder() {
        let t = ShaderTemplate::new(
            "const N: u32 = __POOL_CAPACITY__;\nvar<uniform> a: array<vec4<f32>, __POOL_CAPACITY__>;",
        )
        .unwrap();
        let src = t.specialize(256).unwrap();
        assert_eq!(
            src,
            "const N: u32 = 256u;\nvar<uniform> a: array<vec4<f32>, 256u>;"
        );
        assert!(!src.contains(CAPACITY_PLACEHOLDER));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let t = ShaderTemplate::new("__POOL_CAPACITY__").unwrap();
        assert_eq!(
            t.specialize(0),
            Err(BatchError::InvalidCapacity("shader capacity must be non-zero"))
        );
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let err = ShaderTemplate::new("fn main() {}").unwrap_err();
        assert!(matches!(err, BatchError::InvalidShaderTemplate { .. }));
    }

    #[test]
    fn fixed_source_ignores_capacity() {
        let t = ShaderTemplate::fixed("fn main() {}");
        assert!(!t.depends_on_capacity());
        assert_eq!(t.specialize(8).unwrap(), "fn main() {}");
        assert_eq!(t.specialize(1024).unwrap(), "fn main() {}");
    }

    #[test]
    fn builtin_sources_share_the_entry_points() {
        let baked = ShaderTemplate::sprite(InstanceBinding::Baked);
        let runtime = ShaderTemplate::sprite(InstanceBinding::Runtime);

        assert!(baked.depends_on_capacity());
        assert!(baked.source().contains(CAPACITY_PLACEHOLDER));
        assert!(!runtime.depends_on_capacity());
        assert!(!runtime.source().contains(CAPACITY_PLACEHOLDER));

        for src in [baked.source(), runtime.source()] {
            assert!(src.contains("fn vs_main"));
            assert!(src.contains("fn fs_main"));
        }

        let specialized = baked.specialize(16).unwrap();
        assert!(specialized.contains("16u"));
    }
}
