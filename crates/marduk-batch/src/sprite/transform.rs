use glam::{Mat4, Quat, Vec2, Vec3};

/// 2D placement with a lazily rebuilt model matrix.
///
/// The model maps the unit quad centered on the origin: scale, then rotate
/// `angle` radians counter-clockwise, then translate to `position`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    position: Vec2,
    scale: Vec2,
    angle: f32,
    model: Mat4,
    changed: bool,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: Vec2::ONE,
            angle: 0.0,
            model: Mat4::IDENTITY,
            changed: true,
        }
    }
}

impl Transform {
    pub fn new(position: Vec2, scale: Vec2, angle: f32) -> Self {
        Self {
            position,
            scale,
            angle,
            ..Self::default()
        }
    }

    #[inline]
    pub fn position(&self) -> Vec2 {
        self.position
    }

    #[inline]
    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn set_position(&mut self, position: Vec2) {
        if self.position != position {
            self.position = position;
            self.changed = true;
        }
    }

    pub fn set_scale(&mut self, scale: Vec2) {
        if self.scale != scale {
            self.scale = scale;
            self.changed = true;
        }
    }

    pub fn set_angle(&mut self, angle: f32) {
        if self.angle != angle {
            self.angle = angle;
            self.changed = true;
        }
    }

    /// Whether the next [`model_if_updated`](Self::model_if_updated) yields a matrix.
    #[inline]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Rebuilds and returns the model matrix if anything changed since the last call.
    pub fn model_if_updated(&mut self) -> Option<Mat4> {
        if !self.changed {
            return None;
        }
        self.changed = false;
        self.model = Mat4::from_scale_rotation_translation(
            self.scale.extend(1.0),
            Quat::from_rotation_z(self.angle),
            Vec3::new(self.position.x, self.position.y, 0.0),
        );
        Some(self.model)
    }

    /// Current model matrix, rebuilding it if needed.
    pub fn model(&mut self) -> Mat4 {
        self.model_if_updated();
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_is_reported_once_per_change() {
        let mut t = Transform::default();
        assert_eq!(t.model_if_updated(), Some(Mat4::IDENTITY));
        assert_eq!(t.model_if_updated(), None);

        t.set_position(Vec2::new(10.0, 5.0));
        let m = t.model_if_updated().unwrap();
        assert_eq!(m.w_axis, glam::Vec4::new(10.0, 5.0, 0.0, 1.0));
        assert_eq!(t.model_if_updated(), None);
    }

    #[test]
    fn setting_the_same_value_is_not_a_change() {
        let mut t = Transform::new(Vec2::ONE, Vec2::splat(2.0), 0.5);
        t.model_if_updated();
        t.set_position(Vec2::ONE);
        t.set_scale(Vec2::splat(2.0));
        t.set_angle(0.5);
        assert!(!t.is_changed());
    }

    #[test]
    fn scale_then_rotate_then_translate() {
        let mut t = Transform::new(
            Vec2::new(100.0, 0.0),
            Vec2::new(2.0, 1.0),
            std::f32::consts::FRAC_PI_2,
        );
        let p = t.model().transform_point3(Vec3::new(0.5, 0.0, 0.0));
        assert!((p - Vec3::new(100.0, 1.0, 0.0)).length() < 1e-5);
    }
}
