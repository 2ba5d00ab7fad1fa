//! Reverse-Z projection matrices.
//!
//! Depth is stored reversed: the near plane maps to 1.0 and the far plane to
//! 0.0, which pairs with the RHI's default `GreaterEqual` depth test and a
//! depth clear of 0.0. Y is flipped for Vulkan clip space.

use glam::Mat4;

/// Projection settings for a view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Perspective projection. An infinite `far` yields an infinite far plane.
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    /// Orthographic projection
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: 45.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    /// Update the aspect ratio (for perspective projection).
    pub fn set_aspect(&mut self, new_aspect: f32) {
        if let Projection::Perspective { aspect, .. } = self {
            *aspect = new_aspect;
        }
    }

    /// Right-handed reverse-Z matrix with the Vulkan Y flip.
    pub fn matrix(&self) -> Mat4 {
        let mut proj = match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => {
                if far.is_infinite() {
                    Mat4::perspective_infinite_reverse_rh(fov_y, aspect, near)
                } else {
                    Mat4::perspective_rh(fov_y, aspect, far, near)
                }
            }
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, far, near),
        };
        proj.y_axis.y *= -1.0;
        proj
    }
}

/// Reverse-Z perspective matrix.
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    Projection::Perspective {
        fov_y,
        aspect,
        near,
        far,
    }
    .matrix()
}

/// Reverse-Z orthographic matrix.
pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    Projection::Orthographic {
        left,
        right,
        bottom,
        top,
        near,
        far,
    }
    .matrix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    const EPSILON: f32 = 1e-4;

    fn ndc(proj: Mat4, view_pos: Vec4) -> Vec4 {
        let clip = proj * view_pos;
        clip / clip.w
    }

    #[test]
    fn test_perspective_near_maps_to_one() {
        let proj = perspective(60.0_f32.to_radians(), 1.0, 0.5, 100.0);
        let near = ndc(proj, Vec4::new(0.0, 0.0, -0.5, 1.0));
        let far = ndc(proj, Vec4::new(0.0, 0.0, -100.0, 1.0));
        assert!((near.z - 1.0).abs() < EPSILON);
        assert!(far.z.abs() < EPSILON);
    }

    #[test]
    fn test_depth_decreases_with_distance() {
        let proj = perspective(60.0_f32.to_radians(), 1.0, 0.5, 100.0);
        let close = ndc(proj, Vec4::new(0.0, 0.0, -2.0, 1.0));
        let distant = ndc(proj, Vec4::new(0.0, 0.0, -50.0, 1.0));
        assert!(close.z > distant.z);
    }

    #[test]
    fn test_infinite_far_plane() {
        let proj = perspective(60.0_f32.to_radians(), 1.0, 0.5, f32::INFINITY);
        let near = ndc(proj, Vec4::new(0.0, 0.0, -0.5, 1.0));
        let distant = ndc(proj, Vec4::new(0.0, 0.0, -1.0e6, 1.0));
        assert!((near.z - 1.0).abs() < EPSILON);
        assert!(distant.z >= 0.0 && distant.z < 1.0e-3);
    }

    #[test]
    fn test_orthographic_reverse_z() {
        let proj = orthographic(-1.0, 1.0, -1.0, 1.0, 1.0, 11.0);
        let near = ndc(proj, Vec4::new(0.0, 0.0, -1.0, 1.0));
        let far = ndc(proj, Vec4::new(0.0, 0.0, -11.0, 1.0));
        assert!((near.z - 1.0).abs() < EPSILON);
        assert!(far.z.abs() < EPSILON);
    }

    #[test]
    fn test_y_is_flipped() {
        let proj = orthographic(-1.0, 1.0, -1.0, 1.0, 1.0, 11.0);
        let up = ndc(proj, Vec4::new(0.0, 1.0, -5.0, 1.0));
        assert!((up.y + 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_set_aspect_only_affects_perspective() {
        let mut proj = Projection::default();
        proj.set_aspect(2.0);
        assert!(matches!(proj, Projection::Perspective { aspect, .. } if aspect == 2.0));

        let mut ortho = Projection::Orthographic {
            left: -1.0,
            right: 1.0,
            bottom: -1.0,
            top: 1.0,
            near: 0.1,
            far: 10.0,
        };
        let before = ortho;
        ortho.set_aspect(2.0);
        assert_eq!(ortho, before);
    }
}
