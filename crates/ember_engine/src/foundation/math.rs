//! Math utilities and types
//!
//! Provides fundamental math types for 3D rendering.

pub use nalgebra::{Matrix3, Matrix4, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Extension helpers for 4x4 matrices used by the render passes
pub trait Mat4Ext {
    /// Right-handed look-at view matrix
    fn looking_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Orthographic projection covering `[-extent, extent]` on both axes
    fn orthographic_centered(extent: f32, near: f32, far: f32) -> Mat4;

    /// Drop the translation column, keeping only the rotational part.
    ///
    /// Used for skybox rendering, where the cube must follow the camera.
    fn rotation_only(&self) -> Mat4;

    /// Transform a direction vector (w = 0) by this matrix
    fn transform_direction(&self, direction: Vec3) -> Vec3;

    /// Translation column of the matrix
    fn translation_part(&self) -> Vec3;
}

impl Mat4Ext for Mat4 {
    fn looking_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        Mat4::look_at_rh(&Point3::from(eye), &Point3::from(target), &up)
    }

    fn orthographic_centered(extent: f32, near: f32, far: f32) -> Mat4 {
        Mat4::new_orthographic(-extent, extent, -extent, extent, near, far)
    }

    fn rotation_only(&self) -> Mat4 {
        let rotation: Mat3 = self.fixed_view::<3, 3>(0, 0).into_owned();
        rotation.to_homogeneous()
    }

    fn transform_direction(&self, direction: Vec3) -> Vec3 {
        (self * Vec4::new(direction.x, direction.y, direction.z, 0.0)).xyz()
    }

    fn translation_part(&self) -> Vec3 {
        self.column(3).xyz()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn transform_direction_ignores_translation() {
        let matrix = Mat4::new_translation(&Vec3::new(10.0, 20.0, 30.0));
        let direction = matrix.transform_direction(Vec3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(direction, Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn rotation_only_strips_translation() {
        let matrix = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let stripped = matrix.rotation_only();
        assert_relative_eq!(stripped, Mat4::identity());
    }

    #[test]
    fn translation_part_reads_fourth_column() {
        let matrix = Mat4::new_translation(&Vec3::new(4.0, 5.0, 6.0));
        assert_relative_eq!(matrix.translation_part(), Vec3::new(4.0, 5.0, 6.0));
    }
}
