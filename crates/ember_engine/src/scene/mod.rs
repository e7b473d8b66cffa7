//! Per-frame scene snapshots consumed by the renderer
//!
//! The scene/entity data model lives outside this crate. Each frame it hands
//! the renderer read-only snapshots: a camera, an optional skylight and the
//! visible lights. Nothing here owns GPU resources.

use crate::foundation::math::{Mat4, Vec3};

/// Camera matrices and position for one frame
#[derive(Debug, Clone)]
pub struct CameraData {
    /// View matrix
    pub view: Mat4,
    /// Projection matrix
    pub projection: Mat4,
    /// Precomputed `projection * view`
    pub view_projection: Mat4,
    /// World-space camera position
    pub position: Vec3,
}

impl CameraData {
    /// Build camera data, precomputing the view-projection matrix
    pub fn new(view: Mat4, projection: Mat4, position: Vec3) -> Self {
        Self { view, projection, view_projection: projection * view, position }
    }
}

/// Kind of a scene light
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// Infinitely distant, direction from transform +Z
    Directional,
    /// Omnidirectional with a range
    Point,
    /// Cone light with inner/outer cut-off angles
    Spot,
}

/// One visible light, snapshotted for the frame
#[derive(Debug, Clone)]
pub struct SceneLight {
    /// Light kind
    pub kind: LightKind,
    /// Linear RGB color
    pub color: Vec3,
    /// Intensity multiplier
    pub intensity: f32,
    /// Influence radius (point/spot)
    pub range: f32,
    /// Inner cut-off angle in radians (spot)
    pub cut_off_angle: f32,
    /// Outer cut-off angle in radians (spot)
    pub outer_cut_off_angle: f32,
    /// World transform; +Z is the emission direction
    pub transform: Mat4,
}

impl SceneLight {
    /// A white directional light pointing along the transform's +Z axis
    pub fn directional(transform: Mat4, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            intensity,
            range: 0.0,
            cut_off_angle: 0.0,
            outer_cut_off_angle: 0.0,
            transform,
        }
    }

    /// A point light at the transform's translation
    pub fn point(transform: Mat4, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            intensity,
            range,
            cut_off_angle: 0.0,
            outer_cut_off_angle: 0.0,
            transform,
        }
    }

    /// A spot light with the given cone angles (radians)
    pub fn spot(
        transform: Mat4,
        color: Vec3,
        intensity: f32,
        range: f32,
        cut_off_angle: f32,
        outer_cut_off_angle: f32,
    ) -> Self {
        Self { kind: LightKind::Spot, color, intensity, range, cut_off_angle, outer_cut_off_angle, transform }
    }
}

/// Skylight (environment cubemap) snapshot
#[derive(Debug, Clone)]
pub struct SkylightData {
    /// SRV heap slot of the environment cubemap, registered by the asset
    /// layer; `None` renders the skylight pass with no environment bound
    pub environment_srv: Option<u32>,
    /// Intensity multiplier
    pub intensity: f32,
    /// Rotation around the vertical axis in radians
    pub rotation: f32,
}
