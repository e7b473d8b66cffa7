//! Renderer settings consumed by the frame graph
//!
//! Plain data, serde-(de)serializable so the editor can persist it through
//! the [`config`](crate::config) layer. Post-processing options are read at
//! composite time every frame; capacity options are read once at renderer
//! creation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Tone-mapping curve applied in the composite pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Tonemapping {
    /// Pass HDR values through unchanged
    None,
    /// ACES filmic approximation
    #[default]
    Aces,
    /// Filmic curve
    Filmic,
    /// Uncharted 2 curve
    Uncharted,
}

/// Bloom configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomSettings {
    /// Whether the bloom pass runs at all
    pub enabled: bool,
    /// Blend strength at composite time
    pub strength: f32,
    /// Luminance threshold for the prefilter
    pub threshold: f32,
    /// Soft-knee width around the threshold
    pub knee: f32,
    /// Upper clamp on prefiltered luminance
    pub clamp: f32,
    /// Number of down/up-sample levels (minimum 2)
    pub levels: usize,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self { enabled: true, strength: 0.1, threshold: 1.0, knee: 0.1, clamp: 100.0, levels: 6 }
    }
}

/// FXAA configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxaaSettings {
    /// Whether the FXAA pass runs
    pub enabled: bool,
    /// x: absolute contrast threshold, y: relative threshold
    pub threshold: [f32; 2],
}

impl Default for FxaaSettings {
    fn default() -> Self {
        Self { enabled: true, threshold: [0.007_812_5, 0.125] }
    }
}

/// Vignette configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VignetteSettings {
    /// rgb: color, a: intensity
    pub color: [f32; 4],
    /// xy: offset, z: use mask, w: enable
    pub offset: [f32; 4],
}

impl Default for VignetteSettings {
    fn default() -> Self {
        Self { color: [0.0, 0.0, 0.0, 0.25], offset: [0.0, 0.0, 0.0, 1.0] }
    }
}

/// Complete renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Tone-mapping curve
    pub tonemapping: Tonemapping,
    /// Exposure multiplier applied before tone mapping
    pub exposure: f32,
    /// Bloom options
    pub bloom: BloomSettings,
    /// FXAA options
    pub fxaa: FxaaSettings,
    /// Vignette options
    pub vignette: VignetteSettings,
    /// Fixed capacity of the per-frame mesh submission arena
    ///
    /// Submissions beyond this are dropped for the rest of the frame; frame
    /// cost stays bounded by design.
    pub max_meshes: usize,
    /// Shadow map resolution per directional light
    pub shadow_map_resolution: u32,
    /// Iterate shadow-pass meshes front-to-back instead of back-to-front
    pub shadow_front_to_back: bool,
    /// Directory shader bytecode is loaded from
    pub shader_dir: PathBuf,
    /// Initial viewport width
    pub viewport_width: u32,
    /// Initial viewport height
    pub viewport_height: u32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            tonemapping: Tonemapping::default(),
            exposure: 1.0,
            bloom: BloomSettings::default(),
            fxaa: FxaaSettings::default(),
            vignette: VignetteSettings::default(),
            max_meshes: 10_000,
            shadow_map_resolution: 2048,
            shadow_front_to_back: false,
            shader_dir: PathBuf::from("assets/shaders"),
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

impl Config for RendererSettings {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = RendererSettings::default();
        assert_eq!(settings.tonemapping, Tonemapping::Aces);
        assert_eq!(settings.fxaa.threshold, [0.007_812_5, 0.125]);
        assert_eq!(settings.vignette.color[3], 0.25);
        assert!(settings.bloom.enabled);
        assert_eq!(settings.bloom.levels, 6);
    }

    #[test]
    fn partial_ron_overrides_merge_with_defaults() {
        let settings: RendererSettings = ron::from_str("(exposure: 2.0, max_meshes: 64)").unwrap();
        assert_eq!(settings.exposure, 2.0);
        assert_eq!(settings.max_meshes, 64);
        assert_eq!(settings.shadow_map_resolution, 2048);
    }
}
