//! The frame graph: pass targets and the multi-pass scene renderer
//!
//! Every frame runs the fixed pass sequence
//! shadow → geometry → lighting → bloom → FXAA → composite. Later passes
//! sample the framebuffers earlier passes wrote, so each pass transitions
//! its inputs to shader-resource state and its outputs back to a writable
//! state through the framebuffer state machine; ordering within the single
//! command list is the only synchronization required.

mod renderer;
mod targets;

#[cfg(test)]
mod scene_renderer_tests;

pub use renderer::{
    Geometry, Material, SceneRenderer, Statistics, Vertex, MAX_DIRECTIONAL_LIGHTS, MAX_POINT_LIGHTS,
    MAX_SPOT_LIGHTS,
};
pub use targets::RenderGraphData;
