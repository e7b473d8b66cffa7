//! # Ember Engine
//!
//! A real-time 3D rendering core written in Rust.
//!
//! The crate is the renderer abstraction layer and frame-graph execution
//! pipeline of a larger engine: it owns GPU resource lifetime across
//! multiple in-flight frames, schedules the fixed multi-pass frame
//! (shadow → geometry → lighting → bloom → FXAA → composite), and tracks
//! resource state transitions so barriers are recorded exactly when a
//! resource changes usage.
//!
//! ## Architecture
//!
//! - **`render::api`**: the [`render::api::RenderDevice`] trait and the opaque
//!   handle types the core is written against. Concrete backends live in
//!   `render::backends` and are selected once, at context creation.
//! - **`render::GraphicsContext`**: explicit per-renderer context: frame
//!   index, descriptor heaps, deferred-release queues. There is no global
//!   renderer state; multiple independent contexts can coexist.
//! - **`render::graph::SceneRenderer`**: the frame graph. Consumes per-frame
//!   scene snapshots ([`scene::CameraData`], [`scene::SceneLight`]) and
//!   records the pass sequence against the backend.
//!
//! ## Collaborators (out of scope here)
//!
//! Editor UI, the scene/entity data model, asset import, shader source
//! compilation, and windowing/presentation are external. The engine consumes
//! read-only per-frame snapshots and already-compiled shader bytecode, and
//! renders offscreen; the embedding layer owns frame pacing and display.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::foundation::math::{Mat4, Mat4Ext, Vec3, Vec4};
    pub use crate::render::api::BackendKind;
    pub use crate::render::graph::{Material, SceneRenderer, Statistics};
    pub use crate::render::settings::RendererSettings;
    pub use crate::render::{GraphicsContext, RenderError, RenderResult};
    pub use crate::scene::{CameraData, LightKind, SceneLight, SkylightData};
}
