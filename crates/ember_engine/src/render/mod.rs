//! # Rendering System
//!
//! The core rendering abstraction layer of the engine: explicit GPU resource
//! lifetime management across in-flight frames, resource state tracking with
//! barrier emission, and the multi-pass frame graph.
//!
//! ## Architecture
//!
//! - **`api`**: the [`api::RenderDevice`] trait plus the opaque handle and
//!   descriptor types the core is written against
//! - **`backends`**: concrete device implementations (Vulkan, headless),
//!   selected once through [`api::BackendKind`]
//! - **`GraphicsContext`**: per-renderer context owning the device, the
//!   descriptor heaps and the deferred-release queues
//! - **Resource types**: buffers, framebuffers and pipelines layered on the
//!   context
//! - **`graph`**: the frame graph ([`graph::SceneRenderer`]) recording the
//!   fixed pass sequence every frame
//!
//! All command recording is single-threaded; GPU execution is pipelined
//! [`FRAME_COUNT`](context::FRAME_COUNT) frames deep. Per-frame resource
//! replication and the deferred-release queue are the only synchronization
//! mechanism exposed at this layer.

pub mod api;
pub mod backends;
pub mod buffer;
pub mod context;
pub mod descriptor;
pub mod framebuffer;
pub mod graph;
pub mod pipeline;
pub mod settings;
pub mod state;

pub use context::{GraphicsContext, FRAME_COUNT};
pub use descriptor::{DescriptorHandle, DescriptorHeap, DescriptorHeapKind};
pub use framebuffer::{Framebuffer, FramebufferSpecification, MAX_FRAMEBUFFER_SIZE};
pub use pipeline::{PipelineLibrary, PipelineSpecification, PipelineState, SharedPipeline};
pub use state::{ResourceBarrier, ResourceState};

use thiserror::Error;

/// Errors produced by the rendering system
#[derive(Debug, Error)]
pub enum RenderError {
    /// No graphics backend was selected for the context
    ///
    /// Resource creation requires an active backend; a context built with
    /// [`api::BackendKind::None`] rejects every create call with this error.
    #[error("no graphics backend selected")]
    UnsupportedBackend,

    /// A descriptor heap ran out of slots
    ///
    /// Heaps are presized at context creation; exhausting one indicates the
    /// capacities need to be raised, and is fatal in practice.
    #[error("{kind:?} descriptor heap exhausted (capacity {capacity})")]
    HeapExhausted {
        /// Which heap ran out
        kind: DescriptorHeapKind,
        /// Its fixed capacity
        capacity: u32,
    },

    /// A named pipeline is not present in the library
    #[error("pipeline not found: {0}")]
    NotFound(String),

    /// Shader bytecode could not be read or compiled into a pipeline
    #[error("shader compilation failed for {path}: {message}")]
    ShaderCompilation {
        /// Source path of the failing shader
        path: String,
        /// Backend-reported reason
        message: String,
    },

    /// Backend initialization failed during setup
    #[error("renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// An operation was issued against a resource that cannot support it
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Backend-specific error occurred
    ///
    /// Wraps backend-specific failures in a generic form for consistent
    /// handling across different graphics backends.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
