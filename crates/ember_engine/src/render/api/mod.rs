//! Backend abstraction layer
//!
//! Defines the [`RenderDevice`] trait every graphics backend implements,
//! together with the opaque handle types that cross the trait boundary.
//! The rest of the engine is written against this module only; concrete
//! backends are selected once, through [`BackendKind`], when a
//! [`GraphicsContext`](crate::render::GraphicsContext) is created.

mod device;
mod handles;

pub use device::{
    AttachmentDesc, BufferDesc, BufferUsage, ClearFlags, MemoryLocation, RenderDevice,
    TextureFormat, ViewDesc, ViewKind,
};
pub use handles::{CommandList, GpuAllocation, PipelineHandle};

/// Which graphics backend a context drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// No backend selected; every resource creation fails
    #[default]
    None,
    /// CPU-side recording backend for tests and headless tools
    Headless,
    /// Vulkan backend (ash)
    Vulkan,
}
