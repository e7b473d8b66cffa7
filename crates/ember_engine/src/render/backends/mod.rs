//! Graphics backend implementations
//!
//! Contains the concrete [`RenderDevice`](crate::render::api::RenderDevice)
//! implementations and the factory that selects one at context creation.
//! Engine code above this module never names a concrete backend type.

pub mod headless;
pub mod vulkan;

use crate::render::api::{BackendKind, RenderDevice};
use crate::render::{RenderError, RenderResult};

/// Instantiate the device for a backend kind
///
/// Called exactly once per [`GraphicsContext`](crate::render::GraphicsContext).
pub fn create_device(kind: BackendKind) -> RenderResult<Box<dyn RenderDevice>> {
    match kind {
        BackendKind::None => Err(RenderError::UnsupportedBackend),
        BackendKind::Headless => Ok(Box::new(headless::HeadlessDevice::new())),
        BackendKind::Vulkan => Ok(Box::new(vulkan::VulkanDevice::new()?)),
    }
}
