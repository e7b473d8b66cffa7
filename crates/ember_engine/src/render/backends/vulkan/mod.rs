//! Vulkan backend (ash)
//!
//! Offscreen implementation of [`RenderDevice`](crate::render::api::RenderDevice):
//! no surface or swapchain is created; presentation belongs to the embedding
//! layer. Render targets are bound through dynamic rendering, resource state
//! transitions map to classic pipeline barriers, and per-draw parameters go
//! through per-frame descriptor pools plus a shared push-constant range.

mod context;
mod device;

pub use context::VulkanContext;
pub use device::VulkanDevice;
