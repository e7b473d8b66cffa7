//! GPU resource usage states and transition barriers
//!
//! Every GPU allocation carries a [`ResourceState`] tag describing the last
//! usage recorded for it on a command list. The tag must always match the
//! actual recorded state: a [`ResourceBarrier`] is emitted exactly when the
//! tag changes, never redundantly.

use crate::render::api::GpuAllocation;

/// Usage state of a GPU resource, as last recorded on a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Default state, valid target of the first transition
    Common,
    /// Readable as a vertex or constant buffer
    VertexAndConstantBuffer,
    /// Readable as an index buffer
    IndexBuffer,
    /// Writable color attachment
    RenderTarget,
    /// Read/write access from shaders
    UnorderedAccess,
    /// Writable depth-stencil attachment
    DepthWrite,
    /// Sampled from a pixel shader
    PixelShaderResource,
    /// Destination of a copy
    CopyDest,
    /// Source of a copy
    CopySource,
}

impl ResourceState {
    /// Whether an attachment in this state may be rendered or cleared
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            ResourceState::RenderTarget | ResourceState::DepthWrite | ResourceState::UnorderedAccess
        )
    }
}

/// A state transition for a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    /// Resource being transitioned
    pub resource: GpuAllocation,
    /// State the resource is currently in
    pub before: ResourceState,
    /// State the resource is needed in
    pub after: ResourceState,
}

impl ResourceBarrier {
    /// Describe a transition between two states
    pub fn transition(resource: GpuAllocation, before: ResourceState, after: ResourceState) -> Self {
        Self { resource, before, after }
    }

    /// A barrier is only required when the state actually changes
    pub fn is_required(&self) -> bool {
        self.before != self.after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::Key;

    #[test]
    fn same_state_transition_is_not_required() {
        let barrier = ResourceBarrier::transition(
            GpuAllocation::null(),
            ResourceState::RenderTarget,
            ResourceState::RenderTarget,
        );
        assert!(!barrier.is_required());
    }

    #[test]
    fn state_change_requires_barrier() {
        let barrier = ResourceBarrier::transition(
            GpuAllocation::null(),
            ResourceState::RenderTarget,
            ResourceState::PixelShaderResource,
        );
        assert!(barrier.is_required());
    }

    #[test]
    fn writable_states() {
        assert!(ResourceState::RenderTarget.is_writable());
        assert!(ResourceState::DepthWrite.is_writable());
        assert!(!ResourceState::PixelShaderResource.is_writable());
        assert!(!ResourceState::Common.is_writable());
    }
}
