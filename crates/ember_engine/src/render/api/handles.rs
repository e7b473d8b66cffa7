//! Opaque handle types shared between the core and the backends

slotmap::new_key_type! {
    /// Key for a GPU memory allocation (buffer or texture) owned by a backend
    pub struct GpuAllocation;

    /// Key for a compiled pipeline state object owned by a backend
    pub struct PipelineHandle;
}

/// Opaque token identifying an open command list
///
/// Owns no memory and is passed by value; the concrete representation is an
/// index private to the backend that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandList(pub(crate) u32);

impl CommandList {
    /// Backend-private constructor
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Backend-private index accessor
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}
