//! The render device trait and its descriptor types

use std::any::Any;

use bitflags::bitflags;

use crate::render::api::{BackendKind, CommandList, GpuAllocation, PipelineHandle};
use crate::render::pipeline::PipelineSpecification;
use crate::render::state::{ResourceBarrier, ResourceState};
use crate::render::RenderResult;

/// Pixel formats understood by attachments and pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// No attachment
    #[default]
    None,
    /// 8-bit RGBA, unsigned normalized
    Rgba8Unorm,
    /// 16-bit float RGBA
    Rgba16Float,
    /// Packed 11/11/10 float HDR color
    R11G11B10Float,
    /// 24-bit depth with 8-bit stencil
    Depth24Stencil8,
    /// 32-bit float depth
    Depth32Float,
}

impl TextureFormat {
    /// Whether this format describes a depth(-stencil) attachment
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth24Stencil8 | TextureFormat::Depth32Float)
    }
}

/// Intended use of a buffer allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex data, copy destination
    Vertex,
    /// Index data, copy destination
    Index,
    /// Constant (uniform) data
    Constant,
    /// Structured (storage) data
    Structured,
    /// Upload staging, copy source
    Staging,
}

/// Which memory class backs an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local memory, not CPU-writable
    DeviceLocal,
    /// Upload-visible memory, CPU-writable every frame
    Upload,
}

/// Description of a buffer allocation
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Allocation size in bytes
    pub size: u64,
    /// Intended usage
    pub usage: BufferUsage,
    /// Backing memory class
    pub memory: MemoryLocation,
    /// Debug name attached to the resource
    pub name: String,
}

/// Description of a framebuffer attachment allocation
#[derive(Debug, Clone)]
pub struct AttachmentDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// MSAA sample count
    pub samples: u32,
    /// Pixel format; depth formats produce depth-stencil attachments
    pub format: TextureFormat,
    /// Clear color baked into the resource for fast clears
    pub clear_color: [f32; 4],
    /// Clear depth value
    pub clear_depth: f32,
    /// Clear stencil value
    pub clear_stencil: u8,
    /// State the attachment is created in
    pub initial_state: ResourceState,
    /// Debug name attached to the resource
    pub name: String,
}

/// Kind of resource view to register at a descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// Sampled texture view (SRV heap)
    ShaderResource,
    /// Color render target view (RTV heap)
    RenderTarget,
    /// Depth-stencil view (DSV heap)
    DepthStencil,
    /// Structured buffer view (SRV heap)
    StructuredBuffer,
}

/// Registration of a resource view at a descriptor heap slot
#[derive(Debug, Clone, Copy)]
pub struct ViewDesc {
    /// View kind, implying the heap the slot belongs to
    pub kind: ViewKind,
    /// Descriptor heap slot index the view occupies
    pub index: u32,
}

bitflags! {
    /// Which aspects a depth-stencil clear touches
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClearFlags: u32 {
        /// Clear the depth aspect
        const DEPTH = 1;
        /// Clear the stencil aspect
        const STENCIL = 2;
    }
}

/// Graphics backend interface
///
/// One implementation exists per backend; a device is chosen once at context
/// creation and the engine core only ever talks to this trait. All methods
/// are called from the single rendering thread.
///
/// Command recording follows the explicit command-list model: a list is
/// opened with [`begin_command_list`](RenderDevice::begin_command_list),
/// `cmd_*` methods record into it, and [`submit`](RenderDevice::submit)
/// hands it to the GPU. Commands in one list execute in recorded order.
pub trait RenderDevice {
    /// Which backend this device drives
    fn kind(&self) -> BackendKind;

    /// Allocate a buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<GpuAllocation>;

    /// Allocate a framebuffer attachment (color or depth-stencil texture)
    fn create_attachment(&mut self, desc: &AttachmentDesc) -> RenderResult<GpuAllocation>;

    /// Destroy a resource immediately
    ///
    /// Callers must guarantee the GPU is no longer using the resource; the
    /// deferred-release queue on the context provides that guarantee.
    fn destroy_resource(&mut self, allocation: GpuAllocation);

    /// Write bytes into an upload-visible buffer at a byte offset
    fn write_buffer(&mut self, allocation: GpuAllocation, offset: u64, data: &[u8]) -> RenderResult<()>;

    /// Register a view of a resource at a descriptor heap slot
    fn create_view(&mut self, allocation: GpuAllocation, view: ViewDesc) -> RenderResult<()>;

    /// Compile shader bytecode and a specification into a pipeline
    fn create_pipeline(
        &mut self,
        name: &str,
        bytecode: &[u8],
        spec: &PipelineSpecification,
    ) -> RenderResult<PipelineHandle>;

    /// Destroy a pipeline immediately (same in-flight caveat as resources)
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Open a new command list for recording
    ///
    /// Backends recycle one list per in-flight frame; reusing a slot still
    /// pending on the GPU blocks until it drains. This is the only implicit
    /// backpressure in the engine.
    fn begin_command_list(&mut self) -> RenderResult<CommandList>;

    /// Close a command list and hand it to the GPU
    fn submit(&mut self, list: CommandList) -> RenderResult<()>;

    /// Record state-transition barriers
    fn cmd_resource_barrier(&mut self, list: CommandList, barriers: &[ResourceBarrier]);

    /// Bind render targets by RTV/DSV heap slots and set the viewport
    fn cmd_set_render_targets(
        &mut self,
        list: CommandList,
        colors: &[u32],
        depth: Option<u32>,
        width: u32,
        height: u32,
    );

    /// Clear a bound color target to a color
    fn cmd_clear_render_target(&mut self, list: CommandList, rtv: u32, color: [f32; 4]);

    /// Clear the bound depth-stencil target
    fn cmd_clear_depth_stencil(
        &mut self,
        list: CommandList,
        dsv: u32,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    );

    /// Bind a pipeline; returns false when the handle is stale or invalid
    fn cmd_bind_pipeline(&mut self, list: CommandList, pipeline: PipelineHandle) -> bool;

    /// Bind a vertex buffer at slot 0
    fn cmd_bind_vertex_buffer(&mut self, list: CommandList, buffer: GpuAllocation, stride: u32);

    /// Bind a u32 index buffer
    fn cmd_bind_index_buffer(&mut self, list: CommandList, buffer: GpuAllocation);

    /// Bind a constant-buffer range at a parameter slot
    fn cmd_bind_constant_buffer(
        &mut self,
        list: CommandList,
        buffer: GpuAllocation,
        offset: u64,
        slot: u32,
    );

    /// Bind the resource registered at an SRV heap slot to a parameter slot
    fn cmd_bind_shader_resource(&mut self, list: CommandList, srv: u32, slot: u32);

    /// Record immediate per-draw constants at a parameter slot
    fn cmd_set_graphics_constants(&mut self, list: CommandList, slot: u32, data: &[u8]);

    /// Record a buffer-to-buffer copy
    fn cmd_copy_buffer(&mut self, list: CommandList, src: GpuAllocation, dst: GpuAllocation, size: u64);

    /// Record a non-indexed draw
    fn cmd_draw(&mut self, list: CommandList, vertex_count: u32);

    /// Record an indexed draw
    fn cmd_draw_indexed(&mut self, list: CommandList, index_count: u32);

    /// Block until the GPU has drained all submitted work
    fn wait_idle(&mut self);

    /// Downcast to the concrete backend type
    ///
    /// Breaks the abstraction on purpose; used by tests and tools that need
    /// to inspect recorded state.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast to the concrete backend type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
