//! GPU buffer types: vertex, index, constant and structured buffers
//!
//! Vertex and index buffers live in device-local memory and are filled
//! through an upload-visible staging allocation, with the copy recorded on
//! the caller's command list. Constant and structured buffers are replicated
//! once per in-flight frame, because the CPU writes them while the GPU may
//! still read the previous frame's copy; `set_data` only ever touches the
//! current frame's allocation.

use crate::render::api::{BufferDesc, BufferUsage, CommandList, GpuAllocation, MemoryLocation, ViewDesc, ViewKind};
use crate::render::context::{GraphicsContext, FRAME_COUNT};
use crate::render::descriptor::DescriptorHandle;
use crate::render::state::{ResourceBarrier, ResourceState};
use crate::render::RenderResult;

/// Hardware alignment requirement for constant-buffer elements
pub const CONSTANT_BUFFER_ALIGNMENT: u32 = 256;

fn align_to_constant_boundary(size: u32) -> u32 {
    (size + CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// Device-local vertex buffer with an upload staging allocation
pub struct VertexBuffer {
    allocation: GpuAllocation,
    staging: GpuAllocation,
    size: u64,
    stride: u32,
    state: ResourceState,
}

impl VertexBuffer {
    /// Create a buffer and upload initial vertex data through staging
    pub fn new(
        ctx: &mut GraphicsContext,
        list: CommandList,
        data: &[u8],
        stride: u32,
        name: &str,
    ) -> RenderResult<Self> {
        let mut buffer = Self::with_capacity(ctx, data.len() as u64, stride, name)?;
        buffer.set_data(ctx, list, data)?;
        Ok(buffer)
    }

    /// Create an empty buffer of a fixed size
    pub fn with_capacity(
        ctx: &mut GraphicsContext,
        size: u64,
        stride: u32,
        name: &str,
    ) -> RenderResult<Self> {
        let allocation = ctx.device.create_buffer(&BufferDesc {
            size,
            usage: BufferUsage::Vertex,
            memory: MemoryLocation::DeviceLocal,
            name: name.to_owned(),
        })?;
        let staging = ctx.device.create_buffer(&BufferDesc {
            size,
            usage: BufferUsage::Staging,
            memory: MemoryLocation::Upload,
            name: format!("{name} (staging)"),
        })?;
        Ok(Self { allocation, staging, size, stride, state: ResourceState::Common })
    }

    /// Upload vertex data, recording the staging copy on `list`
    pub fn set_data(&mut self, ctx: &mut GraphicsContext, list: CommandList, data: &[u8]) -> RenderResult<()> {
        ctx.device.write_buffer(self.staging, 0, data)?;
        let to_copy_dest = ResourceBarrier::transition(self.allocation, self.state, ResourceState::CopyDest);
        if to_copy_dest.is_required() {
            ctx.device.cmd_resource_barrier(list, &[to_copy_dest]);
        }
        ctx.device.cmd_copy_buffer(list, self.staging, self.allocation, data.len() as u64);
        ctx.device.cmd_resource_barrier(
            list,
            &[ResourceBarrier::transition(
                self.allocation,
                ResourceState::CopyDest,
                ResourceState::VertexAndConstantBuffer,
            )],
        );
        self.state = ResourceState::VertexAndConstantBuffer;
        Ok(())
    }

    /// Bind as the active vertex stream
    pub fn bind(&self, ctx: &mut GraphicsContext, list: CommandList) {
        ctx.device.cmd_bind_vertex_buffer(list, self.allocation, self.stride);
    }

    /// Number of vertices the buffer holds
    pub fn vertex_count(&self) -> u32 {
        (self.size / u64::from(self.stride)) as u32
    }

    /// Release both allocations through the deferred-release queue
    pub fn release(&mut self, ctx: &mut GraphicsContext) {
        ctx.deferred_release(self.allocation);
        ctx.deferred_release(self.staging);
    }
}

/// Device-local u32 index buffer
pub struct IndexBuffer {
    allocation: GpuAllocation,
    staging: GpuAllocation,
    count: u32,
}

impl IndexBuffer {
    /// Create a buffer and upload indices through staging
    pub fn new(
        ctx: &mut GraphicsContext,
        list: CommandList,
        indices: &[u32],
        name: &str,
    ) -> RenderResult<Self> {
        let size = std::mem::size_of_val(indices) as u64;
        let allocation = ctx.device.create_buffer(&BufferDesc {
            size,
            usage: BufferUsage::Index,
            memory: MemoryLocation::DeviceLocal,
            name: name.to_owned(),
        })?;
        let staging = ctx.device.create_buffer(&BufferDesc {
            size,
            usage: BufferUsage::Staging,
            memory: MemoryLocation::Upload,
            name: format!("{name} (staging)"),
        })?;
        ctx.device.write_buffer(staging, 0, bytemuck::cast_slice(indices))?;
        ctx.device.cmd_copy_buffer(list, staging, allocation, size);
        ctx.device.cmd_resource_barrier(
            list,
            &[ResourceBarrier::transition(allocation, ResourceState::Common, ResourceState::IndexBuffer)],
        );
        Ok(Self { allocation, staging, count: indices.len() as u32 })
    }

    /// Bind as the active index stream
    pub fn bind(&self, ctx: &mut GraphicsContext, list: CommandList) {
        ctx.device.cmd_bind_index_buffer(list, self.allocation);
    }

    /// Number of indices
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Release both allocations through the deferred-release queue
    pub fn release(&mut self, ctx: &mut GraphicsContext) {
        ctx.deferred_release(self.allocation);
        ctx.deferred_release(self.staging);
    }
}

/// Constant buffer with per-in-flight-frame replication
///
/// Elements are padded to the 256-byte constant-buffer-view alignment;
/// element `i` lives at `aligned_stride * i`. `set_data`/`bind` address the
/// current frame's allocation only.
pub struct ConstantBuffer {
    allocations: [GpuAllocation; FRAME_COUNT],
    element_size: u32,
    aligned_stride: u32,
    count: u32,
    slot: u32,
}

impl ConstantBuffer {
    /// Create a buffer of `count` elements bound at parameter `slot`
    pub fn new(
        ctx: &mut GraphicsContext,
        element_size: u32,
        count: u32,
        slot: u32,
        name: &str,
    ) -> RenderResult<Self> {
        let aligned_stride = align_to_constant_boundary(element_size);
        let mut allocations = [GpuAllocation::default(); FRAME_COUNT];
        for (frame, allocation) in allocations.iter_mut().enumerate() {
            *allocation = ctx.device.create_buffer(&BufferDesc {
                size: u64::from(aligned_stride) * u64::from(count),
                usage: BufferUsage::Constant,
                memory: MemoryLocation::Upload,
                name: format!("{name} [frame {frame}]"),
            })?;
        }
        Ok(Self { allocations, element_size, aligned_stride, count, slot })
    }

    /// Write one element of the current frame's allocation
    ///
    /// # Panics
    ///
    /// Writing past the element count is a programming error and aborts with
    /// a diagnostic rather than corrupting a neighboring element.
    pub fn set_data(&self, ctx: &mut GraphicsContext, data: &[u8], index: u32) -> RenderResult<()> {
        assert!(
            index < self.count,
            "constant buffer element index out of range: {index} >= {}",
            self.count
        );
        assert!(
            data.len() <= self.aligned_stride as usize,
            "constant buffer write of {} bytes exceeds element stride {}",
            data.len(),
            self.aligned_stride
        );
        let offset = u64::from(self.aligned_stride) * u64::from(index);
        ctx.device.write_buffer(self.allocations[ctx.frame_index()], offset, data)
    }

    /// Bind one element of the current frame's allocation at the buffer's slot
    pub fn bind(&self, ctx: &mut GraphicsContext, list: CommandList, index: u32) {
        assert!(
            index < self.count,
            "constant buffer element index out of range: {index} >= {}",
            self.count
        );
        let offset = u64::from(self.aligned_stride) * u64::from(index);
        ctx.device.cmd_bind_constant_buffer(list, self.allocations[ctx.frame_index()], offset, self.slot);
    }

    /// Unpadded element size in bytes
    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    /// Element stride after 256-byte alignment
    pub fn aligned_stride(&self) -> u32 {
        self.aligned_stride
    }

    /// Number of elements
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Allocation backing a given frame slot (introspection/testing)
    pub fn allocation(&self, frame: usize) -> GpuAllocation {
        self.allocations[frame]
    }

    /// Release all per-frame allocations through the deferred-release queue
    pub fn release(&mut self, ctx: &mut GraphicsContext) {
        for allocation in self.allocations {
            ctx.deferred_release(allocation);
        }
    }
}

/// Structured buffer with per-in-flight-frame replication and SRVs
pub struct StructuredBuffer {
    allocations: [GpuAllocation; FRAME_COUNT],
    views: Vec<DescriptorHandle>,
    stride: u32,
    capacity: u32,
    slot: u32,
}

impl StructuredBuffer {
    /// Create a buffer of `capacity` elements of `stride` bytes at `slot`
    pub fn new(
        ctx: &mut GraphicsContext,
        stride: u32,
        capacity: u32,
        slot: u32,
        name: &str,
    ) -> RenderResult<Self> {
        let mut allocations = [GpuAllocation::default(); FRAME_COUNT];
        let mut views = Vec::with_capacity(FRAME_COUNT);
        for (frame, allocation) in allocations.iter_mut().enumerate() {
            *allocation = ctx.device.create_buffer(&BufferDesc {
                size: u64::from(stride) * u64::from(capacity),
                usage: BufferUsage::Structured,
                memory: MemoryLocation::Upload,
                name: format!("{name} [frame {frame}]"),
            })?;
            let view = ctx.srv_heap.allocate()?;
            ctx.device.create_view(
                *allocation,
                ViewDesc { kind: ViewKind::StructuredBuffer, index: view.index() },
            )?;
            views.push(view);
        }
        Ok(Self { allocations, views, stride, capacity, slot })
    }

    /// Write elements from the start of the current frame's allocation
    pub fn set_data(&self, ctx: &mut GraphicsContext, data: &[u8]) -> RenderResult<()> {
        debug_assert!(
            data.len() as u64 <= u64::from(self.stride) * u64::from(self.capacity),
            "structured buffer write exceeds capacity"
        );
        ctx.device.write_buffer(self.allocations[ctx.frame_index()], 0, data)
    }

    /// Bind the current frame's SRV at the buffer's slot
    pub fn bind(&self, ctx: &mut GraphicsContext, list: CommandList) {
        ctx.device.cmd_bind_shader_resource(list, self.views[ctx.frame_index()].index(), self.slot);
    }

    /// Element stride in bytes
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Element capacity
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Release allocations and SRV slots
    pub fn release(&mut self, ctx: &mut GraphicsContext) {
        for allocation in self.allocations {
            ctx.deferred_release(allocation);
        }
        for view in self.views.drain(..) {
            ctx.srv_heap.free(view);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::BackendKind;
    use crate::render::backends::headless::HeadlessDevice;

    fn context() -> GraphicsContext {
        GraphicsContext::new(BackendKind::Headless).unwrap()
    }

    fn headless(ctx: &GraphicsContext) -> &HeadlessDevice {
        ctx.device().as_any().downcast_ref().expect("headless backend")
    }

    #[test]
    fn constant_stride_rounds_up_to_256() {
        assert_eq!(align_to_constant_boundary(1), 256);
        assert_eq!(align_to_constant_boundary(256), 256);
        assert_eq!(align_to_constant_boundary(257), 512);
        assert_eq!(align_to_constant_boundary(192), 256);
    }

    #[test]
    fn constant_buffer_writes_at_aligned_offsets() {
        let mut ctx = context();
        let buffer = ConstantBuffer::new(&mut ctx, 64, 4, 0, "test").unwrap();
        assert_eq!(buffer.aligned_stride(), 256);

        buffer.set_data(&mut ctx, &[0xAB; 64], 2).unwrap();
        let frame = ctx.frame_index();
        let contents = headless(&ctx).buffer_contents(buffer.allocation(frame)).unwrap();
        assert_eq!(&contents[512..512 + 64], &[0xAB; 64]);
        assert!(contents[..512].iter().all(|&b| b == 0));
    }

    #[test]
    fn constant_buffer_writes_only_current_frame_allocation() {
        let mut ctx = context();
        let buffer = ConstantBuffer::new(&mut ctx, 16, 1, 0, "test").unwrap();
        ctx.begin_frame().unwrap();
        buffer.set_data(&mut ctx, &[0xCD; 16], 0).unwrap();

        let current = ctx.frame_index();
        for frame in 0..FRAME_COUNT {
            let contents = headless(&ctx).buffer_contents(buffer.allocation(frame)).unwrap();
            if frame == current {
                assert_eq!(&contents[..16], &[0xCD; 16]);
            } else {
                assert!(contents.iter().all(|&b| b == 0), "frame {frame} was written");
            }
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn constant_buffer_index_overflow_is_fatal() {
        let mut ctx = context();
        let buffer = ConstantBuffer::new(&mut ctx, 64, 2, 0, "test").unwrap();
        let _ = buffer.set_data(&mut ctx, &[0; 64], 2);
    }

    #[test]
    fn constant_buffer_rejected_write_touches_no_memory() {
        let mut ctx = context();
        let buffer = ConstantBuffer::new(&mut ctx, 64, 2, 0, "test").unwrap();
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = buffer.set_data(&mut ctx, &[0xFF; 64], 5);
        }));
        assert!(panicked.is_err());
        for frame in 0..FRAME_COUNT {
            let contents = headless(&ctx).buffer_contents(buffer.allocation(frame)).unwrap();
            assert!(contents.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn vertex_buffer_upload_records_copy_and_barriers() {
        let mut ctx = context();
        let list = ctx.device_mut().begin_command_list().unwrap();
        let _buffer = VertexBuffer::new(&mut ctx, list, &[1, 2, 3, 4, 5, 6, 7, 8], 4, "quad").unwrap();
        ctx.device_mut().submit(list).unwrap();

        let device = headless(&ctx);
        let commands = device.submitted_commands(0);
        let copies = commands
            .iter()
            .filter(|c| matches!(c, crate::render::backends::headless::RecordedCommand::CopyBuffer { .. }))
            .count();
        assert_eq!(copies, 1);
        let barriers = commands
            .iter()
            .filter(|c| matches!(c, crate::render::backends::headless::RecordedCommand::ResourceBarrier { .. }))
            .count();
        // Common -> CopyDest -> VertexAndConstantBuffer
        assert_eq!(barriers, 2);
    }

    #[test]
    fn structured_buffer_allocates_one_srv_per_frame() {
        let mut ctx = context();
        let before = ctx.srv_heap().live();
        let mut buffer = StructuredBuffer::new(&mut ctx, 32, 8, 1, "lights").unwrap();
        assert_eq!(ctx.srv_heap().live(), before + FRAME_COUNT as u32);
        buffer.release(&mut ctx);
        assert_eq!(ctx.srv_heap().live(), before);
    }
}
