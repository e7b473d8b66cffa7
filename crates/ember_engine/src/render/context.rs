//! The graphics context: frame tracking, descriptor heaps, deferred release
//!
//! One [`GraphicsContext`] exists per renderer instance and owns everything
//! with process-wide lifetime in the rendering core: the backend device, the
//! descriptor heaps and the deferred-release queues. There is no global
//! state; independent contexts (and therefore renderers) can coexist, which
//! is what lets the frame graph run under test without a GPU.
//!
//! All methods must be called from the single rendering thread.

use crate::render::api::{BackendKind, CommandList, GpuAllocation, PipelineHandle, RenderDevice};
use crate::render::backends;
use crate::render::descriptor::{DescriptorHeap, DescriptorHeapKind};
use crate::render::RenderResult;

/// Number of frames in flight
///
/// Per-frame resources (constant buffers, attachment sets, release queues)
/// are replicated this many times so the CPU can record frame N while the
/// GPU still consumes frames N-1 and N-2.
pub const FRAME_COUNT: usize = 3;

/// Default SRV heap capacity
pub const SRV_HEAP_CAPACITY: u32 = 4096;
/// Default RTV heap capacity
pub const RTV_HEAP_CAPACITY: u32 = 512;
/// Default DSV heap capacity
pub const DSV_HEAP_CAPACITY: u32 = 256;

enum RetiredResource {
    Allocation(GpuAllocation),
    Pipeline(PipelineHandle),
}

/// Per-renderer graphics context
pub struct GraphicsContext {
    pub(crate) device: Box<dyn RenderDevice>,
    pub(crate) srv_heap: DescriptorHeap,
    pub(crate) rtv_heap: DescriptorHeap,
    pub(crate) dsv_heap: DescriptorHeap,
    frame_index: usize,
    deferred: [Vec<RetiredResource>; FRAME_COUNT],
}

impl GraphicsContext {
    /// Create a context driving the given backend
    pub fn new(kind: BackendKind) -> RenderResult<Self> {
        let device = backends::create_device(kind)?;
        log::info!("graphics context created ({kind:?} backend, {FRAME_COUNT} frames in flight)");
        Ok(Self {
            device,
            srv_heap: DescriptorHeap::new(DescriptorHeapKind::Srv, SRV_HEAP_CAPACITY),
            rtv_heap: DescriptorHeap::new(DescriptorHeapKind::Rtv, RTV_HEAP_CAPACITY),
            dsv_heap: DescriptorHeap::new(DescriptorHeapKind::Dsv, DSV_HEAP_CAPACITY),
            frame_index: 0,
            deferred: std::array::from_fn(|_| Vec::new()),
        })
    }

    /// Index of the in-flight frame currently being recorded
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Advance to the next frame and open its command list
    ///
    /// Flushes the deferred releases enqueued when this frame slot was last
    /// active: by the time the slot comes around again, and the device has
    /// recycled its command list, the GPU cannot be using those resources.
    /// The flush happens after the list is opened because opening is where
    /// the device blocks on the slot still being in flight.
    pub fn begin_frame(&mut self) -> RenderResult<CommandList> {
        self.frame_index = (self.frame_index + 1) % FRAME_COUNT;
        let list = self.device.begin_command_list()?;
        self.flush_deferred(self.frame_index);
        Ok(list)
    }

    /// Enqueue a resource for release once the GPU can no longer use it
    pub fn deferred_release(&mut self, allocation: GpuAllocation) {
        self.deferred[self.frame_index].push(RetiredResource::Allocation(allocation));
    }

    /// Enqueue a retired pipeline for release (hot-reload replacement path)
    pub fn deferred_release_pipeline(&mut self, pipeline: PipelineHandle) {
        self.deferred[self.frame_index].push(RetiredResource::Pipeline(pipeline));
    }

    fn flush_deferred(&mut self, slot: usize) {
        for retired in std::mem::take(&mut self.deferred[slot]) {
            match retired {
                RetiredResource::Allocation(allocation) => self.device.destroy_resource(allocation),
                RetiredResource::Pipeline(pipeline) => self.device.destroy_pipeline(pipeline),
            }
        }
    }

    /// The backend device
    pub fn device(&self) -> &dyn RenderDevice {
        self.device.as_ref()
    }

    /// The backend device, mutably
    pub fn device_mut(&mut self) -> &mut dyn RenderDevice {
        self.device.as_mut()
    }

    /// Shader-resource-view heap
    pub fn srv_heap(&self) -> &DescriptorHeap {
        &self.srv_heap
    }

    /// Render-target-view heap
    pub fn rtv_heap(&self) -> &DescriptorHeap {
        &self.rtv_heap
    }

    /// Depth-stencil-view heap
    pub fn dsv_heap(&self) -> &DescriptorHeap {
        &self.dsv_heap
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.device.wait_idle();
        for slot in 0..FRAME_COUNT {
            self.flush_deferred(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{BufferDesc, BufferUsage, MemoryLocation};
    use crate::render::backends::headless::HeadlessDevice;

    fn headless(ctx: &GraphicsContext) -> &HeadlessDevice {
        ctx.device().as_any().downcast_ref().expect("headless backend")
    }

    fn make_buffer(ctx: &mut GraphicsContext) -> GpuAllocation {
        ctx.device_mut()
            .create_buffer(&BufferDesc {
                size: 64,
                usage: BufferUsage::Constant,
                memory: MemoryLocation::Upload,
                name: "test".into(),
            })
            .unwrap()
    }

    #[test]
    fn no_backend_selected_is_an_error() {
        assert!(matches!(
            GraphicsContext::new(BackendKind::None),
            Err(crate::render::RenderError::UnsupportedBackend)
        ));
    }

    #[test]
    fn frame_index_wraps_at_frame_count() {
        let mut ctx = GraphicsContext::new(BackendKind::Headless).unwrap();
        let start = ctx.frame_index();
        for _ in 0..FRAME_COUNT {
            ctx.begin_frame().unwrap();
        }
        assert_eq!(ctx.frame_index(), start);
    }

    #[test]
    fn deferred_release_destroys_after_frame_count_frames() {
        let mut ctx = GraphicsContext::new(BackendKind::Headless).unwrap();
        let allocation = make_buffer(&mut ctx);
        ctx.deferred_release(allocation);
        assert!(headless(&ctx).is_live(allocation));

        // Not destroyed while the slot could still be in flight
        for _ in 0..FRAME_COUNT - 1 {
            ctx.begin_frame().unwrap();
            assert!(headless(&ctx).is_live(allocation));
        }

        // Destroyed exactly when its frame slot is reused
        ctx.begin_frame().unwrap();
        assert!(!headless(&ctx).is_live(allocation));
    }
}
