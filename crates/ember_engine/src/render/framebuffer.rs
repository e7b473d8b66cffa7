//! Multi-attachment render target with per-in-flight-frame resources
//!
//! Each attachment is replicated once per in-flight frame and carries a
//! [`ResourceState`] tag tracking its last recorded usage. Binding and
//! transitioning consult the tag and emit barriers only when the state
//! actually changes; the tag therefore always mirrors the command stream.

use crate::render::api::{AttachmentDesc, CommandList, GpuAllocation, TextureFormat, ViewDesc, ViewKind};
use crate::render::context::{GraphicsContext, FRAME_COUNT};
use crate::render::descriptor::DescriptorHandle;
use crate::render::state::{ResourceBarrier, ResourceState};
use crate::render::api::ClearFlags;

/// Largest accepted framebuffer dimension
pub const MAX_FRAMEBUFFER_SIZE: u32 = 8192;

/// Immutable description of a framebuffer
///
/// Changes only through [`Framebuffer::resize`], which rebuilds every
/// attachment.
#[derive(Debug, Clone)]
pub struct FramebufferSpecification {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// MSAA sample count
    pub samples: u32,
    /// Ordered attachment formats; at most one depth format
    pub attachments: Vec<TextureFormat>,
    /// Clear color for all color attachments
    pub clear_color: [f32; 4],
    /// Clear depth value
    pub clear_depth: f32,
    /// Clear stencil value
    pub clear_stencil: u8,
    /// Debug name
    pub name: String,
}

impl Default for FramebufferSpecification {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            samples: 1,
            attachments: vec![TextureFormat::Rgba8Unorm],
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            clear_stencil: 0,
            name: String::from("framebuffer"),
        }
    }
}

struct AttachmentFrame {
    allocation: GpuAllocation,
    shader_view: DescriptorHandle,
    target_view: DescriptorHandle,
    state: ResourceState,
}

/// A render target with one attachment set per in-flight frame
pub struct Framebuffer {
    spec: FramebufferSpecification,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    color_frames: [Vec<AttachmentFrame>; FRAME_COUNT],
    depth_frames: [Option<AttachmentFrame>; FRAME_COUNT],
}

impl Framebuffer {
    /// Create a framebuffer and allocate all per-frame attachments
    ///
    /// # Panics
    ///
    /// Attachment allocation failure is unrecoverable GPU/driver state and
    /// aborts with a diagnostic.
    pub fn new(ctx: &mut GraphicsContext, spec: FramebufferSpecification) -> Self {
        let color_formats: Vec<_> =
            spec.attachments.iter().copied().filter(|f| !f.is_depth() && *f != TextureFormat::None).collect();
        let depth_format = spec.attachments.iter().copied().find(|f| f.is_depth());

        let mut framebuffer = Self {
            spec,
            color_formats,
            depth_format,
            color_frames: std::array::from_fn(|_| Vec::new()),
            depth_frames: std::array::from_fn(|_| None),
        };
        framebuffer.invalidate(ctx);
        framebuffer
    }

    /// Allocate attachment resources for every frame slot at the current size
    fn invalidate(&mut self, ctx: &mut GraphicsContext) {
        for frame in 0..FRAME_COUNT {
            for (index, format) in self.color_formats.iter().enumerate() {
                let attachment = Self::create_attachment(
                    ctx,
                    &self.spec,
                    *format,
                    ResourceState::RenderTarget,
                    &format!("{} color {index} [frame {frame}]", self.spec.name),
                );
                self.color_frames[frame].push(attachment);
            }
            if let Some(format) = self.depth_format {
                let attachment = Self::create_attachment(
                    ctx,
                    &self.spec,
                    format,
                    ResourceState::DepthWrite,
                    &format!("{} depth [frame {frame}]", self.spec.name),
                );
                self.depth_frames[frame] = Some(attachment);
            }
        }
    }

    fn create_attachment(
        ctx: &mut GraphicsContext,
        spec: &FramebufferSpecification,
        format: TextureFormat,
        initial_state: ResourceState,
        name: &str,
    ) -> AttachmentFrame {
        let desc = AttachmentDesc {
            width: spec.width,
            height: spec.height,
            samples: spec.samples,
            format,
            clear_color: spec.clear_color,
            clear_depth: spec.clear_depth,
            clear_stencil: spec.clear_stencil,
            initial_state,
            name: name.to_owned(),
        };
        let allocation = match ctx.device.create_attachment(&desc) {
            Ok(allocation) => allocation,
            Err(err) => panic!("framebuffer '{}' invalidation failed: {err}", spec.name),
        };

        let (shader_view, target_view) = (|| {
            let shader_view = ctx.srv_heap.allocate()?;
            ctx.device.create_view(
                allocation,
                ViewDesc { kind: ViewKind::ShaderResource, index: shader_view.index() },
            )?;
            let target_view = if format.is_depth() {
                let view = ctx.dsv_heap.allocate()?;
                ctx.device
                    .create_view(allocation, ViewDesc { kind: ViewKind::DepthStencil, index: view.index() })?;
                view
            } else {
                let view = ctx.rtv_heap.allocate()?;
                ctx.device
                    .create_view(allocation, ViewDesc { kind: ViewKind::RenderTarget, index: view.index() })?;
                view
            };
            Ok::<_, crate::render::RenderError>((shader_view, target_view))
        })()
        .unwrap_or_else(|err| panic!("framebuffer '{}' invalidation failed: {err}", spec.name));

        AttachmentFrame { allocation, shader_view, target_view, state: initial_state }
    }

    /// Bind as the active render target for the current frame
    ///
    /// Attachments still tagged as shader input transition back to their
    /// writable state first; a barrier is recorded only when a transition is
    /// actually needed.
    pub fn bind(&mut self, ctx: &mut GraphicsContext, list: CommandList) {
        let frame = ctx.frame_index();
        let mut barriers = Vec::new();

        for attachment in &mut self.color_frames[frame] {
            if attachment.state == ResourceState::PixelShaderResource {
                barriers.push(ResourceBarrier::transition(
                    attachment.allocation,
                    attachment.state,
                    ResourceState::RenderTarget,
                ));
                attachment.state = ResourceState::RenderTarget;
            }
        }
        if let Some(depth) = &mut self.depth_frames[frame] {
            if depth.state == ResourceState::PixelShaderResource {
                barriers.push(ResourceBarrier::transition(
                    depth.allocation,
                    depth.state,
                    ResourceState::DepthWrite,
                ));
                depth.state = ResourceState::DepthWrite;
            }
        }
        if !barriers.is_empty() {
            ctx.device.cmd_resource_barrier(list, &barriers);
        }

        let colors: Vec<u32> = self.color_frames[frame].iter().map(|a| a.target_view.index()).collect();
        let depth = self.depth_frames[frame].as_ref().map(|a| a.target_view.index());
        ctx.device.cmd_set_render_targets(list, &colors, depth, self.spec.width, self.spec.height);
    }

    /// Transition all attachments of the current frame to shader input
    ///
    /// Called by a later pass that samples this framebuffer as a texture.
    /// Attachments already readable are skipped, so repeated transitions
    /// emit no redundant barriers.
    pub fn transition_to_shader_resource(&mut self, ctx: &mut GraphicsContext, list: CommandList) {
        let frame = ctx.frame_index();
        let mut barriers = Vec::new();

        for attachment in &mut self.color_frames[frame] {
            if attachment.state != ResourceState::PixelShaderResource {
                barriers.push(ResourceBarrier::transition(
                    attachment.allocation,
                    attachment.state,
                    ResourceState::PixelShaderResource,
                ));
                attachment.state = ResourceState::PixelShaderResource;
            }
        }
        if let Some(depth) = &mut self.depth_frames[frame] {
            if depth.state != ResourceState::PixelShaderResource {
                barriers.push(ResourceBarrier::transition(
                    depth.allocation,
                    depth.state,
                    ResourceState::PixelShaderResource,
                ));
                depth.state = ResourceState::PixelShaderResource;
            }
        }
        if !barriers.is_empty() {
            ctx.device.cmd_resource_barrier(list, &barriers);
        }
    }

    /// Clear every color view and the depth-stencil view to configured values
    ///
    /// Only valid while the attachments are in a writable state.
    pub fn clear(&mut self, ctx: &mut GraphicsContext, list: CommandList) {
        let frame = ctx.frame_index();
        for attachment in &self.color_frames[frame] {
            debug_assert!(attachment.state.is_writable(), "cleared a non-writable color attachment");
            ctx.device.cmd_clear_render_target(list, attachment.target_view.index(), self.spec.clear_color);
        }
        if let Some(depth) = &self.depth_frames[frame] {
            debug_assert!(depth.state.is_writable(), "cleared a non-writable depth attachment");
            ctx.device.cmd_clear_depth_stencil(
                list,
                depth.target_view.index(),
                ClearFlags::DEPTH | ClearFlags::STENCIL,
                self.spec.clear_depth,
                self.spec.clear_stencil,
            );
        }
    }

    /// Bind a color attachment's SRV at a shader parameter slot
    pub fn bind_color_attachment(&self, ctx: &mut GraphicsContext, list: CommandList, index: usize, slot: u32) {
        let frame = ctx.frame_index();
        ctx.device.cmd_bind_shader_resource(list, self.color_frames[frame][index].shader_view.index(), slot);
    }

    /// Bind the depth attachment's SRV at a shader parameter slot
    pub fn bind_depth_attachment(&self, ctx: &mut GraphicsContext, list: CommandList, slot: u32) {
        let frame = ctx.frame_index();
        if let Some(depth) = &self.depth_frames[frame] {
            ctx.device.cmd_bind_shader_resource(list, depth.shader_view.index(), slot);
        }
    }

    /// Resize the framebuffer, releasing and recreating every attachment
    ///
    /// Out-of-range dimensions are logged and ignored; the specification and
    /// the existing attachments stay untouched.
    pub fn resize(&mut self, ctx: &mut GraphicsContext, width: u32, height: u32) {
        if width == 0 || height == 0 || width > MAX_FRAMEBUFFER_SIZE || height > MAX_FRAMEBUFFER_SIZE {
            log::warn!("attempted to resize framebuffer '{}' to {width}x{height}", self.spec.name);
            return;
        }

        self.release_attachments(ctx);
        self.spec.width = width;
        self.spec.height = height;
        self.invalidate(ctx);
    }

    /// Release every attachment across all frame slots
    ///
    /// Allocations go through the deferred-release queue; descriptor slots
    /// return to their heaps immediately.
    pub fn release_attachments(&mut self, ctx: &mut GraphicsContext) {
        for frames in &mut self.color_frames {
            for attachment in frames.drain(..) {
                ctx.deferred_release(attachment.allocation);
                ctx.srv_heap.free(attachment.shader_view);
                ctx.rtv_heap.free(attachment.target_view);
            }
        }
        for slot in &mut self.depth_frames {
            if let Some(attachment) = slot.take() {
                ctx.deferred_release(attachment.allocation);
                ctx.srv_heap.free(attachment.shader_view);
                ctx.dsv_heap.free(attachment.target_view);
            }
        }
    }

    /// The framebuffer's specification
    pub fn specification(&self) -> &FramebufferSpecification {
        &self.spec
    }

    /// Number of color attachments
    pub fn color_attachment_count(&self) -> usize {
        self.color_formats.len()
    }

    /// Whether a depth attachment exists
    pub fn has_depth_attachment(&self) -> bool {
        self.depth_format.is_some()
    }

    /// State tag of a color attachment in a frame slot
    pub fn color_attachment_state(&self, frame: usize, index: usize) -> ResourceState {
        self.color_frames[frame][index].state
    }

    /// State tag of the depth attachment in a frame slot, if present
    pub fn depth_attachment_state(&self, frame: usize) -> Option<ResourceState> {
        self.depth_frames[frame].as_ref().map(|a| a.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::BackendKind;
    use crate::render::backends::headless::{HeadlessDevice, RecordedCommand};

    fn context() -> GraphicsContext {
        GraphicsContext::new(BackendKind::Headless).unwrap()
    }

    fn headless(ctx: &GraphicsContext) -> &HeadlessDevice {
        ctx.device().as_any().downcast_ref().expect("headless backend")
    }

    fn spec() -> FramebufferSpecification {
        FramebufferSpecification {
            width: 256,
            height: 256,
            attachments: vec![TextureFormat::Rgba8Unorm, TextureFormat::Depth24Stencil8],
            name: "test".into(),
            ..Default::default()
        }
    }

    fn barrier_count(ctx: &GraphicsContext, list: crate::render::api::CommandList) -> usize {
        headless(ctx)
            .recorded_commands(list)
            .iter()
            .filter(|c| matches!(c, RecordedCommand::ResourceBarrier { .. }))
            .count()
    }

    #[test]
    fn attachments_start_in_writable_state() {
        let mut ctx = context();
        let framebuffer = Framebuffer::new(&mut ctx, spec());
        for frame in 0..FRAME_COUNT {
            assert_eq!(framebuffer.color_attachment_state(frame, 0), ResourceState::RenderTarget);
            assert_eq!(framebuffer.depth_attachment_state(frame), Some(ResourceState::DepthWrite));
        }
    }

    #[test]
    fn bind_from_writable_state_emits_no_barrier() {
        let mut ctx = context();
        let mut framebuffer = Framebuffer::new(&mut ctx, spec());
        let list = ctx.device_mut().begin_command_list().unwrap();
        framebuffer.bind(&mut ctx, list);
        assert_eq!(barrier_count(&ctx, list), 0);
    }

    #[test]
    fn transition_then_bind_emits_one_barrier_each_way() {
        let mut ctx = context();
        let mut framebuffer = Framebuffer::new(&mut ctx, spec());
        let list = ctx.device_mut().begin_command_list().unwrap();
        let frame = ctx.frame_index();

        framebuffer.transition_to_shader_resource(&mut ctx, list);
        // color + depth
        assert_eq!(barrier_count(&ctx, list), 2);
        assert_eq!(framebuffer.color_attachment_state(frame, 0), ResourceState::PixelShaderResource);
        assert_eq!(framebuffer.depth_attachment_state(frame), Some(ResourceState::PixelShaderResource));

        // Redundant transition: state unchanged, no new barriers
        framebuffer.transition_to_shader_resource(&mut ctx, list);
        assert_eq!(barrier_count(&ctx, list), 2);

        framebuffer.bind(&mut ctx, list);
        assert_eq!(barrier_count(&ctx, list), 4);
        assert_eq!(framebuffer.color_attachment_state(frame, 0), ResourceState::RenderTarget);
        assert_eq!(framebuffer.depth_attachment_state(frame), Some(ResourceState::DepthWrite));

        // Rebind while writable: no new barriers
        framebuffer.bind(&mut ctx, list);
        assert_eq!(barrier_count(&ctx, list), 4);
    }

    #[test]
    fn invalid_resize_is_a_logged_no_op() {
        let mut ctx = context();
        let mut framebuffer = Framebuffer::new(&mut ctx, spec());
        let resources_before = headless(&ctx).resource_count();

        framebuffer.resize(&mut ctx, 0, 256);
        framebuffer.resize(&mut ctx, 256, 0);
        framebuffer.resize(&mut ctx, MAX_FRAMEBUFFER_SIZE + 1, 256);
        framebuffer.resize(&mut ctx, 256, MAX_FRAMEBUFFER_SIZE + 1);

        assert_eq!(framebuffer.specification().width, 256);
        assert_eq!(framebuffer.specification().height, 256);
        assert_eq!(headless(&ctx).resource_count(), resources_before);
    }

    #[test]
    fn valid_resize_recreates_all_per_frame_attachments() {
        let mut ctx = context();
        let mut framebuffer = Framebuffer::new(&mut ctx, spec());
        // 1 color + 1 depth, per in-flight frame
        let expected = FRAME_COUNT * 2;
        assert_eq!(headless(&ctx).resource_count(), expected);

        framebuffer.resize(&mut ctx, 512, 512);
        assert_eq!(framebuffer.specification().width, 512);

        // Old attachments are queued, not destroyed yet
        assert_eq!(headless(&ctx).resource_count(), expected * 2);

        // After a full frame cycle the old set is gone
        for _ in 0..FRAME_COUNT {
            ctx.begin_frame().unwrap();
        }
        assert_eq!(headless(&ctx).resource_count(), expected);
    }

    #[test]
    fn resize_returns_descriptor_slots() {
        let mut ctx = context();
        let mut framebuffer = Framebuffer::new(&mut ctx, spec());
        let srv_live = ctx.srv_heap().live();
        let rtv_live = ctx.rtv_heap().live();
        let dsv_live = ctx.dsv_heap().live();

        framebuffer.resize(&mut ctx, 64, 64);
        assert_eq!(ctx.srv_heap().live(), srv_live);
        assert_eq!(ctx.rtv_heap().live(), rtv_live);
        assert_eq!(ctx.dsv_heap().live(), dsv_live);
    }
}
