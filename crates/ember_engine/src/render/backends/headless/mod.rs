//! CPU-side recording backend
//!
//! Implements the full [`RenderDevice`] contract without touching a GPU:
//! buffers are byte vectors, attachments are descriptors, and every command
//! is recorded verbatim. Tests and headless tools downcast through
//! [`RenderDevice::as_any`] to inspect what a frame actually recorded:
//! barrier placement, pass ordering, draw counts and buffer contents.

use std::any::Any;
use std::collections::HashMap;

use slotmap::SlotMap;

use crate::render::api::{
    AttachmentDesc, BackendKind, BufferDesc, ClearFlags, CommandList, GpuAllocation, PipelineHandle,
    RenderDevice, ViewDesc, ViewKind,
};
use crate::render::descriptor::DescriptorHeapKind;
use crate::render::pipeline::PipelineSpecification;
use crate::render::state::{ResourceBarrier, ResourceState};
use crate::render::{RenderError, RenderResult};

/// One recorded command, mirroring the `cmd_*` surface of [`RenderDevice`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// A state-transition barrier
    ResourceBarrier {
        /// Transitioned resource
        resource: GpuAllocation,
        /// Previous state
        before: ResourceState,
        /// New state
        after: ResourceState,
    },
    /// Render targets + viewport were set
    SetRenderTargets {
        /// RTV heap slots
        colors: Vec<u32>,
        /// DSV heap slot
        depth: Option<u32>,
        /// Viewport width
        width: u32,
        /// Viewport height
        height: u32,
    },
    /// A color target was cleared
    ClearRenderTarget {
        /// RTV heap slot
        rtv: u32,
        /// Clear color
        color: [f32; 4],
    },
    /// The depth-stencil target was cleared
    ClearDepthStencil {
        /// DSV heap slot
        dsv: u32,
        /// Cleared aspects
        flags: ClearFlags,
        /// Clear depth
        depth: f32,
        /// Clear stencil
        stencil: u8,
    },
    /// A pipeline was bound
    BindPipeline {
        /// Pipeline handle
        pipeline: PipelineHandle,
        /// Shader name the pipeline compiled from
        name: String,
    },
    /// A vertex buffer was bound
    BindVertexBuffer {
        /// Buffer allocation
        buffer: GpuAllocation,
        /// Vertex stride
        stride: u32,
    },
    /// An index buffer was bound
    BindIndexBuffer {
        /// Buffer allocation
        buffer: GpuAllocation,
    },
    /// A constant-buffer range was bound
    BindConstantBuffer {
        /// Buffer allocation
        buffer: GpuAllocation,
        /// Byte offset of the bound element
        offset: u64,
        /// Parameter slot
        slot: u32,
    },
    /// An SRV slot was bound
    BindShaderResource {
        /// SRV heap slot
        srv: u32,
        /// Parameter slot
        slot: u32,
    },
    /// Immediate constants were set
    SetGraphicsConstants {
        /// Parameter slot
        slot: u32,
        /// Payload size in bytes
        size: usize,
    },
    /// A buffer copy was recorded (and applied eagerly)
    CopyBuffer {
        /// Source allocation
        src: GpuAllocation,
        /// Destination allocation
        dst: GpuAllocation,
        /// Copied byte count
        size: u64,
    },
    /// A non-indexed draw
    Draw {
        /// Vertex count
        vertex_count: u32,
    },
    /// An indexed draw
    DrawIndexed {
        /// Index count
        index_count: u32,
    },
}

enum HeadlessResource {
    Buffer { data: Vec<u8> },
    Attachment { desc: AttachmentDesc },
}

struct HeadlessPipeline {
    name: String,
}

#[derive(Default)]
struct RecordedList {
    commands: Vec<RecordedCommand>,
    open: bool,
}

/// Recording implementation of [`RenderDevice`]
#[derive(Default)]
pub struct HeadlessDevice {
    resources: SlotMap<GpuAllocation, HeadlessResource>,
    pipelines: SlotMap<PipelineHandle, HeadlessPipeline>,
    views: HashMap<(DescriptorHeapKind, u32), GpuAllocation>,
    lists: Vec<RecordedList>,
    submitted: Vec<Vec<RecordedCommand>>,
}

impl HeadlessDevice {
    /// Create an empty device
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, list: CommandList, command: RecordedCommand) {
        let entry = &mut self.lists[list.index()];
        debug_assert!(entry.open, "recorded into a closed command list");
        entry.commands.push(command);
    }

    /// Commands recorded so far into a still-open list
    pub fn recorded_commands(&self, list: CommandList) -> &[RecordedCommand] {
        &self.lists[list.index()].commands
    }

    /// Commands of the n-th submitted list
    pub fn submitted_commands(&self, submission: usize) -> &[RecordedCommand] {
        &self.submitted[submission]
    }

    /// Number of submissions so far
    pub fn submission_count(&self) -> usize {
        self.submitted.len()
    }

    /// Whether an allocation still exists
    pub fn is_live(&self, allocation: GpuAllocation) -> bool {
        self.resources.contains_key(allocation)
    }

    /// Number of live resources
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Number of live pipelines
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Contents of a buffer allocation
    pub fn buffer_contents(&self, allocation: GpuAllocation) -> Option<&[u8]> {
        match self.resources.get(allocation) {
            Some(HeadlessResource::Buffer { data }) => Some(data),
            _ => None,
        }
    }

    /// The allocation a view slot points at
    pub fn view_target(&self, kind: DescriptorHeapKind, index: u32) -> Option<GpuAllocation> {
        self.views.get(&(kind, index)).copied()
    }

    /// Descriptor an attachment was created with
    pub fn attachment_desc(&self, allocation: GpuAllocation) -> Option<&AttachmentDesc> {
        match self.resources.get(allocation) {
            Some(HeadlessResource::Attachment { desc }) => Some(desc),
            _ => None,
        }
    }
}

fn heap_of(kind: ViewKind) -> DescriptorHeapKind {
    match kind {
        ViewKind::ShaderResource | ViewKind::StructuredBuffer => DescriptorHeapKind::Srv,
        ViewKind::RenderTarget => DescriptorHeapKind::Rtv,
        ViewKind::DepthStencil => DescriptorHeapKind::Dsv,
    }
}

impl RenderDevice for HeadlessDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<GpuAllocation> {
        Ok(self.resources.insert(HeadlessResource::Buffer { data: vec![0; desc.size as usize] }))
    }

    fn create_attachment(&mut self, desc: &AttachmentDesc) -> RenderResult<GpuAllocation> {
        Ok(self.resources.insert(HeadlessResource::Attachment { desc: desc.clone() }))
    }

    fn destroy_resource(&mut self, allocation: GpuAllocation) {
        if self.resources.remove(allocation).is_none() {
            log::warn!("destroyed an unknown allocation: {allocation:?}");
        }
    }

    fn write_buffer(&mut self, allocation: GpuAllocation, offset: u64, data: &[u8]) -> RenderResult<()> {
        match self.resources.get_mut(allocation) {
            Some(HeadlessResource::Buffer { data: contents }) => {
                let offset = offset as usize;
                let end = offset + data.len();
                if end > contents.len() {
                    return Err(RenderError::InvalidOperation(format!(
                        "buffer write of {} bytes at offset {offset} exceeds size {}",
                        data.len(),
                        contents.len()
                    )));
                }
                contents[offset..end].copy_from_slice(data);
                Ok(())
            }
            Some(HeadlessResource::Attachment { .. }) => {
                Err(RenderError::InvalidOperation("cannot write an attachment as a buffer".into()))
            }
            None => Err(RenderError::InvalidOperation("write to an unknown allocation".into())),
        }
    }

    fn create_view(&mut self, allocation: GpuAllocation, view: ViewDesc) -> RenderResult<()> {
        if !self.resources.contains_key(allocation) {
            return Err(RenderError::InvalidOperation("view of an unknown allocation".into()));
        }
        self.views.insert((heap_of(view.kind), view.index), allocation);
        Ok(())
    }

    fn create_pipeline(
        &mut self,
        name: &str,
        bytecode: &[u8],
        _spec: &PipelineSpecification,
    ) -> RenderResult<PipelineHandle> {
        if bytecode.is_empty() {
            return Err(RenderError::ShaderCompilation {
                path: name.to_owned(),
                message: "empty shader bytecode".into(),
            });
        }
        Ok(self.pipelines.insert(HeadlessPipeline { name: name.to_owned() }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.pipelines.remove(pipeline).is_none() {
            log::warn!("destroyed an unknown pipeline: {pipeline:?}");
        }
    }

    fn begin_command_list(&mut self) -> RenderResult<CommandList> {
        let index = self.lists.len() as u32;
        self.lists.push(RecordedList { commands: Vec::new(), open: true });
        Ok(CommandList::new(index))
    }

    fn submit(&mut self, list: CommandList) -> RenderResult<()> {
        let entry = &mut self.lists[list.index()];
        if !entry.open {
            return Err(RenderError::InvalidOperation("submitted a closed command list".into()));
        }
        entry.open = false;
        self.submitted.push(entry.commands.clone());
        Ok(())
    }

    fn cmd_resource_barrier(&mut self, list: CommandList, barriers: &[ResourceBarrier]) {
        for barrier in barriers {
            debug_assert!(barrier.is_required(), "redundant barrier recorded");
            self.record(
                list,
                RecordedCommand::ResourceBarrier {
                    resource: barrier.resource,
                    before: barrier.before,
                    after: barrier.after,
                },
            );
        }
    }

    fn cmd_set_render_targets(
        &mut self,
        list: CommandList,
        colors: &[u32],
        depth: Option<u32>,
        width: u32,
        height: u32,
    ) {
        self.record(
            list,
            RecordedCommand::SetRenderTargets { colors: colors.to_vec(), depth, width, height },
        );
    }

    fn cmd_clear_render_target(&mut self, list: CommandList, rtv: u32, color: [f32; 4]) {
        self.record(list, RecordedCommand::ClearRenderTarget { rtv, color });
    }

    fn cmd_clear_depth_stencil(
        &mut self,
        list: CommandList,
        dsv: u32,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) {
        self.record(list, RecordedCommand::ClearDepthStencil { dsv, flags, depth, stencil });
    }

    fn cmd_bind_pipeline(&mut self, list: CommandList, pipeline: PipelineHandle) -> bool {
        let Some(entry) = self.pipelines.get(pipeline) else {
            return false;
        };
        let name = entry.name.clone();
        self.record(list, RecordedCommand::BindPipeline { pipeline, name });
        true
    }

    fn cmd_bind_vertex_buffer(&mut self, list: CommandList, buffer: GpuAllocation, stride: u32) {
        self.record(list, RecordedCommand::BindVertexBuffer { buffer, stride });
    }

    fn cmd_bind_index_buffer(&mut self, list: CommandList, buffer: GpuAllocation) {
        self.record(list, RecordedCommand::BindIndexBuffer { buffer });
    }

    fn cmd_bind_constant_buffer(
        &mut self,
        list: CommandList,
        buffer: GpuAllocation,
        offset: u64,
        slot: u32,
    ) {
        self.record(list, RecordedCommand::BindConstantBuffer { buffer, offset, slot });
    }

    fn cmd_bind_shader_resource(&mut self, list: CommandList, srv: u32, slot: u32) {
        self.record(list, RecordedCommand::BindShaderResource { srv, slot });
    }

    fn cmd_set_graphics_constants(&mut self, list: CommandList, slot: u32, data: &[u8]) {
        self.record(list, RecordedCommand::SetGraphicsConstants { slot, size: data.len() });
    }

    fn cmd_copy_buffer(&mut self, list: CommandList, src: GpuAllocation, dst: GpuAllocation, size: u64) {
        // Applied eagerly so device-local contents stay inspectable
        let bytes = match self.resources.get(src) {
            Some(HeadlessResource::Buffer { data }) => data[..size as usize].to_vec(),
            _ => Vec::new(),
        };
        if let Some(HeadlessResource::Buffer { data }) = self.resources.get_mut(dst) {
            data[..bytes.len()].copy_from_slice(&bytes);
        }
        self.record(list, RecordedCommand::CopyBuffer { src, dst, size });
    }

    fn cmd_draw(&mut self, list: CommandList, vertex_count: u32) {
        self.record(list, RecordedCommand::Draw { vertex_count });
    }

    fn cmd_draw_indexed(&mut self, list: CommandList, index_count: u32) {
        self.record(list, RecordedCommand::DrawIndexed { index_count });
    }

    fn wait_idle(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{BufferUsage, MemoryLocation};

    fn buffer_desc(size: u64) -> BufferDesc {
        BufferDesc { size, usage: BufferUsage::Staging, memory: MemoryLocation::Upload, name: "b".into() }
    }

    #[test]
    fn buffer_writes_are_bounds_checked() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer(&buffer_desc(8)).unwrap();
        assert!(device.write_buffer(buffer, 0, &[1; 8]).is_ok());
        assert!(matches!(
            device.write_buffer(buffer, 4, &[1; 8]),
            Err(RenderError::InvalidOperation(_))
        ));
    }

    #[test]
    fn copy_buffer_applies_eagerly() {
        let mut device = HeadlessDevice::new();
        let src = device.create_buffer(&buffer_desc(4)).unwrap();
        let dst = device.create_buffer(&buffer_desc(4)).unwrap();
        device.write_buffer(src, 0, &[9, 8, 7, 6]).unwrap();

        let list = device.begin_command_list().unwrap();
        device.cmd_copy_buffer(list, src, dst, 4);
        assert_eq!(device.buffer_contents(dst).unwrap(), &[9, 8, 7, 6]);
    }

    #[test]
    fn binding_a_destroyed_pipeline_fails() {
        let mut device = HeadlessDevice::new();
        let pipeline = device
            .create_pipeline("test", b"code", &PipelineSpecification::default())
            .unwrap();
        let list = device.begin_command_list().unwrap();
        assert!(device.cmd_bind_pipeline(list, pipeline));
        device.destroy_pipeline(pipeline);
        assert!(!device.cmd_bind_pipeline(list, pipeline));
    }

    #[test]
    fn double_submit_is_rejected() {
        let mut device = HeadlessDevice::new();
        let list = device.begin_command_list().unwrap();
        assert!(device.submit(list).is_ok());
        assert!(device.submit(list).is_err());
    }
}
