//! Vulkan implementation of the render device trait

#![allow(unsafe_code)]

use std::any::Any;
use std::collections::HashMap;
use std::ffi::CStr;

use ash::vk;
use slotmap::SlotMap;

use crate::render::api::{
    AttachmentDesc, BackendKind, BufferDesc, ClearFlags, CommandList, GpuAllocation, MemoryLocation,
    PipelineHandle, RenderDevice, TextureFormat, ViewDesc, ViewKind,
};
use crate::render::context::FRAME_COUNT;
use crate::render::pipeline::{
    CullMode, DepthFunc, FillMode, PipelineSpecification, PrimitiveTopology, ShaderType,
    VertexAttributeFormat,
};
use crate::render::state::{ResourceBarrier, ResourceState};
use crate::render::{RenderError, RenderResult};

use super::context::VulkanContext;

const CONSTANT_BINDINGS: u32 = 8;
const STORAGE_BINDINGS: u32 = 8;
const SAMPLED_BINDINGS: u32 = 16;
/// Push-constant budget shared by the per-draw transform and material data
const PUSH_CONSTANT_SIZE: u32 = 128;
const DESCRIPTOR_SETS_PER_FRAME: u32 = 4096;

const VERTEX_ENTRY: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"vs_main\0") };
const FRAGMENT_ENTRY: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"fs_main\0") };

struct VkBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: u64,
    host_visible: bool,
}

struct VkImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    aspect: vk::ImageAspectFlags,
    /// Actual layout as last recorded; the first transition leaves UNDEFINED
    layout: vk::ImageLayout,
}

enum VkResource {
    Buffer(VkBuffer),
    Image(VkImage),
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    module: vk::ShaderModule,
}

/// Per-in-flight-frame recording state
struct FrameList {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    descriptor_pool: vk::DescriptorPool,
    pending: bool,
    rendering: bool,
    targets: Vec<u32>,
    depth: Option<u32>,
    extent: vk::Extent2D,
    /// Flat-slot emulation of root constants: slot -> push-constant offset,
    /// reset at every pipeline bind
    constant_offsets: HashMap<u32, u32>,
    constant_cursor: u32,
    bound_constants: [Option<(vk::Buffer, u64)>; CONSTANT_BINDINGS as usize],
    bound_storage: [Option<vk::Buffer>; STORAGE_BINDINGS as usize],
    bound_sampled: [Option<vk::ImageView>; SAMPLED_BINDINGS as usize],
    descriptors_dirty: bool,
}

/// ash-based [`RenderDevice`] implementation
pub struct VulkanDevice {
    resources: SlotMap<GpuAllocation, VkResource>,
    pipelines: SlotMap<PipelineHandle, VkPipeline>,
    views: HashMap<(ViewSpace, u32), GpuAllocation>,
    frames: Vec<FrameList>,
    next_frame: usize,
    command_pool: vk::CommandPool,
    set_layouts: [vk::DescriptorSetLayout; 3],
    pipeline_layout: vk::PipelineLayout,
    sampler: vk::Sampler,
    context: VulkanContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ViewSpace {
    Shader,
    RenderTarget,
    DepthStencil,
}

impl VulkanDevice {
    /// Initialize Vulkan and build the shared recording state
    pub fn new() -> RenderResult<Self> {
        let context = VulkanContext::new()?;
        let device = &context.device;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.queue_family);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| RenderError::InitializationFailed(format!("command pool: {e}")))?;

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(FRAME_COUNT as u32);
        let command_buffers = unsafe { device.allocate_command_buffers(&allocate_info) }
            .map_err(|e| RenderError::InitializationFailed(format!("command buffers: {e}")))?;

        let set_layouts = [
            Self::create_set_layout(device, vk::DescriptorType::UNIFORM_BUFFER, CONSTANT_BINDINGS)?,
            Self::create_set_layout(device, vk::DescriptorType::STORAGE_BUFFER, STORAGE_BINDINGS)?,
            Self::create_set_layout(device, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, SAMPLED_BINDINGS)?,
        ];

        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE)
            .build();
        let push_ranges = [push_range];
        let layout_info =
            vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts).push_constant_ranges(&push_ranges);
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| RenderError::InitializationFailed(format!("pipeline layout: {e}")))?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let sampler = unsafe { device.create_sampler(&sampler_info, None) }
            .map_err(|e| RenderError::InitializationFailed(format!("sampler: {e}")))?;

        let mut frames = Vec::with_capacity(FRAME_COUNT);
        for command_buffer in command_buffers {
            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::builder(), None) }
                .map_err(|e| RenderError::InitializationFailed(format!("fence: {e}")))?;
            let pool_sizes = [
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: DESCRIPTOR_SETS_PER_FRAME * 2,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::STORAGE_BUFFER,
                    descriptor_count: DESCRIPTOR_SETS_PER_FRAME * 2,
                },
                vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    descriptor_count: DESCRIPTOR_SETS_PER_FRAME * 4,
                },
            ];
            let pool_info = vk::DescriptorPoolCreateInfo::builder()
                .max_sets(DESCRIPTOR_SETS_PER_FRAME * 3)
                .pool_sizes(&pool_sizes);
            let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
                .map_err(|e| RenderError::InitializationFailed(format!("descriptor pool: {e}")))?;

            frames.push(FrameList {
                command_buffer,
                fence,
                descriptor_pool,
                pending: false,
                rendering: false,
                targets: Vec::new(),
                depth: None,
                extent: vk::Extent2D { width: 0, height: 0 },
                constant_offsets: HashMap::new(),
                constant_cursor: 0,
                bound_constants: [None; CONSTANT_BINDINGS as usize],
                bound_storage: [None; STORAGE_BINDINGS as usize],
                bound_sampled: [None; SAMPLED_BINDINGS as usize],
                descriptors_dirty: false,
            });
        }

        Ok(Self {
            resources: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            views: HashMap::new(),
            frames,
            next_frame: 0,
            command_pool,
            set_layouts,
            pipeline_layout,
            sampler,
            context,
        })
    }

    fn create_set_layout(
        device: &ash::Device,
        ty: vk::DescriptorType,
        count: u32,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..count)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        unsafe { device.create_descriptor_set_layout(&info, None) }
            .map_err(|e| RenderError::InitializationFailed(format!("descriptor set layout: {e}")))
    }

    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<vk::DeviceMemory> {
        let memory_type_index = self.context.find_memory_type(requirements.memory_type_bits, properties)?;
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        unsafe { self.context.device.allocate_memory(&info, None) }
            .map_err(|e| RenderError::Backend(format!("memory allocation failed: {e}")))
    }

    fn end_rendering_if_active(&mut self, list: CommandList) {
        let frame = &mut self.frames[list.index()];
        if frame.rendering {
            unsafe { self.context.device.cmd_end_rendering(frame.command_buffer) };
            frame.rendering = false;
        }
    }

    /// Allocate, write and bind the descriptor sets for the current tables
    fn flush_descriptors(&mut self, list: CommandList) {
        let frame = &mut self.frames[list.index()];
        if !frame.descriptors_dirty {
            return;
        }
        frame.descriptors_dirty = false;
        let device = &self.context.device;

        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(frame.descriptor_pool)
            .set_layouts(&self.set_layouts);
        let sets = match unsafe { device.allocate_descriptor_sets(&allocate_info) } {
            Ok(sets) => sets,
            Err(err) => {
                log::error!("descriptor set allocation failed: {err}");
                return;
            }
        };

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut writes = Vec::new();

        for (binding, bound) in frame.bound_constants.iter().enumerate() {
            if let Some((buffer, offset)) = bound {
                buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: *buffer,
                    offset: *offset,
                    range: vk::WHOLE_SIZE,
                });
                writes.push((sets[0], binding as u32, vk::DescriptorType::UNIFORM_BUFFER, buffer_infos.len() - 1, usize::MAX));
            }
        }
        for (binding, bound) in frame.bound_storage.iter().enumerate() {
            if let Some(buffer) = bound {
                buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: *buffer,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                });
                writes.push((sets[1], binding as u32, vk::DescriptorType::STORAGE_BUFFER, buffer_infos.len() - 1, usize::MAX));
            }
        }
        for (binding, bound) in frame.bound_sampled.iter().enumerate() {
            if let Some(view) = bound {
                image_infos.push(vk::DescriptorImageInfo {
                    sampler: self.sampler,
                    image_view: *view,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                });
                writes.push((
                    sets[2],
                    binding as u32,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    usize::MAX,
                    image_infos.len() - 1,
                ));
            }
        }

        let write_sets: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|&(set, binding, ty, buffer_index, image_index)| {
                let mut write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(ty);
                if buffer_index != usize::MAX {
                    write = write.buffer_info(std::slice::from_ref(&buffer_infos[buffer_index]));
                } else {
                    write = write.image_info(std::slice::from_ref(&image_infos[image_index]));
                }
                write.build()
            })
            .collect();
        if !write_sets.is_empty() {
            unsafe { device.update_descriptor_sets(&write_sets, &[]) };
        }

        unsafe {
            device.cmd_bind_descriptor_sets(
                frame.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &sets,
                &[],
            );
        }
    }
}

fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::None => vk::Format::UNDEFINED,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::R11G11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        TextureFormat::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

fn vertex_format(format: VertexAttributeFormat) -> vk::Format {
    match format {
        VertexAttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexAttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexAttributeFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

fn state_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::PixelShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        _ => vk::ImageLayout::GENERAL,
    }
}

fn state_access(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Common => vk::AccessFlags::empty(),
        ResourceState::VertexAndConstantBuffer => {
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::UNIFORM_READ
        }
        ResourceState::IndexBuffer => vk::AccessFlags::INDEX_READ,
        ResourceState::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ResourceState::UnorderedAccess => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ResourceState::DepthWrite => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ResourceState::PixelShaderResource => vk::AccessFlags::SHADER_READ,
        ResourceState::CopyDest => vk::AccessFlags::TRANSFER_WRITE,
        ResourceState::CopySource => vk::AccessFlags::TRANSFER_READ,
    }
}

fn state_stage(state: ResourceState, destination: bool) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Common => {
            if destination {
                vk::PipelineStageFlags::BOTTOM_OF_PIPE
            } else {
                vk::PipelineStageFlags::TOP_OF_PIPE
            }
        }
        ResourceState::VertexAndConstantBuffer | ResourceState::IndexBuffer => {
            vk::PipelineStageFlags::VERTEX_INPUT
        }
        ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceState::UnorderedAccess | ResourceState::PixelShaderResource => {
            vk::PipelineStageFlags::FRAGMENT_SHADER
        }
        ResourceState::DepthWrite => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        ResourceState::CopyDest | ResourceState::CopySource => vk::PipelineStageFlags::TRANSFER,
    }
}

impl RenderDevice for VulkanDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<GpuAllocation> {
        let usage = match desc.usage {
            crate::render::api::BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            crate::render::api::BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            crate::render::api::BufferUsage::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
            crate::render::api::BufferUsage::Structured => vk::BufferUsageFlags::STORAGE_BUFFER,
            crate::render::api::BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        };
        let host_visible = desc.memory == MemoryLocation::Upload;
        let properties = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size.max(4))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let device = &self.context.device;
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| RenderError::Backend(format!("buffer creation failed: {e}")))?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = self.allocate_memory(requirements, properties)?;
        unsafe { self.context.device.bind_buffer_memory(buffer, memory, 0) }
            .map_err(|e| RenderError::Backend(format!("buffer bind failed: {e}")))?;

        Ok(self.resources.insert(VkResource::Buffer(VkBuffer {
            buffer,
            memory,
            size: desc.size,
            host_visible,
        })))
    }

    fn create_attachment(&mut self, desc: &AttachmentDesc) -> RenderResult<GpuAllocation> {
        let format = vk_format(desc.format);
        let depth = desc.format.is_depth();
        let usage = if depth {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        };
        let aspect = if depth { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let device = &self.context.device;
        let image = unsafe { device.create_image(&image_info, None) }
            .map_err(|e| RenderError::Backend(format!("attachment creation failed: {e}")))?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = self.allocate_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        unsafe { self.context.device.bind_image_memory(image, memory, 0) }
            .map_err(|e| RenderError::Backend(format!("attachment bind failed: {e}")))?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.context.device.create_image_view(&view_info, None) }
            .map_err(|e| RenderError::Backend(format!("attachment view failed: {e}")))?;

        Ok(self.resources.insert(VkResource::Image(VkImage {
            image,
            memory,
            view,
            aspect,
            layout: vk::ImageLayout::UNDEFINED,
        })))
    }

    fn destroy_resource(&mut self, allocation: GpuAllocation) {
        let Some(resource) = self.resources.remove(allocation) else {
            log::warn!("destroyed an unknown allocation: {allocation:?}");
            return;
        };
        let device = &self.context.device;
        unsafe {
            match resource {
                VkResource::Buffer(buffer) => {
                    device.destroy_buffer(buffer.buffer, None);
                    device.free_memory(buffer.memory, None);
                }
                VkResource::Image(image) => {
                    device.destroy_image_view(image.view, None);
                    device.destroy_image(image.image, None);
                    device.free_memory(image.memory, None);
                }
            }
        }
    }

    fn write_buffer(&mut self, allocation: GpuAllocation, offset: u64, data: &[u8]) -> RenderResult<()> {
        let Some(VkResource::Buffer(buffer)) = self.resources.get(allocation) else {
            return Err(RenderError::InvalidOperation("write to an unknown allocation".into()));
        };
        if !buffer.host_visible {
            return Err(RenderError::InvalidOperation("write to a device-local buffer".into()));
        }
        if offset + data.len() as u64 > buffer.size {
            return Err(RenderError::InvalidOperation("buffer write out of bounds".into()));
        }
        unsafe {
            let mapped = self
                .context
                .device
                .map_memory(buffer.memory, offset, data.len() as u64, vk::MemoryMapFlags::empty())
                .map_err(|e| RenderError::Backend(format!("map failed: {e}")))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast(), data.len());
            self.context.device.unmap_memory(buffer.memory);
        }
        Ok(())
    }

    fn create_view(&mut self, allocation: GpuAllocation, view: ViewDesc) -> RenderResult<()> {
        if !self.resources.contains_key(allocation) {
            return Err(RenderError::InvalidOperation("view of an unknown allocation".into()));
        }
        let space = match view.kind {
            ViewKind::ShaderResource | ViewKind::StructuredBuffer => ViewSpace::Shader,
            ViewKind::RenderTarget => ViewSpace::RenderTarget,
            ViewKind::DepthStencil => ViewSpace::DepthStencil,
        };
        self.views.insert((space, view.index), allocation);
        Ok(())
    }

    fn create_pipeline(
        &mut self,
        name: &str,
        bytecode: &[u8],
        spec: &PipelineSpecification,
    ) -> RenderResult<PipelineHandle> {
        let words = ash::util::read_spv(&mut std::io::Cursor::new(bytecode)).map_err(|e| {
            RenderError::ShaderCompilation { path: name.to_owned(), message: e.to_string() }
        })?;
        let module_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let device = &self.context.device;
        let module = unsafe { device.create_shader_module(&module_info, None) }.map_err(|e| {
            RenderError::ShaderCompilation { path: name.to_owned(), message: e.to_string() }
        })?;

        let mut stages = vec![vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(module)
            .name(VERTEX_ENTRY)
            .build()];
        if spec.shader_type != ShaderType::Vertex {
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(module)
                    .name(FRAGMENT_ENTRY)
                    .build(),
            );
        }

        let binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: spec.vertex_layout.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        let attributes: Vec<vk::VertexInputAttributeDescription> = spec
            .vertex_layout
            .attributes
            .iter()
            .enumerate()
            .map(|(location, attribute)| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format: vertex_format(attribute.format),
                offset: attribute.offset,
            })
            .collect();
        let bindings = [binding];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let topology = match spec.primitive {
            PrimitiveTopology::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::Line => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::Point => vk::PrimitiveTopology::POINT_LIST,
        };
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::builder().topology(topology);

        let viewport_state =
            vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let cull_mode = match spec.cull_mode {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        };
        let polygon_mode = match spec.fill_mode {
            FillMode::Solid => vk::PolygonMode::FILL,
            FillMode::Wireframe => vk::PolygonMode::LINE,
        };
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(polygon_mode)
            .line_width(1.0)
            .cull_mode(cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let compare_op = match spec.depth_func {
            Some(DepthFunc::Less) => vk::CompareOp::LESS,
            Some(DepthFunc::LessEqual) => vk::CompareOp::LESS_OR_EQUAL,
            Some(DepthFunc::Greater) => vk::CompareOp::GREATER,
            Some(DepthFunc::Always) => vk::CompareOp::ALWAYS,
            None => vk::CompareOp::ALWAYS,
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(spec.depth_func.is_some())
            .depth_write_enable(spec.depth_func.is_some())
            .depth_compare_op(compare_op);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = spec
            .output_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::builder()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .blend_enable(false)
                    .build()
            })
            .collect();
        let color_blending =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let color_formats: Vec<vk::Format> = spec.output_formats.iter().map(|f| vk_format(*f)).collect();
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(vk_format(spec.depth_format));

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.context.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None,
            )
        }
        .map_err(|(_, e)| RenderError::ShaderCompilation {
            path: name.to_owned(),
            message: e.to_string(),
        })?;

        Ok(self.pipelines.insert(VkPipeline { pipeline: pipelines[0], module }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        let Some(entry) = self.pipelines.remove(pipeline) else {
            log::warn!("destroyed an unknown pipeline: {pipeline:?}");
            return;
        };
        unsafe {
            self.context.device.destroy_pipeline(entry.pipeline, None);
            self.context.device.destroy_shader_module(entry.module, None);
        }
    }

    fn begin_command_list(&mut self) -> RenderResult<CommandList> {
        let index = self.next_frame;
        self.next_frame = (self.next_frame + 1) % FRAME_COUNT;
        let device = &self.context.device;
        let frame = &mut self.frames[index];

        // The slot may still be in flight; this wait is the engine's implicit
        // backpressure when the CPU runs more than FRAME_COUNT frames ahead
        if frame.pending {
            unsafe {
                device
                    .wait_for_fences(&[frame.fence], true, u64::MAX)
                    .map_err(|e| RenderError::Backend(format!("fence wait failed: {e}")))?;
                device
                    .reset_fences(&[frame.fence])
                    .map_err(|e| RenderError::Backend(format!("fence reset failed: {e}")))?;
            }
            frame.pending = false;
        }

        unsafe {
            device
                .reset_descriptor_pool(frame.descriptor_pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(|e| RenderError::Backend(format!("descriptor pool reset failed: {e}")))?;
            device
                .begin_command_buffer(
                    frame.command_buffer,
                    &vk::CommandBufferBeginInfo::builder()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .map_err(|e| RenderError::Backend(format!("command buffer begin failed: {e}")))?;
        }

        frame.rendering = false;
        frame.targets.clear();
        frame.depth = None;
        frame.constant_offsets.clear();
        frame.constant_cursor = 0;
        frame.bound_constants = [None; CONSTANT_BINDINGS as usize];
        frame.bound_storage = [None; STORAGE_BINDINGS as usize];
        frame.bound_sampled = [None; SAMPLED_BINDINGS as usize];
        frame.descriptors_dirty = false;
        Ok(CommandList::new(index as u32))
    }

    fn submit(&mut self, list: CommandList) -> RenderResult<()> {
        self.end_rendering_if_active(list);
        let frame = &mut self.frames[list.index()];
        let device = &self.context.device;
        unsafe {
            device
                .end_command_buffer(frame.command_buffer)
                .map_err(|e| RenderError::Backend(format!("command buffer end failed: {e}")))?;
            let command_buffers = [frame.command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            device
                .queue_submit(self.context.queue, &[submit_info], frame.fence)
                .map_err(|e| RenderError::Backend(format!("queue submit failed: {e}")))?;
        }
        frame.pending = true;
        Ok(())
    }

    fn cmd_resource_barrier(&mut self, list: CommandList, barriers: &[ResourceBarrier]) {
        self.end_rendering_if_active(list);
        let command_buffer = self.frames[list.index()].command_buffer;

        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();

        for barrier in barriers {
            src_stage |= state_stage(barrier.before, false);
            dst_stage |= state_stage(barrier.after, true);
            match self.resources.get_mut(barrier.resource) {
                Some(VkResource::Image(image)) => {
                    let old_layout = image.layout;
                    let new_layout = state_layout(barrier.after);
                    image.layout = new_layout;
                    image_barriers.push(
                        vk::ImageMemoryBarrier::builder()
                            .src_access_mask(state_access(barrier.before))
                            .dst_access_mask(state_access(barrier.after))
                            .old_layout(old_layout)
                            .new_layout(new_layout)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(image.image)
                            .subresource_range(vk::ImageSubresourceRange {
                                aspect_mask: image.aspect,
                                base_mip_level: 0,
                                level_count: 1,
                                base_array_layer: 0,
                                layer_count: 1,
                            })
                            .build(),
                    );
                }
                Some(VkResource::Buffer(buffer)) => {
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier::builder()
                            .src_access_mask(state_access(barrier.before))
                            .dst_access_mask(state_access(barrier.after))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(buffer.buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE)
                            .build(),
                    );
                }
                None => log::warn!("barrier for an unknown allocation: {:?}", barrier.resource),
            }
        }
        if image_barriers.is_empty() && buffer_barriers.is_empty() {
            return;
        }
        unsafe {
            self.context.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
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
        self.end_rendering_if_active(list);

        let color_views: Vec<vk::ImageView> = colors
            .iter()
            .filter_map(|rtv| {
                let allocation = self.views.get(&(ViewSpace::RenderTarget, *rtv))?;
                match self.resources.get(*allocation) {
                    Some(VkResource::Image(image)) => Some(image.view),
                    _ => None,
                }
            })
            .collect();
        let depth_view = depth.and_then(|dsv| {
            let allocation = self.views.get(&(ViewSpace::DepthStencil, dsv))?;
            match self.resources.get(*allocation) {
                Some(VkResource::Image(image)) => Some(image.view),
                _ => None,
            }
        });

        let extent = vk::Extent2D { width, height };
        let render_area = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent };

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = color_views
            .iter()
            .map(|view| {
                vk::RenderingAttachmentInfo::builder()
                    .image_view(*view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .build()
            })
            .collect();
        let depth_attachment = depth_view.map(|view| {
            vk::RenderingAttachmentInfo::builder()
                .image_view(view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
                .build()
        });

        let mut rendering_info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = &depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }

        let frame = &mut self.frames[list.index()];
        unsafe {
            self.context.device.cmd_begin_rendering(frame.command_buffer, &rendering_info);
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.context.device.cmd_set_viewport(frame.command_buffer, 0, &[viewport]);
            self.context.device.cmd_set_scissor(frame.command_buffer, 0, &[render_area]);
        }
        frame.rendering = true;
        frame.targets = colors.to_vec();
        frame.depth = depth;
        frame.extent = extent;
    }

    fn cmd_clear_render_target(&mut self, list: CommandList, rtv: u32, color: [f32; 4]) {
        let frame = &self.frames[list.index()];
        let Some(attachment_index) = frame.targets.iter().position(|&t| t == rtv) else {
            log::warn!("cleared a render target that is not bound");
            return;
        };
        let clear = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: attachment_index as u32,
            clear_value: vk::ClearValue { color: vk::ClearColorValue { float32: color } },
        };
        let rect = vk::ClearRect {
            rect: vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: frame.extent },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe { self.context.device.cmd_clear_attachments(frame.command_buffer, &[clear], &[rect]) };
    }

    fn cmd_clear_depth_stencil(
        &mut self,
        list: CommandList,
        dsv: u32,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) {
        let frame = &self.frames[list.index()];
        if frame.depth != Some(dsv) {
            log::warn!("cleared a depth target that is not bound");
            return;
        }
        let mut aspect = vk::ImageAspectFlags::empty();
        if flags.contains(ClearFlags::DEPTH) {
            aspect |= vk::ImageAspectFlags::DEPTH;
        }
        if flags.contains(ClearFlags::STENCIL) {
            // Depth-only formats have no stencil aspect to clear
            if let Some(allocation) = self.views.get(&(ViewSpace::DepthStencil, dsv)) {
                if let Some(VkResource::Image(image)) = self.resources.get(*allocation) {
                    if image.aspect.contains(vk::ImageAspectFlags::STENCIL) {
                        aspect |= vk::ImageAspectFlags::STENCIL;
                    }
                }
            }
        }
        let clear = vk::ClearAttachment {
            aspect_mask: aspect,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: u32::from(stencil) },
            },
        };
        let rect = vk::ClearRect {
            rect: vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: frame.extent },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe { self.context.device.cmd_clear_attachments(frame.command_buffer, &[clear], &[rect]) };
    }

    fn cmd_bind_pipeline(&mut self, list: CommandList, pipeline: PipelineHandle) -> bool {
        let Some(entry) = self.pipelines.get(pipeline) else {
            return false;
        };
        let vk_pipeline = entry.pipeline;
        let frame = &mut self.frames[list.index()];
        // A pipeline switch starts a fresh root-constant block
        frame.constant_offsets.clear();
        frame.constant_cursor = 0;
        unsafe {
            self.context.device.cmd_bind_pipeline(
                frame.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                vk_pipeline,
            );
        }
        true
    }

    fn cmd_bind_vertex_buffer(&mut self, list: CommandList, buffer: GpuAllocation, _stride: u32) {
        let Some(VkResource::Buffer(entry)) = self.resources.get(buffer) else {
            log::warn!("bound an unknown vertex buffer");
            return;
        };
        let command_buffer = self.frames[list.index()].command_buffer;
        unsafe {
            self.context.device.cmd_bind_vertex_buffers(command_buffer, 0, &[entry.buffer], &[0]);
        }
    }

    fn cmd_bind_index_buffer(&mut self, list: CommandList, buffer: GpuAllocation) {
        let Some(VkResource::Buffer(entry)) = self.resources.get(buffer) else {
            log::warn!("bound an unknown index buffer");
            return;
        };
        let command_buffer = self.frames[list.index()].command_buffer;
        unsafe {
            self.context.device.cmd_bind_index_buffer(
                command_buffer,
                entry.buffer,
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    fn cmd_bind_constant_buffer(
        &mut self,
        list: CommandList,
        buffer: GpuAllocation,
        offset: u64,
        slot: u32,
    ) {
        let Some(VkResource::Buffer(entry)) = self.resources.get(buffer) else {
            log::warn!("bound an unknown constant buffer");
            return;
        };
        if slot >= CONSTANT_BINDINGS {
            log::warn!("constant buffer slot {slot} exceeds binding capacity");
            return;
        }
        let vk_buffer = entry.buffer;
        let frame = &mut self.frames[list.index()];
        frame.bound_constants[slot as usize] = Some((vk_buffer, offset));
        frame.descriptors_dirty = true;
    }

    fn cmd_bind_shader_resource(&mut self, list: CommandList, srv: u32, slot: u32) {
        let Some(allocation) = self.views.get(&(ViewSpace::Shader, srv)) else {
            log::warn!("bound an unregistered SRV slot {srv}");
            return;
        };
        match self.resources.get(*allocation) {
            Some(VkResource::Image(image)) => {
                if slot >= SAMPLED_BINDINGS {
                    log::warn!("sampled resource slot {slot} exceeds binding capacity");
                    return;
                }
                let view = image.view;
                let frame = &mut self.frames[list.index()];
                frame.bound_sampled[slot as usize] = Some(view);
                frame.descriptors_dirty = true;
            }
            Some(VkResource::Buffer(buffer)) => {
                if slot >= STORAGE_BINDINGS {
                    log::warn!("storage resource slot {slot} exceeds binding capacity");
                    return;
                }
                let vk_buffer = buffer.buffer;
                let frame = &mut self.frames[list.index()];
                frame.bound_storage[slot as usize] = Some(vk_buffer);
                frame.descriptors_dirty = true;
            }
            None => log::warn!("SRV slot {srv} points at a destroyed allocation"),
        }
    }

    fn cmd_set_graphics_constants(&mut self, list: CommandList, slot: u32, data: &[u8]) {
        let frame = &mut self.frames[list.index()];
        let size = (data.len() as u32 + 15) & !15;
        let offset = match frame.constant_offsets.get(&slot) {
            Some(offset) => *offset,
            None => {
                let offset = frame.constant_cursor;
                if offset + size > PUSH_CONSTANT_SIZE {
                    log::error!("push-constant budget exceeded for slot {slot}");
                    return;
                }
                frame.constant_offsets.insert(slot, offset);
                frame.constant_cursor = offset + size;
                offset
            }
        };
        unsafe {
            self.context.device.cmd_push_constants(
                frame.command_buffer,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                offset,
                data,
            );
        }
    }

    fn cmd_copy_buffer(&mut self, list: CommandList, src: GpuAllocation, dst: GpuAllocation, size: u64) {
        self.end_rendering_if_active(list);
        let (Some(VkResource::Buffer(src)), Some(VkResource::Buffer(dst))) =
            (self.resources.get(src), self.resources.get(dst))
        else {
            log::warn!("copy between unknown buffers");
            return;
        };
        let command_buffer = self.frames[list.index()].command_buffer;
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        unsafe {
            self.context.device.cmd_copy_buffer(command_buffer, src.buffer, dst.buffer, &[region]);
        }
    }

    fn cmd_draw(&mut self, list: CommandList, vertex_count: u32) {
        self.flush_descriptors(list);
        let command_buffer = self.frames[list.index()].command_buffer;
        unsafe { self.context.device.cmd_draw(command_buffer, vertex_count, 1, 0, 0) };
    }

    fn cmd_draw_indexed(&mut self, list: CommandList, index_count: u32) {
        self.flush_descriptors(list);
        let command_buffer = self.frames[list.index()].command_buffer;
        unsafe { self.context.device.cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0) };
    }

    fn wait_idle(&mut self) {
        unsafe {
            let _ = self.context.device.device_wait_idle();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        self.wait_idle();
        let device = &self.context.device;
        unsafe {
            let keys: Vec<GpuAllocation> = self.resources.keys().collect();
            for key in keys {
                if let Some(resource) = self.resources.remove(key) {
                    match resource {
                        VkResource::Buffer(buffer) => {
                            device.destroy_buffer(buffer.buffer, None);
                            device.free_memory(buffer.memory, None);
                        }
                        VkResource::Image(image) => {
                            device.destroy_image_view(image.view, None);
                            device.destroy_image(image.image, None);
                            device.free_memory(image.memory, None);
                        }
                    }
                }
            }
            let pipelines: Vec<PipelineHandle> = self.pipelines.keys().collect();
            for key in pipelines {
                if let Some(pipeline) = self.pipelines.remove(key) {
                    device.destroy_pipeline(pipeline.pipeline, None);
                    device.destroy_shader_module(pipeline.module, None);
                }
            }
            for frame in &self.frames {
                device.destroy_fence(frame.fence, None);
                device.destroy_descriptor_pool(frame.descriptor_pool, None);
            }
            device.destroy_sampler(self.sampler, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            for layout in self.set_layouts {
                device.destroy_descriptor_set_layout(layout, None);
            }
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
