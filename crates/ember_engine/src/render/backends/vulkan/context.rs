//! Vulkan instance, device and queue initialization
//!
//! Headless setup: no windowing extensions, no surface. The first physical
//! device with a graphics queue wins, discrete GPUs preferred.

#![allow(unsafe_code)]

use std::ffi::CString;

use ash::{vk, Device, Entry, Instance};

use crate::render::{RenderError, RenderResult};

/// Owned Vulkan instance/device state shared by the device implementation
pub struct VulkanContext {
    /// Keeps the loader alive for the lifetime of the instance
    _entry: Entry,
    /// Vulkan instance
    pub instance: Instance,
    /// Selected physical device
    pub physical_device: vk::PhysicalDevice,
    /// Logical device
    pub device: Device,
    /// Graphics queue
    pub queue: vk::Queue,
    /// Graphics queue family index
    pub queue_family: u32,
    /// Cached memory properties for allocation decisions
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanContext {
    /// Load Vulkan and create an offscreen device with dynamic rendering
    pub fn new() -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::InitializationFailed(format!("failed to load Vulkan: {e:?}")))?;

        let app_name = CString::new("ember_engine").expect("static name");
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let create_info = vk::InstanceCreateInfo::builder().application_info(&app_info);
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| RenderError::InitializationFailed(format!("instance creation failed: {e}")))?;

        let (physical_device, queue_family) = Self::pick_physical_device(&instance)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = unsafe { std::ffi::CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!("vulkan device: {}", device_name.to_string_lossy());

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities);
        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);
        let queue_infos = [queue_info.build()];
        let device_info =
            vk::DeviceCreateInfo::builder().queue_create_infos(&queue_infos).push_next(&mut vulkan13);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(|e| RenderError::InitializationFailed(format!("device creation failed: {e}")))?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Ok(Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            queue,
            queue_family,
            memory_properties,
        })
    }

    fn pick_physical_device(instance: &Instance) -> RenderResult<(vk::PhysicalDevice, u32)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| RenderError::InitializationFailed(format!("device enumeration failed: {e}")))?;

        let mut fallback = None;
        for device in devices {
            let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            let Some(family) = families
                .iter()
                .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            else {
                continue;
            };
            let properties = unsafe { instance.get_physical_device_properties(device) };
            if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
                return Ok((device, family as u32));
            }
            fallback.get_or_insert((device, family as u32));
        }
        fallback.ok_or_else(|| {
            RenderError::InitializationFailed("no physical device with a graphics queue".into())
        })
    }

    /// Select a memory type matching the requirement bits and properties
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<u32> {
        for i in 0..self.memory_properties.memory_type_count {
            if (type_filter & (1 << i)) != 0
                && self.memory_properties.memory_types[i as usize].property_flags.contains(properties)
            {
                return Ok(i);
            }
        }
        Err(RenderError::Backend("no suitable memory type".into()))
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
