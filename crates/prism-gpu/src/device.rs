//! Device selection and logical device creation.

use ash::vk;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

use crate::error::{GpuError, Result};
use crate::instance::{create_debug_messenger, create_instance};
use crate::memory::DeviceAllocator;
use crate::surface::SurfaceContext;

/// Device properties the controller exposes to callers.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_name: String,
    pub api_version: u32,
    pub limits: vk::PhysicalDeviceLimits,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// Main device context holding instance-wide Vulkan state.
pub struct DeviceContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) info: DeviceInfo,
    pub(crate) allocator: Mutex<DeviceAllocator>,

    pub(crate) graphics_queue_family: u32,
    pub(crate) present_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
}

impl DeviceContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Device properties, limits, and timestamp period.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue (may alias the graphics queue).
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<DeviceAllocator> {
        &self.allocator
    }

    /// Wait for the device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // The allocator frees all VkDeviceMemory before the device goes away.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a device context.
pub struct DeviceContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for DeviceContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl DeviceContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the device context and the surface for the given window.
    ///
    /// Present support is a hard device requirement, so the surface is
    /// created between instance and physical-device selection.
    pub fn build<W>(self, window: &W) -> Result<(DeviceContext, SurfaceContext)>
    where
        W: raw_window_handle::HasDisplayHandle + raw_window_handle::HasWindowHandle,
    {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::InvalidState(format!("failed to load Vulkan: {e}")))?;

        let instance =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let debug = if self.enable_validation {
            match unsafe { create_debug_messenger(&entry, &instance) } {
                Ok(pair) => Some(pair),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface = unsafe { SurfaceContext::new(&entry, &instance, window) }?;

        let selected = unsafe { select_physical_device(&instance, &surface) }?;
        tracing::info!(
            "Selected GPU: {} (Vulkan {}.{}.{})",
            selected.info.device_name,
            vk::api_version_major(selected.info.api_version),
            vk::api_version_minor(selected.info.api_version),
            vk::api_version_patch(selected.info.api_version),
        );

        let (device, graphics_queue, present_queue) = unsafe {
            create_device(
                &instance,
                selected.physical_device,
                selected.graphics_queue_family,
                selected.present_queue_family,
            )?
        };

        let device = Arc::new(device);
        let allocator =
            unsafe { DeviceAllocator::new(&instance, device.clone(), selected.physical_device) }?;

        Ok((
            DeviceContext {
                entry,
                instance,
                debug,
                physical_device: selected.physical_device,
                device,
                info: selected.info,
                allocator: Mutex::new(allocator),
                graphics_queue_family: selected.graphics_queue_family,
                present_queue_family: selected.present_queue_family,
                graphics_queue,
                present_queue,
            },
            surface,
        ))
    }
}

struct SelectedDevice {
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
    present_queue_family: u32,
    info: DeviceInfo,
}

/// Select the best physical device that meets the hard requirements:
/// swapchain support, a graphics queue family with valid timestamp bits,
/// and a queue family that can present to the surface.
///
/// # Safety
/// The instance and surface must be valid.
unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: &SurfaceContext,
) -> Result<SelectedDevice> {
    let devices = instance.enumerate_physical_devices()?;

    let mut best: Option<(i64, SelectedDevice)> = None;

    for device in devices {
        let Some(candidate) = score_physical_device(instance, surface, device)? else {
            continue;
        };
        if best.as_ref().map_or(true, |(score, _)| candidate.0 > *score) {
            best = Some(candidate);
        }
    }

    best.map(|(_, selected)| selected)
        .ok_or(GpuError::NoSupportedDevice)
}

/// Score a candidate, or return `None` when it misses a hard requirement.
unsafe fn score_physical_device(
    instance: &ash::Instance,
    surface: &SurfaceContext,
    device: vk::PhysicalDevice,
) -> Result<Option<(i64, SelectedDevice)>> {
    let properties = instance.get_physical_device_properties(device);

    // Vulkan 1.2 is required for the feature set below.
    let api_version = properties.api_version;
    if vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 2 {
        return Ok(None);
    }

    // Swapchain extension is a hard requirement.
    let extensions = instance
        .enumerate_device_extension_properties(device)
        .unwrap_or_default();
    let has_swapchain = extensions.iter().any(|ext| {
        CStr::from_ptr(ext.extension_name.as_ptr()) == ash::khr::swapchain::NAME
    });
    if !has_swapchain {
        return Ok(None);
    }

    // Graphics family with valid timestamp bits, and a family that can present.
    let queue_families = instance.get_physical_device_queue_family_properties(device);
    let mut graphics_family = None;
    let mut present_family = None;

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;
        if graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && family.timestamp_valid_bits > 0
        {
            graphics_family = Some(i);
        }
        if present_family.is_none() && surface.supports_present(device, i)? {
            present_family = Some(i);
        }
    }

    let (Some(graphics_queue_family), Some(present_queue_family)) =
        (graphics_family, present_family)
    else {
        return Ok(None);
    };

    // Discrete beats integrated; newer API wins among equals.
    let type_score: i64 = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };
    let score = (type_score << 32) + i64::from(api_version);

    let device_name = CStr::from_ptr(properties.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    Ok(Some((
        score,
        SelectedDevice {
            physical_device: device,
            graphics_queue_family,
            present_queue_family,
            info: DeviceInfo {
                device_name,
                api_version,
                limits: properties.limits,
                timestamp_period: properties.limits.timestamp_period,
                memory_properties: instance.get_physical_device_memory_properties(device),
            },
        },
    )))
}

/// Create the logical device and fetch the graphics and present queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
    present_queue_family: u32,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let mut unique_families = vec![graphics_queue_family];
    if present_queue_family != graphics_queue_family {
        unique_families.push(present_queue_family);
    }

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default()
        .wide_lines(true)
        .sampler_anisotropy(true);

    let mut vulkan_1_2_features =
        vk::PhysicalDeviceVulkan12Features::default().host_query_reset(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance.create_device(physical_device, &device_create_info, None)?;

    let graphics_queue = device.get_device_queue(graphics_queue_family, 0);
    let present_queue = device.get_device_queue(present_queue_family, 0);

    Ok((device, graphics_queue, present_queue))
}
