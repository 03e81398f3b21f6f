//! Physical device (GPU) selection.
//!
//! The renderer drives everything from a single queue, so a device qualifies
//! only if one of its queue families supports graphics, compute and transfer
//! together and can present to the window surface. Ray-query rendering adds
//! extension and feature requirements on top.
//!
//! Candidates are scored and the highest score wins; discrete GPUs are
//! strongly preferred over integrated ones.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Queue capabilities required from the single render queue family.
pub const REQUIRED_QUEUE_FLAGS: vk::QueueFlags = vk::QueueFlags::from_raw(
    vk::QueueFlags::GRAPHICS.as_raw()
        | vk::QueueFlags::COMPUTE.as_raw()
        | vk::QueueFlags::TRANSFER.as_raw(),
);

/// Device extensions needed for ray-query rendering.
pub const RAY_QUERY_EXTENSIONS: &[&CStr] = &[
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_query::NAME,
    ash::khr::deferred_host_operations::NAME,
];

/// Optional device capabilities requested by the renderer configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceRequirements {
    /// Acceleration structures, ray queries and buffer device addresses.
    pub ray_query: bool,
}

/// Information about a physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family used for rendering, compute, transfer and presentation.
    pub queue_family: u32,
    /// Capabilities that were verified during selection.
    pub requirements: DeviceRequirements,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        device_local_memory(&self.memory_properties)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_family", &self.queue_family)
            .field("requirements", &self.requirements)
            .finish()
    }
}

/// Selects the most suitable physical device for rendering.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU satisfies the queue and
/// extension requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    requirements: DeviceRequirements,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| {
            check_device_suitability(instance, device, surface, surface_loader, requirements)
        })
        .map(|info| {
            let score = rate_device(info.properties.device_type, &info.memory_properties);
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    let Some((selected, score)) = selected else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, queue family {}, score {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        selected.queue_family,
        score
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    requirements: DeviceRequirements,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_family = find_render_queue_family(&families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    });

    let Some(queue_family) = queue_family else {
        debug!(
            "GPU '{}' skipped: no queue family supports graphics, compute, transfer and present",
            name
        );
        return None;
    };

    if requirements.ray_query {
        if vk::api_version_minor(properties.api_version) < 2
            && vk::api_version_major(properties.api_version) == 1
        {
            debug!("GPU '{}' skipped: Vulkan 1.2 not supported", name);
            return None;
        }

        let available = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .unwrap_or_default()
        };
        if let Some(missing) = missing_extensions(&available, RAY_QUERY_EXTENSIONS).first() {
            debug!("GPU '{}' skipped: missing {}", name, missing);
            return None;
        }

        if !supports_ray_query_features(instance, device) {
            debug!("GPU '{}' skipped: ray query features not supported", name);
            return None;
        }
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_family,
        requirements,
    })
}

/// Returns the first queue family with [`REQUIRED_QUEUE_FLAGS`] for which
/// `supports_present` holds.
pub fn find_render_queue_family(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| {
            family.queue_count > 0 && family.queue_flags.contains(REQUIRED_QUEUE_FLAGS)
        })
        .map(|(index, _)| index as u32)
        .find(|&index| supports_present(index))
}

/// Names of `required` extensions absent from `available`.
fn missing_extensions(available: &[vk::ExtensionProperties], required: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| {
            !available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().ok() == Some(**name))
        })
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn supports_ray_query_features(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut accel = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut ray_query = vk::PhysicalDeviceRayQueryFeaturesKHR::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan12)
        .push_next(&mut accel)
        .push_next(&mut ray_query);

    unsafe { instance.get_physical_device_features2(device, &mut features) };

    vulkan12.buffer_device_address == vk::TRUE
        && vulkan12.runtime_descriptor_array == vk::TRUE
        && accel.acceleration_structure == vk::TRUE
        && ray_query.ray_query == vk::TRUE
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

fn device_local_memory(memory_properties: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory_properties
        .memory_heaps
        .iter()
        .take(memory_properties.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

/// Rates a physical device. Higher is better.
fn rate_device(
    device_type: vk::PhysicalDeviceType,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> u32 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 100,
        _ => 1,
    };

    // VRAM in MiB, capped so it never outweighs the device type.
    let vram_mb = (device_local_memory(memory_properties) / (1024 * 1024)) as u32;
    type_score + vram_mb.min(9_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_family_requires_all_flags() {
        let families = [
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
            family(REQUIRED_QUEUE_FLAGS, 1),
        ];
        assert_eq!(find_render_queue_family(&families, |_| true), Some(1));
    }

    #[test]
    fn test_render_family_requires_present() {
        let families = [family(REQUIRED_QUEUE_FLAGS, 1), family(REQUIRED_QUEUE_FLAGS, 1)];
        assert_eq!(find_render_queue_family(&families, |i| i == 1), Some(1));
        assert_eq!(find_render_queue_family(&families, |_| false), None);
    }

    #[test]
    fn test_render_family_skips_empty_families() {
        let families = [family(REQUIRED_QUEUE_FLAGS, 0)];
        assert_eq!(find_render_queue_family(&families, |_| true), None);
    }

    #[test]
    fn test_discrete_preferred_over_integrated() {
        let mut small = vk::PhysicalDeviceMemoryProperties::default();
        small.memory_heap_count = 1;
        small.memory_heaps[0] = vk::MemoryHeap {
            size: 512 * 1024 * 1024,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        let mut large = small;
        large.memory_heaps[0].size = 64 * 1024 * 1024 * 1024;

        let discrete = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, &small);
        let integrated = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &large);
        assert!(discrete > integrated);
    }

    #[test]
    fn test_missing_extensions_reported() {
        let mut ext = vk::ExtensionProperties::default();
        for (dst, src) in ext
            .extension_name
            .iter_mut()
            .zip(ash::khr::ray_query::NAME.to_bytes_with_nul())
        {
            *dst = *src as std::ffi::c_char;
        }

        let missing = missing_extensions(&[ext], RAY_QUERY_EXTENSIONS);
        assert_eq!(missing.len(), 2);
        assert!(!missing.iter().any(|m| m == "VK_KHR_ray_query"));
    }
}
