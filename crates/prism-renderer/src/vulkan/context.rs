//! Vulkan context: instance, surface, physical device, logical device, and queues.

use ash::khr::{surface, swapchain};
use ash::{vk, Device, Entry, Instance};
use std::ffi::CStr;
use std::os::raw::c_char;

use super::{APP_NAME, ENGINE_NAME, ENGINE_VERSION, REQUIRED_VK_VERSION};

/// Queue family indices, resolved once at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub compute: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.compute.is_some() && self.present.is_some()
    }
}

/// Pick queue families for the renderer: a compute-capable family, preferring
/// one without graphics support (an async-compute family where the hardware
/// has one), and a family able to present to the surface. Both may resolve to
/// the same index.
fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut dedicated_compute = None;
    let mut any_compute = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_compute = family.queue_flags.contains(vk::QueueFlags::COMPUTE);

        if has_compute && !has_graphics && dedicated_compute.is_none() {
            dedicated_compute = Some(index);
        }
        if has_compute && any_compute.is_none() {
            any_compute = Some(index);
        }
        if present.is_none() && supports_present(index) {
            present = Some(index);
        }
    }

    QueueFamilyIndices {
        compute: dedicated_compute.or(any_compute),
        present,
    }
}

/// Main Vulkan context holding all core Vulkan objects.
///
/// Created once at startup and destroyed last at shutdown, after every
/// dependent resource. The surface handle lives here because device selection
/// needs it; [`super::VulkanSurface`] only selects presentation parameters.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,

    // Queue families never change after startup
    pub compute_family: u32,
    pub present_family: u32,
    pub compute_queue: vk::Queue,
    pub present_queue: vk::Queue,

    // Surface and extension loaders
    pub surface: vk::SurfaceKHR,
    pub surface_loader: surface::Instance,
    pub swapchain_loader: swapchain::Device,

    // Debug messenger (only in debug builds)
    #[cfg(debug_assertions)]
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    #[cfg(debug_assertions)]
    debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
}

impl VulkanContext {
    /// Create a new Vulkan context against the given window.
    ///
    /// # Safety
    /// The window handles must be valid and outlive the context.
    pub unsafe fn new(
        display_handle: raw_window_handle::RawDisplayHandle,
        window_handle: raw_window_handle::RawWindowHandle,
        enable_validation: bool,
    ) -> Result<Self, String> {
        let entry = Entry::load().map_err(|e| format!("Failed to load Vulkan library: {:?}", e))?;

        // Check Vulkan version
        let api_version = match entry
            .try_enumerate_instance_version()
            .map_err(|e| format!("Failed to enumerate instance version: {:?}", e))?
        {
            Some(version) => version,
            None => vk::API_VERSION_1_0,
        };

        if api_version < REQUIRED_VK_VERSION {
            return Err(format!(
                "Vulkan 1.2 required, but only {}.{}.{} available",
                vk::api_version_major(api_version),
                vk::api_version_minor(api_version),
                vk::api_version_patch(api_version)
            ));
        }

        let instance = Self::create_instance(&entry, display_handle, enable_validation)?;

        #[cfg(debug_assertions)]
        let (debug_utils_loader, debug_messenger) = if enable_validation {
            Self::setup_debug_messenger(&entry, &instance)?
        } else {
            (None, None)
        };

        // The surface must exist before device selection: present support is
        // queried per queue family against this exact surface.
        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
            .map_err(|e| format!("Failed to create Vulkan surface: {:?}", e))?;

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        let compute_family = queue_families.compute.ok_or("No compute queue family")?;
        let present_family = queue_families.present.ok_or("No present queue family")?;

        let (device, compute_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, compute_family, present_family)?;

        let swapchain_loader = swapchain::Device::new(&instance, &device);

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            compute_family,
            present_family,
            compute_queue,
            present_queue,
            surface,
            surface_loader,
            swapchain_loader,
            #[cfg(debug_assertions)]
            debug_messenger,
            #[cfg(debug_assertions)]
            debug_utils_loader,
        })
    }

    /// Create a Vulkan instance with the surface extensions the window needs.
    unsafe fn create_instance(
        entry: &Entry,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Instance, String> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(APP_NAME)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(ENGINE_VERSION)
            .api_version(REQUIRED_VK_VERSION);

        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(|e| format!("Failed to get required extensions: {:?}", e))?
            .to_vec();

        #[cfg(debug_assertions)]
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names: Vec<&CStr> = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation"]
        } else {
            vec![]
        };
        let layer_name_ptrs: Vec<*const c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);

        entry
            .create_instance(&create_info, None)
            .map_err(|e| format!("Failed to create Vulkan instance: {:?}", e))
    }

    /// Setup debug messenger for validation layers.
    #[cfg(debug_assertions)]
    unsafe fn setup_debug_messenger(
        entry: &Entry,
        instance: &Instance,
    ) -> Result<
        (
            Option<ash::ext::debug_utils::Instance>,
            Option<vk::DebugUtilsMessengerEXT>,
        ),
        String,
    > {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = debug_utils
            .create_debug_utils_messenger(&create_info, None)
            .map_err(|e| format!("Failed to create debug messenger: {:?}", e))?;

        Ok((Some(debug_utils), Some(messenger)))
    }

    /// Select the first physical device that carries the swapchain extension
    /// and exposes both required queue families.
    unsafe fn pick_physical_device(
        instance: &Instance,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices), String> {
        let devices = instance
            .enumerate_physical_devices()
            .map_err(|e| format!("Failed to enumerate physical devices: {:?}", e))?;

        if devices.is_empty() {
            return Err("No Vulkan-capable GPU found".to_string());
        }

        for &device in &devices {
            if !Self::supports_required_extensions(instance, device) {
                continue;
            }

            let queue_families =
                Self::find_queue_families(instance, device, surface_loader, surface);
            if !queue_families.is_complete() {
                continue;
            }

            let props = instance.get_physical_device_properties(device);
            let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
            println!("Selected GPU: {}", name);

            return Ok((device, queue_families));
        }

        Err("No GPU supports presentation and compute".to_string())
    }

    /// Check that a device carries every required extension.
    unsafe fn supports_required_extensions(instance: &Instance, device: vk::PhysicalDevice) -> bool {
        let extensions = match instance.enumerate_device_extension_properties(device) {
            Ok(extensions) => extensions,
            Err(_) => return false,
        };

        extensions
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME)
    }

    /// Find queue family indices for a physical device.
    unsafe fn find_queue_families(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface_loader: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> QueueFamilyIndices {
        let families = instance.get_physical_device_queue_family_properties(device);

        select_queue_families(&families, |index| {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        })
    }

    /// Create the logical device with one queue per distinct family.
    unsafe fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        compute_family: u32,
        present_family: u32,
    ) -> Result<(Device, vk::Queue, vk::Queue), String> {
        let mut unique_families = vec![compute_family];
        if !unique_families.contains(&present_family) {
            unique_families.push(present_family);
        }

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: Vec<*const c_char> = vec![swapchain::NAME.as_ptr()];

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .create_device(physical_device, &create_info, None)
            .map_err(|e| format!("Failed to create logical device: {:?}", e))?;

        let compute_queue = device.get_device_queue(compute_family, 0);
        let present_queue = device.get_device_queue(present_family, 0);

        Ok((device, compute_queue, present_queue))
    }

    /// Wait for all device operations to complete.
    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.wait_idle();

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            #[cfg(debug_assertions)]
            if let (Some(loader), Some(messenger)) = (&self.debug_utils_loader, self.debug_messenger)
            {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers.
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        eprintln!("[VK ERROR] {}", message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        eprintln!("[VK WARN] {}", message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    // ============================================================
    // select_queue_families
    // ============================================================

    #[test]
    fn test_prefers_dedicated_compute_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = select_queue_families(&families, |_| true);
        assert_eq!(indices.compute, Some(1));
    }

    #[test]
    fn test_falls_back_to_shared_compute_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = select_queue_families(&families, |_| true);
        assert_eq!(indices.compute, Some(1));
    }

    #[test]
    fn test_first_dedicated_compute_family_wins() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = select_queue_families(&families, |_| true);
        assert_eq!(indices.compute, Some(0));
    }

    #[test]
    fn test_present_family_independent_of_compute() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = select_queue_families(&families, |index| index == 0);
        assert_eq!(indices.compute, Some(1));
        assert_eq!(indices.present, Some(0));
        assert!(indices.is_complete());
    }

    #[test]
    fn test_incomplete_without_present_support() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        let indices = select_queue_families(&families, |_| false);
        assert_eq!(indices.compute, Some(0));
        assert_eq!(indices.present, None);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_incomplete_without_compute_support() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = select_queue_families(&families, |_| true);
        assert_eq!(indices.compute, None);
        assert!(!indices.is_complete());
    }
}
