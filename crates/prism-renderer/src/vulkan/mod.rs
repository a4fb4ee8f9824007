//! Vulkan backend for the progressive compute renderer.
//!
//! One compute pipeline, one frame in flight: every pass is fully serialized
//! against the host through a single fence/semaphore pair. All device
//! resources are owned explicitly and torn down in reverse creation order.

pub mod commands;
pub mod context;
pub mod memory;
pub mod pipeline;
pub mod readback;
pub mod surface;
pub mod swapchain;

pub use commands::CommandController;
pub use context::{QueueFamilyIndices, VulkanContext};
pub use memory::{find_memory_type_index, Buffer, Image, MemoryManager};
pub use pipeline::{ComputePipeline, BINDINGS, SHADER_ENTRY_POINT};
pub use surface::VulkanSurface;
pub use swapchain::Swapchain;

use ash::vk;
use std::ffi::CStr;

/// Required Vulkan version.
pub const REQUIRED_VK_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

/// Application name for the Vulkan instance.
pub const APP_NAME: &CStr = c"prism";

/// Engine name for the Vulkan instance.
pub const ENGINE_NAME: &CStr = c"prism";

/// Engine version.
pub const ENGINE_VERSION: u32 = vk::make_api_version(0, 1, 0, 0);
