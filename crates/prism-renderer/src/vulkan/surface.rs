//! Presentation parameters for the window surface.

use ash::vk;

use super::VulkanContext;

/// Presentation parameters chosen for the context's surface.
///
/// The surface handle itself is owned by [`VulkanContext`] (device selection
/// needs it before this wrapper can exist); this type only queries and pins
/// down the format, present mode and capabilities the swapchain is built from.
pub struct VulkanSurface {
    pub handle: vk::SurfaceKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
}

impl VulkanSurface {
    /// Query the surface and choose presentation parameters.
    pub unsafe fn new(ctx: &VulkanContext) -> Result<Self, String> {
        let capabilities = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
            .map_err(|e| format!("Failed to get surface capabilities: {:?}", e))?;

        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
            .map_err(|e| format!("Failed to get surface formats: {:?}", e))?;

        let format = Self::choose_surface_format(&formats);

        let present_modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
            .map_err(|e| format!("Failed to get present modes: {:?}", e))?;

        let present_mode = Self::choose_present_mode(&present_modes);

        Ok(Self {
            handle: ctx.surface,
            format,
            present_mode,
            capabilities,
        })
    }

    /// Choose the best surface format.
    ///
    /// The compute stage writes the swapchain image as a storage image, which
    /// rules out sRGB formats; prefer 8-bit UNORM.
    fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
        for format in formats {
            if format.format == vk::Format::B8G8R8A8_UNORM
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            {
                return *format;
            }
        }

        for format in formats {
            if format.format == vk::Format::R8G8B8A8_UNORM {
                return *format;
            }
        }

        formats.first().copied().unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
    }

    /// Choose the best present mode.
    ///
    /// The per-pass fence wait already serializes the loop, so vsync
    /// throttling adds nothing; prefer immediate presentation when available.
    fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
        if modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            return vk::PresentModeKHR::IMMEDIATE;
        }

        // FIFO is guaranteed to be available
        vk::PresentModeKHR::FIFO
    }

    /// Get the render extent, clamped to surface capabilities.
    pub fn get_extent(&self, desired_width: u32, desired_height: u32) -> vk::Extent2D {
        if self.capabilities.current_extent.width != u32::MAX {
            // The surface size is defined
            self.capabilities.current_extent
        } else {
            vk::Extent2D {
                width: desired_width.clamp(
                    self.capabilities.min_image_extent.width,
                    self.capabilities.max_image_extent.width,
                ),
                height: desired_height.clamp(
                    self.capabilities.min_image_extent.height,
                    self.capabilities.max_image_extent.height,
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // choose_surface_format
    // ============================================================

    #[test]
    fn test_prefers_bgra_unorm_over_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = VulkanSurface::choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_falls_back_to_rgba_unorm() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = VulkanSurface::choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_first_format_when_no_preferred_match() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = VulkanSurface::choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    // ============================================================
    // choose_present_mode
    // ============================================================

    #[test]
    fn test_prefers_immediate_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            VulkanSurface::choose_present_mode(&modes),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            VulkanSurface::choose_present_mode(&modes),
            vk::PresentModeKHR::FIFO
        );
    }
}
