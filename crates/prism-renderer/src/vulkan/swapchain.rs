//! Single-image swapchain for the fully synchronized render loop.

use ash::vk;

use super::{VulkanContext, VulkanSurface};

/// Vulkan swapchain holding the one presentable image the renderer targets.
///
/// The loop keeps a single frame in flight, so one image is requested and the
/// command buffer recorded against it is replayed every pass. The image is
/// owned by the presentation engine; the application only transitions its
/// layout and synchronizes access.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain.
    pub unsafe fn new(
        ctx: &VulkanContext,
        surface: &VulkanSurface,
        width: u32,
        height: u32,
    ) -> Result<Self, String> {
        let extent = surface.get_extent(width, height);
        let shared_families = [ctx.compute_family, ctx.present_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(1)
            .image_format(surface.format.format)
            .image_color_space(surface.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .pre_transform(surface.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(surface.present_mode)
            .clipped(true);

        // The image crosses queue families when compute and present differ
        create_info = if ctx.compute_family != ctx.present_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&shared_families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let handle = ctx
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| format!("Failed to create swapchain: {:?}", e))?;

        let images = ctx
            .swapchain_loader
            .get_swapchain_images(handle)
            .map_err(|e| format!("Failed to get swapchain images: {:?}", e))?;

        let image = images
            .first()
            .copied()
            .ok_or("Swapchain returned no images")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(surface.format.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = ctx
            .device
            .create_image_view(&view_info, None)
            .map_err(|e| format!("Failed to create swapchain image view: {:?}", e))?;

        Ok(Self {
            handle,
            image,
            view,
            format: surface.format.format,
            extent,
        })
    }

    /// Acquire the next presentable image, signaling `semaphore` when the
    /// presentation engine releases it. Blocks without timeout.
    pub unsafe fn acquire(
        &self,
        ctx: &VulkanContext,
        semaphore: vk::Semaphore,
    ) -> Result<u32, String> {
        let (index, _suboptimal) = ctx
            .swapchain_loader
            .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
            .map_err(|e| format!("Failed to acquire swapchain image: {:?}", e))?;

        Ok(index)
    }

    /// Present `image_index`, gated on `semaphore`.
    pub unsafe fn present(
        &self,
        ctx: &VulkanContext,
        semaphore: vk::Semaphore,
        image_index: u32,
    ) -> Result<(), String> {
        let wait_semaphores = [semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        ctx.swapchain_loader
            .queue_present(ctx.present_queue, &present_info)
            .map_err(|e| format!("Failed to present: {:?}", e))?;

        Ok(())
    }

    /// Destroy the swapchain and its image view. The images themselves belong
    /// to the presentation engine and go away with the swapchain handle.
    pub unsafe fn destroy(&mut self, ctx: &VulkanContext) {
        ctx.device.destroy_image_view(self.view, None);
        ctx.swapchain_loader.destroy_swapchain(self.handle, None);
    }
}
