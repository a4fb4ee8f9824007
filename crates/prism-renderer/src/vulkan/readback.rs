//! Synchronized readback of the presentable image to an encoded file.

use ash::vk;
use std::path::Path;

use super::{
    commands::image_barrier, memory::Buffer, CommandController, MemoryManager, Swapchain,
    VulkanContext,
};

/// Reorder mapped B8G8R8A8 pixels into the RGBA order the encoder expects.
/// A no-op for surfaces that already present RGBA byte order.
pub fn swizzle_to_rgba(format: vk::Format, pixels: &mut [u8]) {
    if format == vk::Format::B8G8R8A8_UNORM || format == vk::Format::B8G8R8A8_SRGB {
        for pixel in pixels.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
    }
}

/// Copy the presentable image into host-visible memory and encode it as PNG.
///
/// Runs a one-shot command buffer against its own fence and blocks until the
/// copy completes, so the function returns only after the file is written and
/// the staging buffer released. `source_layout` is the layout the image was
/// last left in (UNDEFINED before the first pass); no writes are pending at
/// this point, so both sides of the transition are plain memory reads.
pub unsafe fn save_image(
    ctx: &VulkanContext,
    memory: &MemoryManager,
    controller: &CommandController,
    swapchain: &Swapchain,
    source_layout: vk::ImageLayout,
    path: &Path,
) -> Result<(), String> {
    let extent = swapchain.extent;
    let size = (extent.width as vk::DeviceSize) * (extent.height as vk::DeviceSize) * 4;

    let staging = memory.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(controller.pool())
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = match ctx.device.allocate_command_buffers(&alloc_info) {
        Ok(buffers) => buffers[0],
        Err(e) => {
            memory.destroy_buffer(&staging);
            return Err(format!("Failed to allocate command buffer: {:?}", e));
        }
    };

    let result = copy_and_encode(
        ctx,
        memory,
        &staging,
        command_buffer,
        swapchain,
        source_layout,
        path,
    );

    ctx.device
        .free_command_buffers(controller.pool(), &[command_buffer]);
    memory.destroy_buffer(&staging);

    result
}

unsafe fn copy_and_encode(
    ctx: &VulkanContext,
    memory: &MemoryManager,
    staging: &Buffer,
    command_buffer: vk::CommandBuffer,
    swapchain: &Swapchain,
    source_layout: vk::ImageLayout,
    path: &Path,
) -> Result<(), String> {
    let extent = swapchain.extent;

    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    ctx.device
        .begin_command_buffer(command_buffer, &begin_info)
        .map_err(|e| format!("Failed to begin command buffer: {:?}", e))?;

    let to_transfer_src = [image_barrier(
        swapchain.image,
        vk::AccessFlags::MEMORY_READ,
        vk::AccessFlags::MEMORY_READ,
        source_layout,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ctx.compute_family,
    )];

    ctx.device.cmd_pipeline_barrier(
        command_buffer,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::TRANSFER,
        vk::DependencyFlags::BY_REGION,
        &[],
        &[],
        &to_transfer_src,
    );

    // Tightly packed rows: stride equals width * 4
    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(extent.width)
        .buffer_image_height(extent.height)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });

    ctx.device.cmd_copy_image_to_buffer(
        command_buffer,
        swapchain.image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        staging.handle,
        std::slice::from_ref(&region),
    );

    ctx.device
        .end_command_buffer(command_buffer)
        .map_err(|e| format!("Failed to end command buffer: {:?}", e))?;

    let fence = ctx
        .device
        .create_fence(&vk::FenceCreateInfo::default(), None)
        .map_err(|e| format!("Failed to create fence: {:?}", e))?;

    let command_buffers = [command_buffer];
    let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

    let submitted = ctx
        .device
        .queue_submit(ctx.compute_queue, &[submit_info], fence)
        .map_err(|e| format!("Failed to submit readback: {:?}", e))
        .and_then(|_| {
            ctx.device
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(|e| format!("Failed to wait for readback fence: {:?}", e))
        });

    ctx.device.destroy_fence(fence, None);
    submitted?;

    let pixels = memory.read_buffer(staging, staging.size as usize)?;
    encode_png(path, swapchain.format, extent, pixels)
}

/// Hand the raw pixels to the encoder with explicit dimensions; rows are
/// tightly packed, so the stride is `width * 4`.
fn encode_png(
    path: &Path,
    format: vk::Format,
    extent: vk::Extent2D,
    mut pixels: Vec<u8>,
) -> Result<(), String> {
    swizzle_to_rgba(format, &mut pixels);

    image::save_buffer(
        path,
        &pixels,
        extent.width,
        extent.height,
        image::ExtendedColorType::Rgba8,
    )
    .map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // swizzle_to_rgba
    // ============================================================

    #[test]
    fn test_bgra_pixels_are_reordered() {
        let mut pixels = vec![10, 20, 30, 255, 40, 50, 60, 255];
        swizzle_to_rgba(vk::Format::B8G8R8A8_UNORM, &mut pixels);
        assert_eq!(pixels, vec![30, 20, 10, 255, 60, 50, 40, 255]);
    }

    #[test]
    fn test_rgba_pixels_are_untouched() {
        let mut pixels = vec![10, 20, 30, 255];
        swizzle_to_rgba(vk::Format::R8G8B8A8_UNORM, &mut pixels);
        assert_eq!(pixels, vec![10, 20, 30, 255]);
    }

    #[test]
    fn test_swizzle_is_an_involution() {
        let original = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let mut pixels = original.clone();
        swizzle_to_rgba(vk::Format::B8G8R8A8_UNORM, &mut pixels);
        swizzle_to_rgba(vk::Format::B8G8R8A8_UNORM, &mut pixels);
        assert_eq!(pixels, original);
    }
}
