//! Recorded command stream and per-pass synchronization.
//!
//! One primary command buffer is recorded once and resubmitted unmodified
//! every pass; only the contents of the bound uniform buffers change between
//! submissions. A single fence/semaphore pair serializes the host, the
//! compute queue and the presentation engine, keeping exactly one frame in
//! flight.

use ash::vk;

use super::{pipeline::ComputePipeline, swapchain::Swapchain, VulkanContext};

/// Work groups needed to cover `extent` pixels with groups of `group_size`.
pub fn dispatch_size(extent: u32, group_size: u32) -> u32 {
    (extent + group_size - 1) / group_size
}

/// Full-image barrier for a single-mip color image staying on one queue
/// family.
pub fn image_barrier(
    image: vk::Image,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    queue_family: u32,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(queue_family)
        .dst_queue_family_index(queue_family)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
}

/// Owns the recorded pass command buffer and the fence/semaphore pair that
/// orders acquisition, submission and presentation.
pub struct CommandController {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    semaphore: vk::Semaphore,
    compute_family: u32,
    render_target_layout: vk::ImageLayout,
    device: ash::Device,
}

impl CommandController {
    /// Create the command pool, the pass command buffer and the sync pair.
    pub unsafe fn new(ctx: &VulkanContext) -> Result<Self, String> {
        let pool_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(ctx.compute_family);

        let pool = ctx
            .device
            .create_command_pool(&pool_info, None)
            .map_err(|e| format!("Failed to create command pool: {:?}", e))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = ctx
            .device
            .allocate_command_buffers(&alloc_info)
            .map_err(|e| format!("Failed to allocate command buffer: {:?}", e))?[0];

        let fence = ctx
            .device
            .create_fence(&vk::FenceCreateInfo::default(), None)
            .map_err(|e| format!("Failed to create fence: {:?}", e))?;

        let semaphore = ctx
            .device
            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
            .map_err(|e| format!("Failed to create semaphore: {:?}", e))?;

        Ok(Self {
            pool,
            command_buffer,
            fence,
            semaphore,
            compute_family: ctx.compute_family,
            render_target_layout: vk::ImageLayout::UNDEFINED,
            device: ctx.device.clone(),
        })
    }

    /// Record the fixed pass command stream: transition both storage images
    /// to GENERAL, dispatch the compute program over the full extent, then
    /// hand the render target to the presentation engine.
    ///
    /// Neither image carries data worth preserving at the transition into
    /// GENERAL, so the source layout is UNDEFINED with no prior access. The
    /// accumulation image stays in GENERAL afterwards; it is never presented
    /// and the next pass reads and rewrites it in place.
    pub unsafe fn record(
        &self,
        swapchain: &Swapchain,
        accumulation: vk::Image,
        pipeline: &ComputePipeline,
        group_size_x: u32,
        group_size_y: u32,
    ) -> Result<(), String> {
        let compute_family = self.compute_family;

        self.device
            .begin_command_buffer(self.command_buffer, &vk::CommandBufferBeginInfo::default())
            .map_err(|e| format!("Failed to begin command buffer: {:?}", e))?;

        let to_general = [
            image_barrier(
                swapchain.image,
                vk::AccessFlags::NONE,
                vk::AccessFlags::SHADER_WRITE,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                compute_family,
            ),
            image_barrier(
                accumulation,
                vk::AccessFlags::NONE,
                vk::AccessFlags::SHADER_WRITE,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                compute_family,
            ),
        ];

        self.device.cmd_pipeline_barrier(
            self.command_buffer,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::DependencyFlags::BY_REGION,
            &[],
            &[],
            &to_general,
        );

        self.device.cmd_bind_pipeline(
            self.command_buffer,
            vk::PipelineBindPoint::COMPUTE,
            pipeline.pipeline,
        );

        self.device.cmd_bind_descriptor_sets(
            self.command_buffer,
            vk::PipelineBindPoint::COMPUTE,
            pipeline.pipeline_layout,
            0,
            &[pipeline.descriptor_set],
            &[],
        );

        self.device.cmd_dispatch(
            self.command_buffer,
            dispatch_size(swapchain.extent.width, group_size_x),
            dispatch_size(swapchain.extent.height, group_size_y),
            1,
        );

        let to_present = [image_barrier(
            swapchain.image,
            vk::AccessFlags::SHADER_WRITE,
            vk::AccessFlags::MEMORY_READ,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            compute_family,
        )];

        self.device.cmd_pipeline_barrier(
            self.command_buffer,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::BY_REGION,
            &[],
            &[],
            &to_present,
        );

        self.device
            .end_command_buffer(self.command_buffer)
            .map_err(|e| format!("Failed to end command buffer: {:?}", e))
    }

    /// One fully serialized pass: acquire the presentable image, submit the
    /// recorded buffer behind the fence, block until it completes, then
    /// present gated on the acquisition semaphore.
    ///
    /// The semaphore is safe to reuse every pass because the fence wait
    /// guarantees no prior submission can still be pending when the next
    /// acquisition signals it.
    pub unsafe fn submit_pass(
        &mut self,
        ctx: &VulkanContext,
        swapchain: &Swapchain,
    ) -> Result<(), String> {
        let image_index = swapchain.acquire(ctx, self.semaphore)?;

        self.device
            .reset_fences(&[self.fence])
            .map_err(|e| format!("Failed to reset fence: {:?}", e))?;

        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        self.device
            .queue_submit(ctx.compute_queue, &[submit_info], self.fence)
            .map_err(|e| format!("Failed to submit command buffer: {:?}", e))?;

        self.device
            .wait_for_fences(&[self.fence], true, u64::MAX)
            .map_err(|e| format!("Failed to wait for fence: {:?}", e))?;

        self.render_target_layout = vk::ImageLayout::PRESENT_SRC_KHR;

        swapchain.present(ctx, self.semaphore, image_index)
    }

    /// Layout the presentable image was last left in: UNDEFINED until the
    /// first pass has been submitted, PRESENT_SRC_KHR afterwards. The
    /// readback path uses this as its barrier's source layout.
    pub fn render_target_layout(&self) -> vk::ImageLayout {
        self.render_target_layout
    }

    /// Pool for one-shot command buffers on the compute queue.
    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    /// Destroy the sync pair and the pool (which frees the command buffer).
    pub unsafe fn destroy(&mut self, ctx: &VulkanContext) {
        ctx.device.destroy_semaphore(self.semaphore, None);
        ctx.device.destroy_fence(self.fence, None);
        ctx.device.destroy_command_pool(self.pool, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // dispatch_size
    // ============================================================

    #[test]
    fn test_dispatch_size_exact_multiple() {
        assert_eq!(dispatch_size(1280, 16), 80);
    }

    #[test]
    fn test_dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(1200, 16), 75);
        assert_eq!(dispatch_size(675, 16), 43);
        assert_eq!(dispatch_size(1, 16), 1);
    }

    #[test]
    fn test_dispatch_size_group_of_one() {
        assert_eq!(dispatch_size(675, 1), 675);
    }

    // ============================================================
    // image_barrier
    // ============================================================

    #[test]
    fn test_pass_entry_barrier_discards_prior_content() {
        let barrier = image_barrier(
            vk::Image::null(),
            vk::AccessFlags::NONE,
            vk::AccessFlags::SHADER_WRITE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            0,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::NONE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::SHADER_WRITE);
    }

    #[test]
    fn test_present_barrier_publishes_shader_writes() {
        let barrier = image_barrier(
            vk::Image::null(),
            vk::AccessFlags::SHADER_WRITE,
            vk::AccessFlags::MEMORY_READ,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            0,
        );
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::MEMORY_READ);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_barrier_stays_on_one_queue_family() {
        let barrier = image_barrier(
            vk::Image::null(),
            vk::AccessFlags::NONE,
            vk::AccessFlags::SHADER_WRITE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            3,
        );
        assert_eq!(barrier.src_queue_family_index, 3);
        assert_eq!(barrier.dst_queue_family_index, 3);
    }

    #[test]
    fn test_barrier_covers_single_mip_color_subresource() {
        let barrier = image_barrier(
            vk::Image::null(),
            vk::AccessFlags::NONE,
            vk::AccessFlags::SHADER_WRITE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            0,
        );
        let range = barrier.subresource_range;
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
    }
}
