//! Renderer facade: owns every GPU resource and drives the progressive loop.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::Path;

use crate::scene::Scene;
use crate::settings::RenderSettings;
use crate::vulkan::{
    readback, Buffer, CommandController, ComputePipeline, Image, MemoryManager, Swapchain,
    VulkanContext, VulkanSurface,
};

/// Format of the accumulation image: full-float channels so the running
/// radiance sum neither clamps nor quantizes at display precision.
pub const ACCUMULATION_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Per-pass parameters read by the compute shader to weight the blend of new
/// samples into the accumulation image. Overwritten before every submission.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PassInfo {
    /// 1-based index of the pass being submitted.
    pub pass: u32,
    pub total_passes: u32,
    pub total_samples: u32,
    pub _pad: u32,
}

impl PassInfo {
    pub fn for_pass(pass: u32, settings: &RenderSettings) -> Self {
        Self {
            pass,
            total_passes: settings.total_passes,
            total_samples: settings.total_samples,
            _pad: 0,
        }
    }
}

/// Samples accumulated once pass `pass` of `total_passes` has completed.
/// Reporting only; the shader derives its own per-pass weighting.
pub fn samples_for_pass(pass: u32, total_passes: u32, total_samples: u32) -> u32 {
    if total_passes == 0 {
        return 0;
    }
    (pass as u64 * total_samples as u64 / total_passes as u64) as u32
}

/// The progressive renderer.
///
/// Owns the device context, the presentable and accumulation images, the
/// scene and per-pass buffers, the compute pipeline and the command/sync
/// controller. Construction is all-or-nothing: any failure is a fatal
/// configuration error, and nothing in the per-pass loop can fail in a
/// user-correctable way once construction has succeeded.
pub struct Renderer {
    settings: RenderSettings,
    context: VulkanContext,
    swapchain: Swapchain,
    memory: MemoryManager,
    scene_buffer: Buffer,
    pass_buffer: Buffer,
    accumulation: Image,
    pipeline: ComputePipeline,
    controller: CommandController,
}

impl Renderer {
    /// Build the full pipeline against `window`'s surface and record the pass
    /// command buffer.
    ///
    /// # Safety
    /// The window must outlive the renderer.
    pub unsafe fn new(
        settings: RenderSettings,
        scene: &Scene,
        window: &winit::window::Window,
    ) -> Result<Self, String> {
        let display_handle = window
            .display_handle()
            .map_err(|e| format!("Failed to get display handle: {:?}", e))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| format!("Failed to get window handle: {:?}", e))?
            .as_raw();

        let context =
            VulkanContext::new(display_handle, window_handle, cfg!(debug_assertions))?;
        let surface = VulkanSurface::new(&context)?;
        let swapchain = Swapchain::new(
            &context,
            &surface,
            settings.window_width,
            settings.window_height,
        )?;

        let memory = MemoryManager::new(&context);

        // The scene is host-written exactly once, here; from the GPU's
        // perspective it is immutable for the rest of the run.
        let scene_buffer = memory.create_buffer(
            std::mem::size_of::<Scene>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        memory.write_buffer(&scene_buffer, scene)?;

        let pass_buffer = memory.create_buffer(
            std::mem::size_of::<PassInfo>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let accumulation = memory.create_image(
            ACCUMULATION_FORMAT,
            vk::ImageUsageFlags::STORAGE,
            swapchain.extent,
        )?;

        let pipeline = ComputePipeline::new(
            &context,
            &settings.shader_path,
            swapchain.view,
            accumulation.view,
            &scene_buffer,
            &pass_buffer,
        )?;

        let controller = CommandController::new(&context)?;
        controller.record(
            &swapchain,
            accumulation.handle,
            &pipeline,
            settings.group_size_x,
            settings.group_size_y,
        )?;

        Ok(Self {
            settings,
            context,
            swapchain,
            memory,
            scene_buffer,
            pass_buffer,
            accumulation,
            pipeline,
            controller,
        })
    }

    /// Run one accumulation pass: write the parameter block, then replay the
    /// recorded command buffer and block until it has presented.
    ///
    /// The previous pass's fence wait guarantees no dispatch is still reading
    /// the parameter block when it is overwritten here.
    pub unsafe fn render_pass(&mut self, pass: u32) -> Result<(), String> {
        let info = PassInfo::for_pass(pass, &self.settings);
        self.memory.write_buffer(&self.pass_buffer, &info)?;
        self.controller.submit_pass(&self.context, &self.swapchain)
    }

    /// Export the presentable image to `path`.
    ///
    /// Must not race a pass; the per-pass fence wait in [`Self::render_pass`]
    /// guarantees the image is idle whenever the caller gets control back.
    pub unsafe fn save_image(&self, path: &Path) -> Result<(), String> {
        readback::save_image(
            &self.context,
            &self.memory,
            &self.controller,
            &self.swapchain,
            self.controller.render_target_layout(),
            path,
        )
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }
}

impl Drop for Renderer {
    /// Teardown mirrors construction in reverse. The context itself (device,
    /// surface, instance) is dropped after everything here, by its own `Drop`.
    fn drop(&mut self) {
        unsafe {
            self.context.wait_idle();

            self.controller.destroy(&self.context);
            self.pipeline.destroy(&self.context);
            self.memory.destroy_image(&self.accumulation);
            self.memory.destroy_buffer(&self.pass_buffer);
            self.memory.destroy_buffer(&self.scene_buffer);
            self.swapchain.destroy(&self.context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================
    // PassInfo
    // ============================================================

    #[test]
    fn test_pass_info_layout() {
        assert_eq!(std::mem::size_of::<PassInfo>(), 16);
    }

    #[test]
    fn test_pass_info_carries_loop_counter() {
        let settings = RenderSettings {
            total_passes: 10,
            total_samples: 1000,
            ..Default::default()
        };
        let info = PassInfo::for_pass(3, &settings);
        assert_eq!(info.pass, 3);
        assert_eq!(info.total_passes, 10);
        assert_eq!(info.total_samples, 1000);
    }

    #[test]
    fn test_consecutive_passes_differ_only_in_index() {
        let settings = RenderSettings::default();
        for pass in 1..=settings.total_passes {
            let info = PassInfo::for_pass(pass, &settings);
            assert_eq!(info.pass, pass);
            assert_eq!(info.total_passes, settings.total_passes);
            assert_eq!(info.total_samples, settings.total_samples);
        }
    }

    // ============================================================
    // samples_for_pass
    // ============================================================

    #[test]
    fn test_samples_scale_linearly_with_pass() {
        assert_eq!(samples_for_pass(3, 10, 1000), 300);
        assert_eq!(samples_for_pass(10, 10, 1000), 1000);
    }

    #[test]
    fn test_samples_round_down() {
        assert_eq!(samples_for_pass(1, 3, 100), 33);
    }

    #[test]
    fn test_samples_survive_large_budgets() {
        // pass * total_samples would overflow u32
        assert_eq!(samples_for_pass(4000, 4000, 2_000_000_000), 2_000_000_000);
    }

    #[test]
    fn test_zero_passes_yield_zero_samples() {
        assert_eq!(samples_for_pass(0, 0, 1000), 0);
    }
}
