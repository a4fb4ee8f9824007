//! Compute pipeline and its fixed descriptor binding contract.

use ash::vk;
use std::ffi::CStr;
use std::path::Path;

use super::{memory::Buffer, VulkanContext};

/// Entry point of the compute shader.
pub const SHADER_ENTRY_POINT: &CStr = c"main";

/// Binding contract with the compute shader, in binding order: the
/// presentable render target, the accumulation image, the scene uniform, and
/// the per-pass parameter uniform. All bindings are compute-stage only.
///
/// The shader's `layout(binding = N)` declarations must match this table
/// entry for entry; changing one side requires changing the other in
/// lock-step.
pub const BINDINGS: [(u32, vk::DescriptorType); 4] = [
    (0, vk::DescriptorType::STORAGE_IMAGE),
    (1, vk::DescriptorType::STORAGE_IMAGE),
    (2, vk::DescriptorType::UNIFORM_BUFFER),
    (3, vk::DescriptorType::UNIFORM_BUFFER),
];

/// Pool sizes covering `BINDINGS` exactly. Only one descriptor set is ever
/// allocated, so there is no headroom.
fn pool_sizes() -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();

    for &(_, ty) in BINDINGS.iter() {
        match sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += 1,
            None => sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: 1,
            }),
        }
    }

    sizes
}

/// Read a SPIR-V binary into 32-bit words.
fn load_shader_words(path: &Path) -> Result<Vec<u32>, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("Failed to read shader binary {}: {}", path.display(), e))?;

    if bytes.len() % 4 != 0 {
        return Err(format!(
            "Shader binary {} is not a whole number of SPIR-V words",
            path.display()
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// The single compute pipeline and its descriptor set.
pub struct ComputePipeline {
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_set: vk::DescriptorSet,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl ComputePipeline {
    /// Build the descriptor set and compute pipeline against the given
    /// resources. The shader module is transient and destroyed as soon as
    /// pipeline creation has finished.
    pub unsafe fn new(
        ctx: &VulkanContext,
        shader_path: &Path,
        render_target: vk::ImageView,
        accumulation: vk::ImageView,
        scene_buffer: &Buffer,
        pass_buffer: &Buffer,
    ) -> Result<Self, String> {
        let descriptor_set_layout = Self::create_descriptor_set_layout(ctx)?;
        let descriptor_pool = Self::create_descriptor_pool(ctx)?;

        let set_layouts = [descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);

        let descriptor_set = ctx
            .device
            .allocate_descriptor_sets(&alloc_info)
            .map_err(|e| format!("Failed to allocate descriptor set: {:?}", e))?[0];

        Self::write_descriptor_set(
            ctx,
            descriptor_set,
            render_target,
            accumulation,
            scene_buffer,
            pass_buffer,
        );

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);

        let pipeline_layout = ctx
            .device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| format!("Failed to create pipeline layout: {:?}", e))?;

        let words = load_shader_words(shader_path)?;
        let module_info = vk::ShaderModuleCreateInfo::default().code(&words);

        let module = ctx
            .device
            .create_shader_module(&module_info, None)
            .map_err(|e| format!("Failed to create shader module: {:?}", e))?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(SHADER_ENTRY_POINT);

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(pipeline_layout);

        let pipeline_result = ctx.device.create_compute_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        );

        // The module has served its purpose whether or not creation succeeded
        ctx.device.destroy_shader_module(module, None);

        let pipeline = pipeline_result
            .map_err(|(_, e)| format!("Failed to create compute pipeline: {:?}", e))?[0];

        Ok(Self {
            descriptor_set_layout,
            descriptor_pool,
            descriptor_set,
            pipeline_layout,
            pipeline,
        })
    }

    /// Create the descriptor set layout from the binding table.
    unsafe fn create_descriptor_set_layout(
        ctx: &VulkanContext,
    ) -> Result<vk::DescriptorSetLayout, String> {
        let bindings: Vec<_> = BINDINGS
            .iter()
            .map(|&(binding, descriptor_type)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        ctx.device
            .create_descriptor_set_layout(&layout_info, None)
            .map_err(|e| format!("Failed to create descriptor set layout: {:?}", e))
    }

    /// Create a pool sized for exactly one set over the binding table.
    unsafe fn create_descriptor_pool(ctx: &VulkanContext) -> Result<vk::DescriptorPool, String> {
        let sizes = pool_sizes();

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(1);

        ctx.device
            .create_descriptor_pool(&pool_info, None)
            .map_err(|e| format!("Failed to create descriptor pool: {:?}", e))
    }

    /// Point each binding at its resource. Both storage images are written in
    /// GENERAL layout, the layout the pass command stream keeps them in while
    /// the compute stage runs.
    unsafe fn write_descriptor_set(
        ctx: &VulkanContext,
        descriptor_set: vk::DescriptorSet,
        render_target: vk::ImageView,
        accumulation: vk::ImageView,
        scene_buffer: &Buffer,
        pass_buffer: &Buffer,
    ) {
        let render_target_info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: render_target,
            image_layout: vk::ImageLayout::GENERAL,
        };

        let accumulation_info = vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: accumulation,
            image_layout: vk::ImageLayout::GENERAL,
        };

        let scene_info = vk::DescriptorBufferInfo {
            buffer: scene_buffer.handle,
            offset: 0,
            range: scene_buffer.size,
        };

        let pass_info = vk::DescriptorBufferInfo {
            buffer: pass_buffer.handle,
            offset: 0,
            range: pass_buffer.size,
        };

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(BINDINGS[0].0)
                .descriptor_type(BINDINGS[0].1)
                .image_info(std::slice::from_ref(&render_target_info)),
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(BINDINGS[1].0)
                .descriptor_type(BINDINGS[1].1)
                .image_info(std::slice::from_ref(&accumulation_info)),
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(BINDINGS[2].0)
                .descriptor_type(BINDINGS[2].1)
                .buffer_info(std::slice::from_ref(&scene_info)),
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(BINDINGS[3].0)
                .descriptor_type(BINDINGS[3].1)
                .buffer_info(std::slice::from_ref(&pass_info)),
        ];

        ctx.device.update_descriptor_sets(&writes, &[]);
    }

    /// Destroy all pipeline objects. The descriptor set is returned to the
    /// pool when the pool dies.
    pub unsafe fn destroy(&mut self, ctx: &VulkanContext) {
        ctx.device.destroy_pipeline(self.pipeline, None);
        ctx.device.destroy_pipeline_layout(self.pipeline_layout, None);
        ctx.device.destroy_descriptor_pool(self.descriptor_pool, None);
        ctx.device
            .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
    }
}
