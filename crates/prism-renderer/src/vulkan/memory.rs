//! Buffer and image allocation with manual memory-type selection.
//!
//! Every resource owns exactly one dedicated allocation, picked by the
//! first-match scan in [`find_memory_type_index`]. Teardown releases the view,
//! then the resource, then the memory; the reverse order is undefined behavior
//! in Vulkan, so the destroy functions are the only place resources die.

use ash::vk;
use bytemuck::Pod;

use super::VulkanContext;

/// GPU buffer with its backing allocation.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

/// GPU image with its backing allocation and color view.
pub struct Image {
    pub handle: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Select the first memory type whose bit is set in `type_bits` and whose
/// property flags cover `required`.
///
/// The scan runs in the device's declared order, so the result is
/// deterministic for a given device. No match is a fatal configuration error;
/// there is no retry or fallback.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, String> {
    for index in 0..memory_properties.memory_type_count {
        let supported = type_bits & (1 << index) != 0;
        let flags = memory_properties.memory_types[index as usize].property_flags;

        if supported && flags.contains(required) {
            return Ok(index);
        }
    }

    Err(format!(
        "No memory type matches bits {:#010x} with properties {:?}",
        type_bits, required
    ))
}

/// Allocates and destroys buffers and images against one logical device.
pub struct MemoryManager {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl MemoryManager {
    /// Create a new memory manager.
    pub unsafe fn new(ctx: &VulkanContext) -> Self {
        Self {
            device: ctx.device.clone(),
            memory_properties: ctx
                .instance
                .get_physical_device_memory_properties(ctx.physical_device),
        }
    }

    /// Create a buffer and bind it to freshly allocated memory with the
    /// requested properties. Partially constructed state is released on every
    /// failure path.
    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Buffer, String> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = self
            .device
            .create_buffer(&buffer_info, None)
            .map_err(|e| format!("Failed to create buffer: {:?}", e))?;

        let requirements = self.device.get_buffer_memory_requirements(handle);

        let memory = match self.allocate(&requirements, memory_flags) {
            Ok(memory) => memory,
            Err(e) => {
                self.device.destroy_buffer(handle, None);
                return Err(e);
            }
        };

        if let Err(e) = self.device.bind_buffer_memory(handle, memory, 0) {
            self.device.free_memory(memory, None);
            self.device.destroy_buffer(handle, None);
            return Err(format!("Failed to bind buffer memory: {:?}", e));
        }

        Ok(Buffer {
            handle,
            memory,
            size,
        })
    }

    /// Create a 2-D device-local image with a single-mip color view.
    pub unsafe fn create_image(
        &self,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        extent: vk::Extent2D,
    ) -> Result<Image, String> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = self
            .device
            .create_image(&image_info, None)
            .map_err(|e| format!("Failed to create image: {:?}", e))?;

        let requirements = self.device.get_image_memory_requirements(handle);

        let memory = match self.allocate(&requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                self.device.destroy_image(handle, None);
                return Err(e);
            }
        };

        if let Err(e) = self.device.bind_image_memory(handle, memory, 0) {
            self.device.free_memory(memory, None);
            self.device.destroy_image(handle, None);
            return Err(format!("Failed to bind image memory: {:?}", e));
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match self.device.create_image_view(&view_info, None) {
            Ok(view) => view,
            Err(e) => {
                self.device.destroy_image(handle, None);
                self.device.free_memory(memory, None);
                return Err(format!("Failed to create image view: {:?}", e));
            }
        };

        Ok(Image {
            handle,
            memory,
            view,
            format,
            extent,
        })
    }

    unsafe fn allocate(
        &self,
        requirements: &vk::MemoryRequirements,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory, String> {
        let memory_type_index = find_memory_type_index(
            &self.memory_properties,
            requirements.memory_type_bits,
            memory_flags,
        )?;

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        self.device
            .allocate_memory(&allocate_info, None)
            .map_err(|e| format!("Failed to allocate memory: {:?}", e))
    }

    /// Write `data` into a host-visible buffer.
    ///
    /// The buffer's memory is HOST_COHERENT, so the write is visible to the
    /// next submission without an explicit flush.
    pub unsafe fn write_buffer<T: Pod>(&self, buffer: &Buffer, data: &T) -> Result<(), String> {
        let bytes = bytemuck::bytes_of(data);

        let ptr = self
            .device
            .map_memory(
                buffer.memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )
            .map_err(|e| format!("Failed to map buffer memory: {:?}", e))?;

        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        self.device.unmap_memory(buffer.memory);

        Ok(())
    }

    /// Read the full contents of a host-visible buffer.
    pub unsafe fn read_buffer(&self, buffer: &Buffer, len: usize) -> Result<Vec<u8>, String> {
        let ptr = self
            .device
            .map_memory(
                buffer.memory,
                0,
                len as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )
            .map_err(|e| format!("Failed to map buffer memory: {:?}", e))?;

        let bytes = std::slice::from_raw_parts(ptr as *const u8, len).to_vec();
        self.device.unmap_memory(buffer.memory);

        Ok(bytes)
    }

    /// Destroy a buffer, then free its memory.
    pub unsafe fn destroy_buffer(&self, buffer: &Buffer) {
        self.device.destroy_buffer(buffer.handle, None);
        self.device.free_memory(buffer.memory, None);
    }

    /// Destroy an image: view, then image, then memory.
    pub unsafe fn destroy_image(&self, image: &Image) {
        self.device.destroy_image_view(image.view, None);
        self.device.destroy_image(image.handle, None);
        self.device.free_memory(image.memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (index, &property_flags) in flags.iter().enumerate() {
            properties.memory_types[index] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        properties
    }

    // ============================================================
    // find_memory_type_index
    // ============================================================

    #[test]
    fn test_first_matching_type_wins() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let index =
            find_memory_type_index(&table, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn test_requirement_mask_filters_types() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        // Only bit 1 is set in the requirement mask, so type 0 is not eligible
        let index =
            find_memory_type_index(&table, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_property_flags_must_be_superset() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let index = find_memory_type_index(
            &table,
            0b11,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_extra_properties_still_match() {
        let table = memory_table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL
            | vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT]);
        let index =
            find_memory_type_index(&table, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn test_no_matching_type_is_an_error() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::PROTECTED,
        ]);
        let result = find_memory_type_index(&table, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_table_is_an_error() {
        let table = memory_table(&[]);
        let result =
            find_memory_type_index(&table, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert!(result.is_err());
    }
}
