use super::AllocationError;

use vulkanalia::prelude::v1_0::*;
use log::*;

/// Source of the device memory objects that regions are carved
/// out of.
pub trait DeviceMemoryProvider {
    /// Handle to one device memory object.
    type Memory;

    /// Allocates `size` bytes of the given memory type.
    fn allocate(&self, size: u64, memory_type: u32) -> Result<Self::Memory, AllocationError>;

    /// Gives the memory object back to the device. Resources
    /// bound to it must have been destroyed beforehand.
    fn free(&self, memory: Self::Memory);
}

impl DeviceMemoryProvider for Device {
    type Memory = vk::DeviceMemory;

    fn allocate(&self, size: u64, memory_type: u32) -> Result<vk::DeviceMemory, AllocationError> {
        // Memory info: the memory object is allocated from the
        // device with a specific size and memory type. This
        // counts against `maxMemoryAllocationCount`, which is
        // why it only happens once per region.
        let memory_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type);

        unsafe { self.allocate_memory(&memory_info, None) }.map_err(|error| {
            warn!("Failed to allocate {} bytes of memory type {}: {:?}", size, memory_type, error);
            AllocationError::OutOfDeviceMemory { size, memory_type }
        })
    }

    fn free(&self, memory: vk::DeviceMemory) {
        unsafe { self.free_memory(memory, None) };
    }
}
