use vulkanalia::prelude::v1_0::*;

/// Property flags of every memory type exposed by the device,
/// indexed by memory type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryTypes {
    properties: Vec<vk::MemoryPropertyFlags>,
}

impl MemoryTypes {
    pub fn new(properties: impl IntoIterator<Item = vk::MemoryPropertyFlags>) -> Self {
        // A memory type bit field is 32 bits wide, so there is
        // no way to request a type past that.
        let properties = properties
            .into_iter()
            .take(vk::MAX_MEMORY_TYPES)
            .collect();

        Self { properties }
    }

    /// Queries the memory types of a physical device.
    pub fn from_device(instance: &Instance, physical_device: vk::PhysicalDevice) -> Self {
        let memory_properties = unsafe {
            instance.get_physical_device_memory_properties(physical_device)
        };

        Self::from(memory_properties)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn properties(&self, memory_type: u32) -> Option<vk::MemoryPropertyFlags> {
        self.properties.get(memory_type as usize).copied()
    }

    /// Returns the first memory type (lowest index) that is
    /// allowed by `type_bits` and has at least the `required`
    /// properties.
    pub fn select(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        // The "memory type bits" of a resource have a bit set at
        // the index of each memory type it can live in. On top
        // of that, the type must have every property that was
        // asked for (but may have more). Drivers list the types
        // by preference, so the first match is the best one.
        (0..self.properties.len() as u32).find(|&index| {
            type_bits & (1 << index) != 0
                && self.properties[index as usize].contains(required)
        })
    }
}

impl From<vk::PhysicalDeviceMemoryProperties> for MemoryTypes {
    fn from(memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        let count = memory_properties.memory_type_count as usize;

        Self::new(
            memory_properties.memory_types
                .iter()
                .take(count)
                .map(|memory_type| memory_type.property_flags),
        )
    }
}
