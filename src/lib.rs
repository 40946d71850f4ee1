//! Sub-allocation of Vulkan device memory: a few large regions
//! are allocated from the device, and resources are placed at
//! offsets inside them instead of getting a memory object each.

pub mod allocator;

pub use allocator::{
    AllocationError,
    AllocationId,
    Allocator,
    AllocatorConfig,
    DeviceMemoryProvider,
    MemoryTypes,
    MemoryUse,
    PlacementHandle,
    PlacementRequirements,
    RegionId,
};
