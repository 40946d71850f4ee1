use super::{AllocationId, RegionId};

use thiserror::Error;
use vulkanalia::vk;

/// Reasons a placement or a release can fail. Running out of
/// room in the existing regions is not one of them: in that
/// case the allocator simply grows by one region.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationError {
    /// None of the memory types allowed by the resource has the
    /// requested properties. The caller may retry with weaker
    /// properties (dropping `DEVICE_LOCAL` for instance).
    #[error("No memory type in {type_bits:#034b} supports {properties:?}.")]
    NoCompatibleMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },
    /// The device refused to allocate a new region. The
    /// allocator does not retry nor compact to recover from it.
    #[error("Out of device memory ({size} bytes of memory type {memory_type}).")]
    OutOfDeviceMemory {
        size: u64,
        memory_type: u32,
    },
    /// The placement does not exist: it was already released,
    /// or the handle does not belong to this allocator.
    #[error("Allocation {allocation} not found in region {region}.")]
    NotFound {
        region: RegionId,
        allocation: AllocationId,
    },
    /// The requested size is zero, or the alignment is not a
    /// power of two.
    #[error("Invalid requirements (size {size}, alignment {alignment}).")]
    InvalidRequirements {
        size: u64,
        alignment: u64,
    },
}
