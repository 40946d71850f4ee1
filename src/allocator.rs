mod device;
mod error;
mod ledger;
mod memory;
mod selector;

pub use device::DeviceMemoryProvider;
pub use error::AllocationError;
pub use ledger::Block;
pub use memory::{MemoryUse, Region};
pub use selector::MemoryTypes;

use vulkanalia::prelude::v1_0::*;
use log::*;

/// Unique identifier of a placement. Ids start at 1 and are
/// never reused over the lifetime of an allocator.
pub type AllocationId = u64;

/// Index of a region within the allocator.
pub type RegionId = u64;

/// By default, regions are allocated with a size of 256 MiB.
pub const DEFAULT_REGION_SIZE: u64 = 256 * 1024 * 1024;

/// Tunables of the allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Size of a freshly created region. Requests larger than
    /// this get a region of their own size.
    pub region_size: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            region_size: DEFAULT_REGION_SIZE,
        }
    }
}

impl AllocatorConfig {
    pub fn with_region_size(mut self, region_size: u64) -> Self {
        self.region_size = region_size;
        self
    }
}

/// Size, alignment and allowed memory types of a resource to
/// be placed, as reported by `vkGet*MemoryRequirements`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacementRequirements {
    /// Size of the resource in bytes.
    pub size: u64,
    /// Alignment of the resource offset, a power of two.
    pub alignment: u64,
    /// Bit field of the memory types the resource can be bound
    /// to.
    pub memory_type_bits: u32,
}

impl PlacementRequirements {
    pub fn new(size: u64, alignment: u64, memory_type_bits: u32) -> Self {
        Self {
            size,
            alignment,
            memory_type_bits,
        }
    }

    fn validate(&self) -> Result<(), AllocationError> {
        if self.size == 0 || !self.alignment.is_power_of_two() {
            return Err(AllocationError::InvalidRequirements {
                size: self.size,
                alignment: self.alignment,
            });
        }
        Ok(())
    }
}

impl From<vk::MemoryRequirements> for PlacementRequirements {
    fn from(requirements: vk::MemoryRequirements) -> Self {
        Self::new(
            requirements.size,
            requirements.alignment,
            requirements.memory_type_bits,
        )
    }
}

/// Location of a placed resource. The resource is bound to the
/// region memory (see `Allocator::memory`) at `offset`; the
/// handle is then needed to release the placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlacementHandle {
    /// Region the resource was placed in.
    pub region: RegionId,
    /// Offset of the resource within the region memory.
    pub offset: u64,
    /// Id of the placement.
    pub allocation: AllocationId,
}

/// Memory allocator that acquires a few large regions of
/// device memory and places many resources in each of them.
///
/// The allocator is not thread-safe: access from several
/// threads must go through a single lock. It must be torn down
/// with `teardown` once every placed resource is destroyed.
pub struct Allocator<M = vk::DeviceMemory> {
    /// Memory types supported by the device.
    memory_types: MemoryTypes,
    config: AllocatorConfig,
    /// Regions in creation order. A region id is its index in
    /// this list, which only grows until teardown.
    regions: Vec<Region<M>>,
    /// Id given to the next placement.
    next_allocation: AllocationId,
}

impl Allocator<vk::DeviceMemory> {
    pub fn from_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        config: AllocatorConfig,
    ) -> Self {
        // The memory types of the device are queried once and
        // for all; they cannot change during its lifetime.
        Self::new(MemoryTypes::from_device(instance, physical_device), config)
    }
}

impl<M> Allocator<M> {
    pub fn new(memory_types: MemoryTypes, config: AllocatorConfig) -> Self {
        Self {
            memory_types,
            config,
            regions: Vec::new(),
            next_allocation: 1,
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn memory_types(&self) -> &MemoryTypes {
        &self.memory_types
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region<M>> + '_ {
        self.regions.iter()
    }

    pub fn region(&self, id: RegionId) -> Option<&Region<M>> {
        self.regions.get(usize::try_from(id).ok()?)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Device memory the placed resource must be bound to.
    pub fn memory(&self, handle: &PlacementHandle) -> Option<&M> {
        self.region(handle.region).map(Region::memory)
    }

    /// Places a resource in memory with the given properties,
    /// allocating a new region from the device if none of the
    /// existing ones has room for it.
    pub fn place<P>(
        &mut self,
        provider: &P,
        requirements: PlacementRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<PlacementHandle, AllocationError>
    where
        P: DeviceMemoryProvider<Memory = M>,
    {
        requirements.validate()?;

        // Find the memory type that satisfies the requirements
        // and properties.
        let memory_type = self.memory_types
            .select(requirements.memory_type_bits, properties)
            .ok_or(AllocationError::NoCompatibleMemoryType {
                type_bits: requirements.memory_type_bits,
                properties,
            })?;

        // Then, try the regions of that type in the order they
        // were created, and take the first one with room.
        let next_allocation = &mut self.next_allocation;
        let placed = self.regions
            .iter_mut()
            .filter(|region| region.memory_type() == memory_type)
            .find_map(|region| {
                region
                    .place(&requirements, next_allocation)
                    .map(|(offset, allocation)| PlacementHandle {
                        region: region.id(),
                        offset,
                        allocation,
                    })
            });

        if let Some(handle) = placed {
            debug!("Placed {:?} with {:?}.", handle, requirements);
            return Ok(handle);
        }

        // Else, there is no free space available, so we need to
        // create a new region. It is at least as large as the
        // resource, so that large resources still get placed.
        // Nothing is added to the list unless the device memory
        // was actually allocated.
        let id = self.regions.len() as RegionId;
        let size = self.config.region_size.max(requirements.size);
        let mut region = Region::new(provider, id, memory_type, size)?;

        // The region is empty and starts at offset 0, which is
        // aligned to anything, so this can only fail on
        // malformed requirements.
        let Some((offset, allocation)) = region.place(&requirements, &mut self.next_allocation) else {
            region.release_all(provider);
            return Err(AllocationError::InvalidRequirements {
                size: requirements.size,
                alignment: requirements.alignment,
            });
        };
        self.regions.push(region);

        let handle = PlacementHandle {
            region: id,
            offset,
            allocation,
        };
        debug!("Placed {:?} with {:?} in a new region.", handle, requirements);
        Ok(handle)
    }

    /// Same as `place`, with the properties derived from how
    /// the resource will be used.
    pub fn place_for<P>(
        &mut self,
        provider: &P,
        requirements: PlacementRequirements,
        location: MemoryUse,
    ) -> Result<PlacementHandle, AllocationError>
    where
        P: DeviceMemoryProvider<Memory = M>,
    {
        self.place(provider, requirements, location.into())
    }

    /// Releases a placement. The resource bound to it must have
    /// been destroyed already. Releasing the same handle twice
    /// is reported as `NotFound`.
    pub fn release(&mut self, handle: &PlacementHandle) -> Result<(), AllocationError> {
        let not_found = AllocationError::NotFound {
            region: handle.region,
            allocation: handle.allocation,
        };

        let region = usize::try_from(handle.region)
            .ok()
            .and_then(|index| self.regions.get_mut(index))
            .ok_or(not_found)?;

        if let Err(error) = region.release(handle.allocation) {
            warn!("Failed to release {:?}: {}", handle, error);
            return Err(error);
        }

        debug!("Released {:?}.", handle);
        Ok(())
    }

    /// Gives every region back to the device. The allocator is
    /// consumed, so it cannot be used after this.
    pub fn teardown<P>(mut self, provider: &P)
    where
        P: DeviceMemoryProvider<Memory = M>,
    {
        let count = self.regions.len();
        for region in self.regions.drain(..) {
            region.release_all(provider);
        }

        info!("Allocator torn down ({} regions released).", count);
    }
}

impl<M> Drop for Allocator<M> {
    fn drop(&mut self) {
        if !self.regions.is_empty() {
            warn!("Allocator dropped without teardown, leaking {} regions.", self.regions.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Device with a fixed number of allocations available.
    struct MockDevice {
        budget: usize,
        allocations: RefCell<Vec<(u64, u32)>>,
    }

    impl MockDevice {
        fn new(budget: usize) -> Self {
            Self {
                budget,
                allocations: RefCell::new(Vec::new()),
            }
        }
    }

    impl DeviceMemoryProvider for MockDevice {
        type Memory = usize;

        fn allocate(&self, size: u64, memory_type: u32) -> Result<usize, AllocationError> {
            let mut allocations = self.allocations.borrow_mut();
            if allocations.len() == self.budget {
                return Err(AllocationError::OutOfDeviceMemory { size, memory_type });
            }
            allocations.push((size, memory_type));
            Ok(allocations.len() - 1)
        }

        fn free(&self, _memory: usize) {}
    }

    fn allocator(region_size: u64) -> Allocator<usize> {
        let memory_types = MemoryTypes::new([
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        Allocator::new(memory_types, AllocatorConfig::default().with_region_size(region_size))
    }

    #[test]
    fn invalid_requirements() {
        let device = MockDevice::new(1);
        let mut allocator = allocator(256);

        for (size, alignment) in [(0, 1), (16, 0), (16, 3)] {
            assert_eq!(
                allocator.place(&device, PlacementRequirements::new(size, alignment, 0b11), vk::MemoryPropertyFlags::empty()),
                Err(AllocationError::InvalidRequirements { size, alignment })
            );
        }
        assert_eq!(allocator.region_count(), 0);
        allocator.teardown(&device);
    }

    #[test]
    fn regions_are_per_memory_type() {
        let device = MockDevice::new(2);
        let mut allocator = allocator(256);
        let requirements = PlacementRequirements::new(64, 1, 0b11);

        let host = allocator.place_for(&device, requirements, MemoryUse::Shared).unwrap();
        let local = allocator.place_for(&device, requirements, MemoryUse::GpuOnly).unwrap();

        assert_eq!((host.region, host.offset), (0, 0));
        assert_eq!((local.region, local.offset), (1, 0));
        assert_eq!(*device.allocations.borrow(), [(256, 0), (256, 1)]);
        assert_eq!(allocator.memory(&local), Some(&1));
        allocator.teardown(&device);
    }

    #[test]
    fn release_with_unknown_region() {
        let device = MockDevice::new(1);
        let mut allocator = allocator(256);

        let handle = PlacementHandle { region: 4, offset: 0, allocation: 1 };
        assert_eq!(
            allocator.release(&handle),
            Err(AllocationError::NotFound { region: 4, allocation: 1 })
        );
        assert_eq!(allocator.memory(&handle), None);
        allocator.teardown(&device);
    }
}
