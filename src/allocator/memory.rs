use super::{
    AllocationError,
    AllocationId,
    PlacementRequirements,
    RegionId,
    device::DeviceMemoryProvider,
    ledger::{Block, BlockLedger},
};

use vulkanalia::vk;
use log::*;

/// How a memory resource will be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryUse {
    /// Resource that is only used by the GPU. Corresponds to
    /// the `DEVICE_LOCAL` flag.
    GpuOnly,
    /// Resource that is uploaded from the CPU to the GPU.
    /// Corresponds to `DEVICE_LOCAL | HOST_VISIBLE`.
    CpuToGpu,
    /// Data shared between the host and the device, without
    /// requiring it to be device local. Corresponds to
    /// `HOST_VISIBLE | HOST_COHERENT`.
    Shared,
}

impl From<MemoryUse> for vk::MemoryPropertyFlags {
    fn from(location: MemoryUse) -> Self {
        match location {
            MemoryUse::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUse::CpuToGpu => vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
            MemoryUse::Shared => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        }
    }
}

/// One device memory object of a single memory type, which is
/// sub-allocated into blocks.
pub struct Region<M> {
    /// Index of the region in the allocator.
    id: RegionId,
    /// Index of the memory type the region was allocated from.
    memory_type: u32,
    /// Actual device memory, bound to the placed resources.
    memory: M,
    /// Blocks the region is comprised of.
    ledger: BlockLedger,
}

impl<M> Region<M> {
    pub fn new<P>(
        provider: &P,
        id: RegionId,
        memory_type: u32,
        size: u64,
    ) -> Result<Self, AllocationError>
    where
        P: DeviceMemoryProvider<Memory = M>,
    {
        let memory = provider.allocate(size, memory_type)?;
        info!("Allocated region {} ({} bytes, memory type {}).", id, size, memory_type);

        Ok(Self {
            id,
            memory_type,
            memory,
            ledger: BlockLedger::new(size),
        })
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn memory_type(&self) -> u32 {
        self.memory_type
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn size(&self) -> u64 {
        self.ledger.size()
    }

    /// Number of bytes handed out to placements.
    pub fn allocated(&self) -> u64 {
        self.ledger.allocated()
    }

    /// Number of bytes not handed out, whether or not they are
    /// contiguous.
    pub fn free_size(&self) -> u64 {
        self.ledger.free_size()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }

    /// Blocks of the region, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.ledger.blocks()
    }

    /// Tries to place a resource in the region. On success, the
    /// placement takes the next allocation id from the counter
    /// and the offset is returned along with it; `None` means
    /// the region has no room left for it.
    pub fn place(
        &mut self,
        requirements: &PlacementRequirements,
        next_allocation: &mut AllocationId,
    ) -> Option<(u64, AllocationId)> {
        let PlacementRequirements { size, alignment, .. } = *requirements;

        let block = self.ledger.find_fit(size, alignment)?;
        let allocation = *next_allocation;
        let offset = self.ledger.place(block, size, alignment, allocation)?;
        *next_allocation += 1;

        debug_assert!(self.ledger.is_partitioned());
        Some((offset, allocation))
    }

    /// Frees the block holding the given placement and merges
    /// it with its free neighbours.
    pub fn release(&mut self, allocation: AllocationId) -> Result<(), AllocationError> {
        let block = self.ledger
            .find_allocation(allocation)
            .ok_or(AllocationError::NotFound { region: self.id, allocation })?;

        let block = self.ledger.release(block);
        self.ledger.coalesce(block);

        debug_assert!(self.ledger.is_partitioned());
        Ok(())
    }

    /// Gives the device memory back. Every resource placed in
    /// the region must have been destroyed beforehand.
    pub fn release_all<P>(self, provider: &P)
    where
        P: DeviceMemoryProvider<Memory = M>,
    {
        if !self.is_empty() {
            warn!("Releasing region {} with {} bytes still in use.", self.id, self.allocated());
        }
        provider.free(self.memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Hands out increasing integers as memory handles, and
    /// counts the live ones.
    #[derive(Default)]
    struct Counter {
        next: Cell<u32>,
        live: Cell<u32>,
    }

    impl DeviceMemoryProvider for Counter {
        type Memory = u32;

        fn allocate(&self, _size: u64, _memory_type: u32) -> Result<u32, AllocationError> {
            self.next.set(self.next.get() + 1);
            self.live.set(self.live.get() + 1);
            Ok(self.next.get())
        }

        fn free(&self, _memory: u32) {
            self.live.set(self.live.get() - 1);
        }
    }

    fn requirements(size: u64, alignment: u64) -> PlacementRequirements {
        PlacementRequirements::new(size, alignment, u32::MAX)
    }

    #[test]
    fn place_consumes_ids_only_on_success() {
        let counter = Counter::default();
        let mut region = Region::new(&counter, 0, 0, 256).unwrap();
        let mut next = 7;

        assert_eq!(region.place(&requirements(200, 1), &mut next), Some((0, 7)));
        assert_eq!(region.place(&requirements(100, 1), &mut next), None);
        assert_eq!(region.place(&requirements(56, 8), &mut next), Some((200, 8)));
        assert_eq!(next, 9);
        assert_eq!(region.allocated(), 256);
        assert_eq!(region.free_size(), 0);
    }

    #[test]
    fn release_unknown_allocation_is_reported() {
        let counter = Counter::default();
        let mut region = Region::new(&counter, 3, 0, 256).unwrap();
        let mut next = 1;

        region.place(&requirements(64, 16), &mut next).unwrap();
        assert_eq!(region.release(1), Ok(()));
        assert_eq!(
            region.release(1),
            Err(AllocationError::NotFound { region: 3, allocation: 1 })
        );
        assert!(region.is_empty());
        assert_eq!(region.blocks().count(), 1);
    }

    #[test]
    fn release_all_frees_memory() {
        let counter = Counter::default();
        let region = Region::new(&counter, 0, 1, 64).unwrap();

        assert_eq!(counter.live.get(), 1);
        assert_eq!(*region.memory(), 1);
        assert_eq!(region.memory_type(), 1);

        region.release_all(&counter);
        assert_eq!(counter.live.get(), 0);
    }

    #[test]
    fn memory_use_flags() {
        assert_eq!(
            vk::MemoryPropertyFlags::from(MemoryUse::GpuOnly),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
        assert!(vk::MemoryPropertyFlags::from(MemoryUse::CpuToGpu)
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(!vk::MemoryPropertyFlags::from(MemoryUse::Shared)
            .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
    }
}
