use super::AllocationId;

/// Index of a block in the ledger. It stays valid for as long
/// as the block lives; the slot of a block that was merged
/// into a neighbour is recycled for the next split.
pub type BlockId = usize;

/// Contiguous range of bytes within a region, either free or
/// holding exactly one placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    /// Offset of the block within the region.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u64,
    /// Id of the placement occupying the block, `None` if the
    /// block is free.
    pub allocation: Option<AllocationId>,
    /// Block right before this one in the region.
    prev: Option<BlockId>,
    /// Block right after this one in the region.
    next: Option<BlockId>,
}

impl Block {
    pub fn in_use(&self) -> bool {
        self.allocation.is_some()
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Free-space tracker of a region. Blocks are kept in an arena
/// and linked in address order, so that they always partition
/// the region: no gaps, no overlaps, the first block starts at
/// 0 and the last one ends at the region size.
pub struct BlockLedger {
    /// Size of the region covered by the ledger.
    size: u64,
    /// Block slots. Vacant slots hold stale data and are never
    /// reachable from `head`.
    slots: Vec<Block>,
    /// Unsorted list of vacant slots.
    vacant: Vec<BlockId>,
    /// First block of the region, the one at offset 0.
    head: BlockId,
    /// Number of bytes currently handed out to placements.
    allocated: u64,
}

impl BlockLedger {
    pub fn new(size: u64) -> Self {
        // At first the region is empty, so it is covered by a
        // single free block.
        let block = Block {
            offset: 0,
            size,
            allocation: None,
            prev: None,
            next: None,
        };

        Self {
            size,
            slots: vec![block],
            vacant: Vec::new(),
            head: 0,
            allocated: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn free_size(&self) -> u64 {
        self.size - self.allocated
    }

    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// Blocks of the region, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.entries().map(|(_, block)| block)
    }

    fn entries(&self) -> Entries<'_> {
        Entries {
            ledger: self,
            cursor: Some(self.head),
        }
    }

    /// Finds the first free block (in address order) that can
    /// hold `size` bytes once its start is aligned up to
    /// `alignment`, which must be a power of two.
    pub fn find_fit(&self, size: u64, alignment: u64) -> Option<BlockId> {
        self.entries()
            .find(|(_, block)| aligned_fit(block, size, alignment).is_some())
            .map(|(id, _)| id)
    }

    /// Places an allocation in the given free block and returns
    /// its offset, or `None` if the block is in use or too
    /// small.
    pub fn place(
        &mut self,
        id: BlockId,
        size: u64,
        alignment: u64,
        allocation: AllocationId,
    ) -> Option<u64> {
        let block = self.slots[id];
        let offset = aligned_fit(&block, size, alignment)?;

        // The bytes between the start of the block and the
        // aligned offset are not thrown away: they become a
        // free block of their own, right in front of the
        // placement. The block before it cannot be free (it
        // would have been merged on release), so there is
        // nothing to coalesce.
        let padding = offset - block.offset;
        if padding > 0 {
            let prefix = self.insert(Block {
                offset: block.offset,
                size: padding,
                allocation: None,
                prev: block.prev,
                next: Some(id),
            });

            match block.prev {
                Some(prev) => self.slots[prev].next = Some(prefix),
                None => self.head = prefix,
            }

            let node = &mut self.slots[id];
            node.prev = Some(prefix);
            node.offset = offset;
            node.size -= padding;
        }

        // If the aligned block is larger than the allocation,
        // split it: the placement keeps the front of the block
        // and the rest goes to a new free block linked right
        // after it.
        let node = self.slots[id];
        let remainder = node.size - size;
        if remainder > 0 {
            let rest = self.insert(Block {
                offset: offset + size,
                size: remainder,
                allocation: None,
                prev: Some(id),
                next: node.next,
            });

            if let Some(next) = node.next {
                self.slots[next].prev = Some(rest);
            }

            let node = &mut self.slots[id];
            node.next = Some(rest);
            node.size = size;
        }

        self.slots[id].allocation = Some(allocation);
        self.allocated += size;
        Some(offset)
    }

    /// Marks the block as free, without merging it with its
    /// neighbours (see `coalesce`).
    pub fn release(&mut self, id: BlockId) -> BlockId {
        let block = &mut self.slots[id];
        if block.allocation.take().is_some() {
            self.allocated -= block.size;
        }
        id
    }

    /// Merges a free block with its direct neighbours when they
    /// are free too, and returns the id of the merged block.
    pub fn coalesce(&mut self, id: BlockId) -> BlockId {
        let node = self.slots[id];
        if node.in_use() {
            return id;
        }

        // Since every release is followed by a coalesce, the
        // neighbours are already as large as they can be, and
        // checking the two of them is enough.
        if let Some(prev_id) = node.prev {
            let prev = self.slots[prev_id];

            if !prev.in_use() {
                // The merged block starts where the previous
                // one did, and takes over its 'prev' link.
                let node = &mut self.slots[id];
                node.offset = prev.offset;
                node.size += prev.size;
                node.prev = prev.prev;

                match prev.prev {
                    Some(before) => self.slots[before].next = Some(id),
                    None => self.head = id,
                }
                self.remove(prev_id);
            }
        }

        let node = self.slots[id];
        if let Some(next_id) = node.next {
            let next = self.slots[next_id];

            if !next.in_use() {
                let node = &mut self.slots[id];
                node.size += next.size;
                node.next = next.next;

                if let Some(after) = next.next {
                    self.slots[after].prev = Some(id);
                }
                self.remove(next_id);
            }
        }

        id
    }

    /// Linear scan for the block holding the given placement.
    pub fn find_allocation(&self, allocation: AllocationId) -> Option<BlockId> {
        self.entries()
            .find(|(_, block)| block.allocation == Some(allocation))
            .map(|(id, _)| id)
    }

    /// Whether the blocks cover the whole region, in order and
    /// without overlapping, and no two free blocks touch.
    pub(crate) fn is_partitioned(&self) -> bool {
        let mut end = 0;
        let mut prev: Option<&Block> = None;

        for block in self.blocks() {
            if block.offset != end || block.size == 0 {
                return false;
            }
            if prev.map_or(false, |prev| !prev.in_use() && !block.in_use()) {
                return false;
            }
            end = block.end();
            prev = Some(block);
        }

        end == self.size
    }

    fn insert(&mut self, block: Block) -> BlockId {
        match self.vacant.pop() {
            Some(id) => {
                self.slots[id] = block;
                id
            }
            None => {
                self.slots.push(block);
                self.slots.len() - 1
            }
        }
    }

    fn remove(&mut self, id: BlockId) {
        debug_assert!(!self.vacant.contains(&id));
        self.vacant.push(id);
    }
}

struct Entries<'a> {
    ledger: &'a BlockLedger,
    cursor: Option<BlockId>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = (BlockId, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let block = &self.ledger.slots[id];
        self.cursor = block.next;
        Some((id, block))
    }
}

/// Returns the offset a placement of `size` bytes would get in
/// the block, if the block is free and large enough once its
/// start is aligned.
fn aligned_fit(block: &Block, size: u64, alignment: u64) -> Option<u64> {
    if block.in_use() {
        return None;
    }

    let offset = align_up(block.offset, alignment)?;
    let end = offset.checked_add(size)?;
    (end <= block.end()).then_some(offset)
}

pub(crate) fn align_down(value: u64, alignment: u64) -> u64 {
    // With a power of two A, A - 1 has all the bits lower than
    // A set, so masking with its complement clears them and
    // leaves the closest multiple of A below the value:
    //
    //    V = 0011 1111 (0x3F)
    //  & M = 1110 0000 (!(0x20 - 1))
    //  ---------------
    //        0010 0000 (0x20)
    value & !(alignment - 1)
}

pub(crate) fn align_up(value: u64, alignment: u64) -> Option<u64> {
    // Aligning up is aligning down the value shifted by one
    // alignment step minus one, which may overflow near the
    // top of the address space.
    value
        .checked_add(alignment - 1)
        .map(|value| align_down(value, alignment))
}
