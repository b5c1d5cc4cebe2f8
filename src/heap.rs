//! Heap allocator for `malloc`/`mfree`.
//!
//! The heap lives above the original end of memory and grows it on demand.
//! Blocks are kept sorted by address and cover `[start, end_mem)` exactly;
//! adjacent free blocks are merged on free.

use log::{debug, warn};

use crate::core::Memory;
use crate::error::{SnapshotError, VmError, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    addr: u32,
    len: u32,
    free: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Heap {
    /// Zero while no heap is active.
    start: u32,
    size: u32,
    allocated: u32,
    blocks: Vec<Block>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.start != 0
    }

    /// Heap start address, or 0 when inactive.
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn allocated_blocks(&self) -> u32 {
        self.allocated
    }

    /// Forget every block. Memory is left at its current size.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Allocate `len` bytes, growing memory if no free block fits. Returns
    /// 0 when memory cannot grow far enough.
    pub fn allocate(&mut self, memory: &mut Memory, len: u32) -> VmResult<u32> {
        if len == 0 {
            return Err(VmError::ZeroAllocation);
        }
        let index = match self.blocks.iter().position(|b| b.free && b.len >= len) {
            Some(index) => index,
            None => match self.grow(memory, len) {
                Some(index) => index,
                None => return Ok(0),
            },
        };

        let block = self.blocks[index];
        if block.len > len {
            self.blocks.insert(
                index + 1,
                Block {
                    addr: block.addr + len,
                    len: block.len - len,
                    free: true,
                },
            );
        }
        self.blocks[index] = Block {
            addr: block.addr,
            len,
            free: false,
        };
        self.allocated += 1;
        Ok(block.addr)
    }

    /// Extend memory so the last block is free and at least `len` long.
    /// Returns that block's index.
    fn grow(&mut self, memory: &mut Memory, len: u32) -> Option<usize> {
        let old_end = memory.end_mem();
        let extension = self.size.max(len).max(Memory::ALIGN);
        let extension = extension.checked_add(Memory::ALIGN - 1)? & !(Memory::ALIGN - 1);
        if !memory.resize(old_end.checked_add(extension)?) {
            debug!(target: "glulx::heap", "cannot extend memory by {:#x} for the heap", extension);
            return None;
        }
        if self.start == 0 {
            self.start = old_end;
            debug!(target: "glulx::heap", "heap started at {:#x}", old_end);
        }
        self.size += extension;
        match self.blocks.last_mut() {
            Some(last) if last.free => last.len += extension,
            _ => self.blocks.push(Block {
                addr: old_end,
                len: extension,
                free: true,
            }),
        }
        Some(self.blocks.len() - 1)
    }

    /// Release the block at `addr`. Unknown addresses are ignored. Freeing
    /// the last block shuts the heap down and shrinks memory back.
    pub fn free(&mut self, memory: &mut Memory, addr: u32) {
        let Some(index) = self
            .blocks
            .iter()
            .position(|b| b.addr == addr && !b.free)
        else {
            warn!(target: "glulx::heap", "free of unallocated address {:#x} ignored", addr);
            return;
        };
        self.blocks[index].free = true;
        self.allocated -= 1;

        if self.allocated == 0 {
            let start = self.start;
            self.clear();
            memory.resize(start);
            debug!(target: "glulx::heap", "heap emptied; memory back to {:#x}", start);
            return;
        }

        if index + 1 < self.blocks.len() && self.blocks[index + 1].free {
            let next = self.blocks.remove(index + 1);
            self.blocks[index].len += next.len;
        }
        if index > 0 && self.blocks[index - 1].free {
            let this = self.blocks.remove(index);
            self.blocks[index - 1].len += this.len;
        }
    }

    /// Flat description of the heap: start, block count, then an
    /// address/length pair per allocated block. Empty when inactive.
    pub fn summary(&self) -> Vec<u32> {
        if !self.is_active() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(2 + 2 * self.allocated as usize);
        out.push(self.start);
        out.push(self.allocated);
        for block in self.blocks.iter().filter(|b| !b.free) {
            out.push(block.addr);
            out.push(block.len);
        }
        out
    }

    /// Rebuild a heap from a summary, for memory that ends at `end_mem`.
    /// Pairs may arrive in any order.
    pub fn from_summary(summary: &[u32], end_mem: u32) -> Result<Self, SnapshotError> {
        if summary.is_empty() {
            return Ok(Self::new());
        }
        let [start, count, pairs @ ..] = summary else {
            return Err(SnapshotError::BadHeapSummary("too short"));
        };
        if pairs.len() != 2 * *count as usize {
            return Err(SnapshotError::BadHeapSummary("block count mismatch"));
        }
        if *start == 0 || *start > end_mem {
            return Err(SnapshotError::BadHeapSummary("heap start outside memory"));
        }
        let mut used: Vec<(u32, u32)> = pairs.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        used.sort_unstable();

        let mut heap = Self {
            start: *start,
            size: end_mem - start,
            allocated: *count,
            blocks: Vec::with_capacity(used.len() * 2 + 1),
        };
        let mut cursor = *start;
        for (addr, len) in used {
            let end = addr
                .checked_add(len)
                .ok_or(SnapshotError::BadHeapSummary("block wraps around"))?;
            if len == 0 || addr < cursor || end > end_mem {
                return Err(SnapshotError::BadHeapSummary("overlapping or stray block"));
            }
            if addr > cursor {
                heap.blocks.push(Block {
                    addr: cursor,
                    len: addr - cursor,
                    free: true,
                });
            }
            heap.blocks.push(Block {
                addr,
                len,
                free: false,
            });
            cursor = end;
        }
        if cursor < end_mem {
            heap.blocks.push(Block {
                addr: cursor,
                len: end_mem - cursor,
                free: true,
            });
        }
        Ok(heap)
    }

    pub fn apply_summary(&mut self, summary: &[u32], end_mem: u32) -> Result<(), SnapshotError> {
        *self = Self::from_summary(summary, end_mem)?;
        Ok(())
    }
}
