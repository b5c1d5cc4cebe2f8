//! `linearsearch`, `binarysearch` and `linkedsearch`.

use std::cmp::Ordering;

use bitflags::bitflags;

use crate::core::Memory;
use crate::error::{VmError, VmResult};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SearchOptions: u32 {
        /// The key operand is the address of the key rather than its value.
        const KEY_INDIRECT = 0x01;
        /// Stop at an entry whose key is all zero bytes.
        const ZERO_KEY_TERMINATES = 0x02;
        /// Result is an index rather than an address.
        const RETURN_INDEX = 0x04;
    }
}

/// Not-found result when returning an index.
const NO_INDEX: u32 = u32::MAX;

/// A search key resolved to its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchKey {
    bytes: Vec<u8>,
    options: SearchOptions,
}

impl SearchKey {
    pub fn new(memory: &Memory, key: u32, key_size: u32, options: u32) -> VmResult<Self> {
        let options = SearchOptions::from_bits_truncate(options);
        let bytes = if options.contains(SearchOptions::KEY_INDIRECT) {
            memory.slice(key, key_size)?.to_vec()
        } else {
            match key_size {
                1 | 2 | 4 => key.to_be_bytes()[4 - key_size as usize..].to_vec(),
                _ => return Err(VmError::SearchKeySize(key_size)),
            }
        };
        Ok(Self { bytes, options })
    }

    fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Key order relative to the entry key at `addr`, bytes compared
    /// unsigned and big-endian.
    fn compare(&self, memory: &Memory, addr: u32) -> VmResult<Ordering> {
        Ok(self.bytes.as_slice().cmp(memory.slice(addr, self.len())?))
    }

    fn terminates_at(&self, memory: &Memory, addr: u32) -> VmResult<bool> {
        if !self.options.contains(SearchOptions::ZERO_KEY_TERMINATES) {
            return Ok(false);
        }
        Ok(memory.slice(addr, self.len())?.iter().all(|&b| b == 0))
    }

    fn not_found(&self) -> u32 {
        if self.options.contains(SearchOptions::RETURN_INDEX) {
            NO_INDEX
        } else {
            0
        }
    }

    fn found(&self, index: u32, addr: u32) -> u32 {
        if self.options.contains(SearchOptions::RETURN_INDEX) {
            index
        } else {
            addr
        }
    }

    /// Scan `count` structs from `start`; a count of -1 scans until a match
    /// or a zero key.
    pub fn linear(
        &self,
        memory: &Memory,
        start: u32,
        struct_size: u32,
        count: u32,
        key_offset: u32,
    ) -> VmResult<u32> {
        let mut index = 0u32;
        while count == u32::MAX || index < count {
            let entry = start.wrapping_add(index.wrapping_mul(struct_size));
            let key_addr = entry.wrapping_add(key_offset);
            if self.compare(memory, key_addr)? == Ordering::Equal {
                return Ok(self.found(index, entry));
            }
            if self.terminates_at(memory, key_addr)? {
                break;
            }
            index = index.wrapping_add(1);
        }
        Ok(self.not_found())
    }

    /// Binary search over `count` structs sorted by key.
    pub fn binary(
        &self,
        memory: &Memory,
        start: u32,
        struct_size: u32,
        count: u32,
        key_offset: u32,
    ) -> VmResult<u32> {
        let (mut low, mut high) = (0u32, count);
        while low < high {
            let mid = low + (high - low) / 2;
            let entry = start.wrapping_add(mid.wrapping_mul(struct_size));
            match self.compare(memory, entry.wrapping_add(key_offset))? {
                Ordering::Equal => return Ok(self.found(mid, entry)),
                Ordering::Less => high = mid,
                Ordering::Greater => low = mid + 1,
            }
        }
        Ok(self.not_found())
    }

    /// Follow the chain of next pointers from `start`. Always returns an
    /// address, or 0.
    pub fn linked(
        &self,
        memory: &Memory,
        mut node: u32,
        key_offset: u32,
        next_offset: u32,
    ) -> VmResult<u32> {
        while node != 0 {
            let key_addr = node.wrapping_add(key_offset);
            if self.compare(memory, key_addr)? == Ordering::Equal {
                return Ok(node);
            }
            if self.terminates_at(memory, key_addr)? {
                break;
            }
            node = memory.read_u32(node.wrapping_add(next_offset))?;
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: u32 = 0x100;

    /// Eight-byte structs at 0x100: key word at offset 4.
    fn memory(keys: &[u32]) -> Memory {
        let mut image = vec![0u8; 0x200];
        for (i, key) in keys.iter().enumerate() {
            let at = TABLE as usize + 8 * i + 4;
            image[at..at + 4].copy_from_slice(&key.to_be_bytes());
        }
        Memory::new(&image, 0x100, 0x200, 0x200, 0x200).unwrap()
    }

    #[test]
    fn direct_key_sizes() {
        let mem = memory(&[]);
        assert!(SearchKey::new(&mem, 5, 3, 0).is_err());
        assert_eq!(SearchKey::new(&mem, 0x1234, 2, 0).unwrap().bytes, vec![0x12, 0x34]);
        assert_eq!(SearchKey::new(&mem, 0xAB, 1, 0).unwrap().bytes, vec![0xAB]);
    }

    #[test]
    fn linear_returns_address_or_index() {
        let mem = memory(&[10, 20, 30]);
        let key = SearchKey::new(&mem, 20, 4, 0).unwrap();
        assert_eq!(key.linear(&mem, TABLE, 8, 3, 4).unwrap(), TABLE + 8);
        let key = SearchKey::new(&mem, 30, 4, 0x4).unwrap();
        assert_eq!(key.linear(&mem, TABLE, 8, 3, 4).unwrap(), 2);
        let key = SearchKey::new(&mem, 99, 4, 0x4).unwrap();
        assert_eq!(key.linear(&mem, TABLE, 8, 3, 4).unwrap(), u32::MAX);
        let key = SearchKey::new(&mem, 99, 4, 0).unwrap();
        assert_eq!(key.linear(&mem, TABLE, 8, 3, 4).unwrap(), 0);
    }

    #[test]
    fn zero_key_stops_unbounded_scan() {
        let mem = memory(&[1, 2, 0, 4]);
        let key = SearchKey::new(&mem, 4, 4, 0x2 | 0x4).unwrap();
        assert_eq!(key.linear(&mem, TABLE, 8, u32::MAX, 4).unwrap(), u32::MAX);
        let key = SearchKey::new(&mem, 0, 4, 0x2 | 0x4).unwrap();
        assert_eq!(key.linear(&mem, TABLE, 8, u32::MAX, 4).unwrap(), 2);
    }

    #[test]
    fn indirect_key() {
        let mem = memory(&[7, 0x0102_0304]);
        // the second entry's key bytes double as the search key
        let key = SearchKey::new(&mem, TABLE + 12, 4, 0x1).unwrap();
        assert_eq!(key.linear(&mem, TABLE, 8, 2, 4).unwrap(), TABLE + 8);
    }

    #[test]
    fn binary_compares_unsigned() {
        let mem = memory(&[1, 5, 9, 0x8000_0000, 0xFFFF_FFFF]);
        for (i, k) in [1u32, 5, 9, 0x8000_0000, 0xFFFF_FFFF].iter().enumerate() {
            let key = SearchKey::new(&mem, *k, 4, 0x4).unwrap();
            assert_eq!(key.binary(&mem, TABLE, 8, 5, 4).unwrap(), i as u32);
        }
        let key = SearchKey::new(&mem, 6, 4, 0).unwrap();
        assert_eq!(key.binary(&mem, TABLE, 8, 5, 4).unwrap(), 0);
    }

    #[test]
    fn linked_follows_next_pointers() {
        let mut image = vec![0u8; 0x200];
        // nodes: key at +0, next at +4
        for (node, key, next) in [(0x100u32, 3u32, 0x140u32), (0x140, 8, 0x180), (0x180, 12, 0)] {
            let n = node as usize;
            image[n..n + 4].copy_from_slice(&key.to_be_bytes());
            image[n + 4..n + 8].copy_from_slice(&next.to_be_bytes());
        }
        let mem = Memory::new(&image, 0x100, 0x200, 0x200, 0x200).unwrap();
        let key = SearchKey::new(&mem, 12, 4, 0).unwrap();
        assert_eq!(key.linked(&mem, 0x100, 0, 4).unwrap(), 0x180);
        let key = SearchKey::new(&mem, 13, 4, 0).unwrap();
        assert_eq!(key.linked(&mem, 0x100, 0, 4).unwrap(), 0);
    }
}
