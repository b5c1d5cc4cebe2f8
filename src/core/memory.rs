use std::ops::Range;

use crate::error::{VmError, VmResult};

/// Flat big-endian address space.
///
/// `[0, ram_start)` is ROM, `[ram_start, end_mem)` is writable RAM. The
/// original image bytes are kept beside the live buffer so diff-saves,
/// restart and verify can compare against them.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    original: Vec<u8>,
    ram_start: u32,
    orig_end_mem: u32,
    max_end_mem: u32,
    protect: Range<u32>,
}

impl Memory {
    /// Memory boundaries are always multiples of this.
    pub const ALIGN: u32 = 0x100;

    /// Build memory from the image bytes `[0, ext_start)`, zero-filled up to
    /// `end_mem`.
    pub fn new(
        image: &[u8],
        ram_start: u32,
        ext_start: u32,
        end_mem: u32,
        max_end_mem: u32,
    ) -> VmResult<Self> {
        if (image.len() as u64) < ext_start as u64 {
            return Err(VmError::InvalidImage(format!(
                "image is {} bytes but EXTSTART is {:#x}",
                image.len(),
                ext_start
            )));
        }
        if end_mem > max_end_mem {
            return Err(VmError::InvalidImage(format!(
                "ENDMEM {:#x} exceeds the configured memory ceiling {:#x}",
                end_mem, max_end_mem
            )));
        }
        let original = image[..ext_start as usize].to_vec();
        let mut bytes = vec![0; end_mem as usize];
        bytes[..original.len()].copy_from_slice(&original);
        Ok(Self {
            bytes,
            original,
            ram_start,
            orig_end_mem: end_mem,
            max_end_mem,
            protect: 0..0,
        })
    }

    pub fn ram_start(&self) -> u32 {
        self.ram_start
    }

    /// Current memory size.
    pub fn end_mem(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Memory size at startup; memory never shrinks below this.
    pub fn orig_end_mem(&self) -> u32 {
        self.orig_end_mem
    }

    pub fn max_end_mem(&self) -> u32 {
        self.max_end_mem
    }

    /// The pristine program image (`[0, EXTSTART)`).
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Live memory contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn check_read(&self, addr: u32, len: u32) -> VmResult<usize> {
        let end = addr as u64 + len as u64;
        if end > self.bytes.len() as u64 {
            return Err(VmError::MemoryOutOfRange {
                addr,
                endmem: self.end_mem(),
            });
        }
        Ok(addr as usize)
    }

    fn check_write(&self, addr: u32, len: u32) -> VmResult<usize> {
        if addr < self.ram_start {
            return Err(VmError::ReadOnlyWrite(addr));
        }
        self.check_read(addr, len)
    }

    pub fn read_u8(&self, addr: u32) -> VmResult<u8> {
        let a = self.check_read(addr, 1)?;
        Ok(self.bytes[a])
    }

    pub fn read_u16(&self, addr: u32) -> VmResult<u16> {
        let a = self.check_read(addr, 2)?;
        Ok(u16::from_be_bytes([self.bytes[a], self.bytes[a + 1]]))
    }

    pub fn read_u32(&self, addr: u32) -> VmResult<u32> {
        let a = self.check_read(addr, 4)?;
        Ok(u32::from_be_bytes([
            self.bytes[a],
            self.bytes[a + 1],
            self.bytes[a + 2],
            self.bytes[a + 3],
        ]))
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> VmResult<()> {
        let a = self.check_write(addr, 1)?;
        self.bytes[a] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) -> VmResult<()> {
        let a = self.check_write(addr, 2)?;
        self.bytes[a..a + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> VmResult<()> {
        let a = self.check_write(addr, 4)?;
        self.bytes[a..a + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Borrow `len` bytes starting at `addr`.
    pub fn slice(&self, addr: u32, len: u32) -> VmResult<&[u8]> {
        let a = self.check_read(addr, len)?;
        Ok(&self.bytes[a..a + len as usize])
    }

    /// Mutably borrow `len` writable bytes starting at `addr`.
    pub fn slice_mut(&mut self, addr: u32, len: u32) -> VmResult<&mut [u8]> {
        let a = self.check_write(addr, len)?;
        Ok(&mut self.bytes[a..a + len as usize])
    }

    /// `mzero`: clear `len` bytes.
    pub fn zero(&mut self, addr: u32, len: u32) -> VmResult<()> {
        self.slice_mut(addr, len)?.fill(0);
        Ok(())
    }

    /// `mcopy`: overlapping-safe copy.
    pub fn copy_within(&mut self, src: u32, dest: u32, len: u32) -> VmResult<()> {
        let s = self.check_read(src, len)?;
        let d = self.check_write(dest, len)?;
        self.bytes.copy_within(s..s + len as usize, d);
        Ok(())
    }

    /// Whether `new_end` is a legal memory size.
    pub fn can_resize(&self, new_end: u32) -> bool {
        new_end >= self.orig_end_mem && new_end % Self::ALIGN == 0 && new_end <= self.max_end_mem
    }

    /// Grow or shrink memory. New bytes are zeroed. Returns `false` and leaves
    /// memory alone if the size is illegal.
    pub fn resize(&mut self, new_end: u32) -> bool {
        if !self.can_resize(new_end) {
            return false;
        }
        self.bytes.resize(new_end as usize, 0);
        true
    }

    /// Set the range preserved across restart, restore and undo. A zero
    /// length clears it.
    pub fn protect(&mut self, start: u32, len: u32) {
        self.protect = if len == 0 {
            0..0
        } else {
            start..start.saturating_add(len)
        };
    }

    pub fn protected_range(&self) -> Range<u32> {
        self.protect.clone()
    }

    pub fn is_protected(&self, addr: u32) -> bool {
        self.protect.contains(&addr)
    }

    /// Replace RAM `[ram_start, ..)` wholesale with `ram`, sized to
    /// `ram_start + ram.len()`, keeping protected bytes as they are.
    pub(crate) fn replace_ram(&mut self, ram: &[u8]) {
        let ram_start = self.ram_start as usize;
        let new_len = ram_start + ram.len();
        let old = std::mem::replace(&mut self.bytes, Vec::with_capacity(new_len));
        self.bytes.extend_from_slice(&old[..ram_start]);
        self.bytes.extend_from_slice(ram);
        let start = (self.protect.start as usize).max(ram_start);
        let end = (self.protect.end as usize).min(new_len).min(old.len());
        if start < end {
            self.bytes[start..end].copy_from_slice(&old[start..end]);
        }
    }

    /// Return memory to its pristine state except for the protected range.
    pub(crate) fn reset(&mut self) {
        let mut ram = vec![0; (self.orig_end_mem - self.ram_start) as usize];
        let image_ram = &self.original[self.ram_start as usize..];
        ram[..image_ram.len()].copy_from_slice(image_ram);
        self.replace_ram(&ram);
    }
}
