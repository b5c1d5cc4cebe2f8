use crate::error::{VmError, VmResult};

/// Combined value/call stack.
///
/// Words are stored in host byte order; only the portable save format
/// converts them. `frame_ptr`, `locals_base` and `values_base` describe the
/// innermost call frame.
#[derive(Debug, Clone)]
pub struct Stack {
    bytes: Vec<u8>,
    pub(crate) sp: u32,
    pub(crate) frame_ptr: u32,
    pub(crate) locals_base: u32,
    pub(crate) values_base: u32,
}

impl Stack {
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
            sp: 0,
            frame_ptr: 0,
            locals_base: 0,
            values_base: 0,
        }
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn sp(&self) -> u32 {
        self.sp
    }

    pub fn frame_ptr(&self) -> u32 {
        self.frame_ptr
    }

    pub fn locals_base(&self) -> u32 {
        self.locals_base
    }

    pub fn values_base(&self) -> u32 {
        self.values_base
    }

    /// Used portion of the stack, `[0, sp)`.
    pub fn contents(&self) -> &[u8] {
        &self.bytes[..self.sp as usize]
    }

    /// Number of values pushed in the current frame.
    pub fn value_count(&self) -> u32 {
        (self.sp - self.values_base) / 4
    }

    fn check(&self, addr: u32, len: u32) -> VmResult<usize> {
        if addr as u64 + len as u64 > self.bytes.len() as u64 {
            return Err(VmError::StackOutOfRange(addr));
        }
        Ok(addr as usize)
    }

    pub fn read_u8(&self, addr: u32) -> VmResult<u8> {
        let a = self.check(addr, 1)?;
        Ok(self.bytes[a])
    }

    pub fn read_u16(&self, addr: u32) -> VmResult<u16> {
        let a = self.check(addr, 2)?;
        Ok(u16::from_ne_bytes([self.bytes[a], self.bytes[a + 1]]))
    }

    pub fn read_u32(&self, addr: u32) -> VmResult<u32> {
        let a = self.check(addr, 4)?;
        Ok(u32::from_ne_bytes([
            self.bytes[a],
            self.bytes[a + 1],
            self.bytes[a + 2],
            self.bytes[a + 3],
        ]))
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> VmResult<()> {
        let a = self.check(addr, 1)?;
        self.bytes[a] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) -> VmResult<()> {
        let a = self.check(addr, 2)?;
        self.bytes[a..a + 2].copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> VmResult<()> {
        let a = self.check(addr, 4)?;
        self.bytes[a..a + 4].copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    pub(crate) fn bytes_mut(&mut self, addr: u32, len: u32) -> VmResult<&mut [u8]> {
        let a = self.check(addr, len)?;
        Ok(&mut self.bytes[a..a + len as usize])
    }

    /// Fail with an overflow unless `len` more bytes fit above `sp`.
    pub fn ensure_room(&self, len: u32, context: &'static str) -> VmResult<()> {
        if self.sp as u64 + len as u64 > self.bytes.len() as u64 {
            return Err(VmError::StackOverflow(context));
        }
        Ok(())
    }

    /// Fail with an underflow unless the current frame holds `count` values.
    pub fn ensure_values(&self, count: u32, context: &'static str) -> VmResult<()> {
        if (self.sp as u64) < self.values_base as u64 + 4 * count as u64 {
            return Err(VmError::StackUnderflow(context));
        }
        Ok(())
    }

    pub fn push(&mut self, value: u32) -> VmResult<()> {
        self.ensure_room(4, "push")?;
        self.write_u32(self.sp, value)?;
        self.sp += 4;
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<u32> {
        self.ensure_values(1, "pop")?;
        self.sp -= 4;
        self.read_u32(self.sp)
    }

    /// Value `depth` entries below the top (0 is the top).
    pub fn peek(&self, depth: u32) -> VmResult<u32> {
        if depth >= self.value_count() {
            return Err(VmError::StackRange("stkpeek"));
        }
        self.read_u32(self.sp - 4 * (depth + 1))
    }

    /// Recompute `locals_base`/`values_base` from the frame header at
    /// `frame_ptr`.
    pub(crate) fn enter_frame_at(&mut self, frame_ptr: u32) -> VmResult<()> {
        let frame_len = self.read_u32(frame_ptr)?;
        let locals_pos = self.read_u32(frame_ptr + 4)?;
        self.frame_ptr = frame_ptr;
        self.values_base = frame_ptr.wrapping_add(frame_len);
        self.locals_base = frame_ptr.wrapping_add(locals_pos);
        if self.values_base > self.sp || self.locals_base > self.values_base {
            return Err(VmError::CorruptStack("frame header does not fit the stack"));
        }
        Ok(())
    }

    /// Install `contents` as the whole stack with all registers at zero.
    /// The caller guarantees `contents` fits.
    pub(crate) fn load(&mut self, contents: &[u8]) {
        self.bytes[..contents.len()].copy_from_slice(contents);
        self.sp = contents.len() as u32;
        self.frame_ptr = 0;
        self.locals_base = 0;
        self.values_base = 0;
    }

    pub(crate) fn clear(&mut self) {
        self.sp = 0;
        self.frame_ptr = 0;
        self.locals_base = 0;
        self.values_base = 0;
    }
}
