//! Call-frame manager.
//!
//! A frame is laid out on the stack as
//!
//! ```text
//! frame_ptr + 0   frame length (bytes up to the value stack)
//! frame_ptr + 4   locals position (offset of the first local)
//! frame_ptr + 8   locals format: (type, count) byte pairs, then 0,0,
//!                 padded with zero pairs to a multiple of four bytes
//! locals          each run aligned to its type, total padded to four
//! value stack     four-byte entries belonging to this call
//! ```
//!
//! Before a call the caller pushes a four-word call stub: destination type,
//! destination address, resume PC and the caller's frame pointer. Returns,
//! `throw`, restore and interrupted string printing all unwind through the
//! same stub.

use log::{debug, trace};

use crate::error::{VmError, VmResult};
use crate::operand::{self, Dest};
use crate::output::StringPos;
use crate::vm::Vm;

/// Function type byte for stack-argument functions.
pub const STACK_ARGS: u8 = 0xC0;
/// Function type byte for local-argument functions.
pub const LOCAL_ARGS: u8 = 0xC1;

/// Bytes occupied by a call stub.
pub const STUB_SIZE: u32 = 16;

/// What to do when a call stub is popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Store the return value.
    Store(Dest),
    /// Continue a compressed string at the given bit of the byte at the
    /// stub's PC.
    CompressedString { bit: u8 },
    /// Marks the outermost string; popping it ends printing.
    StringEnd,
    /// Continue printing the number held in the stub's PC field.
    Number { digit: u32 },
    Latin1String,
    UnicodeString,
}

impl Resume {
    pub fn encode(self) -> (u32, u32) {
        match self {
            Self::Store(dest) => dest.to_stub(),
            Self::CompressedString { bit } => (0x10, bit as u32),
            Self::StringEnd => (0x11, 0),
            Self::Number { digit } => (0x12, digit),
            Self::Latin1String => (0x13, 0),
            Self::UnicodeString => (0x14, 0),
        }
    }

    pub fn decode(kind: u32, addr: u32) -> VmResult<Self> {
        if let Some(dest) = Dest::from_stub(kind, addr) {
            return Ok(Self::Store(dest));
        }
        Ok(match kind {
            0x10 if addr < 8 => Self::CompressedString { bit: addr as u8 },
            0x11 => Self::StringEnd,
            0x12 => Self::Number { digit: addr },
            0x13 => Self::Latin1String,
            0x14 => Self::UnicodeString,
            _ => return Err(VmError::CorruptStack("unknown call stub type")),
        })
    }
}

fn align(offset: u32, kind: u8) -> u32 {
    match kind {
        4 => (offset + 3) & !3,
        2 => (offset + 1) & !1,
        _ => offset,
    }
}

impl Vm {
    /// Push a call stub recording `resume`, the current PC and frame.
    pub(crate) fn push_call_stub(&mut self, resume: Resume) -> VmResult<()> {
        let (kind, addr) = resume.encode();
        self.stack.ensure_room(STUB_SIZE, "call stub")?;
        let frame_ptr = self.stack.frame_ptr;
        for word in [kind, addr, self.pc, frame_ptr] {
            self.stack.push(word)?;
        }
        Ok(())
    }

    /// Pop a call stub, restore PC and frame from it, then act on it with
    /// `value` as the result being returned.
    pub(crate) fn pop_call_stub(&mut self, value: u32) -> VmResult<()> {
        if self.stack.sp < STUB_SIZE {
            return Err(VmError::StackUnderflow("call stub"));
        }
        self.stack.sp -= STUB_SIZE;
        let base = self.stack.sp;
        let kind = self.stack.read_u32(base)?;
        let addr = self.stack.read_u32(base + 4)?;
        let pc = self.stack.read_u32(base + 8)?;
        let frame_ptr = self.stack.read_u32(base + 12)?;
        let resume = Resume::decode(kind, addr)?;

        self.pc = pc;
        self.stack.enter_frame_at(frame_ptr)?;

        match resume {
            Resume::Store(dest) => {
                operand::store(&mut self.memory, &mut self.stack, dest, 4, value)
            }
            Resume::StringEnd => Err(VmError::CorruptStack(
                "string-terminator call stub at end of function call",
            )),
            Resume::CompressedString { bit } => self.stream_string(pc, StringPos::Compressed(bit)),
            Resume::Number { digit } => self.stream_num(pc, true, digit),
            Resume::Latin1String => self.stream_string(pc, StringPos::Latin1),
            Resume::UnicodeString => self.stream_string(pc, StringPos::Unicode),
        }
    }

    /// Pop a stub left by string printing. Returns the address and bit to
    /// resume a compressed string at, or `None` once the outermost string
    /// is finished (PC is then back at the next instruction).
    pub(crate) fn pop_string_stub(&mut self) -> VmResult<Option<(u32, u8)>> {
        self.stack.ensure_values(4, "string call stub")?;
        self.stack.sp -= STUB_SIZE;
        let base = self.stack.sp;
        let kind = self.stack.read_u32(base)?;
        let addr = self.stack.read_u32(base + 4)?;
        self.pc = self.stack.read_u32(base + 8)?;
        match Resume::decode(kind, addr)? {
            Resume::StringEnd => Ok(None),
            Resume::CompressedString { bit } => Ok(Some((self.pc, bit))),
            _ => Err(VmError::CorruptStack(
                "function-terminator call stub at end of string",
            )),
        }
    }

    /// Build a frame for the function at `addr` and point PC at its first
    /// instruction.
    pub(crate) fn enter_function(&mut self, addr: u32, args: &[u32]) -> VmResult<()> {
        let tag = self.memory.read_u8(addr)?;
        let stack_args = match tag {
            STACK_ARGS => true,
            LOCAL_ARGS => false,
            _ => return Err(VmError::NotAFunction { addr, tag }),
        };

        let mut cursor = addr.wrapping_add(1);
        let mut format = Vec::with_capacity(8);
        let mut locals_len = 0u32;
        loop {
            let kind = self.memory.read_u8(cursor)?;
            let count = self.memory.read_u8(cursor.wrapping_add(1))?;
            cursor = cursor.wrapping_add(2);
            if kind == 0 {
                format.extend_from_slice(&[0, 0]);
                break;
            }
            if !matches!(kind, 1 | 2 | 4) {
                return Err(VmError::IllegalLocalType(kind));
            }
            format.extend_from_slice(&[kind, count]);
            locals_len = align(locals_len, kind) + kind as u32 * count as u32;
        }
        while format.len() % 4 != 0 {
            format.push(0);
        }

        let locals_pos = 8 + format.len() as u32;
        let frame_len = locals_pos + align(locals_len, 4);
        self.stack.ensure_room(frame_len, "function call")?;

        let frame_ptr = self.stack.sp;
        self.stack.write_u32(frame_ptr, frame_len)?;
        self.stack.write_u32(frame_ptr + 4, locals_pos)?;
        self.stack
            .bytes_mut(frame_ptr + 8, format.len() as u32)?
            .copy_from_slice(&format);
        self.stack
            .bytes_mut(frame_ptr + locals_pos, frame_len - locals_pos)?
            .fill(0);

        self.stack.sp = frame_ptr + frame_len;
        self.stack.frame_ptr = frame_ptr;
        self.stack.locals_base = frame_ptr + locals_pos;
        self.stack.values_base = self.stack.sp;

        if stack_args {
            self.stack
                .ensure_room(4 * (args.len() as u32 + 1), "function arguments")?;
            for &arg in args.iter().rev() {
                self.stack.push(arg)?;
            }
            self.stack.push(args.len() as u32)?;
        } else {
            self.copy_args_to_locals(&format, args)?;
        }

        trace!(
            target: "glulx::call",
            "enter {:#x} ({} args) frame={:#x}",
            addr,
            args.len(),
            frame_ptr
        );
        self.pc = cursor;
        Ok(())
    }

    fn copy_args_to_locals(&mut self, format: &[u8], args: &[u32]) -> VmResult<()> {
        let base = self.stack.locals_base;
        let mut args = args.iter().copied();
        let mut offset = 0u32;
        'format: for pair in format.chunks_exact(2) {
            let (kind, count) = (pair[0], pair[1]);
            if kind == 0 {
                break;
            }
            offset = align(offset, kind);
            for _ in 0..count {
                let Some(arg) = args.next() else {
                    break 'format;
                };
                match kind {
                    1 => self.stack.write_u8(base + offset, arg as u8)?,
                    2 => self.stack.write_u16(base + offset, arg as u16)?,
                    _ => self.stack.write_u32(base + offset, arg)?,
                }
                offset += kind as u32;
            }
        }
        Ok(())
    }

    /// Discard the current frame. The caller's stub is then on top.
    pub(crate) fn leave_function(&mut self) {
        self.stack.sp = self.stack.frame_ptr;
    }

    /// Return `value` from the current function, halting if it was the
    /// outermost one.
    pub(crate) fn return_from_function(&mut self, value: u32) -> VmResult<()> {
        self.leave_function();
        if self.stack.sp == 0 {
            debug!(target: "glulx::call", "outermost function returned {:#x}", value);
            self.halt();
            return Ok(());
        }
        self.pop_call_stub(value)
    }

    /// Pop `count` arguments; the first popped becomes argument 0.
    pub(crate) fn pop_arguments(&mut self, count: u32) -> VmResult<Vec<u32>> {
        self.stack.ensure_values(count, "call arguments")?;
        (0..count).map(|_| self.stack.pop()).collect()
    }

    pub(crate) fn call_function(&mut self, addr: u32, args: &[u32], dest: Dest) -> VmResult<()> {
        self.push_call_stub(Resume::Store(dest))?;
        self.enter_function(addr, args)
    }

    pub(crate) fn tail_call(&mut self, addr: u32, args: &[u32]) -> VmResult<()> {
        self.leave_function();
        self.enter_function(addr, args)
    }

    /// `catch`: push a stub and hand back the token identifying it.
    pub(crate) fn catch(&mut self, dest: Dest) -> VmResult<u32> {
        self.push_call_stub(Resume::Store(dest))?;
        let token = self.stack.sp;
        operand::store(&mut self.memory, &mut self.stack, dest, 4, token)?;
        Ok(token)
    }

    /// `throw`: unwind to the stub identified by `token` and return `value`
    /// through it.
    pub(crate) fn throw(&mut self, value: u32, token: u32) -> VmResult<()> {
        if token < STUB_SIZE || token > self.stack.sp || token % 4 != 0 {
            return Err(VmError::BadCatchToken(token));
        }
        trace!(target: "glulx::call", "throw {:#x} to token {:#x}", value, token);
        self.stack.sp = token;
        self.pop_call_stub(value)
    }
}
