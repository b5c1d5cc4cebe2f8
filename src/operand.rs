//! Operand decoding and result stores.
//!
//! Each instruction is followed by one addressing-mode nibble per operand,
//! packed two to a byte with the low nibble first, then the operand data in
//! operand order. Loads are resolved during decoding (stack pops included);
//! stores yield a [`Dest`] that is written once the opcode has a result.

use crate::core::{Memory, Stack};
use crate::error::{VmError, VmResult};
use crate::opcodes::{Access, MAX_OPERANDS, OperandShape};

/// Addressing mode nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Zero,
    Const1,
    Const2,
    Const4,
    Addr1,
    Addr2,
    Addr4,
    Stack,
    Local1,
    Local2,
    Local4,
    Ram1,
    Ram2,
    Ram4,
}

impl Mode {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            0x0 => Self::Zero,
            0x1 => Self::Const1,
            0x2 => Self::Const2,
            0x3 => Self::Const4,
            0x5 => Self::Addr1,
            0x6 => Self::Addr2,
            0x7 => Self::Addr4,
            0x8 => Self::Stack,
            0x9 => Self::Local1,
            0xA => Self::Local2,
            0xB => Self::Local4,
            0xD => Self::Ram1,
            0xE => Self::Ram2,
            0xF => Self::Ram4,
            _ => return None,
        })
    }

    pub fn nibble(self) -> u8 {
        match self {
            Self::Zero => 0x0,
            Self::Const1 => 0x1,
            Self::Const2 => 0x2,
            Self::Const4 => 0x3,
            Self::Addr1 => 0x5,
            Self::Addr2 => 0x6,
            Self::Addr4 => 0x7,
            Self::Stack => 0x8,
            Self::Local1 => 0x9,
            Self::Local2 => 0xA,
            Self::Local4 => 0xB,
            Self::Ram1 => 0xD,
            Self::Ram2 => 0xE,
            Self::Ram4 => 0xF,
        }
    }

    /// Operand bytes following the mode nibbles.
    pub fn data_len(self) -> u32 {
        match self {
            Self::Zero | Self::Stack => 0,
            Self::Const1 | Self::Addr1 | Self::Local1 | Self::Ram1 => 1,
            Self::Const2 | Self::Addr2 | Self::Local2 | Self::Ram2 => 2,
            Self::Const4 | Self::Addr4 | Self::Local4 | Self::Ram4 => 4,
        }
    }
}

/// Where a result goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Discard,
    /// Absolute main-memory address.
    Memory(u32),
    /// Byte offset from the current frame's locals base.
    Local(u32),
    /// Push onto the value stack.
    Stack,
}

impl Dest {
    /// Destination type and address as recorded in a call stub.
    pub fn to_stub(self) -> (u32, u32) {
        match self {
            Self::Discard => (0, 0),
            Self::Memory(addr) => (1, addr),
            Self::Local(offset) => (2, offset),
            Self::Stack => (3, 0),
        }
    }

    pub fn from_stub(kind: u32, addr: u32) -> Option<Self> {
        match kind {
            0 => Some(Self::Discard),
            1 => Some(Self::Memory(addr)),
            2 => Some(Self::Local(addr)),
            3 => Some(Self::Stack),
            _ => None,
        }
    }
}

/// A decoded operand: a loaded value or a store destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Value(u32),
    Dest(Dest),
}

/// Fixed-capacity operand list for one instruction.
#[derive(Debug, Clone, Copy)]
pub struct Operands {
    items: [Operand; MAX_OPERANDS],
    len: usize,
}

impl Operands {
    fn new() -> Self {
        Self {
            items: [Operand::Value(0); MAX_OPERANDS],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[Operand] {
        &self.items[..self.len]
    }

    /// Loaded value of operand `index` (0 for store operands).
    pub fn value(&self, index: usize) -> u32 {
        match self.items[index] {
            Operand::Value(v) => v,
            Operand::Dest(_) => 0,
        }
    }

    /// Destination of operand `index` (discard for load operands).
    pub fn dest(&self, index: usize) -> Dest {
        match self.items[index] {
            Operand::Dest(d) => d,
            Operand::Value(_) => Dest::Discard,
        }
    }
}

fn read_sized(memory: &Memory, addr: u32, len: u32) -> VmResult<u32> {
    Ok(match len {
        1 => memory.read_u8(addr)? as u32,
        2 => memory.read_u16(addr)? as u32,
        _ => memory.read_u32(addr)?,
    })
}

fn local_addr(stack: &Stack, offset: u32, width: u8) -> VmResult<u32> {
    let addr = stack.locals_base as u64 + offset as u64;
    if addr + width as u64 > stack.values_base as u64 {
        return Err(VmError::StackRange("local variable"));
    }
    Ok(addr as u32)
}

fn read_local(stack: &Stack, offset: u32, width: u8) -> VmResult<u32> {
    let addr = local_addr(stack, offset, width)?;
    Ok(match width {
        1 => stack.read_u8(addr)? as u32,
        2 => stack.read_u16(addr)? as u32,
        _ => stack.read_u32(addr)?,
    })
}

fn load(
    memory: &Memory,
    stack: &mut Stack,
    mode: Mode,
    data_at: u32,
    width: u8,
) -> VmResult<u32> {
    let data = |len| read_sized(memory, data_at, len);
    match mode {
        Mode::Zero => Ok(0),
        Mode::Const1 => Ok(memory.read_u8(data_at)? as i8 as i32 as u32),
        Mode::Const2 => {
            let high = memory.read_u8(data_at)? as i8 as i32;
            let low = memory.read_u8(data_at.wrapping_add(1))? as u32;
            Ok(((high << 8) as u32) | low)
        }
        Mode::Const4 => data(4),
        Mode::Addr1 | Mode::Addr2 | Mode::Addr4 => {
            let addr = data(mode.data_len())?;
            read_sized(memory, addr, width as u32)
        }
        Mode::Ram1 | Mode::Ram2 | Mode::Ram4 => {
            let addr = data(mode.data_len())?.wrapping_add(memory.ram_start());
            read_sized(memory, addr, width as u32)
        }
        Mode::Local1 | Mode::Local2 | Mode::Local4 => {
            let offset = data(mode.data_len())?;
            read_local(stack, offset, width)
        }
        Mode::Stack => {
            stack.ensure_values(1, "load operand")?;
            stack.sp -= 4;
            stack.read_u32(stack.sp)
        }
    }
}

fn dest(memory: &Memory, mode: Mode, data_at: u32) -> VmResult<Dest> {
    let data = |len| read_sized(memory, data_at, len);
    match mode {
        Mode::Zero => Ok(Dest::Discard),
        Mode::Const1 | Mode::Const2 | Mode::Const4 => Err(VmError::ConstantStore(mode.nibble())),
        Mode::Addr1 | Mode::Addr2 | Mode::Addr4 => Ok(Dest::Memory(data(mode.data_len())?)),
        Mode::Ram1 | Mode::Ram2 | Mode::Ram4 => Ok(Dest::Memory(
            data(mode.data_len())?.wrapping_add(memory.ram_start()),
        )),
        Mode::Local1 | Mode::Local2 | Mode::Local4 => Ok(Dest::Local(data(mode.data_len())?)),
        Mode::Stack => Ok(Dest::Stack),
    }
}

/// Decode the operands of an instruction whose mode bytes start at `pc`.
/// Returns the operands and the address just past the operand data.
pub fn decode_operands(
    memory: &Memory,
    stack: &mut Stack,
    pc: u32,
    shape: OperandShape,
) -> VmResult<(Operands, u32)> {
    let mut operands = Operands::new();
    let count = shape.len() as u32;
    let mut data_at = pc.wrapping_add(count.div_ceil(2));
    for (ix, access) in shape.access.iter().enumerate() {
        let packed = memory.read_u8(pc.wrapping_add(ix as u32 / 2))?;
        let nibble = if ix % 2 == 0 { packed & 0x0F } else { packed >> 4 };
        let kind = match access {
            Access::Load => "load",
            Access::Store => "store",
        };
        let mode = Mode::from_nibble(nibble)
            .ok_or(VmError::UnknownAddressingMode { mode: nibble, kind })?;
        operands.items[ix] = match access {
            Access::Load => Operand::Value(load(memory, stack, mode, data_at, shape.width)?),
            Access::Store => Operand::Dest(dest(memory, mode, data_at)?),
        };
        data_at = data_at.wrapping_add(mode.data_len());
    }
    operands.len = shape.len();
    Ok((operands, data_at))
}

/// Write `value` to `dest` using the operand width (1, 2 or 4 bytes).
/// Narrow values pushed on the stack are masked, not sign-extended.
pub fn store(
    memory: &mut Memory,
    stack: &mut Stack,
    dest: Dest,
    width: u8,
    value: u32,
) -> VmResult<()> {
    match dest {
        Dest::Discard => Ok(()),
        Dest::Memory(addr) => match width {
            1 => memory.write_u8(addr, value as u8),
            2 => memory.write_u16(addr, value as u16),
            _ => memory.write_u32(addr, value),
        },
        Dest::Local(offset) => {
            let addr = local_addr(stack, offset, width)?;
            match width {
                1 => stack.write_u8(addr, value as u8),
                2 => stack.write_u16(addr, value as u16),
                _ => stack.write_u32(addr, value),
            }
        }
        Dest::Stack => {
            let value = match width {
                1 => value & 0xFF,
                2 => value & 0xFFFF,
                _ => value,
            };
            stack.ensure_room(4, "store operand")?;
            stack.write_u32(stack.sp, value)?;
            stack.sp += 4;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::Opcode;

    fn setup(code: &[u8]) -> (Memory, Stack) {
        let mut image = vec![0u8; 0x200];
        image[0x40..0x40 + code.len()].copy_from_slice(code);
        let memory = Memory::new(&image, 0x100, 0x200, 0x200, 0x10000).unwrap();
        let mut stack = Stack::new(0x100);
        // one frame with 8 bytes of locals
        stack.locals_base = 0x0C;
        stack.values_base = 0x14;
        stack.sp = 0x14;
        (memory, stack)
    }

    #[test]
    fn constants_are_sign_extended() {
        // add #-1 #0x80FF -> sp
        let (memory, mut stack) = setup(&[0x21, 0x08, 0xFF, 0x80, 0xFF]);
        let (ops, next) = decode_operands(&memory, &mut stack, 0x40, Opcode::Add.shape()).unwrap();
        assert_eq!(ops.value(0), 0xFFFF_FFFF);
        assert_eq!(ops.value(1), 0xFFFF_80FF);
        assert_eq!(ops.dest(2), Dest::Stack);
        assert_eq!(next, 0x45);
    }

    #[test]
    fn two_byte_constant_keeps_low_byte() {
        let (memory, mut stack) = setup(&[0x02, 0x7F, 0x80]);
        let (ops, _) = decode_operands(&memory, &mut stack, 0x40, Opcode::Copy.shape()).unwrap();
        assert_eq!(ops.value(0), 0x7F80);
    }

    #[test]
    fn memory_and_ram_operands() {
        // copy mem:0x40 -> ram:0x10
        let (mut memory, mut stack) = setup(&[0xD5, 0x40, 0x10]);
        let (ops, next) = decode_operands(&memory, &mut stack, 0x40, Opcode::Copy.shape()).unwrap();
        assert_eq!(ops.value(0), 0xD540_1000);
        assert_eq!(ops.dest(1), Dest::Memory(0x110));
        assert_eq!(next, 0x43);
        store(&mut memory, &mut stack, ops.dest(1), 4, 7).unwrap();
        assert_eq!(memory.read_u32(0x110).unwrap(), 7);
    }

    #[test]
    fn locals_and_stack() {
        // add l4 sp -> l0
        let (mut memory, mut stack) = setup(&[0x89, 0x09, 0x04, 0x00]);
        stack.write_u32(0x10, 40).unwrap();
        stack.push(2).unwrap();
        let (ops, _) = decode_operands(&memory, &mut stack, 0x40, Opcode::Add.shape()).unwrap();
        assert_eq!(ops.value(0), 40);
        assert_eq!(ops.value(1), 2);
        assert_eq!(stack.sp(), 0x14);
        store(&mut memory, &mut stack, ops.dest(2), 4, 42).unwrap();
        assert_eq!(stack.read_u32(0x0C).unwrap(), 42);
    }

    #[test]
    fn stack_pop_underflow_is_fatal() {
        let (memory, mut stack) = setup(&[0x08]);
        let err = decode_operands(&memory, &mut stack, 0x40, Opcode::Copy.shape()).unwrap_err();
        assert_eq!(err, VmError::StackUnderflow("load operand"));
    }

    #[test]
    fn constant_store_is_fatal() {
        let (memory, mut stack) = setup(&[0x10, 0x05]);
        let err = decode_operands(&memory, &mut stack, 0x40, Opcode::Copy.shape()).unwrap_err();
        assert_eq!(err, VmError::ConstantStore(1));
    }

    #[test]
    fn unknown_mode_is_fatal() {
        let (memory, mut stack) = setup(&[0x04]);
        let err = decode_operands(&memory, &mut stack, 0x40, Opcode::Copy.shape()).unwrap_err();
        assert_eq!(
            err,
            VmError::UnknownAddressingMode {
                mode: 4,
                kind: "load"
            }
        );
    }

    #[test]
    fn narrow_stores() {
        let (mut memory, mut stack) = setup(&[]);
        store(&mut memory, &mut stack, Dest::Stack, 1, 0x1234_5678).unwrap();
        assert_eq!(stack.pop().unwrap(), 0x78);
        store(&mut memory, &mut stack, Dest::Memory(0x120), 2, 0xABCD_1234).unwrap();
        assert_eq!(memory.read_u32(0x120).unwrap(), 0x1234_0000);
        assert_eq!(
            store(&mut memory, &mut stack, Dest::Local(8), 4, 1),
            Err(VmError::StackRange("local variable"))
        );
    }

    #[test]
    fn stub_encoding() {
        for dest in [Dest::Discard, Dest::Memory(0x1234), Dest::Local(8), Dest::Stack] {
            let (kind, addr) = dest.to_stub();
            assert_eq!(Dest::from_stub(kind, addr), Some(dest));
        }
        assert_eq!(Dest::from_stub(0x10, 0), None);
    }
}
