//! Portable stack encoding.
//!
//! The live stack keeps words in host order. The portable form rewrites
//! every frame header, typed local and value-stack word big-endian, leaving
//! the locals-format bytes and padding as they are. Frames are found by
//! following call stubs: the last word below a frame is the frame pointer
//! saved by the stub that called it, and a save always leaves a stub on
//! top.

use crate::core::Stack;
use crate::error::{SnapshotError, VmError, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToPortable,
    FromPortable,
}

impl Direction {
    /// Read a word in the buffer's current byte order.
    fn word(self, buf: &[u8], at: usize) -> u32 {
        let bytes = [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        match self {
            Self::ToPortable => u32::from_ne_bytes(bytes),
            Self::FromPortable => u32::from_be_bytes(bytes),
        }
    }

    fn swap32(self, buf: &mut [u8], at: usize) {
        let value = self.word(buf, at);
        let bytes = match self {
            Self::ToPortable => value.to_be_bytes(),
            Self::FromPortable => value.to_ne_bytes(),
        };
        buf[at..at + 4].copy_from_slice(&bytes);
    }

    fn swap16(self, buf: &mut [u8], at: usize) {
        let bytes = [buf[at], buf[at + 1]];
        let swapped = match self {
            Self::ToPortable => u16::from_ne_bytes(bytes).to_be_bytes(),
            Self::FromPortable => u16::from_be_bytes(bytes).to_ne_bytes(),
        };
        buf[at..at + 2].copy_from_slice(&swapped);
    }
}

/// Convert the frame occupying `[start, end)` of `buf` in place.
fn convert_frame(
    buf: &mut [u8],
    start: usize,
    end: usize,
    direction: Direction,
) -> Result<(), &'static str> {
    if start + 8 > end {
        return Err("frame header runs past the frame");
    }
    let frame_len = direction.word(buf, start) as usize;
    let locals_pos = direction.word(buf, start + 4) as usize;
    if locals_pos < 8 || locals_pos % 4 != 0 || frame_len < locals_pos || frame_len % 4 != 0 {
        return Err("bad frame header");
    }
    if start + frame_len > end {
        return Err("frame longer than its stack segment");
    }
    direction.swap32(buf, start);
    direction.swap32(buf, start + 4);

    let locals = start + locals_pos;
    let mut offset = 0usize;
    let mut format = start + 8;
    while format + 1 < locals {
        let (kind, count) = (buf[format], buf[format + 1] as usize);
        format += 2;
        if kind == 0 {
            break;
        }
        let width = kind as usize;
        offset = (offset + width - 1) & !(width - 1);
        if locals + offset + width * count > start + frame_len {
            return Err("locals overrun the frame");
        }
        for _ in 0..count {
            match kind {
                4 => direction.swap32(buf, locals + offset),
                2 => direction.swap16(buf, locals + offset),
                1 => {}
                _ => return Err("illegal local type"),
            }
            offset += width;
        }
    }

    let mut at = start + frame_len;
    while at < end {
        direction.swap32(buf, at);
        at += 4;
    }
    Ok(())
}

/// Frame start addresses, bottom frame first.
fn frame_starts(stack: &Stack) -> VmResult<Vec<u32>> {
    let sp = stack.sp();
    let mut starts = Vec::new();
    if sp == 0 {
        return Ok(starts);
    }
    if sp < 4 {
        return Err(VmError::CorruptStack("stack too small to hold a call stub"));
    }
    let mut limit = sp;
    let mut frame = stack.read_u32(sp - 4)?;
    loop {
        if frame >= limit || frame % 4 != 0 {
            return Err(VmError::CorruptStack("frame pointer chain is not descending"));
        }
        starts.push(frame);
        if frame == 0 {
            break;
        }
        limit = frame;
        frame = stack.read_u32(frame - 4)?;
    }
    starts.reverse();
    Ok(starts)
}

/// Encode the live stack portably. The stack must end with a call stub.
pub fn write_portable(stack: &Stack) -> VmResult<Vec<u8>> {
    let mut out = stack.contents().to_vec();
    let starts = frame_starts(stack)?;
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(stack.sp());
        convert_frame(&mut out, start as usize, end as usize, Direction::ToPortable)
            .map_err(VmError::CorruptStack)?;
    }
    Ok(out)
}

/// Decode a portable stack image into host order, checking its structure.
pub fn read_portable(data: &[u8], stack_size: u32) -> Result<Vec<u8>, SnapshotError> {
    if data.len() > stack_size as usize {
        return Err(SnapshotError::StackTooLarge(data.len()));
    }
    if data.len() % 4 != 0 {
        return Err(SnapshotError::BadStackFrame("length is not a whole number of words"));
    }
    let mut out = data.to_vec();
    let mut end = data.len();
    while end != 0 {
        if end < 4 {
            return Err(SnapshotError::BadStackFrame("missing frame pointer"));
        }
        let start = u32::from_be_bytes([data[end - 4], data[end - 3], data[end - 2], data[end - 1]])
            as usize;
        if start >= end || start % 4 != 0 {
            return Err(SnapshotError::BadStackFrame("frame pointer chain is not descending"));
        }
        convert_frame(&mut out, start, end, Direction::FromPortable)
            .map_err(SnapshotError::BadStackFrame)?;
        end = start;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Write a frame with one 1-byte, two 4-byte and one 2-byte local, then
    /// `values`.
    fn push_frame(stack: &mut Stack, values: &[u32]) -> u32 {
        let start = stack.sp();
        let format = [1u8, 1, 4, 2, 2, 1, 0, 0];
        stack.write_u32(start, 8 + 8 + 16).unwrap();
        stack.write_u32(start + 4, 16).unwrap();
        for (i, &b) in format.iter().enumerate() {
            stack.write_u8(start + 8 + i as u32, b).unwrap();
        }
        let locals = start + 16;
        stack.write_u8(locals, 0xAB).unwrap();
        stack.write_u32(locals + 4, 0x0102_0304).unwrap();
        stack.write_u32(locals + 8, 0x0506_0708).unwrap();
        stack.write_u16(locals + 12, 0x090A).unwrap();
        stack.sp = start + 32;
        for &v in values {
            stack.push(v).unwrap();
        }
        start
    }

    fn push_stub(stack: &mut Stack, frame: u32) {
        for word in [0, 0, 0x1234, frame] {
            stack.push(word).unwrap();
        }
    }

    fn nested() -> Stack {
        let mut stack = Stack::new(0x400);
        let f0 = push_frame(&mut stack, &[7]);
        push_stub(&mut stack, f0);
        let f1 = push_frame(&mut stack, &[8, 9]);
        push_stub(&mut stack, f1);
        let f2 = push_frame(&mut stack, &[]);
        push_stub(&mut stack, f2);
        stack
    }

    #[test]
    fn frames_are_found_through_stubs() {
        let stack = nested();
        assert_eq!(frame_starts(&stack).unwrap(), vec![0, 52, 108]);
    }

    #[test]
    fn portable_form_is_big_endian() {
        let stack = nested();
        let portable = write_portable(&stack).unwrap();
        assert_eq!(portable.len(), stack.sp() as usize);
        assert_eq!(&portable[0..8], &[0, 0, 0, 32, 0, 0, 0, 16]);
        assert_eq!(&portable[8..16], &[1, 1, 4, 2, 2, 1, 0, 0]);
        assert_eq!(portable[16], 0xAB);
        assert_eq!(&portable[20..24], &[1, 2, 3, 4]);
        assert_eq!(&portable[28..30], &[0x09, 0x0A]);
        assert_eq!(&portable[32..36], &[0, 0, 0, 7]);
    }

    #[test]
    fn nested_frames_round_trip() {
        let stack = nested();
        let portable = write_portable(&stack).unwrap();
        let restored = read_portable(&portable, stack.size()).unwrap();
        assert_eq!(restored, stack.contents());
    }

    #[test]
    fn broken_chain_is_fatal_on_write() {
        let mut stack = nested();
        let top = stack.sp() - 4;
        stack.write_u32(top, stack.sp()).unwrap();
        assert!(matches!(write_portable(&stack), Err(VmError::CorruptStack(_))));
    }

    #[test]
    fn corrupt_images_are_rejected_on_read() {
        let stack = nested();
        let portable = write_portable(&stack).unwrap();
        assert_eq!(
            read_portable(&portable, 16),
            Err(SnapshotError::StackTooLarge(portable.len()))
        );
        assert!(read_portable(&portable[..portable.len() - 2], 0x400).is_err());
        let mut bad = portable.clone();
        // frame length of the bottom frame larger than its segment
        bad[3] = 0xF0;
        assert!(matches!(
            read_portable(&bad, 0x400),
            Err(SnapshotError::BadStackFrame(_))
        ));
    }
}
