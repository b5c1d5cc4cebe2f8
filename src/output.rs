//! Output system: `streamchar`, `streamunichar`, `streamnum`, `streamstr`.
//!
//! In filter mode every character becomes a call to the guest function
//! named by the iosys rock. Printing is then suspended: a resume stub is
//! pushed and the function runs on the normal execution loop. When it
//! returns, popping the stub re-enters the printer where it left off.

use log::{trace, warn};

use crate::call::Resume;
use crate::error::{VmError, VmResult};
use crate::operand::Dest;
use crate::vm::Vm;

/// String type bytes.
pub const LATIN1_STRING: u8 = 0xE0;
pub const COMPRESSED_STRING: u8 = 0xE1;
pub const UNICODE_STRING: u8 = 0xE2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Null,
    Filter,
    Glk,
}

impl IoMode {
    pub fn from_number(number: u32) -> Option<Self> {
        match number {
            0 => Some(Self::Null),
            1 => Some(Self::Filter),
            2 => Some(Self::Glk),
            _ => None,
        }
    }

    pub fn number(self) -> u32 {
        match self {
            Self::Null => 0,
            Self::Filter => 1,
            Self::Glk => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSys {
    pub mode: IoMode,
    pub rock: u32,
}

impl Default for IoSys {
    fn default() -> Self {
        Self {
            mode: IoMode::Null,
            rock: 0,
        }
    }
}

/// Where `stream_string` starts decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPos {
    /// At a type byte.
    Start,
    /// Inside the characters of an E0 string.
    Latin1,
    /// Inside an E1 string's bit stream, at the given bit.
    Compressed(u8),
    /// Inside the characters of an E2 string.
    Unicode,
}

/// Decimal digits of `value` as a signed number.
fn digits(value: u32) -> Vec<u8> {
    let signed = value as i32;
    let mut out: Vec<u8> = signed.unsigned_abs().to_string().into_bytes();
    if signed < 0 {
        out.insert(0, b'-');
    }
    out
}

/// How the compressed-string walker should continue after a node.
enum Next {
    /// Keep walking from the root.
    Root,
    /// The string is done.
    Terminated,
    /// Start decoding a nested string (stub already pushed).
    Nested { addr: u32, pos: StringPos },
    /// A guest function was entered; unwind out of the printer.
    Suspended,
}

impl Vm {
    pub fn iosys(&self) -> IoSys {
        self.iosys
    }

    /// `setiosys`. Unknown modes select the null system.
    pub(crate) fn set_iosys(&mut self, mode: u32, rock: u32) {
        let mode = IoMode::from_number(mode).unwrap_or_else(|| {
            warn!(target: "glulx::io", "unknown iosys mode {}; using null output", mode);
            IoMode::Null
        });
        self.iosys = IoSys { mode, rock };
    }

    /// Call the filter function with one character. PC must already be
    /// where execution resumes afterwards.
    fn filter_call(&mut self, ch: u32, resume: Resume) -> VmResult<()> {
        self.push_call_stub(resume)?;
        let rock = self.iosys.rock;
        self.enter_function(rock, &[ch])
    }

    /// `streamchar`.
    pub(crate) fn stream_char(&mut self, ch: u32) -> VmResult<()> {
        let ch = ch & 0xFF;
        match self.iosys.mode {
            IoMode::Null => Ok(()),
            IoMode::Glk => {
                self.io.put_char(ch as u8);
                Ok(())
            }
            IoMode::Filter => self.filter_call(ch, Resume::Store(Dest::Discard)),
        }
    }

    /// `streamunichar`.
    pub(crate) fn stream_unichar(&mut self, ch: u32) -> VmResult<()> {
        match self.iosys.mode {
            IoMode::Null => Ok(()),
            IoMode::Glk => {
                self.io.put_char_uni(ch);
                Ok(())
            }
            IoMode::Filter => self.filter_call(ch, Resume::Store(Dest::Discard)),
        }
    }

    /// `streamnum`, or its continuation from digit `digit` when `resumed`.
    pub(crate) fn stream_num(&mut self, value: u32, resumed: bool, digit: u32) -> VmResult<()> {
        let text = digits(value);
        match self.iosys.mode {
            IoMode::Null => {}
            IoMode::Glk => {
                for &ch in text.iter().skip(digit as usize) {
                    self.io.put_char(ch);
                }
            }
            IoMode::Filter => {
                if !resumed {
                    self.push_call_stub(Resume::StringEnd)?;
                }
                if let Some(&ch) = text.get(digit as usize) {
                    self.pc = value;
                    return self.filter_call(ch as u32, Resume::Number { digit: digit + 1 });
                }
                if self.pop_string_stub()?.is_some() {
                    return Err(VmError::StringDecoding(
                        "string call stub while printing a number",
                    ));
                }
            }
        }
        Ok(())
    }

    /// `streamstr` and its continuations.
    pub(crate) fn stream_string(&mut self, mut addr: u32, mut pos: StringPos) -> VmResult<()> {
        if addr == 0 {
            return Err(VmError::StringDecoding("null string address"));
        }
        let mut nested = pos != StringPos::Start;
        loop {
            if pos == StringPos::Start {
                let tag = self.memory.read_u8(addr)?;
                pos = match tag {
                    LATIN1_STRING => StringPos::Latin1,
                    COMPRESSED_STRING => StringPos::Compressed(0),
                    UNICODE_STRING => StringPos::Unicode,
                    _ => return Err(VmError::NotAString { addr, tag }),
                };
                addr = addr.wrapping_add(if tag == UNICODE_STRING { 4 } else { 1 });
            }

            match pos {
                StringPos::Start => {}
                StringPos::Latin1 => {
                    if self.iosys.mode == IoMode::Filter {
                        if !nested {
                            self.push_call_stub(Resume::StringEnd)?;
                            nested = true;
                        }
                        let ch = self.memory.read_u8(addr)?;
                        if ch != 0 {
                            self.pc = addr.wrapping_add(1);
                            return self.filter_call(ch as u32, Resume::Latin1String);
                        }
                    } else {
                        loop {
                            let ch = self.memory.read_u8(addr)?;
                            addr = addr.wrapping_add(1);
                            if ch == 0 {
                                break;
                            }
                            if self.iosys.mode == IoMode::Glk {
                                self.io.put_char(ch);
                            }
                        }
                    }
                }
                StringPos::Unicode => {
                    if self.iosys.mode == IoMode::Filter {
                        if !nested {
                            self.push_call_stub(Resume::StringEnd)?;
                            nested = true;
                        }
                        let ch = self.memory.read_u32(addr)?;
                        if ch != 0 {
                            self.pc = addr.wrapping_add(4);
                            return self.filter_call(ch, Resume::UnicodeString);
                        }
                    } else {
                        loop {
                            let ch = self.memory.read_u32(addr)?;
                            addr = addr.wrapping_add(4);
                            if ch == 0 {
                                break;
                            }
                            if self.iosys.mode == IoMode::Glk {
                                self.io.put_char_uni(ch);
                            }
                        }
                    }
                }
                StringPos::Compressed(bit) => {
                    match self.walk_compressed(addr, bit, &mut nested)? {
                        Next::Suspended => return Ok(()),
                        Next::Nested {
                            addr: next,
                            pos: next_pos,
                        } => {
                            addr = next;
                            pos = next_pos;
                            continue;
                        }
                        Next::Terminated | Next::Root => {}
                    }
                }
            }

            if !nested {
                return Ok(());
            }
            match self.pop_string_stub()? {
                None => return Ok(()),
                Some((resume_addr, bit)) => {
                    addr = resume_addr;
                    pos = StringPos::Compressed(bit);
                }
            }
        }
    }

    /// Decode an E1 string from bit `bit` of the byte at `addr` until it
    /// ends or printing has to leave the decoder.
    fn walk_compressed(&mut self, mut addr: u32, mut bit: u8, nested: &mut bool) -> VmResult<Next> {
        let table = self.string_table;
        if table == 0 {
            return Err(VmError::StringDecoding(
                "compressed string printed with no decoding table",
            ));
        }
        let root = self.memory.read_u32(table.wrapping_add(8))?;
        let mut node = root;
        let mut byte = self.memory.read_u8(addr)? >> bit;

        loop {
            let kind = self.memory.read_u8(node)?;
            let next = match kind {
                0x00 => {
                    let branch = if byte & 1 == 1 { 5 } else { 1 };
                    node = self.memory.read_u32(node.wrapping_add(branch))?;
                    if bit == 7 {
                        bit = 0;
                        addr = addr.wrapping_add(1);
                        byte = self.memory.read_u8(addr)?;
                    } else {
                        bit += 1;
                        byte >>= 1;
                    }
                    continue;
                }
                0x01 => Next::Terminated,
                0x02 | 0x04 => {
                    let ch = if kind == 0x02 {
                        self.memory.read_u8(node.wrapping_add(1))? as u32
                    } else {
                        self.memory.read_u32(node.wrapping_add(1))?
                    };
                    match self.iosys.mode {
                        IoMode::Null => Next::Root,
                        IoMode::Glk => {
                            if kind == 0x02 {
                                self.io.put_char(ch as u8);
                            } else {
                                self.io.put_char_uni(ch);
                            }
                            Next::Root
                        }
                        IoMode::Filter => {
                            self.suspend_compressed(addr, bit, nested)?;
                            let rock = self.iosys.rock;
                            self.enter_function(rock, &[ch])?;
                            Next::Suspended
                        }
                    }
                }
                0x03 | 0x05 => {
                    let (text, text_pos) = if kind == 0x03 {
                        (node.wrapping_add(1), StringPos::Latin1)
                    } else {
                        (node.wrapping_add(4), StringPos::Unicode)
                    };
                    match self.iosys.mode {
                        IoMode::Filter => {
                            self.suspend_compressed(addr, bit, nested)?;
                            Next::Nested {
                                addr: text,
                                pos: text_pos,
                            }
                        }
                        IoMode::Glk => {
                            self.print_inline(text, text_pos)?;
                            Next::Root
                        }
                        IoMode::Null => Next::Root,
                    }
                }
                0x08..=0x0B => {
                    let mut target = self.memory.read_u32(node.wrapping_add(1))?;
                    if kind == 0x09 || kind == 0x0B {
                        target = self.memory.read_u32(target)?;
                    }
                    let tag = self.memory.read_u8(target)?;
                    self.suspend_compressed(addr, bit, nested)?;
                    match tag {
                        0xE0..=0xFF => Next::Nested {
                            addr: target,
                            pos: StringPos::Start,
                        },
                        0xC0..=0xDF => {
                            let args = if kind >= 0x0A {
                                let count = self.memory.read_u32(node.wrapping_add(5))?;
                                (0..count)
                                    .map(|i| {
                                        self.memory
                                            .read_u32(node.wrapping_add(9).wrapping_add(4 * i))
                                    })
                                    .collect::<VmResult<Vec<_>>>()?
                            } else {
                                Vec::new()
                            };
                            trace!(target: "glulx::io", "string calls function {:#x}", target);
                            self.enter_function(target, &args)?;
                            Next::Suspended
                        }
                        _ => {
                            return Err(VmError::StringDecoding(
                                "unknown object in indirect string reference",
                            ));
                        }
                    }
                }
                _ => return Err(VmError::StringDecoding("unknown node type in string table")),
            };
            match next {
                Next::Root => node = root,
                other => return Ok(other),
            }
        }
    }

    /// Push the stubs needed to come back to this point of a compressed
    /// string.
    fn suspend_compressed(&mut self, addr: u32, bit: u8, nested: &mut bool) -> VmResult<()> {
        if !*nested {
            self.push_call_stub(Resume::StringEnd)?;
            *nested = true;
        }
        self.pc = addr;
        self.push_call_stub(Resume::CompressedString { bit })
    }

    /// Print a NUL-terminated string embedded in the decoding table
    /// straight to the Glk sink.
    fn print_inline(&mut self, mut addr: u32, pos: StringPos) -> VmResult<()> {
        loop {
            if pos == StringPos::Unicode {
                let ch = self.memory.read_u32(addr)?;
                if ch == 0 {
                    return Ok(());
                }
                self.io.put_char_uni(ch);
                addr = addr.wrapping_add(4);
            } else {
                let ch = self.memory.read_u8(addr)?;
                if ch == 0 {
                    return Ok(());
                }
                self.io.put_char(ch);
                addr = addr.wrapping_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_are_signed_decimal() {
        assert_eq!(digits(0), b"0".to_vec());
        assert_eq!(digits(1234), b"1234".to_vec());
        assert_eq!(digits(-56i32 as u32), b"-56".to_vec());
        assert_eq!(digits(0x8000_0000), b"-2147483648".to_vec());
    }

    #[test]
    fn iosys_numbers() {
        for mode in [IoMode::Null, IoMode::Filter, IoMode::Glk] {
            assert_eq!(IoMode::from_number(mode.number()), Some(mode));
        }
        assert_eq!(IoMode::from_number(20), None);
    }
}
