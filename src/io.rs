//! Boundary between the VM and the host's display, input and file layer.

use std::collections::HashMap;

use log::trace;

use crate::core::Memory;
use crate::error::VmResult;

/// Host side of the `glk` opcode and the output system.
///
/// Implementations may read and write VM memory while handling a call, so
/// arguments that are addresses can be used as buffers.
pub trait IoBridge {
    /// Dispatch numbered call `selector` with `args` popped from the stack.
    fn glk(&mut self, selector: u32, args: &[u32], memory: &mut Memory) -> VmResult<u32>;

    /// Latin-1 character from `streamchar` or a string in Glk mode.
    fn put_char(&mut self, ch: u8);

    fn put_char_uni(&mut self, ch: u32);

    /// Store a serialized save under `stream`. Returns `false` on failure.
    fn write_save(&mut self, stream: u32, data: &[u8]) -> bool;

    /// Fetch the save held by `stream`, if any.
    fn read_save(&mut self, stream: u32) -> Option<Vec<u8>>;
}

/// Discards output, answers every call with 0 and has nowhere to save.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIo;

impl IoBridge for NullIo {
    fn glk(&mut self, selector: u32, args: &[u32], _memory: &mut Memory) -> VmResult<u32> {
        trace!(target: "glulx::io", "glk {:#x} {:?} ignored", selector, args);
        Ok(0)
    }

    fn put_char(&mut self, _ch: u8) {}

    fn put_char_uni(&mut self, _ch: u32) {}

    fn write_save(&mut self, _stream: u32, _data: &[u8]) -> bool {
        false
    }

    fn read_save(&mut self, _stream: u32) -> Option<Vec<u8>> {
        None
    }
}

/// In-memory bridge: collects printed text, keeps saves in a map keyed by
/// stream, and records every `glk` call.
#[derive(Debug, Default, Clone)]
pub struct MemoryIo {
    pub output: String,
    pub saves: HashMap<u32, Vec<u8>>,
    pub calls: Vec<(u32, Vec<u32>)>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoBridge for MemoryIo {
    fn glk(&mut self, selector: u32, args: &[u32], _memory: &mut Memory) -> VmResult<u32> {
        self.calls.push((selector, args.to_vec()));
        Ok(0)
    }

    fn put_char(&mut self, ch: u8) {
        self.output.push(ch as char);
    }

    fn put_char_uni(&mut self, ch: u32) {
        self.output
            .push(char::from_u32(ch).unwrap_or(char::REPLACEMENT_CHARACTER));
    }

    fn write_save(&mut self, stream: u32, data: &[u8]) -> bool {
        self.saves.insert(stream, data.to_vec());
        true
    }

    fn read_save(&mut self, stream: u32) -> Option<Vec<u8>> {
        self.saves.get(&stream).cloned()
    }
}

/// Lets a test keep a handle on a [`MemoryIo`] the VM also owns.
impl<T: IoBridge + ?Sized> IoBridge for std::rc::Rc<std::cell::RefCell<T>> {
    fn glk(&mut self, selector: u32, args: &[u32], memory: &mut Memory) -> VmResult<u32> {
        self.borrow_mut().glk(selector, args, memory)
    }

    fn put_char(&mut self, ch: u8) {
        self.borrow_mut().put_char(ch)
    }

    fn put_char_uni(&mut self, ch: u32) {
        self.borrow_mut().put_char_uni(ch)
    }

    fn write_save(&mut self, stream: u32, data: &[u8]) -> bool {
        self.borrow_mut().write_save(stream, data)
    }

    fn read_save(&mut self, stream: u32) -> Option<Vec<u8>> {
        self.borrow_mut().read_save(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_io_collects_text_and_saves() {
        let mut io = MemoryIo::new();
        io.put_char(b'h');
        io.put_char(0xE9);
        io.put_char_uni(0x263A);
        assert_eq!(io.output, "h\u{e9}\u{263a}");
        assert!(io.write_save(3, &[1, 2]));
        assert_eq!(io.read_save(3), Some(vec![1, 2]));
        assert_eq!(io.read_save(4), None);
    }

    #[test]
    fn shared_handle_sees_vm_output() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let shared = Rc::new(RefCell::new(MemoryIo::new()));
        let mut bridge: Box<dyn IoBridge> = Box::new(shared.clone());
        bridge.put_char(b'x');
        assert_eq!(shared.borrow().output, "x");
    }
}
