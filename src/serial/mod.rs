//! Serialization engine.
//!
//! Three consumers share one state shape (RAM diff, heap summary, stack):
//!
//! * save files: IFF container, every field big-endian, stack walked frame
//!   by frame ([`stack::write_portable`]);
//! * undo snapshots: same memory encoding, but heap words and stack bytes
//!   in host order since they never leave the process;
//! * autosave: the save-file form plus a `VMst` chunk with interpreter
//!   registers that a normal save leaves out.
//!
//! Restores decode into a [`DecodedState`] first and only touch the VM once
//! everything has been validated.

pub mod iff;
pub mod rle;
pub mod stack;
pub mod undo;

use log::{debug, error, warn};

use crate::call::{Resume, STUB_SIZE};
use crate::error::{SnapshotError, VmResult};
use crate::heap::Heap;
use crate::operand::{self, Dest};
use crate::vm::Vm;
use iff::{Form, FormWriter, id};

pub use undo::UndoChain;

/// Leading bytes of the original image kept in the `IFhd` chunk.
pub const HEADER_CHUNK_LEN: usize = 128;

/// Interpreter registers carried by autosaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub iosys_mode: u32,
    pub iosys_rock: u32,
    pub string_table: u32,
    pub protect_start: u32,
    pub protect_end: u32,
}

impl SessionState {
    const LEN: usize = 20;

    fn encode(&self) -> Vec<u8> {
        [
            self.iosys_mode,
            self.iosys_rock,
            self.string_table,
            self.protect_start,
            self.protect_end,
        ]
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .collect()
    }

    fn decode(data: &[u8]) -> Result<Self, SnapshotError> {
        if data.len() != Self::LEN {
            return Err(SnapshotError::BadChunkLength {
                chunk: "VMst",
                len: data.len(),
            });
        }
        let words = be_words(data, "VMst")?;
        Ok(Self {
            iosys_mode: words[0],
            iosys_rock: words[1],
            string_table: words[2],
            protect_start: words[3],
            protect_end: words[4],
        })
    }
}

/// A validated snapshot, ready to install.
#[derive(Debug, Clone)]
pub(crate) struct DecodedState {
    /// RAM contents `[ram_start, end_mem)`.
    ram: Vec<u8>,
    heap: Heap,
    /// Stack bytes in host order, ending with a call stub.
    stack: Vec<u8>,
    session: Option<SessionState>,
}

fn be_words(data: &[u8], chunk: &'static str) -> Result<Vec<u32>, SnapshotError> {
    if data.len() % 4 != 0 {
        return Err(SnapshotError::BadChunkLength {
            chunk,
            len: data.len(),
        });
    }
    Ok(data
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .collect())
}

/// Cursor over an undo snapshot.
struct NativeReader<'a> {
    data: &'a [u8],
}

impl<'a> NativeReader<'a> {
    fn word(&mut self) -> Result<u32, SnapshotError> {
        let (head, rest) = self
            .data
            .split_first_chunk::<4>()
            .ok_or(SnapshotError::Truncated)?;
        self.data = rest;
        Ok(u32::from_ne_bytes(*head))
    }

    fn block(&mut self) -> Result<&'a [u8], SnapshotError> {
        let len = self.word()? as usize;
        if len > self.data.len() {
            return Err(SnapshotError::Truncated);
        }
        let (block, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(block)
    }
}

fn check_stack_len(len: usize, size: u32) -> Result<(), SnapshotError> {
    if len > size as usize {
        return Err(SnapshotError::StackTooLarge(len));
    }
    if len < STUB_SIZE as usize || len % 4 != 0 {
        return Err(SnapshotError::BadStackFrame("no call stub on top of the stack"));
    }
    Ok(())
}

/// Check that the stub on top of a decoded stack (host order) can be popped
/// once the snapshot is installed: it must store a result, its frame header
/// must fit below it, and its destination must be writable.
fn check_resume_stub(stack: &[u8], ram_start: u32, end_mem: u32) -> Result<(), SnapshotError> {
    let word = |at: u32| -> Result<u32, SnapshotError> {
        stack
            .get(at as usize..at as usize + 4)
            .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or(SnapshotError::BadStackFrame("frame header outside the stack"))
    };
    let base = stack.len() as u32 - STUB_SIZE;
    let dest = match Resume::decode(word(base)?, word(base + 4)?) {
        Ok(Resume::Store(dest)) => dest,
        _ => return Err(SnapshotError::BadStackFrame("top call stub does not resume a call")),
    };

    let frame_ptr = word(base + 12)?;
    if frame_ptr % 4 != 0 || frame_ptr as u64 + 8 > base as u64 {
        return Err(SnapshotError::BadStackFrame("resume frame pointer"));
    }
    let values_base = frame_ptr as u64 + word(frame_ptr)? as u64;
    let locals_base = frame_ptr as u64 + word(frame_ptr + 4)? as u64;
    if values_base > base as u64 || locals_base > values_base {
        return Err(SnapshotError::BadStackFrame("resume frame header"));
    }

    let fits = match dest {
        Dest::Discard | Dest::Stack => true,
        Dest::Memory(addr) => addr >= ram_start && addr as u64 + 4 <= end_mem as u64,
        Dest::Local(offset) => locals_base + offset as u64 + 4 <= values_base,
    };
    if !fits {
        return Err(SnapshotError::BadStackFrame("resume destination"));
    }
    Ok(())
}

impl Vm {
    fn header_chunk(&self) -> &[u8] {
        let original = self.memory.original();
        &original[..HEADER_CHUNK_LEN.min(original.len())]
    }

    pub(crate) fn session_state(&self) -> SessionState {
        let protect = self.memory.protected_range();
        SessionState {
            iosys_mode: self.iosys.mode.number(),
            iosys_rock: self.iosys.rock,
            string_table: self.string_table,
            protect_start: protect.start,
            protect_end: protect.end,
        }
    }

    /// Save-file image of the current state. A call stub must be on top of
    /// the stack so the frame walk can find the innermost frame.
    pub(crate) fn encode_save(&self, with_session: bool) -> VmResult<Vec<u8>> {
        let stack = stack::write_portable(&self.stack)?;
        let heap: Vec<u8> = self
            .heap
            .summary()
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let mut form = FormWriter::new();
        form.chunk(id::HEADER, self.header_chunk())
            .chunk(id::MEMORY, &rle::encode_memory(&self.memory))
            .chunk(id::HEAP, &heap)
            .chunk(id::STACK, &stack);
        if with_session {
            form.chunk(id::SESSION, &self.session_state().encode());
        }
        Ok(form.finish())
    }

    pub(crate) fn decode_save(&self, data: &[u8]) -> Result<DecodedState, SnapshotError> {
        let form = Form::parse(data)?;
        let header = form
            .chunk(id::HEADER)
            .ok_or(SnapshotError::MissingChunk("IFhd"))?;
        if header != self.header_chunk() {
            return Err(SnapshotError::HeaderMismatch);
        }
        let memory = form
            .chunk(id::MEMORY)
            .ok_or(SnapshotError::MissingChunk("CMem"))?;
        let stack_data = form
            .chunk(id::STACK)
            .ok_or(SnapshotError::MissingChunk("Stks"))?;

        let ram = rle::decode_memory(memory, &self.memory)?;
        let end_mem = self.memory.ram_start() + ram.len() as u32;
        let heap_words = match form.chunk(id::HEAP) {
            Some(data) => be_words(data, "MAll")?,
            None => Vec::new(),
        };
        let heap = Heap::from_summary(&heap_words, end_mem)?;
        check_stack_len(stack_data.len(), self.stack.size())?;
        let stack = stack::read_portable(stack_data, self.stack.size())?;
        check_resume_stub(&stack, self.memory.ram_start(), end_mem)?;
        let session = form
            .chunk(id::SESSION)
            .map(SessionState::decode)
            .transpose()?;
        Ok(DecodedState {
            ram,
            heap,
            stack,
            session,
        })
    }

    /// Same-session snapshot: length-prefixed memory chunk, heap summary and
    /// raw stack, all in host order.
    pub(crate) fn encode_undo(&self) -> Vec<u8> {
        let memory = rle::encode_memory(&self.memory);
        let heap = self.heap.summary();
        let stack = self.stack.contents();
        let mut out = Vec::with_capacity(12 + memory.len() + 4 * heap.len() + stack.len());
        out.extend_from_slice(&(memory.len() as u32).to_ne_bytes());
        out.extend_from_slice(&memory);
        out.extend_from_slice(&(heap.len() as u32).to_ne_bytes());
        for word in heap {
            out.extend_from_slice(&word.to_ne_bytes());
        }
        out.extend_from_slice(&(stack.len() as u32).to_ne_bytes());
        out.extend_from_slice(stack);
        out
    }

    pub(crate) fn decode_undo(&self, data: &[u8]) -> Result<DecodedState, SnapshotError> {
        let mut reader = NativeReader { data };
        let ram = rle::decode_memory(reader.block()?, &self.memory)?;
        let end_mem = self.memory.ram_start() + ram.len() as u32;
        let count = reader.word()?;
        let heap_words = (0..count)
            .map(|_| reader.word())
            .collect::<Result<Vec<_>, _>>()?;
        let heap = Heap::from_summary(&heap_words, end_mem)?;
        let stack = reader.block()?;
        check_stack_len(stack.len(), self.stack.size())?;
        check_resume_stub(stack, self.memory.ram_start(), end_mem)?;
        Ok(DecodedState {
            ram,
            heap,
            stack: stack.to_vec(),
            session: None,
        })
    }

    /// Install a decoded snapshot. The stack is left with the saved call
    /// stub on top; frame registers are restored when it is popped.
    pub(crate) fn apply_state(&mut self, state: DecodedState) {
        self.heap.clear();
        self.memory.replace_ram(&state.ram);
        self.heap = state.heap;
        self.stack.load(&state.stack);
        if let Some(session) = state.session {
            self.set_iosys(session.iosys_mode, session.iosys_rock);
            self.string_table = session.string_table;
            self.memory.protect(
                session.protect_start,
                session.protect_end.saturating_sub(session.protect_start),
            );
        }
    }

    /// `save`: the stub pushed here is what a later restore resumes from.
    pub(crate) fn op_save(&mut self, stream: u32, dest: Dest) -> VmResult<()> {
        self.push_call_stub(Resume::Store(dest))?;
        let data = self.encode_save(false)?;
        let status = if self.io.write_save(stream, &data) {
            debug!(target: "glulx::serial", "saved {} bytes to stream {:#x}", data.len(), stream);
            0
        } else {
            warn!(target: "glulx::serial", "{}", SnapshotError::Stream(stream));
            SnapshotError::STATUS
        };
        self.pop_call_stub(status)
    }

    pub(crate) fn op_restore(&mut self, stream: u32, dest: Dest) -> VmResult<()> {
        let decoded = self
            .io
            .read_save(stream)
            .ok_or(SnapshotError::Stream(stream))
            .and_then(|data| self.decode_save(&data));
        match decoded {
            Ok(state) => {
                self.apply_state(state);
                debug!(target: "glulx::serial", "restored from stream {:#x}", stream);
                self.pop_call_stub(u32::MAX)
            }
            Err(err) => {
                warn!(target: "glulx::serial", "restore failed: {}", err);
                operand::store(&mut self.memory, &mut self.stack, dest, 4, SnapshotError::STATUS)
            }
        }
    }

    pub(crate) fn op_saveundo(&mut self, dest: Dest) -> VmResult<()> {
        self.push_call_stub(Resume::Store(dest))?;
        let snapshot = self.encode_undo();
        let len = snapshot.len();
        let status = match self.undo.push(snapshot) {
            Ok(()) => {
                debug!(target: "glulx::serial", "undo snapshot pushed ({} bytes, {} held)", len, self.undo.len());
                0
            }
            Err(err) => {
                warn!(target: "glulx::serial", "saveundo failed: {}", err);
                SnapshotError::STATUS
            }
        };
        self.pop_call_stub(status)
    }

    pub(crate) fn op_restoreundo(&mut self, dest: Dest) -> VmResult<()> {
        let decoded = self
            .undo
            .newest()
            .ok_or(SnapshotError::NoUndo)
            .and_then(|data| self.decode_undo(data));
        match decoded {
            Ok(state) => {
                self.undo.pop();
                self.apply_state(state);
                debug!(target: "glulx::serial", "undo restored ({} left)", self.undo.len());
                self.pop_call_stub(u32::MAX)
            }
            Err(err) => {
                warn!(target: "glulx::serial", "restoreundo failed: {}", err);
                operand::store(&mut self.memory, &mut self.stack, dest, 4, SnapshotError::STATUS)
            }
        }
    }

    /// Snapshot the whole session between instructions, including the
    /// interpreter registers a normal save leaves out.
    pub fn autosave(&mut self) -> VmResult<Vec<u8>> {
        self.push_call_stub(Resume::Store(Dest::Discard))?;
        let result = self.encode_save(true);
        self.stack.sp -= STUB_SIZE;
        result
    }

    /// Resume a session captured by [`Vm::autosave`]. Data that fails
    /// validation leaves the VM unchanged.
    pub fn autorestore(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let state = self.decode_save(data)?;
        self.apply_state(state);
        if let Err(err) = self.pop_call_stub(0) {
            error!(target: "glulx::serial", "autorestore left an unusable stack: {}", err);
            self.halt();
            return Err(SnapshotError::BadStackFrame("resume stub"));
        }
        self.resume();
        debug!(target: "glulx::serial", "autorestored {} bytes", data.len());
        Ok(())
    }

    /// Drop the newest undo snapshot.
    pub(crate) fn discard_undo(&mut self) {
        if self.undo.pop().is_some() {
            debug!(target: "glulx::serial", "undo snapshot discarded");
        }
    }

    pub(crate) fn has_undo(&self) -> bool {
        !self.undo.is_empty()
    }
}
