//! Error kinds raised by the virtual machine.
//!
//! There are exactly two severities. [`VmError`] is fatal: the execution loop
//! halts and the diagnostic is handed to the host. [`SnapshotError`] is
//! recoverable: the opcode that asked for a save, restore or undo stores a
//! failure status and the guest program carries on.

use thiserror::Error;

/// Fatal conditions. Execution cannot continue after any of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("invalid game image: {0}")]
    InvalidImage(String),
    #[error("unknown opcode {opcode:#x} at {pc:#010x}")]
    UnknownOpcode { opcode: u32, pc: u32 },
    #[error("unknown addressing mode {mode:#x} in {kind} operand")]
    UnknownAddressingMode { mode: u8, kind: &'static str },
    #[error("constant addressing mode {0:#x} in store operand")]
    ConstantStore(u8),
    #[error("memory access out of range at {addr:#010x} (memory size {endmem:#x})")]
    MemoryOutOfRange { addr: u32, endmem: u32 },
    #[error("memory write to read-only address {0:#010x}")]
    ReadOnlyWrite(u32),
    #[error("stack access out of range at {0:#x}")]
    StackOutOfRange(u32),
    #[error("stack overflow in {0}")]
    StackOverflow(&'static str),
    #[error("stack underflow in {0}")]
    StackUnderflow(&'static str),
    #[error("{0} outside current stack range")]
    StackRange(&'static str),
    #[error("corrupt stack frame: {0}")]
    CorruptStack(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("call to non-function at {addr:#010x} (type byte {tag:#04x})")]
    NotAFunction { addr: u32, tag: u8 },
    #[error("illegal local type {0} in locals-format list")]
    IllegalLocalType(u8),
    #[error("invalid catch token {0:#x}")]
    BadCatchToken(u32),
    #[error("string decoding: {0}")]
    StringDecoding(&'static str),
    #[error("attempt to print non-string at {addr:#010x} (type byte {tag:#04x})")]
    NotAString { addr: u32, tag: u8 },
    #[error("direct search key must hold one, two, or four bytes (got {0})")]
    SearchKeySize(u32),
    #[error("heap allocation length must be positive")]
    ZeroAllocation,
    #[error("user debugtrap encountered ({0:#x})")]
    DebugTrap(u32),
    #[error("the virtual machine has halted")]
    Halted,
}

/// Recoverable failures of the serialization engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot data truncated")]
    Truncated,
    #[error("not a Glulx save file")]
    NotASaveFile,
    #[error("missing {0} chunk")]
    MissingChunk(&'static str),
    #[error("{chunk} chunk has bad length {len}")]
    BadChunkLength { chunk: &'static str, len: usize },
    #[error("save file was made by a different game image")]
    HeaderMismatch,
    #[error("saved memory size {0:#x} is not usable here")]
    BadMemorySize(u32),
    #[error("memory chunk runs past the end of memory")]
    MemoryOverrun,
    #[error("saved stack ({0} bytes) does not fit the stack")]
    StackTooLarge(usize),
    #[error("saved stack frame structure is inconsistent: {0}")]
    BadStackFrame(&'static str),
    #[error("heap summary is inconsistent: {0}")]
    BadHeapSummary(&'static str),
    #[error("no undo state available")]
    NoUndo,
    #[error("undo is disabled")]
    UndoDisabled,
    #[error("the I/O layer rejected stream {0:#x}")]
    Stream(u32),
}

impl SnapshotError {
    /// Status value stored for the guest when an operation fails.
    pub const STATUS: u32 = 1;
}

pub type VmResult<T> = Result<T, VmError>;
