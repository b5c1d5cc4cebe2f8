//! The VM context: owns memory, stack, heap, undo chain and the I/O bridge
//! for one game session.

use log::{debug, error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::VmConfig;
use crate::core::{Memory, Stack};
use crate::error::{VmError, VmResult};
use crate::heap::Heap;
use crate::image::Header;
use crate::io::IoBridge;
use crate::output::IoSys;
use crate::serial::UndoChain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Halted,
}

/// Snapshot of execution counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    pub instructions: u64,
    pub pc: u32,
    pub stack_ptr: u32,
    pub end_mem: u32,
    pub heap_blocks: u32,
    pub undo_depth: usize,
    pub halted: bool,
}

pub struct Vm {
    pub(crate) memory: Memory,
    pub(crate) stack: Stack,
    pub(crate) pc: u32,
    pub(crate) heap: Heap,
    pub(crate) iosys: IoSys,
    pub(crate) string_table: u32,
    pub(crate) undo: UndoChain,
    pub(crate) rng: StdRng,
    pub(crate) io: Box<dyn IoBridge>,
    pub(crate) header: Header,
    pub(crate) state: RunState,
    pub(crate) instructions: u64,
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl Vm {
    /// Load `image` and enter its start function.
    pub fn new(image: &[u8], config: VmConfig, io: Box<dyn IoBridge>) -> VmResult<Self> {
        let header = Header::parse(image)?;
        let stack_size = config.stack_size.unwrap_or(header.stack_size);
        let memory = Memory::new(
            image,
            header.ram_start,
            header.ext_start,
            header.end_mem,
            config.max_memory,
        )?;
        let mut vm = Self {
            memory,
            stack: Stack::new(stack_size),
            pc: 0,
            heap: Heap::new(),
            iosys: IoSys::default(),
            string_table: header.string_table,
            undo: UndoChain::new(config.undo_levels),
            rng: seeded_rng(config.rng_seed),
            io,
            header,
            state: RunState::Running,
            instructions: 0,
        };
        vm.enter_function(header.start_func, &[])?;
        info!(
            target: "glulx::exec",
            "loaded image v{:#x}: RAM {:#x}, memory {:#x}, stack {:#x}",
            header.version,
            header.ram_start,
            header.end_mem,
            stack_size
        );
        Ok(vm)
    }

    /// Execute one instruction. A fatal error halts the VM and is returned.
    pub fn step(&mut self) -> VmResult<()> {
        if self.state == RunState::Halted {
            return Err(VmError::Halted);
        }
        let pc = self.pc;
        match self.execute() {
            Ok(()) => {
                self.instructions += 1;
                Ok(())
            }
            Err(err) => {
                error!(target: "glulx::exec", "fatal at {:#010x}: {}", pc, err);
                self.halt();
                Err(err)
            }
        }
    }

    /// Run until the program quits or a fatal error occurs.
    pub fn run(&mut self) -> VmResult<()> {
        while self.state == RunState::Running {
            self.step()?;
        }
        Ok(())
    }

    /// Run at most `limit` instructions. Returns how many were executed.
    pub fn run_for(&mut self, limit: u64) -> VmResult<u64> {
        let mut count = 0;
        while count < limit && self.state == RunState::Running {
            self.step()?;
            count += 1;
        }
        Ok(count)
    }

    /// `restart`: back to the freshly loaded state, keeping the protected
    /// range, the undo chain and the random generator.
    pub fn restart(&mut self) -> VmResult<()> {
        self.heap.clear();
        self.memory.reset();
        self.stack.clear();
        self.iosys = IoSys::default();
        self.string_table = self.header.string_table;
        self.state = RunState::Running;
        self.enter_function(self.header.start_func, &[])?;
        debug!(target: "glulx::exec", "restarted");
        Ok(())
    }

    pub(crate) fn halt(&mut self) {
        if self.state != RunState::Halted {
            debug!(target: "glulx::exec", "halted after {} instructions", self.instructions);
        }
        self.state = RunState::Halted;
    }

    pub(crate) fn resume(&mut self) {
        self.state = RunState::Running;
    }

    pub fn is_halted(&self) -> bool {
        self.state == RunState::Halted
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> VmStats {
        VmStats {
            instructions: self.instructions,
            pc: self.pc,
            stack_ptr: self.stack.sp(),
            end_mem: self.memory.end_mem(),
            heap_blocks: self.heap.allocated_blocks(),
            undo_depth: self.undo.len(),
            halted: self.is_halted(),
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Host access to memory, e.g. to fill an input buffer.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn string_table(&self) -> u32 {
        self.string_table
    }

    /// Whether the loaded image's checksum matches its contents.
    pub fn verify(&self) -> bool {
        crate::image::verify(self.memory.original())
    }
}
