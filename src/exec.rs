//! Fetch, decode and dispatch.

use log::{debug, trace};
use rand::{RngCore, SeedableRng};
use rand::rngs::StdRng;

use crate::arith;
use crate::error::{VmError, VmResult};
use crate::image;
use crate::opcodes::Opcode;
use crate::operand::{self, Dest, Operands};
use crate::output::StringPos;
use crate::search::SearchKey;
use crate::vm::Vm;

/// Value returned by `gestalt 1`.
pub const TERP_VERSION: u32 = 0x0000_0100;
/// Glulx specification version implemented.
pub const GLULX_VERSION: u32 = 0x0003_0103;

/// Where a taken branch leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Goto(u32),
    /// Offsets 0 and 1 return that value from the current function.
    Return(u32),
}

impl Branch {
    /// Resolve `offset` relative to the PC just past the operands.
    pub fn resolve(next_pc: u32, offset: u32) -> Self {
        match offset {
            0 | 1 => Self::Return(offset),
            _ => Self::Goto(next_pc.wrapping_add(offset).wrapping_sub(2)),
        }
    }
}

/// `gestalt` selectors.
mod selector {
    pub const GLULX_VERSION: u32 = 0;
    pub const TERP_VERSION: u32 = 1;
    pub const RESIZE_MEM: u32 = 2;
    pub const UNDO: u32 = 3;
    pub const IO_SYSTEM: u32 = 4;
    pub const UNICODE: u32 = 5;
    pub const MEM_COPY: u32 = 6;
    pub const MALLOC: u32 = 7;
    pub const MALLOC_HEAP: u32 = 8;
    pub const ACCELERATION: u32 = 9;
    pub const ACCEL_FUNC: u32 = 10;
    pub const FLOAT: u32 = 11;
    pub const EXT_UNDO: u32 = 12;
    pub const DOUBLE: u32 = 13;
}

impl Vm {
    /// Read the opcode number at `pc`. Returns it and its encoded length.
    fn fetch_opcode(&self, pc: u32) -> VmResult<(u32, u32)> {
        let first = self.memory.read_u8(pc)?;
        Ok(match first {
            0x00..=0x7F => (first as u32, 1),
            0x80..=0xBF => ((self.memory.read_u16(pc)? & 0x7FFF) as u32, 2),
            _ => (self.memory.read_u32(pc)? & 0x0FFF_FFFF, 4),
        })
    }

    pub(crate) fn execute(&mut self) -> VmResult<()> {
        let start = self.pc;
        let (number, len) = self.fetch_opcode(start)?;
        let opcode = Opcode::from_number(number).ok_or(VmError::UnknownOpcode {
            opcode: number,
            pc: start,
        })?;
        let (ops, next) = operand::decode_operands(
            &self.memory,
            &mut self.stack,
            start.wrapping_add(len),
            opcode.shape(),
        )?;
        trace!(
            target: "glulx::exec",
            "{:#010x} {} {:?}",
            start,
            opcode.mnemonic(),
            ops.as_slice()
        );
        self.pc = next;
        self.dispatch(opcode, &ops)
    }

    fn put(&mut self, dest: Dest, value: u32) -> VmResult<()> {
        operand::store(&mut self.memory, &mut self.stack, dest, 4, value)
    }

    fn take_branch(&mut self, offset: u32) -> VmResult<()> {
        match Branch::resolve(self.pc, offset) {
            Branch::Goto(target) => {
                self.pc = target;
                Ok(())
            }
            Branch::Return(value) => self.return_from_function(value),
        }
    }

    fn branch_if(&mut self, condition: bool, offset: u32) -> VmResult<()> {
        if condition {
            self.take_branch(offset)
        } else {
            Ok(())
        }
    }

    fn gestalt(&self, selector: u32, arg: u32) -> u32 {
        match selector {
            selector::GLULX_VERSION => GLULX_VERSION,
            selector::TERP_VERSION => TERP_VERSION,
            selector::RESIZE_MEM
            | selector::UNDO
            | selector::UNICODE
            | selector::MEM_COPY
            | selector::MALLOC
            | selector::ACCELERATION
            | selector::EXT_UNDO => 1,
            selector::IO_SYSTEM => (arg <= 2) as u32,
            selector::MALLOC_HEAP => self.heap.start(),
            selector::ACCEL_FUNC => 0,
            selector::FLOAT | selector::DOUBLE => cfg!(feature = "float") as u32,
            _ => 0,
        }
    }

    fn random(&mut self, range: u32) -> u32 {
        let value = self.rng.next_u32();
        match range as i32 {
            0 => value,
            r if r > 0 => value % r as u32,
            r => (value % r.unsigned_abs()).wrapping_neg(),
        }
    }

    /// Top `count` stack values, bottom first.
    fn top_values(&self, count: u32, context: &'static str) -> VmResult<Vec<u32>> {
        self.stack.ensure_values(count, context)?;
        let base = self.stack.sp - 4 * count;
        (0..count)
            .map(|i| self.stack.read_u32(base + 4 * i))
            .collect()
    }

    fn stack_roll(&mut self, count: u32, shift: u32) -> VmResult<()> {
        let count = count as i32;
        if count < 0 {
            return Err(VmError::StackRange("stkroll"));
        }
        if count == 0 {
            return Ok(());
        }
        let mut values = self.top_values(count as u32, "stkroll")?;
        let places = (shift as i32).rem_euclid(count) as usize;
        values.rotate_right(places);
        let base = self.stack.sp - 4 * count as u32;
        for (i, value) in values.into_iter().enumerate() {
            self.stack.write_u32(base + 4 * i as u32, value)?;
        }
        Ok(())
    }

    fn set_memory_size(&mut self, new_end: u32) -> u32 {
        if self.heap.is_active() {
            debug!(target: "glulx::exec", "setmemsize refused while the heap is active");
            return 1;
        }
        if self.memory.resize(new_end) {
            debug!(target: "glulx::exec", "memory resized to {:#x}", new_end);
            0
        } else {
            1
        }
    }

    fn dispatch(&mut self, opcode: Opcode, ops: &Operands) -> VmResult<()> {
        let v = |i: usize| ops.value(i);
        let d = |i: usize| ops.dest(i);
        match opcode {
            Opcode::Nop => Ok(()),

            Opcode::Add => self.put(d(2), v(0).wrapping_add(v(1))),
            Opcode::Sub => self.put(d(2), v(0).wrapping_sub(v(1))),
            Opcode::Mul => self.put(d(2), v(0).wrapping_mul(v(1))),
            Opcode::Div => self.put(d(2), arith::div(v(0), v(1))?),
            Opcode::Mod => self.put(d(2), arith::rem(v(0), v(1))?),
            Opcode::Neg => self.put(d(1), v(0).wrapping_neg()),
            Opcode::Bitand => self.put(d(2), v(0) & v(1)),
            Opcode::Bitor => self.put(d(2), v(0) | v(1)),
            Opcode::Bitxor => self.put(d(2), v(0) ^ v(1)),
            Opcode::Bitnot => self.put(d(1), !v(0)),
            Opcode::Shiftl => self.put(d(2), arith::shift_left(v(0), v(1))),
            Opcode::Sshiftr => self.put(d(2), arith::shift_right_arith(v(0), v(1))),
            Opcode::Ushiftr => self.put(d(2), arith::shift_right_logical(v(0), v(1))),

            Opcode::Jump => self.take_branch(v(0)),
            Opcode::Jz => self.branch_if(v(0) == 0, v(1)),
            Opcode::Jnz => self.branch_if(v(0) != 0, v(1)),
            Opcode::Jeq => self.branch_if(v(0) == v(1), v(2)),
            Opcode::Jne => self.branch_if(v(0) != v(1), v(2)),
            Opcode::Jlt => self.branch_if((v(0) as i32) < v(1) as i32, v(2)),
            Opcode::Jge => self.branch_if(v(0) as i32 >= v(1) as i32, v(2)),
            Opcode::Jgt => self.branch_if(v(0) as i32 > v(1) as i32, v(2)),
            Opcode::Jle => self.branch_if(v(0) as i32 <= v(1) as i32, v(2)),
            Opcode::Jltu => self.branch_if(v(0) < v(1), v(2)),
            Opcode::Jgeu => self.branch_if(v(0) >= v(1), v(2)),
            Opcode::Jgtu => self.branch_if(v(0) > v(1), v(2)),
            Opcode::Jleu => self.branch_if(v(0) <= v(1), v(2)),
            Opcode::Jumpabs => {
                self.pc = v(0);
                Ok(())
            }

            Opcode::Call => {
                let args = self.pop_arguments(v(1))?;
                self.call_function(v(0), &args, d(2))
            }
            Opcode::Callf => self.call_function(v(0), &[], d(1)),
            Opcode::Callfi => self.call_function(v(0), &[v(1)], d(2)),
            Opcode::Callfii => self.call_function(v(0), &[v(1), v(2)], d(3)),
            Opcode::Callfiii => self.call_function(v(0), &[v(1), v(2), v(3)], d(4)),
            Opcode::Return => self.return_from_function(v(0)),
            Opcode::Tailcall => {
                let args = self.pop_arguments(v(1))?;
                self.tail_call(v(0), &args)
            }
            Opcode::Catch => {
                self.catch(d(0))?;
                self.take_branch(v(1))
            }
            Opcode::Throw => self.throw(v(0), v(1)),

            Opcode::Copy => self.put(d(1), v(0)),
            Opcode::Copys => operand::store(&mut self.memory, &mut self.stack, d(1), 2, v(0)),
            Opcode::Copyb => operand::store(&mut self.memory, &mut self.stack, d(1), 1, v(0)),
            Opcode::Sexs => self.put(d(1), arith::sign_extend_16(v(0))),
            Opcode::Sexb => self.put(d(1), arith::sign_extend_8(v(0))),

            Opcode::Aload => {
                let value = self.memory.read_u32(v(0).wrapping_add(v(1).wrapping_mul(4)))?;
                self.put(d(2), value)
            }
            Opcode::Aloads => {
                let value = self.memory.read_u16(v(0).wrapping_add(v(1).wrapping_mul(2)))?;
                self.put(d(2), value as u32)
            }
            Opcode::Aloadb => {
                let value = self.memory.read_u8(v(0).wrapping_add(v(1)))?;
                self.put(d(2), value as u32)
            }
            Opcode::Aloadbit => {
                let (addr, bit) = arith::bit_address(v(0), v(1));
                let value = (self.memory.read_u8(addr)? >> bit) & 1;
                self.put(d(2), value as u32)
            }
            Opcode::Astore => self
                .memory
                .write_u32(v(0).wrapping_add(v(1).wrapping_mul(4)), v(2)),
            Opcode::Astores => self
                .memory
                .write_u16(v(0).wrapping_add(v(1).wrapping_mul(2)), v(2) as u16),
            Opcode::Astoreb => self.memory.write_u8(v(0).wrapping_add(v(1)), v(2) as u8),
            Opcode::Astorebit => {
                let (addr, bit) = arith::bit_address(v(0), v(1));
                let byte = self.memory.read_u8(addr)?;
                let byte = if v(2) != 0 {
                    byte | (1 << bit)
                } else {
                    byte & !(1 << bit)
                };
                self.memory.write_u8(addr, byte)
            }

            Opcode::Stkcount => {
                let count = self.stack.value_count();
                self.put(d(0), count)
            }
            Opcode::Stkpeek => {
                let value = self.stack.peek(v(0))?;
                self.put(d(1), value)
            }
            Opcode::Stkswap => {
                self.stack.ensure_values(2, "stkswap")?;
                let top = self.stack.pop()?;
                let below = self.stack.pop()?;
                self.stack.push(top)?;
                self.stack.push(below)
            }
            Opcode::Stkroll => self.stack_roll(v(0), v(1)),
            Opcode::Stkcopy => {
                let count = v(0);
                let values = self.top_values(count, "stkcopy")?;
                self.stack.ensure_room(4 * count, "stkcopy")?;
                values.into_iter().try_for_each(|value| self.stack.push(value))
            }

            Opcode::Streamchar => self.stream_char(v(0)),
            Opcode::Streamunichar => self.stream_unichar(v(0)),
            Opcode::Streamnum => self.stream_num(v(0), false, 0),
            Opcode::Streamstr => self.stream_string(v(0), StringPos::Start),
            Opcode::Getiosys => {
                let iosys = self.iosys;
                self.put(d(0), iosys.mode.number())?;
                self.put(d(1), iosys.rock)
            }
            Opcode::Setiosys => {
                self.set_iosys(v(0), v(1));
                Ok(())
            }
            Opcode::Getstringtbl => {
                let table = self.string_table;
                self.put(d(0), table)
            }
            Opcode::Setstringtbl => {
                self.string_table = v(0);
                Ok(())
            }

            Opcode::Gestalt => {
                let value = self.gestalt(v(0), v(1));
                self.put(d(2), value)
            }
            Opcode::Debugtrap => Err(VmError::DebugTrap(v(0))),
            Opcode::Getmemsize => {
                let size = self.memory.end_mem();
                self.put(d(0), size)
            }
            Opcode::Setmemsize => {
                let status = self.set_memory_size(v(0));
                self.put(d(1), status)
            }
            Opcode::Random => {
                let value = self.random(v(0));
                self.put(d(1), value)
            }
            Opcode::Setrandom => {
                self.rng = match v(0) {
                    0 => StdRng::from_entropy(),
                    seed => StdRng::seed_from_u64(seed as u64),
                };
                Ok(())
            }
            Opcode::Quit => {
                self.halt();
                Ok(())
            }
            Opcode::Verify => {
                let status = if image::verify(self.memory.original()) { 0 } else { 1 };
                self.put(d(0), status)
            }
            Opcode::Restart => self.restart(),
            Opcode::Save => self.op_save(v(0), d(1)),
            Opcode::Restore => self.op_restore(v(0), d(1)),
            Opcode::Saveundo => self.op_saveundo(d(0)),
            Opcode::Restoreundo => self.op_restoreundo(d(0)),
            Opcode::Hasundo => {
                let status = if self.has_undo() { 0 } else { 1 };
                self.put(d(0), status)
            }
            Opcode::Discardundo => {
                self.discard_undo();
                Ok(())
            }
            Opcode::Protect => {
                self.memory.protect(v(0), v(1));
                Ok(())
            }
            Opcode::Glk => {
                let args = self.pop_arguments(v(1))?;
                let result = self.io.glk(v(0), &args, &mut self.memory)?;
                self.put(d(2), result)
            }

            Opcode::Linearsearch => {
                let key = SearchKey::new(&self.memory, v(0), v(1), v(6))?;
                let found = key.linear(&self.memory, v(2), v(3), v(4), v(5))?;
                self.put(d(7), found)
            }
            Opcode::Binarysearch => {
                let key = SearchKey::new(&self.memory, v(0), v(1), v(6))?;
                let found = key.binary(&self.memory, v(2), v(3), v(4), v(5))?;
                self.put(d(7), found)
            }
            Opcode::Linkedsearch => {
                let key = SearchKey::new(&self.memory, v(0), v(1), v(5))?;
                let found = key.linked(&self.memory, v(2), v(3), v(4))?;
                self.put(d(6), found)
            }

            Opcode::Mzero => self.memory.zero(v(1), v(0)),
            Opcode::Mcopy => self.memory.copy_within(v(1), v(2), v(0)),
            Opcode::Malloc => {
                let addr = self.heap.allocate(&mut self.memory, v(0))?;
                self.put(d(1), addr)
            }
            Opcode::Mfree => {
                self.heap.free(&mut self.memory, v(0));
                Ok(())
            }
            Opcode::Accelfunc | Opcode::Accelparam => {
                trace!(target: "glulx::exec", "{} {:#x} {:#x} ignored", opcode.mnemonic(), v(0), v(1));
                Ok(())
            }

            #[cfg(feature = "float")]
            _ => self.dispatch_float(opcode, ops),
        }
    }
}

#[cfg(feature = "float")]
impl Vm {
    fn double(ops: &Operands, i: usize) -> f64 {
        crate::float::to_double(ops.value(i), ops.value(i + 1))
    }

    /// Store a double to the destinations at `i` (high word) and `i + 1`
    /// (low word), low word first.
    fn put_double(&mut self, ops: &Operands, i: usize, value: f64) -> VmResult<()> {
        let (hi, lo) = crate::float::from_double(value);
        self.put(ops.dest(i + 1), lo)?;
        self.put(ops.dest(i), hi)
    }

    fn dispatch_float(&mut self, opcode: Opcode, ops: &Operands) -> VmResult<()> {
        use crate::float::{self, double};

        let v = |i: usize| ops.value(i);
        let d = |i: usize| ops.dest(i);
        let x = |i: usize| Self::double(ops, i);
        match opcode {
            Opcode::Numtof => self.put(d(1), float::numtof(v(0))),
            Opcode::Ftonumz => self.put(d(1), float::ftonumz(v(0))),
            Opcode::Ftonumn => self.put(d(1), float::ftonumn(v(0))),
            Opcode::Ceil => self.put(d(1), float::ceil(v(0))),
            Opcode::Floor => self.put(d(1), float::floor(v(0))),
            Opcode::Fadd => self.put(d(2), float::add(v(0), v(1))),
            Opcode::Fsub => self.put(d(2), float::sub(v(0), v(1))),
            Opcode::Fmul => self.put(d(2), float::mul(v(0), v(1))),
            Opcode::Fdiv => self.put(d(2), float::div(v(0), v(1))),
            Opcode::Fmod => {
                let (rem, quot) = float::fmod(v(0), v(1));
                self.put(d(2), rem)?;
                self.put(d(3), quot)
            }
            Opcode::Sqrt => self.put(d(1), float::sqrt(v(0))),
            Opcode::Exp => self.put(d(1), float::exp(v(0))),
            Opcode::Log => self.put(d(1), float::log(v(0))),
            Opcode::Pow => self.put(d(2), float::pow(v(0), v(1))),
            Opcode::Sin => self.put(d(1), float::sin(v(0))),
            Opcode::Cos => self.put(d(1), float::cos(v(0))),
            Opcode::Tan => self.put(d(1), float::tan(v(0))),
            Opcode::Asin => self.put(d(1), float::asin(v(0))),
            Opcode::Acos => self.put(d(1), float::acos(v(0))),
            Opcode::Atan => self.put(d(1), float::atan(v(0))),
            Opcode::Atan2 => self.put(d(2), float::atan2(v(0), v(1))),
            Opcode::Jfeq => self.branch_if(float::approx_eq(v(0), v(1), v(2)), v(3)),
            Opcode::Jfne => self.branch_if(!float::approx_eq(v(0), v(1), v(2)), v(3)),
            Opcode::Jflt => self.branch_if(float::lt(v(0), v(1)), v(2)),
            Opcode::Jfle => self.branch_if(float::le(v(0), v(1)), v(2)),
            Opcode::Jfgt => self.branch_if(float::gt(v(0), v(1)), v(2)),
            Opcode::Jfge => self.branch_if(float::ge(v(0), v(1)), v(2)),
            Opcode::Jisnan => self.branch_if(float::is_nan(v(0)), v(1)),
            Opcode::Jisinf => self.branch_if(float::is_inf(v(0)), v(1)),

            Opcode::Numtod => self.put_double(ops, 1, double::numtod(v(0))),
            Opcode::Dtonumz => self.put(d(2), double::dtonumz(x(0))),
            Opcode::Dtonumn => self.put(d(2), double::dtonumn(x(0))),
            Opcode::Ftod => self.put_double(ops, 1, double::ftod(v(0))),
            Opcode::Dtof => self.put(d(2), double::dtof(x(0))),
            Opcode::Dceil => self.put_double(ops, 2, double::ceil(x(0))),
            Opcode::Dfloor => self.put_double(ops, 2, x(0).floor()),
            Opcode::Dadd => self.put_double(ops, 4, x(0) + x(2)),
            Opcode::Dsub => self.put_double(ops, 4, x(0) - x(2)),
            Opcode::Dmul => self.put_double(ops, 4, x(0) * x(2)),
            Opcode::Ddiv => self.put_double(ops, 4, x(0) / x(2)),
            Opcode::Dmodr => self.put_double(ops, 4, double::modulo(x(0), x(2)).0),
            Opcode::Dmodq => self.put_double(ops, 4, double::modulo(x(0), x(2)).1),
            Opcode::Dsqrt => self.put_double(ops, 2, x(0).sqrt()),
            Opcode::Dexp => self.put_double(ops, 2, x(0).exp()),
            Opcode::Dlog => self.put_double(ops, 2, x(0).ln()),
            Opcode::Dpow => self.put_double(ops, 4, double::pow(x(0), x(2))),
            Opcode::Dsin => self.put_double(ops, 2, x(0).sin()),
            Opcode::Dcos => self.put_double(ops, 2, x(0).cos()),
            Opcode::Dtan => self.put_double(ops, 2, x(0).tan()),
            Opcode::Dasin => self.put_double(ops, 2, x(0).asin()),
            Opcode::Dacos => self.put_double(ops, 2, x(0).acos()),
            Opcode::Datan => self.put_double(ops, 2, x(0).atan()),
            Opcode::Datan2 => self.put_double(ops, 4, x(0).atan2(x(2))),
            Opcode::Jdeq => self.branch_if(double::approx_eq(x(0), x(2), x(4)), v(6)),
            Opcode::Jdne => self.branch_if(!double::approx_eq(x(0), x(2), x(4)), v(6)),
            Opcode::Jdlt => self.branch_if(x(0) < x(2), v(4)),
            Opcode::Jdle => self.branch_if(x(0) <= x(2), v(4)),
            Opcode::Jdgt => self.branch_if(x(0) > x(2), v(4)),
            Opcode::Jdge => self.branch_if(x(0) >= x(2), v(4)),
            Opcode::Jdisnan => self.branch_if(x(0).is_nan(), v(2)),
            Opcode::Jdisinf => self.branch_if(x(0).is_infinite(), v(2)),
            _ => Err(VmError::UnknownOpcode {
                opcode: opcode.number(),
                pc: self.pc,
            }),
        }
    }
}
