//! Opcode numbers and operand shapes.
//!
//! Opcodes below 0x80 resolve through a table built at compile time; the
//! sparse upper range goes through a `match`.

/// Whether an operand is read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
}

use Access::{Load as L, Store as S};

/// Operand list of an opcode. `width` is the byte width used for memory and
/// local operands; only `copys` and `copyb` use anything but 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandShape {
    pub access: &'static [Access],
    pub width: u8,
}

impl OperandShape {
    const fn words(access: &'static [Access]) -> Self {
        Self { access, width: 4 }
    }

    pub fn len(&self) -> usize {
        self.access.len()
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_empty()
    }
}

const NONE: OperandShape = OperandShape::words(&[]);
const LD: OperandShape = OperandShape::words(&[L]);
const ST: OperandShape = OperandShape::words(&[S]);
const LS: OperandShape = OperandShape::words(&[L, S]);
const LL: OperandShape = OperandShape::words(&[L, L]);
const SL: OperandShape = OperandShape::words(&[S, L]);
const SS: OperandShape = OperandShape::words(&[S, S]);
const LLS: OperandShape = OperandShape::words(&[L, L, S]);
const LLL: OperandShape = OperandShape::words(&[L, L, L]);
const LLLS: OperandShape = OperandShape::words(&[L, L, L, S]);
const LLLLS: OperandShape = OperandShape::words(&[L, L, L, L, S]);
const LLLLLLS: OperandShape = OperandShape::words(&[L, L, L, L, L, L, S]);
const LLLLLLLS: OperandShape = OperandShape::words(&[L, L, L, L, L, L, L, S]);
const COPYS: OperandShape = OperandShape {
    access: &[L, S],
    width: 2,
};
const COPYB: OperandShape = OperandShape {
    access: &[L, S],
    width: 1,
};
#[cfg(feature = "float")]
const LLSS: OperandShape = OperandShape::words(&[L, L, S, S]);
#[cfg(feature = "float")]
const LLLL: OperandShape = OperandShape::words(&[L, L, L, L]);
#[cfg(feature = "float")]
const LSS: OperandShape = OperandShape::words(&[L, S, S]);
#[cfg(feature = "float")]
const LLLLSS: OperandShape = OperandShape::words(&[L, L, L, L, S, S]);
#[cfg(feature = "float")]
const LLLLL: OperandShape = OperandShape::words(&[L, L, L, L, L]);
#[cfg(feature = "float")]
const LLLLLLL: OperandShape = OperandShape::words(&[L, L, L, L, L, L, L]);

/// Most operands any opcode takes.
pub const MAX_OPERANDS: usize = 8;

macro_rules! opcodes {
    ($( $(#[$meta:meta])* $name:ident = $num:literal, $mnemonic:literal, $shape:ident; )*) => {
        /// Every opcode this VM executes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $(#[$meta])* $name, )*
        }

        impl Opcode {
            const fn lookup(number: u32) -> Option<Self> {
                match number {
                    $( $(#[$meta])* $num => Some(Self::$name), )*
                    _ => None,
                }
            }

            /// Opcode number as encoded in the instruction stream.
            pub const fn number(self) -> u32 {
                match self {
                    $( $(#[$meta])* Self::$name => $num, )*
                }
            }

            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( $(#[$meta])* Self::$name => $mnemonic, )*
                }
            }

            pub const fn shape(self) -> OperandShape {
                match self {
                    $( $(#[$meta])* Self::$name => $shape, )*
                }
            }

            pub fn from_mnemonic(name: &str) -> Option<Self> {
                match name {
                    $( $(#[$meta])* $mnemonic => Some(Self::$name), )*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", NONE;
    Add = 0x10, "add", LLS;
    Sub = 0x11, "sub", LLS;
    Mul = 0x12, "mul", LLS;
    Div = 0x13, "div", LLS;
    Mod = 0x14, "mod", LLS;
    Neg = 0x15, "neg", LS;
    Bitand = 0x18, "bitand", LLS;
    Bitor = 0x19, "bitor", LLS;
    Bitxor = 0x1A, "bitxor", LLS;
    Bitnot = 0x1B, "bitnot", LS;
    Shiftl = 0x1C, "shiftl", LLS;
    Sshiftr = 0x1D, "sshiftr", LLS;
    Ushiftr = 0x1E, "ushiftr", LLS;
    Jump = 0x20, "jump", LD;
    Jz = 0x22, "jz", LL;
    Jnz = 0x23, "jnz", LL;
    Jeq = 0x24, "jeq", LLL;
    Jne = 0x25, "jne", LLL;
    Jlt = 0x26, "jlt", LLL;
    Jge = 0x27, "jge", LLL;
    Jgt = 0x28, "jgt", LLL;
    Jle = 0x29, "jle", LLL;
    Jltu = 0x2A, "jltu", LLL;
    Jgeu = 0x2B, "jgeu", LLL;
    Jgtu = 0x2C, "jgtu", LLL;
    Jleu = 0x2D, "jleu", LLL;
    Call = 0x30, "call", LLS;
    Return = 0x31, "return", LD;
    Catch = 0x32, "catch", SL;
    Throw = 0x33, "throw", LL;
    Tailcall = 0x34, "tailcall", LL;
    Copy = 0x40, "copy", LS;
    Copys = 0x41, "copys", COPYS;
    Copyb = 0x42, "copyb", COPYB;
    Sexs = 0x44, "sexs", LS;
    Sexb = 0x45, "sexb", LS;
    Aload = 0x48, "aload", LLS;
    Aloads = 0x49, "aloads", LLS;
    Aloadb = 0x4A, "aloadb", LLS;
    Aloadbit = 0x4B, "aloadbit", LLS;
    Astore = 0x4C, "astore", LLL;
    Astores = 0x4D, "astores", LLL;
    Astoreb = 0x4E, "astoreb", LLL;
    Astorebit = 0x4F, "astorebit", LLL;
    Stkcount = 0x50, "stkcount", ST;
    Stkpeek = 0x51, "stkpeek", LS;
    Stkswap = 0x52, "stkswap", NONE;
    Stkroll = 0x53, "stkroll", LL;
    Stkcopy = 0x54, "stkcopy", LD;
    Streamchar = 0x70, "streamchar", LD;
    Streamnum = 0x71, "streamnum", LD;
    Streamstr = 0x72, "streamstr", LD;
    Streamunichar = 0x73, "streamunichar", LD;
    Gestalt = 0x100, "gestalt", LLS;
    Debugtrap = 0x101, "debugtrap", LD;
    Getmemsize = 0x102, "getmemsize", ST;
    Setmemsize = 0x103, "setmemsize", LS;
    Jumpabs = 0x104, "jumpabs", LD;
    Random = 0x110, "random", LS;
    Setrandom = 0x111, "setrandom", LD;
    Quit = 0x120, "quit", NONE;
    Verify = 0x121, "verify", ST;
    Restart = 0x122, "restart", NONE;
    Save = 0x123, "save", LS;
    Restore = 0x124, "restore", LS;
    Saveundo = 0x125, "saveundo", ST;
    Restoreundo = 0x126, "restoreundo", ST;
    Protect = 0x127, "protect", LL;
    Hasundo = 0x128, "hasundo", ST;
    Discardundo = 0x129, "discardundo", NONE;
    Glk = 0x130, "glk", LLS;
    Getstringtbl = 0x140, "getstringtbl", ST;
    Setstringtbl = 0x141, "setstringtbl", LD;
    Getiosys = 0x148, "getiosys", SS;
    Setiosys = 0x149, "setiosys", LL;
    Linearsearch = 0x150, "linearsearch", LLLLLLLS;
    Binarysearch = 0x151, "binarysearch", LLLLLLLS;
    Linkedsearch = 0x152, "linkedsearch", LLLLLLS;
    Callf = 0x160, "callf", LS;
    Callfi = 0x161, "callfi", LLS;
    Callfii = 0x162, "callfii", LLLS;
    Callfiii = 0x163, "callfiii", LLLLS;
    Mzero = 0x170, "mzero", LL;
    Mcopy = 0x171, "mcopy", LLL;
    Malloc = 0x178, "malloc", LS;
    Mfree = 0x179, "mfree", LD;
    Accelfunc = 0x180, "accelfunc", LL;
    Accelparam = 0x181, "accelparam", LL;
    #[cfg(feature = "float")] Numtof = 0x190, "numtof", LS;
    #[cfg(feature = "float")] Ftonumz = 0x191, "ftonumz", LS;
    #[cfg(feature = "float")] Ftonumn = 0x192, "ftonumn", LS;
    #[cfg(feature = "float")] Ceil = 0x198, "ceil", LS;
    #[cfg(feature = "float")] Floor = 0x199, "floor", LS;
    #[cfg(feature = "float")] Fadd = 0x1A0, "fadd", LLS;
    #[cfg(feature = "float")] Fsub = 0x1A1, "fsub", LLS;
    #[cfg(feature = "float")] Fmul = 0x1A2, "fmul", LLS;
    #[cfg(feature = "float")] Fdiv = 0x1A3, "fdiv", LLS;
    #[cfg(feature = "float")] Fmod = 0x1A4, "fmod", LLSS;
    #[cfg(feature = "float")] Sqrt = 0x1A8, "sqrt", LS;
    #[cfg(feature = "float")] Exp = 0x1A9, "exp", LS;
    #[cfg(feature = "float")] Log = 0x1AA, "log", LS;
    #[cfg(feature = "float")] Pow = 0x1AB, "pow", LLS;
    #[cfg(feature = "float")] Sin = 0x1B0, "sin", LS;
    #[cfg(feature = "float")] Cos = 0x1B1, "cos", LS;
    #[cfg(feature = "float")] Tan = 0x1B2, "tan", LS;
    #[cfg(feature = "float")] Asin = 0x1B3, "asin", LS;
    #[cfg(feature = "float")] Acos = 0x1B4, "acos", LS;
    #[cfg(feature = "float")] Atan = 0x1B5, "atan", LS;
    #[cfg(feature = "float")] Atan2 = 0x1B6, "atan2", LLS;
    #[cfg(feature = "float")] Jfeq = 0x1C0, "jfeq", LLLL;
    #[cfg(feature = "float")] Jfne = 0x1C1, "jfne", LLLL;
    #[cfg(feature = "float")] Jflt = 0x1C2, "jflt", LLL;
    #[cfg(feature = "float")] Jfle = 0x1C3, "jfle", LLL;
    #[cfg(feature = "float")] Jfgt = 0x1C4, "jfgt", LLL;
    #[cfg(feature = "float")] Jfge = 0x1C5, "jfge", LLL;
    #[cfg(feature = "float")] Jisnan = 0x1C8, "jisnan", LL;
    #[cfg(feature = "float")] Jisinf = 0x1C9, "jisinf", LL;
    #[cfg(feature = "float")] Numtod = 0x200, "numtod", LSS;
    #[cfg(feature = "float")] Dtonumz = 0x201, "dtonumz", LLS;
    #[cfg(feature = "float")] Dtonumn = 0x202, "dtonumn", LLS;
    #[cfg(feature = "float")] Ftod = 0x203, "ftod", LSS;
    #[cfg(feature = "float")] Dtof = 0x204, "dtof", LLS;
    #[cfg(feature = "float")] Dceil = 0x208, "dceil", LLSS;
    #[cfg(feature = "float")] Dfloor = 0x209, "dfloor", LLSS;
    #[cfg(feature = "float")] Dadd = 0x210, "dadd", LLLLSS;
    #[cfg(feature = "float")] Dsub = 0x211, "dsub", LLLLSS;
    #[cfg(feature = "float")] Dmul = 0x212, "dmul", LLLLSS;
    #[cfg(feature = "float")] Ddiv = 0x213, "ddiv", LLLLSS;
    #[cfg(feature = "float")] Dmodr = 0x214, "dmodr", LLLLSS;
    #[cfg(feature = "float")] Dmodq = 0x215, "dmodq", LLLLSS;
    #[cfg(feature = "float")] Dsqrt = 0x218, "dsqrt", LLSS;
    #[cfg(feature = "float")] Dexp = 0x219, "dexp", LLSS;
    #[cfg(feature = "float")] Dlog = 0x21A, "dlog", LLSS;
    #[cfg(feature = "float")] Dpow = 0x21B, "dpow", LLLLSS;
    #[cfg(feature = "float")] Dsin = 0x220, "dsin", LLSS;
    #[cfg(feature = "float")] Dcos = 0x221, "dcos", LLSS;
    #[cfg(feature = "float")] Dtan = 0x222, "dtan", LLSS;
    #[cfg(feature = "float")] Dasin = 0x223, "dasin", LLSS;
    #[cfg(feature = "float")] Dacos = 0x224, "dacos", LLSS;
    #[cfg(feature = "float")] Datan = 0x225, "datan", LLSS;
    #[cfg(feature = "float")] Datan2 = 0x226, "datan2", LLLLSS;
    #[cfg(feature = "float")] Jdeq = 0x230, "jdeq", LLLLLLL;
    #[cfg(feature = "float")] Jdne = 0x231, "jdne", LLLLLLL;
    #[cfg(feature = "float")] Jdlt = 0x232, "jdlt", LLLLL;
    #[cfg(feature = "float")] Jdle = 0x233, "jdle", LLLLL;
    #[cfg(feature = "float")] Jdgt = 0x234, "jdgt", LLLLL;
    #[cfg(feature = "float")] Jdge = 0x235, "jdge", LLLLL;
    #[cfg(feature = "float")] Jdisnan = 0x238, "jdisnan", LLL;
    #[cfg(feature = "float")] Jdisinf = 0x239, "jdisinf", LLL;
}

static FAST_TABLE: [Option<Opcode>; 0x80] = {
    let mut table = [None; 0x80];
    let mut n = 0;
    while n < 0x80 {
        table[n] = Opcode::lookup(n as u32);
        n += 1;
    }
    table
};

impl Opcode {
    pub fn from_number(number: u32) -> Option<Self> {
        if number < 0x80 {
            FAST_TABLE[number as usize]
        } else {
            Self::lookup(number)
        }
    }

    /// Index of the operand holding a relative branch offset, if any.
    pub fn branch_operand(self) -> Option<usize> {
        match self {
            Self::Jump => Some(0),
            Self::Jz | Self::Jnz | Self::Catch => Some(1),
            Self::Jeq
            | Self::Jne
            | Self::Jlt
            | Self::Jge
            | Self::Jgt
            | Self::Jle
            | Self::Jltu
            | Self::Jgeu
            | Self::Jgtu
            | Self::Jleu => Some(2),
            #[cfg(feature = "float")]
            Self::Jisnan | Self::Jisinf => Some(1),
            #[cfg(feature = "float")]
            Self::Jflt | Self::Jfle | Self::Jfgt | Self::Jfge | Self::Jdisnan | Self::Jdisinf => {
                Some(2)
            }
            #[cfg(feature = "float")]
            Self::Jfeq | Self::Jfne => Some(3),
            #[cfg(feature = "float")]
            Self::Jdlt | Self::Jdle | Self::Jdgt | Self::Jdge => Some(4),
            #[cfg(feature = "float")]
            Self::Jdeq | Self::Jdne => Some(6),
            _ => None,
        }
    }

    /// Bytes the opcode number occupies in the instruction stream.
    pub fn encoded_len(self) -> u32 {
        match self.number() {
            0..=0x7F => 1,
            0x80..=0x3FFF => 2,
            _ => 4,
        }
    }
}
