//! Game image header and checksum.

use crate::error::{VmError, VmResult};

/// `Glul`
pub const MAGIC: u32 = 0x476C_756C;

/// Lowest and highest accepted format versions (2.0.0 to 3.1.x).
pub const MIN_VERSION: u32 = 0x0002_0000;
pub const MAX_VERSION: u32 = 0x0003_01FF;

/// Offset of the checksum word.
const CHECKSUM_AT: usize = 0x20;

/// Parsed 36-byte header at the start of a game image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub ram_start: u32,
    pub ext_start: u32,
    pub end_mem: u32,
    pub stack_size: u32,
    pub start_func: u32,
    pub string_table: u32,
    pub checksum: u32,
}

fn word(image: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([image[at], image[at + 1], image[at + 2], image[at + 3]])
}

fn invalid(msg: String) -> VmError {
    VmError::InvalidImage(msg)
}

impl Header {
    pub const SIZE: usize = 36;

    pub fn parse(image: &[u8]) -> VmResult<Self> {
        if image.len() < Self::SIZE {
            return Err(invalid(format!("{} bytes is too short for a header", image.len())));
        }
        let magic = word(image, 0);
        if magic != MAGIC {
            return Err(invalid(format!("bad magic {:#010x}", magic)));
        }
        let header = Self {
            version: word(image, 4),
            ram_start: word(image, 8),
            ext_start: word(image, 12),
            end_mem: word(image, 16),
            stack_size: word(image, 20),
            start_func: word(image, 24),
            string_table: word(image, 28),
            checksum: word(image, CHECKSUM_AT),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> VmResult<()> {
        if !(MIN_VERSION..=MAX_VERSION).contains(&self.version) {
            return Err(invalid(format!("unsupported version {:#010x}", self.version)));
        }
        if self.ram_start < 0x100 {
            return Err(invalid(format!("RAMSTART {:#x} overlaps the header", self.ram_start)));
        }
        if self.ram_start > self.ext_start || self.ext_start > self.end_mem {
            return Err(invalid(format!(
                "segments out of order: RAMSTART {:#x}, EXTSTART {:#x}, ENDMEM {:#x}",
                self.ram_start, self.ext_start, self.end_mem
            )));
        }
        for (name, value) in [
            ("RAMSTART", self.ram_start),
            ("EXTSTART", self.ext_start),
            ("ENDMEM", self.end_mem),
            ("stack size", self.stack_size),
        ] {
            if value % 0x100 != 0 {
                return Err(invalid(format!("{} {:#x} is not a multiple of 256", name, value)));
            }
        }
        Ok(())
    }
}

/// Sum of the image as big-endian words, with the checksum word counted as
/// zero.
pub fn checksum(image: &[u8]) -> u32 {
    image
        .chunks_exact(4)
        .enumerate()
        .filter(|&(i, _)| i * 4 != CHECKSUM_AT)
        .fold(0u32, |sum, (_, w)| {
            sum.wrapping_add(u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        })
}

/// Whether `image` is intact: long enough, whole pages and matching its
/// stored checksum.
pub fn verify(image: &[u8]) -> bool {
    if image.len() < 0x100 || image.len() % 0x100 != 0 {
        return false;
    }
    checksum(image) == word(image, CHECKSUM_AT)
}

/// Write the checksum word of a freshly built image.
pub fn seal(image: &mut [u8]) {
    let sum = checksum(image);
    image[CHECKSUM_AT..CHECKSUM_AT + 4].copy_from_slice(&sum.to_be_bytes());
}
