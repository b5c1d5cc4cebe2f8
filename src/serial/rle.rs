//! Memory chunk encoding.
//!
//! RAM is XORed against the original image (bytes past the image compare
//! against zero) and the result run-length encoded: a nonzero byte stands
//! for itself, `0x00 n` stands for `n + 1` zero bytes. A trailing zero run
//! is not written at all.

use crate::core::Memory;
use crate::error::SnapshotError;

/// Longest zero run one `0x00 n` pair can carry.
pub const MAX_RUN: usize = 0x100;

pub fn compress(diff: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(diff.len() / 8);
    let mut run = 0usize;
    for &byte in diff {
        if byte == 0 {
            run += 1;
            continue;
        }
        while run > 0 {
            let unit = run.min(MAX_RUN);
            out.push(0);
            out.push((unit - 1) as u8);
            run -= unit;
        }
        out.push(byte);
    }
    out
}

/// Expand `data` into exactly `len` bytes, zero-filling whatever the
/// encoding left unwritten.
pub fn decompress(data: &[u8], len: usize) -> Result<Vec<u8>, SnapshotError> {
    let mut out = Vec::with_capacity(len);
    let mut bytes = data.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte == 0 {
            let run = bytes.next().ok_or(SnapshotError::Truncated)? as usize + 1;
            if out.len() + run > len {
                return Err(SnapshotError::MemoryOverrun);
            }
            out.resize(out.len() + run, 0);
        } else {
            if out.len() >= len {
                return Err(SnapshotError::MemoryOverrun);
            }
            out.push(byte);
        }
    }
    out.resize(len, 0);
    Ok(out)
}

fn original_byte(original: &[u8], addr: usize) -> u8 {
    original.get(addr).copied().unwrap_or(0)
}

/// Memory chunk body: ENDMEM (big-endian) then the compressed RAM diff.
pub fn encode_memory(memory: &Memory) -> Vec<u8> {
    let ram_start = memory.ram_start() as usize;
    let original = memory.original();
    let diff: Vec<u8> = memory.bytes()[ram_start..]
        .iter()
        .enumerate()
        .map(|(i, &b)| b ^ original_byte(original, ram_start + i))
        .collect();
    let mut out = memory.end_mem().to_be_bytes().to_vec();
    out.extend_from_slice(&compress(&diff));
    out
}

/// Decode a memory chunk into the RAM contents `[ram_start, end_mem)` it
/// describes. Memory itself is not touched.
pub fn decode_memory(data: &[u8], memory: &Memory) -> Result<Vec<u8>, SnapshotError> {
    let Some((head, body)) = data.split_first_chunk::<4>() else {
        return Err(SnapshotError::Truncated);
    };
    let end_mem = u32::from_be_bytes(*head);
    if !memory.can_resize(end_mem) {
        return Err(SnapshotError::BadMemorySize(end_mem));
    }
    let ram_start = memory.ram_start() as usize;
    let mut ram = decompress(body, end_mem as usize - ram_start)?;
    let original = memory.original();
    for (i, byte) in ram.iter_mut().enumerate() {
        *byte ^= original_byte(original, ram_start + i);
    }
    Ok(ram)
}
