//! Two-pass text assembler for Glulx code, used to build test images.
//!
//! ```text
//! main:                      ; label
//!     .function local 4 2    ; C1 header with two 4-byte locals
//!     add #2 #3 l0           ; constant, constant, local at byte offset 0
//!     jlt l0 #10 main        ; a bare label in branch position is an offset
//!     copy mem:counter sp    ; absolute address, push to stack
//!     return #0
//! .ram
//! counter: .word 0
//! greeting: .string "hi"
//! ```
//!
//! Code and data before `.ram` go in ROM starting right after the header;
//! everything after it goes in RAM. Label operands always take four bytes so
//! the first pass can size every line without knowing label values.

use std::collections::HashMap;

use thiserror::Error;

use crate::opcodes::{Access, Opcode};
use crate::operand::Mode;

/// Address of the first byte after the image header.
pub const CODE_START: u32 = 0x24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("line {line}: unknown instruction `{token}`")]
    UnknownInstruction { line: usize, token: String },
    #[error("line {line}: `{instruction}` takes {expected} operands, found {found}")]
    OperandCount {
        line: usize,
        instruction: String,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid operand `{operand}`")]
    InvalidOperand { line: usize, operand: String },
    #[error("line {line}: invalid number `{operand}`")]
    InvalidNumber { line: usize, operand: String },
    #[error("label `{name}` is not defined")]
    LabelNotFound { name: String },
    #[error("line {line}: label `{name}` defined twice")]
    DuplicateLabel { line: usize, name: String },
    #[error("line {line}: bad directive `{directive}`")]
    BadDirective { line: usize, directive: String },
}

/// Assembled sections plus every label's absolute address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub ram_start: u32,
    pub labels: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Rom,
    Ram,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Number(u32),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Const(Value),
    Addr(Value),
    Ram(Value),
    Local(u32),
    Stack,
    Discard,
}

fn sized(n: u32, modes: [Mode; 3]) -> Mode {
    match n {
        0..=0xFF => modes[0],
        0x100..=0xFFFF => modes[1],
        _ => modes[2],
    }
}

impl Arg {
    fn mode(&self) -> Mode {
        match self {
            Arg::Const(Value::Number(0)) | Arg::Discard => Mode::Zero,
            Arg::Const(Value::Number(n)) => match *n as i32 {
                -0x80..=0x7F => Mode::Const1,
                -0x8000..=0x7FFF => Mode::Const2,
                _ => Mode::Const4,
            },
            Arg::Const(Value::Label(_)) => Mode::Const4,
            Arg::Addr(Value::Number(n)) => sized(*n, [Mode::Addr1, Mode::Addr2, Mode::Addr4]),
            Arg::Addr(Value::Label(_)) => Mode::Addr4,
            Arg::Ram(Value::Number(n)) => sized(*n, [Mode::Ram1, Mode::Ram2, Mode::Ram4]),
            Arg::Ram(Value::Label(_)) => Mode::Ram4,
            Arg::Local(n) => sized(*n, [Mode::Local1, Mode::Local2, Mode::Local4]),
            Arg::Stack => Mode::Stack,
        }
    }
}

#[derive(Debug)]
enum ItemKind {
    Bytes(Vec<u8>),
    Words(Vec<Value>),
    Instruction { opcode: Opcode, args: Vec<Arg> },
}

impl ItemKind {
    fn len(&self) -> u32 {
        match self {
            ItemKind::Bytes(bytes) => bytes.len() as u32,
            ItemKind::Words(words) => 4 * words.len() as u32,
            ItemKind::Instruction { opcode, args } => {
                opcode.encoded_len()
                    + (args.len() as u32).div_ceil(2)
                    + args.iter().map(|a| a.mode().data_len()).sum::<u32>()
            }
        }
    }
}

struct Item {
    kind: ItemKind,
    section: Section,
    offset: u32,
}

/// Assemble `source` into ROM and RAM sections.
pub fn assemble(source: &str) -> Result<Assembly, AsmError> {
    let mut local_labels: Vec<(String, Section, u32)> = Vec::new();
    let mut items = Vec::new();
    let mut section = Section::Rom;
    let mut offsets = [0u32; 2];

    for (line_idx, raw) in source.lines().enumerate() {
        let line = line_idx + 1;
        let mut text = strip_comment(raw).trim();

        while let Some((first, rest)) = split_label(text) {
            if !is_identifier(first) {
                return Err(AsmError::InvalidOperand {
                    line,
                    operand: first.to_string(),
                });
            }
            if local_labels.iter().any(|(name, _, _)| name == first) {
                return Err(AsmError::DuplicateLabel {
                    line,
                    name: first.to_string(),
                });
            }
            local_labels.push((first.to_string(), section, offsets[section as usize]));
            text = rest;
        }
        if text.is_empty() {
            continue;
        }

        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };

        let kind = if let Some(directive) = head.strip_prefix('.') {
            if directive == "ram" {
                if !rest.is_empty() {
                    return Err(AsmError::BadDirective {
                        line,
                        directive: text.to_string(),
                    });
                }
                section = Section::Ram;
                continue;
            }
            parse_directive(directive, rest, line)?
        } else {
            parse_instruction(head, rest, line)?
        };

        let offset = offsets[section as usize];
        offsets[section as usize] = offset.wrapping_add(kind.len());
        items.push(Item {
            kind,
            section,
            offset,
        });
    }

    let rom_len = offsets[Section::Rom as usize];
    let ram_start = align_page((CODE_START + rom_len).max(0x100));
    let base = |section: Section| match section {
        Section::Rom => CODE_START,
        Section::Ram => ram_start,
    };
    let labels: HashMap<String, u32> = local_labels
        .into_iter()
        .map(|(name, section, offset)| (name, base(section) + offset))
        .collect();

    let mut rom = Vec::with_capacity(rom_len as usize);
    let mut ram = Vec::with_capacity(offsets[Section::Ram as usize] as usize);
    for item in &items {
        let address = base(item.section) + item.offset;
        let out = match item.section {
            Section::Rom => &mut rom,
            Section::Ram => &mut ram,
        };
        emit(&item.kind, address, ram_start, &labels, out)?;
    }

    Ok(Assembly {
        rom,
        ram,
        ram_start,
        labels,
    })
}

/// Round up to the next 256-byte boundary.
pub fn align_page(value: u32) -> u32 {
    (value + 0xFF) & !0xFF
}

fn emit(
    kind: &ItemKind,
    address: u32,
    ram_start: u32,
    labels: &HashMap<String, u32>,
    out: &mut Vec<u8>,
) -> Result<(), AsmError> {
    match kind {
        ItemKind::Bytes(bytes) => out.extend_from_slice(bytes),
        ItemKind::Words(words) => {
            for word in words {
                out.extend_from_slice(&resolve(word, labels)?.to_be_bytes());
            }
        }
        ItemKind::Instruction { opcode, args } => {
            let next_pc = address + kind.len();
            let number = opcode.number();
            match opcode.encoded_len() {
                1 => out.push(number as u8),
                2 => out.extend_from_slice(&(0x8000 | number as u16).to_be_bytes()),
                _ => out.extend_from_slice(&(0xC000_0000 | number).to_be_bytes()),
            }
            for pair in args.chunks(2) {
                let low = pair[0].mode().nibble();
                let high = pair.get(1).map_or(0, |a| a.mode().nibble());
                out.push(low | (high << 4));
            }
            let branch = opcode.branch_operand();
            for (ix, arg) in args.iter().enumerate() {
                let value = match arg {
                    Arg::Const(Value::Label(name)) if branch == Some(ix) => {
                        let target = resolve(&Value::Label(name.clone()), labels)?;
                        target.wrapping_sub(next_pc).wrapping_add(2)
                    }
                    Arg::Const(v) | Arg::Addr(v) => resolve(v, labels)?,
                    Arg::Ram(v @ Value::Number(_)) => resolve(v, labels)?,
                    Arg::Ram(v) => resolve(v, labels)?.wrapping_sub(ram_start),
                    Arg::Local(n) => *n,
                    Arg::Stack | Arg::Discard => 0,
                };
                match arg.mode().data_len() {
                    0 => {}
                    1 => out.push(value as u8),
                    2 => out.extend_from_slice(&(value as u16).to_be_bytes()),
                    _ => out.extend_from_slice(&value.to_be_bytes()),
                }
            }
        }
    }
    Ok(())
}

fn resolve(value: &Value, labels: &HashMap<String, u32>) -> Result<u32, AsmError> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Label(name) => labels
            .get(name)
            .copied()
            .ok_or_else(|| AsmError::LabelNotFound { name: name.clone() }),
    }
}

fn parse_instruction(head: &str, rest: &str, line: usize) -> Result<ItemKind, AsmError> {
    let opcode =
        Opcode::from_mnemonic(&head.to_ascii_lowercase()).ok_or_else(|| {
            AsmError::UnknownInstruction {
                line,
                token: head.to_string(),
            }
        })?;
    let tokens: Vec<&str> = rest
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();
    let shape = opcode.shape();
    if tokens.len() != shape.len() {
        return Err(AsmError::OperandCount {
            line,
            instruction: opcode.mnemonic().to_string(),
            expected: shape.len(),
            found: tokens.len(),
        });
    }
    let args = tokens
        .iter()
        .zip(shape.access)
        .map(|(token, access)| {
            let arg = parse_arg(token, line)?;
            let writable = !matches!(arg, Arg::Const(ref v) if *v != Value::Number(0));
            if *access == Access::Store && !writable {
                return Err(AsmError::InvalidOperand {
                    line,
                    operand: token.to_string(),
                });
            }
            Ok(arg)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ItemKind::Instruction { opcode, args })
}

fn parse_value(token: &str, line: usize) -> Result<Value, AsmError> {
    if let Some(n) = parse_number(token) {
        return Ok(Value::Number(n));
    }
    if is_identifier(token) {
        return Ok(Value::Label(token.to_string()));
    }
    Err(AsmError::InvalidNumber {
        line,
        operand: token.to_string(),
    })
}

fn parse_arg(token: &str, line: usize) -> Result<Arg, AsmError> {
    Ok(match token {
        "sp" => Arg::Stack,
        "_" => Arg::Discard,
        _ => {
            if let Some(value) = token.strip_prefix('#') {
                Arg::Const(parse_value(value, line)?)
            } else if let Some(value) = token.strip_prefix("mem:") {
                Arg::Addr(parse_value(value, line)?)
            } else if let Some(value) = token.strip_prefix("ram:") {
                Arg::Ram(parse_value(value, line)?)
            } else if let Some(n) = token.strip_prefix('l').and_then(parse_number) {
                Arg::Local(n)
            } else {
                Arg::Const(parse_value(token, line)?)
            }
        }
    })
}

fn parse_directive(directive: &str, rest: &str, line: usize) -> Result<ItemKind, AsmError> {
    let bad = || AsmError::BadDirective {
        line,
        directive: format!(".{} {}", directive, rest).trim().to_string(),
    };
    let numbers = |text: &str| -> Result<Vec<u32>, AsmError> {
        text.split_whitespace()
            .map(|t| {
                parse_number(t).ok_or_else(|| AsmError::InvalidNumber {
                    line,
                    operand: t.to_string(),
                })
            })
            .collect()
    };

    Ok(match directive {
        "function" => {
            let (kind, pairs) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let tag = match kind {
                "stack" => 0xC0,
                "local" => 0xC1,
                _ => return Err(bad()),
            };
            let pairs = numbers(pairs)?;
            if pairs.len() % 2 != 0 || pairs.chunks(2).any(|p| !matches!(p[0], 1 | 2 | 4) || p[1] > 0xFF) {
                return Err(bad());
            }
            let mut bytes = vec![tag];
            bytes.extend(pairs.iter().map(|&n| n as u8));
            bytes.extend_from_slice(&[0, 0]);
            ItemKind::Bytes(bytes)
        }
        "byte" => ItemKind::Bytes(numbers(rest)?.into_iter().map(|n| n as u8).collect()),
        "word" => ItemKind::Words(
            rest.split_whitespace()
                .map(|t| parse_value(t, line))
                .collect::<Result<_, _>>()?,
        ),
        "space" => match numbers(rest)?.as_slice() {
            [n] => ItemKind::Bytes(vec![0; *n as usize]),
            _ => return Err(bad()),
        },
        "string" => {
            let text = parse_string_literal(rest).ok_or_else(bad)?;
            let mut bytes = vec![0xE0];
            for ch in text.chars() {
                let code = ch as u32;
                if code > 0xFF {
                    return Err(AsmError::InvalidOperand {
                        line,
                        operand: ch.to_string(),
                    });
                }
                bytes.push(code as u8);
            }
            bytes.push(0);
            ItemKind::Bytes(bytes)
        }
        "unistring" => {
            let text = parse_string_literal(rest).ok_or_else(bad)?;
            let mut bytes = vec![0xE2, 0, 0, 0];
            for ch in text.chars().map(u32::from).chain([0]) {
                bytes.extend_from_slice(&ch.to_be_bytes());
            }
            ItemKind::Bytes(bytes)
        }
        _ => return Err(bad()),
    })
}

/// Parse decimal, `0x`/`$` hex, optionally negative.
fn parse_number(token: &str) -> Option<u32> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix('$')) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        if !digits.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        digits.parse::<i64>().ok()?
    };
    let value = if negative { -magnitude } else { magnitude };
    if !(-0x8000_0000..=0xFFFF_FFFF).contains(&value) {
        return None;
    }
    Some(value as u32)
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// `label: rest` at the start of a line.
fn split_label(text: &str) -> Option<(&str, &str)> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_suffix(':')?;
    if name.contains(':') || name.is_empty() {
        return None;
    }
    Some((name, text[first.len()..].trim()))
}

fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(text: &str) -> Option<String> {
    let inner = text.trim().strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            't' => '\t',
            '0' => '\0',
            other => other,
        });
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn assembles_function_and_operands() {
        let source = r#"
main:
    .function local 4 1
    add #2 #-1 l0
    return l0
"#;
        let asm = assemble(source).expect("assemble");
        assert_eq!(asm.labels["main"], CODE_START);
        assert_eq!(asm.ram_start, 0x100);
        assert_eq!(
            asm.rom,
            vec![
                0xC1, 4, 1, 0, 0, // header
                0x10, 0x11, 0x09, 2, 0xFF, 0, // add #2 #-1 l0
                0x31, 0x09, 0, // return l0
            ]
        );
    }

    #[test]
    fn branch_labels_become_offsets() {
        let source = r#"
top:
    jump top
"#;
        let asm = assemble(source).unwrap();
        // jump: opcode, mode byte, four offset bytes; target = next + off - 2
        let off = u32::from_be_bytes([asm.rom[2], asm.rom[3], asm.rom[4], asm.rom[5]]);
        let next = CODE_START + 6;
        assert_eq!(next.wrapping_add(off).wrapping_sub(2), CODE_START);
        assert_eq!(asm.rom[1], 0x03);
    }

    #[test]
    fn wide_opcodes_and_ram_section() {
        let source = r#"
    gestalt #0 #0 mem:slot
    .ram
slot: .word 0 slot
text: .string "a;b"
"#;
        let asm = assemble(source).unwrap();
        assert_eq!(&asm.rom[..2], &[0x81, 0x00]);
        assert_eq!(asm.rom[2], 0x00);
        assert_eq!(asm.rom[3], 0x07);
        assert_eq!(asm.labels["slot"], 0x100);
        assert_eq!(&asm.ram[4..8], &[0, 0, 1, 0]);
        assert_eq!(&asm.ram[8..], &[0xE0, b'a', b';', b'b', 0]);
    }

    #[test]
    fn unistring_layout() {
        let asm = assemble(".unistring \"\u{263a}\"").unwrap();
        assert_eq!(asm.rom, vec![0xE2, 0, 0, 0, 0, 0, 0x26, 0x3A, 0, 0, 0, 0]);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            assemble("frob #1"),
            Err(AsmError::UnknownInstruction { line: 1, .. })
        ));
        assert!(matches!(
            assemble("add #1 #2"),
            Err(AsmError::OperandCount { expected: 3, found: 2, .. })
        ));
        assert!(matches!(
            assemble("copy #1 #2"),
            Err(AsmError::InvalidOperand { .. })
        ));
        assert!(matches!(
            assemble("jump nowhere"),
            Err(AsmError::LabelNotFound { .. })
        ));
        assert!(matches!(
            assemble("a:\na:"),
            Err(AsmError::DuplicateLabel { line: 2, .. })
        ));
        assert!(matches!(
            assemble(".function both"),
            Err(AsmError::BadDirective { .. })
        ));
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("-1"), Some(u32::MAX));
        assert_eq!(parse_number("0x10"), Some(16));
        assert_eq!(parse_number("$ff"), Some(255));
        assert_eq!(parse_number("4294967296"), None);
        assert_eq!(parse_number("main"), None);
    }
}
