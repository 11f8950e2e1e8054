//! PM4 type-3 register-write packets.
//!
//! [`CmdSpace`] appends packets into caller-reserved command memory; [`Pm4Packets`] walks
//! emitted dwords back into packets for tests and tooling.

use core::fmt;

pub const SH_REG_BASE: u32 = 0x2c00;
pub const CONTEXT_REG_BASE: u32 = 0xa000;

pub const IT_SET_CONTEXT_REG: u8 = 0x69;
pub const IT_SET_SH_REG: u8 = 0x76;
pub const IT_SET_SH_REG_INDEX: u8 = 0x9b;

/// `SET_SH_REG_INDEX` index: let the kernel driver AND the value with its own CU mask.
pub const SH_REG_INDEX_APPLY_KMD_CU_AND_MASK: u8 = 3;

const PM4_TYPE_3: u32 = 3;
const REG_OFFSET_MASK: u32 = 0xffff;
const INDEX_SHIFT: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderType {
    Graphics,
    Compute,
}

impl ShaderType {
    fn bit(self) -> u32 {
        match self {
            ShaderType::Graphics => 0,
            ShaderType::Compute => 1,
        }
    }
}

/// Type-3 header for a packet whose body (everything after the header) is `body_dwords` long.
pub fn type3_header(opcode: u8, body_dwords: usize, shader_type: ShaderType) -> u32 {
    debug_assert!(body_dwords >= 1 && body_dwords <= 0x4000);
    (PM4_TYPE_3 << 30)
        | (((body_dwords as u32) - 1) << 16)
        | (u32::from(opcode) << 8)
        | (shader_type.bit() << 1)
}

/// Dwords taken by a register-set packet writing `num_regs` consecutive registers.
pub const fn set_regs_size(num_regs: usize) -> usize {
    2 + num_regs
}

/// Cursor over a caller-owned slice of command memory.
///
/// Running out of space is a caller bug (space is reserved up front from the writer's
/// documented maximum) and panics.
#[derive(Debug)]
pub struct CmdSpace<'a> {
    buf: &'a mut [u32],
    pos: usize,
}

impl<'a> CmdSpace<'a> {
    pub fn new(buf: &'a mut [u32]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Next unused dword.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn written(&self) -> &[u32] {
        &self.buf[..self.pos]
    }

    fn append(&mut self, len: usize) -> &mut [u32] {
        assert!(
            len <= self.remaining(),
            "command space exhausted: need {len} dwords, {} remaining",
            self.remaining()
        );
        let start = self.pos;
        self.pos += len;
        &mut self.buf[start..start + len]
    }

    fn write_set_regs(
        &mut self,
        opcode: u8,
        reg_dword: u32,
        shader_type: ShaderType,
        values: &[u32],
    ) {
        let packet = self.append(set_regs_size(values.len()));
        packet[0] = type3_header(opcode, 1 + values.len(), shader_type);
        packet[1] = reg_dword;
        packet[2..].copy_from_slice(values);
    }

    pub fn write_set_one_sh_reg(&mut self, reg: u32, value: u32, shader_type: ShaderType) {
        self.write_set_seq_sh_regs(reg, reg, shader_type, &[value]);
    }

    /// Writes the registers `start..=end` from `values`.
    pub fn write_set_seq_sh_regs(
        &mut self,
        start: u32,
        end: u32,
        shader_type: ShaderType,
        values: &[u32],
    ) {
        assert_eq!(values.len(), (end - start + 1) as usize);
        debug_assert!(start >= SH_REG_BASE);
        self.write_set_regs(IT_SET_SH_REG, start - SH_REG_BASE, shader_type, values);
    }

    pub fn write_set_one_sh_reg_index(
        &mut self,
        reg: u32,
        value: u32,
        shader_type: ShaderType,
        index: u8,
    ) {
        debug_assert!(reg >= SH_REG_BASE);
        let reg_dword = (reg - SH_REG_BASE) | (u32::from(index) << INDEX_SHIFT);
        self.write_set_regs(IT_SET_SH_REG_INDEX, reg_dword, shader_type, &[value]);
    }

    /// Writes the context registers `start..=end` from `values`.
    pub fn write_set_seq_context_regs(&mut self, start: u32, end: u32, values: &[u32]) {
        assert_eq!(values.len(), (end - start + 1) as usize);
        debug_assert!(start >= CONTEXT_REG_BASE);
        self.write_set_regs(
            IT_SET_CONTEXT_REG,
            start - CONTEXT_REG_BASE,
            ShaderType::Graphics,
            values,
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pm4DecodeError {
    NotType3 { header: u32, at_word: usize },
    UnknownOpcode { opcode: u8, at_word: usize },
    Truncated {
        expected_words: usize,
        remaining_words: usize,
        at_word: usize,
    },
}

impl fmt::Display for Pm4DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pm4DecodeError::NotType3 { header, at_word } => {
                write!(f, "packet header {header:#010x} at word {at_word} is not type 3")
            }
            Pm4DecodeError::UnknownOpcode { opcode, at_word } => {
                write!(f, "unsupported opcode {opcode:#04x} at word {at_word}")
            }
            Pm4DecodeError::Truncated {
                expected_words,
                remaining_words,
                at_word,
            } => write!(
                f,
                "truncated packet at word {at_word}: expected {expected_words} words, only {remaining_words} remaining"
            ),
        }
    }
}

impl std::error::Error for Pm4DecodeError {}

/// One decoded register-set packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pm4Packet<'a> {
    pub opcode: u8,
    pub shader_type: ShaderType,
    /// `SET_SH_REG_INDEX` index field; 0 for the other opcodes.
    pub index: u8,
    /// Absolute offset of the first register written.
    pub reg: u32,
    pub values: &'a [u32],
}

impl Pm4Packet<'_> {
    /// `(register, value)` pairs written by this packet.
    pub fn writes(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, &v)| (self.reg + i as u32, v))
    }
}

pub struct Pm4Packets<'a> {
    words: &'a [u32],
    cursor: usize,
}

impl<'a> Pm4Packets<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self { words, cursor: 0 }
    }
}

impl<'a> Iterator for Pm4Packets<'a> {
    type Item = Result<Pm4Packet<'a>, Pm4DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let at_word = self.cursor;
        let header = *self.words.get(at_word)?;
        // Stop after the first error.
        self.cursor = self.words.len();

        if header >> 30 != PM4_TYPE_3 {
            return Some(Err(Pm4DecodeError::NotType3 { header, at_word }));
        }
        let body_words = (((header >> 16) & 0x3fff) + 1) as usize;
        let opcode = ((header >> 8) & 0xff) as u8;
        let shader_type = if header & 0x2 != 0 {
            ShaderType::Compute
        } else {
            ShaderType::Graphics
        };

        let body_start = at_word + 1;
        let remaining_words = self.words.len() - body_start;
        if body_words > remaining_words {
            return Some(Err(Pm4DecodeError::Truncated {
                expected_words: body_words,
                remaining_words,
                at_word,
            }));
        }
        let body = &self.words[body_start..body_start + body_words];

        let (base, index) = match opcode {
            IT_SET_SH_REG => (SH_REG_BASE, 0),
            IT_SET_SH_REG_INDEX => (SH_REG_BASE, (body[0] >> INDEX_SHIFT) as u8),
            IT_SET_CONTEXT_REG => (CONTEXT_REG_BASE, 0),
            _ => return Some(Err(Pm4DecodeError::UnknownOpcode { opcode, at_word })),
        };

        self.cursor = body_start + body_words;
        Some(Ok(Pm4Packet {
            opcode,
            shader_type,
            index,
            reg: base + (body[0] & REG_OFFSET_MASK),
            values: &body[1..],
        }))
    }
}
