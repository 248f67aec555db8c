//! SPIR-V word-stream decoding.
//!
//! A SPIR-V module is a sequence of little-endian 32-bit words: a five-word
//! header followed by instructions. Each instruction packs its word count in
//! the upper half of its first word and the opcode in the lower half.

use crate::{ReflectError, Result, SPIRV_MAGIC};

/// A single decoded instruction borrowing the module's word stream.
#[derive(Debug, Clone, Copy)]
pub struct Instruction<'a> {
    /// Opcode (lower 16 bits of the first word).
    pub opcode: u16,
    /// Operand words following the first word.
    pub operands: &'a [u32],
}

impl Instruction<'_> {
    /// Decode a literal string starting at the given operand index.
    ///
    /// SPIR-V strings are UTF-8 bytes packed little-endian into words and
    /// null-terminated. Returns the string and the number of words consumed.
    pub fn string_at(&self, index: usize) -> Result<(String, usize)> {
        let mut bytes = Vec::new();
        let mut consumed = 0;
        'words: for &word in self.operands.get(index..).unwrap_or(&[]) {
            consumed += 1;
            for shift in [0, 8, 16, 24] {
                let byte = ((word >> shift) & 0xff) as u8;
                if byte == 0 {
                    break 'words;
                }
                bytes.push(byte);
            }
        }
        if consumed == 0 {
            return Err(ReflectError::InvalidBinary(
                "literal string past end of instruction".to_string(),
            ));
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| ReflectError::InvalidBinary("literal string is not UTF-8".to_string()))?;
        Ok((text, consumed))
    }
}

/// Reader over a SPIR-V module's instruction stream.
pub struct ModuleReader<'a> {
    words: &'a [u32],
    /// Word index of the next instruction.
    position: usize,
}

impl<'a> ModuleReader<'a> {
    /// Create a reader from the module's words, validating the header.
    pub fn new(words: &'a [u32]) -> Result<Self> {
        if words.len() < 5 {
            return Err(ReflectError::InvalidBinary(
                "module shorter than the SPIR-V header".to_string(),
            ));
        }
        if words[0] != SPIRV_MAGIC {
            return Err(ReflectError::InvalidBinary(format!(
                "bad magic 0x{:08x}",
                words[0]
            )));
        }
        Ok(Self { words, position: 5 })
    }

    /// The id bound declared in the header.
    pub fn bound(&self) -> u32 {
        self.words[3]
    }
}

impl<'a> Iterator for ModuleReader<'a> {
    type Item = Result<Instruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.words.len() {
            return None;
        }
        let first = self.words[self.position];
        let word_count = (first >> 16) as usize;
        let opcode = (first & 0xffff) as u16;
        if word_count == 0 {
            return Some(Err(ReflectError::InvalidBinary(format!(
                "zero-length instruction at word {}",
                self.position
            ))));
        }
        let end = self.position + word_count;
        if end > self.words.len() {
            return Some(Err(ReflectError::Truncated(self.position)));
        }
        let operands = &self.words[self.position + 1..end];
        self.position = end;
        Some(Ok(Instruction { opcode, operands }))
    }
}

/// Reinterpret a byte blob as SPIR-V words.
///
/// The blob must be a whole number of little-endian words.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(ReflectError::InvalidBinary(format!(
            "byte length {} is not word-aligned",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u32> {
        vec![SPIRV_MAGIC, 0x0001_0000, 0, 100, 0]
    }

    #[test]
    fn rejects_bad_magic() {
        let mut words = header();
        words[0] = 0xdead_beef;
        assert!(matches!(
            ModuleReader::new(&words),
            Err(ReflectError::InvalidBinary(_))
        ));
    }

    #[test]
    fn rejects_short_module() {
        assert!(ModuleReader::new(&[SPIRV_MAGIC]).is_err());
    }

    #[test]
    fn iterates_instructions() {
        let mut words = header();
        // OpNop-ish: opcode 1, no operands
        words.push(1 << 16 | 1);
        // opcode 71 with two operands
        words.push(3 << 16 | 71);
        words.push(42);
        words.push(7);

        let reader = ModuleReader::new(&words).unwrap();
        let insts: Vec<_> = reader.map(Result::unwrap).collect();
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].opcode, 1);
        assert_eq!(insts[1].opcode, 71);
        assert_eq!(insts[1].operands, &[42, 7]);
    }

    #[test]
    fn truncated_instruction_errors() {
        let mut words = header();
        words.push(4 << 16 | 71);
        words.push(1);

        let mut reader = ModuleReader::new(&words).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(ReflectError::Truncated(_)))
        ));
    }

    #[test]
    fn decodes_literal_strings() {
        // "main" packed into words, null-terminated
        let operands = [
            u32::from_le_bytes(*b"main"),
            0,
            99, // trailing operand after the string
        ];
        let inst = Instruction {
            opcode: 15,
            operands: &operands,
        };
        let (text, consumed) = inst.string_at(0).unwrap();
        assert_eq!(text, "main");
        assert_eq!(consumed, 2);
        assert_eq!(inst.operands[consumed], 99);
    }

    #[test]
    fn words_from_bytes_requires_alignment() {
        assert!(words_from_bytes(&[1, 2, 3]).is_err());
        assert_eq!(words_from_bytes(&[3, 2, 0, 7]).unwrap(), vec![0x0700_0203]);
    }
}
