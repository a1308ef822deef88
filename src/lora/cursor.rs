//! # Hex Field Cursor
//!
//! Reads big-endian fields from a hex string left to right while keeping
//! track of the current offset, so every failure can name the field and the
//! position it was read from.

use super::protocol::{HEX_WIDTH_U16, HEX_WIDTH_U32, HEX_WIDTH_U64, HEX_WIDTH_U8};
use crate::error::DecodeError;

/// Cursor over a validated hex payload
///
/// Offsets are counted in hex characters, two per payload byte.
#[derive(Debug, Clone)]
pub struct HexCursor<'a> {
    hex: &'a str,
    offset: usize,
}

impl<'a> HexCursor<'a> {
    /// Create a cursor after checking that the payload is well-formed hex
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The payload has an odd number of characters
    /// - Any character is not a hex digit
    pub fn new(hex: &'a str) -> Result<Self, DecodeError> {
        if let Some(offset) = hex.bytes().position(|b| !b.is_ascii_hexdigit()) {
            return Err(DecodeError::InvalidHex {
                field: "payload",
                offset,
            });
        }

        if hex.len() % 2 != 0 {
            return Err(DecodeError::OddLength(hex.len()));
        }

        Ok(Self { hex, offset: 0 })
    }

    /// Current offset in hex characters
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Hex characters left to read
    pub fn remaining(&self) -> usize {
        self.hex.len() - self.offset
    }

    /// True once the whole payload has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        let (offset, digits) = self.take(field, HEX_WIDTH_U8)?;
        u8::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidHex { field, offset })
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let (offset, digits) = self.take(field, HEX_WIDTH_U16)?;
        u16::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidHex { field, offset })
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let (offset, digits) = self.take(field, HEX_WIDTH_U32)?;
        u32::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidHex { field, offset })
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        let (offset, digits) = self.take(field, HEX_WIDTH_U64)?;
        u64::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidHex { field, offset })
    }

    /// Read 32 bits and reinterpret them as an IEEE-754 single
    ///
    /// The integer bits become the float bits; no numeric conversion happens.
    pub fn read_f32(&mut self, field: &'static str) -> Result<f32, DecodeError> {
        self.read_u32(field).map(f32::from_bits)
    }

    /// Read a null-terminated ASCII string
    ///
    /// The cursor ends up just past the terminator.
    ///
    /// # Errors
    ///
    /// Returns error if no zero byte is found before the end of the payload,
    /// or if a byte before the terminator is not ASCII.
    pub fn read_cstring(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let start = self.offset;
        let mut text = String::new();
        let mut pos = start;

        while pos + HEX_WIDTH_U8 <= self.hex.len() {
            let byte = u8::from_str_radix(&self.hex[pos..pos + HEX_WIDTH_U8], 16)
                .map_err(|_| DecodeError::InvalidHex { field, offset: pos })?;

            if byte == 0 {
                self.offset = pos + HEX_WIDTH_U8;
                return Ok(text);
            }

            if !byte.is_ascii() {
                return Err(DecodeError::NonAsciiString {
                    field,
                    offset: pos,
                    byte,
                });
            }

            text.push(char::from(byte));
            pos += HEX_WIDTH_U8;
        }

        Err(DecodeError::MissingTerminator {
            field,
            offset: start,
        })
    }

    /// Consume `width` hex characters, returning their start offset
    fn take(&mut self, field: &'static str, width: usize) -> Result<(usize, &'a str), DecodeError> {
        let available = self.remaining();
        if available < width {
            return Err(DecodeError::FieldBounds {
                field,
                offset: self.offset,
                needed: width,
                available,
            });
        }

        let start = self.offset;
        self.offset += width;
        Ok((start, &self.hex[start..self.offset]))
    }
}
