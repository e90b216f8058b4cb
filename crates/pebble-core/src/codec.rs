//! Canonical byte codec.
//!
//! Every object whose bytes feed a hash — transactions, block headers,
//! blocks — is encoded through this module so that serialization is
//! bit-exact across platforms:
//!
//! - integers are little-endian, fixed width;
//! - variable-length integers use the Bitcoin `VarInt` scheme
//!   (`< 0xFD` inline, then `0xFD`+u16, `0xFE`+u32, `0xFF`+u64);
//! - byte strings are a `VarInt` length followed by the raw bytes.
//!
//! Decoding is strict: truncated input fails with
//! [`CodecError::UnexpectedEof`], non-minimal varints fail with
//! [`CodecError::NonCanonicalVarInt`], and [`Decodable::from_bytes`]
//! rejects trailing bytes.

use crate::error::CodecError;

/// A type with a canonical byte encoding.
pub trait Encodable {
    /// Append the canonical encoding of `self` to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// The canonical encoding as a fresh byte vector.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Length of the canonical encoding in bytes.
    fn encoded_len(&self) -> usize {
        self.to_bytes().len()
    }
}

/// A type decodable from its canonical byte encoding.
pub trait Decodable: Sized {
    /// Decode one value from the reader, advancing its position.
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;

    /// Decode a value that must span the entire input.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let value = Self::decode(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

/// Cursor over an input buffer with bounds-checked reads.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over the full buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail with [`CodecError::TrailingBytes`] unless fully consumed.
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n - self.remaining(),
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read exactly `N` raw bytes.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        Ok(self.take(N)?.try_into().unwrap())
    }

    /// Read a Bitcoin-style variable-length integer, rejecting non-minimal
    /// encodings.
    pub fn read_varint(&mut self) -> Result<u64, CodecError> {
        let prefix = self.read_u8()?;
        match prefix {
            0xFD => {
                let v = self.read_u16()? as u64;
                if v < 0xFD {
                    return Err(CodecError::NonCanonicalVarInt);
                }
                Ok(v)
            }
            0xFE => {
                let v = self.read_u32()? as u64;
                if v <= u16::MAX as u64 {
                    return Err(CodecError::NonCanonicalVarInt);
                }
                Ok(v)
            }
            0xFF => {
                let v = self.read_u64()?;
                if v <= u32::MAX as u64 {
                    return Err(CodecError::NonCanonicalVarInt);
                }
                Ok(v)
            }
            v => Ok(v as u64),
        }
    }

    /// Read a length-prefixed byte string.
    ///
    /// The declared length is checked against the remaining input before any
    /// allocation, so a corrupt length cannot trigger a huge allocation.
    pub fn read_varbytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(CodecError::UnexpectedEof {
                needed: len as usize - self.remaining(),
                available: self.remaining(),
            });
        }
        Ok(self.take(len as usize)?.to_vec())
    }
}

/// Append a Bitcoin-style variable-length integer.
pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xFC => buf.push(value as u8),
        0xFD..=0xFFFF => {
            buf.push(0xFD);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            buf.push(0xFE);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xFF);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Append a length-prefixed byte string.
pub fn write_varbytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encoded size of a varint for the given value.
pub fn varint_len(value: u64) -> usize {
    match value {
        0..=0xFC => 1,
        0xFD..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}
