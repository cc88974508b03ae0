//! Fixed-layout record encoding
//!
//! Records are written field by field at explicit little-endian offsets into
//! a buffer of exactly `SIZE` bytes. Identifiers live in fixed-width,
//! NUL-padded buffers so encoding never allocates per field.

use crate::error::ProtocolError;
use std::fmt;

/// Fixed-width, NUL-padded UTF-8 identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize>([u8; N]);

impl<const N: usize> FixedStr<N> {
    pub const WIDTH: usize = N;

    pub const fn empty() -> Self {
        Self([0u8; N])
    }

    /// Pack `value`, failing if it does not fit or contains NUL
    pub fn new(value: &str) -> Result<Self, ProtocolError> {
        let bytes = value.as_bytes();
        if bytes.len() > N {
            return Err(ProtocolError::InvalidField {
                field: "fixed string",
                reason: format!("'{value}' is {} bytes, width is {N}", bytes.len()),
            });
        }
        if bytes.contains(&0) {
            return Err(ProtocolError::InvalidField {
                field: "fixed string",
                reason: "embedded NUL".to_string(),
            });
        }
        let mut buf = [0u8; N];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn from_raw(raw: [u8; N]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Bytes up to the first NUL
    pub fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        &self.0[..end]
    }

    pub fn as_str(&self) -> Result<&str, ProtocolError> {
        std::str::from_utf8(self.trimmed()).map_err(|e| ProtocolError::InvalidField {
            field: "fixed string",
            reason: e.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// Owned value, `None` when empty
    pub fn to_option(&self) -> Result<Option<String>, ProtocolError> {
        if self.is_empty() {
            Ok(None)
        } else {
            self.as_str().map(|s| Some(s.to_string()))
        }
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.trimmed()))
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.trimmed()))
    }
}

/// Forward-only cursor writing fields into a pre-sized record buffer
pub struct FieldWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.offset + bytes.len();
        self.buf[self.offset..end].copy_from_slice(bytes);
        self.offset = end;
    }

    pub fn put_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_str<const N: usize>(&mut self, v: &FixedStr<N>) {
        self.put(v.as_bytes());
    }

    pub fn skip(&mut self, n: usize) {
        self.buf[self.offset..self.offset + n].fill(0);
        self.offset += n;
    }
}

/// Forward-only cursor reading fields out of a record buffer
pub struct FieldReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let end = self.offset + N;
        let slice = self.buf.get(self.offset..end).ok_or(ProtocolError::Truncated {
            what: "record field",
            expected: end,
            actual: self.buf.len(),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.offset = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    pub fn i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub fn f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    pub fn fixed_str<const N: usize>(&mut self) -> Result<FixedStr<N>, ProtocolError> {
        Ok(FixedStr::from_raw(self.take()?))
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        let end = self.offset + n;
        if end > self.buf.len() {
            return Err(ProtocolError::Truncated {
                what: "record field",
                expected: end,
                actual: self.buf.len(),
            });
        }
        self.offset = end;
        Ok(())
    }
}

/// A record with a constant byte size and explicit field layout
pub trait FixedLayout: Sized {
    /// Encoded size in bytes
    const SIZE: usize;
    /// Record name used in error messages
    const NAME: &'static str;

    /// Write every field in layout order. The writer is exactly `SIZE` bytes.
    fn write_fields(&self, w: &mut FieldWriter<'_>);

    /// Read every field in layout order
    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError>;

    /// Encode into `buf`, which must be exactly `SIZE` bytes
    fn encode_into(&self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        if buf.len() != Self::SIZE {
            return Err(ProtocolError::Truncated {
                what: Self::NAME,
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        self.write_fields(&mut FieldWriter::new(buf));
        Ok(())
    }

    fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        self.write_fields(&mut FieldWriter::new(&mut buf));
        buf
    }

    /// Decode from a buffer of exactly `SIZE` bytes
    fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != Self::SIZE {
            return Err(ProtocolError::Truncated {
                what: Self::NAME,
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        Self::read_fields(&mut FieldReader::new(buf))
    }
}
