//! [`Deserializable`], the [`Cursor`] it reads from, and primitive decodings.

use std::fmt;

use crate::serialize::bytes_padding;
use crate::{BOOL_FALSE_ID, BOOL_TRUE_ID, RawVec, VECTOR_ID};

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The buffer ended mid-value.
    UnexpectedEof,
    /// A constructor ID that is not valid at this position.
    UnexpectedConstructor { id: u32 },
    /// A `string` that is not UTF-8.
    InvalidUtf8,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of buffer"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor id: {id:#010x}"),
            Self::InvalidUtf8 => write!(f, "string is not valid utf-8"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Read position over a borrowed byte slice.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Borrow the next `len` bytes and move past them.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(Error::UnexpectedEof)?;
        let slice = self.buf.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Everything that is left.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// The cursor argument of [`Deserializable::deserialize`].
pub type Buffer<'a, 'b> = &'a mut Cursor<'b>;

/// Deserialize a value from TL binary format.
pub trait Deserializable: Sized {
    fn deserialize(buf: Buffer) -> Result<Self>;

    /// Decode from the start of `bytes`. Trailing bytes are ignored.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::deserialize(&mut Cursor::from_slice(bytes))
    }
}

macro_rules! little_endian {
    ($($ty:ty),* $(,)?) => {$(
        impl Deserializable for $ty {
            fn deserialize(buf: Buffer) -> Result<Self> {
                Ok(<$ty>::from_le_bytes(buf.take_array()?))
            }
        }
    )*};
}

little_endian!(i32, u32, i64);

impl Deserializable for bool {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            BOOL_TRUE_ID => Ok(true),
            BOOL_FALSE_ID => Ok(false),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

impl<const N: usize> Deserializable for [u8; N] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        buf.take_array()
    }
}

impl Deserializable for Vec<u8> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let len = match buf.take_array::<1>()? {
            [0xfe] => {
                let [a, b, c] = buf.take_array()?;
                u32::from_le_bytes([a, b, c, 0]) as usize
            }
            [short] => short as usize,
        };
        let data = buf.take(len)?.to_vec();
        buf.take(bytes_padding(len))?;
        Ok(data)
    }
}

impl Deserializable for String {
    fn deserialize(buf: Buffer) -> Result<Self> {
        String::from_utf8(Vec::<u8>::deserialize(buf)?).map_err(|_| Error::InvalidUtf8)
    }
}

/// Element count of a vector. A count beyond the bytes left (each element
/// takes at least one) means the buffer is corrupt.
fn item_count(buf: Buffer) -> Result<usize> {
    match usize::try_from(i32::deserialize(buf)?) {
        Ok(n) if n <= buf.remaining() => Ok(n),
        _ => Err(Error::UnexpectedEof),
    }
}

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            VECTOR_ID => {}
            id => return Err(Error::UnexpectedConstructor { id }),
        }
        (0..item_count(buf)?).map(|_| T::deserialize(buf)).collect()
    }
}

impl<T: Deserializable> Deserializable for RawVec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        (0..item_count(buf)?).map(|_| T::deserialize(buf)).collect::<Result<_>>().map(RawVec)
    }
}
