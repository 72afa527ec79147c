//! [`Serializable`] and the primitive TL encodings.
//!
//! See [MTProto Binary Serialization].
//!
//! [MTProto Binary Serialization]: https://core.telegram.org/mtproto/serialize

use crate::{BOOL_FALSE_ID, BOOL_TRUE_ID, RawVec, VECTOR_ID};

/// Serialize `self` into TL binary format.
pub trait Serializable {
    /// Append the encoding of `self` to `buf`.
    fn serialize(&self, buf: &mut impl Extend<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize(&mut out);
        out
    }
}

macro_rules! little_endian {
    ($($ty:ty),* $(,)?) => {$(
        impl Serializable for $ty {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                buf.extend(self.to_le_bytes());
            }
        }
    )*};
}

little_endian!(i32, u32, i64);

impl Serializable for bool {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let id = if *self { BOOL_TRUE_ID } else { BOOL_FALSE_ID };
        id.serialize(buf);
    }
}

/// `int128` / `int256`: raw bytes, no length prefix.
impl<const N: usize> Serializable for [u8; N] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied());
    }
}

/// Bytes needed after a `bytes` field of `len` so the whole field,
/// header included, ends on a 4-byte boundary.
pub(crate) fn bytes_padding(len: usize) -> usize {
    let header = if len < 254 { 1 } else { 4 };
    (4 - (header + len) % 4) % 4
}

/// `bytes` / `string`: a 1-byte length up to 253, otherwise `0xfe` and a
/// 3-byte length; then the data, zero-padded to a multiple of four.
impl Serializable for [u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let len = self.len();
        if len < 254 {
            buf.extend([len as u8]);
        } else {
            let [a, b, c, _] = (len as u32).to_le_bytes();
            buf.extend([0xfe, a, b, c]);
        }
        buf.extend(self.iter().copied());
        buf.extend(std::iter::repeat_n(0, bytes_padding(len)));
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_slice().serialize(buf);
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf);
    }
}

fn serialize_items<T: Serializable>(items: &[T], buf: &mut impl Extend<u8>) {
    (items.len() as i32).serialize(buf);
    for item in items {
        item.serialize(buf);
    }
}

/// Boxed `Vector<T>`.
impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        VECTOR_ID.serialize(buf);
        serialize_items(self, buf);
    }
}

/// Bare `vector<T>`.
impl<T: Serializable> Serializable for RawVec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_items(&self.0, buf);
    }
}
