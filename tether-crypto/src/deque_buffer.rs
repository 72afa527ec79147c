//! Byte buffer with reserved headroom, so headers can be prepended after the
//! payload has been written.

use std::ops::{Index, IndexMut};
use std::slice::SliceIndex;

/// Growable byte buffer with cheap prepend.
///
/// Encryption writes the plaintext first and only then knows the
/// `key_id ‖ msg_key` prefix; framing adds its length header afterwards.
#[derive(Clone, Debug)]
pub struct DequeBuffer {
    buf: Vec<u8>,
    head: usize,
    default_head: usize,
}

impl DequeBuffer {
    /// Reserve `back` bytes of payload capacity and `front` bytes of headroom.
    pub fn with_capacity(back: usize, front: usize) -> Self {
        let mut buf = Vec::with_capacity(front + back);
        buf.resize(front, 0);
        Self { buf, head: front, default_head: front }
    }

    /// Empty the buffer, keeping its allocation and headroom.
    pub fn clear(&mut self) {
        self.buf.truncate(self.default_head);
        self.buf.fill(0);
        self.head = self.default_head;
    }

    /// Prepend `slice`, growing the headroom if it is too small.
    pub fn extend_front(&mut self, slice: &[u8]) {
        if let Some(head) = self.head.checked_sub(slice.len()) {
            self.head = head;
        } else {
            let shift = slice.len() - self.head;
            self.buf.extend(std::iter::repeat_n(0, shift));
            self.buf.rotate_right(shift);
            self.head = 0;
        }
        self.buf[self.head..self.head + slice.len()].copy_from_slice(slice);
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.buf.len()
    }

    /// Copy the contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_ref().to_vec()
    }
}

impl AsRef<[u8]> for DequeBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf[self.head..]
    }
}

impl AsMut<[u8]> for DequeBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.head..]
    }
}

impl<I: SliceIndex<[u8]>> Index<I> for DequeBuffer {
    type Output = I::Output;
    fn index(&self, i: I) -> &Self::Output {
        self.as_ref().index(i)
    }
}

impl<I: SliceIndex<[u8]>> IndexMut<I> for DequeBuffer {
    fn index_mut(&mut self, i: I) -> &mut Self::Output {
        self.as_mut().index_mut(i)
    }
}

impl Extend<u8> for DequeBuffer {
    fn extend<T: IntoIterator<Item = u8>>(&mut self, iter: T) {
        self.buf.extend(iter);
    }
}

impl<'a> Extend<&'a u8> for DequeBuffer {
    fn extend<T: IntoIterator<Item = &'a u8>>(&mut self, iter: T) {
        self.buf.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_within_headroom() {
        let mut buffer = DequeBuffer::with_capacity(4, 8);
        buffer.extend([3u8, 4]);
        buffer.extend_front(&[1, 2]);
        assert_eq!(buffer.as_ref(), &[1, 2, 3, 4]);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn prepend_beyond_headroom_grows() {
        let mut buffer = DequeBuffer::with_capacity(2, 1);
        buffer.extend([9u8]);
        buffer.extend_front(&[1, 2, 3]);
        assert_eq!(buffer.as_ref(), &[1, 2, 3, 9]);
    }

    #[test]
    fn clear_restores_headroom() {
        let mut buffer = DequeBuffer::with_capacity(4, 4);
        buffer.extend([1u8, 2]);
        buffer.extend_front(&[0; 4]);
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.extend_front(&[7; 4]);
        assert_eq!(buffer.as_ref(), &[7; 4]);
    }
}
