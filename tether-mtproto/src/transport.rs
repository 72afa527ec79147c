//! Sans-IO MTProto transport framings.
//!
//! A [`Transport`] only turns payloads into wire bytes and back. Reading the
//! socket, buffering and obfuscation live with the caller, so one codec can
//! sit on top of any byte stream.
//!
//! | Framing          | Init bytes     | Packet layout                          |
//! |------------------|----------------|----------------------------------------|
//! | [`Abridged`]     | `ef`           | `len/4` as 1 or 4 bytes, payload       |
//! | [`Intermediate`] | `ee ee ee ee`  | `len:u32`, payload                     |
//! | [`Full`]         | none           | `len:u32 seq:u32 payload crc32:u32`    |

use std::fmt;

/// Framing errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Not enough bytes buffered yet; read more and try again.
    MissingBytes,
    /// The server sent a bare negative status code instead of a packet.
    /// `-404` means the auth key is unknown to the server.
    BadStatus(i32),
    /// The declared length is impossible.
    BadLen(i32),
    /// Full framing sequence number out of order.
    BadSeq { expected: i32, got: i32 },
    /// Full framing checksum mismatch.
    BadCrc { expected: u32, got: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBytes => write!(f, "incomplete packet"),
            Self::BadStatus(code) => write!(f, "transport status {code}"),
            Self::BadLen(len) => write!(f, "bad packet length {len}"),
            Self::BadSeq { expected, got } => {
                write!(f, "bad packet seq: expected {expected}, got {got}")
            }
            Self::BadCrc { expected, got } => {
                write!(f, "bad packet crc: expected {expected:#010x}, got {got:#010x}")
            }
        }
    }
}
impl std::error::Error for Error {}

/// Where a packet's payload sits in the input buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Unpacked {
    pub data_start: usize,
    pub data_end: usize,
    /// Offset of the next packet, i.e. bytes consumed.
    pub next_offset: usize,
}

/// A framing codec.
pub trait Transport: Send {
    /// Bytes sent once, right after connecting.
    fn init_bytes(&self) -> &'static [u8];

    /// Tag announcing this framing inside an Obfuscated2 header, if the
    /// framing can be obfuscated at all.
    fn obfuscated_tag(&self) -> Option<[u8; 4]>;

    /// Append the framed `payload` to `out`.
    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>);

    /// Locate the first complete packet in `input`.
    fn unpack(&mut self, input: &[u8]) -> Result<Unpacked, Error>;
}

fn read_i32(input: &[u8], at: usize) -> Result<i32, Error> {
    let bytes = input.get(at..at + 4).ok_or(Error::MissingBytes)?;
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    Ok(i32::from_le_bytes(word))
}

/// A 4-byte payload holding a negative number is a status, not a message.
fn check_status(payload: &[u8]) -> Result<(), Error> {
    if payload.len() == 4 {
        let code = read_i32(payload, 0)?;
        if code < 0 {
            return Err(Error::BadStatus(code));
        }
    }
    Ok(())
}

// ─── Abridged ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct Abridged;

impl Transport for Abridged {
    fn init_bytes(&self) -> &'static [u8] {
        &[0xef]
    }

    fn obfuscated_tag(&self) -> Option<[u8; 4]> {
        Some(tether_crypto::obfuscated::TAG_ABRIDGED)
    }

    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        debug_assert_eq!(payload.len() % 4, 0);
        let words = payload.len() / 4;
        if words < 0x7f {
            out.push(words as u8);
        } else {
            out.push(0x7f);
            out.extend_from_slice(&(words as u32).to_le_bytes()[..3]);
        }
        out.extend_from_slice(payload);
    }

    fn unpack(&mut self, input: &[u8]) -> Result<Unpacked, Error> {
        let first = *input.first().ok_or(Error::MissingBytes)?;
        let (header, words) = if first < 0x7f {
            (1, first as usize)
        } else {
            let b = input.get(1..4).ok_or(Error::MissingBytes)?;
            (4, usize::from(b[0]) | usize::from(b[1]) << 8 | usize::from(b[2]) << 16)
        };
        let end = header + words * 4;
        let payload = input.get(header..end).ok_or(Error::MissingBytes)?;
        check_status(payload)?;
        Ok(Unpacked { data_start: header, data_end: end, next_offset: end })
    }
}

// ─── Intermediate ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct Intermediate;

impl Transport for Intermediate {
    fn init_bytes(&self) -> &'static [u8] {
        &[0xee; 4]
    }

    fn obfuscated_tag(&self) -> Option<[u8; 4]> {
        Some(tether_crypto::obfuscated::TAG_INTERMEDIATE)
    }

    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }

    fn unpack(&mut self, input: &[u8]) -> Result<Unpacked, Error> {
        let len = read_i32(input, 0)?;
        let n = usize::try_from(len).map_err(|_| Error::BadLen(len))?;
        let payload = input.get(4..4 + n).ok_or(Error::MissingBytes)?;
        check_status(payload)?;
        Ok(Unpacked { data_start: 4, data_end: 4 + n, next_offset: 4 + n })
    }
}

// ─── Full ────────────────────────────────────────────────────────────────────

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xedb8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

static CRC32: [u32; 256] = crc32_table();

/// IEEE CRC-32, as used by the full framing.
pub fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(!0u32, |crc, &b| CRC32[((crc ^ u32::from(b)) & 0xff) as usize] ^ (crc >> 8))
}

/// Length, sequence number and checksum around every packet.
///
/// Each direction keeps its own counter, so a reader and a writer each need
/// their own instance.
#[derive(Clone, Debug, Default)]
pub struct Full {
    send_seq: i32,
    recv_seq: i32,
}

impl Full {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for Full {
    fn init_bytes(&self) -> &'static [u8] {
        &[]
    }

    fn obfuscated_tag(&self) -> Option<[u8; 4]> {
        None
    }

    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&((payload.len() + 12) as i32).to_le_bytes());
        out.extend_from_slice(&self.send_seq.to_le_bytes());
        out.extend_from_slice(payload);
        let crc = crc32(&out[start..]);
        out.extend_from_slice(&crc.to_le_bytes());
        self.send_seq += 1;
    }

    fn unpack(&mut self, input: &[u8]) -> Result<Unpacked, Error> {
        let len = read_i32(input, 0)?;
        if len < 0 {
            return Err(Error::BadStatus(len));
        }
        if len < 12 {
            return Err(Error::BadLen(len));
        }
        let total = len as usize;
        if input.len() < total {
            return Err(Error::MissingBytes);
        }
        let seq = read_i32(input, 4)?;
        if seq != self.recv_seq {
            return Err(Error::BadSeq { expected: self.recv_seq, got: seq });
        }
        let expected = read_i32(input, total - 4)? as u32;
        let got = crc32(&input[..total - 4]);
        if expected != got {
            return Err(Error::BadCrc { expected, got });
        }
        check_status(&input[8..total - 4])?;
        self.recv_seq += 1;
        Ok(Unpacked { data_start: 8, data_end: total - 4, next_offset: total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(codec: &mut dyn Transport, payload: &[u8]) {
        let mut wire = Vec::new();
        codec.pack(payload, &mut wire);
        let u = codec.unpack(&wire).unwrap();
        assert_eq!(&wire[u.data_start..u.data_end], payload);
        assert_eq!(u.next_offset, wire.len());
        assert_eq!(codec.unpack(&wire[..wire.len() - 1]), Err(Error::MissingBytes));
    }

    #[test]
    fn abridged_short_and_long_headers() {
        let mut wire = Vec::new();
        Abridged.pack(&[0u8; 8], &mut wire);
        assert_eq!(wire[0], 2);
        wire.clear();
        Abridged.pack(&vec![0u8; 0x7f * 4], &mut wire);
        assert_eq!(&wire[..4], &[0x7f, 0x7f, 0, 0]);
        round_trip(&mut Abridged, &vec![1u8; 1024]);
        round_trip(&mut Abridged, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn intermediate_round_trip() {
        round_trip(&mut Intermediate, &[9u8; 36]);
    }

    #[test]
    fn full_checks_sequence_and_crc() {
        let mut tx = Full::new();
        let mut rx = Full::new();
        let mut wire = Vec::new();
        tx.pack(&[1, 2, 3, 4], &mut wire);
        tx.pack(&[5, 6, 7, 8], &mut wire);

        let first = rx.unpack(&wire).unwrap();
        assert_eq!(&wire[first.data_start..first.data_end], &[1, 2, 3, 4]);
        let second = rx.unpack(&wire[first.next_offset..]).unwrap();
        assert_eq!(second.next_offset, 16);

        let mut fresh = Full::new();
        let mut corrupt = wire[..16].to_vec();
        corrupt[9] ^= 1;
        assert!(matches!(fresh.unpack(&corrupt), Err(Error::BadCrc { .. })));
        assert_eq!(
            fresh.unpack(&wire[16..]),
            Err(Error::BadSeq { expected: 0, got: 1 })
        );
    }

    #[test]
    fn negative_status_is_reported() {
        let mut wire = Vec::new();
        Abridged.pack(&(-404i32).to_le_bytes(), &mut wire);
        assert_eq!(Abridged.unpack(&wire), Err(Error::BadStatus(-404)));

        let mut wire = Vec::new();
        Intermediate.pack(&(-429i32).to_le_bytes(), &mut wire);
        assert_eq!(Intermediate.unpack(&wire), Err(Error::BadStatus(-429)));
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }
}
