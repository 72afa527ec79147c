use std::time::{SystemTime, UNIX_EPOCH};

use tether_crypto::{AuthKey, DequeBuffer, Side, encrypt_data_v2_as};
use tether_mtproto::message::{PlainError, pack_plain, unpack_plain};
use tether_mtproto::session::DecryptError;
use tether_mtproto::transport::{Abridged, Intermediate, Transport};
use tether_mtproto::{Incoming, Session};
use tether_tl_types::{Serializable, enums, types};

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

fn keyed_session(fill: u8) -> Session {
    let mut s = Session::new(Some(AuthKey::from_bytes([fill; 256])));
    s.set_salt(0x0102_0304);
    s
}

fn server_frame(key: &AuthKey, s: &Session, msg_id: i64, seq_no: i32, body: &[u8]) -> Vec<u8> {
    let mut buffer = DequeBuffer::with_capacity(64 + body.len(), 24);
    buffer.extend(s.salt().to_le_bytes());
    buffer.extend(s.session_id().to_le_bytes());
    buffer.extend(msg_id.to_le_bytes());
    buffer.extend(seq_no.to_le_bytes());
    buffer.extend((body.len() as i32).to_le_bytes());
    buffer.extend(body.iter().copied());
    encrypt_data_v2_as(&mut buffer, key, Side::Server);
    buffer.to_vec()
}

#[test]
fn msg_ids_strictly_increase() {
    let mut s = Session::new(None);
    let mut last = 0;
    for _ in 0..1000 {
        let id = s.new_msg_id();
        assert!(id > last);
        assert_eq!(id % 4, 0);
        last = id;
    }
}

#[test]
fn foreign_key_frame_leaves_session_untouched() {
    let mut s = keyed_session(0x11);
    let other = AuthKey::from_bytes([0x22; 256]);
    let id = (now_secs() << 32) | 1;
    let mut frame = server_frame(&other, &s, id, 1, &[0; 4]);

    let err = s.decrypt_message_data(&mut frame).unwrap_err();
    assert_eq!(err, DecryptError::Crypto(tether_crypto::DecryptError::AuthKeyMismatch));
    assert!(err.is_broken_key());

    // The same id is still accepted under the right key.
    let key = AuthKey::from_bytes([0x11; 256]);
    let mut frame = server_frame(&key, &s, id, 1, &[0; 4]);
    assert!(s.decrypt_message_data(&mut frame).unwrap().is_some());
}

#[test]
fn pong_arrives_classified() {
    let mut s = keyed_session(0x33);
    let key = AuthKey::from_bytes([0x33; 256]);
    let body = enums::Pong::from(types::Pong { msg_id: 8, ping_id: 99 }).to_bytes();
    let mut frame = server_frame(&key, &s, (now_secs() << 32) | 5, 2, &body);

    let msg = s.decrypt_message_data(&mut frame).unwrap().unwrap();
    assert!(!msg.requires_ack());
    assert_eq!(
        Incoming::classify(&msg.body).unwrap(),
        Incoming::Pong(types::Pong { msg_id: 8, ping_id: 99 })
    );
}

#[test]
fn plain_frame_layout() {
    let wire = pack_plain(0x1234, &[0xaa, 0xbb, 0xcc, 0xdd]);
    assert_eq!(wire.len(), 24);
    assert_eq!(&wire[..8], &[0u8; 8]);
    assert_eq!(&wire[16..20], &4i32.to_le_bytes());
    assert_eq!(unpack_plain(&wire), Ok((0x1234, &[0xaa, 0xbb, 0xcc, 0xdd][..])));

    let mut keyed = wire.clone();
    keyed[0] = 1;
    assert_eq!(unpack_plain(&keyed), Err(PlainError::NonZeroKeyId { key_id: 1 }));
    assert_eq!(
        unpack_plain(&wire[..22]),
        Err(PlainError::BadLength { declared: 4, available: 2 })
    );
}

#[test]
fn framings_carry_plain_frames() {
    let payload = pack_plain(4, &[7; 16]);
    let codecs: [Box<dyn Transport>; 2] = [Box::new(Abridged), Box::new(Intermediate)];
    for mut codec in codecs {
        let mut wire = Vec::new();
        codec.pack(&payload, &mut wire);
        codec.pack(&payload, &mut wire);
        let first = codec.unpack(&wire).unwrap();
        assert_eq!(&wire[first.data_start..first.data_end], payload.as_slice());
        let second = codec.unpack(&wire[first.next_offset..]).unwrap();
        assert_eq!(first.next_offset + second.next_offset, wire.len());
    }
}
