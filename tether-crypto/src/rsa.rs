//! RSA-PAD as used by `req_DH_params`, and the server keys we trust.

use std::sync::LazyLock;

use num_bigint::BigUint;

use crate::{aes, sha1, sha256};

/// An RSA public key `(n, e)` and its Telegram fingerprint.
#[derive(Clone, Debug)]
pub struct Key {
    n: BigUint,
    e: BigUint,
    fingerprint: i64,
}

/// TL `bytes` encoding, needed to hash the key the way the server does.
fn tl_bytes(data: &[u8], out: &mut Vec<u8>) {
    let header = if data.len() < 254 {
        out.push(data.len() as u8);
        1
    } else {
        out.push(254);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
        4
    };
    out.extend_from_slice(data);
    let pad = (4 - (header + data.len()) % 4) % 4;
    out.extend(std::iter::repeat_n(0, pad));
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        let n = BigUint::parse_bytes(n.as_bytes(), 10)?;
        let e = BigUint::parse_bytes(e.as_bytes(), 10)?;

        let mut serialized = Vec::with_capacity(272);
        tl_bytes(&n.to_bytes_be(), &mut serialized);
        tl_bytes(&e.to_bytes_be(), &mut serialized);
        let sha = sha1!(&serialized);
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&sha[12..]);

        Some(Self { n, e, fingerprint: i64::from_le_bytes(tail) })
    }

    /// Lower 64 bits of `SHA1(n ‖ e)` over their TL `bytes` encodings.
    pub fn fingerprint(&self) -> i64 {
        self.fingerprint
    }
}

static TRUSTED_KEYS: LazyLock<Vec<Key>> = LazyLock::new(|| {
    [
        // production
        "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
        // test servers
        "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
    ]
    .into_iter()
    .filter_map(|n| Key::new(n, "65537"))
    .collect()
});

/// Look up a built-in server key by fingerprint.
pub fn trusted_key(fingerprint: i64) -> Option<&'static Key> {
    TRUSTED_KEYS.iter().find(|k| k.fingerprint == fingerprint)
}

/// Fingerprints of every built-in key.
pub fn trusted_fingerprints() -> impl Iterator<Item = i64> {
    TRUSTED_KEYS.iter().map(Key::fingerprint)
}

fn increment(data: &mut [u8]) {
    for byte in data.iter_mut().rev() {
        let (n, overflow) = byte.overflowing_add(1);
        *byte = n;
        if !overflow {
            break;
        }
    }
}

/// Maximum plaintext accepted by [`encrypt_hashed`].
pub const MAX_PLAINTEXT: usize = 144;

/// RSA-encrypt `data` using the MTProto RSA-PAD scheme.
///
/// `random_bytes` supplies both the padding and the temporary AES key.
/// Returns `None` if `data` is longer than [`MAX_PLAINTEXT`].
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 224]) -> Option<Vec<u8>> {
    if data.len() > MAX_PLAINTEXT {
        return None;
    }

    let mut data_with_padding = Vec::with_capacity(192);
    data_with_padding.extend_from_slice(data);
    data_with_padding.extend_from_slice(&random_bytes[..192 - data.len()]);

    let data_pad_reversed: Vec<u8> = data_with_padding.iter().rev().copied().collect();

    let mut temp_key = [0u8; 32];
    temp_key.copy_from_slice(&random_bytes[192..]);

    let key_aes_encrypted = loop {
        let mut data_with_hash = Vec::with_capacity(224);
        data_with_hash.extend_from_slice(&data_pad_reversed);
        data_with_hash.extend_from_slice(&sha256!(&temp_key, &data_with_padding));

        aes::ige_encrypt(&mut data_with_hash, &temp_key, &[0u8; 32]);

        let hash = sha256!(&data_with_hash);
        let mut temp_key_xor = temp_key;
        for (a, b) in temp_key_xor.iter_mut().zip(hash) {
            *a ^= b;
        }

        let mut candidate = Vec::with_capacity(256);
        candidate.extend_from_slice(&temp_key_xor);
        candidate.extend_from_slice(&data_with_hash);

        if BigUint::from_bytes_be(&candidate) < key.n {
            break candidate;
        }
        increment(&mut temp_key);
    };

    let payload = BigUint::from_bytes_be(&key_aes_encrypted);
    let encrypted = payload.modpow(&key.e, &key.n).to_bytes_be();
    let mut block = vec![0u8; 256usize.saturating_sub(encrypted.len())];
    block.extend_from_slice(&encrypted);
    Some(block)
}
