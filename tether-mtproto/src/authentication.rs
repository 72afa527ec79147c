//! Sans-IO MTProto authorization key generation.
//!
//! # Flow
//!
//! ```text
//! let (req, s1) = authentication::step1()?;
//! // send req, receive resp
//! let (req, s2) = authentication::step2(s1, resp)?;
//! // send req, receive resp
//! let (req, s3) = authentication::step3(s2, resp)?;
//! // send req, receive resp
//! let done = authentication::finish(s3, resp)?;
//! // done.auth_key is ready
//! ```
//!
//! Every error is fatal for the attempt. Start again from [`step1`].

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;
use num_traits::One;
use tether_crypto::{
    AuthKey, FactorizeError, aes, factorize, generate_key_data_from_nonce, mod_exp, random_array,
    rsa, sha1,
};
use tether_tl_types::{Cursor, Deserializable, Serializable, enums, functions, types};

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors that can occur during auth key generation.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidPqSize { size: usize },
    Factorize(FactorizeError),
    UnknownFingerprints { fingerprints: Vec<i64> },
    RsaPayloadTooLarge { len: usize },
    DhParamsFail,
    InvalidServerNonce { got: [u8; 16], expected: [u8; 16] },
    EncryptedResponseNotPadded { len: usize },
    InvalidDhInnerData { error: tether_tl_types::deserialize::Error },
    InvalidDhPrime { bits: u64 },
    GParameterOutOfRange { value: BigUint, low: BigUint, high: BigUint },
    DhGenRetry,
    DhGenFail,
    InvalidAnswerHash { got: [u8; 20], expected: [u8; 20] },
    InvalidNewNonceHash { got: [u8; 16], expected: [u8; 16] },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNonce { got, expected } => {
                write!(f, "nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidPqSize { size } => write!(f, "pq size {size} invalid (expected 8)"),
            Self::Factorize(e) => write!(f, "{e}"),
            Self::UnknownFingerprints { fingerprints } => {
                write!(f, "no known fingerprint in {fingerprints:?}")
            }
            Self::RsaPayloadTooLarge { len } => write!(f, "p_q_inner_data of {len} bytes too large"),
            Self::DhParamsFail => write!(f, "server returned DH params failure"),
            Self::InvalidServerNonce { got, expected } => {
                write!(f, "server_nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::EncryptedResponseNotPadded { len } => {
                write!(f, "encrypted answer len {len} is not 16-byte aligned")
            }
            Self::InvalidDhInnerData { error } => {
                write!(f, "DH inner data deserialization error: {error}")
            }
            Self::InvalidDhPrime { bits } => write!(f, "dh_prime has {bits} bits, expected 2048"),
            Self::GParameterOutOfRange { value, low, high } => {
                write!(f, "g={value} not in range ({low}, {high})")
            }
            Self::DhGenRetry => write!(f, "DH gen retry requested"),
            Self::DhGenFail => write!(f, "DH gen failed"),
            Self::InvalidAnswerHash { got, expected } => {
                write!(f, "answer hash mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidNewNonceHash { got, expected } => {
                write!(f, "new nonce hash mismatch: got {got:?}, expected {expected:?}")
            }
        }
    }
}

impl From<FactorizeError> for Error {
    fn from(e: FactorizeError) -> Self {
        Self::Factorize(e)
    }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// State after step 1.
pub struct Step1 {
    nonce: [u8; 16],
}

/// State after step 2.
pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

/// State after step 3.
pub struct Step3 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    gab: BigUint,
    time_offset: i32,
}

/// The final output of a successful auth key handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    /// The 256-byte authorization key.
    pub auth_key: [u8; 256],
    /// Server time minus local time, in seconds.
    pub time_offset: i32,
    /// Salt to use until the server hands out another.
    pub first_salt: i64,
}

// ─── Step 1: req_pq_multi ────────────────────────────────────────────────────

/// Generate a `req_pq_multi` request. Returns the request + opaque state.
pub fn step1() -> Result<(functions::ReqPqMulti, Step1), Error> {
    do_step1(&random_array())
}

fn do_step1(random: &[u8; 16]) -> Result<(functions::ReqPqMulti, Step1), Error> {
    let nonce = *random;
    Ok((functions::ReqPqMulti { nonce }, Step1 { nonce }))
}

// ─── Step 2: req_DH_params ───────────────────────────────────────────────────

/// Process `ResPQ` and generate `req_DH_params`.
pub fn step2(
    data: Step1,
    response: enums::ResPq,
) -> Result<(functions::ReqDhParams, Step2), Error> {
    do_step2(data, response, &random_array())
}

fn trim_be(v: u64) -> Vec<u8> {
    let b = v.to_be_bytes();
    let skip = b.iter().position(|&x| x != 0).unwrap_or(7);
    b[skip..].to_vec()
}

fn do_step2(
    data: Step1,
    response: enums::ResPq,
    random: &[u8; 256],
) -> Result<(functions::ReqDhParams, Step2), Error> {
    let Step1 { nonce } = data;
    let enums::ResPq::ResPq(res_pq) = response;

    check_nonce(&res_pq.nonce, &nonce)?;

    let pq_bytes: [u8; 8] = res_pq
        .pq
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidPqSize { size: res_pq.pq.len() })?;
    let pq = u64::from_be_bytes(pq_bytes);
    let (p, q) = factorize(pq)?;
    log::debug!("factorized pq {pq} = {p} * {q}");

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);
    let mut rsa_random = [0u8; 224];
    rsa_random.copy_from_slice(&random[32..]);

    let p_bytes = trim_be(p);
    let q_bytes = trim_be(q);

    let pq_inner = enums::PQInnerData::from(types::PQInnerData {
        pq: pq_bytes.to_vec(),
        p: p_bytes.clone(),
        q: q_bytes.clone(),
        nonce,
        server_nonce: res_pq.server_nonce,
        new_nonce,
    })
    .to_bytes();

    let (fingerprint, key) = res_pq
        .server_public_key_fingerprints
        .iter()
        .find_map(|&fp| rsa::trusted_key(fp).map(|key| (fp, key)))
        .ok_or_else(|| Error::UnknownFingerprints {
            fingerprints: res_pq.server_public_key_fingerprints.clone(),
        })?;

    let ciphertext = rsa::encrypt_hashed(&pq_inner, key, &rsa_random)
        .ok_or(Error::RsaPayloadTooLarge { len: pq_inner.len() })?;

    Ok((
        functions::ReqDhParams {
            nonce,
            server_nonce: res_pq.server_nonce,
            p: p_bytes,
            q: q_bytes,
            public_key_fingerprint: fingerprint,
            encrypted_data: ciphertext,
        },
        Step2 { nonce, server_nonce: res_pq.server_nonce, new_nonce },
    ))
}

// ─── Step 3: set_client_DH_params ────────────────────────────────────────────

/// Process `ServerDhParams` and generate `set_client_DH_params`.
pub fn step3(
    data: Step2,
    response: enums::ServerDhParams,
) -> Result<(functions::SetClientDhParams, Step3), Error> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or_default();
    // 256 bytes for b, 16 for padding
    do_step3(data, response, &random_array(), now)
}

fn do_step3(
    data: Step2,
    response: enums::ServerDhParams,
    random: &[u8; 272],
    now: i32,
) -> Result<(functions::SetClientDhParams, Step3), Error> {
    let Step2 { nonce, server_nonce, new_nonce } = data;

    let mut server_dh_ok = match response {
        enums::ServerDhParams::Fail(fail) => {
            check_nonce(&fail.nonce, &nonce)?;
            check_server_nonce(&fail.server_nonce, &server_nonce)?;
            let digest = sha1!(&new_nonce);
            let mut expected = [0u8; 16];
            expected.copy_from_slice(&digest[4..]);
            check_new_nonce_hash(&fail.new_nonce_hash, &expected)?;
            return Err(Error::DhParamsFail);
        }
        enums::ServerDhParams::Ok(ok) => ok,
    };

    check_nonce(&server_dh_ok.nonce, &nonce)?;
    check_server_nonce(&server_dh_ok.server_nonce, &server_nonce)?;

    let len = server_dh_ok.encrypted_answer.len();
    if len % 16 != 0 || len < 32 {
        return Err(Error::EncryptedResponseNotPadded { len });
    }

    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    aes::ige_decrypt(&mut server_dh_ok.encrypted_answer, &key, &iv);
    let plain = server_dh_ok.encrypted_answer;

    let mut got_hash = [0u8; 20];
    got_hash.copy_from_slice(&plain[..20]);
    let mut cursor = Cursor::from_slice(&plain[20..]);

    let enums::ServerDhInnerData::ServerDhInnerData(inner) =
        enums::ServerDhInnerData::deserialize(&mut cursor)
            .map_err(|error| Error::InvalidDhInnerData { error })?;

    let expected_hash = sha1!(&plain[20..20 + cursor.pos()]);
    if got_hash != expected_hash {
        return Err(Error::InvalidAnswerHash { got: got_hash, expected: expected_hash });
    }

    check_nonce(&inner.nonce, &nonce)?;
    check_server_nonce(&inner.server_nonce, &server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    if dh_prime.bits() != 2048 {
        return Err(Error::InvalidDhPrime { bits: dh_prime.bits() });
    }
    let g = BigUint::from(inner.g.max(0) as u32);
    let g_a = BigUint::from_bytes_be(&inner.g_a);
    let time_offset = inner.server_time.wrapping_sub(now);

    let one = BigUint::one();
    let p_minus_one = &dh_prime - &one;
    check_g_in_range(&g, &one, &p_minus_one)?;
    check_g_in_range(&g_a, &one, &p_minus_one)?;

    let b = BigUint::from_bytes_be(&random[..256]);
    let invalid_prime = || Error::InvalidDhPrime { bits: 0 };
    let g_b = mod_exp(&g, &b, &dh_prime).ok_or_else(invalid_prime)?;
    let gab = mod_exp(&g_a, &b, &dh_prime).ok_or_else(invalid_prime)?;
    check_g_in_range(&g_b, &one, &p_minus_one)?;

    let safety = &one << (2048 - 64);
    let upper = &dh_prime - &safety;
    check_g_in_range(&g_a, &safety, &upper)?;
    check_g_in_range(&g_b, &safety, &upper)?;

    let client_dh_inner = enums::ClientDhInnerData::from(types::ClientDhInnerData {
        nonce,
        server_nonce,
        retry_id: 0,
        g_b: g_b.to_bytes_be(),
    })
    .to_bytes();

    let digest = sha1!(&client_dh_inner);
    let pad_len = (16 - ((20 + client_dh_inner.len()) % 16)) % 16;

    let mut hashed = Vec::with_capacity(20 + client_dh_inner.len() + pad_len);
    hashed.extend_from_slice(&digest);
    hashed.extend_from_slice(&client_dh_inner);
    hashed.extend_from_slice(&random[256..256 + pad_len]);

    aes::ige_encrypt(&mut hashed, &key, &iv);

    Ok((
        functions::SetClientDhParams { nonce, server_nonce, encrypted_data: hashed },
        Step3 { nonce, server_nonce, new_nonce, gab, time_offset },
    ))
}

// ─── finish: create_key ──────────────────────────────────────────────────────

/// Finalise the handshake. Returns the ready [`Finished`] on success.
pub fn finish(data: Step3, response: enums::SetClientDhParamsAnswer) -> Result<Finished, Error> {
    let Step3 { nonce, server_nonce, new_nonce, gab, time_offset } = data;

    let (answer_nonce, answer_server_nonce, hash, number) = match response {
        enums::SetClientDhParamsAnswer::DhGenOk(x) => (x.nonce, x.server_nonce, x.new_nonce_hash1, 1),
        enums::SetClientDhParamsAnswer::DhGenRetry(x) => {
            (x.nonce, x.server_nonce, x.new_nonce_hash2, 2)
        }
        enums::SetClientDhParamsAnswer::DhGenFail(x) => {
            (x.nonce, x.server_nonce, x.new_nonce_hash3, 3)
        }
    };

    check_nonce(&answer_nonce, &nonce)?;
    check_server_nonce(&answer_server_nonce, &server_nonce)?;

    let mut key_bytes = [0u8; 256];
    let gab_bytes = gab.to_bytes_be();
    key_bytes[256 - gab_bytes.len()..].copy_from_slice(&gab_bytes);

    let auth_key = AuthKey::from_bytes(key_bytes);
    let expected = auth_key.calc_new_nonce_hash(&new_nonce, number);
    check_new_nonce_hash(&hash, &expected)?;

    let mut salt = [0u8; 8];
    for ((dst, a), b) in salt.iter_mut().zip(&new_nonce[..8]).zip(&server_nonce[..8]) {
        *dst = a ^ b;
    }
    let first_salt = i64::from_le_bytes(salt);

    match number {
        1 => {
            log::info!("generated auth key {}", auth_key.id());
            Ok(Finished { auth_key: key_bytes, time_offset, first_salt })
        }
        2 => Err(Error::DhGenRetry),
        _ => Err(Error::DhGenFail),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNonce { got: *got, expected: *expected })
    }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidServerNonce { got: *got, expected: *expected })
    }
}

fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNewNonceHash { got: *got, expected: *expected })
    }
}

fn check_g_in_range(val: &BigUint, lo: &BigUint, hi: &BigUint) -> Result<(), Error> {
    if lo < val && val < hi {
        Ok(())
    } else {
        Err(Error::GParameterOutOfRange { value: val.clone(), low: lo.clone(), high: hi.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DH_PRIME: &str = "C71CAEB9C6B1C9048E6C522F70F13F73980D40238E3E21C14934D037563D930F\
        48198A0AA7C14058229493D22530F4DBFA336F6E0AC925139543AED44CCE7C37\
        20FD51F69458705AC68CD4FE6B6B13ABDC9746512969328454F18FAF8C595F64\
        2477FE96BB2A941D5BCD1D4AC8CC49880708FA9B378E3C4F3A9060BEE67CF9A4\
        A4A695811051907E162753B56B0F6B410DBA74D8A84B2A14B3144E0EF1284754\
        FD17ED950D5965B4B9DD46582DB1178D169C6BC465B0D6FF9CA3928FEF5B9AE4\
        E418FC15E83EBEA0F87FA9FF5EED70050DED2849F47BF959D956850CE929851F\
        0D8115F635B105EE2E4E15D04B2454BF6F4FADF034B10403119CD8E3B92FCC5B";

    const NONCE: [u8; 16] = [0x11; 16];
    const SERVER_NONCE: [u8; 16] = [0x55; 16];
    const NEW_NONCE: [u8; 32] = [0x22; 32];
    const TEST_FINGERPRINT: i64 = -5595554452916591101;

    fn prime() -> BigUint {
        BigUint::parse_bytes(DH_PRIME.as_bytes(), 16).unwrap()
    }

    fn server_secret() -> BigUint {
        BigUint::from_bytes_be(&[0x44; 256])
    }

    fn res_pq(nonce: [u8; 16]) -> enums::ResPq {
        enums::ResPq::from(types::ResPq {
            nonce,
            server_nonce: SERVER_NONCE,
            pq: 1470626929934143021u64.to_be_bytes().to_vec(),
            server_public_key_fingerprints: vec![12345, TEST_FINGERPRINT],
        })
    }

    fn server_dh_params(server_time: i32) -> enums::ServerDhParams {
        let p = prime();
        let g_a = BigUint::from(3u32).modpow(&server_secret(), &p);
        let inner = enums::ServerDhInnerData::from(types::ServerDhInnerData {
            nonce: NONCE,
            server_nonce: SERVER_NONCE,
            g: 3,
            dh_prime: p.to_bytes_be(),
            g_a: g_a.to_bytes_be(),
            server_time,
        })
        .to_bytes();

        let mut answer = sha1!(&inner).to_vec();
        answer.extend_from_slice(&inner);
        answer.resize(answer.len().next_multiple_of(16), 0);
        let (key, iv) = generate_key_data_from_nonce(&SERVER_NONCE, &NEW_NONCE);
        aes::ige_encrypt(&mut answer, &key, &iv);

        enums::ServerDhParams::Ok(types::ServerDhParamsOk {
            nonce: NONCE,
            server_nonce: SERVER_NONCE,
            encrypted_answer: answer,
        })
    }

    /// Decrypt the client's `g_b` the way the server would and derive the key.
    fn server_side_key(req: &functions::SetClientDhParams) -> AuthKey {
        let (key, iv) = generate_key_data_from_nonce(&SERVER_NONCE, &NEW_NONCE);
        let mut plain = req.encrypted_data.clone();
        aes::ige_decrypt(&mut plain, &key, &iv);
        let mut cursor = Cursor::from_slice(&plain[20..]);
        let enums::ClientDhInnerData::ClientDhInnerData(inner) =
            enums::ClientDhInnerData::deserialize(&mut cursor).unwrap();
        assert_eq!(&plain[..20], &sha1!(&plain[20..20 + cursor.pos()]));

        let gab = BigUint::from_bytes_be(&inner.g_b).modpow(&server_secret(), &prime());
        let mut bytes = [0u8; 256];
        let gab = gab.to_bytes_be();
        bytes[256 - gab.len()..].copy_from_slice(&gab);
        AuthKey::from_bytes(bytes)
    }

    fn run_to_step3() -> (functions::SetClientDhParams, Step3) {
        let (req1, s1) = do_step1(&NONCE).unwrap();
        assert_eq!(req1.nonce, NONCE);
        let (req2, s2) = do_step2(s1, res_pq(NONCE), &[0x22; 256]).unwrap();
        assert_eq!(req2.p, 1206429347u32.to_be_bytes());
        assert_eq!(req2.q, 1218991343u32.to_be_bytes());
        assert_eq!(req2.public_key_fingerprint, TEST_FINGERPRINT);
        assert_eq!(req2.encrypted_data.len(), 256);
        do_step3(s2, server_dh_params(1_700_000_000), &[0x33; 272], 1_700_000_010).unwrap()
    }

    #[test]
    fn fixed_randomness_yields_known_key() {
        let (req3, s3) = run_to_step3();
        let server_key = server_side_key(&req3);
        let answer = enums::SetClientDhParamsAnswer::DhGenOk(types::DhGenOk {
            nonce: NONCE,
            server_nonce: SERVER_NONCE,
            new_nonce_hash1: server_key.calc_new_nonce_hash(&NEW_NONCE, 1),
        });

        let done = finish(s3, answer).unwrap();
        let key = AuthKey::from_bytes(done.auth_key);
        assert_eq!(key, server_key);
        assert_eq!(key.id(), 1494807944332036267);
        assert_eq!(done.first_salt, 8608480567731124087);
        assert_eq!(done.time_offset, -10);
    }

    #[test]
    fn retry_answer_is_an_error() {
        let (req3, s3) = run_to_step3();
        let server_key = server_side_key(&req3);
        let answer = enums::SetClientDhParamsAnswer::DhGenRetry(types::DhGenRetry {
            nonce: NONCE,
            server_nonce: SERVER_NONCE,
            new_nonce_hash2: server_key.calc_new_nonce_hash(&NEW_NONCE, 2),
        });
        assert_eq!(finish(s3, answer), Err(Error::DhGenRetry));
    }

    #[test]
    fn forged_ok_hash_is_rejected() {
        let (_, s3) = run_to_step3();
        let answer = enums::SetClientDhParamsAnswer::DhGenOk(types::DhGenOk {
            nonce: NONCE,
            server_nonce: SERVER_NONCE,
            new_nonce_hash1: [0; 16],
        });
        assert!(matches!(finish(s3, answer), Err(Error::InvalidNewNonceHash { .. })));
    }

    #[test]
    fn echoed_nonce_must_match() {
        let (_, s1) = do_step1(&NONCE).unwrap();
        assert!(matches!(
            do_step2(s1, res_pq([0; 16]), &[0; 256]),
            Err(Error::InvalidNonce { .. })
        ));
    }

    #[test]
    fn unknown_fingerprints_are_rejected() {
        let (_, s1) = do_step1(&NONCE).unwrap();
        let mut resp = types::ResPq {
            nonce: NONCE,
            server_nonce: SERVER_NONCE,
            pq: 1470626929934143021u64.to_be_bytes().to_vec(),
            server_public_key_fingerprints: vec![1, 2],
        };
        assert_eq!(
            do_step2(s1, resp.clone().into(), &[0; 256]).err(),
            Some(Error::UnknownFingerprints { fingerprints: vec![1, 2] })
        );

        let (_, s1) = do_step1(&NONCE).unwrap();
        resp.pq = vec![1, 2, 3];
        assert_eq!(
            do_step2(s1, resp.into(), &[0; 256]).err(),
            Some(Error::InvalidPqSize { size: 3 })
        );
    }

    #[test]
    fn dh_params_fail_is_verified() {
        let (_, s1) = do_step1(&NONCE).unwrap();
        let (_, s2) = do_step2(s1, res_pq(NONCE), &[0x22; 256]).unwrap();
        let mut hash = [0u8; 16];
        hash.copy_from_slice(&sha1!(&NEW_NONCE)[4..]);
        let fail = enums::ServerDhParams::Fail(types::ServerDhParamsFail {
            nonce: NONCE,
            server_nonce: SERVER_NONCE,
            new_nonce_hash: hash,
        });
        assert_eq!(do_step3(s2, fail, &[0; 272], 0).err(), Some(Error::DhParamsFail));
    }

    #[test]
    fn tampered_answer_fails_hash_check() {
        let (_, s1) = do_step1(&NONCE).unwrap();
        let (_, s2) = do_step2(s1, res_pq(NONCE), &[0x22; 256]).unwrap();
        let enums::ServerDhParams::Ok(mut ok) = server_dh_params(0) else { unreachable!() };
        let last = ok.encrypted_answer.len() - 1;
        ok.encrypted_answer[last - 20] ^= 0xff;
        let result = do_step3(s2, enums::ServerDhParams::Ok(ok), &[0x33; 272], 0);
        assert!(result.is_err());
    }
}
