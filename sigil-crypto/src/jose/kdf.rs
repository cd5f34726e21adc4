//! Key derivation for the ECDH-ES and PBES2 key-management families.

use sha2::{Digest as _, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::jose::encoding::{be_u32, length_prefixed};
use crate::jose::{Algorithm, Error, KeyRejection};

/// One round of Concat KDF fixed info:
/// `round || Z || len(AlgorithmID) || AlgorithmID || len(PartyUInfo) ||
/// PartyUInfo || len(PartyVInfo) || PartyVInfo || SuppPubInfo`.
///
/// See NIST.SP.800-56Cr2 section 5.8.2.1.1 and [`rfc7518, section 4.6.2`].
///
/// [`rfc7518, section 4.6.2`]: https://datatracker.ietf.org/doc/html/rfc7518#section-4.6.2
fn concat_kdf_round(
    round: u32,
    z: &[u8],
    alg_id: &[u8],
    apu: &[u8],
    apv: &[u8],
    key_bits: u32,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(4 + z.len() + 12 + alg_id.len() + apu.len() + apv.len() + 4);
    be_u32(round, &mut buffer);
    buffer.extend_from_slice(z);
    length_prefixed(alg_id, &mut buffer);
    length_prefixed(apu, &mut buffer);
    length_prefixed(apv, &mut buffer);
    be_u32(key_bits, &mut buffer);
    buffer
}

/// Derives `key_bits` of key data from the agreed-upon secret `z` using the
/// one-step SHA-256 Concat KDF fixed by JWA for all ECDH-ES variants.
pub(crate) fn concat_kdf(
    z: &[u8],
    alg_id: &[u8],
    apu: &[u8],
    apv: &[u8],
    key_bits: u32,
) -> Zeroizing<Vec<u8>> {
    let key_len = (key_bits / 8) as usize;
    let reps = key_len.div_ceil(32);
    let mut key_data = Zeroizing::new(Vec::with_capacity(reps * 32));
    for round in 1..=reps as u32 {
        let hash = Sha256::digest(concat_kdf_round(round, z, alg_id, apu, apv, key_bits));
        key_data.extend_from_slice(&hash);
    }
    key_data.truncate(key_len);
    key_data
}

/// Derives the PBES2 key-wrapping key from a passphrase per
/// [`rfc7518, section 4.8`]: PBKDF2 with the algorithm's HMAC, salt
/// `alg-name || 0x00 || p2s`, and a derived length matching the AES-KW
/// variant.
///
/// [`rfc7518, section 4.8`]: https://datatracker.ietf.org/doc/html/rfc7518#section-4.8
pub(crate) fn pbes2_derive(
    algorithm: Algorithm,
    passphrase: &[u8],
    p2s: &[u8],
    p2c: u32,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    if p2s.len() < 8 {
        return Err(Error::header_invalid("p2s must be at least 8 octets"));
    }
    if p2c < 1000 {
        return Err(Error::header_invalid("p2c must be at least 1000"));
    }

    let mut salt = Vec::with_capacity(algorithm.name().len() + 1 + p2s.len());
    salt.extend_from_slice(algorithm.name().as_bytes());
    salt.push(0);
    salt.extend_from_slice(p2s);

    let mut key = Zeroizing::new(vec![0u8; (algorithm.size() / 8) as usize]);
    match algorithm {
        Algorithm::Pbes2Hs256A128Kw => {
            pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, &salt, p2c, &mut key);
        }
        Algorithm::Pbes2Hs384A192Kw => {
            pbkdf2::pbkdf2_hmac::<Sha384>(passphrase, &salt, p2c, &mut key);
        }
        Algorithm::Pbes2Hs512A256Kw => {
            pbkdf2::pbkdf2_hmac::<Sha512>(passphrase, &salt, p2c, &mut key);
        }
        _ => return Err(KeyRejection::TypeMismatch.into()),
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jose::WebKey;
    use crate::jose::encoding::base64_url;

    #[test]
    fn concat_kdf_matches_rfc7518_appendix_c() {
        // RFC 7518 Appendix C: ECDH-ES for A128GCM with Alice and Bob
        let alice = WebKey::parse_jwk(
            r#"{"kty":"EC","crv":"P-256",
             "x":"gI0GAILBdu7T53akrFmMyGcsF3n5dO7MmwNBHKW5SV0",
             "y":"SLW_xSffzlPWrHEVI30DHM_4egVwt3NQqeUD7nMFpps",
             "d":"0_NxaRPUMQoAJt50Gz8YiTr8gRTwyEaCumd-MToTmIo"}"#,
        )
        .unwrap();
        let bob = WebKey::parse_jwk(
            r#"{"kty":"EC","crv":"P-256",
             "x":"weNJy2HscCSM6AEDTDg04biOvhFhyyWvOHQfeF_PxMQ",
             "y":"e8lnCO-AlStT-NJVX-crhB7QRYhiix03illJOVAOyck",
             "d":"VEmDZpDXXK8p8N0Cndsxs924q6nS1RXFASRl6BfUqdw"}"#,
        )
        .unwrap();

        let z = alice.agree(&bob).unwrap();
        assert_eq!(
            z[..],
            [
                158, 86, 217, 29, 129, 113, 53, 211, 114, 131, 66, 131, 191, 132, 38, 156, 251,
                49, 110, 163, 218, 128, 106, 72, 246, 218, 167, 121, 140, 254, 144, 196
            ]
        );
        // agreement is symmetric
        assert_eq!(bob.agree(&alice).unwrap()[..], z[..]);

        let derived = concat_kdf(&z, b"A128GCM", b"Alice", b"Bob", 128);
        assert_eq!(base64_url(&derived), "VqqN6vgjbSBcIijNcacQGg");
    }

    #[test]
    fn concat_kdf_runs_two_rounds_for_long_keys() {
        let derived = concat_kdf(b"z", b"A256CBC-HS512", b"", b"", 512);
        assert_eq!(derived.len(), 64);
        // the first 32 bytes are the round-1 hash
        let round1 = Sha256::digest(concat_kdf_round(1, b"z", b"A256CBC-HS512", b"", b"", 512));
        assert_eq!(derived[..32], round1[..]);
    }

    #[test]
    fn pbes2_enforces_salt_and_count_floors() {
        assert!(pbes2_derive(Algorithm::Pbes2Hs256A128Kw, b"pw", b"short", 2048).is_err());
        assert!(pbes2_derive(Algorithm::Pbes2Hs256A128Kw, b"pw", b"longenough", 999).is_err());
        let key = pbes2_derive(Algorithm::Pbes2Hs256A128Kw, b"pw", b"longenough", 2048).unwrap();
        assert_eq!(key.len(), 16);
        let key = pbes2_derive(Algorithm::Pbes2Hs512A256Kw, b"pw", b"longenough", 4096).unwrap();
        assert_eq!(key.len(), 32);
    }
}
