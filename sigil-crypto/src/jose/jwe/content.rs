//! Content encryption for JWE: AES-GCM and the AES-CBC HMAC-SHA2
//! composite construction of [`rfc7518, section 5.2`].
//!
//! [`rfc7518, section 5.2`]: https://datatracker.ietf.org/doc/html/rfc7518#section-5.2

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut as _, BlockEncryptMut as _, KeyIvInit as _};
use hmac::Hmac;
use rand_core::{OsRng, RngCore as _};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq as _;

use crate::jose::encoding::be_u64;
use crate::jose::{Encryption, Error, KeyRejection};

/// AES-192-GCM, which `aes_gcm` does not provide as a named alias
/// (only `Aes128Gcm` and `Aes256Gcm` ship as aliases).
type Aes192Gcm = aes_gcm::AesGcm<Aes192, cipher::consts::U12>;

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const CBC_IV_LEN: usize = 16;

/// Encrypts `plaintext` under the CEK, returning `(iv, ciphertext, tag)`.
pub(super) fn encrypt(
    encryption: Encryption,
    cek: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), Error> {
    check_cek(encryption, cek).map_err(|_| KeyRejection::ParameterMismatch)?;
    match encryption {
        Encryption::A128GCM => gcm_encrypt::<Aes128Gcm>(cek, plaintext, aad),
        Encryption::A192GCM => gcm_encrypt::<Aes192Gcm>(cek, plaintext, aad),
        Encryption::A256GCM => gcm_encrypt::<Aes256Gcm>(cek, plaintext, aad),
        Encryption::A128CbcHs256 | Encryption::A192CbcHs384 | Encryption::A256CbcHs512 => {
            cbc_hmac_encrypt(encryption, cek, plaintext, aad)
        }
    }
}

/// Authenticates and decrypts `(iv, ciphertext, tag)` under the CEK.
///
/// Authentication runs before any plaintext is produced; every failure is
/// the generic [`Error::DecryptionFailed`].
pub(super) fn decrypt(
    encryption: Encryption,
    cek: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    check_cek(encryption, cek)?;
    match encryption {
        Encryption::A128GCM => gcm_decrypt::<Aes128Gcm>(cek, iv, ciphertext, tag, aad),
        Encryption::A192GCM => gcm_decrypt::<Aes192Gcm>(cek, iv, ciphertext, tag, aad),
        Encryption::A256GCM => gcm_decrypt::<Aes256Gcm>(cek, iv, ciphertext, tag, aad),
        Encryption::A128CbcHs256 | Encryption::A192CbcHs384 | Encryption::A256CbcHs512 => {
            cbc_hmac_decrypt(encryption, cek, iv, ciphertext, tag, aad)
        }
    }
}

fn check_cek(encryption: Encryption, cek: &[u8]) -> Result<(), Error> {
    if cek.len() != (encryption.cek_size() / 8) as usize {
        return Err(Error::DecryptionFailed);
    }
    Ok(())
}

fn gcm_encrypt<A: Aead + KeyInit>(
    cek: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), Error> {
    let cipher = A::new_from_slice(cek).map_err(|_| Error::DecryptionFailed)?;
    let mut iv = vec![0u8; GCM_IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut sealed = cipher
        .encrypt(
            aes_gcm::aead::Nonce::<A>::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::DecryptionFailed)?;
    let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);
    Ok((iv, sealed, tag))
}

fn gcm_decrypt<A: Aead + KeyInit>(
    cek: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    if iv.len() != GCM_IV_LEN || tag.len() != GCM_TAG_LEN {
        return Err(Error::DecryptionFailed);
    }
    let cipher = A::new_from_slice(cek).map_err(|_| Error::DecryptionFailed)?;
    let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    cipher
        .decrypt(
            aes_gcm::aead::Nonce::<A>::from_slice(iv),
            Payload { msg: &sealed, aad },
        )
        .map_err(|_| Error::DecryptionFailed)
}

/// MAC input: `AAD || IV || ciphertext || BE64(bitlen(AAD))`.
fn cbc_hmac_tag(
    encryption: Encryption,
    mac_key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut input = Vec::with_capacity(aad.len() + iv.len() + ciphertext.len() + 8);
    input.extend_from_slice(aad);
    input.extend_from_slice(iv);
    input.extend_from_slice(ciphertext);
    be_u64(aad.len() as u64 * 8, &mut input);

    let full = match encryption {
        Encryption::A128CbcHs256 => mac::<Hmac<Sha256>>(mac_key, &input)?,
        Encryption::A192CbcHs384 => mac::<Hmac<Sha384>>(mac_key, &input)?,
        Encryption::A256CbcHs512 => mac::<Hmac<Sha512>>(mac_key, &input)?,
        _ => return Err(Error::DecryptionFailed),
    };
    Ok(full[..mac_key.len()].to_vec())
}

fn mac<M: hmac::Mac + hmac::digest::KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = <M as hmac::Mac>::new_from_slice(key).map_err(|_| Error::DecryptionFailed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn cbc_hmac_encrypt(
    encryption: Encryption,
    cek: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), Error> {
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let mut iv = vec![0u8; CBC_IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = match encryption {
        Encryption::A128CbcHs256 => cbc::Encryptor::<Aes128>::new_from_slices(enc_key, &iv)
            .map_err(|_| Error::DecryptionFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        Encryption::A192CbcHs384 => cbc::Encryptor::<Aes192>::new_from_slices(enc_key, &iv)
            .map_err(|_| Error::DecryptionFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        Encryption::A256CbcHs512 => cbc::Encryptor::<Aes256>::new_from_slices(enc_key, &iv)
            .map_err(|_| Error::DecryptionFailed)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => return Err(Error::DecryptionFailed),
    };

    let tag = cbc_hmac_tag(encryption, mac_key, &iv, &ciphertext, aad)?;
    Ok((iv, ciphertext, tag))
}

fn cbc_hmac_decrypt(
    encryption: Encryption,
    cek: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    if iv.len() != CBC_IV_LEN {
        return Err(Error::DecryptionFailed);
    }
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);

    let expected = cbc_hmac_tag(encryption, mac_key, iv, ciphertext, aad)?;
    if !bool::from(expected.ct_eq(tag)) {
        return Err(Error::DecryptionFailed);
    }

    match encryption {
        Encryption::A128CbcHs256 => cbc::Decryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(|_| Error::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::DecryptionFailed),
        Encryption::A192CbcHs384 => cbc::Decryptor::<Aes192>::new_from_slices(enc_key, iv)
            .map_err(|_| Error::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::DecryptionFailed),
        Encryption::A256CbcHs512 => cbc::Decryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(|_| Error::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::DecryptionFailed),
        _ => Err(Error::DecryptionFailed),
    }
}

/// Encrypts the content encryption key itself under a GCM key-wrapping key,
/// returning `(iv, wrapped_key, tag)`.
pub(super) fn gcm_wrap_key(kek: &[u8], cek: &[u8]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), Error> {
    match kek.len() {
        16 => gcm_encrypt::<Aes128Gcm>(kek, cek, &[]),
        24 => gcm_encrypt::<Aes192Gcm>(kek, cek, &[]),
        32 => gcm_encrypt::<Aes256Gcm>(kek, cek, &[]),
        _ => Err(KeyRejection::ParameterMismatch.into()),
    }
}

/// Recovers a GCM-wrapped content encryption key.
pub(super) fn gcm_unwrap_key(
    kek: &[u8],
    iv: &[u8],
    wrapped: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, Error> {
    match kek.len() {
        16 => gcm_decrypt::<Aes128Gcm>(kek, iv, wrapped, tag, &[]),
        24 => gcm_decrypt::<Aes192Gcm>(kek, iv, wrapped, tag, &[]),
        32 => gcm_decrypt::<Aes256Gcm>(kek, iv, wrapped, tag, &[]),
        _ => Err(Error::DecryptionFailed),
    }
}

/// Wraps a content encryption key with AES Key Wrap ([`rfc3394`]).
///
/// [`rfc3394`]: https://datatracker.ietf.org/doc/html/rfc3394
pub(super) fn aes_wrap_key(kek: &[u8], cek: &[u8]) -> Result<Vec<u8>, Error> {
    let mut wrapped = vec![0u8; cek.len() + 8];
    match kek.len() {
        16 => aes_kw::Kek::<Aes128>::try_from(kek)
            .map_err(|_| KeyRejection::ParameterMismatch)?
            .wrap(cek, &mut wrapped)
            .map_err(|_| Error::DecryptionFailed)?,
        24 => aes_kw::Kek::<Aes192>::try_from(kek)
            .map_err(|_| KeyRejection::ParameterMismatch)?
            .wrap(cek, &mut wrapped)
            .map_err(|_| Error::DecryptionFailed)?,
        32 => aes_kw::Kek::<Aes256>::try_from(kek)
            .map_err(|_| KeyRejection::ParameterMismatch)?
            .wrap(cek, &mut wrapped)
            .map_err(|_| Error::DecryptionFailed)?,
        _ => return Err(KeyRejection::ParameterMismatch.into()),
    }
    Ok(wrapped)
}

/// Unwraps an AES Key Wrap protected content encryption key.
pub(super) fn aes_unwrap_key(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, Error> {
    if wrapped.len() < 16 || wrapped.len() % 8 != 0 {
        return Err(Error::DecryptionFailed);
    }
    let mut cek = vec![0u8; wrapped.len() - 8];
    match kek.len() {
        16 => aes_kw::Kek::<Aes128>::try_from(kek)
            .map_err(|_| Error::DecryptionFailed)?
            .unwrap(wrapped, &mut cek)
            .map_err(|_| Error::DecryptionFailed)?,
        24 => aes_kw::Kek::<Aes192>::try_from(kek)
            .map_err(|_| Error::DecryptionFailed)?
            .unwrap(wrapped, &mut cek)
            .map_err(|_| Error::DecryptionFailed)?,
        32 => aes_kw::Kek::<Aes256>::try_from(kek)
            .map_err(|_| Error::DecryptionFailed)?
            .unwrap(wrapped, &mut cek)
            .map_err(|_| Error::DecryptionFailed)?,
        _ => return Err(Error::DecryptionFailed),
    }
    Ok(cek)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_cek(encryption: Encryption) -> Vec<u8> {
        let mut cek = vec![0u8; (encryption.cek_size() / 8) as usize];
        OsRng.fill_bytes(&mut cek);
        cek
    }

    #[test]
    fn content_round_trip_for_every_scheme() {
        for encryption in Encryption::ALL {
            let cek = random_cek(*encryption);
            let aad = b"protected-header";
            let (iv, ciphertext, tag) =
                encrypt(*encryption, &cek, b"the plaintext", aad).unwrap();
            let plaintext = decrypt(*encryption, &cek, &iv, &ciphertext, &tag, aad).unwrap();
            assert_eq!(plaintext, b"the plaintext");
        }
    }

    #[test]
    fn authentication_runs_before_decryption() {
        for encryption in [Encryption::A128CbcHs256, Encryption::A128GCM] {
            let cek = random_cek(encryption);
            let (iv, ciphertext, mut tag) = encrypt(encryption, &cek, b"data", b"aad").unwrap();
            tag[0] ^= 1;
            assert!(matches!(
                decrypt(encryption, &cek, &iv, &ciphertext, &tag, b"aad"),
                Err(Error::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn aad_is_bound_to_the_ciphertext() {
        let cek = random_cek(Encryption::A256GCM);
        let (iv, ciphertext, tag) = encrypt(Encryption::A256GCM, &cek, b"data", b"aad").unwrap();
        assert!(matches!(
            decrypt(Encryption::A256GCM, &cek, &iv, &ciphertext, &tag, b"other"),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn rfc3394_aes_wrap_vector() {
        // RFC 3394 section 4.1: wrap 128 bits of key data with a 128-bit KEK
        let kek: Vec<u8> = (0..16).collect();
        let cek = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        let wrapped = aes_wrap_key(&kek, &cek).unwrap();
        assert_eq!(
            wrapped,
            [
                0x1F, 0xA6, 0x8B, 0x0A, 0x81, 0x12, 0xB4, 0x47, 0xAE, 0xF3, 0x4B, 0xD8, 0xFB,
                0x5A, 0x7B, 0x82, 0x9D, 0x3E, 0x86, 0x23, 0x71, 0xD2, 0xCF, 0xE5
            ]
        );
        assert_eq!(aes_unwrap_key(&kek, &wrapped).unwrap(), cek);
    }

    #[test]
    fn gcm_key_wrap_round_trip() {
        let kek = random_cek(Encryption::A128GCM);
        let cek = random_cek(Encryption::A256GCM);
        let (iv, wrapped, tag) = gcm_wrap_key(&kek, &cek).unwrap();
        assert_eq!(iv.len(), 12);
        assert_eq!(tag.len(), 16);
        assert_eq!(gcm_unwrap_key(&kek, &iv, &wrapped, &tag).unwrap(), cek);
        assert!(gcm_unwrap_key(&kek, &iv, &wrapped, &[0u8; 16]).is_err());
    }
}
