//! JSON Web Encryption as defined in [`rfc7516`].
//!
//! One content-encryption key (CEK) protects the plaintext for every
//! recipient; each recipient carries its own key-management algorithm and
//! header, and (for the wrapping families) its own `encrypted_key`.
//!
//! [`rfc7516`]: https://datatracker.ietf.org/doc/html/rfc7516

use std::collections::BTreeSet;
use std::io::Read as _;

use flate2::Compression;
use flate2::read::{DeflateDecoder, DeflateEncoder};
use rand_core::{OsRng, RngCore as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sigil_error::OpaqueError;
use zeroize::Zeroizing;

use crate::jose::encoding::{base64_url, from_base64_url};
use crate::jose::jwk::generate_material;
use crate::jose::{
    Algorithm, Encryption, Error, HeaderBuilder, KeyRejection, KeyUse, Param, WebCryptoHeader,
    WebKey, kdf,
};

mod content;

/// Default cap on inflated plaintext size, guarding against decompression
/// bombs. Override with [`WebEncryption::decrypt_with_limit`].
pub const DEFAULT_INFLATE_LIMIT: usize = 8 * 1024 * 1024;

/// A recipient of an encrypted message: its header view and, for the
/// key-wrapping families, the CEK encrypted to that recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct JweRecipient {
    header: WebCryptoHeader,
    per_recipient: Option<Map<String, Value>>,
    encrypted_key: Option<Vec<u8>>,
}

impl JweRecipient {
    /// The merged (protected + shared + per-recipient) header view.
    #[must_use]
    pub fn header(&self) -> &WebCryptoHeader {
        &self.header
    }

    /// The encrypted key, absent for direct and direct-agreement
    /// key management.
    #[must_use]
    pub fn encrypted_key(&self) -> Option<&[u8]> {
        self.encrypted_key.as_deref()
    }

    /// Recovers the content-encryption key using the recipient's private or
    /// secret key.
    fn decrypt_cek(
        &self,
        encryption: Encryption,
        key: &WebKey,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        key.verify()?;

        // 5.2#7 verify that the JWE uses a key known to the recipient
        if let Some(known) = self.header.key()
            && !known.represents(key)
        {
            return Err(KeyRejection::ParameterMismatch.into());
        }
        if let (Some(header_kid), Some(key_id)) = (self.header.key_id(), key.key_id())
            && header_kid != key_id
        {
            return Err(KeyRejection::ParameterMismatch.into());
        }

        let algorithm = self.header.algorithm();
        check_encryption_key(algorithm, key)?;
        let cek_len = (encryption.cek_size() / 8) as usize;

        match algorithm {
            Algorithm::Direct => {
                // 5.2#10 the encrypted key value must be empty
                if self.encrypted_key.is_some() {
                    return Err(Error::DecryptionFailed);
                }
                let cek = key
                    .raw_key()
                    .ok_or(KeyRejection::MissingMaterial("secret key"))?;
                if cek.len() != cek_len {
                    return Err(Error::DecryptionFailed);
                }
                Ok(Zeroizing::new(cek.to_vec()))
            }
            Algorithm::EcdhEs => {
                if self.encrypted_key.is_some() {
                    return Err(Error::DecryptionFailed);
                }
                let agreed = self.agreed_upon_key(encryption, key)?;
                Ok(agreed)
            }
            Algorithm::EcdhEsA128Kw | Algorithm::EcdhEsA192Kw | Algorithm::EcdhEsA256Kw => {
                let agreed = self.agreed_upon_key(encryption, key)?;
                let wrapped = self.required_encrypted_key()?;
                Ok(Zeroizing::new(content::aes_unwrap_key(&agreed, wrapped)?))
            }
            Algorithm::A128KW | Algorithm::A192KW | Algorithm::A256KW => {
                let kek = self.symmetric_kek(algorithm, key)?;
                let wrapped = self.required_encrypted_key()?;
                Ok(Zeroizing::new(content::aes_unwrap_key(kek, wrapped)?))
            }
            Algorithm::A128GCMKW | Algorithm::A192GCMKW | Algorithm::A256GCMKW => {
                let kek = self.symmetric_kek(algorithm, key)?;
                let iv = self
                    .header
                    .initialization_vector()?
                    .ok_or_else(|| Error::header_invalid("iv is required"))?;
                let tag = self
                    .header
                    .authentication_tag()?
                    .ok_or_else(|| Error::header_invalid("tag is required"))?;
                let wrapped = self.required_encrypted_key()?;
                Ok(Zeroizing::new(content::gcm_unwrap_key(
                    kek, &iv, wrapped, &tag,
                )?))
            }
            Algorithm::Rsa1_5 => {
                let wrapped = self.required_encrypted_key()?;
                key.rsa_private()?
                    .decrypt(rsa::Pkcs1v15Encrypt, wrapped)
                    .map(Zeroizing::new)
                    .map_err(|_| Error::DecryptionFailed)
            }
            Algorithm::RsaOaep => {
                let wrapped = self.required_encrypted_key()?;
                key.rsa_private()?
                    .decrypt(rsa::Oaep::new::<sha1::Sha1>(), wrapped)
                    .map(Zeroizing::new)
                    .map_err(|_| Error::DecryptionFailed)
            }
            Algorithm::RsaOaep256 => {
                let wrapped = self.required_encrypted_key()?;
                key.rsa_private()?
                    .decrypt(rsa::Oaep::new::<sha2::Sha256>(), wrapped)
                    .map(Zeroizing::new)
                    .map_err(|_| Error::DecryptionFailed)
            }
            Algorithm::Pbes2Hs256A128Kw | Algorithm::Pbes2Hs384A192Kw
            | Algorithm::Pbes2Hs512A256Kw => {
                let passphrase = key
                    .raw_key()
                    .ok_or(KeyRejection::MissingMaterial("passphrase"))?;
                let p2s = self
                    .header
                    .pbes2_salt()?
                    .ok_or_else(|| Error::header_invalid("p2s is required"))?;
                let p2c = self
                    .header
                    .pbes2_count()?
                    .ok_or_else(|| Error::header_invalid("p2c is required"))?;
                let kek = kdf::pbes2_derive(algorithm, passphrase, &p2s, p2c)?;
                let wrapped = self.required_encrypted_key()?;
                Ok(Zeroizing::new(content::aes_unwrap_key(&kek, wrapped)?))
            }
            _ => Err(Error::header_invalid("not a key management algorithm")),
        }
    }

    fn required_encrypted_key(&self) -> Result<&[u8], Error> {
        self.encrypted_key
            .as_deref()
            .ok_or(Error::DecryptionFailed)
    }

    fn symmetric_kek<'a>(
        &self,
        algorithm: Algorithm,
        key: &'a WebKey,
    ) -> Result<&'a [u8], Error> {
        let kek = key
            .raw_key()
            .ok_or(KeyRejection::MissingMaterial("secret key"))?;
        if kek.len() != (algorithm.size() / 8) as usize {
            return Err(KeyRejection::ParameterMismatch.into());
        }
        Ok(kek)
    }

    /// Derives the agreed-upon key from the recipient's private key and the
    /// header's ephemeral public key.
    fn agreed_upon_key(
        &self,
        encryption: Encryption,
        key: &WebKey,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let algorithm = self.header.algorithm();
        let epk = self
            .header
            .ephemeral_key()?
            .ok_or_else(|| Error::header_invalid("epk is required"))?;
        let apu = self.header.agreement_party_uinfo()?.unwrap_or_default();
        let apv = self.header.agreement_party_vinfo()?.unwrap_or_default();

        let z = key.agree(&epk)?;
        let (alg_id, key_bits) = if algorithm == Algorithm::EcdhEs {
            (encryption.name().as_bytes(), encryption.cek_size())
        } else {
            (algorithm.name().as_bytes(), algorithm.size())
        };
        Ok(kdf::concat_kdf(&z, alg_id, &apu, &apv, key_bits))
    }
}

/// An encrypted message: one ciphertext shared by one or more recipients,
/// as defined in [`rfc7516`].
///
/// The exact base64url text of the shared protected header is retained and
/// re-used as AEAD additional data during decryption.
///
/// [`rfc7516`]: https://datatracker.ietf.org/doc/html/rfc7516
#[derive(Debug, Clone, PartialEq)]
pub struct WebEncryption {
    encryption: Encryption,
    deflate: bool,
    protected_b64: Option<String>,
    unprotected: Option<Map<String, Value>>,
    recipients: Vec<JweRecipient>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
    aad: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct RecipientWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encrypted_key: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct JweWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    protected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unprotected: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipients: Option<Vec<RecipientWire>>,
    // flattened serialization
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encrypted_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
    ciphertext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aad: Option<String>,
}

impl WebEncryption {
    /// Starts a new encrypted message.
    #[must_use]
    pub fn builder(encryption: Encryption, deflate: bool) -> JweBuilder {
        JweBuilder::new(encryption, deflate)
    }

    /// The content-encryption algorithm.
    #[must_use]
    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    /// True if the plaintext was DEFLATE-compressed before encryption.
    #[must_use]
    pub fn is_deflate(&self) -> bool {
        self.deflate
    }

    /// The message recipients.
    #[must_use]
    pub fn recipients(&self) -> &[JweRecipient] {
        &self.recipients
    }

    /// The shared initialization vector.
    #[must_use]
    pub fn initialization_vector(&self) -> &[u8] {
        &self.iv
    }

    /// The shared ciphertext.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// The shared authentication tag.
    #[must_use]
    pub fn authentication_tag(&self) -> &[u8] {
        &self.tag
    }

    /// The additional authenticated data, if any.
    #[must_use]
    pub fn additional_data(&self) -> Option<&[u8]> {
        self.aad.as_deref()
    }

    /// Parses a compact or JSON-serialized JWE.
    pub fn parse(jwe: &str) -> Result<Self, Error> {
        if jwe.trim_start().starts_with('{') {
            Self::from_wire(serde_json::from_str(jwe)?)
        } else {
            let mut parts = jwe.split('.');
            let (Some(protected), Some(encrypted_key), Some(iv), Some(ciphertext), Some(tag)) = (
                parts.next(),
                parts.next(),
                parts.next(),
                parts.next(),
                parts.next(),
            ) else {
                return Err(Error::MalformedEncoding(OpaqueError::from_display(
                    "compact JWE requires exactly five segments",
                )));
            };
            if parts.next().is_some() {
                return Err(Error::MalformedEncoding(OpaqueError::from_display(
                    "compact JWE requires exactly five segments",
                )));
            }
            Self::from_wire(JweWire {
                protected: Some(protected.to_owned()),
                unprotected: None,
                recipients: None,
                header: None,
                encrypted_key: (!encrypted_key.is_empty())
                    .then(|| encrypted_key.to_owned()),
                iv: Some(iv.to_owned()),
                ciphertext: ciphertext.to_owned(),
                tag: Some(tag.to_owned()),
                aad: None,
            })
        }
    }

    fn from_wire(wire: JweWire) -> Result<Self, Error> {
        let protected_map = match &wire.protected {
            Some(encoded) => {
                let decoded = from_base64_url(encoded)?;
                Some(serde_json::from_slice::<Map<String, Value>>(&decoded)?)
            }
            None => None,
        };

        let recipient_entries = match (wire.recipients, wire.header, wire.encrypted_key) {
            (Some(entries), None, None) => entries,
            (Some(_), _, _) => {
                return Err(Error::MalformedEncoding(OpaqueError::from_display(
                    "must not contain both recipients and a flattened recipient",
                )));
            }
            (None, header, encrypted_key) => vec![RecipientWire {
                header,
                encrypted_key,
            }],
        };

        let mut recipients = Vec::with_capacity(recipient_entries.len());
        for entry in recipient_entries {
            let mut merged = protected_map.clone().unwrap_or_default();
            if let Some(shared) = &wire.unprotected {
                merge_disjoint(&mut merged, shared)?;
            }
            if let Some(own) = &entry.header {
                merge_disjoint(&mut merged, own)?;
            }
            recipients.push(JweRecipient {
                header: WebCryptoHeader::from_map(&merged)?,
                per_recipient: entry.header,
                encrypted_key: entry
                    .encrypted_key
                    .as_deref()
                    .map(from_base64_url)
                    .transpose()?,
            });
        }

        let first = recipients
            .first()
            .ok_or_else(|| Error::header_invalid("at least one recipient is required"))?;
        let encryption = first
            .header
            .encryption()?
            .ok_or_else(|| Error::header_invalid("missing enc header parameter"))?;
        let deflate = first.header.is_deflate();

        Ok(Self {
            encryption,
            deflate,
            protected_b64: wire.protected,
            unprotected: wire.unprotected,
            recipients,
            iv: wire.iv.as_deref().map(from_base64_url).transpose()?.unwrap_or_default(),
            ciphertext: from_base64_url(&wire.ciphertext)?,
            tag: wire.tag.as_deref().map(from_base64_url).transpose()?.unwrap_or_default(),
            aad: wire.aad.as_deref().map(from_base64_url).transpose()?,
        })
    }

    /// The compact serialization: exactly five base64url segments.
    ///
    /// Requires a single recipient, no shared unprotected header, and no
    /// additional authenticated data.
    pub fn compact(&self) -> Result<String, Error> {
        let [recipient] = self.recipients.as_slice() else {
            return Err(Error::header_invalid(
                "compact serialization requires exactly one recipient",
            ));
        };
        if self.unprotected.is_some() || self.aad.is_some() {
            return Err(Error::header_invalid(
                "compact serialization does not support unprotected headers or aad",
            ));
        }
        Ok(format!(
            "{}.{}.{}.{}.{}",
            self.protected_b64.as_deref().unwrap_or_default(),
            recipient
                .encrypted_key
                .as_deref()
                .map(base64_url)
                .unwrap_or_default(),
            base64_url(&self.iv),
            base64_url(&self.ciphertext),
            base64_url(&self.tag),
        ))
    }

    /// The JSON serialization; flattened for a single recipient, general
    /// with a `recipients` array otherwise.
    pub fn to_json(&self) -> Result<String, Error> {
        let mut wire = JweWire {
            protected: self.protected_b64.clone(),
            unprotected: self.unprotected.clone(),
            recipients: None,
            header: None,
            encrypted_key: None,
            iv: Some(base64_url(&self.iv)),
            ciphertext: base64_url(&self.ciphertext),
            tag: Some(base64_url(&self.tag)),
            aad: self.aad.as_deref().map(base64_url),
        };
        if let [recipient] = self.recipients.as_slice() {
            wire.header = recipient.per_recipient.clone();
            wire.encrypted_key = recipient.encrypted_key.as_deref().map(base64_url);
        } else {
            wire.recipients = Some(
                self.recipients
                    .iter()
                    .map(|recipient| RecipientWire {
                        header: recipient.per_recipient.clone(),
                        encrypted_key: recipient.encrypted_key.as_deref().map(base64_url),
                    })
                    .collect(),
            );
        }
        serde_json::to_string(&wire).map_err(Error::from)
    }

    /// Decrypts the message with the given recipient key, using the default
    /// inflate limit.
    pub fn decrypt(&self, key: &WebKey) -> Result<Vec<u8>, Error> {
        self.decrypt_with_limit(key, DEFAULT_INFLATE_LIMIT)
    }

    /// Decrypts the message with the given recipient key, capping inflated
    /// plaintext at `max_inflated` bytes.
    ///
    /// Authentication failures, wrap failures, and unmatched recipients all
    /// surface as the generic [`Error::DecryptionFailed`].
    pub fn decrypt_with_limit(
        &self,
        key: &WebKey,
        max_inflated: usize,
    ) -> Result<Vec<u8>, Error> {
        let mut cek = None;
        for recipient in &self.recipients {
            match recipient.decrypt_cek(self.encryption, key) {
                Ok(found) => {
                    // 5.2#12 record CEK decryption success
                    tracing::debug!("content encryption key recovered");
                    cek = Some(found);
                    break;
                }
                Err(err) => {
                    // 5.2#12 record CEK decryption failure and keep going
                    tracing::debug!("recipient key unwrap failed: {err}");
                }
            }
        }

        // rfc7516 section 11.5: proceed with a random key that will not
        // work, so mismatched recipients and bad tags are indistinguishable
        let cek = match cek {
            Some(cek) => cek,
            None => {
                let mut random = Zeroizing::new(vec![0u8; (self.encryption.cek_size() / 8) as usize]);
                OsRng.fill_bytes(&mut random);
                random
            }
        };

        let aad = self.aad_bytes();
        let content = content::decrypt(
            self.encryption,
            &cek,
            &self.iv,
            &self.ciphertext,
            &self.tag,
            &aad,
        )?;

        if self.deflate {
            inflate(&content, max_inflated)
        } else {
            Ok(content)
        }
    }

    /// AEAD additional data:
    /// `ASCII(BASE64URL(protected))` or
    /// `ASCII(BASE64URL(protected) "." BASE64URL(aad))`.
    fn aad_bytes(&self) -> Vec<u8> {
        let mut aad = self
            .protected_b64
            .clone()
            .unwrap_or_default()
            .into_bytes();
        if let Some(extra) = &self.aad {
            aad.push(b'.');
            aad.extend_from_slice(base64_url(extra).as_bytes());
        }
        aad
    }
}

fn merge_disjoint(
    target: &mut Map<String, Value>,
    source: &Map<String, Value>,
) -> Result<(), Error> {
    for (name, value) in source {
        if target.insert(name.clone(), value.clone()).is_some() {
            return Err(Error::MalformedEncoding(OpaqueError::from_display(
                "header parameter present in more than one header section",
            )));
        }
    }
    Ok(())
}

/// Validates that a key may be used with a key-management algorithm.
fn check_encryption_key(algorithm: Algorithm, key: &WebKey) -> Result<(), Error> {
    if algorithm.key_use() != KeyUse::Encrypt {
        return Err(Error::header_invalid("not a key management algorithm"));
    }
    if !algorithm.key_types().contains(&key.key_type()) {
        return Err(KeyRejection::TypeMismatch.into());
    }
    if let Some(bound) = key.algorithm()
        && bound != algorithm
    {
        return Err(KeyRejection::TypeMismatch.into());
    }
    if key
        .key_use()
        .is_some_and(|key_use| key_use != KeyUse::Encrypt)
    {
        return Err(KeyRejection::UseMismatch.into());
    }
    Ok(())
}

fn inflate(content: &[u8], max_inflated: usize) -> Result<Vec<u8>, Error> {
    let mut inflated = Vec::new();
    let mut decoder = DeflateDecoder::new(content).take(max_inflated as u64 + 1);
    decoder
        .read_to_end(&mut inflated)
        .map_err(|_| Error::MalformedEncoding(OpaqueError::from_display("inflate content")))?;
    if inflated.len() > max_inflated {
        return Err(Error::MalformedEncoding(OpaqueError::from_display(
            "inflated content exceeds the configured limit",
        )));
    }
    Ok(inflated)
}

fn deflate_content(plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    let mut deflated = Vec::new();
    DeflateEncoder::new(plaintext, Compression::default())
        .read_to_end(&mut deflated)
        .map_err(|_| Error::MalformedEncoding(OpaqueError::from_display("deflate content")))?;
    Ok(deflated)
}

/// Builds the header and key-management state for one recipient.
///
/// Created through [`JweBuilder::add_recipient`] composition:
/// configure the recipient, then hand it to the message builder.
#[derive(Debug, Clone)]
pub struct JweRecipientBuilder {
    header: HeaderBuilder,
}

impl JweRecipientBuilder {
    /// Create a recipient for the given key-management algorithm.
    #[must_use]
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            header: HeaderBuilder::new(algorithm),
        }
    }

    /// Set the recipient key without serializing it into the header.
    ///
    /// Key wrap and direct algorithms take a symmetric key, the RSA family
    /// a public key, ECDH-ES the recipient's static public key, and PBES2
    /// a raw key holding the passphrase bytes.
    #[must_use]
    pub fn key(mut self, key: WebKey) -> Self {
        self.header = self.header.with_key(key);
        self
    }

    /// Set the recipient key and embed its well-known projection as `jwk`.
    #[must_use]
    pub fn well_known(mut self, key: WebKey) -> Self {
        self.header = self.header.with_well_known(key);
        self
    }

    /// Set the recipient key ID.
    #[must_use]
    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.header = self.header.with_key_id(key_id);
        self
    }

    /// Set the header type.
    #[must_use]
    pub fn header_type(mut self, typ: impl Into<String>) -> Self {
        self.header = self.header.with_header_type(typ);
        self
    }

    /// Set the content type.
    #[must_use]
    pub fn content_type(mut self, cty: impl Into<String>) -> Self {
        self.header = self.header.with_content_type(cty);
        self
    }

    /// Declare critical parameter names.
    #[must_use]
    pub fn critical<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = self.header.with_critical(names);
        self
    }

    /// Set an extended header parameter.
    pub fn try_with_param(
        mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, Error> {
        self.header = self.header.try_with_param(name, value)?;
        Ok(self)
    }

    fn binary_param(&self, name: &str) -> Result<Vec<u8>, Error> {
        match self.header.param(name) {
            Some(Value::String(encoded)) => from_base64_url(encoded),
            Some(_) => Err(Error::header_invalid(format!("{name} must be a string"))),
            None => Ok(Vec::new()),
        }
    }

    /// Generates the ephemeral key pair for ECDH-ES, records the `epk`
    /// header parameter, and derives the agreed-upon key.
    fn agree_ephemeral(
        &mut self,
        encryption: Encryption,
        recipient: &WebKey,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let algorithm = self.header.algorithm();
        let key_type = recipient.key_type();
        let ephemeral = WebKey::builder(key_type)
            .with_material(generate_material(key_type, 0)?)
            .build()?;
        self.header.insert_param(
            "epk",
            serde_json::to_value(ephemeral.well_known())?,
        );

        let apu = self.binary_param("apu")?;
        let apv = self.binary_param("apv")?;
        let z = ephemeral.agree(recipient)?;

        let (alg_id, key_bits) = if algorithm == Algorithm::EcdhEs {
            (encryption.name().as_bytes(), encryption.cek_size())
        } else {
            (algorithm.name().as_bytes(), algorithm.size())
        };
        Ok(kdf::concat_kdf(&z, alg_id, &apu, &apv, key_bits))
    }

    /// Encrypts the CEK to this recipient, recording any per-recipient
    /// parameters (epk, iv/tag, p2s/p2c) in the header.
    fn encrypt_cek(
        &mut self,
        agreed: Option<&Zeroizing<Vec<u8>>>,
        cek: &[u8],
        key: &WebKey,
    ) -> Result<Option<Vec<u8>>, Error> {
        let algorithm = self.header.algorithm();
        match algorithm {
            // 5.1#5 no encrypted key for direct key agreement or encryption
            Algorithm::Direct | Algorithm::EcdhEs => Ok(None),
            Algorithm::A128KW | Algorithm::A192KW | Algorithm::A256KW => {
                let kek = key
                    .raw_key()
                    .ok_or(KeyRejection::MissingMaterial("secret key"))?;
                if kek.len() != (algorithm.size() / 8) as usize {
                    return Err(KeyRejection::ParameterMismatch.into());
                }
                content::aes_wrap_key(kek, cek).map(Some)
            }
            Algorithm::A128GCMKW | Algorithm::A192GCMKW | Algorithm::A256GCMKW => {
                let kek = key
                    .raw_key()
                    .ok_or(KeyRejection::MissingMaterial("secret key"))?;
                if kek.len() != (algorithm.size() / 8) as usize {
                    return Err(KeyRejection::ParameterMismatch.into());
                }
                let (iv, wrapped, tag) = content::gcm_wrap_key(kek, cek)?;
                self.header
                    .insert_param("iv", Value::String(base64_url(&iv)));
                self.header
                    .insert_param("tag", Value::String(base64_url(&tag)));
                Ok(Some(wrapped))
            }
            Algorithm::Rsa1_5 => key
                .rsa_public()?
                .encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, cek)
                .map(Some)
                .map_err(|_| Error::DecryptionFailed),
            Algorithm::RsaOaep => key
                .rsa_public()?
                .encrypt(&mut OsRng, rsa::Oaep::new::<sha1::Sha1>(), cek)
                .map(Some)
                .map_err(|_| Error::DecryptionFailed),
            Algorithm::RsaOaep256 => key
                .rsa_public()?
                .encrypt(&mut OsRng, rsa::Oaep::new::<sha2::Sha256>(), cek)
                .map(Some)
                .map_err(|_| Error::DecryptionFailed),
            Algorithm::EcdhEsA128Kw | Algorithm::EcdhEsA192Kw | Algorithm::EcdhEsA256Kw => {
                let agreed = agreed.ok_or(KeyRejection::MissingMaterial("agreed key"))?;
                content::aes_wrap_key(agreed, cek).map(Some)
            }
            Algorithm::Pbes2Hs256A128Kw | Algorithm::Pbes2Hs384A192Kw
            | Algorithm::Pbes2Hs512A256Kw => {
                let passphrase = key
                    .raw_key()
                    .ok_or(KeyRejection::MissingMaterial("passphrase"))?;
                let mut p2s = vec![0u8; (algorithm.size() / 8) as usize];
                OsRng.fill_bytes(&mut p2s);
                // 128 -> 2048, 192 -> 3072, 256 -> 4096
                let p2c = algorithm.size() * 16;
                self.header
                    .insert_param("p2s", Value::String(base64_url(&p2s)));
                self.header.insert_param("p2c", Value::from(p2c));
                let kek = kdf::pbes2_derive(algorithm, passphrase, &p2s, p2c)?;
                content::aes_wrap_key(&kek, cek).map(Some)
            }
            _ => Err(Error::header_invalid("not a key management algorithm")),
        }
    }
}

/// Collects inputs for an encrypted message: the content-encryption
/// algorithm, compression, header protection rules, and recipients.
pub struct JweBuilder {
    encryption: Encryption,
    deflate: bool,
    compact: bool,
    protect: BTreeSet<String>,
    aad: Option<Vec<u8>>,
    recipients: Vec<JweRecipientBuilder>,
}

impl JweBuilder {
    fn new(encryption: Encryption, deflate: bool) -> Self {
        Self {
            encryption,
            deflate,
            compact: false,
            protect: BTreeSet::new(),
            aad: None,
            recipients: Vec::new(),
        }
    }

    /// Protects all header parameters except `jwk` and restricts the
    /// message to a single recipient, as required for compact
    /// serialization.
    #[must_use]
    pub fn compact(mut self) -> Self {
        self.compact = true;
        self
    }

    /// Declares standard parameters as shared-protected.
    #[must_use]
    pub fn protect_params(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.protect
            .extend(params.into_iter().map(|param| param.name().to_owned()));
        self
    }

    /// Declares extended parameter names as shared-protected.
    #[must_use]
    pub fn protect<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protect.extend(names.into_iter().map(Into::into));
        self
    }

    /// Provides additional authenticated data for the content encryption.
    #[must_use]
    pub fn aad(mut self, additional_data: impl Into<Vec<u8>>) -> Self {
        self.aad = Some(additional_data.into());
        self
    }

    /// Adds a recipient.
    #[must_use]
    pub fn add_recipient(mut self, recipient: JweRecipientBuilder) -> Self {
        self.recipients.push(recipient);
        self
    }

    /// Encrypts the plaintext for every recipient.
    pub fn encrypt(self, plaintext: impl AsRef<[u8]>) -> Result<WebEncryption, Error> {
        let encryption = self.encryption;
        if self.recipients.is_empty() {
            return Err(Error::header_invalid("at least one recipient is required"));
        }
        if self.compact && self.recipients.len() != 1 {
            return Err(Error::header_invalid(
                "compact serialization requires exactly one recipient",
            ));
        }
        if self.compact && self.aad.is_some() {
            return Err(Error::header_invalid(
                "compact serialization does not support aad",
            ));
        }

        // establish the CEK: direct and direct-agreement recipients pin it,
        // otherwise one random CEK is generated and wrapped per recipient
        fn pin(
            pinned: &mut Option<Zeroizing<Vec<u8>>>,
            cek: Zeroizing<Vec<u8>>,
        ) -> Result<(), Error> {
            match pinned {
                Some(existing) if existing[..] != cek[..] => Err(Error::header_invalid(
                    "cannot use different content encryption keys for multiple recipients",
                )),
                _ => {
                    *pinned = Some(cek);
                    Ok(())
                }
            }
        }
        let mut pinned: Option<Zeroizing<Vec<u8>>> = None;

        struct Prepared {
            builder: JweRecipientBuilder,
            key: WebKey,
            agreed: Option<Zeroizing<Vec<u8>>>,
        }

        let mut prepared = Vec::with_capacity(self.recipients.len());
        for mut recipient in self.recipients {
            recipient
                .header
                .insert_param("enc", Value::String(encryption.name().to_owned()));
            if self.deflate {
                recipient
                    .header
                    .insert_param("zip", Value::String("DEF".to_owned()));
            }

            let algorithm = recipient.header.algorithm();
            let key = recipient.header.operation_key()?.clone();
            key.verify()?;
            check_encryption_key(algorithm, &key)?;

            let agreed = match algorithm {
                Algorithm::Direct => {
                    // 5.1#6 use the shared key as CEK for direct encryption
                    let cek = key
                        .raw_key()
                        .ok_or(KeyRejection::MissingMaterial("secret key"))?;
                    if cek.len() != (encryption.cek_size() / 8) as usize {
                        return Err(KeyRejection::ParameterMismatch.into());
                    }
                    pin(&mut pinned, Zeroizing::new(cek.to_vec()))?;
                    None
                }
                Algorithm::EcdhEs => {
                    let agreed = recipient.agree_ephemeral(encryption, &key)?;
                    pin(&mut pinned, agreed)?;
                    None
                }
                Algorithm::EcdhEsA128Kw | Algorithm::EcdhEsA192Kw | Algorithm::EcdhEsA256Kw => {
                    Some(recipient.agree_ephemeral(encryption, &key)?)
                }
                _ => None,
            };
            prepared.push(Prepared {
                builder: recipient,
                key,
                agreed,
            });
        }

        let cek = match pinned {
            Some(cek) => cek,
            None => {
                let mut cek = Zeroizing::new(vec![0u8; (encryption.cek_size() / 8) as usize]);
                OsRng.fill_bytes(&mut cek);
                cek
            }
        };

        // 5.1#4 encrypt the CEK to each recipient and serialize headers
        let mut headers = Vec::with_capacity(prepared.len());
        let mut encrypted_keys = Vec::with_capacity(prepared.len());
        for entry in &mut prepared {
            let encrypted_key =
                entry
                    .builder
                    .encrypt_cek(entry.agreed.as_ref(), &cek, &entry.key)?;
            let header = entry.builder.header.build()?;
            let mut map = header.to_map()?;
            if self.compact {
                // compact form protects everything except inline key material
                map.remove("jwk");
            }
            headers.push((header, map));
            encrypted_keys.push(encrypted_key);
        }

        // shared header: parameters present with equal values everywhere
        let mut shared = headers[0].1.clone();
        for (_, map) in &headers[1..] {
            shared.retain(|name, value| map.get(name).is_some_and(|other| *other == *value));
        }

        let protected: Map<String, Value> = if self.compact {
            shared.clone()
        } else {
            let mut protected = Map::new();
            for name in &self.protect {
                let value = shared.get(name).ok_or_else(|| {
                    Error::header_invalid(format!(
                        "protected parameter {name} is not shared by all recipients"
                    ))
                })?;
                protected.insert(name.clone(), value.clone());
            }
            protected
        };

        let unprotected: Option<Map<String, Value>> =
            if self.compact || headers.len() == 1 {
                None
            } else {
                let mut unprotected = shared.clone();
                unprotected.retain(|name, _| !protected.contains_key(name));
                (!unprotected.is_empty()).then_some(unprotected)
            };

        let protected_b64 = (!protected.is_empty())
            .then(|| Ok::<_, Error>(base64_url(serde_json::to_vec(&protected)?)))
            .transpose()?;

        let mut recipients = Vec::with_capacity(headers.len());
        for ((header, map), encrypted_key) in headers.into_iter().zip(encrypted_keys) {
            let mut own = map;
            own.retain(|name, _| {
                !protected.contains_key(name)
                    && !unprotected
                        .as_ref()
                        .is_some_and(|shared| shared.contains_key(name))
            });
            recipients.push(JweRecipient {
                header,
                per_recipient: (!own.is_empty()).then_some(own),
                encrypted_key,
            });
        }

        // 5.1#11 compress content if requested
        let content = if self.deflate {
            deflate_content(plaintext.as_ref())?
        } else {
            plaintext.as_ref().to_vec()
        };

        // 5.1#13..15 protected header is the AEAD additional data
        let mut aad = protected_b64.clone().unwrap_or_default().into_bytes();
        if let Some(extra) = &self.aad {
            aad.push(b'.');
            aad.extend_from_slice(base64_url(extra).as_bytes());
        }

        let (iv, ciphertext, tag) = content::encrypt(encryption, &cek, &content, &aad)?;

        Ok(WebEncryption {
            encryption,
            deflate: self.deflate,
            protected_b64,
            unprotected,
            recipients,
            iv,
            ciphertext,
            tag,
            aad: self.aad,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_err;

    use super::*;
    use crate::jose::KeyType;
    use crate::jose::jwk::fixtures::RFC7515_RSA_JWK;

    fn recipient_key(algorithm: Algorithm) -> WebKey {
        match algorithm {
            Algorithm::Rsa1_5 | Algorithm::RsaOaep | Algorithm::RsaOaep256 => {
                WebKey::parse_jwk(RFC7515_RSA_JWK).unwrap()
            }
            _ => WebKey::ephemeral(algorithm).unwrap(),
        }
    }

    fn key_for(algorithm: Algorithm, encryption: Encryption) -> WebKey {
        if algorithm == Algorithm::Direct {
            WebKey::ephemeral_content_key(encryption).unwrap()
        } else {
            recipient_key(algorithm)
        }
    }

    const KEY_MANAGEMENT: &[Algorithm] = &[
        Algorithm::Direct,
        Algorithm::A128KW,
        Algorithm::A192KW,
        Algorithm::A256KW,
        Algorithm::A128GCMKW,
        Algorithm::A192GCMKW,
        Algorithm::A256GCMKW,
        Algorithm::Rsa1_5,
        Algorithm::RsaOaep,
        Algorithm::RsaOaep256,
        Algorithm::EcdhEs,
        Algorithm::EcdhEsA128Kw,
        Algorithm::EcdhEsA192Kw,
        Algorithm::EcdhEsA256Kw,
        Algorithm::Pbes2Hs256A128Kw,
        Algorithm::Pbes2Hs384A192Kw,
        Algorithm::Pbes2Hs512A256Kw,
    ];

    #[test]
    fn round_trip_for_every_key_management_and_content_pair() {
        for algorithm in KEY_MANAGEMENT {
            for encryption in Encryption::ALL {
                let key = key_for(*algorithm, *encryption);
                let message = WebEncryption::builder(*encryption, false)
                    .compact()
                    .add_recipient(JweRecipientBuilder::new(*algorithm).key(key.clone()))
                    .encrypt(b"the plaintext")
                    .unwrap();
                let compact = message.compact().unwrap();
                assert_eq!(compact.matches('.').count(), 4, "{algorithm:?}");

                let parsed = WebEncryption::parse(&compact).unwrap();
                assert_eq!(
                    parsed.decrypt(&key).unwrap(),
                    b"the plaintext",
                    "{algorithm:?}/{encryption:?}"
                );
            }
        }
    }

    #[test]
    fn deflate_round_trip_across_sizes() {
        let key = WebKey::ephemeral(Algorithm::A256KW).unwrap();
        for plaintext in [
            Vec::new(),
            b"tiny".to_vec(),
            vec![0x5Au8; 100_000],
        ] {
            let message = WebEncryption::builder(Encryption::A128CbcHs256, true)
                .compact()
                .add_recipient(JweRecipientBuilder::new(Algorithm::A256KW).key(key.clone()))
                .encrypt(&plaintext)
                .unwrap();
            assert!(message.is_deflate());
            let parsed = WebEncryption::parse(&message.compact().unwrap()).unwrap();
            assert!(parsed.is_deflate());
            assert_eq!(parsed.decrypt(&key).unwrap(), plaintext);
        }
    }

    #[test]
    fn inflate_limit_is_enforced() {
        let key = WebKey::ephemeral(Algorithm::A128KW).unwrap();
        let message = WebEncryption::builder(Encryption::A128GCM, true)
            .compact()
            .add_recipient(JweRecipientBuilder::new(Algorithm::A128KW).key(key.clone()))
            .encrypt(vec![0u8; 64 * 1024])
            .unwrap();
        assert!(matches!(
            message.decrypt_with_limit(&key, 1024),
            Err(Error::MalformedEncoding(_))
        ));
        assert_eq!(message.decrypt(&key).unwrap().len(), 64 * 1024);
    }

    #[test]
    fn multi_recipient_shares_ciphertext_with_independent_keys() {
        let kw_key = WebKey::ephemeral(Algorithm::A128KW).unwrap();
        let rsa_key = WebKey::parse_jwk(RFC7515_RSA_JWK).unwrap();

        let message = WebEncryption::builder(Encryption::A256GCM, false)
            .add_recipient(JweRecipientBuilder::new(Algorithm::A128KW).key(kw_key.clone()))
            .add_recipient(
                JweRecipientBuilder::new(Algorithm::RsaOaep256).key(rsa_key.clone()),
            )
            .encrypt(b"fan out")
            .unwrap();

        assert_eq!(message.recipients().len(), 2);
        let keys: Vec<_> = message
            .recipients()
            .iter()
            .map(|recipient| recipient.encrypted_key().unwrap().to_vec())
            .collect();
        assert_ne!(keys[0], keys[1]);

        let serialized = message.to_json().unwrap();
        let parsed = WebEncryption::parse(&serialized).unwrap();
        assert_eq!(parsed.recipients().len(), 2);
        assert_eq!(parsed.ciphertext(), message.ciphertext());
        assert_eq!(parsed.decrypt(&kw_key).unwrap(), b"fan out");
        assert_eq!(parsed.decrypt(&rsa_key).unwrap(), b"fan out");
    }

    #[test]
    fn wrong_key_fails_closed() {
        let key = WebKey::parse_jwk(RFC7515_RSA_JWK).unwrap();
        let message = WebEncryption::builder(Encryption::A128GCM, false)
            .compact()
            .add_recipient(JweRecipientBuilder::new(Algorithm::RsaOaep256).key(key.clone()))
            .encrypt(b"secret")
            .unwrap();
        let parsed = WebEncryption::parse(&message.compact().unwrap()).unwrap();
        assert_eq!(parsed.decrypt(&key).unwrap(), b"secret");

        let other = WebKey::ephemeral(Algorithm::RsaOaep256).unwrap();
        assert!(matches!(
            parsed.decrypt(&other),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn gcm_key_wrap_records_per_recipient_iv_and_tag() {
        let key = WebKey::ephemeral(Algorithm::A256GCMKW).unwrap();
        let message = WebEncryption::builder(Encryption::A128GCM, false)
            .compact()
            .add_recipient(JweRecipientBuilder::new(Algorithm::A256GCMKW).key(key.clone()))
            .encrypt(b"wrapped")
            .unwrap();
        let parsed = WebEncryption::parse(&message.compact().unwrap()).unwrap();
        let header = parsed.recipients()[0].header();
        assert_eq!(header.initialization_vector().unwrap().unwrap().len(), 12);
        assert_eq!(header.authentication_tag().unwrap().unwrap().len(), 16);
        assert_eq!(parsed.decrypt(&key).unwrap(), b"wrapped");
    }

    #[test]
    fn pbes2_records_salt_and_count() {
        let passphrase = WebKey::ephemeral(Algorithm::Pbes2Hs256A128Kw).unwrap();
        let message = WebEncryption::builder(Encryption::A128CbcHs256, false)
            .compact()
            .add_recipient(
                JweRecipientBuilder::new(Algorithm::Pbes2Hs256A128Kw).key(passphrase.clone()),
            )
            .encrypt(b"password protected")
            .unwrap();
        let parsed = WebEncryption::parse(&message.compact().unwrap()).unwrap();
        let header = parsed.recipients()[0].header();
        assert_eq!(header.pbes2_salt().unwrap().unwrap().len(), 16);
        assert_eq!(header.pbes2_count().unwrap(), Some(2048));
        assert_eq!(parsed.decrypt(&passphrase).unwrap(), b"password protected");
    }

    #[test]
    fn ecdh_es_carries_an_ephemeral_key_per_recipient() {
        let key = WebKey::ephemeral(Algorithm::EcdhEs).unwrap();
        let message = WebEncryption::builder(Encryption::A256GCM, false)
            .compact()
            .add_recipient(
                JweRecipientBuilder::new(Algorithm::EcdhEs)
                    .key(key.clone())
                    .try_with_param("apu", base64_url(b"Alice"))
                    .unwrap()
                    .try_with_param("apv", base64_url(b"Bob"))
                    .unwrap(),
            )
            .encrypt(b"agreed")
            .unwrap();
        let parsed = WebEncryption::parse(&message.compact().unwrap()).unwrap();
        let recipient = &parsed.recipients()[0];
        assert!(recipient.encrypted_key().is_none());
        let epk = recipient.header().ephemeral_key().unwrap().unwrap();
        assert_eq!(epk.key_type(), KeyType::X25519);
        assert!(!epk.has_private_key());
        assert_eq!(parsed.decrypt(&key).unwrap(), b"agreed");
    }

    #[test]
    fn ecdh_es_works_on_nist_curves() {
        for (algorithm, key_type) in [
            (Algorithm::EcdhEs, KeyType::EcP256),
            (Algorithm::EcdhEsA128Kw, KeyType::EcP384),
            (Algorithm::EcdhEsA256Kw, KeyType::EcP521),
        ] {
            let key = WebKey::builder(key_type)
                .with_material(generate_material(key_type, 0).unwrap())
                .build()
                .unwrap();
            let message = WebEncryption::builder(Encryption::A128GCM, false)
                .compact()
                .add_recipient(JweRecipientBuilder::new(algorithm).key(key.clone()))
                .encrypt(b"nist")
                .unwrap();
            let parsed = WebEncryption::parse(&message.compact().unwrap()).unwrap();
            assert_eq!(parsed.decrypt(&key).unwrap(), b"nist", "{algorithm:?}");
        }
    }

    #[test]
    fn aad_is_authenticated_in_json_serialization() {
        let key = WebKey::ephemeral(Algorithm::A128KW).unwrap();
        let message = WebEncryption::builder(Encryption::A128GCM, false)
            .add_recipient(JweRecipientBuilder::new(Algorithm::A128KW).key(key.clone()))
            .aad(b"shared state".to_vec())
            .encrypt(b"with aad")
            .unwrap();
        assert_err!(message.compact());

        let serialized = message.to_json().unwrap();
        let parsed = WebEncryption::parse(&serialized).unwrap();
        assert_eq!(parsed.additional_data(), Some(b"shared state".as_slice()));
        assert_eq!(parsed.decrypt(&key).unwrap(), b"with aad");

        // tampering with the aad breaks authentication
        let tampered = serialized.replace(
            &base64_url(b"shared state"),
            &base64_url(b"shared skate"),
        );
        let parsed = WebEncryption::parse(&tampered).unwrap();
        assert!(matches!(parsed.decrypt(&key), Err(Error::DecryptionFailed)));
    }

    #[test]
    fn direct_key_must_match_the_cek_size() {
        let short = WebKey::ephemeral_content_key(Encryption::A128GCM).unwrap();
        let result = WebEncryption::builder(Encryption::A256GCM, false)
            .compact()
            .add_recipient(JweRecipientBuilder::new(Algorithm::Direct).key(short))
            .encrypt(b"mismatch");
        assert!(matches!(
            result,
            Err(Error::KeyInvalid(KeyRejection::ParameterMismatch))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let key = WebKey::ephemeral(Algorithm::A128KW).unwrap();
        let message = WebEncryption::builder(Encryption::A128CbcHs256, false)
            .compact()
            .add_recipient(JweRecipientBuilder::new(Algorithm::A128KW).key(key.clone()))
            .encrypt(b"integrity")
            .unwrap();
        let compact = message.compact().unwrap();

        let mut parts: Vec<&str> = compact.split('.').collect();
        let mut ciphertext = from_base64_url(parts[3]).unwrap();
        ciphertext[0] ^= 1;
        let tampered = base64_url(&ciphertext);
        parts[3] = &tampered;
        let tampered = parts.join(".");
        let parsed = WebEncryption::parse(&tampered).unwrap();
        assert!(matches!(parsed.decrypt(&key), Err(Error::DecryptionFailed)));
    }
}
