use std::collections::BTreeSet;
use std::fmt;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use ed25519_dalek::Signer as _;
use ed25519_dalek::Verifier as _;
use hmac::{Hmac, Mac};
use hmac::digest::KeyInit;
use p256::elliptic_curve::sec1::{FromEncodedPoint as _, ToEncodedPoint as _};
use rand_core::{OsRng, RngCore as _};
use rsa::BigUint;
use rsa::traits::{PrivateKeyParts as _, PublicKeyParts as _};
use rustls_pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use sigil_error::{ErrorContext as _, OpaqueError};
use x509_parser::prelude::FromDer as _;
use zeroize::Zeroizing;

use crate::jose::encoding::{base64_url, from_base64_url};
use crate::jose::{Algorithm, Encryption, Error, KeyRejection};
use crate::pem;

/// Key types as defined in [`rfc7518, section 6.1`] and [`rfc8037`].
///
/// Each variant fixes the standard `kty` family name and, for curve-bound
/// types, the `crv` parameter name used for interop serialization.
///
/// [`rfc7518, section 6.1`]: https://datatracker.ietf.org/doc/html/rfc7518#section-6.1
/// [`rfc8037`]: https://datatracker.ietf.org/doc/html/rfc8037
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// NIST P-256 elliptic curve
    EcP256,
    /// NIST P-384 elliptic curve
    EcP384,
    /// NIST P-521 elliptic curve
    EcP521,
    /// Edwards 25519 curve, for signing
    Ed25519,
    /// Edwards 448 curve, for signing
    Ed448,
    /// ECDH X25519 curve, for key agreement
    X25519,
    /// ECDH X448 curve, for key agreement
    X448,
    /// RSA encryption or RSASSA-PKCS1-v1_5 signing, minimum 2048 bit
    Rsa,
    /// RSASSA-PSS signing, minimum 2048 bit
    RsassaPss,
    /// Raw symmetric key data (octet sequence)
    Raw,
}

impl KeyType {
    /// All key types, in registry order.
    pub const ALL: &'static [Self] = &[
        Self::EcP256,
        Self::EcP384,
        Self::EcP521,
        Self::Ed25519,
        Self::Ed448,
        Self::X25519,
        Self::X448,
        Self::Rsa,
        Self::RsassaPss,
        Self::Raw,
    ];

    /// The JWK `kty` attribute value.
    #[must_use]
    pub fn kty(&self) -> &'static str {
        match self {
            Self::EcP256 | Self::EcP384 | Self::EcP521 => "EC",
            Self::Ed25519 | Self::Ed448 | Self::X25519 | Self::X448 => "OKP",
            Self::Rsa => "RSA",
            Self::RsassaPss => "RSASSA-PSS",
            Self::Raw => "oct",
        }
    }

    /// The JWK `crv` attribute value, for curve-bound types.
    #[must_use]
    pub fn crv(&self) -> Option<&'static str> {
        match self {
            Self::EcP256 => Some("P-256"),
            Self::EcP384 => Some("P-384"),
            Self::EcP521 => Some("P-521"),
            Self::Ed25519 => Some("Ed25519"),
            Self::Ed448 => Some("Ed448"),
            Self::X25519 => Some("X25519"),
            Self::X448 => Some("X448"),
            Self::Rsa | Self::RsassaPss | Self::Raw => None,
        }
    }

    /// Look up the key type for a `(kty, crv)` attribute pair.
    pub fn from_kty_crv(kty: &str, crv: Option<&str>) -> Result<Self, Error> {
        Self::ALL
            .iter()
            .find(|t| t.kty() == kty && t.crv() == crv)
            .copied()
            .ok_or_else(|| match crv {
                Some(crv) => Error::UnknownAlgorithm(format!("{kty}/{crv}")),
                None => Error::UnknownAlgorithm(kty.to_owned()),
            })
    }

    /// Field element width in bytes for EC coordinate serialization.
    pub(crate) fn field_size(&self) -> Option<usize> {
        match self {
            Self::EcP256 => Some(32),
            Self::EcP384 => Some(48),
            Self::EcP521 => Some(66),
            _ => None,
        }
    }
}

/// Public key use, mutually exclusive at the key level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUse {
    /// Used for digital signing.
    #[serde(rename = "sig")]
    Sign,
    /// Used for encryption.
    #[serde(rename = "enc")]
    Encrypt,
}

/// Key operations, serialized as JWK `key_ops` entries.
///
/// An operation set of two entries must be a complementary pair
/// (sign/verify, encrypt/decrypt, wrapKey/unwrapKey); the derive operations
/// only appear as singletons.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Compute digital signature or MAC.
    #[serde(rename = "sign")]
    Sign,
    /// Verify digital signature or MAC.
    #[serde(rename = "verify")]
    Verify,
    /// Encrypt content.
    #[serde(rename = "encrypt")]
    Encrypt,
    /// Decrypt content and validate decryption.
    #[serde(rename = "decrypt")]
    Decrypt,
    /// Encrypt key.
    #[serde(rename = "wrapKey")]
    WrapKey,
    /// Decrypt key and validate decryption.
    #[serde(rename = "unwrapKey")]
    UnwrapKey,
    /// Derive key.
    #[serde(rename = "deriveKey")]
    DeriveKey,
    /// Derive bits not to be used as a key.
    #[serde(rename = "deriveBits")]
    DeriveBits,
}

/// Private CRT parameters of an RSA key.
///
/// `d` plus the primes are required to perform private-key operations; the
/// remaining CRT values are carried for JWK round-trips when present.
#[derive(Clone)]
pub struct RsaPrivateParts {
    /// Private exponent.
    pub d: Zeroizing<Vec<u8>>,
    /// First prime factor.
    pub p: Option<Zeroizing<Vec<u8>>>,
    /// Second prime factor.
    pub q: Option<Zeroizing<Vec<u8>>>,
    /// First CRT exponent.
    pub dp: Option<Zeroizing<Vec<u8>>>,
    /// Second CRT exponent.
    pub dq: Option<Zeroizing<Vec<u8>>>,
    /// First CRT coefficient.
    pub qi: Option<Zeroizing<Vec<u8>>>,
}

impl PartialEq for RsaPrivateParts {
    fn eq(&self, other: &Self) -> bool {
        fn opt_eq(a: &Option<Zeroizing<Vec<u8>>>, b: &Option<Zeroizing<Vec<u8>>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a[..] == b[..],
                (None, None) => true,
                _ => false,
            }
        }
        self.d[..] == other.d[..]
            && opt_eq(&self.p, &other.p)
            && opt_eq(&self.q, &other.q)
            && opt_eq(&self.dp, &other.dp)
            && opt_eq(&self.dq, &other.dq)
            && opt_eq(&self.qi, &other.qi)
    }
}

impl Eq for RsaPrivateParts {}

impl fmt::Debug for RsaPrivateParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPrivateParts").finish_non_exhaustive()
    }
}

/// Key material, stored as JWK-model component bytes.
///
/// Secret components are zeroized on drop. Exactly one shape is valid per
/// [`KeyType`]; [`WebKey::verify`] enforces the pairing.
#[derive(Clone)]
pub enum KeyMaterial {
    /// Raw octet sequence (`oct`).
    Raw {
        /// Symmetric key bytes.
        k: Zeroizing<Vec<u8>>,
    },
    /// NIST elliptic-curve point and optional scalar (`EC`).
    Ec {
        /// X coordinate, fixed field width.
        x: Vec<u8>,
        /// Y coordinate, fixed field width.
        y: Vec<u8>,
        /// Private scalar.
        d: Option<Zeroizing<Vec<u8>>>,
    },
    /// Edwards/Montgomery public key and optional secret (`OKP`).
    Okp {
        /// Public key bytes.
        x: Vec<u8>,
        /// Private key (seed) bytes.
        d: Option<Zeroizing<Vec<u8>>>,
    },
    /// RSA modulus, public exponent and optional private parts.
    Rsa {
        /// Modulus, big-endian.
        n: Vec<u8>,
        /// Public exponent, big-endian.
        e: Vec<u8>,
        /// Private parts, when the key can decrypt/sign.
        private: Option<RsaPrivateParts>,
    },
}

impl KeyMaterial {
    fn has_private(&self) -> bool {
        match self {
            Self::Raw { .. } => true,
            Self::Ec { d, .. } => d.is_some(),
            Self::Okp { d, .. } => d.is_some(),
            Self::Rsa { private, .. } => private.is_some(),
        }
    }

    fn public_only(&self) -> Option<Self> {
        match self {
            Self::Raw { .. } => None,
            Self::Ec { x, y, .. } => Some(Self::Ec {
                x: x.clone(),
                y: y.clone(),
                d: None,
            }),
            Self::Okp { x, .. } => Some(Self::Okp {
                x: x.clone(),
                d: None,
            }),
            Self::Rsa { n, e, .. } => Some(Self::Rsa {
                n: n.clone(),
                e: e.clone(),
                private: None,
            }),
        }
    }

    /// True if the public halves of `self` and `other` describe the same key.
    fn public_matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ec { x, y, .. }, Self::Ec { x: ox, y: oy, .. }) => x == ox && y == oy,
            (Self::Okp { x, .. }, Self::Okp { x: ox, .. }) => x == ox,
            (Self::Rsa { n, e, .. }, Self::Rsa { n: on, e: oe, .. }) => n == on && e == oe,
            _ => false,
        }
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        fn opt_eq(a: &Option<Zeroizing<Vec<u8>>>, b: &Option<Zeroizing<Vec<u8>>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a[..] == b[..],
                (None, None) => true,
                _ => false,
            }
        }
        match (self, other) {
            (Self::Raw { k }, Self::Raw { k: ok }) => k[..] == ok[..],
            (Self::Ec { x, y, d }, Self::Ec { x: ox, y: oy, d: od }) => {
                x == ox && y == oy && opt_eq(d, od)
            }
            (Self::Okp { x, d }, Self::Okp { x: ox, d: od }) => x == ox && opt_eq(d, od),
            (
                Self::Rsa { n, e, private },
                Self::Rsa {
                    n: on,
                    e: oe,
                    private: op,
                },
            ) => n == on && e == oe && private == op,
            _ => false,
        }
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw { .. } => f.write_str("Raw"),
            Self::Ec { d, .. } => write!(f, "Ec {{ private: {} }}", d.is_some()),
            Self::Okp { d, .. } => write!(f, "Okp {{ private: {} }}", d.is_some()),
            Self::Rsa { private, .. } => write!(f, "Rsa {{ private: {} }}", private.is_some()),
        }
    }
}

/// A cryptographic key mapped to the JSON Web Key model of [`rfc7517`].
///
/// Instances are immutable value objects; construct them with
/// [`WebKey::builder`], [`WebKey::from_pem`], or by deserializing a JWK.
/// [`WebKey::verify`] is the single validation gate every protocol component
/// passes a key through before use.
///
/// `Debug` output never contains secret material.
///
/// [`rfc7517`]: https://datatracker.ietf.org/doc/html/rfc7517
#[derive(Clone, PartialEq, Eq)]
pub struct WebKey {
    key_id: Option<String>,
    key_type: KeyType,
    key_use: Option<KeyUse>,
    ops: Option<BTreeSet<Operation>>,
    algorithm: Option<Algorithm>,
    material: Option<KeyMaterial>,
    certificate_uri: Option<String>,
    certificate_chain: Option<Vec<CertificateDer<'static>>>,
    certificate_thumbprint: Option<Vec<u8>>,
    certificate_sha256_thumbprint: Option<Vec<u8>>,
}

impl fmt::Debug for WebKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebKey")
            .field("key_id", &self.key_id)
            .field("key_type", &self.key_type)
            .field("key_use", &self.key_use)
            .field("algorithm", &self.algorithm)
            .field("material", &self.material)
            .finish_non_exhaustive()
    }
}

impl WebKey {
    /// Create a new builder for the given key type.
    #[must_use]
    pub fn builder(key_type: KeyType) -> WebKeyBuilder {
        WebKeyBuilder::new(key_type)
    }

    /// Generate an ephemeral key bound to `algorithm`, for use as a JWE
    /// recipient or JWS issuer.
    pub fn ephemeral(algorithm: Algorithm) -> Result<Self, Error> {
        let key_type = algorithm.key_types()[0];
        WebKeyBuilder::new(key_type)
            .with_algorithm(algorithm)
            .with_material(generate_material(key_type, algorithm.size())?)
            .build()
    }

    /// Generate an ephemeral content-encryption key, for use with
    /// [`Algorithm::Direct`].
    pub fn ephemeral_content_key(encryption: Encryption) -> Result<Self, Error> {
        WebKeyBuilder::new(KeyType::Raw)
            .with_material(generate_material(KeyType::Raw, encryption.cek_size())?)
            .build()
    }

    /// Reads at least one PEM-encoded X.509 certificate, and optionally a
    /// private key, and returns the corresponding key.
    ///
    /// The first certificate's public key anchors the key type; a trailing
    /// private key is verified against that public key before acceptance.
    pub fn from_pem(pem_encoded: &str) -> Result<Self, Error> {
        let mut certs = Vec::new();
        let mut private = None;

        for entry in pem::PemEncoded::parse(pem_encoded)? {
            match entry.label() {
                pem::Label::Certificate => certs.push(CertificateDer::from(entry.into_der())),
                pem::Label::PrivateKey => {
                    if private.is_some() {
                        return Err(KeyRejection::MultiplePrivateKeys.into());
                    }
                    private = Some(pem::key_from_pkcs8_der(&entry.into_der())?);
                }
                pem::Label::PublicKey => {
                    // Covered by the leaf certificate; a bare SPKI block in a
                    // certificate document carries no additional information.
                }
            }
        }

        let leaf = certs
            .first()
            .context("at least one certificate is required")
            .map_err(Error::MalformedEncoding)?;
        let (key_type, public) = pem::key_from_certificate(leaf)?;

        let material = match private {
            None => public,
            Some((private_type, private_material)) => {
                if private_type != key_type || !private_material.public_matches(&public) {
                    return Err(KeyRejection::ParameterMismatch.into());
                }
                private_material
            }
        };

        WebKeyBuilder::new(key_type)
            .with_material(material)
            .with_certificate_chain(certs)
            .build()
    }

    /// Serializes the private key (PKCS#8) and certificate chain as
    /// concatenated PEM blocks.
    pub fn to_pem(&self) -> Result<String, Error> {
        let mut document = String::new();
        if self.has_private_key()
            && let Some(material) = &self.material
        {
            let der = pem::pkcs8_der_from_key(self.key_type, material)?;
            document.push_str(&pem::PemEncoded::new(pem::Label::PrivateKey, der.to_vec()).encode());
        }
        if let Some(chain) = &self.certificate_chain {
            document.push_str(&pem::encode_certificates(chain));
        }
        if document.is_empty() {
            return Err(KeyRejection::MissingMaterial("private key or certificate").into());
        }
        Ok(document)
    }

    /// Parse a single JSON Web Key.
    pub fn parse_jwk(jwk: &str) -> Result<Self, Error> {
        let repr: JwkRepr = serde_json::from_str(jwk)?;
        Self::from_repr(repr)
    }

    /// Serialize as a JSON Web Key.
    pub fn as_jwk(&self) -> Result<String, Error> {
        serde_json::to_string(&self.to_repr()).map_err(Error::from)
    }

    /// Gets the key ID.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Gets the key type.
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Gets the public key use.
    #[must_use]
    pub fn key_use(&self) -> Option<KeyUse> {
        self.key_use
    }

    /// Gets the key operations.
    #[must_use]
    pub fn operations(&self) -> Option<&BTreeSet<Operation>> {
        self.ops.as_ref()
    }

    /// Gets the bound algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Gets the raw symmetric key data, for [`KeyType::Raw`] keys.
    #[must_use]
    pub fn raw_key(&self) -> Option<&[u8]> {
        match &self.material {
            Some(KeyMaterial::Raw { k }) => Some(k),
            _ => None,
        }
    }

    /// True if private or secret key material is present.
    #[must_use]
    pub fn has_private_key(&self) -> bool {
        self.material.as_ref().is_some_and(KeyMaterial::has_private)
    }

    /// Gets the X.509 certificate chain, leaf first.
    #[must_use]
    pub fn certificate_chain(&self) -> Option<&[CertificateDer<'static>]> {
        self.certificate_chain.as_deref()
    }

    /// Gets the certificate chain URI.
    #[must_use]
    pub fn certificate_uri(&self) -> Option<&str> {
        self.certificate_uri.as_deref()
    }

    pub(crate) fn material(&self) -> Option<&KeyMaterial> {
        self.material.as_ref()
    }

    /// Returns a copy of this key that omits secret and private key data.
    ///
    /// The projection is idempotent and safe to publish or log: raw
    /// symmetric content and private components are cleared, public
    /// components, certificate data and metadata are kept.
    #[must_use]
    pub fn well_known(&self) -> Self {
        Self {
            material: self.material.as_ref().and_then(KeyMaterial::public_only),
            ..self.clone()
        }
    }

    /// Verifies encoded key data is correct for the key type, use, algorithm,
    /// and X.509 certificate chain.
    ///
    /// This is the single gate all protocol components call before using a
    /// key. Every violation fails with a specific [`KeyRejection`].
    pub fn verify(&self) -> Result<(), Error> {
        if let Some(algorithm) = self.algorithm {
            if !algorithm.key_types().contains(&self.key_type) {
                return Err(KeyRejection::TypeMismatch.into());
            }
            if let Some(key_use) = self.key_use
                && key_use != algorithm.key_use()
            {
                return Err(KeyRejection::UseMismatch.into());
            }
        }

        if let Some(ops) = &self.ops {
            verify_ops(ops, self.key_use, self.algorithm)?;
        }

        self.verify_certificate_chain()?;

        let material = match &self.material {
            Some(material) => material,
            // the well-known projection of a symmetric key is an empty
            // reference; anything else must carry key data
            None if self.key_type == KeyType::Raw => {
                if self.certificate_chain.is_some() {
                    return Err(KeyRejection::UnexpectedMaterial("certificate chain").into());
                }
                return Ok(());
            }
            None => return Err(KeyRejection::MissingMaterial("key data").into()),
        };

        match (self.key_type, material) {
            (KeyType::Raw, KeyMaterial::Raw { .. }) => {
                if self.certificate_chain.is_some() {
                    return Err(KeyRejection::UnexpectedMaterial("certificate chain").into());
                }
            }
            (KeyType::EcP256 | KeyType::EcP384 | KeyType::EcP521, KeyMaterial::Ec { x, y, d }) => {
                let size = self
                    .key_type
                    .field_size()
                    .ok_or(KeyRejection::ParameterMismatch)?;
                if x.len() != size || y.len() != size {
                    return Err(KeyRejection::ParameterMismatch.into());
                }
                if let Some(d) = d
                    && d.len() != size
                {
                    return Err(KeyRejection::ParameterMismatch.into());
                }
            }
            (KeyType::Ed25519 | KeyType::X25519, KeyMaterial::Okp { x, d }) => {
                if x.len() != 32 || d.as_ref().is_some_and(|d| d.len() != 32) {
                    return Err(KeyRejection::ParameterMismatch.into());
                }
            }
            (KeyType::Ed448, KeyMaterial::Okp { x, d }) => {
                if x.len() != 57 || d.as_ref().is_some_and(|d| d.len() != 57) {
                    return Err(KeyRejection::ParameterMismatch.into());
                }
            }
            (KeyType::X448, KeyMaterial::Okp { x, d }) => {
                if x.len() != 56 || d.as_ref().is_some_and(|d| d.len() != 56) {
                    return Err(KeyRejection::ParameterMismatch.into());
                }
            }
            (KeyType::Rsa | KeyType::RsassaPss, KeyMaterial::Rsa { n, .. }) => {
                if n.is_empty() {
                    return Err(KeyRejection::MissingMaterial("modulus").into());
                }
            }
            (KeyType::Raw, _) => {
                return Err(KeyRejection::UnexpectedMaterial("asymmetric key data").into());
            }
            _ => return Err(KeyRejection::UnexpectedMaterial("mismatched key data").into()),
        }

        if let Some(ops) = &self.ops {
            let is_symmetric = matches!(material, KeyMaterial::Raw { .. });
            let has_private = material.has_private();
            if (ops.contains(&Operation::Encrypt) || ops.contains(&Operation::Decrypt))
                && !is_symmetric
            {
                return Err(KeyRejection::MissingMaterial("secret key").into());
            }
            if !is_symmetric
                && !has_private
                && (ops.contains(&Operation::UnwrapKey) || ops.contains(&Operation::Sign))
            {
                return Err(KeyRejection::MissingMaterial("private key").into());
            }
        }

        Ok(())
    }

    fn verify_certificate_chain(&self) -> Result<(), Error> {
        let Some(chain) = &self.certificate_chain else {
            return Ok(());
        };
        let leaf = chain.first().ok_or(KeyRejection::CertificateMismatch)?;

        let mut subjects = Vec::with_capacity(chain.len());
        for der in chain {
            let (_, cert) = x509_parser::certificate::X509Certificate::from_der(der)
                .map_err(|_| {
                    Error::MalformedEncoding(OpaqueError::from_display("parse X.509 certificate"))
                })?;
            subjects.push((
                cert.tbs_certificate.subject.to_string(),
                cert.tbs_certificate.issuer.to_string(),
            ));
        }
        // leaf-first ordering: each certificate is issued by the next
        for pair in subjects.windows(2) {
            if pair[0].1 != pair[1].0 {
                return Err(KeyRejection::CertificateMismatch.into());
            }
        }

        if let Some(thumbprint) = &self.certificate_thumbprint
            && thumbprint[..] != Sha1::digest(leaf.as_ref())[..]
        {
            return Err(KeyRejection::CertificateMismatch.into());
        }
        if let Some(thumbprint) = &self.certificate_sha256_thumbprint
            && thumbprint[..] != Sha256::digest(leaf.as_ref())[..]
        {
            return Err(KeyRejection::CertificateMismatch.into());
        }

        if let Some(material) = &self.material {
            let (leaf_type, leaf_material) = pem::key_from_certificate(leaf)?;
            if leaf_type != self.key_type || !leaf_material.public_matches(material) {
                return Err(KeyRejection::CertificateMismatch.into());
            }
        }

        Ok(())
    }

    /// True if the leaf of `certificate` carries this key's public key.
    #[must_use]
    pub fn matches_certificate(&self, certificate: &CertificateDer<'_>) -> bool {
        let Some(material) = &self.material else {
            return false;
        };
        match pem::key_from_certificate(certificate) {
            Ok((key_type, cert_material)) => {
                key_type == self.key_type && cert_material.public_matches(material)
            }
            Err(_) => false,
        }
    }

    /// True if `other` carries the same public key material as this key.
    pub(crate) fn represents(&self, other: &Self) -> bool {
        match (&self.material, &other.material) {
            (Some(mine), Some(theirs)) => {
                self.key_type == other.key_type && mine.public_matches(theirs)
            }
            _ => false,
        }
    }

    /// The RFC 7638 SHA-256 JWK thumbprint over the canonical required
    /// members of the key.
    pub fn thumbprint_sha256(&self) -> Result<Vec<u8>, Error> {
        let canonical = match (self.key_type, self.material.as_ref()) {
            (t, Some(KeyMaterial::Ec { x, y, .. })) => format!(
                r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                t.crv().unwrap_or_default(),
                base64_url(x),
                base64_url(y),
            ),
            (t, Some(KeyMaterial::Okp { x, .. })) => format!(
                r#"{{"crv":"{}","kty":"OKP","x":"{}"}}"#,
                t.crv().unwrap_or_default(),
                base64_url(x),
            ),
            (_, Some(KeyMaterial::Rsa { n, e, .. })) => format!(
                r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
                base64_url(e),
                base64_url(n),
            ),
            (_, Some(KeyMaterial::Raw { k })) => {
                format!(r#"{{"k":"{}","kty":"oct"}}"#, base64_url(k))
            }
            (_, None) => return Err(KeyRejection::MissingMaterial("key data").into()),
        };
        Ok(Sha256::digest(canonical.as_bytes()).to_vec())
    }

    fn to_repr(&self) -> JwkRepr {
        let mut repr = JwkRepr {
            kty: Some(self.key_type.kty().to_owned()),
            crv: self.key_type.crv().map(str::to_owned),
            key_use: self.key_use,
            key_ops: self
                .ops
                .as_ref()
                .map(|ops| ops.iter().copied().collect::<Vec<_>>()),
            alg: self.algorithm,
            kid: self.key_id.clone(),
            x5u: self.certificate_uri.clone(),
            ..JwkRepr::default()
        };

        match &self.material {
            Some(KeyMaterial::Raw { k }) => repr.k = Some(base64_url(k)),
            Some(KeyMaterial::Ec { x, y, d }) => {
                repr.x = Some(base64_url(x));
                repr.y = Some(base64_url(y));
                repr.d = d.as_ref().map(base64_url);
            }
            Some(KeyMaterial::Okp { x, d }) => {
                repr.x = Some(base64_url(x));
                repr.d = d.as_ref().map(base64_url);
            }
            Some(KeyMaterial::Rsa { n, e, private }) => {
                repr.n = Some(base64_url(n));
                repr.e = Some(base64_url(e));
                if let Some(private) = private {
                    repr.d = Some(base64_url(&private.d));
                    repr.p = private.p.as_ref().map(base64_url);
                    repr.q = private.q.as_ref().map(base64_url);
                    repr.dp = private.dp.as_ref().map(base64_url);
                    repr.dq = private.dq.as_ref().map(base64_url);
                    repr.qi = private.qi.as_ref().map(base64_url);
                }
            }
            None => {}
        }

        // symmetric keys never serialize certificate data
        if self.key_type != KeyType::Raw {
            repr.x5c = self.certificate_chain.as_ref().map(|chain| {
                chain
                    .iter()
                    .map(|cert| BASE64_STANDARD.encode(cert.as_ref()))
                    .collect()
            });
            repr.x5t = self.certificate_thumbprint.as_ref().map(base64_url);
            repr.x5t_s256 = self.certificate_sha256_thumbprint.as_ref().map(base64_url);
        }

        repr
    }

    fn from_repr(repr: JwkRepr) -> Result<Self, Error> {
        let kty = repr
            .kty
            .context("kty is required")
            .map_err(Error::MalformedEncoding)?;
        let key_type = KeyType::from_kty_crv(&kty, repr.crv.as_deref())?;

        let material = match key_type {
            // a published (well-known) oct key carries no key material
            KeyType::Raw => match repr.k {
                Some(k) => Some(KeyMaterial::Raw {
                    k: Zeroizing::new(from_base64_url(k)?),
                }),
                None => None,
            },
            KeyType::EcP256 | KeyType::EcP384 | KeyType::EcP521 => match (&repr.x, &repr.y) {
                (Some(x), Some(y)) => {
                    let size = key_type.field_size().unwrap_or_default();
                    Some(KeyMaterial::Ec {
                        x: fixed_width(from_base64_url(x)?, size)?,
                        y: fixed_width(from_base64_url(y)?, size)?,
                        d: repr
                            .d
                            .as_deref()
                            .map(|d| {
                                Ok::<_, Error>(Zeroizing::new(fixed_width(
                                    from_base64_url(d)?,
                                    size,
                                )?))
                            })
                            .transpose()?,
                    })
                }
                _ => None,
            },
            KeyType::Ed25519 | KeyType::Ed448 | KeyType::X25519 | KeyType::X448 => {
                match &repr.x {
                    Some(x) => Some(KeyMaterial::Okp {
                        x: from_base64_url(x)?,
                        d: repr
                            .d
                            .as_deref()
                            .map(|d| Ok::<_, Error>(Zeroizing::new(from_base64_url(d)?)))
                            .transpose()?,
                    }),
                    None => None,
                }
            }
            KeyType::Rsa | KeyType::RsassaPss => match (&repr.n, &repr.e) {
                (Some(n), Some(e)) => Some(KeyMaterial::Rsa {
                    n: from_base64_url(n)?,
                    e: from_base64_url(e)?,
                    private: repr
                        .d
                        .as_deref()
                        .map(|d| {
                            Ok::<_, Error>(RsaPrivateParts {
                                d: Zeroizing::new(from_base64_url(d)?),
                                p: decode_secret(repr.p.as_deref())?,
                                q: decode_secret(repr.q.as_deref())?,
                                dp: decode_secret(repr.dp.as_deref())?,
                                dq: decode_secret(repr.dq.as_deref())?,
                                qi: decode_secret(repr.qi.as_deref())?,
                            })
                        })
                        .transpose()?,
                }),
                _ => None,
            },
        };

        let mut builder = WebKeyBuilder::new(key_type);
        if let Some(material) = material {
            builder = builder.with_material(material);
        }
        if let Some(kid) = repr.kid {
            builder = builder.with_key_id(kid);
        }
        if let Some(key_use) = repr.key_use {
            builder = builder.with_key_use(key_use);
        }
        if let Some(ops) = repr.key_ops {
            builder = builder.with_operations(ops);
        }
        if let Some(alg) = repr.alg {
            builder = builder.with_algorithm(alg);
        }
        if let Some(x5u) = repr.x5u {
            builder = builder.with_certificate_uri(x5u);
        }
        if let Some(x5c) = repr.x5c {
            let mut chain = Vec::with_capacity(x5c.len());
            for encoded in x5c {
                let der = BASE64_STANDARD
                    .decode(encoded)
                    .context("decode x5c entry")
                    .map_err(Error::MalformedEncoding)?;
                chain.push(CertificateDer::from(der));
            }
            builder = builder.with_certificate_chain(chain);
        }
        if let Some(x5t) = repr.x5t {
            builder = builder.with_certificate_thumbprint(from_base64_url(x5t)?);
        }
        if let Some(x5t_s256) = repr.x5t_s256 {
            builder = builder.with_certificate_sha256_thumbprint(from_base64_url(x5t_s256)?);
        }
        builder.build_unverified()
    }

    /// Computes the native signature for `data` under `algorithm`.
    pub(crate) fn sign_payload(&self, algorithm: Algorithm, data: &[u8]) -> Result<Vec<u8>, Error> {
        match algorithm {
            Algorithm::HS256 => hmac_sign::<Hmac<Sha256>>(self.secret_key()?, data),
            Algorithm::HS384 => hmac_sign::<Hmac<Sha384>>(self.secret_key()?, data),
            Algorithm::HS512 => hmac_sign::<Hmac<Sha512>>(self.secret_key()?, data),
            Algorithm::RS256 => self.rsa_sign(rsa::Pkcs1v15Sign::new::<Sha256>(), sha256(data)),
            Algorithm::RS384 => self.rsa_sign(rsa::Pkcs1v15Sign::new::<Sha384>(), sha384(data)),
            Algorithm::RS512 => self.rsa_sign(rsa::Pkcs1v15Sign::new::<Sha512>(), sha512(data)),
            Algorithm::PS256 => self.rsa_sign_pss(rsa::Pss::new::<Sha256>(), sha256(data)),
            Algorithm::PS384 => self.rsa_sign_pss(rsa::Pss::new::<Sha384>(), sha384(data)),
            Algorithm::PS512 => self.rsa_sign_pss(rsa::Pss::new::<Sha512>(), sha512(data)),
            Algorithm::ES256 | Algorithm::ES384 | Algorithm::ES512 => self.ecdsa_sign(data),
            Algorithm::EdDSA => self.eddsa_sign(data),
            _ => Err(KeyRejection::UseMismatch.into()),
        }
    }

    /// Verifies the native signature for `data` under `algorithm`.
    ///
    /// The failure is always the generic [`Error::SignatureInvalid`].
    pub(crate) fn verify_signature(
        &self,
        algorithm: Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        match algorithm {
            Algorithm::HS256 => hmac_verify::<Hmac<Sha256>>(self.secret_key()?, data, signature),
            Algorithm::HS384 => hmac_verify::<Hmac<Sha384>>(self.secret_key()?, data, signature),
            Algorithm::HS512 => hmac_verify::<Hmac<Sha512>>(self.secret_key()?, data, signature),
            Algorithm::RS256 => {
                self.rsa_verify(rsa::Pkcs1v15Sign::new::<Sha256>(), sha256(data), signature)
            }
            Algorithm::RS384 => {
                self.rsa_verify(rsa::Pkcs1v15Sign::new::<Sha384>(), sha384(data), signature)
            }
            Algorithm::RS512 => {
                self.rsa_verify(rsa::Pkcs1v15Sign::new::<Sha512>(), sha512(data), signature)
            }
            Algorithm::PS256 => self.rsa_verify(rsa::Pss::new::<Sha256>(), sha256(data), signature),
            Algorithm::PS384 => self.rsa_verify(rsa::Pss::new::<Sha384>(), sha384(data), signature),
            Algorithm::PS512 => self.rsa_verify(rsa::Pss::new::<Sha512>(), sha512(data), signature),
            Algorithm::ES256 | Algorithm::ES384 | Algorithm::ES512 => {
                self.ecdsa_verify(data, signature)
            }
            Algorithm::EdDSA => self.eddsa_verify(data, signature),
            _ => Err(KeyRejection::UseMismatch.into()),
        }
    }

    fn secret_key(&self) -> Result<&[u8], Error> {
        self.raw_key()
            .ok_or_else(|| KeyRejection::MissingMaterial("secret key").into())
    }

    pub(crate) fn rsa_public(&self) -> Result<rsa::RsaPublicKey, Error> {
        match &self.material {
            Some(KeyMaterial::Rsa { n, e, .. }) => {
                rsa::RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                    .map_err(|_| KeyRejection::ParameterMismatch.into())
            }
            _ => Err(KeyRejection::MissingMaterial("RSA public key").into()),
        }
    }

    pub(crate) fn rsa_private(&self) -> Result<rsa::RsaPrivateKey, Error> {
        match &self.material {
            Some(KeyMaterial::Rsa {
                n,
                e,
                private: Some(private),
            }) => {
                let (Some(p), Some(q)) = (&private.p, &private.q) else {
                    return Err(KeyRejection::MissingMaterial("RSA prime factors").into());
                };
                rsa::RsaPrivateKey::from_components(
                    BigUint::from_bytes_be(n),
                    BigUint::from_bytes_be(e),
                    BigUint::from_bytes_be(&private.d),
                    vec![BigUint::from_bytes_be(p), BigUint::from_bytes_be(q)],
                )
                .map_err(|_| KeyRejection::ParameterMismatch.into())
            }
            _ => Err(KeyRejection::MissingMaterial("RSA private key").into()),
        }
    }

    fn rsa_sign(&self, padding: rsa::Pkcs1v15Sign, digest: Vec<u8>) -> Result<Vec<u8>, Error> {
        self.rsa_private()?
            .sign(padding, &digest)
            .map_err(|_| Error::SignatureInvalid)
    }

    fn rsa_sign_pss(&self, padding: rsa::Pss, digest: Vec<u8>) -> Result<Vec<u8>, Error> {
        self.rsa_private()?
            .sign_with_rng(&mut OsRng, padding, &digest)
            .map_err(|_| Error::SignatureInvalid)
    }

    fn rsa_verify(
        &self,
        padding: impl rsa::traits::SignatureScheme,
        digest: Vec<u8>,
        signature: &[u8],
    ) -> Result<(), Error> {
        self.rsa_public()?
            .verify(padding, &digest, signature)
            .map_err(|_| Error::SignatureInvalid)
    }

    fn ecdsa_sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let Some(KeyMaterial::Ec { d: Some(d), .. }) = &self.material else {
            return Err(KeyRejection::MissingMaterial("EC private key").into());
        };
        match self.key_type {
            KeyType::EcP256 => {
                use p256::ecdsa::signature::Signer as _;
                let key = p256::ecdsa::SigningKey::from_slice(d)
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let signature: p256::ecdsa::Signature = key.sign(data);
                Ok(signature.to_bytes().to_vec())
            }
            KeyType::EcP384 => {
                use p384::ecdsa::signature::Signer as _;
                let key = p384::ecdsa::SigningKey::from_slice(d)
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let signature: p384::ecdsa::Signature = key.sign(data);
                Ok(signature.to_bytes().to_vec())
            }
            KeyType::EcP521 => {
                use p521::ecdsa::signature::Signer as _;
                let key = p521::ecdsa::SigningKey::from_slice(d)
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let signature: p521::ecdsa::Signature = key.sign(data);
                Ok(signature.to_bytes().to_vec())
            }
            _ => Err(KeyRejection::TypeMismatch.into()),
        }
    }

    fn ecdsa_verify(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let Some(KeyMaterial::Ec { x, y, .. }) = &self.material else {
            return Err(KeyRejection::MissingMaterial("EC public key").into());
        };
        match self.key_type {
            KeyType::EcP256 => {
                use p256::ecdsa::signature::Verifier as _;
                let point = p256::EncodedPoint::from_affine_coordinates(
                    p256::FieldBytes::from_slice(x),
                    p256::FieldBytes::from_slice(y),
                    false,
                );
                let key = p256::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let signature = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| Error::SignatureInvalid)?;
                key.verify(data, &signature)
                    .map_err(|_| Error::SignatureInvalid)
            }
            KeyType::EcP384 => {
                use p384::ecdsa::signature::Verifier as _;
                let point = p384::EncodedPoint::from_affine_coordinates(
                    p384::FieldBytes::from_slice(x),
                    p384::FieldBytes::from_slice(y),
                    false,
                );
                let key = p384::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let signature = p384::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| Error::SignatureInvalid)?;
                key.verify(data, &signature)
                    .map_err(|_| Error::SignatureInvalid)
            }
            KeyType::EcP521 => {
                use p521::ecdsa::signature::Verifier as _;
                let point = p521::EncodedPoint::from_affine_coordinates(
                    p521::FieldBytes::from_slice(x),
                    p521::FieldBytes::from_slice(y),
                    false,
                );
                let key = p521::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let signature = p521::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| Error::SignatureInvalid)?;
                key.verify(data, &signature)
                    .map_err(|_| Error::SignatureInvalid)
            }
            _ => Err(KeyRejection::TypeMismatch.into()),
        }
    }

    fn eddsa_sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let Some(KeyMaterial::Okp { d: Some(d), .. }) = &self.material else {
            return Err(KeyRejection::MissingMaterial("EdDSA private key").into());
        };
        match self.key_type {
            KeyType::Ed25519 => {
                let seed: [u8; 32] = d[..]
                    .try_into()
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let key = ed25519_dalek::SigningKey::from_bytes(&seed);
                Ok(key.sign(data).to_bytes().to_vec())
            }
            KeyType::Ed448 => Err(KeyRejection::Unsupported("Ed448").into()),
            _ => Err(KeyRejection::TypeMismatch.into()),
        }
    }

    fn eddsa_verify(&self, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let Some(KeyMaterial::Okp { x, .. }) = &self.material else {
            return Err(KeyRejection::MissingMaterial("EdDSA public key").into());
        };
        match self.key_type {
            KeyType::Ed25519 => {
                let public: [u8; 32] = x[..]
                    .try_into()
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&public)
                    .map_err(|_| KeyRejection::ParameterMismatch)?;
                let signature = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| Error::SignatureInvalid)?;
                key.verify(data, &signature)
                    .map_err(|_| Error::SignatureInvalid)
            }
            KeyType::Ed448 => Err(KeyRejection::Unsupported("Ed448").into()),
            _ => Err(KeyRejection::TypeMismatch.into()),
        }
    }

    /// Computes the ECDH shared secret between this key's private scalar and
    /// the peer's public key.
    pub(crate) fn agree(&self, peer: &Self) -> Result<Zeroizing<Vec<u8>>, Error> {
        if self.key_type != peer.key_type {
            return Err(KeyRejection::ParameterMismatch.into());
        }
        match (&self.material, &peer.material) {
            (Some(KeyMaterial::Ec { d: Some(d), .. }), Some(KeyMaterial::Ec { x, y, .. })) => {
                match self.key_type {
                    KeyType::EcP256 => ecdh_p256(d, x, y),
                    KeyType::EcP384 => ecdh_p384(d, x, y),
                    KeyType::EcP521 => ecdh_p521(d, x, y),
                    _ => Err(KeyRejection::TypeMismatch.into()),
                }
            }
            (Some(KeyMaterial::Okp { d: Some(d), .. }), Some(KeyMaterial::Okp { x, .. })) => {
                match self.key_type {
                    KeyType::X25519 => {
                        let secret: [u8; 32] = d[..]
                            .try_into()
                            .map_err(|_| KeyRejection::ParameterMismatch)?;
                        let public: [u8; 32] = x[..]
                            .try_into()
                            .map_err(|_| KeyRejection::ParameterMismatch)?;
                        let secret = x25519_dalek::StaticSecret::from(secret);
                        let public = x25519_dalek::PublicKey::from(public);
                        Ok(Zeroizing::new(
                            secret.diffie_hellman(&public).as_bytes().to_vec(),
                        ))
                    }
                    KeyType::X448 => Err(KeyRejection::Unsupported("X448").into()),
                    _ => Err(KeyRejection::TypeMismatch.into()),
                }
            }
            _ => Err(KeyRejection::MissingMaterial("agreement key").into()),
        }
    }
}

fn ecdh_p256(d: &[u8], x: &[u8], y: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    let secret =
        p256::SecretKey::from_slice(d).map_err(|_| KeyRejection::ParameterMismatch)?;
    let point = p256::EncodedPoint::from_affine_coordinates(
        p256::FieldBytes::from_slice(x),
        p256::FieldBytes::from_slice(y),
        false,
    );
    let public: Option<p256::PublicKey> = p256::PublicKey::from_encoded_point(&point).into();
    let public = public.ok_or(KeyRejection::ParameterMismatch)?;
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
}

fn ecdh_p384(d: &[u8], x: &[u8], y: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    let secret =
        p384::SecretKey::from_slice(d).map_err(|_| KeyRejection::ParameterMismatch)?;
    let point = p384::EncodedPoint::from_affine_coordinates(
        p384::FieldBytes::from_slice(x),
        p384::FieldBytes::from_slice(y),
        false,
    );
    let public: Option<p384::PublicKey> = p384::PublicKey::from_encoded_point(&point).into();
    let public = public.ok_or(KeyRejection::ParameterMismatch)?;
    let shared = p384::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
}

fn ecdh_p521(d: &[u8], x: &[u8], y: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    let secret =
        p521::SecretKey::from_slice(d).map_err(|_| KeyRejection::ParameterMismatch)?;
    let point = p521::EncodedPoint::from_affine_coordinates(
        p521::FieldBytes::from_slice(x),
        p521::FieldBytes::from_slice(y),
        false,
    );
    let public: Option<p521::PublicKey> = p521::PublicKey::from_encoded_point(&point).into();
    let public = public.ok_or(KeyRejection::ParameterMismatch)?;
    let shared = p521::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
}

fn hmac_sign<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| KeyRejection::MissingMaterial("secret key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hmac_verify<M: Mac + KeyInit>(key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), Error> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|_| KeyRejection::MissingMaterial("secret key"))?;
    mac.update(data);
    mac.verify_slice(signature)
        .map_err(|_| Error::SignatureInvalid)
}

fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn sha384(data: &[u8]) -> Vec<u8> {
    Sha384::digest(data).to_vec()
}

fn sha512(data: &[u8]) -> Vec<u8> {
    Sha512::digest(data).to_vec()
}

fn decode_secret(encoded: Option<&str>) -> Result<Option<Zeroizing<Vec<u8>>>, Error> {
    encoded
        .map(|encoded| Ok(Zeroizing::new(from_base64_url(encoded)?)))
        .transpose()
}

fn fixed_width(mut bytes: Vec<u8>, size: usize) -> Result<Vec<u8>, Error> {
    use std::cmp::Ordering;
    match bytes.len().cmp(&size) {
        Ordering::Equal => Ok(bytes),
        Ordering::Less => {
            let mut padded = vec![0u8; size - bytes.len()];
            padded.append(&mut bytes);
            Ok(padded)
        }
        Ordering::Greater => Err(KeyRejection::ParameterMismatch.into()),
    }
}

fn verify_ops(
    ops: &BTreeSet<Operation>,
    key_use: Option<KeyUse>,
    algorithm: Option<Algorithm>,
) -> Result<(), Error> {
    if ops.len() > 2 {
        return Err(KeyRejection::OpsMismatch.into());
    }
    if ops.len() == 2 {
        let valid_pair = [
            (Operation::Sign, Operation::Verify),
            (Operation::Encrypt, Operation::Decrypt),
            (Operation::WrapKey, Operation::UnwrapKey),
        ]
        .iter()
        .any(|(a, b)| ops.contains(a) && ops.contains(b));
        if !valid_pair {
            return Err(KeyRejection::OpsMismatch.into());
        }
    }

    if let Some(algorithm) = algorithm {
        let permitted = algorithm.key_ops();
        if !ops.iter().all(|op| permitted.contains(op)) {
            return Err(KeyRejection::OpsMismatch.into());
        }
    }

    if let Some(key_use) = key_use {
        let signing = ops.contains(&Operation::Sign) || ops.contains(&Operation::Verify);
        if signing && key_use == KeyUse::Encrypt {
            return Err(KeyRejection::OpsMismatch.into());
        }
        if !signing && key_use == KeyUse::Sign {
            return Err(KeyRejection::OpsMismatch.into());
        }
    }

    Ok(())
}

/// Generates fresh key material for a key type.
///
/// `size` is consulted for [`KeyType::Raw`] only, in bits.
pub(crate) fn generate_material(key_type: KeyType, size: u32) -> Result<KeyMaterial, Error> {
    match key_type {
        KeyType::Raw => {
            let mut k = Zeroizing::new(vec![0u8; (size.max(8) / 8) as usize]);
            OsRng.fill_bytes(&mut k);
            Ok(KeyMaterial::Raw { k })
        }
        KeyType::EcP256 => {
            let secret = p256::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            Ok(KeyMaterial::Ec {
                x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
                y: point.y().map(|y| y.to_vec()).unwrap_or_default(),
                d: Some(Zeroizing::new(secret.to_bytes().to_vec())),
            })
        }
        KeyType::EcP384 => {
            let secret = p384::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            Ok(KeyMaterial::Ec {
                x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
                y: point.y().map(|y| y.to_vec()).unwrap_or_default(),
                d: Some(Zeroizing::new(secret.to_bytes().to_vec())),
            })
        }
        KeyType::EcP521 => {
            let secret = p521::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            Ok(KeyMaterial::Ec {
                x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
                y: point.y().map(|y| y.to_vec()).unwrap_or_default(),
                d: Some(Zeroizing::new(secret.to_bytes().to_vec())),
            })
        }
        KeyType::Ed25519 => {
            let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
            Ok(KeyMaterial::Okp {
                x: key.verifying_key().to_bytes().to_vec(),
                d: Some(Zeroizing::new(key.to_bytes().to_vec())),
            })
        }
        KeyType::X25519 => {
            let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
            let public = x25519_dalek::PublicKey::from(&secret);
            Ok(KeyMaterial::Okp {
                x: public.as_bytes().to_vec(),
                d: Some(Zeroizing::new(secret.to_bytes().to_vec())),
            })
        }
        KeyType::Rsa | KeyType::RsassaPss => {
            let key = rsa::RsaPrivateKey::new(&mut OsRng, 2048)
                .map_err(|_| KeyRejection::ParameterMismatch)?;
            let primes = key.primes();
            Ok(KeyMaterial::Rsa {
                n: key.n().to_bytes_be(),
                e: key.e().to_bytes_be(),
                private: Some(RsaPrivateParts {
                    d: Zeroizing::new(key.d().to_bytes_be()),
                    p: primes.first().map(|p| Zeroizing::new(p.to_bytes_be())),
                    q: primes.get(1).map(|q| Zeroizing::new(q.to_bytes_be())),
                    dp: None,
                    dq: None,
                    qi: None,
                }),
            })
        }
        KeyType::Ed448 | KeyType::X448 => {
            Err(KeyRejection::Unsupported("Ed448/X448 generation").into())
        }
    }
}

/// Builder for [`WebKey`] instances.
///
/// Identity and material setters reject conflicting second assignments at
/// [`WebKeyBuilder::build`] instead of silently overwriting.
#[derive(Debug, Clone)]
pub struct WebKeyBuilder {
    key_type: KeyType,
    key_id: Option<String>,
    key_use: Option<KeyUse>,
    ops: Option<BTreeSet<Operation>>,
    algorithm: Option<Algorithm>,
    material: Option<KeyMaterial>,
    certificate_uri: Option<String>,
    certificate_chain: Option<Vec<CertificateDer<'static>>>,
    certificate_thumbprint: Option<Vec<u8>>,
    certificate_sha256_thumbprint: Option<Vec<u8>>,
    conflict: Option<&'static str>,
}

impl WebKeyBuilder {
    fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            key_id: None,
            key_use: None,
            ops: None,
            algorithm: None,
            material: None,
            certificate_uri: None,
            certificate_chain: None,
            certificate_thumbprint: None,
            certificate_sha256_thumbprint: None,
            conflict: None,
        }
    }

    /// Set the key ID.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        if self.key_id.as_ref().is_some_and(|id| *id != key_id) {
            self.conflict = Some("kid");
        }
        self.key_id = Some(key_id);
        self
    }

    /// Set the public key use.
    #[must_use]
    pub fn with_key_use(mut self, key_use: KeyUse) -> Self {
        if self.key_use.is_some_and(|u| u != key_use) {
            self.conflict = Some("use");
        }
        self.key_use = Some(key_use);
        self
    }

    /// Set the key operations.
    #[must_use]
    pub fn with_operations(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.ops = Some(ops.into_iter().collect());
        self
    }

    /// Bind the key to an algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        if self.algorithm.is_some_and(|alg| alg != algorithm) {
            self.conflict = Some("alg");
        }
        self.algorithm = Some(algorithm);
        self
    }

    /// Set the key material.
    #[must_use]
    pub fn with_material(mut self, material: KeyMaterial) -> Self {
        if self.material.as_ref().is_some_and(|m| *m != material) {
            self.conflict = Some("key material");
        }
        self.material = Some(material);
        self
    }

    /// Set the certificate chain URI (x5u).
    #[must_use]
    pub fn with_certificate_uri(mut self, uri: impl Into<String>) -> Self {
        self.certificate_uri = Some(uri.into());
        self
    }

    /// Set the certificate chain, leaf first (x5c).
    #[must_use]
    pub fn with_certificate_chain(mut self, chain: Vec<CertificateDer<'static>>) -> Self {
        self.certificate_chain = Some(chain);
        self
    }

    /// Set the leaf certificate SHA-1 thumbprint (x5t).
    #[must_use]
    pub fn with_certificate_thumbprint(mut self, thumbprint: Vec<u8>) -> Self {
        self.certificate_thumbprint = Some(thumbprint);
        self
    }

    /// Set the leaf certificate SHA-256 thumbprint (x5t#S256).
    #[must_use]
    pub fn with_certificate_sha256_thumbprint(mut self, thumbprint: Vec<u8>) -> Self {
        self.certificate_sha256_thumbprint = Some(thumbprint);
        self
    }

    /// Build and [`verify`][WebKey::verify] the key.
    pub fn build(self) -> Result<WebKey, Error> {
        let key = self.build_unverified()?;
        key.verify()?;
        Ok(key)
    }

    /// Build without running full validation; used when deserializing keys
    /// whose validity is established separately.
    fn build_unverified(self) -> Result<WebKey, Error> {
        if let Some(name) = self.conflict {
            return Err(Error::header_invalid(format!("{name} already set")));
        }
        Ok(WebKey {
            key_id: self.key_id,
            key_type: self.key_type,
            key_use: self.key_use,
            ops: self.ops,
            algorithm: self.algorithm,
            material: self.material,
            certificate_uri: self.certificate_uri,
            certificate_chain: self.certificate_chain,
            certificate_thumbprint: self.certificate_thumbprint,
            certificate_sha256_thumbprint: self.certificate_sha256_thumbprint,
        })
    }
}

/// Serde wire representation of a JWK, shared by keys and key sets.
#[derive(Debug, Default, Serialize, Deserialize)]
struct JwkRepr {
    #[serde(skip_serializing_if = "Option::is_none")]
    kty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    k: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dq: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qi: Option<String>,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    key_use: Option<KeyUse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_ops: Option<Vec<Operation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alg: Option<Algorithm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x5u: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x5c: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x5t: Option<String>,
    #[serde(rename = "x5t#S256", skip_serializing_if = "Option::is_none")]
    x5t_s256: Option<String>,
}

impl Serialize for WebKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_repr().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WebKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr = JwkRepr::deserialize(deserializer)?;
        Self::from_repr(repr).map_err(serde::de::Error::custom)
    }
}

/// A JSON Web Key Set as defined in [`rfc7517, section 5`].
///
/// Element order is preserved across parse/serialize round trips.
///
/// [`rfc7517, section 5`]: https://datatracker.ietf.org/doc/html/rfc7517#section-5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// The keys, in document order.
    pub keys: Vec<WebKey>,
}

impl JsonWebKeySet {
    /// Parse a serialized JWKS document.
    pub fn parse(jwks: &str) -> Result<Self, Error> {
        serde_json::from_str(jwks).map_err(Error::from)
    }

    /// Serialize this key set as a JWKS document.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(Error::from)
    }

    /// Find a key by its key ID.
    #[must_use]
    pub fn find(&self, key_id: &str) -> Option<&WebKey> {
        self.keys.iter().find(|key| key.key_id() == Some(key_id))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Key fixtures from RFC 7515 Appendix A.

    /// RFC 7515 Appendix A.3.1 EC P-256 signing key
    pub(crate) const RFC7515_EC_JWK: &str = r#"{"kty":"EC","crv":"P-256",
        "x":"f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
        "y":"x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0",
        "d":"jpsQnnGQmL-YBIffH1136cspYG6-0iY7X1fCE9-E9LI"}"#;

    /// RFC 7515 Appendix A.2.1 RSA signing key
    pub(crate) const RFC7515_RSA_JWK: &str = r#"{"kty":"RSA",
        "n":"ofgWCuLjybRlzo0tZWJjNiuSfb4p4fAkd_wWJcyQoTbji9k0l8W26mPddxHmfHQp-Vaw-4qPCJrcS2mJPMEzP1Pt0Bm4d4QlL-yRT-SFd2lZS-pCgNMsD1W_YpRPEwOWvG6b32690r2jZ47soMZo9wGzjb_7OMg0LOL-bSf63kpaSHSXndS5z5rexMdbBYUsLA9e-KXBdQOS-UTo7WTBEMa2R2CapHg665xsmtdVMTBQY4uDZlxvb3qCo5ZwKh9kG4LT6_I5IhlJH7aGhyxXFvUK-DWNmoudF8NAco9_h9iaGNj8q2ethFkMLs91kzk2PAcDTW9gb54h4FRWyuXpoQ",
        "e":"AQAB",
        "d":"Eq5xpGnNCivDflJsRQBXHx1hdR1k6Ulwe2JZD50LpXyWPEAeP88vLNO97IjlA7_GQ5sLKMgvfTeXZx9SE-7YwVol2NXOoAJe46sui395IW_GO-pWJ1O0BkTGoVEn2bKVRUCgu-GjBVaYLU6f3l9kJfFNS3E0QbVdxzubSu3Mkqzjkn439X0M_V51gfpRLI9JYanrC4D4qAdGcopV_0ZHHzQlBjudU2QvXt4ehNYTCBr6XCLQUShb1juUO1ZdiYoFaFQT5Tw8bGUl_x_jTj3ccPDVZFD9pIuhLhBOneufuBiB4cS98l2SR_RQyGWSeWjnczT0QU91p1DhOVRuOopznQ",
        "p":"4BzEEOtIpmVdVEZNCqS7baC4crd0pqnRH_5IB3jw3bcxGn6QLvnEtfdUdiYrqBdss1l58BQ3KhooKeQTa9AB0Hw_Py5PJdTJNPY8cQn7ouZ2KKDcmnPGBY5t7yLc1QlQ5xHdwW1VhvKn-nXqhJTBgIPgtldC-KDV5z-y2XDwGUc",
        "q":"uQPEfgmVtjL0Uyyx88GZFF1fOunH3-7cepKmtH4pxhtCoHqpWmT8YAmZxaewHgHAjLYsp1ZSe7zFYHj7C6ul7TjeLQeZD_YwD66t62wDmpe_HlB-TnBA-njbglfIsRLtXlnDzQkv5dTltRJ11BKBBypeeF6689rjcJIDEz9RWdc",
        "dp":"BwKfV3Akq5_MFZDFZCnW-wzl-CCo83WoZvnLQwCTeDv8uzluRSnm71I3QCLdhrqE2e9YkxvuxdBfpT_PI7Yz-FOKnu1R6HsJeDCjn12Sk3vmAktV2zb34MCdy7cpdTh_YVr7tss2u6vneTwrA86rZtu5Mbr1C1XsmvkxHQAdYo0",
        "dq":"h_96-mK1R_7glhsum81dZxjTnYynPbZpHziZjeeHcXYsXaaMwkOlODsWa7I9xXDoRwbKgB719rrmI2oKr6N3Do9U0ajaHF-NKJnwgjMd2w9cjz3_-kyNlxAr2v4IKhGNpmM5iIgOS1VZnOZ68m6_pbLBSp3nssTdlqvd0tIiTHU",
        "qi":"IYd7DHOhrWvxkwPQsRM2tOgrjbcrfvtQJipd-DlcxyVuuM9sQLdgjVk2oy26F0EmpScGLq2MowX7fhd_QJQ3ydy5cY7YIBi87w93IKLEdfnbJtoOPLUW0ITrJReOgo1cq9SbsxYawBgfp_gh6A5603k2-ZQwVK0JKSHuLFkuQ3U"}"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::{RFC7515_EC_JWK, RFC7515_RSA_JWK};
    use super::*;

    fn ec_key() -> WebKey {
        WebKey::parse_jwk(RFC7515_EC_JWK).unwrap()
    }

    fn rsa_key() -> WebKey {
        WebKey::parse_jwk(RFC7515_RSA_JWK).unwrap()
    }

    #[test]
    fn parses_rfc7515_ec_key() {
        let key = ec_key();
        assert_eq!(key.key_type(), KeyType::EcP256);
        assert!(key.has_private_key());
        key.verify().unwrap();
    }

    #[test]
    fn jwk_public_round_trip_for_every_type() {
        for algorithm in [
            Algorithm::ES256,
            Algorithm::ES384,
            Algorithm::ES512,
            Algorithm::EdDSA,
            Algorithm::EcdhEs,
            Algorithm::HS256,
            Algorithm::A128KW,
        ] {
            let key = WebKey::ephemeral(algorithm).unwrap();
            let public = key.well_known();
            let serialized = public.as_jwk().unwrap();
            let parsed = WebKey::parse_jwk(&serialized).unwrap();
            assert_eq!(parsed, public, "{algorithm:?}");
        }
    }

    #[test]
    fn well_known_strips_secret_material_and_is_idempotent() {
        let key = ec_key();
        let public = key.well_known();
        assert!(!public.has_private_key());
        assert_eq!(public.well_known(), public);

        let oct = WebKey::ephemeral(Algorithm::HS256).unwrap();
        let projected = oct.well_known();
        assert!(projected.raw_key().is_none());
        assert_eq!(projected.well_known(), projected);
    }

    #[test]
    fn verify_accepts_matching_algorithm_and_rejects_mismatches() {
        for algorithm in Algorithm::ALL {
            let key = match WebKey::ephemeral(*algorithm) {
                Ok(key) => key,
                // Type representable but primitive unsupported
                Err(Error::KeyInvalid(KeyRejection::Unsupported(_))) => continue,
                Err(err) => unreachable!("ephemeral {algorithm:?}: {err}"),
            };
            key.verify().unwrap();
        }

        // ES256 requires P-256 material
        let mismatched = WebKey::builder(KeyType::EcP384)
            .with_algorithm(Algorithm::ES256)
            .with_material(generate_material(KeyType::EcP384, 0).unwrap())
            .build();
        assert!(matches!(
            mismatched,
            Err(Error::KeyInvalid(KeyRejection::TypeMismatch))
        ));

        // a signing algorithm cannot carry use=enc
        let bad_use = WebKey::builder(KeyType::Raw)
            .with_algorithm(Algorithm::HS256)
            .with_key_use(KeyUse::Encrypt)
            .with_material(generate_material(KeyType::Raw, 256).unwrap())
            .build();
        assert!(matches!(
            bad_use,
            Err(Error::KeyInvalid(KeyRejection::UseMismatch))
        ));
    }

    #[test]
    fn ops_must_form_valid_pairs() {
        let paired = WebKey::builder(KeyType::Raw)
            .with_operations([Operation::Sign, Operation::Verify])
            .with_material(generate_material(KeyType::Raw, 256).unwrap())
            .build();
        assert!(paired.is_ok());

        let crossed = WebKey::builder(KeyType::Raw)
            .with_operations([Operation::Sign, Operation::Decrypt])
            .with_material(generate_material(KeyType::Raw, 256).unwrap())
            .build();
        assert!(matches!(
            crossed,
            Err(Error::KeyInvalid(KeyRejection::OpsMismatch))
        ));

        let sign_on_enc_use = WebKey::builder(KeyType::Raw)
            .with_key_use(KeyUse::Encrypt)
            .with_operations([Operation::Sign, Operation::Verify])
            .with_material(generate_material(KeyType::Raw, 256).unwrap())
            .build();
        assert!(matches!(
            sign_on_enc_use,
            Err(Error::KeyInvalid(KeyRejection::OpsMismatch))
        ));
    }

    #[test]
    fn rfc7638_thumbprint_vector() {
        let key = WebKey::parse_jwk(
            r#"{"kty":"RSA",
             "n":"0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
             "e":"AQAB","alg":"RS256","kid":"2011-04-29"}"#,
        )
        .unwrap();
        let thumbprint = key.thumbprint_sha256().unwrap();
        assert_eq!(
            base64_url(&thumbprint),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn signs_and_verifies_with_every_signature_algorithm() {
        let payload = b"hello";
        for algorithm in [
            Algorithm::HS256,
            Algorithm::HS384,
            Algorithm::HS512,
            Algorithm::ES256,
            Algorithm::ES384,
            Algorithm::ES512,
            Algorithm::EdDSA,
        ] {
            let key = WebKey::ephemeral(algorithm).unwrap();
            let signature = key.sign_payload(algorithm, payload).unwrap();
            key.verify_signature(algorithm, payload, &signature)
                .unwrap();
            assert!(matches!(
                key.verify_signature(algorithm, b"other", &signature),
                Err(Error::SignatureInvalid)
            ));
        }
    }

    #[test]
    fn rsa_signatures_use_the_rfc7515_key() {
        let key = rsa_key();
        let payload = b"payload";
        for algorithm in [Algorithm::RS256, Algorithm::PS512] {
            let signature = key.sign_payload(algorithm, payload).unwrap();
            key.verify_signature(algorithm, payload, &signature)
                .unwrap();
            assert!(matches!(
                key.verify_signature(algorithm, b"other", &signature),
                Err(Error::SignatureInvalid)
            ));
        }
    }

    #[test]
    fn rfc7515_a2_signature_verifies() {
        // RFC 7515 A.2.1 signing input and signature for RS256
        let signing_input = "eyJhbGciOiJSUzI1NiJ9.eyJpc3MiOiJqb2UiLA0KICJleHAiOjEzMDA4MTkzODAsDQogImh0dHA6Ly9leGFtcGxlLmNvbS9pc19yb290Ijp0cnVlfQ";
        let signature = from_base64_url(
            "cC4hiUPoj9Eetdgtv3hF80EGrhuB__dzERat0XF9g2VtQgr9PJbu3XOiZj5RZmh7AAuHIm4Bh-0Qc_lF5YKt_O8W2Fp5jujGbds9uJdbF9CUAr7t1dnZcAcQjbKBYNX4BAynRFdiuB--f_nZLgrnbyTyWzO75vRK5h6xBArLIARNPvkSjtQBMHlb1L07Qe7K0GarZRmB_eSN9383LcOLn6_dO--xi12jzDwusC-eOkHWEsqtFZESc6BfI7noOPqvhJ1phCnvWh6IeYI2w9QOYEUipUTI8np6LbgGY9Fs98rqVt5AXLIhWkWywlVmtVrBp0igcN_IoypGlUPQGe77Rw",
        )
        .unwrap();
        rsa_key()
            .verify_signature(Algorithm::RS256, signing_input.as_bytes(), &signature)
            .unwrap();
    }

    #[test]
    fn jwks_preserves_order_and_count() {
        let keys: Vec<WebKey> = (0..3)
            .map(|i| {
                let key = WebKey::ephemeral(Algorithm::ES256).unwrap();
                WebKey::builder(key.key_type())
                    .with_key_id(format!("key-{i}"))
                    .with_material(key.well_known().material().cloned().unwrap())
                    .build()
                    .unwrap()
            })
            .collect();
        let set = JsonWebKeySet { keys: keys.clone() };
        let parsed = JsonWebKeySet::parse(&set.to_json().unwrap()).unwrap();
        assert_eq!(parsed.keys.len(), 3);
        for (i, key) in parsed.keys.iter().enumerate() {
            assert_eq!(key.key_id(), Some(format!("key-{i}").as_str()));
        }
        assert!(parsed.find("key-1").is_some());
        assert!(parsed.find("nope").is_none());
    }

    #[test]
    fn builder_rejects_conflicting_reassignment() {
        let result = WebKey::builder(KeyType::Raw)
            .with_key_id("a")
            .with_key_id("b")
            .with_material(generate_material(KeyType::Raw, 128).unwrap())
            .build();
        assert!(matches!(result, Err(Error::HeaderInvalid(_))));
    }

    #[test]
    fn oct_keys_never_serialize_certificates() {
        let key = WebKey::ephemeral(Algorithm::HS256).unwrap();
        let serialized = key.as_jwk().unwrap();
        assert!(!serialized.contains("x5c"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let key = ec_key();
        let debug = format!("{key:?}");
        assert!(!debug.contains("jpsQnnGQmL"));
    }
}
