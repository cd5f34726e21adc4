use std::collections::BTreeSet;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use rustls_pki_types::CertificateDer;
use serde::Serialize;
use serde_json::{Map, Value};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use sigil_error::{ErrorContext as _, OpaqueError};

use crate::jose::encoding::{base64_url, from_base64_url};
use crate::jose::{Algorithm, Encryption, Error, JsonWebKeySet, KeyRejection, KeyUse, WebKey};

/// Registered JOSE header parameters, shared by signatures and encrypted
/// message recipients.
///
/// Which parameters an algorithm may carry, and which of those are
/// mandatory, is owned by [`Algorithm::header_params`]; header verification
/// never hard-codes a parameter check outside this registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Param {
    /// Encryption/signature algorithm (`alg`).
    Algorithm,
    /// Well-known key identifier (`kid`).
    KeyId,
    /// Well-known key set URI (`jku`).
    KeySetUri,
    /// Well-known public key (`jwk`).
    Key,
    /// Certificate chain URI (`x5u`).
    CertificateUri,
    /// Certificate chain (`x5c`).
    CertificateChain,
    /// Certificate SHA-1 thumbprint (`x5t`).
    CertificateThumbprint,
    /// Certificate SHA-256 thumbprint (`x5t#S256`).
    CertificateSha256Thumbprint,
    /// Signature/encryption media type (`typ`).
    Type,
    /// Content media type (`cty`).
    ContentType,
    /// Extended parameter names that must be understood (`crit`).
    CriticalParams,
    /// Content encryption algorithm (`enc`).
    Encryption,
    /// Plain-text compression algorithm for encryption (`zip`).
    Zip,
    /// Ephemeral public key for key agreement (`epk`).
    EphemeralPublicKey,
    /// Public originator identifier for key derivation (`apu`).
    PartyUInfo,
    /// Public recipient identifier for key derivation (`apv`).
    PartyVInfo,
    /// Initialization vector for GCM key wrap (`iv`).
    InitializationVector,
    /// Authentication tag for GCM key wrap (`tag`).
    Tag,
    /// Password salt for PBES2 (`p2s`).
    PasswordSalt,
    /// PBKDF2 iteration count for PBES2 (`p2c`).
    PasswordCount,
}

impl Param {
    /// All registered parameters.
    pub const ALL: &'static [Self] = &[
        Self::Algorithm,
        Self::KeyId,
        Self::KeySetUri,
        Self::Key,
        Self::CertificateUri,
        Self::CertificateChain,
        Self::CertificateThumbprint,
        Self::CertificateSha256Thumbprint,
        Self::Type,
        Self::ContentType,
        Self::CriticalParams,
        Self::Encryption,
        Self::Zip,
        Self::EphemeralPublicKey,
        Self::PartyUInfo,
        Self::PartyVInfo,
        Self::InitializationVector,
        Self::Tag,
        Self::PasswordSalt,
        Self::PasswordCount,
    ];

    /// The JOSE standard parameter name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Algorithm => "alg",
            Self::KeyId => "kid",
            Self::KeySetUri => "jku",
            Self::Key => "jwk",
            Self::CertificateUri => "x5u",
            Self::CertificateChain => "x5c",
            Self::CertificateThumbprint => "x5t",
            Self::CertificateSha256Thumbprint => "x5t#S256",
            Self::Type => "typ",
            Self::ContentType => "cty",
            Self::CriticalParams => "crit",
            Self::Encryption => "enc",
            Self::Zip => "zip",
            Self::EphemeralPublicKey => "epk",
            Self::PartyUInfo => "apu",
            Self::PartyVInfo => "apv",
            Self::InitializationVector => "iv",
            Self::Tag => "tag",
            Self::PasswordSalt => "p2s",
            Self::PasswordCount => "p2c",
        }
    }

    /// Gets a parameter by JOSE standard parameter name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().find(|param| param.name() == name).copied()
    }

    /// True if the parameter is mandatory whenever its algorithm family
    /// carries it.
    #[must_use]
    pub fn required(&self) -> bool {
        matches!(
            self,
            Self::Algorithm
                | Self::Encryption
                | Self::EphemeralPublicKey
                | Self::InitializationVector
                | Self::Tag
                | Self::PasswordSalt
                | Self::PasswordCount
        )
    }

    /// True if the parameter is registered for the given key use.
    #[must_use]
    pub fn used_for(&self, key_use: KeyUse) -> bool {
        match self {
            Self::Encryption
            | Self::Zip
            | Self::EphemeralPublicKey
            | Self::PartyUInfo
            | Self::PartyVInfo
            | Self::InitializationVector
            | Self::Tag
            | Self::PasswordSalt
            | Self::PasswordCount => key_use == KeyUse::Encrypt,
            _ => true,
        }
    }

    /// True if the header carries a value for this parameter.
    #[must_use]
    pub fn is_present(&self, header: &WebCryptoHeader) -> bool {
        match self {
            Self::Algorithm => true,
            Self::KeyId => header.key_id.is_some(),
            Self::KeySetUri => header.key_set_uri.is_some(),
            Self::Key => header.key.is_some(),
            Self::CertificateUri => header.certificate_uri.is_some(),
            Self::CertificateChain => header.certificate_chain.is_some(),
            Self::CertificateThumbprint => header.certificate_thumbprint.is_some(),
            Self::CertificateSha256Thumbprint => header.certificate_sha256_thumbprint.is_some(),
            Self::Type => header.typ.is_some(),
            Self::ContentType => header.cty.is_some(),
            Self::CriticalParams => header.crit.is_some(),
            _ => header.ext.contains_key(self.name()),
        }
    }
}

/// Resolves a JWKS document for a well-known key set URI (`jku`).
///
/// The core never performs network I/O; implementors hand back key sets
/// parsed from bytes they fetched (and possibly cached) themselves.
pub trait JwksResolver {
    /// Resolve the key set published at `uri`.
    fn resolve(&self, uri: &str) -> Result<JsonWebKeySet, OpaqueError>;
}

impl JwksResolver for JsonWebKeySet {
    fn resolve(&self, _uri: &str) -> Result<JsonWebKeySet, OpaqueError> {
        Ok(self.clone())
    }
}

/// The cryptographic header shared by JWS signatures and JWE recipients,
/// as defined in [`rfc7515, section 4`] and [`rfc7516, section 4`].
///
/// Algorithm-specific parameters (`enc`, `zip`, `epk`, `apu`, `apv`, `iv`,
/// `tag`, `p2s`, `p2c`) and arbitrary extensions live in the extended
/// parameter map and are reached through the typed accessors.
///
/// [`rfc7515, section 4`]: https://datatracker.ietf.org/doc/html/rfc7515#section-4
/// [`rfc7516, section 4`]: https://datatracker.ietf.org/doc/html/rfc7516#section-4
#[derive(Debug, Clone, PartialEq)]
pub struct WebCryptoHeader {
    algorithm: Algorithm,
    key_id: Option<String>,
    key_set_uri: Option<String>,
    key: Option<WebKey>,
    typ: Option<String>,
    cty: Option<String>,
    certificate_uri: Option<String>,
    certificate_chain: Option<Vec<CertificateDer<'static>>>,
    certificate_thumbprint: Option<Vec<u8>>,
    certificate_sha256_thumbprint: Option<Vec<u8>>,
    crit: Option<BTreeSet<String>>,
    ext: Map<String, Value>,
}

impl WebCryptoHeader {
    /// Create a new [`HeaderBuilder`].
    #[must_use]
    pub fn builder(algorithm: Algorithm) -> HeaderBuilder {
        HeaderBuilder::new(algorithm)
    }

    /// Gets the cryptographic algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Gets the key ID relative to [`Self::key_set_uri`].
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Gets the URI where JWKS well-known key data can be retrieved.
    #[must_use]
    pub fn key_set_uri(&self) -> Option<&str> {
        self.key_set_uri.as_deref()
    }

    /// Gets the well-known key data.
    #[must_use]
    pub fn key(&self) -> Option<&WebKey> {
        self.key.as_ref()
    }

    /// Gets the header type parameter value.
    #[must_use]
    pub fn header_type(&self) -> Option<&str> {
        self.typ.as_deref()
    }

    /// Gets the header content type parameter value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.cty.as_deref()
    }

    /// Gets the certificate chain.
    #[must_use]
    pub fn certificate_chain(&self) -> Option<&[CertificateDer<'static>]> {
        self.certificate_chain.as_deref()
    }

    /// Gets the set of critical parameter names.
    #[must_use]
    pub fn critical_parameters(&self) -> Option<&BTreeSet<String>> {
        self.crit.as_ref()
    }

    /// Gets an extended parameter by name.
    #[must_use]
    pub fn extended_parameter(&self, name: &str) -> Option<&Value> {
        self.ext.get(name)
    }

    /// The content encryption algorithm (`enc`).
    pub fn encryption(&self) -> Result<Option<Encryption>, Error> {
        match self.ext.get("enc") {
            Some(Value::String(name)) => Encryption::from_name(name).map(Some),
            Some(_) => Err(Error::header_invalid("enc must be a string")),
            None => Ok(None),
        }
    }

    /// True if the message plaintext is DEFLATE-compressed (`zip: "DEF"`).
    #[must_use]
    pub fn is_deflate(&self) -> bool {
        matches!(self.ext.get("zip"), Some(Value::String(zip)) if zip == "DEF")
    }

    /// The ephemeral public key for key agreement (`epk`).
    pub fn ephemeral_key(&self) -> Result<Option<WebKey>, Error> {
        self.ext
            .get("epk")
            .map(|value| serde_json::from_value(value.clone()).map_err(Error::from))
            .transpose()
    }

    /// The PartyUInfo for key derivation (`apu`).
    pub fn agreement_party_uinfo(&self) -> Result<Option<Vec<u8>>, Error> {
        self.binary_parameter("apu")
    }

    /// The PartyVInfo for key derivation (`apv`).
    pub fn agreement_party_vinfo(&self) -> Result<Option<Vec<u8>>, Error> {
        self.binary_parameter("apv")
    }

    /// The initialization vector for GCM key wrap (`iv`).
    pub fn initialization_vector(&self) -> Result<Option<Vec<u8>>, Error> {
        self.binary_parameter("iv")
    }

    /// The authentication tag for GCM key wrap (`tag`).
    pub fn authentication_tag(&self) -> Result<Option<Vec<u8>>, Error> {
        self.binary_parameter("tag")
    }

    /// The PBES2 salt input (`p2s`).
    pub fn pbes2_salt(&self) -> Result<Option<Vec<u8>>, Error> {
        self.binary_parameter("p2s")
    }

    /// The PBES2 iteration count (`p2c`).
    pub fn pbes2_count(&self) -> Result<Option<u32>, Error> {
        match self.ext.get("p2c") {
            Some(value) => value
                .as_u64()
                .and_then(|count| u32::try_from(count).ok())
                .map(Some)
                .ok_or_else(|| Error::header_invalid("p2c must be an unsigned integer")),
            None => Ok(None),
        }
    }

    fn binary_parameter(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        match self.ext.get(name) {
            Some(Value::String(encoded)) => from_base64_url(encoded).map(Some),
            Some(_) => Err(Error::header_invalid(format!("{name} must be a string"))),
            None => Ok(None),
        }
    }

    /// Verifies all parameters and resolves the well-known key referred to
    /// by this header, if any can be located.
    ///
    /// Resolution priority: inline `jwk`, then `jku` lookup by `kid`
    /// through `resolver`, then the first `x5c` certificate. A resolved key
    /// is passed through [`WebKey::verify`] before it is returned.
    pub fn verify(
        &self,
        resolver: Option<&dyn JwksResolver>,
    ) -> Result<Option<WebKey>, Error> {
        let algorithm = self.algorithm;

        if algorithm.key_use() == KeyUse::Encrypt {
            if !self.ext.contains_key("enc") {
                return Err(Error::header_invalid(
                    "content encryption algorithm is required",
                ));
            }
            self.encryption()?;
        }
        for param in algorithm.header_params() {
            if param.required() && !param.is_present(self) {
                return Err(Error::header_invalid(format!(
                    "missing required encryption parameter {}",
                    param.name()
                )));
            }
        }

        if let Some(crit) = &self.crit {
            for name in crit {
                let present = match Param::from_name(name) {
                    Some(param) => param.is_present(self),
                    None => self.ext.contains_key(name),
                };
                if !present {
                    return Err(Error::CriticalParameterMissing(name.clone()));
                }
            }
        }

        if let (Some(key_id), Some(key)) = (&self.key_id, &self.key)
            && key.key_id().is_some_and(|kid| kid != key_id)
        {
            return Err(Error::header_invalid("kid does not match jwk"));
        }

        if let Some(chain) = &self.certificate_chain {
            let leaf = chain
                .first()
                .ok_or_else(|| Error::header_invalid("empty certificate chain"))?;
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
            if let Some(key) = &self.key
                && !key.matches_certificate(leaf)
            {
                return Err(KeyRejection::CertificateMismatch.into());
            }
        }

        // inline key
        if let Some(key) = &self.key {
            let well_known = key.well_known();
            well_known.verify()?;
            return Ok(Some(well_known));
        }

        // key-set lookup by kid
        if let (Some(key_id), Some(uri), Some(resolver)) =
            (&self.key_id, &self.key_set_uri, resolver)
        {
            let key_set = resolver
                .resolve(uri)
                .map_err(|err| Error::header_invalid(format!("jwks resolution failed: {err}")))?;
            let key = key_set
                .find(key_id)
                .ok_or_else(|| Error::header_invalid(format!("kid {key_id} not found in jwks")))?
                .well_known();
            key.verify()?;
            tracing::trace!("resolved verification key {key_id} from key set");
            return Ok(Some(key));
        }

        // first certificate in the chain
        if let Some(chain) = &self.certificate_chain
            && let Some(leaf) = chain.first()
        {
            let (key_type, material) = crate::pem::key_from_certificate(leaf)?;
            let key = WebKey::builder(key_type)
                .with_material(material)
                .with_certificate_chain(chain.clone())
                .build()?;
            return Ok(Some(key));
        }

        Ok(None)
    }

    /// Serialize the header to its JSON object form.
    pub fn to_map(&self) -> Result<Map<String, Value>, Error> {
        let mut map = Map::new();
        map.insert("alg".into(), serde_json::to_value(self.algorithm)?);
        if let Some(key_id) = &self.key_id {
            map.insert("kid".into(), Value::String(key_id.clone()));
        }
        if let Some(uri) = &self.key_set_uri {
            map.insert("jku".into(), Value::String(uri.clone()));
        }
        if let Some(key) = &self.key {
            map.insert("jwk".into(), serde_json::to_value(key.well_known())?);
        }
        if let Some(typ) = &self.typ {
            map.insert("typ".into(), Value::String(typ.clone()));
        }
        if let Some(cty) = &self.cty {
            map.insert("cty".into(), Value::String(cty.clone()));
        }
        if let Some(uri) = &self.certificate_uri {
            map.insert("x5u".into(), Value::String(uri.clone()));
        }
        if let Some(chain) = &self.certificate_chain {
            map.insert(
                "x5c".into(),
                Value::Array(
                    chain
                        .iter()
                        .map(|cert| Value::String(BASE64_STANDARD.encode(cert.as_ref())))
                        .collect(),
                ),
            );
        }
        if let Some(thumbprint) = &self.certificate_thumbprint {
            map.insert("x5t".into(), Value::String(base64_url(thumbprint)));
        }
        if let Some(thumbprint) = &self.certificate_sha256_thumbprint {
            map.insert("x5t#S256".into(), Value::String(base64_url(thumbprint)));
        }
        if let Some(crit) = &self.crit {
            map.insert(
                "crit".into(),
                Value::Array(crit.iter().cloned().map(Value::String).collect()),
            );
        }
        for (name, value) in &self.ext {
            map.insert(name.clone(), value.clone());
        }
        Ok(map)
    }

    /// Parse a header from its JSON object form.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, Error> {
        let algorithm = match map.get("alg") {
            Some(Value::String(name)) => Algorithm::from_name(name)?,
            Some(_) => return Err(Error::header_invalid("alg must be a string")),
            None => {
                return Err(Error::header_invalid(
                    "signature or key protection algorithm is required",
                ));
            }
        };

        let mut header = Self {
            algorithm,
            key_id: string_field(map, "kid")?,
            key_set_uri: string_field(map, "jku")?,
            key: map
                .get("jwk")
                .map(|value| serde_json::from_value(value.clone()))
                .transpose()?,
            typ: string_field(map, "typ")?,
            cty: string_field(map, "cty")?,
            certificate_uri: string_field(map, "x5u")?,
            certificate_chain: None,
            certificate_thumbprint: binary_field(map, "x5t")?,
            certificate_sha256_thumbprint: binary_field(map, "x5t#S256")?,
            crit: None,
            ext: Map::new(),
        };

        if let Some(value) = map.get("x5c") {
            let entries = value
                .as_array()
                .context("x5c must be an array")
                .map_err(Error::MalformedEncoding)?;
            let mut chain = Vec::with_capacity(entries.len());
            for entry in entries {
                let encoded = entry
                    .as_str()
                    .context("x5c entry must be a string")
                    .map_err(Error::MalformedEncoding)?;
                let der = BASE64_STANDARD
                    .decode(encoded)
                    .context("decode x5c entry")
                    .map_err(Error::MalformedEncoding)?;
                chain.push(CertificateDer::from(der));
            }
            header.certificate_chain = Some(chain);
        }

        if let Some(value) = map.get("crit") {
            let names = value
                .as_array()
                .context("crit must be an array")
                .map_err(Error::MalformedEncoding)?;
            let mut crit = BTreeSet::new();
            for name in names {
                let name = name
                    .as_str()
                    .context("crit entry must be a string")
                    .map_err(Error::MalformedEncoding)?;
                crit.insert(name.to_owned());
            }
            header.crit = Some(crit);
        }

        for (name, value) in map {
            if Param::from_name(name).is_none()
                || matches!(
                    Param::from_name(name),
                    Some(
                        Param::Encryption
                            | Param::Zip
                            | Param::EphemeralPublicKey
                            | Param::PartyUInfo
                            | Param::PartyVInfo
                            | Param::InitializationVector
                            | Param::Tag
                            | Param::PasswordSalt
                            | Param::PasswordCount
                    )
                )
            {
                header.ext.insert(name.clone(), value.clone());
            }
        }

        Ok(header)
    }
}

fn string_field(map: &Map<String, Value>, name: &'static str) -> Result<Option<String>, Error> {
    match map.get(name) {
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(Error::header_invalid(format!("{name} must be a string"))),
        None => Ok(None),
    }
}

fn binary_field(map: &Map<String, Value>, name: &'static str) -> Result<Option<Vec<u8>>, Error> {
    match map.get(name) {
        Some(Value::String(value)) => from_base64_url(value).map(Some),
        Some(_) => Err(Error::header_invalid(format!("{name} must be a string"))),
        None => Ok(None),
    }
}

/// Accumulates header parameters for a JWS signature or JWE recipient.
///
/// The signing/encryption key is attached with [`HeaderBuilder::key`]
/// (silent, not serialized) or [`HeaderBuilder::well_known`] (embedded as
/// `jwk`, public projection only).
#[derive(Debug, Clone)]
pub struct HeaderBuilder {
    algorithm: Algorithm,
    key: Option<WebKey>,
    embed_key: bool,
    key_id: Option<String>,
    key_set_uri: Option<String>,
    typ: Option<String>,
    cty: Option<String>,
    certificate_chain: Option<Vec<CertificateDer<'static>>>,
    crit: BTreeSet<String>,
    ext: Map<String, Value>,
}

impl HeaderBuilder {
    /// Create a builder for the given algorithm.
    #[must_use]
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            key: None,
            embed_key: false,
            key_id: None,
            key_set_uri: None,
            typ: None,
            cty: None,
            certificate_chain: None,
            crit: BTreeSet::new(),
            ext: Map::new(),
        }
    }

    /// The algorithm this header is being built for.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Set the key to use for signing or encryption without including it in
    /// the serialized header.
    #[must_use]
    pub fn with_key(mut self, key: WebKey) -> Self {
        self.key = Some(key);
        self.embed_key = false;
        self
    }

    /// Set the key to use for signing or encryption and embed its
    /// [well-known projection][WebKey::well_known] in the header as `jwk`.
    #[must_use]
    pub fn with_well_known(mut self, key: WebKey) -> Self {
        self.key = Some(key);
        self.embed_key = true;
        self
    }

    /// Set the key ID.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Set the well-known key set URI.
    #[must_use]
    pub fn with_key_set_uri(mut self, uri: impl Into<String>) -> Self {
        self.key_set_uri = Some(uri.into());
        self
    }

    /// Set the header type parameter value.
    #[must_use]
    pub fn with_header_type(mut self, typ: impl Into<String>) -> Self {
        self.typ = Some(typ.into());
        self
    }

    /// Set the header content type parameter value.
    #[must_use]
    pub fn with_content_type(mut self, cty: impl Into<String>) -> Self {
        self.cty = Some(cty.into());
        self
    }

    /// Set the certificate chain, leaf first.
    #[must_use]
    pub fn with_certificate_chain(mut self, chain: Vec<CertificateDer<'static>>) -> Self {
        self.certificate_chain = Some(chain);
        self
    }

    /// Declare critical parameter names.
    #[must_use]
    pub fn with_critical<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.crit.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set an extended parameter value.
    pub fn try_with_param(
        mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, Error> {
        let value = serde_json::to_value(value)?;
        self.ext.insert(name.into(), value);
        Ok(self)
    }

    /// Set an extended parameter from an already-serialized value.
    pub(crate) fn insert_param(&mut self, name: &str, value: Value) {
        self.ext.insert(name.to_owned(), value);
    }

    pub(crate) fn param(&self, name: &str) -> Option<&Value> {
        self.ext.get(name)
    }

    /// The key designated for the cryptographic operation.
    pub(crate) fn operation_key(&self) -> Result<&WebKey, Error> {
        self.key
            .as_ref()
            .ok_or_else(|| Error::header_invalid("no signing or encryption key provided"))
    }

    /// Build the immutable header.
    pub fn build(&self) -> Result<WebCryptoHeader, Error> {
        let key_id = self.key_id.clone().or_else(|| {
            self.key
                .as_ref()
                .and_then(|key| key.key_id().map(str::to_owned))
        });
        let header = WebCryptoHeader {
            algorithm: self.algorithm,
            key_id,
            key_set_uri: self.key_set_uri.clone(),
            key: if self.embed_key {
                self.key.as_ref().map(WebKey::well_known)
            } else {
                None
            },
            typ: self.typ.clone(),
            cty: self.cty.clone(),
            certificate_uri: None,
            certificate_chain: self.certificate_chain.clone(),
            certificate_thumbprint: None,
            certificate_sha256_thumbprint: None,
            crit: if self.crit.is_empty() {
                None
            } else {
                Some(self.crit.clone())
            },
            ext: self.ext.clone(),
        };

        if let Some(crit) = &header.crit {
            for name in crit {
                let present = match Param::from_name(name) {
                    Some(param) => param.is_present(&header),
                    None => header.ext.contains_key(name),
                };
                if !present {
                    return Err(Error::CriticalParameterMissing(name.clone()));
                }
            }
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jose::KeyType;

    #[test]
    fn param_registry_round_trips_names() {
        for param in Param::ALL {
            assert_eq!(Param::from_name(param.name()), Some(*param));
        }
        assert_eq!(Param::from_name("x5t#S256"), Some(Param::CertificateSha256Thumbprint));
        assert!(Param::from_name("frobnicate").is_none());
    }

    #[test]
    fn encryption_headers_require_enc() {
        let header = WebCryptoHeader::builder(Algorithm::A128KW).build().unwrap();
        assert!(matches!(
            header.verify(None),
            Err(Error::HeaderInvalid(reason)) if reason.contains("content encryption")
        ));
    }

    #[test]
    fn registry_driven_required_params() {
        // PBES2 requires p2s and p2c beyond enc
        let header = WebCryptoHeader::builder(Algorithm::Pbes2Hs256A128Kw)
            .try_with_param("enc", "A128GCM")
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(
            header.verify(None),
            Err(Error::HeaderInvalid(reason)) if reason.contains("p2")
        ));
    }

    #[test]
    fn critical_extended_parameter_must_be_present() {
        let header = WebCryptoHeader::builder(Algorithm::HS256)
            .with_critical(["exp"])
            .build();
        assert!(matches!(
            header,
            Err(Error::CriticalParameterMissing(name)) if name == "exp"
        ));

        let header = WebCryptoHeader::builder(Algorithm::HS256)
            .with_critical(["exp"])
            .try_with_param("exp", 1_700_000_000u64)
            .unwrap()
            .build()
            .unwrap();
        assert!(header.verify(None).unwrap().is_none());
    }

    #[test]
    fn resolves_inline_key_as_well_known() {
        let key = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let header = WebCryptoHeader::builder(Algorithm::ES256)
            .with_well_known(key.clone())
            .build()
            .unwrap();
        let resolved = header.verify(None).unwrap().unwrap();
        assert!(!resolved.has_private_key());
        assert_eq!(resolved, key.well_known());
    }

    #[test]
    fn resolves_key_from_key_set_by_kid() {
        let key = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let published = WebKey::builder(KeyType::EcP256)
            .with_key_id("issuer-key")
            .with_material(key.well_known().material().cloned().unwrap())
            .build()
            .unwrap();
        let jwks = JsonWebKeySet {
            keys: vec![published.clone()],
        };

        let header = WebCryptoHeader::builder(Algorithm::ES256)
            .with_key_id("issuer-key")
            .with_key_set_uri("https://issuer.example/jwks.json")
            .build()
            .unwrap();
        let resolved = header.verify(Some(&jwks)).unwrap().unwrap();
        assert_eq!(resolved.key_id(), Some("issuer-key"));

        let miss = WebCryptoHeader::builder(Algorithm::ES256)
            .with_key_id("rotated-away")
            .with_key_set_uri("https://issuer.example/jwks.json")
            .build()
            .unwrap();
        assert!(matches!(miss.verify(Some(&jwks)), Err(Error::HeaderInvalid(_))));
    }

    #[test]
    fn header_map_round_trip() {
        let key = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let header = WebCryptoHeader::builder(Algorithm::ES256)
            .with_well_known(key)
            .with_header_type("JOSE")
            .try_with_param("custom", "value")
            .unwrap()
            .build()
            .unwrap();
        let map = header.to_map().unwrap();
        assert_eq!(map.get("alg"), Some(&Value::String("ES256".into())));
        let parsed = WebCryptoHeader::from_map(&map).unwrap();
        assert_eq!(parsed.algorithm(), Algorithm::ES256);
        assert_eq!(parsed.header_type(), Some("JOSE"));
        assert_eq!(
            parsed.extended_parameter("custom"),
            Some(&Value::String("value".into()))
        );
        assert!(parsed.key().is_some());
    }

    #[test]
    fn missing_alg_is_rejected() {
        let map = Map::new();
        assert!(matches!(
            WebCryptoHeader::from_map(&map),
            Err(Error::HeaderInvalid(_))
        ));
    }
}
