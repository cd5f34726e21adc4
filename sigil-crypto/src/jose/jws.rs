use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sigil_error::OpaqueError;

use crate::jose::encoding::{base64_url, from_base64_url};
use crate::jose::{Algorithm, Error, HeaderBuilder, KeyUse, WebCryptoHeader, WebKey};

/// A single signature over a payload: its header split and raw signature
/// bytes, as defined in [`rfc7515`].
///
/// The exact base64url text of the protected header is retained so that
/// verification re-uses the signed bytes instead of re-serializing.
///
/// [`rfc7515`]: https://datatracker.ietf.org/doc/html/rfc7515
#[derive(Debug, Clone, PartialEq)]
pub struct WebSignature {
    protected_b64: String,
    header: WebCryptoHeader,
    unprotected: Option<Map<String, Value>>,
    signature: Vec<u8>,
}

impl WebSignature {
    /// Create a builder for signing a payload with the given algorithm.
    #[must_use]
    pub fn builder(algorithm: Algorithm) -> JwsBuilder {
        JwsBuilder::new(algorithm)
    }

    /// The merged (protected + unprotected) header view.
    #[must_use]
    pub fn header(&self) -> &WebCryptoHeader {
        &self.header
    }

    /// The raw signature bytes.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    fn signing_input(&self, payload_b64: &str) -> String {
        format!("{}.{}", self.protected_b64, payload_b64)
    }

    /// Verify this signature over the encoded payload with the given key.
    fn verify(&self, payload_b64: &str, key: &WebKey) -> Result<(), Error> {
        let input = self.signing_input(payload_b64);
        key.verify_signature(self.header.algorithm(), input.as_bytes(), &self.signature)
    }
}

/// A payload together with one or more signatures over it.
///
/// Produced by [`JwsBuilder::sign`] or by [`WebSignedPayload::parse`] from
/// compact, flattened, or general JWS serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSignedPayload {
    payload_b64: String,
    payload: Vec<u8>,
    signatures: Vec<WebSignature>,
}

#[derive(Serialize, Deserialize)]
struct SignatureWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    protected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<Map<String, Value>>,
    signature: String,
}

#[derive(Serialize, Deserialize)]
struct JwsWire {
    payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    signatures: Option<Vec<SignatureWire>>,
    // flattened serialization
    #[serde(skip_serializing_if = "Option::is_none")]
    protected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

impl WebSignedPayload {
    /// The decoded payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The signatures over the payload, one per signer.
    #[must_use]
    pub fn signatures(&self) -> &[WebSignature] {
        &self.signatures
    }

    /// Parses a compact, flattened, or general JWS serialization.
    pub fn parse(jws: &str) -> Result<Self, Error> {
        if jws.trim_start().starts_with('{') {
            let wire: JwsWire = serde_json::from_str(jws)?;
            let payload = from_base64_url(&wire.payload)?;
            let entries = match (wire.signatures, wire.signature) {
                (Some(entries), None) => entries,
                (None, Some(signature)) => vec![SignatureWire {
                    protected: wire.protected,
                    header: wire.header,
                    signature,
                }],
                _ => {
                    return Err(Error::MalformedEncoding(OpaqueError::from_display(
                        "one of signature or signatures is required",
                    )));
                }
            };
            let signatures = entries
                .into_iter()
                .map(Self::decode_signature)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Self {
                payload_b64: wire.payload,
                payload,
                signatures,
            })
        } else {
            let mut parts = jws.split('.');
            let (protected, payload, signature) =
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some(protected), Some(payload), Some(signature), None) => {
                        (protected, payload, signature)
                    }
                    _ => {
                        return Err(Error::MalformedEncoding(OpaqueError::from_display(
                            "compact JWS requires exactly three segments",
                        )));
                    }
                };
            let signatures = vec![Self::decode_signature(SignatureWire {
                protected: Some(protected.to_owned()),
                header: None,
                signature: signature.to_owned(),
            })?];
            Ok(Self {
                payload_b64: payload.to_owned(),
                payload: from_base64_url(payload)?,
                signatures,
            })
        }
    }

    fn decode_signature(wire: SignatureWire) -> Result<WebSignature, Error> {
        let protected_b64 = wire.protected.unwrap_or_default();
        let mut merged = if protected_b64.is_empty() {
            Map::new()
        } else {
            let decoded = from_base64_url(&protected_b64)?;
            serde_json::from_slice::<Map<String, Value>>(&decoded)?
        };
        if let Some(unprotected) = &wire.header {
            for (name, value) in unprotected {
                if merged.insert(name.clone(), value.clone()).is_some() {
                    return Err(Error::MalformedEncoding(OpaqueError::from_display(
                        "header parameter present in both protected and unprotected headers",
                    )));
                }
            }
        }
        let header = WebCryptoHeader::from_map(&merged)?;
        Ok(WebSignature {
            protected_b64,
            header,
            unprotected: wire.header,
            signature: from_base64_url(&wire.signature)?,
        })
    }

    /// The compact serialization: exactly
    /// `BASE64URL(protected) "." BASE64URL(payload) "." BASE64URL(signature)`.
    pub fn compact(&self) -> Result<String, Error> {
        let [signature] = self.signatures.as_slice() else {
            return Err(Error::header_invalid(
                "compact serialization requires exactly one signature",
            ));
        };
        if signature.unprotected.is_some() {
            return Err(Error::header_invalid(
                "compact serialization does not support unprotected headers",
            ));
        }
        Ok(format!(
            "{}.{}.{}",
            signature.protected_b64,
            self.payload_b64,
            base64_url(&signature.signature)
        ))
    }

    /// The general JSON serialization with one entry per signer.
    pub fn to_json(&self) -> Result<String, Error> {
        let wire = JwsWire {
            payload: self.payload_b64.clone(),
            signatures: Some(
                self.signatures
                    .iter()
                    .map(|signature| SignatureWire {
                        protected: (!signature.protected_b64.is_empty())
                            .then(|| signature.protected_b64.clone()),
                        header: signature.unprotected.clone(),
                        signature: base64_url(&signature.signature),
                    })
                    .collect(),
            ),
            protected: None,
            header: None,
            signature: None,
        };
        serde_json::to_string(&wire).map_err(Error::from)
    }

    /// Verifies the payload against the signatures using the supplied key.
    ///
    /// Header and key validation failures surface as their own error kinds;
    /// a signature mismatch is always the generic
    /// [`Error::SignatureInvalid`]. With multiple signatures, verification
    /// succeeds when at least one signature verifies under the key.
    pub fn verify(&self, key: &WebKey) -> Result<(), Error> {
        if self.signatures.is_empty() {
            return Err(Error::SignatureInvalid);
        }
        key.verify()?;
        for signature in &self.signatures {
            signature.header.verify(None)?;
        }
        for signature in &self.signatures {
            if check_key_for(signature.header.algorithm(), key).is_err() {
                continue;
            }
            if signature.verify(&self.payload_b64, key).is_ok() {
                return Ok(());
            }
        }
        Err(Error::SignatureInvalid)
    }
}

/// Validates that a key may be used with a signature algorithm.
fn check_key_for(algorithm: Algorithm, key: &WebKey) -> Result<(), Error> {
    if algorithm.key_use() != KeyUse::Sign {
        return Err(Error::header_invalid("not a signature algorithm"));
    }
    if !algorithm.key_types().contains(&key.key_type()) {
        return Err(crate::jose::KeyRejection::TypeMismatch.into());
    }
    if let Some(bound) = key.algorithm()
        && bound != algorithm
    {
        return Err(crate::jose::KeyRejection::TypeMismatch.into());
    }
    if key.key_use().is_some_and(|key_use| key_use != KeyUse::Sign) {
        return Err(crate::jose::KeyRejection::UseMismatch.into());
    }
    Ok(())
}

struct SignerEntry {
    header: HeaderBuilder,
    unprotected: Map<String, Value>,
}

/// Builds one or more signatures over a payload.
///
/// Call [`JwsBuilder::next`] to chain an additional signer over the same
/// payload; [`JwsBuilder::compact`] restricts the message to a single fully
/// protected signature suitable for compact serialization.
pub struct JwsBuilder {
    compact: bool,
    signers: Vec<SignerEntry>,
}

impl JwsBuilder {
    /// Create a builder with an initial signer for the given algorithm.
    #[must_use]
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            compact: false,
            signers: vec![SignerEntry {
                header: HeaderBuilder::new(algorithm),
                unprotected: Map::new(),
            }],
        }
    }

    /// Restrict the message to compact-serializable form: a single signer
    /// with every parameter protected.
    #[must_use]
    pub fn compact(mut self) -> Self {
        self.compact = true;
        self
    }

    /// Add another signer over the same payload.
    #[must_use]
    pub fn next(mut self, algorithm: Algorithm) -> Self {
        self.signers.push(SignerEntry {
            header: HeaderBuilder::new(algorithm),
            unprotected: Map::new(),
        });
        self
    }

    fn current(&mut self) -> &mut SignerEntry {
        // `signers` is never empty: `new` seeds the first entry
        let index = self.signers.len() - 1;
        &mut self.signers[index]
    }

    /// Set the signing key for the current signer without serializing it.
    #[must_use]
    pub fn key(mut self, key: WebKey) -> Self {
        let current = self.current();
        current.header = current.header.clone().with_key(key);
        self
    }

    /// Set the signing key for the current signer and embed its well-known
    /// projection in the header.
    #[must_use]
    pub fn well_known(mut self, key: WebKey) -> Self {
        let current = self.current();
        current.header = current.header.clone().with_well_known(key);
        self
    }

    /// Set the key ID for the current signer.
    #[must_use]
    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        let current = self.current();
        current.header = current.header.clone().with_key_id(key_id);
        self
    }

    /// Set the header type for the current signer.
    #[must_use]
    pub fn header_type(mut self, typ: impl Into<String>) -> Self {
        let current = self.current();
        current.header = current.header.clone().with_header_type(typ);
        self
    }

    /// Set the content type for the current signer.
    #[must_use]
    pub fn content_type(mut self, cty: impl Into<String>) -> Self {
        let current = self.current();
        current.header = current.header.clone().with_content_type(cty);
        self
    }

    /// Declare critical parameters for the current signer.
    #[must_use]
    pub fn critical<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current = self.current();
        current.header = current.header.clone().with_critical(names);
        self
    }

    /// Set a protected extended parameter for the current signer.
    pub fn try_with_param(
        mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, Error> {
        let current = self.current();
        current.header = current.header.clone().try_with_param(name, value)?;
        Ok(self)
    }

    /// Set an unprotected extended parameter for the current signer.
    pub fn try_with_unprotected_param(
        mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, Error> {
        let value = serde_json::to_value(value)?;
        self.current().unprotected.insert(name.into(), value);
        Ok(self)
    }

    /// Sign the payload with every configured signer.
    pub fn sign(self, payload: impl AsRef<[u8]>) -> Result<WebSignedPayload, Error> {
        let payload = payload.as_ref();
        let payload_b64 = base64_url(payload);

        if self.compact && self.signers.len() != 1 {
            return Err(Error::header_invalid(
                "compact serialization requires exactly one signer",
            ));
        }

        let mut signatures = Vec::with_capacity(self.signers.len());
        for signer in &self.signers {
            if self.compact && !signer.unprotected.is_empty() {
                return Err(Error::header_invalid(
                    "compact serialization does not support unprotected headers",
                ));
            }

            let algorithm = signer.header.algorithm();
            let key = signer.header.operation_key()?;
            key.verify()?;
            check_key_for(algorithm, key)?;

            let header = signer.header.build()?;
            let mut protected = header.to_map()?;
            // inline key material is never part of the protected header
            let jwk = protected.remove("jwk");

            let mut unprotected = signer.unprotected.clone();
            if !self.compact && let Some(jwk) = jwk {
                unprotected.insert("jwk".to_owned(), jwk);
            }
            for name in unprotected.keys() {
                if protected.contains_key(name) {
                    return Err(Error::header_invalid(format!(
                        "{name} is both protected and unprotected",
                    )));
                }
            }

            let protected_b64 = base64_url(serde_json::to_vec(&protected)?);
            let signing_input = format!("{protected_b64}.{payload_b64}");
            let signature = key.sign_payload(algorithm, signing_input.as_bytes())?;
            tracing::trace!(algorithm = algorithm.name(), "payload signed");

            let mut merged = protected;
            for (name, value) in &unprotected {
                merged.insert(name.clone(), value.clone());
            }
            signatures.push(WebSignature {
                protected_b64,
                header: WebCryptoHeader::from_map(&merged)?,
                unprotected: (!unprotected.is_empty()).then_some(unprotected),
                signature,
            });
        }

        Ok(WebSignedPayload {
            payload_b64,
            payload: payload.to_vec(),
            signatures,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_err;

    use super::*;
    use crate::jose::KeyType;

    #[test]
    fn rfc7515_a1_hs256_signature_bytes() {
        // RFC 7515 Appendix A.1: HMAC-SHA256 over the exact signing input
        let key = from_base64_url(
            "AyM1SysPpbyDfgZld3umj1qzKObwVMkoqQ-EstJQLr_T-1qS0gZH75aKtMN3Yj0iPS4hcgUuTwjAzZr1Z9CAow",
        )
        .unwrap();
        let key = crate::jose::WebKey::builder(KeyType::Raw)
            .with_material(crate::jose::KeyMaterial::Raw {
                k: zeroize::Zeroizing::new(key),
            })
            .build()
            .unwrap();
        let signing_input = "eyJ0eXAiOiJKV1QiLA0KICJhbGciOiJIUzI1NiJ9.eyJpc3MiOiJqb2UiLA0KICJleHAiOjEzMDA4MTkzODAsDQogImh0dHA6Ly9leGFtcGxlLmNvbS9pc19yb290Ijp0cnVlfQ";
        let signature = key
            .sign_payload(Algorithm::HS256, signing_input.as_bytes())
            .unwrap();
        assert_eq!(
            base64_url(&signature),
            "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"
        );
    }

    #[test]
    fn sign_verify_round_trip_for_all_signature_algorithms() {
        for algorithm in [
            Algorithm::HS256,
            Algorithm::HS384,
            Algorithm::HS512,
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::ES256,
            Algorithm::ES384,
            Algorithm::ES512,
            Algorithm::EdDSA,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ] {
            let key = WebKey::ephemeral(algorithm).unwrap();
            let signed = WebSignature::builder(algorithm)
                .compact()
                .key(key.clone())
                .sign(b"hello")
                .unwrap();
            let compact = signed.compact().unwrap();
            let parsed = WebSignedPayload::parse(&compact).unwrap();
            assert_eq!(parsed.payload(), b"hello");
            parsed.verify(&key).unwrap();
        }
    }

    #[test]
    fn compact_has_exactly_two_separators() {
        let key = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let compact = WebSignature::builder(Algorithm::ES256)
            .compact()
            .key(key.clone())
            .sign(b"hello")
            .unwrap()
            .compact()
            .unwrap();
        assert_eq!(compact.matches('.').count(), 2);

        WebSignedPayload::parse(&compact).unwrap().verify(&key).unwrap();

        let other = WebKey::ephemeral(Algorithm::ES256).unwrap();
        assert!(matches!(
            WebSignedPayload::parse(&compact).unwrap().verify(&other),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn flipping_any_signature_byte_is_detected() {
        let key = WebKey::ephemeral(Algorithm::HS256).unwrap();
        let compact = WebSignature::builder(Algorithm::HS256)
            .compact()
            .key(key.clone())
            .sign(b"payload bytes")
            .unwrap()
            .compact()
            .unwrap();

        let (rest, signature) = compact.rsplit_once('.').unwrap();
        let mut signature = from_base64_url(signature).unwrap();
        for i in 0..signature.len() {
            signature[i] ^= 0x01;
            let tampered = format!("{rest}.{}", base64_url(&signature));
            let parsed = WebSignedPayload::parse(&tampered).unwrap();
            assert!(
                matches!(parsed.verify(&key), Err(Error::SignatureInvalid)),
                "flip at {i} not detected"
            );
            signature[i] ^= 0x01;
        }
    }

    #[test]
    fn flipping_any_payload_byte_is_detected() {
        let key = WebKey::ephemeral(Algorithm::HS256).unwrap();
        let compact = WebSignature::builder(Algorithm::HS256)
            .compact()
            .key(key.clone())
            .sign(b"payload")
            .unwrap()
            .compact()
            .unwrap();

        let mut parts = compact.split('.');
        let (protected, payload, signature) = (
            parts.next().unwrap(),
            parts.next().unwrap(),
            parts.next().unwrap(),
        );
        let mut payload = from_base64_url(payload).unwrap();
        for i in 0..payload.len() {
            payload[i] ^= 0x01;
            let tampered = format!("{protected}.{}.{signature}", base64_url(&payload));
            let parsed = WebSignedPayload::parse(&tampered).unwrap();
            assert!(matches!(parsed.verify(&key), Err(Error::SignatureInvalid)));
            payload[i] ^= 0x01;
        }
    }

    #[test]
    fn multiple_signatures_share_the_payload() {
        let first = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let second = WebKey::ephemeral(Algorithm::HS384).unwrap();

        let signed = WebSignature::builder(Algorithm::ES256)
            .key(first.clone())
            .next(Algorithm::HS384)
            .key(second.clone())
            .sign(b"multi")
            .unwrap();
        assert_eq!(signed.signatures().len(), 2);

        let serialized = signed.to_json().unwrap();
        let parsed = WebSignedPayload::parse(&serialized).unwrap();
        assert_eq!(parsed.payload(), b"multi");
        parsed.verify(&first).unwrap();
        parsed.verify(&second).unwrap();

        let stranger = WebKey::ephemeral(Algorithm::ES256).unwrap();
        assert!(matches!(
            parsed.verify(&stranger),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn unprotected_headers_survive_general_serialization() {
        let key = WebKey::ephemeral(Algorithm::HS256).unwrap();
        let signed = WebSignature::builder(Algorithm::HS256)
            .key(key.clone())
            .try_with_unprotected_param("state", "opaque")
            .unwrap()
            .sign(b"data")
            .unwrap();
        let parsed = WebSignedPayload::parse(&signed.to_json().unwrap()).unwrap();
        parsed.verify(&key).unwrap();
        assert_eq!(
            parsed.signatures()[0]
                .header()
                .extended_parameter("state"),
            Some(&Value::String("opaque".into()))
        );
        assert_err!(parsed.compact());
    }

    #[test]
    fn critical_parameter_without_value_fails() {
        let key = WebKey::ephemeral(Algorithm::HS256).unwrap();
        let result = WebSignature::builder(Algorithm::HS256)
            .key(key)
            .critical(["exp"])
            .sign(b"data");
        assert!(matches!(
            result,
            Err(Error::CriticalParameterMissing(name)) if name == "exp"
        ));
    }

    #[test]
    fn verified_payload_is_only_released_on_success() {
        let key = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let wrong = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let compact = WebSignature::builder(Algorithm::ES256)
            .compact()
            .key(key)
            .sign(b"secret claims")
            .unwrap()
            .compact()
            .unwrap();
        let parsed = WebSignedPayload::parse(&compact).unwrap();
        assert!(parsed.verify(&wrong).is_err());
    }
}
