use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use serde_json::{Map, Value};
use sigil_error::OpaqueError;

use crate::jose::encoding::from_base64_url;
use crate::jose::{
    Algorithm, Encryption, Error, JweRecipientBuilder, KeyUse, WebEncryption, WebKey,
    WebSignature, WebSignedPayload,
};

/// An immutable JSON Web Token claims set, as defined in [`rfc7519`].
///
/// Build outbound tokens with [`WebToken::builder`]; inbound tokens are
/// reconstructed by [`WebToken::verify`] or [`WebToken::decrypt_and_verify`]
/// and are read-only.
///
/// [`rfc7519`]: https://datatracker.ietf.org/doc/html/rfc7519
#[derive(Debug, Clone, PartialEq)]
pub struct WebToken {
    claims: Map<String, Value>,
}

impl WebToken {
    /// Gets a mutable claims builder.
    #[must_use]
    pub fn builder() -> WebTokenBuilder {
        WebTokenBuilder {
            claims: Map::new(),
        }
    }

    /// Determines whether a compact JWT is encrypted, by the use of the
    /// algorithm named in its protected header.
    pub fn is_encrypted(jwt: &str) -> Result<bool, Error> {
        let protected = jwt.split('.').next().unwrap_or_default();
        let decoded = from_base64_url(protected)?;
        let header: Map<String, Value> = serde_json::from_slice(&decoded)?;
        match header.get("alg") {
            Some(Value::String(name)) => {
                Ok(Algorithm::from_name(name)?.key_use() == KeyUse::Encrypt)
            }
            _ => Err(Error::header_invalid("missing alg header parameter")),
        }
    }

    /// Verifies a signed JWT and reconstructs its claims.
    pub fn verify(jwt: &str, issuer_key: &WebKey) -> Result<Self, Error> {
        let signed = WebSignedPayload::parse(jwt)?;
        signed.verify(issuer_key)?;
        let claims: Map<String, Value> = serde_json::from_slice(signed.payload())?;
        Ok(Self { claims })
    }

    /// Decrypts an encrypted JWT with the audience key, then verifies the
    /// nested signed token with the issuer key.
    pub fn decrypt_and_verify(
        jwt: &str,
        issuer_key: &WebKey,
        audience_key: &WebKey,
    ) -> Result<Self, Error> {
        let decrypted = WebEncryption::parse(jwt)?.decrypt(audience_key)?;
        let nested = String::from_utf8(decrypted).map_err(|_| {
            Error::MalformedEncoding(OpaqueError::from_display("nested token is not UTF-8"))
        })?;
        Self::verify(&nested, issuer_key)
    }

    /// Gets the token identifier (`jti`).
    #[must_use]
    pub fn token_id(&self) -> Option<&str> {
        self.claims.get("jti").and_then(Value::as_str)
    }

    /// Gets the token issuer URI (`iss`).
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.claims.get("iss").and_then(Value::as_str)
    }

    /// Gets the token audience URIs (`aud`).
    #[must_use]
    pub fn audience(&self) -> Vec<&str> {
        match self.claims.get("aud") {
            Some(Value::String(single)) => vec![single.as_str()],
            Some(Value::Array(many)) => many.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Gets the subject (`sub`).
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(Value::as_str)
    }

    /// Gets the time the token was issued (`iat`).
    pub fn issued_at(&self) -> Result<Option<Timestamp>, Error> {
        self.numeric_date("iat")
    }

    /// Gets the time before which the token should not be accepted (`nbf`).
    pub fn not_before(&self) -> Result<Option<Timestamp>, Error> {
        self.numeric_date("nbf")
    }

    /// Gets the time after which the token should not be accepted (`exp`).
    pub fn expires(&self) -> Result<Option<Timestamp>, Error> {
        self.numeric_date("exp")
    }

    /// Gets the nonce claim.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.claims.get("nonce").and_then(Value::as_str)
    }

    /// Gets an extension claim by name.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    fn numeric_date(&self, name: &'static str) -> Result<Option<Timestamp>, Error> {
        match self.claims.get(name) {
            Some(value) => {
                let seconds = value
                    .as_i64()
                    .ok_or_else(|| Error::claims_invalid(format!("{name} must be numeric")))?;
                Timestamp::from_second(seconds)
                    .map(Some)
                    .map_err(|_| Error::claims_invalid(format!("{name} is out of range")))
            }
            None => Ok(None),
        }
    }

    /// Determines whether `exp` has passed, with the given leeway.
    pub fn is_expired(&self, leeway: SignedDuration) -> Result<bool, Error> {
        Ok(match self.expires()? {
            Some(expires) => Timestamp::now().duration_since(expires) > leeway,
            None => false,
        })
    }

    /// Verifies that the registered claims are well-formed and inside the
    /// allowed time window.
    ///
    /// Requires `iss`, `aud`, `sub`, `iat`, and `exp` to be present and
    /// non-empty, `audience` to appear in the audience set, the token
    /// lifetime to be no longer than `ttl`, and the current instant to fall
    /// within `[nbf, exp]`, both ends extended by the caller-supplied
    /// `leeway`.
    pub fn validate_claims(
        &self,
        audience: &str,
        ttl: SignedDuration,
        leeway: SignedDuration,
    ) -> Result<(), Error> {
        if self.issuer().is_none_or(str::is_empty) {
            return Err(Error::claims_invalid("missing iss claim"));
        }
        if self.subject().is_none_or(str::is_empty) {
            return Err(Error::claims_invalid("missing sub claim"));
        }

        let audiences = self.audience();
        if audiences.is_empty() {
            return Err(Error::claims_invalid("missing aud claim"));
        }
        if !audiences.contains(&audience) {
            return Err(Error::claims_invalid(format!(
                "aud claim does not include {audience}"
            )));
        }

        let issued_at = self
            .issued_at()?
            .ok_or_else(|| Error::claims_invalid("missing iat claim"))?;
        let expires = self
            .expires()?
            .ok_or_else(|| Error::claims_invalid("missing exp claim"))?;

        if expires.duration_since(issued_at) > ttl {
            return Err(Error::claims_invalid(format!(
                "exp claim must be no more than {ttl:#} after iat"
            )));
        }

        let now = Timestamp::now();
        if issued_at.duration_since(now) > leeway {
            return Err(Error::claims_invalid("iat claim is in the future"));
        }
        if let Some(not_before) = self.not_before()?
            && not_before.duration_since(now) > leeway
        {
            return Err(Error::claims_invalid("token is not yet valid"));
        }
        if now.duration_since(expires) > leeway {
            return Err(Error::claims_invalid("token is expired"));
        }

        Ok(())
    }

    /// Encodes all claims as a signed JWT in compact serialization.
    pub fn sign(
        &self,
        header_type: &str,
        algorithm: Algorithm,
        issuer_key: &WebKey,
    ) -> Result<String, Error> {
        WebSignature::builder(algorithm)
            .compact()
            .key(issuer_key.clone())
            .header_type(header_type)
            .sign(serde_json::to_vec(&self.claims)?)?
            .compact()
    }

    /// Encodes all claims as a signed, then encrypted, JWT: the compact
    /// signed token becomes the plaintext of a single-recipient encrypted
    /// message with compression enabled.
    pub fn sign_and_encrypt(
        &self,
        header_type: &str,
        sign_algorithm: Algorithm,
        issuer_key: &WebKey,
        encrypt_algorithm: Algorithm,
        encryption: Encryption,
        audience_key: &WebKey,
    ) -> Result<String, Error> {
        let signed = self.sign(header_type, sign_algorithm, issuer_key)?;
        WebEncryption::builder(encryption, true)
            .compact()
            .add_recipient(
                JweRecipientBuilder::new(encrypt_algorithm)
                    .key(audience_key.clone())
                    .content_type(header_type),
            )
            .encrypt(signed)?
            .compact()
    }
}

/// Mutable accumulation of JWT claims; [`WebTokenBuilder::build`] freezes
/// the claims into an immutable [`WebToken`].
#[derive(Debug, Clone, Default)]
pub struct WebTokenBuilder {
    claims: Map<String, Value>,
}

impl WebTokenBuilder {
    /// Set the token identifier (`jti`).
    #[must_use]
    pub fn token_id(mut self, token_id: impl Into<String>) -> Self {
        self.claims
            .insert("jti".into(), Value::String(token_id.into()));
        self
    }

    /// Set the issuer URI (`iss`).
    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.claims
            .insert("iss".into(), Value::String(issuer.into()));
        self
    }

    /// Add an audience URI (`aud`); the claim always encodes as an array.
    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        match self.claims.get_mut("aud") {
            Some(Value::Array(audiences)) => {
                audiences.push(Value::String(audience.into()));
            }
            _ => {
                self.claims.insert(
                    "aud".into(),
                    Value::Array(vec![Value::String(audience.into())]),
                );
            }
        }
        self
    }

    /// Set the subject (`sub`).
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.claims
            .insert("sub".into(), Value::String(subject.into()));
        self
    }

    /// Set the issued-at instant (`iat`).
    #[must_use]
    pub fn issued_at(mut self, issued_at: Timestamp) -> Self {
        self.claims
            .insert("iat".into(), Value::from(issued_at.as_second()));
        self
    }

    /// Set the issued-at instant to now.
    #[must_use]
    pub fn issue_now(self) -> Self {
        self.issued_at(Timestamp::now())
    }

    /// Set the not-before instant (`nbf`).
    #[must_use]
    pub fn not_before(mut self, not_before: Timestamp) -> Self {
        self.claims
            .insert("nbf".into(), Value::from(not_before.as_second()));
        self
    }

    /// Set the expiration instant (`exp`).
    #[must_use]
    pub fn expires(mut self, expires: Timestamp) -> Self {
        self.claims
            .insert("exp".into(), Value::from(expires.as_second()));
        self
    }

    /// Set the expiration a duration from now.
    pub fn expires_in(self, ttl: SignedDuration) -> Result<Self, Error> {
        let expires = Timestamp::now()
            .checked_add(ttl)
            .map_err(|_| Error::claims_invalid("exp is out of range"))?;
        Ok(self.expires(expires))
    }

    /// Set the nonce claim.
    #[must_use]
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.claims
            .insert("nonce".into(), Value::String(nonce.into()));
        self
    }

    /// Set an extension claim.
    pub fn claim(mut self, name: impl Into<String>, value: impl Serialize) -> Result<Self, Error> {
        let value = serde_json::to_value(value)?;
        self.claims.insert(name.into(), value);
        Ok(self)
    }

    /// Freeze the claims into an immutable token.
    #[must_use]
    pub fn build(self) -> WebToken {
        WebToken {
            claims: self.claims,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: SignedDuration = SignedDuration::from_secs(60);
    const HOUR: SignedDuration = SignedDuration::from_secs(3600);
    const LEEWAY: SignedDuration = SignedDuration::from_secs(15);

    fn token() -> WebToken {
        WebToken::builder()
            .token_id("t-1")
            .issuer("https://issuer.example")
            .audience("https://audience.example")
            .subject("subject")
            .issue_now()
            .expires_in(MINUTE)
            .unwrap()
            .nonce("n-0S6_WzA2Mj")
            .claim("scope", "openid profile")
            .unwrap()
            .build()
    }

    #[test]
    fn audience_always_encodes_as_an_array() {
        let key = WebKey::ephemeral(Algorithm::HS256).unwrap();
        let jwt = token().sign("JWT", Algorithm::HS256, &key).unwrap();
        let signed = WebSignedPayload::parse(&jwt).unwrap();
        let claims: Map<String, Value> = serde_json::from_slice(signed.payload()).unwrap();
        assert!(matches!(claims.get("aud"), Some(Value::Array(_))));
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let key = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let jwt = token().sign("JWT", Algorithm::ES256, &key).unwrap();
        assert_eq!(jwt.matches('.').count(), 2);
        assert!(!WebToken::is_encrypted(&jwt).unwrap());

        let verified = WebToken::verify(&jwt, &key).unwrap();
        assert_eq!(verified.issuer(), Some("https://issuer.example"));
        assert_eq!(verified.subject(), Some("subject"));
        assert_eq!(verified.nonce(), Some("n-0S6_WzA2Mj"));
        assert_eq!(
            verified.claim("scope"),
            Some(&Value::String("openid profile".into()))
        );
        verified
            .validate_claims("https://audience.example", HOUR, LEEWAY)
            .unwrap();

        let wrong = WebKey::ephemeral(Algorithm::ES256).unwrap();
        assert!(matches!(
            WebToken::verify(&jwt, &wrong),
            Err(Error::SignatureInvalid)
        ));
    }

    #[test]
    fn sign_and_encrypt_nests_a_signed_token() {
        let issuer = WebKey::ephemeral(Algorithm::ES256).unwrap();
        let audience = WebKey::ephemeral(Algorithm::EcdhEs).unwrap();

        let token = token();
        let jwt = token
            .sign_and_encrypt(
                "JWT",
                Algorithm::ES256,
                &issuer,
                Algorithm::EcdhEs,
                Encryption::A128CbcHs256,
                &audience,
            )
            .unwrap();
        assert_eq!(jwt.matches('.').count(), 4);
        assert!(WebToken::is_encrypted(&jwt).unwrap());

        let verified = WebToken::decrypt_and_verify(&jwt, &issuer, &audience).unwrap();
        assert_eq!(verified, token);
        verified
            .validate_claims("https://audience.example", HOUR, LEEWAY)
            .unwrap();
    }

    #[test]
    fn validate_rejects_expired_tokens() {
        let now = Timestamp::now();
        let token = WebToken::builder()
            .issuer("https://issuer.example")
            .audience("https://audience.example")
            .subject("subject")
            .issued_at(now.checked_sub(HOUR).unwrap())
            .expires(now.checked_sub(MINUTE).unwrap())
            .build();
        assert!(token.is_expired(LEEWAY).unwrap());
        assert!(matches!(
            token.validate_claims("https://audience.example", HOUR, LEEWAY),
            Err(Error::ClaimsInvalid(reason)) if reason.contains("expired")
        ));
    }

    #[test]
    fn validate_rejects_future_not_before() {
        let now = Timestamp::now();
        let token = WebToken::builder()
            .issuer("https://issuer.example")
            .audience("https://audience.example")
            .subject("subject")
            .issued_at(now)
            .not_before(now.checked_add(HOUR).unwrap())
            .expires(now.checked_add(HOUR).unwrap())
            .build();
        assert!(matches!(
            token.validate_claims("https://audience.example", HOUR, LEEWAY),
            Err(Error::ClaimsInvalid(reason)) if reason.contains("not yet valid")
        ));
    }

    #[test]
    fn validate_rejects_unknown_audience() {
        assert!(matches!(
            token().validate_claims("https://other.example", HOUR, LEEWAY),
            Err(Error::ClaimsInvalid(reason)) if reason.contains("aud")
        ));
    }

    #[test]
    fn validate_rejects_excessive_lifetime() {
        let token = WebToken::builder()
            .issuer("https://issuer.example")
            .audience("https://audience.example")
            .subject("subject")
            .issue_now()
            .expires_in(HOUR)
            .unwrap()
            .build();
        assert!(matches!(
            token.validate_claims("https://audience.example", MINUTE, LEEWAY),
            Err(Error::ClaimsInvalid(reason)) if reason.contains("exp claim")
        ));
    }

    #[test]
    fn validate_requires_registered_claims() {
        let bare = WebToken::builder().build();
        assert!(matches!(
            bare.validate_claims("https://audience.example", HOUR, LEEWAY),
            Err(Error::ClaimsInvalid(reason)) if reason.contains("iss")
        ));
    }
}
