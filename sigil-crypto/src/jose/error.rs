use std::{error, fmt};

use sigil_error::OpaqueError;

/// Indicates the specific type/cause of a JOSE processing error.
///
/// Every variant is terminal for the operation that produced it; nothing in
/// this module retries internally. [`Error::SignatureInvalid`] and
/// [`Error::DecryptionFailed`] deliberately carry no detail so that callers
/// cannot be turned into padding or comparison oracles.
#[derive(Debug)]
pub enum Error {
    /// An `alg` or `enc` wire name that is not part of the registry.
    UnknownAlgorithm(String),
    /// A key failed validation; see [`KeyRejection`] for the reason.
    KeyInvalid(KeyRejection),
    /// A header is missing a required parameter or is internally inconsistent.
    HeaderInvalid(String),
    /// A declared critical parameter has no corresponding value.
    CriticalParameterMissing(String),
    /// Signature verification failed.
    SignatureInvalid,
    /// Decryption failed: key unwrap, tag or MAC verification.
    DecryptionFailed,
    /// Malformed base64url, PEM, DER, JSON, or compact serialization.
    MalformedEncoding(OpaqueError),
    /// JWT claims failed temporal or audience validation.
    ClaimsInvalid(String),
}

/// The reason a [`WebKey`] was rejected by [`WebKey::verify`].
///
/// [`WebKey`]: crate::jose::WebKey
/// [`WebKey::verify`]: crate::jose::WebKey::verify
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRejection {
    /// Key type is not set and could not be inferred.
    MissingType,
    /// Key type is not permitted for the bound algorithm.
    TypeMismatch,
    /// Key use contradicts the bound algorithm's use.
    UseMismatch,
    /// Key operations are not a valid pair/singleton, exceed the algorithm's
    /// permitted operations, or contradict the key use.
    OpsMismatch,
    /// Public and private key parameters disagree (curve or RSA modulus).
    ParameterMismatch,
    /// Key material required for the requested operation is absent.
    MissingMaterial(&'static str),
    /// Key material that must not be present for the key type was found.
    UnexpectedMaterial(&'static str),
    /// Certificate chain is inconsistent with the key or its thumbprints.
    CertificateMismatch,
    /// More than one private key was found in a single PEM document.
    MultiplePrivateKeys,
    /// The key type is representable but its primitive is not available.
    Unsupported(&'static str),
}

impl Error {
    /// Create a [`Error::KeyInvalid`] from a rejection reason.
    #[must_use]
    pub fn key_invalid(rejection: KeyRejection) -> Self {
        Self::KeyInvalid(rejection)
    }

    /// Create a [`Error::HeaderInvalid`] with the given reason.
    #[must_use]
    pub fn header_invalid(reason: impl Into<String>) -> Self {
        Self::HeaderInvalid(reason.into())
    }

    /// Create a [`Error::ClaimsInvalid`] with the given reason.
    #[must_use]
    pub fn claims_invalid(reason: impl Into<String>) -> Self {
        Self::ClaimsInvalid(reason.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown algorithm: {name}"),
            Self::KeyInvalid(rejection) => write!(f, "invalid key: {rejection}"),
            Self::HeaderInvalid(reason) => write!(f, "invalid header: {reason}"),
            Self::CriticalParameterMissing(name) => {
                write!(f, "missing critical parameter: {name}")
            }
            Self::SignatureInvalid => write!(f, "signature verification failed"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::MalformedEncoding(err) => write!(f, "malformed encoding: {err}"),
            Self::ClaimsInvalid(reason) => write!(f, "invalid claims: {reason}"),
        }
    }
}

impl fmt::Display for KeyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingType => write!(f, "key type is required"),
            Self::TypeMismatch => write!(f, "key type is not valid for the algorithm"),
            Self::UseMismatch => write!(f, "key use is not valid for the algorithm"),
            Self::OpsMismatch => write!(f, "key operations are not valid"),
            Self::ParameterMismatch => write!(f, "public and private key parameters differ"),
            Self::MissingMaterial(what) => write!(f, "missing key material: {what}"),
            Self::UnexpectedMaterial(what) => write!(f, "unexpected key material: {what}"),
            Self::CertificateMismatch => write!(f, "certificate chain does not match key"),
            Self::MultiplePrivateKeys => write!(f, "multiple private keys"),
            Self::Unsupported(what) => write!(f, "unsupported key primitive: {what}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::MalformedEncoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KeyRejection> for Error {
    fn from(value: KeyRejection) -> Self {
        Self::KeyInvalid(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedEncoding(OpaqueError::from_std(value).context("json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_failures_carry_no_detail() {
        assert_eq!(Error::SignatureInvalid.to_string(), "signature verification failed");
        assert_eq!(Error::DecryptionFailed.to_string(), "decryption failed");
    }

    #[test]
    fn key_rejection_is_specific() {
        let err = Error::from(KeyRejection::MissingMaterial("private key"));
        assert_eq!(err.to_string(), "invalid key: missing key material: private key");
    }
}
