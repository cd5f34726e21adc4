use serde::{Deserialize, Serialize};

use crate::jose::jwk::{KeyType, KeyUse, Operation};
use crate::jose::{Error, Param};

/// JWA signature and key-management algorithms as defined in [`rfc7518`],
/// with the Edwards additions from [`rfc8037`].
///
/// Every other component in this module treats the metadata below as the
/// single source of truth for key-type, use, operation, and header-parameter
/// compatibility. Callers must never duplicate these tables.
///
/// [`rfc7518`]: https://datatracker.ietf.org/doc/html/rfc7518
/// [`rfc8037`]: https://datatracker.ietf.org/doc/html/rfc8037
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// HMAC using SHA-256 (Required)
    HS256,
    /// HMAC using SHA-384 (Optional)
    HS384,
    /// HMAC using SHA-512 (Optional)
    HS512,
    /// RSASSA-PKCS1-v1_5 using SHA-256 (Recommended)
    RS256,
    /// RSASSA-PKCS1-v1_5 using SHA-384 (Optional)
    RS384,
    /// RSASSA-PKCS1-v1_5 using SHA-512 (Optional)
    RS512,
    /// ECDSA using P-256 and SHA-256 (Recommended+)
    ES256,
    /// ECDSA using P-384 and SHA-384 (Optional)
    ES384,
    /// ECDSA using P-521 and SHA-512 (Optional)
    ES512,
    /// Edwards-curve digital signature algorithm
    EdDSA,
    /// RSASSA-PSS using SHA-256 and MGF1 with SHA-256 (Optional)
    PS256,
    /// RSASSA-PSS using SHA-384 and MGF1 with SHA-384 (Optional)
    PS384,
    /// RSASSA-PSS using SHA-512 and MGF1 with SHA-512 (Optional)
    PS512,
    /// RSAES-PKCS1-v1_5 key encryption (legacy)
    #[serde(rename = "RSA1_5")]
    Rsa1_5,
    /// RSAES OAEP using default parameters (SHA-1)
    #[serde(rename = "RSA-OAEP")]
    RsaOaep,
    /// RSAES OAEP using SHA-256 and MGF1 with SHA-256
    #[serde(rename = "RSA-OAEP-256")]
    RsaOaep256,
    /// AES-128 Key Wrap
    A128KW,
    /// AES-192 Key Wrap
    A192KW,
    /// AES-256 Key Wrap
    A256KW,
    /// AES-128 GCM Key Wrap
    A128GCMKW,
    /// AES-192 GCM Key Wrap
    A192GCMKW,
    /// AES-256 GCM Key Wrap
    A256GCMKW,
    /// Direct use of a shared symmetric key as the CEK
    #[serde(rename = "dir")]
    Direct,
    /// ECDH Ephemeral-Static key agreement (CEK derived directly)
    #[serde(rename = "ECDH-ES")]
    EcdhEs,
    /// ECDH-ES key agreement with AES-128 Key Wrap
    #[serde(rename = "ECDH-ES+A128KW")]
    EcdhEsA128Kw,
    /// ECDH-ES key agreement with AES-192 Key Wrap
    #[serde(rename = "ECDH-ES+A192KW")]
    EcdhEsA192Kw,
    /// ECDH-ES key agreement with AES-256 Key Wrap
    #[serde(rename = "ECDH-ES+A256KW")]
    EcdhEsA256Kw,
    /// PBES2 with HMAC SHA-256 and AES-128 Key Wrap
    #[serde(rename = "PBES2-HS256+A128KW")]
    Pbes2Hs256A128Kw,
    /// PBES2 with HMAC SHA-384 and AES-192 Key Wrap
    #[serde(rename = "PBES2-HS384+A192KW")]
    Pbes2Hs384A192Kw,
    /// PBES2 with HMAC SHA-512 and AES-256 Key Wrap
    #[serde(rename = "PBES2-HS512+A256KW")]
    Pbes2Hs512A256Kw,
}

const SIGN_VERIFY: &[Operation] = &[Operation::Sign, Operation::Verify];
const WRAP_UNWRAP: &[Operation] = &[Operation::WrapKey, Operation::UnwrapKey];
const ENCRYPT_DECRYPT: &[Operation] = &[Operation::Encrypt, Operation::Decrypt];
const DERIVE: &[Operation] = &[Operation::DeriveKey];

const ENC_PARAMS: &[Param] = &[Param::Encryption, Param::Zip];
const GCM_KW_PARAMS: &[Param] = &[
    Param::Encryption,
    Param::Zip,
    Param::InitializationVector,
    Param::Tag,
];
const ECDH_PARAMS: &[Param] = &[
    Param::Encryption,
    Param::Zip,
    Param::EphemeralPublicKey,
    Param::PartyUInfo,
    Param::PartyVInfo,
];
const PBES2_PARAMS: &[Param] = &[
    Param::Encryption,
    Param::Zip,
    Param::PasswordSalt,
    Param::PasswordCount,
];

const ECDH_TYPES: &[KeyType] = &[
    KeyType::X25519,
    KeyType::X448,
    KeyType::EcP256,
    KeyType::EcP384,
    KeyType::EcP521,
];

impl Algorithm {
    /// All registered algorithms, in registry order.
    pub const ALL: &'static [Self] = &[
        Self::HS256,
        Self::HS384,
        Self::HS512,
        Self::RS256,
        Self::RS384,
        Self::RS512,
        Self::ES256,
        Self::ES384,
        Self::ES512,
        Self::EdDSA,
        Self::PS256,
        Self::PS384,
        Self::PS512,
        Self::Rsa1_5,
        Self::RsaOaep,
        Self::RsaOaep256,
        Self::A128KW,
        Self::A192KW,
        Self::A256KW,
        Self::A128GCMKW,
        Self::A192GCMKW,
        Self::A256GCMKW,
        Self::Direct,
        Self::EcdhEs,
        Self::EcdhEsA128Kw,
        Self::EcdhEsA192Kw,
        Self::EcdhEsA256Kw,
        Self::Pbes2Hs256A128Kw,
        Self::Pbes2Hs384A192Kw,
        Self::Pbes2Hs512A256Kw,
    ];

    /// The JOSE `alg` wire name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
            Self::EdDSA => "EdDSA",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::Rsa1_5 => "RSA1_5",
            Self::RsaOaep => "RSA-OAEP",
            Self::RsaOaep256 => "RSA-OAEP-256",
            Self::A128KW => "A128KW",
            Self::A192KW => "A192KW",
            Self::A256KW => "A256KW",
            Self::A128GCMKW => "A128GCMKW",
            Self::A192GCMKW => "A192GCMKW",
            Self::A256GCMKW => "A256GCMKW",
            Self::Direct => "dir",
            Self::EcdhEs => "ECDH-ES",
            Self::EcdhEsA128Kw => "ECDH-ES+A128KW",
            Self::EcdhEsA192Kw => "ECDH-ES+A192KW",
            Self::EcdhEsA256Kw => "ECDH-ES+A256KW",
            Self::Pbes2Hs256A128Kw => "PBES2-HS256+A128KW",
            Self::Pbes2Hs384A192Kw => "PBES2-HS384+A192KW",
            Self::Pbes2Hs512A256Kw => "PBES2-HS512+A256KW",
        }
    }

    /// Look up an algorithm by its JOSE `alg` wire name.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        Self::ALL
            .iter()
            .find(|alg| alg.name() == name)
            .copied()
            .ok_or_else(|| Error::UnknownAlgorithm(name.to_owned()))
    }

    /// Key or hash size in bits.
    ///
    /// Hash size for MAC and signature algorithms, wrapping-key size for the
    /// key-wrap and PBES2 families, minimum modulus size for the RSA
    /// encryption family, and `0` where no fixed size applies.
    #[must_use]
    pub fn size(&self) -> u32 {
        match self {
            Self::HS256 | Self::RS256 | Self::ES256 | Self::PS256 => 256,
            Self::HS384 | Self::RS384 | Self::ES384 | Self::PS384 => 384,
            Self::HS512 | Self::RS512 | Self::ES512 | Self::PS512 => 512,
            Self::EdDSA | Self::EcdhEs => 0,
            Self::Rsa1_5 | Self::RsaOaep | Self::RsaOaep256 => 2048,
            Self::A128KW | Self::A128GCMKW | Self::EcdhEsA128Kw | Self::Pbes2Hs256A128Kw => 128,
            Self::A192KW | Self::A192GCMKW | Self::EcdhEsA192Kw | Self::Pbes2Hs384A192Kw => 192,
            Self::A256KW | Self::A256GCMKW | Self::EcdhEsA256Kw | Self::Pbes2Hs512A256Kw => 256,
            Self::Direct => 256,
        }
    }

    /// Key types permitted for this algorithm, preferred type first.
    ///
    /// The first entry is the type used for ephemeral key generation.
    #[must_use]
    pub fn key_types(&self) -> &'static [KeyType] {
        match self {
            Self::HS256
            | Self::HS384
            | Self::HS512
            | Self::A128KW
            | Self::A192KW
            | Self::A256KW
            | Self::A128GCMKW
            | Self::A192GCMKW
            | Self::A256GCMKW
            | Self::Direct
            | Self::Pbes2Hs256A128Kw
            | Self::Pbes2Hs384A192Kw
            | Self::Pbes2Hs512A256Kw => &[KeyType::Raw],
            Self::RS256 | Self::RS384 | Self::RS512 => &[KeyType::Rsa],
            Self::PS256 | Self::PS384 | Self::PS512 => &[KeyType::RsassaPss],
            Self::ES256 => &[KeyType::EcP256],
            Self::ES384 => &[KeyType::EcP384],
            Self::ES512 => &[KeyType::EcP521],
            Self::EdDSA => &[KeyType::Ed25519, KeyType::Ed448],
            Self::Rsa1_5 | Self::RsaOaep | Self::RsaOaep256 => &[KeyType::Rsa],
            Self::EcdhEs | Self::EcdhEsA128Kw | Self::EcdhEsA192Kw | Self::EcdhEsA256Kw => {
                ECDH_TYPES
            }
        }
    }

    /// The key use required by this algorithm.
    #[must_use]
    pub fn key_use(&self) -> KeyUse {
        match self {
            Self::HS256
            | Self::HS384
            | Self::HS512
            | Self::RS256
            | Self::RS384
            | Self::RS512
            | Self::ES256
            | Self::ES384
            | Self::ES512
            | Self::EdDSA
            | Self::PS256
            | Self::PS384
            | Self::PS512 => KeyUse::Sign,
            _ => KeyUse::Encrypt,
        }
    }

    /// Key operations permitted for keys bound to this algorithm.
    #[must_use]
    pub fn key_ops(&self) -> &'static [Operation] {
        match self.key_use() {
            KeyUse::Sign => SIGN_VERIFY,
            KeyUse::Encrypt => match self {
                Self::Direct => ENCRYPT_DECRYPT,
                Self::EcdhEs | Self::EcdhEsA128Kw | Self::EcdhEsA192Kw | Self::EcdhEsA256Kw => {
                    DERIVE
                }
                _ => WRAP_UNWRAP,
            },
        }
    }

    /// The registered header parameters this algorithm may carry.
    ///
    /// Only meaningful for [`KeyUse::Encrypt`] algorithms; the required
    /// subset is enforced by header verification in one registry-driven
    /// pass.
    #[must_use]
    pub fn header_params(&self) -> &'static [Param] {
        match self {
            Self::A128GCMKW | Self::A192GCMKW | Self::A256GCMKW => GCM_KW_PARAMS,
            Self::EcdhEs | Self::EcdhEsA128Kw | Self::EcdhEsA192Kw | Self::EcdhEsA256Kw => {
                ECDH_PARAMS
            }
            Self::Pbes2Hs256A128Kw | Self::Pbes2Hs384A192Kw | Self::Pbes2Hs512A256Kw => {
                PBES2_PARAMS
            }
            _ if self.key_use() == KeyUse::Encrypt => ENC_PARAMS,
            _ => &[],
        }
    }
}

/// JWE content-encryption algorithms as defined in [`rfc7518, section 5`].
///
/// [`rfc7518, section 5`]: https://datatracker.ietf.org/doc/html/rfc7518#section-5
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Encryption {
    /// AES-128-CBC with HMAC SHA-256 composite authenticated encryption
    #[serde(rename = "A128CBC-HS256")]
    A128CbcHs256,
    /// AES-192-CBC with HMAC SHA-384 composite authenticated encryption
    #[serde(rename = "A192CBC-HS384")]
    A192CbcHs384,
    /// AES-256-CBC with HMAC SHA-512 composite authenticated encryption
    #[serde(rename = "A256CBC-HS512")]
    A256CbcHs512,
    /// AES-128 GCM
    A128GCM,
    /// AES-192 GCM
    A192GCM,
    /// AES-256 GCM
    A256GCM,
}

impl Encryption {
    /// All registered content-encryption algorithms, in registry order.
    pub const ALL: &'static [Self] = &[
        Self::A128CbcHs256,
        Self::A192CbcHs384,
        Self::A256CbcHs512,
        Self::A128GCM,
        Self::A192GCM,
        Self::A256GCM,
    ];

    /// The JOSE `enc` wire name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A192CbcHs384 => "A192CBC-HS384",
            Self::A256CbcHs512 => "A256CBC-HS512",
            Self::A128GCM => "A128GCM",
            Self::A192GCM => "A192GCM",
            Self::A256GCM => "A256GCM",
        }
    }

    /// Look up a content-encryption algorithm by its `enc` wire name.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        Self::ALL
            .iter()
            .find(|enc| enc.name() == name)
            .copied()
            .ok_or_else(|| Error::UnknownAlgorithm(name.to_owned()))
    }

    /// Content-encryption key size in bits.
    ///
    /// The CBC-HMAC composites consume a double-length CEK: the first half
    /// keys the MAC and the second half keys the cipher.
    #[must_use]
    pub fn cek_size(&self) -> u32 {
        match self {
            Self::A128CbcHs256 => 256,
            Self::A192CbcHs384 => 384,
            Self::A256CbcHs512 => 512,
            Self::A128GCM => 128,
            Self::A192GCM => 192,
            Self::A256GCM => 256,
        }
    }

    /// True for the CBC-HMAC composite constructions.
    #[must_use]
    pub fn is_cbc_hmac(&self) -> bool {
        matches!(
            self,
            Self::A128CbcHs256 | Self::A192CbcHs384 | Self::A256CbcHs512
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for alg in Algorithm::ALL {
            assert_eq!(Algorithm::from_name(alg.name()).unwrap(), *alg);
            let json = serde_json::to_string(alg).unwrap();
            assert_eq!(json, format!("\"{}\"", alg.name()));
            assert_eq!(serde_json::from_str::<Algorithm>(&json).unwrap(), *alg);
        }
        for enc in Encryption::ALL {
            assert_eq!(Encryption::from_name(enc.name()).unwrap(), *enc);
            let json = serde_json::to_string(enc).unwrap();
            assert_eq!(json, format!("\"{}\"", enc.name()));
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            Algorithm::from_name("none"),
            Err(Error::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            Encryption::from_name("A512GCM"),
            Err(Error::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn required_params_follow_the_family() {
        assert!(Algorithm::HS256.header_params().is_empty());
        assert!(Algorithm::A128GCMKW.header_params().contains(&Param::Tag));
        assert!(
            Algorithm::EcdhEs
                .header_params()
                .contains(&Param::EphemeralPublicKey)
        );
        assert!(
            Algorithm::Pbes2Hs256A128Kw
                .header_params()
                .contains(&Param::PasswordSalt)
        );
        for alg in Algorithm::ALL {
            if alg.key_use() == KeyUse::Encrypt {
                assert!(alg.header_params().contains(&Param::Encryption));
            }
        }
    }

    #[test]
    fn cek_sizes_match_rfc7518() {
        assert_eq!(Encryption::A128CbcHs256.cek_size(), 256);
        assert_eq!(Encryption::A256GCM.cek_size(), 256);
        assert!(Encryption::A128CbcHs256.is_cbc_hmac());
        assert!(!Encryption::A192GCM.is_cbc_hmac());
    }
}
