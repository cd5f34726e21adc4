//! Sigil is a JOSE engine for the Rust language: web keys, cryptographic
//! headers, digital signatures, authenticated encryption, and tokens.
//!
//! The engine maps native cryptography primitives into the JOSE data and
//! protocol model:
//!
//! - [`crypto::jose::WebKey`]: JSON Web Keys (JWK/JWKS), PEM and X.509
//!   backed key material, validation, and well-known projections;
//! - [`crypto::jose::WebSignature`]: JSON Web Signatures (JWS), compact and
//!   multi-signature serializations;
//! - [`crypto::jose::WebEncryption`]: JSON Web Encryption (JWE), multi
//!   recipient key management and authenticated content encryption;
//! - [`crypto::jose::WebToken`]: JSON Web Tokens (JWT), signed and/or
//!   encrypted, with claim-window validation;
//! - [`crypto::pem`]: PEM codecs for keys and certificates.
//!
//! Everything is synchronous and free of I/O: callers fetch JWKS documents,
//! PEM blobs and token strings however they like and hand the bytes to this
//! engine. All values are immutable once built and freely shareable across
//! threads.
//!
//! # Example
//!
//! ```
//! use sigil::crypto::jose::{Algorithm, WebKey, WebSignature, WebSignedPayload};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let key = WebKey::ephemeral(Algorithm::ES256)?;
//!
//! let compact = WebSignature::builder(Algorithm::ES256)
//!     .compact()
//!     .key(key.clone())
//!     .sign(b"hello")?
//!     .compact()?;
//!
//! WebSignedPayload::parse(&compact)?.verify(&key)?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

#[doc(inline)]
pub use sigil_crypto as crypto;

pub mod error {
    //! Error types and utilities shared by the sigil crates.

    #[doc(inline)]
    pub use sigil_error::{BoxError, ErrorContext, OpaqueError};
}
