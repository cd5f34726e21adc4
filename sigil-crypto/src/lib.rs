//! Crypto primitives and dependencies used by sigil.
//!
//! This includes but is not limited to:
//! - Javascript object signing and encryption (JOSE): JWK, JWS, JWE, JWT
//! - Public, private and secret keys
//! - Certificates and PEM codecs
//! - Signing and authenticated encryption
//!
//! # Sigil
//!
//! Crate used by the end-user `sigil` crate and `sigil` crate authors alike.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

pub mod jose;
pub mod pem;

pub mod dep {
    //! Dependencies for sigil crypto modules.
    //!
    //! Exported for your convenience

    pub mod pki_types {
        //! Re-export of the [`rustls-pki-types`] crate.
        //!
        //! [`rustls-pki-types`]: https://docs.rs/rustls-pki-types

        #[doc(inline)]
        pub use rustls_pki_types::*;
    }

    pub mod x509_parser {
        //! Re-export of the [`x509_parser`] crate.
        //!
        //! [`x509_parser`]: https://docs.rs/x509_parser

        #[doc(inline)]
        pub use x509_parser::*;
    }

    pub mod serde_json {
        //! Re-export of the [`serde_json`] crate.
        //!
        //! [`serde_json`]: https://docs.rs/serde_json

        #[doc(inline)]
        pub use serde_json::*;
    }

    pub mod jiff {
        //! Re-export of the [`jiff`] crate.
        //!
        //! [`jiff`]: https://docs.rs/jiff

        #[doc(inline)]
        pub use jiff::*;
    }
}
