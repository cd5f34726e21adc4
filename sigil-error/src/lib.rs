//! Error types and utilities for `sigil` crates.
//!
//! The crates in this workspace surface failures in two layers: domain
//! errors are closed enums owned by the crate that produces them, while
//! everything underneath (codec errors, third-party crypto failures,
//! malformed input) is carried as an [`OpaqueError`] chain built with
//! [`ErrorContext`].

#![cfg_attr(docsrs, feature(doc_cfg))]

use std::error::Error as StdError;
use std::fmt;

/// Alias for a type-erased error type.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// An opaque error, with a message describing the failed operation and an
/// optional source chain.
///
/// Use [`ErrorContext::context`] to produce one from any fallible call
/// instead of constructing it directly.
pub struct OpaqueError {
    message: &'static str,
    source: Option<BoxError>,
}

impl OpaqueError {
    /// Create an [`OpaqueError`] from a displayable message only.
    #[must_use]
    pub fn from_display(message: &'static str) -> Self {
        Self {
            message,
            source: None,
        }
    }

    /// Create an [`OpaqueError`] from a standard error.
    #[must_use]
    pub fn from_std(error: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            message: "error",
            source: Some(Box::new(error)),
        }
    }

    /// Create an [`OpaqueError`] from a boxed error.
    #[must_use]
    pub fn from_boxed(error: BoxError) -> Self {
        Self {
            message: "error",
            source: Some(error),
        }
    }

    /// Attach a new context message, keeping `self` as the source.
    #[must_use]
    pub fn context(self, message: &'static str) -> Self {
        Self {
            message,
            source: Some(Box::new(self)),
        }
    }
}

impl fmt::Debug for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(err) = self.source.as_deref() {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

impl StdError for OpaqueError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static))
    }
}

/// Extends `Result` and `Option` with methods for attaching context to an
/// error, turning it into an [`OpaqueError`].
pub trait ErrorContext<T>: private::Sealed {
    /// Wrap the error with the given fixed context message.
    fn context(self, message: &'static str) -> Result<T, OpaqueError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: Into<BoxError>,
{
    fn context(self, message: &'static str) -> Result<T, OpaqueError> {
        self.map_err(|err| OpaqueError {
            message,
            source: Some(err.into()),
        })
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: &'static str) -> Result<T, OpaqueError> {
        self.ok_or(OpaqueError {
            message,
            source: None,
        })
    }
}

mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
    impl<T> Sealed for Option<T> {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_result_errors() {
        let err = "nope".parse::<u32>().context("parse count").unwrap_err();
        assert!(err.to_string().starts_with("parse count"));
        assert!(err.source().is_some());
    }

    #[test]
    fn context_wraps_none() {
        let err = None::<u32>.context("missing count").unwrap_err();
        assert_eq!(err.to_string(), "missing count");
        assert!(err.source().is_none());
    }

    #[test]
    fn display_includes_chain() {
        let inner = OpaqueError::from_display("inner");
        let outer = inner.context("outer");
        assert_eq!(outer.to_string(), "outer: inner");
    }
}
