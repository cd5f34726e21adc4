//! Unpadded base64url helpers shared by the JOSE wire formats.

use base64::{Engine as _, prelude::BASE64_URL_SAFE_NO_PAD};
use sigil_error::ErrorContext as _;

use crate::jose::Error;

/// Encode bytes as unpadded base64url.
pub(crate) fn base64_url(data: impl AsRef<[u8]>) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(data)
}

/// Decode unpadded base64url, surfacing [`Error::MalformedEncoding`] on
/// anything that is not canonical.
pub(crate) fn from_base64_url(encoded: impl AsRef<[u8]>) -> Result<Vec<u8>, Error> {
    BASE64_URL_SAFE_NO_PAD
        .decode(encoded)
        .context("decode base64url")
        .map_err(Error::MalformedEncoding)
}

/// Pack a u32 big-endian, as used by the Concat KDF round and length fields.
pub(crate) fn be_u32(value: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Pack a u64 big-endian, as used by the CBC-HMAC additional data length.
pub(crate) fn be_u64(value: u64, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Pack a length-prefixed datum for the Concat KDF fixed info.
pub(crate) fn length_prefixed(data: &[u8], out: &mut Vec<u8>) {
    be_u32(data.len() as u32, out);
    out.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_url_round_trip() {
        let data = b"{\"alg\":\"HS256\"}";
        let encoded = base64_url(data);
        assert!(!encoded.contains('='));
        assert_eq!(from_base64_url(&encoded).unwrap(), data);
    }

    #[test]
    fn rejects_standard_alphabet() {
        assert!(from_base64_url("a+b/").is_err());
    }

    #[test]
    fn big_endian_packing() {
        let mut out = Vec::new();
        be_u64(408, &mut out);
        assert_eq!(out, [0, 0, 0, 0, 0, 0, 1, 152]);

        let mut out = Vec::new();
        length_prefixed(b"Bob", &mut out);
        assert_eq!(out, [0, 0, 0, 3, b'B', b'o', b'b']);
    }
}
