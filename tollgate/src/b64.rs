//! Base64url (unpadded) codec for JOSE segments and key material

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

/// Encodes bytes using the base64url alphabet without padding
pub(crate) fn encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decodes unpadded base64url into raw bytes
pub(crate) fn decode(encoded: impl AsRef<[u8]>) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded)
}

/// The length of `len` bytes once encoded, excluding padding
pub(crate) const fn encoded_len(len: usize) -> usize {
    (len * 4 + 2) / 3
}

/// Serde adapter for binary fields carried as base64url strings
pub(crate) fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&encode(bytes))
}

/// Serde adapter for binary fields carried as base64url strings
pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = std::borrow::Cow::<str>::deserialize(deserializer)?;
    decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_padding() {
        let encoded = encode(b"any carnal pleasure");
        assert!(!encoded.contains('='));
        assert_eq!(decode(&encoded).unwrap(), b"any carnal pleasure");
    }

    #[test]
    fn encoded_len_agrees_with_encode() {
        for len in 0..=64 {
            assert_eq!(encoded_len(len), encode(vec![0_u8; len]).len());
        }
    }

    #[test]
    fn rejects_the_standard_alphabet() {
        assert!(decode("+/+/").is_err());
    }
}
