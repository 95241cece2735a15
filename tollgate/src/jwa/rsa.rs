//! RSA JSON Web Algorithm implementations

use std::{convert::TryFrom, fmt};

use serde::{Deserialize, Serialize};

use crate::{error, jws};

/// RSA signing algorithms
///
/// This list may be expanded in the future.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)]
#[non_exhaustive]
pub enum SigningAlgorithm {
    /// RSA PKCS#1 v1.5 signatures using SHA-256
    RS256,
    /// RSA PKCS#1 v1.5 signatures using SHA-384
    RS384,
    /// RSA PKCS#1 v1.5 signatures using SHA-512
    RS512,
    /// RSA PSS signatures using SHA-256
    PS256,
    /// RSA PSS signatures using SHA-384
    PS384,
    /// RSA PSS signatures using SHA-512
    PS512,
}

impl SigningAlgorithm {
    /// The size in bytes of signatures produced by 2048-bit keys
    #[must_use]
    pub const fn signature_size(self) -> usize {
        256
    }

    fn into_verification_params(self) -> &'static ring::signature::RsaParameters {
        match self {
            Self::RS256 => &ring::signature::RSA_PKCS1_2048_8192_SHA256,
            Self::RS384 => &ring::signature::RSA_PKCS1_2048_8192_SHA384,
            Self::RS512 => &ring::signature::RSA_PKCS1_2048_8192_SHA512,
            Self::PS256 => &ring::signature::RSA_PSS_2048_8192_SHA256,
            Self::PS384 => &ring::signature::RSA_PSS_2048_8192_SHA384,
            Self::PS512 => &ring::signature::RSA_PSS_2048_8192_SHA512,
        }
    }
}

impl From<SigningAlgorithm> for jws::Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        Self::Rsa(alg)
    }
}

impl TryFrom<jws::Algorithm> for SigningAlgorithm {
    type Error = error::IncompatibleAlgorithm;

    fn try_from(alg: jws::Algorithm) -> Result<Self, Self::Error> {
        match alg {
            jws::Algorithm::Rsa(alg) => Ok(alg),
            other => Err(error::incompatible_algorithm(other)),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
        };

        f.write_str(s)
    }
}

/// RSA public key components
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PublicKeyDto")]
#[must_use]
pub struct PublicKey {
    #[serde(rename = "n", with = "crate::b64")]
    modulus: Vec<u8>,
    #[serde(rename = "e", with = "crate::b64")]
    exponent: Vec<u8>,
}

impl PublicKey {
    /// Constructs a public key from the raw modulus and exponent
    ///
    /// # Errors
    ///
    /// Returns an error if the modulus is not that of a 2048-bit key.
    pub fn from_components(
        modulus: impl Into<Vec<u8>>,
        exponent: impl Into<Vec<u8>>,
    ) -> Result<Self, error::KeyRejected> {
        let modulus = modulus.into();

        if modulus.len() != 256 {
            return Err(error::key_rejected("key modulus must be 2048 bits"));
        }

        Ok(Self {
            modulus,
            exponent: exponent.into(),
        })
    }

    /// The public modulus
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// The public exponent
    #[must_use]
    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("modulus", &crate::b64::encode(&self.modulus))
            .field("exponent", &crate::b64::encode(&self.exponent))
            .finish()
    }
}

#[derive(Clone, Deserialize)]
struct PublicKeyDto {
    #[serde(rename = "n", with = "crate::b64")]
    modulus: Vec<u8>,
    #[serde(rename = "e", with = "crate::b64")]
    exponent: Vec<u8>,
}

impl TryFrom<PublicKeyDto> for PublicKey {
    type Error = error::KeyRejected;

    fn try_from(dto: PublicKeyDto) -> Result<Self, Self::Error> {
        Self::from_components(dto.modulus, dto.exponent)
    }
}

impl jws::Verifier for PublicKey {
    type Algorithm = SigningAlgorithm;
    type Error = error::SignatureInvalid;

    fn can_verify(&self, _alg: Self::Algorithm) -> bool {
        true
    }

    fn verify(
        &self,
        alg: Self::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        let key = ring::signature::RsaPublicKeyComponents {
            n: &self.modulus,
            e: &self.exponent,
        };

        key.verify(alg.into_verification_params(), data, signature)
            .map_err(|_| error::signature_invalid())
    }
}

impl jws::Signer for PublicKey {
    type Algorithm = SigningAlgorithm;
    type Error = error::SigningError;

    fn can_sign(&self, _alg: Self::Algorithm) -> bool {
        false
    }

    fn sign(&self, _alg: Self::Algorithm, _data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        Err(error::missing_private_key().into())
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::jws::Signer;

    #[test]
    fn parses_public_key_components_from_a_jwk_document() -> Result<()> {
        let key: PublicKey = serde_json::from_str(crate::test::rsa::JWK)?;
        assert_eq!(key.modulus().len(), 256);
        assert_eq!(key.exponent(), [0x01, 0x00, 0x01]);
        Ok(())
    }

    #[test]
    fn rejects_a_modulus_that_is_not_2048_bits() {
        let err = PublicKey::from_components(vec![0xA5; 128], vec![0x01, 0x00, 0x01]).unwrap_err();
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("key modulus must be 2048 bits"));
    }

    #[test]
    fn signing_requires_a_private_key() -> Result<()> {
        let key: PublicKey = serde_json::from_str(crate::test::rsa::JWK)?;
        let err = key.sign(SigningAlgorithm::RS256, b"data").unwrap_err();
        assert!(matches!(err, error::SigningError::MissingPrivateKey(_)));
        Ok(())
    }
}
