//! Implementations of the JSON Web Keys (JWK) standard
//!
//! The specifications for JSON Web Keys can be found in [RFC7517][].
//!
//! [RFC7517]: https://tools.ietf.org/html/rfc7517

use std::convert::{TryFrom, TryInto};

use aliri_braid::braid;
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    error, jwa,
    jws::{self, Signer, Verifier},
};

/// An identifier for a JWK
#[braid(serde, ref_doc = "A borrowed reference to JWK identifier ([`KeyId`])")]
pub struct KeyId;

/// An identified JSON Web Key
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "JwkDto")]
#[must_use]
pub struct Jwk {
    key_id: Option<KeyId>,
    usage: Option<jwa::Usage>,
    algorithm: Option<jwa::Algorithm>,
    key: Key,
}

impl Jwk {
    /// The key ID
    #[must_use]
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.key_id.as_deref()
    }

    /// The intended usage of the key
    #[must_use]
    pub fn usage(&self) -> Option<jwa::Usage> {
        self.usage
    }

    /// The algorithm to be used with this JWK
    #[must_use]
    pub fn algorithm(&self) -> Option<jwa::Algorithm> {
        self.algorithm
    }

    /// Whether the key is compatible with the given algorithm
    #[must_use]
    pub fn is_compatible(&self, alg: jwa::Algorithm) -> bool {
        self.key.is_compatible(alg)
    }

    /// Sets the key ID
    pub fn with_key_id(self, kid: KeyId) -> Self {
        Self {
            key_id: Some(kid),
            ..self
        }
    }

    /// Sets the key's usage
    pub fn with_usage(self, usage: jwa::Usage) -> Self {
        Self {
            usage: Some(usage),
            ..self
        }
    }

    /// Sets the algorithm and usage consistent with that algorithm
    pub fn with_algorithm(self, alg: impl Into<jwa::Algorithm>) -> Self {
        let alg = alg.into();
        Self {
            algorithm: Some(alg),
            usage: Some(alg.to_usage()),
            ..self
        }
    }
}

impl From<jwa::Hmac> for Jwk {
    fn from(key: jwa::Hmac) -> Self {
        Self {
            key_id: None,
            usage: None,
            algorithm: None,
            key: Key::from(key),
        }
    }
}

impl From<jwa::rsa::PublicKey> for Jwk {
    fn from(key: jwa::rsa::PublicKey) -> Self {
        Self {
            key_id: None,
            usage: None,
            algorithm: None,
            key: Key::from(key),
        }
    }
}

impl Verifier for Jwk {
    type Algorithm = jwa::Algorithm;
    type Error = error::KeyVerifyError;

    fn can_verify(&self, alg: Self::Algorithm) -> bool {
        if let Ok(alg) = jws::Algorithm::try_from(alg) {
            self.key.can_verify(alg)
        } else {
            false
        }
    }

    fn verify(
        &self,
        alg: Self::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        if alg.to_usage() != jwa::Usage::Signing {
            return Err(error::key_usage_mismatch().into());
        }

        if let Some(u) = self.usage {
            if u != jwa::Usage::Signing {
                return Err(error::key_usage_mismatch().into());
            }
        }

        match self.algorithm {
            Some(key_alg) if key_alg == alg => {}
            Some(_) => {
                return Err(error::incompatible_algorithm(alg).into());
            }
            None => {}
        }

        let alg = jws::Algorithm::try_from(alg)?;
        self.key.verify(alg, data, signature)?;

        Ok(())
    }
}

impl Signer for Jwk {
    type Algorithm = jwa::Algorithm;
    type Error = error::SigningError;

    fn can_sign(&self, alg: Self::Algorithm) -> bool {
        if let Ok(alg) = jws::Algorithm::try_from(alg) {
            self.key.can_sign(alg)
        } else {
            false
        }
    }

    fn sign(&self, alg: Self::Algorithm, data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        if alg.to_usage() != jwa::Usage::Signing {
            return Err(error::key_usage_mismatch().into());
        }

        if let Some(u) = self.usage {
            if u != jwa::Usage::Signing {
                return Err(error::key_usage_mismatch().into());
            }
        }

        match self.algorithm {
            Some(key_alg) if key_alg == alg => {}
            Some(_) => {
                return Err(error::incompatible_algorithm(alg).into());
            }
            None => {}
        }

        let alg = jws::Algorithm::try_from(alg)?;

        self.key.sign(alg, data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct JwkDto {
    #[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
    key_id: Option<KeyId>,

    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    usage: Option<jwa::Usage>,

    #[serde(rename = "alg", default, skip_serializing_if = "Option::is_none")]
    algorithm: Option<jwa::Algorithm>,

    #[serde(flatten)]
    key: Key,
}

impl TryFrom<JwkDto> for Jwk {
    type Error = error::IncompatibleAlgorithm;

    fn try_from(dto: JwkDto) -> Result<Self, Self::Error> {
        if let Some(alg) = &dto.algorithm {
            if !dto.key.is_compatible(*alg) {
                return Err(error::incompatible_algorithm(*alg));
            }
        }

        Ok(Self {
            key_id: dto.key_id,
            usage: dto.usage,
            algorithm: dto.algorithm,
            key: dto.key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct JwkDtoRef<'a> {
    #[serde(rename = "kid")]
    key_id: Option<&'a KeyIdRef>,

    #[serde(rename = "use")]
    usage: Option<jwa::Usage>,

    #[serde(rename = "alg")]
    algorithm: Option<jwa::Algorithm>,

    #[serde(flatten)]
    key: &'a Key,
}

impl Serialize for Jwk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let dto = JwkDtoRef {
            key_id: self.key_id(),
            usage: self.usage(),
            algorithm: self.algorithm(),
            key: &self.key,
        };

        dto.serialize(serializer)
    }
}

/// The cryptographic material underlying a JWK
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kty")]
enum Key {
    /// RSA
    #[serde(rename = "RSA")]
    Rsa(jwa::rsa::PublicKey),

    /// HMAC symmetric
    #[serde(rename = "oct")]
    Hmac(jwa::Hmac),
}

impl Key {
    fn is_compatible(&self, alg: jwa::Algorithm) -> bool {
        match alg {
            jwa::Algorithm::Signing(alg) => self.can_verify(alg),
        }
    }
}

impl From<jwa::Hmac> for Key {
    fn from(key: jwa::Hmac) -> Self {
        Self::Hmac(key)
    }
}

impl From<jwa::rsa::PublicKey> for Key {
    fn from(key: jwa::rsa::PublicKey) -> Self {
        Self::Rsa(key)
    }
}

impl Verifier for Key {
    type Algorithm = jws::Algorithm;
    type Error = error::KeyVerifyError;

    fn can_verify(&self, alg: Self::Algorithm) -> bool {
        match self {
            Self::Rsa(p) => {
                if let Ok(alg) = alg.try_into() {
                    p.can_verify(alg)
                } else {
                    false
                }
            }
            Self::Hmac(p) => {
                if let Ok(alg) = alg.try_into() {
                    p.can_verify(alg)
                } else {
                    false
                }
            }
        }
    }

    fn verify(
        &self,
        alg: Self::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        match self {
            Self::Hmac(p) => p.verify(alg.try_into()?, data, signature)?,
            Self::Rsa(p) => p.verify(alg.try_into()?, data, signature)?,
        }

        Ok(())
    }
}

impl Signer for Key {
    type Algorithm = jws::Algorithm;
    type Error = error::SigningError;

    fn can_sign(&self, alg: Self::Algorithm) -> bool {
        match self {
            Self::Rsa(p) => {
                if let Ok(alg) = alg.try_into() {
                    p.can_sign(alg)
                } else {
                    false
                }
            }
            Self::Hmac(p) => {
                if let Ok(alg) = alg.try_into() {
                    p.can_sign(alg)
                } else {
                    false
                }
            }
        }
    }

    fn sign(&self, alg: Self::Algorithm, data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        let signature = match self {
            Self::Hmac(p) => p.sign(alg.try_into()?, data)?,
            Self::Rsa(p) => p.sign(alg.try_into()?, data)?,
        };

        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    mod serialization {
        use super::*;

        mod hmac {
            use super::*;
            use crate::test::hmac::*;

            #[test]
            fn deserialize() -> Result<()> {
                let key: Jwk = serde_json::from_str(JWK)?;
                assert_eq!(key.algorithm, Some(jwa::Algorithm::HS256));
                Ok(())
            }

            #[test]
            fn deserialize_minimal() -> Result<()> {
                let key: Jwk = serde_json::from_str(JWK_MINIMAL)?;
                assert_eq!(key.algorithm, None);
                Ok(())
            }
        }

        mod rsa {
            use super::*;
            use crate::test::rsa::*;

            #[test]
            fn deserialize() -> Result<()> {
                let key: Jwk = serde_json::from_str(JWK)?;
                assert_eq!(key.algorithm, Some(jwa::Algorithm::RS256));
                assert_eq!(key.key_id.as_deref(), Some(KeyIdRef::from_str(KEY_ID)));
                Ok(())
            }

            #[test]
            fn deserialize_minimal() -> Result<()> {
                let key: Jwk = serde_json::from_str(JWK_MINIMAL)?;
                assert_eq!(key.algorithm, None);
                Ok(())
            }

            #[test]
            fn rejects_declared_algorithm_incompatible_with_key_type() {
                let err = serde_json::from_str::<Jwk>(
                    r#"{"kty":"oct","alg":"RS256","k":"c2hoaC4gdmVyeSBzZWNyZXQu"}"#,
                )
                .unwrap_err();
                assert!(err.to_string().contains("incompatible with algorithm"));
            }
        }
    }

    mod verification {
        use super::*;

        fn verify(
            jwk_str: &str,
            alg: jwa::Algorithm,
            message: &str,
            signature: &str,
        ) -> Result<(), error::KeyVerifyError> {
            let key: Jwk = serde_json::from_str(jwk_str).unwrap();
            key.verify(
                alg,
                message.as_bytes(),
                &crate::b64::decode(signature).unwrap(),
            )?;
            Ok(())
        }

        mod rsa {
            use super::*;
            use crate::test::rsa::*;

            #[test]
            fn error_verifying_hmac_alg() {
                let err = dbg!(verify(JWK_MINIMAL, jwa::Algorithm::HS512, "", "")).unwrap_err();
                assert!(err.is_incompatible_alg());
            }

            #[test]
            fn error_using_encryption_key_for_signing() {
                let key = Jwk {
                    key_id: None,
                    usage: Some(jwa::Usage::Encryption),
                    algorithm: None,
                    key: Key::Rsa(
                        jwa::rsa::PublicKey::from_components(vec![0; 256], Vec::new()).unwrap(),
                    ),
                };

                let err = dbg!(key.verify(jwa::Algorithm::RS256, &[], &[])).unwrap_err();

                assert!(err.is_usage_mismatch());
            }

            #[test]
            fn verify_rs256() -> Result<(), error::KeyVerifyError> {
                let (message, signature) = TOKEN_VALID.rsplit_once('.').unwrap();
                verify(JWK, jwa::Algorithm::RS256, message, signature)
            }

            #[test]
            fn altered_message_fails_verification() {
                let (message, signature) = TOKEN_VALID.rsplit_once('.').unwrap();
                let mut message = message.to_owned();
                message.make_ascii_uppercase();
                let err =
                    dbg!(verify(JWK, jwa::Algorithm::RS256, &message, signature)).unwrap_err();
                assert!(err.is_signature_invalid());
            }
        }

        mod hmac {
            use super::*;
            use crate::test::hmac::*;

            #[test]
            fn error_verifying_rsa_alg() {
                let err = dbg!(verify(JWK_MINIMAL, jwa::Algorithm::RS512, "", "")).unwrap_err();
                assert!(err.is_incompatible_alg());
            }

            #[test]
            fn error_using_encryption_key_for_signing() {
                let key = Jwk {
                    key_id: None,
                    usage: Some(jwa::Usage::Encryption),
                    algorithm: None,
                    key: Key::Hmac(jwa::Hmac::new(Vec::new())),
                };

                let err = dbg!(key.verify(jwa::Algorithm::HS256, &[], &[])).unwrap_err();

                assert!(err.is_usage_mismatch());
            }

            #[test]
            fn verify_hs256() -> Result<(), error::KeyVerifyError> {
                let (message, signature) = TOKEN_NO_KID.rsplit_once('.').unwrap();
                verify(JWK_MINIMAL, jwa::Algorithm::HS256, message, signature)
            }
        }
    }
}
