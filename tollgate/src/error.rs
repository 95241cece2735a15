//! Common errors

#![allow(missing_copy_implementations)]

use std::error::Error as StdError;

use thiserror::Error;

/// The key cannot be used with the requested algorithm
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("key incompatible with algorithm '{alg}'")]
pub struct IncompatibleAlgorithm {
    alg: crate::jwa::Algorithm,
}

#[inline]
pub(crate) fn incompatible_algorithm(
    alg: impl Into<crate::jwa::Algorithm>,
) -> IncompatibleAlgorithm {
    IncompatibleAlgorithm { alg: alg.into() }
}

/// The named algorithm is not supported
///
/// `"none"` always lands here: there is no algorithm variant for an
/// unsigned token, so one can never make it past header parsing.
#[derive(Debug, Error)]
#[error("'{alg}' is not a supported algorithm")]
pub struct UnsupportedAlgorithm {
    alg: String,
}

#[inline]
pub(crate) fn unsupported_algorithm(alg: String) -> UnsupportedAlgorithm {
    UnsupportedAlgorithm { alg }
}

/// The key has a declared usage that disallows this use
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("key cannot be used in this way")]
pub struct KeyUsageMismatch {
    _p: (),
}

pub(crate) const fn key_usage_mismatch() -> KeyUsageMismatch {
    KeyUsageMismatch { _p: () }
}

/// The token cannot be split into header, payload, and signature sections
#[derive(Clone, Copy, Debug, Error)]
#[error("malformed token")]
pub struct MalformedToken {
    _p: (),
}

pub(crate) fn malformed_token() -> MalformedToken {
    MalformedToken { _p: () }
}

/// The token header section is malformed
#[derive(Debug, Error)]
#[error("malformed token header")]
pub struct MalformedTokenHeader {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_token_header(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedTokenHeader {
    MalformedTokenHeader {
        source: source.into(),
    }
}

/// The token payload section is malformed
#[derive(Debug, Error)]
#[error("malformed token payload")]
pub struct MalformedTokenPayload {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_token_payload(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedTokenPayload {
    MalformedTokenPayload {
        source: source.into(),
    }
}

/// The token signature section is malformed
#[derive(Debug, Error)]
#[error("malformed token signature")]
pub struct MalformedTokenSignature {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn malformed_token_signature(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> MalformedTokenSignature {
    MalformedTokenSignature {
        source: source.into(),
    }
}

/// The signature did not match the signing input
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("invalid signature")]
pub struct SignatureInvalid {
    _p: (),
}

pub(crate) const fn signature_invalid() -> SignatureInvalid {
    SignatureInvalid { _p: () }
}

/// The key was rejected
#[derive(Debug, Error)]
#[error("key rejected")]
pub struct KeyRejected {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn key_rejected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> KeyRejected {
    KeyRejected {
        source: source.into(),
    }
}

/// Missing private key
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("cannot sign without a private key")]
pub struct MissingPrivateKey {
    _p: (),
}

pub(crate) const fn missing_private_key() -> MissingPrivateKey {
    MissingPrivateKey { _p: () }
}

/// Unexpected error (possibly a bug)
#[derive(Debug, Error)]
#[error("unexpected error")]
pub struct Unexpected {
    #[from]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

pub(crate) fn unexpected(
    source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> Unexpected {
    Unexpected {
        source: source.into(),
    }
}

/// An error occurring while creating a signature
#[derive(Debug, Error)]
pub enum SigningError {
    /// The key cannot be used for signing operations
    #[error(transparent)]
    MissingPrivateKey(#[from] MissingPrivateKey),

    /// The key cannot be used for signature creation
    #[error(transparent)]
    KeyUsageMismatch(#[from] KeyUsageMismatch),

    /// The key cannot be used with this algorithm
    #[error(transparent)]
    IncompatibleAlgorithm(#[from] IncompatibleAlgorithm),

    /// An unexpected error
    #[error(transparent)]
    Unexpected(#[from] Unexpected),
}

impl From<std::convert::Infallible> for SigningError {
    fn from(_: std::convert::Infallible) -> Self {
        unreachable!("infallible result")
    }
}

/// An error occurring while verifying a signature with a key
#[derive(Debug, Error)]
pub enum KeyVerifyError {
    /// The token cannot be used with this algorithm
    #[error(transparent)]
    IncompatibleAlgorithm(#[from] IncompatibleAlgorithm),

    /// The key cannot be used for signature verification
    #[error(transparent)]
    KeyUsageMismatch(#[from] KeyUsageMismatch),

    /// The signature is invalid
    #[error(transparent)]
    SignatureInvalid(#[from] SignatureInvalid),

    /// An unexpected error
    #[error(transparent)]
    Unexpected(#[from] Unexpected),
}

impl KeyVerifyError {
    /// Whether the error is due to an incompatible algorithm
    #[must_use]
    pub fn is_incompatible_alg(&self) -> bool {
        matches!(self, Self::IncompatibleAlgorithm(_))
    }

    /// Whether the error is due to a usage mismatch
    #[must_use]
    pub fn is_usage_mismatch(&self) -> bool {
        matches!(self, Self::KeyUsageMismatch(_))
    }

    /// Whether the error is due to an invalid signature
    #[must_use]
    pub fn is_signature_invalid(&self) -> bool {
        matches!(self, Self::SignatureInvalid(_))
    }
}

/// An error occurring while verifying a token
#[derive(Debug, Error)]
pub enum JwtVerifyError {
    /// The token was rejected by the signing key
    #[error("token rejected by signing key")]
    KeyVerifyError(#[from] KeyVerifyError),

    /// The token names an algorithm this crate does not support
    #[error(transparent)]
    UnsupportedAlgorithm(#[from] UnsupportedAlgorithm),

    /// The token is malformed, without a discernible header, payload, and signature
    #[error(transparent)]
    MalformedToken(#[from] MalformedToken),

    /// The token header is malformed
    #[error(transparent)]
    MalformedTokenHeader(#[from] MalformedTokenHeader),

    /// The token payload is malformed
    #[error(transparent)]
    MalformedTokenPayload(#[from] MalformedTokenPayload),

    /// The token signature is malformed
    #[error(transparent)]
    MalformedTokenSignature(#[from] MalformedTokenSignature),

    /// The token was rejected by the claims validator
    #[error("token rejected by claims validator")]
    ClaimsRejected(#[from] ClaimsRejected),

    /// An unexpected error
    #[error(transparent)]
    Unexpected(#[from] Unexpected),
}

impl JwtVerifyError {
    /// Whether the error is due to a structurally malformed token
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::MalformedTokenHeader(_)
                | Self::MalformedTokenPayload(_)
                | Self::MalformedTokenSignature(_)
        )
    }

    /// Whether the error is due to a signature that did not verify
    #[must_use]
    pub fn is_signature_invalid(&self) -> bool {
        matches!(self, Self::KeyVerifyError(e) if e.is_signature_invalid())
    }
}

/// An error occurring while signing a token
#[derive(Debug, Error)]
pub enum JwtSigningError {
    /// The signature could not be created
    #[error(transparent)]
    SigningError(#[from] SigningError),

    /// The token header could not be serialized
    #[error(transparent)]
    MalformedTokenHeader(#[from] MalformedTokenHeader),

    /// The token payload could not be serialized
    #[error(transparent)]
    MalformedTokenPayload(#[from] MalformedTokenPayload),

    /// An unexpected error
    #[error(transparent)]
    Unexpected(#[from] Unexpected),
}

/// An error occurring when validating the claims of a token
#[derive(Debug, PartialEq, Eq, Error)]
pub enum ClaimsRejected {
    /// The token algorithm is not in the approved set
    #[error("unapproved algorithm")]
    UnapprovedAlgorithm,

    /// None of the token audiences is allowed
    #[error("audience mismatch")]
    AudienceMismatch,

    /// The token issuer is not the expected issuer
    #[error("issuer mismatch")]
    IssuerMismatch,

    /// The token subject is not acceptable
    #[error("subject mismatch")]
    SubjectMismatch,

    /// The token is expired according to the `exp` claim
    #[error("token expired")]
    TokenExpired,

    /// The token is not yet valid according to the `nbf` claim
    #[error("token not yet valid")]
    TokenNotYetValid,

    /// A required claim is missing
    #[error("required {_0} claim missing")]
    MissingRequiredClaim(&'static str),
}
