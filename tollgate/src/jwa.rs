//! Implementations of the JSON Web Algorithms (JWA) standard
//!
//! The specifications for these algorithms can be found in [RFC7518][].
//! This crate carries the HMAC and RSA signing families; it has no notion
//! of an unsigned (`"none"`) algorithm.
//!
//! [RFC7518]: https://tools.ietf.org/html/rfc7518

pub mod hmac;
pub mod rsa;

#[doc(inline)]
pub use hmac::Hmac;

mod algorithm;
mod usage;

pub use algorithm::Algorithm;
pub use usage::Usage;
