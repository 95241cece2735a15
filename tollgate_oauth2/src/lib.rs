//! JWT authorization based on validating OAuth2 scopes
//!
//! This crate uses the definition of OAuth2 as defined in
//! [RFC 6749](https://datatracker.ietf.org/doc/html/rfc6749).
//! Tokens are verified against an [`Authority`], which maintains a
//! cache of each trusted issuer's signing keys, and authorized by the
//! [`ScopePolicy`] carried on a [`Directive`].
//!
//! # Feature flags
//!
//! The `reqwest` feature pulls in `reqwest` to fetch JWKS over HTTP,
//! but deliberately without turning on any TLS support in `reqwest`
//! itself. An application that already depends on `reqwest` with TLS
//! configured (native/OpenSSL/rustls) lends those settings to this
//! crate automatically; one that depends on `reqwest` only
//! transitively through this crate will need to enable `default-tls`
//! or `rustls-tls` itself before HTTPS endpoints can be reached.
//!
//! The `spawn` feature enables [`Authority::spawn_refresh`], which
//! periodically refreshes cached key sets on a background task.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod authority;
mod directive;
mod policy;
pub mod scope;
pub mod source;

pub use authority::{
    Authority, AuthorityBuilder, AuthorityError, DEFAULT_STALENESS_CEILING, DEFAULT_TTL,
};
pub use directive::Directive;
pub use policy::{InsufficientScope, ScopePolicy};
pub use scope::{BasicClaimsWithScope, HasScope, Scope};
