//! Tower middleware for guarding HTTP routes with `tollgate`
//! authorities
//!
//! Routes are registered up front in a [`PolicySet`], marking each as
//! either public or protected by a
//! [`Directive`][tollgate_oauth2::Directive]. The layer produced by
//! [`RouteAuthorizer::layer`] resolves every request against that set:
//! public and unmatched routes pass through untouched, while protected
//! routes must present a token the
//! [`Authority`][tollgate_oauth2::Authority] accepts. Verified claims
//! are stored in the request's extensions, and rejections carry fixed
//! JSON bodies with RFC 6750 `www-authenticate` challenges.
//!
//! ```
//! use http::Method;
//! use tollgate::jwa;
//! use tollgate_oauth2::{scope, Directive};
//! use tollgate_tower::{PolicySet, RouteAuthorizer};
//! # use tollgate::{jwk, jwt::CoreClaims, Jwk, Jwks};
//! # use tollgate_oauth2::{source::StaticJwksSource, Authority};
//!
//! # fn construct_authority() -> Authority {
//! #     // This key set would otherwise come from the issuer's JWKS endpoint
//! #     let key = Jwk::from(jwa::Hmac::new(b"test-secret".to_vec()))
//! #         .with_algorithm(jwa::Algorithm::HS256)
//! #         .with_key_id(jwk::KeyId::new("demo".to_owned()));
//! #     let mut jwks = Jwks::default();
//! #     jwks.add_key(key);
//! #     Authority::new(StaticJwksSource::new(jwks))
//! # }
//! let authority = construct_authority();
//!
//! let items = Directive::new("https://issuer.example.com/")
//!     .with_audience("https://api.example.com/items")
//!     .with_algorithms([jwa::Algorithm::HS256]);
//!
//! let policies = PolicySet::builder()
//!     .public(Method::GET, "/items")
//!     .protected(Method::GET, "/items/:id", items.clone())
//!     .protected(
//!         Method::POST,
//!         "/items",
//!         items.require_scopes(scope!["write:items"]),
//!     )
//!     .build()?;
//!
//! let authorizer = RouteAuthorizer::new()
//!     .with_default_error_handler::<axum::body::Body>();
//!
//! let app = axum::Router::new()
//!     .route("/items", axum::routing::get(list_items).post(create_item))
//!     .route("/items/:id", axum::routing::get(show_item))
//!     .layer(authorizer.layer(authority, policies));
//! # let _app: axum::Router = app;
//!
//! # async fn list_items() -> &'static str { "[]" }
//! # async fn show_item() -> &'static str { "{}" }
//! # async fn create_item(
//! #     axum::Extension(claims): axum::Extension<tollgate_oauth2::BasicClaimsWithScope>,
//! # ) -> String {
//! #     format!("{:?}", claims.basic.sub())
//! # }
//! # Ok::<_, tollgate_tower::PolicyConflict>(())
//! ```

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

use std::fmt;
use std::marker::PhantomData;

mod authorizer;
mod guard;
pub mod routes;
pub mod util;

pub use authorizer::RouteAuthorizer;
pub use guard::OnAuthFailure;
pub use routes::{PolicyConflict, PolicySet, PolicySetBuilder, Requirement, RoutePolicy};

/// Responds to authorization failures with fixed JSON rejections
///
/// Generated responses expose nothing about the failure: `401`
/// rejections carry `{"message":"Unauthorized"}` and `403` rejections
/// `{"message":"Forbidden"}`, each with the matching `www-authenticate`
/// challenge from [`util`].
pub struct DefaultErrorHandler<ResBody> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> DefaultErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for DefaultErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("DefaultErrorHandler")
    }
}

impl<ResBody> Default for DefaultErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Clone for DefaultErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> Copy for DefaultErrorHandler<ResBody> {}
