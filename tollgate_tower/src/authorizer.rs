use std::{fmt, marker::PhantomData, sync::Arc};

use bytes::Bytes;
use http::header::{HeaderName, AUTHORIZATION};
use tollgate::jwt::CoreClaims;
use tollgate_oauth2::{Authority, BasicClaimsWithScope, HasScope};
use tower_http::auth::{AsyncAuthorizeRequest, AsyncRequireAuthorizationLayer};

use crate::{guard::RouteGuard, routes::PolicySet, DefaultErrorHandler, OnAuthFailure};

/// Builder for a layer that authorizes requests against a route policy
/// set
///
/// By default, claims are extracted as [`BasicClaimsWithScope`] and the
/// credential is read from the `authorization` header. Both can be
/// changed before attaching an error handler and producing the layer
/// with [`layer()`][Self::layer].
pub struct RouteAuthorizer<Claims, OnError> {
    credential_header: HeaderName,
    on_error: OnError,
    _claim: PhantomData<fn() -> Claims>,
}

impl RouteAuthorizer<BasicClaimsWithScope, ()> {
    /// An authorizer with no error handler attached
    pub fn new() -> Self {
        Self {
            credential_header: AUTHORIZATION,
            on_error: (),
            _claim: PhantomData,
        }
    }
}

impl Default for RouteAuthorizer<BasicClaimsWithScope, ()> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<Claims, OnError> Clone for RouteAuthorizer<Claims, OnError>
where
    OnError: Clone,
{
    fn clone(&self) -> Self {
        Self {
            credential_header: self.credential_header.clone(),
            on_error: self.on_error.clone(),
            _claim: PhantomData,
        }
    }
}

impl<Claims, OnError> fmt::Debug for RouteAuthorizer<Claims, OnError>
where
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RouteAuthorizer")
            .field("credential_header", &self.credential_header)
            .field("on_error", &self.on_error)
            .finish_non_exhaustive()
    }
}

impl<OnError> RouteAuthorizer<BasicClaimsWithScope, OnError> {
    /// Changes the claims type extracted from verified tokens
    ///
    /// The claims are deserialized from the token payload and stored in
    /// the request's extensions for inner services to read.
    pub fn with_claims<Claims>(self) -> RouteAuthorizer<Claims, OnError>
    where
        Claims: HasScope,
    {
        RouteAuthorizer {
            credential_header: self.credential_header,
            on_error: self.on_error,
            _claim: PhantomData,
        }
    }
}

impl<Claims, OnError> RouteAuthorizer<Claims, OnError> {
    /// Reads credentials from the given header instead of
    /// `authorization`
    ///
    /// Whichever header is used, its entire value is taken as the
    /// token. No scheme prefix is stripped or required.
    pub fn with_credential_header(self, header: HeaderName) -> Self {
        Self {
            credential_header: header,
            ..self
        }
    }
}

impl<Claims> RouteAuthorizer<Claims, ()> {
    /// Attaches a custom error handler for generating rejections
    pub fn with_error_handler<OnError>(self, on_error: OnError) -> RouteAuthorizer<Claims, OnError>
    where
        OnError: OnAuthFailure,
    {
        RouteAuthorizer {
            credential_header: self.credential_header,
            on_error,
            _claim: PhantomData,
        }
    }

    /// Attaches [`DefaultErrorHandler`] with the given body type
    pub fn with_default_error_handler<ResBody>(
        self,
    ) -> RouteAuthorizer<Claims, DefaultErrorHandler<ResBody>>
    where
        ResBody: http_body::Body + From<Bytes>,
    {
        self.with_error_handler(DefaultErrorHandler::new())
    }
}

impl<Claims, OnError> RouteAuthorizer<Claims, OnError>
where
    Claims: for<'de> serde::Deserialize<'de> + HasScope + CoreClaims + Clone + Send + Sync + 'static,
    OnError: OnAuthFailure + Clone + Send + 'static,
{
    /// The middleware layer enforcing `policies` with tokens verified
    /// by `authority`
    ///
    /// Each request is resolved against the policy set. Unmatched and
    /// public routes are forwarded untouched. Protected routes must
    /// present a token the authority accepts under the route's
    /// directive, and the verified claims are stored in the request's
    /// extensions. Failure causes are logged at debug level; the
    /// credential itself is never logged.
    pub fn layer<ReqBody>(
        &self,
        authority: Authority,
        policies: PolicySet,
    ) -> AsyncRequireAuthorizationLayer<
        impl AsyncAuthorizeRequest<
            ReqBody,
            RequestBody = ReqBody,
            ResponseBody = OnError::Body,
            Future: Send,
        > + Clone,
    >
    where
        ReqBody: Send + 'static,
    {
        AsyncRequireAuthorizationLayer::new(RouteGuard::<Claims, OnError>::new(
            authority,
            Arc::new(policies),
            self.credential_header.clone(),
            self.on_error.clone(),
        ))
    }
}
