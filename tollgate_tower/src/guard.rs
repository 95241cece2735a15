use std::{fmt, future::Future, marker::PhantomData, pin::Pin, sync::Arc};

use bytes::Bytes;
use http::{HeaderName, Request, Response};
use tollgate::{jwt::CoreClaims, JwtRef};
use tollgate_oauth2::{Authority, AuthorityError, HasScope, InsufficientScope};
use tower_http::auth::AsyncAuthorizeRequest;

use crate::{
    routes::{PolicySet, Requirement},
    util, DefaultErrorHandler,
};

/// Handler for generating responses when a request fails authorization
///
/// The provided [`DefaultErrorHandler`] produces fixed JSON rejections
/// that expose nothing about the failure. Implement this trait to shape
/// rejections differently.
pub trait OnAuthFailure {
    /// The body type of generated responses
    type Body;

    /// The request presented no usable credential
    ///
    /// Covers both an absent credential header and a header whose bytes
    /// cannot form a token.
    fn on_missing_credential(&self) -> Response<Self::Body>;

    /// The presented credential was rejected
    ///
    /// Covers malformed and cryptographically invalid tokens, tokens
    /// signed by a key the authority does not hold, and an authority
    /// that could not obtain keys at all.
    fn on_credential_rejected(&self, error: AuthorityError) -> Response<Self::Body>;

    /// The credential authenticated, but lacks the scopes the route
    /// demands
    fn on_insufficient_scope(&self, error: InsufficientScope) -> Response<Self::Body>;
}

impl<ResBody> OnAuthFailure for DefaultErrorHandler<ResBody>
where
    ResBody: http_body::Body + From<Bytes>,
{
    type Body = ResBody;

    #[inline]
    fn on_missing_credential(&self) -> Response<Self::Body> {
        util::unauthorized_missing_credential()
    }

    #[inline]
    fn on_credential_rejected(&self, _error: AuthorityError) -> Response<Self::Body> {
        util::unauthorized_invalid_token()
    }

    #[inline]
    fn on_insufficient_scope(&self, _error: InsufficientScope) -> Response<Self::Body> {
        util::forbidden_insufficient_scope()
    }
}

/// Authorizes each request against the route policy set
///
/// The credential header value is taken whole as the token; no scheme
/// prefix is stripped. The token itself is never logged.
pub(crate) struct RouteGuard<Claims, OnError> {
    authority: Authority,
    policies: Arc<PolicySet>,
    credential_header: HeaderName,
    on_error: OnError,
    _claim: PhantomData<fn() -> Claims>,
}

impl<Claims, OnError> RouteGuard<Claims, OnError> {
    pub(crate) fn new(
        authority: Authority,
        policies: Arc<PolicySet>,
        credential_header: HeaderName,
        on_error: OnError,
    ) -> Self {
        Self {
            authority,
            policies,
            credential_header,
            on_error,
            _claim: PhantomData,
        }
    }
}

impl<Claims, OnError> Clone for RouteGuard<Claims, OnError>
where
    OnError: Clone,
{
    fn clone(&self) -> Self {
        Self {
            authority: self.authority.clone(),
            policies: Arc::clone(&self.policies),
            credential_header: self.credential_header.clone(),
            on_error: self.on_error.clone(),
            _claim: PhantomData,
        }
    }
}

impl<Claims, OnError> fmt::Debug for RouteGuard<Claims, OnError>
where
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RouteGuard")
            .field("authority", &self.authority)
            .field("policies", &self.policies)
            .field("credential_header", &self.credential_header)
            .field("on_error", &self.on_error)
            .finish_non_exhaustive()
    }
}

impl<Claims, OnError> RouteGuard<Claims, OnError>
where
    Claims: for<'de> serde::Deserialize<'de> + HasScope + CoreClaims + Clone + Send + Sync + 'static,
    OnError: OnAuthFailure,
{
    async fn check<ReqBody>(
        self,
        mut request: Request<ReqBody>,
    ) -> Result<Request<ReqBody>, Response<OnError::Body>> {
        let Some(policy) = self
            .policies
            .resolve(request.method(), request.uri().path())
        else {
            tracing::trace!("no route policy matched; forwarding request");
            return Ok(request);
        };

        let directive = match policy.requirement() {
            Requirement::Public => {
                tracing::trace!(pattern = policy.pattern(), "route is public; forwarding request");
                return Ok(request);
            }
            Requirement::Protected(directive) => directive,
        };

        let token = match request.headers().get(&self.credential_header) {
            Some(value) => match value.to_str() {
                Ok(token) => JwtRef::from_str(token),
                Err(_) => {
                    tracing::debug!(
                        header = %self.credential_header,
                        "credential header holds bytes that cannot form a token"
                    );
                    return Err(self.on_error.on_missing_credential());
                }
            },
            None => {
                tracing::debug!(
                    header = %self.credential_header,
                    "request presented no credential"
                );
                return Err(self.on_error.on_missing_credential());
            }
        };

        match self.authority.verify_token::<Claims>(token, directive).await {
            Ok(claims) => {
                let _ = request.extensions_mut().insert(claims);
                tracing::trace!("token verified; forwarding request with claims");
                Ok(request)
            }
            Err(AuthorityError::PolicyDenial(denial)) => {
                let error: &dyn std::error::Error = &denial;
                tracing::debug!(error, "token lacks the scopes the route demands");
                Err(self.on_error.on_insufficient_scope(denial))
            }
            Err(error) => {
                let cause: &dyn std::error::Error = &error;
                tracing::debug!(error = cause, "credential rejected");
                Err(self.on_error.on_credential_rejected(error))
            }
        }
    }
}

impl<Claims, OnError, ReqBody> AsyncAuthorizeRequest<ReqBody> for RouteGuard<Claims, OnError>
where
    Claims: for<'de> serde::Deserialize<'de> + HasScope + CoreClaims + Clone + Send + Sync + 'static,
    OnError: OnAuthFailure + Clone + Send + 'static,
    ReqBody: Send + 'static,
{
    type RequestBody = ReqBody;
    type ResponseBody = OnError::Body;
    type Future =
        Pin<Box<dyn Future<Output = Result<Request<ReqBody>, Response<OnError::Body>>> + Send>>;

    fn authorize(&mut self, request: Request<ReqBody>) -> Self::Future {
        Box::pin(self.clone().check(request))
    }
}
