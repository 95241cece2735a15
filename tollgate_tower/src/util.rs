//! Utilities for generating the fixed responses returned on
//! authorization failures
//!
//! Every rejection carries a constant JSON body and an RFC 6750
//! `www-authenticate` challenge. Nothing about the failure itself is
//! exposed to the caller.

use bytes::Bytes;
use http::{header, HeaderValue, Response, StatusCode};

const UNAUTHORIZED_BODY: &[u8] = br#"{"message":"Unauthorized"}"#;
const FORBIDDEN_BODY: &[u8] = br#"{"message":"Forbidden"}"#;

/// Constructs the response for a request that presented no usable
/// credential
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// content-type: application/json
/// www-authenticate: Bearer
///
/// {"message":"Unauthorized"}
/// ```
pub fn unauthorized_missing_credential<Body>() -> Response<Body>
where
    Body: From<Bytes>,
{
    rejection(
        StatusCode::UNAUTHORIZED,
        HeaderValue::from_static("Bearer"),
        UNAUTHORIZED_BODY,
    )
}

/// Constructs the response for a credential that could not be accepted
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// content-type: application/json
/// www-authenticate: Bearer error="invalid_token"
///
/// {"message":"Unauthorized"}
/// ```
pub fn unauthorized_invalid_token<Body>() -> Response<Body>
where
    Body: From<Bytes>,
{
    rejection(
        StatusCode::UNAUTHORIZED,
        HeaderValue::from_static(r#"Bearer error="invalid_token""#),
        UNAUTHORIZED_BODY,
    )
}

/// Constructs the response for a token lacking the scopes the route
/// demands
///
/// ```http
/// HTTP/1.1 403 Forbidden
/// content-type: application/json
/// www-authenticate: Bearer error="insufficient_scope"
///
/// {"message":"Forbidden"}
/// ```
pub fn forbidden_insufficient_scope<Body>() -> Response<Body>
where
    Body: From<Bytes>,
{
    rejection(
        StatusCode::FORBIDDEN,
        HeaderValue::from_static(r#"Bearer error="insufficient_scope""#),
        FORBIDDEN_BODY,
    )
}

fn rejection<Body>(status: StatusCode, challenge: HeaderValue, body: &'static [u8]) -> Response<Body>
where
    Body: From<Bytes>,
{
    let mut response = Response::new(Body::from(Bytes::from_static(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, challenge);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_missing_credential_rejection_has_the_expected_shape() {
        let response = unauthorized_missing_credential::<Bytes>();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert_eq!(response.body().as_ref(), br#"{"message":"Unauthorized"}"#);
    }

    #[test]
    fn an_invalid_token_rejection_has_the_expected_shape() {
        let response = unauthorized_invalid_token::<Bytes>();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer error="invalid_token""#
        );
        assert_eq!(response.body().as_ref(), br#"{"message":"Unauthorized"}"#);
    }

    #[test]
    fn an_insufficient_scope_rejection_has_the_expected_shape() {
        let response = forbidden_insufficient_scope::<Bytes>();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            r#"Bearer error="insufficient_scope""#
        );
        assert_eq!(response.body().as_ref(), br#"{"message":"Forbidden"}"#);
    }
}
