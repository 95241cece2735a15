//! Sources from which issuer key sets are fetched
//!
//! An [`Authority`][crate::Authority] does not speak to identity
//! providers directly; it asks a [`JwksSource`] for the current key
//! set whenever its cached copy needs refreshing. The [`HttpJwksSource`]
//! resolves an issuer's key set location through OIDC discovery and
//! revalidates with conditional requests, while [`StaticJwksSource`]
//! serves a fixed set for tests and out-of-band provisioning.

#[cfg(feature = "reqwest")]
use std::sync::Arc;
#[cfg(feature = "reqwest")]
use std::time::Duration;

#[cfg(feature = "reqwest")]
use ahash::AHashMap;
#[cfg(feature = "reqwest")]
use arc_swap::ArcSwap;
use async_trait::async_trait;
#[cfg(feature = "reqwest")]
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode,
};
#[cfg(feature = "reqwest")]
use serde::Deserialize;
use thiserror::Error;
use tollgate::{jwt, Jwks};

/// An error encountered while fetching a key set from its source
#[derive(Debug, Error)]
#[error("unable to fetch the key set")]
pub struct JwksFetchError(#[source] Box<dyn std::error::Error + Send + Sync + 'static>);

impl JwksFetchError {
    /// Wraps the underlying cause of a fetch failure
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }
}

/// The outcome of asking a source for an issuer's key set
#[derive(Debug)]
pub enum FetchedKeys {
    /// The key set has not changed since the last successful fetch
    NotModified,
    /// A freshly fetched key set
    Fresh(Jwks),
}

/// A source from which an issuer's published key set can be fetched
///
/// Implementations may retain revalidation state, such as HTTP entity
/// tags, so that an unchanged key set can be reported as
/// [`FetchedKeys::NotModified`] rather than re-transferred.
#[async_trait]
pub trait JwksSource: Send + Sync {
    /// Fetches the current key set published by `issuer`
    async fn fetch_jwks(&self, issuer: &jwt::IssuerRef) -> Result<FetchedKeys, JwksFetchError>;
}

/// A source that always serves a fixed key set
///
/// Useful for tests and for deployments where signing keys are
/// provisioned out of band.
#[derive(Clone, Debug)]
pub struct StaticJwksSource {
    jwks: Jwks,
}

impl StaticJwksSource {
    /// Constructs a source serving `jwks` for every issuer
    pub fn new(jwks: Jwks) -> Self {
        Self { jwks }
    }
}

#[async_trait]
impl JwksSource for StaticJwksSource {
    async fn fetch_jwks(&self, _issuer: &jwt::IssuerRef) -> Result<FetchedKeys, JwksFetchError> {
        Ok(FetchedKeys::Fresh(self.jwks.clone()))
    }
}

#[cfg(feature = "reqwest")]
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(feature = "reqwest")]
#[derive(Debug, Default)]
struct IssuerState {
    jwks_url: Option<String>,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

/// The subset of the OIDC discovery document relevant to key discovery
#[cfg(feature = "reqwest")]
#[derive(Debug, Deserialize)]
struct OidcConfiguration {
    jwks_uri: String,
}

/// A source that discovers and fetches issuer key sets over HTTP
///
/// The location of an issuer's key set is resolved once through OIDC
/// discovery at `{issuer}/.well-known/openid-configuration`, unless an
/// explicit URL override was registered for that issuer. Refetches use
/// conditional requests whenever the server previously provided an
/// `ETag` or `Last-Modified` validator.
#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
#[derive(Debug)]
pub struct HttpJwksSource {
    client: Client,
    timeout: Duration,
    overrides: AHashMap<jwt::Issuer, String>,
    state: ArcSwap<AHashMap<jwt::Issuer, Arc<IssuerState>>>,
}

#[cfg(feature = "reqwest")]
impl HttpJwksSource {
    /// Constructs a source with a default client and request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be
    /// constructed.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    /// A builder for customizing the source
    pub fn builder() -> HttpJwksSourceBuilder {
        HttpJwksSourceBuilder::default()
    }

    fn issuer_state(&self, issuer: &jwt::IssuerRef) -> Arc<IssuerState> {
        self.state
            .load()
            .get(issuer)
            .map(Arc::clone)
            .unwrap_or_default()
    }

    fn update_state(&self, issuer: &jwt::IssuerRef, state: Arc<IssuerState>) {
        let mut current = self.state.load();
        loop {
            let mut updated = AHashMap::clone(&current);
            updated.insert(issuer.to_owned(), Arc::clone(&state));

            let prev = self.state.compare_and_swap(&*current, Arc::new(updated));
            if Arc::ptr_eq(&*current, &*prev) {
                return;
            }
            // Lost a concurrent update to another issuer's state; retry
            current = prev;
        }
    }

    async fn discover_jwks_url(&self, issuer: &jwt::IssuerRef) -> Result<String, JwksFetchError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.as_str().trim_end_matches('/')
        );
        tracing::debug!(oidc.discovery_url = %discovery_url, "discovering JWKS location");

        let config: OidcConfiguration = self
            .client
            .get(&discovery_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(JwksFetchError::new)?
            .error_for_status()
            .map_err(JwksFetchError::new)?
            .json()
            .await
            .map_err(JwksFetchError::new)?;

        // Remember the resolved location even if the subsequent fetch
        // fails, retaining any validators already held
        let held = self.issuer_state(issuer);
        self.update_state(
            issuer,
            Arc::new(IssuerState {
                jwks_url: Some(config.jwks_uri.clone()),
                etag: held.etag.clone(),
                last_modified: held.last_modified.clone(),
            }),
        );

        Ok(config.jwks_uri)
    }
}

#[cfg(feature = "reqwest")]
#[async_trait]
impl JwksSource for HttpJwksSource {
    #[tracing::instrument(skip(self), fields(jwks.url = tracing::field::Empty))]
    async fn fetch_jwks(&self, issuer: &jwt::IssuerRef) -> Result<FetchedKeys, JwksFetchError> {
        let state = self.issuer_state(issuer);
        let url = match self.overrides.get(issuer) {
            Some(url) => url.clone(),
            None => match &state.jwks_url {
                Some(url) => url.clone(),
                None => self.discover_jwks_url(issuer).await?,
            },
        };

        let span = tracing::Span::current();
        span.record("jwks.url", url.as_str());
        tracing::debug!("fetching JWKS");

        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(etag) = &state.etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        } else if let Some(last_modified) = &state.last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await.map_err(JwksFetchError::new)?;

        if response.status() == StatusCode::NOT_MODIFIED {
            tracing::debug!("JWKS not modified");
            return Ok(FetchedKeys::NotModified);
        }

        if let Err(err) = response.error_for_status_ref() {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(
                error,
                http.status_code = response.status().as_u16(),
                "JWKS fetch failed; unexpected response status",
            );
            return Err(JwksFetchError::new(err));
        }

        let etag = response.headers().get(header::ETAG).map(ToOwned::to_owned);
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .map(ToOwned::to_owned);

        let jwks = match response.json::<Jwks>().await {
            Ok(jwks) => jwks,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "JWKS fetch failed; unexpected error");
                return Err(JwksFetchError::new(err));
            }
        };

        self.update_state(
            issuer,
            Arc::new(IssuerState {
                jwks_url: Some(url),
                etag,
                last_modified,
            }),
        );

        tracing::info!("JWKS refreshed");
        Ok(FetchedKeys::Fresh(jwks))
    }
}

/// A builder for an [`HttpJwksSource`]
#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
#[derive(Debug, Default)]
#[must_use]
pub struct HttpJwksSourceBuilder {
    client: Option<Client>,
    timeout: Option<Duration>,
    overrides: AHashMap<jwt::Issuer, String>,
}

#[cfg(feature = "reqwest")]
impl HttpJwksSourceBuilder {
    /// Uses the provided HTTP client rather than constructing one
    pub fn with_client(self, client: Client) -> Self {
        Self {
            client: Some(client),
            ..self
        }
    }

    /// Overrides the per-request timeout
    ///
    /// Defaults to 10 seconds.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Registers an explicit key set URL for an issuer, bypassing OIDC
    /// discovery
    pub fn with_jwks_url(mut self, issuer: jwt::Issuer, url: impl Into<String>) -> Self {
        self.overrides.insert(issuer, url.into());
        self
    }

    /// Constructs the source
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be
    /// constructed.
    pub fn build(self) -> Result<HttpJwksSource, reqwest::Error> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(concat!("tollgate_oauth2/", env!("CARGO_PKG_VERSION")))
                .build()?,
        };

        Ok(HttpJwksSource {
            client,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            overrides: self.overrides,
            state: ArcSwap::from_pointee(AHashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_always_serves_its_key_set() {
        let source = StaticJwksSource::new(Jwks::default());
        let issuer = jwt::IssuerRef::from_str("https://issuer.example.com/");

        let fetched = source.fetch_jwks(issuer).await.unwrap();
        assert!(matches!(fetched, FetchedKeys::Fresh(jwks) if jwks.keys().is_empty()));
    }

    #[test]
    fn fetch_errors_surface_their_cause() {
        let err = JwksFetchError::new("connection reset");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection reset");
    }
}
