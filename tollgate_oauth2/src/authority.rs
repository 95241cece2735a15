#[cfg(feature = "spawn")]
use std::time::Duration;
use std::{fmt, sync::Arc};

use ahash::AHashMap;
use arc_swap::{ArcSwap, ArcSwapOption};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tollgate::{
    jwt::{self, CoreHeaders, HasAlgorithm},
    Jwks, JwtRef,
};
use tollgate_clock::{Clock, DurationSecs, System, UnixTime};

use crate::{
    scope::HasScope,
    source::{FetchedKeys, JwksFetchError, JwksSource},
    Directive,
};

/// How long a fetched key set is served before revalidation, unless
/// overridden through the builder
pub const DEFAULT_TTL: DurationSecs = DurationSecs(600);

/// How long a key set may continue to be served once refreshes begin
/// failing, unless overridden through the builder
pub const DEFAULT_STALENESS_CEILING: DurationSecs = DurationSecs(86_400);

/// An error encountered while verifying a token against an [`Authority`]
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Indicates that the authority cannot verify the JWT because it cannot
    /// find a key which matches the specifications in the token header
    #[error("no matching key found to validate JWT")]
    UnknownSigningKey,

    /// Indicates that the issuer's key set could not be obtained and no
    /// servable copy was held
    #[error("issuer key set unavailable")]
    KeyFetchUnavailable(#[from] JwksFetchError),

    /// Indicates that the JWT was malformed or otherwise defective
    #[error("invalid JWT")]
    JwtVerifyError(#[from] tollgate::error::JwtVerifyError),

    /// Indicates that, while the JWT was acceptable, it does not grant the
    /// level of authorization requested.
    #[error("access denied by policy")]
    PolicyDenial(#[from] crate::InsufficientScope),
}

#[derive(Debug)]
struct CachedJwks {
    jwks: Arc<Jwks>,
    fetched_at: UnixTime,

    /// Incremented on every successful fetch, so a caller that missed a
    /// key can tell whether a refresh already happened while it waited
    generation: u64,
}

struct IssuerSlot {
    data: ArcSwapOption<CachedJwks>,
    refresh: Mutex<()>,
}

impl Default for IssuerSlot {
    fn default() -> Self {
        Self {
            data: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        }
    }
}

struct Inner {
    issuers: ArcSwap<AHashMap<jwt::Issuer, Arc<IssuerSlot>>>,
    source: Box<dyn JwksSource>,
    clock: Box<dyn Clock + Send + Sync>,
    ttl: DurationSecs,
    staleness_ceiling: DurationSecs,
}

/// A verification authority over one or more trusted issuers
///
/// The authority caches each issuer's JSON Web Key Set (JWKS), refreshing
/// a set from its [`JwksSource`] once its time to live lapses. When a
/// refresh fails, the stale set continues to be served until it reaches
/// the staleness ceiling, beyond which verification fails instead.
///
/// A token naming a key absent from the cached set forces a single
/// refresh before the token is rejected, so newly rotated keys are
/// honored without waiting out the time to live. Concurrent verifications
/// share one in-flight fetch per issuer.
#[derive(Clone)]
#[must_use]
pub struct Authority {
    inner: Arc<Inner>,
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority")
            .field("ttl", &self.inner.ttl)
            .field("staleness_ceiling", &self.inner.staleness_ceiling)
            .finish_non_exhaustive()
    }
}

impl Authority {
    /// Constructs an authority with the default cache behavior
    pub fn new(source: impl JwksSource + 'static) -> Self {
        Self::builder(source).build()
    }

    /// A builder for customizing the authority's cache behavior
    pub fn builder(source: impl JwksSource + 'static) -> AuthorityBuilder {
        AuthorityBuilder::new(source)
    }

    /// Authenticates the token against the directive's issuer and checks
    /// access according to the directive's policy
    ///
    /// # Errors
    ///
    /// Returns an error if the token is invalid, if no key able to verify
    /// the token can be obtained, or if the token is not authorized by
    /// the directive's policy.
    pub async fn verify_token<T>(
        &self,
        token: &JwtRef,
        directive: &Directive,
    ) -> Result<T, AuthorityError>
    where
        T: for<'de> Deserialize<'de> + HasScope + jwt::CoreClaims,
    {
        let decomposed = token.decompose()?;

        let issuer = directive.issuer();
        let slot = self.slot(issuer);

        let kid = match decomposed.kid() {
            Some(kid) => kid,
            None => {
                tracing::debug!(alg = %decomposed.alg(), "token names no key ID");
                return Err(AuthorityError::UnknownSigningKey);
            }
        };
        let alg = decomposed.alg();

        let mut cached = self.current_keys(&slot, issuer).await?;

        if cached.jwks.get_key_by_id(kid, alg).is_none() {
            tracing::debug!(%kid, %alg, "no matching key held; forcing a refresh");
            cached = self
                .refresh_after_miss(&slot, issuer, cached.generation)
                .await?;
        }

        let key = cached.jwks.get_key_by_id(kid, alg).ok_or_else(|| {
            tracing::debug!(%kid, %alg, "unable to find matching key");
            AuthorityError::UnknownSigningKey
        })?;

        let validated: jwt::Validated<T> = decomposed.verify(key, directive.validator())?;

        directive.policy().evaluate(validated.claims().scope())?;

        let (_, validated_claims) = validated.extract();

        Ok(validated_claims)
    }

    /// The issuer's current key set, fetched or refreshed as needed
    ///
    /// # Errors
    ///
    /// Returns an error if no servable key set can be obtained.
    pub async fn get_keys(&self, issuer: &jwt::IssuerRef) -> Result<Arc<Jwks>, AuthorityError> {
        let slot = self.slot(issuer);
        let cached = self.current_keys(&slot, issuer).await?;
        Ok(Arc::clone(&cached.jwks))
    }

    /// Refreshes the issuer's key set from its source
    ///
    /// No retries are attempted. If the fetch fails, the held key set
    /// is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the key set could not be fetched.
    pub async fn refresh(&self, issuer: &jwt::IssuerRef) -> Result<(), JwksFetchError> {
        let slot = self.slot(issuer);
        let _refreshing = slot.refresh.lock().await;
        self.fetch_into(&slot, issuer).await?;
        Ok(())
    }

    /// Refreshes the key set of every issuer this authority has served
    ///
    /// Failed refreshes leave the issuer's held key set unchanged.
    pub async fn refresh_all(&self) {
        let issuers: Vec<jwt::Issuer> = self.inner.issuers.load().keys().cloned().collect();

        for issuer in issuers {
            // Ignore any errors; we'll just try again next time
            let _ = self.refresh(&issuer).await;
        }
    }

    /// Spawns a background task that refreshes every known issuer key
    /// set using the configured interval
    #[cfg(feature = "spawn")]
    #[cfg_attr(docsrs, doc(cfg(feature = "spawn")))]
    pub fn spawn_refresh(&self, interval: Duration) {
        let this = self.clone();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;

            loop {
                timer.tick().await;
                this.refresh_all().await;
            }
        });
    }

    /// Installs a key set for the issuer as though it had just been
    /// fetched
    pub fn set_jwks(&self, issuer: &jwt::IssuerRef, jwks: Jwks) {
        let slot = self.slot(issuer);
        let generation = slot
            .data
            .load()
            .as_ref()
            .map_or(0, |held| held.generation + 1);

        slot.data.store(Some(Arc::new(CachedJwks {
            jwks: Arc::new(jwks),
            fetched_at: self.inner.clock.now(),
            generation,
        })));
    }

    fn slot(&self, issuer: &jwt::IssuerRef) -> Arc<IssuerSlot> {
        if let Some(slot) = self.inner.issuers.load().get(issuer) {
            return Arc::clone(slot);
        }

        let slot = Arc::new(IssuerSlot::default());
        let mut current = self.inner.issuers.load();
        loop {
            if let Some(winner) = current.get(issuer) {
                return Arc::clone(winner);
            }

            let mut updated = AHashMap::clone(&current);
            updated.insert(issuer.to_owned(), Arc::clone(&slot));

            let prev = self
                .inner
                .issuers
                .compare_and_swap(&*current, Arc::new(updated));
            if Arc::ptr_eq(&*current, &*prev) {
                return slot;
            }
            // Lost the race; retry against the winner's map
            current = prev;
        }
    }

    /// Serves the freshest key set available, fetching when the held set
    /// has outlived its time to live
    async fn current_keys(
        &self,
        slot: &IssuerSlot,
        issuer: &jwt::IssuerRef,
    ) -> Result<Arc<CachedJwks>, AuthorityError> {
        if let Some(cached) = slot.data.load_full() {
            if self.is_fresh(&cached, self.inner.clock.now()) {
                return Ok(cached);
            }
        }

        let _refreshing = slot.refresh.lock().await;

        // Another caller may have refreshed while we waited on the lock
        let held = slot.data.load_full();
        if let Some(cached) = &held {
            if self.is_fresh(cached, self.inner.clock.now()) {
                return Ok(Arc::clone(cached));
            }
        }

        match self.fetch_into(slot, issuer).await {
            Ok(cached) => Ok(cached),
            Err(err) => {
                if let Some(cached) = held {
                    if self.is_servable(&cached, self.inner.clock.now()) {
                        let error: &dyn std::error::Error = &err;
                        tracing::warn!(
                            error,
                            issuer = %issuer,
                            "issuer key set refresh failed; serving the stale set",
                        );
                        return Ok(cached);
                    }
                }
                Err(AuthorityError::KeyFetchUnavailable(err))
            }
        }
    }

    /// Refreshes the key set after a key lookup miss, unless another
    /// caller already did
    async fn refresh_after_miss(
        &self,
        slot: &IssuerSlot,
        issuer: &jwt::IssuerRef,
        seen_generation: u64,
    ) -> Result<Arc<CachedJwks>, AuthorityError> {
        let _refreshing = slot.refresh.lock().await;

        if let Some(cached) = slot.data.load_full() {
            if cached.generation != seen_generation {
                // A concurrent caller already forced a refresh
                return Ok(cached);
            }
        }

        match self.fetch_into(slot, issuer).await {
            Ok(cached) => Ok(cached),
            Err(err) => {
                // The held set stands; the retried lookup reports the miss
                if let Some(cached) = slot.data.load_full() {
                    let error: &dyn std::error::Error = &err;
                    tracing::warn!(error, issuer = %issuer, "forced key set refresh failed");
                    Ok(cached)
                } else {
                    Err(AuthorityError::KeyFetchUnavailable(err))
                }
            }
        }
    }

    async fn fetch_into(
        &self,
        slot: &IssuerSlot,
        issuer: &jwt::IssuerRef,
    ) -> Result<Arc<CachedJwks>, JwksFetchError> {
        let held = slot.data.load_full();
        let fetched = self.inner.source.fetch_jwks(issuer).await?;
        let now = self.inner.clock.now();

        let cached = match (fetched, held) {
            (FetchedKeys::Fresh(jwks), held) => Arc::new(CachedJwks {
                jwks: Arc::new(jwks),
                fetched_at: now,
                generation: held.map_or(0, |held| held.generation + 1),
            }),
            (FetchedKeys::NotModified, Some(held)) => Arc::new(CachedJwks {
                jwks: Arc::clone(&held.jwks),
                fetched_at: now,
                generation: held.generation + 1,
            }),
            (FetchedKeys::NotModified, None) => {
                return Err(JwksFetchError::new(
                    "source reported an unmodified key set when none was held",
                ));
            }
        };

        tracing::info!(
            issuer = %issuer,
            jwks.keys = cached.jwks.keys().len(),
            "issuer key set cached",
        );
        slot.data.store(Some(Arc::clone(&cached)));

        Ok(cached)
    }

    fn is_fresh(&self, cached: &CachedJwks, now: UnixTime) -> bool {
        now < cached.fetched_at + self.inner.ttl
    }

    fn is_servable(&self, cached: &CachedJwks, now: UnixTime) -> bool {
        now < cached.fetched_at + self.inner.staleness_ceiling
    }
}

/// A builder for an [`Authority`]
#[must_use]
pub struct AuthorityBuilder {
    source: Box<dyn JwksSource>,
    ttl: DurationSecs,
    staleness_ceiling: DurationSecs,
    clock: Box<dyn Clock + Send + Sync>,
}

impl fmt::Debug for AuthorityBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityBuilder")
            .field("ttl", &self.ttl)
            .field("staleness_ceiling", &self.staleness_ceiling)
            .finish_non_exhaustive()
    }
}

impl AuthorityBuilder {
    fn new(source: impl JwksSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            ttl: DEFAULT_TTL,
            staleness_ceiling: DEFAULT_STALENESS_CEILING,
            clock: Box::new(System),
        }
    }

    /// How long a fetched key set is served before revalidation
    ///
    /// Defaults to [`DEFAULT_TTL`].
    pub fn with_ttl(self, ttl: impl Into<DurationSecs>) -> Self {
        Self {
            ttl: ttl.into(),
            ..self
        }
    }

    /// How long a key set may continue to be served once refreshes
    /// begin failing
    ///
    /// A held set older than this ceiling is abandoned and verification
    /// fails until a fetch succeeds. Defaults to
    /// [`DEFAULT_STALENESS_CEILING`].
    pub fn with_staleness_ceiling(self, ceiling: impl Into<DurationSecs>) -> Self {
        Self {
            staleness_ceiling: ceiling.into(),
            ..self
        }
    }

    /// Tells time from the provided clock rather than the system clock
    pub fn with_clock(self, clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            ..self
        }
    }

    /// Constructs the authority
    pub fn build(self) -> Authority {
        Authority {
            inner: Arc::new(Inner {
                issuers: ArcSwap::from_pointee(AHashMap::new()),
                source: self.source,
                clock: self.clock,
                ttl: self.ttl,
                staleness_ceiling: self.staleness_ceiling,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use tollgate::{
        error::{ClaimsRejected, JwtVerifyError},
        jwt::CoreClaims,
    };
    use tollgate_clock::TestClock;

    use super::*;
    use crate::{scope, BasicClaimsWithScope};

    const ISSUER: &str = "https://issuer.example.com/";
    const AUDIENCE: &str = "https://api.example.com/items";

    const JWKS: &str = include_str!("../data/jwks.json");
    const JWKS_2024: &str = include_str!("../data/jwks-2024.json");

    /// Signed by `key-2024`; scoped for reads and writes, expires in 2100.
    const TOKEN_WRITE: &str = concat!(
        "eyJhbGciOiJSUzI1NiIsImtpZCI6ImtleS0yMDI0In0.eyJpc3MiOiJodHRwczovL2lzc3Vlci5leG",
        "FtcGxlLmNvbS8iLCJhdWQiOiJodHRwczovL2FwaS5leGFtcGxlLmNvbS9pdGVtcyIsInN1YiI6InVz",
        "ZXItNDUxIiwiaWF0IjoxNzAwMDAwMDAwLCJleHAiOjQxMDI0NDQ4MDAsInNjb3BlIjoicmVhZDppdG",
        "VtcyB3cml0ZTppdGVtcyJ9.jfdiIgEW8kkaT5bWyTZBvNdnxYrn5LPQhYL46_J0FAYQo-JHQt61fIs",
        "z52wn1dKYtxX8bpiBvHbm2N9GikBgz_b6QQ7NLSZHETHA4nR2N5sLibRSRgAWVpV_C8HB5cirEIwYk",
        "uxX5S0qaddIe_Du0jqZ-SD-XwyNN5t8C1VBR1ZkskkedB1Gn5lG74GFB8zBKj87nSoirHr9275dc7a",
        "tVWWWJ8MOqP7NTeN5BxXDBBngotdqVdOIzalsTwS_WjeGVqdlAo5L3N4ukemXh4swxNdItyZtuSXTd",
        "MU6talbXVc-ZQYXxiRA9mRNvJl5rgjsSxzUfsxQrV-3PUdre-tY6Q",
    );

    /// Signed by `key-2024`; scoped for reads only.
    const TOKEN_READ_ONLY: &str = concat!(
        "eyJhbGciOiJSUzI1NiIsImtpZCI6ImtleS0yMDI0In0.eyJpc3MiOiJodHRwczovL2lzc3Vlci5leG",
        "FtcGxlLmNvbS8iLCJhdWQiOiJodHRwczovL2FwaS5leGFtcGxlLmNvbS9pdGVtcyIsInN1YiI6InVz",
        "ZXItNDUxIiwiaWF0IjoxNzAwMDAwMDAwLCJleHAiOjQxMDI0NDQ4MDAsInNjb3BlIjoicmVhZDppdG",
        "VtcyJ9.cTT_N155j6iC8dC2BlVThW9pYbtiECD8AI27Ahl-hCL4F6gKWW6j-0R-MEWAX9L9NTItw7r",
        "6rDAgDwvVCeqxlvRpgQIMIMq1qujdfN33zS3VjGSzbP5XqElSMvc_E5kRJ1hlq2ZVzZq7YbBSNQwAw",
        "6mdA-8GjGF_Md3c3UPCCHnLOIj6Wrv_BAtxsRD6-yaH9HbK9LHz6DYJ-o_NeDdRKQvya6Ub4CV0F-G",
        "wxrfmrRvFk08MS1r8-zqiizDmkt4PlLUlJln6ZneVrYCp9pwZPsMNGeheT-sRLtAPxsF893EsglLV_",
        "9aGzaFyPBbdYTaufHAIYE2u9iLzeI7acz4BSA",
    );

    /// Signed by `key-2024`; expired in 2017.
    const TOKEN_EXPIRED: &str = concat!(
        "eyJhbGciOiJSUzI1NiIsImtpZCI6ImtleS0yMDI0In0.eyJpc3MiOiJodHRwczovL2lzc3Vlci5leG",
        "FtcGxlLmNvbS8iLCJhdWQiOiJodHRwczovL2FwaS5leGFtcGxlLmNvbS9pdGVtcyIsInN1YiI6InVz",
        "ZXItNDUxIiwiaWF0IjoxNzAwMDAwMDAwLCJleHAiOjE1MDAwMDAwMDAsInNjb3BlIjoicmVhZDppdG",
        "VtcyB3cml0ZTppdGVtcyJ9.X90FgHProxONg4kRg8HmBQDsYXpZ9iGLUT710GtOVk_B-QdPuv1qjU8",
        "tdR7oUgMnjcCG4FgJ9Qy15n3HEsgwI6fFwz4OoNql3dUFlnrnDsdIGSlFh592q9C31BXs77pn5HPlc",
        "pnZmPLWRbp9czgcHDcTX8yGvmv7yyXOK8XuQX6DKFhDBULAIGOmiUGijDnNr6heyQXqXVHYDXoH0eF",
        "k9MR1Smi-28Qf_U0VdZgICymc9a4uxa3jrwyh6KDQLhjmwx0PvX52xw8vYUegfozObMm_9hoFdThOP",
        "b552Za6BPO216v_i3fd7Z0cbhFOMwSXY_vOQyb1YSaPSQmER3SSzA",
    );

    /// The payload grants itself `admin:items`, but the signature
    /// covers the read-only payload.
    const TOKEN_TAMPERED: &str = concat!(
        "eyJhbGciOiJSUzI1NiIsImtpZCI6ImtleS0yMDI0In0.eyJpc3MiOiJodHRwczovL2lzc3Vlci5leG",
        "FtcGxlLmNvbS8iLCJhdWQiOiJodHRwczovL2FwaS5leGFtcGxlLmNvbS9pdGVtcyIsInN1YiI6InVz",
        "ZXItNDUxIiwiaWF0IjoxNzAwMDAwMDAwLCJleHAiOjQxMDI0NDQ4MDAsInNjb3BlIjoicmVhZDppdG",
        "VtcyB3cml0ZTppdGVtcyBhZG1pbjppdGVtcyJ9.cTT_N155j6iC8dC2BlVThW9pYbtiECD8AI27Ahl",
        "-hCL4F6gKWW6j-0R-MEWAX9L9NTItw7r6rDAgDwvVCeqxlvRpgQIMIMq1qujdfN33zS3VjGSzbP5Xq",
        "ElSMvc_E5kRJ1hlq2ZVzZq7YbBSNQwAw6mdA-8GjGF_Md3c3UPCCHnLOIj6Wrv_BAtxsRD6-yaH9Hb",
        "K9LHz6DYJ-o_NeDdRKQvya6Ub4CV0F-GwxrfmrRvFk08MS1r8-zqiizDmkt4PlLUlJln6ZneVrYCp9",
        "pwZPsMNGeheT-sRLtAPxsF893EsglLV_9aGzaFyPBbdYTaufHAIYE2u9iLzeI7acz4BSA",
    );

    /// Signed by `key-2025`, the rotated key.
    const TOKEN_ROTATED: &str = concat!(
        "eyJhbGciOiJSUzI1NiIsImtpZCI6ImtleS0yMDI1In0.eyJpc3MiOiJodHRwczovL2lzc3Vlci5leG",
        "FtcGxlLmNvbS8iLCJhdWQiOiJodHRwczovL2FwaS5leGFtcGxlLmNvbS9pdGVtcyIsInN1YiI6InVz",
        "ZXItNDUxIiwiaWF0IjoxNzAwMDAwMDAwLCJleHAiOjQxMDI0NDQ4MDAsInNjb3BlIjoicmVhZDppdG",
        "VtcyB3cml0ZTppdGVtcyJ9.pqhc_toAWu70R1XmfiESFn7k_-z_T-qfVgYVi4SqLTcOCzzEPcLgSBB",
        "VVMJGLYUmYLl8VOOa9ozOUtyhjja2Bhh0JIFm8_iguWlDbXLpWQ8oY6g-k_aGzMvxHH77y6hdsVEbY",
        "1glKtC_zgKOH9mV2CNEnadU-wbhQsSbYVnviz-sqb2VsA8j_tRv4d2nWDnkYURfLvW2jCYH6EFPKW9",
        "z8_YxGjuh6HHZLqzvCVvQQD9d_LouPihEjfqrMBIqFM61mcpYsenA8almOjh5pDQVAH6od6xfcqtxE",
        "oHnHoRu7WvCXG1dCl3f65R9gRj2xceAzyQlaop8SgQR3pPyoJj7Ag",
    );

    /// Signed by `key-1999`, which no key set in these tests contains.
    const TOKEN_UNKNOWN_KID: &str = concat!(
        "eyJhbGciOiJSUzI1NiIsImtpZCI6ImtleS0xOTk5In0.eyJpc3MiOiJodHRwczovL2lzc3Vlci5leG",
        "FtcGxlLmNvbS8iLCJhdWQiOiJodHRwczovL2FwaS5leGFtcGxlLmNvbS9pdGVtcyIsInN1YiI6InVz",
        "ZXItNDUxIiwiaWF0IjoxNzAwMDAwMDAwLCJleHAiOjQxMDI0NDQ4MDAsInNjb3BlIjoicmVhZDppdG",
        "VtcyB3cml0ZTppdGVtcyJ9.h-BjZSU4IZ2WG4ALLQ4viyFNNHjy9msmvMF0LVMhLweOrzvISk97Web",
        "cK_9AbJrP5bOncWrWqZybtxOROn2loUKyKiSD9uuNEls38qJ4PLDpZ7VZgqG9Wy6hdOx3kxiWCq4ox",
        "8idTRKdyLFADZLP-VNicFQ2pumN02ilVTyE4087IZWpJi8cC6deebvYYQfZU2uAuJCFm7lGKvTTmqf",
        "lddp49TN7hWB4tmWRr-MysDnmxkOYLcQdGuhbDXzPwMKfwSy3IEQqBcmxQdi26IkzUexbakDGtygoy",
        "szDRxm18twfS6LuZsJsemToJAK4lRwP9eK1ARkDjiwYraeK35AYSA",
    );

    /// Signed by `key-2024`, but names no `kid`.
    const TOKEN_NO_KID: &str = concat!(
        "eyJhbGciOiJSUzI1NiJ9.eyJpc3MiOiJodHRwczovL2lzc3Vlci5leGFtcGxlLmNvbS8iLCJhdWQiO",
        "iJodHRwczovL2FwaS5leGFtcGxlLmNvbS9pdGVtcyIsInN1YiI6InVzZXItNDUxIiwiaWF0IjoxNzA",
        "wMDAwMDAwLCJleHAiOjQxMDI0NDQ4MDAsInNjb3BlIjoicmVhZDppdGVtcyB3cml0ZTppdGVtcyJ9.",
        "ZfWxAjTKM3hq5EqCqX3_xDEGS5fTLvqXZJ7_jsiR4kVy44kemTSA970XJGt4kDWMHyI3NcGHediLpe",
        "SJIfCcAbT1eNiDGrr01A8NSDT9_kzX-gh8LXuYtVBYWn6RJ47I9mmh67niXaYYaPPXWP2NScTTYo6s",
        "XZzYcWiSekFGvngt8aMirvCFmBLIhZtq9kPFYuHVUTT30AyX7OFDAcGELmXkaFJxgn5tHSvR-jfb7R",
        "vdiL8hA_akN3xy_CnMWyKDFJPSWkXkoaBLcIBPAIMQT5ojYJolkRcyWJ5IiX6GcHeWklWibXZokjpb",
        "6VNMRPayBhRpsP01yLeSYUc-0BUHEg",
    );

    /// Declares `"alg": "none"` and carries no signature.
    const TOKEN_ALG_NONE: &str = concat!(
        "eyJhbGciOiJub25lIn0.eyJpc3MiOiJodHRwczovL2lzc3Vlci5leGFtcGxlLmNvbS8iLCJhdWQiOi",
        "JodHRwczovL2FwaS5leGFtcGxlLmNvbS9pdGVtcyIsInN1YiI6InVzZXItNDUxIiwiaWF0IjoxNzAw",
        "MDAwMDAwLCJleHAiOjQxMDI0NDQ4MDAsInNjb3BlIjoicmVhZDppdGVtcyB3cml0ZTppdGVtcyJ9.",
    );

    #[derive(Clone, Copy)]
    enum Scripted {
        Fresh(&'static str),
        NotModified,
        Unavailable,
    }

    /// A source that replays a script of fetch outcomes, repeating the
    /// final step forever, and counts the fetches made against it
    #[derive(Clone)]
    struct ScriptedSource {
        script: Arc<Mutex<Vec<Scripted>>>,
        fetches: Arc<AtomicUsize>,
        gate: Option<Arc<Semaphore>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script)),
                fetches: Arc::new(AtomicUsize::new(0)),
                gate: None,
            }
        }

        /// Fetches park until the gate grants a permit
        fn gated(script: Vec<Scripted>, gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(script)
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JwksSource for ScriptedSource {
        async fn fetch_jwks(
            &self,
            _issuer: &jwt::IssuerRef,
        ) -> Result<FetchedKeys, JwksFetchError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.fetches.fetch_add(1, Ordering::SeqCst);

            let step = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    script[0]
                }
            };

            match step {
                Scripted::Fresh(json) => {
                    Ok(FetchedKeys::Fresh(serde_json::from_str(json).unwrap()))
                }
                Scripted::NotModified => Ok(FetchedKeys::NotModified),
                Scripted::Unavailable => Err(JwksFetchError::new("key server unavailable")),
            }
        }
    }

    fn issuer() -> &'static jwt::IssuerRef {
        jwt::IssuerRef::from_str(ISSUER)
    }

    fn items_directive() -> Directive {
        Directive::new(ISSUER).with_audience(AUDIENCE)
    }

    #[tokio::test]
    async fn a_fresh_key_set_is_served_without_refetching() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let clock = TestClock::new(UnixTime(1_700_000_000));
        let authority = Authority::builder(source.clone())
            .with_clock(clock.clone())
            .build();

        authority.get_keys(issuer()).await.unwrap();
        clock.advance(DurationSecs(599));
        let jwks = authority.get_keys(issuer()).await.unwrap();

        assert_eq!(jwks.keys().len(), 2);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn the_ttl_boundary_triggers_a_refresh() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let clock = TestClock::new(UnixTime(1_700_000_000));
        let authority = Authority::builder(source.clone())
            .with_clock(clock.clone())
            .build();

        authority.get_keys(issuer()).await.unwrap();
        clock.advance(DurationSecs(600));
        authority.get_keys(issuer()).await.unwrap();

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let gate = Arc::new(Semaphore::new(0));
        let source = ScriptedSource::gated(vec![Scripted::Fresh(JWKS)], Arc::clone(&gate));
        let authority = Authority::new(source.clone());

        let release = async {
            // Let both callers park on the in-flight fetch first
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
            gate.add_permits(2);
        };

        let (first, second, ()) = tokio::join!(
            authority.get_keys(issuer()),
            authority.get_keys(issuer()),
            release,
        );

        assert_eq!(first.unwrap().keys().len(), 2);
        assert_eq!(second.unwrap().keys().len(), 2);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn a_stale_key_set_is_served_when_the_source_is_down() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS), Scripted::Unavailable]);
        let clock = TestClock::new(UnixTime(1_700_000_000));
        let authority = Authority::builder(source.clone())
            .with_clock(clock.clone())
            .build();

        authority.get_keys(issuer()).await.unwrap();
        clock.advance(DurationSecs(601));
        let jwks = authority.get_keys(issuer()).await.unwrap();

        assert_eq!(jwks.keys().len(), 2);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn a_stale_key_set_is_abandoned_at_the_staleness_ceiling() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS), Scripted::Unavailable]);
        let clock = TestClock::new(UnixTime(1_700_000_000));
        let authority = Authority::builder(source.clone())
            .with_clock(clock.clone())
            .build();

        authority.get_keys(issuer()).await.unwrap();

        clock.advance(DurationSecs(86_399));
        assert!(authority.get_keys(issuer()).await.is_ok());

        clock.advance(DurationSecs(1));
        let err = authority.get_keys(issuer()).await.unwrap_err();
        assert!(matches!(err, AuthorityError::KeyFetchUnavailable(_)));
    }

    #[tokio::test]
    async fn an_unmodified_key_set_renews_its_freshness() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS), Scripted::NotModified]);
        let clock = TestClock::new(UnixTime(1_700_000_000));
        let authority = Authority::builder(source.clone())
            .with_clock(clock.clone())
            .build();

        authority.get_keys(issuer()).await.unwrap();
        clock.advance(DurationSecs(601));
        authority.get_keys(issuer()).await.unwrap();
        clock.advance(DurationSecs(599));
        let jwks = authority.get_keys(issuer()).await.unwrap();

        assert_eq!(jwks.keys().len(), 2);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn an_unmodified_report_with_nothing_held_is_an_error() {
        let source = ScriptedSource::new(vec![Scripted::NotModified]);
        let authority = Authority::new(source);

        let err = authority.get_keys(issuer()).await.unwrap_err();
        assert!(matches!(err, AuthorityError::KeyFetchUnavailable(_)));
    }

    #[tokio::test]
    async fn issuer_key_sets_are_cached_independently() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS_2024), Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source.clone());
        let other = jwt::IssuerRef::from_str("https://other-issuer.example.com/");

        assert_eq!(authority.get_keys(issuer()).await.unwrap().keys().len(), 1);
        assert_eq!(authority.get_keys(other).await.unwrap().keys().len(), 2);
        assert_eq!(authority.get_keys(issuer()).await.unwrap().keys().len(), 1);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn refresh_replaces_the_held_key_set() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS_2024), Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source.clone());

        assert_eq!(authority.get_keys(issuer()).await.unwrap().keys().len(), 1);
        authority.refresh(issuer()).await.unwrap();
        assert_eq!(authority.get_keys(issuer()).await.unwrap().keys().len(), 2);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn a_valid_token_yields_its_claims() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source);
        let directive = items_directive().require_scopes(scope!["write:items"]);

        let claims: BasicClaimsWithScope = authority
            .verify_token(JwtRef::from_str(TOKEN_WRITE), &directive)
            .await
            .unwrap();

        assert_eq!(claims.basic.sub().unwrap().as_str(), "user-451");
        assert!(claims
            .scope
            .contains_all(&scope!["read:items", "write:items"]));
    }

    #[tokio::test]
    async fn a_token_without_the_demanded_scope_is_denied() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source);
        let directive = items_directive().require_scopes(scope!["write:items"]);

        let err = authority
            .verify_token::<BasicClaimsWithScope>(JwtRef::from_str(TOKEN_READ_ONLY), &directive)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthorityError::PolicyDenial(_)));
    }

    #[tokio::test]
    async fn a_tampered_token_is_rejected() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source);

        let err = authority
            .verify_token::<BasicClaimsWithScope>(
                JwtRef::from_str(TOKEN_TAMPERED),
                &items_directive(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AuthorityError::JwtVerifyError(e) if e.is_signature_invalid()
        ));
    }

    #[tokio::test]
    async fn an_expired_token_is_rejected() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source);

        let err = authority
            .verify_token::<BasicClaimsWithScope>(
                JwtRef::from_str(TOKEN_EXPIRED),
                &items_directive(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AuthorityError::JwtVerifyError(JwtVerifyError::ClaimsRejected(
                ClaimsRejected::TokenExpired
            ))
        ));
    }

    #[tokio::test]
    async fn an_unsigned_token_is_rejected_outright() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source.clone());

        let err = authority
            .verify_token::<BasicClaimsWithScope>(
                JwtRef::from_str(TOKEN_ALG_NONE),
                &items_directive(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AuthorityError::JwtVerifyError(JwtVerifyError::UnsupportedAlgorithm(_))
        ));
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn a_token_naming_no_key_id_is_rejected() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source.clone());

        let err = authority
            .verify_token::<BasicClaimsWithScope>(
                JwtRef::from_str(TOKEN_NO_KID),
                &items_directive(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AuthorityError::UnknownSigningKey));
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn an_unknown_key_forces_one_refresh() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS_2024), Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source.clone());

        let claims: BasicClaimsWithScope = authority
            .verify_token(JwtRef::from_str(TOKEN_ROTATED), &items_directive())
            .await
            .unwrap();

        assert_eq!(claims.basic.sub().unwrap().as_str(), "user-451");
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn a_key_the_issuer_never_published_is_rejected() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS)]);
        let authority = Authority::new(source.clone());

        let err = authority
            .verify_token::<BasicClaimsWithScope>(
                JwtRef::from_str(TOKEN_UNKNOWN_KID),
                &items_directive(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AuthorityError::UnknownSigningKey));
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn concurrent_unknown_key_misses_share_one_forced_refresh() {
        let gate = Arc::new(Semaphore::new(0));
        let source = ScriptedSource::gated(vec![Scripted::Fresh(JWKS)], Arc::clone(&gate));
        let authority = Authority::new(source.clone());
        authority.set_jwks(issuer(), serde_json::from_str(JWKS_2024).unwrap());

        let directive = items_directive();
        let token = JwtRef::from_str(TOKEN_ROTATED);

        let release = async {
            // Let both callers park on the forced refresh first
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
            gate.add_permits(2);
        };

        let (first, second, ()) = tokio::join!(
            authority.verify_token::<BasicClaimsWithScope>(token, &directive),
            authority.verify_token::<BasicClaimsWithScope>(token, &directive),
            release,
        );

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn verification_relies_on_a_stale_key_set_when_refresh_fails() {
        let source = ScriptedSource::new(vec![Scripted::Fresh(JWKS), Scripted::Unavailable]);
        let clock = TestClock::new(UnixTime(1_700_000_000));
        let authority = Authority::builder(source.clone())
            .with_clock(clock.clone())
            .build();
        let directive = items_directive().require_scopes(scope!["write:items"]);

        let _: BasicClaimsWithScope = authority
            .verify_token(JwtRef::from_str(TOKEN_WRITE), &directive)
            .await
            .unwrap();

        clock.advance(DurationSecs(601));

        let claims: BasicClaimsWithScope = authority
            .verify_token(JwtRef::from_str(TOKEN_WRITE), &directive)
            .await
            .unwrap();

        assert!(claims.scope.contains_all(&scope!["write:items"]));
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn an_installed_key_set_serves_without_any_fetch() {
        let source = ScriptedSource::new(vec![Scripted::Unavailable]);
        let authority = Authority::new(source.clone());
        authority.set_jwks(issuer(), serde_json::from_str(JWKS).unwrap());

        let claims: BasicClaimsWithScope = authority
            .verify_token(JwtRef::from_str(TOKEN_WRITE), &items_directive())
            .await
            .unwrap();

        assert_eq!(claims.basic.sub().unwrap().as_str(), "user-451");
        assert_eq!(source.fetches(), 0);
    }
}
