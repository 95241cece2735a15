use std::time::Duration;

use once_cell::sync::OnceCell;
use tollgate::{jwa, jwt};

use crate::{Scope, ScopePolicy};

/// The expectations a protected resource places on presented tokens
///
/// A directive names the trusted issuer, the audiences for which a token
/// must have been minted, the approved signing algorithms, the clock skew
/// tolerated when checking token lifetimes, and the scope policy that the
/// token's granted scopes must satisfy.
///
/// By default only `RS256` signatures are approved, no leeway is granted,
/// and any token that verifies is allowed regardless of its scopes.
///
/// ```
/// use tollgate::jwt;
/// use tollgate_oauth2::{scope, Directive, ScopePolicy};
///
/// let directive = Directive::new(jwt::Issuer::from_static("https://issuer.example.com/"))
///     .with_audience(jwt::Audience::from_static("https://api.example.com/items"))
///     .with_leeway_secs(30)
///     .with_policy(ScopePolicy::allow_one(scope!["write:items"]));
///
/// assert_eq!(directive.issuer().as_str(), "https://issuer.example.com/");
/// ```
#[derive(Clone, Debug)]
#[must_use]
pub struct Directive {
    issuer: jwt::Issuer,
    audiences: Vec<jwt::Audience>,
    algorithms: Vec<jwa::Algorithm>,
    leeway: Duration,
    policy: ScopePolicy,
    validator: OnceCell<jwt::CoreValidator>,
}

impl Directive {
    /// Constructs a directive trusting tokens minted by the given issuer
    pub fn new(issuer: impl Into<jwt::Issuer>) -> Self {
        Self {
            issuer: issuer.into(),
            audiences: Vec::new(),
            algorithms: vec![jwa::Algorithm::RS256],
            leeway: Duration::ZERO,
            policy: ScopePolicy::allow_any(),
            validator: OnceCell::new(),
        }
    }

    /// Requires tokens to have been minted for the given audience
    ///
    /// Multiple allowed audiences may be added; a token must name at least
    /// one of them. If no audience is added, the `aud` claim goes
    /// unchecked.
    pub fn with_audience(mut self, audience: impl Into<jwt::Audience>) -> Self {
        self.audiences.push(audience.into());
        Self {
            validator: OnceCell::new(),
            ..self
        }
    }

    /// Adds multiple allowed audiences
    pub fn with_audiences<I>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = jwt::Audience>,
    {
        self.audiences.extend(audiences);
        Self {
            validator: OnceCell::new(),
            ..self
        }
    }

    /// Replaces the set of approved signing algorithms
    ///
    /// Unless overridden, only `RS256` signatures are approved.
    pub fn with_algorithms<I>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = jwa::Algorithm>,
    {
        self.algorithms = algorithms.into_iter().collect();
        Self {
            validator: OnceCell::new(),
            ..self
        }
    }

    /// Tolerates a grace period on either side of the token's lifetime
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        Self {
            validator: OnceCell::new(),
            ..self
        }
    }

    /// Tolerates a grace period (in seconds) on either side of the
    /// token's lifetime
    pub fn with_leeway_secs(self, leeway: u64) -> Self {
        self.with_leeway(Duration::from_secs(leeway))
    }

    /// Applies a scope policy to verified tokens
    pub fn with_policy(mut self, policy: ScopePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Requires the granted scope to contain every token in `scope`
    ///
    /// An empty scope imposes no requirement beyond successful
    /// verification.
    pub fn require_scopes(self, scope: Scope) -> Self {
        self.with_policy(ScopePolicy::deny_all().or_allow(scope))
    }

    /// Demands successful verification only, regardless of granted scopes
    ///
    /// This is a new directive's default; it is chiefly useful to clear the
    /// scope requirement from a cloned directive.
    pub fn authenticated_only(self) -> Self {
        self.with_policy(ScopePolicy::allow_any())
    }

    /// The issuer trusted by this directive
    pub fn issuer(&self) -> &jwt::IssuerRef {
        &self.issuer
    }

    /// The scope policy applied after token verification
    pub fn policy(&self) -> &ScopePolicy {
        &self.policy
    }

    pub(crate) fn validator(&self) -> &jwt::CoreValidator {
        self.validator.get_or_init(|| {
            jwt::CoreValidator::default()
                .require_issuer(self.issuer.clone())
                .extend_allowed_audiences(self.audiences.iter().cloned())
                .extend_approved_algorithms(self.algorithms.iter().copied())
                .with_leeway(self.leeway)
                .check_not_before()
        })
    }
}
