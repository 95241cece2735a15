use std::{iter, slice, vec};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::Scope;

/// Indicates the requester held insufficient scope to be granted access
/// to a controlled resource
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("insufficient scope")]
pub struct InsufficientScope;

/// An access policy based on OAuth2 scopes
///
/// This access policy takes the form of alternatives around required scopes.
/// This policy will allow access if any of the alternatives would allow
/// access. If the policy contains no alternatives, the default effect is to
/// deny access.
///
/// # Examples
///
/// ## Deny all requests
/// ```
/// use tollgate_oauth2::{Scope, ScopePolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = ScopePolicy::deny_all();
///
/// let request = Scope::single("admin:items".parse()?);
/// assert!(policy.evaluate(&request).is_err());
/// # Ok(())
/// # }
/// ```
///
/// ## Allow any request
/// ```
/// use tollgate_oauth2::{Scope, ScopePolicy};
///
/// let policy = ScopePolicy::allow_any();
///
/// let request = Scope::empty();
/// assert!(policy.evaluate(&request).is_ok());
/// ```
///
/// ## Allow requests with a single scope
/// ```
/// use tollgate_oauth2::{Scope, ScopePolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = ScopePolicy::allow_one(
///     Scope::single("admin:items".parse()?)
/// );
///
/// let request = Scope::from_scope_tokens(vec![
///     "admin:items".parse()?,
///     "read:items".parse()?,
/// ]);
/// assert!(policy.evaluate(&request).is_ok());
///
/// let reader_request = Scope::from_scope_tokens(vec![
///     "read:items".parse()?,
/// ]);
/// assert!(policy.evaluate(&reader_request).is_err());
/// # Ok(())
/// # }
/// ```
///
/// ## Allow requests with multiple potential sets of scopes
/// ```
/// use tollgate_oauth2::{Scope, ScopePolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut policy = ScopePolicy::deny_all();
/// policy.allow(Scope::single("admin:items".parse()?));
/// policy.allow(Scope::from_scope_tokens(vec![
///     "audit:items".parse()?,
///     "read:items".parse()?,
/// ]));
///
/// let admin_request = Scope::from_scope_tokens(vec![
///     "admin:items".parse()?,
/// ]);
/// assert!(policy.evaluate(&admin_request).is_ok());
///
/// let reader_request = Scope::from_scope_tokens(vec![
///     "read:items".parse()?,
/// ]);
/// assert!(policy.evaluate(&reader_request).is_err());
///
/// let audit_request = Scope::from_scope_tokens(vec![
///     "audit:items".parse()?,
///     "read:items".parse()?,
/// ]);
/// assert!(policy.evaluate(&audit_request).is_ok());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct ScopePolicy {
    inner: ScopePolicyInner,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ScopePolicyInner {
    DenyAll,
    AllowAny,
    AllowOne(Scope),
    AllowMany(Vec<Scope>),
}

impl Default for ScopePolicy {
    #[inline]
    fn default() -> Self {
        Self::deny_all()
    }
}

impl ScopePolicy {
    /// Constructs a policy that has no permissible alternatives
    ///
    /// By default, this policy will deny all requests
    #[inline]
    pub const fn deny_all() -> Self {
        Self {
            inner: ScopePolicyInner::DenyAll,
        }
    }

    /// Constructs a policy that does not require any scopes (allow)
    #[inline]
    pub const fn allow_any() -> Self {
        Self {
            inner: ScopePolicyInner::AllowAny,
        }
    }

    /// Constructs a policy that requires this set of scopes
    #[inline]
    pub const fn allow_one(scope: Scope) -> Self {
        Self {
            inner: ScopePolicyInner::AllowOne(scope),
        }
    }

    /// Evaluates whether the scope held satisfies any of this policy's
    /// alternatives
    ///
    /// # Errors
    ///
    /// Returns [`InsufficientScope`] if no alternative is satisfied by
    /// the held scope.
    pub fn evaluate(&self, held: &Scope) -> Result<(), InsufficientScope> {
        let allowed = self.into_iter().any(|required| held.contains_all(required));

        if allowed {
            Ok(())
        } else {
            Err(InsufficientScope)
        }
    }

    /// Add an alternate allowable scope
    #[inline]
    pub fn or_allow(self, scope: Scope) -> Self {
        if scope.is_empty() {
            let mut this = self;
            this.inner = ScopePolicyInner::AllowAny;
            this
        } else {
            match self.inner {
                ScopePolicyInner::AllowAny => Self::allow_any(),
                ScopePolicyInner::DenyAll => Self::allow_one(scope),
                ScopePolicyInner::AllowOne(existing) => Self {
                    inner: ScopePolicyInner::AllowMany(vec![existing, scope]),
                },
                ScopePolicyInner::AllowMany(mut scopes) => {
                    scopes.push(scope);
                    Self {
                        inner: ScopePolicyInner::AllowMany(scopes),
                    }
                }
            }
        }
    }

    /// Add an alternate allowable scope
    pub fn allow(&mut self, scope: Scope) {
        let this = std::mem::take(self);
        *self = this.or_allow(scope);
    }

    /// Constructs a policy that requires this set of scopes from a string
    ///
    /// # Panics
    ///
    /// This function will panic if the provided string is not a valid [`Scope`].
    pub fn allow_one_from_static(scope: &'static str) -> Self {
        match scope.parse::<Scope>() {
            Ok(scope) => Self::allow_one(scope),
            Err(err) => panic!("{}: scope = {}", err, scope),
        }
    }

    /// Add an alternate allowable scope from a string
    ///
    /// # Panics
    ///
    /// This function will panic if the provided string is not a valid [`Scope`].
    pub fn or_allow_from_static(self, scope: &'static str) -> Self {
        match scope.parse::<Scope>() {
            Ok(scope) => self.or_allow(scope),
            Err(err) => panic!("{}: scope = {}", err, scope),
        }
    }

    /// Add an alternate allowable scope from a string
    ///
    /// # Panics
    ///
    /// This function will panic if the provided string is not a valid [`Scope`].
    pub fn allow_from_static(&mut self, scope: &'static str) {
        match scope.parse::<Scope>() {
            Ok(scope) => self.allow(scope),
            Err(err) => panic!("{}: scope = {}", err, scope),
        }
    }

    const fn is_allow_all(&self) -> bool {
        matches!(self.inner, ScopePolicyInner::AllowAny)
    }
}

impl IntoIterator for ScopePolicy {
    type Item = Scope;
    type IntoIter = IntoIter;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        let inner = match self.inner {
            ScopePolicyInner::DenyAll => IntoIterInner::Empty,
            ScopePolicyInner::AllowAny => IntoIterInner::One(iter::once(Scope::empty())),
            ScopePolicyInner::AllowOne(scope) => IntoIterInner::One(iter::once(scope)),
            ScopePolicyInner::AllowMany(scopes) => IntoIterInner::Many(scopes.into_iter()),
        };
        IntoIter { inner }
    }
}

/// An iterator over the scopes in a [`ScopePolicy`]
#[derive(Debug)]
pub struct IntoIter {
    inner: IntoIterInner,
}

#[derive(Debug)]
enum IntoIterInner {
    Empty,
    One(iter::Once<Scope>),
    Many(vec::IntoIter<Scope>),
}

impl Iterator for IntoIter {
    type Item = Scope;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IntoIterInner::Empty => None,
            IntoIterInner::One(iter) => iter.next(),
            IntoIterInner::Many(iter) => iter.next(),
        }
    }
}

/// An iterator over a set of borrowed scopes
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    inner: IterInner<'a>,
}

#[derive(Clone, Debug)]
enum IterInner<'a> {
    Empty,
    One(iter::Once<&'a Scope>),
    Many(slice::Iter<'a, Scope>),
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Scope;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterInner::Empty => None,
            IterInner::One(iter) => iter.next(),
            IterInner::Many(iter) => iter.next(),
        }
    }
}

impl<'a> IntoIterator for &'a ScopePolicy {
    type Item = &'a Scope;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        static EMPTY_SCOPE: Lazy<Scope> = Lazy::new(Scope::empty);
        Iter {
            inner: match &self.inner {
                ScopePolicyInner::DenyAll => IterInner::Empty,
                ScopePolicyInner::AllowAny => IterInner::One(iter::once(&*EMPTY_SCOPE)),
                ScopePolicyInner::AllowOne(scope) => IterInner::One(iter::once(scope)),
                ScopePolicyInner::AllowMany(scopes) => IterInner::Many(scopes.iter()),
            },
        }
    }
}

impl Extend<Scope> for ScopePolicy {
    #[inline]
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = Scope>,
    {
        for scope in iter {
            self.allow(scope);

            if self.is_allow_all() {
                break;
            }
        }
    }
}

impl iter::FromIterator<Scope> for ScopePolicy {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Scope>,
    {
        let mut set = Self::deny_all();
        set.extend(iter);
        set
    }
}

impl From<Scope> for ScopePolicy {
    #[inline]
    fn from(scope: Scope) -> Self {
        Self::allow_one(scope)
    }
}

/// Construct a policy from a list of scope alternatives.
///
/// For more information about how the alternatives are evaluated, see [`ScopePolicy`].
///
/// ```
/// use tollgate_oauth2::{scope, policy};
///
/// let policy = policy![
///     scope!["admin:items"],
///     scope!["audit:items", "read:items"],
/// ];
/// ```
///
/// This is equivalent to the following:
///
/// ```
/// use tollgate_oauth2::{ScopePolicy, scope};
///
/// let policy = ScopePolicy::deny_all()
///     .or_allow(scope!["admin:items"])
///     .or_allow(scope!["audit:items", "read:items"]);
/// ```
#[macro_export]
macro_rules! policy {
    ($($scope:expr),* $(,)?) => {
        $crate::ScopePolicy::deny_all()
        $(
            .or_allow($scope)
        )*
    };
}

#[cfg(test)]
mod tests {
    use crate::{scope, Scope, ScopePolicy};

    #[test]
    fn deny_all_rejects_even_the_empty_scope() {
        let policy = ScopePolicy::deny_all();
        assert!(policy.evaluate(&Scope::empty()).is_err());
        assert!(policy.evaluate(&scope!["admin:items"]).is_err());
    }

    #[test]
    fn allow_any_accepts_the_empty_scope() {
        let policy = ScopePolicy::allow_any();
        assert!(policy.evaluate(&Scope::empty()).is_ok());
    }

    #[test]
    fn allow_one_requires_every_token_in_the_alternative() {
        let policy = ScopePolicy::allow_one(scope!["read:items", "write:items"]);

        let full = scope!["read:items", "write:items", "admin:items"];
        assert!(policy.evaluate(&full).is_ok());

        let partial = scope!["read:items"];
        assert!(policy.evaluate(&partial).is_err());
    }

    #[test]
    fn alternatives_are_evaluated_independently() {
        let policy = policy![scope!["admin:items"], scope!["audit:items", "read:items"]];

        assert!(policy.evaluate(&scope!["admin:items"]).is_ok());
        assert!(policy.evaluate(&scope!["audit:items", "read:items"]).is_ok());
        assert!(policy.evaluate(&scope!["audit:items"]).is_err());
    }

    #[test]
    fn an_empty_alternative_allows_everything() {
        let policy = ScopePolicy::deny_all().or_allow(Scope::empty());
        assert!(policy.evaluate(&Scope::empty()).is_ok());
        assert_eq!(policy, ScopePolicy::allow_any());
    }

    #[test]
    fn collecting_an_empty_scope_short_circuits_to_allow_any() {
        let policy: ScopePolicy = vec![scope!["admin:items"], Scope::empty(), scope!["read:items"]]
            .into_iter()
            .collect();
        assert_eq!(policy, ScopePolicy::allow_any());
    }

    #[test]
    fn owned_iteration_yields_each_alternative() {
        let policy = policy![scope!["admin:items"], scope!["read:items"]];
        let alternatives: Vec<Scope> = policy.into_iter().collect();
        assert_eq!(alternatives.len(), 2);
    }
}
