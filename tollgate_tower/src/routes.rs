//! Route policies and the table that resolves requests against them
//!
//! A [`PolicySet`] is built once, up front, from a list of route rules.
//! Each rule binds an HTTP method and a path pattern to a
//! [`Requirement`]: either the route is public, or it is protected by a
//! [`Directive`] that presented tokens must satisfy. Patterns are matched
//! segment-wise, and a `:name` segment matches exactly one path segment.
//!
//! Rules that could both match the same request are rejected when the set
//! is built, so resolution never depends on registration order.

use http::Method;
use thiserror::Error;
use tollgate_oauth2::Directive;

/// What a route demands of the requests it receives
#[derive(Clone, Debug)]
pub enum Requirement {
    /// Requests are forwarded without inspecting any credential
    Public,

    /// Requests must present a token satisfying the directive
    Protected(Directive),
}

/// A single route rule: a method and path pattern bound to a requirement
#[derive(Clone, Debug)]
pub struct RoutePolicy {
    method: Method,
    pattern: Pattern,
    requirement: Requirement,
}

impl RoutePolicy {
    /// The HTTP method this rule applies to
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path pattern as registered
    pub fn pattern(&self) -> &str {
        &self.pattern.raw
    }

    /// The requirement enforced on matching requests
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }
}

/// A parsed path pattern
///
/// Patterns are split on `/`. A segment beginning with `:` is a
/// placeholder matching any single path segment; its name is not
/// interpreted. All other segments match their text exactly.
#[derive(Clone, Debug)]
struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug)]
enum Segment {
    Literal(String),
    Placeholder,
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        assert!(
            pattern.starts_with('/'),
            "route pattern must begin with `/`, got `{pattern}`"
        );

        let segments = pattern[1..]
            .split('/')
            .map(|segment| {
                if segment.starts_with(':') {
                    Segment::Placeholder
                } else {
                    Segment::Literal(segment.to_owned())
                }
            })
            .collect();

        Self {
            raw: pattern.to_owned(),
            segments,
        }
    }

    fn matches(&self, path: &str) -> bool {
        let Some(path) = path.strip_prefix('/') else {
            return false;
        };

        let mut segments = self.segments.iter();
        let mut parts = path.split('/');
        loop {
            match (segments.next(), parts.next()) {
                (Some(Segment::Literal(expected)), Some(part)) if expected != part => {
                    return false;
                }
                (Some(_), Some(_)) => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    /// Whether some path could match both patterns
    ///
    /// Patterns of different lengths are disjoint. Patterns of the same
    /// length overlap unless some position holds two different literals,
    /// since a placeholder is compatible with anything.
    fn overlaps(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    _ => true,
                })
    }
}

/// Constructs a [`PolicySet`] from route rules
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct PolicySetBuilder {
    rules: Vec<RoutePolicy>,
}

impl PolicySetBuilder {
    /// An empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule forwarding matching requests without authorization
    ///
    /// # Panics
    ///
    /// Panics if the pattern does not begin with `/`.
    pub fn public(self, method: Method, pattern: &str) -> Self {
        self.push(method, pattern, Requirement::Public)
    }

    /// Adds a rule demanding a token satisfying `directive`
    ///
    /// # Panics
    ///
    /// Panics if the pattern does not begin with `/`.
    pub fn protected(self, method: Method, pattern: &str, directive: Directive) -> Self {
        self.push(method, pattern, Requirement::Protected(directive))
    }

    fn push(mut self, method: Method, pattern: &str, requirement: Requirement) -> Self {
        self.rules.push(RoutePolicy {
            method,
            pattern: Pattern::parse(pattern),
            requirement,
        });
        self
    }

    /// Validates the rules and produces the resolvable set
    ///
    /// # Errors
    ///
    /// Returns a [`PolicyConflict`] if two rules on the same method could
    /// both match some request path.
    pub fn build(self) -> Result<PolicySet, PolicyConflict> {
        for (idx, rule) in self.rules.iter().enumerate() {
            for other in &self.rules[idx + 1..] {
                if rule.method == other.method && rule.pattern.overlaps(&other.pattern) {
                    return Err(PolicyConflict {
                        method: rule.method.clone(),
                        first: rule.pattern.raw.clone(),
                        second: other.pattern.raw.clone(),
                    });
                }
            }
        }

        Ok(PolicySet { rules: self.rules })
    }
}

/// An immutable table of route rules with no overlapping pair
///
/// # Example
///
/// ```
/// use http::Method;
/// use tollgate_oauth2::Directive;
/// use tollgate_tower::PolicySet;
///
/// let directive = Directive::new("https://issuer.example.com/");
///
/// let policies = PolicySet::builder()
///     .public(Method::GET, "/items")
///     .protected(Method::POST, "/items", directive)
///     .build()?;
///
/// assert!(policies.resolve(&Method::GET, "/items").is_some());
/// assert!(policies.resolve(&Method::DELETE, "/items").is_none());
/// # Ok::<_, tollgate_tower::PolicyConflict>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct PolicySet {
    rules: Vec<RoutePolicy>,
}

impl PolicySet {
    /// An empty builder
    #[must_use]
    pub fn builder() -> PolicySetBuilder {
        PolicySetBuilder::new()
    }

    /// The rule governing the given method and path, if any
    ///
    /// At most one rule can match, so the first match is the only match.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<&RoutePolicy> {
        self.rules
            .iter()
            .find(|rule| rule.method == *method && rule.pattern.matches(path))
    }

    /// The number of rules in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Two route rules on the same method could match the same request
///
/// ```
/// use http::Method;
/// use tollgate_oauth2::Directive;
/// use tollgate_tower::PolicySet;
///
/// let directive = Directive::new("https://issuer.example.com/");
///
/// let err = PolicySet::builder()
///     .protected(Method::GET, "/items/:id", directive)
///     .public(Method::GET, "/items/latest")
///     .build()
///     .unwrap_err();
///
/// assert_eq!(err.patterns(), ("/items/:id", "/items/latest"));
/// ```
#[derive(Debug, Error)]
#[error("route policies overlap for {method} requests: `{first}` and `{second}`")]
pub struct PolicyConflict {
    method: Method,
    first: String,
    second: String,
}

impl PolicyConflict {
    /// The method both rules apply to
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The two overlapping patterns, in registration order
    pub fn patterns(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive() -> Directive {
        Directive::new("https://issuer.example.com/")
    }

    #[test]
    fn disjoint_literal_rules_coexist() {
        let policies = PolicySet::builder()
            .public(Method::GET, "/items")
            .protected(Method::GET, "/orders", directive())
            .build()
            .unwrap();

        assert_eq!(policies.len(), 2);

        let rule = policies.resolve(&Method::GET, "/orders").unwrap();
        assert_eq!(rule.pattern(), "/orders");
        assert!(matches!(rule.requirement(), Requirement::Protected(_)));
    }

    #[test]
    fn a_placeholder_matches_exactly_one_segment() {
        let policies = PolicySet::builder()
            .public(Method::GET, "/items/:id")
            .build()
            .unwrap();

        assert!(policies.resolve(&Method::GET, "/items/42").is_some());
        assert!(policies.resolve(&Method::GET, "/items").is_none());
        assert!(policies.resolve(&Method::GET, "/items/42/reviews").is_none());
    }

    #[test]
    fn resolution_is_method_sensitive() {
        let policies = PolicySet::builder()
            .public(Method::GET, "/items")
            .protected(Method::POST, "/items", directive())
            .build()
            .unwrap();

        let get = policies.resolve(&Method::GET, "/items").unwrap();
        assert!(matches!(get.requirement(), Requirement::Public));

        let post = policies.resolve(&Method::POST, "/items").unwrap();
        assert!(matches!(post.requirement(), Requirement::Protected(_)));

        assert!(policies.resolve(&Method::DELETE, "/items").is_none());
    }

    #[test]
    fn an_unmatched_path_resolves_to_none() {
        let policies = PolicySet::builder()
            .public(Method::GET, "/items")
            .build()
            .unwrap();

        assert!(policies.resolve(&Method::GET, "/health").is_none());
    }

    #[test]
    fn a_placeholder_and_a_literal_in_the_same_position_conflict() {
        let err = PolicySet::builder()
            .protected(Method::POST, "/items/:id", directive())
            .public(Method::POST, "/items/abc")
            .build()
            .unwrap_err();

        assert_eq!(err.method(), &Method::POST);
        assert_eq!(err.patterns(), ("/items/:id", "/items/abc"));
    }

    #[test]
    fn identical_patterns_conflict() {
        let err = PolicySet::builder()
            .public(Method::GET, "/items")
            .protected(Method::GET, "/items", directive())
            .build()
            .unwrap_err();

        assert_eq!(err.patterns(), ("/items", "/items"));
    }

    #[test]
    fn placeholders_in_different_positions_still_conflict() {
        let err = PolicySet::builder()
            .public(Method::GET, "/a/:x/c")
            .public(Method::GET, "/:y/b/c")
            .build()
            .unwrap_err();

        assert_eq!(err.patterns(), ("/a/:x/c", "/:y/b/c"));
    }

    #[test]
    fn the_same_pattern_on_different_methods_coexists() {
        let policies = PolicySet::builder()
            .public(Method::GET, "/items")
            .protected(Method::POST, "/items", directive())
            .protected(Method::DELETE, "/items", directive())
            .build()
            .unwrap();

        assert_eq!(policies.len(), 3);
    }

    #[test]
    fn patterns_with_different_segment_counts_coexist() {
        let policies = PolicySet::builder()
            .public(Method::GET, "/items")
            .public(Method::GET, "/items/:id")
            .public(Method::GET, "/items/:id/reviews")
            .build()
            .unwrap();

        assert_eq!(
            policies.resolve(&Method::GET, "/items").unwrap().pattern(),
            "/items"
        );
        assert_eq!(
            policies
                .resolve(&Method::GET, "/items/42")
                .unwrap()
                .pattern(),
            "/items/:id"
        );
        assert_eq!(
            policies
                .resolve(&Method::GET, "/items/42/reviews")
                .unwrap()
                .pattern(),
            "/items/:id/reviews"
        );
    }

    #[test]
    fn a_trailing_slash_is_a_distinct_route() {
        let policies = PolicySet::builder()
            .public(Method::GET, "/items")
            .protected(Method::GET, "/items/", directive())
            .build()
            .unwrap();

        let bare = policies.resolve(&Method::GET, "/items").unwrap();
        assert!(matches!(bare.requirement(), Requirement::Public));

        let slashed = policies.resolve(&Method::GET, "/items/").unwrap();
        assert!(matches!(slashed.requirement(), Requirement::Protected(_)));
    }

    #[test]
    fn the_root_path_is_matchable() {
        let policies = PolicySet::builder()
            .public(Method::GET, "/")
            .build()
            .unwrap();

        assert!(policies.resolve(&Method::GET, "/").is_some());
        assert!(policies.resolve(&Method::GET, "/items").is_none());
    }

    #[test]
    #[should_panic(expected = "route pattern must begin with `/`")]
    fn a_pattern_without_a_leading_slash_is_refused() {
        let _ = PolicySet::builder().public(Method::GET, "items");
    }
}
