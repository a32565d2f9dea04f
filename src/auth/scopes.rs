//! Permission-scope evaluation.
//!
//! A scope is a string of the form `"<resource>:<action>"`. Two wildcard
//! forms exist: the universal `"*"` and the module wildcard
//! `"<resource>:*"`. Comparison is case-sensitive and literal; no
//! relationship between distinct resource names is ever inferred.

use std::collections::HashSet;

/// The universal wildcard scope.
pub const UNIVERSAL_SCOPE: &str = "*";

/// Display names for the known scope catalog. Scopes absent from this
/// table fall back to a derived rendering.
const SCOPE_LABELS: &[(&str, &str)] = &[
    ("*", "Full access"),
    ("customers:read", "View customers"),
    ("customers:write", "Manage customers"),
    ("invoices:read", "View invoices"),
    ("invoices:write", "Manage invoices"),
    ("payroll:read", "View payroll"),
    ("payroll:write", "Manage payroll"),
    ("purchasing:read", "View purchasing"),
    ("purchasing:write", "Manage purchasing"),
    ("reports:read", "View reports"),
    ("users:read", "View users"),
    ("users:manage_roles", "Manage user roles"),
    ("settings:write", "Manage settings"),
];

/// The set of scopes granted to the signed-in principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    granted: HashSet<String>,
}

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only the universal wildcard.
    pub fn universal() -> Self {
        std::iter::once(UNIVERSAL_SCOPE.to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.granted.len()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.granted.contains(scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.granted.iter().map(String::as_str)
    }

    /// Whether the granted set satisfies `required`.
    ///
    /// True if the set holds the universal wildcard, the required scope
    /// verbatim, or the module wildcard for the required scope's resource.
    pub fn has_scope(&self, required: &str) -> bool {
        if self.granted.contains(UNIVERSAL_SCOPE) {
            return true;
        }
        if self.granted.contains(required) {
            return true;
        }
        if let Some((resource, _action)) = required.split_once(':') {
            if self.granted.contains(&format!("{resource}:*")) {
                return true;
            }
        }
        false
    }

    /// Whether at least one of `required` is satisfied. Order-independent
    /// and side-effect free; an empty list is never satisfied.
    pub fn has_any_scope<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        required.into_iter().any(|scope| self.has_scope(scope))
    }
}

impl FromIterator<String> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            granted: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(str::to_string).collect()
    }
}

/// Human-readable display name for a scope.
///
/// Scopes outside the catalog render as `"<resource>: <action>"` with
/// underscores replaced by spaces.
pub fn scope_label(scope: &str) -> String {
    if let Some((_, label)) = SCOPE_LABELS.iter().find(|(s, _)| *s == scope) {
        return (*label).to_string();
    }
    match scope.split_once(':') {
        Some((resource, action)) => {
            format!("{}: {}", resource, action.replace('_', " "))
        }
        None => scope.replace('_', " "),
    }
}
