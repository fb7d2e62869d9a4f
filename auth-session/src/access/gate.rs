//! Access gate: decides what a protected region shows for a given snapshot.
//!
//! The gate is presentational. It decides what to render, it does not
//! filter data, and must not be treated as a security boundary.

use crate::models::{CapabilityLevel, Identity};
use crate::services::AuthSnapshot;
use std::fmt;

/// Outcome of one gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDecision {
    /// The session store has not settled yet.
    Loading,
    Unauthenticated,
    Forbidden,
    Authorized,
}

impl AccessDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::Authorized => "authorized",
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Total, side-effect-free decision.
///
/// Loading wins over everything, then a missing identity, then the rank
/// comparison. No requirement means any signed-in identity passes. An
/// identity whose level is not in the rank table ranks 0 and is refused.
pub fn decide(
    identity: Option<&Identity>,
    required: Option<CapabilityLevel>,
    loading: bool,
) -> AccessDecision {
    if loading {
        return AccessDecision::Loading;
    }
    let Some(identity) = identity else {
        return AccessDecision::Unauthenticated;
    };
    match required {
        None => AccessDecision::Authorized,
        Some(level) if identity.capability_level.satisfies(level) => AccessDecision::Authorized,
        Some(_) => AccessDecision::Forbidden,
    }
}

impl AuthSnapshot {
    pub fn access(&self, required: Option<CapabilityLevel>) -> AccessDecision {
        decide(self.identity.as_ref(), required, self.loading)
    }
}

/// Built-in content for the states that are not "show the children".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Waiting,
    SignInRequired,
    InsufficientPermissions,
}

impl Placeholder {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Waiting => "Loading",
            Self::SignInRequired => "Restricted access",
            Self::InsufficientPermissions => "Insufficient permissions",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Waiting => "Checking your session...",
            Self::SignInRequired => "You must sign in to view this page.",
            Self::InsufficientPermissions => {
                "You do not have the permissions required to view this page."
            }
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title(), self.message())
    }
}

/// What a [`ProtectedView`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered<T> {
    Content(T),
    /// The caller's fallback, used for both unauthenticated and forbidden.
    Fallback(T),
    Placeholder(Placeholder),
}

impl<T> Rendered<T> {
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Content(_))
    }

    pub fn into_content(self) -> Option<T> {
        match self {
            Self::Content(content) => Some(content),
            _ => None,
        }
    }
}

/// Wrapper around a protected region.
///
/// ```
/// use auth_session::access::{ProtectedView, Rendered, Placeholder};
/// use auth_session::models::CapabilityLevel;
/// use auth_session::services::AuthSnapshot;
///
/// let view = ProtectedView::new().requires(CapabilityLevel::Verified);
/// let signed_out = AuthSnapshot::default();
/// assert_eq!(
///     view.render(&signed_out, || "listing form"),
///     Rendered::Placeholder(Placeholder::SignInRequired)
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ProtectedView<T> {
    required: Option<CapabilityLevel>,
    fallback: Option<T>,
}

impl<T> Default for ProtectedView<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ProtectedView<T> {
    pub fn new() -> Self {
        Self {
            required: None,
            fallback: None,
        }
    }

    pub fn requires(mut self, level: CapabilityLevel) -> Self {
        self.required = Some(level);
        self
    }

    /// Shown instead of the default placeholders when access is refused.
    pub fn fallback(mut self, fallback: T) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn required(&self) -> Option<CapabilityLevel> {
        self.required
    }

    /// `children` only runs when access is granted.
    pub fn render<F>(self, snapshot: &AuthSnapshot, children: F) -> Rendered<T>
    where
        F: FnOnce() -> T,
    {
        let refused = |placeholder| match self.fallback {
            Some(fallback) => Rendered::Fallback(fallback),
            None => Rendered::Placeholder(placeholder),
        };

        match snapshot.access(self.required) {
            AccessDecision::Loading => Rendered::Placeholder(Placeholder::Waiting),
            AccessDecision::Unauthenticated => refused(Placeholder::SignInRequired),
            AccessDecision::Forbidden => refused(Placeholder::InsufficientPermissions),
            AccessDecision::Authorized => Rendered::Content(children()),
        }
    }
}
