//! Registered services.
//!
//! A [`RegisteredService`] is a client application allowed to take part
//! in single sign-on. Whether it applies to a presented URL is decided by
//! its [`ServicePattern`]; the registry code never looks at which variant
//! a pattern is, only at [`RegisteredService::matches`].

use crate::error::{BrokerError, Result};
use crate::ticket::Principal;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod manager;
pub mod matcher;

pub use manager::ServicesManager;
pub use matcher::find_match;

/// Id of a service that has not been saved yet.
///
/// The services manager assigns a fresh id when it sees this value.
pub const UNSAVED_ID: i64 = i64::MAX;

// ═══════════════════════════════════════════════════════════════════════
// Patterns
// ═══════════════════════════════════════════════════════════════════════

/// Compiled pattern text.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    fn compile(source: &str, regex_source: &str, case_insensitive: bool) -> Result<Self> {
        let regex = RegexBuilder::new(regex_source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| BrokerError::InvalidServicePattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }
}

/// How a registered service recognizes the URLs it owns.
///
/// # Examples
///
/// ```
/// use ticket_broker::services::ServicePattern;
///
/// let exact = ServicePattern::exact("https://app.example.com/login");
/// assert!(exact.matches("https://app.example.com/login"));
/// assert!(!exact.matches("https://app.example.com/login?x=1"));
///
/// let regex = ServicePattern::regex("^https://.*\\.example\\.com").unwrap();
/// assert!(regex.matches("https://APP.example.com/anything"));
///
/// let wildcard = ServicePattern::wildcard("https://*.example.com/*").unwrap();
/// assert!(wildcard.matches("https://app.example.com/home"));
/// assert!(!wildcard.matches("http://app.example.com/home"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PatternRepr", into = "PatternRepr")]
pub enum ServicePattern {
    /// Byte-for-byte equality with the presented URL.
    Exact(String),

    /// Case-insensitive regular expression search. Anchor with `^`/`$`
    /// to constrain where the match may occur.
    Regex(CompiledPattern),

    /// Anchored glob: `*` matches any run of characters, `?` exactly one.
    Wildcard(CompiledPattern),
}

impl ServicePattern {
    /// Exact-match pattern.
    #[must_use]
    pub fn exact(url: impl Into<String>) -> Self {
        Self::Exact(url.into())
    }

    /// Regular-expression pattern.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidServicePattern`] if the expression
    /// does not compile.
    pub fn regex(pattern: &str) -> Result<Self> {
        CompiledPattern::compile(pattern, pattern, true).map(Self::Regex)
    }

    /// Wildcard (glob) pattern.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidServicePattern`] if the translated
    /// expression does not compile.
    pub fn wildcard(pattern: &str) -> Result<Self> {
        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push('^');
        for c in pattern.chars() {
            match c {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                other => translated.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        translated.push('$');

        CompiledPattern::compile(pattern, &translated, false).map(Self::Wildcard)
    }

    /// Whether `candidate` belongs to this pattern.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(url) => url == candidate,
            Self::Regex(compiled) | Self::Wildcard(compiled) => compiled.regex.is_match(candidate),
        }
    }

    /// Pattern source text as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(url) => url,
            Self::Regex(compiled) | Self::Wildcard(compiled) => &compiled.source,
        }
    }

    const fn variant_name(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::Regex(_) => "regex",
            Self::Wildcard(_) => "wildcard",
        }
    }
}

impl PartialEq for ServicePattern {
    fn eq(&self, other: &Self) -> bool {
        self.variant_name() == other.variant_name() && self.as_str() == other.as_str()
    }
}

impl Eq for ServicePattern {}

impl fmt::Display for ServicePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.variant_name(), self.as_str())
    }
}

/// Stored form of a pattern: variant tag plus source text.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", content = "pattern", rename_all = "snake_case")]
enum PatternRepr {
    Exact(String),
    Regex(String),
    Wildcard(String),
}

impl TryFrom<PatternRepr> for ServicePattern {
    type Error = BrokerError;

    fn try_from(repr: PatternRepr) -> Result<Self> {
        match repr {
            PatternRepr::Exact(url) => Ok(Self::Exact(url)),
            PatternRepr::Regex(pattern) => Self::regex(&pattern),
            PatternRepr::Wildcard(pattern) => Self::wildcard(&pattern),
        }
    }
}

impl From<ServicePattern> for PatternRepr {
    fn from(pattern: ServicePattern) -> Self {
        match pattern {
            ServicePattern::Exact(url) => Self::Exact(url),
            ServicePattern::Regex(compiled) => Self::Regex(compiled.source),
            ServicePattern::Wildcard(compiled) => Self::Wildcard(compiled.source),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Attribute Release
// ═══════════════════════════════════════════════════════════════════════

/// Which principal attributes a service receives on validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "attributes", rename_all = "snake_case")]
pub enum AttributeReleasePolicy {
    /// Release every attribute.
    #[default]
    ReturnAll,

    /// Release only the named attributes.
    ReturnAllowed(BTreeSet<String>),

    /// Release the principal id only.
    ReturnNone,
}

impl AttributeReleasePolicy {
    /// Principal as this policy allows the service to see it.
    #[must_use]
    pub fn apply(&self, principal: &Principal) -> Principal {
        let mut released = principal.clone();
        match self {
            Self::ReturnAll => {}
            Self::ReturnAllowed(allowed) => {
                released.attributes.retain(|name, _| allowed.contains(name));
            }
            Self::ReturnNone => released.attributes.clear(),
        }
        released
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registered Service
// ═══════════════════════════════════════════════════════════════════════

/// A client application permitted to participate in single sign-on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredService {
    /// Registry-assigned id; [`UNSAVED_ID`] until first saved.
    pub id: i64,

    /// Display name.
    pub name: String,

    /// Free-text description.
    #[serde(default)]
    pub description: String,

    /// URLs this service owns.
    pub pattern: ServicePattern,

    /// Match precedence: lower wins.
    #[serde(default)]
    pub evaluation_order: i32,

    /// Disabled services never match.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Whether this service may obtain proxy-granting tickets.
    #[serde(default)]
    pub allowed_to_proxy: bool,

    /// Attributes released on validation.
    #[serde(default)]
    pub attribute_release: AttributeReleasePolicy,
}

const fn enabled_by_default() -> bool {
    true
}

impl RegisteredService {
    /// New unsaved, enabled service.
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: ServicePattern) -> Self {
        Self {
            id: UNSAVED_ID,
            name: name.into(),
            description: String::new(),
            pattern,
            evaluation_order: 0,
            enabled: true,
            allowed_to_proxy: false,
            attribute_release: AttributeReleasePolicy::default(),
        }
    }

    /// Set an explicit id.
    #[must_use]
    pub const fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the evaluation order.
    #[must_use]
    pub const fn with_evaluation_order(mut self, order: i32) -> Self {
        self.evaluation_order = order;
        self
    }

    /// Enable or disable the service.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Allow or forbid proxying.
    #[must_use]
    pub const fn with_proxy(mut self, allowed: bool) -> Self {
        self.allowed_to_proxy = allowed;
        self
    }

    /// Set the attribute release policy.
    #[must_use]
    pub fn with_attribute_release(mut self, policy: AttributeReleasePolicy) -> Self {
        self.attribute_release = policy;
        self
    }

    /// Whether the service has been assigned an id.
    #[must_use]
    pub const fn is_saved(&self) -> bool {
        self.id != UNSAVED_ID
    }

    /// Pattern source text (the "service id" shown to administrators).
    #[must_use]
    pub fn service_id(&self) -> &str {
        self.pattern.as_str()
    }

    /// Whether this service's pattern accepts `candidate`.
    ///
    /// Ignores `enabled`; the matcher filters disabled services.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.pattern.matches(candidate)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_is_case_insensitive_search() {
        let pattern = ServicePattern::regex("^serviceId").unwrap();
        assert!(pattern.matches("serviceId"));
        assert!(pattern.matches("SERVICEID/extra"));
        assert!(!pattern.matches("prefix-serviceId"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let err = ServicePattern::regex("^(unclosed").unwrap_err();
        assert!(matches!(err, BrokerError::InvalidServicePattern { pattern, .. } if pattern == "^(unclosed"));
    }

    #[test]
    fn test_wildcard_escapes_regex_metacharacters() {
        let pattern = ServicePattern::wildcard("https://app.example.com/?page").unwrap();
        assert!(pattern.matches("https://app.example.com/xpage"));
        assert!(!pattern.matches("https://appXexample.com/xpage"));
    }

    #[test]
    fn test_pattern_json_round_trip() {
        let service = RegisteredService::new("app", ServicePattern::regex("^https://app").unwrap())
            .with_id(7)
            .with_attribute_release(AttributeReleasePolicy::ReturnAllowed(
                ["mail".to_string()].into_iter().collect(),
            ));

        let json = serde_json::to_value(&service).unwrap();
        assert_eq!(json["pattern"]["type"], "regex");
        assert_eq!(json["pattern"]["pattern"], "^https://app");

        let back: RegisteredService = serde_json::from_value(json).unwrap();
        assert_eq!(back, service);
        assert!(back.matches("https://app.example.com"));
    }

    #[test]
    fn test_bad_stored_pattern_fails_to_load() {
        let json = serde_json::json!({
            "id": 1,
            "name": "broken",
            "pattern": { "type": "regex", "pattern": "(" },
        });
        assert!(serde_json::from_value::<RegisteredService>(json).is_err());
    }

    #[test]
    fn test_attribute_release() {
        let principal = Principal::new("casuser")
            .with_attribute("mail", "casuser@example.com")
            .with_attribute("phone", "555-0100");

        let allowed = AttributeReleasePolicy::ReturnAllowed(["mail".to_string()].into_iter().collect());
        let released = allowed.apply(&principal);
        assert_eq!(released.attributes.len(), 1);
        assert!(released.attributes.contains_key("mail"));

        assert!(AttributeReleasePolicy::ReturnNone.apply(&principal).attributes.is_empty());
        assert_eq!(AttributeReleasePolicy::ReturnAll.apply(&principal), principal);
    }

    #[test]
    fn test_new_service_defaults() {
        let service = RegisteredService::new("app", ServicePattern::exact("https://app"));
        assert!(!service.is_saved());
        assert!(service.enabled);
        assert!(!service.allowed_to_proxy);
        assert_eq!(service.service_id(), "https://app");
    }
}
