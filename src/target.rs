//! Parsing of connection target strings.
//!
//! A target has the shape `[scheme://][agent/]endpoint`, for example
//! `consul://127.0.0.1:8500/svc-a`. Targets without a scheme are dialed
//! directly, and are reported with the [PASS_THROUGH] scheme.

use std::fmt;

/// The scheme of targets which name an address directly.
pub const PASS_THROUGH: &str = "pass_through";

const SCHEME_SEPARATOR: &str = "://";

/// A structured decomposition of a connection's endpoint string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Target {
    pub scheme: String,
    pub agent: String,
    pub endpoint: String,
}

impl Target {
    /// Parses a target string.
    ///
    /// Parsing never fails. Input without a `"://"` separator is treated as
    /// an address to be dialed directly. If a scheme is present but no `/`
    /// follows the agent, the whole input is kept as the endpoint.
    pub fn parse(target: &str) -> Self {
        let Some((scheme, rest)) = target.split_once(SCHEME_SEPARATOR) else {
            return Self::pass_through(target);
        };
        // "://foo" has no scheme to speak of.
        if scheme.is_empty() {
            return Self::pass_through(target);
        }
        let Some((agent, endpoint)) = rest.split_once('/') else {
            return Self {
                scheme: scheme.to_string(),
                agent: String::new(),
                endpoint: target.to_string(),
            };
        };
        Self {
            scheme: scheme.to_string(),
            agent: agent.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    fn pass_through(target: &str) -> Self {
        Self {
            scheme: PASS_THROUGH.to_string(),
            agent: String::new(),
            endpoint: target.to_string(),
        }
    }

    /// Returns true if this target should be dialed without a resolver.
    pub fn is_pass_through(&self) -> bool {
        self.scheme == PASS_THROUGH
    }
}

impl From<&'_ str> for Target {
    fn from(s: &'_ str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pass_through() {
            return f.write_str(&self.endpoint);
        }
        write!(f, "{}://{}/{}", self.scheme, self.agent, self.endpoint)
    }
}
