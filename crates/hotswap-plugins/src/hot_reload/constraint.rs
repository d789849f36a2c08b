//! Version constraints
//!
//! Parses dependency specifiers such as `storage`, `storage>=1.2.0` or
//! `codec==2.0` and evaluates candidate versions against them.

use std::cmp::Ordering;
use std::fmt;

use hotswap_kernel::plugin::UnknownOperatorPolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SPECIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*(?:([<>=!~^]+)\s*(\S+))?$")
        .expect("specifier pattern is valid")
});

/// Dependency specifier parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstraintParseError {
    #[error("Empty dependency specifier")]
    Empty,

    #[error("Invalid dependency specifier: {0:?}")]
    Malformed(String),
}

/// Comparison operator of a constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOp {
    /// Bare name, any version satisfies
    Any,
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
    /// Operator token that is not understood (e.g. `~=`, `!=`)
    Unknown(String),
}

impl ConstraintOp {
    fn from_token(token: &str) -> Self {
        match token {
            "==" => Self::Eq,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            ">" => Self::Gt,
            "<" => Self::Lt,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Operator text as written in a specifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => "",
            Self::Eq => "==",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Unknown(token) => token,
        }
    }

    fn admits(&self, ordering: Ordering) -> Option<bool> {
        match self {
            Self::Any => Some(true),
            Self::Eq => Some(ordering == Ordering::Equal),
            Self::Ge => Some(ordering != Ordering::Less),
            Self::Le => Some(ordering != Ordering::Greater),
            Self::Gt => Some(ordering == Ordering::Greater),
            Self::Lt => Some(ordering == Ordering::Less),
            Self::Unknown(_) => None,
        }
    }
}

/// Parse a dotted version into integer components.
///
/// Returns `None` when any component is not a non-negative integer.
pub fn parse_version(version: &str) -> Option<Vec<u64>> {
    version
        .trim()
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Compare two component tuples after right-padding the shorter with zeros.
pub fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// A parsed dependency constraint: `name[operator version]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionConstraint {
    /// Name of the plugin depended upon
    pub name: String,
    /// Comparison operator
    pub op: ConstraintOp,
    /// Required version, absent for bare names
    pub version: Option<String>,
}

impl VersionConstraint {
    /// Parse a specifier such as `"cache>=1.2.0"`.
    pub fn parse(spec: &str) -> Result<Self, ConstraintParseError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ConstraintParseError::Empty);
        }

        let caps = SPECIFIER
            .captures(spec)
            .ok_or_else(|| ConstraintParseError::Malformed(spec.to_string()))?;

        let name = caps[1].to_string();
        let (op, version) = match (caps.get(2), caps.get(3)) {
            (Some(op), Some(version)) => (
                ConstraintOp::from_token(op.as_str()),
                Some(version.as_str().to_string()),
            ),
            _ => (ConstraintOp::Any, None),
        };

        Ok(Self { name, op, version })
    }

    /// Constraint on `name` with no version requirement.
    pub fn any(name: &str) -> Self {
        Self {
            name: name.to_string(),
            op: ConstraintOp::Any,
            version: None,
        }
    }

    /// Whether a version requirement was given.
    pub fn has_requirement(&self) -> bool {
        self.op != ConstraintOp::Any
    }

    /// Requirement text without the name, e.g. `">=1.0.0"`.
    pub fn requirement(&self) -> String {
        match &self.version {
            Some(version) if self.has_requirement() => format!("{}{}", self.op.as_str(), version),
            _ => String::new(),
        }
    }

    /// Evaluate `candidate` using [`UnknownOperatorPolicy::PermitAlways`].
    pub fn check(&self, candidate: &str) -> bool {
        self.check_with_policy(candidate, UnknownOperatorPolicy::PermitAlways)
    }

    /// Evaluate `candidate` against this constraint.
    ///
    /// A bare name is always satisfied. Unknown operators and version
    /// strings that do not parse as dotted integers evaluate to
    /// `policy.outcome()`.
    pub fn check_with_policy(&self, candidate: &str, policy: UnknownOperatorPolicy) -> bool {
        if !self.has_requirement() {
            return true;
        }

        let required = self.version.as_deref().and_then(parse_version);
        let found = parse_version(candidate);
        let (Some(required), Some(found)) = (required, found) else {
            return policy.outcome();
        };

        self.op
            .admits(compare_versions(&found, &required))
            .unwrap_or_else(|| policy.outcome())
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.requirement())
    }
}

impl std::str::FromStr for VersionConstraint {
    type Err = ConstraintParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
