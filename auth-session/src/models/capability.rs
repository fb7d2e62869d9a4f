//! Capability levels and the fixed rank table the access gate compares.
//!
//! # Levels (ascending)
//!
//! | Level        | Rank |
//! |--------------|------|
//! | `registered` | 1    |
//! | `verified`   | 2    |
//! | `premium`    | 3    |
//! | `admin`      | 4    |
//! | `lawyer`     | 5    |
//! | `superadmin` | 6    |
//!
//! Anything else ranks 0, below every real level, so unknown values are
//! always denied.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rank given to level strings that are not in the table.
pub const UNRECOGNIZED_RANK: u8 = 0;

/// Capability level of an identity, or required by a protected screen.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityLevel {
    #[default]
    Registered,
    Verified,
    Premium,
    Admin,
    Lawyer,
    Superadmin,
}

impl CapabilityLevel {
    /// Every level, lowest first.
    pub const ALL: [CapabilityLevel; 6] = [
        CapabilityLevel::Registered,
        CapabilityLevel::Verified,
        CapabilityLevel::Premium,
        CapabilityLevel::Admin,
        CapabilityLevel::Lawyer,
        CapabilityLevel::Superadmin,
    ];

    /// Parse a level name. Case and surrounding whitespace are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "registered" => Some(Self::Registered),
            "verified" => Some(Self::Verified),
            "premium" => Some(Self::Premium),
            "admin" => Some(Self::Admin),
            "lawyer" => Some(Self::Lawyer),
            "superadmin" => Some(Self::Superadmin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Verified => "verified",
            Self::Premium => "premium",
            Self::Admin => "admin",
            Self::Lawyer => "lawyer",
            Self::Superadmin => "superadmin",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Registered => 1,
            Self::Verified => 2,
            Self::Premium => 3,
            Self::Admin => 4,
            Self::Lawyer => 5,
            Self::Superadmin => 6,
        }
    }

    /// True if this level may open something that requires `required`.
    pub fn satisfies(&self, required: CapabilityLevel) -> bool {
        self.rank() >= required.rank()
    }

    /// Tiers a new account may ask for when signing itself up.
    pub fn is_self_service(&self) -> bool {
        matches!(self, Self::Registered | Self::Verified | Self::Premium)
    }
}

impl fmt::Display for CapabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Level stored on an identity record.
///
/// Rows written by other tools can carry values outside the table (the old
/// `visitor` tier, typos). They are kept verbatim so they round-trip, and
/// rank 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssignedCapability {
    Known(CapabilityLevel),
    Unrecognized(String),
}

impl AssignedCapability {
    pub fn parse(s: &str) -> Self {
        match CapabilityLevel::parse(s) {
            Some(level) => Self::Known(level),
            None => Self::Unrecognized(s.to_string()),
        }
    }

    pub fn level(&self) -> Option<CapabilityLevel> {
        match self {
            Self::Known(level) => Some(*level),
            Self::Unrecognized(_) => None,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Known(level) => level.rank(),
            Self::Unrecognized(_) => UNRECOGNIZED_RANK,
        }
    }

    pub fn satisfies(&self, required: CapabilityLevel) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(level) => level.as_str(),
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl From<CapabilityLevel> for AssignedCapability {
    fn from(level: CapabilityLevel) -> Self {
        Self::Known(level)
    }
}

impl From<String> for AssignedCapability {
    fn from(raw: String) -> Self {
        match CapabilityLevel::parse(&raw) {
            Some(level) => Self::Known(level),
            None => Self::Unrecognized(raw),
        }
    }
}

impl From<AssignedCapability> for String {
    fn from(assigned: AssignedCapability) -> Self {
        match assigned {
            AssignedCapability::Known(level) => level.as_str().to_string(),
            AssignedCapability::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for AssignedCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rank of a level name, 0 when it is not in the table.
pub fn rank_of(level: &str) -> u8 {
    CapabilityLevel::parse(level)
        .map(|l| l.rank())
        .unwrap_or(UNRECOGNIZED_RANK)
}

/// String form of the gate comparison: `rank(user) >= rank(required)`.
pub fn has_required_role(user_level: &str, required_level: &str) -> bool {
    rank_of(user_level) >= rank_of(required_level)
}
