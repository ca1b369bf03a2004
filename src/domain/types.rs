//! Shared domain enumerations and identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Identifier of a configured site/locale (e.g. `en`, `fr`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocaleId(String);

impl LocaleId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parse a locale coming from an untrusted source; blank and `"0"` mean "no locale".
    pub fn parse_optional(value: Option<&str>) -> Option<Self> {
        let value = value?.trim();
        if value.is_empty() || value == "0" {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a configured cache host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a content item in the host application.
pub type ItemId = i64;
pub type SectionId = i64;
pub type TypeId = i64;

/// Origin of an invalidation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A historically tracked URI.
    Tag,
    /// The URI of a changed item, its owner or a related item.
    Element,
    /// A URI supplied by a PURGE binding.
    Binding,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Tag => "tag",
            TargetKind::Element => "element",
            TargetKind::Binding => "binding",
        }
    }
}

/// Kind of rule binding attached to a section/type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BindType {
    Purge,
    Ban,
    #[serde(rename = "FULLBAN")]
    FullBan,
}

impl BindType {
    pub const ALL: [BindType; 3] = [BindType::Purge, BindType::Ban, BindType::FullBan];

    pub fn as_str(self) -> &'static str {
        match self {
            BindType::Purge => "PURGE",
            BindType::Ban => "BAN",
            BindType::FullBan => "FULLBAN",
        }
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for BindType {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PURGE" => Ok(BindType::Purge),
            "BAN" => Ok(BindType::Ban),
            "FULLBAN" => Ok(BindType::FullBan),
            other => Err(DomainError::invalid(
                "bind_type",
                format!("unknown bind type `{other}`"),
            )),
        }
    }
}
