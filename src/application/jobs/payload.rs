use serde::{Deserialize, Serialize};

use crate::domain::targets::{BanRequest, InvalidationTarget};

/// Queue namespaces, one storage per job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Purge,
    Ban,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Purge => "sluice::purge",
            JobKind::Ban => "sluice::ban",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeJobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub uris: Vec<InvalidationTarget>,
    #[serde(default)]
    pub debug: bool,
}

impl PurgeJobPayload {
    pub fn new(uris: Vec<InvalidationTarget>, debug: bool) -> Self {
        let description = Some(format!(
            "Purging {} URI{}",
            uris.len(),
            if uris.len() == 1 { "" } else { "s" }
        ));
        Self {
            description,
            uris,
            debug,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanJobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub bans: Vec<BanRequest>,
    #[serde(default)]
    pub debug: bool,
}

impl BanJobPayload {
    pub fn new(bans: Vec<BanRequest>, debug: bool) -> Self {
        let description = Some(format!(
            "Banning {} quer{}",
            bans.len(),
            if bans.len() == 1 { "y" } else { "ies" }
        ));
        Self {
            description,
            bans,
            debug,
        }
    }
}
